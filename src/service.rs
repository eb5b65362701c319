//! Service definitions loaded from the registry file

use crate::error::{ManagerError, ManagerResult};
use crate::params::LaunchParams;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted configuration for a single service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    /// Regex matched against a process's full command line
    pub process_pattern: String,

    pub port: u16,

    /// Legacy GPU assignment, used only when `default_params` is absent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_script: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_script: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Extra `vllm serve` arguments, split with shell quoting rules
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_args: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_params: Option<LaunchParams>,
}

/// How a service is started and stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Command synthesized from the model path and launch parameters.
    /// Without a stop script the discovered process is sent SIGTERM.
    ModelPath {
        model_path: String,
        stop_script: Option<PathBuf>,
    },
    /// Legacy external start/stop scripts
    Script {
        start_script: PathBuf,
        stop_script: PathBuf,
    },
}

impl LaunchMode {
    fn resolve(key: &str, config: &ServiceConfig) -> ManagerResult<Self> {
        if let Some(model_path) = config.model_path.as_ref().filter(|p| !p.is_empty()) {
            return Ok(LaunchMode::ModelPath {
                model_path: model_path.clone(),
                stop_script: config.stop_script.clone(),
            });
        }

        match (&config.start_script, &config.stop_script) {
            (Some(start), Some(stop)) => Ok(LaunchMode::Script {
                start_script: start.clone(),
                stop_script: stop.clone(),
            }),
            (Some(_), None) => Err(ManagerError::Config {
                message: format!("service '{key}' has start_script but no stop_script"),
            }),
            _ => Err(ManagerError::Config {
                message: format!("service '{key}' needs model_path or start_script"),
            }),
        }
    }
}

/// A registry entry with its pattern compiled and launch mode resolved
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub key: String,
    pub config: ServiceConfig,
    pub pattern: Regex,
    pub launch_mode: LaunchMode,
    /// `extra_args` split into argv words
    pub extra_args: Vec<String>,
}

impl ServiceDefinition {
    /// Resolve a persisted config, rejecting anything that cannot be launched
    /// or matched
    pub fn from_config(key: &str, config: ServiceConfig) -> ManagerResult<Self> {
        if config.process_pattern.trim().is_empty() {
            return Err(ManagerError::Config {
                message: format!("service '{key}' has an empty process_pattern"),
            });
        }

        let pattern = Regex::new(&config.process_pattern).map_err(|e| ManagerError::Config {
            message: format!("service '{key}' process_pattern: {e}"),
        })?;

        let launch_mode = LaunchMode::resolve(key, &config)?;

        let extra_args =
            shell_words::split(&config.extra_args).map_err(|e| ManagerError::Config {
                message: format!("service '{key}' extra_args: {e}"),
            })?;

        if let Some(params) = &config.default_params {
            params.check().map_err(|e| ManagerError::Config {
                message: format!("service '{key}' default_params: {e}"),
            })?;
        }

        Ok(Self {
            key: key.to_string(),
            config,
            pattern,
            launch_mode,
            extra_args,
        })
    }

    /// Persisted defaults, or the built-in fallback derived from the service
    pub fn default_params(&self) -> LaunchParams {
        self.config
            .default_params
            .clone()
            .unwrap_or_else(|| LaunchParams::fallback(self.config.port, &self.config.gpus))
    }

    /// Port the service is expected to listen on
    pub fn effective_port(&self) -> u16 {
        self.config
            .default_params
            .as_ref()
            .map_or(self.config.port, |p| p.port)
    }

    pub fn log_file(&self) -> PathBuf {
        self.config
            .log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/vllm_{}.log", self.key)))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn model_service(pattern: &str, port: u16) -> ServiceConfig {
        ServiceConfig {
            name: "Model X".to_string(),
            process_pattern: pattern.to_string(),
            port,
            gpus: vec![0, 1],
            model_path: Some("/models/model-x".to_string()),
            start_script: None,
            stop_script: None,
            log_file: Some(PathBuf::from("/tmp/vllm-test/model-x.log")),
            extra_args: "--trust-remote-code".to_string(),
            default_params: None,
        }
    }

    pub fn script_service(pattern: &str, port: u16) -> ServiceConfig {
        ServiceConfig {
            name: "Legacy".to_string(),
            process_pattern: pattern.to_string(),
            port,
            gpus: Vec::new(),
            model_path: None,
            start_script: Some(PathBuf::from("/opt/legacy/start.sh")),
            stop_script: Some(PathBuf::from("/opt/legacy/stop.sh")),
            log_file: None,
            extra_args: String::new(),
            default_params: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_model_path_mode() {
        let def = ServiceDefinition::from_config("s1", model_service("vllm serve model-x", 8000))
            .unwrap();
        assert_eq!(
            def.launch_mode,
            LaunchMode::ModelPath {
                model_path: "/models/model-x".to_string(),
                stop_script: None,
            }
        );
        assert!(def.pattern.is_match("python -m vllm serve model-x --port 8000"));
    }

    #[test]
    fn test_script_mode() {
        let def = ServiceDefinition::from_config("legacy", script_service("legacy_server", 8100))
            .unwrap();
        assert!(matches!(def.launch_mode, LaunchMode::Script { .. }));
        assert_eq!(def.log_file(), PathBuf::from("/tmp/vllm_legacy.log"));
    }

    #[test]
    fn test_missing_launch_mode_rejected() {
        let mut config = model_service("x", 8000);
        config.model_path = None;
        let err = ServiceDefinition::from_config("s1", config).unwrap_err();
        assert!(matches!(err, ManagerError::Config { .. }));
    }

    #[test]
    fn test_start_script_without_stop_rejected() {
        let mut config = script_service("x", 8000);
        config.stop_script = None;
        assert!(ServiceDefinition::from_config("s1", config).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = model_service("vllm serve (", 8000);
        assert!(ServiceDefinition::from_config("s1", config).is_err());
    }

    #[test]
    fn test_extra_args_keep_quoted_words() {
        let mut config = model_service("x", 8000);
        config.extra_args =
            r#"--trust-remote-code --override-generation-config '{"temperature": 0.7}'"#
                .to_string();
        let def = ServiceDefinition::from_config("s1", config).unwrap();
        assert_eq!(
            def.extra_args,
            vec![
                "--trust-remote-code",
                "--override-generation-config",
                r#"{"temperature": 0.7}"#,
            ]
        );
    }

    #[test]
    fn test_unbalanced_extra_args_rejected() {
        let mut config = model_service("x", 8000);
        config.extra_args = "--chat-template '{{ messages".to_string();
        let err = ServiceDefinition::from_config("s1", config).unwrap_err();
        assert!(matches!(err, ManagerError::Config { .. }));
    }

    #[test]
    fn test_default_params_fallback_uses_service_fields() {
        let def = ServiceDefinition::from_config("s1", model_service("x", 8000)).unwrap();
        let params = def.default_params();
        assert_eq!(params.gpus, vec![0, 1]);
        assert_eq!(params.port, 8000);
        assert_eq!(def.effective_port(), 8000);
    }

    #[test]
    fn test_effective_port_prefers_default_params() {
        let mut config = model_service("x", 8000);
        config.default_params = Some(LaunchParams::fallback(8005, &[]));
        let def = ServiceDefinition::from_config("s1", config).unwrap();
        assert_eq!(def.effective_port(), 8005);
    }
}
