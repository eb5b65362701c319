//! Configuration structures and loading logic

use crate::engine::EngineSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub host: String,
    pub api_port: u16,

    /// Registry of managed services, rewritten when defaults are saved
    pub services_file: PathBuf,

    pub vllm_binary: String,

    /// Address passed to `vllm serve --host`
    pub serve_host: String,

    /// Shell snippet run before the server starts, e.g. `source .venv/bin/activate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_preamble: Option<String>,

    pub nvidia_smi_path: String,
    pub gpu_query_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
    pub cpu_sample_interval_ms: u64,
    pub launch_timeout_secs: u64,
    pub script_start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub system_cpu_sample_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            api_port: 9000,
            services_file: PathBuf::from("config/services.toml"),
            vllm_binary: "vllm".to_string(),
            serve_host: "0.0.0.0".to_string(),
            launch_preamble: None,
            nvidia_smi_path: "nvidia-smi".to_string(),
            gpu_query_timeout_secs: 5,
            health_check_timeout_secs: 2,
            cpu_sample_interval_ms: 100,
            launch_timeout_secs: 30,
            script_start_timeout_secs: 300,
            stop_timeout_secs: 30,
            system_cpu_sample_ms: 1000,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("VLLM_MANAGER_API_PORT") {
            config.api_port = port
                .parse()
                .context("Invalid VLLM_MANAGER_API_PORT value")?;
        }
        if let Ok(host) = std::env::var("VLLM_MANAGER_HOST") {
            config.host = host;
        }
        if let Ok(services_file) = std::env::var("VLLM_MANAGER_SERVICES_FILE") {
            config.services_file = PathBuf::from(services_file);
        }
        if let Ok(binary) = std::env::var("VLLM_MANAGER_VLLM_BINARY") {
            config.vllm_binary = binary;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.vllm_binary.trim().is_empty() {
            anyhow::bail!("vllm_binary cannot be empty");
        }

        let timeouts = [
            ("gpu_query_timeout_secs", self.gpu_query_timeout_secs),
            ("health_check_timeout_secs", self.health_check_timeout_secs),
            ("cpu_sample_interval_ms", self.cpu_sample_interval_ms),
            ("launch_timeout_secs", self.launch_timeout_secs),
            ("script_start_timeout_secs", self.script_start_timeout_secs),
            ("stop_timeout_secs", self.stop_timeout_secs),
            ("system_cpu_sample_ms", self.system_cpu_sample_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            anyhow::bail!("{name} must be greater than 0");
        }

        // Ensure services file directory exists or can be created
        if let Some(parent) = self.services_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create services file directory: {:?}", parent))?;
        }

        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            vllm_binary: self.vllm_binary.clone(),
            serve_host: self.serve_host.clone(),
            launch_preamble: self.launch_preamble.clone(),
            launch_timeout: Duration::from_secs(self.launch_timeout_secs),
            script_start_timeout: Duration::from_secs(self.script_start_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            ..Default::default()
        }
    }

    pub fn gpu_query_timeout(&self) -> Duration {
        Duration::from_secs(self.gpu_query_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn cpu_sample_interval(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_interval_ms)
    }

    pub fn system_cpu_sample(&self) -> Duration {
        Duration::from_millis(self.system_cpu_sample_ms)
    }
}
