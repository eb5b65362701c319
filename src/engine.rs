//! Reconciliation engine
//!
//! Derives each service's runtime state from the probes on every query and
//! mutates it through the launcher. Nothing about a service's runtime is
//! cached between calls; the registry is the only shared state.

use crate::error::{ManagerError, ManagerResult};
use crate::gpu::{GpuDeviceInfo, GpuProbe};
use crate::health::ReachabilityProbe;
use crate::launcher::{CommandError, CommandOutput, Launcher, ShellCommand};
use crate::logs::{self, LogTail};
use crate::params::{LaunchParams, LaunchParamsInput};
use crate::process::{MetricsError, ProcessProbe};
use crate::registry::ServiceRegistry;
use crate::service::{LaunchMode, ServiceDefinition};
use crate::snapshot::{RunningProcess, RuntimeSnapshot, ServiceSummary};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Positional arguments of the model launch script, in order. Everything
/// from `$10` on is an extra `vllm serve` argument.
const LAUNCH_LOCALS: &str = r#"log_file="$1"; vllm="$2"; model="$3"; tp="$4"; port="$5"; host="$6"; util="$7"; max_len="$8"; dtype="$9"; extra_args=("${@:10}")"#;

const LAUNCH_BODY: &str = r#"mkdir -p "$(dirname "$log_file")"
nohup "$vllm" serve "$model" \
    --tensor-parallel-size "$tp" \
    --port "$port" \
    --host "$host" \
    --gpu-memory-utilization "$util" \
    --max-model-len "$max_len" \
    --dtype "$dtype" \
    "${extra_args[@]}" > "$log_file" 2>&1 < /dev/null &
echo "Launched $model on port $port (pid $!), logging to $log_file""#;

/// The external collaborators the engine reconciles against
#[derive(Clone)]
pub struct Probes {
    pub process: Arc<dyn ProcessProbe>,
    pub gpu: Arc<dyn GpuProbe>,
    pub reachability: Arc<dyn ReachabilityProbe>,
    pub launcher: Arc<dyn Launcher>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub vllm_binary: String,
    pub serve_host: String,
    /// Shell snippet run before the server, e.g. environment activation
    pub launch_preamble: Option<String>,
    pub launch_timeout: Duration,
    pub script_start_timeout: Duration,
    pub stop_timeout: Duration,
    pub stop_poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vllm_binary: "vllm".to_string(),
            serve_host: "0.0.0.0".to_string(),
            launch_preamble: None,
            launch_timeout: Duration::from_secs(30),
            script_start_timeout: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(30),
            stop_poll_interval: Duration::from_millis(500),
        }
    }
}

/// How a start request ended. None of these are failures.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// The launch command returned. In model-path mode this does not mean
    /// the server is healthy yet; callers poll the status.
    Started {
        output: String,
        /// None for script-mode services, which take no parameters
        params: Option<LaunchParams>,
    },
    /// The launcher outlived its wait; the server keeps starting
    StartingInBackground { params: Option<LaunchParams> },
    AlreadyRunning { pid: u32 },
}

impl StartOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            StartOutcome::Started { .. } => "started",
            StartOutcome::StartingInBackground { .. } => "starting_in_background",
            StartOutcome::AlreadyRunning { .. } => "already_running",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { output: String },
    NotRunning,
}

impl StopOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            StopOutcome::Stopped { .. } => "stopped",
            StopOutcome::NotRunning => "not_running",
        }
    }
}

/// Stored configuration of a service as shown to operators
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfigView {
    pub params: LaunchParams,
    pub model_path: Option<String>,
    pub extra_args: String,
}

pub struct Engine {
    registry: Arc<ServiceRegistry>,
    probes: Probes,
    settings: EngineSettings,
    /// Serializes check-then-act sequences per service key
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(registry: Arc<ServiceRegistry>, probes: Probes, settings: EngineSettings) -> Self {
        Self {
            registry,
            probes,
            settings,
            key_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    async fn service(&self, key: &str) -> ManagerResult<ServiceDefinition> {
        self.registry
            .get(key)
            .await
            .ok_or_else(|| ManagerError::not_found(key))
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks.entry(key.to_string()).or_default().clone()
    }

    /// Derive the current runtime state of a service.
    ///
    /// GPU and port probes only run once a live process is confirmed, and
    /// their failures only blank their own fields.
    pub async fn status_of(&self, service: &ServiceDefinition) -> RuntimeSnapshot {
        let pid = match self.probes.process.find_process(&service.pattern).await {
            Ok(Some(pid)) => pid,
            Ok(None) => return RuntimeSnapshot::Stopped,
            Err(e) => return self.status_error(service, e),
        };

        let metrics = match self.probes.process.process_metrics(pid).await {
            Ok(metrics) => metrics,
            Err(MetricsError::NotFound(_)) => {
                tracing::debug!(service = %service.key, pid, "Process exited during status check");
                return RuntimeSnapshot::Stopped;
            }
            Err(MetricsError::Other(e)) => return self.status_error(service, e),
        };

        let (port_accessible, gpu_memory_mb) = tokio::join!(
            self.probes
                .reachability
                .check_health(service.effective_port()),
            self.probes.gpu.memory_for_process(pid),
        );

        RuntimeSnapshot::Running(RunningProcess {
            pid,
            cpu_percent: metrics.cpu_percent,
            memory_mb: metrics.memory_mb,
            port_accessible,
            gpu_memory_mb,
            started_at: metrics.started_at,
        })
    }

    fn status_error(&self, service: &ServiceDefinition, err: anyhow::Error) -> RuntimeSnapshot {
        tracing::warn!(service = %service.key, error = %err, "Status check failed");
        crate::metrics::record_status_error(&service.key);
        RuntimeSnapshot::Error {
            message: format!("{err:#}"),
        }
    }

    pub async fn status_by_key(&self, key: &str) -> ManagerResult<RuntimeSnapshot> {
        let service = self.service(key).await?;
        Ok(self.status_of(&service).await)
    }

    /// Start a service with `input` merged over its defaults.
    ///
    /// Parameters are validated before anything else happens, so an invalid
    /// request never mutates the registry or reaches the launcher.
    pub async fn start(
        &self,
        key: &str,
        input: Option<LaunchParamsInput>,
        persist_default: bool,
    ) -> ManagerResult<StartOutcome> {
        let service = self.service(key).await?;
        let params = input
            .unwrap_or_default()
            .resolve(&service.default_params())?;

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let result = self.start_locked(&service, params, persist_default).await;

        let outcome = result.as_ref().map_or("error", StartOutcome::tag);
        crate::metrics::record_service_start(key, outcome);

        result
    }

    async fn start_locked(
        &self,
        service: &ServiceDefinition,
        params: LaunchParams,
        persist_default: bool,
    ) -> ManagerResult<StartOutcome> {
        match self.status_of(service).await {
            RuntimeSnapshot::Running(process) => {
                tracing::info!(service = %service.key, pid = process.pid, "Service already running");
                return Ok(StartOutcome::AlreadyRunning { pid: process.pid });
            }
            RuntimeSnapshot::Error { message } => {
                tracing::warn!(service = %service.key, %message, "Status unknown, attempting start");
            }
            RuntimeSnapshot::Stopped => {}
        }

        if persist_default {
            self.registry
                .commit_default_params(&service.key, params.clone())
                .await?;
            tracing::info!(service = %service.key, "Saved launch parameters as default");
        }

        match &service.launch_mode {
            LaunchMode::ModelPath { model_path, .. } => {
                self.launch_model(service, model_path, params).await
            }
            LaunchMode::Script { start_script, .. } => {
                self.launch_script(service, start_script).await
            }
        }
    }

    /// Build the `bash -c` invocation that backgrounds a vLLM server
    pub fn launch_command(
        &self,
        service: &ServiceDefinition,
        model_path: &str,
        params: &LaunchParams,
    ) -> ShellCommand {
        let script = match &self.settings.launch_preamble {
            Some(preamble) => format!("{LAUNCH_LOCALS}\n{preamble}\n{LAUNCH_BODY}"),
            None => format!("{LAUNCH_LOCALS}\n{LAUNCH_BODY}"),
        };

        let mut args = vec![
            service.log_file().to_string_lossy().into_owned(),
            self.settings.vllm_binary.clone(),
            model_path.to_string(),
            params.tensor_parallel_size.to_string(),
            params.port.to_string(),
            self.settings.serve_host.clone(),
            params.gpu_memory_utilization.to_string(),
            params.max_model_len.to_string(),
            params.dtype.to_string(),
        ];
        args.extend(service.extra_args.iter().cloned());

        ShellCommand::inline(
            script,
            &format!("vllm-launch-{}", service.key),
            args,
            self.settings.launch_timeout,
        )
        .with_env("CUDA_VISIBLE_DEVICES", params.cuda_visible_devices())
    }

    async fn launch_model(
        &self,
        service: &ServiceDefinition,
        model_path: &str,
        params: LaunchParams,
    ) -> ManagerResult<StartOutcome> {
        let command = self.launch_command(service, model_path, &params);

        tracing::info!(
            service = %service.key,
            model = %model_path,
            port = params.port,
            gpus = %params.cuda_visible_devices(),
            "Launching vLLM server"
        );

        match self.probes.launcher.run(&command).await {
            Ok(output) if output.success => Ok(StartOutcome::Started {
                output: output.stdout.trim().to_string(),
                params: Some(params),
            }),
            Ok(output) => Err(ManagerError::Launch {
                message: exit_message(&output),
                stderr: output.stderr,
            }),
            Err(CommandError::TimedOut(_)) => {
                tracing::info!(service = %service.key, "Launcher still running, server starting in background");
                Ok(StartOutcome::StartingInBackground {
                    params: Some(params),
                })
            }
            Err(e @ CommandError::Spawn(_)) => Err(ManagerError::Launch {
                message: e.to_string(),
                stderr: String::new(),
            }),
        }
    }

    async fn launch_script(
        &self,
        service: &ServiceDefinition,
        start_script: &Path,
    ) -> ManagerResult<StartOutcome> {
        let command = ShellCommand::script(start_script, self.settings.script_start_timeout);

        tracing::info!(service = %service.key, script = %start_script.display(), "Running start script");

        let output = self
            .probes
            .launcher
            .run(&command)
            .await
            .map_err(|e| ManagerError::Launch {
                message: e.to_string(),
                stderr: String::new(),
            })?;

        if !output.success {
            return Err(ManagerError::Launch {
                message: exit_message(&output),
                stderr: output.stderr,
            });
        }

        Ok(StartOutcome::Started {
            output: output.stdout.trim().to_string(),
            params: None,
        })
    }

    /// Stop a running service. A service that is not running is reported,
    /// and its stop mechanism is never invoked.
    pub async fn stop(&self, key: &str) -> ManagerResult<StopOutcome> {
        let service = self.service(key).await?;

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let result = self.stop_locked(&service).await;

        let outcome = result.as_ref().map_or("error", StopOutcome::tag);
        crate::metrics::record_service_stop(key, outcome);

        result
    }

    async fn stop_locked(&self, service: &ServiceDefinition) -> ManagerResult<StopOutcome> {
        let pid = match self.status_of(service).await {
            RuntimeSnapshot::Running(process) => process.pid,
            _ => return Ok(StopOutcome::NotRunning),
        };

        match &service.launch_mode {
            LaunchMode::Script { stop_script, .. }
            | LaunchMode::ModelPath {
                stop_script: Some(stop_script),
                ..
            } => self.run_stop_script(service, stop_script).await,
            LaunchMode::ModelPath {
                stop_script: None, ..
            } => self.terminate_and_wait(service, pid).await,
        }
    }

    async fn run_stop_script(
        &self,
        service: &ServiceDefinition,
        stop_script: &Path,
    ) -> ManagerResult<StopOutcome> {
        let command = ShellCommand::script(stop_script, self.settings.stop_timeout);

        tracing::info!(service = %service.key, script = %stop_script.display(), "Running stop script");

        let output = self
            .probes
            .launcher
            .run(&command)
            .await
            .map_err(|e| ManagerError::Stop {
                message: e.to_string(),
                stderr: String::new(),
            })?;

        if !output.success {
            return Err(ManagerError::Stop {
                message: exit_message(&output),
                stderr: output.stderr,
            });
        }

        Ok(StopOutcome::Stopped {
            output: output.stdout.trim().to_string(),
        })
    }

    /// SIGTERM, then wait for the pattern to stop matching. No SIGKILL.
    async fn terminate_and_wait(
        &self,
        service: &ServiceDefinition,
        pid: u32,
    ) -> ManagerResult<StopOutcome> {
        tracing::info!(service = %service.key, pid, "Sending SIGTERM");

        self.probes
            .launcher
            .terminate(pid)
            .await
            .map_err(|e| ManagerError::Stop {
                message: format!("{e:#}"),
                stderr: String::new(),
            })?;

        let deadline = tokio::time::Instant::now() + self.settings.stop_timeout;

        loop {
            match self.probes.process.find_process(&service.pattern).await {
                Ok(None) => {
                    return Ok(StopOutcome::Stopped {
                        output: format!("Process {pid} terminated"),
                    });
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    tracing::warn!(service = %service.key, error = %e, "Process scan failed while stopping");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ManagerError::Stop {
                    message: format!(
                        "process {pid} still running {}s after SIGTERM",
                        self.settings.stop_timeout.as_secs()
                    ),
                    stderr: String::new(),
                });
            }

            tokio::time::sleep(self.settings.stop_poll_interval).await;
        }
    }

    /// Every configured service with its live status, keyed by service key
    pub async fn list_service_statuses(&self) -> BTreeMap<String, ServiceSummary> {
        let services = self.registry.list().await;

        let snapshots =
            futures::future::join_all(services.iter().map(|service| self.status_of(service)))
                .await;

        let summaries: BTreeMap<String, ServiceSummary> = services
            .into_iter()
            .zip(snapshots)
            .map(|(service, runtime)| {
                // Saved defaults take precedence over the legacy fields
                let gpus = service
                    .config
                    .default_params
                    .as_ref()
                    .map_or_else(|| service.config.gpus.clone(), |p| p.gpus.clone());
                let summary = ServiceSummary {
                    name: service.config.name.clone(),
                    port: service.effective_port(),
                    gpus,
                    default_params: service.default_params(),
                    runtime,
                };
                (service.key, summary)
            })
            .collect();

        crate::metrics::update_running_count(
            summaries
                .values()
                .filter(|s| s.runtime.is_running())
                .count(),
        );

        summaries
    }

    pub async fn list_gpu_devices(&self) -> Vec<GpuDeviceInfo> {
        self.probes.gpu.list_devices().await
    }

    pub async fn get_service_config(&self, key: &str) -> ManagerResult<ServiceConfigView> {
        let service = self.service(key).await?;
        Ok(ServiceConfigView {
            params: service.default_params(),
            model_path: service.config.model_path.clone(),
            extra_args: service.config.extra_args.clone(),
        })
    }

    /// Validate `input` over the current defaults and persist the result
    pub async fn save_service_config(
        &self,
        key: &str,
        input: &LaunchParamsInput,
    ) -> ManagerResult<LaunchParams> {
        let service = self.service(key).await?;
        let params = input.resolve(&service.default_params())?;

        self.registry
            .commit_default_params(key, params.clone())
            .await?;

        tracing::info!(service = %key, "Default launch parameters saved");

        Ok(params)
    }

    pub async fn tail_logs(&self, key: &str, lines: usize) -> ManagerResult<LogTail> {
        let service = self.service(key).await?;
        logs::tail_file(&service.log_file(), lines)
            .await
            .map_err(|e| ManagerError::io(format!("{}: {e}", service.log_file().display())))
    }
}

fn exit_message(output: &CommandOutput) -> String {
    match output.exit_code {
        Some(code) => format!("command exited with status {code}"),
        None => "command terminated by signal".to_string(),
    }
}
