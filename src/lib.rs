//! vLLM Manager - supervisory control plane for vLLM inference servers
//!
//! Discovers the live state of each configured service by cross-referencing
//! the OS process table, the GPU driver and the service's HTTP port, and
//! starts or stops services with validated launch parameters.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod health;
pub mod launcher;
pub mod logs;
pub mod metrics;
pub mod params;
pub mod process;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod system;

pub use config::ManagerConfig;
pub use engine::{Engine, EngineSettings, Probes, StartOutcome, StopOutcome};
pub use error::{ManagerError, ManagerResult};
pub use gpu::{GpuDeviceInfo, GpuProbe, NvidiaSmiProbe};
pub use health::{HttpReachability, ReachabilityProbe};
pub use launcher::{Launcher, ShellLauncher};
pub use params::{Dtype, LaunchParams, LaunchParamsInput, ValidationError};
pub use process::{ProcessProbe, SystemProcessProbe};
pub use registry::ServiceRegistry;
pub use service::{LaunchMode, ServiceConfig, ServiceDefinition};
pub use snapshot::{RunningProcess, RuntimeSnapshot, ServiceSummary};
pub use storage::{FileSystemStorage, StorageBackend};
