//! Launch parameters for a vLLM server and their bounds
//!
//! [`LaunchParams`] is only ever constructed through validation, so a value
//! held by the registry is always within bounds. Requests carry a partial
//! [`LaunchParamsInput`] whose absent fields fall back to the service's
//! defaults before the merged result is validated as a whole.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Exclusive upper bound for a GPU index.
pub const GPU_INDEX_LIMIT: i64 = 16;

pub const GPUS_RANGE: &str = "distinct integers in [0, 16)";
pub const PORT_RANGE: &str = "[1024, 65535]";
pub const TENSOR_PARALLEL_RANGE: &str = "[1, 16]";
pub const GPU_MEMORY_UTILIZATION_RANGE: &str = "[0.1, 1.0]";
pub const MAX_MODEL_LEN_RANGE: &str = "[256, 131072]";
pub const DTYPE_CHOICES: &str = "one of auto, float16, bfloat16, float32";

/// A launch parameter outside its declared bound
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: expected {expected}, got {actual}")]
pub struct ValidationError {
    pub field: &'static str,
    pub expected: &'static str,
    pub actual: String,
}

impl ValidationError {
    pub fn new(field: &'static str, expected: &'static str, actual: impl fmt::Display) -> Self {
        Self {
            field,
            expected,
            actual: actual.to_string(),
        }
    }
}

/// Model weight precision passed to `--dtype`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    #[default]
    Auto,
    Float16,
    Bfloat16,
    Float32,
}

impl Dtype {
    pub fn as_str(self) -> &'static str {
        match self {
            Dtype::Auto => "auto",
            Dtype::Float16 => "float16",
            Dtype::Bfloat16 => "bfloat16",
            Dtype::Float32 => "float32",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dtype {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Dtype::Auto),
            "float16" => Ok(Dtype::Float16),
            "bfloat16" => Ok(Dtype::Bfloat16),
            "float32" => Ok(Dtype::Float32),
            other => Err(ValidationError::new("dtype", DTYPE_CHOICES, other)),
        }
    }
}

/// Validated launch parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchParams {
    pub gpus: Vec<u32>,
    pub port: u16,
    pub tensor_parallel_size: u32,
    pub gpu_memory_utilization: f64,
    pub max_model_len: u32,
    pub dtype: Dtype,
}

impl LaunchParams {
    /// Defaults used when a service has no persisted `default_params`
    pub fn fallback(port: u16, gpus: &[u32]) -> Self {
        Self {
            gpus: if gpus.is_empty() { vec![0] } else { gpus.to_vec() },
            port,
            tensor_parallel_size: 1,
            gpu_memory_utilization: 0.9,
            max_model_len: 4096,
            dtype: Dtype::Auto,
        }
    }

    /// Re-check bounds of a value that did not come through [`LaunchParamsInput`],
    /// e.g. one deserialized from the registry file
    pub fn check(&self) -> Result<(), ValidationError> {
        LaunchParamsInput::from(self).validate().map(|_| ())
    }

    /// Value for `CUDA_VISIBLE_DEVICES`
    pub fn cuda_visible_devices(&self) -> String {
        self.gpus
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Partial, unvalidated launch parameters as received from a caller.
///
/// Integers are deliberately wide so out-of-range values reach validation
/// instead of failing to decode. Accepts the dashboard's camelCase names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchParamsInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<Vec<i64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,

    #[serde(
        default,
        alias = "tensorParallelSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub tensor_parallel_size: Option<i64>,

    #[serde(
        default,
        alias = "gpuUtil",
        alias = "gpuMemoryUtilization",
        skip_serializing_if = "Option::is_none"
    )]
    pub gpu_memory_utilization: Option<f64>,

    #[serde(default, alias = "maxModelLen", skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
}

impl From<&LaunchParams> for LaunchParamsInput {
    fn from(params: &LaunchParams) -> Self {
        Self {
            gpus: Some(params.gpus.iter().map(|&g| i64::from(g)).collect()),
            port: Some(i64::from(params.port)),
            tensor_parallel_size: Some(i64::from(params.tensor_parallel_size)),
            gpu_memory_utilization: Some(params.gpu_memory_utilization),
            max_model_len: Some(i64::from(params.max_model_len)),
            dtype: Some(params.dtype.to_string()),
        }
    }
}

impl LaunchParamsInput {
    /// Fill absent fields from `defaults`, then validate the merged value.
    ///
    /// The first field out of bounds aborts; nothing is returned for a
    /// partially valid input.
    pub fn resolve(&self, defaults: &LaunchParams) -> Result<LaunchParams, ValidationError> {
        let base = LaunchParamsInput::from(defaults);
        LaunchParamsInput {
            gpus: self.gpus.clone().or(base.gpus),
            port: self.port.or(base.port),
            tensor_parallel_size: self.tensor_parallel_size.or(base.tensor_parallel_size),
            gpu_memory_utilization: self.gpu_memory_utilization.or(base.gpu_memory_utilization),
            max_model_len: self.max_model_len.or(base.max_model_len),
            dtype: self.dtype.clone().or(base.dtype),
        }
        .validate()
    }

    /// Validate a fully populated input in field order
    fn validate(self) -> Result<LaunchParams, ValidationError> {
        let gpus = validate_gpus(&self.gpus.unwrap_or_default())?;

        let port = self
            .port
            .ok_or_else(|| ValidationError::new("port", PORT_RANGE, "nothing"))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p >= 1024)
            .ok_or_else(|| ValidationError::new("port", PORT_RANGE, port))?;

        let tensor_parallel_size = bounded_u32(
            "tensor_parallel_size",
            TENSOR_PARALLEL_RANGE,
            self.tensor_parallel_size,
            1..=16,
        )?;

        let gpu_memory_utilization = match self.gpu_memory_utilization {
            Some(u) if (0.1..=1.0).contains(&u) => u,
            other => {
                return Err(ValidationError::new(
                    "gpu_memory_utilization",
                    GPU_MEMORY_UTILIZATION_RANGE,
                    display_opt(other),
                ));
            }
        };

        let max_model_len = bounded_u32(
            "max_model_len",
            MAX_MODEL_LEN_RANGE,
            self.max_model_len,
            256..=131_072,
        )?;

        let dtype = self
            .dtype
            .as_deref()
            .ok_or_else(|| ValidationError::new("dtype", DTYPE_CHOICES, "nothing"))?
            .parse()?;

        Ok(LaunchParams {
            gpus,
            port,
            tensor_parallel_size,
            gpu_memory_utilization,
            max_model_len,
            dtype,
        })
    }
}

fn validate_gpus(raw: &[i64]) -> Result<Vec<u32>, ValidationError> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|&g| {
            if !(0..GPU_INDEX_LIMIT).contains(&g) || !seen.insert(g) {
                return Err(ValidationError::new("gpus", GPUS_RANGE, format!("{raw:?}")));
            }
            u32::try_from(g).map_err(|_| ValidationError::new("gpus", GPUS_RANGE, g))
        })
        .collect()
}

fn bounded_u32(
    field: &'static str,
    expected: &'static str,
    value: Option<i64>,
    range: std::ops::RangeInclusive<i64>,
) -> Result<u32, ValidationError> {
    value
        .filter(|v| range.contains(v))
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| ValidationError::new(field, expected, display_opt(value)))
}

fn display_opt<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "nothing".to_string(), |v| v.to_string())
}
