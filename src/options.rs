//! Entry-point options: target device and extra configuration.
//!
//! [`ConvertOptions`] is the single options argument accepted by every
//! conversion entry point. It carries the target [`Device`], an optional
//! sample input for feature-count inference, and an [`ExtraConfig`] map
//! threaded unchanged through the parser and compiler down to individual
//! operator converters.
//!
//! # Example
//!
//! ```ignore
//! use colibri::{convert_estimator, ConvertOptions, Device};
//!
//! let options = ConvertOptions::builder()
//!     .device(Device::CpuParallel)
//!     .build();
//! let program = convert_estimator(&model, options)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bon::Builder;
use ndarray::ArrayD;

use crate::error::ConvertError;
use crate::utils::Parallelism;

// =============================================================================
// Device
// =============================================================================

/// Execution device for a compiled tensor program.
///
/// Every module of a program is constructed for the same device; there is
/// no per-node override. Resolving a device identifier with [`FromStr`] is
/// the environment check: identifiers this build has no runtime for fail
/// with [`ConvertError::Environment`] before any parsing begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Single-threaded CPU execution.
    #[default]
    Cpu,
    /// CPU execution with rayon row-parallelism inside batch modules.
    CpuParallel,
}

impl Device {
    /// The parallelism flag handed to lowered modules.
    #[inline]
    pub fn parallelism(self) -> Parallelism {
        match self {
            Device::Cpu => Parallelism::Sequential,
            Device::CpuParallel => Parallelism::Parallel,
        }
    }
}

impl FromStr for Device {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "cpu:parallel" => Ok(Device::CpuParallel),
            other => Err(ConvertError::Environment {
                device: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::CpuParallel => write!(f, "cpu:parallel"),
        }
    }
}

// =============================================================================
// ExtraConfig
// =============================================================================

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Text(String),
    Flag(bool),
}

/// Free-form options threaded from the entry point through the parser and
/// compiler to individual operator converters.
///
/// Recognized keys are exposed as constants; unrecognized keys are carried
/// along untouched so custom converters can consume them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraConfig {
    entries: BTreeMap<String, ConfigValue>,
}

/// Key holding the inferred or declared input width.
pub const N_FEATURES: &str = "n_features";

impl ExtraConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.entries.insert(key.into(), value);
    }

    /// Look up an option.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    /// The declared input width, if one has been set.
    pub fn n_features(&self) -> Option<usize> {
        match self.entries.get(N_FEATURES) {
            Some(ConfigValue::Int(n)) if *n >= 0 => Some(*n as usize),
            _ => None,
        }
    }

    /// Declare the input width.
    pub fn set_n_features(&mut self, n: usize) {
        self.set(N_FEATURES, ConfigValue::Int(n as i64));
    }
}

// =============================================================================
// ConvertOptions
// =============================================================================

/// Options accepted by every conversion entry point.
#[derive(Debug, Clone, Default, Builder)]
pub struct ConvertOptions {
    /// Target device for the compiled program.
    #[builder(default)]
    pub device: Device,

    /// Sample input used for feature-count inference when the source model
    /// does not self-report its feature count. Must be two-dimensional
    /// (rows x features) to be usable.
    pub test_input: Option<ArrayD<f32>>,

    /// Options forwarded to individual operator converters.
    #[builder(default)]
    pub extra_config: ExtraConfig,
}
