//! CLI configuration.
//!
//! Precedence, lowest first: defaults, TOML file (`--config`, else
//! `clflops.toml` in the working directory when present), `CLFLOPS_*`
//! environment variables, command-line flags.

use std::path::{Path, PathBuf};

use clflops_core::kernels::{VECTOROPS_OPS_PER_ELEMENT, VECTOROPS_SRC};
use clflops_core::staging::ELEMENT_BYTES;
use clflops_core::{BenchError, BenchRequest, DEFAULT_SEED};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::output::OutputFormat;
use crate::size::parse_size;

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "clflops.toml";

pub const ENV_SIZE: &str = "CLFLOPS_SIZE";
pub const ENV_SEED: &str = "CLFLOPS_SEED";
pub const ENV_BACKEND: &str = "CLFLOPS_BACKEND";
pub const ENV_KERNEL: &str = "CLFLOPS_KERNEL";
pub const ENV_FORMAT: &str = "CLFLOPS_FORMAT";
pub const ENV_LOG_LEVEL: &str = "CLFLOPS_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "CLFLOPS_LOG_FORMAT";

/// Errors raised by the CLI layer.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Unidentified size prefix \"{suffix}\"")]
    UnknownSizeSuffix { suffix: String },

    #[error("invalid size \"{input}\": {reason}")]
    InvalidSize { input: String, reason: String },

    #[error("Error opening {path} for reading")]
    KernelSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file {path}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Bench(#[from] BenchError),
}

/// Compute backend to benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// System OpenCL platforms (requires the `opencl` feature).
    OpenCl,
    /// Host reference devices.
    Host,
}

impl BackendKind {
    /// `opencl` when compiled in, otherwise `host`.
    pub fn preferred() -> Self {
        if cfg!(feature = "opencl") {
            Self::OpenCl
        } else {
            Self::Host
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            Self::OpenCl => cfg!(feature = "opencl"),
            Self::Host => true,
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::preferred()
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenCl => write!(f, "opencl"),
            Self::Host => write!(f, "host"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opencl" | "cl" => Ok(Self::OpenCl),
            "host" | "cpu" => Ok(Self::Host),
            other => Err(format!("unknown backend '{other}'. Expected one of: opencl, host")),
        }
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'. Expected one of: pretty, compact, json")),
        }
    }
}

/// Resolved CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Workload size, e.g. `512M`.
    /// Override: `CLFLOPS_SIZE`
    pub size: String,

    /// Input stream seed.
    /// Override: `CLFLOPS_SEED`
    pub seed: u64,

    /// Override: `CLFLOPS_BACKEND`
    pub backend: BackendKind,

    /// Kernel source file; the built-in `vectorops.cl` when unset.
    /// Override: `CLFLOPS_KERNEL`
    pub kernel: Option<PathBuf>,

    /// FLOPs per element for FLOPS reporting.
    pub ops_per_element: u32,

    /// Report format on stdout.
    /// Override: `CLFLOPS_FORMAT`
    pub format: OutputFormat,

    /// Default tracing filter; `RUST_LOG` takes precedence.
    /// Override: `CLFLOPS_LOG_LEVEL`
    pub log_level: String,

    /// Override: `CLFLOPS_LOG_FORMAT`
    pub log_format: LogFormat,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            size: "512M".into(),
            seed: DEFAULT_SEED,
            backend: BackendKind::default(),
            kernel: None,
            ops_per_element: VECTOROPS_OPS_PER_ELEMENT,
            format: OutputFormat::Text,
            log_level: "warn".into(),
            log_format: LogFormat::Compact,
        }
    }
}

impl CliConfig {
    /// Workload size in bytes.
    pub fn workload_bytes(&self) -> Result<u64, CliError> {
        parse_size(&self.size)
    }

    pub fn validate(&self) -> Result<(), CliError> {
        let bytes = self.workload_bytes()?;
        if bytes < ELEMENT_BYTES {
            return Err(CliError::Config(format!(
                "size must hold at least one {ELEMENT_BYTES}-byte element, got {bytes} bytes"
            )));
        }
        if self.ops_per_element == 0 {
            return Err(CliError::Config("ops_per_element must be > 0".into()));
        }
        if self.log_level.trim().is_empty() {
            return Err(CliError::Config("log_level must not be empty".into()));
        }
        if !self.backend.is_available() {
            return Err(CliError::Config(format!(
                "backend '{}' is not compiled in; rebuild with --features opencl",
                self.backend
            )));
        }
        Ok(())
    }

    /// Program text: the configured file or the built-in source.
    pub fn kernel_source(&self) -> Result<String, CliError> {
        match &self.kernel {
            Some(path) => std::fs::read_to_string(path).map_err(|source| CliError::KernelSource {
                path: path.display().to_string(),
                source,
            }),
            None => Ok(VECTOROPS_SRC.to_owned()),
        }
    }

    /// Core request for one run. The kernel file is only read when devices
    /// will actually be benchmarked.
    pub fn bench_request(
        &self,
        list_devices: bool,
        device_index: Option<usize>,
    ) -> Result<BenchRequest, CliError> {
        let kernel_source = if list_devices { String::new() } else { self.kernel_source()? };
        Ok(BenchRequest {
            list_devices,
            device_index,
            workload_bytes: self.workload_bytes()?,
            seed: self.seed,
            kernel_source,
            ops_per_element: self.ops_per_element,
        })
    }
}

/// Layered construction of a [`CliConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: CliConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the defaults with a TOML file; missing keys keep defaults.
    pub fn from_file(mut self, path: &Path) -> Result<Self, CliError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        self.config = Self::parse_toml(&contents).map_err(|source| CliError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(self)
    }

    fn parse_toml(contents: &str) -> Result<CliConfig, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `CLFLOPS_*` environment variable overrides.
    pub fn from_env(mut self) -> Result<Self, CliError> {
        if let Ok(val) = std::env::var(ENV_SIZE) {
            self.config.size = val;
        }

        if let Ok(val) = std::env::var(ENV_SEED) {
            self.config.seed = val.trim().parse::<u64>().map_err(|e| CliError::EnvOverride {
                key: ENV_SEED.into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var(ENV_BACKEND) {
            self.config.backend =
                val.parse::<BackendKind>().map_err(|reason| CliError::EnvOverride {
                    key: ENV_BACKEND.into(),
                    value: val.clone(),
                    reason,
                })?;
        }

        if let Ok(val) = std::env::var(ENV_KERNEL) {
            self.config.kernel = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var(ENV_FORMAT) {
            self.config.format =
                val.parse::<OutputFormat>().map_err(|reason| CliError::EnvOverride {
                    key: ENV_FORMAT.into(),
                    value: val.clone(),
                    reason,
                })?;
        }

        if let Ok(val) = std::env::var(ENV_LOG_LEVEL) {
            self.config.log_level = val;
        }

        if let Ok(val) = std::env::var(ENV_LOG_FORMAT) {
            self.config.log_format =
                val.parse::<LogFormat>().map_err(|reason| CliError::EnvOverride {
                    key: ENV_LOG_FORMAT.into(),
                    value: val.clone(),
                    reason,
                })?;
        }

        Ok(self)
    }

    pub fn size(mut self, size: Option<String>) -> Self {
        if let Some(size) = size {
            self.config.size = size;
        }
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.config.seed = seed;
        }
        self
    }

    pub fn backend(mut self, backend: Option<BackendKind>) -> Self {
        if let Some(backend) = backend {
            self.config.backend = backend;
        }
        self
    }

    pub fn kernel(mut self, kernel: Option<PathBuf>) -> Self {
        if kernel.is_some() {
            self.config.kernel = kernel;
        }
        self
    }

    pub fn ops_per_element(mut self, ops: Option<u32>) -> Self {
        if let Some(ops) = ops {
            self.config.ops_per_element = ops;
        }
        self
    }

    pub fn format(mut self, format: Option<OutputFormat>) -> Self {
        if let Some(format) = format {
            self.config.format = format;
        }
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        if let Some(level) = level {
            self.config.log_level = level;
        }
        self
    }

    pub fn log_format(mut self, format: Option<LogFormat>) -> Self {
        if let Some(format) = format {
            self.config.log_format = format;
        }
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<CliConfig, CliError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Defaults, then the config file, then the environment.
///
/// An explicit `path` must exist; the working-directory default is optional.
pub fn load_layers(path: Option<&Path>) -> Result<ConfigBuilder, CliError> {
    let builder = match path {
        Some(path) => ConfigBuilder::new().from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            ConfigBuilder::new().from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => ConfigBuilder::new(),
    };
    builder.from_env()
}
