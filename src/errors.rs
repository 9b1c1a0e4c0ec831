use std::path::PathBuf;
use thiserror::Error;

/// Enum for errors in this crate
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Error returned when a builder's build() was called improperly
    #[error("Could not build estimator: {0}")]
    BuilderError(String),

    /// A file is missing required fields, or a sample falls outside every macrostate
    #[error("Malformed input in {source_name} (line {line}): {reason}")]
    MalformedInput {
        /// File (or stream) the bad record came from
        source_name: String,
        /// 1-based line (or sample) number, or 0 when the problem is not tied to one
        line: usize,
        /// What was wrong with the record
        reason: String,
    },

    /// Zero replicas, zero attempts in a stage, or zero samples in a macrostate
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// An FFS chain is missing the flux or one of its stages, or they arrived out of order
    #[error("Incomplete FFS chain: {0}")]
    IncompleteChain(String),

    /// Non-positive volumes and other invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error returned when the configuration file is not valid TOML for `AnalysisConfig`
    #[error("Could not parse configuration")]
    ConfigParse {
        #[allow(missing_docs)]
        #[from]
        source: toml::de::Error,
    },

    /// Error returned when an input file cannot be read
    #[error("Could not read {path}")]
    Io {
        /// Path that failed
        path: PathBuf,
        #[allow(missing_docs)]
        source: std::io::Error,
    },
}

impl AnalysisError {
    /// Short machine-readable name of the error category, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BuilderError(_) | Self::Configuration(_) | Self::ConfigParse { .. } => {
                "configuration"
            }
            Self::MalformedInput { .. } => "malformed_input",
            Self::InsufficientData(_) => "insufficient_data",
            Self::IncompleteChain(_) => "incomplete_chain",
            Self::Io { .. } => "io",
        }
    }

    pub(crate) fn malformed(
        source_name: impl Into<String>,
        line: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedInput {
            source_name: source_name.into(),
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<String> for AnalysisError {
    fn from(s: String) -> Self {
        Self::BuilderError(s)
    }
}

/// Result type for the oxdna-analysis crate
pub type Result<T> = std::result::Result<T, AnalysisError>;
