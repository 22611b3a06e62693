use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A polynomial fit is underdetermined or numerically unusable.
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    /// An activation name outside the supported set was requested.
    #[error("invalid activation: {0}")]
    InvalidActivation(String),
    /// An artifact names an activation this crate cannot evaluate.
    #[error("unsupported activation: {0}")]
    UnsupportedActivation(String),
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// An artifact is missing a field or has one inconsistent with the topology.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
