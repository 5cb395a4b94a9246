use thiserror::Error;

/// Errors raised by the backends, the propagation solver and phase recovery.
///
/// Every variant is raised at the point of detection. No partially computed field is ever returned alongside an error.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad shape, pitch, padding or backend selection at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An input array disagrees with the shape a solver or operation expects.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// An operation or backend that is not supported, e.g. an FFT of rank 0.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The requested backend exists but its device could not be opened or failed during a dispatch.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, Error>;
