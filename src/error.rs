use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NnError>;

/// Errors raised by layers, optimizers and the training loop.
///
/// `Shape`, `State` and `Config` are fatal by contract: nothing in the
/// engine retries or skips a batch when one of them surfaces.
#[derive(Debug, Error)]
pub enum NnError {
    /// Tensor rank or dimension violates an operation's contract.
    #[error("shape error: {0}")]
    Shape(String),

    /// An operation was invoked without the cached state it needs, e.g.
    /// `backward` before `forward`.
    #[error("state error: {0}")]
    State(String),

    /// Unknown names, invalid hyper-parameters or missing checkpoint keys.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl NnError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        NnError::Shape(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        NnError::State(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        NnError::Config(msg.into())
    }
}
