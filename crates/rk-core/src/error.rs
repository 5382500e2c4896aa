use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("event decode error")]
    Decode,
    #[error("window state error")]
    WindowState,
    #[error("sink write error")]
    SinkWrite,
    #[error("checkpoint error")]
    Checkpoint,
    #[error("data format error")]
    DataFormat,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Decode => 1001,
            Self::WindowState => 1002,
            Self::SinkWrite => 1003,
            Self::Checkpoint => 1004,
            Self::DataFormat => 1005,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;

/// Shorthand for `StructError::from(reason).with_detail(detail)`.
pub(crate) fn core_err(reason: CoreReason, detail: impl Into<String>) -> CoreError {
    StructError::from(reason).with_detail(detail.into())
}
