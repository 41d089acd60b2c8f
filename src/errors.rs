//! Client Error Hierarchy
//!
//! Errors raised by the dispatch engine and the operation shims layered on
//! top of it. Result codes reported by the coordination service are not
//! errors of this crate: they travel through the pipeline untouched and are
//! only converted by callers that opt in through [`ResultCode::into_result`].

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by user supplied handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client configuration failed to load or validate
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed connection target (e.g. a trailing `/`)
    #[error("Invalid connection target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: &'static str },

    /// Operation arguments rejected before reaching the backend
    #[error("Bad arguments: {0}")]
    BadArguments(String),

    /// The session is not in the connected state
    #[error("Not connected")]
    NotConnected,

    /// The session expired; the connection has to be reopened
    #[error("Session expired")]
    SessionExpired,

    /// The connection is closed or in the middle of closing
    #[error("Connection is shutting down")]
    ShuttingDown,

    /// The backend handle has already been released
    #[error("Backend handle closed")]
    HandleClosed,

    /// Backend failure that is not a result code
    #[error("Backend error: {0}")]
    Backend(String),

    /// Readiness pipe or thread spawning failures
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Non-ok result code reported by the coordination service
    #[error("Operation failed with {0:?}")]
    Keeper(ResultCode),
}

impl Error {
    /// The backend is gone; readers treat this as end of stream.
    pub fn is_handle_closed(&self) -> bool {
        matches!(self, Error::HandleClosed)
    }
}

/// Result codes reported by the coordination service.
///
/// Codes pass through the dispatch engine unmodified inside completion
/// events. Unknown values are kept verbatim in [`ResultCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    SystemError,
    RuntimeInconsistency,
    DataInconsistency,
    ConnectionLoss,
    MarshallingError,
    Unimplemented,
    OperationTimeout,
    BadArguments,
    InvalidState,
    ApiError,
    NoNode,
    NoAuth,
    BadVersion,
    NoChildrenForEphemerals,
    NodeExists,
    NotEmpty,
    SessionExpired,
    InvalidCallback,
    InvalidAcl,
    AuthFailed,
    Closing,
    Nothing,
    SessionMoved,
    Unknown(i32),
}

impl ResultCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ResultCode::Ok,
            -1 => ResultCode::SystemError,
            -2 => ResultCode::RuntimeInconsistency,
            -3 => ResultCode::DataInconsistency,
            -4 => ResultCode::ConnectionLoss,
            -5 => ResultCode::MarshallingError,
            -6 => ResultCode::Unimplemented,
            -7 => ResultCode::OperationTimeout,
            -8 => ResultCode::BadArguments,
            -9 => ResultCode::InvalidState,
            -100 => ResultCode::ApiError,
            -101 => ResultCode::NoNode,
            -102 => ResultCode::NoAuth,
            -103 => ResultCode::BadVersion,
            -108 => ResultCode::NoChildrenForEphemerals,
            -110 => ResultCode::NodeExists,
            -111 => ResultCode::NotEmpty,
            -112 => ResultCode::SessionExpired,
            -113 => ResultCode::InvalidCallback,
            -114 => ResultCode::InvalidAcl,
            -115 => ResultCode::AuthFailed,
            -116 => ResultCode::Closing,
            -117 => ResultCode::Nothing,
            -118 => ResultCode::SessionMoved,
            other => ResultCode::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::SystemError => -1,
            ResultCode::RuntimeInconsistency => -2,
            ResultCode::DataInconsistency => -3,
            ResultCode::ConnectionLoss => -4,
            ResultCode::MarshallingError => -5,
            ResultCode::Unimplemented => -6,
            ResultCode::OperationTimeout => -7,
            ResultCode::BadArguments => -8,
            ResultCode::InvalidState => -9,
            ResultCode::ApiError => -100,
            ResultCode::NoNode => -101,
            ResultCode::NoAuth => -102,
            ResultCode::BadVersion => -103,
            ResultCode::NoChildrenForEphemerals => -108,
            ResultCode::NodeExists => -110,
            ResultCode::NotEmpty => -111,
            ResultCode::SessionExpired => -112,
            ResultCode::InvalidCallback => -113,
            ResultCode::InvalidAcl => -114,
            ResultCode::AuthFailed => -115,
            ResultCode::Closing => -116,
            ResultCode::Nothing => -117,
            ResultCode::SessionMoved => -118,
            ResultCode::Unknown(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }

    /// Convert a non-ok code into [`Error::Keeper`].
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Keeper(self))
        }
    }
}

impl From<i32> for ResultCode {
    fn from(code: i32) -> Self {
        ResultCode::from_code(code)
    }
}
