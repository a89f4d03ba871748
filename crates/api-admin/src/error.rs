//! Maps queue errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;

use forgeq_core::QueueError;

/// RPC error codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const TIMEOUT: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const BACKEND_ERROR: i32 = 5001;
    pub const SYSTEM_ERROR: i32 = 5002;
}

/// Convert QueueError to a JSON-RPC ErrorObject
pub fn to_rpc_error(err: QueueError) -> ErrorObjectOwned {
    match err {
        QueueError::Config(msg) => ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>),
        QueueError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        QueueError::AlreadyInQueue => {
            ErrorObjectOwned::owned(code::CONFLICT, err.to_string(), None::<()>)
        }
        QueueError::FlushTimeout(_) => {
            ErrorObjectOwned::owned(code::TIMEOUT, err.to_string(), None::<()>)
        }
        QueueError::Backend(msg) => ErrorObjectOwned::owned(code::BACKEND_ERROR, msg, None::<()>),
        QueueError::Io(e) => ErrorObjectOwned::owned(code::SYSTEM_ERROR, e.to_string(), None::<()>),
        QueueError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        QueueError::Shutdown => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, err.to_string(), None::<()>)
        }
    }
}

pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}
