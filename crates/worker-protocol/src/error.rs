//! Error taxonomy for the OTF wire protocol.
//!
//! Every fallible operation in this crate returns a [`ProtocolError`], a
//! closed set of variants each carrying a stable numeric [`ErrorCode`] plus
//! whatever structured context is needed to render its message. Nothing
//! downstream should have to `format!` a message by hand to recover the
//! wire-visible text — `ProtocolError::message()` is the single source of
//! truth for it.

use thiserror::Error;

/// Stable numeric codes reported to the dispatcher. Values are an
/// implementation decision (see `SPEC_FULL.md` §3.1) fixed once and never
/// renumbered, since the dispatcher keys behavior off of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Request handled successfully.
    Success = 200,
    /// Frame failed to parse per the wire grammar.
    InvalidMessage = 400,
    /// A frame's command tag was recognized but its payload was malformed.
    InvalidCommand = 401,
    /// A frame's command tag was not one of the known commands.
    UnknownCommand = 402,
    /// Predict was issued for a model name with no loaded service.
    ModelServiceNotLoaded = 404,
    /// Unload was issued for a model name with no loaded service.
    ModelCurrentlyNotLoaded = 405,
    /// A load command's payload failed shape validation.
    InvalidLoadMessage = 410,
    /// A predict command's payload failed shape validation.
    InvalidPredictMessage = 411,
    /// An unload command's payload failed shape validation.
    InvalidUnloadMessage = 412,
    /// Predict batch size did not match the service's declared batch size.
    UnsupportedPredictOperation = 413,
    /// A model input's content type was not recognized.
    UnknownContentType = 414,
    /// The model package on disk failed a value-level check while loading.
    ValueErrorWhileLoading = 420,
    /// An unexpected error occurred while loading a model.
    UnknownExceptionWhileLoading = 421,
    /// The codec failed to encode a response.
    CodecFail = 430,
    /// The handler raised while servicing a predict call.
    CustomServiceError = 440,
    /// A truly unanticipated failure.
    UnknownException = 500,
    /// Failed to construct or unlink the listening socket.
    SocketError = 501,
    /// Failed to bind the listening socket.
    SocketBindError = 502,
    /// Failed to read a frame from the client stream.
    ReceiveError = 503,
    /// A single send to the client stream failed.
    SendMsgFail = 504,
    /// Consecutive send failures exceeded the configured threshold.
    SendFailsExceedsLimits = 505,
}

impl ErrorCode {
    /// The numeric value placed on the wire.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// A single failure from any layer of the protocol crate.
///
/// Each variant renders (via `Display`, courtesy of `thiserror`) to exactly
/// the message text the dispatcher contract expects, and maps to exactly one
/// [`ErrorCode`] via [`ProtocolError::code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The 8-byte version prefix was not the `1.0` sentinel, or the buffer
    /// otherwise failed to parse per the wire grammar.
    #[error("Invalid message received")]
    InvalidMessage,

    /// A command's payload decoded but used a recognized-but-malformed
    /// shape (reserved for future stricter decode checks).
    #[error("Invalid command received")]
    InvalidCommand,

    /// The 4-byte command tag did not match any known command.
    #[error("Invalid command: {0}")]
    UnknownCommand(i32),

    /// `validate_load_message` rejected a load payload.
    #[error("Invalid load message, field '{field}' is missing")]
    InvalidLoadMessage {
        /// The first missing required field.
        field: &'static str,
    },

    /// `validate_predict_msg` rejected a predict payload.
    #[error("Invalid predict message: {reason}")]
    InvalidPredictMessage {
        /// Human-readable reason, folded into the message.
        reason: &'static str,
    },

    /// `validate_unload_msg` rejected an unload payload.
    #[error("Invalid unload message, field 'model-name' is missing")]
    InvalidUnloadMessage,

    /// A model input used a content type the codec does not know how to
    /// interpret.
    #[error("Unknown contentType given for the data")]
    UnknownContentType,

    /// Predict's observed batch size did not equal the service's declared
    /// batch size.
    #[error("Invalid batch size {0}")]
    UnsupportedPredictOperation(usize),

    /// Predict named a model with no loaded service.
    #[error("Model {0} is currently not loaded")]
    ModelServiceNotLoaded(String),

    /// Unload named a model with no loaded service.
    #[error("Model {0} has not been registered")]
    ModelCurrentlyNotLoaded(String),

    /// `MANIFEST.json` could not be opened or parsed as JSON.
    #[error("Failed to open/parse {path}: {reason}")]
    ManifestRead {
        /// Path to the manifest file.
        path: String,
        /// Underlying parse/IO failure text.
        reason: String,
    },

    /// A required manifest field was absent.
    #[error("{field} not defined in MANIFEST.json.")]
    ManifestFieldMissing {
        /// The missing field's dotted name, e.g. `parametersFile`.
        field: &'static str,
    },

    /// A manifest-referenced file does not exist on disk.
    #[error("{field} not found: {path}.")]
    ManifestFileNotFound {
        /// Which manifest field pointed at the missing file.
        field: &'static str,
        /// The path that was checked.
        path: String,
    },

    /// No handler file name was supplied at load time.
    #[error("No handler is provided.")]
    NoHandlerProvided,

    /// The handler file named at load time does not exist on disk.
    ///
    /// The doubled "not" is intentional: it preserves bug-for-bug
    /// compatibility with dispatchers that key off this exact string (see
    /// `SPEC_FULL.md` §9 Open Questions).
    #[error("handler file not not found: {path}.")]
    HandlerFileNotFound {
        /// The path that was checked.
        path: String,
    },

    /// The handler name resolved from a path was not in the registry.
    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),

    /// The handler raised while servicing a request.
    #[error("{0}")]
    CustomServiceError(String),

    /// Failed to unlink a stale socket path before binding a fresh one.
    #[error("socket already in use: {0}.")]
    SocketError(String),

    /// Failed to create the socket itself (e.g. `socket(2)` returned an
    /// error, or the path was too long for `sockaddr_un`). Distinct from
    /// [`ProtocolError::SocketError`] -- this condition has nothing to do
    /// with the path already being in use, so it carries the OS error text
    /// unprefixed rather than reusing that variant's "already in use"
    /// wording.
    #[error("{0}")]
    SocketCreateFailed(String),

    /// Failed to bind the listening socket.
    #[error("failed to bind socket: {0}")]
    SocketBindError(String),

    /// Failed to read a complete frame from the client stream.
    #[error("error receiving message from client: {0}")]
    ReceiveError(String),

    /// Failed to encode a response frame.
    #[error("codec failure: {0}")]
    CodecFail(String),

    /// An error with no more specific variant.
    #[error("unknown exception: {0}")]
    UnknownException(String),
}

impl ProtocolError {
    /// The stable numeric code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::InvalidMessage => ErrorCode::InvalidMessage,
            ProtocolError::InvalidCommand => ErrorCode::InvalidCommand,
            ProtocolError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            ProtocolError::InvalidLoadMessage { .. } => ErrorCode::InvalidLoadMessage,
            ProtocolError::InvalidPredictMessage { .. } => ErrorCode::InvalidPredictMessage,
            ProtocolError::InvalidUnloadMessage => ErrorCode::InvalidUnloadMessage,
            ProtocolError::UnknownContentType => ErrorCode::UnknownContentType,
            ProtocolError::UnsupportedPredictOperation(_) => {
                ErrorCode::UnsupportedPredictOperation
            }
            ProtocolError::ModelServiceNotLoaded(_) => ErrorCode::ModelServiceNotLoaded,
            ProtocolError::ModelCurrentlyNotLoaded(_) => ErrorCode::ModelCurrentlyNotLoaded,
            ProtocolError::ManifestRead { .. } => ErrorCode::ValueErrorWhileLoading,
            ProtocolError::ManifestFieldMissing { .. } => ErrorCode::ValueErrorWhileLoading,
            ProtocolError::ManifestFileNotFound { .. } => ErrorCode::ValueErrorWhileLoading,
            ProtocolError::NoHandlerProvided => ErrorCode::ValueErrorWhileLoading,
            ProtocolError::HandlerFileNotFound { .. } => ErrorCode::ValueErrorWhileLoading,
            ProtocolError::UnknownHandler(_) => ErrorCode::UnknownExceptionWhileLoading,
            ProtocolError::CustomServiceError(_) => ErrorCode::CustomServiceError,
            ProtocolError::SocketError(_) => ErrorCode::SocketError,
            ProtocolError::SocketCreateFailed(_) => ErrorCode::SocketError,
            ProtocolError::SocketBindError(_) => ErrorCode::SocketBindError,
            ProtocolError::ReceiveError(_) => ErrorCode::ReceiveError,
            ProtocolError::CodecFail(_) => ErrorCode::CodecFail,
            ProtocolError::UnknownException(_) => ErrorCode::UnknownException,
        }
    }

    /// The message text placed on the wire. Equivalent to `to_string()`, but
    /// named for callers that only want the wire contract, not a generic
    /// `Display` impression.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Result alias used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_not_found_message_preserves_doubled_not() {
        let err = ProtocolError::HandlerFileNotFound {
            path: "/models/m/h.py".into(),
        };
        assert_eq!(err.message(), "handler file not not found: /models/m/h.py.");
    }

    #[test]
    fn manifest_field_missing_message() {
        let err = ProtocolError::ManifestFieldMissing {
            field: "parametersFile",
        };
        assert_eq!(err.message(), "parametersFile not defined in MANIFEST.json.");
    }

    #[test]
    fn socket_create_failed_carries_the_bare_os_error_text() {
        let err = ProtocolError::SocketCreateFailed("Too many open files".into());
        assert_eq!(err.message(), "Too many open files");
        assert_eq!(err.code(), ErrorCode::SocketError);
    }

    #[test]
    fn socket_error_keeps_the_already_in_use_wording() {
        let err = ProtocolError::SocketError("/tmp/worker.sock".into());
        assert_eq!(err.message(), "socket already in use: /tmp/worker.sock.");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Success.as_i32(), 200);
        assert_eq!(ErrorCode::SendFailsExceedsLimits.as_i32(), 505);
        assert_eq!(
            ProtocolError::UnsupportedPredictOperation(2).code(),
            ErrorCode::UnsupportedPredictOperation
        );
    }

    #[test]
    fn batch_size_message_includes_count() {
        let err = ProtocolError::UnsupportedPredictOperation(2);
        assert_eq!(err.message(), "Invalid batch size 2");
    }
}
