//! Error types for command dispatch.

/// Why a command line could not be carried out.
///
/// Every variant is recovered locally and reported to the caller as an
/// `ERR:<code>` reply; none of them stop the processing of later lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Fewer arguments than the command's minimum arity.
    #[error("invalid_params")]
    InvalidParams,

    /// A numeric argument (or array element) failed to parse.
    #[error("bad_number")]
    BadNumber,

    /// A boolean argument was neither `true`/`false` nor an integer.
    #[error("bad_bool")]
    BadBool,

    /// Parallel array arguments have different lengths.
    #[error("length_mismatch")]
    LengthMismatch,

    /// No descriptor exists for the command name.
    #[error("unknown_command")]
    UnknownCommand,

    /// The engine raised an error while executing the call.
    #[error("{0}")]
    Engine(String),
}

impl DispatchError {
    /// Returns the reply string sent back to the caller.
    pub fn to_reply(&self) -> String {
        format!("ERR:{self}")
    }
}

impl From<crate::EngineError> for DispatchError {
    fn from(err: crate::EngineError) -> Self {
        Self::Engine(err.to_string())
    }
}
