//! Replies sent back to the originating caller.

use crate::DispatchError;

/// The outcome of one dispatched command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Integer result returned by the engine (request ids, status codes, times).
    Int(i32),
    /// Boolean result returned by the engine.
    Bool(bool),
    /// JSON text returned by the engine.
    Text(String),
    /// Fixed acknowledgement for operations whose result is not reported.
    Ok,
    /// A request id synthesized by the relay for an engine call that returns nothing.
    RelayRequestId(i32),
    /// The command failed; see [`DispatchError`].
    Error(DispatchError),
}

impl Reply {
    /// Returns true if this reply reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Formats the reply as sent on the wire.
    ///
    /// Booleans are `True`/`False` for every boolean-returning command.
    pub fn to_wire(&self) -> String {
        match self {
            Reply::Int(value) | Reply::RelayRequestId(value) => value.to_string(),
            Reply::Bool(true) => "True".to_string(),
            Reply::Bool(false) => "False".to_string(),
            Reply::Text(text) => text.clone(),
            Reply::Ok => "OK".to_string(),
            Reply::Error(err) => err.to_reply(),
        }
    }
}

impl From<DispatchError> for Reply {
    fn from(err: DispatchError) -> Self {
        Reply::Error(err)
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_forms() {
        assert_eq!(Reply::Int(17).to_wire(), "17");
        assert_eq!(Reply::RelayRequestId(4).to_wire(), "4");
        assert_eq!(Reply::Bool(true).to_wire(), "True");
        assert_eq!(Reply::Bool(false).to_wire(), "False");
        assert_eq!(Reply::Ok.to_wire(), "OK");
        assert_eq!(Reply::Text("[]".into()).to_wire(), "[]");
        assert_eq!(
            Reply::from(DispatchError::UnknownCommand).to_wire(),
            "ERR:unknown_command"
        );
    }
}
