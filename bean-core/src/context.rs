//! Invocation context passed explicitly to every bean call.

use std::fmt;

/// Session identifier a message or timer invocation runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Context carried with every bean invocation.
///
/// Jobs and timeout callbacks receive it as a parameter; nothing is
/// stashed in process-wide state.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub session_id: SessionId,
    pub request_id: String,
}

impl InvocationContext {
    /// New context for a session, with a fresh request id.
    pub fn new<S: Into<SessionId>>(session_id: S) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Context without a session, used for container-initiated calls.
    pub fn detached() -> Self {
        Self::new(SessionId::default())
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}
