use thiserror::Error;

/// Control-flow verdict returned by every stack entry.
///
/// # Behavior
/// The dispatcher awaits each entry and inspects the returned `Flow` to decide
/// whether to advance the cursor or to short-circuit. Returning a value is
/// always explicit; an entry that wants to keep the pipeline moving returns
/// `Continue`, and one that wants to answer the request immediately returns
/// `Respond` with the response body.
#[derive(Debug)]
pub enum Flow {
    /// Hand control to the next entry in the assembled stack.
    Continue,
    /// Short-circuit dispatch; the bytes become the response body and no
    /// later entry runs.
    Respond(Vec<u8>),
}

impl Flow {
    pub fn respond(body: impl Into<Vec<u8>>) -> Self {
        Flow::Respond(body.into())
    }
}

/// Error raised by a handler or middleware during dispatch.
///
/// Carries an optional status hint used when the dispatcher has to synthesize
/// a default error response.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HandlerError {
    status: Option<u16>,
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_the_message() {
        let err = HandlerError::new("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn error_keeps_status_hint() {
        let err = HandlerError::with_status(503, "overloaded");
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.message(), "overloaded");
    }
}
