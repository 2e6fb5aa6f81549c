use crate::status::HandlerError;
use serde::Serialize;

/// Response accumulator mutated by the handler stack during dispatch.
///
/// # Behavior
/// Starts as an empty `200` response. Stack entries set status, headers and
/// body as they run; the finalizer (or a short-circuiting entry) calls
/// [`Response::finalize`], after which the response is immutable. A second
/// finalize is a reported defect, never a double emission, and writes after
/// finalization are dropped with a warning.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    finalized: bool,
}

impl Response {
    pub(crate) fn new() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            finalized: false,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        if self.finalized {
            log::warn!("status write after finalize dropped (status {status})");
            return;
        }
        self.status = status;
    }

    /// Sets a header, replacing an existing one with the same name.
    /// Name comparison is case-insensitive; insertion order is kept.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        if self.finalized {
            log::warn!("header write after finalize dropped ({})", name.as_ref());
            return;
        }
        let name = name.as_ref();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, existing_value)) => *existing_value = value.into(),
            None => self.headers.push((name.to_string(), value.into())),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        if self.finalized {
            log::warn!("body write after finalize dropped");
            return;
        }
        self.body = body.into();
    }

    /// Serializes `value` as the JSON body and sets the content type.
    pub fn set_json<T: Serialize>(&mut self, value: &T) -> Result<(), HandlerError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| HandlerError::new(format!("failed to serialize response body: {e}")))?;
        self.set_header("content-type", "application/json");
        self.set_body(bytes);
        Ok(())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Discards the body while keeping status and headers. Used for the
    /// `HEAD` -> `GET` fallback; bypasses the finalized guard on purpose.
    pub(crate) fn clear_body(&mut self) {
        self.body.clear();
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Marks the response immutable. Idempotent; a repeat call is logged as a
    /// defect and otherwise ignored.
    pub fn finalize(&mut self) {
        if self.finalized {
            log::warn!("finalize called twice on the same response");
            return;
        }
        self.finalized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_replacement_is_case_insensitive() {
        let mut response = Response::new();
        response.set_header("Content-Type", "text/plain");
        response.set_header("content-type", "application/json");
        assert_eq!(response.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn finalize_freezes_the_accumulator() {
        let mut response = Response::new();
        response.set_status(201);
        response.set_body("created");
        response.finalize();

        response.set_status(500);
        response.set_body("ignored");
        response.set_header("x-late", "ignored");

        assert!(response.is_finalized());
        assert_eq!(response.status(), 201);
        assert_eq!(response.body(), b"created");
        assert_eq!(response.header("x-late"), None);
    }

    #[test]
    fn second_finalize_is_a_no_op() {
        let mut response = Response::new();
        response.finalize();
        response.finalize();
        assert!(response.is_finalized());
    }
}
