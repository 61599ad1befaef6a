//! Outbound requests

use super::body::BodyStream;
use super::headers::Headers;

/// An HTTP/2 request ready to submit on a connection
///
/// Pseudo-headers (`:method`, `:scheme`, `:authority`, `:path`) are filled
/// in by the connection; `headers` holds only regular fields.
pub struct Request {
    method: String,
    path: String,
    headers: Headers,
    body: Option<BodyStream>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if path.is_empty() {
            path.push('/');
        }
        Request {
            method: method.into(),
            path,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        for (name, value) in headers {
            self.headers.insert(name, value);
        }
        self
    }

    /// Attach a streaming body; without one the request ends with its headers
    pub fn body(mut self, body: BodyStream) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header_list(&self) -> &Headers {
        &self.headers
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub(crate) fn into_parts(self) -> (String, String, Headers, Option<BodyStream>) {
        (self.method, self.path, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = Request::post("/stream-transcription")
            .header("Content-Type", "application/vnd.amazon.eventstream")
            .headers(vec![(
                "x-amzn-transcribe-language-code".to_string(),
                "en-US".to_string(),
            )]);

        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/stream-transcription");
        assert_eq!(
            request.header_list().get("content-type"),
            Some("application/vnd.amazon.eventstream")
        );
        assert_eq!(request.header_list().len(), 2);
        assert!(!request.has_body());
    }

    #[test]
    fn test_empty_path_becomes_root() {
        assert_eq!(Request::get("").path(), "/");
    }
}
