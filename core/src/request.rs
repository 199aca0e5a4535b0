//! Logical request descriptors.
//!
//! A `RequestDescriptor` is what callers hand to the transport. It is never
//! mutated once built: pagination and retries derive new descriptors through
//! `with_param`, which copies.

use serde_json::Value;

use crate::http::HttpMethod;

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub url: String,
    /// Query parameters in the order they are sent.
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Overrides the default `application/json` content type.
    pub content_type: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            body: None,
            headers: Vec::new(),
            content_type: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Copy with `key` set to `value`. An existing key keeps its position.
    pub fn with_param(&self, key: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        let value = value.into();
        match next.params.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => next.params.push((key.to_string(), value)),
        }
        next
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_param_copies_and_keeps_order() {
        let base = RequestDescriptor::get("http://localhost/api/clients")
            .with_param("offset", "0")
            .with_param("limit", "10");
        let next = base.with_param("offset", "10");

        assert_eq!(base.param("offset"), Some("0"));
        assert_eq!(next.param("offset"), Some("10"));
        assert_eq!(
            next.params,
            vec![
                ("offset".to_string(), "10".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_param_is_none() {
        let req = RequestDescriptor::get("http://localhost/api/clients");
        assert!(req.param("offset").is_none());
        assert!(req.body.is_none());
    }
}
