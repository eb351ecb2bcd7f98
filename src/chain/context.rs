//! Per-request state shared by every filter in a chain.

use serde::Serialize;
use std::collections::BTreeMap;

/// Mutable request state handed to each filter in turn.
///
/// Header names are stored lowercased. The context is `Clone` so shadow
/// invocations can run against a detached copy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub request_headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub request_body: Vec<u8>,

    /// Upstream base URL chosen by a route filter.
    pub route: Option<String>,

    pub response_status: Option<u16>,
    pub response_headers: BTreeMap<String, String>,
    #[serde(skip)]
    pub response_body: Option<Vec<u8>>,

    /// Free-form values filters pass to each other.
    pub attributes: BTreeMap<String, String>,

    /// Last failure recorded by the chain, visible to error filters.
    pub error: Option<String>,

    /// Canary sampling decision, made once per request.
    #[serde(skip)]
    pub(crate) shadow_sampled: Option<bool>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_request_header(name, value);
        self
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn set_request_header(&mut self, name: &str, value: impl Into<String>) {
        self.request_headers
            .insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn set_response_header(&mut self, name: &str, value: impl Into<String>) {
        self.response_headers
            .insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Prepare a response; the gateway will not forward upstream once set.
    pub fn respond(&mut self, status: u16, body: impl Into<Vec<u8>>) {
        self.response_status = Some(status);
        self.response_body = Some(body.into());
    }

    pub fn has_response(&self) -> bool {
        self.response_status.is_some()
    }
}
