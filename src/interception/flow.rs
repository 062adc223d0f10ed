// src/interception/flow.rs
//! One observed request/response exchange

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use ulid::Ulid;

/// Request side of a flow
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub method: Method,
    pub uri: Uri,
}

/// Response side of a flow
#[derive(Debug, Clone)]
pub struct FlowResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,

    /// Pre-read body placeholder; cleared when the flow switches to streaming
    pub body: Option<Bytes>,
}

/// A request/response exchange seen by the proxy
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: Ulid,
    pub request: FlowRequest,
    pub response: FlowResponse,

    /// Deliver the body without buffering
    pub stream: bool,

    intercepted: bool,
}

impl Flow {
    pub fn new(method: Method, uri: Uri, status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            id: Ulid::new(),
            request: FlowRequest { method, uri },
            response: FlowResponse {
                status,
                headers,
                body: None,
            },
            stream: false,
            intercepted: false,
        }
    }

    pub fn url(&self) -> String {
        self.request.uri.to_string()
    }

    pub fn path(&self) -> &str {
        self.request.uri.path()
    }

    /// Whether a tap session already owns this flow's body
    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }

    pub(crate) fn mark_intercepted(&mut self) {
        self.intercepted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flow() {
        let flow = Flow::new(
            Method::POST,
            Uri::from_static("http://api.example.com/v1/chat/completions?stream=true"),
            StatusCode::OK,
            HeaderMap::new(),
        );

        assert_eq!(flow.path(), "/v1/chat/completions");
        assert_eq!(flow.url(), "http://api.example.com/v1/chat/completions?stream=true");
        assert!(!flow.stream);
        assert!(!flow.is_intercepted());
    }

    #[test]
    fn test_flow_ids_are_unique() {
        let a = Flow::new(Method::GET, Uri::from_static("/"), StatusCode::OK, HeaderMap::new());
        let b = Flow::new(Method::GET, Uri::from_static("/"), StatusCode::OK, HeaderMap::new());
        assert_ne!(a.id, b.id);
    }
}
