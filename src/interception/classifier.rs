// src/interception/classifier.rs
//! Streaming response detection
//!
//! A response is a stream when its `Content-Type` contains one of a small
//! set of well-known markers. The match is a plain substring search on the
//! raw header value, so parameters such as `; charset=utf-8` never matter.

use hyper::header::CONTENT_TYPE;
use hyper::HeaderMap;
use std::fmt;

/// Category of an incrementally delivered body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// `text/event-stream` (Server-Sent Events)
    EventStream,
    /// `application/stream+json`
    StreamJson,
    /// `application/x-ndjson`
    Ndjson,
}

impl StreamKind {
    /// Content-Type marker identifying this kind
    pub const fn marker(self) -> &'static str {
        match self {
            StreamKind::EventStream => "text/event-stream",
            StreamKind::StreamJson => "application/stream+json",
            StreamKind::Ndjson => "application/x-ndjson",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

const STREAM_KINDS: [StreamKind; 3] = [
    StreamKind::EventStream,
    StreamKind::StreamJson,
    StreamKind::Ndjson,
];

/// Classify a response by its headers
pub fn classify(headers: &HeaderMap) -> Option<StreamKind> {
    let content_type = content_type(headers)?;
    STREAM_KINDS
        .into_iter()
        .find(|kind| content_type.contains(kind.marker()))
}

/// Whether the response should be intercepted as a stream
pub fn is_streaming(headers: &HeaderMap) -> bool {
    classify(headers).is_some()
}

/// Raw `Content-Type` value, if present and printable
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers_with(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_event_stream() {
        let headers = headers_with("text/event-stream");
        assert_eq!(classify(&headers), Some(StreamKind::EventStream));
        assert!(is_streaming(&headers));
    }

    #[test]
    fn test_parameters_are_ignored() {
        let headers = headers_with("text/event-stream; charset=utf-8");
        assert_eq!(classify(&headers), Some(StreamKind::EventStream));

        let headers = headers_with("application/x-ndjson;charset=UTF-8");
        assert_eq!(classify(&headers), Some(StreamKind::Ndjson));
    }

    #[test]
    fn test_stream_json() {
        let headers = headers_with("application/stream+json");
        assert_eq!(classify(&headers), Some(StreamKind::StreamJson));
    }

    #[test]
    fn test_plain_json_is_not_a_stream() {
        assert_eq!(classify(&headers_with("application/json")), None);
        assert_eq!(classify(&headers_with("text/html")), None);
    }

    #[test]
    fn test_missing_header() {
        assert!(!is_streaming(&HeaderMap::new()));
    }

    #[test]
    fn test_match_is_case_sensitive() {
        assert!(!is_streaming(&headers_with("Text/Event-Stream")));
    }

    #[test]
    fn test_non_ascii_value_is_ineligible() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_bytes(b"text/event-stream\xff").unwrap(),
        );
        assert!(!is_streaming(&headers));
    }
}
