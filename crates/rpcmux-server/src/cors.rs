//! CORS preflight and the fixed header sets of HTTP responses

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue,
};
use hyper::HeaderMap;

/// Header layer for JSON-RPC HTTP responses
pub struct CorsLayer;

impl CorsLayer {
    /// Headers answering an `OPTIONS` preflight
    pub fn apply_preflight_headers(headers: &mut HeaderMap) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Accept, Authorization, Content-Type"),
        );
    }

    /// Headers of an error envelope produced before dispatch
    pub fn apply_error_headers(headers: &mut HeaderMap, content_length: usize) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
        headers.insert(ALLOW, HeaderValue::from_static("POST"));
    }

    /// Merge the configured custom headers, replacing same-named defaults
    pub fn apply_custom_headers(headers: &mut HeaderMap, custom: &HeaderMap) {
        for (name, value) in custom {
            headers.insert(name.clone(), value.clone());
        }
    }
}
