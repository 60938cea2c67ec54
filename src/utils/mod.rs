//! Utility functions and helpers.

pub mod http;
pub mod url;

pub use http::{HttpResponse, HttpTransport, Transport};
