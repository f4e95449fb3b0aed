//! Event sink adapters

pub mod http;

pub use http::HttpEventSink;
