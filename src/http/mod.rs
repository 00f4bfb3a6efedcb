//! HTTP client module
//!
//! Outbound HTTP used by probe executors and the remote API client.

mod client;

pub use client::{HttpClient, HttpError, HttpRequest, HttpResponse};
