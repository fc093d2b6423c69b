//! Optional per-response side-effect hook.
//!
//! A handler is invoked once for every successful round trip, on the blocking
//! task pool, and is never awaited. Its completion is NOT synchronized with the
//! end of a run: a handler may still be executing (or may never have started)
//! when [`Typhoon::start`](crate::Typhoon::start) returns. Callers that need
//! the side effects to be visible after a run must synchronize on their own.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Version};
use std::time::Duration;

/// A fully read response handed to a [`ResponseHandler`]
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Round-trip time including the body read
    pub elapsed: Duration,
}

impl CapturedResponse {
    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Side-effect hook invoked per successful response
pub trait ResponseHandler: Send + Sync + 'static {
    fn handle(&self, response: CapturedResponse);
}

impl<F> ResponseHandler for F
where
    F: Fn(CapturedResponse) + Send + Sync + 'static,
{
    fn handle(&self, response: CapturedResponse) {
        self(response)
    }
}
