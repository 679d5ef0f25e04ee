//! Fetch client
//!
//! This module issues every HTTP request of a crawl:
//! - Selecting an egress point per attempt and keeping one HTTP client per point
//! - Building browser-like headers from a rotating profile
//! - Retrying transient failures with jittered backoff
//! - Routing blocked responses through the challenge resolver
//! - Reporting outcomes back to the egress pool

mod client;
mod headers;

pub use client::{
    retry_after, FatalReason, FetchAttempt, FetchClient, FetchContext, FetchError, FetchedPage,
};
pub use headers::HeaderProfile;
