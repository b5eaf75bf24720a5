//! # rehearse-api
//!
//! HTTP surface for the Rehearse evaluation orchestration service.
//!
//! The request path is: auth (request context) → rate limit → orchestration
//! handler → queue/store, with a bounded synchronous wait deciding between a
//! completed response and a pollable job handle.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod routes;
pub mod server;
