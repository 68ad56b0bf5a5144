//! Holdfast server
//!
//! HTTP lock API, realtime WebSocket listener, session authentication,
//! per-client rate limiting, logging and configuration for the record
//! locking service.

pub mod api;
pub mod middleware;
pub mod model;
pub mod startup;
