//! Holdfast Auth - Session token verification
//!
//! This crate provides:
//! - JWT session claims and the verified actor they decode to
//! - HS256 token encoding and cached decoding
//! - Bearer token extraction shared by the HTTP and realtime layers

pub mod model;
pub mod service;

// Re-export commonly used types
pub use model::*;
