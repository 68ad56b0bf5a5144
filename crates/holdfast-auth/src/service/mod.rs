//! Authentication service implementations

pub mod token;
