// Core services for locking and realtime presence

pub mod broadcast;
pub mod cache;
pub mod gate;
pub mod lock;
pub mod reaper;
