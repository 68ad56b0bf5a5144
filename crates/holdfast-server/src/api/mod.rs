pub mod health;
pub mod lock;
