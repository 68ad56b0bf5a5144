//! `SeaORM` entities

pub mod appointment_lock;
pub mod users;

pub mod prelude {
    pub use super::appointment_lock::Entity as AppointmentLock;
    pub use super::users::Entity as Users;
}
