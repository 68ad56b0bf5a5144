//! User persistence trait
//!
//! The users table belongs to the identity system; the lock store only reads
//! it to resolve holder display info.

use async_trait::async_trait;

use crate::model::UserInfo;

#[async_trait]
pub trait UserPersistence: Send + Sync {
    /// Find a user by id
    async fn user_find_by_id(&self, id: &str) -> anyhow::Result<Option<UserInfo>>;

    /// Create or update a user record
    async fn user_save(&self, user: &UserInfo) -> anyhow::Result<()>;
}
