//! SQL-based persistence backend (MySQL/PostgreSQL via SeaORM)
//!
//! Holder display info is joined from the `users` table, never stored in the
//! lock row itself.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::{prelude::Expr, sea_query::OnConflict, *};

use crate::entity::{appointment_lock, users};
use crate::model::*;
use crate::traits::*;

/// External database persistence service
///
/// Wraps a SeaORM `DatabaseConnection` and implements all persistence traits
/// by direct database queries.
pub struct ExternalDbPersistService {
    db: DatabaseConnection,
}

impl ExternalDbPersistService {
    /// Create a new ExternalDbPersistService with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn millis_to_datetime(millis: i64) -> anyhow::Result<NaiveDateTime> {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| anyhow::anyhow!("expiry timestamp out of range: {}", millis))
}

fn lock_entity_to_storage(
    model: appointment_lock::Model,
    user: Option<users::Model>,
) -> LockStorageData {
    // A holder missing from the users table still shows up by id
    let (holder_name, holder_email) = match user {
        Some(user) => (user.name, user.email),
        None => (model.holder_id.clone(), String::new()),
    };

    LockStorageData {
        record_id: model.record_id,
        holder_id: model.holder_id,
        holder_name,
        holder_email,
        expires_at: model.expires_at.and_utc().timestamp_millis(),
    }
}

// ============================================================================
// PersistenceService implementation
// ============================================================================

#[async_trait]
impl PersistenceService for ExternalDbPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::ExternalDb
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        appointment_lock::Entity::find()
            .select_only()
            .column_as(Expr::cust("1"), "health")
            .into_tuple::<i32>()
            .one(&self.db)
            .await?;
        Ok(())
    }
}

// ============================================================================
// LockPersistence implementation
// ============================================================================

#[async_trait]
impl LockPersistence for ExternalDbPersistService {
    async fn lock_find(&self, record_id: &str) -> anyhow::Result<Option<LockStorageData>> {
        let result = appointment_lock::Entity::find_by_id(record_id.to_string())
            .find_also_related(users::Entity)
            .one(&self.db)
            .await?;

        Ok(result.map(|(lock, user)| lock_entity_to_storage(lock, user)))
    }

    async fn lock_upsert(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<LockStorageData> {
        let model = appointment_lock::ActiveModel {
            record_id: Set(record_id.to_string()),
            holder_id: Set(holder_id.to_string()),
            expires_at: Set(millis_to_datetime(expires_at)?),
        };

        appointment_lock::Entity::insert(model)
            .on_conflict(
                OnConflict::column(appointment_lock::Column::RecordId)
                    .update_columns([
                        appointment_lock::Column::HolderId,
                        appointment_lock::Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        self.lock_find(record_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("lock row for '{}' missing after upsert", record_id))
    }

    async fn lock_update_expiry(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<bool> {
        let result = appointment_lock::Entity::update_many()
            .col_expr(
                appointment_lock::Column::ExpiresAt,
                Expr::value(millis_to_datetime(expires_at)?),
            )
            .filter(appointment_lock::Column::RecordId.eq(record_id))
            .filter(appointment_lock::Column::HolderId.eq(holder_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn lock_delete(&self, record_id: &str) -> anyhow::Result<bool> {
        let result = appointment_lock::Entity::delete_many()
            .filter(appointment_lock::Column::RecordId.eq(record_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn lock_delete_by_holder(
        &self,
        record_id: &str,
        holder_id: &str,
    ) -> anyhow::Result<bool> {
        let result = appointment_lock::Entity::delete_many()
            .filter(appointment_lock::Column::RecordId.eq(record_id))
            .filter(appointment_lock::Column::HolderId.eq(holder_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn lock_delete_expired(&self, record_id: &str, now: i64) -> anyhow::Result<bool> {
        let result = appointment_lock::Entity::delete_many()
            .filter(appointment_lock::Column::RecordId.eq(record_id))
            .filter(appointment_lock::Column::ExpiresAt.lte(millis_to_datetime(now)?))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn lock_find_expired(&self, now: i64) -> anyhow::Result<Vec<LockStorageData>> {
        let rows = appointment_lock::Entity::find()
            .filter(appointment_lock::Column::ExpiresAt.lt(millis_to_datetime(now)?))
            .find_also_related(users::Entity)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(lock, user)| lock_entity_to_storage(lock, user))
            .collect())
    }

    async fn lock_find_by_holder(&self, holder_id: &str) -> anyhow::Result<Vec<LockStorageData>> {
        let rows = appointment_lock::Entity::find()
            .filter(appointment_lock::Column::HolderId.eq(holder_id))
            .find_also_related(users::Entity)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(lock, user)| lock_entity_to_storage(lock, user))
            .collect())
    }
}

// ============================================================================
// UserPersistence implementation
// ============================================================================

#[async_trait]
impl UserPersistence for ExternalDbPersistService {
    async fn user_find_by_id(&self, id: &str) -> anyhow::Result<Option<UserInfo>> {
        let result = users::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?;

        Ok(result.map(|user| UserInfo {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
        }))
    }

    async fn user_save(&self, user: &UserInfo) -> anyhow::Result<()> {
        let model = users::ActiveModel {
            id: Set(user.id.clone()),
            name: Set(user.name.clone()),
            email: Set(user.email.clone()),
            role: Set(user.role.clone()),
        };

        users::Entity::insert(model)
            .on_conflict(
                OnConflict::column(users::Column::Id)
                    .update_columns([users::Column::Name, users::Column::Email, users::Column::Role])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }
}
