//! End-to-end lock lifecycle over the embedded store and the local cache

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use holdfast_common::{ActorInfo, LockError, VerifiedActor};
use holdfast_core::event::ServerEvent;
use holdfast_core::{
    ExpiryReaper, LocalLockCache, LockCache, LockConfig, LockManager, RealtimeBroadcaster,
    RealtimeClient, RealtimeConfig,
};
use holdfast_persistence::{
    EmbeddedPersistService, LockPersistence, LockStorageData, PersistenceService, StorageMode,
    UserInfo, UserPersistence,
};

async fn seeded_store() -> Arc<EmbeddedPersistService> {
    let store = Arc::new(EmbeddedPersistService::new());
    for (id, name) in [("u1", "Alice Martin"), ("u2", "Bob Chen")] {
        store
            .user_save(&UserInfo {
                id: id.to_string(),
                name: name.to_string(),
                email: format!("{}@example.com", id),
                role: "user".to_string(),
            })
            .await
            .unwrap();
    }
    store
}

fn actor(id: &str, name: &str) -> VerifiedActor {
    VerifiedActor {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", id),
        role: "user".to_string(),
    }
}

async fn set_remaining(store: &EmbeddedPersistService, record_id: &str, holder: &str, ms: i64) {
    let expires_at = Utc::now().timestamp_millis() + ms;
    assert!(
        store
            .lock_update_expiry(record_id, holder, expires_at)
            .await
            .unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquire_has_single_winner() {
    let store = seeded_store().await;
    let manager = Arc::new(LockManager::new(
        store.clone(),
        Arc::new(LocalLockCache::default()),
        LockConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        let actor_id = if i % 2 == 0 { "u1" } else { "u2" };
        handles.push(tokio::spawn(async move {
            manager
                .acquire("appt-001", actor_id, ActorInfo::new(actor_id, ""))
                .await
                .map(|lock| lock.holder_id)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(holder) => winners.push(holder),
            Err(LockError::AcquisitionInProgress) | Err(LockError::HeldByOther { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // Every successful attempt belongs to the same actor
    assert!(!winners.is_empty());
    assert!(winners.iter().all(|w| w == &winners[0]));

    let row = store.lock_find("appt-001").await.unwrap().unwrap();
    assert_eq!(row.holder_id, winners[0]);
}

#[tokio::test]
async fn handover_after_disconnect() {
    let store = seeded_store().await;
    let manager = Arc::new(LockManager::new(
        store.clone(),
        Arc::new(LocalLockCache::default()),
        LockConfig::default(),
    ));
    let broadcaster = Arc::new(RealtimeBroadcaster::new(
        manager.clone(),
        RealtimeConfig::default(),
    ));

    let u1 = actor("u1", "Alice Martin");
    let u2 = actor("u2", "Bob Chen");

    let (tx1, _rx1) = broadcaster.outbound_channel();
    broadcaster.register(RealtimeClient::new("c1", u1.clone(), "10.0.0.1:5000", tx1));
    let (tx2, mut rx2) = broadcaster.outbound_channel();
    broadcaster.register(RealtimeClient::new("c2", u2.clone(), "10.0.0.2:5000", tx2));
    broadcaster.join("c1", "appt-001");
    broadcaster.join("c2", "appt-001");

    // t=0: U1 acquires
    let lock = manager.acquire("appt-001", &u1.id, u1.info()).await.unwrap();
    broadcaster.notify_lock_acquired(&lock);

    // t=1000: U2 is turned away with U1's name
    match manager.acquire("appt-001", &u2.id, u2.info()).await {
        Err(LockError::HeldByOther { holder_name }) => assert_eq!(holder_name, "Alice Martin"),
        other => panic!("unexpected result: {other:?}"),
    }

    // t=290000: 10s left, renewal is due
    set_remaining(&store, "appt-001", "u1", 10_000).await;
    broadcaster.renew_lock_request("c1", "appt-001").await;
    let row = store.lock_find("appt-001").await.unwrap().unwrap();
    assert!(row.expires_at - Utc::now().timestamp_millis() > 290_000);

    // t=295000: U1 disconnects and the lock goes with them
    broadcaster.disconnect("c1").await;
    assert!(manager.get_status("appt-001").await.unwrap().is_none());

    let mut events = Vec::new();
    while let Ok(event) = rx2.try_recv() {
        events.push(event);
    }
    assert!(events.iter().any(|e| matches!(e, ServerEvent::LockAcquired(a) if a.actor_id == "u1")));
    assert!(events.iter().any(|e| matches!(e, ServerEvent::LockRenewed(r) if r.actor_id.as_deref() == Some("u1"))));
    assert!(events.iter().any(|e| matches!(e, ServerEvent::LockForceReleased(f) if f.released_by.is_none())));
    assert!(events.iter().any(|e| matches!(e, ServerEvent::UserDisconnected(d) if d.actor_id == "u1")));

    // t=295100: U2 takes over
    let lock = manager.acquire("appt-001", &u2.id, u2.info()).await.unwrap();
    assert_eq!(lock.holder_id, "u2");
}

#[tokio::test]
async fn lazy_and_reaper_cleanup_agree() {
    let store = seeded_store().await;
    let manager = Arc::new(LockManager::new(
        store.clone(),
        Arc::new(LocalLockCache::default()),
        LockConfig::default(),
    ));

    for record in ["appt-lazy", "appt-reaped"] {
        manager
            .acquire(record, "u1", ActorInfo::new("Alice", ""))
            .await
            .unwrap();
        set_remaining(&store, record, "u1", -1).await;
    }

    assert!(manager.get_status("appt-lazy").await.unwrap().is_none());
    let reaper = ExpiryReaper::new(manager.clone(), Duration::from_secs(60));
    assert_eq!(reaper.sweep().await, vec!["appt-reaped".to_string()]);

    for record in ["appt-lazy", "appt-reaped"] {
        assert!(store.lock_find(record).await.unwrap().is_none());
        assert!(manager.get_status(record).await.unwrap().is_none());
    }
}

/// Store whose calls never complete
struct HangingStore;

#[async_trait]
impl LockPersistence for HangingStore {
    async fn lock_find(&self, _record_id: &str) -> anyhow::Result<Option<LockStorageData>> {
        std::future::pending().await
    }

    async fn lock_upsert(
        &self,
        _record_id: &str,
        _holder_id: &str,
        _expires_at: i64,
    ) -> anyhow::Result<LockStorageData> {
        std::future::pending().await
    }

    async fn lock_update_expiry(
        &self,
        _record_id: &str,
        _holder_id: &str,
        _expires_at: i64,
    ) -> anyhow::Result<bool> {
        std::future::pending().await
    }

    async fn lock_delete(&self, _record_id: &str) -> anyhow::Result<bool> {
        std::future::pending().await
    }

    async fn lock_delete_by_holder(
        &self,
        _record_id: &str,
        _holder_id: &str,
    ) -> anyhow::Result<bool> {
        std::future::pending().await
    }

    async fn lock_delete_expired(&self, _record_id: &str, _now: i64) -> anyhow::Result<bool> {
        std::future::pending().await
    }

    async fn lock_find_expired(&self, _now: i64) -> anyhow::Result<Vec<LockStorageData>> {
        std::future::pending().await
    }

    async fn lock_find_by_holder(&self, _holder_id: &str) -> anyhow::Result<Vec<LockStorageData>> {
        std::future::pending().await
    }
}

#[async_trait]
impl UserPersistence for HangingStore {
    async fn user_find_by_id(&self, _id: &str) -> anyhow::Result<Option<UserInfo>> {
        Ok(None)
    }

    async fn user_save(&self, _user: &UserInfo) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PersistenceService for HangingStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Embedded
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Cache that refuses every call
struct BrokenCache;

#[async_trait]
impl LockCache for BrokenCache {
    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> anyhow::Result<bool> {
        anyhow::bail!("connection refused")
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("connection refused")
    }

    async fn delete(&self, _key: &str) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn delete_if_value(&self, _key: &str, _value: &str) -> anyhow::Result<bool> {
        anyhow::bail!("connection refused")
    }
}

fn short_timeouts() -> LockConfig {
    LockConfig {
        store_timeout: Duration::from_millis(100),
        ..LockConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn store_timeout_is_store_unavailable() {
    let manager = LockManager::new(
        Arc::new(HangingStore),
        Arc::new(LocalLockCache::default()),
        short_timeouts(),
    );

    let err = manager.get_status("appt-001").await.unwrap_err();
    assert!(matches!(err, LockError::StoreUnavailable(_)));
    assert_eq!(err.user_message(), "lock service temporarily unavailable");

    let err = manager
        .acquire("appt-001", "u1", ActorInfo::new("Alice", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::StoreUnavailable(_)));
}

#[tokio::test]
async fn gate_failure_is_cache_unavailable() {
    let store = seeded_store().await;
    let manager = LockManager::new(store.clone(), Arc::new(BrokenCache), short_timeouts());

    let err = manager
        .acquire("appt-001", "u1", ActorInfo::new("Alice", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::CacheUnavailable(_)));
    assert!(store.lock_find("appt-001").await.unwrap().is_none());
}

#[tokio::test]
async fn mirror_failure_keeps_durable_result() {
    let store = seeded_store().await;
    let manager = LockManager::new(
        store.clone(),
        Arc::new(LocalLockCache::default()),
        LockConfig::default(),
    );
    manager
        .acquire("appt-001", "u1", ActorInfo::new("Alice", ""))
        .await
        .unwrap();

    // Same store, broken cache: release still succeeds durably
    let degraded = LockManager::new(store.clone(), Arc::new(BrokenCache), LockConfig::default());
    degraded.release("appt-001", "u1").await.unwrap();
    assert!(store.lock_find("appt-001").await.unwrap().is_none());
}

/// Embedded store that hands a record to another actor right after a scan
///
/// Models a concurrent purge plus acquire landing between the read and the
/// delete of a cleanup path.
struct TakeoverStore {
    inner: EmbeddedPersistService,
    takeover: std::sync::Mutex<Option<(String, String)>>,
}

impl TakeoverStore {
    async fn new() -> Self {
        let inner = EmbeddedPersistService::new();
        for (id, name) in [("u1", "Alice Martin"), ("u2", "Bob Chen")] {
            inner
                .user_save(&UserInfo {
                    id: id.to_string(),
                    name: name.to_string(),
                    email: format!("{}@example.com", id),
                    role: "user".to_string(),
                })
                .await
                .unwrap();
        }
        Self {
            inner,
            takeover: std::sync::Mutex::new(None),
        }
    }

    fn arm(&self, record_id: &str, new_holder: &str) {
        *self.takeover.lock().unwrap() = Some((record_id.to_string(), new_holder.to_string()));
    }

    async fn fire(&self) {
        let pending = self.takeover.lock().unwrap().take();
        if let Some((record_id, holder)) = pending {
            self.inner.lock_delete(&record_id).await.unwrap();
            let expires_at = Utc::now().timestamp_millis() + 300_000;
            self.inner
                .lock_upsert(&record_id, &holder, expires_at)
                .await
                .unwrap();
        }
    }
}

#[async_trait]
impl LockPersistence for TakeoverStore {
    async fn lock_find(&self, record_id: &str) -> anyhow::Result<Option<LockStorageData>> {
        let found = self.inner.lock_find(record_id).await;
        self.fire().await;
        found
    }

    async fn lock_upsert(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<LockStorageData> {
        self.inner.lock_upsert(record_id, holder_id, expires_at).await
    }

    async fn lock_update_expiry(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<bool> {
        self.inner
            .lock_update_expiry(record_id, holder_id, expires_at)
            .await
    }

    async fn lock_delete(&self, record_id: &str) -> anyhow::Result<bool> {
        self.inner.lock_delete(record_id).await
    }

    async fn lock_delete_by_holder(
        &self,
        record_id: &str,
        holder_id: &str,
    ) -> anyhow::Result<bool> {
        self.inner.lock_delete_by_holder(record_id, holder_id).await
    }

    async fn lock_delete_expired(&self, record_id: &str, now: i64) -> anyhow::Result<bool> {
        self.inner.lock_delete_expired(record_id, now).await
    }

    async fn lock_find_expired(&self, now: i64) -> anyhow::Result<Vec<LockStorageData>> {
        let found = self.inner.lock_find_expired(now).await;
        self.fire().await;
        found
    }

    async fn lock_find_by_holder(&self, holder_id: &str) -> anyhow::Result<Vec<LockStorageData>> {
        let found = self.inner.lock_find_by_holder(holder_id).await;
        self.fire().await;
        found
    }
}

#[async_trait]
impl UserPersistence for TakeoverStore {
    async fn user_find_by_id(&self, id: &str) -> anyhow::Result<Option<UserInfo>> {
        self.inner.user_find_by_id(id).await
    }

    async fn user_save(&self, user: &UserInfo) -> anyhow::Result<()> {
        self.inner.user_save(user).await
    }
}

#[async_trait]
impl PersistenceService for TakeoverStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Embedded
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn takeover_setup() -> (Arc<TakeoverStore>, LockManager) {
    let store = Arc::new(TakeoverStore::new().await);
    let manager = LockManager::new(
        store.clone(),
        Arc::new(LocalLockCache::default()),
        LockConfig::default(),
    );
    (store, manager)
}

async fn expire(store: &TakeoverStore, record_id: &str, holder: &str) {
    let expires_at = Utc::now().timestamp_millis() - 1;
    assert!(
        store
            .inner
            .lock_update_expiry(record_id, holder, expires_at)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn sweep_keeps_lock_taken_over_after_scan() {
    let (store, manager) = takeover_setup().await;
    manager
        .acquire("appt-001", "u1", ActorInfo::new("Alice", ""))
        .await
        .unwrap();
    expire(&store, "appt-001", "u1").await;

    store.arm("appt-001", "u2");
    assert!(manager.sweep_expired().await.unwrap().is_empty());

    let status = manager.get_status("appt-001").await.unwrap().unwrap();
    assert_eq!(status.holder_id, "u2");
}

#[tokio::test]
async fn lazy_purge_keeps_lock_taken_over_after_read() {
    let (store, manager) = takeover_setup().await;
    manager
        .acquire("appt-001", "u1", ActorInfo::new("Alice", ""))
        .await
        .unwrap();
    expire(&store, "appt-001", "u1").await;

    store.arm("appt-001", "u2");
    let status = manager.get_status("appt-001").await.unwrap().unwrap();
    assert_eq!(status.holder_id, "u2");
    assert_eq!(status.holder_info.name, "Bob Chen");
    assert!(store.inner.lock_find("appt-001").await.unwrap().is_some());
}

#[tokio::test]
async fn disconnect_cleanup_keeps_lock_taken_over_after_scan() {
    let (store, manager) = takeover_setup().await;
    manager
        .acquire("appt-001", "u1", ActorInfo::new("Alice", ""))
        .await
        .unwrap();
    manager
        .acquire("appt-002", "u1", ActorInfo::new("Alice", ""))
        .await
        .unwrap();

    // An admin force release plus u2's acquire land after the holder scan
    store.arm("appt-001", "u2");
    let released = manager.release_all_for("u1").await.unwrap();
    assert_eq!(released, vec!["appt-002".to_string()]);

    let status = manager.get_status("appt-001").await.unwrap().unwrap();
    assert_eq!(status.holder_id, "u2");
    assert!(manager.get_status("appt-002").await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_acquire_frees_the_gate() {
    let cache = Arc::new(LocalLockCache::default());
    let manager = LockManager::new(
        Arc::new(HangingStore),
        cache.clone(),
        LockConfig::default(),
    );

    let attempt = tokio::time::timeout(
        Duration::from_millis(50),
        manager.acquire("appt-001", "u1", ActorInfo::new("Alice", "")),
    )
    .await;
    assert!(attempt.is_err());

    for _ in 0..50 {
        if cache.get("acquire:appt-001").await.unwrap().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gate token still held after the acquire was dropped");
}
