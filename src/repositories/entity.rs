//! Cached entity repository.
//!
//! Cache-first reads with the access policy re-checked on every hit, and
//! delete-then-update-then-set on every write so the cache never resurrects
//! pre-update data. The document store is the only source of truth: cache
//! failures are logged and treated as misses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::access::{
    AccessError, ScopePlan, WriteAction, can_access, can_write, plan_scope,
};
use crate::cache::{CacheError, CacheStore};
use crate::models::{Entity, EntityKind};
use crate::store::{Document, DocumentStore, Filter, StoreError};
use crate::tenancy::{Deadline, RequestContext};

/// Fields fixed at creation; stripped from every update.
const WRITE_ONCE_FIELDS: [&str; 5] = ["code", "tenantId", "hospitalId", "createdBy", "createdAt"];

/// Generic cached repository over every [`Entity`] type.
#[derive(Clone)]
pub struct EntityRepository {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
}

impl EntityRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn CacheStore>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            cache_ttl,
        }
    }

    /// Fetches one record by code on behalf of the caller.
    ///
    /// A cache hit is re-checked against the policy and a denial is final;
    /// the store is not consulted a second time. On a miss the store copy is
    /// checked and only cached when the caller was allowed to see it.
    #[instrument(skip_all, fields(entity = E::KIND.collection(), code = %code))]
    pub async fn fetch_by_code<E: Entity>(
        &self,
        ctx: &RequestContext,
        code: &str,
    ) -> Result<E, AccessError> {
        let key = E::KIND.cache_key(code);

        if let Some(value) = self.cache_get(ctx, &key).await {
            counter!("cache_hits_total", "entity" => E::KIND.collection()).increment(1);
            debug!("Cache hit");
            let record: E = decode_value(code, value)?;
            can_access(ctx.caller(), &record)?;
            return Ok(record);
        }

        counter!("cache_misses_total", "entity" => E::KIND.collection()).increment(1);
        let record = self
            .load_by_code::<E>(ctx.deadline(), code)
            .await?
            .ok_or_else(|| AccessError::not_found(E::KIND, code))?;

        can_access(ctx.caller(), &record)?;
        self.cache_set(ctx, &record).await;
        Ok(record)
    }

    /// Reads a record straight from the store, without policy or cache.
    ///
    /// For business rules that must inspect records the caller cannot read
    /// (a receptionist checking a doctor's hospital, a login lookup).
    pub async fn load_by_code<E: Entity>(
        &self,
        deadline: Deadline,
        code: &str,
    ) -> Result<Option<E>, AccessError> {
        self.find_one_by(deadline, &Filter::by_code(code)).await
    }

    pub async fn find_one_by<E: Entity>(
        &self,
        deadline: Deadline,
        filter: &Filter,
    ) -> Result<Option<E>, AccessError> {
        let document = bounded(deadline, self.store.find_one(E::KIND.collection(), filter)).await?;
        document.map(decode_document::<E>).transpose()
    }

    pub async fn find_all_by<E: Entity>(
        &self,
        deadline: Deadline,
        filter: &Filter,
    ) -> Result<Vec<E>, AccessError> {
        let documents = bounded(deadline, self.store.find_all(E::KIND.collection(), filter)).await?;
        documents.into_iter().map(decode_document::<E>).collect()
    }

    /// Lists every record of `E` inside the caller's scope.
    ///
    /// The scope filter is authoritative for listing; results are not
    /// re-checked record by record.
    #[instrument(skip_all, fields(entity = E::KIND.collection()))]
    pub async fn list_with_scope<E: Entity>(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<E>, AccessError> {
        let filter = match plan_scope(E::KIND, ctx.caller())? {
            ScopePlan::Filter(filter) => filter,
            plan @ ScopePlan::ViaCreator { .. } => {
                let creator = self.caller_creator(ctx, E::KIND).await?;
                plan.resolve(&creator)
            }
        };
        debug!(?filter, "Resolved list scope");
        self.find_all_by(ctx.deadline(), &filter).await
    }

    /// `createdBy` of the caller's own account record; for staff, their hospital.
    ///
    /// A caller without an account record is denied access to `for_kind`.
    pub async fn caller_creator(
        &self,
        ctx: &RequestContext,
        for_kind: EntityKind,
    ) -> Result<String, AccessError> {
        let caller = ctx.caller();
        let own_kind = caller.tier().entity_kind();
        let document = bounded(
            ctx.deadline(),
            self.store
                .find_one(own_kind.collection(), &Filter::by_code(caller.code())),
        )
        .await?;

        let Some(document) = document else {
            warn!(caller = caller.code(), tier = %caller.tier(), "Caller has no account record");
            return Err(AccessError::denied(for_kind, "*"));
        };

        document
            .get("createdBy")
            .and_then(Value::as_str)
            .filter(|creator| !creator.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AccessError::malformed(own_kind, caller.code(), "missing ownership field 'createdBy'")
            })
    }

    /// Inserts a new record and caches it.
    pub async fn insert<E: Entity>(&self, ctx: &RequestContext, record: &E) -> Result<(), AccessError> {
        let document = encode(record)?;
        bounded(ctx.deadline(), self.store.insert_one(E::KIND.collection(), document)).await?;
        self.cache_set(ctx, record).await;
        debug!(entity = %E::KIND, code = record.code(), "Record inserted");
        Ok(())
    }

    /// Merges `changes` into the record and refreshes the cache.
    ///
    /// Order is cache delete, store update, fresh store read, cache set.
    /// Write-once fields in `changes` are ignored; `updatedAt` and
    /// `updatedBy` are stamped from the context. Eligibility is the caller's
    /// responsibility; see [`EntityRepository::update_owned`].
    pub async fn update<E: Entity>(
        &self,
        ctx: &RequestContext,
        code: &str,
        changes: Document,
    ) -> Result<E, AccessError> {
        self.update_where(ctx, code, Filter::new(), changes)
            .await?
            .ok_or_else(|| AccessError::not_found(E::KIND, code))
    }

    /// Like [`EntityRepository::update`], but only applied while the stored
    /// record still matches `expected`.
    ///
    /// Returns `Ok(None)` when the record exists but no longer matches; the
    /// store evaluates the condition and the write as one step, so of two
    /// racing callers expecting the same state exactly one succeeds.
    #[instrument(skip_all, fields(entity = E::KIND.collection(), code = %code))]
    pub async fn update_where<E: Entity>(
        &self,
        ctx: &RequestContext,
        code: &str,
        expected: Filter,
        mut changes: Document,
    ) -> Result<Option<E>, AccessError> {
        for field in WRITE_ONCE_FIELDS {
            changes.remove(field);
        }
        changes.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));
        changes.insert("updatedBy".into(), Value::String(ctx.caller().code().to_string()));

        self.invalidate(ctx, E::KIND, code).await;

        let filter = expected.eq("code", code);
        let modified = bounded(
            ctx.deadline(),
            self.store.update_one(E::KIND.collection(), &filter, changes),
        )
        .await?;

        let record = self
            .load_by_code::<E>(ctx.deadline(), code)
            .await?
            .ok_or_else(|| AccessError::not_found(E::KIND, code))?;
        self.cache_set(ctx, &record).await;
        if modified == 0 {
            debug!("Stored record no longer matches; update skipped");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Persists every mutable field of an already-loaded record.
    pub async fn save<E: Entity>(&self, ctx: &RequestContext, record: &E) -> Result<E, AccessError> {
        self.update(ctx, record.code(), encode(record)?).await
    }

    /// Updates a record after checking write eligibility against a fresh store copy.
    pub async fn update_owned<E: Entity>(
        &self,
        ctx: &RequestContext,
        code: &str,
        changes: Document,
    ) -> Result<E, AccessError> {
        let current = self.load_for_write::<E>(ctx, code, WriteAction::Update).await?;
        self.update(ctx, current.code(), changes).await
    }

    /// Deletes a record after checking write eligibility against a fresh store copy.
    pub async fn delete_owned<E: Entity>(&self, ctx: &RequestContext, code: &str) -> Result<(), AccessError> {
        let current = self.load_for_write::<E>(ctx, code, WriteAction::Delete).await?;
        self.delete(ctx, E::KIND, current.code()).await
    }

    /// Loads the store copy of a record and checks `action` against it.
    pub async fn load_for_write<E: Entity>(
        &self,
        ctx: &RequestContext,
        code: &str,
        action: WriteAction,
    ) -> Result<E, AccessError> {
        let current = self
            .load_by_code::<E>(ctx.deadline(), code)
            .await?
            .ok_or_else(|| AccessError::not_found(E::KIND, code))?;
        can_write(ctx.caller(), &current, action)?;
        Ok(current)
    }

    /// Hard-deletes a record from the store and the cache.
    pub async fn delete(&self, ctx: &RequestContext, kind: EntityKind, code: &str) -> Result<(), AccessError> {
        let deleted = bounded(
            ctx.deadline(),
            self.store
                .delete_one(kind.collection(), &Filter::by_code(code)),
        )
        .await?;
        self.invalidate(ctx, kind, code).await;
        if deleted == 0 {
            return Err(AccessError::not_found(kind, code));
        }
        debug!(entity = %kind, code, "Record deleted");
        Ok(())
    }

    /// Inserts a marker `{code: key, holder}` into `collection`.
    ///
    /// Returns `false` when the key is already held; the unique code per
    /// collection makes the claim atomic in every store backend.
    pub async fn claim_key(
        &self,
        deadline: Deadline,
        collection: &str,
        key: &str,
        holder: &str,
    ) -> Result<bool, AccessError> {
        let mut marker = Document::new();
        marker.insert("code".into(), Value::String(key.to_string()));
        marker.insert("holder".into(), Value::String(holder.to_string()));
        marker.insert("claimedAt".into(), Value::String(Utc::now().to_rfc3339()));

        match bounded(deadline, self.store.insert_one(collection, marker)).await {
            Ok(()) => Ok(true),
            Err(AccessError::Upstream(StoreError::Duplicate { .. })) => {
                debug!(collection, key, holder, "Key already claimed");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Releases `key` if `holder` still holds it.
    pub async fn release_key(
        &self,
        deadline: Deadline,
        collection: &str,
        key: &str,
        holder: &str,
    ) -> Result<bool, AccessError> {
        let filter = Filter::by_code(key).eq("holder", holder);
        let deleted = bounded(deadline, self.store.delete_one(collection, &filter)).await?;
        Ok(deleted == 1)
    }

    /// Drops the cache entry of one record. Best effort.
    pub async fn invalidate(&self, ctx: &RequestContext, kind: EntityKind, code: &str) {
        let key = kind.cache_key(code);
        let result = ctx
            .within(self.cache.delete(&key))
            .await
            .map_err(CacheError::from)
            .and_then(|result| result);
        if let Err(err) = result {
            warn!(key = %key, error = %err, "Cache invalidation failed");
            counter!("cache_write_failures_total", "entity" => kind.collection()).increment(1);
        }
    }

    async fn cache_get(&self, ctx: &RequestContext, key: &str) -> Option<Value> {
        let result = ctx
            .within(self.cache.get(key))
            .await
            .map_err(CacheError::from)
            .and_then(|result| result);
        match result {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn cache_set<E: Entity>(&self, ctx: &RequestContext, record: &E) {
        let key = E::KIND.cache_key(record.code());
        let result = match serde_json::to_value(record) {
            Ok(value) => ctx
                .within(self.cache.set(&key, &value, self.cache_ttl))
                .await
                .map_err(CacheError::from)
                .and_then(|result| result),
            Err(err) => Err(CacheError::Encoding(err)),
        };
        if let Err(err) = result {
            warn!(key = %key, error = %err, "Cache write failed");
            counter!("cache_write_failures_total", "entity" => E::KIND.collection()).increment(1);
        }
    }
}

/// Runs a store call under the request deadline.
async fn bounded<T>(
    deadline: Deadline,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, AccessError> {
    let result = deadline.within(call).await.map_err(StoreError::from)?;
    Ok(result?)
}

fn encode<E: Entity>(record: &E) -> Result<Document, AccessError> {
    match serde_json::to_value(record).map_err(StoreError::from)? {
        Value::Object(document) => Ok(document),
        _ => Err(AccessError::malformed(E::KIND, record.code(), "record is not a JSON object")),
    }
}

fn decode_value<E: Entity>(code: &str, value: Value) -> Result<E, AccessError> {
    serde_json::from_value(value).map_err(|err| {
        warn!(entity = %E::KIND, code, error = %err, "Record failed to decode");
        AccessError::malformed(E::KIND, code, err.to_string())
    })
}

fn decode_document<E: Entity>(document: Document) -> Result<E, AccessError> {
    let code = document
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    decode_value(&code, Value::Object(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::Doctor;
    use crate::models::fixtures::*;
    use crate::store::InMemoryStore;
    use crate::tenancy::{CallerIdentity, Tier};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingCache;

    #[async_trait]
    impl CacheStore for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn set(&self, _key: &str, _value: &Value, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    fn ctx(caller: CallerIdentity) -> RequestContext {
        RequestContext::new(caller)
    }

    fn hospital_ctx(code: &str) -> RequestContext {
        ctx(CallerIdentity::member(code, Tier::Hospital, "TEN1").unwrap())
    }

    async fn seeded(cache: Arc<dyn CacheStore>) -> EntityRepository {
        let repo = EntityRepository::new(
            Arc::new(InMemoryStore::new()),
            cache,
            Duration::from_secs(60),
        );
        repo.insert(&hospital_ctx("HOS1"), &doctor("D1", "HOS1", "TEN1"))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn cache_failures_never_fail_reads() {
        let repo = seeded(Arc::new(FailingCache)).await;
        let found: Doctor = repo
            .fetch_by_code(&hospital_ctx("HOS1"), "D1")
            .await
            .unwrap();
        assert_eq!(found.code(), "D1");
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let repo = seeded(Arc::new(MemoryCache::with_capacity(8))).await;
        let err = repo
            .fetch_by_code::<Doctor>(&hospital_ctx("HOS1"), "D404")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn undecodable_cached_record_is_malformed() {
        let cache = Arc::new(MemoryCache::with_capacity(8));
        let repo = seeded(cache.clone()).await;
        cache
            .set("DOCTOR:D1", &json!({"code": "D1"}), Duration::from_secs(60))
            .await
            .unwrap();

        let err = repo
            .fetch_by_code::<Doctor>(&hospital_ctx("HOS1"), "D1")
            .await
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn update_ignores_write_once_fields() {
        let repo = seeded(Arc::new(MemoryCache::with_capacity(8))).await;
        let changes = json!({"name": "Dr. Iyer", "createdBy": "HOS2", "tenantId": "TEN2"});
        let updated: Doctor = repo
            .update(
                &hospital_ctx("HOS1"),
                "D1",
                changes.as_object().cloned().unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(updated.profile.name, "Dr. Iyer");
        assert_eq!(updated.meta.created_by.as_deref(), Some("HOS1"));
        assert_eq!(updated.meta.tenant_id.as_deref(), Some("TEN1"));
        assert_eq!(updated.meta.updated_by.as_deref(), Some("HOS1"));
    }

    #[tokio::test]
    async fn conditional_update_applies_only_to_the_expected_state() {
        let cache = Arc::new(MemoryCache::with_capacity(8));
        let repo = seeded(cache.clone()).await;
        let ctx = hospital_ctx("HOS1");
        let expected = || Filter::new().eq("department", "Cardiology");
        let transfer = || json!({"department": "Neurology"}).as_object().cloned().unwrap();

        let first: Option<Doctor> = repo
            .update_where(&ctx, "D1", expected(), transfer())
            .await
            .unwrap();
        assert_eq!(first.unwrap().department.as_deref(), Some("Neurology"));

        let second: Option<Doctor> = repo
            .update_where(&ctx, "D1", expected(), transfer())
            .await
            .unwrap();
        assert!(second.is_none());

        // The cache holds the current store copy after a skipped update too.
        let cached = cache.get("DOCTOR:D1").await.unwrap().unwrap();
        assert_eq!(cached["department"], "Neurology");

        let missing = repo
            .update_where::<Doctor>(&ctx, "D404", Filter::new(), transfer())
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn keys_are_claimed_once_and_released_by_their_holder() {
        let repo = seeded(Arc::new(MemoryCache::with_capacity(8))).await;
        let deadline = Deadline::none();

        assert!(repo.claim_key(deadline, "SLOT", "D1|2026-03-02|10:00", "APP1").await.unwrap());
        assert!(!repo.claim_key(deadline, "SLOT", "D1|2026-03-02|10:00", "APP2").await.unwrap());

        assert!(!repo.release_key(deadline, "SLOT", "D1|2026-03-02|10:00", "APP2").await.unwrap());
        assert!(repo.release_key(deadline, "SLOT", "D1|2026-03-02|10:00", "APP1").await.unwrap());
        assert!(repo.claim_key(deadline, "SLOT", "D1|2026-03-02|10:00", "APP2").await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_store_and_cache_entries() {
        let cache = Arc::new(MemoryCache::with_capacity(8));
        let repo = seeded(cache.clone()).await;
        let ctx = hospital_ctx("HOS1");

        repo.delete_owned::<Doctor>(&ctx, "D1").await.unwrap();
        assert!(cache.get("DOCTOR:D1").await.unwrap().is_none());
        assert!(
            repo.fetch_by_code::<Doctor>(&ctx, "D1")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            repo.delete(&ctx, EntityKind::Doctor, "D1")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_surfaces_as_upstream_timeout() {
        let repo = seeded(Arc::new(MemoryCache::with_capacity(8))).await;
        let ctx = hospital_ctx("HOS1").with_timeout(Duration::from_millis(5));
        tokio::time::advance(Duration::from_millis(10)).await;

        let err = repo.fetch_by_code::<Doctor>(&ctx, "D1").await.unwrap_err();
        assert!(matches!(err, AccessError::Upstream(StoreError::Timeout)), "{err}");
    }
}
