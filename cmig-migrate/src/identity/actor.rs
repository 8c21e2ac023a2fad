//! Actor resolution
//!
//! Maps the source system's user reference (messaging-platform user id or
//! email) to a target profile id. The cache is an explicit object handed to
//! the resolver, bulk-loaded once at startup, so per-record resolution is a
//! hash lookup after warm-up and tests can inject a fixed mapping.

use crate::models::ActorRef;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Owner assigned when a record's actor cannot be resolved
pub const SERVICE_ACCOUNT: &str = "service-account";

/// Profile row as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub profile_id: String,
    pub external_id: Option<String>,
    pub email: Option<String>,
}

/// Lookup of target profiles
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// Every profile, for cache warm-up
    async fn load_all(&self) -> cmig_common::Result<Vec<ProfileRecord>>;

    /// Single profile by external id, falling back to email
    async fn find(&self, actor: &ActorRef) -> cmig_common::Result<Option<ProfileRecord>>;
}

/// Actor reference → profile id
#[derive(Debug, Clone, Default)]
pub struct ActorCache {
    by_external_id: HashMap<String, String>,
    by_email: HashMap<String, String>,
    /// Keys already looked up without success
    misses: HashSet<String>,
}

impl ActorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache seeded from `(external id, profile id)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut cache = Self::new();
        for (k, v) in pairs {
            cache.by_external_id.insert(k.into(), v.into());
        }
        cache
    }

    pub fn insert(&mut self, profile: &ProfileRecord) {
        if let Some(external_id) = &profile.external_id {
            self.by_external_id
                .insert(external_id.clone(), profile.profile_id.clone());
        }
        if let Some(email) = &profile.email {
            self.by_email
                .insert(email.to_ascii_lowercase(), profile.profile_id.clone());
        }
    }

    pub fn insert_email(&mut self, email: impl Into<String>, profile_id: impl Into<String>) {
        self.by_email
            .insert(email.into().to_ascii_lowercase(), profile_id.into());
    }

    fn get(&self, actor: &ActorRef) -> Option<&String> {
        actor
            .external_id
            .as_ref()
            .and_then(|id| self.by_external_id.get(id))
            .or_else(|| {
                actor
                    .email
                    .as_ref()
                    .and_then(|e| self.by_email.get(&e.to_ascii_lowercase()))
            })
    }

    fn miss_key(actor: &ActorRef) -> String {
        format!(
            "{}|{}",
            actor.external_id.as_deref().unwrap_or_default(),
            actor.email.as_deref().unwrap_or_default().to_ascii_lowercase()
        )
    }

    pub fn len(&self) -> usize {
        self.by_external_id.len() + self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of resolving one actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedActor {
    pub user_id: String,
    /// True when the service-account sentinel was used
    pub is_fallback: bool,
}

impl ResolvedActor {
    fn fallback() -> Self {
        Self {
            user_id: SERVICE_ACCOUNT.to_string(),
            is_fallback: true,
        }
    }
}

/// Counters for the validator's soft check and the run log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub cache_hits: u64,
    pub lookups: u64,
    pub fallbacks: u64,
}

pub struct ActorResolver {
    cache: ActorCache,
    lookup: Option<Arc<dyn ProfileLookup>>,
    stats: ResolutionStats,
}

impl ActorResolver {
    pub fn new(cache: ActorCache, lookup: Arc<dyn ProfileLookup>) -> Self {
        Self {
            cache,
            lookup: Some(lookup),
            stats: ResolutionStats::default(),
        }
    }

    /// Resolver that never queries a store
    pub fn with_cache_only(cache: ActorCache) -> Self {
        Self {
            cache,
            lookup: None,
            stats: ResolutionStats::default(),
        }
    }

    /// Bulk-load every profile into the cache
    pub async fn preload(&mut self) -> cmig_common::Result<usize> {
        let Some(lookup) = &self.lookup else {
            return Ok(0);
        };
        let profiles = lookup.load_all().await?;
        for profile in &profiles {
            self.cache.insert(profile);
        }
        debug!(profiles = profiles.len(), cache_entries = self.cache.len(), "Actor cache preloaded");
        Ok(profiles.len())
    }

    /// Resolve an actor to a target user id
    ///
    /// Never fails: a missing actor, a missing profile, or a failed lookup all
    /// yield the service-account sentinel.
    pub async fn resolve(&mut self, actor: &ActorRef) -> ResolvedActor {
        if actor.is_empty() {
            self.stats.fallbacks += 1;
            return ResolvedActor::fallback();
        }

        if let Some(user_id) = self.cache.get(actor) {
            self.stats.cache_hits += 1;
            return ResolvedActor {
                user_id: user_id.clone(),
                is_fallback: false,
            };
        }

        let miss_key = ActorCache::miss_key(actor);
        if self.cache.misses.contains(&miss_key) {
            self.stats.fallbacks += 1;
            return ResolvedActor::fallback();
        }

        let Some(lookup) = &self.lookup else {
            self.cache.misses.insert(miss_key);
            self.stats.fallbacks += 1;
            return ResolvedActor::fallback();
        };

        self.stats.lookups += 1;
        match lookup.find(actor).await {
            Ok(Some(profile)) => {
                self.cache.insert(&profile);
                ResolvedActor {
                    user_id: profile.profile_id,
                    is_fallback: false,
                }
            }
            Ok(None) => {
                debug!(
                    external_id = ?actor.external_id,
                    email = ?actor.email,
                    "Actor has no profile, using service account"
                );
                self.cache.misses.insert(miss_key);
                self.stats.fallbacks += 1;
                ResolvedActor::fallback()
            }
            Err(e) => {
                // Not cached: a later record may succeed once the store recovers
                warn!(
                    external_id = ?actor.external_id,
                    error = %e,
                    "Profile lookup failed, using service account"
                );
                self.stats.fallbacks += 1;
                ResolvedActor::fallback()
            }
        }
    }

    pub fn stats(&self) -> ResolutionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLookup {
        profiles: Vec<ProfileRecord>,
        fail: bool,
        finds: AtomicUsize,
    }

    #[async_trait]
    impl ProfileLookup for FakeLookup {
        async fn load_all(&self) -> cmig_common::Result<Vec<ProfileRecord>> {
            Ok(self.profiles.clone())
        }

        async fn find(&self, actor: &ActorRef) -> cmig_common::Result<Option<ProfileRecord>> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(cmig_common::Error::Internal("connection reset".into()));
            }
            Ok(self
                .profiles
                .iter()
                .find(|p| p.external_id.is_some() && p.external_id == actor.external_id)
                .cloned())
        }
    }

    fn actor(id: &str) -> ActorRef {
        ActorRef {
            external_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn profile(id: &str, external: &str) -> ProfileRecord {
        ProfileRecord {
            profile_id: id.to_string(),
            external_id: Some(external.to_string()),
            email: None,
        }
    }

    #[tokio::test]
    async fn test_injected_cache_needs_no_store() {
        let mut resolver = ActorResolver::with_cache_only(ActorCache::from_pairs([("U1", "p-1")]));
        assert_eq!(resolver.resolve(&actor("U1")).await.user_id, "p-1");

        let missing = resolver.resolve(&actor("U2")).await;
        assert_eq!(missing.user_id, SERVICE_ACCOUNT);
        assert!(missing.is_fallback);
    }

    #[tokio::test]
    async fn test_email_resolves_when_external_id_unknown() {
        let mut cache = ActorCache::new();
        cache.insert_email("Mina@Example.com", "p-9");
        let mut resolver = ActorResolver::with_cache_only(cache);

        let resolved = resolver
            .resolve(&ActorRef {
                external_id: Some("unknown".into()),
                display_name: None,
                email: Some("mina@example.com".into()),
            })
            .await;
        assert_eq!(resolved.user_id, "p-9");
    }

    #[tokio::test]
    async fn test_preload_then_cache_hits() {
        let lookup = Arc::new(FakeLookup {
            profiles: vec![profile("p-1", "U1")],
            fail: false,
            finds: AtomicUsize::new(0),
        });
        let mut resolver = ActorResolver::new(ActorCache::new(), lookup.clone());
        assert_eq!(resolver.preload().await.unwrap(), 1);

        resolver.resolve(&actor("U1")).await;
        resolver.resolve(&actor("U1")).await;
        assert_eq!(lookup.finds.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.stats().cache_hits, 2);
    }

    #[tokio::test]
    async fn test_absent_actor_is_looked_up_once() {
        let lookup = Arc::new(FakeLookup {
            profiles: vec![],
            fail: false,
            finds: AtomicUsize::new(0),
        });
        let mut resolver = ActorResolver::new(ActorCache::new(), lookup.clone());

        for _ in 0..3 {
            assert!(resolver.resolve(&actor("ghost")).await.is_fallback);
        }
        assert_eq!(lookup.finds.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.stats().fallbacks, 3);
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back() {
        let lookup = Arc::new(FakeLookup {
            profiles: vec![],
            fail: true,
            finds: AtomicUsize::new(0),
        });
        let mut resolver = ActorResolver::new(ActorCache::new(), lookup);
        assert_eq!(resolver.resolve(&actor("U1")).await.user_id, SERVICE_ACCOUNT);
    }

    #[tokio::test]
    async fn test_missing_actor_uses_sentinel() {
        let mut resolver = ActorResolver::with_cache_only(ActorCache::new());
        assert!(resolver.resolve(&ActorRef::default()).await.is_fallback);
    }
}
