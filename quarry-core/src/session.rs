//! Repository session: per-invocation configuration and shared state.
//!
//! A session is an explicit parameter on every operation; there is no global
//! mutable state. Besides the offline flag and the string configuration map,
//! it carries [`SessionData`], a concurrent any-map used for in-session
//! memoization (e.g. the update-check memo table).

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Configuration keys read from [`RepositorySession::config`].
pub mod config_keys {
    /// Keep a base-named sibling of timestamped snapshot files (bool,
    /// default true).
    pub const SNAPSHOT_NORMALIZATION: &str = "quarry.resolver.snapshotNormalization";
    /// Protocols that may still be contacted while the session is offline
    /// (csv; `*` matches every protocol).
    pub const OFFLINE_PROTOCOLS: &str = "quarry.offline.protocols";
    /// Host patterns that may still be contacted while the session is offline
    /// (csv; `*` matches every host).
    pub const OFFLINE_HOSTS: &str = "quarry.offline.hosts";
    /// `enabled` (default) or `bypass`; bypass disables the in-session
    /// update-check memo.
    pub const UPDATE_CHECK_SESSION_STATE: &str = "quarry.updateCheck.sessionState";
    /// Parallelism hint for artifact download groups (int).
    pub const RESOLVER_THREADS: &str = "quarry.resolver.threads";
    /// Parallelism hint for metadata download groups (int).
    pub const METADATA_RESOLVER_THREADS: &str = "quarry.metadataResolver.threads";
}

/// Bit flags of the resolution error-caching policy.
pub mod error_policy {
    pub const CACHE_NONE: u32 = 0;
    /// Remember confirmed absence and do not retry until the update policy
    /// allows it.
    pub const CACHE_NOT_FOUND: u32 = 1;
    /// Remember transfer failures and do not retry until the update policy
    /// allows it.
    pub const CACHE_TRANSFER_ERROR: u32 = 2;
    pub const CACHE_ALL: u32 = CACHE_NOT_FOUND | CACHE_TRANSFER_ERROR;
}

// ---------------------------------------------------------------------------
// Session data
// ---------------------------------------------------------------------------

/// Concurrent key → value map for in-session shared state.
///
/// Values are created lazily; concurrent creators converge on a single
/// instance through the double-checked insert in [`SessionData::get_or_insert_with`].
#[derive(Default)]
pub struct SessionData {
    values: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl SessionData {
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let values = self.values.read().expect("session data lock");
        values.get(key).cloned()?.downcast::<T>().ok()
    }

    /// Returns the value under `key`, inserting `init()` if absent. All
    /// concurrent callers observe the same instance.
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>(key) {
            return existing;
        }
        let mut values = self.values.write().expect("session data lock");
        // A racing creator may have won between the read and the write lock.
        if let Some(existing) = values.get(key).cloned() {
            if let Ok(existing) = existing.downcast::<T>() {
                return existing;
            }
        }
        let created = Arc::new(init());
        values.insert(key.to_string(), created.clone());
        created
    }
}

impl std::fmt::Debug for SessionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values = self.values.read().expect("session data lock");
        f.debug_struct("SessionData")
            .field("keys", &values.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Settings and shared state for a batch of repository operations.
#[derive(Debug, Default)]
pub struct RepositorySession {
    /// When offline, remotes are only contacted if allowed by the
    /// `quarry.offline.*` configuration.
    pub offline: bool,
    /// Error-caching bit flags, see [`error_policy`].
    pub resolution_error_policy: u32,
    config: BTreeMap<String, String>,
    data: SessionData,
}

impl RepositorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn resolution_error_policy(mut self, flags: u32) -> Self {
        self.resolution_error_policy = flags;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn config(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        match self.config(key) {
            Some("true") | Some("1") | Some("yes") => true,
            Some("false") | Some("0") | Some("no") => false,
            _ => default,
        }
    }

    pub fn config_int(&self, key: &str, default: i64) -> i64 {
        self.config(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    /// Comma-separated list value; empty and missing both yield no entries.
    pub fn config_csv(&self, key: &str) -> Vec<String> {
        self.config(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
