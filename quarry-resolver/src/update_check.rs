//! Update checking: does a cached-but-possibly-stale item need a re-fetch?
//!
//! Outcomes persist in tracking files colocated with the cached file
//! (`<file>.lastUpdated` per artifact, one `resolver-status.properties` per
//! metadata directory). Records are kept under two distinct keys:
//!
//! - the *data key* identifies the logical location — the normalized remote
//!   URL plus the mirrored URLs of a repository manager — and carries
//!   not-found outcomes, which stay valid across transport changes;
//! - the *transfer key* additionally encodes proxy, credentials digest and
//!   content type, and carries transfer errors, so a failed transfer is
//!   retried the moment authentication or mirroring changes.
//!
//! Within a session, decisions are memoized per `(file, remote)` update key:
//! the first thread's outcome is observed by all later callers, giving at
//! most one remote round-trip per pair.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use chrono::Utc;

use quarry_core::session::{config_keys, error_policy, RepositorySession};
use quarry_core::types::{Artifact, Metadata, RemoteRepository, UpdatePolicy};
use quarry_store::local::remote_data_key;
use quarry_store::tracking;

use crate::error::ResolveError;
use crate::policy;

const UPDATED_SUFFIX: &str = ".lastUpdated";
const ERROR_SUFFIX: &str = ".error";
const NOT_FOUND: &str = "";
const SESSION_CHECKS_KEY: &str = "updateCheck.checks";
const METADATA_TOUCH_FILE: &str = "resolver-status.properties";

/// One "do I need to re-fetch?" question and its answer.
#[derive(Debug, Clone)]
pub struct UpdateCheck<T> {
    pub item: T,
    /// The local file the item resolves to (existing or prospective).
    pub file: PathBuf,
    /// False when the file is merely a candidate that still needs a remote
    /// existence check.
    pub file_valid: bool,
    pub repository: RemoteRepository,
    /// The repository that ultimately hosts the item when `repository` is an
    /// intermediary; defaults to `repository`.
    pub authoritative_repository: Option<RemoteRepository>,
    pub policy: UpdatePolicy,
    /// Timestamp of a local installation of the item, 0 if none. A recent
    /// enough local install short-circuits the whole check.
    pub local_last_updated_ms: i64,
    /// Answer: must the item be fetched from the remote?
    pub required: bool,
    /// A cached failure replayed from the tracking record, when the answer
    /// is "no" because of negative caching.
    pub error: Option<ResolveError>,
}

impl<T> UpdateCheck<T> {
    pub fn new(item: T, file: PathBuf, repository: RemoteRepository, policy: UpdatePolicy) -> Self {
        Self {
            item,
            file,
            file_valid: true,
            repository,
            authoritative_repository: None,
            policy,
            local_last_updated_ms: 0,
            required: false,
            error: None,
        }
    }

    fn authoritative(&self) -> &RemoteRepository {
        self.authoritative_repository
            .as_ref()
            .unwrap_or(&self.repository)
    }
}

pub type ArtifactUpdateCheck = UpdateCheck<Artifact>;
pub type MetadataUpdateCheck = UpdateCheck<Metadata>;

/// Answers and persists update checks. Stateless; the session carries the
/// memo table.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateCheckManager;

impl UpdateCheckManager {
    // -- artifacts ----------------------------------------------------------

    pub fn check_artifact(&self, session: &RepositorySession, check: &mut ArtifactUpdateCheck) {
        let now = Utc::now().timestamp_millis();
        if check.local_last_updated_ms != 0
            && !policy::is_update_required(now, check.local_last_updated_ms, check.policy)
        {
            tracing::debug!("skipping update check for {}, locally installed artifact is up to date", check.item);
            check.required = false;
            return;
        }

        let file_exists = check.file_valid && check.file.exists();
        let record = tracking::read(&artifact_touch_file(&check.file));

        let update_key = update_key(&check.file, &check.repository);
        let data_key = remote_data_key(&check.repository);
        let error = record.get(&format!("{data_key}{ERROR_SUFFIX}")).cloned();

        let last_updated = if file_exists {
            file_mtime_millis(&check.file)
        } else {
            match error.as_deref() {
                // first attempt ever
                None => 0,
                // artifact did not exist
                Some(NOT_FOUND) => record_last_updated(&record, &data_key),
                // artifact could not be transferred
                Some(_) => record_last_updated(&record, &repo_key(&check.repository)),
            }
        };

        if self.already_updated(session, &update_key) {
            tracing::debug!("skipping update check for {}, already checked in this session", check.item);
            check.required = false;
            if let Some(error) = &error {
                check.error = Some(cached_artifact_error(&check.item, &check.repository, error));
            }
        } else if last_updated == 0 {
            check.required = true;
        } else if policy::is_update_required(now, last_updated, check.policy) {
            check.required = true;
        } else if file_exists {
            tracing::debug!("skipping update check for {}, cached artifact is up to date", check.item);
            check.required = false;
        } else {
            let cache_flag = match error.as_deref() {
                None | Some("") => error_policy::CACHE_NOT_FOUND,
                Some(_) => error_policy::CACHE_TRANSFER_ERROR,
            };
            if session.resolution_error_policy & cache_flag != 0 {
                check.required = false;
                check.error = Some(cached_artifact_error(
                    &check.item,
                    &check.repository,
                    error.as_deref().unwrap_or(NOT_FOUND),
                ));
            } else {
                check.required = true;
            }
        }
    }

    /// Persist the outcome of a remote check and mark the session memo. After
    /// a successful touch with the artifact present and no `.error` keys
    /// left, the touch file itself is removed.
    pub fn touch_artifact(&self, session: &RepositorySession, check: &ArtifactUpdateCheck) {
        let touch_file = artifact_touch_file(&check.file);
        let data_key = remote_data_key(check.authoritative());
        let transfer_key = repo_key(&check.repository);

        self.set_updated(session, update_key(&check.file, &check.repository));
        let record = write_touch(&touch_file, &data_key, &transfer_key, check.error.as_ref());

        if check.file.exists() && !has_errors(&record) {
            let _ = std::fs::remove_file(&touch_file);
        }
    }

    // -- metadata -----------------------------------------------------------

    pub fn check_metadata(&self, session: &RepositorySession, check: &mut MetadataUpdateCheck) {
        let now = Utc::now().timestamp_millis();
        if check.local_last_updated_ms != 0
            && !policy::is_update_required(now, check.local_last_updated_ms, check.policy)
        {
            tracing::debug!("skipping update check for {}, locally installed metadata is up to date", check.item);
            check.required = false;
            return;
        }

        let file_exists = check.file_valid && check.file.exists();
        let record = tracking::read(&metadata_touch_file(&check.file));

        let update_key = update_key(&check.file, &check.repository);
        // sibling records share one file; the filename alone keys the data,
        // deliberately collapsing mirrors publishing the same metadata
        let data_key = filename(&check.file);
        let error = record.get(&format!("{data_key}{ERROR_SUFFIX}")).cloned();

        let last_updated = match error.as_deref() {
            None if file_exists => record_last_updated(&record, &data_key),
            // first attempt ever
            None => 0,
            // metadata did not exist
            Some(NOT_FOUND) => record_last_updated(&record, &data_key),
            // metadata could not be transferred
            Some(_) => {
                let transfer_key = metadata_transfer_key(&check.file, &check.repository);
                record_last_updated(&record, &transfer_key)
            }
        };

        if self.already_updated(session, &update_key) {
            tracing::debug!("skipping update check for {}, already checked in this session", check.item);
            check.required = false;
            if let Some(error) = &error {
                check.error = Some(cached_metadata_error(&check.item, &check.repository, error));
            }
        } else if last_updated == 0 {
            check.required = true;
        } else if policy::is_update_required(now, last_updated, check.policy) {
            check.required = true;
        } else if file_exists {
            check.required = false;
        } else {
            let cache_flag = match error.as_deref() {
                None | Some("") => error_policy::CACHE_NOT_FOUND,
                Some(_) => error_policy::CACHE_TRANSFER_ERROR,
            };
            if session.resolution_error_policy & cache_flag != 0 {
                check.required = false;
                check.error = Some(cached_metadata_error(
                    &check.item,
                    &check.repository,
                    error.as_deref().unwrap_or(NOT_FOUND),
                ));
            } else {
                check.required = true;
            }
        }
    }

    /// Persist the outcome of a metadata check. The shared per-directory
    /// touch file is never deleted; siblings still need it.
    pub fn touch_metadata(&self, session: &RepositorySession, check: &MetadataUpdateCheck) {
        let touch_file = metadata_touch_file(&check.file);
        let data_key = filename(&check.file);
        let transfer_key = metadata_transfer_key(&check.file, &check.repository);

        self.set_updated(session, update_key(&check.file, &check.repository));
        write_touch(&touch_file, &data_key, &transfer_key, check.error.as_ref());
    }

    // -- session memo -------------------------------------------------------

    fn already_updated(&self, session: &RepositorySession, update_key: &str) -> bool {
        if self.memo_bypassed(session) {
            return false;
        }
        session
            .data()
            .get::<Mutex<HashSet<String>>>(SESSION_CHECKS_KEY)
            .map(|memo| memo.lock().expect("session memo").contains(update_key))
            .unwrap_or(false)
    }

    fn set_updated(&self, session: &RepositorySession, update_key: String) {
        let memo = session
            .data()
            .get_or_insert_with::<Mutex<HashSet<String>>, _>(SESSION_CHECKS_KEY, Mutex::default);
        memo.lock().expect("session memo").insert(update_key);
    }

    fn memo_bypassed(&self, session: &RepositorySession) -> bool {
        session.config(config_keys::UPDATE_CHECK_SESSION_STATE) == Some("bypass")
    }
}

// ---------------------------------------------------------------------------
// Keys and records
// ---------------------------------------------------------------------------

fn artifact_touch_file(file: &Path) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(UPDATED_SUFFIX);
    file.with_file_name(name)
}

fn metadata_touch_file(file: &Path) -> PathBuf {
    file.with_file_name(METADATA_TOUCH_FILE)
}

fn filename(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The full transport identity of a remote: proxy, credential digests,
/// content type and normalized URL.
fn repo_key(remote: &RemoteRepository) -> String {
    let mut key = String::new();
    if let Some(proxy) = &remote.proxy {
        key.push_str(&proxy.auth_digest);
        key.push('@');
        key.push_str(&proxy.host);
        key.push(':');
        key.push_str(&proxy.port.to_string());
        key.push('>');
    }
    key.push_str(&remote.auth_digest);
    key.push('@');
    key.push_str(&remote.content_type);
    key.push('-');
    key.push_str(&quarry_store::local::normalize_url(&remote.url));
    key
}

fn metadata_transfer_key(file: &Path, remote: &RemoteRepository) -> String {
    format!("{}/{}", filename(file), repo_key(remote))
}

/// Session memo key: one decision per (file, transport identity) pair.
fn update_key(file: &Path, remote: &RemoteRepository) -> String {
    format!("{}|{}", file.display(), repo_key(remote))
}

/// Timestamp stored under `<key>.lastUpdated`. A missing, empty or malformed
/// value maps to 1: old enough to look stale to every policy, yet distinct
/// from the first-attempt marker 0.
fn record_last_updated(record: &BTreeMap<String, String>, key: &str) -> i64 {
    let value = record
        .get(&format!("{key}{UPDATED_SUFFIX}"))
        .map(String::as_str)
        .unwrap_or("");
    if value.is_empty() {
        return 1;
    }
    value.parse().unwrap_or_else(|_| {
        tracing::debug!("ignoring malformed lastUpdated timestamp {value:?}");
        1
    })
}

fn file_mtime_millis(file: &Path) -> i64 {
    file.metadata()
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn has_errors(record: &BTreeMap<String, String>) -> bool {
    record.keys().any(|key| key.ends_with(ERROR_SUFFIX))
}

/// Record the outcome under both keys: a success clears the error and stamps
/// the data key; a not-found stamps the data key with an empty error; a
/// transfer error stamps the transfer key and stores the message.
fn write_touch(
    touch_file: &Path,
    data_key: &str,
    transfer_key: &str,
    error: Option<&ResolveError>,
) -> BTreeMap<String, String> {
    let timestamp = Utc::now().timestamp_millis().to_string();
    let mut updates: BTreeMap<String, Option<String>> = BTreeMap::new();

    match error {
        None => {
            updates.insert(format!("{data_key}{ERROR_SUFFIX}"), None);
            updates.insert(format!("{data_key}{UPDATED_SUFFIX}"), Some(timestamp));
            updates.insert(format!("{transfer_key}{UPDATED_SUFFIX}"), None);
        }
        Some(error) if error.is_not_found() => {
            updates.insert(format!("{data_key}{ERROR_SUFFIX}"), Some(NOT_FOUND.to_string()));
            updates.insert(format!("{data_key}{UPDATED_SUFFIX}"), Some(timestamp));
            updates.insert(format!("{transfer_key}{UPDATED_SUFFIX}"), None);
        }
        Some(error) => {
            updates.insert(format!("{data_key}{ERROR_SUFFIX}"), Some(error.to_string()));
            updates.insert(format!("{data_key}{UPDATED_SUFFIX}"), None);
            updates.insert(format!("{transfer_key}{UPDATED_SUFFIX}"), Some(timestamp));
        }
    }

    tracking::update(touch_file, &updates)
}

fn cached_artifact_error(
    artifact: &Artifact,
    repository: &RemoteRepository,
    error: &str,
) -> ResolveError {
    if error.is_empty() {
        ResolveError::ArtifactNotFound {
            coordinates: artifact.to_string(),
            location: repository.to_string(),
        }
    } else {
        ResolveError::ArtifactTransfer {
            coordinates: artifact.to_string(),
            repository: repository.to_string(),
            reason: error.to_string(),
        }
    }
}

fn cached_metadata_error(
    metadata: &Metadata,
    repository: &RemoteRepository,
    error: &str,
) -> ResolveError {
    if error.is_empty() {
        ResolveError::MetadataNotFound {
            coordinates: metadata.to_string(),
            location: repository.to_string(),
        }
    } else {
        ResolveError::MetadataTransfer {
            coordinates: metadata.to_string(),
            repository: repository.to_string(),
            reason: error.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
