//! Metadata resolution: local cache → remote download.
//!
//! The artifact pipeline without workspace consultation or version binding.
//! Requests name at most one remote; requests against equivalent remotes
//! share a download group, and groups run in waves sized by the
//! `quarry.metadataResolver.threads` hint. Events mirror the artifact set:
//! `MetadataResolving`, optional `MetadataDownloading` / `MetadataDownloaded`,
//! then `MetadataResolved`.

use std::sync::Arc;

use quarry_core::events::{EventDispatcher, EventType, RepositoryEvent};
use quarry_core::session::{config_keys, RepositorySession};
use quarry_core::types::{Metadata, RemoteRepository, RepositoryRef};
use quarry_store::local::{
    LocalMetadataRegistration, LocalMetadataRequest, LocalRepositoryManager,
};
use quarry_store::sync::SyncContextFactory;

use crate::connector::{MetadataDownload, RepositoryConnectorProvider};
use crate::error::{MetadataResolutionError, ResolveError};
use crate::offline::OfflineController;
use crate::policy;
use crate::update_check::{MetadataUpdateCheck, UpdateCheck, UpdateCheckManager};

/// One metadata item to resolve, either from the local repository
/// (`repository == None`) or from one remote.
#[derive(Debug, Clone)]
pub struct MetadataRequest {
    pub metadata: Metadata,
    pub repository: Option<RemoteRepository>,
    pub context: String,
    /// When set, a recent enough locally installed copy suppresses the
    /// remote check.
    pub favor_local: bool,
}

impl MetadataRequest {
    pub fn new(metadata: Metadata, repository: Option<RemoteRepository>) -> Self {
        Self {
            metadata,
            repository,
            context: String::new(),
            favor_local: false,
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn favor_local(mut self, favor: bool) -> Self {
        self.favor_local = favor;
        self
    }
}

/// Outcome for one metadata request.
#[derive(Debug, Clone)]
pub struct MetadataResult {
    pub request: MetadataRequest,
    pub metadata: Option<Metadata>,
    pub repository: Option<RepositoryRef>,
    pub errors: Vec<ResolveError>,
}

impl MetadataResult {
    fn new(request: MetadataRequest) -> Self {
        Self {
            request,
            metadata: None,
            repository: None,
            errors: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.metadata
            .as_ref()
            .is_some_and(|metadata| metadata.file.is_some())
    }
}

struct MetadataGroup {
    repository: RemoteRepository,
    items: Vec<MetadataItem>,
    downloads: Vec<MetadataDownload>,
}

struct MetadataItem {
    index: usize,
    metadata: Metadata,
    check: MetadataUpdateCheck,
}

/// Drives the local/remote pipeline for metadata batches.
pub struct MetadataResolver {
    lrm: Arc<dyn LocalRepositoryManager>,
    connectors: Arc<dyn RepositoryConnectorProvider>,
    update_checks: UpdateCheckManager,
    offline: OfflineController,
    dispatcher: Arc<dyn EventDispatcher>,
    sync_factory: SyncContextFactory,
}

impl MetadataResolver {
    pub fn new(
        lrm: Arc<dyn LocalRepositoryManager>,
        connectors: Arc<dyn RepositoryConnectorProvider>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        let sync_factory = SyncContextFactory::new(lrm.repository());
        Self {
            lrm,
            connectors,
            update_checks: UpdateCheckManager,
            offline: OfflineController,
            dispatcher,
            sync_factory,
        }
    }

    /// Resolve a batch. The call fails as a whole iff any result ends without
    /// a file; the error carries all results.
    pub fn resolve_metadata(
        &self,
        session: &RepositorySession,
        requests: Vec<MetadataRequest>,
    ) -> Result<Vec<MetadataResult>, MetadataResolutionError> {
        let mut sync = self.sync_factory.context(false);
        let items: Vec<&Metadata> = requests.iter().map(|request| &request.metadata).collect();
        if let Err(err) = sync.acquire(&[], &items) {
            tracing::warn!("proceeding without coordinate locks: {err}");
        }

        let results = self.resolve(session, requests);
        drop(sync);

        if results.iter().any(|result| !result.is_resolved()) {
            Err(MetadataResolutionError { results })
        } else {
            Ok(results)
        }
    }

    fn resolve(
        &self,
        session: &RepositorySession,
        requests: Vec<MetadataRequest>,
    ) -> Vec<MetadataResult> {
        let basedir = self.lrm.repository().basedir.clone();
        let mut results: Vec<MetadataResult> = Vec::with_capacity(requests.len());
        let mut groups: Vec<MetadataGroup> = Vec::new();

        for request in requests {
            let index = results.len();
            let mut metadata = request.metadata.clone();
            let context = request.context.clone();
            let favor_local = request.favor_local;
            let repository = request.repository.clone();
            let mut result = MetadataResult::new(request);

            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::MetadataResolving).with_metadata(&metadata),
            );

            let Some(remote) = repository else {
                // local-only resolution
                let local = self.lrm.find_metadata(
                    session,
                    &LocalMetadataRequest {
                        metadata: &metadata,
                        repository: None,
                        context: &context,
                    },
                );
                if let Some(file) = local.file {
                    metadata.file = Some(file);
                    result.metadata = Some(metadata.clone());
                    result.repository = Some(RepositoryRef::Local);
                    self.metadata_resolved(&metadata, Some(RepositoryRef::Local), &[]);
                }
                results.push(result);
                continue;
            };

            let repo_policy = policy::nature_policy(&remote, metadata.nature);
            if !repo_policy.enabled {
                results.push(result);
                continue;
            }

            if let Err(err) = self.offline.check_offline(session, &remote) {
                result.errors.push(err);
                results.push(result);
                continue;
            }

            let file = basedir.join(self.lrm.path_for_remote_metadata(
                &metadata,
                &remote,
                &context,
            ));

            let mut check = UpdateCheck::new(
                metadata.clone(),
                file.clone(),
                remote.clone(),
                repo_policy.update_policy,
            );
            if favor_local {
                check.local_last_updated_ms = self.local_copy_mtime(session, &metadata, &context);
            }
            self.update_checks.check_metadata(session, &mut check);

            if !check.required {
                if let Some(error) = check.error.take() {
                    result.errors.push(error);
                } else if file.is_file() {
                    metadata.file = Some(file);
                    result.metadata = Some(metadata.clone());
                    result.repository = Some(RepositoryRef::Remote(remote.clone()));
                    self.metadata_resolved(
                        &metadata,
                        Some(RepositoryRef::Remote(remote)),
                        &[],
                    );
                }
                results.push(result);
                continue;
            }

            let mut download = MetadataDownload::new(metadata.clone(), file, context);
            download.checksum_policy = repo_policy.checksum_policy;
            let item = MetadataItem {
                index,
                metadata: metadata.clone(),
                check,
            };
            match groups
                .iter_mut()
                .find(|group| group.repository.equivalent_for_batching(&remote))
            {
                Some(group) => {
                    group.items.push(item);
                    group.downloads.push(download);
                }
                None => groups.push(MetadataGroup {
                    repository: remote,
                    items: vec![item],
                    downloads: vec![download],
                }),
            }
            results.push(result);
        }

        if groups.is_empty() {
            return self.finish(results);
        }

        for group in &groups {
            for download in &group.downloads {
                self.dispatcher.dispatch(
                    RepositoryEvent::new(EventType::MetadataDownloading)
                        .with_metadata(&download.metadata)
                        .with_repository(RepositoryRef::Remote(group.repository.clone())),
                );
            }
        }

        let threads = session
            .config_int(config_keys::METADATA_RESOLVER_THREADS, 4)
            .max(1) as usize;
        for wave in groups.chunks_mut(threads) {
            std::thread::scope(|scope| {
                for group in wave.iter_mut() {
                    scope.spawn(move || self.download_group(session, group));
                }
            });
        }

        for group in &mut groups {
            for (item, download) in group.items.iter_mut().zip(&group.downloads) {
                item.check.error = download.error.clone();
                self.update_checks.touch_metadata(session, &item.check);

                let result = &mut results[item.index];
                match &download.error {
                    None => {
                        self.lrm.add_metadata(
                            session,
                            &LocalMetadataRegistration {
                                metadata: &item.metadata,
                                repository: Some(&group.repository),
                            },
                        );
                        let mut metadata = item.metadata.clone();
                        metadata.file = Some(download.file.clone());
                        result.metadata = Some(metadata.clone());
                        result.repository =
                            Some(RepositoryRef::Remote(group.repository.clone()));
                        self.metadata_downloaded(&metadata, &group.repository, None);
                        self.metadata_resolved(
                            &metadata,
                            Some(RepositoryRef::Remote(group.repository.clone())),
                            &[],
                        );
                    }
                    Some(error) => {
                        result.errors.push(error.clone());
                        self.metadata_downloaded(&item.metadata, &group.repository, Some(error));
                    }
                }
            }
        }

        self.finish(results)
    }

    /// Terminal pass: anything still unresolved reports `MetadataResolved`
    /// with its accumulated errors.
    fn finish(&self, mut results: Vec<MetadataResult>) -> Vec<MetadataResult> {
        for result in &mut results {
            if !result.is_resolved() {
                if result.errors.is_empty() {
                    let location = match &result.request.repository {
                        Some(remote) => remote.to_string(),
                        None => "the local repository".to_string(),
                    };
                    result.errors.push(ResolveError::MetadataNotFound {
                        coordinates: result.request.metadata.to_string(),
                        location,
                    });
                }
                let metadata = result.request.metadata.clone();
                self.metadata_resolved(&metadata, None, &result.errors);
            }
        }
        results
    }

    fn download_group(&self, session: &RepositorySession, group: &mut MetadataGroup) {
        match self.connectors.connector(session, &group.repository) {
            Ok(connector) => connector.get(&mut [], &mut group.downloads),
            Err(err) => {
                for download in &mut group.downloads {
                    download.error = Some(ResolveError::MetadataTransfer {
                        coordinates: download.metadata.to_string(),
                        repository: group.repository.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    /// Mtime of the locally installed copy, 0 when absent.
    fn local_copy_mtime(
        &self,
        session: &RepositorySession,
        metadata: &Metadata,
        context: &str,
    ) -> i64 {
        let local = self.lrm.find_metadata(
            session,
            &LocalMetadataRequest {
                metadata,
                repository: None,
                context,
            },
        );
        local
            .file
            .and_then(|file| file.metadata().ok())
            .and_then(|meta| meta.modified().ok())
            .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or(0)
    }

    fn metadata_resolved(
        &self,
        metadata: &Metadata,
        repository: Option<RepositoryRef>,
        errors: &[ResolveError],
    ) {
        let mut event = RepositoryEvent::new(EventType::MetadataResolved)
            .with_metadata(metadata)
            .with_errors(errors.iter().map(ToString::to_string).collect());
        if let Some(repository) = repository {
            event = event.with_repository(repository);
        }
        self.dispatcher.dispatch(event);
    }

    fn metadata_downloaded(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
        error: Option<&ResolveError>,
    ) {
        let event = RepositoryEvent::new(EventType::MetadataDownloaded)
            .with_metadata(metadata)
            .with_repository(RepositoryRef::Remote(repository.clone()))
            .with_errors(error.iter().map(ToString::to_string).collect());
        self.dispatcher.dispatch(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_defaults() {
        let metadata = Metadata::new(
            "g",
            "widget",
            "",
            "versions.xml",
            quarry_core::types::Nature::Release,
        );
        let request = MetadataRequest::new(metadata, None).context("project");
        assert_eq!(request.context, "project");
        assert!(!request.favor_local);
        assert!(request.repository.is_none());
    }
}
