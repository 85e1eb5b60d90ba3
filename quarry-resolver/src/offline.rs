//! Offline control: whether a remote may be contacted in an offline session.

use quarry_core::session::{config_keys, RepositorySession};
use quarry_core::types::RemoteRepository;

use crate::error::ResolveError;

/// Decides, per remote, whether the session's offline mode blocks network
/// access. The allow lists are read from the session on every call so
/// configuration edits take effect immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineController;

impl OfflineController {
    /// Fails with [`ResolveError::RepositoryOffline`] when the session is
    /// offline and the remote matches neither allow list.
    pub fn check_offline(
        &self,
        session: &RepositorySession,
        remote: &RemoteRepository,
    ) -> Result<(), ResolveError> {
        if !session.offline {
            return Ok(());
        }
        if self.protocol_allowed(session, remote) || self.host_allowed(session, remote) {
            tracing::debug!("offline session may still contact {remote}");
            return Ok(());
        }
        Err(ResolveError::RepositoryOffline {
            repository: remote.to_string(),
        })
    }

    fn protocol_allowed(&self, session: &RepositorySession, remote: &RemoteRepository) -> bool {
        let scheme = url_scheme(&remote.url);
        session
            .config_csv(config_keys::OFFLINE_PROTOCOLS)
            .iter()
            .any(|entry| entry == "*" || entry.eq_ignore_ascii_case(scheme))
    }

    /// Host entries match the URL host or the repository id.
    fn host_allowed(&self, session: &RepositorySession, remote: &RemoteRepository) -> bool {
        let host = url_host(&remote.url);
        session
            .config_csv(config_keys::OFFLINE_HOSTS)
            .iter()
            .any(|entry| {
                entry == "*" || entry.eq_ignore_ascii_case(host) || entry == &remote.id
            })
    }
}

fn url_scheme(url: &str) -> &str {
    url.split_once("://").map(|(scheme, _)| scheme).unwrap_or("")
}

fn url_host(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
    host.split(':').next().unwrap_or(host)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
