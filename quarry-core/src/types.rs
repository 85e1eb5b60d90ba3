//! Domain types for the quarry repository system.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Coordinate and policy types are serializable/deserializable via serde.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Well-known artifact property keys
// ---------------------------------------------------------------------------

/// Property keys recognized on [`Artifact::properties`].
pub mod property_keys {
    /// Marks an artifact as unhosted: the value is the absolute path of the
    /// file, and no repository is ever consulted for it.
    pub const LOCAL_PATH: &str = "localPath";
}

// ---------------------------------------------------------------------------
// Artifact coordinates
// ---------------------------------------------------------------------------

/// A versioned binary file addressed by
/// (groupId, artifactId, extension, classifier, version) coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    /// Empty for the main artifact.
    #[serde(default)]
    pub classifier: String,
    pub extension: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Resolved local file, if any.
    #[serde(skip)]
    pub file: Option<PathBuf>,
}

impl Artifact {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        extension: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            classifier: String::new(),
            extension: extension.into(),
            properties: BTreeMap::new(),
            file: None,
        }
    }

    /// Construct coordinates stamped with the extension/classifier defaults of
    /// an [`ArtifactType`].
    pub fn with_type(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
        artifact_type: &ArtifactType,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            classifier: artifact_type.classifier.clone(),
            extension: artifact_type.extension.clone(),
            properties: artifact_type.properties.clone(),
            file: None,
        }
    }

    pub fn classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = classifier.into();
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The unexpanded version: `1.0-20200101.010101-1` collapses back to
    /// `1.0-SNAPSHOT`; anything else is the version itself.
    pub fn base_version(&self) -> String {
        match timestamped_snapshot_base(&self.version) {
            Some(base) => format!("{base}-SNAPSHOT"),
            None => self.version.clone(),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.version.ends_with("-SNAPSHOT") || timestamped_snapshot_base(&self.version).is_some()
    }

    /// Path given via the `localPath` property, for unhosted artifacts.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.properties
            .get(property_keys::LOCAL_PATH)
            .map(PathBuf::from)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)?;
        write!(f, ":{}", self.extension)?;
        if !self.classifier.is_empty() {
            write!(f, ":{}", self.classifier)?;
        }
        write!(f, ":{}", self.version)
    }
}

/// Splits `<base>-<yyyyMMdd.HHmmss>-<build>` and returns the base, or `None`
/// when the version is not a timestamped snapshot.
fn timestamped_snapshot_base(version: &str) -> Option<&str> {
    let (head, build) = version.rsplit_once('-')?;
    if build.is_empty() || !build.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (base, timestamp) = head.rsplit_once('-')?;
    let t = timestamp.as_bytes();
    let well_formed = t.len() == 15
        && t[8] == b'.'
        && t[..8].iter().all(u8::is_ascii_digit)
        && t[9..].iter().all(u8::is_ascii_digit);
    (well_formed && !base.is_empty()).then_some(base)
}

/// A named preset of extension/classifier/properties for artifact coordinates
/// (e.g. `jar`, `javadoc`, `test-jar`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactType {
    pub id: String,
    pub extension: String,
    #[serde(default)]
    pub classifier: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ArtifactType {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            extension: id.clone(),
            id,
            classifier: String::new(),
            properties: BTreeMap::new(),
        }
    }

    fn preset(id: &str, extension: &str, classifier: &str) -> Self {
        Self {
            id: id.to_string(),
            extension: extension.to_string(),
            classifier: classifier.to_string(),
            properties: BTreeMap::new(),
        }
    }

    /// The preset for a well-known type id, or `None` for ids that only
    /// exist by registration.
    pub fn well_known(id: &str) -> Option<Self> {
        match id {
            "jar" => Some(Self::preset("jar", "jar", "")),
            "javadoc" => Some(Self::preset("javadoc", "jar", "javadoc")),
            "sources" => Some(Self::preset("sources", "jar", "sources")),
            "test-jar" => Some(Self::preset("test-jar", "jar", "tests")),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata coordinates
// ---------------------------------------------------------------------------

/// Whether a metadata entry applies to releases, snapshots, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nature {
    Release,
    Snapshot,
    ReleaseOrSnapshot,
}

impl Nature {
    pub fn includes_snapshots(self) -> bool {
        matches!(self, Nature::Snapshot | Nature::ReleaseOrSnapshot)
    }

    pub fn includes_releases(self) -> bool {
        matches!(self, Nature::Release | Nature::ReleaseOrSnapshot)
    }
}

/// Versioning/index information about artifacts at group, group/artifact or
/// group/artifact/version scope. Empty coordinate fields address the broader
/// scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub artifact_id: String,
    #[serde(default)]
    pub version: String,
    /// The filename-determining kind of this metadata, e.g. `versions.xml`.
    pub kind: String,
    pub nature: Nature,
    #[serde(skip)]
    pub file: Option<PathBuf>,
}

impl Metadata {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        nature: Nature,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            kind: kind.into(),
            nature,
            file: None,
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}/{}",
            self.group_id, self.artifact_id, self.version, self.kind
        )
    }
}

// ---------------------------------------------------------------------------
// Update / checksum policies
// ---------------------------------------------------------------------------

/// Symbolic TTL controlling staleness of cached items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    Never,
    Always,
    Daily,
    /// Update when the cached item is at least this many minutes old.
    Interval(u32),
}

impl UpdatePolicy {
    /// Parse the symbolic form. The empty string means `Always`; any
    /// unrecognized value degrades to `Daily`.
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "always" => UpdatePolicy::Always,
            "never" => UpdatePolicy::Never,
            "daily" => UpdatePolicy::Daily,
            other => match other
                .strip_prefix("interval:")
                .and_then(|minutes| minutes.parse::<u32>().ok())
            {
                Some(minutes) => UpdatePolicy::Interval(minutes),
                None => UpdatePolicy::Daily,
            },
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Never => write!(f, "never"),
            UpdatePolicy::Always => write!(f, "always"),
            UpdatePolicy::Daily => write!(f, "daily"),
            UpdatePolicy::Interval(minutes) => write!(f, "interval:{minutes}"),
        }
    }
}

/// How the connector reacts to a checksum mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    Fail,
    #[default]
    Warn,
    Ignore,
}

/// Per-nature repository policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPolicy {
    pub enabled: bool,
    pub update_policy: UpdatePolicy,
    pub checksum_policy: ChecksumPolicy,
}

impl Default for RepositoryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            update_policy: UpdatePolicy::Daily,
            checksum_policy: ChecksumPolicy::Warn,
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// A proxy in front of a remote repository. Only the identity matters here;
/// connection handling is the transport's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    /// Stable digest of the proxy credentials, from the auth store.
    #[serde(default)]
    pub auth_digest: String,
}

/// A network-addressable artifact source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub id: String,
    pub content_type: String,
    pub url: String,
    pub release_policy: RepositoryPolicy,
    pub snapshot_policy: RepositoryPolicy,
    /// True for repositories that aggregate a set of mirrored upstream URLs.
    #[serde(default)]
    pub repository_manager: bool,
    #[serde(default)]
    pub mirrored: Vec<RemoteRepository>,
    #[serde(default)]
    pub proxy: Option<Proxy>,
    /// Stable digest of the repository credentials, from the auth store.
    #[serde(default)]
    pub auth_digest: String,
}

impl RemoteRepository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_type: "default".to_string(),
            url: url.into(),
            release_policy: RepositoryPolicy::default(),
            snapshot_policy: RepositoryPolicy::default(),
            repository_manager: false,
            mirrored: Vec::new(),
            proxy: None,
            auth_digest: String::new(),
        }
    }

    /// The nature-specific policy for release or snapshot items.
    pub fn policy(&self, snapshot: bool) -> &RepositoryPolicy {
        if snapshot {
            &self.snapshot_policy
        } else {
            &self.release_policy
        }
    }

    /// Two remotes are batched together iff url, content type and
    /// repository-manager flag all match.
    pub fn equivalent_for_batching(&self, other: &RemoteRepository) -> bool {
        self.url == other.url
            && self.content_type == other.content_type
            && self.repository_manager == other.repository_manager
    }
}

impl fmt::Display for RemoteRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.url)
    }
}

/// The on-disk cache doubling as an install destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRepository {
    pub basedir: PathBuf,
}

impl LocalRepository {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
        }
    }
}

/// The repository an item was satisfied from, for results and events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryRef {
    Local,
    Workspace,
    Remote(RemoteRepository),
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryRef::Local => write!(f, "local repository"),
            RepositoryRef::Workspace => write!(f, "workspace"),
            RepositoryRef::Remote(remote) => remote.fmt(f),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_display_with_and_without_classifier() {
        let plain = Artifact::new("org.example", "widget", "jar", "1.0");
        assert_eq!(plain.to_string(), "org.example:widget:jar:1.0");

        let classified = plain.clone().classifier("sources");
        assert_eq!(classified.to_string(), "org.example:widget:jar:sources:1.0");
    }

    #[test]
    fn base_version_collapses_timestamped_snapshots() {
        let a = Artifact::new("g", "a", "jar", "1.0-20200101.010101-1");
        assert_eq!(a.base_version(), "1.0-SNAPSHOT");
        assert!(a.is_snapshot());

        let plain = Artifact::new("g", "a", "jar", "1.0-SNAPSHOT");
        assert_eq!(plain.base_version(), "1.0-SNAPSHOT");
        assert!(plain.is_snapshot());

        let release = Artifact::new("g", "a", "jar", "1.0");
        assert_eq!(release.base_version(), "1.0");
        assert!(!release.is_snapshot());
    }

    #[test]
    fn malformed_timestamps_are_not_snapshots() {
        for version in ["1.0-2020.0101-1", "1.0-20200101.01010-1", "1.0-x-1", "1-1"] {
            let a = Artifact::new("g", "a", "jar", version);
            assert_eq!(a.base_version(), version, "{version}");
            assert!(!a.is_snapshot(), "{version}");
        }
    }

    #[test]
    fn artifact_type_presets_stamp_defaults() {
        let javadoc = ArtifactType::well_known("javadoc").unwrap();
        let a = Artifact::with_type("g", "a", "1.0", &javadoc);
        assert_eq!(a.extension, "jar");
        assert_eq!(a.classifier, "javadoc");

        let test_jar = ArtifactType::well_known("test-jar").unwrap();
        assert_eq!(test_jar.extension, "jar");
        assert_eq!(test_jar.classifier, "tests");

        assert!(ArtifactType::well_known("custom").is_none());
    }

    #[test]
    fn artifact_type_new_defaults_extension_to_the_id() {
        let custom = ArtifactType::new("tarball");
        assert_eq!(custom.extension, "tarball");
        assert!(custom.classifier.is_empty());
    }

    #[test]
    fn update_policy_parse_and_display() {
        assert_eq!(UpdatePolicy::parse(""), UpdatePolicy::Always);
        assert_eq!(UpdatePolicy::parse("always"), UpdatePolicy::Always);
        assert_eq!(UpdatePolicy::parse("never"), UpdatePolicy::Never);
        assert_eq!(UpdatePolicy::parse("daily"), UpdatePolicy::Daily);
        assert_eq!(UpdatePolicy::parse("interval:90"), UpdatePolicy::Interval(90));
        // unknown values degrade to daily
        assert_eq!(UpdatePolicy::parse("hourly"), UpdatePolicy::Daily);
        assert_eq!(UpdatePolicy::parse("interval:x"), UpdatePolicy::Daily);

        assert_eq!(UpdatePolicy::Interval(90).to_string(), "interval:90");
    }

    #[test]
    fn batching_equivalence_ignores_id() {
        let a = RemoteRepository::new("central", "https://repo.example.org/");
        let mut b = RemoteRepository::new("mirror", "https://repo.example.org/");
        assert!(a.equivalent_for_batching(&b));

        b.repository_manager = true;
        assert!(!a.equivalent_for_batching(&b));
    }

    #[test]
    fn local_path_property_round_trips() {
        let a = Artifact::new("g", "a", "jar", "1.0")
            .property(property_keys::LOCAL_PATH, "/tmp/widget.jar");
        assert_eq!(a.local_path(), Some(PathBuf::from("/tmp/widget.jar")));
    }
}
