use ahash::AHashMap as HashMap;
use std::collections::hash_map::Entry as HashEntry;

/// A Helm release status label value.
///
/// Statuses are passed through from the backing store without validation
/// against a closed set. Only the values the pipeline reacts to are named.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReleaseStatus(String);

/// The last observed snapshot of a named release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub name: String,
    pub status: ReleaseStatus,
    pub version: u64,
}

/// An in-memory table of known releases, keyed by name.
#[derive(Debug, Default)]
pub struct ReleaseTracker {
    releases: HashMap<String, ReleaseRecord>,
}

// === impl ReleaseStatus ===

impl ReleaseStatus {
    pub const PENDING_UPGRADE: &'static str = "pending-upgrade";
    pub const SUPERSEDED: &'static str = "superseded";

    pub fn is_pending_upgrade(&self) -> bool {
        self.0 == Self::PENDING_UPGRADE
    }

    pub fn is_superseded(&self) -> bool {
        self.0 == Self::SUPERSEDED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ReleaseStatus {
    fn from(status: String) -> Self {
        Self(status)
    }
}

impl From<&str> for ReleaseStatus {
    fn from(status: &str) -> Self {
        Self(status.to_string())
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// === impl ReleaseRecord ===

impl ReleaseRecord {
    pub fn new(name: impl Into<String>, status: impl Into<ReleaseStatus>, version: u64) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            version,
        }
    }
}

// === impl ReleaseTracker ===

impl ReleaseTracker {
    /// Records an observation of a release, updating any prior record in
    /// place.
    ///
    /// Returns true when the observation is a transition: the release was not
    /// previously tracked, or its tracked status differs from the observed
    /// one.
    pub fn upsert(&mut self, record: ReleaseRecord) -> bool {
        match self.releases.entry(record.name.clone()) {
            HashEntry::Vacant(entry) => {
                entry.insert(record);
                true
            }
            HashEntry::Occupied(mut entry) => {
                let transition = entry.get().status != record.status;
                entry.insert(record);
                transition
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&ReleaseRecord> {
        self.releases.get(name)
    }

    /// Forgets a release, returning the dropped record if one was tracked.
    pub fn remove(&mut self, name: &str) -> Option<ReleaseRecord> {
        self.releases.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }
}
