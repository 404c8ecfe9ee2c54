use ahash::AHashSet as HashSet;

/// The lifecycle state of a single container, distilled from the pod status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerState {
    Waiting,
    Running,
    Terminated,
}

/// The tracked identity of a pod under watch.
#[derive(Clone, Debug, Default)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub phase: String,

    /// Container states in the order the pod status reports them.
    pub containers: Vec<(String, ContainerState)>,

    /// Containers whose termination logs were already fetched. A container is
    /// marked even when its fetch fails so that redelivered updates do not
    /// retry.
    fetched: HashSet<String>,
}

// === impl PodRecord ===

impl PodRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Marks a container's termination logs as fetched, returning true if the
    /// container was not already marked.
    pub fn mark_fetched(&mut self, container: &str) -> bool {
        self.fetched.insert(container.to_string())
    }

    pub fn is_fetched(&self, container: &str) -> bool {
        self.fetched.contains(container)
    }
}
