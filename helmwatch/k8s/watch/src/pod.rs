use crate::{
    logs::{self, LogMode, LogStreams},
    subscription::Handler,
};
use ahash::AHashMap as HashMap;
use helmwatch_core::{ContainerState, PodRecord};
use helmwatch_k8s_api::{
    self as k8s,
    labels::{Labels, Selector},
    ResourceExt,
};
use tokio::time;
use tracing::{debug, info, warn};

/// Bound on reading one container's termination logs.
const FETCH_TIMEOUT: time::Duration = time::Duration::from_secs(30);

/// Tracks the pods deployed by one workload and reports the logs of their
/// terminated containers.
///
/// Termination logs are fetched at most once per container per pod
/// incarnation. Deleting a pod clears its marks, so a recreated pod is
/// treated as a fresh execution.
pub struct PodWatcher<L> {
    selector: Selector,
    logs: L,
    pods: HashMap<(String, String), PodRecord>,
}

// === impl PodWatcher ===

impl<L> PodWatcher<L> {
    pub fn new(selector: Selector, logs: L) -> Self {
        Self {
            selector,
            logs,
            pods: HashMap::default(),
        }
    }

    /// The tracked record for a pod, if any.
    pub fn tracked(&self, namespace: &str, name: &str) -> Option<&PodRecord> {
        self.pods.get(&(namespace.to_string(), name.to_string()))
    }
}

impl<L: LogStreams> PodWatcher<L> {
    /// Fetches a terminated container's previous-execution logs, degrading
    /// fetch failures to their sentinel text.
    async fn terminated_log(&self, namespace: &str, pod: &str, container: &str) -> String {
        let fetch = logs::fetch(
            &self.logs,
            namespace,
            pod,
            container,
            &LogMode::Previous,
            FETCH_TIMEOUT,
        );
        match fetch.await {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, %pod, %container, "Failed to fetch container logs");
                error.sentinel().to_string()
            }
        }
    }

    async fn observe(&mut self, pod: k8s::Pod) {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let phase = pod_phase(&pod);

        debug!(pod = %name, %phase, "Pod updated");

        let mut pending = Vec::new();
        {
            let record = self
                .pods
                .entry((namespace.clone(), name.clone()))
                .or_insert_with(|| PodRecord::new(namespace.clone(), name.clone()));
            record.phase = phase;
            record.containers = container_states(&pod);

            let terminated = record
                .containers
                .iter()
                .filter(|(_, state)| *state == ContainerState::Terminated)
                .map(|(container, _)| container.clone())
                .collect::<Vec<_>>();
            for container in terminated {
                // Mark before fetching so that a failed fetch is not retried.
                if record.mark_fetched(&container) {
                    pending.push(container);
                }
            }
        }

        for container in pending {
            info!(pod = %name, %container, "Detected terminated container");
            let text = self.terminated_log(&namespace, &name, &container).await;
            info!(pod = %name, %container, log = %text, "Container terminated");
        }
    }
}

#[async_trait::async_trait]
impl<L: LogStreams> Handler<k8s::Pod> for PodWatcher<L> {
    fn filter(&self, pod: &k8s::Pod) -> bool {
        self.selector.matches(&Labels::from(pod.labels().clone()))
    }

    async fn added(&mut self, pod: k8s::Pod) {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let phase = pod_phase(&pod);

        info!(pod = %name, %phase, "Pod added");

        let mut record = PodRecord::new(namespace.clone(), name.clone());
        record.phase = phase;
        record.containers = container_states(&pod);
        self.pods.entry((namespace, name)).or_insert(record);
    }

    async fn updated(&mut self, pod: k8s::Pod) {
        self.observe(pod).await;
    }

    async fn deleted(&mut self, namespace: String, name: String) {
        if let Some(record) = self.pods.remove(&(namespace, name)) {
            info!(pod = %record.name, phase = %record.phase, "Pod deleted");
        }
    }
}

fn pod_phase(pod: &k8s::Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_default()
}

/// Distills the reported container statuses into name and state pairs.
fn container_states(pod: &k8s::Pod) -> Vec<(String, ContainerState)> {
    pod.status
        .as_ref()
        .map(|status| {
            status
                .container_statuses
                .iter()
                .flatten()
                .map(|cs| (cs.name.clone(), container_state(cs)))
                .collect()
        })
        .unwrap_or_default()
}

fn container_state(cs: &k8s::api::core::v1::ContainerStatus) -> ContainerState {
    match cs.state.as_ref() {
        Some(state) if state.terminated.is_some() => ContainerState::Terminated,
        Some(state) if state.running.is_some() => ContainerState::Running,
        _ => ContainerState::Waiting,
    }
}
