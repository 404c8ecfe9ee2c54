use crate::{
    logs::PodLogs,
    manifest::{self, ManifestSource, Workload},
    pod::PodWatcher,
    subscription::{Handler, Subscription, Watch},
};
use helmwatch_core::{ReleaseRecord, ReleaseTracker};
use helmwatch_k8s_api::{self as k8s, labels::Selector, ReleaseObject};
use kube::runtime::watcher;
use std::marker::PhantomData;
use tokio::{task::JoinSet, time};
use tracing::{debug, info, info_span, warn, Instrument};

/// Starts pod watches for discovered workloads.
pub trait Spawn: Send + 'static {
    fn spawn(&mut self, deployment: String, selector: Selector);
}

/// Watches Helm's release storage and cascades into pod watches when an
/// upgrade begins.
///
/// A release is acted on when it is observed in the pending-upgrade status
/// and was previously untracked or tracked in a different status. Redelivered
/// events for an unchanged status are absorbed.
pub struct ReleaseWatcher<T, S, P> {
    source: S,
    watches: P,
    releases: ReleaseTracker,
    _kind: PhantomData<fn() -> T>,
}

/// Supervises the pod watch tasks spawned by release cascades.
///
/// Dropping the set aborts every running watch; an orderly shutdown signals
/// them through the drain handle instead.
pub struct PodWatches {
    client: kube::Client,
    shutdown: drain::Watch,
    sync_timeout: time::Duration,
    tasks: JoinSet<()>,
}

// === impl ReleaseWatcher ===

impl<T, S, P> ReleaseWatcher<T, S, P> {
    pub fn new(source: S, watches: P) -> Self {
        Self {
            source,
            watches,
            releases: ReleaseTracker::default(),
            _kind: PhantomData,
        }
    }

    /// The tracked record for a release, if any.
    pub fn tracked(&self, release: &str) -> Option<&ReleaseRecord> {
        self.releases.lookup(release)
    }
}

impl<T, S: ManifestSource, P: Spawn> ReleaseWatcher<T, S, P> {
    async fn observe(&mut self, record: ReleaseRecord) {
        let name = record.name.clone();
        let status = record.status.clone();
        let version = record.version;

        let transition = self.releases.upsert(record);

        if !status.is_pending_upgrade() {
            debug!(release = %name, %status, version, "Release observed");
            return;
        }
        if !transition {
            debug!(release = %name, version, "Release already pending upgrade");
            return;
        }

        info!(release = %name, version, "Release detected");

        let workloads = match manifest::resolve(&self.source, &name).await {
            Ok(workloads) => workloads,
            Err(error) => {
                warn!(%error, release = %name, "Failed to resolve release objects");
                return;
            }
        };

        for workload in workloads {
            match workload {
                Workload::Deployment { name, selector } => {
                    info!(deployment = %name, "Deployment detected");
                    self.watches.spawn(name, selector);
                }
                Workload::Service { name } => {
                    info!(service = %name, "Service detected");
                }
                Workload::Other { kind, name } => {
                    debug!(%kind, %name, "Ignoring workload");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl<T, S, P> Handler<T> for ReleaseWatcher<T, S, P>
where
    T: ReleaseObject,
    S: ManifestSource,
    P: Spawn,
{
    fn filter(&self, obj: &T) -> bool {
        obj.release()
            .map(|record| !record.status.is_superseded())
            .unwrap_or(false)
    }

    async fn added(&mut self, obj: T) {
        if let Some(record) = obj.release() {
            self.observe(record).await;
        }
    }

    async fn updated(&mut self, obj: T) {
        if let Some(record) = obj.release() {
            self.observe(record).await;
        }
    }

    async fn deleted(&mut self, _namespace: String, name: String) {
        let (release, version) = match T::parse_key(&name) {
            Some(parsed) => parsed,
            None => return,
        };

        // Helm prunes old revisions during upgrades; only a delete of the
        // tracked revision forgets the release.
        let tracked = self
            .releases
            .lookup(&release)
            .map(|record| record.version == version)
            .unwrap_or(false);
        if tracked {
            self.releases.remove(&release);
            info!(release = %release, version, "Release deleted");
        } else {
            debug!(release = %release, version, "Ignoring deletion of an untracked revision");
        }
    }
}

// === impl PodWatches ===

impl PodWatches {
    pub fn new(client: kube::Client, shutdown: drain::Watch, sync_timeout: time::Duration) -> Self {
        Self {
            client,
            shutdown,
            sync_timeout,
            tasks: JoinSet::new(),
        }
    }
}

impl Spawn for PodWatches {
    fn spawn(&mut self, deployment: String, selector: Selector) {
        let span = info_span!("pods", %deployment);

        let api = k8s::Api::<k8s::Pod>::all(self.client.clone());
        let watch =
            Watch::from(watcher(api, watcher::Config::default())).instrument(span.clone());
        let handler = PodWatcher::new(selector, PodLogs::new(self.client.clone()));

        let subscription = Subscription::new(watch, handler);
        self.tasks.spawn(
            subscription
                .run(self.sync_timeout, self.shutdown.clone())
                .instrument(span),
        );
    }
}
