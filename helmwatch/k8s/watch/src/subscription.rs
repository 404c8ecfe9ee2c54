use ahash::AHashSet as HashSet;
use futures::prelude::*;
use kube::{
    runtime::watcher::{Error as WatchError, Event},
    Resource, ResourceExt,
};
use std::pin::Pin;
use tokio::time;
use tracing::{debug, error, info, Instrument};

/// Wraps a watch event stream that never terminates.
///
/// Dynamically created watches surface transient API errors in-stream; those
/// are logged and the watch resumes after a short pause.
pub struct Watch<T> {
    rx: EventStream<T>,
    span: tracing::Span,
}

type EventStream<T> = Pin<Box<dyn Stream<Item = Result<Event<T>, WatchError>> + Send + 'static>>;

/// Callbacks applied to the objects of one watch.
///
/// `filter` decides whether an object is of interest. An object that stops
/// matching is reported as deleted; an object that never matched is
/// invisible, including its deletion.
#[async_trait::async_trait]
pub trait Handler<T>: Send + 'static {
    fn filter(&self, obj: &T) -> bool;

    async fn added(&mut self, obj: T);

    async fn updated(&mut self, obj: T);

    async fn deleted(&mut self, namespace: String, name: String);
}

/// Drives a filtered watch, dispatching keyed add, update, and delete calls
/// to its handler.
pub struct Subscription<T, H> {
    watch: Watch<T>,
    handler: H,

    /// Keys of objects that currently match the filter.
    keys: HashSet<Key>,

    /// Keys seen during an in-progress relist, used to synthesize deletions
    /// for objects that disappeared while the watch was disconnected.
    relist: Option<HashSet<Key>>,
}

type Key = (String, String);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("initial sync did not complete within {0:?}")]
    SyncTimeout(time::Duration),
}

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<Event<T>, WatchError>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Self::new(watch.boxed())
    }
}

impl<T> Watch<T> {
    pub fn new(rx: EventStream<T>) -> Self {
        Self {
            rx,
            span: tracing::Span::current(),
        }
    }

    /// Wraps a stream whose errors are already handled upstream.
    pub fn infallible(rx: impl Stream<Item = Event<T>> + Send + 'static) -> Self
    where
        T: 'static,
    {
        Self::new(rx.map(Ok).boxed())
    }

    /// Overrides the tracing span used by the watch.
    pub fn instrument(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Receives the next event in the stream.
    ///
    /// If the stream fails, the error is logged and polling resumes after a
    /// one second pause, waiting for a reset event.
    pub async fn recv(&mut self) -> Event<T> {
        loop {
            let ev = self
                .rx
                .next()
                .instrument(self.span.clone())
                .await
                .expect("stream must not terminate");

            match ev {
                Ok(ev) => return ev,
                Err(error) => {
                    info!(parent: &self.span, %error, "Failed");
                    time::sleep(time::Duration::from_secs(1)).await;
                    info!(parent: &self.span, "Restarting");
                }
            }
        }
    }
}

// === impl Subscription ===

impl<T, H> Subscription<T, H>
where
    T: Resource + Send + 'static,
    H: Handler<T>,
{
    pub fn new(watch: Watch<T>, handler: H) -> Self {
        Self {
            watch,
            handler,
            keys: HashSet::default(),
            relist: None,
        }
    }

    /// Processes events until the initial list has been fully delivered.
    ///
    /// Fails if the list does not complete within the timeout.
    pub async fn sync(&mut self, timeout: time::Duration) -> Result<(), Error> {
        let synced = async {
            loop {
                let ev = self.watch.recv().await;
                let done = matches!(ev, Event::InitDone);
                self.handle(ev).await;
                if done {
                    return;
                }
            }
        };

        time::timeout(timeout, synced)
            .await
            .map_err(|_| Error::SyncTimeout(timeout))
    }

    /// Delivers events until the shutdown signal fires.
    pub async fn dispatch(mut self, shutdown: drain::Watch) {
        tokio::select! {
            _ = shutdown.signaled() => {
                debug!("Shutdown");
            }
            _ = self.process() => {}
        }
    }

    /// Runs the subscription to completion: initial sync, then dispatch.
    ///
    /// A sync failure terminates the subscription without delivering any
    /// further events.
    pub async fn run(mut self, timeout: time::Duration, shutdown: drain::Watch) {
        if let Err(error) = self.sync(timeout).await {
            error!(%error, "Failed to complete initial sync");
            return;
        }
        self.dispatch(shutdown).await;
    }

    async fn process(&mut self) {
        loop {
            let ev = self.watch.recv().await;
            self.handle(ev).await;
        }
    }

    async fn handle(&mut self, ev: Event<T>) {
        match ev {
            Event::Init => {
                self.relist = Some(HashSet::default());
            }

            Event::InitApply(obj) | Event::Apply(obj) => self.apply(obj).await,

            Event::InitDone => {
                if let Some(seen) = self.relist.take() {
                    let gone = self
                        .keys
                        .iter()
                        .filter(|key| !seen.contains(*key))
                        .cloned()
                        .collect::<Vec<_>>();
                    for key in gone {
                        self.keys.remove(&key);
                        let (ns, name) = key;
                        self.handler.deleted(ns, name).await;
                    }
                }
            }

            Event::Delete(obj) => {
                let key = key_of(&obj);
                if self.keys.remove(&key) {
                    let (ns, name) = key;
                    self.handler.deleted(ns, name).await;
                }
            }
        }
    }

    async fn apply(&mut self, obj: T) {
        let key = key_of(&obj);
        let matched = self.handler.filter(&obj);

        if matched {
            if let Some(relist) = self.relist.as_mut() {
                relist.insert(key.clone());
            }
        }

        if self.keys.contains(&key) {
            if matched {
                self.handler.updated(obj).await;
            } else {
                // The object no longer matches the filter; report a deletion.
                self.keys.remove(&key);
                let (ns, name) = key;
                self.handler.deleted(ns, name).await;
            }
        } else if matched {
            self.keys.insert(key);
            self.handler.added(obj).await;
        }
    }
}

fn key_of<T: Resource>(obj: &T) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use tokio_test::{assert_err, assert_ok};

    /// Records handler calls in order.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    #[async_trait::async_trait]
    impl Handler<ConfigMap> for Recorder {
        fn filter(&self, obj: &ConfigMap) -> bool {
            !obj.labels().contains_key("hidden")
        }

        async fn added(&mut self, obj: ConfigMap) {
            self.calls.push(format!("add {}", obj.name_any()));
        }

        async fn updated(&mut self, obj: ConfigMap) {
            self.calls.push(format!("update {}", obj.name_any()));
        }

        async fn deleted(&mut self, _namespace: String, name: String) {
            self.calls.push(format!("delete {}", name));
        }
    }

    fn mk_obj(ns: impl Into<String>, name: impl Into<String>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                namespace: Some(ns.into()),
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn mk_hidden(ns: impl Into<String>, name: impl Into<String>) -> ConfigMap {
        let mut obj = mk_obj(ns, name);
        obj.metadata.labels = Some(
            Some(("hidden".to_string(), "true".to_string()))
                .into_iter()
                .collect(),
        );
        obj
    }

    fn mk_watch(events: Vec<Event<ConfigMap>>) -> Watch<ConfigMap> {
        Watch::infallible(futures::stream::iter(events))
    }

    #[tokio::test]
    async fn discriminates_adds_and_updates() {
        let mut sub = Subscription::new(
            mk_watch(vec![
                Event::Init,
                Event::InitApply(mk_obj("default", "a")),
                Event::InitDone,
                Event::Apply(mk_obj("default", "a")),
                Event::Apply(mk_obj("default", "b")),
                Event::Delete(mk_obj("default", "a")),
            ]),
            Recorder::default(),
        );

        assert_ok!(sub.sync(time::Duration::from_secs(1)).await);
        for _ in 0..3 {
            let ev = sub.watch.recv().await;
            sub.handle(ev).await;
        }

        assert_eq!(
            sub.handler.calls,
            vec!["add a", "update a", "add b", "delete a"],
        );
    }

    #[tokio::test]
    async fn relists_synthesize_deletions() {
        let mut sub = Subscription::new(
            mk_watch(vec![
                Event::Init,
                Event::InitApply(mk_obj("default", "a")),
                Event::InitApply(mk_obj("default", "b")),
                Event::InitDone,
                Event::Init,
                Event::InitApply(mk_obj("default", "b")),
                Event::InitDone,
            ]),
            Recorder::default(),
        );

        assert_ok!(sub.sync(time::Duration::from_secs(1)).await);
        assert_ok!(sub.sync(time::Duration::from_secs(1)).await);

        assert_eq!(
            sub.handler.calls,
            vec!["add a", "add b", "update b", "delete a"],
        );
    }

    #[tokio::test]
    async fn filtered_objects_are_invisible() {
        let mut sub = Subscription::new(
            mk_watch(vec![
                Event::Init,
                Event::InitApply(mk_hidden("default", "a")),
                Event::InitDone,
                Event::Apply(mk_obj("default", "a")),
                Event::Apply(mk_hidden("default", "a")),
                Event::Delete(mk_hidden("default", "a")),
            ]),
            Recorder::default(),
        );

        assert_ok!(sub.sync(time::Duration::from_secs(1)).await);
        for _ in 0..3 {
            let ev = sub.watch.recv().await;
            sub.handle(ev).await;
        }

        assert_eq!(sub.handler.calls, vec!["add a", "delete a"]);
    }

    #[tokio::test]
    async fn sync_times_out_on_stalled_streams() {
        let mut sub = Subscription::new(
            Watch::infallible(futures::stream::pending()),
            Recorder::default(),
        );

        let error = assert_err!(sub.sync(time::Duration::from_millis(10)).await);
        assert!(matches!(error, Error::SyncTimeout(_)));
    }

    #[tokio::test]
    async fn dispatch_stops_on_shutdown() {
        let sub = Subscription::new(
            Watch::infallible(futures::stream::pending::<Event<ConfigMap>>()),
            Recorder::default(),
        );

        let (signal, shutdown) = drain::channel();
        let task = tokio::spawn(sub.dispatch(shutdown));
        signal.drain().await;
        assert_ok!(task.await);
    }
}
