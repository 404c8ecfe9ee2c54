use anyhow::{bail, Result};
use clap::Parser;
use helmwatch_core::StoreKind;
use helmwatch_k8s_api as k8s;
use helmwatch_k8s_watch::{HelmClient, PodWatches, ReleaseWatcher, Subscription, Watch};
use kube::runtime::watcher;
use tokio::time;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "helmwatch", about = "Watches Helm releases and the workloads they roll out")]
pub struct Args {
    #[clap(
        long,
        env = "HELMWATCH_LOG",
        default_value = "helmwatch=info,warn"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The Helm storage backend that holds release records.
    #[clap(long, env = "HELM_DRIVER", default_value_t)]
    driver: StoreKind,

    /// Bound on the initial release list, in seconds.
    #[clap(long, default_value = "60")]
    sync_timeout_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            driver,
            sync_timeout_secs,
        } = self;

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .build()
            .await?;

        let sync_timeout = time::Duration::from_secs(sync_timeout_secs);
        let watches = PodWatches::new(runtime.client(), runtime.shutdown_handle(), sync_timeout);

        info!(%driver, "Watching for Helm releases");

        match driver {
            StoreKind::Secret => {
                let events = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
                let source = HelmClient::<k8s::Secret>::new(runtime.client());
                let mut releases =
                    Subscription::new(Watch::infallible(events), ReleaseWatcher::new(source, watches));
                releases.sync(sync_timeout).await?;
                tokio::spawn(
                    releases
                        .dispatch(runtime.shutdown_handle())
                        .instrument(info_span!("releases")),
                );
            }
            StoreKind::Configmap => {
                let events = runtime.watch_all::<k8s::ConfigMap>(watcher::Config::default());
                let source = HelmClient::<k8s::ConfigMap>::new(runtime.client());
                let mut releases =
                    Subscription::new(Watch::infallible(events), ReleaseWatcher::new(source, watches));
                releases.sync(sync_timeout).await?;
                tokio::spawn(
                    releases
                        .dispatch(runtime.shutdown_handle())
                        .instrument(info_span!("releases")),
                );
            }
        }

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
