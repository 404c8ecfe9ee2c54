use futures::io::{AsyncRead, AsyncReadExt};
use helmwatch_k8s_api::{self as k8s, Api, LogParams};
use kube::Client;
use std::pin::Pin;
use tokio::time;

/// Which execution of a container to read logs from.
#[derive(Clone, Debug)]
pub enum LogMode {
    /// The previous execution of a restarted or terminated container.
    Previous,

    /// The current execution, starting at the given time.
    CurrentSince(k8s::Time),
}

/// Opens container log streams.
#[async_trait::async_trait]
pub trait LogStreams: Send + Sync + 'static {
    type Stream: AsyncRead + Send + Unpin;

    async fn open(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        mode: &LogMode,
    ) -> anyhow::Result<Self::Stream>;
}

/// Indicates a log fetch that could not complete.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("error opening stream: {0}")]
    Open(anyhow::Error),

    #[error("error copying log stream: {0}")]
    Transfer(std::io::Error),
}

/// Opens log streams through the cluster API.
#[derive(Clone)]
pub struct PodLogs {
    client: Client,
}

/// Reads the full log output of one container into memory.
///
/// The copy is bounded by `limit` so that a hung stream cannot stall the
/// caller. The stream is released when this call returns, on every path.
pub async fn fetch<L: LogStreams>(
    logs: &L,
    namespace: &str,
    pod: &str,
    container: &str,
    mode: &LogMode,
    limit: time::Duration,
) -> Result<String, LogError> {
    let mut stream = logs
        .open(namespace, pod, container, mode)
        .await
        .map_err(LogError::Open)?;

    let mut buf = Vec::new();
    time::timeout(limit, stream.read_to_end(&mut buf))
        .await
        .map_err(|_| LogError::Transfer(std::io::ErrorKind::TimedOut.into()))?
        .map_err(LogError::Transfer)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// === impl LogMode ===

impl LogMode {
    fn params(&self, container: &str) -> LogParams {
        let mut params = LogParams {
            container: Some(container.to_string()),
            ..LogParams::default()
        };
        match self {
            Self::Previous => params.previous = true,
            Self::CurrentSince(time) => params.since_time = Some(time.0),
        }
        params
    }
}

// === impl LogError ===

impl LogError {
    /// The fixed text reported in place of logs that could not be fetched.
    pub fn sentinel(&self) -> &'static str {
        match self {
            Self::Open(_) => "error opening stream",
            Self::Transfer(_) => "error copying log stream",
        }
    }
}

// === impl PodLogs ===

impl PodLogs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl LogStreams for PodLogs {
    type Stream = Pin<Box<dyn AsyncRead + Send>>;

    async fn open(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        mode: &LogMode,
    ) -> anyhow::Result<Self::Stream> {
        let api = Api::<k8s::Pod>::namespaced(self.client.clone(), namespace);
        let stream = api.log_stream(pod, &mode.params(container)).await?;
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        task::{Context, Poll},
    };

    /// Counts drops so that tests can assert the stream is released.
    struct CountedStream {
        inner: Cursor<Vec<u8>>,
        fail_reads: bool,
        hang_reads: bool,
        released: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.hang_reads {
                return Poll::Pending;
            }
            if self.fail_reads {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                )));
            }
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl Drop for CountedStream {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockLogs {
        body: &'static str,
        fail_open: bool,
        fail_reads: bool,
        hang_reads: bool,
        released: Arc<AtomicUsize>,
    }

    impl MockLogs {
        fn new(body: &'static str) -> Self {
            Self {
                body,
                fail_open: false,
                fail_reads: false,
                hang_reads: false,
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl LogStreams for MockLogs {
        type Stream = CountedStream;

        async fn open(
            &self,
            _namespace: &str,
            _pod: &str,
            _container: &str,
            _mode: &LogMode,
        ) -> anyhow::Result<Self::Stream> {
            if self.fail_open {
                anyhow::bail!("container has no previous execution");
            }
            Ok(CountedStream {
                inner: Cursor::new(self.body.as_bytes().to_vec()),
                fail_reads: self.fail_reads,
                hang_reads: self.hang_reads,
                released: self.released.clone(),
            })
        }
    }

    #[tokio::test]
    async fn fetch_reads_the_full_stream() {
        let logs = MockLogs::new("panic: oh no\n");
        let text = fetch(
            &logs,
            "default",
            "web-1",
            "app",
            &LogMode::Previous,
            time::Duration::from_secs(1),
        )
        .await
        .expect("fetch must succeed");
        assert_eq!(text, "panic: oh no\n");
        assert_eq!(logs.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_failures_carry_their_sentinel() {
        let logs = MockLogs {
            fail_open: true,
            ..MockLogs::new("")
        };
        let error = fetch(
            &logs,
            "default",
            "web-1",
            "app",
            &LogMode::Previous,
            time::Duration::from_secs(1),
        )
        .await
        .expect_err("fetch must fail");
        assert_eq!(error.sentinel(), "error opening stream");
        assert_eq!(logs.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transfer_failures_release_the_stream() {
        let logs = MockLogs {
            fail_reads: true,
            ..MockLogs::new("partial")
        };
        let error = fetch(
            &logs,
            "default",
            "web-1",
            "app",
            &LogMode::Previous,
            time::Duration::from_secs(1),
        )
        .await
        .expect_err("fetch must fail");
        assert_eq!(error.sentinel(), "error copying log stream");
        assert_eq!(logs.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_streams_time_out() {
        let logs = MockLogs {
            hang_reads: true,
            ..MockLogs::new("never delivered")
        };
        let error = fetch(
            &logs,
            "default",
            "web-1",
            "app",
            &LogMode::Previous,
            time::Duration::from_millis(10),
        )
        .await
        .expect_err("fetch must time out");
        assert!(matches!(error, LogError::Transfer(_)));
        assert_eq!(error.sentinel(), "error copying log stream");
        assert_eq!(logs.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn params_select_the_execution() {
        let params = LogMode::Previous.params("app");
        assert_eq!(params.container.as_deref(), Some("app"));
        assert!(params.previous);
        assert!(params.since_time.is_none());

        let now = k8s::Time(k8s_openapi::chrono::Utc::now());
        let params = LogMode::CurrentSince(now.clone()).params("app");
        assert_eq!(params.container.as_deref(), Some("app"));
        assert!(!params.previous);
        assert_eq!(params.since_time, Some(now.0));
    }
}
