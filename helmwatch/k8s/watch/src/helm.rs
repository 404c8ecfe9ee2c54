use crate::manifest::ManifestSource;
use anyhow::{anyhow, Context};
use helmwatch_k8s_api::{self as k8s, store, ReleaseObject};
use std::marker::PhantomData;

/// Reads release manifests from Helm's in-cluster storage.
///
/// Helm keeps one storage object per release revision; the newest revision's
/// payload holds the rendered manifest.
pub struct HelmClient<T> {
    client: kube::Client,
    _kind: PhantomData<fn() -> T>,
}

// === impl HelmClient ===

impl<T> HelmClient<T> {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<T> Clone for HelmClient<T> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

#[async_trait::async_trait]
impl<T: ReleaseObject> ManifestSource for HelmClient<T> {
    async fn manifest(&self, release: &str) -> anyhow::Result<String> {
        let params = k8s::ListParams::default().labels(&format!("owner=helm,name={}", release));
        let stored = k8s::Api::<T>::all(self.client.clone())
            .list(&params)
            .await
            .with_context(|| format!("failed to list release storage for {:?}", release))?;

        let newest = stored
            .items
            .into_iter()
            .filter_map(|obj| obj.release().map(|record| (record.version, obj)))
            .max_by_key(|(version, _)| *version)
            .ok_or_else(|| anyhow!("release {:?} not found", release))?
            .1;

        let payload = newest
            .payload()
            .ok_or_else(|| anyhow!("release {:?} has no stored payload", release))?;
        let payload = store::decode_payload(payload)
            .with_context(|| format!("failed to decode release payload for {:?}", release))?;

        Ok(payload.manifest)
    }
}
