use helmwatch_k8s_api::{self as k8s, labels::Selector};
use tracing::debug;

/// A typed workload decoded from a release manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Workload {
    /// Carries the pod selector the deployment declares.
    Deployment { name: String, selector: Selector },

    Service { name: String },

    /// Any other well-formed document. Ignored by the cascade.
    Other { kind: String, name: String },
}

/// Provides the rendered manifest of a named release.
#[async_trait::async_trait]
pub trait ManifestSource: Send + Sync + 'static {
    async fn manifest(&self, release: &str) -> anyhow::Result<String>;
}

/// Indicates that a release's manifest could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("release lookup failed: {0}")]
    Lookup(anyhow::Error),
}

/// The minimal typing probe applied to each document.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DocMeta {
    api_version: String,
    kind: String,
    metadata: DocName,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DocName {
    name: String,
}

/// Fetches and decodes the named release's workloads.
///
/// A lookup failure fails the whole call. Individual documents that cannot be
/// decoded are skipped without aborting the remaining documents.
pub async fn resolve<S: ManifestSource>(
    source: &S,
    release: &str,
) -> Result<Vec<Workload>, ResolveError> {
    let manifest = source
        .manifest(release)
        .await
        .map_err(ResolveError::Lookup)?;
    Ok(decode(&manifest))
}

/// Decodes every workload document in a multi-document manifest.
pub fn decode(manifest: &str) -> Vec<Workload> {
    documents(manifest)
        .iter()
        .filter(|doc| !doc.trim().is_empty())
        .filter_map(|doc| decode_document(doc))
        .collect()
}

/// Splits manifest text at YAML document separator lines.
fn documents(manifest: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut doc = String::new();
    for line in manifest.lines() {
        if line.trim() == "---" {
            docs.push(std::mem::take(&mut doc));
        } else {
            doc.push_str(line);
            doc.push('\n');
        }
    }
    docs.push(doc);
    docs
}

fn decode_document(doc: &str) -> Option<Workload> {
    let meta: DocMeta = match serde_yaml::from_str(doc) {
        Ok(meta) => meta,
        Err(error) => {
            debug!(%error, "Skipping undecodable document");
            return None;
        }
    };

    if meta.kind.is_empty() {
        debug!("Skipping document without a kind");
        return None;
    }

    match (meta.api_version.as_str(), meta.kind.as_str()) {
        ("apps/v1", "Deployment") => {
            let deploy: k8s::Deployment = match serde_yaml::from_str(doc) {
                Ok(deploy) => deploy,
                Err(error) => {
                    debug!(%error, name = %meta.metadata.name, "Skipping malformed deployment");
                    return None;
                }
            };
            let spec = match deploy.spec {
                Some(spec) => spec,
                None => {
                    debug!(name = %meta.metadata.name, "Skipping deployment without a spec");
                    return None;
                }
            };
            let selector = match Selector::try_from(&spec.selector) {
                Ok(selector) => selector,
                Err(error) => {
                    debug!(%error, name = %meta.metadata.name, "Skipping deployment with an unsupported selector");
                    return None;
                }
            };
            Some(Workload::Deployment {
                name: meta.metadata.name,
                selector,
            })
        }

        ("v1", "Service") => {
            if let Err(error) = serde_yaml::from_str::<k8s::Service>(doc) {
                debug!(%error, name = %meta.metadata.name, "Skipping malformed service");
                return None;
            }
            Some(Workload::Service {
                name: meta.metadata.name,
            })
        }

        _ => Some(Workload::Other {
            kind: meta.kind,
            name: meta.metadata.name,
        }),
    }
}
