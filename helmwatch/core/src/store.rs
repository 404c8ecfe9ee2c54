use thiserror::Error;

/// The Helm storage backend that holds release records.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Secret,
    Configmap,
}

/// Indicates that an unsupported release storage driver was configured.
#[derive(Clone, Debug, Error)]
#[error("helm driver not supported: {0:?}")]
pub struct InvalidStoreKind(String);

// === impl StoreKind ===

impl std::str::FromStr for StoreKind {
    type Err = InvalidStoreKind;

    fn from_str(driver: &str) -> Result<Self, Self::Err> {
        match driver {
            // An unset HELM_DRIVER selects the default backend.
            "" | "secret" => Ok(Self::Secret),
            "configmap" => Ok(Self::Configmap),
            driver => Err(InvalidStoreKind(driver.to_string())),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret => "secret".fmt(f),
            Self::Configmap => "configmap".fmt(f),
        }
    }
}
