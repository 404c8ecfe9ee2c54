//! A cascading watch pipeline over Helm releases.
//!
//! The release watch observes Helm's storage backend for releases entering an
//! upgrade. Each detected upgrade is resolved to the workloads its manifest
//! declares, and every deployment fans out into a pod watch scoped by that
//! deployment's selector. Pod watches report the logs of containers that
//! terminate while the upgrade is underway.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod helm;
pub mod logs;
pub mod manifest;
pub mod pod;
pub mod release;
pub mod subscription;


pub use self::{
    helm::HelmClient,
    manifest::{ManifestSource, Workload},
    pod::PodWatcher,
    release::{PodWatches, ReleaseWatcher, Spawn},
    subscription::{Handler, Subscription, Watch},
};
