#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod pod;
mod release;
mod store;

pub use self::{
    pod::{ContainerState, PodRecord},
    release::{ReleaseRecord, ReleaseStatus, ReleaseTracker},
    store::{InvalidStoreKind, StoreKind},
};
