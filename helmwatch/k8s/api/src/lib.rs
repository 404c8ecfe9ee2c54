#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod store;

pub use self::{
    labels::{Labels, Selector},
    store::ReleaseObject,
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::Deployment,
        core::v1::{ConfigMap, Pod, Secret, Service},
    },
    apimachinery::pkg::apis::meta::v1::Time,
};
pub use kube::api::{Api, ListParams, LogParams, ObjectMeta, ResourceExt};
