#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;

pub use k8s_openapi::api::{
    self,
    core::v1::{Namespace, Pod, PodSpec, PodStatus},
};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    runtime::watcher,
    Client, Resource,
};
