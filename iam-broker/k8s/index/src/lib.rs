//! Kubernetes-backed indexes for the IAM credential broker.
//!
//! The broker watches the following cluster resources:
//!
//! - Each `Pod` may declare a role with the `iam.amazonaws.com/role` annotation. Pods are indexed
//!   by IP and by role so that credential requests, which are identified only by the caller's
//!   address, can be matched to the pod that made them.
//! - Each `Namespace` may restrict the roles its pods can assume with the
//!   `iam.amazonaws.com/permitted` annotation.
//!
//! Each index is owned and updated by a single task that processes watch events via
//! `kubert::index`, while lookups take a read lock on the shared index.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
pub mod namespace;
pub mod policy;
pub mod workload;


pub use self::{
    namespace::{Namespace, PermittedRoles},
    policy::{NamespacePermittedRoleName, RequestingAnnotatedRole},
    workload::{Announcements, LookupError},
};
