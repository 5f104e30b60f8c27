//! Core types shared by the IAM credential broker.
//!
//! Workloads declare the role they want to assume with an annotation. The broker resolves that
//! reference into a fully-qualified role ([`arn::ResolvedRole`]), checks that the workload is
//! permitted to assume it ([`policy`]) and hands out short-lived [`credentials::Credentials`]
//! issued by a [`credentials::CredentialGateway`].

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod arn;
mod channel;
pub mod credentials;
pub mod identity;
pub mod policy;
pub mod workload;

pub use self::{
    arn::{ArnResolver, EmptyReferenceError, ResolvedRole},
    channel::SharedRx,
    credentials::{CredentialGateway, Credentials, IssueRequest},
    identity::{RoleIdentity, SessionTags},
    policy::{AssumeRolePolicy, Decision, Policies},
    workload::{Phase, RoleActivity, Workload, WorkloadRef},
};
