//! Credential lifecycle for the IAM credential broker.
//!
//! The [`Cache`] issues at most one request per [`RoleIdentity`](iam_broker_core::RoleIdentity)
//! at a time and holds issued credentials for less time than they remain valid. As entries expire,
//! the cache publishes [`Expiring`] notifications that the prefetch [`Manager`] uses to renew
//! credentials for roles that are still in use, so that requests rarely wait on the gateway.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod metrics;
mod prefetch;


pub use self::{
    cache::{Cache, Config, Error, Expiring},
    metrics::{CacheMetrics, PrefetchMetrics},
    prefetch::Manager,
};
