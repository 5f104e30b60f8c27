//! Runs the IAM credential broker: watches pods and namespaces, keeps credentials warm, and exposes
//! a [`Broker`] that authorizes and serves credential requests from pods.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use iam_broker_core as core;
pub use iam_broker_credentials as credentials;
pub use iam_broker_k8s_api as k8s;
pub use iam_broker_k8s_index as index;

mod args;
mod broker;
pub mod duration;
mod resync;
pub mod sts;


pub use self::{
    args::Args,
    broker::{Broker, BrokerError},
};
