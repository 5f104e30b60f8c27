use crate::k8s::{watcher, Api, Resource};
use futures::prelude::*;
use kube::runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use std::{fmt::Debug, time::Duration};

/// Watches all resources of a kind, restarting the watch every `interval`.
///
/// Each restart begins with a full list of the resources, which the index applies as a reset. This
/// repairs the index if an event was ever missed. Watch errors are logged and retried with backoff.
pub fn watch<T>(
    api: Api<T>,
    config: watcher::Config,
    interval: Duration,
) -> impl Stream<Item = watcher::Event<T>> + Send + 'static
where
    T: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    stream::repeat_with(move || {
        watcher::watcher(api.clone(), config.clone())
            .default_backoff()
            .take_until(tokio::time::sleep(interval))
    })
    .flatten()
    .filter_map(|event| async move {
        match event {
            Ok(event) => Some(event),
            Err(error) => {
                tracing::info!(%error, "Watch failed");
                None
            }
        }
    })
}
