//! Warms the credential cache ahead of requests.
//!
//! Workers consume two streams: workloads announced by the pod index, for which credentials are
//! fetched as soon as the pod declares a role, and expiry notifications from the cache, for which
//! credentials are renewed if any running pod still uses the role.

use crate::{
    cache::{Cache, Expiring},
    metrics::{Op, PrefetchMetrics},
};
use iam_broker_core::{ArnResolver, RoleActivity, RoleIdentity, SharedRx, Workload};
use std::{future::Future, sync::Arc};
use tokio::task::JoinSet;
use tracing::{info_span, Instrument};

#[derive(Clone, Debug)]
pub struct Manager<A> {
    resolver: Arc<ArnResolver>,
    cache: Cache,
    roles: A,
    announcements: SharedRx<Workload>,
    expiring: SharedRx<Expiring>,
    metrics: PrefetchMetrics,
}

// === impl Manager ===

impl<A> Manager<A>
where
    A: RoleActivity + Clone + Send + Sync + 'static,
{
    pub fn new(
        resolver: Arc<ArnResolver>,
        cache: Cache,
        roles: A,
        announcements: SharedRx<Workload>,
        expiring: SharedRx<Expiring>,
        metrics: PrefetchMetrics,
    ) -> Self {
        Self {
            resolver,
            cache,
            roles,
            announcements,
            expiring,
            metrics,
        }
    }

    /// Runs `workers` workers until both streams close or `shutdown` completes.
    pub async fn run(self, workers: usize, shutdown: impl Future<Output = ()>) {
        let mut tasks = JoinSet::new();
        for worker in 0..workers.max(1) {
            tasks.spawn(
                self.clone()
                    .process()
                    .instrument(info_span!("prefetch", worker)),
            );
        }

        tokio::select! {
            _ = shutdown => tracing::debug!("Shutdown"),
            _ = async { while tasks.join_next().await.is_some() {} } => {
                tracing::debug!("Prefetch streams closed");
            }
        }
        // Dropping the set aborts workers that are still running.
    }

    async fn process(self) {
        let mut announcements_open = true;
        let mut expiring_open = true;
        while announcements_open || expiring_open {
            tokio::select! {
                workload = self.announcements.recv(), if announcements_open => match workload {
                    Some(workload) => self.warm(workload).await,
                    None => announcements_open = false,
                },
                expiring = self.expiring.recv(), if expiring_open => match expiring {
                    Some(expiring) => self.renew(expiring).await,
                    None => expiring_open = false,
                },
            }
        }
    }

    async fn warm(&self, workload: Workload) {
        if workload.is_completed() {
            tracing::trace!(pod = %workload.id, "Skipping completed pod");
            return;
        }
        let identity = match RoleIdentity::for_workload(&self.resolver, &workload) {
            Ok(identity) => identity,
            Err(error) => {
                tracing::debug!(pod = %workload.id, %error, "Skipping pod");
                return;
            }
        };

        self.metrics.fetch(Op::Warmup);
        match self.cache.credentials_for_role(&identity).await {
            Ok(credentials) => tracing::debug!(
                pod = %workload.id,
                role = %identity,
                expiration = %credentials.expiration,
                "Prefetched credentials"
            ),
            Err(error) => {
                self.metrics.error(Op::Warmup);
                tracing::warn!(pod = %workload.id, %error, "Failed to prefetch credentials");
            }
        }
    }

    async fn renew(&self, Expiring { identity, .. }: Expiring) {
        if !self.roles.is_role_active(&identity.role) {
            self.metrics.renewals_skipped.inc();
            tracing::debug!(role = %identity, "No running pods use the role; not renewing");
            return;
        }

        self.metrics.fetch(Op::Renewal);
        match self.cache.credentials_for_role(&identity).await {
            Ok(credentials) => tracing::debug!(
                role = %identity,
                expiration = %credentials.expiration,
                "Renewed credentials"
            ),
            Err(error) => {
                self.metrics.error(Op::Renewal);
                tracing::warn!(%error, "Failed to renew credentials");
            }
        }
    }
}
