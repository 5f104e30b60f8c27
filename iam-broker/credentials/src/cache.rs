//! An expiring, single-flight credential cache.
//!
//! Each [`RoleIdentity`] has at most one entry. An entry is either pending, while a spawned task
//! requests credentials from the gateway, or issued. Concurrent callers for the same identity all
//! wait on the pending entry's watch channel, so only one request is ever in flight per identity.
//! The fetch task runs to completion even when every caller has given up waiting.
//!
//! Issued credentials are held for `session_duration - session_refresh`. When an entry expires it
//! is evicted and an [`Expiring`] notification is published on a small, lossy channel.

use crate::metrics::CacheMetrics;
use ahash::AHashMap as HashMap;
use iam_broker_core::{CredentialGateway, Credentials, IssueRequest, RoleIdentity, SharedRx};
use parking_lot::Mutex;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{info_span, Instrument};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The session name used when an identity does not specify one.
    pub default_session_name: String,

    /// How long issued credentials remain valid.
    pub session_duration: Duration,

    /// How long before credentials become invalid they are evicted and renewed.
    ///
    /// Must be less than `session_duration`, or credentials would never be served from the cache.
    pub session_refresh: Duration,

    /// The number of expiry notifications that may be buffered before new ones are dropped.
    pub expiring_capacity: usize,
}

#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

/// Published when issued credentials are evicted because their time in the cache elapsed.
#[derive(Clone, Debug)]
pub struct Expiring {
    pub identity: RoleIdentity,
    pub credentials: Credentials,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to issue credentials for {role}: {error:#}")]
    Issuance {
        role: String,
        error: Arc<anyhow::Error>,
    },

    #[error("credential request for {role} was abandoned")]
    Aborted { role: String },
}

struct Inner {
    config: Config,
    gateway: Arc<dyn CredentialGateway>,
    entries: Mutex<Entries>,
    expiring: mpsc::Sender<Expiring>,
    metrics: CacheMetrics,
}

#[derive(Default)]
struct Entries {
    by_identity: HashMap<RoleIdentity, Entry>,
    next_generation: u64,
}

/// `None` until the fetch completes.
type Fetched = Option<Result<Credentials, Error>>;

struct Entry {
    /// Distinguishes this entry from any that replace it while its fetch is in flight.
    generation: u64,
    rx: watch::Receiver<Fetched>,
    issued: Option<Issued>,
}

struct Issued {
    credentials: Credentials,
    expires_at: Instant,
}

// === impl Config ===

impl Config {
    /// How long issued credentials are served from the cache.
    pub fn ttl(&self) -> Duration {
        self.session_duration.saturating_sub(self.session_refresh)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_session_name: "iam-broker".to_string(),
            session_duration: Duration::from_secs(15 * 60),
            session_refresh: Duration::from_secs(5 * 60),
            expiring_capacity: 1,
        }
    }
}

// === impl Cache ===

impl Cache {
    /// Creates a cache and the stream of expiry notifications it publishes.
    pub fn new(
        config: Config,
        gateway: Arc<dyn CredentialGateway>,
        metrics: CacheMetrics,
    ) -> (Self, SharedRx<Expiring>) {
        debug_assert!(
            !config.ttl().is_zero(),
            "session refresh ({:?}) must be less than session duration ({:?})",
            config.session_refresh,
            config.session_duration,
        );
        let (tx, rx) = mpsc::channel(config.expiring_capacity.max(1));
        let inner = Inner {
            config,
            gateway,
            entries: Mutex::new(Entries::default()),
            expiring: tx,
            metrics,
        };
        let cache = Self {
            inner: Arc::new(inner),
        };
        (cache, SharedRx::new(rx))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns credentials for the identity, issuing them if no live entry exists.
    ///
    /// Callers that arrive while a request for the same identity is in flight wait for its
    /// result. Failures are delivered to every waiting caller and are not cached.
    pub async fn credentials_for_role(&self, identity: &RoleIdentity) -> Result<Credentials, Error> {
        let mut rx = self.subscribe(identity);
        let fetched = match rx.wait_for(Option::is_some).await {
            Ok(fetched) => (*fetched).clone(),
            Err(_) => None,
        };
        fetched.unwrap_or_else(|| {
            Err(Error::Aborted {
                role: identity.role.to_string(),
            })
        })
    }

    /// Returns cached credentials for the identity without issuing any.
    pub fn cached(&self, identity: &RoleIdentity) -> Option<Credentials> {
        let now = Instant::now();
        let entries = self.inner.entries.lock();
        let issued = entries.by_identity.get(identity)?.issued.as_ref()?;
        (issued.expires_at > now).then(|| issued.credentials.clone())
    }

    /// Removes the identity's entry without publishing an expiry notification.
    ///
    /// A fetch in flight for the identity still completes and is delivered to its waiters, but its
    /// result is not cached.
    pub fn invalidate(&self, identity: &RoleIdentity) -> bool {
        let mut entries = self.inner.entries.lock();
        let removed = entries.by_identity.remove(identity).is_some();
        self.inner.metrics.size.set(entries.by_identity.len() as i64);
        if removed {
            tracing::debug!(role = %identity, "Invalidated credentials");
        }
        removed
    }

    /// The number of pending and issued entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts all expired entries, publishing a notification for each.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let expired = entries
            .by_identity
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(identity, _)| identity.clone())
            .collect::<Vec<_>>();

        let count = expired.len();
        for identity in expired {
            if let Some(entry) = entries.by_identity.remove(&identity) {
                self.inner.evicted(identity, entry);
            }
        }
        self.inner.metrics.size.set(entries.by_identity.len() as i64);
        count
    }

    /// Evicts expired entries every `period` until `shutdown` completes.
    pub async fn sweep(self, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted expired credentials");
                    }
                }
                _ = &mut shutdown => {
                    tracing::debug!("Shutdown");
                    return;
                }
            }
        }
    }

    /// Returns a receiver for the identity's entry, starting a fetch if there is no live entry.
    fn subscribe(&self, identity: &RoleIdentity) -> watch::Receiver<Fetched> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        if let Some(entry) = entries.by_identity.get(identity) {
            if entry.is_live(now) {
                self.inner.metrics.hits.inc();
                return entry.rx.clone();
            }
        }
        if let Some(stale) = entries.by_identity.remove(identity) {
            self.inner.evicted(identity.clone(), stale);
        }

        self.inner.metrics.misses.inc();
        let generation = entries.next_generation;
        entries.next_generation += 1;
        let (tx, rx) = watch::channel(None);
        entries.by_identity.insert(
            identity.clone(),
            Entry {
                generation,
                rx: rx.clone(),
                issued: None,
            },
        );
        self.inner.metrics.size.set(entries.by_identity.len() as i64);
        drop(entries);

        tokio::spawn(
            self.inner
                .clone()
                .fetch(identity.clone(), generation, tx)
                .instrument(info_span!("fetch", role = %identity)),
        );
        rx
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.inner.config)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

// === impl Inner ===

impl Inner {
    async fn fetch(
        self: Arc<Self>,
        identity: RoleIdentity,
        generation: u64,
        tx: watch::Sender<Fetched>,
    ) {
        let request = IssueRequest {
            role_arn: identity.role.arn().to_string(),
            session_name: identity
                .session_name
                .clone()
                .unwrap_or_else(|| self.config.default_session_name.clone()),
            external_id: identity.external_id.clone(),
            session_tags: identity.session_tags.clone(),
            duration: self.config.session_duration,
        };
        let result = self
            .gateway
            .issue(request)
            .await
            .map_err(|error| Error::Issuance {
                role: identity.role.to_string(),
                error: Arc::new(error),
            });

        let mut entries = self.entries.lock();
        let current = entries
            .by_identity
            .get_mut(&identity)
            .filter(|entry| entry.generation == generation);
        match (&result, current) {
            (Ok(credentials), Some(entry)) => {
                tracing::debug!(expiration = %credentials.expiration, "Issued credentials");
                entry.issued = Some(Issued {
                    credentials: credentials.clone(),
                    expires_at: Instant::now() + self.config.ttl(),
                });
            }
            (Ok(_), None) => {
                tracing::debug!("Entry was invalidated; not caching credentials");
            }
            (Err(error), current) => {
                self.metrics.issue_errors.inc();
                tracing::info!(%error, "Failed to issue credentials");
                if current.is_some() {
                    entries.by_identity.remove(&identity);
                }
            }
        }
        self.metrics.size.set(entries.by_identity.len() as i64);

        // Published while the lock is held so that no caller observes an issued entry before its
        // waiters have been notified.
        tx.send_replace(Some(result));
    }

    /// Handles an entry that was removed because it is no longer live.
    fn evicted(&self, identity: RoleIdentity, entry: Entry) {
        let Some(Issued { credentials, .. }) = entry.issued else {
            tracing::debug!(role = %identity, "Discarding abandoned fetch");
            return;
        };

        self.metrics.expired.inc();
        tracing::debug!(role = %identity, "Credentials expired");
        match self.expiring.try_send(Expiring {
            identity,
            credentials,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.expiring_dropped.inc();
                tracing::debug!("Expiry buffer full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("No expiry consumer");
            }
        }
    }
}

// === impl Entry ===

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        match &self.issued {
            Some(issued) => issued.expires_at > now,
            // A pending entry is live for as long as its fetch task is.
            None => self.rx.has_changed().is_ok(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.issued
            .as_ref()
            .is_some_and(|issued| issued.expires_at <= now)
    }
}
