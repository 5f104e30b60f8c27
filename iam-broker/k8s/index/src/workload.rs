//! Indexes pods by address and by declared role.
//!
//! Index values are multi-valued: while pods churn, a terminated pod and its replacement may
//! briefly share an address. Completed pods are kept in the index until they are deleted and are
//! filtered out at query time.

use crate::metrics::WorkloadIndexMetrics;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use iam_broker_core::{
    ArnResolver, Phase, ResolvedRole, RoleActivity, SharedRx, Workload, WorkloadRef,
};
use iam_broker_k8s_api::{self as k8s, annotations, ResourceExt};
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use std::{hash::Hash, net::IpAddr, sync::Arc};
use tokio::sync::mpsc;
use tracing::info_span;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Workloads that declare a role, published as they are added or updated.
pub type Announcements = SharedRx<Workload>;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no running workload has address {0}")]
    NotFound(IpAddr),

    #[error("{} running workloads have address {addr}", .workloads.len())]
    Ambiguous {
        addr: IpAddr,
        workloads: Vec<WorkloadRef>,
    },
}

#[derive(Debug)]
pub struct Index {
    resolver: Arc<ArnResolver>,

    workloads: HashMap<WorkloadRef, Workload>,
    by_ip: HashMap<IpAddr, HashSet<WorkloadRef>>,
    by_role: HashMap<ResolvedRole, HashSet<WorkloadRef>>,

    announcements: mpsc::Sender<Workload>,
    metrics: WorkloadIndexMetrics,
}

// === impl Index ===

impl Index {
    /// Creates a shared index and the stream of workload announcements it publishes.
    ///
    /// Announcements are dropped when `capacity` announcements are already buffered.
    pub fn shared(
        resolver: Arc<ArnResolver>,
        capacity: usize,
        metrics: WorkloadIndexMetrics,
    ) -> (SharedIndex, Announcements) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let index = Self {
            resolver,
            workloads: HashMap::default(),
            by_ip: HashMap::default(),
            by_role: HashMap::default(),
            announcements: tx,
            metrics,
        };
        (Arc::new(RwLock::new(index)), SharedRx::new(rx))
    }

    /// Finds the single running workload with the given address.
    pub fn get_by_address(&self, addr: IpAddr) -> Result<Workload, LookupError> {
        let mut live = self
            .by_ip
            .get(&addr)
            .into_iter()
            .flatten()
            .filter_map(|id| self.workloads.get(id))
            .filter(|w| !w.is_completed());

        let workload = live.next().ok_or(LookupError::NotFound(addr))?;
        if live.next().is_some() {
            let mut workloads = self
                .by_ip
                .get(&addr)
                .into_iter()
                .flatten()
                .filter(|id| self.workloads.get(*id).is_some_and(|w| !w.is_completed()))
                .cloned()
                .collect::<Vec<_>>();
            workloads.sort();
            return Err(LookupError::Ambiguous { addr, workloads });
        }

        Ok(workload.clone())
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    pub(crate) fn namespace_sizes(&self) -> HashMap<&str, usize> {
        let mut sizes = HashMap::<&str, usize>::default();
        for id in self.workloads.keys() {
            *sizes.entry(id.namespace.as_str()).or_default() += 1;
        }
        sizes
    }

    /// Adds or updates a workload and announces it.
    ///
    /// Unchanged workloads are announced again so that a resync repairs warm-ups that were dropped
    /// when the announcement buffer was full.
    pub(crate) fn apply_workload(&mut self, workload: Workload) {
        match self.workloads.get(&workload.id) {
            Some(prior) if *prior == workload => {
                tracing::trace!("No changes");
                self.announce(&workload);
                return;
            }
            Some(prior) => {
                let prior = prior.clone();
                self.unindex(&prior);
            }
            None => {}
        }

        tracing::debug!(
            ip = ?workload.ip,
            phase = ?workload.phase,
            role = ?workload.role,
            "Indexing workload"
        );
        self.index(&workload);
        self.announce(&workload);
        self.workloads.insert(workload.id.clone(), workload);
    }

    /// Removes a workload, clearing its index entries before the workload itself.
    pub(crate) fn delete_workload(&mut self, id: &WorkloadRef) {
        let Some(workload) = self.workloads.get(id).cloned() else {
            tracing::debug!("Workload already deleted");
            return;
        };
        self.unindex(&workload);
        self.workloads.remove(id);
        tracing::debug!("Deleted workload");
    }

    fn role_key(&self, workload: &Workload) -> Option<ResolvedRole> {
        let role = workload.role.as_deref()?;
        match self.resolver.resolve(role) {
            Ok(role) => Some(role),
            Err(error) => {
                tracing::debug!(%error, %role, "Ignoring unresolvable role");
                None
            }
        }
    }

    fn index(&mut self, workload: &Workload) {
        if let Some(ip) = workload.ip {
            self.by_ip
                .entry(ip)
                .or_default()
                .insert(workload.id.clone());
        }
        if let Some(role) = self.role_key(workload) {
            self.by_role
                .entry(role)
                .or_default()
                .insert(workload.id.clone());
        }
    }

    fn unindex(&mut self, workload: &Workload) {
        if let Some(ip) = workload.ip {
            remove_value(&mut self.by_ip, &ip, &workload.id);
        }
        if let Some(role) = self.role_key(workload) {
            remove_value(&mut self.by_role, &role, &workload.id);
        }
    }

    fn announce(&self, workload: &Workload) {
        if workload.is_completed() || workload.role.is_none() {
            return;
        }
        match self.announcements.try_send(workload.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.announcements_dropped.inc();
                tracing::debug!("Announcement buffer full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("No announcement consumer");
            }
        }
    }
}

fn remove_value<K: Hash + Eq>(
    index: &mut HashMap<K, HashSet<WorkloadRef>>,
    key: &K,
    id: &WorkloadRef,
) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl RoleActivity for Index {
    fn is_role_active(&self, role: &ResolvedRole) -> bool {
        self.by_role.get(role).is_some_and(|ids| {
            ids.iter()
                .any(|id| self.workloads.get(id).is_some_and(|w| !w.is_completed()))
        })
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Pod> for Index {
    fn apply(&mut self, pod: k8s::Pod) {
        self.metrics.applies.inc();
        let workload = workload_from_pod(pod);
        let _span = info_span!("apply", ns = %workload.id.namespace, name = %workload.id.name)
            .entered();
        self.apply_workload(workload);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.metrics.deletes.inc();
        let _span = info_span!("delete", ns = %namespace, %name).entered();
        self.delete_workload(&WorkloadRef { namespace, name });
    }

    fn reset(&mut self, pods: Vec<k8s::Pod>, removed: NamespacedRemoved) {
        self.metrics.resets.inc();
        let _span = info_span!("reset", pods = pods.len()).entered();

        // Removals are processed first so that an address reused by a new pod is not reported as
        // ambiguous with the pod it replaced.
        for (namespace, names) in removed.into_iter() {
            for name in names.into_iter() {
                self.delete_workload(&WorkloadRef::new(&namespace, name));
            }
        }
        for pod in pods.into_iter() {
            self.apply_workload(workload_from_pod(pod));
        }
    }
}

fn workload_from_pod(pod: k8s::Pod) -> Workload {
    let id = WorkloadRef {
        namespace: pod.namespace().expect("pod must have a namespace"),
        name: pod.name_unchecked(),
    };

    let status = pod.status.as_ref();
    let ip = status
        .and_then(|s| s.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
        .and_then(|ip| match ip.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(error) => {
                tracing::warn!(%error, pod = %id, %ip, "Invalid pod IP");
                None
            }
        });
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .map(|p| p.parse::<Phase>().unwrap_or_default())
        .unwrap_or_default();

    let meta = &pod.metadata;
    Workload {
        ip,
        phase,
        role: annotations::get(meta, annotations::ROLE).map(str::to_string),
        session_name: annotations::get(meta, annotations::SESSION_NAME).map(str::to_string),
        external_id: annotations::get(meta, annotations::EXTERNAL_ID).map(str::to_string),
        session_tags: annotations::get(meta, annotations::SESSION_TAGS)
            .map(annotations::parse_session_tags)
            .unwrap_or_default(),
        id,
    }
}
