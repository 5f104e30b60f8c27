use crate::{arn::ResolvedRole, identity::SessionTags};
use parking_lot::RwLock;
use std::{fmt, net::IpAddr, sync::Arc};

/// Identifies a workload by namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

/// The parts of a running workload that matter for credential brokering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub id: WorkloadRef,

    /// Unset until the workload has been scheduled and assigned an address.
    pub ip: Option<IpAddr>,

    pub phase: Phase,

    /// The role reference the workload declares, if any.
    pub role: Option<String>,

    pub session_name: Option<String>,
    pub external_id: Option<String>,
    pub session_tags: SessionTags,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

/// Reports whether any live workload currently declares a role.
pub trait RoleActivity {
    fn is_role_active(&self, role: &ResolvedRole) -> bool;
}

// === impl WorkloadRef ===

impl WorkloadRef {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Workload ===

impl Workload {
    pub fn new(id: WorkloadRef) -> Self {
        Self {
            id,
            ip: None,
            phase: Phase::default(),
            role: None,
            session_name: None,
            external_id: None,
            session_tags: SessionTags::default(),
        }
    }

    /// Completed workloads no longer run and must not be matched to requests.
    pub fn is_completed(&self) -> bool {
        self.phase.is_completed()
    }
}

// === impl Phase ===

impl Phase {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::str::FromStr for Phase {
    type Err = std::convert::Infallible;

    /// Unrecognized phases are treated as `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        })
    }
}

impl<T: RoleActivity> RoleActivity for Arc<RwLock<T>> {
    fn is_role_active(&self, role: &ResolvedRole) -> bool {
        self.read().is_role_active(role)
    }
}
