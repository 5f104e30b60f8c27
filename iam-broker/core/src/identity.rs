use crate::{arn::ResolvedRole, workload::Workload, ArnResolver, EmptyReferenceError};
use std::{collections::BTreeMap, fmt};

/// Session tags attached to an assumed role, ordered by key.
pub type SessionTags = BTreeMap<String, String>;

/// Everything that determines which credentials are issued: the role and the session parameters
/// used to assume it.
///
/// Identities are used as credential cache keys, so two workloads that request the same role with
/// the same session parameters share credentials.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoleIdentity {
    pub role: ResolvedRole,
    pub session_name: Option<String>,
    pub external_id: Option<String>,
    pub session_tags: SessionTags,
}

// === impl RoleIdentity ===

impl RoleIdentity {
    pub fn new(role: ResolvedRole) -> Self {
        Self {
            role,
            session_name: None,
            external_id: None,
            session_tags: SessionTags::default(),
        }
    }

    /// Builds the identity requested by a workload's annotations.
    pub fn for_workload(
        resolver: &ArnResolver,
        workload: &Workload,
    ) -> Result<Self, EmptyReferenceError> {
        let role = resolver.resolve(workload.role.as_deref().unwrap_or_default())?;
        Ok(Self {
            role,
            session_name: workload.session_name.clone(),
            external_id: workload.external_id.clone(),
            session_tags: workload.session_tags.clone(),
        })
    }
}

impl fmt::Display for RoleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role)?;
        if let Some(name) = &self.session_name {
            write!(f, "|session-name={name}")?;
        }
        if let Some(id) = &self.external_id {
            write!(f, "|external-id={id}")?;
        }
        if !self.session_tags.is_empty() {
            f.write_str("|tags=")?;
            for (i, (k, v)) in self.session_tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{k}={v}")?;
            }
        }
        Ok(())
    }
}
