use crate::{
    core::{
        ArnResolver, AssumeRolePolicy, Credentials, Decision, EmptyReferenceError, Policies,
        RoleIdentity, WorkloadRef,
    },
    credentials::{self, Cache},
    index::{self, LookupError, NamespacePermittedRoleName, RequestingAnnotatedRole},
};
use std::{net::IpAddr, sync::Arc};

/// The operations the broker exposes to a request-serving layer.
#[derive(Clone, Debug)]
pub struct Broker {
    resolver: Arc<ArnResolver>,
    workloads: index::workload::SharedIndex,
    policy: Policies,
    cache: Cache,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("pod {0} is not annotated with a role")]
    NoRole(WorkloadRef),

    #[error("invalid role: {0}")]
    InvalidRole(#[from] EmptyReferenceError),

    #[error("role assumption {0}")]
    Forbidden(Decision),

    #[error("failed to evaluate policy")]
    Policy(#[source] anyhow::Error),

    #[error(transparent)]
    Credentials(#[from] credentials::Error),
}

// === impl Broker ===

impl Broker {
    /// Builds a broker that enforces the standard policies: a pod may only request the role it is
    /// annotated with, and only if its namespace permits that role.
    pub fn new(
        resolver: Arc<ArnResolver>,
        workloads: index::workload::SharedIndex,
        namespaces: index::namespace::SharedIndex,
        cache: Cache,
    ) -> Self {
        let policy = Policies::default()
            .push(RequestingAnnotatedRole::new(workloads.clone()))
            .push(NamespacePermittedRoleName::new(
                resolver.clone(),
                workloads.clone(),
                namespaces,
            ));
        Self::with_policy(resolver, workloads, policy, cache)
    }

    pub fn with_policy(
        resolver: Arc<ArnResolver>,
        workloads: index::workload::SharedIndex,
        policy: Policies,
        cache: Cache,
    ) -> Self {
        Self {
            resolver,
            workloads,
            policy,
            cache,
        }
    }

    /// Returns the role reference declared by the pod with the given address.
    pub fn find_role_from_address(&self, addr: IpAddr) -> Result<String, BrokerError> {
        let workload = self.workloads.read().get_by_address(addr)?;
        workload.role.ok_or(BrokerError::NoRole(workload.id))
    }

    pub async fn credentials_for_role(
        &self,
        identity: &RoleIdentity,
    ) -> Result<Credentials, credentials::Error> {
        self.cache.credentials_for_role(identity).await
    }

    pub async fn is_allowed_assume_role(&self, role: &str, addr: IpAddr) -> anyhow::Result<Decision> {
        self.policy.is_allowed_assume_role(role, addr).await
    }

    /// Returns credentials for `role` on behalf of the pod with the given address.
    ///
    /// The request must be permitted by policy. Credentials are issued with the session name,
    /// external ID and session tags that the pod is annotated with.
    pub async fn pod_credentials(
        &self,
        addr: IpAddr,
        role: &str,
    ) -> Result<Credentials, BrokerError> {
        let workload = self.workloads.read().get_by_address(addr)?;

        let decision = self
            .is_allowed_assume_role(role, addr)
            .await
            .map_err(BrokerError::Policy)?;
        if !decision.allowed {
            tracing::info!(pod = %workload.id, %role, %decision, "Denied");
            return Err(BrokerError::Forbidden(decision));
        }

        let identity = RoleIdentity {
            role: self.resolver.resolve(role)?,
            session_name: workload.session_name,
            external_id: workload.external_id,
            session_tags: workload.session_tags,
        };
        let credentials = self.cache.credentials_for_role(&identity).await?;
        tracing::debug!(pod = %workload.id, role = %identity, "Issued credentials to pod");
        Ok(credentials)
    }
}
