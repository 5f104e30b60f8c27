//! Standard role-assumption policies backed by the pod and namespace indexes.

use crate::{namespace, workload, PermittedRoles};
use anyhow::Result;
use iam_broker_core::{arn, ArnResolver, AssumeRolePolicy, Decision};
use std::{net::IpAddr, sync::Arc};

/// Permits a pod to request only the role it is annotated with.
#[derive(Clone, Debug)]
pub struct RequestingAnnotatedRole {
    workloads: workload::SharedIndex,
}

/// Permits a pod to request only roles whose names match its namespace's
/// `iam.amazonaws.com/permitted` expression.
///
/// Namespaces without the annotation permit no roles.
#[derive(Clone, Debug)]
pub struct NamespacePermittedRoleName {
    resolver: Arc<ArnResolver>,
    workloads: workload::SharedIndex,
    namespaces: namespace::SharedIndex,
}

// === impl RequestingAnnotatedRole ===

impl RequestingAnnotatedRole {
    pub fn new(workloads: workload::SharedIndex) -> Self {
        Self { workloads }
    }
}

#[async_trait::async_trait]
impl AssumeRolePolicy for RequestingAnnotatedRole {
    async fn is_allowed_assume_role(&self, role: &str, addr: IpAddr) -> Result<Decision> {
        let workload = self.workloads.read().get_by_address(addr)?;
        let requested = arn::normalize(role);

        let Some(annotated) = workload.role.as_deref().map(arn::normalize) else {
            return Ok(Decision::deny(format!(
                "requested '{requested}' but pod {} is not annotated with a role",
                workload.id
            )));
        };

        if requested != annotated {
            return Ok(Decision::deny(format!(
                "requested '{requested}' but pod {} is annotated with '{annotated}'",
                workload.id
            )));
        }

        Ok(Decision::allow())
    }
}

// === impl NamespacePermittedRoleName ===

impl NamespacePermittedRoleName {
    pub fn new(
        resolver: Arc<ArnResolver>,
        workloads: workload::SharedIndex,
        namespaces: namespace::SharedIndex,
    ) -> Self {
        Self {
            resolver,
            workloads,
            namespaces,
        }
    }
}

#[async_trait::async_trait]
impl AssumeRolePolicy for NamespacePermittedRoleName {
    async fn is_allowed_assume_role(&self, role: &str, addr: IpAddr) -> Result<Decision> {
        let workload = self.workloads.read().get_by_address(addr)?;
        let ns = &workload.id.namespace;
        let Some(namespace) = self.namespaces.read().find_namespace(ns) else {
            return Ok(Decision::deny(format!("namespace {ns} not found")));
        };

        let role = self.resolver.resolve(role)?;
        match namespace.permitted {
            PermittedRoles::Unset => Ok(Decision::deny(format!(
                "namespace {ns} does not permit any roles"
            ))),
            PermittedRoles::Invalid { expression, .. } => Ok(Decision::deny(format!(
                "namespace {ns} has an invalid permitted role expression '{expression}'"
            ))),
            PermittedRoles::Pattern { expression, regex } => {
                if regex.is_match(role.name()) {
                    Ok(Decision::allow())
                } else {
                    Ok(Decision::deny(format!(
                        "namespace {ns} permits roles matching '{expression}', not '{}'",
                        role.name()
                    )))
                }
            }
        }
    }
}
