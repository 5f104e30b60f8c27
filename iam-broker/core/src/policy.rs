use anyhow::Result;
use std::{fmt, net::IpAddr, sync::Arc};

/// The outcome of an authorization check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub explanation: String,
}

/// Decides whether the workload at an address may assume a role.
///
/// An `Err` indicates that the check itself could not be evaluated, and is neither an allow nor
/// a deny.
#[async_trait::async_trait]
pub trait AssumeRolePolicy: Send + Sync {
    async fn is_allowed_assume_role(&self, role: &str, addr: IpAddr) -> Result<Decision>;
}

/// Evaluates policies in order, returning the first denial.
#[derive(Clone, Default)]
pub struct Policies(Vec<Arc<dyn AssumeRolePolicy>>);

// === impl Decision ===

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            explanation: String::new(),
        }
    }

    pub fn deny(explanation: impl Into<String>) -> Self {
        Self {
            allowed: false,
            explanation: explanation.into(),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.allowed, self.explanation.is_empty()) {
            (true, _) => f.write_str("allowed"),
            (false, true) => f.write_str("forbidden"),
            (false, false) => write!(f, "forbidden: {}", self.explanation),
        }
    }
}

// === impl Policies ===

impl Policies {
    pub fn push(mut self, policy: impl AssumeRolePolicy + 'static) -> Self {
        self.0.push(Arc::new(policy));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Policies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Policies").field(&self.0.len()).finish()
    }
}

#[async_trait::async_trait]
impl AssumeRolePolicy for Policies {
    async fn is_allowed_assume_role(&self, role: &str, addr: IpAddr) -> Result<Decision> {
        for policy in &self.0 {
            let decision = policy.is_allowed_assume_role(role, addr).await?;
            if !decision.allowed {
                tracing::debug!(%role, %addr, %decision, "Denied");
                return Ok(decision);
            }
        }
        Ok(Decision::allow())
    }
}
