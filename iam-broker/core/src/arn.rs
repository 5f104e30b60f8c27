use std::{fmt, hash};

/// Marks a reference that already names a fully-qualified role.
const ARN_PREFIX: &str = "arn:";

/// Resolves role references, as written in workload annotations, into fully-qualified roles.
///
/// A reference is either an ARN, which is used as-is, or a role name (optionally with a path)
/// that is appended to the configured base, e.g. `arn:aws:iam::123456789012:role/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArnResolver {
    prefix: String,
}

/// A fully-qualified role.
///
/// Two roles are equal when their ARNs are equal.
#[derive(Clone, Debug)]
pub struct ResolvedRole {
    arn: String,
    name: String,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("role reference must not be empty")]
pub struct EmptyReferenceError(());

/// Strips a single leading path separator from a role reference.
///
/// `role` and `/role` are the same reference; `//role` is not.
pub fn normalize(reference: &str) -> &str {
    reference.strip_prefix('/').unwrap_or(reference)
}

// === impl ArnResolver ===

impl ArnResolver {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn resolve(&self, reference: &str) -> Result<ResolvedRole, EmptyReferenceError> {
        if reference.starts_with(ARN_PREFIX) {
            return Ok(ResolvedRole {
                name: trailing_segment(reference).to_string(),
                arn: reference.to_string(),
            });
        }

        let reference = normalize(reference);
        if reference.is_empty() {
            return Err(EmptyReferenceError(()));
        }

        Ok(ResolvedRole {
            name: trailing_segment(reference).to_string(),
            arn: format!("{}{}", self.prefix, reference),
        })
    }
}

fn trailing_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// === impl ResolvedRole ===

impl ResolvedRole {
    pub fn arn(&self) -> &str {
        &self.arn
    }

    /// The role's name, without any path or account qualification.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for ResolvedRole {
    fn eq(&self, other: &Self) -> bool {
        self.arn == other.arn
    }
}

impl Eq for ResolvedRole {}

impl hash::Hash for ResolvedRole {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.arn.hash(state)
    }
}

impl PartialOrd for ResolvedRole {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResolvedRole {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.arn.cmp(&other.arn)
    }
}

impl fmt::Display for ResolvedRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.arn.fmt(f)
    }
}
