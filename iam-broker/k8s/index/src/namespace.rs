use ahash::AHashMap as HashMap;
use iam_broker_k8s_api::{self as k8s, annotations, ObjectMeta, ResourceExt};
use parking_lot::RwLock;
use regex::Regex;
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Indexes namespaces by name.
#[derive(Debug, Default)]
pub struct Index {
    namespaces: HashMap<String, Namespace>,
}

#[derive(Clone, Debug)]
pub struct Namespace {
    pub name: String,
    pub permitted: PermittedRoles,
}

/// The roles that a namespace's pods are permitted to assume.
#[derive(Clone, Debug)]
pub enum PermittedRoles {
    /// The namespace is not annotated.
    Unset,

    /// Role names must fully match the expression.
    Pattern { expression: String, regex: Regex },

    /// The annotation is not a valid regular expression.
    Invalid { expression: String, error: String },
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn find_namespace(&self, name: &str) -> Option<Namespace> {
        self.namespaces.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

impl kubert::index::IndexClusterResource<k8s::Namespace> for Index {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_unchecked();
        let permitted = PermittedRoles::from_metadata(&ns.metadata);
        if let PermittedRoles::Invalid { expression, error } = &permitted {
            tracing::warn!(ns = %name, %expression, %error, "Invalid permitted role expression");
        }
        tracing::debug!(ns = %name, ?permitted, "Indexing namespace");
        self.namespaces
            .insert(name.clone(), Namespace { name, permitted });
    }

    fn delete(&mut self, name: String) {
        if self.namespaces.remove(&name).is_some() {
            tracing::debug!(ns = %name, "Deleted namespace");
        }
    }
}

// === impl PermittedRoles ===

impl PermittedRoles {
    pub fn from_metadata(meta: &ObjectMeta) -> Self {
        match annotations::get(meta, annotations::PERMITTED) {
            Some(expression) => Self::parse(expression),
            None => Self::Unset,
        }
    }

    pub fn parse(expression: &str) -> Self {
        // Anchored so that the expression must match the whole role name.
        match Regex::new(&format!("^(?:{expression})$")) {
            Ok(regex) => Self::Pattern {
                expression: expression.to_string(),
                regex,
            },
            Err(error) => Self::Invalid {
                expression: expression.to_string(),
                error: error.to_string(),
            },
        }
    }
}
