//! Annotations through which workloads and namespaces configure role brokering.

use crate::ObjectMeta;
use std::collections::BTreeMap;

/// The role a pod assumes.
pub const ROLE: &str = "iam.amazonaws.com/role";

/// Overrides the session name used when assuming a pod's role.
pub const SESSION_NAME: &str = "iam.amazonaws.com/session-name";

/// The external ID passed when assuming a pod's role.
pub const EXTERNAL_ID: &str = "iam.amazonaws.com/external-id";

/// Session tags for a pod's role, formatted as `key=value,key=value`.
pub const SESSION_TAGS: &str = "iam.amazonaws.com/session-tags";

/// A regular expression naming the roles that pods in a namespace may assume.
pub const PERMITTED: &str = "iam.amazonaws.com/permitted";

/// Returns a non-empty annotation value, with surrounding whitespace removed.
pub fn get<'m>(meta: &'m ObjectMeta, key: &str) -> Option<&'m str> {
    meta.annotations
        .as_ref()?
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Parses session tags. Malformed pairs are skipped.
pub fn parse_session_tags(value: &str) -> BTreeMap<String, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                Some((k.trim().to_string(), v.trim().to_string()))
            }
            _ => {
                tracing::warn!(%pair, "Ignoring malformed session tag");
                None
            }
        })
        .collect()
}
