use crate::identity::SessionTags;
use anyhow::Result;
use chrono::{offset::Utc, DateTime};
use serde::Serialize;
use std::{fmt, time::Duration};

/// Temporary credentials for an assumed role.
///
/// Serializes in the format served by the instance metadata credentials endpoint.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    pub code: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(rename = "Token")]
    pub session_token: String,
    pub expiration: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Parameters for a single issuance call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssueRequest {
    pub role_arn: String,
    pub session_name: String,
    pub external_id: Option<String>,
    pub session_tags: SessionTags,

    /// How long the issued credentials should remain valid.
    pub duration: Duration,
}

/// Issues credentials for a role, e.g. by calling STS `AssumeRole`.
#[async_trait::async_trait]
pub trait CredentialGateway: Send + Sync {
    async fn issue(&self, request: IssueRequest) -> Result<Credentials>;
}

// === impl Credentials ===

impl Credentials {
    pub const SUCCESS: &'static str = "Success";
    pub const HMAC: &'static str = "AWS-HMAC";

    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            code: Self::SUCCESS.to_string(),
            kind: Self::HMAC.to_string(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expiration,
            last_updated: Utc::now(),
        }
    }
}

// Secrets are never logged.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("code", &self.code)
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}
