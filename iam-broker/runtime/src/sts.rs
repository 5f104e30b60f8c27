//! Issues credentials with AWS STS.

use anyhow::{bail, Context, Result};
use aws_sdk_sts::{types::Tag, Client};
use chrono::DateTime;
use iam_broker_core::{CredentialGateway, Credentials, IssueRequest};

#[derive(Clone, Debug)]
pub struct StsGateway {
    client: Client,
}

// === impl StsGateway ===

impl StsGateway {
    /// Builds a client from the ambient AWS configuration, e.g. environment variables or the
    /// instance profile.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self {
            client: Client::new(&config),
        }
    }

    /// Determines the role ARN prefix of the account the broker runs in.
    pub async fn detect_role_base_arn(&self) -> Result<String> {
        let identity = self
            .client
            .get_caller_identity()
            .send()
            .await
            .context("failed to get caller identity")?;
        let arn = identity
            .arn()
            .context("caller identity did not include an ARN")?;
        role_base_arn_from_caller(arn)
    }
}

#[async_trait::async_trait]
impl CredentialGateway for StsGateway {
    async fn issue(&self, request: IssueRequest) -> Result<Credentials> {
        let IssueRequest {
            role_arn,
            session_name,
            external_id,
            session_tags,
            duration,
        } = request;

        let tags = session_tags
            .into_iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect::<Result<Vec<_>, _>>()?;
        let duration_seconds = i32::try_from(duration.as_secs())
            .with_context(|| format!("invalid session duration {duration:?}"))?;

        let output = self
            .client
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(session_name)
            .duration_seconds(duration_seconds)
            .set_external_id(external_id)
            .set_tags((!tags.is_empty()).then_some(tags))
            .send()
            .await
            .with_context(|| format!("failed to assume {role_arn}"))?;

        let Some(credentials) = output.credentials() else {
            bail!("no credentials returned for {role_arn}");
        };
        let expiration = credentials.expiration();
        let expiration = DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .with_context(|| format!("invalid expiration for {role_arn}"))?;
        tracing::debug!(role = %role_arn, %expiration, "Assumed role");

        Ok(Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token(),
            expiration,
        ))
    }
}

/// Derives the role ARN prefix for the account of a caller identity ARN.
///
/// E.g. `arn:aws:sts::123456789012:assumed-role/broker/i-0abc` becomes
/// `arn:aws:iam::123456789012:role/`.
pub fn role_base_arn_from_caller(arn: &str) -> Result<String> {
    let mut parts = arn.splitn(6, ':');
    let (Some("arn"), Some(partition), Some(_service), Some(_region), Some(account), Some(_)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        bail!("malformed caller ARN: {arn}");
    };
    if partition.is_empty() || account.is_empty() {
        bail!("caller ARN {arn} does not identify an account");
    }
    Ok(format!("arn:{partition}:iam::{account}:role/"))
}
