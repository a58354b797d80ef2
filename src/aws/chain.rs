//! Sequential role assumption
//!
//! Each hop's credentials are the calling identity of the next hop. Only the
//! final hop requests the configured session duration; STS refuses chained
//! sessions longer than an hour, so earlier hops use the minimum.

use std::collections::HashSet;

use tracing::info;

use super::{AwsCredentials, AwsRole, sts::IdentityBroker};
use crate::{
    constants::{DEFAULT_HOP_DURATION_SECONDS, SELF_NAME},
    error::{Error, Result},
};

/// Maximum length of an STS role session name
const MAX_SESSION_NAME_LEN: usize = 64;

/// Ordered role references, validated to be non-empty and unique
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleChain(Vec<String>);

impl RoleChain {
    /// Build the effective chain from a direct role and an explicit chain
    ///
    /// The direct role (or, in SSO mode, the SSO role) is the first hop.
    pub fn compose(entry_role: Option<&str>, chain: &[String]) -> Result<Self> {
        let roles: Vec<String> = entry_role
            .map(str::to_string)
            .into_iter()
            .chain(chain.iter().cloned())
            .collect();

        let mut seen = HashSet::new();
        for role in &roles {
            if role.trim().is_empty() {
                return Err(Error::Config("role chain contains an empty entry".into()));
            }
            if !seen.insert(role.as_str()) {
                return Err(Error::Config(format!(
                    "role chain contains a duplicate entry: {role}"
                )));
            }
        }

        Ok(Self(roles))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The hop entered by federation and the hops assumed after it
    pub fn split_entry(&self) -> Option<(&str, &[String])> {
        self.0
            .split_first()
            .map(|(first, rest)| (first.as_str(), rest))
    }

    /// The role whose credentials the chain finally yields
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

/// Requested duration for a hop: the configured value on the last hop only
pub fn hop_duration(is_last: bool, configured: i32) -> i32 {
    if is_last {
        configured
    } else {
        DEFAULT_HOP_DURATION_SECONDS
    }
}

/// Session name derived from the user and tool name
///
/// Characters outside the STS session name charset are replaced with `_`.
pub fn session_name(username: &str) -> String {
    format!("{username}-{SELF_NAME}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}

/// Assume every role in `chain`, in order, starting from `starting`
///
/// An empty chain returns `starting` unchanged. The first failing hop aborts
/// the whole chain.
pub async fn assume_chain<B>(
    broker: &B,
    starting: AwsCredentials,
    username: &str,
    chain: &[String],
    duration: i32,
) -> Result<AwsCredentials>
where
    B: IdentityBroker + ?Sized,
{
    let total = chain.len();
    let mut creds = starting;

    for (index, role_arn) in chain.iter().enumerate() {
        let is_last = index + 1 == total;
        let role = AwsRole {
            role_arn: role_arn.clone(),
            principal_arn: None,
            session_name: session_name(username),
            duration_seconds: hop_duration(is_last, duration),
        };

        info!("Assuming role {}/{}: {}", index + 1, total, role_arn);
        creds = broker
            .assume_role(&creds, &role)
            .await
            .map_err(|e| match e {
                Error::Broker { message, .. } => Error::Broker {
                    step: format!("hop {}/{} ({role_arn})", index + 1, total),
                    message,
                },
                other => other,
            })?;
    }

    Ok(creds)
}
