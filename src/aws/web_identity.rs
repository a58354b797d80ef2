use std::{path::PathBuf, str::FromStr};

use tracing::info;

use super::{
    AwsCredentials,
    chain::{RoleChain, assume_chain, session_name},
    sts::IdentityBroker,
};
use crate::{
    constants::{ROLE_ARN_VAR, WEB_IDENTITY_TOKEN_FILE_VAR},
    error::{Error, Result},
};

/// Credential provider selected explicitly instead of the default chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMethod {
    /// OIDC token file exchanged via `AssumeRoleWithWebIdentity`
    WebIdentity,
}

impl FromStr for IdentityMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WEB_ID" => Ok(Self::WebIdentity),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Web identity settings injected by the environment (EKS, CI runners)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebIdentityEnv {
    pub token_file: PathBuf,
    pub role_arn: String,
}

impl WebIdentityEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or(Error::MissingEnvVar(name))
        };

        Ok(Self {
            token_file: PathBuf::from(var(WEB_IDENTITY_TOKEN_FILE_VAR)?),
            role_arn: var(ROLE_ARN_VAR)?,
        })
    }
}

/// Log in with the web identity token, then assume every role in `chain`
pub async fn exchange<B>(
    broker: &B,
    env: &WebIdentityEnv,
    username: &str,
    chain: &RoleChain,
    duration: i32,
) -> Result<AwsCredentials>
where
    B: IdentityBroker + ?Sized,
{
    info!("Exchanging web identity token for {}", env.role_arn);
    let base = broker
        .login_with_web_identity(&env.token_file, &env.role_arn, &session_name(username))
        .await?;

    assume_chain(broker, base, username, chain.as_slice(), duration).await
}
