use std::{path::Path, time::SystemTime};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::{
    Client as StsClient,
    config::{Builder as StsConfigBuilder, Credentials as SdkCredentials},
    error::{DisplayErrorContext, SdkError},
};
use tracing::{debug, info};

use super::{AwsCredentials, AwsRole};
use crate::{
    constants::{DEFAULT_AWS_REGION, SELF_NAME},
    error::{Error, Result},
};

/// Cloud identity broker consumed by the exchange engine
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    /// Exchange a SAML assertion for credentials of `role`
    async fn login_with_saml(&self, assertion: &str, role: &AwsRole) -> Result<AwsCredentials>;

    /// Assume `role` using `caller` as the calling identity
    async fn assume_role(&self, caller: &AwsCredentials, role: &AwsRole)
    -> Result<AwsCredentials>;

    /// Exchange an OIDC token file for credentials of `role_arn`
    async fn login_with_web_identity(
        &self,
        token_file: &Path,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AwsCredentials>;

    /// Whether the broker still accepts `creds`
    ///
    /// `Ok(false)` is a rejection; `Err` means the check could not run.
    async fn validate(&self, creds: &AwsCredentials) -> Result<bool>;
}

#[async_trait]
impl<T: IdentityBroker + ?Sized> IdentityBroker for &T {
    async fn login_with_saml(&self, assertion: &str, role: &AwsRole) -> Result<AwsCredentials> {
        (**self).login_with_saml(assertion, role).await
    }

    async fn assume_role(
        &self,
        caller: &AwsCredentials,
        role: &AwsRole,
    ) -> Result<AwsCredentials> {
        (**self).assume_role(caller, role).await
    }

    async fn login_with_web_identity(
        &self,
        token_file: &Path,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AwsCredentials> {
        (**self)
            .login_with_web_identity(token_file, role_arn, session_name)
            .await
    }

    async fn validate(&self, creds: &AwsCredentials) -> Result<bool> {
        (**self).validate(creds).await
    }
}

/// AWS STS implementation of [`IdentityBroker`]
#[derive(Debug, Clone)]
pub struct StsBroker {
    config: SdkConfig,
}

impl StsBroker {
    /// Load AWS config with automatic region fallback
    /// Priority: ENV vars -> Config file -> DEFAULT_AWS_REGION
    pub async fn from_env() -> Self {
        let loaded = aws_config::defaults(BehaviorVersion::latest()).load().await;

        let config = match loaded.region() {
            Some(region) => {
                debug!("Using region: {}", region);
                loaded
            }
            None => {
                debug!(
                    "No region configured, using default {} for STS",
                    DEFAULT_AWS_REGION
                );
                aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(DEFAULT_AWS_REGION))
                    .load()
                    .await
            }
        };

        Self { config }
    }

    fn client(&self) -> StsClient {
        StsClient::new(&self.config)
    }

    /// Client signing with `creds` instead of the default provider chain
    fn client_as(&self, creds: &AwsCredentials) -> StsClient {
        let expiry = SystemTime::from(creds.expiration);
        let provider = SdkCredentials::new(
            creds.access_key_id.clone(),
            creds.secret_access_key.clone(),
            Some(creds.session_token.clone()),
            Some(expiry),
            SELF_NAME,
        );
        let conf = StsConfigBuilder::from(&self.config)
            .credentials_provider(provider)
            .build();
        StsClient::from_conf(conf)
    }
}

fn broker_error<E, R>(step: impl Into<String>, err: SdkError<E, R>) -> Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    Error::Broker {
        step: step.into(),
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn returned_credentials(
    step: &str,
    creds: Option<&aws_sdk_sts::types::Credentials>,
) -> Result<AwsCredentials> {
    let creds = creds.ok_or_else(|| Error::Broker {
        step: step.to_string(),
        message: "AWS STS returned no credentials".to_string(),
    })?;
    AwsCredentials::from_sts(creds)
}

#[async_trait]
impl IdentityBroker for StsBroker {
    async fn login_with_saml(&self, assertion: &str, role: &AwsRole) -> Result<AwsCredentials> {
        info!("Calling AWS STS AssumeRoleWithSAML");
        debug!("Role ARN: {}", role.role_arn);
        debug!("Principal ARN: {:?}", role.principal_arn);
        debug!("Duration: {} seconds", role.duration_seconds);

        let step = format!("AssumeRoleWithSAML ({})", role.role_arn);
        let principal_arn = role.principal_arn.as_deref().ok_or_else(|| {
            Error::Config("a principal ARN is required for SAML login".to_string())
        })?;

        let response = self
            .client()
            .assume_role_with_saml()
            .role_arn(&role.role_arn)
            .principal_arn(principal_arn)
            .saml_assertion(assertion)
            .duration_seconds(role.duration_seconds)
            .send()
            .await
            .map_err(|e| broker_error(step.clone(), e))?;

        returned_credentials(&step, response.credentials())
    }

    async fn assume_role(
        &self,
        caller: &AwsCredentials,
        role: &AwsRole,
    ) -> Result<AwsCredentials> {
        info!("Calling AWS STS AssumeRole for {}", role.role_arn);
        let step = format!("AssumeRole ({})", role.role_arn);

        let response = self
            .client_as(caller)
            .assume_role()
            .role_arn(&role.role_arn)
            .role_session_name(&role.session_name)
            .duration_seconds(role.duration_seconds)
            .send()
            .await
            .map_err(|e| broker_error(step.clone(), e))?;

        returned_credentials(&step, response.credentials())
    }

    async fn login_with_web_identity(
        &self,
        token_file: &Path,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AwsCredentials> {
        info!("Calling AWS STS AssumeRoleWithWebIdentity");
        let step = format!("AssumeRoleWithWebIdentity ({role_arn})");

        let token = tokio::fs::read_to_string(token_file).await?;

        let response = self
            .client()
            .assume_role_with_web_identity()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .web_identity_token(token.trim())
            .send()
            .await
            .map_err(|e| broker_error(step.clone(), e))?;

        returned_credentials(&step, response.credentials())
    }

    async fn validate(&self, creds: &AwsCredentials) -> Result<bool> {
        match self.client_as(creds).get_caller_identity().send().await {
            Ok(identity) => {
                debug!("Cached credentials accepted for {:?}", identity.arn());
                Ok(true)
            }
            Err(SdkError::ServiceError(err)) => {
                debug!("Cached credentials rejected: {:?}", err.err());
                Ok(false)
            }
            Err(err) => Err(Error::Validation(DisplayErrorContext(&err).to_string())),
        }
    }
}
