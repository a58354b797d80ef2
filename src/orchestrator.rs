//! Cache-or-refresh decision for one invocation
//!
//! `ValidateConfig -> CacheLookup -> {CacheHit | Refresh -> Persist} -> Emit`.
//! Any error ends the run unchanged; nothing is retried.

use std::io::Write;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    aws::{
        AwsCredentials, AwsRole,
        chain::{RoleChain, assume_chain, hop_duration, session_name},
        credentials::CredentialSink,
        sts::IdentityBroker,
    },
    browser::{self, BrowserLauncher, CaptureMode},
    config::CredentialConfig,
    constants::CREDENTIAL_VERSION,
    error::{Error, Result},
    secret::{SecretBackend, SecretStore, is_fresh},
};

pub struct CredentialOrchestrator<L, B, S> {
    config: CredentialConfig,
    launcher: L,
    broker: B,
    backend: S,
    sink: Option<CredentialSink>,
    cancel: CancellationToken,
}

impl<L, B, S> CredentialOrchestrator<L, B, S>
where
    L: BrowserLauncher,
    B: IdentityBroker,
    S: SecretBackend,
{
    pub fn new(
        config: CredentialConfig,
        launcher: L,
        broker: B,
        backend: S,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            launcher,
            broker,
            backend,
            sink: None,
            cancel,
        }
    }

    /// Emit to `sink` instead of the one selected by the config
    pub fn with_sink(mut self, sink: CredentialSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Produce valid credentials for the configured role chain and emit them
    pub async fn run(self, out: &mut (dyn Write + Send)) -> Result<AwsCredentials> {
        // ValidateConfig
        if self.config.store_in_profile && self.config.section_name.is_none() {
            return Err(Error::Config(
                "config-section name must be provided if store-profile is enabled".into(),
            ));
        }
        let sink = match &self.sink {
            Some(sink) => sink.clone(),
            None => CredentialSink::for_config(&self.config)?,
        };
        let chain = self.config.effective_chain()?;
        let store = SecretStore::new(&self.backend, chain.last().unwrap_or_default());

        let creds = match self.cached(&store).await? {
            Some(cached) => {
                info!("Using cached credentials, valid until {}", cached.expiration);
                cached
            }
            None => {
                let fresh = self
                    .refresh(&chain)
                    .await?
                    .with_version(CREDENTIAL_VERSION);
                store.save(&fresh)?;
                fresh
            }
        };

        sink.emit(&creds, out)?;
        Ok(creds)
    }

    /// CacheLookup: the stored credentials if they are still valid
    async fn cached<T: SecretBackend>(
        &self,
        store: &SecretStore<T>,
    ) -> Result<Option<AwsCredentials>> {
        let Some(cached) = store.load()? else {
            return Ok(None);
        };
        if cached.access_key_id.is_empty() {
            return Ok(None);
        }
        if !is_fresh(&cached, self.config.reload_before, Utc::now()) {
            info!(
                "Cached credentials expire at {} (reload before {}s), refreshing",
                cached.expiration, self.config.reload_before
            );
            return Ok(None);
        }

        match self.broker.validate(&cached).await {
            Ok(true) => Ok(Some(cached)),
            Ok(false) => {
                info!("Cached credentials were rejected, refreshing");
                Ok(None)
            }
            Err(e) => {
                warn!("{}, refreshing", e);
                Ok(None)
            }
        }
    }

    /// Refresh: federated login followed by the rest of the chain
    async fn refresh(&self, chain: &RoleChain) -> Result<AwsCredentials> {
        let (entry, tail) = chain
            .split_entry()
            .ok_or_else(|| Error::Config("no role to assume".into()))?;
        let conf = &self.config;

        let driver = self.launcher.launch().await?;
        let timeout = self.launcher.timeout();

        let base = if conf.is_sso {
            debug!("Capturing AWS SSO credentials for {}", entry);
            let mode = CaptureMode::Sso {
                user_endpoint: conf.sso_user_endpoint.clone(),
                credentials_endpoint: conf.sso_credentials_endpoint.clone(),
            };
            let body =
                browser::capture(driver, &conf.provider_url, &mode, timeout, &self.cancel).await?;
            AwsCredentials::from_sso_payload(&body)?
        } else {
            let mode = CaptureMode::Saml {
                acs_url: conf.acs_url.clone(),
            };
            let assertion =
                browser::capture(driver, &conf.provider_url, &mode, timeout, &self.cancel).await?;

            let role = AwsRole {
                role_arn: entry.to_string(),
                principal_arn: conf.principal_arn.clone(),
                session_name: session_name(&conf.username),
                duration_seconds: hop_duration(tail.is_empty(), conf.duration),
            };
            self.broker.login_with_saml(&assertion, &role).await?
        };

        assume_chain(&self.broker, base, &conf.username, tail, conf.duration).await
    }
}
