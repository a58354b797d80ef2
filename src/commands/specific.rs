use std::io;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::{
    aws::{
        chain::RoleChain,
        credentials::CredentialSink,
        sts::StsBroker,
        web_identity::{self, IdentityMethod, WebIdentityEnv},
    },
    cli::GlobalArgs,
    config::{current_username, validate_duration},
    constants::{CREDENTIAL_VERSION, DEFAULT_SESSION_DURATION_SECONDS},
};

#[derive(Debug, Clone, Args)]
pub struct SpecificCommand {
    #[arg(
        short = 'm',
        long,
        default_value = "WEB_ID",
        help = "Credential provider to run instead of the default provider chain"
    )]
    pub method: String,

    #[arg(short = 'r', long, help = "Role to assume once the identity exchange completes")]
    pub role: String,
}

impl SpecificCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let method: IdentityMethod = self.method.parse()?;
        let sink = CredentialSink::select(global.store_profile, global.cfg_section.as_deref())?;
        let chain = RoleChain::compose(
            Some(self.role.as_str()),
            global.role_chain.as_deref().unwrap_or_default(),
        )?;
        let duration =
            validate_duration(global.max_duration.unwrap_or(DEFAULT_SESSION_DURATION_SECONDS))?;

        let env = match method {
            IdentityMethod::WebIdentity => WebIdentityEnv::from_env()?,
        };

        let broker = StsBroker::from_env().await;
        let creds = web_identity::exchange(&broker, &env, &current_username(), &chain, duration)
            .await
            .context("Failed to exchange web identity for AWS credentials")?
            .with_version(CREDENTIAL_VERSION);

        sink.emit(&creds, &mut io::stdout())?;
        info!("Credentials expire at {}", creds.expiration);
        Ok(())
    }
}
