use std::{io, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    aws::sts::StsBroker,
    browser::{ChromeLauncher, WebConfig},
    cli::GlobalArgs,
    config::{self, ConfigOverrides, CredentialConfig},
    constants::{self, DEFAULT_CONFIG_SECTION, SECRET_REGISTRY_FILE_NAME},
    orchestrator::CredentialOrchestrator,
    secret::{KeyRegistry, KeychainBackend},
};

#[derive(Debug, Clone, Default, Args)]
pub struct SamlCommand {
    #[arg(
        short = 'p',
        long,
        help = "SAML entity StartSSO URL, the first URL your IdP is called on, e.g. https://company-xyz.okta.com/home/amazon_aws/12345SomeRandonId6789"
    )]
    pub provider: Option<String>,

    #[arg(
        long,
        help = "Principal ARN of the SAML IdP in AWS, e.g. arn:aws:iam::1234567891012:saml-provider/MyCompany-Idp"
    )]
    pub principal: Option<String>,

    #[arg(
        short = 'r',
        long,
        conflicts_with = "sso_role",
        help = "Role to assume when the SAML login completes"
    )]
    pub role: Option<String>,

    #[arg(
        short = 'a',
        long = "acsurl",
        help = "Override the default ACS URL the SAMLResponse is posted to [default: https://signin.aws.amazon.com/saml]"
    )]
    pub acs_url: Option<String>,

    #[arg(long, help = "Use the AWS SSO user portal login, requires --sso-role")]
    pub is_sso: bool,

    #[arg(long, help = "AWS SSO role, in the format ACCOUNT:ROLE_NAME, e.g. 12345678910:PowerUser")]
    pub sso_role: Option<String>,

    #[arg(long, help = "AWS SSO region [default: eu-west-1]")]
    pub sso_region: Option<String>,

    #[arg(long, help = "AWS SSO user endpoint, with a {region} placeholder")]
    pub sso_user_endpoint: Option<String>,

    #[arg(
        long = "sso-fed-endpoint",
        help = "AWS SSO federation credentials endpoint, with a {region} placeholder"
    )]
    pub sso_credentials_endpoint: Option<String>,

    #[arg(
        long,
        help = "Refresh the credentials this many seconds before they expire; must not exceed the max duration"
    )]
    pub reload_before: Option<i64>,

    #[arg(
        long = "saml-timeout",
        help = "Seconds to wait for the login to complete in the browser [default: 120]"
    )]
    pub timeout: Option<u64>,

    #[arg(long, help = "Path to a chromium based browser executable")]
    pub browser_executable_path: Option<PathBuf>,

    #[arg(long, help = "Run the browser without a window")]
    pub headless: bool,

    #[arg(long, help = "Disable the browser sandbox")]
    pub no_sandbox: bool,
}

impl SamlCommand {
    pub async fn execute(self, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
        let config_path = match &global.config_file {
            Some(path) => path.clone(),
            None => constants::config_file_path().context("Failed to determine config file path")?,
        };
        let section = global
            .cfg_section
            .as_deref()
            .unwrap_or(DEFAULT_CONFIG_SECTION);

        let file = config::load_section(&config_path, section).with_context(|| {
            format!(
                "Failed to load section '{section}' from {}",
                config_path.display()
            )
        })?;
        let conf = CredentialConfig::reconcile(file, self.overrides(global))?;

        let data_dir = constants::data_dir().context("Failed to determine data directory")?;
        let profile_dir =
            constants::chrome_user_data_dir().context("Failed to determine browser profile")?;
        let web = WebConfig::new(profile_dir)
            .with_timeout(conf.capture_timeout)
            .with_headless(conf.headless)
            .with_no_sandbox(conf.no_sandbox)
            .with_custom_executable(conf.browser_executable.clone());

        let registry = KeyRegistry::new(data_dir.join(SECRET_REGISTRY_FILE_NAME));
        let backend = KeychainBackend::new(conf.username.clone(), registry);
        let broker = StsBroker::from_env().await;

        let creds = CredentialOrchestrator::new(
            conf,
            ChromeLauncher::new(web),
            broker,
            backend,
            cancel,
        )
        .run(&mut io::stdout())
        .await
        .context("Failed to obtain AWS credentials")?;

        info!("Credentials expire at {}", creds.expiration);
        Ok(())
    }

    fn overrides(&self, global: &GlobalArgs) -> ConfigOverrides {
        ConfigOverrides {
            provider_url: self.provider.clone(),
            principal: self.principal.clone(),
            role: self.role.clone(),
            role_chain: global.role_chain.clone(),
            browser_executable: self.browser_executable_path.clone(),
            duration: global.max_duration,
            acs_url: self.acs_url.clone(),
            // the flag can only switch SSO on; the config file may too
            is_sso: self.is_sso.then_some(true),
            sso_region: self.sso_region.clone(),
            sso_role: self.sso_role.clone(),
            sso_user_endpoint: self.sso_user_endpoint.clone(),
            sso_credentials_endpoint: self.sso_credentials_endpoint.clone(),
            reload_before: self.reload_before,
            store_in_profile: global.store_profile,
            section_name: global.cfg_section.clone(),
            username: None,
            capture_timeout: self.timeout.map(Duration::from_secs),
            headless: self.headless,
            no_sandbox: self.no_sandbox,
        }
    }
}
