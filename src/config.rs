use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use ini::{Ini, Properties};
use tracing::{debug, info};

use crate::{
    aws::chain::RoleChain,
    constants::{
        DEFAULT_ACS_URL, DEFAULT_CAPTURE_TIMEOUT_SECONDS, DEFAULT_CONFIG_SECTION,
        DEFAULT_HOP_DURATION_SECONDS, DEFAULT_SESSION_DURATION_SECONDS, DEFAULT_SSO_REGION,
        MAX_SESSION_DURATION_SECONDS, SELF_NAME, SSO_CREDENTIALS_ENDPOINT, SSO_USER_ENDPOINT,
    },
    error::{Error, Result},
};

/// Values read from one section of `~/.aws-cli-auth.ini`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSection {
    pub provider_url: Option<String>,
    pub principal: Option<String>,
    pub role: Option<String>,
    pub role_chain: Vec<String>,
    pub browser_executable_path: Option<PathBuf>,
    pub duration: Option<i32>,
    pub acs_url: Option<String>,
    pub is_sso: Option<bool>,
    pub sso_region: Option<String>,
    pub sso_role: Option<String>,
}

impl ConfigSection {
    fn from_ini_section(section: &Properties) -> Result<Self> {
        let text = |key: &str| {
            section
                .get(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            provider_url: text("provider-url"),
            principal: text("principal"),
            role: text("role"),
            role_chain: section
                .get("role-chain")
                .map(split_list)
                .unwrap_or_default(),
            browser_executable_path: text("browser-executable-path").map(PathBuf::from),
            duration: text("duration")
                .map(|v| parse_value("duration", &v))
                .transpose()?,
            acs_url: text("acs-url"),
            is_sso: text("is-sso").map(|v| parse_value("is-sso", &v)).transpose()?,
            sso_region: text("sso-region"),
            sso_role: text("sso-role"),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}")))
}

/// Load `section` from the config file at `path`
///
/// A missing file is created with an empty default section. A missing
/// section yields defaults when it is the default section and an error
/// otherwise.
pub fn load_section(path: &Path, section: &str) -> Result<ConfigSection> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("[{DEFAULT_CONFIG_SECTION}]\n"))?;
        info!("Created config file: {}", path.display());
    }

    let ini = Ini::load_from_file(path).map_err(|e| {
        Error::Config(format!("failed to load config file {}: {e}", path.display()))
    })?;

    match ini.section(Some(section)) {
        Some(props) => ConfigSection::from_ini_section(props),
        None if section == DEFAULT_CONFIG_SECTION => {
            debug!("No [{}] section in {}, using defaults", section, path.display());
            Ok(ConfigSection::default())
        }
        None => Err(Error::Config(format!(
            "section '{section}' not found in {}",
            path.display()
        ))),
    }
}

/// Explicitly supplied values; every `Some` wins over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider_url: Option<String>,
    pub principal: Option<String>,
    pub role: Option<String>,
    pub role_chain: Option<Vec<String>>,
    pub browser_executable: Option<PathBuf>,
    pub duration: Option<i32>,
    pub acs_url: Option<String>,
    pub is_sso: Option<bool>,
    pub sso_region: Option<String>,
    pub sso_role: Option<String>,
    /// Template with a `{region}` placeholder
    pub sso_user_endpoint: Option<String>,
    /// Template with a `{region}` placeholder
    pub sso_credentials_endpoint: Option<String>,
    pub reload_before: Option<i64>,
    pub store_in_profile: bool,
    pub section_name: Option<String>,
    pub username: Option<String>,
    pub capture_timeout: Option<Duration>,
    pub headless: bool,
    pub no_sandbox: bool,
}

/// Immutable per-invocation snapshot of every option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialConfig {
    pub provider_url: String,
    pub principal_arn: Option<String>,
    pub acs_url: String,
    pub role: Option<String>,
    pub role_chain: Vec<String>,
    pub duration: i32,
    pub reload_before: i64,
    pub is_sso: bool,
    pub sso_region: String,
    /// `ACCOUNT:ROLE_NAME`
    pub sso_role: Option<String>,
    pub sso_user_endpoint: String,
    pub sso_credentials_endpoint: String,
    pub store_in_profile: bool,
    pub section_name: Option<String>,
    pub username: String,
    pub browser_executable: Option<PathBuf>,
    pub capture_timeout: Duration,
    pub headless: bool,
    pub no_sandbox: bool,
}

/// Session duration accepted by STS for the final hop
pub fn validate_duration(duration: i32) -> Result<i32> {
    if (DEFAULT_HOP_DURATION_SECONDS..=MAX_SESSION_DURATION_SECONDS).contains(&duration) {
        Ok(duration)
    } else {
        Err(Error::Config(format!(
            "duration must be between {DEFAULT_HOP_DURATION_SECONDS} and {MAX_SESSION_DURATION_SECONDS} seconds, got {duration}"
        )))
    }
}

impl CredentialConfig {
    /// Merge the config file section with explicit overrides
    pub fn reconcile(file: ConfigSection, overrides: ConfigOverrides) -> Result<Self> {
        let provider_url = overrides
            .provider_url
            .or(file.provider_url)
            .ok_or_else(|| Error::Config("a provider URL is required".into()))?;

        let duration = overrides
            .duration
            .or(file.duration)
            .unwrap_or(DEFAULT_SESSION_DURATION_SECONDS);
        validate_duration(duration)?;

        let reload_before = overrides.reload_before.unwrap_or(0);
        if reload_before < 0 || reload_before > i64::from(duration) {
            return Err(Error::Config(format!(
                "reload-before: {reload_before}, must be less than duration (-d): {duration}"
            )));
        }

        let is_sso = overrides.is_sso.or(file.is_sso).unwrap_or(false);
        let sso_region = overrides
            .sso_region
            .or(file.sso_region)
            .unwrap_or_else(|| DEFAULT_SSO_REGION.to_string());
        let sso_role = overrides.sso_role.or(file.sso_role);
        let role = overrides.role.or(file.role);
        let principal_arn = overrides.principal.or(file.principal);

        let (sso_user_endpoint, sso_credentials_endpoint) = if is_sso {
            let sso_role = sso_role.as_deref().ok_or_else(|| {
                Error::Config("sso-role is required when is-sso is enabled".into())
            })?;
            let (account, role_name) = split_sso_role(sso_role)?;

            let user = overrides
                .sso_user_endpoint
                .as_deref()
                .unwrap_or(SSO_USER_ENDPOINT)
                .replace("{region}", &sso_region);
            let credentials = format!(
                "{}?account_id={}&role_name={}&debug=true",
                overrides
                    .sso_credentials_endpoint
                    .as_deref()
                    .unwrap_or(SSO_CREDENTIALS_ENDPOINT)
                    .replace("{region}", &sso_region),
                urlencoding::encode(account),
                urlencoding::encode(role_name),
            );
            (user, credentials)
        } else {
            if role.is_none() || principal_arn.is_none() {
                return Err(Error::Config(
                    "principal and role are required together for a SAML login".into(),
                ));
            }
            (String::new(), String::new())
        };

        Ok(Self {
            provider_url,
            principal_arn,
            acs_url: overrides
                .acs_url
                .or(file.acs_url)
                .unwrap_or_else(|| DEFAULT_ACS_URL.to_string()),
            role,
            role_chain: overrides.role_chain.unwrap_or(file.role_chain),
            duration,
            reload_before,
            is_sso,
            sso_region,
            sso_role,
            sso_user_endpoint,
            sso_credentials_endpoint,
            store_in_profile: overrides.store_in_profile,
            section_name: overrides.section_name,
            username: overrides.username.unwrap_or_else(current_username),
            browser_executable: overrides.browser_executable.or(file.browser_executable_path),
            capture_timeout: overrides
                .capture_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_CAPTURE_TIMEOUT_SECONDS)),
            headless: overrides.headless,
            no_sandbox: overrides.no_sandbox,
        })
    }

    /// Role entered by federation: the SSO role in SSO mode, else the direct role
    pub fn entry_role(&self) -> Option<&str> {
        if self.is_sso {
            self.sso_role.as_deref()
        } else {
            self.role.as_deref()
        }
    }

    pub fn effective_chain(&self) -> Result<RoleChain> {
        RoleChain::compose(self.entry_role(), &self.role_chain)
    }
}

fn split_sso_role(sso_role: &str) -> Result<(&str, &str)> {
    match sso_role.split(':').collect::<Vec<_>>().as_slice() {
        [account, role] if !account.is_empty() && !role.is_empty() => Ok((*account, *role)),
        _ => Err(Error::Config(
            "incorrectly formatted role for AWS SSO - must only be ACCOUNT:ROLE_NAME".into(),
        )),
    }
}

/// Name of the OS user running the tool
pub fn current_username() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| SELF_NAME.to_string())
}
