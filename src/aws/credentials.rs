use std::{
    io::Write,
    path::{Path, PathBuf},
};

use chrono::SecondsFormat;
use ini::Ini;
use tracing::info;

use super::AwsCredentials;
use crate::{
    config::CredentialConfig,
    constants,
    error::{Error, Result},
    persist,
};

/// Where emitted credentials go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSink {
    /// Named section of the AWS shared credentials file
    Profile { path: PathBuf, section: String },
    /// `credential_process` JSON on the output stream
    Process,
}

impl CredentialSink {
    /// Pick the sink requested by `conf`
    pub fn for_config(conf: &CredentialConfig) -> Result<Self> {
        Self::select(conf.store_in_profile, conf.section_name.as_deref())
    }

    pub fn select(store_in_profile: bool, section_name: Option<&str>) -> Result<Self> {
        if !store_in_profile {
            return Ok(Self::Process);
        }

        let section = section_name.ok_or_else(|| {
            Error::Config("a config section name is required to store in a profile".into())
        })?;
        let path = constants::aws_credentials_path().ok_or_else(|| {
            Error::Config("failed to determine AWS credentials path".into())
        })?;

        Ok(Self::Profile {
            path,
            section: section.to_string(),
        })
    }

    pub fn emit(&self, creds: &AwsCredentials, out: &mut (dyn Write + Send)) -> Result<()> {
        match self {
            Self::Profile { path, section } => save_credentials(path, section, creds),
            Self::Process => {
                serde_json::to_writer(&mut *out, creds)?;
                writeln!(out)?;
                out.flush()?;
                Ok(())
            }
        }
    }
}

/// Save credentials to a section of the AWS credentials file
fn save_credentials(path: &Path, section: &str, creds: &AwsCredentials) -> Result<()> {
    let mut ini = if path.exists() {
        Ini::load_from_file(path)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?
    } else {
        Ini::new()
    };

    let expiration = creds.expiration.to_rfc3339_opts(SecondsFormat::Secs, true);

    ini.with_section(Some(section))
        .set("aws_access_key_id", &creds.access_key_id)
        .set("aws_secret_access_key", &creds.secret_access_key)
        .set("aws_session_token", &creds.session_token)
        .set("aws_session_expiration", &expiration)
        .set("aws_credential_version", creds.version.to_string());

    let mut buf = Vec::new();
    ini.write_to(&mut buf)?;
    persist::write_atomically(path, &buf)?;

    info!("Credentials saved to profile: {}", section);
    Ok(())
}
