use std::{env, path::PathBuf};

/// Tool name, used for cache keys, session names and data paths
pub const SELF_NAME: &str = "aws-cli-auth";

/// Config file name under the user's home directory
pub const CONFIG_FILE_NAME: &str = ".aws-cli-auth.ini";

/// Section created in a fresh config file and read when no section is given
pub const DEFAULT_CONFIG_SECTION: &str = "role";

/// Chrome user data directory name inside the data directory
pub const CHROME_USER_DATA_DIR_NAME: &str = "chrome-user-data";

/// Registry of secret keys written by this tool, inside the data directory
pub const SECRET_REGISTRY_FILE_NAME: &str = "secret-keys.json";

/// AWS configuration directory name
pub const AWS_CONFIG_DIR_NAME: &str = ".aws";

/// Default AWS SAML endpoint (where the SAML response is posted)
pub const DEFAULT_ACS_URL: &str = "https://signin.aws.amazon.com/saml";

/// AWS SSO portal "user" endpoint, `{region}` is substituted
pub const SSO_USER_ENDPOINT: &str = "https://portal.sso.{region}.amazonaws.com/user";

/// AWS SSO portal federation credentials endpoint, `{region}` is substituted
pub const SSO_CREDENTIALS_ENDPOINT: &str =
    "https://portal.sso.{region}.amazonaws.com/federation/credentials/";

pub const DEFAULT_SSO_REGION: &str = "eu-west-1";

/// STS minimum session duration, used for every hop but the last
pub const DEFAULT_HOP_DURATION_SECONDS: i32 = 900;

/// Default requested session duration in seconds
pub const DEFAULT_SESSION_DURATION_SECONDS: i32 = 900;

/// Maximum session duration accepted by STS
pub const MAX_SESSION_DURATION_SECONDS: i32 = 43200;

/// Default time to wait for the federation artifact, in seconds
pub const DEFAULT_CAPTURE_TIMEOUT_SECONDS: u64 = 120;

/// Default AWS region for STS operations when no region is configured
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Version stamped on every credential payload this tool emits
pub const CREDENTIAL_VERSION: u8 = 1;

pub const WEB_IDENTITY_TOKEN_FILE_VAR: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";
pub const ROLE_ARN_VAR: &str = "AWS_ROLE_ARN";

fn home_dir() -> Option<PathBuf> {
    dirs::home_dir().or_else(|| {
        env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .ok()
            .map(PathBuf::from)
    })
}

/// Data directory shared by browser sessions and the key registry
/// Always `~/.aws-cli-auth-data`
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(format!(".{SELF_NAME}-data")))
}

/// Browser profile directory inside the data directory
pub fn chrome_user_data_dir() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join(CHROME_USER_DATA_DIR_NAME))
}

/// Default config file path, `~/.aws-cli-auth.ini`
pub fn config_file_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(CONFIG_FILE_NAME))
}

/// Get the AWS credentials file path
/// Respects AWS_SHARED_CREDENTIALS_FILE environment variable if set
pub fn aws_credentials_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }

    home_dir().map(|home| home.join(AWS_CONFIG_DIR_NAME).join("credentials"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_data_dir_layout() {
        let dir = data_dir().unwrap();
        assert!(dir.to_string_lossy().ends_with(".aws-cli-auth-data"));

        let chrome = chrome_user_data_dir().unwrap();
        assert!(chrome.starts_with(&dir));
        assert!(chrome.ends_with(CHROME_USER_DATA_DIR_NAME));
    }

    #[test]
    #[serial]
    fn test_aws_credentials_path_with_env() {
        let original = env::var("AWS_SHARED_CREDENTIALS_FILE").ok();

        unsafe {
            env::set_var("AWS_SHARED_CREDENTIALS_FILE", "/custom/path/credentials");
        }
        let path = aws_credentials_path();
        assert_eq!(path, Some(PathBuf::from("/custom/path/credentials")));

        unsafe {
            match original {
                Some(val) => env::set_var("AWS_SHARED_CREDENTIALS_FILE", val),
                None => env::remove_var("AWS_SHARED_CREDENTIALS_FILE"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_aws_credentials_path_default() {
        let original = env::var("AWS_SHARED_CREDENTIALS_FILE").ok();

        unsafe {
            env::remove_var("AWS_SHARED_CREDENTIALS_FILE");
        }
        let path = aws_credentials_path();

        if let Some(p) = path {
            let path_str = p.to_string_lossy();
            assert!(path_str.contains(AWS_CONFIG_DIR_NAME));
            assert!(path_str.contains("credentials"));
        }

        unsafe {
            if let Some(val) = original {
                env::set_var("AWS_SHARED_CREDENTIALS_FILE", val);
            }
        }
    }

    #[test]
    fn test_sso_endpoint_templates_carry_region_placeholder() {
        assert!(SSO_USER_ENDPOINT.contains("{region}"));
        assert!(SSO_CREDENTIALS_ENDPOINT.contains("{region}"));
    }
}
