use aws_smithy_types::DateTime as SmithyDateTime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod chain;
pub mod credentials;
pub mod sts;
pub mod web_identity;

/// AWS temporary credentials
///
/// Field names follow the `credential_process` output format, which is also
/// the format cached in the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwsCredentials {
    #[serde(default)]
    pub version: u8,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

/// A single role assumption request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsRole {
    pub role_arn: String,
    /// SAML provider ARN, only used by the SAML login
    pub principal_arn: Option<String>,
    pub session_name: String,
    pub duration_seconds: i32,
}

/// Credential payload returned by the AWS SSO federation endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SsoPayload {
    role_credentials: SsoRoleCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SsoRoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    /// Milliseconds since the epoch
    expiration: i64,
}

impl AwsCredentials {
    /// Convert credentials returned by STS
    pub fn from_sts(creds: &aws_sdk_sts::types::Credentials) -> Result<Self> {
        Ok(Self {
            version: 0,
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expiration: from_smithy(creds.expiration())?,
        })
    }

    /// Parse the JSON body captured from the SSO federation credentials endpoint
    pub fn from_sso_payload(body: &str) -> Result<Self> {
        let payload: SsoPayload = serde_json::from_str(body).map_err(|e| {
            Error::MalformedArtifact(format!("SSO credentials payload is not valid: {e}"))
        })?;
        let creds = payload.role_credentials;

        let expiration = DateTime::from_timestamp_millis(creds.expiration).ok_or_else(|| {
            Error::MalformedArtifact(format!(
                "SSO credentials expiration out of range: {}",
                creds.expiration
            ))
        })?;

        Ok(Self {
            version: 0,
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            expiration,
        })
    }

    /// Stamp the payload version
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
}

fn from_smithy(dt: &SmithyDateTime) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).ok_or_else(|| Error::Broker {
        step: "credential conversion".to_string(),
        message: format!("expiration out of range: {}s", dt.secs()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SSO_BODY: &str = r#"{"roleCredentials":{"accessKeyId":"asdas","secretAccessKey":"sa/08asc62pun9a","sessionToken":"somtoken//////////YO4Dm0aJYq4K2rQ9V0B6yJMsKpkc5fo+iUT6nI99cZWmGFE","expiration":1698943755000}}"#;

    #[test]
    fn test_from_sso_payload() {
        let creds = AwsCredentials::from_sso_payload(SSO_BODY).unwrap();
        assert_eq!(creds.access_key_id, "asdas");
        assert_eq!(creds.secret_access_key, "sa/08asc62pun9a");
        assert!(creds.session_token.starts_with("somtoken//"));
        assert_eq!(
            creds.expiration,
            Utc.timestamp_opt(1_698_943_755, 0).unwrap()
        );
        assert_eq!(creds.version, 0);
    }

    #[test]
    fn test_from_sso_payload_rejects_missing_fields() {
        let result = AwsCredentials::from_sso_payload(r#"{"roleCredentials":{}}"#);
        assert!(matches!(result, Err(Error::MalformedArtifact(_))));

        let result = AwsCredentials::from_sso_payload("<html></html>");
        assert!(matches!(result, Err(Error::MalformedArtifact(_))));
    }

    #[test]
    fn test_from_sts() {
        let sts = aws_sdk_sts::types::Credentials::builder()
            .access_key_id("AKIA")
            .secret_access_key("secret")
            .session_token("token")
            .expiration(SmithyDateTime::from_secs(1_700_000_000))
            .build()
            .unwrap();

        let creds = AwsCredentials::from_sts(&sts).unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        assert_eq!(creds.expiration.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_serialized_field_names() {
        let creds = AwsCredentials {
            version: 1,
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let json: serde_json::Value = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["Version"], 1);
        assert_eq!(json["AccessKeyId"], "AKIA");
        assert_eq!(json["SecretAccessKey"], "secret");
        assert_eq!(json["SessionToken"], "token");
        assert_eq!(json["Expiration"], "2023-11-14T22:13:20Z");
    }
}
