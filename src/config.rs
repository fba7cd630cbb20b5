//! Device credential configuration and the polling glue built on it.
//!
//! The schema matches the credential records monitoring deployments carry
//! per device: a protocol version, a community string (plain or wrapped in
//! a `{secret: …}` object) for v1/v2c, and a username with optional auth
//! and privacy credentials for v3.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::warn;

use crate::asn1::Oid;
use crate::client::{Snmp, SnmpClient, SnmpV3};
use crate::mib::MibIndex;
use crate::v3::{AuthProtocol, PrivProtocol};
use crate::{Error, Result};

/// Credential record for one device.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    /// `1`, `2c` (the default) or `3`.
    pub version: Option<String>,
    pub community: Option<CommunityConfig>,
    pub username: Option<String>,
    pub auth: Option<CredentialConfig>,
    #[serde(rename = "priv")]
    pub privacy: Option<CredentialConfig>,
}

/// A community string, either plain or wrapped as a secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommunityConfig {
    Plain(String),
    Secret { secret: String },
}

impl CommunityConfig {
    fn value(&self) -> &str {
        match self {
            Self::Plain(s) => s,
            Self::Secret { secret } => secret,
        }
    }
}

/// Auth or privacy credentials: a protocol name and a password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub password: String,
}

impl DeviceConfig {
    /// Parse a raw JSON credential record, with typed errors for shape
    /// mismatches.
    pub fn from_json(value: &Json) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// Build the matching client for `host`.
    ///
    /// Community and version fall back to `public` and `2c`; nothing else
    /// is silently defaulted.
    pub fn build_client(&self, host: &str) -> Result<SnmpClient> {
        let version = self.version.as_deref().unwrap_or("2c");
        match version {
            "2c" => Ok(SnmpClient::Community(Snmp::new(host, self.community_str()?))),
            "1" => Ok(SnmpClient::Community(Snmp::v1(host, self.community_str()?))),
            "3" => {
                let username = self
                    .username
                    .as_deref()
                    .ok_or_else(|| Error::invalid_config("`username` must be a string."))?;
                let auth = match &self.auth {
                    Some(credential) => {
                        let proto = AuthProtocol::from_name(&credential.kind)
                            .ok_or_else(|| Error::invalid_config("`auth.type` invalid"))?;
                        Some((proto, credential.password.as_str()))
                    }
                    None => None,
                };
                let privacy = match &self.privacy {
                    Some(credential) => {
                        if auth.is_none() {
                            return Err(Error::invalid_config("`priv` requires `auth`"));
                        }
                        let proto = PrivProtocol::from_name(&credential.kind)
                            .ok_or_else(|| Error::invalid_config("`priv.type` invalid"))?;
                        Some((proto, credential.password.as_str()))
                    }
                    None => None,
                };
                Ok(SnmpClient::V3(SnmpV3::new(host, username, auth, privacy)?))
            }
            other => Err(Error::invalid_config(format!(
                "unsupported snmp version {other}"
            ))),
        }
    }

    fn community_str(&self) -> Result<&str> {
        match &self.community {
            Some(community) => Ok(community.value()),
            None => Ok("public"),
        }
    }
}

/// Walk each query subtree on `host` and return formatted per-row records
/// grouped under the resolved base names.
pub async fn snmp_queries(
    host: &str,
    config: &DeviceConfig,
    queries: &[Oid],
    mib: Arc<MibIndex>,
) -> Result<HashMap<String, Vec<Map<String, Json>>>> {
    let mut client = config.build_client(host)?;
    match client.connect().await {
        Ok(()) => {}
        Err(Error::NoAuthParams) => {
            warn!("unable to connect: failed to set auth params");
            return Err(Error::NoAuthParams);
        }
        Err(e) => return Err(e),
    }

    let outcome = async {
        let mut results = HashMap::new();
        for oid in queries {
            let rows = client.walk(oid, true).await?;
            let (name, records) = mib
                .format_walk(oid, &rows)
                .map_err(|e| Error::parse_result(e.to_string()))?;
            results.insert(name, records);
        }
        Ok(results)
    }
    .await;

    // Safe to close whatever the connection status is.
    client.close();
    outcome
}

/// Logging configuration, consumed by [`crate::utils::logger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Full }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "full")]
    Full,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_default_version_and_community() {
        let config = DeviceConfig::from_json(&json!({})).unwrap();
        let client = config.build_client("198.51.100.7").unwrap();
        assert!(matches!(client, SnmpClient::Community(_)));
    }

    #[test]
    fn test_community_secret_form() {
        let config = DeviceConfig::from_json(&json!({
            "version": "2c",
            "community": {"secret": "s3cret"},
        }))
        .unwrap();
        assert_eq!(config.community_str().unwrap(), "s3cret");

        let config = DeviceConfig::from_json(&json!({
            "community": "plain",
        }))
        .unwrap();
        assert_eq!(config.community_str().unwrap(), "plain");
    }

    #[test]
    fn test_invalid_community_shape() {
        assert!(DeviceConfig::from_json(&json!({"community": 5})).is_err());
    }

    #[test]
    fn test_v3_requires_username() {
        let config = DeviceConfig::from_json(&json!({"version": "3"})).unwrap();
        match config.build_client("198.51.100.7") {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("username")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_v3_full_credentials() {
        let config = DeviceConfig::from_json(&json!({
            "version": "3",
            "username": "monitor",
            "auth": {"type": "USM_AUTH_HMAC96_SHA", "password": "Password1"},
            "priv": {"type": "USM_PRIV_CFB128_AES", "password": "Password1"},
        }))
        .unwrap();
        assert!(matches!(
            config.build_client("198.51.100.7"),
            Ok(SnmpClient::V3(_))
        ));
    }

    #[test]
    fn test_v3_bad_auth_type() {
        let config = DeviceConfig::from_json(&json!({
            "version": "3",
            "username": "monitor",
            "auth": {"type": "USM_AUTH_NONE", "password": "x"},
        }))
        .unwrap();
        match config.build_client("198.51.100.7") {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("auth.type")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_v3_priv_without_auth() {
        let config = DeviceConfig::from_json(&json!({
            "version": "3",
            "username": "monitor",
            "priv": {"type": "USM_PRIV_CFB128_AES", "password": "x"},
        }))
        .unwrap();
        assert!(matches!(
            config.build_client("198.51.100.7"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let config = DeviceConfig::from_json(&json!({"version": "4"})).unwrap();
        match config.build_client("198.51.100.7") {
            Err(Error::InvalidConfig(msg)) => {
                assert!(msg.contains("unsupported snmp version"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
