//! OAuth access tokens for the BigQuery REST API

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::WarehouseError;

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Google service account key, as found in the JSON key file
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Where access tokens come from
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Signed JWT assertion exchanged at the key's token URI
    ServiceAccount(ServiceAccountKey),
    /// Pre-issued bearer token, used as-is
    Static(String),
    /// GCE/Cloud Run metadata server
    Metadata { url: String },
}

impl Credentials {
    pub fn describe(&self) -> String {
        match self {
            Credentials::ServiceAccount(key) => format!("service account {}", key.client_email),
            Credentials::Static(_) => "static access token".to_string(),
            Credentials::Metadata { url } => format!("metadata server ({})", url),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Hands out bearer tokens, refreshing them when close to expiry
pub struct TokenProvider {
    http: Client,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, WarehouseError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let response = match &self.credentials {
            Credentials::ServiceAccount(key) => self.exchange_assertion(key).await?,
            Credentials::Metadata { url } => self.fetch_from_metadata(url).await?,
            Credentials::Static(token) => return Ok(token.clone()),
        };

        let expires_at = Utc::now() + Duration::seconds(response.expires_in.unwrap_or(3600));
        debug!("Obtained access token valid until {}", expires_at.to_rfc3339());
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at,
        });

        Ok(response.access_token)
    }

    async fn exchange_assertion(&self, key: &ServiceAccountKey) -> Result<TokenResponse, WarehouseError> {
        let assertion = sign_assertion(key, Utc::now())?;

        let response = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        parse_token_response(response).await
    }

    async fn fetch_from_metadata(&self, url: &str) -> Result<TokenResponse, WarehouseError> {
        let response = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        parse_token_response(response).await
    }
}

/// Build the RS256 JWT assertion for a service account
pub fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, WarehouseError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: BIGQUERY_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: (now + Duration::hours(1)).timestamp(),
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| WarehouseError::Credentials(format!("invalid private key: {}", e)))?;

    encode(&header, &claims, &signing_key)
        .map_err(|e| WarehouseError::Credentials(format!("failed to sign assertion: {}", e)))
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse, WarehouseError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(WarehouseError::Credentials(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| WarehouseError::Credentials(format!("malformed token response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_static_token() {
        let provider = TokenProvider::new(Client::new(), Credentials::Static("abc".to_string()));
        assert_eq!(provider.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .match_header("Metadata-Flavor", "Google")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"meta-token","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = TokenProvider::new(
            Client::new(),
            Credentials::Metadata {
                url: format!("{}/token", server.url()),
            },
        );

        assert_eq!(provider.token().await.unwrap(), "meta-token");
        assert_eq!(provider.token().await.unwrap(), "meta-token");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_endpoint_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/token")
            .with_status(404)
            .with_body("not on GCE")
            .create_async()
            .await;

        let provider = TokenProvider::new(
            Client::new(),
            Credentials::Metadata {
                url: format!("{}/token", server.url()),
            },
        );

        let err = provider.token().await.unwrap_err();
        assert!(matches!(err, WarehouseError::Credentials(_)));
        assert!(err.to_string().contains("not on GCE"));
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let key: ServiceAccountKey = serde_json::from_str(
            r#"{"client_email":"svc@proj.iam.gserviceaccount.com","private_key":"not a pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);

        let err = sign_assertion(&key, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("invalid private key"));
    }
}
