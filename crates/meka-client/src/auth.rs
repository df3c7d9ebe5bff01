//! Auth/API collaborator
//!
//! Credentials are exchanged for a JWT over the GraphQL API; the JWT then mints the
//! short-lived handshake token appended to the session URL.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::AuthError;
use crate::session::UserProfile;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const AUTHENTICATE_WITH_API_KEY: &str = r#"
mutation AuthenticateWithAPIKey($apiKey: String!, $apiSecret: String!) {
  authenticateWithApiKey(apiKey: $apiKey, apiSecret: $apiSecret) {
    token
  }
}"#;

const AUTHENTICATE_WITH_GITHUB_TOKEN: &str = r#"
mutation AuthenticateWithGithubToken($username: String!, $accessToken: String!) {
  authenticateWithGithubToken(username: $username, accessToken: $accessToken) {
    token
  }
}"#;

const CREATE_HANDSHAKE_TOKEN: &str = r#"
mutation CreateWebSocketHandshakeToken {
  createWebSocketHandshakeToken
}"#;

const ME: &str = r#"
query Me {
  me {
    uid
    username
    avatarUrl
    email
  }
}"#;

/// What the session client needs from the API
pub trait Authenticator: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Exchange an API key pair for a session JWT
    fn authenticate(
        &mut self,
        api_key: &str,
        api_secret: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Mint the one-time token for the WebSocket handshake
    fn handshake_token(&self) -> impl Future<Output = Result<String, AuthError>> + Send;

    /// Profile of the authenticated user, if the API knows one
    fn current_user(&self) -> impl Future<Output = Result<Option<UserProfile>, AuthError>> + Send;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyData {
    authenticate_with_api_key: TokenPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GithubTokenData {
    authenticate_with_github_token: TokenPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeData {
    create_web_socket_handshake_token: String,
}

#[derive(Debug, Deserialize)]
struct MeData {
    me: Option<UserProfile>,
}

/// GraphQL API client
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_url: String,
    jwt: Option<String>,
}

impl ApiClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("meka-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            jwt: None,
        }
    }

    /// Client for the configured API, using the configured JWT if any
    pub fn from_config(config: &ClientConfig) -> Self {
        let client = Self::new(&config.api_url);
        match &config.jwt {
            Some(jwt) => client.with_token(jwt),
            None => client,
        }
    }

    /// Use an existing JWT
    pub fn with_token(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn token(&self) -> Option<&str> {
        self.jwt.as_deref()
    }

    pub async fn authenticate_with_api_key(
        &mut self,
        api_key: &str,
        api_secret: &str,
    ) -> Result<(), AuthError> {
        let data: ApiKeyData = self
            .graphql(
                AUTHENTICATE_WITH_API_KEY,
                json!({ "apiKey": api_key, "apiSecret": api_secret }),
            )
            .await?;
        self.jwt = Some(data.authenticate_with_api_key.token);
        Ok(())
    }

    pub async fn authenticate_with_github_token(
        &mut self,
        username: &str,
        access_token: &str,
    ) -> Result<(), AuthError> {
        let data: GithubTokenData = self
            .graphql(
                AUTHENTICATE_WITH_GITHUB_TOKEN,
                json!({ "username": username, "accessToken": access_token }),
            )
            .await?;
        self.jwt = Some(data.authenticate_with_github_token.token);
        Ok(())
    }

    pub async fn create_handshake_token(&self) -> Result<String, AuthError> {
        let data: HandshakeData = self.graphql(CREATE_HANDSHAKE_TOKEN, json!({})).await?;
        Ok(data.create_web_socket_handshake_token)
    }

    pub async fn me(&self) -> Result<Option<UserProfile>, AuthError> {
        let data: MeData = self.graphql(ME, json!({})).await?;
        Ok(data.me)
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, AuthError> {
        let url = format!("{}/graphql", self.api_url);
        debug!("POST {}", url);

        let mut request = self
            .http
            .post(&url)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(jwt) = &self.jwt {
            request = request.bearer_auth(jwt);
        }

        let response = request.send().await?;
        let status = response.status();
        let body: GraphQlResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Unreadable API response ({}): {}", status, e);
                return Err(AuthError::Http(e));
            }
        };
        into_data(body)
    }
}

impl Authenticator for ApiClient {
    fn is_authenticated(&self) -> bool {
        self.jwt.is_some()
    }

    async fn authenticate(&mut self, api_key: &str, api_secret: &str) -> Result<(), AuthError> {
        self.authenticate_with_api_key(api_key, api_secret).await
    }

    async fn handshake_token(&self) -> Result<String, AuthError> {
        self.create_handshake_token().await
    }

    async fn current_user(&self) -> Result<Option<UserProfile>, AuthError> {
        self.me().await
    }
}

fn into_data<T>(body: GraphQlResponse<T>) -> Result<T, AuthError> {
    if !body.errors.is_empty() {
        if body
            .errors
            .iter()
            .any(|error| error.message.contains("jwt expired"))
        {
            warn!("API token expired");
            return Err(AuthError::TokenExpired);
        }
        return Err(AuthError::GraphQl {
            messages: body.errors.into_iter().map(|error| error.message).collect(),
        });
    }
    body.data.ok_or(AuthError::MissingData("data"))
}
