use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, Response};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{ServerConfig, HTTP_TIMEOUT_SECS};
use crate::error::{LoadCtlError, Result};

/// Authenticated gateway to the load-testing service.
///
/// Owns the session/token state and re-authenticates on demand. Two auth
/// modes, selected by the username shape: OAuth client credentials yield a
/// bearer token, anything else a session cookie. Dropping the client
/// releases the underlying connection pool.
pub struct ApiClient {
    http: reqwest::Client,
    config: ServerConfig,
    base: Url,
    auth: Mutex<AuthState>,
}

#[derive(Default)]
struct AuthState {
    session_cookie: Option<String>,
    bearer_token: Option<String>,
}

/// OAuth client ids have a recognizable shape; everything else is treated
/// as a plain username.
pub fn is_oauth_client_id(username: &str) -> bool {
    username.len() >= 42 && username.starts_with("oauth2-") && username.contains('@')
}

impl ApiClient {
    /// Build the transport and log in. Errors here are configuration
    /// errors: the operator has to fix the URL, proxy, or credentials.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let base = Url::parse(&format!("{}/", config.url))
            .map_err(|e| LoadCtlError::Configuration(format!("invalid url {}: {e}", config.url)))?;

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(HTTP_TIMEOUT_SECS));

        if let Some(proxy_config) = &config.proxy {
            let mut proxy = reqwest::Proxy::all(&proxy_config.url).map_err(|e| {
                LoadCtlError::Configuration(format!(
                    "invalid proxy {}: {e}",
                    proxy_config.url
                ))
            })?;
            if let (Some(user), Some(pass)) = (&proxy_config.username, &proxy_config.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|e| LoadCtlError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let client = ApiClient {
            http,
            config,
            base,
            auth: Mutex::new(AuthState::default()),
        };
        client.login().await?;

        Ok(client)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Authenticate and store the resulting token. Safe to call again when
    /// the session expires mid-run.
    pub async fn login(&self) -> Result<()> {
        if is_oauth_client_id(&self.config.username) {
            let payload = json!({
                "client_id": self.config.username,
                "client_secret": self.config.password,
            });
            let token = self.request_token("v1/auth-client", &payload).await?;
            self.auth.lock().expect("auth lock").bearer_token = Some(token);
        } else {
            let payload = json!({
                "user": self.config.username,
                "password": self.config.password,
            });
            let token = self.request_token("v1/auth", &payload).await?;
            self.auth.lock().expect("auth lock").session_cookie = Some(token);
        }
        Ok(())
    }

    async fn request_token(&self, path: &str, payload: &serde_json::Value) -> Result<String> {
        let response = self.post(path, &[], payload).await?;
        let status = response.status();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;
        if status.as_u16() != 200 {
            return Err(LoadCtlError::Configuration(format!(
                "login to {} failed: {}, {}",
                self.config.url,
                status.as_u16(),
                body
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|_| {
            LoadCtlError::Protocol(format!("login response is not JSON: {body}"))
        })?;
        parsed
            .get("token")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| {
                LoadCtlError::Protocol(format!("login response has no token: {body}"))
            })
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        self.execute(Method::GET, path, query, None).await
    }

    pub async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
        payload: &serde_json::Value,
    ) -> Result<Response> {
        self.execute(Method::POST, path, query, Some(payload)).await
    }

    pub async fn put(
        &self,
        path: &str,
        query: &[(&str, String)],
        payload: &serde_json::Value,
    ) -> Result<Response> {
        self.execute(Method::PUT, path, query, Some(payload)).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        payload: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let url = self.build_url(path, query)?;
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, url).headers(self.headers());
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        request.send().await.map_err(LoadCtlError::from_transport)
    }

    fn build_url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| LoadCtlError::Configuration(format!("invalid api path {path}: {e}")))?;

        if !self.config.tenant_id.is_empty() || !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            if !self.config.tenant_id.is_empty() {
                pairs.append_pair("projectId", &self.config.project_id.to_string());
                pairs.append_pair("TENANTID", &self.config.tenant_id);
            }
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("cache-control", HeaderValue::from_static("no-cache"));

        let auth = self.auth.lock().expect("auth lock");
        if let Some(cookie) = &auth.session_cookie {
            if let Ok(value) = HeaderValue::from_str(&format!("LWSSO_COOKIE_KEY={cookie}")) {
                headers.insert("Cookie", value);
            }
        }
        if let Some(token) = &auth.bearer_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert("Authorization", value);
            }
        }

        headers
    }
}
