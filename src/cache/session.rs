//! Nextcloud session and HTTP gateway
//!
//! A [`Session`] holds the account coordinates (server, user, app password);
//! [`HttpGateway`] turns gateway calls into authenticated JSON requests
//! against the Passwords API of that server.

use anyhow::Context;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::document::Document;
use super::entity::SyncContext;
use super::error::{CacheError, TransportError, TransportResult};
use super::gateway::{Method, RemoteGateway};
use super::CacheConfig;

/// Account coordinates for one Nextcloud user
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    username: String,
    server: String,
    #[serde(skip_serializing, default)]
    app_password: String,
}

impl Session {
    /// Session for `username` on `server`.
    ///
    /// `server` is a host (`cloud.example.com`), optionally with a path or an
    /// explicit `http://`/`https://` scheme. Plain hosts are reached over
    /// HTTPS.
    pub fn new(username: &str, server: &str, app_password: &str) -> Self {
        Self {
            username: username.to_string(),
            server: server.trim_end_matches('/').to_string(),
            app_password: app_password.to_string(),
        }
    }

    /// Session from a federated cloud id (`alice@cloud.example.com`).
    ///
    /// The id is split at its last `@`, so user names that are themselves
    /// e-mail addresses work.
    pub fn from_federated_id(federated_id: &str, app_password: &str) -> Result<Self, CacheError> {
        match federated_id.rsplit_once('@') {
            Some((username, server)) if !username.is_empty() && !server.is_empty() => {
                Ok(Self::new(username, server, app_password))
            }
            _ => Err(CacheError::Config(format!(
                "'{federated_id}' is not a federated cloud id (user@server)"
            ))),
        }
    }

    /// Account user name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Server as configured
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Root of the Passwords API, with a trailing slash
    pub fn api_url(&self) -> String {
        let base = if self.server.starts_with("http://") || self.server.starts_with("https://") {
            self.server.clone()
        } else {
            format!("https://{}", self.server)
        };
        format!("{}/apps/passwords/api/{}/", base, crate::API_VERSION)
    }

    /// Full URL of an API action (`password/show`)
    pub fn endpoint(&self, action: &str) -> String {
        format!("{}{}", self.api_url(), action.trim_start_matches('/'))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("server", &self.server)
            .field("app_password", &"<redacted>")
            .finish()
    }
}

/// Gateway speaking JSON over HTTPS with basic authentication
pub struct HttpGateway {
    session: Session,
    client: Client,
}

impl HttpGateway {
    /// Build a gateway for `session`.
    pub fn new(session: Session, config: &CacheConfig) -> TransportResult<Self> {
        let client = build_client(config)?;
        Ok(Self { session, client })
    }

    /// Session this gateway authenticates as
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl SyncContext {
    /// Context reaching `session` over HTTP, on the process-wide registry.
    ///
    /// Tuning comes from the settings file at `settings`; defaults apply when
    /// the file does not exist.
    pub fn connect(session: Session, settings: &Path) -> anyhow::Result<Arc<Self>> {
        let config = CacheConfig::load_or_default(settings)?;
        let gateway = HttpGateway::new(session, &config)
            .with_context(|| format!("building HTTP client for {}", settings.display()))?;

        tracing::info!(
            user = gateway.session().username(),
            server = gateway.session().server(),
            "session ready"
        );
        Ok(Self::with_config(Arc::new(gateway), config))
    }
}

impl fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("session", &self.session)
            .finish()
    }
}

impl RemoteGateway for HttpGateway {
    fn call(&self, method: Method, action: &str, body: &Document) -> TransportResult<Value> {
        let url = self.session.endpoint(action);
        let mut request = self
            .client
            .request(method.into(), &url)
            .basic_auth(&self.session.username, Some(&self.session.app_password));
        if method != Method::Get {
            request = request.json(body);
        }

        let response = request.send()?;
        let status = response.status();
        tracing::debug!(%method, %url, status = status.as_u16(), "api call");

        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text()?;
        serde_json::from_str(&text)
            .map_err(|err| TransportError::Decode(format!("response from {url}: {err}")))
    }
}

fn build_client(config: &CacheConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.request_timeout())
        .user_agent(config.user_agent.as_str())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_defaults_to_https() {
        let session = Session::new("alice", "cloud.example.com/", "pw");
        assert_eq!(
            session.api_url(),
            "https://cloud.example.com/apps/passwords/api/1.0/"
        );
        assert_eq!(
            session.endpoint("password/show"),
            "https://cloud.example.com/apps/passwords/api/1.0/password/show"
        );
    }

    #[test]
    fn test_explicit_scheme_is_kept() {
        let session = Session::new("alice", "http://127.0.0.1:8080", "pw");
        assert_eq!(
            session.api_url(),
            "http://127.0.0.1:8080/apps/passwords/api/1.0/"
        );
    }

    #[test]
    fn test_federated_id_split() {
        let session = Session::from_federated_id("alice@cloud.example.com", "pw").unwrap();
        assert_eq!(session.username(), "alice");
        assert_eq!(session.server(), "cloud.example.com");

        let session = Session::from_federated_id("alice@mail.org@cloud.example.com", "pw").unwrap();
        assert_eq!(session.username(), "alice@mail.org");

        assert!(Session::from_federated_id("no-at-sign", "pw").is_err());
        assert!(Session::from_federated_id("@cloud", "pw").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let session = Session::new("alice", "cloud", "secret-app-password");
        let printed = format!("{session:?}");
        assert!(!printed.contains("secret-app-password"));
    }
}
