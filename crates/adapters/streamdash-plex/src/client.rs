use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use streamdash_core::merge::ServerState;
use streamdash_core::payload::{as_list, str_field};
use streamdash_core::session::{SessionContext, parse_sessions};
use streamdash_core::snapshot::SessionSource;

use crate::config::PlexClientConfig;
use crate::error::FetchError;
use crate::library;

/// A registered Plex server as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlexServerRecord {
    pub id: i64,
    pub name: String,
    /// Identifier the directory API knows the server by.
    pub machine_id: String,
    /// Direct connection URL.
    pub url: String,
    /// Preferred gateway URL, tried before `url`.
    pub gateway_url: Option<String>,
    pub token: String,
}

/// Shared users and pending invites reported by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryUsers {
    pub shared_users: Vec<String>,
    pub pending_invites: Vec<String>,
}

/// Fetches one server's live state from the directory and the server.
#[derive(Debug, Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    config: PlexClientConfig,
}

impl ServerClient {
    pub fn new(config: PlexClientConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &PlexClientConfig {
        &self.config
    }

    /// Fetch shared users, pending invites, sessions and libraries for one
    /// server. Never fails: the server is reported offline when neither
    /// session path answers. Directory users still count in that case.
    pub async fn fetch_server_state(&self, server: &PlexServerRecord) -> ServerState {
        let (directory, sessions) =
            tokio::join!(self.fetch_directory(server), self.fetch_sessions(server));

        let (source, base, payload) = match sessions {
            Ok(found) => found,
            Err(session_err) => return degraded_state(server, session_err, directory),
        };

        let ctx = SessionContext {
            server_id: server.id,
            server_name: &server.name,
            base_url: base,
            token: &server.token,
        };
        let sessions = parse_sessions(&payload, &ctx);
        let libraries = library::fetch_libraries(self, &server.name, base, &server.token).await;

        let (users, error) = match directory {
            Ok(users) => (users, None),
            Err(e) => {
                tracing::warn!(server = %server.name, error = %e, "Directory lookup failed");
                (DirectoryUsers::default(), Some(format!("directory: {e}")))
            },
        };

        tracing::debug!(
            server = %server.name,
            source = ?source,
            sessions = sessions.len(),
            libraries = libraries.len(),
            "Fetched server state"
        );

        ServerState {
            server_id: server.id,
            name: server.name.clone(),
            online: true,
            shared_users: users.shared_users,
            pending_invites: users.pending_invites,
            sessions,
            libraries,
            session_source: Some(source),
            error,
        }
    }

    /// Try the gateway first, then the direct URL. Returns which path
    /// answered along with its base URL.
    async fn fetch_sessions<'a>(
        &self,
        server: &'a PlexServerRecord,
    ) -> Result<(SessionSource, &'a str, Value), FetchError> {
        if let Some(gateway) = server.gateway_url.as_deref().filter(|g| !g.trim().is_empty()) {
            match self
                .get_json(gateway, "/status/sessions", &server.token, &[], self.config.gateway_timeout())
                .await
            {
                Ok(payload) => return Ok((SessionSource::Gateway, gateway, payload)),
                Err(e) => tracing::info!(
                    server = %server.name,
                    error = %e,
                    "Gateway session fetch failed, falling back to direct"
                ),
            }
        }
        let payload = self
            .get_json(&server.url, "/status/sessions", &server.token, &[], self.config.direct_timeout())
            .await?;
        Ok((SessionSource::Direct, server.url.as_str(), payload))
    }

    async fn fetch_directory(&self, server: &PlexServerRecord) -> Result<DirectoryUsers, FetchError> {
        let base = self
            .config
            .directory_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(FetchError::NotConfigured("directory_url"))?;
        if server.machine_id.trim().is_empty() {
            return Err(FetchError::NotConfigured("machine_id"));
        }
        let path = format!("/api/servers/{}/shared_servers", server.machine_id);
        let payload = self
            .get_json(base, &path, &server.token, &[], self.config.directory_timeout())
            .await?;
        Ok(parse_shared_servers(&payload))
    }

    /// GET `{base}{path}` as JSON with the token as a query parameter.
    pub(crate) async fn get_json(
        &self,
        base: &str,
        path: &str,
        token: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let url = format!("{}{path}", base.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .query(&[("X-Plex-Token", token)])
            .query(query)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        resp.json().await.map_err(|e| FetchError::from_reqwest(&url, e))
    }
}

/// State for a server whose session paths both failed. The server is
/// offline; whatever the directory reported is kept for the user tallies.
fn degraded_state(
    server: &PlexServerRecord,
    session_err: FetchError,
    directory: Result<DirectoryUsers, FetchError>,
) -> ServerState {
    match directory {
        Ok(users) => {
            tracing::warn!(
                server = %server.name,
                error = %session_err,
                "Session paths failed, marking offline"
            );
            ServerState {
                shared_users: users.shared_users,
                pending_invites: users.pending_invites,
                ..ServerState::offline(server.id, &server.name, format!("sessions: {session_err}"))
            }
        },
        Err(directory_err) => {
            tracing::warn!(
                server = %server.name,
                sessions = %session_err,
                directory = %directory_err,
                "Server unreachable on every path, marking offline"
            );
            ServerState::offline(
                server.id,
                &server.name,
                format!("sessions: {session_err}; directory: {directory_err}"),
            )
        },
    }
}

/// Split a `shared_servers` payload into accepted users and pending
/// invites. Entries with `acceptedAt` are users; entries with only
/// `invitedAt` are invites. Identities are lowercased emails, falling back
/// to the username.
pub fn parse_shared_servers(payload: &Value) -> DirectoryUsers {
    let container = payload.get("MediaContainer").unwrap_or(payload);
    let mut users = DirectoryUsers::default();
    for entry in as_list(container.get("SharedServer")) {
        let Some(identity) = str_field(entry, "email").or_else(|| str_field(entry, "username")) else {
            continue;
        };
        let identity = identity.trim().to_lowercase();
        if str_field(entry, "acceptedAt").is_some() {
            users.shared_users.push(identity);
        } else if str_field(entry, "invitedAt").is_some() {
            users.pending_invites.push(identity);
        }
    }
    users
}
