//! Realtime endpoint resolution
//!
//! Builds `ws://`/`wss://` addresses for a channel, optionally qualified by
//! the scope the channel belongs to, and validates them before use.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::auth::Credential;
use crate::error::{Error, Result};

/// Query parameter carrying the credential
pub const TOKEN_PARAM: &str = "token";

/// Endpoint resolver configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Origin the client is served from (`https://...` selects `wss`)
    pub origin: String,

    /// Host override (`host[:port]`); defaults to the origin's host
    pub host: Option<String>,

    /// Path prefix for realtime routes
    pub path_prefix: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            origin: "https://chat.example.com".to_string(),
            host: None,
            path_prefix: "/ws".to_string(),
        }
    }
}

/// Which route shape was chosen for a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `{prefix}/scopes/{scope}/channels/{channel}`
    Scoped { scope_id: String },
    /// `{prefix}/channels/{channel}`
    Standalone,
}

/// Builds and validates realtime endpoint addresses
pub struct EndpointResolver {
    config: EndpointConfig,
    /// Last known scope of each channel
    bindings: RwLock<HashMap<String, String>>,
}

impl EndpointResolver {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Record the scope a channel belongs to
    pub fn bind_channel(&self, channel_id: impl Into<String>, scope_id: impl Into<String>) {
        self.bindings.write().insert(channel_id.into(), scope_id.into());
    }

    /// Last known scope of a channel
    pub fn known_scope(&self, channel_id: &str) -> Option<String> {
        self.bindings.read().get(channel_id).cloned()
    }

    /// Wire scheme derived from the origin's transport security
    pub fn scheme(&self) -> &'static str {
        if self.config.origin.trim_start().to_ascii_lowercase().starts_with("https:") {
            "wss"
        } else {
            "ws"
        }
    }

    /// Decide between a scope-qualified and a standalone route.
    ///
    /// A selected scope that disagrees with the channel's known scope only
    /// drops the qualification; it never blocks the connection.
    pub fn route(&self, scope_id: Option<&str>, channel_id: &str) -> Route {
        let Some(scope) = scope_id.filter(|s| !s.is_empty()) else {
            return Route::Standalone;
        };

        match self.known_scope(channel_id) {
            Some(bound) if bound != scope => {
                warn!(
                    channel_id = %channel_id,
                    selected_scope = %scope,
                    bound_scope = %bound,
                    "Selected scope does not match channel scope, using standalone route"
                );
                Route::Standalone
            }
            _ => Route::Scoped {
                scope_id: scope.to_string(),
            },
        }
    }

    /// Build the address for a channel and validate it
    pub fn resolve(
        &self,
        scope_id: Option<&str>,
        channel_id: &str,
        credential: &Credential,
    ) -> Result<Url> {
        if channel_id.trim().is_empty() {
            return Err(Error::invalid_endpoint(channel_id, "channel id is empty"));
        }

        let host = self.host()?;
        let base = format!("{}://{}", self.scheme(), host);
        let mut url = Url::parse(&base)
            .map_err(|e| Error::invalid_endpoint(&base, e.to_string()))?;

        let route = self.route(scope_id, channel_id);
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::invalid_endpoint(&base, "address cannot carry a path"))?;
            segments.clear();
            for part in self.config.path_prefix.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
            if let Route::Scoped { ref scope_id } = route {
                segments.push("scopes").push(scope_id);
            }
            segments.push("channels").push(channel_id);
        }

        url.query_pairs_mut()
            .append_pair(TOKEN_PARAM, credential.token());

        validate_endpoint(&url)?;
        debug!(channel_id = %channel_id, route = ?route, "Resolved realtime endpoint");
        Ok(url)
    }

    /// Host (and port) the realtime channel connects to
    fn host(&self) -> Result<String> {
        if let Some(ref host) = self.config.host {
            if host.trim().is_empty() {
                return Err(Error::invalid_endpoint(host, "host override is empty"));
            }
            return Ok(host.trim().to_string());
        }

        let origin = Url::parse(&self.config.origin)
            .map_err(|e| Error::invalid_endpoint(&self.config.origin, e.to_string()))?;
        let host = origin
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid_endpoint(&self.config.origin, "origin has no host"))?;

        Ok(match origin.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

/// Validate a realtime address.
///
/// Runs when the address is built and again right before every physical
/// connection attempt.
pub fn validate_endpoint(url: &Url) -> Result<()> {
    let fail = |reason: &str| Err(Error::invalid_endpoint(redact(url), reason));

    if !matches!(url.scheme(), "ws" | "wss") {
        return fail("scheme must be ws or wss");
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => {
            if host.contains('@') {
                return fail("host must not embed credentials");
            }
        }
        _ => return fail("host is empty"),
    }
    if !url.username().is_empty() || url.password().is_some() {
        return fail("credentials must not appear in user-info");
    }
    if !url.path().starts_with('/') {
        return fail("path must be absolute");
    }
    Ok(())
}

/// Address with the credential removed, safe for logs and errors
pub fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == TOKEN_PARAM { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(pairs);
    }
    let _ = clean.set_password(None);
    let _ = clean.set_username("");
    clean.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(origin: &str) -> EndpointResolver {
        EndpointResolver::new(EndpointConfig {
            origin: origin.to_string(),
            ..Default::default()
        })
    }

    fn token() -> Credential {
        Credential::new("tok en/1")
    }

    #[test]
    fn test_scheme_follows_origin_security() {
        assert_eq!(resolver("https://chat.example.com").scheme(), "wss");
        assert_eq!(resolver("http://localhost:3000").scheme(), "ws");
    }

    #[test]
    fn test_standalone_route_without_scope() {
        let url = resolver("https://chat.example.com")
            .resolve(None, "c1", &token())
            .unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("chat.example.com"));
        assert_eq!(url.path(), "/ws/channels/c1");
    }

    #[test]
    fn test_scoped_route_when_consistent() {
        let r = resolver("http://localhost:3000");
        r.bind_channel("c1", "p9");
        let url = r.resolve(Some("p9"), "c1", &token()).unwrap();
        assert_eq!(url.as_str().split('?').next().unwrap(), "ws://localhost:3000/ws/scopes/p9/channels/c1");
    }

    #[test]
    fn test_scoped_route_when_channel_scope_unknown() {
        let r = resolver("https://chat.example.com");
        assert_eq!(r.route(Some("p1"), "c1"), Route::Scoped { scope_id: "p1".into() });
    }

    #[test]
    fn test_inconsistent_scope_falls_back_to_standalone() {
        let r = resolver("https://chat.example.com");
        r.bind_channel("c1", "p1");
        let url = r.resolve(Some("p2"), "c1", &token()).unwrap();
        assert_eq!(url.path(), "/ws/channels/c1");
    }

    #[test]
    fn test_credential_is_a_query_parameter() {
        let url = resolver("https://chat.example.com")
            .resolve(None, "c1", &token())
            .unwrap();
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "token");
        assert_eq!(pairs[0].1, "tok en/1");
        assert!(url.username().is_empty());
    }

    #[test]
    fn test_ids_are_percent_encoded() {
        let url = resolver("https://chat.example.com")
            .resolve(None, "a/b c", &token())
            .unwrap();
        assert_eq!(url.path(), "/ws/channels/a%2Fb%20c");
    }

    #[test]
    fn test_host_override() {
        let r = EndpointResolver::new(EndpointConfig {
            origin: "https://app.example.com".into(),
            host: Some("rt.example.com:8443".into()),
            path_prefix: "".into(),
        });
        let url = r.resolve(None, "c1", &token()).unwrap();
        assert_eq!(url.host_str(), Some("rt.example.com"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/channels/c1");
    }

    #[test]
    fn test_empty_channel_rejected() {
        let err = resolver("https://chat.example.com")
            .resolve(None, " ", &token())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_user_info_in_host_rejected() {
        let r = EndpointResolver::new(EndpointConfig {
            host: Some("user:pw@evil.example.com".into()),
            ..Default::default()
        });
        let err = r.resolve(None, "c1", &token()).unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_validate_endpoint_rules() {
        assert!(validate_endpoint(&Url::parse("wss://h/ws/channels/c").unwrap()).is_ok());
        assert!(validate_endpoint(&Url::parse("https://h/ws").unwrap()).is_err());
        assert!(validate_endpoint(&Url::parse("ws://u:p@h/ws").unwrap()).is_err());
    }

    #[test]
    fn test_redact_hides_token() {
        let url = Url::parse("wss://h/ws/channels/c?token=secret").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("token=***"));
    }
}
