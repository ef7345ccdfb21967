//! chatlink - resilient realtime transport for chat backends
//!
//! Keeps one logical conversation channel alive over a WebSocket: exponential
//! backoff reconnection, heartbeat liveness probing, request/response
//! correlation on top of a fire-and-forget socket, and a transparent switch to
//! an HTTP fallback when the realtime channel cannot be sustained.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatlink::{AuthTokenProvider, ConnectionManager, EndpointConfig, StaticAuth};
//!
//! # async fn demo() -> chatlink::Result<()> {
//! let auth = Arc::new(AuthTokenProvider::new(Arc::new(StaticAuth::new(Some("tok".into())))));
//! let manager = ConnectionManager::builder()
//!     .endpoint(EndpointConfig {
//!         origin: "https://chat.example.com".into(),
//!         ..Default::default()
//!     })
//!     .auth(auth)
//!     .build()?;
//!
//! manager.connect("c1").await?;
//! let reply = manager.send(serde_json::json!({ "type": "message", "text": "hi" })).await?;
//! println!("{}", reply);
//! manager.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod endpoint;
pub mod error;
pub mod fallback;
pub mod heartbeat;
pub mod logging;
pub mod protocol;
pub mod reconnect;
pub mod scope;
pub mod version;

pub use auth::{AuthBackend, AuthTokenProvider, Credential, HttpAuthBackend, StaticAuth};
pub use config::LinkConfig;
pub use connection::{
    ConnectionConfig, ConnectionHandler, ConnectionManager, ConnectionState, Connector, LinkMode, Session,
    WsConnector,
};
pub use endpoint::{EndpointConfig, EndpointResolver};
pub use error::{Error, ErrorCode, Result};
pub use fallback::{DisabledFallback, FallbackTransport, HttpFallback};
pub use scope::{FileScopeStore, MemoryScopeStore, ScopeStore};
