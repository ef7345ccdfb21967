//! Credential management
//!
//! The realtime channel authenticates with a bearer token carried in the
//! endpoint address. This module provides:
//! - [`AuthTokenProvider`]: cache + refresh + verify with single-flight resolution
//! - [`AuthBackend`]: the collaborator contract the provider drives
//! - [`StaticAuth`] and [`HttpAuthBackend`]: stock backends

mod backends;
mod credential;
mod provider;

pub use backends::*;
pub use credential::*;
pub use provider::*;
