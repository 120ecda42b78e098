//! # o365mail-core
//!
//! Token lifecycle for the `o365mail` command-line client.
//!
//! This crate provides:
//! - **Token store** - the token cache blob on disk, owner-only, written atomically
//! - **Device-code sign-in** - starts the flow and waits for the user in the background
//! - **Token manager** - silent access tokens, status and logout for many accounts
//! - **Backend credentials** - XOAUTH2 for IMAP/SMTP, bearer headers for REST
//! - **Configuration** - `config.toml` with `O365_*` environment overrides
//! - **Account registry** - the local list of signed-in accounts

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod backend;
pub mod config;
mod error;
mod fs;
pub mod registry;

pub use auth::{
    AccessToken, AuthContext, AuthResult, AuthStatus, DetailedAuthStatus,
    DeviceCodeAuthenticator, DisplayInfo, PendingAuthentication, PendingState, TokenManager,
    TokenStore,
};
pub use backend::{BackendKind, BearerCredentials, SaslAuthenticate, ServerEndpoints};
pub use config::Config;
pub use error::{Error, Remediation, Result};
pub use registry::{AccountRegistry, RegisteredAccount};
