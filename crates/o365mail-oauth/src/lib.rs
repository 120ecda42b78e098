//! # o365mail-oauth
//!
//! `OAuth2` authentication library for mail protocols (IMAP/SMTP) and the
//! Microsoft Graph mail API.
//!
//! ## Features
//!
//! - **Device Flow**: RFC 8628 device authorization against the Microsoft identity platform
//! - **Token cache**: multi-account cache with silent refresh, persisted through
//!   pluggable export/replace hooks
//! - **SASL mechanisms**: XOAUTH2 (Microsoft/Google) and OAUTHBEARER (RFC 7628)
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use o365mail_oauth::{OAuthClient, Provider, PublicClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::microsoft()?;
//!     let environment = provider.environment();
//!     let scopes = provider.default_scopes.clone();
//!     let idp = Arc::new(OAuthClient::new("your_client_id", provider));
//!     let app = PublicClient::new(idp, environment, scopes);
//!
//!     let code = app.acquire_token_by_device_code(&[]).await?;
//!     println!("Visit {} and enter {}", code.result.verification_uri, code.result.user_code);
//!
//!     let result = code.authentication_result().await?;
//!     println!("Signed in as {}", result.account.preferred_username);
//!
//!     // Later: no user interaction, refreshes when needed.
//!     let again = app.acquire_token_silent(&result.account).await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Using with IMAP/SMTP
//!
//! ```ignore
//! use o365mail_oauth::sasl::{SaslMechanism, XOAuth2};
//!
//! let mechanism = XOAuth2::new("user@contoso.com", &result.access_token);
//! // AUTHENTICATE XOAUTH2 <base64(mechanism.initial_response())>
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cache;
mod client;
mod error;
pub mod flow;
pub mod provider;
pub mod sasl;
pub mod token;

pub use cache::{Account, CacheAccessor, CacheMarshaler, CacheUnmarshaler, TokenCache};
pub use client::{AuthenticationResult, DeviceCode, DeviceCodeResult, PublicClient};
pub use error::{Error, Result};
pub use flow::{DeviceAuthorization, IdentityProvider, OAuthClient};
pub use provider::Provider;
pub use token::IdTokenClaims;
