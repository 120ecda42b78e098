//! Example: device code sign-in against Microsoft 365, then XOAUTH2.
//!
//! Signs in with the device authorization grant, fetches the token a second
//! time from the in-memory cache, and prints the IMAP `AUTHENTICATE` line.
//!
//! ## Running
//!
//! ```bash
//! export O365_CLIENT_ID="your-client-id-here"
//! cargo run --example device_login
//! ```

use o365mail_oauth::provider::OUTLOOK_PROTOCOL_SCOPES;
use o365mail_oauth::sasl::xoauth2_response;
use o365mail_oauth::{OAuthClient, Provider, PublicClient};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_id = env::var("O365_CLIENT_ID")?;

    let provider = Provider::microsoft_tenant("common")?;
    let environment = provider.environment();
    let scopes = OUTLOOK_PROTOCOL_SCOPES.iter().map(ToString::to_string).collect();
    let idp = Arc::new(OAuthClient::new(&client_id, provider));
    let app = PublicClient::new(idp, environment, scopes);

    let code = app.acquire_token_by_device_code(&[]).await?;
    if code.result.message.is_empty() {
        println!(
            "Open {} and enter the code {}",
            code.result.verification_uri, code.result.user_code
        );
    } else {
        println!("{}", code.result.message);
    }

    let result = code.authentication_result().await?;
    println!("Signed in as {}", result.account.preferred_username);
    println!("Token valid until {}", result.expires_on);

    // Served from the cache, no network round trip.
    let again = app.acquire_token_silent(&result.account).await?;
    let line = xoauth2_response(&again.account.preferred_username, &again.access_token);
    println!("A1 AUTHENTICATE XOAUTH2 {line}");

    Ok(())
}
