//! `auth` subcommands.

use super::Session;
use crate::output::{
    format_remaining, format_time, print_divider, print_heading, print_row, print_success,
};
use anyhow::{Result, bail};
use chrono::Utc;
use o365mail_core::{AuthStatus, DisplayInfo, Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often a waiting login reminds the user how long the code lasts.
const REMINDER_INTERVAL: Duration = Duration::from_secs(30);

/// What `auth token` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFormat {
    /// The access token.
    Bare,
    /// `Authorization: Bearer <token>`.
    Header,
    /// Base64 XOAUTH2 initial response.
    Sasl,
}

fn print_device_code(info: &DisplayInfo) {
    println!();
    print_divider();
    println!("  To sign in, open this page in a browser:");
    println!();
    println!("    {}", info.verification_url);
    println!();
    println!("  and enter the code:");
    println!();
    println!("    {}", info.user_code);
    println!();
    let lifetime =
        chrono::Duration::from_std(info.expires_in).unwrap_or_else(|_| chrono::Duration::zero());
    println!("  The code expires in {}.", format_remaining(lifetime));
    print_divider();
    println!();
}

/// Sign in with a device code and make the account active.
pub async fn login(session: &Session, open: bool, timeout: Option<u64>) -> Result<()> {
    let ctx = session.auth()?;
    let (info, pending) = ctx.authenticator().start(&[]).await?;
    print_device_code(&info);

    if open {
        if let Err(e) = opener::open(&info.verification_url) {
            warn!(error = %e, "Could not open a browser");
        }
    }

    println!("Waiting for browser login...");
    let expires_at = info.expires_at;
    let wait = async move {
        match timeout {
            Some(secs) => pending.wait_timeout(Duration::from_secs(secs)).await,
            None => pending.wait().await,
        }
    };
    tokio::pin!(wait);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut reminder = tokio::time::interval(REMINDER_INTERVAL);
    reminder.tick().await;

    let result = loop {
        tokio::select! {
            outcome = &mut wait => break outcome?,
            _ = &mut ctrl_c => {
                debug!("Login interrupted");
                return Err(Error::LoginAborted.into());
            }
            _ = reminder.tick() => {
                println!(
                    "  Still waiting; the code expires in {}.",
                    format_remaining(expires_at - Utc::now())
                );
            }
        }
    };

    let email = result.username().to_string();
    session.registry()?.add(&email)?;
    session.update_config(|c| c.set("current_account", &email))?;

    println!();
    print_success(&format!("Successfully logged in as {email}"));
    print_row("Token valid until", &format_time(result.token.expires_at));
    print_row("Token saved in", &ctx.store().path().display().to_string());
    println!("Account set as active account.");
    Ok(())
}

/// Sign out one account, or every account with `all`.
pub fn logout(session: &Session, email: Option<String>, all: bool) -> Result<()> {
    let ctx = session.auth()?;
    let manager = ctx.manager();
    let mut registry = session.registry()?;

    if all {
        let count = manager.logout_all()?;
        registry.clear()?;
        session.update_config(|c| {
            c.current_account.clear();
            Ok(())
        })?;
        print_success(&format!("Logged out of {count} account(s)."));
        return Ok(());
    }

    let Some(email) = email.or_else(|| session.active_account(&registry)) else {
        print_success("No account to logout.");
        return Ok(());
    };

    match manager.logout(&email) {
        Ok(()) => {}
        Err(Error::AccountNotFound(_)) => {
            registry.remove(&email)?;
            print_success(&format!("Account {email} is not logged in."));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    registry.remove(&email)?;
    print_success(&format!("Logged out {email}."));

    let next = registry.first().map(ToString::to_string);
    let mut switched = None;
    session.update_config(|c| {
        if c.current_account.eq_ignore_ascii_case(&email) {
            c.current_account = next.clone().unwrap_or_default();
            switched = Some(next);
        }
        Ok(())
    })?;
    if let Some(Some(next)) = switched {
        println!("Active account switched to {next}.");
    }
    Ok(())
}

fn describe(status: &AuthStatus) -> String {
    match status {
        AuthStatus::NotLoggedIn => "(not logged in)".to_string(),
        AuthStatus::Valid { expires_at, .. } => format!(
            "(valid, {} remaining)",
            format_remaining(*expires_at - Utc::now())
        ),
        AuthStatus::Expired { cause, .. } => format!("(token expired: {cause})"),
    }
}

/// Show the sign-in state of every cached account.
pub async fn status(session: &Session, verbose: bool) -> Result<()> {
    let ctx = session.auth()?;
    let manager = ctx.manager();
    let registry = session.registry()?;
    let active = session.active_account(&registry);

    print_heading("Auth Status");
    let statuses = manager.all_statuses().await?;
    if statuses.is_empty() {
        println!("  Not logged in. Run `o365mail auth login` to sign in.");
    } else {
        for status in &statuses {
            let account = status.account().unwrap_or_default();
            let marker = if active
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(account))
            {
                "* "
            } else {
                "  "
            };
            println!("{marker}{account} {}", describe(status));
        }
        println!();
        println!("* = active account");
    }

    if verbose {
        let detail = manager
            .detailed_status(active.as_deref().unwrap_or_default())
            .await;
        print_heading("Token Diagnostics");
        print_row("Account", &detail.account);
        print_row("Token file", &detail.cache_file.display().to_string());
        print_row(
            "File size",
            &detail
                .cache_size
                .map_or_else(|| "missing".to_string(), |s| format!("{s} bytes")),
        );
        print_row("Cached token", &detail.has_cached_token.to_string());
        print_row("Cached accounts", &detail.cached_accounts.to_string());
        print_row("Account found", &detail.found.to_string());
        print_row("Refresh token", &detail.refresh_present.to_string());
        print_row("Silent refresh", &detail.silent_refresh_ok.to_string());
        if let Some(expiry) = detail.access_expiry {
            print_row("Access expires", &format_time(expiry));
        }
        if let Some(error) = &detail.last_error {
            print_row("Last error", error);
        }
    }
    Ok(())
}

/// List registered accounts.
pub fn list(session: &Session) -> Result<()> {
    let registry = session.registry()?;
    let active = session.active_account(&registry);

    print_heading("Logged-in Accounts");
    if registry.accounts().is_empty() {
        println!("  No accounts. Run `o365mail auth login` to add one.");
        return Ok(());
    }
    for account in registry.accounts() {
        let marker = if active
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(&account.email))
        {
            "* "
        } else {
            "  "
        };
        let alias = account
            .alias
            .as_deref()
            .map(|a| format!(" [{a}]"))
            .unwrap_or_default();
        println!(
            "{marker}{}{alias} (added: {})",
            account.email,
            account
                .added_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Make a registered account the active one.
pub fn switch(session: &Session, email: &str) -> Result<()> {
    let registry = session.registry()?;
    let Some(account) = registry.get(email) else {
        bail!("account {email} not found. Use 'o365mail auth list' to see logged-in accounts");
    };
    let email = account.email.clone();
    session.update_config(|c| c.set("current_account", &email))?;
    print_success(&format!("Switched to {email}."));
    Ok(())
}

/// Print a token for the active account, refreshing it if needed.
pub async fn token(session: &Session, format: TokenFormat) -> Result<()> {
    let ctx = session.auth()?;
    let registry = session.registry()?;
    let account = session.active_account(&registry).unwrap_or_default();

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let outcome = ctx
        .manager()
        .get_access_token_with_cancel(&account, &cancel)
        .await;
    interrupt.abort();
    let token = outcome?;
    debug!(account = %token.account, remaining = %format_remaining(token.remaining()), "Token ready");

    let credentials = token.credentials();
    match format {
        TokenFormat::Bare => println!("{}", credentials.access_token()),
        TokenFormat::Header => println!("Authorization: {}", credentials.authorization_header()),
        TokenFormat::Sasl => println!("{}", credentials.sasl_line()),
    }
    Ok(())
}
