//! o365mail - Office 365 mail from the command line.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::Session;
use o365mail_core::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter.
const LOG_FILTER: &str = "o365mail=warn,o365mail_core=warn,o365mail_oauth=warn";

/// Log filter with `--debug`.
const DEBUG_LOG_FILTER: &str = "o365mail=debug,o365mail_core=debug,o365mail_oauth=debug";

/// Office 365 mail from the command line.
#[derive(Parser)]
#[command(name = "o365mail")]
#[command(about = "Office 365 mail client with device-code sign-in")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Account to act on (defaults to the active account)
    #[arg(short, long, env = "O365_ACCOUNT", global = true)]
    account: Option<String>,

    /// Configuration file (defaults to ~/.o365-mail-cli/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage authentication
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Sign in with a device code
    Login {
        /// Open the verification page in a browser
        #[arg(long)]
        open: bool,
        /// Stop waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Sign out and delete tokens
    Logout {
        /// Account to sign out (defaults to the active account)
        email: Option<String>,
        /// Sign out every account
        #[arg(long, conflicts_with = "email")]
        all: bool,
    },
    /// Show sign-in state of every account
    Status {
        /// Show token diagnostics for the active account
        #[arg(short, long)]
        verbose: bool,
    },
    /// List signed-in accounts
    List,
    /// Change the active account
    Switch {
        /// Account to make active
        email: String,
    },
    /// Print an access token for the active account
    Token {
        /// Print an `Authorization` header instead of the bare token
        #[arg(long, conflicts_with = "sasl")]
        header: bool,
        /// Print the base64 XOAUTH2 initial response instead of the bare token
        #[arg(long)]
        sasl: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Print one value
    Get {
        /// Configuration key
        key: String,
    },
    /// Change one value in the configuration file
    Set {
        /// Configuration key
        key: String,
        /// New value
        value: String,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { DEBUG_LOG_FILTER } else { LOG_FILTER };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(o365mail_core::config::default_config_path);
    let config = match Config::load(Some(config_path.as_path())) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(cli.debug);
            output::print_error(&anyhow::Error::from(e));
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cli.debug || config.debug);
    debug!(path = %config_path.display(), "Configuration loaded");

    let session = Session::new(config, config_path, cli.account);
    match run(cli.command, &session).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, session: &Session) -> anyhow::Result<()> {
    match command {
        Commands::Auth { command } => match command {
            AuthCommands::Login { open, timeout } => {
                commands::auth::login(session, open, timeout).await
            }
            AuthCommands::Logout { email, all } => commands::auth::logout(session, email, all),
            AuthCommands::Status { verbose } => commands::auth::status(session, verbose).await,
            AuthCommands::List => commands::auth::list(session),
            AuthCommands::Switch { email } => commands::auth::switch(session, &email),
            AuthCommands::Token { header, sasl } => {
                let format = if header {
                    commands::auth::TokenFormat::Header
                } else if sasl {
                    commands::auth::TokenFormat::Sasl
                } else {
                    commands::auth::TokenFormat::Bare
                };
                commands::auth::token(session, format).await
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config::show(session),
            ConfigCommands::Get { key } => commands::config::get(session, &key),
            ConfigCommands::Set { key, value } => commands::config::set(session, &key, &value),
        },
        Commands::Version => {
            println!("o365mail {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_login_flags() {
        let cli = Cli::try_parse_from([
            "o365mail", "auth", "login", "--open", "--timeout", "120", "--account", "x@y.com",
        ])
        .unwrap();
        assert_eq!(cli.account.as_deref(), Some("x@y.com"));
        assert!(matches!(
            cli.command,
            Commands::Auth {
                command: AuthCommands::Login {
                    open: true,
                    timeout: Some(120)
                }
            }
        ));
    }

    #[test]
    fn test_logout_all_conflicts_with_email() {
        assert!(
            Cli::try_parse_from(["o365mail", "auth", "logout", "x@y.com", "--all"]).is_err()
        );
        assert!(Cli::try_parse_from(["o365mail", "auth", "logout", "--all"]).is_ok());
    }

    #[test]
    fn test_token_formats_conflict() {
        assert!(
            Cli::try_parse_from(["o365mail", "auth", "token", "--header", "--sasl"]).is_err()
        );
    }
}
