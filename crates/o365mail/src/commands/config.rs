//! `config` subcommands.

use super::Session;
use crate::output::{print_heading, print_row, print_success};
use anyhow::Result;
use o365mail_core::config::KEYS;

/// Show every key of the effective configuration.
pub fn show(session: &Session) -> Result<()> {
    let config = session.config();
    print_heading("Configuration");
    print_row("file", &session.config_path().display().to_string());
    for key in KEYS {
        print_row(key, &config.get(key)?);
    }
    Ok(())
}

/// Print one value of the effective configuration.
pub fn get(session: &Session, key: &str) -> Result<()> {
    println!("{}", session.config().get(key)?);
    Ok(())
}

/// Change one value in the configuration file.
pub fn set(session: &Session, key: &str, value: &str) -> Result<()> {
    session.update_config(|c| c.set(key, value))?;
    print_success(&format!("Set {key} = {value}"));
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use o365mail_core::Config;

    #[test]
    fn test_set_rejects_bad_values_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let session = Session::new(Config::default(), path.clone(), None);

        assert!(set(&session, "imap_port", "0").is_err());
        assert!(set(&session, "no_such_key", "x").is_err());
        assert!(!path.exists());

        set(&session, "tenant", "contoso.onmicrosoft.com").unwrap();
        assert_eq!(Config::read(&path).unwrap().tenant, "contoso.onmicrosoft.com");
    }
}
