//! `OAuth2` provider configurations.

use crate::error::{Error, Result};
use url::Url;

/// Fallback page for entering a device code when the server omits one.
pub const MICROSOFT_DEVICE_LOGIN_URL: &str = "https://microsoft.com/devicelogin";

/// Scopes for Microsoft Graph mail access.
pub const GRAPH_MAIL_SCOPES: [&str; 2] = [
    "https://graph.microsoft.com/Mail.ReadWrite",
    "https://graph.microsoft.com/Mail.Send",
];

/// Scopes for direct IMAP/SMTP access to Exchange Online.
pub const OUTLOOK_PROTOCOL_SCOPES: [&str; 2] = [
    "https://outlook.office.com/IMAP.AccessAsUser.All",
    "https://outlook.office.com/SMTP.Send",
];

/// Scopes every token request carries so an account can be identified and refreshed.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// `OAuth2` provider configuration.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Microsoft").
    pub name: String,
    /// Authority the endpoints belong to (e.g., `https://login.microsoftonline.com/common`).
    pub authority: Url,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Device authorization endpoint (if supported).
    pub device_auth_url: Option<Url>,
    /// Default scopes.
    pub default_scopes: Vec<String>,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URLs are invalid.
    pub fn new(
        name: impl Into<String>,
        authority: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            authority: Url::parse(authority.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
            device_auth_url: None,
            default_scopes: Vec::new(),
        })
    }

    /// Sets the device authorization URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn with_device_auth_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.device_auth_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the default scopes.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Microsoft identity platform on the multi-tenant `common` authority.
    ///
    /// Scopes:
    /// - `Mail.ReadWrite`, `Mail.Send` on Microsoft Graph
    /// - `offline_access` - Refresh token
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn microsoft() -> Result<Self> {
        Self::microsoft_tenant("common")
    }

    /// Microsoft identity platform for a specific tenant (`common`, `organizations`,
    /// `consumers`, a tenant id or a verified domain).
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant is empty or produces an invalid URL.
    pub fn microsoft_tenant(tenant: &str) -> Result<Self> {
        let tenant = tenant.trim();
        if tenant.is_empty() || tenant.contains('/') {
            return Err(Error::InvalidConfig(format!("invalid tenant '{tenant}'")));
        }
        let authority = format!("https://login.microsoftonline.com/{tenant}");

        Ok(Self::new(
            "Microsoft",
            &authority,
            format!("{authority}/oauth2/v2.0/token"),
        )?
        .with_device_auth_url(format!("{authority}/oauth2/v2.0/devicecode"))?
        .with_default_scopes(GRAPH_MAIL_SCOPES.iter().map(ToString::to_string).collect()))
    }

    /// Host of the authority, recorded on cached accounts as their environment.
    #[must_use]
    pub fn environment(&self) -> String {
        self.authority.host_str().unwrap_or_default().to_string()
    }

    /// Validates that required URLs are set.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.token_url.as_str().is_empty() {
            return Err(Error::InvalidConfig("token_url is empty".into()));
        }
        if self.device_auth_url.is_none() {
            return Err(Error::InvalidConfig(format!(
                "Provider {} does not support device flow",
                self.name
            )));
        }
        Ok(())
    }
}

/// Returns `scopes` with the reserved `OpenID` scopes appended once.
#[must_use]
pub fn with_reserved_scopes(scopes: &[String]) -> Vec<String> {
    let mut all: Vec<String> = scopes.to_vec();
    for reserved in RESERVED_SCOPES {
        if !all.iter().any(|s| s == reserved) {
            all.push(reserved.to_string());
        }
    }
    all
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_microsoft_provider() {
        let provider = Provider::microsoft().unwrap();
        assert_eq!(provider.name, "Microsoft");
        assert_eq!(
            provider.token_url.as_str(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
        assert!(provider.device_auth_url.is_some());
        assert_eq!(provider.default_scopes.len(), 2);
        assert_eq!(provider.environment(), "login.microsoftonline.com");
        provider.validate().unwrap();
    }

    #[test]
    fn test_microsoft_tenant_provider() {
        let provider = Provider::microsoft_tenant("contoso.onmicrosoft.com").unwrap();
        assert_eq!(
            provider.device_auth_url.unwrap().as_str(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/devicecode"
        );
    }

    #[test]
    fn test_invalid_tenant_rejected() {
        assert!(Provider::microsoft_tenant("").is_err());
        assert!(Provider::microsoft_tenant("a/b").is_err());
    }

    #[test]
    fn test_scope_sets() {
        let provider = Provider::microsoft_tenant("common").unwrap();
        assert_eq!(provider.default_scopes, GRAPH_MAIL_SCOPES);
        assert!(
            OUTLOOK_PROTOCOL_SCOPES
                .iter()
                .any(|s| s.ends_with("IMAP.AccessAsUser.All"))
        );
    }

    #[test]
    fn test_custom_provider_without_device_flow() {
        let provider = Provider::new(
            "Custom",
            "https://auth.example.com",
            "https://auth.example.com/token",
        )
        .unwrap();
        assert!(provider.validate().is_err());
    }

    #[test]
    fn test_reserved_scopes_added_once() {
        let scopes = vec!["Mail.Send".to_string(), "offline_access".to_string()];
        let all = with_reserved_scopes(&scopes);
        assert_eq!(all.len(), 4);
        assert_eq!(all.iter().filter(|s| *s == "offline_access").count(), 1);
    }
}
