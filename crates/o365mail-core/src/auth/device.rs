//! Device-code sign-in with a background wait.
//!
//! [`DeviceCodeAuthenticator::start`] performs the device authorization
//! request and returns immediately with what the user must see. Polling runs
//! on a spawned task bounded by the code's lifetime; its single outcome is
//! delivered through the [`PendingAuthentication`] handle.

use super::AuthResult;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use o365mail_oauth::provider::MICROSOFT_DEVICE_LOGIN_URL;
use o365mail_oauth::{DeviceCode, PublicClient};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the user needs to complete the sign-in.
#[derive(Debug, Clone)]
pub struct DisplayInfo {
    /// Code to type at the verification page.
    pub user_code: String,
    /// Verification page.
    pub verification_url: String,
    /// Lifetime of the code when it was issued.
    pub expires_in: Duration,
    /// When the code stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Instruction text from the identity provider, may be empty.
    pub message: String,
}

/// Progress of a pending sign-in as seen through its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Waiting for the user.
    Pending,
    /// Signed in; the token is persisted.
    Completed,
    /// Expired, declined, abandoned or failed.
    Failed,
}

/// Starts device-code sign-ins.
#[derive(Debug, Clone)]
pub struct DeviceCodeAuthenticator {
    client: PublicClient,
    store_path: PathBuf,
}

impl DeviceCodeAuthenticator {
    /// Creates an authenticator over `client`, whose cache persists to `store_path`.
    #[must_use]
    pub fn new(client: PublicClient, store_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            store_path: store_path.into(),
        }
    }

    /// Requests a user code and starts waiting for the user in the background.
    ///
    /// `scopes` overrides the client's resource scopes when not empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StartAuth`] if the identity provider cannot be reached
    /// or refuses the request.
    pub async fn start(&self, scopes: &[String]) -> Result<(DisplayInfo, PendingAuthentication)> {
        let code = self
            .client
            .acquire_token_by_device_code(scopes)
            .await
            .map_err(Error::StartAuth)?;

        let info = display_info(&code);
        info!(user_code = %info.user_code, expires_at = %info.expires_at, "Waiting for device sign-in");

        let (tx, rx) = oneshot::channel();
        let store_path = self.store_path.clone();
        let task = tokio::spawn(async move {
            let outcome = code
                .authentication_result()
                .await
                .map(AuthResult::from)
                .map_err(|e| poll_error(e, &store_path));
            if let Err(e) = &outcome {
                warn!(error = %e, "Device sign-in did not complete");
            }
            if tx.send(outcome).is_err() {
                debug!("Sign-in handle dropped before the result arrived");
            }
        });

        Ok((info, PendingAuthentication::new(rx, task)))
    }
}

fn display_info(code: &DeviceCode) -> DisplayInfo {
    let result = &code.result;
    let verification_url = if result.verification_uri.is_empty() {
        MICROSOFT_DEVICE_LOGIN_URL.to_string()
    } else {
        result.verification_uri.clone()
    };

    DisplayInfo {
        user_code: result.user_code.clone(),
        verification_url,
        expires_in: code.remaining(),
        expires_at: result.expires_on,
        message: result.message.clone(),
    }
}

fn poll_error(err: o365mail_oauth::Error, store_path: &Path) -> Error {
    Error::from_oauth(err, store_path, |err| match err {
        o365mail_oauth::Error::ExpiredToken => Error::DeviceCodeExpired,
        o365mail_oauth::Error::AccessDenied => Error::AccessDenied,
        other => Error::LoginFailed(other),
    })
}

/// Handle to a sign-in running in the background.
///
/// Exactly one outcome is delivered. Dropping the handle abandons the
/// sign-in; the identity provider is not told.
#[derive(Debug)]
pub struct PendingAuthentication {
    rx: Option<oneshot::Receiver<Result<AuthResult>>>,
    state: PendingState,
    task: JoinHandle<()>,
}

impl PendingAuthentication {
    const fn new(rx: oneshot::Receiver<Result<AuthResult>>, task: JoinHandle<()>) -> Self {
        Self {
            rx: Some(rx),
            state: PendingState::Pending,
            task,
        }
    }

    /// Current state as last observed through this handle.
    #[must_use]
    pub const fn state(&self) -> PendingState {
        self.state
    }

    fn settle(&mut self, outcome: Result<AuthResult>) -> Result<AuthResult> {
        self.rx = None;
        self.state = if outcome.is_ok() {
            PendingState::Completed
        } else {
            PendingState::Failed
        };
        outcome
    }

    /// Waits until the sign-in completes or the code expires.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceCodeExpired`], [`Error::AccessDenied`],
    /// [`Error::LoginFailed`], [`Error::Persistence`], or
    /// [`Error::LoginAborted`] if the background task died.
    pub async fn wait(mut self) -> Result<AuthResult> {
        let rx = self.rx.take().ok_or(Error::HandleClosed)?;
        let outcome = rx.await.unwrap_or(Err(Error::LoginAborted));
        self.settle(outcome)
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::LoginTimedOut`] once `timeout` elapses, otherwise as `wait`.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<AuthResult> {
        let rx = self.rx.take().ok_or(Error::HandleClosed)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(delivered) => {
                let outcome = delivered.unwrap_or(Err(Error::LoginAborted));
                self.settle(outcome)
            }
            Err(_) => {
                info!(?timeout, "Abandoning device sign-in");
                self.task.abort();
                self.settle(Err(Error::LoginTimedOut))
            }
        }
    }

    /// Returns the outcome if it has arrived, without waiting.
    ///
    /// `None` means the sign-in is still pending. After the outcome has been
    /// returned once, every further call yields [`Error::HandleClosed`].
    pub fn try_result(&mut self) -> Option<Result<AuthResult>> {
        let Some(rx) = self.rx.as_mut() else {
            return Some(Err(Error::HandleClosed));
        };
        match rx.try_recv() {
            Ok(outcome) => Some(self.settle(outcome)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(self.settle(Err(Error::LoginAborted))),
        }
    }
}

impl Drop for PendingAuthentication {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::auth::testing::{FakeIdp, response};
    use std::sync::Arc;

    fn context(idp: &Arc<FakeIdp>, dir: &Path) -> AuthContext {
        AuthContext::with_identity_provider(
            idp.clone(),
            "login.microsoftonline.com",
            vec!["Mail.Send".into()],
            dir,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_falls_back_to_default_verification_url() {
        let dir = tempfile::tempdir().unwrap();
        let idp = Arc::new(FakeIdp::new(900));
        let (info, pending) = context(&idp, dir.path())
            .authenticator()
            .start(&[])
            .await
            .unwrap();

        assert_eq!(info.user_code, "ABCD-EFGH");
        assert_eq!(info.verification_url, MICROSOFT_DEVICE_LOGIN_URL);
        assert_eq!(info.expires_in, Duration::from_secs(900));
        assert_eq!(info.message, "To sign in, enter ABCD-EFGH");
        assert_eq!(pending.state(), PendingState::Pending);
    }

    #[tokio::test]
    async fn test_start_failure_is_start_auth() {
        let dir = tempfile::tempdir().unwrap();
        let idp = Arc::new(FakeIdp::new(900));
        *idp.start.lock().unwrap() = Some(o365mail_oauth::Error::InvalidResponse("down".into()));

        let err = context(&idp, dir.path())
            .authenticator()
            .start(&[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StartAuth(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_persisted_before_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let idp = Arc::new(FakeIdp::new(900));
        idp.push_poll(Ok(response("x@y.com", "abc", 3600)));
        let ctx = context(&idp, dir.path());

        let (_, pending) = ctx.authenticator().start(&[]).await.unwrap();
        let result = pending.wait().await.unwrap();
        assert_eq!(result.username(), "x@y.com");
        assert_eq!(result.token.secret, "abc");
        assert!(ctx.store().path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_result_delivers_once() {
        let dir = tempfile::tempdir().unwrap();
        let idp = Arc::new(FakeIdp::new(900));
        idp.push_poll(Err(o365mail_oauth::Error::AuthorizationPending));
        idp.push_poll(Ok(response("x@y.com", "abc", 3600)));
        let (_, mut pending) = context(&idp, dir.path())
            .authenticator()
            .start(&[])
            .await
            .unwrap();

        assert!(pending.try_result().is_none());
        tokio::time::sleep(Duration::from_secs(11)).await;

        let first = pending.try_result().unwrap().unwrap();
        assert_eq!(first.token.secret, "abc");
        assert_eq!(pending.state(), PendingState::Completed);
        assert!(matches!(
            pending.try_result(),
            Some(Err(Error::HandleClosed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_and_failed_polls() {
        let dir = tempfile::tempdir().unwrap();
        let idp = Arc::new(FakeIdp::new(900));
        idp.push_poll(Err(o365mail_oauth::Error::AccessDenied));
        let (_, pending) = context(&idp, dir.path())
            .authenticator()
            .start(&[])
            .await
            .unwrap();
        assert!(matches!(pending.wait().await, Err(Error::AccessDenied)));

        idp.push_poll(Err(o365mail_oauth::Error::oauth_error(
            "invalid_client",
            "AADSTS7000218",
        )));
        let (_, pending) = context(&idp, dir.path())
            .authenticator()
            .start(&[])
            .await
            .unwrap();
        assert!(matches!(pending.wait().await, Err(Error::LoginFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_abandons() {
        let dir = tempfile::tempdir().unwrap();
        let idp = Arc::new(FakeIdp::new(900));
        let (_, pending) = context(&idp, dir.path())
            .authenticator()
            .start(&[])
            .await
            .unwrap();

        let err = pending
            .wait_timeout(Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoginTimedOut));
        assert!(err.is_pending_expired_or_denied());
    }
}
