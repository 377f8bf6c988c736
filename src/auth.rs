use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    api::Backend,
    errors::ApiError,
    models::{AuthToken, Credentials, Registration, User},
    session::Session,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthStatus {
    pub loading: bool,
    /// message of the last failed login/register, cleared by the next attempt
    pub error: Option<String>,
}

/// Login, registration and logout on top of the shared [`Session`].
///
/// Failures are recorded in [`AuthStatus`] and still returned to the caller.
pub struct AuthService {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
    status: watch::Sender<AuthStatus>,
}

impl AuthService {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<Session>) -> Self {
        Self {
            backend,
            session,
            status: watch::channel(AuthStatus::default()).0,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn status(&self) -> AuthStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<User, ApiError> {
        let credentials = Credentials {
            email: email.trim().to_string(),
            password: password.to_string(),
        };

        self.begin();
        let result = self.backend.login(&credentials, cancel).await;
        self.finish(result)
    }

    pub async fn register(
        &self,
        registration: &Registration,
        cancel: &CancellationToken,
    ) -> Result<User, ApiError> {
        self.begin();
        let result = self.backend.register(registration, cancel).await;
        self.finish(result)
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        self.status.send_replace(AuthStatus::default());
        Ok(self.session.clear()?)
    }

    /// the user behind the stored token, as the backend sees it right now
    pub async fn current_user(&self, cancel: &CancellationToken) -> Result<User, ApiError> {
        if !self.session.is_authenticated() {
            return Err(ApiError::Unauthorized {
                detail: "Not logged in".to_string(),
            });
        }
        self.backend.current_user(cancel).await
    }

    /// Checks a persisted token against the backend on startup.
    ///
    /// A rejected token is cleared. Any other failure leaves the session untouched, the token
    /// may well be valid once the backend is reachable again.
    pub async fn restore(&self, cancel: &CancellationToken) -> Result<Option<User>, ApiError> {
        let Some(access_token) = self.session.token() else {
            return Ok(None);
        };

        match self.backend.current_user(cancel).await {
            Ok(user) => {
                self.session.store(&AuthToken {
                    access_token,
                    token_type: "bearer".to_string(),
                    user: user.clone(),
                })?;
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => {
                // the http client already expired it, a mocked or alternative backend may not have
                if self.session.is_authenticated() {
                    self.session.expire();
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn begin(&self) {
        self.status.send_replace(AuthStatus {
            loading: true,
            error: None,
        });
    }

    fn finish(&self, result: Result<AuthToken, ApiError>) -> Result<User, ApiError> {
        let result = result.and_then(|token| {
            self.session.store(&token)?;
            Ok(token.user)
        });

        let error = match &result {
            Ok(user) => {
                info!(user = %user.email, "authenticated");
                None
            }
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                warn!(error = %e, "authentication failed");
                Some(e.to_string())
            }
        };

        self.status.send_replace(AuthStatus {
            loading: false,
            error,
        });
        result
    }
}
