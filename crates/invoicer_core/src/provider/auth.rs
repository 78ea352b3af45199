//! Session state machine over the backend's password auth
//!
//! Staleness is detected reactively: `check` never contacts the backend, and
//! a revoked session only surfaces through [`AuthProvider::on_error`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::RouteConfig;
use crate::error::{AdapterError, HttpStatus};
use crate::record::Record;

/// The only message a failed login ever reports
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug)]
pub struct LoginResponse {
    pub success: bool,
    pub redirect_to: Option<String>,
    /// Always [`AdapterError::AuthenticationFailure`] when present
    pub error: Option<AdapterError>,
}

impl LoginResponse {
    pub fn into_result(self) -> Result<Option<String>, AdapterError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.redirect_to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutResponse {
    pub success: bool,
    pub redirect_to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResponse {
    pub authenticated: bool,
    pub redirect_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnErrorResponse {
    pub logout: bool,
    pub redirect_to: Option<String>,
}

/// Result of a permissions lookup
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Permissions {
    /// Permission lookup is not implemented; this is not an empty grant
    NotSupported,
}

#[derive(Clone)]
pub struct AuthProvider {
    backend: Arc<dyn Backend>,
    routes: RouteConfig,
    collection: String,
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("routes", &self.routes)
            .field("collection", &self.collection)
            .finish()
    }
}

impl AuthProvider {
    pub fn new(
        backend: Arc<dyn Backend>,
        routes: RouteConfig,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            routes,
            collection: collection.into(),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> LoginResponse {
        match self
            .backend
            .auth_with_password(&self.collection, email, password)
            .await
        {
            Ok(_) => {
                info!("logged in to {}", self.collection);
                LoginResponse {
                    success: true,
                    redirect_to: Some(self.routes.after_login.clone()),
                    error: None,
                }
            }
            Err(e) => {
                // detail stays in the logs, never in the response
                debug!("login rejected: {}", e);
                LoginResponse {
                    success: false,
                    redirect_to: None,
                    error: Some(AdapterError::AuthenticationFailure),
                }
            }
        }
    }

    pub async fn logout(&self) -> LogoutResponse {
        self.backend.auth_store().clear();
        info!("logged out");
        LogoutResponse {
            success: true,
            redirect_to: self.routes.login.clone(),
        }
    }

    pub async fn check(&self) -> CheckResponse {
        if self.backend.auth_store().is_valid() {
            CheckResponse {
                authenticated: true,
                redirect_to: None,
            }
        } else {
            CheckResponse {
                authenticated: false,
                redirect_to: Some(self.routes.login.clone()),
            }
        }
    }

    pub async fn get_identity(&self) -> Option<Record> {
        let store = self.backend.auth_store();
        if store.is_valid() { store.record() } else { None }
    }

    pub async fn get_permissions(&self) -> Permissions {
        Permissions::NotSupported
    }

    /// Force a logout for authorization failures (401), nothing otherwise
    pub async fn on_error<E: HttpStatus + ?Sized>(&self, error: &E) -> OnErrorResponse {
        match error.http_status() {
            Some(401) => OnErrorResponse {
                logout: true,
                redirect_to: Some(self.routes.login.clone()),
            },
            _ => OnErrorResponse::default(),
        }
    }
}
