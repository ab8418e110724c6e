use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_USER_ID_LEN;

/// Shared-password auth. The login user name becomes the caller's identity,
/// so connections without one are refused before the password exchange.
#[derive(Debug)]
pub struct MatineeAuthSource {
    password: String,
}

impl MatineeAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for MatineeAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        match login.user() {
            Some(user) if !user.is_empty() && user.len() <= MAX_USER_ID_LEN => {
                Ok(Password::new(None, self.password.as_bytes().to_vec()))
            }
            _ => {
                metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
                tracing::warn!("rejected login without a usable user name");
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28000".into(),
                    "a user name is required".into(),
                ))))
            }
        }
    }
}
