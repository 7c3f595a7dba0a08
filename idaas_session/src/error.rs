use thiserror::Error;

use crate::{client::AuthError, store::StoreError};

/// Why a session operation did not complete
///
/// Public [`SessionManager`](crate::SessionManager) operations report these
/// as boolean or status results and log the detail; they never return them.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The identity service could not be reached in time
    #[error("identity service could not be reached")]
    Transport(#[source] AuthError),
    /// The identity service refused the request or answered with garbage
    #[error("identity service rejected the request")]
    AuthRejected(#[source] AuthError),
    /// A success response lacked a member the session cannot do without
    #[error("identity service response is missing `{field}`")]
    MissingField {
        /// The missing member, as named on the wire
        field: &'static str,
    },
    /// There is no usable refresh token
    #[error("session has expired or was never established")]
    SessionExpired,
    /// The credential bundle could not be read or written
    #[error("credential storage failed")]
    Storage(#[from] StoreError),
}

impl From<AuthError> for SessionError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Transport(_) => SessionError::Transport(error),
            _ => SessionError::AuthRejected(error),
        }
    }
}

impl SessionError {
    /// Whether the identity service itself turned the request down
    pub fn is_auth_rejected(&self) -> bool {
        matches!(
            self,
            SessionError::AuthRejected(_) | SessionError::MissingField { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_classified() {
        let transport = AuthError::Transport("connection reset".into());
        assert!(matches!(
            SessionError::from(transport),
            SessionError::Transport(_)
        ));

        let rejected = AuthError::Rejected {
            status: 500,
            body: String::new(),
        };
        assert!(SessionError::from(rejected).is_auth_rejected());
        assert!(SessionError::MissingField {
            field: "refreshToken"
        }
        .is_auth_rejected());
        assert!(!SessionError::SessionExpired.is_auth_rejected());
    }
}
