use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("session expired or unauthorized (HTTP {status})")]
    AuthExpired { status: u16 },

    #[error("{operation} failed with HTTP {status}: {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} rejected by the booking service: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("failed to parse {operation} response: {source}")]
    Parse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("login response carried no bearer token")]
    MissingToken,

    #[error("no active session")]
    NotAuthenticated,

    #[error("one-time passcode never arrived (gave up after {attempts} attempts)")]
    OtpTimeout { attempts: u32 },

    #[error("one-time passcode rejected, status {status:?}")]
    OtpRejected { status: Option<String> },
}

impl BookingError {
    /// True when the bearer token is no longer usable and the session should
    /// be invalidated before the next attempt.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, BookingError::AuthExpired { .. })
    }
}
