use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use shared_config::AppConfig;

use crate::error::BookingError;
use crate::models::{LoginRequest, Session};
use crate::services::client::DeasClient;

/// Exchanges the configured credentials for a bearer token and driver id.
pub struct SessionService {
    client: Arc<DeasClient>,
    credentials: LoginRequest,
}

impl SessionService {
    pub fn new(client: Arc<DeasClient>, config: &AppConfig) -> Self {
        Self {
            client,
            credentials: LoginRequest {
                drvr_last_name: config.last_name.clone(),
                licence_number: config.licence_number.clone(),
                keyword: config.keyword.clone(),
            },
        }
    }

    /// Fetch a fresh token. On failure the session keeps its prior state.
    pub async fn refresh(&self, session: &mut Session) -> Result<(), BookingError> {
        let (token, drvr_id) = self.client.login(&self.credentials).await?;
        session.authenticate(token, drvr_id, Utc::now());
        info!("token refreshed, driver id {drvr_id}");
        Ok(())
    }

    /// Refresh only when no usable token is present.
    pub async fn ensure_authenticated(&self, session: &mut Session) -> Result<(), BookingError> {
        if session.is_authenticated() {
            return Ok(());
        }
        self.refresh(session).await
    }
}
