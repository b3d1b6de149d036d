use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::America::Vancouver;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use mailbox_cell::OtpSource;

use crate::error::BookingError;
use crate::models::{
    AppointmentSlot, BookRequest, BookingConfirmation, LockRequest, PipelineStep, SendOtpRequest,
    Session, VerifyOtpRequest,
};
use crate::services::client::DeasClient;
use crate::services::session::SessionService;

/// Delays and retry bounds for one booking attempt.
#[derive(Debug, Clone)]
pub struct PipelineTiming {
    /// Pause between clearing a stale hold and placing the real one.
    pub lock_settle_delay: Duration,
    /// Pause before each mailbox check.
    pub otp_poll_interval: Duration,
    pub otp_max_attempts: u32,
}

impl Default for PipelineTiming {
    fn default() -> Self {
        Self {
            lock_settle_delay: Duration::from_secs(10),
            otp_poll_interval: Duration::from_secs(10),
            otp_max_attempts: 20,
        }
    }
}

/// Runs the lock, send-passcode, fetch-passcode, verify, and book steps for
/// one slot, in that order.
///
/// Every step gates the next and the first failure aborts the attempt; the
/// scheduler starts over from availability on its next tick, so there is
/// nothing to roll back.
pub struct BookingPipeline {
    client: Arc<DeasClient>,
    session_service: Arc<SessionService>,
    otp_source: Arc<dyn OtpSource>,
    timing: PipelineTiming,
}

impl BookingPipeline {
    pub fn new(
        client: Arc<DeasClient>,
        session_service: Arc<SessionService>,
        otp_source: Arc<dyn OtpSource>,
        timing: PipelineTiming,
    ) -> Self {
        Self {
            client,
            session_service,
            otp_source,
            timing,
        }
    }

    pub async fn run(
        &self,
        session: &mut Session,
        slot: &AppointmentSlot,
    ) -> Result<BookingConfirmation, BookingError> {
        self.session_service.ensure_authenticated(session).await?;
        let token = session
            .token()
            .ok_or(BookingError::NotAuthenticated)?
            .to_string();
        let drvr_id = session.drvr_id().ok_or(BookingError::NotAuthenticated)?;

        let booked_ts = self.lock(&token, drvr_id, slot).await?;
        debug!(step = ?PipelineStep::Locked, %booked_ts, "correlation key assigned");

        self.client
            .send_otp(
                &token,
                &SendOtpRequest {
                    booked_ts: booked_ts.clone(),
                    drvr_id,
                    method: "E".to_string(),
                },
            )
            .await?;
        info!("one-time passcode sent by email");
        debug!(step = ?PipelineStep::OtpSent, "watching the mailbox");

        let code = self.wait_for_code().await?;
        debug!(step = ?PipelineStep::OtpReceived, "passcode retrieved");

        self.client
            .verify_otp(
                &token,
                &VerifyOtpRequest {
                    booked_ts: booked_ts.clone(),
                    drvr_id,
                    code,
                },
            )
            .await?;
        info!("passcode verified");
        debug!(step = ?PipelineStep::Verified, "confirming the booking");

        self.client
            .book(&token, &BookRequest::for_driver(drvr_id))
            .await?;
        debug!(step = ?PipelineStep::Booked, "pipeline complete");
        info!("booking confirmed for {}", slot.appointment_dt.date);

        Ok(BookingConfirmation {
            date: slot.appointment_dt.date,
            start_tm: slot.start_tm.clone(),
            end_tm: slot.end_tm.clone(),
            pos_id: slot.pos_id,
            booked_ts,
        })
    }

    /// Clear any stale hold, wait for the service to settle, then place the
    /// real lock carrying the slot payload and a fresh local timestamp.
    async fn lock(
        &self,
        token: &str,
        drvr_id: i64,
        slot: &AppointmentSlot,
    ) -> Result<String, BookingError> {
        self.client.unlock(token, drvr_id).await?;
        sleep(self.timing.lock_settle_delay).await;

        let request = LockRequest::for_slot(slot, drvr_id, pacific_timestamp());
        let correlation = self.client.lock(token, &request).await?;
        info!("slot on {} locked", slot.appointment_dt.date);
        Ok(correlation)
    }

    /// Poll the mailbox until a code shows up or the attempt limit runs out.
    /// A mailbox failure counts as a missed attempt, not an abort.
    async fn wait_for_code(&self) -> Result<String, BookingError> {
        let attempts = self.timing.otp_max_attempts;
        for attempt in 1..=attempts {
            sleep(self.timing.otp_poll_interval).await;
            match self.otp_source.fetch_latest_code().await {
                Ok(Some(code)) => {
                    debug!("passcode found on attempt {attempt}/{attempts}");
                    return Ok(code);
                }
                Ok(None) => debug!("no passcode yet (attempt {attempt}/{attempts})"),
                Err(e) => warn!("mailbox check failed on attempt {attempt}/{attempts}: {e}"),
            }
        }
        Err(BookingError::OtpTimeout { attempts })
    }
}

/// Wall-clock timestamp in the service's home timezone, formatted the way
/// the lock endpoint expects.
fn pacific_timestamp() -> String {
    Utc::now()
        .with_timezone(&Vancouver)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}
