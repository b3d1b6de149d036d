use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::error::BookingError;
use crate::models::{BookingConfirmation, Session};
use crate::services::availability::AvailabilityService;
use crate::services::pipeline::BookingPipeline;
use crate::services::session::SessionService;

/// Why the polling loop stopped.
#[derive(Debug)]
pub enum SchedulerOutcome {
    /// The pipeline completed; carries the confirmed appointment.
    Booked(BookingConfirmation),
    /// An operator interrupt arrived before any booking succeeded.
    Interrupted,
}

/// Cooperative loop driving periodic token refresh and availability checks
/// until a booking succeeds or the shutdown signal fires.
pub struct Scheduler {
    session_service: Arc<SessionService>,
    availability: AvailabilityService,
    pipeline: BookingPipeline,
    check_interval: Duration,
    refresh_interval: Duration,
}

impl Scheduler {
    pub fn new(
        session_service: Arc<SessionService>,
        availability: AvailabilityService,
        pipeline: BookingPipeline,
        check_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            session_service,
            availability,
            pipeline,
            check_interval,
            refresh_interval,
        }
    }

    /// Both timers first fire one full interval after start, matching a
    /// fresh login at startup. A dropped shutdown sender counts as an
    /// interrupt: without it nobody could ever stop the loop.
    pub async fn run(
        &self,
        session: &mut Session,
        mut shutdown: watch::Receiver<bool>,
    ) -> SchedulerOutcome {
        let mut refresh_timer = interval_at(
            Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );
        refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut check_timer = interval_at(Instant::now() + self.check_interval, self.check_interval);
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("monitoring for open road-test slots");

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("stopped by user");
                    return SchedulerOutcome::Interrupted;
                }
                _ = refresh_timer.tick() => {
                    if let Err(e) = self.session_service.refresh(session).await {
                        warn!("scheduled token refresh failed: {e}");
                    }
                }
                _ = check_timer.tick() => {
                    match self.try_book_once(session).await {
                        Ok(Some(confirmation)) => {
                            info!("booking completed, shutting down");
                            return SchedulerOutcome::Booked(confirmation);
                        }
                        Ok(None) => {}
                        Err(e) if e.is_auth_expired() => {
                            warn!("session expired, re-authenticating on the next check: {e}");
                            session.invalidate();
                        }
                        Err(e) => warn!("booking attempt failed: {e}"),
                    }
                }
            }
        }
    }

    /// One availability check, and a pipeline run when a slot qualifies.
    async fn try_book_once(
        &self,
        session: &mut Session,
    ) -> Result<Option<BookingConfirmation>, BookingError> {
        let Some(slot) = self.availability.find_earliest_slot(session).await? else {
            info!("no suitable dates available for booking");
            return Ok(None);
        };

        info!("found candidate slot on {}", slot.appointment_dt.date);
        self.pipeline.run(session, &slot).await.map(Some)
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
