use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use shared_config::AppConfig;

use crate::error::BookingError;
use crate::models::{AppointmentQuery, AppointmentSlot, Session};
use crate::services::client::DeasClient;
use crate::services::session::SessionService;

// "Any day, any part of the day": the date window does the filtering.
const ALL_DAYS_OF_WEEK: &str = "[0,1,2,3,4,5,6]";
const ALL_PARTS_OF_DAY: &str = "[0,1]";

/// Polls the configured locations and picks the earliest slot inside the
/// desired date window.
pub struct AvailabilityService {
    client: Arc<DeasClient>,
    session_service: Arc<SessionService>,
    exam_type: String,
    last_name: String,
    licence_number: String,
    location_ids: Vec<i64>,
    window_start: NaiveDate,
    window_end: NaiveDate,
}

impl AvailabilityService {
    pub fn new(
        client: Arc<DeasClient>,
        session_service: Arc<SessionService>,
        config: &AppConfig,
    ) -> Self {
        Self {
            client,
            session_service,
            exam_type: config.exam_type.clone(),
            last_name: config.last_name.clone(),
            licence_number: config.licence_number.clone(),
            location_ids: config.location_ids.clone(),
            window_start: config.date_range_start,
            window_end: config.date_range_end,
        }
    }

    /// Earliest in-window slot across all configured locations, or `None`
    /// when nothing qualifies. Ties between locations keep the first seen.
    ///
    /// A 401/403 from any location propagates as [`BookingError::AuthExpired`]
    /// so the caller can invalidate the session; other transport errors do
    /// not touch the token and simply fail this check.
    pub async fn find_earliest_slot(
        &self,
        session: &mut Session,
    ) -> Result<Option<AppointmentSlot>, BookingError> {
        self.session_service.ensure_authenticated(session).await?;
        let token = session
            .token()
            .ok_or(BookingError::NotAuthenticated)?
            .to_string();

        let mut earliest: Option<AppointmentSlot> = None;
        for &location_id in &self.location_ids {
            let query = self.query_for_location(location_id);
            let slots = self.client.available_appointments(&token, &query).await?;
            info!("location {location_id}: {} open slots", slots.len());

            // Feed the running best in first so equal dates keep it.
            earliest = earliest_in_window(
                earliest.into_iter().chain(slots),
                self.window_start,
                self.window_end,
            );
        }
        Ok(earliest)
    }

    fn query_for_location(&self, location_id: i64) -> AppointmentQuery {
        AppointmentQuery {
            exam_type: self.exam_type.clone(),
            exam_date: self.window_start,
            prf_days_of_week: ALL_DAYS_OF_WEEK.to_string(),
            prf_parts_of_day: ALL_PARTS_OF_DAY.to_string(),
            last_name: self.last_name.clone(),
            license_number: self.licence_number.clone(),
            a_pos_id: location_id,
        }
    }
}

/// Earliest slot whose date falls inside the inclusive window.
///
/// Ties keep the first-seen candidate, so callers control priority through
/// iteration order.
pub fn earliest_in_window<I>(slots: I, start: NaiveDate, end: NaiveDate) -> Option<AppointmentSlot>
where
    I: IntoIterator<Item = AppointmentSlot>,
{
    let mut earliest: Option<AppointmentSlot> = None;
    for slot in slots {
        let date = slot.appointment_dt.date;
        if date < start || date > end {
            continue;
        }
        match &earliest {
            Some(current) if current.appointment_dt.date <= date => {}
            _ => earliest = Some(slot),
        }
    }
    earliest
}
