use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authenticated state for the booking API.
///
/// Owned by the caller and passed by mutable reference into every component
/// that needs it; there is no process-global session.
#[derive(Debug, Default)]
pub struct Session {
    token: Option<String>,
    drvr_id: Option<i64>,
    last_refresh: Option<DateTime<Utc>>,
}

impl Session {
    /// The verbatim `Authorization` header value from the last login.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn drvr_id(&self) -> Option<i64> {
        self.drvr_id
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.drvr_id.is_some()
    }

    /// Install a fresh token/driver-id pair.
    pub(crate) fn authenticate(&mut self, token: String, drvr_id: i64, at: DateTime<Utc>) {
        self.token = Some(token);
        self.drvr_id = Some(drvr_id);
        self.last_refresh = Some(at);
    }

    /// Drop the token so the next authenticated call forces a refresh. The
    /// driver id is kept; it does not expire with the token.
    pub fn invalidate(&mut self) {
        self.token = None;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub drvr_last_name: String,
    pub licence_number: String,
    pub keyword: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub drvr_id: i64,
}

/// Slot filter the availability endpoint expects.
///
/// `examDate` anchors the search; days-of-week and parts-of-day are sent
/// wide open so the date window does the filtering on our side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentQuery {
    pub exam_type: String,
    pub exam_date: NaiveDate,
    pub prf_days_of_week: String,
    pub prf_parts_of_day: String,
    pub last_name: String,
    pub license_number: String,
    #[serde(rename = "aPosID")]
    pub a_pos_id: i64,
}

/// One bookable slot as returned by the availability endpoint.
///
/// Everything except the date is opaque to us; the lock step echoes the slot
/// back to the service verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentSlot {
    pub appointment_dt: AppointmentDt,
    pub dl_exam: Value,
    pub start_tm: String,
    pub end_tm: String,
    pub pos_id: i64,
    pub resource_id: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentDt {
    pub date: NaiveDate,
    // Unmodelled members ride along so the lock payload matches the slot.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrvrDriver {
    pub drvr_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub appointment_dt: AppointmentDt,
    pub dl_exam: Value,
    pub drvr_driver: DrvrDriver,
    pub drsc_drv_schl: Value,
    pub instructor_dl_num: Option<String>,
    pub booked_ts: String,
    pub start_tm: String,
    pub end_tm: String,
    pub pos_id: i64,
    pub resource_id: i64,
    pub signature: String,
}

impl LockRequest {
    pub fn for_slot(slot: &AppointmentSlot, drvr_id: i64, booked_ts: String) -> Self {
        Self {
            appointment_dt: slot.appointment_dt.clone(),
            dl_exam: slot.dl_exam.clone(),
            drvr_driver: DrvrDriver { drvr_id },
            drsc_drv_schl: Value::Object(Map::new()),
            instructor_dl_num: None,
            booked_ts,
            start_tm: slot.start_tm.clone(),
            end_tm: slot.end_tm.clone(),
            pos_id: slot.pos_id,
            resource_id: slot.resource_id,
            signature: slot.signature.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResponse {
    pub booked_ts: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    pub booked_ts: String,
    #[serde(rename = "drvrID")]
    pub drvr_id: i64,
    /// Delivery channel; `"E"` is email, the only one supported here.
    pub method: String,
}

#[derive(Debug, Deserialize)]
pub struct SendOtpResponse {
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub booked_ts: String,
    #[serde(rename = "drvrID")]
    pub drvr_id: i64,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpResponse {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    pub user_id: String,
    pub appointment: BookAppointment,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointment {
    pub drvr_driver: DrvrDriver,
}

impl BookRequest {
    pub fn for_driver(drvr_id: i64) -> Self {
        Self {
            user_id: format!("WEBD:{drvr_id}"),
            appointment: BookAppointment {
                drvr_driver: DrvrDriver { drvr_id },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BookResponse {
    pub code: Option<String>,
}

/// Forward-only progress marker for a single booking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Locked,
    OtpSent,
    OtpReceived,
    Verified,
    Booked,
}

/// Result of a completed booking attempt.
#[derive(Debug, Clone)]
pub struct BookingConfirmation {
    pub date: NaiveDate,
    pub start_tm: String,
    pub end_tm: String,
    pub pos_id: i64,
    /// Correlation key the service assigned to the booking.
    pub booked_ts: String,
}
