use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::BookingError;
use crate::models::{
    AppointmentQuery, AppointmentSlot, BookRequest, BookResponse, LockRequest, LockResponse,
    LoginRequest, LoginResponse, SendOtpRequest, SendOtpResponse, VerifyOtpRequest,
    VerifyOtpResponse,
};

/// Browser identity the portal expects on every call.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 OPR/116.0.0.0";

// One timeout policy for all six endpoints.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the road-test booking API.
///
/// Request and response shapes are dictated by the remote service; this
/// client only adds the bearer token, the browser user-agent, and a uniform
/// timeout policy.
pub struct DeasClient {
    client: Client,
    base_url: String,
}

impl DeasClient {
    pub fn new(base_url: &str) -> Result<Self, BookingError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Exchange credentials for a bearer token and driver id.
    ///
    /// The token is the verbatim `Authorization` response header and is sent
    /// back unchanged on every authenticated call.
    pub async fn login(&self, request: &LoginRequest) -> Result<(String, i64), BookingError> {
        let url = format!("{}/webLogin/webLogin", self.base_url);
        debug!("login: PUT {url}");

        let response = self.client.put(&url).json(request).send().await?;

        let status = response.status();
        let token = response
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("Bearer "))
            .map(|value| value.to_string());
        let body = response.text().await?;

        if !status.is_success() {
            error!("login failed: HTTP {status}: {body}");
            return Err(classify_status("login", status, body));
        }

        let Some(token) = token else {
            return Err(BookingError::MissingToken);
        };
        let login: LoginResponse = parse("login", &body)?;
        Ok((token, login.drvr_id))
    }

    /// Slots currently offered at one location.
    ///
    /// Entries that do not parse as slots are skipped; the feed occasionally
    /// carries placeholder objects without an appointment date.
    pub async fn available_appointments(
        &self,
        token: &str,
        query: &AppointmentQuery,
    ) -> Result<Vec<AppointmentSlot>, BookingError> {
        let entries: Vec<serde_json::Value> = self
            .send_json(
                "availability",
                Method::POST,
                "/web/getAvailableAppointments",
                token,
                query,
            )
            .await?;

        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<AppointmentSlot>(entry) {
                Ok(slot) => slots.push(slot),
                Err(e) => debug!("skipping non-slot availability entry: {e}"),
            }
        }
        Ok(slots)
    }

    /// Clear any stale hold for this driver.
    ///
    /// Same endpoint as [`lock`](Self::lock), but with an empty payload that
    /// names only the driver.
    pub async fn unlock(&self, token: &str, drvr_id: i64) -> Result<(), BookingError> {
        let payload = serde_json::json!({
            "appointmentDt": {},
            "dlExam": {},
            "drvrDriver": { "drvrId": drvr_id },
            "drscDrvSchl": {},
        });
        self.send("unlock", Method::PUT, "/web/lock", token, &payload)
            .await?;
        Ok(())
    }

    /// Place a hold on the slot.
    ///
    /// The response's own `bookedTs` is the correlation key every later
    /// pipeline step must carry.
    pub async fn lock(&self, token: &str, request: &LockRequest) -> Result<String, BookingError> {
        let response: LockResponse = self
            .send_json("lock", Method::PUT, "/web/lock", token, request)
            .await?;
        Ok(response.booked_ts)
    }

    /// Ask the service to email a one-time passcode for this booking.
    pub async fn send_otp(
        &self,
        token: &str,
        request: &SendOtpRequest,
    ) -> Result<(), BookingError> {
        let response: SendOtpResponse = self
            .send_json("send-otp", Method::POST, "/web/sendOTP", token, request)
            .await?;

        if response.code.as_deref() == Some("success") {
            Ok(())
        } else {
            Err(BookingError::Rejected {
                operation: "send-otp",
                message: format!("code={:?}", response.code),
            })
        }
    }

    /// Submit the emailed passcode. Anything but `VERIFIED` is a rejection.
    pub async fn verify_otp(
        &self,
        token: &str,
        request: &VerifyOtpRequest,
    ) -> Result<(), BookingError> {
        let response: VerifyOtpResponse = self
            .send_json("verify-otp", Method::PUT, "/web/verifyOTP", token, request)
            .await?;

        if response.status.as_deref() == Some("VERIFIED") {
            Ok(())
        } else {
            Err(BookingError::OtpRejected {
                status: response.status,
            })
        }
    }

    /// Confirm the held booking.
    pub async fn book(&self, token: &str, request: &BookRequest) -> Result<(), BookingError> {
        let response: BookResponse = self
            .send_json("book", Method::PUT, "/web/book", token, request)
            .await?;

        if response.code.as_deref() == Some("success") {
            Ok(())
        } else {
            Err(BookingError::Rejected {
                operation: "book",
                message: format!("code={:?}", response.code),
            })
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        token: &str,
        body: &impl Serialize,
    ) -> Result<String, BookingError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{operation}: {method} {url}");

        let response = self
            .client
            .request(method, &url)
            .header(header::AUTHORIZATION, token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("{operation} failed: HTTP {status}: {text}");
            return Err(classify_status(operation, status, text));
        }
        Ok(text)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        token: &str,
        body: &impl Serialize,
    ) -> Result<T, BookingError> {
        let text = self.send(operation, method, path, token, body).await?;
        parse(operation, &text)
    }
}

fn classify_status(operation: &'static str, status: StatusCode, body: String) -> BookingError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BookingError::AuthExpired {
            status: status.as_u16(),
        },
        _ => BookingError::Api {
            operation,
            status: status.as_u16(),
            body,
        },
    }
}

fn parse<T: DeserializeOwned>(operation: &'static str, body: &str) -> Result<T, BookingError> {
    serde_json::from_str(body).map_err(|source| BookingError::Parse { operation, source })
}
