use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::{
    AvailabilityService, BookingPipeline, DeasClient, PipelineTiming, Scheduler, SchedulerOutcome,
    Session, SessionService,
};
use mailbox_cell::{MailboxError, OtpSource};
use shared_config::AppConfig;

const TOKEN: &str = "Bearer test-token";
const DRIVER_ID: i64 = 811;
const CORRELATION: &str = "2025-06-20T09:15:11";

fn test_config(base_url: &str) -> AppConfig {
    AppConfig {
        api_base_url: base_url.to_string(),
        last_name: "DOE".to_string(),
        licence_number: "1234567".to_string(),
        keyword: "hunter2".to_string(),
        mailbox_address: "doe@example.com".to_string(),
        mailbox_app_password: "app-password".to_string(),
        imap_host: "imap.example.com".to_string(),
        exam_type: "7-R-1".to_string(),
        location_ids: vec![3],
        date_range_start: "2025-06-24".parse().unwrap(),
        date_range_end: "2025-06-30".parse().unwrap(),
        check_interval: Duration::from_millis(25),
        token_refresh_interval: Duration::from_secs(600),
    }
}

/// Mailbox stand-in that always has the same code waiting.
struct FixedOtp(&'static str);

#[async_trait]
impl OtpSource for FixedOtp {
    async fn fetch_latest_code(&self) -> Result<Option<String>, MailboxError> {
        Ok(Some(self.0.to_string()))
    }
}

/// Mailbox stand-in that only counts how often it was asked.
struct CountingOtp(Arc<AtomicU32>);

#[async_trait]
impl OtpSource for CountingOtp {
    async fn fetch_latest_code(&self) -> Result<Option<String>, MailboxError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

fn scheduler_for(config: &AppConfig, otp: Arc<dyn OtpSource>) -> (Scheduler, Session) {
    let client = Arc::new(DeasClient::new(&config.api_base_url).unwrap());
    let session_service = Arc::new(SessionService::new(Arc::clone(&client), config));
    let availability =
        AvailabilityService::new(Arc::clone(&client), Arc::clone(&session_service), config);
    let pipeline = BookingPipeline::new(
        Arc::clone(&client),
        Arc::clone(&session_service),
        otp,
        PipelineTiming {
            lock_settle_delay: Duration::from_millis(1),
            otp_poll_interval: Duration::from_millis(1),
            otp_max_attempts: 3,
        },
    );
    let scheduler = Scheduler::new(
        session_service,
        availability,
        pipeline,
        config.check_interval,
        config.token_refresh_interval,
    );
    (scheduler, Session::default())
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/webLogin/webLogin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Authorization", TOKEN)
                .set_body_json(json!({ "drvrId": DRIVER_ID })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn scheduler_books_the_earliest_in_window_slot_and_stops() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    // Two offered dates; only one is inside the window, and it is later in
    // the feed. A placeholder entry without a date rides along.
    Mock::given(method("POST"))
        .and(path("/web/getAvailableAppointments"))
        .and(header("Authorization", TOKEN))
        .and(body_partial_json(json!({
            "examType": "7-R-1",
            "aPosID": 3,
            "lastName": "DOE",
            "licenseNumber": "1234567",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "appointmentDt": { "date": "2025-07-01", "dayOfWeek": "Tuesday" },
                "dlExam": { "code": "7-R-1" },
                "startTm": "10:00",
                "endTm": "10:45",
                "posId": 3,
                "resourceId": 90,
                "signature": "sig-july"
            },
            {
                "appointmentDt": { "date": "2025-06-26", "dayOfWeek": "Thursday" },
                "dlExam": { "code": "7-R-1" },
                "startTm": "09:05",
                "endTm": "09:50",
                "posId": 3,
                "resourceId": 91,
                "signature": "sig-june"
            },
            { "notice": "no appointmentDt here" }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/web/lock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bookedTs": CORRELATION })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/web/sendOTP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "success" })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/web/verifyOTP"))
        .and(body_partial_json(json!({ "code": "482913" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "VERIFIED" })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/web/book"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "success" })))
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (scheduler, mut session) = scheduler_for(&config, Arc::new(FixedOtp("482913")));

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        scheduler.run(&mut session, shutdown_rx),
    )
    .await
    .expect("scheduler should finish well before the timeout");

    match outcome {
        SchedulerOutcome::Booked(confirmation) => {
            assert_eq!(confirmation.date, "2025-06-26".parse().unwrap());
            assert_eq!(confirmation.booked_ts, CORRELATION);
        }
        other => panic!("expected a booking, got {other:?}"),
    }
}

#[tokio::test]
async fn out_of_window_slots_never_start_the_pipeline() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    Mock::given(method("POST"))
        .and(path("/web/getAvailableAppointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "appointmentDt": { "date": "2025-07-15", "dayOfWeek": "Tuesday" },
                "dlExam": { "code": "7-R-1" },
                "startTm": "10:00",
                "endTm": "10:45",
                "posId": 3,
                "resourceId": 90,
                "signature": "sig-july"
            }
        ])))
        .expect(2..)
        .mount(&server)
        .await;

    // The pipeline must stay untouched.
    Mock::given(method("PUT"))
        .and(path("/web/lock"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bookedTs": CORRELATION })))
        .expect(0)
        .mount(&server)
        .await;

    let otp_calls = Arc::new(AtomicU32::new(0));
    let config = test_config(&server.uri());
    let (scheduler, mut session) =
        scheduler_for(&config, Arc::new(CountingOtp(Arc::clone(&otp_calls))));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = async { scheduler.run(&mut session, shutdown_rx).await };
    let stopper = async {
        // Let several availability checks land, then interrupt.
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
    };

    let (outcome, ()) = tokio::join!(runner, stopper);
    assert!(matches!(outcome, SchedulerOutcome::Interrupted));
    assert_eq!(otp_calls.load(Ordering::SeqCst), 0);
    server.verify().await;
}

#[tokio::test]
async fn expired_session_is_renewed_on_the_following_check() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    // Every availability call is rejected as unauthorized; the scheduler
    // should drop the token, re-login, and keep polling instead of dying.
    Mock::given(method("POST"))
        .and(path("/web/getAvailableAppointments"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2..)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let (scheduler, mut session) = scheduler_for(&config, Arc::new(FixedOtp("482913")));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = async { scheduler.run(&mut session, shutdown_rx).await };
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
    };

    let (outcome, ()) = tokio::join!(runner, stopper);
    assert!(matches!(outcome, SchedulerOutcome::Interrupted));

    // One login per failed check (plus the lazy initial one): the 401s kept
    // invalidating the session and every following check re-authenticated.
    let requests = server.received_requests().await.unwrap();
    let logins = requests
        .iter()
        .filter(|r| r.url.path() == "/webLogin/webLogin")
        .count();
    assert!(logins >= 2, "expected repeated re-authentication, saw {logins} logins");
}
