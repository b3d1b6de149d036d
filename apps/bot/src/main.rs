use std::process;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booking_cell::{
    AvailabilityService, BookingPipeline, DeasClient, PipelineTiming, Scheduler, SchedulerOutcome,
    Session, SessionService,
};
use mailbox_cell::ImapOtpReader;
use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            error!("set these variables in your .env file or environment");
            process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let client = Arc::new(DeasClient::new(&config.api_base_url)?);
    let session_service = Arc::new(SessionService::new(Arc::clone(&client), &config));
    let otp_reader = Arc::new(ImapOtpReader::new(&config));

    let availability = AvailabilityService::new(
        Arc::clone(&client),
        Arc::clone(&session_service),
        &config,
    );
    let pipeline = BookingPipeline::new(
        Arc::clone(&client),
        Arc::clone(&session_service),
        otp_reader,
        PipelineTiming::default(),
    );
    let scheduler = Scheduler::new(
        Arc::clone(&session_service),
        availability,
        pipeline,
        config.check_interval,
        config.token_refresh_interval,
    );

    let mut session = Session::default();
    session_service
        .refresh(&mut session)
        .await
        .context("failed to get an initial token, check your credentials")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    info!("monitoring started, press Ctrl-C to stop");

    match scheduler.run(&mut session, shutdown_rx).await {
        SchedulerOutcome::Booked(confirmation) => {
            info!(
                "road test booked on {} from {} to {} at location {}",
                confirmation.date,
                confirmation.start_tm,
                confirmation.end_tm,
                confirmation.pos_id
            );
        }
        SchedulerOutcome::Interrupted => {
            info!("monitoring ended without a booking");
        }
    }
    Ok(())
}
