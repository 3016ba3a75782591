//! Remedy bot main executable

use clap::{Arg, Command};
use remedy_actuate::{Actuator, DockerRuntime};
use remedy_bot::{Dependencies, Monitor, MonitorSettings, Strategy};
use remedy_breaker::CircuitBreaker;
use remedy_common::{BotConfig, Clock, SystemClock};
use remedy_detect::{Deduplicator, DetectorChain};
use remedy_notify::{ConsoleNotifier, NotificationHub, Notify, SlackNotifier};
use remedy_probe::{HealthProbe, Probe};
use remedy_store::{IncidentStore, RetentionSweeper, Store};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DB_CONNECT_ATTEMPTS: u32 = 5;
const APP_WAIT_ATTEMPTS: u32 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("remedy-bot")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Auto-remediation bot - monitors a containerized service and heals it")
        .arg(
            Arg::new("poll-seconds")
                .short('p')
                .long("poll-seconds")
                .value_name("SECONDS")
                .help("Override the poll interval from the environment")
                .required(false),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    init_tracing(matches.get_flag("verbose"));

    info!("Remedy bot v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(poll) = matches.get_one::<String>("poll-seconds") {
        match poll.parse::<u64>() {
            Ok(seconds) => config.poll_seconds = seconds,
            Err(_) => {
                error!("invalid --poll-seconds value: {}", poll);
                std::process::exit(1);
            }
        }
    }

    info!(
        app_host = config.app_host,
        poll_secs = config.poll_seconds,
        "monitoring target configured"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = match Store::connect(&config.database_url, DB_CONNECT_ATTEMPTS, clock.clone()).await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("database unavailable: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = store.bootstrap().await {
        error!("schema bootstrap failed: {}", e);
        std::process::exit(1);
    }

    let runtime = match DockerRuntime::connect() {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            error!("container runtime unavailable: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.ping().await {
        warn!("container runtime not responding yet: {}", e);
    }

    let probe = match HealthProbe::new(&config.app_host) {
        Ok(probe) => Arc::new(probe),
        Err(e) => {
            error!("could not build health probe: {}", e);
            std::process::exit(1);
        }
    };
    wait_for_app(probe.as_ref()).await;

    let mut channels: Vec<Box<dyn Notify>> = vec![Box::new(ConsoleNotifier)];
    if let Some(webhook) = &config.slack_webhook_url {
        match SlackNotifier::new(webhook.clone()) {
            Ok(slack) => {
                info!("Slack notifications enabled");
                channels.push(Box::new(slack));
            }
            Err(e) => warn!("Slack notifier disabled: {}", e),
        }
    }
    let hub = NotificationHub::new(channels);

    // The config table wins over the environment for breaker settings.
    let breaker_config = match store.read_breaker_config().await {
        Ok(Some(from_table)) => from_table,
        Ok(None) => config.breaker.clone(),
        Err(e) => {
            warn!("could not read breaker config, using environment: {}", e);
            config.breaker.clone()
        }
    };
    info!(
        max_failures = breaker_config.max_failures,
        window_secs = breaker_config.window_seconds,
        cooldown_secs = breaker_config.cooldown_seconds,
        "circuit breaker configured"
    );

    if config.failure_prediction_enabled {
        // The predictor is a plug-in capability; nothing ships in-process.
        info!("failure prediction enabled but no predictor is attached, skipping");
    }

    let store: Arc<dyn IncidentStore> = store;
    let sweeper = RetentionSweeper::new(store.clone(), config.retention_days, clock.clone());

    let settings = MonitorSettings::from_config(&config);
    let deps = Dependencies {
        probe,
        chain: DetectorChain::standard(),
        dedup: Deduplicator::new(clock.clone()),
        strategy: Strategy::new(config.app_container.clone()),
        breaker: Arc::new(CircuitBreaker::new(breaker_config, clock.clone())),
        actuator: Actuator::new(runtime),
        store,
        sweeper,
        hub,
        predictor: None,
        clock,
    };

    let mut monitor = Monitor::new(settings, config.thresholds.clone(), deps);
    monitor.startup().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, stopping after the current tick");
            let _ = shutdown_tx.send(true);
        }
    });

    monitor.run(shutdown_rx).await;
    info!("graceful shutdown complete");
    Ok(())
}

/// Bounded startup grace for the monitored service, mirroring the database
/// connect retries. Exhausting it is not fatal: once the loop runs, a dead
/// app surfaces as a health-check incident on the first tick.
async fn wait_for_app(probe: &dyn Probe) {
    info!("waiting for the monitored service to come up");

    for attempt in 1..=APP_WAIT_ATTEMPTS {
        match probe.observe().await {
            remedy_common::Observation::Snapshot(_) => {
                info!("monitored service is responding");
                return;
            }
            remedy_common::Observation::ProbeFailed(failure) => {
                warn!(
                    attempt,
                    attempts = APP_WAIT_ATTEMPTS,
                    "monitored service not ready: {}",
                    failure
                );
                if attempt < APP_WAIT_ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    warn!("monitored service still unreachable, starting anyway");
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "remedy_bot=debug,remedy_probe=debug,remedy_detect=debug,remedy_breaker=debug,\
         remedy_actuate=debug,remedy_store=debug,remedy_notify=debug"
    } else {
        "remedy_bot=info,remedy_probe=info,remedy_detect=info,remedy_breaker=info,\
         remedy_actuate=info,remedy_store=info,remedy_notify=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
