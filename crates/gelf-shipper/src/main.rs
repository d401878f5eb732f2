#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gelf_client_core::{AmbientContext, Logger, LoggerConfig, LoggerEnv, Severity};

/// How often queued delivery work is flushed while the pipeline is idle.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Severity assigned to input lines unless `GELF_SHIPPER_LEVEL` overrides it.
const DEFAULT_RECORD_LEVEL: Severity = Severity::Informational;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("GELF_SHIPPER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let logger_env = LoggerEnv::from_os_env();
    if !logger_env.has_endpoint() {
        error!("Neither GELF_URL nor GELF_WS_URL is set. Shutting down shipper.");
        return;
    }

    let record_level = env::var("GELF_SHIPPER_LEVEL")
        .ok()
        .and_then(|value| value.parse::<Severity>().ok())
        .unwrap_or(DEFAULT_RECORD_LEVEL);

    let ambient = AmbientContext::from_parts(&logger_env, None);
    let logger = match Logger::new(LoggerConfig::from_env(&logger_env), ambient) {
        Ok(logger) => logger,
        Err(e) => {
            error!("Error creating delivery logger on shipper startup: {e}");
            return;
        }
    };

    info!(
        session = logger.session_id(),
        level = record_level.label(),
        "Starting GELF shipper"
    );

    logger.scope(run_pipeline(record_level)).await;

    logger.shutdown().await;
    let stats = logger.stats();
    info!(
        sent = stats.sent,
        failed = stats.failed,
        skipped = stats.skipped,
        "Shipper finished"
    );
}

/// Reads lines from standard input and ships each as one record, flushing
/// periodically, until the input closes or an interrupt arrives.
async fn run_pipeline(record_level: Severity) {
    let Some(logger) = Logger::current() else {
        error!("No delivery logger bound to the pipeline task");
        return;
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut flush_interval = interval(FLUSH_INTERVAL);
    flush_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        ship_line(&logger, record_level, line);
                    }
                    Ok(None) => {
                        info!("Input stream closed; draining");
                        break;
                    }
                    Err(e) => {
                        error!("Error reading input stream: {e}");
                        break;
                    }
                }
            }
            _ = flush_interval.tick() => {
                debug!("Flushing queued deliveries");
                logger.flush().await;
            }
            _ = signal::ctrl_c() => {
                info!("Interrupt received; draining");
                break;
            }
        }
    }
}

/// Emits one input line at the configured severity.
fn ship_line(logger: &Logger, record_level: Severity, line: &str) {
    match record_level {
        Severity::Emergency => logger.emergency(line),
        Severity::Alert => logger.alert(line),
        Severity::Critical => logger.critical(line),
        Severity::Error => logger.error(line),
        Severity::Warning => logger.warning(line),
        Severity::Notice => logger.notice(line),
        Severity::Informational => logger.info(line),
        Severity::Debug => logger.debug(line),
    }
}
