// Weathercheck - Weather station recorder and MQTT scraper
//
// Copyright 2025 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use chrono::Utc;
use chrono_tz::Tz;
use clap::Parser;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use sysinfo::System;
use tokio::task;
use tracing::Level;
use weathercheck::failure::FailureTracker;
use weathercheck::http::{self, RequestState};
use weathercheck::metrics::{FeedMetrics, SensorMetrics};
use weathercheck::mqtt::{self, MqttSettings, TlsFiles, DEFAULT_KEEP_ALIVE, DEFAULT_PORT};
use weathercheck::runtime::{self, ControlLoop, Shutdown};
use weathercheck::schedule::{PeriodicScheduler, Trigger};
use weathercheck::scrape::{self, Scraper, DEFAULT_ENVIRONMENT_SECS, DEFAULT_SYSTEM_SECS};
use weathercheck::sensor::{open_bus, parse_address, Bme280Sensor, Bme280Source, DEFAULT_ADDRESS, DEFAULT_BUS};
use weathercheck::system::HostSystem;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_SYSTEM_NAME: &str = "weathercheck";

/// Publish BME280 sensor readings and host statistics to an MQTT broker
///
/// Environment readings from a BME280 sensor connected via I2C and statistics
/// about the host (disk, memory, CPU, and uptime) are published as JSON reports
/// on independent intervals. A feed that fails more than three times in a row
/// is disabled. Once every feed is disabled the program exits with an error.
#[derive(Debug, Parser)]
#[command(name = "weather-scrape", version = clap::crate_version!())]
struct ScrapeApplication {
    /// Host name of the MQTT broker
    #[arg(long)]
    broker: String,

    /// Port of the MQTT broker
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Publish environment readings at this interval, in seconds
    #[arg(long, default_value_t = DEFAULT_ENVIRONMENT_SECS)]
    env_revisit_secs: u64,

    /// Publish host statistics at this interval, in seconds
    #[arg(long, default_value_t = DEFAULT_SYSTEM_SECS)]
    sys_revisit_secs: u64,

    /// Directory containing ca.pem, client.pem, and client.key for mutual TLS with
    /// the broker. Plain TCP is used when not set
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Prefix of the topics reports are published to. Defaults to the host name
    #[arg(long)]
    system_name: Option<String>,

    /// I2C bus the BME280 sensor is connected to
    #[arg(long, default_value_t = DEFAULT_BUS)]
    bus: u8,

    /// I2C address of the BME280 sensor, in hex (0x77) or decimal
    #[arg(long, default_value_t = DEFAULT_ADDRESS, value_parser = parse_address)]
    address: u16,

    /// Address to expose Prometheus metrics on. Metrics are not exposed unless set
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = ScrapeApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let (env_trigger, sys_trigger) = Trigger::every_secs(opts.env_revisit_secs)
        .and_then(|env| Trigger::every_secs(opts.sys_revisit_secs).map(|sys| (env, sys)))
        .unwrap_or_else(|e| {
            tracing::error!(message = "invalid feed interval", error = %e);
            process::exit(1)
        });

    let sensor = open_bus(opts.bus, opts.address)
        .and_then(Bme280Sensor::from_bus)
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to initialize sensor", bus = opts.bus, address = opts.address, error = %e);
            process::exit(1)
        });

    let system_name = opts
        .system_name
        .clone()
        .or_else(System::host_name)
        .unwrap_or_else(|| DEFAULT_SYSTEM_NAME.to_owned());

    let settings = MqttSettings {
        client_id: format!("weathercheck-{}-{}", system_name, process::id()),
        broker: opts.broker.clone(),
        port: opts.port,
        keep_alive: DEFAULT_KEEP_ALIVE,
        tls: opts.cert_dir.as_ref().map(TlsFiles::from_dir),
    };

    let (link, transport) = mqtt::connect(&settings).unwrap_or_else(|e| {
        tracing::error!(message = "failed to configure MQTT client", broker = %opts.broker, error = %e);
        process::exit(1)
    });
    task::spawn(transport.run(|_, _| {}));

    let mut registry = <Registry>::default();
    let sensor_metrics = SensorMetrics::new(&mut registry);
    let feed_metrics = FeedMetrics::new(&mut registry);

    let mut scraper = Scraper::new(
        system_name.clone(),
        Box::new(Bme280Source::new(sensor)),
        Box::new(HostSystem::new("/")),
        Box::new(link),
    )
    .with_metrics(sensor_metrics, feed_metrics);

    // Only fixed intervals are used so the time zone doesn't matter
    let mut scheduler = PeriodicScheduler::new(Tz::UTC);
    let (env, sys) = scrape::register_jobs(&mut scheduler, env_trigger, sys_trigger, Utc::now());
    let mut tracker = FailureTracker::new();
    tracker.track(env);
    tracker.track(sys);

    if let Some(bind) = opts.bind {
        let state = Arc::new(RequestState::new(registry));
        task::spawn(async move {
            if let Err(e) = http::serve(bind, state).await {
                tracing::error!(message = "metrics server failed", address = %bind, error = %e);
            }
        });
    }

    let shutdown = Shutdown::new();
    let signals = shutdown.clone();
    task::spawn(async move {
        let signal = runtime::wait_for_signal().await;
        signals.trigger(signal);
    });

    tracing::info!(
        message = "starting scraper",
        broker = %opts.broker,
        port = opts.port,
        system_name = %system_name
    );

    let control = ControlLoop::new(shutdown);
    let result = task::spawn_blocking(move || {
        control.run(&mut scheduler, &mut scraper, |sched, _, runs| tracker.supervise(sched, runs))
    })
    .await?;

    match result {
        Ok(signal) => {
            tracing::info!(message = "scraper shutdown", signal = signal);
            process::exit(runtime::signal_exit_code(signal))
        }
        Err(e) => {
            tracing::error!(message = "scraper stopped", error = %e);
            process::exit(1)
        }
    }
}
