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

use chrono::{NaiveTime, Utc};
use clap::{Args, Parser};
use prometheus_client::registry::Registry;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::task;
use tracing::Level;
use weathercheck::alarm::{AlarmSettings, ThresholdAlarm, DEFAULT_MIN_EXCURSION_HOURS, DEFAULT_RE_ALERT_INTERVAL_HOURS};
use weathercheck::artifact::ArtifactWriter;
use weathercheck::config::StationConfig;
use weathercheck::email::SmtpAlertSink;
use weathercheck::http::{self, RequestState};
use weathercheck::metrics::{RecorderMetrics, SensorMetrics};
use weathercheck::record::{self, AlertNotice, Recorder, DEFAULT_THRESHOLD_F};
use weathercheck::runtime::{self, ControlLoop, Shutdown};
use weathercheck::schedule::{parse_time_of_day, PeriodicScheduler, ScheduleError, Trigger};
use weathercheck::sensor::{open_bus, parse_address, Bme280Sensor, Bme280Source, DEFAULT_ADDRESS, DEFAULT_BUS};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_PLOT_DIR: &str = "plots";
const DEFAULT_DATA_DIR: &str = "data";

/// When to write plots and data files of buffered readings
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct FlushSchedule {
    /// Flush once a day at this local time of day (HH:MM or HH:MM:SS, in the
    /// configured time zone)
    #[arg(long, value_parser = parse_time_of_day)]
    plot_tod: Option<NaiveTime>,

    /// Flush at this interval, in seconds
    #[arg(long)]
    plot_secs: Option<u64>,
}

impl FlushSchedule {
    fn trigger(&self) -> Result<Trigger, ScheduleError> {
        match self.plot_tod {
            Some(t) => Ok(Trigger::DailyAt(t)),
            None => Trigger::every_secs(self.plot_secs.unwrap_or(0)),
        }
    }
}

/// Record temperature readings from a BME280 sensor and alert on sustained cold
///
/// Sample a BME280 sensor connected via I2C at a fixed interval, periodically
/// writing an SVG plot and a CSV file of everything sampled since the previous
/// flush. When the temperature stays below a threshold for long enough, an email
/// with a plot of the readings attached is sent to the recipients from the
/// configuration file.
#[derive(Debug, Parser)]
#[command(name = "weather-record", version = clap::crate_version!())]
struct RecordApplication {
    /// I2C bus the BME280 sensor is connected to
    #[arg(long, default_value_t = DEFAULT_BUS)]
    bus: u8,

    /// I2C address of the BME280 sensor, in hex (0x77) or decimal
    #[arg(long, default_value_t = DEFAULT_ADDRESS, value_parser = parse_address)]
    address: u16,

    /// Alert when the temperature stays below this value, in degrees fahrenheit
    #[arg(long, default_value_t = DEFAULT_THRESHOLD_F)]
    thresh: f64,

    /// Read the sensor at this interval, in seconds
    #[arg(long)]
    revisit_secs: u64,

    #[command(flatten)]
    flush: FlushSchedule,

    /// Directory to write plots to
    #[arg(long, default_value = DEFAULT_PLOT_DIR)]
    plot_dir: PathBuf,

    /// Directory to write CSV data files to
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// YAML file with the time zone and the account used to send alerts
    #[arg(long)]
    config: PathBuf,

    /// Minimum time between alerts, in hours
    #[arg(long, default_value_t = DEFAULT_RE_ALERT_INTERVAL_HOURS)]
    re_alert_hours: i64,

    /// How long the temperature must stay below the threshold before alerting, in hours
    #[arg(long, default_value_t = DEFAULT_MIN_EXCURSION_HOURS)]
    min_excursion_hours: i64,

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
    let opts = RecordApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let config = StationConfig::from_path(&opts.config).unwrap_or_else(|e| {
        tracing::error!(message = "failed to load configuration", path = %opts.config.display(), error = %e);
        process::exit(1)
    });

    let sample_trigger = Trigger::every_secs(opts.revisit_secs).unwrap_or_else(|e| {
        tracing::error!(message = "invalid sample interval", error = %e);
        process::exit(1)
    });

    let flush_trigger = opts.flush.trigger().unwrap_or_else(|e| {
        tracing::error!(message = "invalid flush schedule", error = %e);
        process::exit(1)
    });

    for dir in [&opts.plot_dir, &opts.data_dir] {
        fs::create_dir_all(dir).unwrap_or_else(|e| {
            tracing::error!(message = "failed to create output directory", path = %dir.display(), error = %e);
            process::exit(1)
        });
    }

    let sensor = open_bus(opts.bus, opts.address)
        .and_then(Bme280Sensor::from_bus)
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to initialize sensor", bus = opts.bus, address = opts.address, error = %e);
            process::exit(1)
        });

    let mut registry = <Registry>::default();
    let sensor_metrics = SensorMetrics::new(&mut registry);
    let recorder_metrics = RecorderMetrics::new(&mut registry);

    let settings = AlarmSettings {
        re_alert_interval: chrono::Duration::hours(opts.re_alert_hours),
        min_excursion_duration: chrono::Duration::hours(opts.min_excursion_hours),
    };
    let email = config.emergency_email.clone();
    let notice = AlertNotice::new(email.message.clone(), email.recipients.clone());
    let mut recorder = Recorder::new(
        opts.thresh,
        Box::new(Bme280Source::new(sensor)),
        ThresholdAlarm::new(settings),
        ArtifactWriter::new(&opts.plot_dir, &opts.data_dir),
        Box::new(SmtpAlertSink::new(email)),
        notice,
    )
    .with_metrics(sensor_metrics, recorder_metrics);

    let mut scheduler = PeriodicScheduler::new(config.timezone);
    record::register_jobs(&mut scheduler, sample_trigger, flush_trigger, Utc::now());

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
        message = "starting recorder",
        threshold = opts.thresh,
        plot_dir = %opts.plot_dir.display(),
        data_dir = %opts.data_dir.display()
    );

    let control = ControlLoop::new(shutdown);
    let result = task::spawn_blocking(move || record::run(&control, &mut scheduler, &mut recorder)).await?;

    match result {
        Ok(signal) => {
            tracing::info!(message = "recorder shutdown", signal = signal);
            process::exit(runtime::signal_exit_code(signal))
        }
        Err(e) => {
            tracing::error!(message = "recorder stopped", error = %e);
            process::exit(1)
        }
    }
}
