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

use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::Level;
use weathercheck::mqtt::{self, decode_payload, MqttSettings, TlsFiles, DEFAULT_KEEP_ALIVE, DEFAULT_PORT};
use weathercheck::runtime;
use weathercheck::scrape::{ENVIRONMENT_TOPIC, SYSTEM_TOPIC};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;

/// Log reports published by weather stations to an MQTT broker
///
/// Subscribe to the environment and host statistics reports of every station
/// publishing to the broker and log each decoded report. Reports that can't be
/// decoded are logged and skipped.
#[derive(Debug, Parser)]
#[command(name = "weather-watch", version = clap::crate_version!())]
struct WatchApplication {
    /// Host name of the MQTT broker
    #[arg(long)]
    broker: String,

    /// Port of the MQTT broker
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory containing ca.pem, client.pem, and client.key for mutual TLS with
    /// the broker. Plain TCP is used when not set
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Only watch the station publishing with this system name. All stations are
    /// watched when not set
    #[arg(long)]
    system_name: Option<String>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = WatchApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let settings = MqttSettings {
        client_id: format!("weathercheck-watch-{}", process::id()),
        broker: opts.broker.clone(),
        port: opts.port,
        keep_alive: DEFAULT_KEEP_ALIVE,
        tls: opts.cert_dir.as_ref().map(TlsFiles::from_dir),
    };

    let (_link, transport) = mqtt::connect(&settings).unwrap_or_else(|e| {
        tracing::error!(message = "failed to configure MQTT client", broker = %opts.broker, error = %e);
        process::exit(1)
    });

    let station = opts.system_name.as_deref().unwrap_or("+");
    let transport = transport
        .subscribe(format!("{}/{}", station, ENVIRONMENT_TOPIC))
        .subscribe(format!("{}/{}", station, SYSTEM_TOPIC));

    tracing::info!(message = "watching for reports", broker = %opts.broker, port = opts.port, station = station);

    let watch = transport.run(|topic, payload| match decode_payload(payload) {
        Some(report) => {
            let fields = serde_json::Value::Object(report);
            tracing::info!(message = "received report", topic = topic, report = %fields);
        }
        None => {
            tracing::warn!(message = "unable to decode report", topic = topic, bytes = payload.len());
        }
    });

    let code = tokio::select! {
        _ = watch => {
            tracing::error!(message = "gave up connecting to broker");
            1
        }
        signal = runtime::wait_for_signal() => {
            tracing::info!(message = "watch shutdown", signal = signal);
            runtime::signal_exit_code(signal)
        }
    };

    process::exit(code)
}
