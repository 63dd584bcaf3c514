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
use clap::Parser;
use std::process;
use std::thread;
use std::time::Duration;
use tracing::Level;
use weathercheck::sensor::{
    open_bus, parse_address, Bme280Sensor, Bme280Source, Sample, SampleSource, DEFAULT_ADDRESS, DEFAULT_BUS,
};

const DEFAULT_LOG_LEVEL: Level = Level::WARN;
const DEFAULT_REFRESH_SECS: u64 = 2;

/// Print readings from a BME280 sensor until interrupted
#[derive(Debug, Parser)]
#[command(name = "weather-show", version = clap::crate_version!())]
struct ShowApplication {
    /// I2C bus the BME280 sensor is connected to
    #[arg(long, default_value_t = DEFAULT_BUS)]
    bus: u8,

    /// I2C address of the BME280 sensor, in hex (0x77) or decimal
    #[arg(long, default_value_t = DEFAULT_ADDRESS, value_parser = parse_address)]
    address: u16,

    /// Read the sensor at this interval, in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

fn main() {
    let opts = ShowApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let sensor = open_bus(opts.bus, opts.address)
        .and_then(Bme280Sensor::from_bus)
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to initialize sensor", bus = opts.bus, address = opts.address, error = %e);
            process::exit(1)
        });

    let mut source = Bme280Source::new(sensor);
    let refresh = Duration::from_secs(opts.refresh_secs.max(1));

    loop {
        match source.sample(Utc::now()) {
            Sample::Ok(r) => println!(
                "{}  {:.1}F ({:.1}C)  dewpoint {:.1}F  humidity {:.1}%  pressure {:.1}hPa  altitude {:.2}m",
                r.timestamp().format("%Y-%m-%d %H:%M:%S"),
                r.temperature_f(),
                r.temperature_c(),
                r.dewpoint_f(),
                r.humidity(),
                r.pressure(),
                r.altitude()
            ),
            Sample::Failed(ts, kind) => println!("{}  read failed ({})", ts.format("%Y-%m-%d %H:%M:%S"), kind.as_label()),
        }

        thread::sleep(refresh);
    }
}
