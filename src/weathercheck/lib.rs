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

//! Record BME280 weather readings, alert on sustained cold, and publish station metrics over MQTT.
//!
//! ## Features
//!
//! Weathercheck reads temperature, humidity, and pressure from a
//! [BME280 sensor](https://learn.adafruit.com/adafruit-bme280-humidity-barometric-pressure-temperature-sensor-breakout)
//! connected via I2C, usually to a Raspberry PI. It is made up of several programs:
//!
//! * `weather-record` - Sample the sensor on a fixed interval and periodically write a plot and a
//!   CSV file of the readings. When the temperature stays below a threshold (55F by default) for
//!   long enough, email an alert with a plot of the cold period attached. Alerts are repeated at
//!   most once a day while it stays cold.
//! * `weather-scrape` - Publish sensor readings and host statistics (disk, memory, CPU, uptime) as
//!   JSON to an MQTT broker using mutual TLS. A feed that fails more than three times in a row is
//!   disabled and the program exits once every feed is disabled.
//! * `weather-watch` - Subscribe to reports published by any number of stations and log them.
//! * `weather-show` - Print the current reading, with an altitude estimate, every two seconds.
//!
//! `weather-record` and `weather-scrape` can optionally expose Prometheus metrics at `/metrics`
//! with the `--bind` flag. The following metrics are exported:
//!
//! * `weathercheck_temperature_degrees` - Degrees celsius measured by the sensor.
//! * `weathercheck_dewpoint_degrees` - Dewpoint in degrees celsius.
//! * `weathercheck_relative_humidity` - Relative humidity (from 0 to 100) measured by the sensor.
//! * `weathercheck_pressure_hpa` - Pressure in hectopascals measured by the sensor.
//! * `weathercheck_last_read_timestamp` - UNIX timestamp of the last time the sensor was correctly read.
//! * `weathercheck_collections_total` - Total number of attempts to read the sensor.
//! * `weathercheck_errors_total` - Total errors by type while trying to read the sensor.
//! * `weathercheck_alarm_triggered` - 1 while the temperature is below the alarm threshold.
//! * `weathercheck_alerts_total` - Total emergency alerts by outcome.
//! * `weathercheck_flushes_total` - Total plot and data flushes.
//! * `weathercheck_flushed_readings_total` - Total readings written by flushes.
//! * `weathercheck_publishes_total` - Total MQTT reports by feed and outcome.
//!
//! ## Build
//!
//! `weathercheck` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//! Since it's meant to be run on a Raspberry PI, you will also likely need to cross-compile it.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Install
//!
//! ### I2C
//!
//! The BME280 must be connected to the I2C header pins of the Raspberry PI (SDA and SCL, bus `1`)
//! and I2C must be enabled with `raspi-config`. Depending on how its `SDO` pin is wired the sensor
//! answers on address `0x77` (the default) or `0x76`.
//!
//! ### Configuration
//!
//! `weather-record` reads the account used to send alerts from a YAML file given with `--config`.
//!
//! ```yaml
//! timezone: America/New_York
//! emergency_email:
//!   username: station@example.com
//!   passkey: app-password
//!   subject: Greenhouse is cold
//!   message: The greenhouse has been below the alarm threshold for a while.
//!   recipients:
//!     - someone@example.com
//! ```
//!
//! The `timezone` is used for the `--plot-tod` time of day and defaults to UTC. The SMTP server
//! defaults to `smtp.gmail.com` port `587` and can be changed with `smtp_server` and `smtp_port`.
//!
//! ### Run
//!
//! ```text
//! weather-record --config /etc/weathercheck.yaml --revisit-secs 60 --plot-tod 06:00:00
//! weather-scrape --broker mqtt.example.com --cert-dir /etc/weathercheck/certs --system-name greenhouse
//! ```
//!

pub mod alarm;
pub mod artifact;
pub mod buffer;
pub mod config;
pub mod email;
pub mod failure;
pub mod http;
pub mod metrics;
pub mod mqtt;
pub mod record;
pub mod runtime;
pub mod schedule;
pub mod scrape;
pub mod sensor;
pub mod system;
