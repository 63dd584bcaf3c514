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

use crate::alarm::ThresholdAlarm;
use crate::sensor::Sample;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ErrorsLabels {
    kind: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PublishLabels {
    feed: String,
    outcome: String,
}

fn outcome(success: bool) -> String {
    if success { "success" } else { "failure" }.to_owned()
}

/// Collection of Prometheus metrics updated based on BME280 sensor samples. The most
/// recent valid temperature, dewpoint, humidity, and pressure are emitted as gauges.
#[derive(Debug, Clone)]
pub struct SensorMetrics {
    temperature: Gauge<f64, AtomicU64>,
    dewpoint: Gauge<f64, AtomicU64>,
    humidity: Gauge<f64, AtomicU64>,
    pressure: Gauge<f64, AtomicU64>,
    last_reading: Gauge<f64, AtomicU64>,
    collections: Counter,
    errors: Family<ErrorsLabels, Counter>,
}

impl SensorMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let temperature = Gauge::<f64, AtomicU64>::default();
        let dewpoint = Gauge::<f64, AtomicU64>::default();
        let humidity = Gauge::<f64, AtomicU64>::default();
        let pressure = Gauge::<f64, AtomicU64>::default();
        let last_reading = Gauge::<f64, AtomicU64>::default();
        let collections = Counter::default();
        let errors = Family::<ErrorsLabels, Counter>::default();

        reg.register(
            "weathercheck_temperature_degrees",
            "Temperature in celsius",
            temperature.clone(),
        );
        reg.register(
            "weathercheck_dewpoint_degrees",
            "Dewpoint in celsius",
            dewpoint.clone(),
        );
        reg.register(
            "weathercheck_relative_humidity",
            "Relative humidity (0-100)",
            humidity.clone(),
        );
        reg.register("weathercheck_pressure_hpa", "Pressure in hectopascals", pressure.clone());
        reg.register(
            "weathercheck_last_read_timestamp",
            "Timestamp of last successful read",
            last_reading.clone(),
        );
        reg.register(
            "weathercheck_collections",
            "Number of attempted reads",
            collections.clone(),
        );
        reg.register("weathercheck_errors", "Number of failed reads by type", errors.clone());

        Self {
            temperature,
            dewpoint,
            humidity,
            pressure,
            last_reading,
            collections,
            errors,
        }
    }

    pub fn update(&self, sample: &Sample) {
        self.collections.inc();

        match sample {
            Sample::Ok(r) => {
                self.temperature.set(r.temperature_c());
                self.dewpoint.set(r.dewpoint_c());
                self.humidity.set(r.humidity());
                self.pressure.set(r.pressure());
                self.last_reading.set(r.timestamp().timestamp() as f64);
            }
            Sample::Failed(_, kind) => {
                let labels = ErrorsLabels {
                    kind: kind.as_label().to_owned(),
                };

                self.errors.get_or_create(&labels).inc();
            }
        }
    }
}

/// Metrics about the alarm, alerts, and artifacts written by the recorder.
#[derive(Debug, Clone)]
pub struct RecorderMetrics {
    triggered: Gauge,
    alerts: Family<OutcomeLabels, Counter>,
    flushes: Counter,
    flushed_readings: Counter,
}

impl RecorderMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let triggered = Gauge::default();
        let alerts = Family::<OutcomeLabels, Counter>::default();
        let flushes = Counter::default();
        let flushed_readings = Counter::default();

        reg.register(
            "weathercheck_alarm_triggered",
            "1 while temperature is below the alarm threshold, 0 otherwise",
            triggered.clone(),
        );
        reg.register("weathercheck_alerts", "Number of emergency alerts by outcome", alerts.clone());
        reg.register("weathercheck_flushes", "Number of plot and data flushes", flushes.clone());
        reg.register(
            "weathercheck_flushed_readings",
            "Number of readings written by flushes",
            flushed_readings.clone(),
        );

        Self {
            triggered,
            alerts,
            flushes,
            flushed_readings,
        }
    }

    pub fn observe(&self, alarm: &ThresholdAlarm) {
        self.triggered.set(i64::from(alarm.is_triggered()));
    }

    pub fn alert(&self, success: bool) {
        self.alerts
            .get_or_create(&OutcomeLabels {
                outcome: outcome(success),
            })
            .inc();
    }

    pub fn flush(&self, readings: usize) {
        self.flushes.inc();
        self.flushed_readings.inc_by(readings as u64);
    }
}

/// Metrics about reports published to the MQTT broker, per feed.
#[derive(Debug, Clone)]
pub struct FeedMetrics {
    publishes: Family<PublishLabels, Counter>,
}

impl FeedMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let publishes = Family::<PublishLabels, Counter>::default();
        reg.register(
            "weathercheck_publishes",
            "Number of attempted feed publishes by outcome",
            publishes.clone(),
        );

        Self { publishes }
    }

    pub fn publish(&self, feed: &str, success: bool) {
        self.publishes
            .get_or_create(&PublishLabels {
                feed: feed.to_owned(),
                outcome: outcome(success),
            })
            .inc();
    }
}

#[cfg(test)]
mod test {
    use super::{FeedMetrics, RecorderMetrics, SensorMetrics};
    use crate::alarm::{AlarmSettings, ThresholdAlarm};
    use crate::sensor::{Measurement, Reading, Sample, SensorErrorKind};
    use chrono::{TimeZone, Utc};
    use prometheus_client::encoding::text;
    use prometheus_client::registry::Registry;

    fn encode(reg: &Registry) -> String {
        let mut buf = String::new();
        text::encode(&mut buf, reg).unwrap();
        buf
    }

    #[test]
    fn test_sensor_metrics_success_and_error() {
        let mut reg = <Registry>::default();
        let metrics = SensorMetrics::new(&mut reg);
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let reading = Reading::new(
            Measurement {
                temperature: 20.0.into(),
                humidity: 50.0.into(),
                pressure: 1013.25.into(),
            },
            now,
        )
        .unwrap();

        metrics.update(&Sample::Ok(reading));
        metrics.update(&Sample::Failed(now, SensorErrorKind::ReadTimeout));

        let out = encode(&reg);
        assert!(out.contains("weathercheck_temperature_degrees 20"), "{}", out);
        assert!(out.contains("weathercheck_collections_total 2"), "{}", out);
        assert!(out.contains("weathercheck_errors_total{kind=\"timeout\"} 1"), "{}", out);
        assert!(out.contains("weathercheck_last_read_timestamp 1735689600"), "{}", out);
    }

    #[test]
    fn test_recorder_and_feed_metrics() {
        let mut reg = <Registry>::default();
        let recorder = RecorderMetrics::new(&mut reg);
        let feeds = FeedMetrics::new(&mut reg);

        recorder.observe(&ThresholdAlarm::new(AlarmSettings::default()));
        recorder.alert(false);
        recorder.flush(12);
        feeds.publish("environment", true);
        feeds.publish("environment", true);
        feeds.publish("system", false);

        let out = encode(&reg);
        assert!(out.contains("weathercheck_alarm_triggered 0"), "{}", out);
        assert!(out.contains("weathercheck_alerts_total{outcome=\"failure\"} 1"), "{}", out);
        assert!(out.contains("weathercheck_flushed_readings_total 12"), "{}", out);
        assert!(
            out.contains("weathercheck_publishes_total{feed=\"environment\",outcome=\"success\"} 2"),
            "{}",
            out
        );
    }
}
