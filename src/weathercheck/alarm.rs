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

use crate::sensor::Reading;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

pub const DEFAULT_RE_ALERT_INTERVAL_HOURS: i64 = 24;
pub const DEFAULT_MIN_EXCURSION_HOURS: i64 = 2;

/// What the owner of an alarm should do in response to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmAction {
    /// No decision: the reading was invalid or above the threshold with no
    /// excursion in progress.
    None,
    /// An excursion started or is still in progress but no alert is due.
    Continue,
    /// The excursion ended with a reading at or above the threshold.
    Resolve,
    /// An excursion has lasted long enough that an alert should be sent.
    Alert,
}

impl AlarmAction {
    pub fn as_label(&self) -> &'static str {
        match self {
            AlarmAction::None => "none",
            AlarmAction::Continue => "continue",
            AlarmAction::Resolve => "resolve",
            AlarmAction::Alert => "alert",
        }
    }
}

impl fmt::Display for AlarmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_label().fmt(f)
    }
}

/// How long an excursion must last before alerting and how long to wait
/// between alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmSettings {
    pub re_alert_interval: Duration,
    pub min_excursion_duration: Duration,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        AlarmSettings {
            re_alert_interval: Duration::hours(DEFAULT_RE_ALERT_INTERVAL_HOURS),
            min_excursion_duration: Duration::hours(DEFAULT_MIN_EXCURSION_HOURS),
        }
    }
}

/// Track whether readings are below a threshold and decide when a sustained
/// excursion below it should produce an alert.
///
/// An alert fires only while an excursion is in progress, once it has lasted
/// longer than `min_excursion_duration` and more than `re_alert_interval` has
/// passed since the previous alert. Alerting doesn't end the excursion so a
/// long enough excursion alerts again every `re_alert_interval`.
///
/// Invalid (NaN) readings never change the state of the alarm.
#[derive(Debug, Clone)]
pub struct ThresholdAlarm {
    settings: AlarmSettings,
    triggered: bool,
    excursion_start: Option<DateTime<Utc>>,
    last_alert_sent: Option<DateTime<Utc>>,
    excursion: Vec<Reading>,
}

impl ThresholdAlarm {
    pub fn new(settings: AlarmSettings) -> Self {
        ThresholdAlarm {
            settings,
            triggered: false,
            excursion_start: None,
            last_alert_sent: None,
            excursion: Vec::new(),
        }
    }

    /// Create an alarm that behaves as if an alert was last sent at `sent`.
    pub fn with_last_alert(settings: AlarmSettings, sent: DateTime<Utc>) -> Self {
        ThresholdAlarm {
            last_alert_sent: Some(sent),
            ..Self::new(settings)
        }
    }

    pub fn settings(&self) -> AlarmSettings {
        self.settings
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Start of the current excursion, `None` when not triggered.
    pub fn excursion_start(&self) -> Option<DateTime<Utc>> {
        if self.triggered {
            self.excursion_start
        } else {
            None
        }
    }

    pub fn last_alert_sent(&self) -> Option<DateTime<Utc>> {
        self.last_alert_sent
    }

    /// Readings from the most recent excursion. These are kept after the
    /// excursion resolves but stop growing until the next one starts.
    pub fn excursion(&self) -> &[Reading] {
        &self.excursion
    }

    /// Evaluate a new reading against `threshold` at time `now`.
    pub fn observe(&mut self, reading: &Reading, threshold: f64, now: DateTime<Utc>) -> AlarmAction {
        if !reading.is_valid() {
            return AlarmAction::None;
        }

        let below = reading.primary_value() < threshold;
        match (below, self.triggered) {
            (true, false) => {
                self.triggered = true;
                self.excursion_start = Some(reading.timestamp());
                self.excursion = vec![reading.clone()];
                AlarmAction::Continue
            }
            (false, true) => {
                self.triggered = false;
                AlarmAction::Resolve
            }
            (true, true) => {
                self.excursion.push(reading.clone());
                if self.alert_due(now) {
                    self.last_alert_sent = Some(now);
                    AlarmAction::Alert
                } else {
                    AlarmAction::Continue
                }
            }
            (false, false) => AlarmAction::None,
        }
    }

    fn alert_due(&self, now: DateTime<Utc>) -> bool {
        let since_alert = self
            .last_alert_sent
            .map(|sent| now > sent + self.settings.re_alert_interval)
            // never alerted
            .unwrap_or(true);

        let long_enough = self
            .excursion_start
            .map(|start| now > start + self.settings.min_excursion_duration)
            .unwrap_or(false);

        since_alert && long_enough
    }
}

#[cfg(test)]
mod test {
    use super::{AlarmAction, AlarmSettings, ThresholdAlarm};
    use crate::sensor::{Reading, SensorErrorKind, Sample};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(minute: i64) -> DateTime<Utc> {
        epoch() + Duration::minutes(minute)
    }

    fn reading(minute: i64, temperature_f: f64) -> Reading {
        Reading::from_fahrenheit(temperature_f, at(minute))
    }

    fn minutes_settings(re_alert: i64, min_excursion: i64) -> AlarmSettings {
        AlarmSettings {
            re_alert_interval: Duration::minutes(re_alert),
            min_excursion_duration: Duration::minutes(min_excursion),
        }
    }

    #[test]
    fn test_excursion_and_resolve() {
        let mut alarm = ThresholdAlarm::new(AlarmSettings::default());
        let temps = [60.0, 50.0, 48.0, 52.0, 61.0];
        let expected = [
            AlarmAction::None,
            AlarmAction::Continue,
            AlarmAction::Continue,
            AlarmAction::Continue,
            AlarmAction::Resolve,
        ];

        for (t, (&temp, &want)) in temps.iter().zip(expected.iter()).enumerate() {
            let t = t as i64;
            assert_eq!(want, alarm.observe(&reading(t, temp), 55.0, at(t)), "minute {}", t);

            if t == 1 {
                assert!(alarm.is_triggered());
                assert_eq!(Some(at(1)), alarm.excursion_start());
            }
        }

        assert!(!alarm.is_triggered());
        assert_eq!(None, alarm.excursion_start());
        // Kept for inspection after resolving
        assert_eq!(3, alarm.excursion().len());
    }

    #[test]
    fn test_equal_to_threshold_is_not_below() {
        let mut alarm = ThresholdAlarm::new(AlarmSettings::default());
        assert_eq!(AlarmAction::None, alarm.observe(&reading(0, 55.0), 55.0, at(0)));
        assert_eq!(AlarmAction::Continue, alarm.observe(&reading(1, 54.9), 55.0, at(1)));
        assert_eq!(AlarmAction::Resolve, alarm.observe(&reading(2, 55.0), 55.0, at(2)));
    }

    #[test]
    fn test_sustained_excursion_alerts_spaced_by_re_alert_interval() {
        // Behaves as though an alert went out at the start of the excursion
        let mut alarm = ThresholdAlarm::with_last_alert(minutes_settings(60, 30), at(0));
        let mut alerts = Vec::new();

        for t in 0..=200 {
            if alarm.observe(&reading(t, 40.0), 55.0, at(t)) == AlarmAction::Alert {
                alerts.push(t);
                assert!(alarm.is_triggered());
            }
        }

        assert_eq!(vec![61, 122, 183], alerts);
        assert_eq!(201, alarm.excursion().len());
        assert_eq!(Some(at(183)), alarm.last_alert_sent());
    }

    #[test]
    fn test_first_alert_waits_for_min_excursion() {
        let mut alarm = ThresholdAlarm::new(minutes_settings(60, 30));
        let mut alerts = Vec::new();

        for t in 0..=100 {
            if alarm.observe(&reading(t, 40.0), 55.0, at(t)) == AlarmAction::Alert {
                alerts.push(t);
            }
        }

        // Never alerted before so only the excursion length gates the first alert
        assert_eq!(vec![31, 92], alerts);
    }

    #[test]
    fn test_new_excursion_waits_for_min_duration_even_if_re_alert_elapsed() {
        let mut alarm = ThresholdAlarm::new(minutes_settings(60, 30));
        for t in 0..=31 {
            alarm.observe(&reading(t, 40.0), 55.0, at(t));
        }
        assert_eq!(Some(at(31)), alarm.last_alert_sent());

        assert_eq!(AlarmAction::Resolve, alarm.observe(&reading(32, 70.0), 55.0, at(32)));

        // New excursion starting well after the re-alert interval
        let mut first = None;
        for t in 200..=300 {
            if alarm.observe(&reading(t, 40.0), 55.0, at(t)) == AlarmAction::Alert {
                first = Some(t);
                break;
            }
        }

        assert_eq!(Some(231), first);
        assert_eq!(at(200), alarm.excursion()[0].timestamp());
    }

    #[test]
    fn test_new_excursion_replaces_buffer() {
        let mut alarm = ThresholdAlarm::new(AlarmSettings::default());
        alarm.observe(&reading(0, 40.0), 55.0, at(0));
        alarm.observe(&reading(1, 41.0), 55.0, at(1));
        alarm.observe(&reading(2, 60.0), 55.0, at(2));
        alarm.observe(&reading(3, 42.0), 55.0, at(3));

        assert_eq!(1, alarm.excursion().len());
        assert_eq!(at(3), alarm.excursion()[0].timestamp());
        assert_eq!(Some(at(3)), alarm.excursion_start());
    }

    #[test]
    fn test_invalid_reading_while_triggered() {
        let mut alarm = ThresholdAlarm::new(AlarmSettings::default());
        alarm.observe(&reading(0, 40.0), 55.0, at(0));
        alarm.observe(&reading(1, 41.0), 55.0, at(1));

        let failed = Sample::Failed(at(2), SensorErrorKind::ReadTimeout).into_reading();
        assert_eq!(AlarmAction::None, alarm.observe(&failed, 55.0, at(2)));
        assert!(alarm.is_triggered());
        assert_eq!(2, alarm.excursion().len());
        assert_eq!(Some(at(0)), alarm.excursion_start());
    }

    #[test]
    fn test_invalid_reading_never_starts_excursion() {
        let mut alarm = ThresholdAlarm::new(AlarmSettings::default());
        let failed = Reading::invalid(at(0));

        assert_eq!(AlarmAction::None, alarm.observe(&failed, 55.0, at(0)));
        assert!(!alarm.is_triggered());
        assert!(alarm.excursion().is_empty());
    }

    #[test]
    fn test_triggered_iff_below_threshold() {
        let mut alarm = ThresholdAlarm::new(AlarmSettings::default());
        let temps = [60.0, 54.0, 53.0, 70.0, 20.0, 55.5, 10.0, 9.0];

        for (t, &temp) in temps.iter().enumerate() {
            alarm.observe(&reading(t as i64, temp), 55.0, at(t as i64));
            assert_eq!(temp < 55.0, alarm.is_triggered(), "minute {}", t);
        }
    }
}
