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

/// Readings accumulated since the last flush, in the order they were sampled.
///
/// Readings are sampled in real time so insertion order is also time order.
#[derive(Debug, Default, Clone)]
pub struct TimeSeriesBuffer {
    readings: Vec<Reading>,
}

impl TimeSeriesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// Swap the contents of the buffer for an empty one and return everything
    /// accumulated since the previous flush.
    ///
    /// Flushing an empty buffer is allowed and returns an empty sequence. It's up
    /// to callers to decide if there's anything worth persisting.
    pub fn flush(&mut self) -> Vec<Reading> {
        std::mem::take(&mut self.readings)
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }
}

#[cfg(test)]
mod test {
    use super::TimeSeriesBuffer;
    use crate::sensor::Reading;
    use chrono::{Duration, TimeZone, Utc};

    fn reading_at(minute: i64) -> Reading {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Reading::from_fahrenheit(minute as f64, ts)
    }

    #[test]
    fn test_flush_preserves_order_and_empties() {
        let mut buf = TimeSeriesBuffer::new();
        for m in 0..5 {
            buf.append(reading_at(m));
        }

        let out = buf.flush();
        assert!(buf.is_empty());
        assert_eq!(0, buf.len());
        assert_eq!(5, out.len());
        for (i, r) in out.iter().enumerate() {
            assert_eq!(reading_at(i as i64).timestamp(), r.timestamp());
        }
    }

    #[test]
    fn test_flush_empty() {
        let mut buf = TimeSeriesBuffer::new();
        assert!(buf.flush().is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_append_after_flush_starts_fresh() {
        let mut buf = TimeSeriesBuffer::new();
        buf.append(reading_at(0));
        buf.append(reading_at(1));
        let _ = buf.flush();

        buf.append(reading_at(2));
        assert_eq!(1, buf.len());
        assert_eq!(reading_at(2).timestamp(), buf.readings()[0].timestamp());
    }
}
