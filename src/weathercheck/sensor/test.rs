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

#![cfg(test)]

use crate::sensor::core::{Measurement, Reading, RegisterBus, Sample, SampleSource, SensorError, SensorErrorKind};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// Raw ADC readings matching the example in the BMP280 datasheet
pub(crate) const DATASHEET_ADC_T: i32 = 519888;
pub(crate) const DATASHEET_ADC_P: i32 = 415148;
// With the humidity calibration below this works out to exactly 50%
pub(crate) const DATASHEET_ADC_H: i32 = 12800;

/// RegisterBus implementation backed by an in-memory register map.
///
/// Writes are recorded so tests can assert on the sequence used to trigger
/// a measurement. The bus can be switched into a failing mode to simulate
/// a disconnected sensor.
pub(crate) struct MockBus {
    registers: [u8; 256],
    writes: Arc<Mutex<Vec<(u8, u8)>>>,
    failing: Arc<AtomicBool>,
}

impl MockBus {
    pub(crate) fn new() -> Self {
        MockBus {
            registers: [0; 256],
            writes: Default::default(),
            failing: Default::default(),
        }
    }

    /// A BME280 with the calibration and raw readings from the datasheet example.
    pub(crate) fn datasheet() -> Self {
        let mut bus = Self::new();
        bus.set_register(0xD0, 0x60);

        let tp: [(u8, u16); 12] = [
            (0x88, 27504),
            (0x8A, 26435),
            (0x8C, -1000i16 as u16),
            (0x8E, 36477),
            (0x90, -10685i16 as u16),
            (0x92, 3024),
            (0x94, 2855),
            (0x96, 140),
            (0x98, -7i16 as u16),
            (0x9A, 15500),
            (0x9C, -14600i16 as u16),
            (0x9E, 6000),
        ];

        for (reg, v) in tp {
            bus.set_word(reg, v);
        }

        // H1, H3, H4, H5, and H6 zero so humidity is adc_h * H2 / 65536
        bus.set_word(0xE1, 256);
        bus.set_raw(DATASHEET_ADC_P, DATASHEET_ADC_T, DATASHEET_ADC_H);
        bus
    }

    pub(crate) fn set_register(&mut self, reg: u8, value: u8) {
        self.registers[reg as usize] = value;
    }

    fn set_word(&mut self, reg: u8, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.set_register(reg, lo);
        self.set_register(reg + 1, hi);
    }

    pub(crate) fn set_raw(&mut self, pressure: i32, temperature: i32, humidity: i32) {
        self.set_register(0xF7, (pressure >> 12) as u8);
        self.set_register(0xF8, (pressure >> 4) as u8);
        self.set_register(0xF9, ((pressure & 0x0F) << 4) as u8);
        self.set_register(0xFA, (temperature >> 12) as u8);
        self.set_register(0xFB, (temperature >> 4) as u8);
        self.set_register(0xFC, ((temperature & 0x0F) << 4) as u8);
        self.set_register(0xFD, (humidity >> 8) as u8);
        self.set_register(0xFE, humidity as u8);
    }

    pub(crate) fn register_slice(&self, start: u8, len: usize) -> Vec<u8> {
        self.registers[start as usize..start as usize + len].to_vec()
    }

    pub(crate) fn writes(&self) -> Arc<Mutex<Vec<(u8, u8)>>> {
        self.writes.clone()
    }

    pub(crate) fn failing(&self) -> Arc<AtomicBool> {
        self.failing.clone()
    }

    fn check(&self) -> Result<(), SensorError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SensorError::KindMsg(SensorErrorKind::Bus, "mock bus disconnected"))
        } else {
            Ok(())
        }
    }
}

impl RegisterBus for MockBus {
    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.check()?;
        let start = start as usize;
        buf.copy_from_slice(&self.registers[start..start + buf.len()]);
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.check()?;
        self.writes.lock().unwrap().push((register, value));
        Ok(())
    }
}

/// SampleSource that returns a fixed sequence of temperatures, in fahrenheit.
///
/// `None` entries and samples taken after the sequence is exhausted are failed reads.
pub(crate) struct ScriptedSource {
    temperatures: VecDeque<Option<f64>>,
}

impl ScriptedSource {
    pub(crate) fn fahrenheit<I>(temperatures: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        ScriptedSource {
            temperatures: temperatures.into_iter().collect(),
        }
    }
}

impl SampleSource for ScriptedSource {
    fn sample(&mut self, now: DateTime<Utc>) -> Sample {
        match self.temperatures.pop_front().flatten() {
            Some(f) => {
                let m = Measurement {
                    temperature: ((f - 32.0) / 1.8).into(),
                    humidity: 50.0.into(),
                    pressure: 1013.25.into(),
                };

                Reading::new(m, now)
                    .map(Sample::Ok)
                    .unwrap_or(Sample::Failed(now, SensorErrorKind::Range))
            }
            None => Sample::Failed(now, SensorErrorKind::ReadTimeout),
        }
    }
}
