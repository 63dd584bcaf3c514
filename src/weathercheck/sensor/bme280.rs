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

use crate::sensor::core::{
    Humidity, Measurement, PressureHpa, Reading, RegisterBus, Sample, SampleSource, SensorError, SensorErrorKind,
    TemperatureCelsius,
};
use chrono::{DateTime, Utc};
use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::Duration;

pub(crate) const CHIP_ID: u8 = 0x60;

pub(crate) const REG_CALIB_00: u8 = 0x88;
pub(crate) const REG_CHIP_ID: u8 = 0xD0;
pub(crate) const REG_CALIB_26: u8 = 0xE1;
pub(crate) const REG_CTRL_HUM: u8 = 0xF2;
pub(crate) const REG_STATUS: u8 = 0xF3;
pub(crate) const REG_CTRL_MEAS: u8 = 0xF4;
pub(crate) const REG_CONFIG: u8 = 0xF5;
pub(crate) const REG_DATA: u8 = 0xF7;

pub(crate) const CALIB_TP_SIZE: usize = 26;
pub(crate) const CALIB_H_SIZE: usize = 7;
pub(crate) const DATA_SIZE: usize = 8;

// x1 oversampling for humidity, temperature, and pressure in forced mode
const CTRL_HUM_OSRS_X1: u8 = 0b001;
const CTRL_MEAS_FORCED_X1: u8 = (0b001 << 5) | (0b001 << 2) | 0b01;
const STATUS_MEASURING: u8 = 0b0000_1000;
const MAX_STATUS_POLLS: u32 = 50;
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(2);

// Raw ADC value the sensor reports when a measurement was skipped
const SKIPPED_20BIT: i32 = 0x80000;
const SKIPPED_16BIT: i32 = 0x8000;

/// Trimming parameters burned into each sensor at the factory.
///
/// See section 4.2.2 of the BME280 datasheet for the register layout.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Calibration {
    t1: u16,
    t2: i16,
    t3: i16,
    p1: u16,
    p2: i16,
    p3: i16,
    p4: i16,
    p5: i16,
    p6: i16,
    p7: i16,
    p8: i16,
    p9: i16,
    h1: u8,
    h2: i16,
    h3: u8,
    h4: i16,
    h5: i16,
    h6: i8,
}

impl Calibration {
    fn from_bytes(tp: &[u8; CALIB_TP_SIZE], h: &[u8; CALIB_H_SIZE]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]);

        // H4 and H5 are 12 bit signed values sharing the nibbles of 0xE5. The most
        // significant byte of each is signed so sign extend it before shifting.
        let h4 = ((h[3] as i8 as i16) << 4) | (h[4] & 0x0F) as i16;
        let h5 = ((h[5] as i8 as i16) << 4) | (h[4] >> 4) as i16;

        Calibration {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p1: u16_at(6),
            p2: i16_at(8),
            p3: i16_at(10),
            p4: i16_at(12),
            p5: i16_at(14),
            p6: i16_at(16),
            p7: i16_at(18),
            p8: i16_at(20),
            p9: i16_at(22),
            // 0xA0 (index 24) is unused
            h1: tp[25],
            h2: i16::from_le_bytes([h[0], h[1]]),
            h3: h[2],
            h4,
            h5,
            h6: h[6] as i8,
        }
    }
}

/// Uncompensated ADC values from a burst read of the data registers.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RawData {
    pressure: i32,
    temperature: i32,
    humidity: i32,
}

impl RawData {
    fn from_bytes(b: &[u8; DATA_SIZE]) -> Result<Self, SensorError> {
        let pressure = ((b[0] as i32) << 12) | ((b[1] as i32) << 4) | ((b[2] as i32) >> 4);
        let temperature = ((b[3] as i32) << 12) | ((b[4] as i32) << 4) | ((b[5] as i32) >> 4);
        let humidity = ((b[6] as i32) << 8) | b[7] as i32;

        tracing::trace!(
            message = "raw sensor data",
            pressure = pressure,
            temperature = temperature,
            humidity = humidity
        );

        if temperature == SKIPPED_20BIT {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Range,
                "temperature measurement was skipped",
            ));
        }

        if pressure == SKIPPED_20BIT {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Range,
                "pressure measurement was skipped",
            ));
        }

        if humidity == SKIPPED_16BIT {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Range,
                "humidity measurement was skipped",
            ));
        }

        Ok(RawData {
            pressure,
            temperature,
            humidity,
        })
    }

    /// Apply the floating point compensation formulas from section 8.1 of the
    /// BME280 datasheet.
    fn compensate(&self, cal: &Calibration) -> Result<Measurement, SensorError> {
        let adc_t = self.temperature as f64;
        let adc_p = self.pressure as f64;
        let adc_h = self.humidity as f64;

        let var1 = (adc_t / 16384.0 - cal.t1 as f64 / 1024.0) * cal.t2 as f64;
        let var2 = (adc_t / 131072.0 - cal.t1 as f64 / 8192.0).powi(2) * cal.t3 as f64;
        let t_fine = var1 + var2;
        let temperature = t_fine / 5120.0;

        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * cal.p6 as f64 / 32768.0;
        var2 += var1 * cal.p5 as f64 * 2.0;
        var2 = var2 / 4.0 + cal.p4 as f64 * 65536.0;
        var1 = (cal.p3 as f64 * var1 * var1 / 524288.0 + cal.p2 as f64 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * cal.p1 as f64;

        // A blank pressure calibration would divide by zero
        if var1 == 0.0 {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Range,
                "pressure calibration is blank",
            ));
        }

        let mut p = 1048576.0 - adc_p;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = cal.p9 as f64 * p * p / 2147483648.0;
        let var2 = p * cal.p8 as f64 / 32768.0;
        let pressure = p + (var1 + var2 + cal.p7 as f64) / 16.0;

        let mut h = t_fine - 76800.0;
        h = (adc_h - (cal.h4 as f64 * 64.0 + cal.h5 as f64 / 16384.0 * h))
            * (cal.h2 as f64 / 65536.0
                * (1.0 + cal.h6 as f64 / 67108864.0 * h * (1.0 + cal.h3 as f64 / 67108864.0 * h)));
        h *= 1.0 - cal.h1 as f64 * h / 524288.0;
        let humidity = h.clamp(0.0, 100.0);

        let measurement = Measurement {
            temperature: TemperatureCelsius::from(temperature),
            humidity: Humidity::from(humidity),
            // compensation yields pascals
            pressure: PressureHpa::from(pressure / 100.0),
        };

        tracing::debug!(
            message = "compensated sensor data",
            temperature = %measurement.temperature,
            humidity = %measurement.humidity,
            pressure = %measurement.pressure
        );

        Ok(measurement)
    }
}

/// Read temperature, humidity, and pressure from a BME280 sensor
pub struct Bme280Sensor {
    bus: Box<dyn RegisterBus + Send + 'static>,
    calibration: Calibration,
}

impl Bme280Sensor {
    /// Verify the device on the bus is a BME280 and load its calibration.
    pub fn from_bus<T>(bus: T) -> Result<Self, SensorError>
    where
        T: RegisterBus + Send + 'static,
    {
        let mut bus: Box<dyn RegisterBus + Send + 'static> = Box::new(bus);

        let mut id = [0u8; 1];
        bus.read_registers(REG_CHIP_ID, &mut id)?;
        if id[0] != CHIP_ID {
            return Err(SensorError::ChipId(CHIP_ID, id[0]));
        }

        let mut tp = [0u8; CALIB_TP_SIZE];
        let mut h = [0u8; CALIB_H_SIZE];
        bus.read_registers(REG_CALIB_00, &mut tp)?;
        bus.read_registers(REG_CALIB_26, &mut h)?;
        let calibration = Calibration::from_bytes(&tp, &h);

        // No IIR filter, standby time doesn't matter in forced mode
        bus.write_register(REG_CONFIG, 0)?;

        tracing::debug!(message = "loaded sensor calibration", calibration = ?calibration);
        Ok(Self { bus, calibration })
    }

    fn wait_for_measurement(&mut self) -> Result<(), SensorError> {
        let mut status = [0u8; 1];
        for _ in 0..MAX_STATUS_POLLS {
            thread::sleep(STATUS_POLL_INTERVAL);
            self.bus.read_registers(REG_STATUS, &mut status)?;
            if status[0] & STATUS_MEASURING == 0 {
                return Ok(());
            }
        }

        Err(SensorError::KindMsg(
            SensorErrorKind::ReadTimeout,
            "timeout waiting for measurement to complete",
        ))
    }

    /// Trigger a single forced mode measurement and return the compensated
    /// values or an error describing why the read failed.
    pub fn read(&mut self) -> Result<Measurement, SensorError> {
        // ctrl_hum only takes effect after a write to ctrl_meas
        self.bus.write_register(REG_CTRL_HUM, CTRL_HUM_OSRS_X1)?;
        self.bus.write_register(REG_CTRL_MEAS, CTRL_MEAS_FORCED_X1)?;
        self.wait_for_measurement()?;

        let mut data = [0u8; DATA_SIZE];
        self.bus.read_registers(REG_DATA, &mut data)?;
        let raw = RawData::from_bytes(&data)?;
        raw.compensate(&self.calibration)
    }
}

impl Debug for Bme280Sensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bme280Sensor")
            .field("calibration", &self.calibration)
            .finish()
    }
}

/// `SampleSource` backed by a BME280 sensor.
#[derive(Debug)]
pub struct Bme280Source {
    sensor: Bme280Sensor,
}

impl Bme280Source {
    pub fn new(sensor: Bme280Sensor) -> Self {
        Self { sensor }
    }
}

impl SampleSource for Bme280Source {
    fn sample(&mut self, now: DateTime<Utc>) -> Sample {
        match self.sensor.read() {
            Ok(m) => match Reading::new(m, now) {
                Some(r) => Sample::Ok(r),
                None => {
                    tracing::warn!(
                        message = "sensor measurement produced non-finite values",
                        temperature = %m.temperature,
                        humidity = %m.humidity,
                        pressure = %m.pressure
                    );
                    Sample::Failed(now, SensorErrorKind::Range)
                }
            },
            Err(e) => {
                tracing::error!(message = "unable to read sensor", error = %e);
                Sample::Failed(now, e.kind())
            }
        }
    }
}
