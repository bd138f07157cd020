use log::warn;

use crate::{config::TEMPERATURE_CALIBRATION_OFFSET, error::SensorError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMeasurement {
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
}

/// Single-wire DHT11 driver: one blocking measurement per call.
pub trait Dht11 {
    fn measure(&mut self) -> Result<RawMeasurement, SensorError>;
}

pub struct SensorReader<D> {
    device: D,
    calibration_offset: f32,
}

impl<D: Dht11> SensorReader<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            calibration_offset: TEMPERATURE_CALIBRATION_OFFSET,
        }
    }

    pub fn with_calibration(mut self, offset: f32) -> Self {
        self.calibration_offset = offset;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn calibration_offset(&self) -> f32 {
        self.calibration_offset
    }

    pub fn read(&mut self) -> Result<Reading, SensorError> {
        match self.device.measure() {
            Ok(raw) => Ok(Reading {
                temperature: raw.temperature - self.calibration_offset,
                humidity: raw.humidity,
            }),
            Err(err) => {
                warn!("DHT sensor error: {err}");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays queued results; empty queue reads as a timeout.
    pub(crate) struct ScriptedDht {
        pub(crate) results: VecDeque<Result<RawMeasurement, SensorError>>,
        pub(crate) calls: usize,
    }

    impl ScriptedDht {
        pub(crate) fn new(results: Vec<Result<RawMeasurement, SensorError>>) -> Self {
            Self {
                results: results.into(),
                calls: 0,
            }
        }
    }

    impl Dht11 for ScriptedDht {
        fn measure(&mut self) -> Result<RawMeasurement, SensorError> {
            self.calls += 1;
            self.results.pop_front().unwrap_or(Err(SensorError::Timeout))
        }
    }

    pub(crate) fn raw(temperature: f32, humidity: f32) -> Result<RawMeasurement, SensorError> {
        Ok(RawMeasurement {
            temperature,
            humidity,
        })
    }

    #[test]
    fn subtracts_calibration_offset() {
        let mut reader = SensorReader::new(ScriptedDht::new(vec![raw(42.0, 55.0)]));
        let reading = reader.read().unwrap();

        assert_eq!(reading.temperature, 22.0);
        assert_eq!(reading.humidity, 55.0);
    }

    #[test]
    fn custom_offset_replaces_default() {
        let mut reader =
            SensorReader::new(ScriptedDht::new(vec![raw(25.0, 40.0)])).with_calibration(1.5);
        assert_eq!(reader.calibration_offset(), 1.5);
        assert_eq!(reader.read().unwrap().temperature, 23.5);
    }

    #[test]
    fn fault_is_returned_without_retry() {
        let mut reader = SensorReader::new(ScriptedDht::new(vec![
            Err(SensorError::ChecksumMismatch),
            raw(30.0, 50.0),
        ]));

        assert_eq!(reader.read(), Err(SensorError::ChecksumMismatch));
        assert_eq!(reader.device.calls, 1);

        // Next call recovers on its own.
        assert_eq!(reader.read().unwrap().temperature, 10.0);
    }
}
