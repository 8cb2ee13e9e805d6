// CLASSIFICATION: COMMUNITY
// Filename: environment.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Thermal and battery circuit breaker.
//!
//! Each check takes exactly one sample: no averaging, no hysteresis, no
//! history. Thermal is critical when `celsius > ceiling`; power is critical
//! when `0 < raw < floor`. A raw reading of 0 means nothing is wired to the
//! divider and is reported as unavailable.
//
// Single-sample checks can false-trigger on sensor noise. No debounce is
// applied; the boot path only claims to be a cold-boot breaker.

use log::{info, warn};

use crate::config::BootConfig;
use crate::hal::{AnalogInput, TemperatureSensor};

/// Outcome of the temperature check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThermalVerdict {
    Ok(f32),
    Critical(f32),
    Unavailable,
}

/// Outcome of the battery check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerVerdict {
    Ok(u16),
    Critical(u16),
    Unavailable,
}

/// One point‑in‑time sample of both sensors. Fields stay `None` for a
/// phase that never ran.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvironmentReading {
    pub temperature_c: Option<f32>,
    pub battery_raw: Option<u16>,
}

/// Fixed thresholds for the thermal and power checks.
#[derive(Clone, Copy, Debug)]
pub struct EnvironmentGuard {
    ceiling_c: f32,
    floor_raw: u16,
}

impl EnvironmentGuard {
    pub fn new(ceiling_c: f32, floor_raw: u16) -> Self {
        Self {
            ceiling_c,
            floor_raw,
        }
    }

    pub fn from_config(cfg: &BootConfig) -> Self {
        Self::new(cfg.thermal_ceiling_c, cfg.battery_floor_raw)
    }

    pub fn check_thermal(&self, sensor: &mut dyn TemperatureSensor) -> ThermalVerdict {
        let Some(celsius) = sensor.read_celsius() else {
            warn!("[env] temperature sensor unavailable");
            return ThermalVerdict::Unavailable;
        };
        info!("[env] chip temp {celsius:.1} C");
        if celsius > self.ceiling_c {
            ThermalVerdict::Critical(celsius)
        } else {
            ThermalVerdict::Ok(celsius)
        }
    }

    pub fn check_power(&self, adc: &mut dyn AnalogInput) -> PowerVerdict {
        let raw = adc.read_raw();
        info!("[env] battery raw {raw}");
        match raw {
            0 => {
                warn!("[env] battery channel reads 0, no divider fitted?");
                PowerVerdict::Unavailable
            }
            r if r < self.floor_raw => PowerVerdict::Critical(r),
            r => PowerVerdict::Ok(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimAdc, SimThermometer};

    fn guard() -> EnvironmentGuard {
        EnvironmentGuard::new(70.0, 2000)
    }

    fn thermal(celsius: Option<f32>) -> ThermalVerdict {
        let mut t = SimThermometer::default();
        t.set(celsius);
        guard().check_thermal(&mut t)
    }

    fn power(raw: u16) -> PowerVerdict {
        let mut adc = SimAdc::default();
        adc.set(raw);
        guard().check_power(&mut adc)
    }

    #[test]
    fn thermal_boundary_is_ok() {
        assert_eq!(thermal(Some(70.0)), ThermalVerdict::Ok(70.0));
        assert_eq!(thermal(Some(69.9)), ThermalVerdict::Ok(69.9));
        assert_eq!(thermal(Some(70.1)), ThermalVerdict::Critical(70.1));
    }

    #[test]
    fn missing_sensor_is_unavailable() {
        assert_eq!(thermal(None), ThermalVerdict::Unavailable);
    }

    #[test]
    fn power_boundary_is_ok() {
        assert_eq!(power(2000), PowerVerdict::Ok(2000));
        assert_eq!(power(1999), PowerVerdict::Critical(1999));
        assert_eq!(power(1), PowerVerdict::Critical(1));
        assert_eq!(power(4095), PowerVerdict::Ok(4095));
    }

    #[test]
    fn zero_raw_is_unavailable() {
        assert_eq!(power(0), PowerVerdict::Unavailable);
    }

    #[test]
    fn one_sample_per_check() {
        let mut adc = SimAdc::default();
        adc.set(2500);
        guard().check_power(&mut adc);
        assert_eq!(adc.reads(), 1);
    }
}
