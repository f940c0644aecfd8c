//! Detector identities and energy calibrations.
//!
//! Calibrations travel with histogram metadata; they are never applied to
//! stored counts.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hit::DigitizedValue;

/// Polynomial energy calibration at a given bit resolution.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    /// Calibrated quantity, e.g. `"Energy"`.
    pub kind: String,
    /// Units of the transformed value.
    pub units: String,
    /// Bit resolution the coefficients refer to.
    pub bits: u16,
    /// Polynomial coefficients, constant term first.
    pub coefficients: Vec<f64>,
}

impl Calibration {
    /// Creates an identity calibration.
    #[must_use]
    pub fn new(kind: impl Into<String>, bits: u16) -> Self {
        Self {
            kind: kind.into(),
            units: "channels".to_string(),
            bits,
            coefficients: vec![0.0, 1.0],
        }
    }

    /// Sets coefficients and units.
    #[must_use]
    pub fn with_polynomial(mut self, coefficients: Vec<f64>, units: impl Into<String>) -> Self {
        self.coefficients = coefficients;
        self.units = units.into();
        self
    }

    /// True when coefficients describe a usable polynomial.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.coefficients.len() > 1
    }

    /// Evaluates the polynomial at `x`.
    #[must_use]
    pub fn transform(&self, x: f64) -> f64 {
        if !self.valid() {
            return x;
        }
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    /// Evaluates at `x` given in `bits` of resolution.
    #[must_use]
    pub fn transform_at(&self, x: f64, bits: u16) -> f64 {
        let shift = i32::from(self.bits) - i32::from(bits);
        self.transform(x * 2f64.powi(shift))
    }
}

/// A named detector with calibrations keyed by bit resolution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Detector {
    /// Detector name.
    pub name: String,
    /// Detector type, e.g. `"HPGe"`.
    pub kind: String,
    /// Energy calibrations keyed by bits.
    pub calibrations: BTreeMap<u16, Calibration>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new("none")
    }
}

impl Detector {
    /// Creates an uncalibrated detector.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "none".to_string(),
            calibrations: BTreeMap::new(),
        }
    }

    /// Adds or replaces the calibration for its bit resolution.
    pub fn add_calibration(&mut self, calibration: Calibration) {
        self.calibrations.insert(calibration.bits, calibration);
    }

    /// Calibration at exactly `bits`, if any.
    #[must_use]
    pub fn calibration(&self, bits: u16) -> Option<&Calibration> {
        self.calibrations.get(&bits)
    }

    /// Calibration with the highest bit resolution.
    #[must_use]
    pub fn highest_res_calibration(&self) -> Option<&Calibration> {
        self.calibrations.values().next_back()
    }

    /// Calibrated value of a digitized field, using the best available calibration.
    #[must_use]
    pub fn calibrate(&self, value: DigitizedValue) -> f64 {
        match self.calibration(value.bits()).or_else(|| self.highest_res_calibration()) {
            Some(cal) => cal.transform_at(f64::from(value.raw()), value.bits()),
            None => f64::from(value.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_polynomial() {
        let cal = Calibration::new("Energy", 12).with_polynomial(vec![1.0, 0.5, 0.25], "keV");
        assert_relative_eq!(cal.transform(2.0), 1.0 + 1.0 + 1.0);
        assert_relative_eq!(Calibration::default().transform(7.0), 7.0);
    }

    #[test]
    fn test_transform_at_other_resolution() {
        let cal = Calibration::new("Energy", 12).with_polynomial(vec![0.0, 0.5], "keV");
        // channel 100 at 8 bits is channel 1600 at 12 bits
        assert_relative_eq!(cal.transform_at(100.0, 8), 800.0);
    }

    #[test]
    fn test_detector_calibration_lookup() {
        let mut det = Detector::new("HPGe1");
        det.add_calibration(Calibration::new("Energy", 12));
        det.add_calibration(Calibration::new("Energy", 14).with_polynomial(vec![0.0, 2.0], "keV"));

        assert_eq!(det.highest_res_calibration().map(|c| c.bits), Some(14));
        assert_relative_eq!(det.calibrate(DigitizedValue::new(10, 14)), 20.0);
        assert_relative_eq!(det.calibrate(DigitizedValue::new(10, 12)), 10.0);
    }
}
