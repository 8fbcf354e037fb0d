//! Complex reducer: interleaved `(re, im)` pairs or real samples to one scalar per element.

use strum_macros::Display;
use tracing::{event, Level};

/// Power floor applied before taking logarithms.
const POWER_FLOOR: f64 = 1e-20;

/// Rule for reducing an element to a single scalar.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ComplexMode {
    /// `Ma`: magnitude
    #[strum(serialize = "Ma")]
    Magnitude,
    /// `Ph`: phase in radians
    #[strum(serialize = "Ph")]
    Phase,
    /// `Re`: real part
    #[strum(serialize = "Re")]
    Real,
    /// `Im`: imaginary part
    #[strum(serialize = "Im")]
    Imaginary,
    /// `Lo`: power in decibels
    #[strum(serialize = "Lo")]
    Log10,
    /// `L2`: twice the power in decibels
    #[strum(serialize = "L2")]
    Log20,
    /// `IR`: magnitude of complex data, real data unchanged
    #[strum(serialize = "IR")]
    ImaginaryOrReal,
}

impl ComplexMode {
    /// Look up a mode by its two-letter name.
    ///
    /// Unknown names resolve to [ComplexMode::Real] with a warning.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Ma" => ComplexMode::Magnitude,
            "Ph" => ComplexMode::Phase,
            "Re" => ComplexMode::Real,
            "Im" => ComplexMode::Imaginary,
            "Lo" => ComplexMode::Log10,
            "L2" => ComplexMode::Log20,
            "IR" => ComplexMode::ImaginaryOrReal,
            _ => {
                event!(Level::WARN, "Unknown complex mode {}, using Re", name);
                ComplexMode::Real
            }
        }
    }

    fn apply(self, re: f64, im: f64, complex: bool) -> f64 {
        let power = || (re * re + im * im).max(POWER_FLOOR);
        match self {
            ComplexMode::Real => re,
            ComplexMode::Imaginary => im,
            ComplexMode::Magnitude => (re * re + im * im).sqrt(),
            ComplexMode::Phase => im.atan2(re),
            ComplexMode::Log10 => 10.0 * power().log10(),
            ComplexMode::Log20 => 20.0 * power().log10(),
            ComplexMode::ImaginaryOrReal if complex => (re * re + im * im).sqrt(),
            ComplexMode::ImaginaryOrReal => re,
        }
    }
}

/// Reduce decoded samples to one value per element.
///
/// Complex input is consumed as adjacent `(re, im)` pairs; a trailing unpaired scalar is
/// dropped. Real input with a mode is treated as `(sample, 0)`. Real input without a mode is
/// passed through unchanged, and complex input without a mode takes the real part.
pub fn reduce(samples: Vec<f64>, mode: Option<ComplexMode>, is_complex: bool) -> Vec<f64> {
    if is_complex {
        let mode = mode.unwrap_or(ComplexMode::Real);
        samples
            .chunks_exact(2)
            .map(|pair| mode.apply(pair[0], pair[1], true))
            .collect()
    } else {
        match mode {
            None => samples,
            Some(mode) => samples
                .into_iter()
                .map(|sample| mode.apply(sample, 0.0, false))
                .collect(),
        }
    }
}

/// Minimum and maximum of the finite values in `values`, if any.
pub fn value_range(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((min, max)) => Some((min.min(v), max.max(v))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRS: [f64; 4] = [3.0, 4.0, -1.0, 0.0];

    fn assert_close(expected: &[f64], actual: &[f64]) {
        assert_eq!(expected.len(), actual.len());
        for (e, a) in expected.iter().zip(actual) {
            assert!((e - a).abs() < 1e-9, "expected {:?}, got {:?}", expected, actual);
        }
    }

    #[test]
    fn mode_names() {
        for name in ["Ma", "Ph", "Re", "Im", "Lo", "L2", "IR"] {
            assert_eq!(name, ComplexMode::from_name(name).to_string());
        }
    }

    #[test]
    fn unknown_mode_defaults_to_real() {
        assert_eq!(ComplexMode::Real, ComplexMode::from_name("Xx"));
    }

    #[test]
    fn complex_modes() {
        let reduce = |mode| reduce(PAIRS.to_vec(), Some(mode), true);
        assert_close(&[3.0, -1.0], &reduce(ComplexMode::Real));
        assert_close(&[4.0, 0.0], &reduce(ComplexMode::Imaginary));
        assert_close(&[5.0, 1.0], &reduce(ComplexMode::Magnitude));
        assert_close(
            &[4.0_f64.atan2(3.0), std::f64::consts::PI],
            &reduce(ComplexMode::Phase),
        );
        assert_close(&[10.0 * 25.0_f64.log10(), 0.0], &reduce(ComplexMode::Log10));
        assert_close(&[20.0 * 25.0_f64.log10(), 0.0], &reduce(ComplexMode::Log20));
        assert_close(&[5.0, 1.0], &reduce(ComplexMode::ImaginaryOrReal));
    }

    #[test]
    fn complex_without_mode_takes_real_part() {
        assert_close(&[3.0, -1.0], &reduce(PAIRS.to_vec(), None, true));
    }

    #[test]
    fn real_modes() {
        let samples = vec![-2.0, 0.0];
        let reduce = |mode| reduce(samples.clone(), Some(mode), false);
        assert_close(&[-2.0, 0.0], &reduce(ComplexMode::Real));
        assert_close(&[0.0, 0.0], &reduce(ComplexMode::Imaginary));
        assert_close(&[2.0, 0.0], &reduce(ComplexMode::Magnitude));
        assert_close(&[std::f64::consts::PI, 0.0], &reduce(ComplexMode::Phase));
        assert_close(&[10.0 * 4.0_f64.log10(), -200.0], &reduce(ComplexMode::Log10));
        assert_close(&[20.0 * 4.0_f64.log10(), -400.0], &reduce(ComplexMode::Log20));
        assert_close(&[-2.0, 0.0], &reduce(ComplexMode::ImaginaryOrReal));
    }

    #[test]
    fn real_without_mode_passes_through() {
        let samples = vec![1.0, f64::NAN, -3.0];
        let out = reduce(samples, None, false);
        assert_eq!(1.0, out[0]);
        assert!(out[1].is_nan());
        assert_eq!(-3.0, out[2]);
    }

    #[test]
    fn trailing_unpaired_scalar_dropped() {
        assert_eq!(vec![1.0], reduce(vec![1.0, 2.0, 3.0], None, true));
    }

    #[test]
    fn range_skips_non_finite() {
        assert_eq!(
            Some((-1.0, 7.0)),
            value_range(&[3.0, f64::NAN, -1.0, 7.0, f64::NEG_INFINITY])
        );
        assert_eq!(None, value_range(&[]));
        assert_eq!(None, value_range(&[f64::NAN]));
    }
}
