//! Rational frame-rate type: parsing, snapping to broadcast-standard rates,
//! and continued-fraction approximation for anything else.

use std::fmt;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Known broadcast-standard rates, paired with their decimal approximation.
/// Order matters only for readability; lookup is a linear scan since the
/// table is tiny.
const KNOWN_RATES: &[(f64, u64, u64)] = &[
    (23.976, 24000, 1001),
    (24.0, 24, 1),
    (25.0, 25, 1),
    (29.97, 30000, 1001),
    (30.0, 30, 1),
    (50.0, 50, 1),
    (59.94, 60000, 1001),
    (60.0, 60, 1),
    (100.0, 100, 1),
    (120.0, 120, 1),
];

const SNAP_TOLERANCE_HZ: f64 = 0.0005;
const MAX_APPROXIMATION_DENOMINATOR: u64 = 100_000;

/// An immutable, reduced rational frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    numerator: u64,
    denominator: u64,
}

impl FrameRate {
    /// Builds a frame rate from an already-positive, reduced-on-construction
    /// numerator/denominator pair.
    pub fn try_new(numerator: i64, denominator: i64) -> Result<Self> {
        if numerator <= 0 || denominator <= 0 {
            return Err(PipelineError::NonPositiveFrameRate(
                numerator as f64 / denominator.max(1) as f64,
            ));
        }
        Ok(Self::reduced(numerator as u64, denominator as u64))
    }

    fn reduced(numerator: u64, denominator: u64) -> Self {
        let divisor = gcd(numerator, denominator).max(1);
        Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Duration of a single frame at this rate.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.denominator as f64 / self.numerator as f64)
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Snaps a measured frames-per-second value to the nearest known
    /// broadcast rate within tolerance, otherwise approximates it with a
    /// continued-fraction expansion bounded to a sane denominator.
    pub fn from_double(fps: f64) -> Self {
        for &(decimal, num, den) in KNOWN_RATES {
            if (fps - decimal).abs() < SNAP_TOLERANCE_HZ {
                return Self::reduced(num, den);
            }
        }
        Self::continued_fraction_approximation(fps, MAX_APPROXIMATION_DENOMINATOR)
    }

    fn continued_fraction_approximation(value: f64, max_denominator: u64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Self {
                numerator: 1,
                denominator: 1,
            };
        }

        let (mut h_prev, mut h_cur) = (0i128, 1i128);
        let (mut k_prev, mut k_cur) = (1i128, 0i128);
        let mut remainder = value;

        loop {
            let whole = remainder.floor();
            let a = whole as i128;
            let h_next = a * h_cur + h_prev;
            let k_next = a * k_cur + k_prev;
            if k_next > max_denominator as i128 || k_next <= 0 {
                break;
            }
            h_prev = h_cur;
            h_cur = h_next;
            k_prev = k_cur;
            k_cur = k_next;

            let fraction = remainder - whole;
            if fraction.abs() < 1e-10 {
                break;
            }
            remainder = 1.0 / fraction;
        }

        let numerator = h_cur.max(1) as u64;
        let denominator = k_cur.max(1) as u64;
        Self::reduced(numerator, denominator)
    }

    /// Parses `"N/D"` or a decimal string. Invalid input (malformed string,
    /// non-positive value) returns `fallback` rather than an error — the
    /// caller already validated that `fallback` itself is acceptable.
    pub fn parse(input: &str, fallback: Self) -> Self {
        let trimmed = input.trim();

        if let Some((left, right)) = trimmed.split_once('/') {
            if let (Ok(n), Ok(d)) = (left.trim().parse::<i64>(), right.trim().parse::<i64>()) {
                if n > 0 && d > 0 {
                    return Self::reduced(n as u64, d as u64);
                }
            }
            return fallback;
        }

        match trimmed.parse::<f64>() {
            Ok(fps) if fps > 0.0 && fps.is_finite() => Self::from_double(fps),
            _ => fallback,
        }
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(n: u64, d: u64) -> FrameRate {
        FrameRate::try_new(n as i64, d as i64).unwrap()
    }

    #[test]
    fn reduces_by_gcd() {
        let r = FrameRate::try_new(120, 4).unwrap();
        assert_eq!((r.numerator(), r.denominator()), (30, 1));
    }

    #[test]
    fn rejects_non_positive() {
        assert!(FrameRate::try_new(0, 1).is_err());
        assert!(FrameRate::try_new(30, 0).is_err());
        assert!(FrameRate::try_new(-30, 1).is_err());
    }

    #[test]
    fn parse_explicit_ratio() {
        let r = FrameRate::parse("60000/1001", rate(30, 1));
        assert_eq!((r.numerator(), r.denominator()), (60000, 1001));
    }

    #[test]
    fn parse_snaps_drop_frame_decimal() {
        let r = FrameRate::parse("59.94", rate(30, 1));
        assert_eq!((r.numerator(), r.denominator()), (60000, 1001));
    }

    #[test]
    fn parse_whole_number_decimal() {
        let r = FrameRate::parse("60", rate(30, 1));
        assert_eq!((r.numerator(), r.denominator()), (60, 1));
    }

    #[test]
    fn parse_invalid_input_returns_fallback() {
        let fallback = rate(30, 1);
        let r = FrameRate::parse("foo", fallback);
        assert_eq!(r, fallback);
    }

    #[test]
    fn round_trips_known_rates() {
        for &(_, num, den) in KNOWN_RATES {
            let r = rate(num, den);
            let round_tripped = FrameRate::parse(&r.to_string(), rate(1, 1));
            assert_eq!(round_tripped, r, "rate {num}/{den} did not round-trip");
        }
    }

    #[test]
    fn approximates_unusual_rate() {
        let r = FrameRate::from_double(47.95);
        assert!(r.denominator() <= MAX_APPROXIMATION_DENOMINATOR);
        assert!((r.as_f64() - 47.95).abs() < 0.001);
    }
}
