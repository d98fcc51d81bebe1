//! Physical units to pixels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dots per inch used for every physical unit.
pub const DPI: f64 = 96.0;

/// Length unit accepted for resize geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Px,
    In,
    Cm,
    Mm,
    Pt,
    #[serde(alias = "pc")]
    Pica,
}

impl Unit {
    pub const ALL: [Unit; 6] = [Unit::Px, Unit::In, Unit::Cm, Unit::Mm, Unit::Pt, Unit::Pica];

    /// Short name as accepted on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Px => "px",
            Unit::In => "in",
            Unit::Cm => "cm",
            Unit::Mm => "mm",
            Unit::Pt => "pt",
            Unit::Pica => "pica",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "px" | "pixel" | "pixels" => Ok(Unit::Px),
            "in" | "inch" | "inches" => Ok(Unit::In),
            "cm" => Ok(Unit::Cm),
            "mm" => Ok(Unit::Mm),
            "pt" | "point" | "points" => Ok(Unit::Pt),
            "pc" | "pica" | "picas" => Ok(Unit::Pica),
            _ => Err(format!(
                "Invalid unit '{}'. Use: px, in, cm, mm, pt, pica",
                s
            )),
        }
    }
}

/// Convert a length in `unit` to pixels at [`DPI`].
///
/// The caller is responsible for rejecting non-positive or non-finite values.
pub fn to_pixels(value: f64, unit: Unit) -> f64 {
    match unit {
        Unit::Px => value,
        Unit::In => value * DPI,
        Unit::Cm => (value / 2.54) * DPI,
        Unit::Mm => (value / 25.4) * DPI,
        Unit::Pt => (value / 72.0) * DPI,
        Unit::Pica => (value / 6.0) * DPI,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_conversion_table() {
        assert!(close(to_pixels(10.0, Unit::Px), 10.0));
        assert!(close(to_pixels(1.0, Unit::In), 96.0));
        assert!(close(to_pixels(2.54, Unit::Cm), 96.0));
        assert!(close(to_pixels(25.4, Unit::Mm), 96.0));
        assert!(close(to_pixels(72.0, Unit::Pt), 96.0));
        assert!(close(to_pixels(6.0, Unit::Pica), 96.0));
    }

    #[test]
    fn test_inch_to_cm_ratio() {
        for x in [0.01, 0.5, 1.0, 3.7, 250.0, 12345.678] {
            let ratio = to_pixels(x, Unit::In) / to_pixels(x, Unit::Cm);
            assert!(close(ratio, 2.54), "ratio for {x} was {ratio}");
        }
    }

    #[test]
    fn test_parse_units() {
        assert_eq!("PX".parse::<Unit>().unwrap(), Unit::Px);
        assert_eq!("pc".parse::<Unit>().unwrap(), Unit::Pica);
        assert_eq!("pica".parse::<Unit>().unwrap(), Unit::Pica);
        assert_eq!(" mm ".parse::<Unit>().unwrap(), Unit::Mm);
        assert!("furlong".parse::<Unit>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for unit in Unit::ALL {
            assert_eq!(unit.to_string().parse::<Unit>().unwrap(), unit);
        }
    }
}
