use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

pub const MAX_PORT: i64 = 65_535;
pub const DEFAULT_START: u16 = 0;
pub const DEFAULT_END: u16 = 10_000;

/// Inclusive, validated port range. Iterating it is lazy and can be repeated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "RawBounds")]
pub struct PortRange {
    start: u16,
    end: u16,
}

#[derive(Deserialize)]
struct RawBounds {
    start: i64,
    end: i64,
}

impl TryFrom<RawBounds> for PortRange {
    type Error = ScanError;

    fn try_from(raw: RawBounds) -> Result<Self, Self::Error> {
        PortRange::new(raw.start, raw.end)
    }
}

impl PortRange {
    /// Validate raw bounds. Both must lie in `0..=65535` and `start <= end`.
    pub fn new(start: i64, end: i64) -> Result<Self, ScanError> {
        let invalid = |reason| ScanError::InvalidRange { start, end, reason };
        if start < 0 {
            return Err(invalid("start is negative"));
        }
        if end > MAX_PORT {
            return Err(invalid("end exceeds 65535"));
        }
        if start > end {
            return Err(invalid("start > end"));
        }
        Ok(Self { start: start as u16, end: end as u16 })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Never true; a valid range holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self { start: DEFAULT_START, end: DEFAULT_END }
    }
}

impl IntoIterator for PortRange {
    type Item = u16;
    type IntoIter = RangeInclusive<u16>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &PortRange {
    type Item = u16;
    type IntoIter = RangeInclusive<u16>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Parse `start-end` or a single port, e.g. `0-10000` or ` 8080 `.
impl FromStr for PortRange {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScanError::InvalidRangeSyntax("empty port range".into()));
        }
        // A leading '-' is a sign, not the separator.
        let split = s
            .char_indices()
            .skip(1)
            .find(|&(_, c)| c == '-')
            .map(|(i, _)| (&s[..i], &s[i + 1..]));
        match split {
            Some((a, b)) => PortRange::new(parse_bound(a)?, parse_bound(b)?),
            None => {
                let p = parse_bound(s)?;
                PortRange::new(p, p)
            }
        }
    }
}

fn parse_bound(s: &str) -> Result<i64, ScanError> {
    let s = s.trim();
    s.parse::<i64>()
        .map_err(|e| ScanError::InvalidRangeSyntax(format!("{s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_range_is_zero_to_ten_thousand() {
        let r = PortRange::default();
        assert_eq!((r.start(), r.end()), (0, 10_000));
        assert_eq!(r.len(), 10_001);
    }

    #[test]
    fn iteration_is_ascending_and_restartable() {
        let r = PortRange::new(8000, 8003).unwrap();
        let first: Vec<u16> = r.iter().collect();
        let second: Vec<u16> = r.into_iter().collect();
        assert_eq!(first, vec![8000, 8001, 8002, 8003]);
        assert_eq!(first, second);
    }

    #[test]
    fn full_range_iterates_without_overflow() {
        let r = PortRange::new(65_530, 65_535).unwrap();
        assert_eq!(r.iter().last(), Some(65_535));
        assert_eq!(r.len(), 6);
    }

    #[test]
    fn rejects_bad_bounds() {
        assert!(matches!(PortRange::new(10, 9), Err(ScanError::InvalidRange { .. })));
        assert!(matches!(PortRange::new(-1, 9), Err(ScanError::InvalidRange { .. })));
        assert!(matches!(PortRange::new(0, 65_536), Err(ScanError::InvalidRange { .. })));
    }

    #[test]
    fn parse_range_and_single() {
        assert_eq!("20-25".parse::<PortRange>().unwrap(), PortRange::new(20, 25).unwrap());
        assert_eq!(" 443 ".parse::<PortRange>().unwrap(), PortRange::new(443, 443).unwrap());
        assert_eq!("1 - 3".parse::<PortRange>().unwrap(), PortRange::new(1, 3).unwrap());
    }

    #[test]
    fn parse_rejects_garbage_and_negative() {
        assert!(matches!("abc".parse::<PortRange>(), Err(ScanError::InvalidRangeSyntax(_))));
        assert!(matches!("".parse::<PortRange>(), Err(ScanError::InvalidRangeSyntax(_))));
        assert!(matches!("-5-10".parse::<PortRange>(), Err(ScanError::InvalidRange { .. })));
        assert!(matches!("100-70000".parse::<PortRange>(), Err(ScanError::InvalidRange { .. })));
    }

    #[test]
    fn deserialize_validates_bounds() {
        let r: PortRange = serde_json::from_str(r#"{"start":22,"end":80}"#).unwrap();
        assert_eq!(r, PortRange::new(22, 80).unwrap());
        assert!(serde_json::from_str::<PortRange>(r#"{"start":80,"end":22}"#).is_err());
    }
}
