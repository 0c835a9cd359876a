//! Compact duration strings
//!
//! Grammar: `[Ny][Nw][Nd][Nh][Nm][Ns]`, positional, every component
//! optional, years counted as 365 days. `"1h30m"` is ninety minutes,
//! `"2w"` fourteen days.
//!
//! One unit everywhere: the parser returns [`std::time::Duration`]; call
//! sites needing a number use whole seconds.

use crate::error::{FlowError, Result};
use std::time::Duration;

const UNITS: &[(char, u64)] = &[
    ('y', 365 * 24 * 3600),
    ('w', 7 * 24 * 3600),
    ('d', 24 * 3600),
    ('h', 3600),
    ('m', 60),
    ('s', 1),
];

/// Parse a compact duration string
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(FlowError::configuration("empty duration"));
    }

    let mut total: u64 = 0;
    let mut next_unit = 0;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                digits.push(*c);
                chars.next();
            } else {
                break;
            }
        }

        let unit = chars.next().ok_or_else(|| {
            FlowError::configuration(format!("duration '{}' ends without a unit", input))
        })?;
        if digits.is_empty() {
            return Err(FlowError::configuration(format!(
                "duration '{}' has a unit without a value",
                input
            )));
        }

        let rank = UNITS
            .iter()
            .skip(next_unit)
            .position(|(u, _)| *u == unit)
            .ok_or_else(|| {
                FlowError::configuration(format!(
                    "duration '{}' has unknown or out-of-order unit '{}'",
                    input, unit
                ))
            })?;
        next_unit += rank + 1;

        let value: u64 = digits
            .parse()
            .map_err(|_| FlowError::configuration(format!("bad duration value in '{}'", input)))?;
        total += value * UNITS[next_unit - 1].1;
    }

    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604800));
        assert_eq!(
            parse_duration("1y").unwrap(),
            Duration::from_secs(365 * 86400)
        );
    }

    #[test]
    fn test_combined() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(
            parse_duration("1y2w3d4h5m6s").unwrap(),
            Duration::from_secs(365 * 86400 + 2 * 604800 + 3 * 86400 + 4 * 3600 + 5 * 60 + 6)
        );
    }

    #[test]
    fn test_out_of_order_units_rejected() {
        assert!(parse_duration("30m1h").is_err());
        assert!(parse_duration("1s1s").is_err());
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("12").is_err());
        assert!(parse_duration("1x").is_err());
    }
}
