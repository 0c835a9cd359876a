//! Relaxed datetime parsing for feed timestamps
//!
//! Feed dates arrive in RFC 822/2822, ISO 8601, and a long tail of almost
//! conformant variants, frequently with named timezone abbreviations that
//! no standard parser accepts. [`parse_datetime`] tries, in order:
//!
//! 1. RFC 2822 (`Tue, 01 Jun 2021 13:00:00 +0200`),
//! 2. RFC 3339 / ISO 8601 (`2021-06-01T13:00:00Z`),
//! 3. a set of common explicit formats,
//! 4. the same formats after swapping a trailing named timezone for its
//!    UTC offset from the abbreviation table.
//!
//! The result is a UNIX timestamp in seconds (fractional part preserved).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// UTC offsets in seconds for common timezone abbreviations.
///
/// Sorted by name for binary search. Ambiguous abbreviations carry the
/// customary feed-world reading.
#[rustfmt::skip]
const TIMEZONE_OFFSETS: &[(&str, i32)] = &[
    ("A", 3600), ("ACDT", 37800), ("ACST", 34200), ("ACT", -18000),
    ("ACWST", 31500), ("ADT", 14400), ("AEDT", 39600), ("AEST", 36000),
    ("AET", 36000), ("AFT", 16200), ("AKDT", -28800), ("AKST", -32400),
    ("ALMT", 21600), ("AMST", -10800), ("AMT", -14400), ("ANAST", 43200),
    ("ANAT", 43200), ("AQTT", 18000), ("ART", -10800), ("AST", 10800),
    ("AT", -14400), ("AWDT", 32400), ("AWST", 28800), ("AZOST", 0),
    ("AZOT", -3600), ("AZST", 18000), ("AZT", 14400), ("AoE", -43200),
    ("B", 7200), ("BNT", 28800), ("BOT", -14400), ("BRST", -7200),
    ("BRT", -10800), ("BST", 21600), ("BTT", 21600), ("C", 10800),
    ("CAST", 28800), ("CAT", 7200), ("CCT", 23400), ("CDT", -18000),
    ("CEST", 7200), ("CET", 3600), ("CHADT", 49500), ("CHAST", 45900),
    ("CHOST", 32400), ("CHOT", 28800), ("CHUT", 36000), ("CIDST", -14400),
    ("CIST", -18000), ("CKT", -36000), ("CLST", -10800), ("CLT", -14400),
    ("COT", -18000), ("CST", -21600), ("CT", -21600), ("CVT", -3600),
    ("CXT", 25200), ("ChST", 36000), ("D", 14400), ("DAVT", 25200),
    ("DDUT", 36000), ("E", 18000), ("EASST", -18000), ("EAST", -21600),
    ("EAT", 10800), ("ECT", -18000), ("EDT", -14400), ("EEST", 10800),
    ("EET", 7200), ("EGST", 0), ("EGT", -3600), ("EST", -18000),
    ("ET", -18000), ("F", 21600), ("FET", 10800), ("FJST", 46800),
    ("FJT", 43200), ("FKST", -10800), ("FKT", -14400), ("FNT", -7200),
    ("G", 25200), ("GALT", -21600), ("GAMT", -32400), ("GET", 14400),
    ("GFT", -10800), ("GILT", 43200), ("GMT", 0), ("GST", 14400),
    ("GYT", -14400), ("H", 28800), ("HDT", -32400), ("HKT", 28800),
    ("HOVST", 28800), ("HOVT", 25200), ("HST", -36000), ("I", 32400),
    ("ICT", 25200), ("IDT", 10800), ("IOT", 21600), ("IRDT", 16200),
    ("IRKST", 32400), ("IRKT", 28800), ("IRST", 12600), ("IST", 19800),
    ("JST", 32400), ("K", 36000), ("KGT", 21600), ("KOST", 39600),
    ("KRAST", 28800), ("KRAT", 25200), ("KST", 32400), ("KUYT", 14400),
    ("L", 39600), ("LHDT", 39600), ("LHST", 37800), ("LINT", 50400),
    ("M", 43200), ("MAGST", 43200), ("MAGT", 39600), ("MART", 34200),
    ("MAWT", 18000), ("MDT", -21600), ("MHT", 43200), ("MMT", 23400),
    ("MSD", 14400), ("MSK", 10800), ("MST", -25200), ("MT", -25200),
    ("MUT", 14400), ("MVT", 18000), ("MYT", 28800), ("N", -3600),
    ("NCT", 39600), ("NDT", 9000), ("NFT", 39600), ("NOVST", 25200),
    ("NOVT", 25200), ("NPT", 19800), ("NRT", 43200), ("NST", 12600),
    ("NUT", -39600), ("NZDT", 46800), ("NZST", 43200), ("O", -7200),
    ("OMSST", 25200), ("OMST", 21600), ("ORAT", 18000), ("P", -10800),
    ("PDT", -25200), ("PET", -18000), ("PETST", 43200), ("PETT", 43200),
    ("PGT", 36000), ("PHOT", 46800), ("PHT", 28800), ("PKT", 18000),
    ("PMDT", -7200), ("PMST", -10800), ("PONT", 39600), ("PST", -28800),
    ("PT", -28800), ("PWT", 32400), ("PYST", -10800), ("PYT", -14400),
    ("Q", -14400), ("QYZT", 21600), ("R", -18000), ("RET", 14400),
    ("ROTT", -10800), ("S", -21600), ("SAKT", 39600), ("SAMT", 14400),
    ("SAST", 7200), ("SBT", 39600), ("SCT", 14400), ("SGT", 28800),
    ("SRET", 39600), ("SRT", -10800), ("SST", -39600), ("SYOT", 10800),
    ("T", -25200), ("TAHT", -36000), ("TFT", 18000), ("TJT", 18000),
    ("TKT", 46800), ("TLT", 32400), ("TMT", 18000), ("TOST", 50400),
    ("TOT", 46800), ("TRT", 10800), ("TVT", 43200), ("U", -28800),
    ("ULAST", 32400), ("ULAT", 28800), ("UTC", 0), ("UYST", -7200),
    ("UYT", -10800), ("UZT", 18000), ("V", -32400), ("VET", -14400),
    ("VLAST", 39600), ("VLAT", 36000), ("VOST", 21600), ("VUT", 39600),
    ("W", -36000), ("WAKT", 43200), ("WARST", -10800), ("WAST", 7200),
    ("WAT", 3600), ("WEST", 3600), ("WET", 0), ("WFT", 43200),
    ("WGST", -7200), ("WGT", -10800), ("WIB", 25200), ("WIT", 32400),
    ("WITA", 28800), ("WST", 50400), ("WT", 0), ("X", -39600),
    ("Y", -43200), ("YAKST", 36000), ("YAKT", 32400), ("YAPT", 36000),
    ("YEKST", 21600), ("YEKT", 18000), ("Z", 0),
];

const NAIVE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
];

fn offset_for(abbrev: &str) -> Option<i32> {
    TIMEZONE_OFFSETS
        .binary_search_by(|(name, _)| name.cmp(&abbrev))
        .ok()
        .map(|i| TIMEZONE_OFFSETS[i].1)
}

/// Parse a datetime string to a UNIX timestamp in seconds
pub fn parse_datetime(input: &str) -> Option<f64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(timestamp(&dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(timestamp(&dt.with_timezone(&Utc)));
    }

    for fmt in ["%a, %d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M:%S %z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(timestamp(&dt.with_timezone(&Utc)));
        }
    }

    // "%...Z" and bare naive forms read as UTC.
    let stripped_z = s.strip_suffix('Z').unwrap_or(s);
    for fmt in NAIVE_FORMATS {
        if let Some(ts) = parse_naive(stripped_z, fmt, 0) {
            return Some(ts);
        }
    }

    // Trailing named timezone: split it off and apply its offset.
    let (head, abbrev) = s.rsplit_once(' ')?;
    let offset = offset_for(abbrev)?;
    for fmt in NAIVE_FORMATS {
        if let Some(ts) = parse_naive(head.trim(), fmt, offset) {
            return Some(ts);
        }
    }

    None
}

fn parse_naive(s: &str, fmt: &str, offset_secs: i32) -> Option<f64> {
    let naive = if fmt.contains("%H") {
        NaiveDateTime::parse_from_str(s, fmt).ok()?
    } else {
        chrono::NaiveDate::parse_from_str(s, fmt)
            .ok()?
            .and_hms_opt(0, 0, 0)?
    };
    let utc = Utc.from_utc_datetime(&naive);
    Some(timestamp(&utc) - offset_secs as f64)
}

fn timestamp(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_for_binary_search() {
        for pair in TIMEZONE_OFFSETS.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} >= {}", pair[0].0, pair[1].0);
        }
    }

    #[test]
    fn test_rfc2822() {
        let ts = parse_datetime("Tue, 01 Jun 2021 13:00:00 +0200").unwrap();
        assert_eq!(ts, 1622545200.0);
    }

    #[test]
    fn test_rfc3339() {
        let ts = parse_datetime("2021-06-01T11:00:00Z").unwrap();
        assert_eq!(ts, 1622545200.0);
        let ts = parse_datetime("2021-06-01T13:00:00+02:00").unwrap();
        assert_eq!(ts, 1622545200.0);
    }

    #[test]
    fn test_named_timezone() {
        // CEST is UTC+2.
        let ts = parse_datetime("Tue, 01 Jun 2021 13:00:00 CEST").unwrap();
        assert_eq!(ts, 1622545200.0);
        // GMT resolves through RFC 2822 already; the table covers the rest.
        let ts = parse_datetime("Tue, 01 Jun 2021 11:00:00 GMT").unwrap();
        assert_eq!(ts, 1622545200.0);
    }

    #[test]
    fn test_naive_as_utc() {
        let ts = parse_datetime("2021-06-01 11:00:00").unwrap();
        assert_eq!(ts, 1622545200.0);
    }

    #[test]
    fn test_date_only() {
        let ts = parse_datetime("2021-06-01").unwrap();
        assert_eq!(ts, 1622505600.0);
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(parse_datetime("not a date").is_none());
        assert!(parse_datetime("").is_none());
    }
}
