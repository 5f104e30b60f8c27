use std::{fmt, str::FromStr, time::Duration};

/// A non-negative duration in Go's `time.ParseDuration` format, e.g. `15m`, `1h30m`, or `1.5s`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConfigDuration(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("durations must not be negative")]
    Negative,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

impl ConfigDuration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<ConfigDuration> for Duration {
    fn from(ConfigDuration(d): ConfigDuration) -> Self {
        d
    }
}

impl fmt::Display for ConfigDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl FromStr for ConfigDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn unit(unit: &str) -> Result<Duration, ParseError> {
            const MINUTE: Duration = Duration::from_secs(60);
            Ok(match unit {
                "ns" => Duration::from_nanos(1),
                // U+00B5 is the micro sign; U+03BC is the Greek letter mu.
                "us" | "\u{00b5}s" | "\u{03bc}s" => Duration::from_micros(1),
                "ms" => Duration::from_millis(1),
                "s" => Duration::from_secs(1),
                "m" => MINUTE,
                "h" => MINUTE * 60,
                _ => return Err(ParseError::InvalidUnit),
            })
        }

        let mut rest = s.trim();
        if rest.starts_with('-') {
            // `-0` is still zero.
            return match rest.trim_start_matches('-') {
                "0" => Ok(Self(Duration::ZERO)),
                _ => Err(ParseError::Negative),
            };
        }
        rest = rest.trim_start_matches('+');
        if rest == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let unit_start = rest
                .find(|c: char| c.is_alphabetic())
                .ok_or(ParseError::NoUnit)?;
            let (value, tail) = rest.split_at(unit_start);
            let unit_end = tail
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(tail.len());
            let (name, tail) = tail.split_at(unit_end);

            total += unit(name)?.mul_f64(value.parse::<f64>()?);
            rest = tail;
        }

        Ok(Self(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn parse(s: &str) -> Result<Duration, ParseError> {
        s.parse::<ConfigDuration>().map(Into::into)
    }

    #[test]
    fn parses_go_durations() {
        let cases: &[(&str, Duration)] = &[
            ("0", Duration::ZERO),
            ("-0", Duration::ZERO),
            ("+5s", Duration::from_secs(5)),
            ("90s", Duration::from_secs(90)),
            ("15m", MINUTE * 15),
            ("1h30m", MINUTE * 90),
            ("1.5h", MINUTE * 90),
            ("250ms", Duration::from_millis(250)),
            ("10us", Duration::from_micros(10)),
            ("10\u{00b5}s", Duration::from_micros(10)),
            ("3ns", Duration::from_nanos(3)),
            ("1m0.5s", MINUTE + Duration::from_millis(500)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse(input), Ok(*expected), "parsing {input:?}");
        }
    }

    #[test]
    fn rejects_invalid_durations() {
        assert_eq!(parse("-5m"), Err(ParseError::Negative));
        assert_eq!(parse("15"), Err(ParseError::NoUnit));
        assert_eq!(parse("15d"), Err(ParseError::InvalidUnit));
        assert!(matches!(parse("m"), Err(ParseError::NotANumber(_))));
        assert!(matches!(parse("1.2.3s"), Err(ParseError::NotANumber(_))));
    }

    #[test]
    fn displays_human_readable() {
        assert_eq!(ConfigDuration::from_secs(90).to_string(), "90s");
    }
}
