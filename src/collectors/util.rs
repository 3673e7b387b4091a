//! Helpers shared by the CLI and the collectors.

use anyhow::{Result, anyhow, bail};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::time::Duration;

fn duration_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"(\d+)(ms|s|m|h|d)").expect("Invalid regex")
    })
}

/// Parse a duration such as `30s`, `15m`, `1h30m` or `2d`.
///
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns an error if the string is empty or contains anything besides
/// number/unit pairs.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        bail!("empty duration");
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let re = duration_regex();
    let mut total = Duration::ZERO;
    let mut consumed = 0;

    for caps in re.captures_iter(value) {
        let (Some(whole), Some(amount), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        if whole.start() != consumed {
            break;
        }
        consumed = whole.end();

        let amount: u64 = amount
            .as_str()
            .parse()
            .map_err(|e| anyhow!("invalid duration '{value}': {e}"))?;
        let part = match unit.as_str() {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            _ => Duration::from_secs(amount.saturating_mul(86_400)),
        };
        total = total.saturating_add(part);
    }

    if consumed != value.len() {
        bail!("invalid duration '{value}', expected e.g. 30s, 15m, 1h30m");
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 45 ").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1h 30m").is_err());
        assert!(parse_duration("m5").is_err());
    }
}
