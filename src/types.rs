// src/types.rs

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;

/// Where the work item is executed.
///
/// - `Local`: run a binary on this host with the payload in its environment
///   and on stdin.
/// - `Docker`: create and run a container on the local engine.
/// - `Ecs`: ask the orchestrator to place a task on this container instance
///   and watch the local engine for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExecuteMethod {
    #[default]
    Local,
    Docker,
    Ecs,
}

impl fmt::Display for ExecuteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecuteMethod::Local => "local",
            ExecuteMethod::Docker => "docker",
            ExecuteMethod::Ecs => "ecs",
        };
        f.write_str(s)
    }
}

/// Parse a simple duration string like `"30s"`, `"250ms"`, `"40m"`, `"1h"`,
/// `"3d"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let seconds_per_unit: u64 = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, h, or d",
                unit
            ));
        }
    };
    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("40m"), Ok(Duration::from_secs(2400)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration(" 3d "), Ok(Duration::from_secs(3 * 86_400)));
    }

    #[test]
    fn rejects_missing_or_unknown_units() {
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn rejects_overflowing_durations() {
        let err = parse_duration("18446744073709551615d").unwrap_err();
        assert!(err.contains("too large"));
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }
}
