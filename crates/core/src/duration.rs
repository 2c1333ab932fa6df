use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("invalid duration {0:?}")]
pub struct DurationParseError(pub String);

/// Parses a session/duration spec accepting three shapes, in order:
/// a bare non-negative integer (seconds), a Go-style duration string
/// (`"15m"`, `"12h30m"`), or an `Nd` day count.
pub fn parse_flexible(s: &str) -> Result<Duration, DurationParseError> {
	let trimmed = s.trim();
	if trimmed.is_empty() {
		return Err(DurationParseError(s.to_string()));
	}

	if let Ok(secs) = trimmed.parse::<u64>() {
		return Ok(Duration::from_secs(secs));
	}

	if let Some(days) = trimmed
		.strip_suffix('d')
		.or_else(|| trimmed.strip_suffix('D'))
	{
		if let Ok(n) = days.parse::<u64>() {
			return Ok(Duration::from_secs(n * 86_400));
		}
	}

	match go_parse_duration::parse_duration(trimmed) {
		Ok(ns) if ns >= 0 => Ok(Duration::from_nanos(ns as u64)),
		_ => Err(DurationParseError(s.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_bare_seconds() {
		assert_eq!(parse_flexible("900").unwrap(), Duration::from_secs(900));
	}

	#[test]
	fn parses_go_duration() {
		assert_eq!(parse_flexible("15m").unwrap(), Duration::from_secs(900));
		assert_eq!(parse_flexible("12h").unwrap(), Duration::from_secs(12 * 3600));
	}

	#[test]
	fn parses_day_suffix() {
		assert_eq!(
			parse_flexible("30d").unwrap(),
			Duration::from_secs(30 * 86_400)
		);
	}

	#[test]
	fn rejects_garbage() {
		assert!(parse_flexible("not-a-duration").is_err());
		assert!(parse_flexible("").is_err());
	}
}
