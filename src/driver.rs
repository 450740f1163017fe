//! Callers that feed a limiter from outside: request replay and a thread
//! stress run.

use std::io::BufRead;
use std::thread;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{LimiterError, Result};
use crate::ratelimit::RateLimiter;

/// One `key,timestamp` request from replay input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub key: String,
    pub timestamp: i64,
}

/// The limiter's answer for one replayed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// 1-based input line
    pub line: usize,
    pub key: String,
    pub timestamp: i64,
    pub admitted: bool,
}

/// Parse a timestamp given as integer seconds or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Some(secs);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Parse one replay line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<Request>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parse_error = |message: String| LimiterError::Parse {
        line: line_no,
        message,
    };

    let (key, raw_ts) = line
        .rsplit_once(',')
        .ok_or_else(|| parse_error("expected `key,timestamp`".to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(parse_error("empty key".to_string()));
    }
    let timestamp = parse_timestamp(raw_ts)
        .ok_or_else(|| parse_error(format!("invalid timestamp `{}`", raw_ts.trim())))?;

    Ok(Some(Request {
        key: key.to_string(),
        timestamp,
    }))
}

/// Feed every request in `reader` through the limiter, in input order.
///
/// With `probe` set each request is only checked with `allowed`; otherwise
/// it goes through `check_and_hit`.
pub fn replay<R: BufRead>(limiter: &RateLimiter, reader: R, probe: bool) -> Result<Vec<Decision>> {
    let mut decisions = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let Some(request) = parse_line(line_no, &line?)? else {
            continue;
        };

        let admitted = if probe {
            limiter.allowed(&request.key, request.timestamp)
        } else {
            limiter.check_and_hit(&request.key, request.timestamp)
        };

        decisions.push(Decision {
            line: line_no,
            key: request.key,
            timestamp: request.timestamp,
            admitted,
        });
    }

    debug!(requests = decisions.len(), "Replay finished");
    Ok(decisions)
}

/// Totals from a stress run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StressReport {
    pub admitted: u64,
    pub rejected: u64,
}

/// Call `check_and_hit` `calls` times from each of `threads` threads, all at
/// `timestamp`, spreading calls over `keys` random keys.
pub fn stress(
    limiter: &RateLimiter,
    threads: usize,
    calls: usize,
    keys: usize,
    timestamp: i64,
) -> StressReport {
    let keys = keys.max(1);
    info!(threads, calls, keys, "Starting stress run");

    let report = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut report = StressReport::default();
                    for _ in 0..calls {
                        let key = format!("key-{}", rng.gen_range(0..keys));
                        if limiter.check_and_hit(&key, timestamp) {
                            report.admitted += 1;
                        } else {
                            report.rejected += 1;
                        }
                    }
                    report
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .fold(StressReport::default(), |acc, r| StressReport {
                admitted: acc.admitted + r.admitted,
                rejected: acc.rejected + r.rejected,
            })
    });

    info!(
        admitted = report.admitted,
        rejected = report.rejected,
        "Stress run finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("42"), Some(42));
        assert_eq!(parse_timestamp(" -3 "), Some(-3));
        assert_eq!(parse_timestamp("1970-01-01T00:01:40Z"), Some(100));
        assert_eq!(parse_timestamp("1970-01-01T01:00:00+01:00"), Some(0));
        assert_eq!(parse_timestamp("soon"), None);
    }

    #[test]
    fn test_parse_line_skips_blank_and_comments() {
        assert_eq!(parse_line(1, "").unwrap(), None);
        assert_eq!(parse_line(2, "   # header").unwrap(), None);
    }

    #[test]
    fn test_parse_line_uses_last_comma() {
        let request = parse_line(1, "tenant,a , 17").unwrap().unwrap();
        assert_eq!(
            request,
            Request {
                key: "tenant,a".to_string(),
                timestamp: 17,
            }
        );
    }

    #[test]
    fn test_parse_line_errors_carry_line_number() {
        let err = parse_line(7, "no-comma").unwrap_err();
        assert!(matches!(err, LimiterError::Parse { line: 7, .. }));

        let err = parse_line(8, "user,later").unwrap_err();
        assert!(matches!(err, LimiterError::Parse { line: 8, .. }));

        let err = parse_line(9, " ,5").unwrap_err();
        assert!(matches!(err, LimiterError::Parse { line: 9, .. }));
    }

    #[test]
    fn test_replay_out_of_order_scenario() {
        let limiter = RateLimiter::with_limits(2, 10).unwrap();
        let input = "# key,timestamp\nuser_2,10\nuser_2,5\n\nuser_2,11\n";

        let decisions = replay(&limiter, Cursor::new(input), false).unwrap();

        let admitted: Vec<_> = decisions.iter().map(|d| (d.line, d.admitted)).collect();
        assert_eq!(admitted, vec![(2, true), (3, true), (5, false)]);
    }

    #[test]
    fn test_replay_probe_records_nothing() {
        let limiter = RateLimiter::with_limits(1, 10).unwrap();
        let input = "k,1\nk,2\nk,3\n";

        let decisions = replay(&limiter, Cursor::new(input), true).unwrap();

        assert!(decisions.iter().all(|d| d.admitted));
        assert_eq!(limiter.count("k"), 0);
    }

    #[test]
    fn test_replay_stops_on_bad_line() {
        let limiter = RateLimiter::with_limits(1, 10).unwrap();
        let result = replay(&limiter, Cursor::new("k,1\nbroken\n"), false);

        assert!(matches!(result, Err(LimiterError::Parse { line: 2, .. })));
    }

    #[test]
    fn test_stress_single_key_admits_exactly_limit() {
        let limiter = RateLimiter::with_limits(25, 1_000).unwrap();

        let report = stress(&limiter, 4, 50, 1, 0);

        assert_eq!(report.admitted, 25);
        assert_eq!(report.rejected, 175);
    }
}
