//! Rate-limit policy: turn a provider's limit message into a wake time
//!
//! Providers phrase the reset as a local clock time in a named zone,
//! e.g. "You've hit your limit. Your limit resets 10pm
//! (Europe/Berlin)". Parsing is best-effort: anything we cannot read
//! degrades to a fixed fallback pause rather than an error.

use std::time::Duration;

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::registry::LoopKind;
use crate::signals::ControlSignals;

/// Pause when the message names no reset time we can read
const FALLBACK_WAIT_SECS: u64 = 15 * 60;

/// Safety margin past the stated reset time
const RESET_BUFFER_SECS: u64 = 60;

fn reset_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)resets\s+(\d{1,2})(?::(\d{2}))?(am|pm)\s*\(([^)]+)\)")
            .expect("reset pattern is valid")
    })
}

/// A computed rate-limit pause
#[derive(Debug, Clone)]
pub struct RateLimitPause {
    /// How long to sleep before retrying
    pub wait: Duration,

    /// The reset instant, when one was parsed
    pub reset_at: Option<DateTime<Utc>>,

    /// Why we fell back to the fixed pause, when we did
    pub parse_error: Option<String>,
}

impl RateLimitPause {
    fn fallback(reason: impl Into<String>) -> Self {
        Self {
            wait: Duration::from_secs(FALLBACK_WAIT_SECS),
            reset_at: None,
            parse_error: Some(reason.into()),
        }
    }
}

/// Outcome of sleeping out a rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Limit window elapsed, safe to retry
    Elapsed,
    /// A stop signal arrived mid-wait
    Stopped,
}

/// True when the output reads as a provider rate limit
pub fn is_rate_limit_message(output: &str) -> bool {
    output.to_lowercase().contains("hit your limit")
}

/// Compute the pause for a rate-limit message, relative to `now`.
///
/// The stated clock time is interpreted in the named zone; a time
/// already past today means tomorrow. An unknown zone falls back to
/// the machine's local offset; a time we cannot place at all falls
/// back to a fixed pause.
pub fn parse_pause(message: &str, now: DateTime<Utc>) -> RateLimitPause {
    debug!("ratelimit::parse_pause: called");

    let caps = match reset_pattern().captures(message) {
        Some(caps) => caps,
        None => {
            info!("Rate limit without a readable reset time, using fixed pause");
            return RateLimitPause::fallback("no reset time in message");
        }
    };

    let hour12: u32 = match caps[1].parse() {
        Ok(h) if (1..=12).contains(&h) => h,
        _ => return RateLimitPause::fallback(format!("unreadable hour '{}'", &caps[1])),
    };
    let minute: u32 = match caps.get(2) {
        Some(m) => match m.as_str().parse() {
            Ok(m) if m < 60 => m,
            _ => return RateLimitPause::fallback(format!("unreadable minute '{}'", &caps[2])),
        },
        None => 0,
    };
    let hour = match caps[3].to_lowercase().as_str() {
        "am" if hour12 == 12 => 0,
        "am" => hour12,
        _ if hour12 == 12 => 12,
        _ => hour12 + 12,
    };
    let zone_name = caps[4].trim().to_string();

    let reset_at = match zone_name.parse::<Tz>() {
        Ok(tz) => next_occurrence(now.with_timezone(&tz), hour, minute),
        Err(_) => {
            warn!(zone = %zone_name, "Unknown timezone in rate-limit message, using local time");
            next_occurrence(now.with_timezone(&Local), hour, minute)
        }
    };

    match reset_at {
        Some(reset_at) => {
            let wait = (reset_at - now)
                .to_std()
                .unwrap_or_default()
                .saturating_add(Duration::from_secs(RESET_BUFFER_SECS));
            info!(%reset_at, wait_secs = wait.as_secs(), "Rate limit parsed");
            RateLimitPause {
                wait,
                reset_at: Some(reset_at),
                parse_error: None,
            }
        }
        None => RateLimitPause::fallback(format!("could not place {hour:02}:{minute:02} in {zone_name}")),
    }
}

/// Next instant at the given wall-clock time, today if still ahead,
/// otherwise tomorrow. None when the zone cannot represent it (DST
/// gaps).
fn next_occurrence<Z: TimeZone>(now: DateTime<Z>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let today = now
        .timezone()
        .with_ymd_and_hms(now.year(), now.month(), now.day(), hour, minute, 0)
        .single();
    let candidate = match today {
        Some(t) if t > now => Some(t),
        _ => {
            let tomorrow = now.date_naive().succ_opt()?;
            now.timezone()
                .with_ymd_and_hms(tomorrow.year(), tomorrow.month(), tomorrow.day(), hour, minute, 0)
                .single()
        }
    };
    candidate.map(|t| t.with_timezone(&Utc))
}

/// Sleep out a rate-limit pause, waking early on a stop signal
pub async fn wait(pause: &RateLimitPause, signals: &ControlSignals, kind: LoopKind) -> WaitOutcome {
    info!(wait_secs = pause.wait.as_secs(), "Waiting out rate limit");
    if signals.interruptible_sleep(pause.wait, kind).await {
        WaitOutcome::Stopped
    } else {
        WaitOutcome::Elapsed
    }
}
