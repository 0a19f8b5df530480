//! Daily operating-window gate.
//!
//! New-account intake and withdrawal initiation are only allowed inside a
//! daily window (default 08:00-22:00 West Africa Time). OTP forwarding for
//! already-acquired accounts is never gated and runs around the clock.
//!
//! The open/closed flag is cached and recomputed by a periodic task, so a
//! transient clock or timezone hiccup self-heals within one refresh interval.
//! The boundary messages are computed from the wall clock at call time and
//! stay accurate even if the refresh task is lagging.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Timelike, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// West Africa Time: fixed UTC+1, no daylight saving.
const WAT_OFFSET_SECS: i32 = 3600;

fn wat() -> FixedOffset {
    FixedOffset::east_opt(WAT_OFFSET_SECS).expect("UTC+1 is a valid offset")
}

pub struct OperatingWindow {
    start_hour: u32,
    end_hour: u32,
    tz: FixedOffset,
    open: AtomicBool,
}

impl OperatingWindow {
    /// Hours are civil hours 0-23, same range `Config` accepts. Equal hours
    /// wrap the full day, so the gate never closes.
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        assert!(
            start_hour <= 23 && end_hour <= 23,
            "operating hours must be 0-23, got {start_hour}..{end_hour}"
        );
        let w = Self {
            start_hour,
            end_hour,
            tz: wat(),
            open: AtomicBool::new(false),
        };
        w.refresh();
        w
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.tz)
    }

    /// Whether `now` falls inside the window. Handles overnight windows
    /// (start > end) even though the default is a same-day range.
    pub fn contains(&self, now: DateTime<FixedOffset>) -> bool {
        let h = now.hour();
        if self.start_hour < self.end_hour {
            self.start_hour <= h && h < self.end_hour
        } else {
            h >= self.start_hour || h < self.end_hour
        }
    }

    /// Current cached flag. Cheap; refreshed periodically.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Recompute the cached flag from the wall clock, logging transitions.
    pub fn refresh(&self) -> bool {
        let open = self.contains(self.now());
        let was = self.open.swap(open, Ordering::Relaxed);
        if open != was {
            if open {
                info!(
                    "operating window now OPEN ({:02}:00 WAT)",
                    self.start_hour
                );
            } else {
                info!(
                    "operating window now CLOSED ({:02}:00 WAT)",
                    self.end_hour
                );
            }
        }
        open
    }

    /// Force the cached flag, bypassing the wall clock.
    #[cfg(test)]
    pub(crate) fn set_open_for_tests(&self, open: bool) {
        self.open.store(open, Ordering::Relaxed);
    }

    /// Periodic refresh task; cancel via the token on shutdown.
    pub fn spawn_refresh(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(every) => {
                        self.refresh();
                    }
                }
            }
        })
    }

    /// Human-readable description of the next opening boundary.
    pub fn next_opening_message(&self) -> String {
        self.next_opening_message_at(self.now())
    }

    pub(crate) fn next_opening_message_at(&self, now: DateTime<FixedOffset>) -> String {
        if self.contains(now) {
            return "we are currently open".to_string();
        }
        let day = if now.hour() < self.start_hour {
            "today"
        } else {
            "tomorrow"
        };
        format!("{day} at {:02}:00 WAT", self.start_hour)
    }

    /// Human-readable description of the next closing boundary.
    pub fn next_closing_message(&self) -> String {
        self.next_closing_message_at(self.now())
    }

    pub(crate) fn next_closing_message_at(&self, now: DateTime<FixedOffset>) -> String {
        if self.contains(now) {
            format!("today at {:02}:00 WAT", self.end_hour)
        } else {
            format!("already closed until {:02}:00 WAT", self.start_hour)
        }
    }
}

/// Build a WAT timestamp (used by tests and callers that log boundary info).
pub fn wat_time(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> Option<DateTime<FixedOffset>> {
    wat()
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        wat_time(2026, 8, 29, hour, minute).unwrap()
    }

    #[test]
    fn window_boundaries_are_half_open() {
        let w = OperatingWindow::new(8, 22);
        assert!(w.contains(at(21, 59)));
        assert!(!w.contains(at(22, 0)));
        assert!(!w.contains(at(7, 59)));
        assert!(w.contains(at(8, 0)));
    }

    #[test]
    fn equal_hours_cover_the_whole_day() {
        let w = OperatingWindow::new(0, 0);
        assert!(w.contains(at(0, 0)));
        assert!(w.contains(at(12, 0)));
        assert!(w.contains(at(23, 59)));
    }

    #[test]
    #[should_panic(expected = "operating hours must be 0-23")]
    fn out_of_range_hour_is_rejected() {
        let _ = OperatingWindow::new(0, 24);
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let w = OperatingWindow::new(22, 6);
        assert!(w.contains(at(23, 30)));
        assert!(w.contains(at(2, 0)));
        assert!(!w.contains(at(12, 0)));
        assert!(!w.contains(at(6, 0)));
    }

    #[test]
    fn next_opening_message_distinguishes_today_and_tomorrow() {
        let w = OperatingWindow::new(8, 22);
        assert_eq!(w.next_opening_message_at(at(6, 0)), "today at 08:00 WAT");
        assert_eq!(
            w.next_opening_message_at(at(23, 0)),
            "tomorrow at 08:00 WAT"
        );
        assert_eq!(w.next_opening_message_at(at(12, 0)), "we are currently open");
    }

    #[test]
    fn next_closing_message_reports_todays_boundary() {
        let w = OperatingWindow::new(8, 22);
        assert_eq!(w.next_closing_message_at(at(12, 0)), "today at 22:00 WAT");
        assert_eq!(
            w.next_closing_message_at(at(23, 0)),
            "already closed until 08:00 WAT"
        );
    }
}
