//! Market-hours scheduler.
//!
//! Polls a [`Clock`] and drives a [`CycleRunner`] (one trader or a whole
//! fleet) through the market state machine:
//!
//! - `MarketOpen`: full cycle, then wait one interval.
//! - `AfterHoursRestricted`: crypto-only cycle on weekdays outside the
//!   window (when enabled), then wait two intervals.
//! - `MarketClosed`: poll until the next open boundary, recomputed on
//!   every poll.
//! - `ShuttingDown`: the [`CancelToken`] fired. The in-flight cycle always
//!   finishes first; waits are sliced so cancellation lands within seconds.

pub mod fleet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::engine::{CycleScope, Trader};

/// Slice length while waiting for the next tick.
const TICK_STEP_SECS: i64 = 5;
/// Slice length while waiting for the market to open.
const CLOSED_POLL_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative stop request shared between the signal handler and the
/// scheduler loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(d) = duration.to_std() {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        self.as_ref().now()
    }

    async fn sleep(&self, duration: Duration) {
        self.as_ref().sleep(duration).await;
    }
}

/// Simulated clock: sleeping advances time instantly.
#[derive(Debug)]
pub struct SimulatedClock {
    now: Mutex<DateTime<Utc>>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// Market calendar
// ---------------------------------------------------------------------------

/// Weekday trading window in the exchange's timezone. Both ends inclusive.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl MarketCalendar {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self { tz, open, close }
    }

    /// 09:30–16:00 New York.
    pub fn regular() -> Self {
        Self::new(chrono_tz::America::New_York, hm(9, 30), hm(16, 0))
    }

    /// 08:00–18:00 New York.
    pub fn extended() -> Self {
        Self::new(chrono_tz::America::New_York, hm(8, 0), hm(18, 0))
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_weekday(&self, at: DateTime<Utc>) -> bool {
        is_trading_day(at.with_timezone(&self.tz).weekday())
    }

    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.tz);
        let t = local.time();
        is_trading_day(local.weekday()) && t >= self.open && t <= self.close
    }

    /// The next opening bell strictly after `at` (today's if it's still
    /// ahead, otherwise the next weekday's).
    pub fn next_open(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let local = at.with_timezone(&self.tz);
        let mut date = local.date_naive();
        if !(is_trading_day(date.weekday()) && local.time() < self.open) {
            date = date.succ_opt().unwrap_or(date);
            while !is_trading_day(date.weekday()) {
                date = date.succ_opt().unwrap_or(date);
            }
        }
        let naive = date.and_time(self.open);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&naive))
            .with_timezone(&Utc)
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

fn is_trading_day(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

fn format_duration(d: Duration) -> String {
    let h = d.num_hours();
    let m = d.num_minutes() % 60;
    if h > 0 {
        format!("{h}h {m}m")
    } else {
        format!("{m}m")
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    MarketOpen,
    MarketClosed,
    AfterHoursRestricted,
    ShuttingDown,
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketState::MarketOpen => write!(f, "MARKET_OPEN"),
            MarketState::MarketClosed => write!(f, "MARKET_CLOSED"),
            MarketState::AfterHoursRestricted => write!(f, "AFTER_HOURS_RESTRICTED"),
            MarketState::ShuttingDown => write!(f, "SHUTTING_DOWN"),
        }
    }
}

/// Something the scheduler can tick: a single trader or a fleet.
#[async_trait]
pub trait CycleRunner: Send {
    async fn run_tick(&mut self, scope: CycleScope) -> Result<()>;
}

#[async_trait]
impl CycleRunner for Trader {
    async fn run_tick(&mut self, scope: CycleScope) -> Result<()> {
        let report = self.run_cycle(scope).await?;
        info!(trader = %self.name(), "{report}");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub extended_hours: bool,
    pub crypto_after_hours: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::minutes(15),
            extended_hours: false,
            crypto_after_hours: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub full_cycles: u64,
    pub crypto_cycles: u64,
    pub failed_cycles: u64,
}

impl SchedulerStats {
    pub fn total_cycles(&self) -> u64 {
        self.full_cycles + self.crypto_cycles
    }
}

pub struct Scheduler<C: Clock> {
    calendar: MarketCalendar,
    config: ScheduleConfig,
    clock: C,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(config: ScheduleConfig, clock: C) -> Self {
        let calendar = if config.extended_hours {
            MarketCalendar::extended()
        } else {
            MarketCalendar::regular()
        };
        Self {
            calendar,
            config,
            clock,
        }
    }

    pub fn with_calendar(mut self, calendar: MarketCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Pure function of the clock reading and the cancellation flag.
    pub fn state_at(&self, at: DateTime<Utc>, cancel: &CancelToken) -> MarketState {
        if cancel.is_cancelled() {
            MarketState::ShuttingDown
        } else if self.calendar.is_open(at) {
            MarketState::MarketOpen
        } else if self.config.crypto_after_hours && self.calendar.is_weekday(at) {
            MarketState::AfterHoursRestricted
        } else {
            MarketState::MarketClosed
        }
    }

    /// Run until cancelled.
    pub async fn run<R: CycleRunner + ?Sized>(&self, runner: &mut R, cancel: &CancelToken) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        info!(
            interval_mins = self.config.interval.num_minutes(),
            extended_hours = self.config.extended_hours,
            crypto_after_hours = self.config.crypto_after_hours,
            "Scheduler started"
        );

        loop {
            let now = self.clock.now();
            let state = self.state_at(now, cancel);
            debug!(%state, "Scheduler tick");

            match state {
                MarketState::ShuttingDown => break,
                MarketState::MarketOpen => {
                    self.tick(runner, CycleScope::Full, &mut stats).await;
                    let next = self.clock.now() + self.config.interval;
                    self.sleep_until(next, cancel).await;
                }
                MarketState::AfterHoursRestricted => {
                    self.tick(runner, CycleScope::CryptoOnly, &mut stats).await;
                    let next = self.clock.now() + self.config.interval * 2;
                    self.sleep_until(next, cancel).await;
                }
                MarketState::MarketClosed => self.wait_for_open(cancel).await,
            }
        }

        info!(
            full = stats.full_cycles,
            crypto = stats.crypto_cycles,
            failed = stats.failed_cycles,
            "Scheduler stopped"
        );
        stats
    }

    /// One cycle regardless of market hours.
    pub async fn run_once<R: CycleRunner + ?Sized>(runner: &mut R, scope: CycleScope) -> Result<()> {
        runner.run_tick(scope).await
    }

    async fn tick<R: CycleRunner + ?Sized>(&self, runner: &mut R, scope: CycleScope, stats: &mut SchedulerStats) {
        match scope {
            CycleScope::Full => stats.full_cycles += 1,
            CycleScope::CryptoOnly => stats.crypto_cycles += 1,
        }
        if let Err(e) = runner.run_tick(scope).await {
            error!(error = %e, %scope, "Cycle failed, retrying next tick");
            stats.failed_cycles += 1;
        }
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>, cancel: &CancelToken) {
        let step = Duration::seconds(TICK_STEP_SECS);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let remaining = deadline - self.clock.now();
            if remaining <= Duration::zero() {
                return;
            }
            self.clock.sleep(remaining.min(step)).await;
        }
    }

    async fn wait_for_open(&self, cancel: &CancelToken) {
        let now = self.clock.now();
        let next = self.calendar.next_open(now);
        info!(
            next_open = %next.with_timezone(&self.calendar.timezone()),
            wait = %format_duration(next - now),
            "Market closed"
        );

        // The open boundary is recomputed once per poll; the wait itself is
        // sliced so a cancel is seen within TICK_STEP_SECS.
        let poll = Duration::seconds(CLOSED_POLL_SECS);
        loop {
            let now = self.clock.now();
            if self.state_at(now, cancel) != MarketState::MarketClosed {
                return;
            }
            let next_open = self.calendar.next_open(now);
            let deadline = if next_open > now { next_open.min(now + poll) } else { now + poll };
            self.sleep_until(deadline, cancel).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
