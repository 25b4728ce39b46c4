use crate::core::{BrowserTrait, NetworkEvent, TimingConfig};
use crate::errors::{AgentError, Result};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Tick-driven idle tracking over request lifecycle events.
///
/// A request start resets both the settled counter and the idle streak;
/// finished or failed requests only bump the settled counter. The page is
/// quiet once `required_idle_ticks` ticks in a row saw no request start.
#[derive(Debug, Clone)]
pub struct QuiescenceTracker {
    required_idle_ticks: u32,
    idle_ticks: u32,
    settled_since_reset: u64,
    started_this_tick: bool,
    total_started: u64,
}

impl QuiescenceTracker {
    pub fn new(required_idle_ticks: u32) -> Self {
        Self {
            required_idle_ticks: required_idle_ticks.max(1),
            idle_ticks: 0,
            settled_since_reset: 0,
            started_this_tick: false,
            total_started: 0,
        }
    }

    pub fn from_window(idle_window: Duration, tick: Duration) -> Self {
        let tick_ms = tick.as_millis().max(1);
        let ticks = idle_window.as_millis().div_ceil(tick_ms);
        Self::new(u32::try_from(ticks).unwrap_or(u32::MAX))
    }

    pub fn observe(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::RequestStarted => {
                self.settled_since_reset = 0;
                self.started_this_tick = true;
                self.total_started += 1;
            }
            NetworkEvent::RequestFinished | NetworkEvent::RequestFailed => {
                self.settled_since_reset += 1;
            }
        }
    }

    /// Close the current tick.
    pub fn advance(&mut self) {
        if self.started_this_tick {
            self.idle_ticks = 0;
        } else {
            self.idle_ticks = self.idle_ticks.saturating_add(1);
        }
        self.started_this_tick = false;
    }

    pub fn is_quiet(&self) -> bool {
        self.idle_ticks >= self.required_idle_ticks
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    pub fn settled_since_reset(&self) -> u64 {
        self.settled_since_reset
    }

    pub fn total_started(&self) -> u64 {
        self.total_started
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescenceSettings {
    pub tick: Duration,
    pub idle_window: Duration,
    pub max_wait: Duration,
}

impl From<&TimingConfig> for QuiescenceSettings {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            tick: timing.quiescence_tick(),
            idle_window: timing.quiescence_idle(),
            max_wait: timing.quiescence_max_wait(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuiescenceReport {
    pub elapsed: Duration,
    pub requests_started: u64,
    pub requests_settled: u64,
}

/// Wait until the tab has issued no new request for `settings.idle_window`.
///
/// Fails with [`AgentError::TimedOut`] once `settings.max_wait` has elapsed,
/// even when that falls between two ticks.
pub async fn await_quiescence<B: BrowserTrait>(
    browser: &B,
    tab: &B::TabHandle,
    settings: QuiescenceSettings,
) -> Result<QuiescenceReport> {
    if settings.tick.is_zero() {
        return Err(AgentError::ConfigurationError(
            "quiescence tick must be positive".to_string(),
        ));
    }

    browser.observe_network(tab).await?;

    let mut tracker = QuiescenceTracker::from_window(settings.idle_window, settings.tick);
    let mut settled = 0u64;
    let mut elapsed = Duration::ZERO;
    let timed_out = || AgentError::TimedOut {
        elapsed_ms: settings.max_wait.as_millis() as u64,
    };

    let mut ticker = tokio::time::interval(settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval completes immediately.
    let started = ticker.tick().await;
    let deadline = started + settings.max_wait;

    loop {
        if tokio::time::timeout_at(deadline, ticker.tick()).await.is_err() {
            return Err(timed_out());
        }
        elapsed += settings.tick;

        for event in browser.drain_network_events(tab).await? {
            if event != NetworkEvent::RequestStarted {
                settled += 1;
            }
            tracker.observe(event);
        }
        tracker.advance();

        if tracker.is_quiet() {
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                requests = tracker.total_started(),
                "network quiescent"
            );
            return Ok(QuiescenceReport {
                elapsed,
                requests_started: tracker.total_started(),
                requests_settled: settled,
            });
        }

        if elapsed >= settings.max_wait {
            return Err(timed_out());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBrowser, MockSite, MockTab, NetworkScript};
    use tokio::time::Instant;

    fn settings(idle_ms: u64, max_ms: u64) -> QuiescenceSettings {
        QuiescenceSettings {
            tick: Duration::from_millis(500),
            idle_window: Duration::from_millis(idle_ms),
            max_wait: Duration::from_millis(max_ms),
        }
    }

    async fn open(script: NetworkScript) -> (MockBrowser, MockTab) {
        let mut browser = MockBrowser::new(MockSite::blank().with_network(script));
        browser.launch(&Default::default()).await.unwrap();
        let tab = browser.new_tab(None).await.unwrap();
        (browser, tab)
    }

    #[test]
    fn window_is_rounded_up_to_whole_ticks() {
        let tracker =
            QuiescenceTracker::from_window(Duration::from_millis(2500), Duration::from_millis(500));
        assert_eq!(tracker.required_idle_ticks, 5);

        let tracker =
            QuiescenceTracker::from_window(Duration::from_millis(2600), Duration::from_millis(500));
        assert_eq!(tracker.required_idle_ticks, 6);
    }

    #[test]
    fn request_start_resets_streak_and_counter() {
        let mut tracker = QuiescenceTracker::new(2);
        tracker.observe(NetworkEvent::RequestFinished);
        tracker.advance();
        assert_eq!(tracker.idle_ticks(), 1);
        assert_eq!(tracker.settled_since_reset(), 1);

        tracker.observe(NetworkEvent::RequestStarted);
        tracker.advance();
        assert_eq!(tracker.idle_ticks(), 0);
        assert_eq!(tracker.settled_since_reset(), 0);

        tracker.observe(NetworkEvent::RequestFailed);
        tracker.advance();
        tracker.advance();
        assert!(tracker.is_quiet());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_page_quiesces_after_idle_window() {
        let (browser, tab) = open(NetworkScript::Silent).await;
        let started = Instant::now();

        let report = await_quiescence(&browser, &tab, settings(2500, 30000))
            .await
            .unwrap();

        assert_eq!(report.elapsed, Duration::from_millis(2500));
        assert_eq!(started.elapsed(), Duration::from_millis(2500));
        assert_eq!(report.requests_started, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_silence_waits_for_full_window() {
        let script = NetworkScript::Scripted(vec![
            (Duration::from_millis(100), NetworkEvent::RequestStarted),
            (Duration::from_millis(700), NetworkEvent::RequestStarted),
            (Duration::from_millis(900), NetworkEvent::RequestFinished),
            (Duration::from_millis(1200), NetworkEvent::RequestFailed),
        ]);
        let (browser, tab) = open(script).await;

        let report = await_quiescence(&browser, &tab, settings(2500, 30000))
            .await
            .unwrap();

        // last start lands in the tick ending at 1000 ms
        assert_eq!(report.elapsed, Duration::from_millis(3500));
        assert_eq!(report.requests_started, 2);
        assert_eq!(report.requests_settled, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_requests_time_out_at_max_wait() {
        let (browser, tab) = open(NetworkScript::Periodic {
            every: Duration::from_millis(400),
        })
        .await;
        let started = Instant::now();

        let err = await_quiescence(&browser, &tab, settings(2500, 30000))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::TimedOut { elapsed_ms: 30000 }));
        assert_eq!(started.elapsed(), Duration::from_millis(30000));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_between_ticks_is_honored() {
        let (browser, tab) = open(NetworkScript::Periodic {
            every: Duration::from_millis(400),
        })
        .await;
        let started = Instant::now();

        let err = await_quiescence(&browser, &tab, settings(2500, 1200))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::TimedOut { elapsed_ms: 1200 }));
        assert_eq!(started.elapsed(), Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tick_is_a_configuration_error() {
        let (browser, tab) = open(NetworkScript::Silent).await;
        let zero_tick = QuiescenceSettings {
            tick: Duration::ZERO,
            ..settings(2500, 30000)
        };

        let err = await_quiescence(&browser, &tab, zero_tick).await.unwrap_err();

        assert!(matches!(err, AgentError::ConfigurationError(_)));
    }
}
