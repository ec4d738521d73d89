//! Link health monitor.
//!
//! Runs on trigger units. Every period it feeds the hardware watchdog,
//! reconnects if the radio lost its association or the previous iteration
//! failed, and pings the hub with a bounded timeout. The signal LED shows
//! the result: the assigned id as `Count(n)` (or steady on) when healthy,
//! a blink when degraded.
//!
//! ```text
//! Unknown -> Connected -> (ping fails) -> Reconnecting -> Connected
//!                                                      -> Disconnected (terminal)
//! ```

use crate::indicator::{Mode, SharedIndicator};
use crate::link::{is_out_of_memory, LinkError};
use crate::network::NetworkError;
use crate::registry::RegistryError;
use log::{error, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// State of the link to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    Connected,
    Reconnecting,
    /// Rejected by the hub; stays here until the device is reset.
    Disconnected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

/// Health loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Sleep between iterations.
    pub period: Duration,
    /// Budget for one remote call.
    pub call_timeout: Duration,
    /// Budget for a whole reconnect step.
    pub step_timeout: Duration,
    /// Hardware watchdog timeout.
    pub watchdog_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3),
            call_timeout: Duration::from_secs(2),
            step_timeout: Duration::from_secs(6),
            watchdog_timeout: Duration::from_secs(8),
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), HealthConfigError> {
        if self.call_timeout >= self.period {
            return Err(HealthConfigError("call_timeout must be shorter than period"));
        }
        if self.period >= self.watchdog_timeout {
            return Err(HealthConfigError("period must be shorter than watchdog_timeout"));
        }
        if self.step_timeout >= self.watchdog_timeout {
            return Err(HealthConfigError("step_timeout must be shorter than watchdog_timeout"));
        }
        Ok(())
    }
}

/// Invalid health loop timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfigError(pub &'static str);

impl fmt::Display for HealthConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid health config: {}", self.0)
    }
}

impl std::error::Error for HealthConfigError {}

/// Hardware watchdog.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Whole-device reset.
pub trait SystemReset {
    fn reset(&mut self, reason: &str) -> !;
}

/// Failure of one reconnect step.
#[derive(Debug)]
pub enum ReconnectError {
    /// Scan or join failed.
    Network(NetworkError),
    /// A registration call failed.
    Link(LinkError),
    /// Session info could not be persisted.
    Registry(RegistryError),
    /// The hub has no free slot.
    Rejected,
}

impl ReconnectError {
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            Self::Link(e) => e.is_resource_exhaustion(),
            Self::Network(NetworkError::Io(e)) | Self::Registry(RegistryError::Storage(e)) => {
                is_out_of_memory(e)
            }
            _ => false,
        }
    }
}

impl fmt::Display for ReconnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "network: {}", e),
            Self::Link(e) => write!(f, "registration: {}", e),
            Self::Registry(e) => write!(f, "session store: {}", e),
            Self::Rejected => write!(f, "hub has no free slot"),
        }
    }
}

impl std::error::Error for ReconnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Network(e) => Some(e),
            Self::Link(e) => Some(e),
            Self::Registry(e) => Some(e),
            Self::Rejected => None,
        }
    }
}

impl From<NetworkError> for ReconnectError {
    fn from(e: NetworkError) -> Self {
        Self::Network(e)
    }
}

impl From<LinkError> for ReconnectError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<RegistryError> for ReconnectError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

/// The link being supervised.
#[allow(async_fn_in_trait)]
pub trait LinkSupervisor {
    /// Whether the radio still reports an association.
    fn is_associated(&self) -> bool;

    /// Rescan, rejoin, re-register and persist the session. Returns the
    /// assigned id when the hub reported one.
    async fn reconnect(&mut self) -> Result<Option<u8>, ReconnectError>;

    /// Ping the counterpart.
    async fn ping(&mut self) -> Result<(), LinkError>;
}

/// Result of one health iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Healthy,
    Degraded,
    Disconnected,
}

/// Periodic reconnect and ping loop.
pub struct HealthMonitor<L, W, R> {
    supervisor: L,
    watchdog: W,
    reset: R,
    indicator: SharedIndicator,
    config: HealthConfig,
    state: LinkState,
    reconnect_required: bool,
    assigned_id: Option<u8>,
}

impl<L, W, R> HealthMonitor<L, W, R>
where
    L: LinkSupervisor,
    W: Watchdog,
    R: SystemReset,
{
    pub fn new(
        supervisor: L,
        watchdog: W,
        reset: R,
        indicator: SharedIndicator,
        config: HealthConfig,
    ) -> Result<Self, HealthConfigError> {
        config.validate()?;
        Ok(Self {
            supervisor,
            watchdog,
            reset,
            indicator,
            config,
            state: LinkState::Unknown,
            reconnect_required: false,
            assigned_id: None,
        })
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn assigned_id(&self) -> Option<u8> {
        self.assigned_id
    }

    pub fn supervisor(&self) -> &L {
        &self.supervisor
    }

    /// Iterate until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Health loop: period {:?}, watchdog {:?}",
            self.config.period, self.config.watchdog_timeout
        );
        loop {
            self.step().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.period) => {}
            }
        }
        info!("Health loop stopped in state {}", self.state);
    }

    /// One iteration. Feeds the watchdog at its start and its end.
    pub async fn step(&mut self) -> StepOutcome {
        self.watchdog.feed();

        if self.state == LinkState::Disconnected {
            self.watchdog.feed();
            return StepOutcome::Disconnected;
        }

        if self.reconnect_required || !self.supervisor.is_associated() {
            if let Some(outcome) = self.reconnect().await {
                self.watchdog.feed();
                return outcome;
            }
            self.watchdog.feed();
        }

        let outcome = match timeout(self.config.call_timeout, self.supervisor.ping()).await {
            Ok(Ok(())) => {
                self.transition(LinkState::Connected);
                self.reconnect_required = false;
                let visual = match self.assigned_id {
                    Some(id) => Mode::Count(id),
                    None => Mode::On,
                };
                self.show(visual);
                StepOutcome::Healthy
            }
            Ok(Err(e)) => {
                if e.is_resource_exhaustion() {
                    error!("Out of memory during ping: {}", e);
                    self.reset.reset("out of memory during ping");
                }
                warn!("Ping failed: {}", e);
                self.degrade()
            }
            Err(_) => {
                warn!("Ping timed out after {:?}", self.config.call_timeout);
                self.degrade()
            }
        };

        self.watchdog.feed();
        outcome
    }

    /// `None` when the reconnect succeeded and the ping should follow.
    async fn reconnect(&mut self) -> Option<StepOutcome> {
        self.transition(LinkState::Reconnecting);
        match timeout(self.config.step_timeout, self.supervisor.reconnect()).await {
            Ok(Ok(id)) => {
                if id.is_some() {
                    self.assigned_id = id;
                }
                self.reconnect_required = false;
                None
            }
            Ok(Err(ReconnectError::Rejected)) => {
                error!("Hub rejected registration; staying disconnected until reset");
                self.transition(LinkState::Disconnected);
                self.show(Mode::Off);
                Some(StepOutcome::Disconnected)
            }
            Ok(Err(e)) => {
                if e.is_resource_exhaustion() {
                    error!("Out of memory during reconnect: {}", e);
                    self.reset.reset("out of memory during reconnect");
                }
                warn!("Reconnect failed: {}", e);
                Some(self.degrade())
            }
            Err(_) => {
                warn!("Reconnect timed out after {:?}", self.config.step_timeout);
                Some(self.degrade())
            }
        }
    }

    fn degrade(&mut self) -> StepOutcome {
        self.reconnect_required = true;
        self.transition(LinkState::Reconnecting);
        self.show(Mode::Blink);
        StepOutcome::Degraded
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            info!("Link {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Set the indicator only on change so periodic patterns keep running.
    fn show(&self, mode: Mode) {
        let mut led = self.indicator.borrow_mut();
        if led.mode() != mode {
            led.set_mode(mode);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{CountingWatchdog, PanicReset};
    use super::*;
    use crate::hw::SimLine;
    use crate::indicator::{shared, Color, DualColorIndicator};
    use std::collections::VecDeque;
    use std::io;

    #[derive(Debug, Clone, Copy)]
    enum Ping {
        Pong,
        Refused,
        Hang,
        OutOfMemory,
    }

    #[derive(Default)]
    struct ScriptedLink {
        associated: bool,
        reconnects: Vec<Result<Option<u8>, ReconnectError>>,
        pings: VecDeque<Ping>,
        reconnect_calls: u32,
        ping_calls: u32,
    }

    impl LinkSupervisor for ScriptedLink {
        fn is_associated(&self) -> bool {
            self.associated
        }

        async fn reconnect(&mut self) -> Result<Option<u8>, ReconnectError> {
            self.reconnect_calls += 1;
            let result = if self.reconnects.is_empty() {
                Ok(None)
            } else {
                self.reconnects.remove(0)
            };
            self.associated = result.is_ok();
            result
        }

        async fn ping(&mut self) -> Result<(), LinkError> {
            self.ping_calls += 1;
            match self.pings.pop_front().unwrap_or(Ping::Pong) {
                Ping::Pong => Ok(()),
                Ping::Refused => Err(LinkError::Io(io::Error::from(io::ErrorKind::ConnectionRefused))),
                Ping::Hang => std::future::pending().await,
                Ping::OutOfMemory => Err(LinkError::Io(io::Error::from_raw_os_error(12))),
            }
        }
    }

    fn monitor(
        link: ScriptedLink,
    ) -> (HealthMonitor<ScriptedLink, CountingWatchdog, PanicReset>, SharedIndicator, CountingWatchdog) {
        let led = shared(DualColorIndicator::new(
            SimLine::new("signal_red", false),
            SimLine::new("signal_green", false),
            Color::Red,
        ));
        let watchdog = CountingWatchdog::default();
        let monitor = HealthMonitor::new(
            link,
            watchdog.clone(),
            PanicReset,
            led.clone(),
            HealthConfig::default(),
        )
        .unwrap();
        (monitor, led, watchdog)
    }

    #[test]
    fn test_config_validation() {
        assert!(HealthConfig::default().validate().is_ok());
        let slow_calls = HealthConfig {
            call_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        assert!(slow_calls.validate().is_err());
        let long_period = HealthConfig {
            period: Duration::from_secs(8),
            ..Default::default()
        };
        assert!(long_period.validate().is_err());
        let long_step = HealthConfig {
            step_timeout: Duration::from_secs(9),
            ..Default::default()
        };
        assert!(long_step.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_then_recovers() {
        let link = ScriptedLink {
            reconnects: vec![Ok(Some(2)), Ok(Some(2))],
            pings: VecDeque::from([Ping::Pong, Ping::Hang, Ping::Pong]),
            ..Default::default()
        };
        let (mut monitor, led, watchdog) = monitor(link);

        // First iteration connects and shows the assigned id.
        assert_eq!(monitor.step().await, StepOutcome::Healthy);
        assert_eq!(monitor.state(), LinkState::Connected);
        assert_eq!(led.borrow().mode(), Mode::Count(2));
        assert_eq!(monitor.supervisor().reconnect_calls, 1);

        // The hub stops answering: degraded blink, reconnect scheduled.
        let before = watchdog.0.get();
        let started = tokio::time::Instant::now();
        assert_eq!(monitor.step().await, StepOutcome::Degraded);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(led.borrow().mode(), Mode::Blink);
        assert_eq!(monitor.state(), LinkState::Reconnecting);
        assert!(watchdog.0.get() - before >= 2);
        assert_eq!(monitor.supervisor().reconnect_calls, 1);

        // Next iteration reconnects and the connected pattern comes back.
        assert_eq!(monitor.step().await, StepOutcome::Healthy);
        assert_eq!(monitor.supervisor().reconnect_calls, 2);
        assert_eq!(led.borrow().mode(), Mode::Count(2));
        assert_eq!(monitor.state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_pattern_not_restarted() {
        let link = ScriptedLink {
            associated: true,
            ..Default::default()
        };
        let (mut monitor, led, _) = monitor(link);
        monitor.step().await;
        assert_eq!(led.borrow().mode(), Mode::On);

        led.borrow_mut().tick();
        let phase = led.borrow().get_state().phase;
        monitor.step().await;
        assert_eq!(led.borrow().get_state().phase, phase);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_retries_next_iteration() {
        let link = ScriptedLink {
            reconnects: vec![
                Err(ReconnectError::Network(NetworkError::NoCandidates {
                    filter: "clacker RED".into(),
                })),
                Ok(Some(1)),
            ],
            ..Default::default()
        };
        let (mut monitor, led, _) = monitor(link);

        assert_eq!(monitor.step().await, StepOutcome::Degraded);
        assert_eq!(led.borrow().mode(), Mode::Blink);
        assert_eq!(monitor.supervisor().ping_calls, 0);

        assert_eq!(monitor.step().await, StepOutcome::Healthy);
        assert_eq!(monitor.assigned_id(), Some(1));
        assert_eq!(led.borrow().mode(), Mode::Count(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_error_marks_reconnect() {
        let link = ScriptedLink {
            associated: true,
            pings: VecDeque::from([Ping::Refused]),
            ..Default::default()
        };
        let (mut monitor, _, _) = monitor(link);
        assert_eq!(monitor.step().await, StepOutcome::Degraded);
        assert_eq!(monitor.supervisor().reconnect_calls, 0);

        monitor.step().await;
        assert_eq!(monitor.supervisor().reconnect_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_terminal() {
        let link = ScriptedLink {
            reconnects: vec![Err(ReconnectError::Rejected)],
            ..Default::default()
        };
        let (mut monitor, led, watchdog) = monitor(link);

        assert_eq!(monitor.step().await, StepOutcome::Disconnected);
        assert_eq!(monitor.state(), LinkState::Disconnected);
        assert_eq!(led.borrow().mode(), Mode::Off);

        let feeds = watchdog.0.get();
        assert_eq!(monitor.step().await, StepOutcome::Disconnected);
        assert_eq!(monitor.supervisor().reconnect_calls, 1);
        assert_eq!(monitor.supervisor().ping_calls, 0);
        assert_eq!(watchdog.0.get(), feeds + 2);
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "device reset")]
    async fn test_out_of_memory_resets() {
        let link = ScriptedLink {
            associated: true,
            pings: VecDeque::from([Ping::OutOfMemory]),
            ..Default::default()
        };
        let (mut monitor, _, _) = monitor(link);
        monitor.step().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_feeds_watchdog_until_cancelled() {
        let link = ScriptedLink {
            associated: true,
            ..Default::default()
        };
        let (monitor, _, watchdog) = monitor(link);
        let cancel = CancellationToken::new();

        tokio::task::LocalSet::new()
            .run_until(async {
                let task = tokio::task::spawn_local(monitor.run(cancel.clone()));
                sleep(Duration::from_secs(10)).await;
                cancel.cancel();
                task.await.unwrap();
            })
            .await;

        // Iterations at 0, 3, 6 and 9 s, two feeds each.
        assert_eq!(watchdog.0.get(), 8);
    }
}
