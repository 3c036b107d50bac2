use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use strum::Display;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::alert::{AlertGate, Dispatch};
use crate::config::{ConfigProvider, Settings};
use crate::market_hours::is_trading_time;
use crate::notifier::Notifier;
use crate::portfolio::evaluate;
use crate::quote::QuoteSource;
use crate::state::StatusSink;

pub const IDLE_SLEEP: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum MonitorState {
    /// Market closed, waiting for the session to open.
    Idle,
    Polling,
    /// An alert was delivered, the next fetch is deferred by the alert interval.
    Cooldown,
    /// The last cycle failed.
    Backoff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: MonitorState,
    pub sleep: Duration,
}

/// Delay applied after a failed cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// The configured alert interval.
    #[default]
    AlertInterval,
    Fixed(Duration),
}

impl BackoffPolicy {
    pub fn delay(&self, settings: &Settings) -> Duration {
        match self {
            BackoffPolicy::AlertInterval => settings.alert_interval(),
            BackoffPolicy::Fixed(delay) => *delay,
        }
    }
}

pub struct Monitor<Q, N, C, S> {
    quotes: Q,
    gate: AlertGate<N>,
    config: C,
    status: S,
    backoff: BackoffPolicy,
    state: MonitorState,
    // settings of the last cycle that read the config, used to size the backoff
    last_settings: Settings,
}

impl<Q, N, C, S> Monitor<Q, N, C, S>
where
    Q: QuoteSource,
    N: Notifier,
    C: ConfigProvider,
    S: StatusSink,
{
    pub fn new(quotes: Q, notifier: N, config: C, status: S) -> Self {
        Self {
            quotes,
            gate: AlertGate::new(notifier),
            config,
            status,
            backoff: BackoffPolicy::default(),
            state: MonitorState::Idle,
            last_settings: Settings::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Runs one cycle as of `now` and returns the state entered along with
    /// how long to sleep before the next one. Never fails: cycle errors are
    /// logged and turned into a backoff.
    pub async fn step(&mut self, now: NaiveDateTime) -> Transition {
        let transition = match self.cycle(now).await {
            Ok(transition) => transition,
            Err(err) => {
                error!("Monitor cycle failed : {:#}", err);
                Transition {
                    state: MonitorState::Backoff,
                    sleep: self.backoff.delay(&self.last_settings),
                }
            }
        };

        if transition.state != self.state {
            info!("Monitor {} -> {}", self.state, transition.state);
        }
        self.state = transition.state;
        transition
    }

    async fn cycle(&mut self, now: NaiveDateTime) -> Result<Transition> {
        if !is_trading_time(now) {
            return Ok(Transition {
                state: MonitorState::Idle,
                sleep: IDLE_SLEEP,
            });
        }

        let config = self.config.get_config().await?;
        self.last_settings = config.settings.clone();

        let settings = &config.settings;
        let polling = Transition {
            state: MonitorState::Polling,
            sleep: settings.refresh_interval(),
        };

        if config.portfolio.is_empty() {
            debug!("Portfolio is empty, nothing to check");
            return Ok(polling);
        }

        let codes = config
            .portfolio
            .iter()
            .map(|holding| holding.code.clone())
            .collect::<Vec<String>>();
        let prices = self.quotes.fetch_prices(&codes).await;

        let snapshot = evaluate(&config.portfolio, &prices)?;
        debug!(
            "Total value {} with {} alert(s)",
            snapshot.total_value,
            snapshot.alerts.len()
        );
        self.status.publish(snapshot.to_string()).await;

        match self.gate.dispatch(settings, &snapshot).await {
            Dispatch::Sent => Ok(Transition {
                state: MonitorState::Cooldown,
                sleep: settings.alert_interval(),
            }),
            Dispatch::Skipped | Dispatch::Failed => Ok(polling),
        }
    }

    /// Cycles until `shutdown` turns true or its sender is dropped. A cycle in
    /// progress is allowed to finish; sleeps are cut short.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Monitor loop started");

        while !*shutdown.borrow() {
            let transition = self.step(Local::now().naive_local()).await;

            select! {
                _ = tokio::time::sleep(transition.sleep) => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Monitor loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::{HoldingSpec, MonitorConfig};
    use crate::notifier::NotifyError;
    use crate::quote::Prices;
    use crate::state::{LastStatus, NO_DATA};

    #[derive(Clone, Default)]
    struct FakeQuotes {
        prices: Prices,
        calls: Arc<AtomicUsize>,
    }

    impl QuoteSource for FakeQuotes {
        async fn fetch_prices(&self, codes: &[String]) -> Prices {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prices
                .iter()
                .filter(|(code, _)| codes.contains(*code))
                .map(|(code, price)| (code.clone(), *price))
                .collect()
        }
    }

    #[derive(Clone, Default)]
    struct FakeNotifier {
        fail: bool,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Notifier for FakeNotifier {
        async fn send_alert(
            &self,
            _send_key: &str,
            _title: &str,
            body: &str,
        ) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(body.to_string());
            if self.fail {
                Err(NotifyError::MissingKey)
            } else {
                Ok(())
            }
        }
    }

    #[derive(Clone, Default)]
    struct FakeConfig {
        config: Arc<Mutex<Option<MonitorConfig>>>,
    }

    impl FakeConfig {
        fn new(config: MonitorConfig) -> Self {
            Self {
                config: Arc::new(Mutex::new(Some(config))),
            }
        }

        fn fail(&self) {
            *self.config.lock().unwrap() = None;
        }
    }

    impl ConfigProvider for FakeConfig {
        async fn get_config(&self) -> Result<MonitorConfig> {
            self.config
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow!("config unavailable"))
        }
    }

    struct Fixture {
        quotes: FakeQuotes,
        notifier: FakeNotifier,
        config: FakeConfig,
        status: LastStatus,
    }

    impl Fixture {
        fn new(config: MonitorConfig) -> Self {
            Self {
                quotes: FakeQuotes {
                    prices: Prices::from([
                        (String::from("sh600519"), dec!(1500.00)),
                        (String::from("sz000001"), dec!(15.00)),
                    ]),
                    ..Default::default()
                },
                notifier: FakeNotifier::default(),
                config: FakeConfig::new(config),
                status: LastStatus::default(),
            }
        }

        fn monitor(&self) -> Monitor<FakeQuotes, FakeNotifier, FakeConfig, LastStatus> {
            Monitor::new(
                self.quotes.clone(),
                self.notifier.clone(),
                self.config.clone(),
                self.status.clone(),
            )
        }

        fn fetches(&self) -> usize {
            self.quotes.calls.load(Ordering::SeqCst)
        }

        fn notifications(&self) -> usize {
            self.notifier.sent.lock().unwrap().len()
        }
    }

    fn holding(code: &str, shares: u64, min: Decimal, max: Decimal) -> HoldingSpec {
        HoldingSpec {
            code: code.to_string(),
            name: String::new(),
            held_shares: shares,
            min_percentage: min,
            max_percentage: max,
            net_value: None,
        }
    }

    fn config(notification_enabled: bool, portfolio: Vec<HoldingSpec>) -> MonitorConfig {
        MonitorConfig {
            settings: Settings {
                refresh_interval_seconds: 5,
                alert_interval_seconds: 300,
                notification_enabled,
                send_key: String::from("SCT123"),
            },
            portfolio,
        }
    }

    fn breaching() -> Vec<HoldingSpec> {
        vec![holding("sh600519", 10, dec!(40), dec!(60))]
    }

    fn balanced() -> Vec<HoldingSpec> {
        // 1500 each, 50% / 50%
        vec![
            holding("sh600519", 1, dec!(40), dec!(60)),
            holding("sz000001", 100, dec!(40), dec!(60)),
        ]
    }

    // 2024-06-04 is a Tuesday
    fn tuesday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn saturday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 8)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_closed_market_is_idle() {
        let fixture = Fixture::new(config(true, breaching()));
        let mut monitor = fixture.monitor();

        for now in [saturday(10, 0), tuesday(8, 0), tuesday(15, 30)] {
            let transition = monitor.step(now).await;
            assert_eq!(transition.state, MonitorState::Idle);
            assert_eq!(transition.sleep, IDLE_SLEEP);
        }
        assert_eq!(fixture.fetches(), 0);
        assert_eq!(fixture.status.get().await, NO_DATA);
    }

    #[tokio::test]
    async fn test_open_market_fetches_and_publishes() {
        let fixture = Fixture::new(config(true, balanced()));
        let mut monitor = fixture.monitor();

        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(
            transition,
            Transition {
                state: MonitorState::Polling,
                sleep: Duration::from_secs(5),
            }
        );
        assert_eq!(fixture.fetches(), 1);
        assert_eq!(fixture.notifications(), 0);

        let status = fixture.status.get().await;
        assert!(status.starts_with("[Holdings]"));
        assert!(status.contains("sz000001(sz000001)"));
        assert!(status.contains("weight 50.0000%"));
    }

    #[tokio::test]
    async fn test_dispatched_alert_enters_cooldown() {
        let fixture = Fixture::new(config(true, breaching()));
        let mut monitor = fixture.monitor();

        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(transition.state, MonitorState::Cooldown);
        assert_eq!(transition.sleep, Duration::from_secs(300));
        assert_eq!(monitor.state(), MonitorState::Cooldown);

        let sent = fixture.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("sh600519"));
        assert!(sent[0].contains("100.0000%"));
    }

    #[tokio::test]
    async fn test_cooldown_returns_to_polling() {
        let fixture = Fixture::new(config(true, breaching()));
        let mut monitor = fixture.monitor();

        assert_eq!(
            monitor.step(tuesday(10, 0)).await.state,
            MonitorState::Cooldown
        );

        *fixture.config.config.lock().unwrap() = Some(config(true, balanced()));
        assert_eq!(
            monitor.step(tuesday(10, 5)).await.state,
            MonitorState::Polling
        );

        assert_eq!(monitor.step(tuesday(16, 0)).await.state, MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_disabled_notifications_keep_refresh_interval() {
        let fixture = Fixture::new(config(false, breaching()));
        let mut monitor = fixture.monitor();

        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(transition.state, MonitorState::Polling);
        assert_eq!(transition.sleep, Duration::from_secs(5));
        assert_eq!(fixture.notifications(), 0);
        assert!(fixture.status.get().await.contains("sh600519"));
    }

    #[tokio::test]
    async fn test_failed_dispatch_skips_cooldown() {
        let mut fixture = Fixture::new(config(true, breaching()));
        fixture.notifier.fail = true;
        let mut monitor = fixture.monitor();

        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(transition.state, MonitorState::Polling);
        assert_eq!(transition.sleep, Duration::from_secs(5));
        assert_eq!(fixture.notifications(), 1);
    }

    #[tokio::test]
    async fn test_empty_portfolio_skips_fetch() {
        let fixture = Fixture::new(config(true, vec![]));
        let mut monitor = fixture.monitor();

        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(transition.state, MonitorState::Polling);
        assert_eq!(transition.sleep, Duration::from_secs(5));
        assert_eq!(fixture.fetches(), 0);
        assert_eq!(fixture.status.get().await, NO_DATA);
    }

    #[tokio::test]
    async fn test_missing_prices_raise_no_alerts() {
        let mut fixture = Fixture::new(config(true, breaching()));
        fixture.quotes.prices.clear();
        let mut monitor = fixture.monitor();

        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(transition.state, MonitorState::Polling);
        assert_eq!(fixture.fetches(), 1);
        assert_eq!(fixture.notifications(), 0);
        assert!(fixture.status.get().await.contains("weight 0.0000%"));
    }

    #[tokio::test]
    async fn test_config_changes_apply_next_cycle() {
        let fixture = Fixture::new(config(false, breaching()));
        let mut monitor = fixture.monitor();

        assert_eq!(
            monitor.step(tuesday(10, 0)).await.state,
            MonitorState::Polling
        );

        let mut updated = config(true, breaching());
        updated.settings.alert_interval_seconds = 900;
        *fixture.config.config.lock().unwrap() = Some(updated);

        let transition = monitor.step(tuesday(10, 1)).await;
        assert_eq!(transition.state, MonitorState::Cooldown);
        assert_eq!(transition.sleep, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_failed_cycle_backs_off() {
        let fixture = Fixture::new(config(false, balanced()));
        let mut monitor = fixture.monitor();

        fixture.config.fail();
        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(transition.state, MonitorState::Backoff);
        assert_eq!(transition.sleep, Settings::default().alert_interval());

        let mut slow = config(false, balanced());
        slow.settings.alert_interval_seconds = 42;
        *fixture.config.config.lock().unwrap() = Some(slow);
        assert_eq!(
            monitor.step(tuesday(10, 1)).await.state,
            MonitorState::Polling
        );

        fixture.config.fail();
        let transition = monitor.step(tuesday(10, 2)).await;
        assert_eq!(transition.state, MonitorState::Backoff);
        assert_eq!(transition.sleep, Duration::from_secs(42));
    }

    #[tokio::test]
    async fn test_evaluation_error_backs_off() {
        let portfolio = vec![holding("sh600519", u64::MAX, dec!(0), dec!(100))];
        let mut fixture = Fixture::new(config(true, portfolio));
        fixture
            .quotes
            .prices
            .insert(String::from("sh600519"), Decimal::MAX);
        let mut monitor = fixture
            .monitor()
            .with_backoff(BackoffPolicy::Fixed(Duration::from_secs(7)));

        let transition = monitor.step(tuesday(10, 0)).await;
        assert_eq!(transition.state, MonitorState::Backoff);
        assert_eq!(transition.sleep, Duration::from_secs(7));
        assert_eq!(fixture.notifications(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fixture = Fixture::new(config(false, balanced()));
        let monitor = fixture.monitor();

        let (tx, rx) = watch::channel(false);
        let task = tokio::task::spawn(monitor.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let res = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let fixture = Fixture::new(config(false, balanced()));
        let monitor = fixture.monitor();

        let (tx, rx) = watch::channel(false);
        let task = tokio::task::spawn(monitor.run(rx));
        drop(tx);

        let res = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(res.is_ok());
    }
}
