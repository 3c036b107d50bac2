use tracing::{error, info};

use crate::config::Settings;
use crate::notifier::Notifier;
use crate::portfolio::{Alert, PortfolioSnapshot};

pub const ALERT_TITLE: &str = "[Rebalance]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Skipped,
    Sent,
    Failed,
}

pub fn should_dispatch(notification_enabled: bool, alerts: &[Alert]) -> bool {
    notification_enabled && !alerts.is_empty()
}

/// Notification body: the alerts first, then the full holdings rendering.
pub fn compose_message(snapshot: &PortfolioSnapshot) -> String {
    let alerts = snapshot
        .alerts
        .iter()
        .map(|alert| alert.to_string())
        .collect::<Vec<String>>();
    format!("{}\n\n{}\n\n{}", ALERT_TITLE, alerts.join("\n\n"), snapshot)
}

#[derive(Debug, Clone)]
pub struct AlertGate<N> {
    notifier: N,
}

impl<N: Notifier> AlertGate<N> {
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }

    pub async fn dispatch(&self, settings: &Settings, snapshot: &PortfolioSnapshot) -> Dispatch {
        if !should_dispatch(settings.notification_enabled, &snapshot.alerts) {
            return Dispatch::Skipped;
        }

        let message = compose_message(snapshot);
        match self
            .notifier
            .send_alert(&settings.send_key, ALERT_TITLE, &message)
            .await
        {
            Ok(()) => {
                info!("ALERT: {}", message);
                Dispatch::Sent
            }
            Err(err) => {
                error!("Failed to send alert : {}", err);
                Dispatch::Failed
            }
        }
    }
}
