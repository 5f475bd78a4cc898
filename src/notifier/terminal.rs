use crate::notifier::{Alert, Notifier};

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, alert: &Alert) {
        tracing::warn!(
            source = %alert.source,
            symbol = %alert.symbol,
            name = %alert.display_name,
            price = %alert.price,
            high = %alert.high,
            danger_level = %alert.danger_level,
            previous_alert_price = ?alert.previous_alert_price,
            "ALERT: {} ({}) is {:.2}% below its high",
            alert.display_name,
            alert.symbol,
            alert.drawdown_pct(),
        );
    }
}
