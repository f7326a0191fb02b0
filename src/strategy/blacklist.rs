//! Dynamic symbol blacklist
//!
//! Keeps a rolling log of losing closes and bans a symbol for a while after
//! repeated losses inside the window. Bans expire lazily on lookup.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::config::BlacklistConfig;

/// One losing close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub loss_usd: Decimal,
}

/// Active ban as reported to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanStatus {
    pub symbol: String,
    pub expires_at: DateTime<Utc>,
    pub remaining_hours: Decimal,
    pub recent_losses: usize,
}

#[derive(Debug, Clone)]
pub struct DynamicBlacklist {
    config: BlacklistConfig,
    static_symbols: HashSet<String>,
    records: Vec<StopLossRecord>,
    banned: HashMap<String, DateTime<Utc>>,
}

impl DynamicBlacklist {
    pub fn new(config: BlacklistConfig) -> Self {
        let static_symbols = config.static_symbols.iter().cloned().collect();
        Self {
            config,
            static_symbols,
            records: Vec::new(),
            banned: HashMap::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::hours(i64::from(self.config.window_hours))
    }

    fn ban_duration(&self) -> Duration {
        Duration::hours(i64::from(self.config.ban_hours))
    }

    fn retention(&self) -> Duration {
        Duration::hours(i64::from(self.config.retention_hours))
    }

    /// Permanently excluded by configuration
    pub fn is_static(&self, symbol: &str) -> bool {
        self.static_symbols.contains(symbol)
    }

    /// Append a loss and re-evaluate the symbol. Returns the new ban expiry
    /// when this loss triggered a ban.
    pub fn record_loss(&mut self, record: StopLossRecord) -> Option<DateTime<Utc>> {
        if !self.config.enabled {
            return None;
        }

        let now = record.timestamp;
        let symbol = record.symbol.clone();
        info!(
            "Recorded loss for {}: ${} ({})",
            symbol, record.loss_usd, record.reason
        );
        self.records.push(record);

        let window_start = now - self.window();
        let recent = self
            .records
            .iter()
            .filter(|r| r.symbol == symbol && r.timestamp >= window_start)
            .count();

        let mut new_ban = None;
        if recent >= self.config.max_losses {
            if self.is_blacklisted(&symbol, now) {
                // Existing ban keeps its expiry
                info!("{} already banned, {} losses in window", symbol, recent);
            } else {
                let expiry = now + self.ban_duration();
                warn!(
                    "BLACKLISTED {} until {} after {} losses in {}h",
                    symbol, expiry, recent, self.config.window_hours
                );
                self.banned.insert(symbol, expiry);
                new_ban = Some(expiry);
            }
        }

        self.prune(now);
        new_ban
    }

    /// Dynamic ban check; expired bans are removed here
    pub fn is_blacklisted(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.banned.get(symbol) {
            Some(expiry) if now >= *expiry => {
                info!("{} removed from blacklist", symbol);
                self.banned.remove(symbol);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Static or dynamic ban
    pub fn is_blocked(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.is_static(symbol) || self.is_blacklisted(symbol, now)
    }

    /// Drop loss records past retention
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention();
        self.records.retain(|r| r.timestamp >= cutoff);
    }

    /// Rebuild state from persisted records, oldest first
    pub fn replay<I>(&mut self, records: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = StopLossRecord>,
    {
        let mut records: Vec<StopLossRecord> = records.into_iter().collect();
        records.sort_by_key(|r| r.timestamp);
        let count = records.len();
        for record in records {
            self.record_loss(record);
        }
        self.prune(now);
        let expired: Vec<String> = self
            .banned
            .iter()
            .filter(|(_, expiry)| now >= **expiry)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in expired {
            self.banned.remove(&symbol);
        }
        count
    }

    pub fn records(&self) -> &[StopLossRecord] {
        &self.records
    }

    /// Active bans with remaining time; expired ones are dropped
    pub fn status(&mut self, now: DateTime<Utc>) -> Vec<BanStatus> {
        self.banned.retain(|_, expiry| now < *expiry);
        let window_start = now - self.window();

        let mut statuses: Vec<BanStatus> = self
            .banned
            .iter()
            .map(|(symbol, expiry)| BanStatus {
                symbol: symbol.clone(),
                expires_at: *expiry,
                remaining_hours: (Decimal::from((*expiry - now).num_seconds())
                    / Decimal::from(3600))
                .round_dp(2),
                recent_losses: self
                    .records
                    .iter()
                    .filter(|r| &r.symbol == symbol && r.timestamp >= window_start)
                    .count(),
            })
            .collect();
        statuses.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn loss(symbol: &str, at: DateTime<Utc>) -> StopLossRecord {
        StopLossRecord {
            symbol: symbol.to_string(),
            timestamp: at,
            reason: "Emergency stop (drawdown)".to_string(),
            loss_usd: dec!(12.5),
        }
    }

    #[test]
    fn test_two_losses_in_window_ban_for_six_hours() {
        let mut blacklist = DynamicBlacklist::new(BlacklistConfig::default());

        assert_eq!(blacklist.record_loss(loss("XUSDT", t0())), None);
        assert!(!blacklist.is_blacklisted("XUSDT", t0()));

        let second = t0() + Duration::hours(1);
        let expiry = blacklist.record_loss(loss("XUSDT", second)).unwrap();
        assert_eq!(expiry, second + Duration::hours(6));
        assert!(blacklist.is_blacklisted("XUSDT", second));
        assert!(!blacklist.is_blacklisted("YUSDT", second));
    }

    #[test]
    fn test_losses_outside_window_do_not_ban() {
        let mut blacklist = DynamicBlacklist::new(BlacklistConfig::default());
        blacklist.record_loss(loss("XUSDT", t0()));
        let later = t0() + Duration::hours(2) + Duration::minutes(1);
        assert_eq!(blacklist.record_loss(loss("XUSDT", later)), None);
        assert!(!blacklist.is_blacklisted("XUSDT", later));
    }

    #[test]
    fn test_third_loss_does_not_extend_ban() {
        let mut blacklist = DynamicBlacklist::new(BlacklistConfig::default());
        blacklist.record_loss(loss("XUSDT", t0()));
        let banned_at = t0() + Duration::hours(1);
        blacklist.record_loss(loss("XUSDT", banned_at));

        // Hour 3: the first loss has left the window, the second has not
        let third = t0() + Duration::hours(3);
        assert_eq!(blacklist.record_loss(loss("XUSDT", third)), None);

        let status = blacklist.status(third);
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].expires_at, banned_at + Duration::hours(6));
        assert_eq!(status[0].remaining_hours, dec!(4));
        assert_eq!(status[0].recent_losses, 2);
    }

    #[test]
    fn test_ban_expires_lazily() {
        let mut blacklist = DynamicBlacklist::new(BlacklistConfig::default());
        blacklist.record_loss(loss("XUSDT", t0()));
        blacklist.record_loss(loss("XUSDT", t0()));

        let just_after = t0() + Duration::hours(6) + Duration::minutes(1);
        assert!(blacklist.is_blacklisted("XUSDT", t0() + Duration::hours(5)));
        assert!(!blacklist.is_blacklisted("XUSDT", just_after));
        assert!(blacklist.status(just_after).is_empty());
        assert!(!blacklist.banned.contains_key("XUSDT"));
    }

    #[test]
    fn test_records_pruned_after_retention() {
        let mut blacklist = DynamicBlacklist::new(BlacklistConfig::default());
        blacklist.record_loss(loss("XUSDT", t0()));
        blacklist.record_loss(loss("YUSDT", t0() + Duration::hours(25)));
        assert_eq!(blacklist.records().len(), 1);
        assert_eq!(blacklist.records()[0].symbol, "YUSDT");
    }

    #[test]
    fn test_disabled_and_static() {
        let config = BlacklistConfig {
            enabled: false,
            static_symbols: vec!["LUNAUSDT".to_string()],
            ..BlacklistConfig::default()
        };
        let mut blacklist = DynamicBlacklist::new(config);
        blacklist.record_loss(loss("XUSDT", t0()));
        blacklist.record_loss(loss("XUSDT", t0()));
        assert!(!blacklist.is_blocked("XUSDT", t0()));
        assert!(blacklist.is_blocked("LUNAUSDT", t0()));
        assert!(blacklist.records().is_empty());
    }

    #[test]
    fn test_replay_restores_active_bans_only() {
        let now = t0() + Duration::hours(10);
        let records = vec![
            // Old pair: ban expired at t0+6h
            loss("AUSDT", t0()),
            loss("AUSDT", t0() + Duration::minutes(30)),
            // Recent pair: banned from now-90m until now+4h30m
            loss("BUSDT", now - Duration::hours(2)),
            loss("BUSDT", now - Duration::minutes(90)),
        ];

        let mut blacklist = DynamicBlacklist::new(BlacklistConfig::default());
        assert_eq!(blacklist.replay(records.into_iter().rev(), now), 4);
        assert!(!blacklist.is_blacklisted("AUSDT", now));
        assert!(blacklist.is_blacklisted("BUSDT", now));

        let bans = blacklist.status(now);
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].expires_at, now + Duration::minutes(270));
        assert_eq!(bans[0].remaining_hours, dec!(4.5));
    }
}
