use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Risk limits and circuit breakers to prevent catastrophic losses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskLimits {
    pub max_position_size: f64,
    pub min_position_size: f64,
    pub size_step: f64,
    /// Fraction of equity put at risk per trade
    pub max_risk_per_trade_pct: f64,
    /// Absolute account currency
    pub max_daily_loss: f64,
    /// Absolute account currency
    pub max_weekly_loss: f64,
    /// Fraction of peak equity
    pub max_drawdown_pct: f64,
    pub max_concurrent_positions: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 1.0,
            min_position_size: 0.01,
            size_step: 0.01,
            max_risk_per_trade_pct: 0.01, // 1% of equity
            max_daily_loss: 500.0,
            max_weekly_loss: 1500.0,
            max_drawdown_pct: 0.10, // -10% from peak
            max_concurrent_positions: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingStatus {
    Active,
    Halted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerTrip {
    MaxDrawdown { drawdown: f64 },
    DailyLoss { loss: f64 },
    WeeklyLoss { loss: f64 },
}

/// Account snapshot plus the halt flag and period counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub peak_equity: f64,
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub status: TradingStatus,
    pub halt_reason: Option<String>,
    pub day: NaiveDate,
    pub week_start: NaiveDate,
}

/// Monday of the ISO week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

impl AccountState {
    pub fn new(initial_balance: f64, now: DateTime<Utc>) -> Self {
        let day = now.date_naive();
        Self {
            balance: initial_balance,
            equity: initial_balance,
            peak_equity: initial_balance,
            daily_pnl: 0.0,
            weekly_pnl: 0.0,
            status: TradingStatus::Active,
            halt_reason: None,
            day,
            week_start: week_start(day),
        }
    }

    pub fn update_equity(&mut self, equity: f64) {
        self.equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
    }

    pub fn update_balance(&mut self, balance: f64) {
        self.balance = balance;
    }

    /// Add a closed trade's PnL to the daily and weekly counters
    pub fn record_realized(&mut self, pnl: f64) {
        self.daily_pnl += pnl;
        self.weekly_pnl += pnl;
    }

    /// (peak - equity) / peak, never negative
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - self.equity) / self.peak_equity).max(0.0)
    }

    pub fn is_halted(&self) -> bool {
        self.status == TradingStatus::Halted
    }

    /// ACTIVE -> HALTED. Returns false if already halted.
    pub fn halt(&mut self, reason: impl Into<String>) -> bool {
        if self.is_halted() {
            return false;
        }
        let reason = reason.into();
        tracing::warn!(equity = self.equity, peak = self.peak_equity, "Trading halted: {}", reason);
        self.status = TradingStatus::Halted;
        self.halt_reason = Some(reason);
        true
    }

    /// HALTED -> ACTIVE, resetting peak equity to current equity
    ///
    /// Returns false if trading was not halted.
    pub fn resume(&mut self) -> bool {
        if !self.is_halted() {
            return false;
        }
        tracing::info!(
            equity = self.equity,
            previous_peak = self.peak_equity,
            "Trading resumed"
        );
        self.status = TradingStatus::Active;
        self.halt_reason = None;
        self.peak_equity = self.equity;
        true
    }

    /// Reset period counters at UTC day / ISO week boundaries
    ///
    /// A halt is cleared on any boundary. Returns true if a boundary was crossed.
    pub fn roll_periods(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        let mut rolled = false;

        if today > self.day {
            tracing::info!(day = %today, previous_daily_pnl = self.daily_pnl, "New trading day");
            self.daily_pnl = 0.0;
            self.day = today;
            rolled = true;
        }

        let this_week = week_start(today);
        if this_week > self.week_start {
            tracing::info!(week = %this_week, previous_weekly_pnl = self.weekly_pnl, "New trading week");
            self.weekly_pnl = 0.0;
            self.week_start = this_week;
            rolled = true;
        }

        if rolled {
            self.resume();
        }
        rolled
    }
}

impl RiskLimits {
    /// Check account-level breakers, most severe first
    pub fn check(&self, state: &AccountState) -> Result<(), CircuitBreakerTrip> {
        // Check drawdown
        let drawdown = state.drawdown();
        if drawdown >= self.max_drawdown_pct {
            return Err(CircuitBreakerTrip::MaxDrawdown { drawdown });
        }

        // Check daily loss
        if -state.daily_pnl >= self.max_daily_loss {
            return Err(CircuitBreakerTrip::DailyLoss {
                loss: -state.daily_pnl,
            });
        }

        // Check weekly loss
        if -state.weekly_pnl >= self.max_weekly_loss {
            return Err(CircuitBreakerTrip::WeeklyLoss {
                loss: -state.weekly_pnl,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_circuit_breaker_daily_loss() {
        let limits = RiskLimits::default();
        let mut state = AccountState::new(10000.0, Utc::now());

        state.record_realized(-600.0);

        let result = limits.check(&state);
        assert_eq!(result, Err(CircuitBreakerTrip::DailyLoss { loss: 600.0 }));
    }

    #[test]
    fn test_circuit_breaker_weekly_loss() {
        let limits = RiskLimits {
            max_daily_loss: 10_000.0,
            ..Default::default()
        };
        let mut state = AccountState::new(10000.0, Utc::now());
        state.weekly_pnl = -1600.0;

        assert_eq!(
            limits.check(&state),
            Err(CircuitBreakerTrip::WeeklyLoss { loss: 1600.0 })
        );
    }

    #[test]
    fn test_circuit_breaker_drawdown() {
        let limits = RiskLimits::default();
        let mut state = AccountState::new(10000.0, Utc::now());

        // Peak was 12000, now 9000 = 25% drawdown
        state.update_equity(12000.0);
        state.update_equity(9000.0);

        let result = limits.check(&state);
        assert_eq!(result, Err(CircuitBreakerTrip::MaxDrawdown { drawdown: 0.25 }));
    }

    #[test]
    fn test_circuit_breaker_ok() {
        let limits = RiskLimits::default();
        let state = AccountState::new(10000.0, Utc::now());

        let result = limits.check(&state);
        assert!(result.is_ok());
    }

    #[test]
    fn test_peak_equity_monotonic() {
        let mut state = AccountState::new(10000.0, Utc::now());
        state.update_equity(10500.0);
        state.update_equity(10200.0);
        assert_eq!(state.peak_equity, 10500.0);
        assert!((state.drawdown() - 300.0 / 10500.0).abs() < 1e-12);
    }

    #[test]
    fn test_halt_and_resume_resets_peak() {
        let mut state = AccountState::new(10000.0, Utc::now());
        state.update_equity(8800.0);

        assert!(state.halt("drawdown"));
        assert!(!state.halt("again"));
        assert!(state.is_halted());

        assert!(state.resume());
        assert_eq!(state.status, TradingStatus::Active);
        assert_eq!(state.peak_equity, 8800.0);
        assert_eq!(state.drawdown(), 0.0);
        assert!(!state.resume());
    }

    #[test]
    fn test_week_start_is_monday() {
        // 2024-06-06 was a Thursday
        let thursday = NaiveDate::from_ymd_opt(2024, 6, 6).unwrap();
        assert_eq!(week_start(thursday), NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert_eq!(week_start(monday), monday);
    }

    #[test]
    fn test_roll_daily_keeps_weekly() {
        let mut state = AccountState::new(10000.0, at(2024, 6, 4, 10));
        state.record_realized(-200.0);

        assert!(!state.roll_periods(at(2024, 6, 4, 23)));
        assert_eq!(state.daily_pnl, -200.0);

        assert!(state.roll_periods(at(2024, 6, 5, 0)));
        assert_eq!(state.daily_pnl, 0.0);
        assert_eq!(state.weekly_pnl, -200.0);
    }

    #[test]
    fn test_roll_weekly_on_monday() {
        let mut state = AccountState::new(10000.0, at(2024, 6, 7, 12));
        state.record_realized(-300.0);

        assert!(state.roll_periods(at(2024, 6, 10, 1)));
        assert_eq!(state.weekly_pnl, 0.0);
        assert_eq!(state.week_start, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
    }

    #[test]
    fn test_period_boundary_clears_halt() {
        let mut state = AccountState::new(10000.0, at(2024, 6, 4, 10));
        state.update_equity(8800.0);
        state.halt("drawdown");

        state.roll_periods(at(2024, 6, 4, 18));
        assert!(state.is_halted());

        state.roll_periods(at(2024, 6, 5, 0));
        assert!(!state.is_halted());
        assert_eq!(state.peak_equity, 8800.0);
    }
}
