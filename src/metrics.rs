use crate::execution::position_manager::{Position, PositionStatus};
use serde::{Deserialize, Serialize};

/// Trading performance over closed positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    // Trade Statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L Distribution
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64, // Total wins / Total losses
}

impl PerformanceSummary {
    /// Summarize CLOSED positions; everything else is ignored
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let pnls: Vec<f64> = positions
            .into_iter()
            .filter(|p| p.status == PositionStatus::Closed)
            .filter_map(|p| p.realized_pnl)
            .collect();

        let total_trades = pnls.len();
        if total_trades == 0 {
            return Self::default();
        }

        let wins: Vec<f64> = pnls.iter().copied().filter(|pnl| *pnl > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|pnl| *pnl <= 0.0).collect();

        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().map(|l| l.abs()).sum();

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            total_wins / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            total_losses / losses.len() as f64
        };

        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Self {
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: (wins.len() as f64 / total_trades as f64) * 100.0,
            total_pnl: pnls.iter().sum(),
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            profit_factor,
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n=== PERFORMANCE SUMMARY ===");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losing_trades);
        println!("  Total P&L:             ${:.2}", self.total_pnl);

        if self.total_trades > 0 {
            println!("  Average Win:           ${:.2}", self.avg_win);
            println!("  Average Loss:          ${:.2}", self.avg_loss);
            println!("  Largest Win:           ${:.2}", self.largest_win);
            println!("  Largest Loss:          ${:.2}", self.largest_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);
        }
        println!();
    }
}
