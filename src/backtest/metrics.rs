use serde::Serialize;

use super::EquityPoint;
use crate::ledger::TradeRecord;

/// Summary statistics of a backtest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of trades with positive PnL
    pub win_rate: f64,
    pub total_pnl: f64,
    /// Annualized, from per-trade PnL
    pub sharpe: f64,
    /// Largest peak-to-trough equity decline as a fraction of the peak
    pub max_drawdown: f64,
}

impl Metrics {
    pub fn compute(trades: &[TradeRecord], equity: &[EquityPoint]) -> Self {
        let pnls: Vec<f64> = trades.iter().filter_map(|t| t.pnl).collect();
        let total = pnls.len();
        let wins = pnls.iter().filter(|p| **p > 0.0).count();
        let total_pnl: f64 = pnls.iter().sum();

        let win_rate = if total > 0 {
            wins as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            trades: total,
            wins,
            losses: total - wins,
            win_rate,
            total_pnl,
            sharpe: sharpe(&pnls),
            max_drawdown: max_drawdown(equity),
        }
    }
}

fn sharpe(pnls: &[f64]) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let n = pnls.len() as f64;
    let mean = pnls.iter().sum::<f64>() / n;
    let variance = pnls.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        (mean / std_dev) * 252.0_f64.sqrt()
    } else {
        0.0
    }
}

fn max_drawdown(equity: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for point in equity {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            worst = worst.max((peak - point.equity) / peak);
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{NewTrade, TradeRecord};
    use crate::types::Side;
    use chrono::Utc;

    fn closed(id: u64, entry: f64, exit: f64) -> TradeRecord {
        let mut record = TradeRecord::open(
            id,
            NewTrade {
                strategy_id: None,
                symbol: "X".into(),
                side: Side::Long,
                qty: 1,
                entry_price: entry,
                opened_at: Utc::now(),
            },
        )
        .unwrap();
        record.finalize(exit, Utc::now()).unwrap();
        record
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .map(|&equity| EquityPoint {
                timestamp: Utc::now(),
                equity,
            })
            .collect()
    }

    #[test]
    fn counts_wins_and_losses() {
        let trades = vec![closed(1, 100.0, 110.0), closed(2, 100.0, 95.0), closed(3, 50.0, 60.0)];
        let m = Metrics::compute(&trades, &[]);
        assert_eq!(m.trades, 3);
        assert_eq!(m.wins, 2);
        assert_eq!(m.losses, 1);
        assert!((m.win_rate - 66.666_666).abs() < 1e-3);
        assert_eq!(m.total_pnl, 15.0);
        assert!(m.sharpe > 0.0);
    }

    #[test]
    fn drawdown_is_relative_to_peak() {
        let m = Metrics::compute(&[], &curve(&[100.0, 120.0, 90.0, 130.0, 117.0]));
        assert!((m.max_drawdown - 0.25).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs_are_zero() {
        assert_eq!(Metrics::compute(&[], &[]), Metrics::default());
    }
}
