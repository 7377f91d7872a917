//! Equity-curve metrics used for leaderboard ranking.

use rust_decimal::prelude::ToPrimitive;

use super::EquityPoint;

fn equities(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .iter()
        .filter_map(|p| p.equity.to_f64())
        .collect()
}

/// Largest peak-to-trough decline as a fraction (0.20 = 20 %).
pub fn max_drawdown(curve: &[EquityPoint]) -> f64 {
    let values = equities(curve);
    if values.len() < 2 {
        return 0.0;
    }

    let mut peak = values[0];
    let mut worst = 0.0_f64;
    for v in values {
        if v > peak {
            peak = v;
        } else if peak > 0.0 {
            worst = worst.max((peak - v) / peak);
        }
    }
    worst
}

fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Annualised mean return over downside deviation. `None` with fewer than 5
/// points or when no period lost money.
pub fn sortino_ratio(curve: &[EquityPoint], periods_per_year: f64) -> Option<f64> {
    let values = equities(curve);
    if values.len() < 5 {
        return None;
    }

    let returns = period_returns(&values);
    if returns.is_empty() {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let downside = (returns.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / n).sqrt();
    if downside == 0.0 {
        return None;
    }
    Some(mean / downside * periods_per_year.sqrt())
}

/// Total return over max drawdown. `None` with fewer than 2 points or when the
/// curve never drew down.
pub fn calmar_ratio(curve: &[EquityPoint]) -> Option<f64> {
    let values = equities(curve);
    if values.len() < 2 || values[0] <= 0.0 {
        return None;
    }

    let drawdown = max_drawdown(curve);
    if drawdown == 0.0 {
        return None;
    }
    let total_return = values[values.len() - 1] / values[0] - 1.0;
    Some(total_return / drawdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn curve(values: &[i64]) -> Vec<EquityPoint> {
        values
            .iter()
            .map(|v| EquityPoint {
                timestamp: Utc::now(),
                equity: Decimal::from(*v),
            })
            .collect()
    }

    #[test]
    fn test_drawdown_needs_two_points() {
        assert_eq!(max_drawdown(&curve(&[100_000])), 0.0);
    }

    #[test]
    fn test_drawdown_zero_when_rising() {
        assert_eq!(max_drawdown(&curve(&[100_000, 105_000, 110_000])), 0.0);
    }

    #[test]
    fn test_drawdown_picks_worst_trough() {
        let dd = max_drawdown(&curve(&[100_000, 110_000, 99_000, 115_000, 92_000]));
        assert!((dd - 0.20).abs() < 1e-9);
    }

    #[test]
    fn test_sortino_none_below_five_points() {
        assert!(sortino_ratio(&curve(&[100_000, 101_000, 102_000, 101_000]), 252.0).is_none());
    }

    #[test]
    fn test_sortino_none_without_downside() {
        let c = curve(&[100_000, 101_000, 102_000, 103_000, 104_000, 105_000]);
        assert!(sortino_ratio(&c, 252.0).is_none());
    }

    #[test]
    fn test_sortino_sign_follows_trend() {
        let up = curve(&[100_000, 102_000, 101_000, 103_000, 102_500, 104_000, 103_000, 105_000]);
        let down = curve(&[100_000, 98_000, 96_000, 95_000, 93_000, 92_000]);
        assert!(sortino_ratio(&up, 252.0).unwrap() > 0.0);
        assert!(sortino_ratio(&down, 252.0).unwrap() < 0.0);
    }

    #[test]
    fn test_calmar_value() {
        let ratio = calmar_ratio(&curve(&[100_000, 95_000, 110_000])).unwrap();
        assert!((ratio - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_calmar_none_without_drawdown() {
        assert!(calmar_ratio(&curve(&[100_000, 102_000, 104_000])).is_none());
        assert!(calmar_ratio(&curve(&[100_000])).is_none());
    }

    #[test]
    fn test_calmar_negative_on_loss() {
        assert!(calmar_ratio(&curve(&[100_000, 90_000, 85_000])).unwrap() < 0.0);
    }
}
