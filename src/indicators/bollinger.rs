use rust_decimal::Decimal;

use super::{sma, stddev};

/// Bollinger bands of the trailing `period` values.
///
/// Returns (middle, upper, lower) or None while the window is short.
pub fn bollinger(values: &[Decimal], period: usize, k: Decimal) -> Option<(Decimal, Decimal, Decimal)> {
    let middle = sma(values, period)?;
    let dev = stddev(values, period)? * k;
    Some((middle, middle + dev, middle - dev))
}

/// Band width as a fraction of the middle band (expansion measure).
pub fn bollinger_width(values: &[Decimal], period: usize, k: Decimal) -> Option<Decimal> {
    let (middle, upper, lower) = bollinger(values, period, k)?;
    if middle.is_zero() {
        return None;
    }
    Some((upper - lower) / middle)
}

/// %B: where the last value sits within the bands (0 = lower, 1 = upper).
pub fn percent_b(values: &[Decimal], period: usize, k: Decimal) -> Option<Decimal> {
    let (_, upper, lower) = bollinger(values, period, k)?;
    let range = upper - lower;
    if range.is_zero() {
        return None;
    }
    let last = *values.last()?;
    Some((last - lower) / range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_flat_series_collapses_bands() {
        let values = vec![dec!(10); 20];
        let (middle, upper, lower) = bollinger(&values, 20, dec!(2)).unwrap();
        assert_eq!(middle, dec!(10));
        assert_eq!(upper, dec!(10));
        assert_eq!(lower, dec!(10));
        assert!(percent_b(&values, 20, dec!(2)).is_none());
    }

    #[test]
    fn test_bands_bracket_mean() {
        let values: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        let (middle, upper, lower) = bollinger(&values, 20, dec!(2)).unwrap();
        assert!(lower < middle && middle < upper);
    }

    #[test]
    fn test_width_grows_with_volatility() {
        let calm: Vec<Decimal> = (0..20).map(|i| dec!(100) + Decimal::from(i % 2)).collect();
        let wild: Vec<Decimal> = (0..20).map(|i| dec!(100) + Decimal::from((i % 2) * 10)).collect();
        let w_calm = bollinger_width(&calm, 20, dec!(2)).unwrap();
        let w_wild = bollinger_width(&wild, 20, dec!(2)).unwrap();
        assert!(w_wild > w_calm);
    }
}
