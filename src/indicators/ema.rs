use rust_decimal::Decimal;

/// Incremental exponential moving average, seeded with the SMA of the
/// first `period` inputs.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: Decimal,
    value: Option<Decimal>,
    count: usize,
    sum: Decimal,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let multiplier = Decimal::from(2) / Decimal::from(period as u32 + 1);
        Self {
            period,
            multiplier,
            value: None,
            count: 0,
            sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        self.count += 1;

        if self.count < self.period {
            self.sum += price;
            return None;
        } else if self.count == self.period {
            self.sum += price;
            self.value = Some(self.sum / Decimal::from(self.period as u32));
            return self.value;
        }

        if let Some(prev) = self.value {
            self.value = Some((price - prev) * self.multiplier + prev);
        }
        self.value
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    pub fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    pub fn reset(&mut self) {
        self.value = None;
        self.count = 0;
        self.sum = Decimal::ZERO;
    }
}

/// EMA of the full series, returning the final value.
pub fn ema_last(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let mut ema = Ema::new(period);
    let mut last = None;
    for v in values {
        last = ema.update(*v);
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ema_seeds_with_sma() {
        let values = vec![dec!(1), dec!(2), dec!(3)];
        assert_eq!(ema_last(&values, 3), Some(dec!(2)));
    }

    #[test]
    fn test_ema_follows_price() {
        let mut rising = Vec::new();
        for i in 1..=30 {
            rising.push(Decimal::from(i));
        }
        let ema10 = ema_last(&rising, 10).unwrap();
        let ema20 = ema_last(&rising, 20).unwrap();
        // shorter window stays closer to the latest price
        assert!(ema10 > ema20);
    }

    #[test]
    fn test_ema_needs_full_period() {
        let values = vec![dec!(1), dec!(2)];
        assert_eq!(ema_last(&values, 3), None);
    }
}
