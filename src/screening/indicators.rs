/// Pure technical indicators over most-recent-first price/volume series.
/// Every function returns `None` ("absent") when the input is shorter than
/// the period it needs; adapted from a Bar-oriented indicator set, recast
/// to operate directly on newest-first slices the way the price store hands
/// them back.
use crate::types::{BandPosition, DailyBar};

pub fn sma(period: usize, prices: &[f64]) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }
    Some(prices[..period].iter().sum::<f64>() / period as f64)
}

/// Seeds with the arithmetic mean of the oldest `period` entries in a
/// `2*period`-entry window, then walks forward toward the present applying
/// the conventional `2/(period+1)` smoothing factor to each newer entry.
pub fn ema(period: usize, prices: &[f64]) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }
    let window_len = (2 * period).min(prices.len());
    let chronological: Vec<f64> = prices[..window_len].iter().rev().copied().collect();

    let seed_len = period.min(chronological.len());
    let mut value = chronological[..seed_len].iter().sum::<f64>() / seed_len as f64;
    let multiplier = 2.0 / (period as f64 + 1.0);

    for price in &chronological[seed_len..] {
        value = (price - value) * multiplier + value;
    }
    Some(value)
}

pub struct BollingerBands {
    pub mid: f64,
    pub upper: f64,
    pub lower: f64,
}

pub fn bollinger(period: usize, k: f64, prices: &[f64]) -> Option<BollingerBands> {
    let mid = sma(period, prices)?;
    let window = &prices[..period];
    let variance = window.iter().map(|p| (p - mid).powi(2)).sum::<f64>() / period as f64;
    let stddev = variance.sqrt();
    Some(BollingerBands {
        mid,
        upper: mid + k * stddev,
        lower: mid - k * stddev,
    })
}

pub fn band_position(price: f64, bands: &BollingerBands) -> BandPosition {
    if price >= bands.upper {
        BandPosition::Upper
    } else if price <= bands.lower {
        BandPosition::Lower
    } else {
        BandPosition::Middle
    }
}

/// Classical Wilder RSI. Returns 100 when there were no losses in the window.
pub fn rsi(period: usize, prices: &[f64]) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 0..period {
        let change = prices[i] - prices[i + 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses += -change;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

pub struct Macd {
    pub macd: f64,
    pub signal: f64,
}

/// The signal line is `0.9 * macd`, an explicit approximation of the
/// canonical 9-period EMA of MACD, kept for bit-compatibility with the
/// source this kernel was distilled from.
pub fn macd(fast: usize, slow: usize, prices: &[f64]) -> Option<Macd> {
    let fast_ema = ema(fast, prices)?;
    let slow_ema = ema(slow, prices)?;
    let macd_value = fast_ema - slow_ema;
    Some(Macd {
        macd: macd_value,
        signal: macd_value * 0.9,
    })
}

pub fn avg_volume(period: usize, volumes: &[u64]) -> Option<f64> {
    if volumes.len() < period || period == 0 {
        return None;
    }
    Some(volumes[..period].iter().sum::<u64>() as f64 / period as f64)
}

pub fn ma_aligned(ma5: Option<f64>, ma20: Option<f64>, ma60: Option<f64>, ma112: Option<f64>) -> bool {
    match (ma5, ma20, ma60, ma112) {
        (Some(a), Some(b), Some(c), Some(d)) => a > b && b > c && c > d,
        _ => false,
    }
}

pub struct Ichimoku {
    pub tenkan: f64,
    pub kijun: f64,
    pub span_a: f64,
    pub span_b: f64,
    pub chikou: f64,
}

pub fn ichimoku(tenkan_p: usize, kijun_p: usize, senkou_p: usize, bars: &[DailyBar]) -> Option<Ichimoku> {
    if bars.len() < senkou_p {
        return None;
    }
    let hi_lo = |n: usize| -> (f64, f64) {
        let window = &bars[..n];
        let hi = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lo = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        (hi, lo)
    };
    let (hi9, lo9) = hi_lo(tenkan_p);
    let (hi26, lo26) = hi_lo(kijun_p);
    let (hi52, lo52) = hi_lo(senkou_p);

    let tenkan = (hi9 + lo9) / 2.0;
    let kijun = (hi26 + lo26) / 2.0;

    Some(Ichimoku {
        tenkan,
        kijun,
        span_a: (tenkan + kijun) / 2.0,
        span_b: (hi52 + lo52) / 2.0,
        chikou: bars[0].close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_matches_known_average() {
        let prices = [110.0, 108.0, 106.0, 104.0, 102.0];
        assert_eq!(sma(5, &prices), Some(106.0));
        assert_eq!(sma(6, &prices), None);
    }

    #[test]
    fn ema_walks_forward_past_the_seed_average() {
        let prices = [12.0, 10.0, 8.0, 20.0, 18.0, 16.0];
        assert_eq!(ema(3, &prices), Some(11.75));
        assert_ne!(ema(3, &prices), sma(3, &prices));
    }

    #[test]
    fn rsi_saturates_at_100_with_no_losses() {
        let prices: Vec<f64> = (0..16).map(|i| 100.0 + i as f64).rev().collect();
        assert_eq!(rsi(14, &prices), Some(100.0));
    }

    #[test]
    fn band_position_classifies_correctly() {
        let bands = BollingerBands {
            mid: 100.0,
            upper: 110.0,
            lower: 90.0,
        };
        assert_eq!(band_position(111.0, &bands), BandPosition::Upper);
        assert_eq!(band_position(89.0, &bands), BandPosition::Lower);
        assert_eq!(band_position(100.0, &bands), BandPosition::Middle);
    }

    #[test]
    fn ma_aligned_requires_strict_descent() {
        assert!(ma_aligned(Some(120.0), Some(110.0), Some(105.0), Some(100.0)));
        assert!(!ma_aligned(Some(100.0), Some(110.0), Some(105.0), Some(100.0)));
        assert!(!ma_aligned(None, Some(110.0), Some(105.0), Some(100.0)));
    }
}
