/// Per-instrument technical screening: fetch bars, compute indicators,
/// apply a declarative gate set. Evaluates the universe in parallel chunks,
/// sequentially within a chunk, so one heavy screening run has bounded
/// peak memory and a single fundamentals lookup per gated instrument.
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::indicators::{avg_volume, band_position, bollinger, ma_aligned, rsi, sma};
use super::{BbPositionGate, BollingerGate, MaGate, MarketCapGate, PriceChangeGate, RatioGate, VolumeGate};
use crate::broker::BrokerClient;
use crate::error::Result;
use crate::market::capability_for;
use crate::store::{InstrumentMasterCache, PriceStore};
use crate::types::{BandPosition, Instrument, Market};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ScreeningCondition {
    #[serde(default)]
    pub ma60: MaGate,
    #[serde(default)]
    pub ma112: MaGate,
    #[serde(default)]
    pub ma224: MaGate,
    #[serde(default)]
    pub bb: BollingerGate,
    #[serde(default)]
    pub volume: VolumeGate,
    #[serde(default)]
    pub price_change: PriceChangeGate,
    #[serde(default)]
    pub market_cap: MarketCapGate,
    #[serde(default)]
    pub per: RatioGate,
    #[serde(default)]
    pub pbr: RatioGate,
    #[serde(default)]
    pub exclude_etf: bool,
    #[serde(default)]
    pub exclude_etn: bool,
    #[serde(default)]
    pub exclude_management: bool,
    #[serde(default)]
    pub ma_alignment: bool,
    #[serde(default)]
    pub target_codes: Vec<String>,
}

impl ScreeningCondition {
    fn needs_fundamentals(&self) -> bool {
        self.market_cap.enabled || self.per.enabled || self.pbr.enabled
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenedInstrument {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub price: f64,
    pub change_pct: f64,
    pub ma5: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub ma112: Option<f64>,
    pub ma224: Option<f64>,
    pub rsi14: Option<f64>,
    pub bb_position: Option<BandPosition>,
    pub volume_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreeningResult {
    pub matches: Vec<ScreenedInstrument>,
    pub total_scanned: usize,
    pub matched_count: usize,
    pub execution_ms: i64,
    pub captured_at: chrono::DateTime<Utc>,
    pub universe_label: String,
}

pub struct ScreeningEngine {
    store: Arc<PriceStore>,
    master: Arc<InstrumentMasterCache>,
    broker: Option<Arc<BrokerClient>>,
    chunk_size: usize,
    lookback: usize,
}

impl ScreeningEngine {
    /// `broker` may be absent when no credentials have been validated yet;
    /// screening still works as long as no condition needs fundamentals.
    pub fn new(
        store: Arc<PriceStore>,
        master: Arc<InstrumentMasterCache>,
        broker: Option<Arc<BrokerClient>>,
        chunk_size: usize,
        lookback: usize,
    ) -> Self {
        ScreeningEngine {
            store,
            master,
            broker,
            chunk_size,
            lookback,
        }
    }

    pub async fn screen(&self, condition: &ScreeningCondition, universe_label: &str) -> Result<ScreeningResult> {
        let started = std::time::Instant::now();

        let universe: Vec<Instrument> = if condition.target_codes.is_empty() {
            self.master.all_active()?
        } else {
            let active = self.master.all_active()?;
            active
                .into_iter()
                .filter(|i| condition.target_codes.contains(&i.code))
                .collect()
        };

        let total_scanned = universe.len();

        let chunks: Vec<Vec<Instrument>> = universe
            .chunks(self.chunk_size.max(1))
            .map(|c| c.to_vec())
            .collect();

        let chunk_results = join_all(
            chunks
                .into_iter()
                .map(|chunk| self.evaluate_chunk(chunk, condition)),
        )
        .await;

        let matches: Vec<ScreenedInstrument> = chunk_results.into_iter().flatten().collect();

        Ok(ScreeningResult {
            matched_count: matches.len(),
            matches,
            total_scanned,
            execution_ms: started.elapsed().as_millis() as i64,
            captured_at: Utc::now(),
            universe_label: universe_label.to_string(),
        })
    }

    async fn evaluate_chunk(
        &self,
        chunk: Vec<Instrument>,
        condition: &ScreeningCondition,
    ) -> Vec<ScreenedInstrument> {
        let mut out = Vec::new();
        for inst in chunk {
            match self.evaluate_one(&inst, condition).await {
                Ok(Some(result)) => out.push(result),
                Ok(None) => {}
                Err(e) => {
                    warn!(code = %inst.code, error = %e, "screening failed for instrument, skipping");
                }
            }
        }
        out
    }

    async fn evaluate_one(
        &self,
        inst: &Instrument,
        condition: &ScreeningCondition,
    ) -> Result<Option<ScreenedInstrument>> {
        let bars = self.store.bars(&inst.code, self.lookback)?;
        if bars.is_empty() {
            return Ok(None);
        }

        let name = self.master.name_of(&inst.code)?.unwrap_or_else(|| inst.name.clone());
        let capability = capability_for(inst.market);

        if condition.exclude_etf && (name.contains("ETF") || capability.is_heuristic_etf(&inst.code)) {
            return Ok(None);
        }
        if condition.exclude_etn && name.contains("ETN") {
            return Ok(None);
        }
        if condition.exclude_management && (name.contains("관리") || name.contains("(관리)")) {
            return Ok(None);
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
        let current_price = closes[0];
        let prev_price = closes.get(1).copied().unwrap_or(current_price);
        let current_volume = volumes[0];

        let ma5 = sma(5, &closes);
        let ma20 = sma(20, &closes);
        let ma60 = sma(60, &closes);
        let ma112 = sma(112, &closes);
        let ma224 = sma(224, &closes);

        if !Self::check_ma_gate(&condition.ma60, ma60, current_price) {
            return Ok(None);
        }
        if !Self::check_ma_gate(&condition.ma112, ma112, current_price) {
            return Ok(None);
        }
        if !Self::check_ma_gate(&condition.ma224, ma224, current_price) {
            return Ok(None);
        }

        if condition.ma_alignment && !ma_aligned(ma5, ma20, ma60, ma112) {
            return Ok(None);
        }

        let mut bb_position = None;
        if condition.bb.enabled {
            let Some(bands) = bollinger(condition.bb.period, condition.bb.multiplier, &closes) else {
                return Ok(None);
            };
            let position = band_position(current_price, &bands);
            bb_position = Some(position);

            let position_ok = match condition.bb.position {
                BbPositionGate::All => true,
                BbPositionGate::Upper => position == BandPosition::Upper,
                BbPositionGate::Middle => position == BandPosition::Middle,
                BbPositionGate::Lower => position == BandPosition::Lower,
            };
            if !position_ok {
                return Ok(None);
            }
            if condition.bb.upper_break && current_price < bands.upper {
                return Ok(None);
            }
            if condition.bb.lower_break && current_price > bands.lower {
                return Ok(None);
            }
        }

        let mut volume_ratio = None;
        if condition.volume.enabled {
            let Some(avg) = avg_volume(20, &volumes) else {
                return Ok(None);
            };
            if avg == 0.0 {
                return Ok(None);
            }
            let ratio = current_volume as f64 / avg;
            volume_ratio = Some(ratio);
            if ratio < condition.volume.multiple {
                return Ok(None);
            }
        }

        let change_pct = if prev_price != 0.0 {
            100.0 * (current_price - prev_price) / prev_price
        } else {
            0.0
        };
        if condition.price_change.enabled
            && !(condition.price_change.min..=condition.price_change.max).contains(&change_pct)
        {
            return Ok(None);
        }

        if condition.needs_fundamentals() {
            let Some(broker) = self.broker.as_ref() else {
                warn!(code = %inst.code, "fundamentals gate enabled but no broker session is active, excluding");
                return Ok(None);
            };
            match capability.quote_fetch(broker, &inst.code).await {
                Ok(quote) => {
                    if condition.market_cap.enabled {
                        match quote.market_cap {
                            Some(cap)
                                if cap >= condition.market_cap.min && cap <= condition.market_cap.max => {}
                            Some(_) => return Ok(None),
                            None => return Ok(None),
                        }
                    }
                    if !Self::check_ratio(&condition.per, quote.per) {
                        return Ok(None);
                    }
                    if !Self::check_ratio(&condition.pbr, quote.pbr) {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    warn!(code = %inst.code, error = %e, "fundamentals lookup failed, excluding conservatively");
                    return Ok(None);
                }
            }
        }

        let rounding = capability.rounding();
        let rsi14 = rsi(14, &closes);

        Ok(Some(ScreenedInstrument {
            code: inst.code.clone(),
            name,
            market: inst.market,
            price: rounding.round_price(current_price),
            change_pct: (change_pct * 100.0).round() / 100.0,
            ma5: ma5.map(|v| rounding.round_price(v)),
            ma20: ma20.map(|v| rounding.round_price(v)),
            ma60: ma60.map(|v| rounding.round_price(v)),
            ma112: ma112.map(|v| rounding.round_price(v)),
            ma224: ma224.map(|v| rounding.round_price(v)),
            rsi14: rsi14.map(|v| (v * 100.0).round() / 100.0),
            bb_position,
            volume_ratio: volume_ratio.map(|v| (v * 100.0).round() / 100.0),
        }))
    }

    fn check_ma_gate(gate: &MaGate, ma: Option<f64>, current_price: f64) -> bool {
        if !gate.enabled {
            return true;
        }
        let Some(ma) = ma else { return false };
        if ma == 0.0 {
            return false;
        }
        let ratio = 100.0 * current_price / ma;
        ratio >= gate.min as f64 && ratio <= gate.max as f64
    }

    fn check_ratio(gate: &RatioGate, value: Option<f64>) -> bool {
        if !gate.enabled {
            return true;
        }
        match value {
            Some(v) => v >= gate.min && v <= gate.max,
            None => false,
        }
    }
}
