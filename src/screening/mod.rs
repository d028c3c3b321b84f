pub mod engine;
pub mod indicators;

pub use engine::{ScreenedInstrument, ScreeningCondition, ScreeningEngine, ScreeningResult};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MaGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BbPositionGate {
    All,
    Upper,
    Middle,
    Lower,
}

impl Default for BbPositionGate {
    fn default() -> Self {
        BbPositionGate::All
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BollingerGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bb_period")]
    pub period: usize,
    #[serde(default = "default_bb_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub position: BbPositionGate,
    #[serde(default)]
    pub upper_break: bool,
    #[serde(default)]
    pub lower_break: bool,
}

fn default_bb_period() -> usize {
    20
}

fn default_bb_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VolumeGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub multiple: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PriceChangeGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MarketCapGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RatioGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}
