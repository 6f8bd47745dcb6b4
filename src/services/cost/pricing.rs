//! Tier Pricing
//!
//! Per-tier token prices in microdollars per million tokens
//! (1 USD = 1,000,000 microdollars). All spend arithmetic is integral.

use serde::{Deserialize, Serialize};

use cascade_core::{ModelTier, TokenUsage};

/// Microdollars in one US dollar.
pub const MICROS_PER_USD: u64 = 1_000_000;

/// Price of one model tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPrice {
    /// Microdollars per million input tokens
    pub input_per_million: u64,
    /// Microdollars per million output tokens
    pub output_per_million: u64,
}

impl TierPrice {
    pub const fn new(input_per_million: u64, output_per_million: u64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Cost in microdollars, rounded up so that non-zero usage is never free.
    pub fn cost(&self, usage: TokenUsage) -> u64 {
        let raw = usage.input_tokens as u128 * self.input_per_million as u128
            + usage.output_tokens as u128 * self.output_per_million as u128;
        let micros = raw.div_ceil(1_000_000);
        u64::try_from(micros).unwrap_or(u64::MAX)
    }
}

/// Prices for the three tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPriceTable {
    #[serde(default = "default_cheap")]
    pub cheap: TierPrice,
    #[serde(default = "default_standard")]
    pub standard: TierPrice,
    #[serde(default = "default_premium")]
    pub premium: TierPrice,
}

// Small / mid / frontier model list prices
fn default_cheap() -> TierPrice {
    TierPrice::new(150_000, 600_000)
}

fn default_standard() -> TierPrice {
    TierPrice::new(3_000_000, 15_000_000)
}

fn default_premium() -> TierPrice {
    TierPrice::new(15_000_000, 75_000_000)
}

impl Default for TierPriceTable {
    fn default() -> Self {
        Self {
            cheap: default_cheap(),
            standard: default_standard(),
            premium: default_premium(),
        }
    }
}

impl TierPriceTable {
    pub fn price(&self, tier: ModelTier) -> TierPrice {
        match tier {
            ModelTier::Cheap => self.cheap,
            ModelTier::Standard => self.standard,
            ModelTier::Premium => self.premium,
        }
    }

    /// Cost of `usage` on `tier`, in microdollars.
    pub fn cost(&self, tier: ModelTier, usage: TokenUsage) -> u64 {
        self.price(tier).cost(usage)
    }

    /// Prices must not decrease with the tier.
    pub fn validate(&self) -> Result<(), String> {
        let ordered = self.cheap.input_per_million <= self.standard.input_per_million
            && self.standard.input_per_million <= self.premium.input_per_million
            && self.cheap.output_per_million <= self.standard.output_per_million
            && self.standard.output_per_million <= self.premium.output_per_million;
        if !ordered {
            return Err("tier prices must be non-decreasing from cheap to premium".to_string());
        }
        Ok(())
    }
}

/// Rough token estimate for a prompt (about four characters per token).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4).max(1)
}

/// Convert microdollars to USD.
pub fn micros_to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD as f64
}

/// Convert USD to microdollars, clamping negatives to zero.
pub fn usd_to_micros(usd: f64) -> u64 {
    if usd <= 0.0 || !usd.is_finite() {
        return 0;
    }
    (usd * MICROS_PER_USD as f64).round() as u64
}

/// Format microdollars for logs.
pub fn format_usd(micros: u64) -> String {
    let dollars = micros_to_usd(micros);
    if dollars < 0.01 {
        format!("${:.6}", dollars)
    } else {
        format!("${:.4}", dollars)
    }
}
