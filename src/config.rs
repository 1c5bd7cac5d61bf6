// 7.0 config.rs: market settings in one place. assets, decimals, fees, auctions, monitoring.
// 7.1 prices and sizes stay integral; decimals only drive the scaling factors.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::auction::DefaultTradingMode;
use crate::fee::FeeFactors;
use crate::price_monitor::{PriceMonitoringSettings, PriceMonitoringTrigger};
use crate::risk::SimpleRiskModel;
use crate::types::{AssetId, AssetScaling, MarketId};

// Complete configuration for a spot market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub market_id: MarketId,
    // Asset being bought and sold
    pub base_asset: AssetId,
    // Asset prices are quoted and fees settled in
    pub quote_asset: AssetId,
    // Decimal places of order sizes
    pub position_decimal_places: i64,
    // Decimal places of order prices
    pub market_decimal_places: u32,
    pub base_asset_decimals: u32,
    pub quote_asset_decimals: u32,
    pub fee_factors: FeeFactors,
    pub price_monitoring: PriceMonitoringSettings,
    // Range provider used for price bound factors
    pub risk_model: SimpleRiskModel,
    // Zero means the market opens straight into its default mode
    pub opening_auction_duration_secs: i64,
    pub default_trading_mode: DefaultTradingMode,
    // Floor on price monitoring auction length
    pub auction_min_duration_secs: i64,
    // Length of a market value proxy window
    pub market_value_window_secs: i64,
    // How often the liquidity fee account is paid out to LPs
    pub lp_fee_distribution_period_secs: i64,
    // How often price bound factors are recomputed
    pub bound_factor_update_period_secs: i64,
    // Pending stop orders a party may hold, OCO legs counted separately
    pub max_stop_orders_per_party: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            market_id: MarketId::from("BTC/USDT"),
            base_asset: AssetId::from("BTC"),
            quote_asset: AssetId::from("USDT"),
            position_decimal_places: 0,
            market_decimal_places: 0,
            base_asset_decimals: 0,
            quote_asset_decimals: 0,
            fee_factors: FeeFactors {
                maker_fee: dec!(0.00025),
                infrastructure_fee: dec!(0.0005),
                liquidity_fee: dec!(0.001),
                buy_back_fee: Decimal::ZERO,
                treasury_fee: Decimal::ZERO,
            },
            price_monitoring: PriceMonitoringSettings::default(),
            risk_model: SimpleRiskModel::default(),
            opening_auction_duration_secs: 10,
            default_trading_mode: DefaultTradingMode::Continuous,
            auction_min_duration_secs: 1,
            market_value_window_secs: 7 * 24 * 3600,
            lp_fee_distribution_period_secs: 60,
            bound_factor_update_period_secs: 300,
            max_stop_orders_per_party: 10,
        }
    }
}

impl MarketConfig {
    // Opens in continuous trading, no opening auction
    pub fn continuous() -> Self {
        Self {
            opening_auction_duration_secs: 0,
            ..Self::default()
        }
    }

    // Every auction falls back into batches of the given length
    pub fn frequent_batch(duration_secs: i64) -> Self {
        Self {
            opening_auction_duration_secs: 0,
            default_trading_mode: DefaultTradingMode::FrequentBatchAuction { duration_secs },
            ..Self::default()
        }
    }

    // Real asset decimals with two price monitoring triggers
    pub fn production() -> Self {
        Self {
            position_decimal_places: 4,
            market_decimal_places: 2,
            base_asset_decimals: 8,
            quote_asset_decimals: 6,
            price_monitoring: PriceMonitoringSettings {
                triggers: vec![
                    PriceMonitoringTrigger::new(60, dec!(0.9999), 60),
                    PriceMonitoringTrigger::new(600, dec!(0.9999), 120),
                ],
            },
            fee_factors: FeeFactors {
                maker_fee: dec!(0.0002),
                infrastructure_fee: dec!(0.0005),
                liquidity_fee: dec!(0.001),
                buy_back_fee: dec!(0.0001),
                treasury_fee: dec!(0.0001),
            },
            opening_auction_duration_secs: 300,
            auction_min_duration_secs: 60,
            ..Self::default()
        }
    }

    pub fn with_market_id(mut self, market_id: &str) -> Self {
        self.market_id = MarketId::from(market_id);
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<PriceMonitoringTrigger>) -> Self {
        self.price_monitoring = PriceMonitoringSettings { triggers };
        self
    }

    pub fn scaling(&self) -> AssetScaling {
        AssetScaling::new(
            self.position_decimal_places,
            self.market_decimal_places,
            self.base_asset_decimals,
            self.quote_asset_decimals,
        )
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market_id.as_str().is_empty() {
            return Err(ConfigError::InvalidMarket {
                reason: "market id must not be empty".to_string(),
            });
        }
        if self.base_asset.as_str().is_empty() || self.quote_asset.as_str().is_empty() {
            return Err(ConfigError::InvalidMarket {
                reason: "asset ids must not be empty".to_string(),
            });
        }
        if self.base_asset == self.quote_asset {
            return Err(ConfigError::InvalidMarket {
                reason: "base and quote assets must differ".to_string(),
            });
        }
        if self.position_decimal_places < 0 || self.position_decimal_places > self.base_asset_decimals as i64 {
            return Err(ConfigError::InvalidMarket {
                reason: "position decimal places must be between 0 and the base asset decimals".to_string(),
            });
        }
        if self.market_decimal_places > self.quote_asset_decimals {
            return Err(ConfigError::InvalidMarket {
                reason: "market decimal places exceed the quote asset decimals".to_string(),
            });
        }

        self.fee_factors.validate().map_err(|e| ConfigError::InvalidFees { reason: e.to_string() })?;

        for trigger in &self.price_monitoring.triggers {
            if trigger.horizon_secs <= 0 {
                return Err(ConfigError::InvalidPriceMonitoring {
                    reason: "trigger horizon must be positive".to_string(),
                });
            }
            if trigger.probability <= Decimal::ZERO || trigger.probability >= Decimal::ONE {
                return Err(ConfigError::InvalidPriceMonitoring {
                    reason: "trigger probability must be between 0 and 1".to_string(),
                });
            }
            if trigger.auction_extension_secs <= 0 {
                return Err(ConfigError::InvalidPriceMonitoring {
                    reason: "trigger auction extension must be positive".to_string(),
                });
            }
        }

        if self.opening_auction_duration_secs < 0 || self.auction_min_duration_secs < 0 {
            return Err(ConfigError::InvalidAuction {
                reason: "auction durations must not be negative".to_string(),
            });
        }
        if let DefaultTradingMode::FrequentBatchAuction { duration_secs } = self.default_trading_mode {
            if duration_secs <= 0 {
                return Err(ConfigError::InvalidAuction {
                    reason: "batch duration must be positive".to_string(),
                });
            }
        }
        if self.market_value_window_secs <= 0 || self.lp_fee_distribution_period_secs <= 0 || self.bound_factor_update_period_secs <= 0 {
            return Err(ConfigError::InvalidMarket {
                reason: "periods must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid market: {reason}")]
    InvalidMarket { reason: String },
    #[error("invalid fees: {reason}")]
    InvalidFees { reason: String },
    #[error("invalid price monitoring: {reason}")]
    InvalidPriceMonitoring { reason: String },
    #[error("invalid auction: {reason}")]
    InvalidAuction { reason: String },
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> MarketConfig {
        match self {
            Environment::Development => MarketConfig::continuous(),
            Environment::Testnet => MarketConfig::default(),
            Environment::Mainnet => MarketConfig::production(),
        }
    }
}
