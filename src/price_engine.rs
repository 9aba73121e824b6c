//! Synthetic price engine: GBM price stepping, quote/trade generation.
//!
//! Ported from `GBMPriceGenerator`/`TradeGenerator` in the Python market
//! simulator. Uses a seeded `ChaCha8Rng` rather than `rand`'s thread-local
//! generator so a fixed seed reproduces an identical event stream byte for
//! byte — required for deterministic replay in tests and backfills.

use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use uuid::Uuid;

use crate::decimal::round_to_tick;
use crate::models::{Quote, Side, SymbolConfig, Trade};

const TIME_STEP: f64 = 1.0 / (252.0 * 6.5 * 60.0 * 60.0);
const DRIFT: f64 = 0.0001;
const VOLATILITY_REVERSION_SPEED: f64 = 0.1;
const BID_LEVELS: usize = 5;
const ASK_LEVELS: usize = 5;
const LEVEL_DEPTH: i64 = 1000;

const TRADE_SIZE_ALPHA: f64 = 1.5;
const TRADE_SIZE_MIN: f64 = 1.0;
const TRADE_SIZE_MAX: f64 = 10_000.0;

/// Mutable per-symbol simulation state, mirroring Python's `PriceState`.
#[derive(Debug, Clone)]
pub struct PriceState {
    pub symbol: String,
    pub price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub spread: f64,
    pub bid_sizes: Vec<i64>,
    pub ask_sizes: Vec<i64>,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub trade_count: i64,
}

/// One symbol's GBM generator plus mean-reverting volatility and buy
/// pressure, combining `GBMPriceGenerator` and the per-symbol half of
/// `TradeGenerator` into a single unit.
pub struct SymbolEngine {
    config: SymbolConfig,
    state: PriceState,
    current_volatility: f64,
    volatility_mean: f64,
    buy_pressure: f64,
}

impl SymbolEngine {
    pub fn new(config: SymbolConfig, rng: &mut ChaCha8Rng) -> Self {
        let tick = config.tick_size;
        let price = config.initial_price;
        let base_size = LEVEL_DEPTH;
        let bid_sizes = (0..BID_LEVELS)
            .map(|_| rng.gen_range((base_size / 2)..=(base_size + base_size / 2)))
            .collect();
        let ask_sizes = (0..ASK_LEVELS)
            .map(|_| rng.gen_range((base_size / 2)..=(base_size + base_size / 2)))
            .collect();

        let state = PriceState {
            symbol: config.symbol.to_string(),
            price,
            bid_price: price - tick,
            ask_price: price + tick,
            spread: 2.0 * tick,
            bid_sizes,
            ask_sizes,
            high: price,
            low: price,
            volume: 0,
            trade_count: 0,
        };

        Self {
            volatility_mean: config.volatility,
            current_volatility: config.volatility,
            buy_pressure: 0.5,
            config,
            state,
        }
    }

    pub fn state(&self) -> &PriceState {
        &self.state
    }

    fn update_volatility(&mut self, rng: &mut ChaCha8Rng) {
        let vol_innovation: f64 = Normal::new(0.0, 0.001).unwrap().sample(rng);
        self.current_volatility = self.current_volatility
            + VOLATILITY_REVERSION_SPEED * (self.volatility_mean - self.current_volatility)
            + vol_innovation;
        self.current_volatility = self.current_volatility.clamp(0.05, 1.0);
    }

    fn update_spread(&mut self, price: f64, rng: &mut ChaCha8Rng) {
        let tick = self.config.tick_size;
        let base_spread = tick * 2.0;
        let vol_spread = price * self.current_volatility * 0.0001;
        let random_spread = rng.gen_range(0.0..tick);

        let total_spread = base_spread + vol_spread + random_spread;
        let half_spread = total_spread / 2.0;

        self.state.bid_price = round_to_tick(price - half_spread, tick);
        self.state.ask_price = round_to_tick(price + half_spread, tick);
        self.state.spread = self.state.ask_price - self.state.bid_price;

        if self.state.spread < tick {
            self.state.ask_price = self.state.bid_price + tick;
            self.state.spread = tick;
        }
    }

    fn update_order_book(&mut self, rng: &mut ChaCha8Rng) {
        for size in self.state.bid_sizes.iter_mut() {
            let change = rng.gen_range(-100..=100);
            *size = (*size + change).max(100);
        }
        for size in self.state.ask_sizes.iter_mut() {
            let change = rng.gen_range(-100..=100);
            *size = (*size + change).max(100);
        }
    }

    /// Advance one GBM step (`S(t+dt) = S(t) * exp((mu - sigma^2/2)dt + sigma*dW)`).
    pub fn step(&mut self, rng: &mut ChaCha8Rng) -> &PriceState {
        self.update_volatility(rng);

        let drift = DRIFT * TIME_STEP;
        let volatility = self.current_volatility * TIME_STEP.sqrt();

        let dw: f64 = Normal::new(0.0, 1.0).unwrap().sample(rng);
        let exponent = (drift - 0.5 * volatility.powi(2)) + volatility * dw;
        let price_multiplier = exponent.exp();

        let mut new_price = self.state.price * price_multiplier;
        new_price = round_to_tick(new_price, self.config.tick_size);
        new_price = new_price.max(self.config.tick_size);

        self.update_spread(new_price, rng);

        self.state.price = new_price;
        self.state.high = self.state.high.max(new_price);
        self.state.low = self.state.low.min(new_price);

        self.update_order_book(rng);

        &self.state
    }

    fn generate_trade_size(&self, rng: &mut ChaCha8Rng) -> i64 {
        let u: f64 = rng.gen_range(0.0..1.0);
        let ratio = TRADE_SIZE_MIN / TRADE_SIZE_MAX;
        let size = TRADE_SIZE_MIN
            * (1.0 - u + u * ratio.powf(TRADE_SIZE_ALPHA)).powf(-1.0 / TRADE_SIZE_ALPHA);

        let rounded = if size > 100.0 {
            (size / 100.0).round() * 100.0
        } else {
            size.round().max(1.0)
        };

        rounded.min(TRADE_SIZE_MAX) as i64
    }

    fn update_buy_pressure(&mut self, last_side: Side, rng: &mut ChaCha8Rng) {
        let reversion = 0.01 * (0.5 - self.buy_pressure);
        let random_walk: f64 = Normal::new(0.0, 0.02).unwrap().sample(rng);
        let momentum = if last_side == Side::Buy { 0.01 } else { -0.01 };

        let new_pressure = self.buy_pressure + reversion + random_walk + momentum;
        self.buy_pressure = new_pressure.clamp(0.3, 0.7);
    }

    pub fn generate_trade(&mut self, rng: &mut ChaCha8Rng) -> Trade {
        let side = if rng.gen_range(0.0..1.0) < self.buy_pressure {
            Side::Buy
        } else {
            Side::Sell
        };

        let quantity = self.generate_trade_size(rng);

        let base_price = match side {
            Side::Buy => self.state.ask_price,
            Side::Sell => self.state.bid_price,
        };
        let price_variance: f64 = Normal::new(0.0, self.state.spread * 0.1)
            .unwrap()
            .sample(rng);
        let price = (base_price + price_variance).max(0.01);

        self.state.volume += quantity;
        self.state.trade_count += 1;
        self.update_buy_pressure(side, rng);

        Trade {
            symbol: self.config.symbol.to_string(),
            timestamp: Utc::now(),
            trade_id: Uuid::new_v4().to_string(),
            price: Decimal::from_f64(round_to_tick(price, 0.01)).unwrap_or(Decimal::ZERO),
            quantity,
            side,
            exchange: self.config.exchange.to_string(),
            trace_id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn generate_quote(&self) -> Quote {
        Quote {
            symbol: self.config.symbol.to_string(),
            timestamp: Utc::now(),
            bid_price: Decimal::from_f64(round_to_tick(self.state.bid_price, 0.01))
                .unwrap_or(Decimal::ZERO),
            bid_size: *self.state.bid_sizes.first().unwrap_or(&100),
            ask_price: Decimal::from_f64(round_to_tick(self.state.ask_price, 0.01))
                .unwrap_or(Decimal::ZERO),
            ask_size: *self.state.ask_sizes.first().unwrap_or(&100),
            exchange: self.config.exchange.to_string(),
        }
    }

    pub fn reset_daily_stats(&mut self) {
        self.state.high = self.state.price;
        self.state.low = self.state.price;
        self.state.volume = 0;
        self.state.trade_count = 0;
    }
}

/// Drives every symbol's `SymbolEngine` and distributes a batch's worth of
/// trades across symbols by volume weight, mirroring `MarketSimulator` +
/// `TradeGenerator.generate_batch`.
pub struct PriceEngine {
    // BTreeMap, not HashMap: iteration order feeds the RNG consumption order
    // across symbols, and must be stable across two instances seeded alike
    // for `generate_batch`'s output to be byte-for-byte reproducible.
    engines: BTreeMap<String, SymbolEngine>,
    rng: ChaCha8Rng,
}

impl PriceEngine {
    pub fn new(symbols: Vec<SymbolConfig>, seed: u64) -> Self {
        use rand::SeedableRng;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let engines = symbols
            .into_iter()
            .map(|cfg| {
                let symbol = cfg.symbol.to_string();
                (symbol, SymbolEngine::new(cfg, &mut rng))
            })
            .collect();
        Self { engines, rng }
    }

    /// Step every symbol forward once, returning one quote per symbol and
    /// trades distributed across symbols so the total is close to
    /// `batch_size`, weighted by each symbol's `volume_weight`.
    pub fn generate_batch(&mut self, batch_size: usize) -> (Vec<Trade>, Vec<Quote>) {
        let mut quotes = Vec::with_capacity(self.engines.len());
        for engine in self.engines.values_mut() {
            engine.step(&mut self.rng);
            quotes.push(engine.generate_quote());
        }

        let total_weight: f64 = self
            .engines
            .values()
            .map(|e| e.config.volume_weight)
            .sum();

        let mut trades = Vec::new();
        for engine in self.engines.values_mut() {
            let weight = engine.config.volume_weight;
            let symbol_trades =
                ((batch_size as f64 * weight / total_weight) as usize).max(1);
            for _ in 0..symbol_trades {
                trades.push(engine.generate_trade(&mut self.rng));
            }
        }

        (trades, quotes)
    }

    /// Reads every symbol's current quote without advancing the GBM —
    /// used by the 200ms quote-producer loop, which runs independently of
    /// the 100ms trade-producer loop's `step()` calls and must not perturb
    /// the RNG-driven price path those calls are reproducing.
    pub fn quotes_snapshot(&self) -> Vec<Quote> {
        self.engines.values().map(|e| e.generate_quote()).collect()
    }

    pub fn reset_daily_stats(&mut self) {
        for engine in self.engines.values_mut() {
            engine.reset_daily_stats();
        }
    }

    pub fn state(&self, symbol: &str) -> Option<&PriceState> {
        self.engines.get(symbol).map(|e| e.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_symbols;

    #[test]
    fn same_seed_produces_identical_stream() {
        let mut a = PriceEngine::new(default_symbols(), 42);
        let mut b = PriceEngine::new(default_symbols(), 42);

        let (trades_a, quotes_a) = a.generate_batch(20);
        let (trades_b, quotes_b) = b.generate_batch(20);

        assert_eq!(trades_a.len(), trades_b.len());
        for (ta, tb) in trades_a.iter().zip(trades_b.iter()) {
            assert_eq!(ta.symbol, tb.symbol);
            assert_eq!(ta.price, tb.price);
            assert_eq!(ta.quantity, tb.quantity);
        }
        for (qa, qb) in quotes_a.iter().zip(quotes_b.iter()) {
            assert_eq!(qa.bid_price, qb.bid_price);
        }
    }

    #[test]
    fn price_stays_positive_after_many_steps() {
        let mut engine = PriceEngine::new(vec![default_symbols().remove(0)], 7);
        for _ in 0..500 {
            engine.generate_batch(5);
        }
        let state = engine.state("AAPL").unwrap();
        assert!(state.price > 0.0);
        assert!(state.bid_price <= state.ask_price);
    }

    #[test]
    fn reset_daily_stats_clears_volume_and_rebases_extremes() {
        let mut engine = PriceEngine::new(vec![default_symbols().remove(0)], 1);
        engine.generate_batch(10);
        engine.reset_daily_stats();
        let state = engine.state("AAPL").unwrap();
        assert_eq!(state.volume, 0);
        assert_eq!(state.trade_count, 0);
        assert_eq!(state.high, state.price);
        assert_eq!(state.low, state.price);
    }
}
