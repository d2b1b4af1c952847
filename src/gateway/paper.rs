//! Paper trading gateway that simulates broker responses.
//!
//! Random-walks a price per subscribed symbol, answers option chain requests
//! with strikes around the current price, and fills market orders at the
//! simulated price after a configurable latency.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::traits::{GatewayClient, GatewayEventSink};
use super::types::{OrderIntent, OrderStatus, TickKind};
use crate::config::PaperConfig;
use crate::utils::decimal::round_to_tick;

/// Simulated market state shared by the tick and fill tasks.
struct PaperMarket {
    prices: HashMap<String, Decimal>,
    rng: StdRng,
}

impl PaperMarket {
    /// Advance one random-walk step for a symbol.
    fn step(&mut self, symbol: &str, volatility: f64, tick: Decimal) -> Option<Decimal> {
        let price = *self.prices.get(symbol)?;
        let shock: f64 = self.rng.gen_range(-1.0..=1.0) * volatility;
        let factor = Decimal::from_f64(1.0 + shock).unwrap_or(Decimal::ONE);
        let next = round_to_tick(price * factor, tick).max(tick);
        self.prices.insert(symbol.to_string(), next);
        Some(next)
    }
}

/// Simulated broker adapter.
pub struct PaperGateway {
    config: PaperConfig,
    strike_intervals: HashMap<String, Decimal>,
    default_strike_interval: Decimal,
    sink: Arc<dyn GatewayEventSink>,
    market: Arc<Mutex<PaperMarket>>,
    working_orders: Arc<Mutex<HashSet<u64>>>,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    order_count: AtomicU64,
}

impl PaperGateway {
    /// Create a paper gateway delivering events into `sink`.
    pub fn new(
        config: PaperConfig,
        strike_intervals: HashMap<String, Decimal>,
        default_strike_interval: Decimal,
        sink: Arc<dyn GatewayEventSink>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            strike_intervals,
            default_strike_interval,
            sink,
            market: Arc::new(Mutex::new(PaperMarket {
                prices: HashMap::new(),
                rng,
            })),
            working_orders: Arc::new(Mutex::new(HashSet::new())),
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            order_count: AtomicU64::new(0),
        }
    }

    /// Current simulated price for a symbol.
    pub async fn price(&self, symbol: &str) -> Option<Decimal> {
        self.market.lock().await.prices.get(symbol).copied()
    }

    /// Force the simulated price (for scripted scenarios).
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.market
            .lock()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    /// Number of orders accepted this session.
    pub fn order_count(&self) -> u64 {
        self.order_count.load(Ordering::SeqCst)
    }

    /// Drop the simulated connection and notify the sink.
    pub async fn simulate_disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        warn!(%reason, "Paper gateway connection dropped");
        self.sink.on_connection_lost(reason).await;
    }

    fn strike_interval(&self, symbol: &str) -> Decimal {
        self.strike_intervals
            .get(symbol)
            .copied()
            .unwrap_or(self.default_strike_interval)
    }

    fn start_price(&self, symbol: &str) -> Decimal {
        self.config
            .start_prices
            .get(symbol)
            .copied()
            .unwrap_or(self.config.default_start_price)
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            bail!("paper gateway is not connected");
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayClient for PaperGateway {
    async fn connect(&self, host: &str, port: u16, client_id: u32) -> Result<u64> {
        if !self.config.accepted_ports.contains(&port) {
            bail!("connection refused on {}:{}", host, port);
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(%host, port, client_id, "Paper gateway session opened");
        Ok(1)
    }

    async fn subscribe(&self, symbol: &str) -> Result<()> {
        self.ensure_connected()?;

        let start = {
            let mut market = self.market.lock().await;
            *market
                .prices
                .entry(symbol.to_string())
                .or_insert_with(|| self.start_price(symbol))
        };
        self.sink.on_tick(symbol, TickKind::Close, start).await;

        let sink = self.sink.clone();
        let market = self.market.clone();
        let connected = self.connected.clone();
        let symbol_owned = symbol.to_string();
        let tick = self.config.price_tick;
        let volatility = self.config.volatility;
        let interval_ms = self.config.tick_interval_ms.max(1);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                if !connected.load(Ordering::SeqCst) {
                    break;
                }

                let next = market.lock().await.step(&symbol_owned, volatility, tick);
                let Some(last) = next else { break };

                sink.on_tick(&symbol_owned, TickKind::Bid, last - tick).await;
                sink.on_tick(&symbol_owned, TickKind::Ask, last + tick).await;
                sink.on_tick(&symbol_owned, TickKind::Last, last).await;
            }
            debug!(symbol = %symbol_owned, "Paper tick stream stopped");
        });

        self.tasks.lock().await.push(handle);
        info!(%symbol, %start, "Paper market data subscribed");
        Ok(())
    }

    async fn request_option_chain(&self, symbol: &str) -> Result<()> {
        self.ensure_connected()?;

        let center = match self.price(symbol).await {
            Some(price) => price,
            None => self.start_price(symbol),
        };
        let interval = self.strike_interval(symbol);
        let atm = round_to_tick(center, interval);
        let width = i64::from(self.config.chain_width);
        let strikes: Vec<Decimal> = (-width..=width)
            .map(|i| atm + interval * Decimal::from(i))
            .filter(|s| *s > Decimal::ZERO)
            .collect();

        let sink = self.sink.clone();
        let symbol_owned = symbol.to_string();
        let expirations = self.config.expirations.clone();
        let latency = Duration::from_millis(self.config.chain_latency_ms);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            sink.on_option_chain(&symbol_owned, expirations, strikes).await;
        });
        self.tasks.lock().await.push(handle);

        debug!(%symbol, %atm, %interval, "Paper option chain requested");
        Ok(())
    }

    async fn place_order(&self, order_id: u64, intent: &OrderIntent) -> Result<()> {
        self.ensure_connected()?;

        self.working_orders.lock().await.insert(order_id);
        self.order_count.fetch_add(1, Ordering::SeqCst);

        let sink = self.sink.clone();
        let market = self.market.clone();
        let working = self.working_orders.clone();
        let latency = Duration::from_millis(self.config.fill_latency_ms);
        let reject_rate = self.config.reject_rate;
        let symbol = intent.symbol.clone();
        let quantity = Decimal::from(intent.quantity);

        info!(order_id, intent = %intent.describe(), "Paper order accepted");

        tokio::spawn(async move {
            sink.on_order_status(order_id, OrderStatus::Submitted, Decimal::ZERO, Decimal::ZERO)
                .await;
            tokio::time::sleep(latency).await;

            if !working.lock().await.remove(&order_id) {
                // Cancelled while working
                return;
            }

            let (price, rejected) = {
                let mut market = market.lock().await;
                let price = market.prices.get(&symbol).copied();
                let rejected = reject_rate > 0.0 && market.rng.gen_bool(reject_rate);
                (price, rejected)
            };

            match price {
                Some(price) if !rejected => {
                    sink.on_order_status(order_id, OrderStatus::Filled, quantity, price)
                        .await;
                }
                _ => {
                    sink.on_order_status(order_id, OrderStatus::Rejected, Decimal::ZERO, Decimal::ZERO)
                        .await;
                }
            }
        });

        Ok(())
    }

    async fn cancel_order(&self, order_id: u64) -> Result<()> {
        if self.working_orders.lock().await.remove(&order_id) {
            let sink = self.sink.clone();
            tokio::spawn(async move {
                sink.on_order_status(order_id, OrderStatus::Cancelled, Decimal::ZERO, Decimal::ZERO)
                    .await;
            });
            info!(order_id, "Paper order cancelled");
        } else {
            debug!(order_id, "Cancel for order that is no longer working");
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        info!("Paper gateway disconnected");
    }
}
