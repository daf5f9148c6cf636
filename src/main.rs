//! Riptide - regime-aware paper trading engine
//!
//! 1. Streams closed candles from Binance (websocket with REST fallback)
//! 2. Classifies the market regime per symbol
//! 3. Runs the strategy chain on every closed candle
//! 4. Sends surviving signals to the external advisor for review
//! 5. Simulates fills against a risk-managed paper portfolio

use tracing::info;

use riptide::config::Settings;
use riptide::engine::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting riptide...");

    let settings = Settings::from_env()?;
    info!(
        "✓ Configuration loaded: {} symbols, {} interval, paper capital {}",
        settings.feed.symbols.len(),
        settings.feed.interval.as_str(),
        settings.risk.initial_capital
    );

    let engine = Engine::new(settings)?;
    engine.run().await
}
