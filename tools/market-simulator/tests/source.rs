//! Tick source behaviour against a live channel

use std::time::Duration;

use market_simulator::{run_source, SimulatorConfig, TickGenerator};
use tokio::sync::mpsc;
use types::ids::Symbol;
use types::tick::StockTick;

fn config() -> SimulatorConfig {
    SimulatorConfig {
        symbols: vec![Symbol::new("AAPL"), Symbol::new("MSFT")],
        tick_interval: Duration::from_millis(10),
        ..SimulatorConfig::default()
    }
}

#[tokio::test]
async fn test_backlog_comes_first_and_decodes() {
    let config = config();
    let generator = TickGenerator::new(&config).unwrap();
    let (tx, mut rx) = mpsc::channel(64);
    let source = tokio::spawn(run_source(generator, config.tick_interval, 6, tx));

    let mut ticks = Vec::new();
    for _ in 0..8 {
        let payload = rx.recv().await.unwrap();
        ticks.push(StockTick::decode(&payload).unwrap());
    }
    drop(rx);
    let delivered = source.await.unwrap().unwrap();
    assert!(delivered >= 8);

    let symbols: Vec<&str> = ticks.iter().map(|t| t.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "MSFT", "AAPL", "MSFT", "AAPL", "MSFT", "AAPL", "MSFT"]);
    // backlog timestamps step by the interval
    for pair in ticks[..6].windows(2) {
        assert_eq!(pair[1].timestamp_millis() - pair[0].timestamp_millis(), 10);
    }
}

#[tokio::test]
async fn test_source_stops_when_receiver_is_dropped() {
    let config = config();
    let generator = TickGenerator::new(&config).unwrap();
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let delivered = run_source(generator, config.tick_interval, 10, tx).await.unwrap();
    assert_eq!(delivered, 0);
}
