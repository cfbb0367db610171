//! Periodic Fear/Greed + headline sentiment producer. Publishes a clamped
//! multiplier to `SharedState` consumed by `Architect::get_adjusted_size`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::ports::MarketAdapter;
use crate::domain::shared_state::SharedState;

const POSITIVE_VOCAB: &[&str] = &["bullish", "growth", "gains", "surge", "rally", "positive", "integration"];
const NEGATIVE_VOCAB: &[&str] = &["crash", "plunge", "bearish", "decline", "losses", "fear", "volatility"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentLabel {
    Euphoric,
    Neutral,
    Panicked,
}

impl SentimentLabel {
    fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Euphoric => "Euphoric",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Panicked => "Panicked",
        }
    }
}

fn base_multiplier(fear_greed: u32) -> (f64, SentimentLabel) {
    if fear_greed >= 75 {
        (0.6, SentimentLabel::Euphoric)
    } else if fear_greed >= 55 {
        (1.0, SentimentLabel::Neutral)
    } else if fear_greed >= 45 {
        (1.0, SentimentLabel::Neutral)
    } else if fear_greed >= 25 {
        (0.9, SentimentLabel::Neutral)
    } else {
        (0.7, SentimentLabel::Panicked)
    }
}

fn keyword_count(text: &str, vocab: &[&str]) -> usize {
    vocab.iter().filter(|word| text.contains(*word)).count()
}

/// Pure computation over already-fetched inputs, split out from `tick` so it
/// can be exercised without a `MarketAdapter`.
pub fn compute(fear_greed: u32, headlines: &[String]) -> (f64, SentimentLabel) {
    let (mut multiplier, label) = base_multiplier(fear_greed);
    let joined = headlines.join(" ").to_lowercase();
    let positive = keyword_count(&joined, POSITIVE_VOCAB);
    let negative = keyword_count(&joined, NEGATIVE_VOCAB);
    if positive > negative + 1 {
        multiplier += 0.1;
    } else if negative > positive + 1 {
        multiplier -= 0.1;
    }
    (multiplier.clamp(0.5, 1.5), label)
}

pub struct SentimentProducer {
    market: Arc<dyn MarketAdapter>,
    shared_state: Arc<SharedState>,
    interval: Duration,
}

impl SentimentProducer {
    pub fn new(market: Arc<dyn MarketAdapter>, shared_state: Arc<SharedState>, interval: Duration) -> Self {
        Self { market, shared_state, interval }
    }

    pub async fn tick(&self) {
        let fg = self.market.fetch_fear_greed().await;
        let headlines = self.market.fetch_headlines(10).await;
        let (multiplier, label) = compute(fg.value, &headlines);
        info!(multiplier, label = label.as_str(), "sentiment updated");
        self.shared_state.set_sentiment(multiplier, Some(label.as_str().to_string()));
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("sentiment producer loop shutting down");
                    return;
                }
                _ = self.tick() => {}
            }
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("sentiment producer loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
