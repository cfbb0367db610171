//! Outbound market data adapter. Candle/discovery data is read from
//! Binance.US's public REST API (the US-compatible fallback this system
//! uses to dodge regional blocks), balances come from a WEEX-signed account
//! endpoint, equities bars from Alpaca, and sentiment from alternative.me.
//! Every method degrades to synthetic data on failure instead of
//! propagating, matching `MarketAdapter`'s documented contract.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::DateTime;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::domain::ports::{AssetBalance, DiscoveryMode, FearGreedIndex, MarketAdapter, SymbolDiscovery};
use crate::domain::types::Candle;
use crate::infrastructure::http_client_factory::HttpClientFactory;

const WEEX_BASE_URL: &str = "https://api.weex.com";
const BINANCE_US_BASE_URL: &str = "https://api.binance.us";
const ALPACA_DATA_BASE_URL: &str = "https://data.alpaca.markets";
const ALTERNATIVE_ME_URL: &str = "https://api.alternative.me/fng/";

/// Shadow baseline: the price this system simulates against once live
/// candles are unreachable, so reasoning can continue uninterrupted.
const MOCK_PRICE: f64 = 90_000.0;
const MOCK_USDT_BALANCE: f64 = 10_000.0;

/// Minimum-viable symbol universe exposed when live enumeration fails.
const MOCK_SYMBOL_UNIVERSE: [&str; 3] = ["BTC/USDT", "ETH/USDT", "SOL/USDT"];

const SYNTHETIC_HEADLINES: &[&str] = &[
    "Exchange reports record trading volume amid bullish rally",
    "Analysts flag custody integration as a bullish growth catalyst",
    "Market sentiment steady as majors trade in a tight range",
    "Regulatory filing renews fears of a broader crackdown",
    "Large holder wallet movements spark whale-dump speculation",
    "On-chain data shows quiet accumulation despite bearish headlines",
];

fn mock_candles(limit: usize, interval_ms: i64) -> Vec<Candle> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64;
    let mut candles: Vec<Candle> = (0..limit.max(1))
        .map(|i| Candle {
            ts_ms: now - (i as i64 * interval_ms),
            open: MOCK_PRICE,
            high: MOCK_PRICE + 150.0,
            low: MOCK_PRICE - 150.0,
            close: MOCK_PRICE,
            volume: 1.5,
        })
        .collect();
    candles.sort_by_key(|c| c.ts_ms);
    candles
}

fn mock_balance() -> HashMap<String, AssetBalance> {
    let mut map = HashMap::new();
    map.insert("USDT".to_string(), AssetBalance { free: MOCK_USDT_BALANCE, locked: 0.0 });
    map.insert("BTC".to_string(), AssetBalance { free: 0.0, locked: 0.0 });
    map
}

fn default_fear_greed() -> FearGreedIndex {
    FearGreedIndex { value: 50, classification: "Neutral".to_string(), source: "synthetic".to_string() }
}

fn mock_symbol_discovery() -> SymbolDiscovery {
    SymbolDiscovery {
        symbols: MOCK_SYMBOL_UNIVERSE.iter().map(|s| s.to_string()).collect(),
        mode: DiscoveryMode::Mock,
    }
}

/// Pure classification step of `discover_symbols`: `None` means the venue
/// enumerated no tradeable USDT markets, which the caller treats the same
/// as a transport failure.
fn tradeable_usdt_symbols(body: BinanceExchangeInfo) -> Option<Vec<String>> {
    let symbols: Vec<String> = body
        .symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.quote_asset == "USDT")
        .map(|s| format!("{}/{}", &s.symbol[..s.symbol.len() - 4], s.quote_asset))
        .collect();
    if symbols.is_empty() { None } else { Some(symbols) }
}

fn base_symbol(symbol: &str) -> String {
    symbol.replace('/', "").to_uppercase()
}

fn interval_to_ms(timeframe: &str) -> i64 {
    match timeframe {
        "1m" => 60_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "1h" => 3_600_000,
        "4h" => 14_400_000,
        "12h" => 43_200_000,
        "1d" => 86_400_000,
        _ => 900_000,
    }
}

fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    Some(Candle {
        ts_ms: row.first()?.as_i64()?,
        open: row.get(1)?.as_str()?.parse().ok()?,
        high: row.get(2)?.as_str()?.parse().ok()?,
        low: row.get(3)?.as_str()?.parse().ok()?,
        close: row.get(4)?.as_str()?.parse().ok()?,
        volume: row.get(5)?.as_str()?.parse().ok()?,
    })
}

#[derive(Debug, Deserialize)]
struct WeexAccountResponse {
    code: Option<i64>,
    data: Option<Vec<WeexAccountEntry>>,
}

#[derive(Debug, Deserialize)]
struct WeexAccountEntry {
    symbol: String,
    available: String,
    frozen: String,
}

#[derive(Debug, Deserialize)]
struct BinanceExchangeInfo {
    symbols: Vec<BinanceSymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct BinanceSymbolInfo {
    symbol: String,
    status: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaBarsResponse {
    bars: Option<Vec<AlpacaBar>>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct AlternativeMeResponse {
    data: Vec<AlternativeMeEntry>,
}

#[derive(Debug, Deserialize)]
struct AlternativeMeEntry {
    value: String,
    value_classification: String,
}

pub struct WeexMarketAdapter {
    client: ClientWithMiddleware,
    api_key: Option<String>,
    api_secret: Option<String>,
    api_password: Option<String>,
    alpaca_api_key: Option<String>,
    alpaca_secret_key: Option<String>,
}

impl WeexMarketAdapter {
    pub fn new(
        api_key: Option<String>,
        api_secret: Option<String>,
        api_password: Option<String>,
        alpaca_api_key: Option<String>,
        alpaca_secret_key: Option<String>,
    ) -> Self {
        Self { client: HttpClientFactory::create_client(), api_key, api_secret, api_password, alpaca_api_key, alpaca_secret_key }
    }

    fn sign(secret: &str, timestamp: &str, method: &str, endpoint: &str, body: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let message = format!("{timestamp}{method}{endpoint}{body}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn weex_headers(&self, method: &str, endpoint: &str, body: &str) -> Option<Vec<(&'static str, String)>> {
        let key = self.api_key.as_ref()?;
        let secret = self.api_secret.as_ref()?;
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_millis().to_string();
        let signature = Self::sign(secret, &timestamp, method, endpoint, body);
        let mut headers = vec![("WEEX-ACCESS-KEY", key.clone()), ("WEEX-ACCESS-SIGN", signature), ("WEEX-ACCESS-TIMESTAMP", timestamp)];
        if let Some(password) = self.api_password.as_ref().filter(|p| !p.is_empty()) {
            headers.push(("WEEX-ACCESS-PASSPHRASE", password.clone()));
        }
        Some(headers)
    }
}

#[async_trait]
impl MarketAdapter for WeexMarketAdapter {
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Vec<Candle> {
        let url = format!("{BINANCE_US_BASE_URL}/api/v3/klines?symbol={}&interval={timeframe}&limit={limit}", base_symbol(symbol));
        let fallback = || mock_candles(limit, interval_to_ms(timeframe));

        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Vec<Vec<serde_json::Value>>>().await {
                Ok(rows) if !rows.is_empty() => {
                    let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline_row(row)).collect();
                    if candles.is_empty() {
                        fallback()
                    } else {
                        candles
                    }
                }
                _ => {
                    debug!(symbol, "empty or malformed kline payload; activating shadow mock candles");
                    fallback()
                }
            },
            Ok(resp) => {
                warn!(symbol, status = %resp.status(), "kline request blocked; activating shadow mock candles");
                fallback()
            }
            Err(e) => {
                warn!(symbol, error = %e, "kline request failed; activating shadow mock candles");
                fallback()
            }
        }
    }

    async fn fetch_balance(&self) -> HashMap<String, AssetBalance> {
        let endpoint = "/capi/v2/account/accounts";
        let Some(headers) = self.weex_headers("GET", endpoint, "") else {
            return mock_balance();
        };

        let mut req = self.client.get(format!("{WEEX_BASE_URL}{endpoint}"));
        for (name, value) in headers {
            req = req.header(name, value);
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<WeexAccountResponse>().await {
                Ok(body) if body.code == Some(200) => {
                    let entries = body.data.unwrap_or_default();
                    if entries.is_empty() {
                        mock_balance()
                    } else {
                        entries
                            .into_iter()
                            .map(|e| {
                                let free = e.available.parse().unwrap_or(0.0);
                                let locked = e.frozen.parse().unwrap_or(0.0);
                                (e.symbol, AssetBalance { free, locked })
                            })
                            .collect()
                    }
                }
                _ => mock_balance(),
            },
            _ => {
                warn!("balance request blocked; providing shadow portfolio");
                mock_balance()
            }
        }
    }

    async fn fetch_equity_bars(&self, ticker: &str) -> Option<(Candle, Candle)> {
        let key = self.alpaca_api_key.as_ref()?;
        let secret = self.alpaca_secret_key.as_ref()?;
        let url = format!("{ALPACA_DATA_BASE_URL}/v2/stocks/{ticker}/bars?timeframe=1Hour&limit=2");

        let resp = self.client.get(&url).header("APCA-API-KEY-ID", key).header("APCA-API-SECRET-KEY", secret).send().await.ok()?;
        if !resp.status().is_success() {
            warn!(ticker, status = %resp.status(), "equity bar request blocked");
            return None;
        }

        let body: AlpacaBarsResponse = resp.json().await.ok()?;
        let bars = body.bars?;
        if bars.len() < 2 {
            return None;
        }
        let to_candle = |b: &AlpacaBar| Candle {
            ts_ms: DateTime::parse_from_rfc3339(&b.t).map(|d| d.timestamp_millis()).unwrap_or(0),
            open: b.o,
            high: b.h,
            low: b.l,
            close: b.c,
            volume: b.v,
        };
        Some((to_candle(&bars[0]), to_candle(&bars[1])))
    }

    async fn fetch_fear_greed(&self) -> FearGreedIndex {
        let resp = match self.client.get(ALTERNATIVE_ME_URL).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            _ => return default_fear_greed(),
        };
        let Ok(body) = resp.json::<AlternativeMeResponse>().await else {
            return default_fear_greed();
        };
        let Some(entry) = body.data.first() else {
            return default_fear_greed();
        };
        let Ok(value) = entry.value.parse::<u32>() else {
            return default_fear_greed();
        };
        FearGreedIndex { value, classification: entry.value_classification.clone(), source: "alternative.me".to_string() }
    }

    async fn fetch_headlines(&self, count: usize) -> Vec<String> {
        SYNTHETIC_HEADLINES.iter().take(count).map(|s| s.to_string()).collect()
    }

    async fn discover_symbols(&self) -> SymbolDiscovery {
        let url = format!("{BINANCE_US_BASE_URL}/api/v3/exchangeInfo");
        let live = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<BinanceExchangeInfo>().await {
                Ok(body) => tradeable_usdt_symbols(body),
                Err(e) => {
                    warn!(error = %e, "exchangeInfo response malformed");
                    None
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "exchangeInfo request blocked");
                None
            }
            Err(e) => {
                warn!(error = %e, "exchangeInfo request failed");
                None
            }
        };

        match live {
            Some(symbols) => SymbolDiscovery { symbols, mode: DiscoveryMode::Live },
            None => {
                warn!("symbol discovery unavailable; exposing minimum-viable mock universe");
                mock_symbol_discovery()
            }
        }
    }

    /// No on-chain inflow feed is wired up, so net inflow is proxied from
    /// the shape of recent candles: volume weighted by the direction of the
    /// price move between consecutive bars, summed and taken as magnitude.
    async fn fetch_whale_flow(&self, symbol: &str) -> f64 {
        let candles = self.fetch_ohlcv(symbol, "1h", 6).await;
        if candles.len() < 2 {
            return 0.0;
        }
        let net: f64 = candles
            .windows(2)
            .map(|w| {
                let direction = if w[1].close >= w[0].close { 1.0 } else { -1.0 };
                direction * w[1].volume
            })
            .sum();
        net.abs()
    }
}
