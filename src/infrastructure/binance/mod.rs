mod futures_rest;
mod kline_stream;

pub use futures_rest::FuturesMarketClient;
pub use kline_stream::{KlineConnection, bar_from_kline, parse_kline_event};
