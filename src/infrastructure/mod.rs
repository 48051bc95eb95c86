pub mod binance;
pub mod bus;
pub mod core;
pub mod notify;
pub mod observability;
pub mod persistence;
