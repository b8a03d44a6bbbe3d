pub mod clob_client;
pub mod gamma_client;
pub mod market_data;
pub mod trading;
pub mod types;
pub mod wallet;

pub use clob_client::ClobClient;
pub use gamma_client::GammaClient;
pub use market_data::PolymarketMarketData;
pub use trading::{DryRunRouter, TradingClient};
pub use wallet::BotWallet;
