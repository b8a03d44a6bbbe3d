pub mod client;
pub mod ledger;

pub use client::AlloyProxyGateway;
pub use ledger::{FeeTier, ProxyAccount, ProxyError, WithdrawalPreview};
