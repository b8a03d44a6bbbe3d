pub mod executor;
pub mod gateway;
pub mod sizing;
pub mod slippage;

pub use executor::{
    ErrorClass, ExecutionError, ExecutionOutcome, ExecutionPath, ExecutionService, ExecutionSettings,
    InventoryLocks, KeyedLocks, ProxyLocks,
};
pub use gateway::{
    BookLevel, GatewayError, MarketData, MarketResolution, OrderBook, OrderFill, OrderRequest, OrderRouter,
    ProxyGateway,
};
pub use sizing::{evaluate, idempotency_key, IntentContext, RejectReason};
