pub mod abi;
pub mod decoder;

pub use decoder::{DecodeError, DecodedFill, PendingTx, RawLog};
