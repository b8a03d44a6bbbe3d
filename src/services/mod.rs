pub mod notifier;
pub mod supervisor;
pub mod sweeper;

pub use notifier::Notifier;
pub use supervisor::{JobResult, Supervisor, WorkerSettings};
pub use sweeper::{SweepReport, Sweeper};
