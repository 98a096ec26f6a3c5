pub mod config;
pub mod dataset;
pub mod error;
mod network;
mod pool;
pub mod sync;
mod training;
mod worker;

pub use config::{EngineConfig, NetworkShape};
pub use dataset::{DataErr, Dataset, InMemoryDataset, Trial, one_hot};
pub use error::{EngineErr, Result};
pub use network::Network;
pub use pool::WorkerPool;
pub use sync::{Gate, Role, SleepGate, SpinGate, TicketBarrier};
pub use training::{BatchOrchestrator, BatchReport, TrialScore};
pub use worker::{JobKind, WorkerAssignment};
