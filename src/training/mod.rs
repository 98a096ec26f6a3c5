mod orchestrator;

pub use orchestrator::{BatchOrchestrator, BatchReport, TrialScore};
