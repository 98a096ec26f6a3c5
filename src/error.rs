use std::{error::Error, fmt, io};

use crate::dataset::DataErr;

/// The engine's result type.
pub type Result<T> = std::result::Result<T, EngineErr>;

/// Training engine failures.
#[derive(Debug)]
pub enum EngineErr {
    /// The pool was configured with zero workers.
    ZeroWorkers,
    /// A layer of the network was configured with zero neurons.
    EmptyLayer { layer: &'static str },
    /// A buffer length doesn't match what the network shape requires.
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// A worker panicked mid-phase; the shared buffers for that phase are
    /// indeterminate and the batch is failed.
    WorkerFault { worker_id: usize },
    /// The OS refused to spawn a worker thread.
    Spawn(io::Error),
    /// The dataset collaborator rejected a request.
    Data(DataErr),
}

impl fmt::Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErr::ZeroWorkers => {
                write!(f, "the engine needs at least one worker thread")
            }
            EngineErr::EmptyLayer { layer } => {
                write!(f, "the {layer} layer must have at least one neuron")
            }
            EngineErr::ShapeMismatch {
                what,
                got,
                expected,
            } => {
                write!(f, "length mismatch for {what}: got {got}, expected {expected}")
            }
            EngineErr::WorkerFault { worker_id } => {
                write!(f, "worker {worker_id} panicked mid-phase, batch failed")
            }
            EngineErr::Spawn(e) => write!(f, "failed to spawn a worker thread: {e}"),
            EngineErr::Data(e) => write!(f, "dataset error: {e}"),
        }
    }
}

impl Error for EngineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineErr::Spawn(e) => Some(e),
            EngineErr::Data(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DataErr> for EngineErr {
    fn from(value: DataErr) -> Self {
        Self::Data(value)
    }
}
