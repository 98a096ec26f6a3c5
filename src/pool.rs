use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, info};

use crate::{
    error::{EngineErr, Result},
    network::{Network, PhaseBuf, partition},
    sync::{Gate, TicketBarrier},
    worker::{self, JobKind, WorkerAssignment},
};

/// Checkpoint ids for one training step, in protocol order.
pub(crate) mod checkpoint {
    /// Opened by the master to start a phase, paid once per worker.
    pub const START: usize = 0;
    /// Granted once per worker when its hidden slice is activated.
    pub const HIDDEN_DONE: usize = 1;
    /// Opened by the master once every hidden activation is in.
    pub const OUTPUT_GO: usize = 2;
    /// Granted once per worker when its output deltas are in.
    pub const OUTPUT_DELTA_DONE: usize = 3;
    /// Opened by the master once every output delta is in.
    pub const HIDDEN_GO: usize = 4;
    /// Granted once per worker when its phase work is done.
    pub const PHASE_DONE: usize = 5;

    pub const COUNT: usize = 6;
}

/// Master-to-worker control word, written between phases, read after the
/// start toll.
pub(crate) struct Control {
    pub job: AtomicU8,
    pub alive: AtomicBool,
    fault: AtomicBool,
    fault_worker: AtomicUsize,
}

impl Control {
    fn new() -> Self {
        Self {
            job: AtomicU8::new(JobKind::Idle.as_u8()),
            alive: AtomicBool::new(true),
            fault: AtomicBool::new(false),
            fault_worker: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fault(&self, worker_id: usize) {
        self.fault_worker.store(worker_id, Ordering::Relaxed);
        self.fault.store(true, Ordering::Release);
    }

    fn faulted(&self) -> Option<usize> {
        self.fault
            .load(Ordering::Acquire)
            .then(|| self.fault_worker.load(Ordering::Relaxed))
    }
}

/// Everything the master and the workers share for one run.
pub(crate) struct Shared<G> {
    pub net: Network,
    /// One-hot target for the trial in flight, master-written.
    pub targets: PhaseBuf,
    /// One private weight-update accumulator per worker.
    pub grads: Vec<PhaseBuf>,
    pub gate: G,
    pub control: Control,
    /// Startup and departure rendezvous, `workers + 1` parties.
    pub rendezvous: TicketBarrier,
}

/// A fixed pool of worker threads driven phase by phase by the master.
///
/// Created once per run. Assignments are computed at spawn (one contiguous
/// slice of the hidden and of the output layer per worker) and never
/// reallocated; all coordination goes through the gate.
pub struct WorkerPool<G: Gate> {
    shared: Arc<Shared<G>>,
    handles: Vec<JoinHandle<()>>,
    workers: usize,
}

impl<G: Gate> WorkerPool<G> {
    /// Spawns `worker_count` named worker threads over `net` and blocks
    /// until all of them are live.
    ///
    /// # Errors
    /// Returns `ZeroWorkers` for an empty pool, or `Spawn` when the OS
    /// refuses a thread.
    pub fn spawn(net: Network, worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(EngineErr::ZeroWorkers);
        }

        let shape = *net.shape();
        let hidden_ranges = partition(shape.hidden(), worker_count);
        let output_ranges = partition(shape.output(), worker_count);

        let shared = Arc::new(Shared {
            net,
            targets: PhaseBuf::new(shape.output()),
            grads: (0..worker_count)
                .map(|_| PhaseBuf::new(shape.weight_count()))
                .collect(),
            gate: G::with_checkpoints(checkpoint::COUNT),
            control: Control::new(),
            rendezvous: TicketBarrier::new(worker_count as u32 + 1),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for (worker_id, (hidden_range, output_range)) in
            hidden_ranges.into_iter().zip(output_ranges).enumerate()
        {
            let assignment = WorkerAssignment {
                worker_id,
                hidden_range,
                output_range,
            };
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("mlp-worker-{worker_id}"))
                .spawn(move || worker::run(worker_shared, assignment));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Workers already spawned are parked at the startup
                    // rendezvous; release them into a dead pool and join
                    // before reporting the failure.
                    shared.control.alive.store(false, Ordering::Release);
                    shared.rendezvous.destroy();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(EngineErr::Spawn(e));
                }
            }
        }

        shared.rendezvous.wait();
        info!(workers = worker_count; "worker pool online");

        Ok(Self {
            shared,
            handles,
            workers: worker_count,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn net(&self) -> &Network {
        &self.shared.net
    }

    /// Runs one phase to completion across all workers.
    ///
    /// The job word is published before the start grant; the final toll
    /// collection guarantees every worker's writes for the phase are
    /// visible once this returns.
    ///
    /// # Errors
    /// Returns `WorkerFault` if any worker has panicked; the phase still
    /// ran to protocol completion, so the pool remains drivable (and
    /// shut-downable), but the shared buffers are indeterminate.
    pub(crate) fn run_phase(&self, job: JobKind) -> Result<()> {
        let n = self.workers as i32;
        let shared = &self.shared;

        shared.control.job.store(job.as_u8(), Ordering::Release);
        shared.gate.grant_opening(checkpoint::START, n, false);

        match job {
            JobKind::Forward => {
                shared.gate.pay_toll(checkpoint::HIDDEN_DONE, n);
                shared.gate.grant_opening(checkpoint::OUTPUT_GO, n, false);
            }
            JobKind::Backward => {
                shared.gate.pay_toll(checkpoint::OUTPUT_DELTA_DONE, n);
                shared.gate.grant_opening(checkpoint::HIDDEN_GO, n, false);
            }
            JobKind::Idle => {}
        }

        shared.gate.pay_toll(checkpoint::PHASE_DONE, n);

        match shared.control.faulted() {
            Some(worker_id) => Err(EngineErr::WorkerFault { worker_id }),
            None => Ok(()),
        }
    }

    /// Writes the one-hot target for the next backward phase. Master-only,
    /// between phases.
    pub(crate) fn set_targets(&self, target: &[f32]) -> Result<()> {
        if target.len() != self.shared.targets.len() {
            return Err(EngineErr::ShapeMismatch {
                what: "target",
                got: target.len(),
                expected: self.shared.targets.len(),
            });
        }

        // SAFETY: Workers are parked at the start checkpoint, the master
        //         owns the target buffer; the start grant publishes it.
        unsafe { self.shared.targets.slice_mut(0..target.len()) }.copy_from_slice(target);
        Ok(())
    }

    /// Sums every worker's private weight-update buffer into `acc` and
    /// zeroes them. Master-only, after a backward phase has been collected.
    pub(crate) fn drain_grads_into(&self, acc: &mut [f32]) {
        for grad in &self.shared.grads {
            // SAFETY: The backward completion toll has been paid, so the
            //         owning worker is parked and its writes are published.
            let slice = unsafe { grad.slice(0..grad.len()) };
            acc.iter_mut().zip(slice).for_each(|(a, g)| *a += g);
            unsafe { grad.fill_zero() };
        }
    }

    /// Stops the pool: clears `alive`, opens the start checkpoint one final
    /// round so every worker observes the flag, then drains the departure
    /// rendezvous and joins all threads.
    ///
    /// # Errors
    /// Returns `WorkerFault` if a worker thread exited by panic.
    pub fn shutdown(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.handles.is_empty() {
            return Ok(());
        }

        let n = self.workers as i32;
        let shared = &self.shared;

        shared.control.alive.store(false, Ordering::Release);
        shared.gate.grant_opening(checkpoint::START, n, false);
        shared.gate.pay_toll(checkpoint::PHASE_DONE, n);

        // All workers are past their loops; complete the final generation
        // and drain the barrier before any thread state is dropped.
        shared.rendezvous.wait();
        shared.rendezvous.destroy();

        let mut fault = None;
        for (worker_id, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                fault = Some(worker_id);
            }
        }
        debug!(workers = self.workers; "worker pool stopped");

        match fault {
            Some(worker_id) => Err(EngineErr::WorkerFault { worker_id }),
            None => Ok(()),
        }
    }
}

impl<G: Gate> Drop for WorkerPool<G> {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        config::NetworkShape,
        sync::{SleepGate, SpinGate},
    };

    fn net() -> Network {
        let shape = NetworkShape {
            layer_sizes: [2, 5, 3],
            learning_rate: 0.5,
            hidden_bias: 1.,
            output_bias: 1.,
        };
        Network::new(shape, &mut StdRng::seed_from_u64(1)).unwrap()
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        assert!(matches!(
            WorkerPool::<SpinGate>::spawn(net(), 0),
            Err(EngineErr::ZeroWorkers)
        ));
    }

    fn shutdown_within_bounds<G: Gate>() {
        for workers in [1, 2, 4] {
            let (tx, rx) = mpsc::channel();
            let watchdog = thread::spawn(move || {
                let pool = WorkerPool::<G>::spawn(net(), workers).unwrap();
                pool.run_phase(JobKind::Forward).unwrap();
                pool.shutdown().unwrap();
                let _ = tx.send(());
            });

            rx.recv_timeout(Duration::from_secs(10))
                .unwrap_or_else(|_| panic!("pool with {workers} workers failed to stop"));
            watchdog.join().unwrap();
        }
    }

    #[test]
    fn test_shutdown_terminates_within_bounds_spinning() {
        shutdown_within_bounds::<SpinGate>();
    }

    #[test]
    fn test_shutdown_terminates_within_bounds_sleeping() {
        shutdown_within_bounds::<SleepGate>();
    }

    #[test]
    fn test_panicked_worker_keeps_the_protocol_alive() {
        let (tx, rx) = mpsc::channel();
        let watchdog = thread::spawn(move || {
            let net = net();
            let shape = *net.shape();
            let shared = Arc::new(Shared {
                net,
                targets: PhaseBuf::new(shape.output()),
                grads: vec![PhaseBuf::new(shape.weight_count())],
                gate: SpinGate::with_checkpoints(checkpoint::COUNT),
                control: Control::new(),
                rendezvous: TicketBarrier::new(2),
            });
            // A hidden slice past the layer end makes the first compute
            // step index out of bounds and unwind inside the worker.
            let assignment = WorkerAssignment {
                worker_id: 0,
                hidden_range: 0..shape.hidden() + 4,
                output_range: 0..shape.output(),
            };
            let worker = {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker::run(shared, assignment))
            };
            shared.rendezvous.wait();

            // Drive one forward phase from the master side; every toll and
            // grant must still balance with the worker unwound.
            shared
                .control
                .job
                .store(JobKind::Forward.as_u8(), Ordering::Release);
            shared.gate.grant_opening(checkpoint::START, 1, false);
            shared.gate.pay_toll(checkpoint::HIDDEN_DONE, 1);
            shared.gate.grant_opening(checkpoint::OUTPUT_GO, 1, false);
            shared.gate.pay_toll(checkpoint::PHASE_DONE, 1);
            assert_eq!(shared.control.faulted(), Some(0));

            // The faulted worker still answers the shutdown round.
            shared.control.alive.store(false, Ordering::Release);
            shared.gate.grant_opening(checkpoint::START, 1, false);
            shared.gate.pay_toll(checkpoint::PHASE_DONE, 1);
            shared.rendezvous.wait();
            shared.rendezvous.destroy();
            worker.join().unwrap();
            let _ = tx.send(());
        });

        rx.recv_timeout(Duration::from_secs(10))
            .expect("protocol hung after a worker panic");
        watchdog.join().unwrap();
    }

    #[test]
    fn test_worker_released_into_dead_pool_departs() {
        let net = net();
        let shape = *net.shape();
        let shared = Arc::new(Shared::<SpinGate> {
            net,
            targets: PhaseBuf::new(shape.output()),
            grads: vec![PhaseBuf::new(shape.weight_count())],
            gate: SpinGate::with_checkpoints(checkpoint::COUNT),
            control: Control::new(),
            rendezvous: TicketBarrier::new(2),
        });
        let assignment = WorkerAssignment {
            worker_id: 0,
            hidden_range: 0..shape.hidden(),
            output_range: 0..shape.output(),
        };
        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || worker::run(shared, assignment))
        };

        // The aborted-startup path: the pool never joins the rendezvous,
        // it clears `alive` and tears the barrier down instead.
        shared.control.alive.store(false, Ordering::Release);
        shared.rendezvous.destroy();

        let (tx, rx) = mpsc::channel();
        let joiner = thread::spawn(move || {
            worker.join().unwrap();
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(10))
            .expect("worker stuck in a dead pool's startup rendezvous");
        joiner.join().unwrap();
    }

    #[test]
    fn test_sleeping_gate_drives_the_same_protocol() {
        let pool = WorkerPool::<SleepGate>::spawn(net(), 3).unwrap();
        pool.run_phase(JobKind::Forward).unwrap();
        pool.run_phase(JobKind::Idle).unwrap();
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_drop_without_shutdown_does_not_hang() {
        let pool = WorkerPool::<SpinGate>::spawn(net(), 2).unwrap();
        pool.run_phase(JobKind::Idle).unwrap();
        drop(pool);
    }
}
