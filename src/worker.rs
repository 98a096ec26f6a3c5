use std::{
    ops::Range,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, atomic::Ordering},
};

use log::{debug, warn};

use crate::{
    pool::{Shared, checkpoint},
    sync::Gate,
};

/// What the workers are asked to do in the phase being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Idle,
    Forward,
    Backward,
}

impl JobKind {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            JobKind::Idle => 0,
            JobKind::Forward => 1,
            JobKind::Backward => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => JobKind::Forward,
            2 => JobKind::Backward,
            _ => JobKind::Idle,
        }
    }
}

/// A worker's fixed slice of each layer, immutable for the whole run.
///
/// The pool hands these out so that per layer the ranges tile `0..size`
/// exactly; a worker may receive empty ranges when there are more workers
/// than neurons.
#[derive(Debug, Clone)]
pub struct WorkerAssignment {
    pub worker_id: usize,
    pub hidden_range: Range<usize>,
    pub output_range: Range<usize>,
}

/// The worker phase loop.
///
/// `Idle -> Forward -> Backward -> Idle`, until `alive` is cleared and the
/// start checkpoint opens one final time. Each phase is bracketed by tolls:
/// pay `START`, compute the assigned slices with an intra-phase checkpoint
/// between the dependent micro-steps, grant `PHASE_DONE`.
pub(crate) fn run<G: Gate>(shared: Arc<Shared<G>>, assignment: WorkerAssignment) {
    let WorkerAssignment {
        worker_id,
        hidden_range,
        output_range,
    } = assignment;
    let weight_count = shared.net.shape().weight_count();
    let output_count = shared.net.shape().output();

    // Startup rendezvous: the master doesn't open a phase before every
    // worker is live, and no worker pays a toll before that.
    shared.rendezvous.wait();

    // The pool aborts the startup if a later spawn fails; a worker released
    // into a dead pool leaves before touching the gate.
    if !shared.control.alive.load(Ordering::Acquire) {
        shared.rendezvous.wait();
        return;
    }
    debug!(worker_id = worker_id; "worker online");

    // A worker that panicked keeps servicing the gate protocol (skipping
    // the compute) so its siblings and the master never hang; it only
    // leaves through the shutdown path.
    let mut healthy = true;

    loop {
        shared.gate.pay_toll(checkpoint::START, 1);

        if !shared.control.alive.load(Ordering::Acquire) {
            shared.gate.grant_opening(checkpoint::PHASE_DONE, 1, true);
            break;
        }

        match JobKind::from_u8(shared.control.job.load(Ordering::Acquire)) {
            JobKind::Forward => {
                guarded(&shared, worker_id, &mut healthy, "forward hidden", || {
                    shared.net.forward_hidden(hidden_range.clone());
                });
                shared.gate.grant_opening(checkpoint::HIDDEN_DONE, 1, true);

                // Output neurons read every hidden activation, so they may
                // only start once the master has collected HIDDEN_DONE.
                shared.gate.pay_toll(checkpoint::OUTPUT_GO, 1);
                guarded(&shared, worker_id, &mut healthy, "forward output", || {
                    shared.net.forward_output(output_range.clone());
                });
            }
            JobKind::Backward => {
                guarded(&shared, worker_id, &mut healthy, "output deltas", || {
                    // SAFETY: grads[worker_id] is private to this worker
                    //         inside a phase; the master wrote the targets
                    //         before opening it.
                    let grad = unsafe { shared.grads[worker_id].slice_mut(0..weight_count) };
                    let target = unsafe { shared.targets.slice(0..output_count) };
                    shared.net.backward_output(output_range.clone(), target, grad);
                });
                shared
                    .gate
                    .grant_opening(checkpoint::OUTPUT_DELTA_DONE, 1, true);

                // Hidden deltas fold over every output delta.
                shared.gate.pay_toll(checkpoint::HIDDEN_GO, 1);
                guarded(&shared, worker_id, &mut healthy, "hidden deltas", || {
                    // SAFETY: Same private gradient buffer as above.
                    let grad = unsafe { shared.grads[worker_id].slice_mut(0..weight_count) };
                    shared.net.backward_hidden(hidden_range.clone(), grad);
                });
            }
            JobKind::Idle => {}
        }

        shared.gate.grant_opening(checkpoint::PHASE_DONE, 1, true);
    }

    debug!(worker_id = worker_id; "worker stopped");
    // Departure rendezvous: lets the master prove every worker left its
    // wait loop before the gate state is torn down.
    shared.rendezvous.wait();
}

fn guarded<G: Gate>(
    shared: &Shared<G>,
    worker_id: usize,
    healthy: &mut bool,
    step: &'static str,
    compute: impl FnOnce(),
) {
    if !*healthy {
        return;
    }

    if panic::catch_unwind(AssertUnwindSafe(compute)).is_err() {
        *healthy = false;
        shared.control.fault(worker_id);
        warn!(worker_id = worker_id, step = step; "worker panicked, batch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_round_trips_through_the_control_word() {
        for kind in [JobKind::Idle, JobKind::Forward, JobKind::Backward] {
            assert_eq!(JobKind::from_u8(kind.as_u8()), kind);
        }
        assert_eq!(JobKind::from_u8(200), JobKind::Idle);
    }
}
