use std::{
    hint,
    sync::atomic::{AtomicI32, Ordering},
};

use parking_lot::Mutex;

use super::Gate;

/// The busy-spin checkpoint gate.
///
/// `pay_toll` polls the opening counter in a tight loop and never yields to
/// the scheduler. Meant for the hot path of a training step, where the
/// micro-phases are far shorter than an OS sleep/wake round trip.
pub struct SpinGate {
    openings: Box<[AtomicI32]>,
    grant_lock: Mutex<()>,
}

impl SpinGate {
    /// Creates a gate with `checkpoints` independent openings, all closed.
    pub fn new(checkpoints: usize) -> Self {
        Self {
            openings: (0..checkpoints).map(|_| AtomicI32::new(0)).collect(),
            grant_lock: Mutex::new(()),
        }
    }
}

impl Gate for SpinGate {
    fn with_checkpoints(checkpoints: usize) -> Self {
        Self::new(checkpoints)
    }

    fn pay_toll(&self, id: usize, toll: i32) {
        assert!(toll >= 0, "toll must be non-negative, got {toll}");
        let opening = &self.openings[id];

        loop {
            let current = opening.load(Ordering::Relaxed);
            if current < toll {
                hint::spin_loop();
                continue;
            }

            // Acquire pairs with the granter's Release: once the toll is
            // taken, everything written before the grant is visible here.
            if opening
                .compare_exchange_weak(
                    current,
                    current - toll,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    fn grant_opening(&self, id: usize, amount: i32, exclusive: bool) {
        assert!(amount >= 0, "opening must be non-negative, got {amount}");

        if exclusive {
            let _granting = self.grant_lock.lock();
            self.openings[id].fetch_add(amount, Ordering::Release);
        } else {
            self.openings[id].fetch_add(amount, Ordering::Release);
        }
    }
}
