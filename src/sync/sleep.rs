use parking_lot::{Condvar, Mutex};

use super::Gate;

struct Checkpoint {
    opening: Mutex<i32>,
    opened: Condvar,
}

/// The sleeping checkpoint gate.
///
/// Same contract as `SpinGate`, but a party that can't cover its toll parks
/// in the OS until the opening grows. Use it when cores are scarce and the
/// extra wake-up latency per micro-phase is acceptable.
pub struct SleepGate {
    checkpoints: Box<[Checkpoint]>,
}

impl SleepGate {
    /// Creates a gate with `checkpoints` independent openings, all closed.
    pub fn new(checkpoints: usize) -> Self {
        Self {
            checkpoints: (0..checkpoints)
                .map(|_| Checkpoint {
                    opening: Mutex::new(0),
                    opened: Condvar::new(),
                })
                .collect(),
        }
    }
}

impl Gate for SleepGate {
    fn with_checkpoints(checkpoints: usize) -> Self {
        Self::new(checkpoints)
    }

    fn pay_toll(&self, id: usize, toll: i32) {
        assert!(toll >= 0, "toll must be non-negative, got {toll}");
        let checkpoint = &self.checkpoints[id];

        // The mutex orders the buffer writes made before a grant ahead of
        // this party's reads after the pay.
        let mut opening = checkpoint.opening.lock();
        while *opening < toll {
            checkpoint.opened.wait(&mut opening);
        }
        *opening -= toll;
    }

    fn grant_opening(&self, id: usize, amount: i32, _exclusive: bool) {
        assert!(amount >= 0, "opening must be non-negative, got {amount}");
        let checkpoint = &self.checkpoints[id];

        // The opening mutex already serializes concurrent granters, so the
        // exclusive flag changes nothing here.
        let mut opening = checkpoint.opening.lock();
        *opening += amount;
        checkpoint.opened.notify_all();
    }
}
