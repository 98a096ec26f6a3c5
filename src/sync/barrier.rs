use parking_lot::{Condvar, Mutex};

/// What a party was to the generation it waited on.
///
/// Exactly one `Leader` is handed out per generation (the arrival that
/// filled the quorum), which lets a caller pick a deterministic aggregation
/// leader without extra bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }
}

struct State {
    /// Monotonic generation counter. Replaces the classic wraparound-sentinel
    /// ticket arithmetic, which misbehaves near generation boundaries.
    generation: u64,
    /// Arrivals in the not-yet-released generation.
    arrived: u32,
    /// Parties currently inside `wait()`, awake or asleep.
    attached: u32,
    closing: bool,
}

/// A reusable counting barrier released in bunches of `parties` arrivals.
///
/// Waiters sleep in the OS; this is the cold-path counterpart of the
/// checkpoint gates, used for pool startup and teardown rendezvous rather
/// than per-micro-phase coordination.
pub struct TicketBarrier {
    parties: u32,
    state: Mutex<State>,
    released: Condvar,
    drained: Condvar,
}

impl TicketBarrier {
    /// Creates a barrier for `parties` participants per generation.
    ///
    /// # Panics
    /// Panics if `parties` is zero.
    pub fn new(parties: u32) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");

        Self {
            parties,
            state: Mutex::new(State {
                generation: 0,
                arrived: 0,
                attached: 0,
                closing: false,
            }),
            released: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    pub fn parties(&self) -> u32 {
        self.parties
    }

    /// Blocks until `parties` threads have arrived in the current
    /// generation, then releases them all and advances the generation.
    ///
    /// Returns `Role::Leader` for the single arrival that filled the quorum.
    /// Once `destroy` has begun, returns `Role::Follower` immediately
    /// without attaching.
    pub fn wait(&self) -> Role {
        let mut state = self.state.lock();
        if state.closing {
            return Role::Follower;
        }

        state.attached += 1;
        state.arrived += 1;

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            self.depart(&mut state);
            return Role::Leader;
        }

        let ticket = state.generation;
        while state.generation == ticket && !state.closing {
            self.released.wait(&mut state);
        }

        self.depart(&mut state);
        Role::Follower
    }

    /// Stops accepting generations and blocks until every attached party has
    /// departed, so the barrier can be dropped without abandoning a sleeper.
    ///
    /// Parties still waiting are woken and return `Role::Follower`.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.closing = true;
        self.released.notify_all();

        while state.attached > 0 {
            self.drained.wait(&mut state);
        }
    }

    fn depart(&self, state: &mut State) {
        state.attached -= 1;
        if state.attached == 0 && state.closing {
            self.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, mpsc},
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_one_leader_per_generation() {
        for parties in [1u32, 2, 4] {
            let barrier = Arc::new(TicketBarrier::new(parties));
            let (tx, rx) = mpsc::channel();

            let waiters: Vec<_> = (0..parties)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let tx = tx.clone();
                    thread::spawn(move || {
                        for generation in 0..2u32 {
                            tx.send((generation, barrier.wait())).unwrap();
                        }
                    })
                })
                .collect();

            let mut leaders = [0u32; 2];
            for _ in 0..parties * 2 {
                let (generation, role) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
                if role.is_leader() {
                    leaders[generation as usize] += 1;
                }
            }
            assert_eq!(leaders, [1, 1], "parties = {parties}");

            for waiter in waiters {
                waiter.join().unwrap();
            }
        }
    }

    #[test]
    fn test_late_arrival_waits_for_the_next_quorum() {
        let barrier = Arc::new(TicketBarrier::new(2));

        let peer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait())
        };
        barrier.wait();
        peer.join().unwrap();

        // Generation 1 released; a fresh arrival must not slip through.
        let (tx, rx) = mpsc::channel();
        let late = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let role = barrier.wait();
                let _ = tx.send(());
                role
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        assert!(barrier.wait().is_leader());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(late.join().unwrap(), Role::Follower);
    }

    #[test]
    fn test_destroy_drains_attached_parties() {
        let barrier = Arc::new(TicketBarrier::new(2));

        let stranded = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait())
        };

        // Give the waiter time to attach, then tear the barrier down.
        thread::sleep(Duration::from_millis(50));
        barrier.destroy();

        assert_eq!(stranded.join().unwrap(), Role::Follower);
        assert_eq!(barrier.wait(), Role::Follower);
    }

    #[test]
    fn test_single_party_barrier_never_blocks() {
        let barrier = TicketBarrier::new(1);
        assert!(barrier.wait().is_leader());
        assert!(barrier.wait().is_leader());
        barrier.destroy();
    }
}
