mod barrier;
mod sleep;
mod spin;

pub use barrier::{Role, TicketBarrier};
pub use sleep::SleepGate;
pub use spin::SpinGate;

/// A set of numbered checkpoints that parties pass by paying a toll.
///
/// Both implementations serve the same protocol: one side grants an opening
/// of `n` tokens on a checkpoint, the other side's `n` parties each pay a
/// toll of one (or one party pays `n` to collect all completions). Which one
/// to deploy is a latency/power trade: `SpinGate` burns a core to shave the
/// wake-up round trip off every micro-phase, `SleepGate` parks the thread in
/// the OS.
///
/// Every implementation must publish with Release on the grant and consume
/// with Acquire on the pay, so that buffer writes made before a grant are
/// visible to whoever collects the toll.
pub trait Gate: Send + Sync + 'static {
    /// Creates a gate with `checkpoints` independent openings, all closed.
    fn with_checkpoints(checkpoints: usize) -> Self
    where
        Self: Sized;

    /// Blocks the caller until `toll` tokens can be taken from checkpoint
    /// `id` without driving its opening negative, then takes them.
    ///
    /// # Panics
    /// Panics if `id` is out of range or `toll` is negative.
    fn pay_toll(&self, id: usize, toll: i32);

    /// Adds `amount` tokens to checkpoint `id`.
    ///
    /// `exclusive` must be set when several parties may grant the same
    /// checkpoint concurrently and the implementation's add is not already
    /// a single atomic operation.
    ///
    /// # Panics
    /// Panics if `id` is out of range or `amount` is negative.
    fn grant_opening(&self, id: usize, amount: i32, exclusive: bool);
}
