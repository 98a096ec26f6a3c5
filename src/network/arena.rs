use std::{cell::UnsafeCell, ops::Range};

/// A flat `f32` arena shared between the master and the worker threads.
///
/// There is no lock. Soundness comes from the engine's phase discipline:
/// within a phase each party only writes index ranges it has been assigned
/// (ranges are disjoint by construction), and nobody reads another party's
/// range until a gate release has ordered those writes first.
pub struct PhaseBuf {
    data: UnsafeCell<Box<[f32]>>,
}

// SAFETY: All access goes through the unsafe accessors below, whose contract
//         confines every party to ranges it exclusively owns for the current
//         phase. The gates' Release/Acquire pairs publish writes across
//         phase boundaries.
unsafe impl Send for PhaseBuf {}
unsafe impl Sync for PhaseBuf {}

impl PhaseBuf {
    /// Creates a zero-filled arena of `len` values.
    pub fn new(len: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0.; len].into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        // SAFETY: The length never changes and Box's pointer is stable, so
        //         this read races with nothing.
        unsafe { (&*self.data.get()).len() }
    }

    /// Borrows `range` mutably.
    ///
    /// # Safety
    /// The caller must exclusively own `range` for the current phase: no
    /// other party may touch any index in it until the caller's next gate
    /// release.
    pub unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [f32] {
        unsafe { &mut (&mut *self.data.get())[range] }
    }

    /// Borrows `range` immutably.
    ///
    /// # Safety
    /// No party may be writing any index in `range` during the current
    /// phase, and the writes being read must have been published by a gate
    /// release the caller has since acquired.
    pub unsafe fn slice(&self, range: Range<usize>) -> &[f32] {
        unsafe { &(&*self.data.get())[range] }
    }

    /// Reads one value.
    ///
    /// # Safety
    /// Same contract as [`slice`](Self::slice) for the single index.
    pub unsafe fn get(&self, index: usize) -> f32 {
        unsafe { (&*self.data.get())[index] }
    }

    /// Zeroes the whole arena.
    ///
    /// # Safety
    /// The caller must exclusively own the entire arena, i.e. all workers
    /// are parked outside any phase.
    pub unsafe fn fill_zero(&self) {
        unsafe { (&mut *self.data.get()).fill(0.) };
    }
}
