// completion.rs — Per-tile completion flags for device-resident scheduling.
//
// One `AtomicU32` per tile, indexed by tile linear index (tile_w * y + x).
//
// LIFECYCLE (one pass)
// ────────────────────
//   reset()    all flags → 0. Takes `&mut self`: the borrow checker proves no
//              unit of a previous pass can still be reading, which is the
//              "reset must complete before the next invocation" rule.
//   publish()  the unit that computed tile t stores 1 with Release ordering.
//              Everything it wrote to the plane before this store becomes
//              visible to any thread that later observes the 1.
//   wait()     a dependent unit spins on an Acquire load until it sees 1.
//
// Each tile is published exactly once per pass; a second publish is a
// scheduling bug and trips a debug assertion.
//
// WAITING
// ───────
// A bare spin on a contended core can starve the very thread it is waiting
// for when there are more units than hardware threads. The wait spins with
// `hint::spin_loop` for a short burst, then yields to the OS scheduler, and
// checks its deadline only every few hundred iterations so `Instant::now`
// stays off the hot path.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const NOT_DONE: u32 = 0;
const DONE: u32 = 1;

/// Spins before the waiter starts yielding its time slice.
const SPIN_BEFORE_YIELD: u32 = 64;
/// Iterations between deadline checks.
const DEADLINE_CHECK_INTERVAL: u32 = 256;

/// Bound on how long one tile waits for all of its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitLimit {
    /// Wait until the flag is set, however long that takes.
    Unbounded,
    /// Give up after this long and report a liveness timeout.
    Timeout(Duration),
}

impl WaitLimit {
    /// Absolute deadline for a wait starting now. A timeout too large to
    /// represent as an `Instant` never expires.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            WaitLimit::Unbounded => None,
            WaitLimit::Timeout(d) => Instant::now().checked_add(d),
        }
    }

    pub(crate) fn describe(self) -> String {
        match self {
            WaitLimit::Unbounded => "an unbounded wait".to_string(),
            WaitLimit::Timeout(d) => format!("{d:?}"),
        }
    }
}

/// Why a wait ended without the flag being set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAbort {
    /// The deadline passed.
    TimedOut,
    /// Another unit failed and raised the pass-wide abort flag.
    Cancelled,
}

/// Arena of per-tile completion flags, reused across passes.
#[derive(Debug)]
pub struct CompletionState {
    flags: Box<[AtomicU32]>,
}

impl CompletionState {
    /// Allocate `tiles` flags, all cleared.
    pub fn new(tiles: usize) -> Self {
        let flags = (0..tiles).map(|_| AtomicU32::new(NOT_DONE)).collect();
        CompletionState { flags }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Clear every flag. Must run before each pass.
    pub fn reset(&mut self) {
        for f in self.flags.iter_mut() {
            *f.get_mut() = NOT_DONE;
        }
    }

    /// Mark tile `index` as computed and visible.
    #[inline]
    pub fn publish(&self, index: usize) {
        let prev = self.flags[index].swap(DONE, Ordering::Release);
        debug_assert_eq!(prev, NOT_DONE, "tile {index} published twice in one pass");
    }

    /// Acquire-load the flag for tile `index`.
    #[inline]
    pub fn is_done(&self, index: usize) -> bool {
        self.flags[index].load(Ordering::Acquire) == DONE
    }

    /// Number of published tiles. Only meaningful once the pass is over.
    pub fn completed(&self) -> usize {
        self.flags.iter().filter(|f| f.load(Ordering::Acquire) == DONE).count()
    }

    pub fn all_done(&self) -> bool {
        self.completed() == self.len()
    }

    /// Block until tile `index` is published, the deadline passes, or
    /// `abort` is raised.
    pub fn wait(
        &self,
        index: usize,
        deadline: Option<Instant>,
        abort: &AtomicBool,
    ) -> Result<(), WaitAbort> {
        let mut spins: u32 = 0;
        loop {
            if self.is_done(index) {
                return Ok(());
            }
            spins = spins.wrapping_add(1);
            if spins % DEADLINE_CHECK_INTERVAL == 0 {
                if abort.load(Ordering::Relaxed) {
                    return Err(WaitAbort::Cancelled);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(WaitAbort::TimedOut);
                }
            }
            if spins < SPIN_BEFORE_YIELD {
                hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
    }
}
