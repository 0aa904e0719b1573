// schedule/device_resident.rs — Strategy B: one invocation, flag spinning.
//
// PASS
// ────
//   1. completion.reset()                      (exclusive borrow: the fill
//                                               finishes before any unit runs)
//   2. spawn `units` persistent threads
//   3. each unit loops:
//        slot  = cursor.fetch_add(1)           next dispatch slot
//        tile  = hint[slot]                    advisory slot → tile mapping
//        wait  until left / top / top-right flags are set (Acquire),
//              all three under one deadline
//        predict(tile)
//        publish(tile)                         (Release)
//
// FORWARD PROGRESS
// ────────────────
// A unit that is waiting holds its thread. If every running unit waits on a
// tile that no running unit will ever compute, the pass hangs. Two things
// keep that from happening here:
//
//   - Units claim slots from a shared cursor, so a tile is only waited on by
//     tiles claimed *after* it. With a hint that is a topological order (the
//     wave order, or plain raster order) every awaited tile is already held
//     by a running unit, whatever `units` is.
//   - With an arbitrary hint that guarantee is gone unless `units` covers the
//     whole grid (full residency). The wait is therefore bounded by a
//     `WaitLimit`; running out reports `LivenessTimeout` and raises the abort
//     flag so the remaining units stop instead of spinning on forever.
//
// The hint never affects the result, only how long units spin.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::completion::{CompletionState, WaitAbort, WaitLimit};
use crate::error::PredError;
use crate::grid::TileGrid;
use crate::plane::SharedPlane;
use crate::predict::TilePredictor;
use crate::schedule::{check_completion_len, Scheduler, Strategy};
use crate::wave::WaveOrder;

/// How dispatch slots map to tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchHint {
    /// Slot i → i-th tile of the wave-major dispatch order.
    Waves,
    /// Slot i → tile with linear index i (no hint).
    Native,
    /// Slot i → `order[i]`. Must be a permutation of the tile indices.
    Custom(Vec<u32>),
}

impl DispatchHint {
    /// The full slot → tile table for a grid covered by `order`.
    pub fn table(&self, order: &WaveOrder) -> Vec<u32> {
        match self {
            DispatchHint::Waves => order.dispatch_order().to_vec(),
            DispatchHint::Native => (0..(order.tile_w() * order.tile_h()) as u32).collect(),
            DispatchHint::Custom(slots) => slots.clone(),
        }
    }
}

/// Single-launch scheduler whose units spin on neighbour completion flags.
pub struct DeviceResidentScheduler<P> {
    grid: TileGrid,
    order: Arc<WaveOrder>,
    units: usize,
    predictor: P,
    limit: WaitLimit,
    hint: DispatchHint,
}

impl<P: TilePredictor> DeviceResidentScheduler<P> {
    /// Defaults: wave-order hint, unbounded waits.
    ///
    /// # Errors
    /// `Configuration` if `order` was built for a different grid shape.
    pub fn new(
        grid: TileGrid,
        order: Arc<WaveOrder>,
        units: usize,
        predictor: P,
    ) -> Result<Self, PredError> {
        if order.tile_w() != grid.tile_w() || order.tile_h() != grid.tile_h() {
            return Err(PredError::config(format!(
                "wave order for {}×{} tiles does not match grid {grid}",
                order.tile_w(),
                order.tile_h()
            )));
        }
        Ok(DeviceResidentScheduler {
            grid,
            order,
            units: units.max(1),
            predictor,
            limit: WaitLimit::Unbounded,
            hint: DispatchHint::Waves,
        })
    }

    /// Bound every neighbour wait.
    pub fn with_wait_limit(mut self, limit: WaitLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Replace the dispatch hint.
    ///
    /// # Errors
    /// `Configuration` if a custom order is not a permutation of the tiles.
    pub fn with_hint(mut self, hint: DispatchHint) -> Result<Self, PredError> {
        if let DispatchHint::Custom(order) = &hint {
            validate_permutation(order, self.grid.len())?;
        }
        self.hint = hint;
        Ok(self)
    }

    pub fn units(&self) -> usize {
        self.units
    }

    #[inline]
    fn tile_for_slot(&self, slot: usize) -> usize {
        match &self.hint {
            DispatchHint::Waves => self.order.dispatch_order()[slot] as usize,
            DispatchHint::Native => slot,
            DispatchHint::Custom(order) => order[slot] as usize,
        }
    }

    /// Body of one execution unit.
    fn unit_loop(
        &self,
        plane: &SharedPlane,
        completion: &CompletionState,
        cursor: &AtomicUsize,
        abort: &AtomicBool,
    ) -> Result<usize, PredError> {
        let tiles = self.grid.len();
        let mut done = 0usize;
        loop {
            if abort.load(Ordering::Relaxed) {
                return Ok(done);
            }
            let slot = cursor.fetch_add(1, Ordering::Relaxed);
            if slot >= tiles {
                return Ok(done);
            }

            let index = self.tile_for_slot(slot);
            let tile = self.grid.tile_at(index);
            // One deadline covers all of the tile's neighbours.
            let deadline = self.limit.deadline();
            for neighbor in self.grid.neighbors(tile).iter() {
                let n = self.grid.index_of(neighbor);
                match completion.wait(n, deadline, abort) {
                    Ok(()) => {}
                    // Someone else already failed; their error is the one
                    // worth reporting.
                    Err(WaitAbort::Cancelled) => return Ok(done),
                    Err(WaitAbort::TimedOut) => {
                        abort.store(true, Ordering::Relaxed);
                        return Err(PredError::LivenessTimeout {
                            tile: index,
                            limit: self.limit.describe(),
                        });
                    }
                }
            }

            self.predictor.predict(&self.grid, plane, tile);
            completion.publish(index);
            done += 1;
        }
    }
}

impl<P: TilePredictor> Scheduler for DeviceResidentScheduler<P> {
    fn strategy(&self) -> Strategy {
        Strategy::DeviceResident
    }

    fn run_pass(
        &self,
        plane: &SharedPlane,
        completion: &mut CompletionState,
    ) -> Result<(), PredError> {
        check_completion_len(completion, self.grid.len())?;
        completion.reset();
        let completion = &*completion;

        let cursor = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let units = self.units.min(self.grid.len());

        let results: Vec<Result<usize, PredError>> = thread::scope(|s| {
            let mut handles = Vec::with_capacity(units);
            let mut results = Vec::with_capacity(units);
            for unit in 0..units {
                let cursor = &cursor;
                let abort = &abort;
                let spawned = thread::Builder::new()
                    .name(format!("resident-unit{unit}"))
                    .spawn_scoped(s, move || {
                        // A unit that dies without publishing would strand
                        // its dependents, so a panic raises the abort flag.
                        panic::catch_unwind(AssertUnwindSafe(|| {
                            self.unit_loop(plane, completion, cursor, abort)
                        }))
                        .unwrap_or_else(|_| {
                            abort.store(true, Ordering::Relaxed);
                            Err(PredError::dispatch(format!("resident unit {unit} panicked")))
                        })
                    });
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        abort.store(true, Ordering::Relaxed);
                        results.push(Err(PredError::dispatch(format!(
                            "failed to launch resident unit {unit}: {e}"
                        ))));
                        break;
                    }
                }
            }
            for handle in handles {
                results.push(handle.join().unwrap_or_else(|_| {
                    abort.store(true, Ordering::Relaxed);
                    Err(PredError::dispatch("a resident unit panicked"))
                }));
            }
            results
        });

        let mut computed = 0usize;
        let mut errors = Vec::new();
        for r in results {
            match r {
                Ok(n) => computed += n,
                Err(e) => errors.push(e),
            }
        }
        if let Some(err) = first_cause(errors) {
            warn!(%err, computed, "device-resident pass aborted");
            return Err(err);
        }

        debug!(units, computed, hint = self.hint_kind(), "device-resident pass complete");
        Ok(())
    }
}

impl<P> DeviceResidentScheduler<P> {
    fn hint_kind(&self) -> &'static str {
        match self.hint {
            DispatchHint::Waves => "waves",
            DispatchHint::Native => "native",
            DispatchHint::Custom(_) => "custom",
        }
    }
}

/// Several units can fail in one pass; a liveness timeout outranks the rest.
fn first_cause(errors: Vec<PredError>) -> Option<PredError> {
    let mut fallback = None;
    for e in errors {
        if e.is_liveness() {
            return Some(e);
        }
        if fallback.is_none() {
            fallback = Some(e);
        }
    }
    fallback
}

pub(crate) fn validate_permutation(order: &[u32], tiles: usize) -> Result<(), PredError> {
    if order.len() != tiles {
        return Err(PredError::config(format!(
            "dispatch hint has {} entries for {tiles} tiles",
            order.len()
        )));
    }
    let mut seen = vec![false; tiles];
    for &t in order {
        let t = t as usize;
        if t >= tiles || seen[t] {
            return Err(PredError::config(format!(
                "dispatch hint is not a permutation (tile {t})"
            )));
        }
        seen[t] = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::Plane;
    use crate::predict::{predict_sequential, EdgePredictor};
    use std::time::Duration;

    fn setup(tw: usize, th: usize) -> (TileGrid, Arc<WaveOrder>, Plane, Plane) {
        let grid = TileGrid::new(tw, th, 8).unwrap();
        let order = Arc::new(WaveOrder::for_grid(&grid));
        let input = Plane::residual_pattern(grid.width(), grid.height(), 5);
        let expected = predict_sequential(&grid, &EdgePredictor, &input);
        (grid, order, input, expected)
    }

    #[test]
    fn test_matches_sequential_reference() {
        let (grid, order, input, expected) = setup(7, 6);
        let sched = DeviceResidentScheduler::new(grid, order, 4, EdgePredictor).unwrap();
        let plane = SharedPlane::from_plane(input);
        let mut completion = CompletionState::new(grid.len());
        sched.run_pass(&plane, &mut completion).unwrap();
        assert!(completion.all_done());
        assert_eq!(plane.into_plane(), expected);
    }

    #[test]
    fn test_native_hint_same_result() {
        let (grid, order, input, expected) = setup(5, 4);
        let sched = DeviceResidentScheduler::new(grid, order, 3, EdgePredictor)
            .unwrap()
            .with_hint(DispatchHint::Native)
            .unwrap();
        let plane = SharedPlane::from_plane(input);
        let mut completion = CompletionState::new(grid.len());
        sched.run_pass(&plane, &mut completion).unwrap();
        assert_eq!(plane.into_plane(), expected);
    }

    #[test]
    fn test_reversed_hint_with_full_residency() {
        // Every tile has its own unit, so even a hint that hands out the
        // last tile first completes.
        let (grid, order, input, expected) = setup(4, 3);
        let reversed: Vec<u32> = (0..grid.len() as u32).rev().collect();
        let sched = DeviceResidentScheduler::new(grid, order, grid.len(), EdgePredictor)
            .unwrap()
            .with_hint(DispatchHint::Custom(reversed))
            .unwrap()
            .with_wait_limit(WaitLimit::Timeout(Duration::from_secs(20)));
        let plane = SharedPlane::from_plane(input);
        let mut completion = CompletionState::new(grid.len());
        sched.run_pass(&plane, &mut completion).unwrap();
        assert_eq!(plane.into_plane(), expected);
    }

    #[test]
    fn test_reversed_hint_single_unit_times_out() {
        // One unit claims the last tile first and waits on a tile nobody
        // will ever run: the bounded wait turns the hang into an error.
        let (grid, order, input, _) = setup(4, 3);
        let reversed: Vec<u32> = (0..grid.len() as u32).rev().collect();
        let sched = DeviceResidentScheduler::new(grid, order, 1, EdgePredictor)
            .unwrap()
            .with_hint(DispatchHint::Custom(reversed))
            .unwrap()
            .with_wait_limit(WaitLimit::Timeout(Duration::from_millis(50)));
        let plane = SharedPlane::from_plane(input);
        let mut completion = CompletionState::new(grid.len());
        let err = sched.run_pass(&plane, &mut completion).unwrap_err();
        assert!(err.is_liveness(), "{err}");
        assert_eq!(completion.completed(), 0);
    }

    #[test]
    fn test_duration_max_limit_completes() {
        let (grid, order, input, expected) = setup(4, 3);
        let sched = DeviceResidentScheduler::new(grid, order, 3, EdgePredictor)
            .unwrap()
            .with_wait_limit(WaitLimit::Timeout(Duration::MAX));
        let plane = SharedPlane::from_plane(input);
        let mut completion = CompletionState::new(grid.len());
        sched.run_pass(&plane, &mut completion).unwrap();
        assert_eq!(plane.into_plane(), expected);
    }

    /// Row-0 tiles right of the origin take `delay` each; everything else is
    /// instant.
    struct SlowTopRow {
        delay: Duration,
    }

    impl TilePredictor for SlowTopRow {
        fn predict(&self, grid: &TileGrid, plane: &SharedPlane, tile: crate::grid::Tile) {
            if tile.y == 0 && tile.x > 0 {
                thread::sleep(self.delay);
            }
            EdgePredictor.predict(grid, plane, tile);
        }
    }

    #[test]
    fn test_limit_covers_all_neighbours_of_a_tile() {
        // Tile (1, 1) sees its left and top neighbours after ~150ms and its
        // top-right after ~300ms. Each gap fits in 250ms, the total does not.
        let grid = TileGrid::new(3, 2, 8).unwrap();
        let order = Arc::new(WaveOrder::for_grid(&grid));
        let sched = DeviceResidentScheduler::new(
            grid,
            order,
            grid.len(),
            SlowTopRow { delay: Duration::from_millis(150) },
        )
        .unwrap()
        .with_hint(DispatchHint::Native)
        .unwrap()
        .with_wait_limit(WaitLimit::Timeout(Duration::from_millis(250)));

        let plane = SharedPlane::new(grid.width(), grid.height());
        let mut completion = CompletionState::new(grid.len());
        let err = sched.run_pass(&plane, &mut completion).unwrap_err();
        assert!(err.is_liveness(), "{err}");
    }

    #[test]
    fn test_rejects_non_permutation_hint() {
        let (grid, order, _, _) = setup(2, 2);
        let sched = DeviceResidentScheduler::new(grid, order, 1, EdgePredictor).unwrap();
        assert!(sched.with_hint(DispatchHint::Custom(vec![0, 1, 1, 3])).is_err());

        let (grid, order, _, _) = setup(2, 2);
        let sched = DeviceResidentScheduler::new(grid, order, 1, EdgePredictor).unwrap();
        assert!(sched.with_hint(DispatchHint::Custom(vec![0, 1, 2])).is_err());
    }

    #[test]
    fn test_hint_tables() {
        let order = WaveOrder::build(4, 3);
        assert_eq!(
            DispatchHint::Waves.table(&order),
            vec![0, 1, 2, 4, 3, 5, 6, 8, 7, 9, 10, 11]
        );
        assert_eq!(DispatchHint::Native.table(&order), (0..12).collect::<Vec<u32>>());
    }

    #[test]
    fn test_first_cause_prefers_liveness() {
        let errs = vec![
            PredError::dispatch("cancelled"),
            PredError::LivenessTimeout { tile: 3, limit: "1ms".into() },
        ];
        assert!(first_cause(errs).unwrap().is_liveness());
        assert!(first_cause(Vec::new()).is_none());
    }
}
