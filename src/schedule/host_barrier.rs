// schedule/host_barrier.rs — Strategy A: one invocation per wave.
//
//   for w in 0..wave_count:
//       spawn min(units, |wave w|) threads, tiles dealt round-robin
//       join them all            ← the barrier
//
// Joining the scope is what makes wave w's pixels visible to wave w+1: a
// thread's writes happen-before the return of `join` on it. Units inside one
// wave touch disjoint tiles and read only tiles of earlier waves, so they
// need no coordination at all.
//
// Spawning fresh threads per wave is the CPU analogue of a kernel launch:
// the fixed per-wave cost is what strategy B competes against.

use std::sync::Arc;
use std::thread;

use tracing::{debug, trace};

use crate::completion::CompletionState;
use crate::error::PredError;
use crate::grid::TileGrid;
use crate::plane::SharedPlane;
use crate::predict::TilePredictor;
use crate::schedule::{check_completion_len, Scheduler, Strategy};
use crate::wave::{WaveOrder, WaveSpan};

/// Per-wave launches separated by host-side joins.
pub struct HostBarrierScheduler<P> {
    grid: TileGrid,
    order: Arc<WaveOrder>,
    units: usize,
    predictor: P,
}

impl<P: TilePredictor> HostBarrierScheduler<P> {
    /// `units` caps the number of threads per wave (at least 1 is used).
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
        Ok(HostBarrierScheduler { grid, order, units: units.max(1), predictor })
    }

    pub fn units(&self) -> usize {
        self.units
    }

    /// Launch one wave and wait for all of its units.
    fn run_wave(
        &self,
        span: WaveSpan,
        plane: &SharedPlane,
        completion: &CompletionState,
    ) -> Result<(), PredError> {
        let workers = self.units.min(span.len);
        let grid = &self.grid;
        let predictor = &self.predictor;

        thread::scope(|s| -> Result<(), PredError> {
            let mut handles = Vec::with_capacity(workers);
            for unit in 0..workers {
                let handle = thread::Builder::new()
                    .name(format!("wave{}-unit{unit}", span.wave))
                    .spawn_scoped(s, move || {
                        for i in (unit..span.len).step_by(workers) {
                            let tile = span.tile(i);
                            predictor.predict(grid, plane, tile);
                            completion.publish(grid.index_of(tile));
                        }
                    })
                    .map_err(|e| {
                        PredError::dispatch(format!(
                            "failed to launch unit {unit} of wave {}: {e}",
                            span.wave
                        ))
                    })?;
                handles.push(handle);
            }

            let mut panicked = 0usize;
            for handle in handles {
                if handle.join().is_err() {
                    panicked += 1;
                }
            }
            if panicked > 0 {
                return Err(PredError::dispatch(format!(
                    "{panicked} unit(s) of wave {} panicked",
                    span.wave
                )));
            }
            Ok(())
        })
    }
}

impl<P: TilePredictor> Scheduler for HostBarrierScheduler<P> {
    fn strategy(&self) -> Strategy {
        Strategy::HostBarrier
    }

    fn run_pass(
        &self,
        plane: &SharedPlane,
        completion: &mut CompletionState,
    ) -> Result<(), PredError> {
        check_completion_len(completion, self.grid.len())?;
        completion.reset();
        let completion = &*completion;

        let mut launches = 0usize;
        for &span in self.order.spans() {
            if span.is_empty() {
                continue;
            }
            trace!(wave = span.wave, offset_y = span.offset_y, len = span.len, "launch wave");
            self.run_wave(span, plane, completion)?;
            launches += 1;
        }

        debug!(launches, tiles = self.grid.len(), "host-barrier pass complete");
        Ok(())
    }
}
