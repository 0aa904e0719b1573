// schedule/mod.rs — CPU execution of a full-grid prediction pass.
//
// Two strategies enforce the wave dependency order:
//
//   HostBarrier     one invocation per wave; the host joins every unit of
//                   wave w before launching wave w+1. Units never wait on
//                   each other. `wave_count` launches per pass.
//
//   DeviceResident  one invocation for the whole grid; every unit busy-waits
//                   on its neighbours' completion flags, predicts, then
//                   publishes its own flag. No host round trips, but a unit
//                   can only make progress if the units it waits on are
//                   actually running.
//
// On the CPU an "execution unit" is an OS thread inside `std::thread::scope`.
// The plane and completion flags are borrowed by the units for exactly the
// lifetime of the scope, so nothing outlives the pass.

pub mod device_resident;
pub mod host_barrier;

use std::fmt;
use std::str::FromStr;

use crate::completion::CompletionState;
use crate::error::PredError;
use crate::plane::SharedPlane;

pub use device_resident::{DeviceResidentScheduler, DispatchHint};
pub use host_barrier::HostBarrierScheduler;

/// Synchronisation strategy for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Strategy A: per-wave invocations separated by host barriers.
    HostBarrier,
    /// Strategy B: one invocation, neighbour flags spun on inside it.
    DeviceResident,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::HostBarrier, Strategy::DeviceResident];

    /// Short label used in reports and thread names.
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::HostBarrier => "host-barrier",
            Strategy::DeviceResident => "device-resident",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Strategy {
    type Err = PredError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host-barrier" | "a" | "A" => Ok(Strategy::HostBarrier),
            "device-resident" | "b" | "B" => Ok(Strategy::DeviceResident),
            other => Err(PredError::config(format!("unknown strategy '{other}'"))),
        }
    }
}

/// A strategy bound to a grid and a predictor.
pub trait Scheduler {
    fn strategy(&self) -> Strategy;

    /// Predict every tile of `plane` in place.
    ///
    /// `completion` must hold one flag per tile. It is reset at the start of
    /// the pass; on success every flag is set when this returns.
    ///
    /// # Errors
    /// Any failure aborts the pass and leaves `plane` partially written.
    fn run_pass(
        &self,
        plane: &SharedPlane,
        completion: &mut CompletionState,
    ) -> Result<(), PredError>;
}

pub(crate) fn check_completion_len(
    completion: &CompletionState,
    tiles: usize,
) -> Result<(), PredError> {
    if completion.len() != tiles {
        return Err(PredError::config(format!(
            "completion state holds {} flags for a grid of {tiles} tiles",
            completion.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse_and_display() {
        for s in Strategy::ALL {
            assert_eq!(s.label().parse::<Strategy>().unwrap(), s);
            assert_eq!(s.to_string(), s.label());
        }
        assert_eq!("A".parse::<Strategy>().unwrap(), Strategy::HostBarrier);
        assert!("wavefront".parse::<Strategy>().is_err());
    }
}
