//! The uniform module lifecycle shared by every unit in the pipeline.
//!
//! `MemorySystem` implements [`Module`] directly, since its tick is
//! self-contained. `FetchUnit`, `SchedUnit`, and `ExecUnit` need extra
//! per-cycle context their real `tick` calls take as arguments (the
//! trace source, the instruction table, scoreboards, counters) that
//! `Module::tick`'s bare `&mut self` can't express, so they expose
//! matching inherent methods (`name`, `pending`, `reset`,
//! `three_valued`) alongside bespoke `tick`/`tock` signatures instead
//! of formally implementing the trait. `Cpu::simulate` still drives all
//! four in one fixed order (`MemorySystem`, `ExecUnit`, `SchedUnit`,
//! `FetchUnit`) each cycle — tick on every unit, then tock on every
//! unit — so no unit ever observes another's `tock`-phase update during
//! the same cycle's `tick`. [`Phase`] makes that discipline checkable
//! instead of merely documented: a unit that tracks its own phase can
//! assert it never double-ticks or double-tocks.

use std::fmt;

/// Which half of the current cycle a module believes it is in.
///
/// Units that expose phase-aware cross-module notifications
/// (`SchedUnit::branch_resolved`, `FetchUnit::branch_resolved`) consult
/// their own `Phase` to decide between an immediate update and a
/// deferred one, per the concurrency model's phase-alternation
/// invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    /// Between the end of the previous `tock` and the next `tick`.
    #[default]
    Tock,
    /// Between `tick` and the following `tock` within the same cycle.
    Tick,
}

/// Compact per-structure occupancy rendering for trace dumps.
///
/// Maps a structural unit's committed-side occupancy to one of three
/// values so a whole pipeline's state fits on one terminal line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreeValued {
    /// Nothing occupies the structure.
    Empty,
    /// The structure holds something but is below capacity.
    Partial,
    /// The structure is at its configured capacity.
    Full,
}

impl fmt::Display for ThreeValued {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            ThreeValued::Empty => '-',
            ThreeValued::Partial => 'P',
            ThreeValued::Full => 'F',
        };
        write!(f, "{c}")
    }
}

/// The lifecycle every structural unit of the simulator implements.
///
/// `reset`/`tick`/`tock` drive the simulation; `pending` feeds the
/// outer loop's EOF/deadlock conditions; the two snapshot operations
/// feed `-t detailed` and `-t three-valued` trace dumps.
pub trait Module {
    /// Re-initialize for a fresh run. Called once before cycle 1.
    fn reset(&mut self);

    /// Compute this cycle's next state from current peer state. May
    /// write into `pending` sides of owned `BufferedQueue`s and into
    /// deferred scalar fields, but must not mutate anything a peer
    /// could have already read this cycle.
    fn tick(&mut self);

    /// Commit the state computed during `tick`: flush buffered queues,
    /// copy deferred scalars into current, and take occupancy samples.
    fn tock(&mut self);

    /// Count of in-flight work this unit still holds. The outer loop's
    /// EOF condition and the deadlock watchdog both consult this.
    fn pending(&self) -> usize;

    /// Stable name used in log messages and pending-work warnings.
    fn name(&self) -> &'static str;

    /// Write a verbose, human-readable snapshot of internal state.
    fn print_state_detailed(&self, out: &mut dyn fmt::Write);

    /// Column values for a `-t three-valued` trace row, one per
    /// structural element this unit owns (in the same order as
    /// `get_state_three_valued_header`).
    fn get_state_three_valued(&self) -> Vec<ThreeValued>;

    /// Column headers matching `get_state_three_valued`'s order; each
    /// header is itself a sequence of characters printed vertically
    /// above the column (see `Cpu::print_state_three_valued`).
    fn get_state_three_valued_header(&self) -> Vec<&'static str>;
}
