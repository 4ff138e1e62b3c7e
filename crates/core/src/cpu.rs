//! `Cpu`: wires the four structural units into the fixed
//! counter-to-instruction-flow tick order and drives the main
//! simulation loop.
//!
//! Each cycle, every unit's `tick` runs in order (`MemorySystem`,
//! `ExecUnit`, `SchedUnit`, `FetchUnit`), then every unit's `tock`
//! runs in the same order. Running tick back-to-front relative to
//! instruction flow means a unit only ever reads a peer's state as of
//! the end of the *previous* cycle, never a same-cycle update.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::common::SimError;
use crate::counter::Counter;
use crate::exec_unit::ExecUnit;
use crate::fetch_unit::FetchUnit;
use crate::instruction::{Instruction, InstrId, InstrIdAllocator};
use crate::memory_system::MemorySystem;
use crate::module::Module;
use crate::sched_unit::SchedUnit;
use crate::trace_source::TraceSource;

/// Consecutive cycles the retired-instruction count may hold steady
/// before the watchdog declares a deadlock.
const DEADLOCK_WINDOW: u64 = 100;

pub struct Cpu {
    instructions: HashMap<InstrId, Instruction>,
    allocator: InstrIdAllocator,
    mem: MemorySystem,
    exec: ExecUnit,
    sched: SchedUnit,
    fetch: FetchUnit,
    counter: Counter,
}

impl Cpu {
    pub fn new(mem: MemorySystem, exec: ExecUnit, sched: SchedUnit, fetch: FetchUnit) -> Self {
        Self {
            instructions: HashMap::new(),
            allocator: InstrIdAllocator::default(),
            mem,
            exec,
            sched,
            fetch,
            counter: Counter::default(),
        }
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    /// True once the trace is drained and nothing remains in flight in
    /// any structural unit.
    pub fn is_done(&self) -> bool {
        self.fetch.is_exhausted()
            && self.sched.pending() == 0
            && self.exec.pending() == 0
            && self.mem.pending() == 0
    }

    /// Advance exactly one cycle: tick every structural unit in the
    /// fixed order, then tock every structural unit in the same order,
    /// and bump the cycle counter and utilization samples. Callers that
    /// need to stop early (a `--cycles`/`--instructions` bound, a trace
    /// dump between cycles) drive this directly instead of `simulate`.
    pub fn tick_once(&mut self, trace: &mut dyn TraceSource) -> Result<(), SimError> {
        self.mem.tick();
        self.exec.tick(&self.instructions, &mut self.mem, &mut self.counter);
        self.sched.tick(
            &mut self.fetch,
            &self.instructions,
            &mut self.exec,
            &mut self.mem,
            &mut self.counter,
        )?;
        self.fetch.tick(
            trace,
            &mut self.instructions,
            &mut self.allocator,
            self.sched.hold_for_branch(),
            &mut self.counter,
        )?;

        self.mem.tock();
        self.exec.tock();
        self.sched.tock();
        self.fetch.tock();

        self.counter.cycles += 1;
        self.sample_utilization();
        Ok(())
    }

    /// Run until the trace is drained and every in-flight instruction
    /// has retired, or the deadlock watchdog fires.
    pub fn simulate(&mut self, trace: &mut dyn TraceSource) -> Result<(), SimError> {
        let mut stale_cycles: u64 = 0;
        let mut last_retired = self.counter.retired_instruction_count;

        while !self.is_done() {
            self.tick_once(trace)?;

            if self.counter.retired_instruction_count == last_retired {
                stale_cycles += 1;
                if stale_cycles >= DEADLOCK_WINDOW && !self.is_done() {
                    return Err(SimError::Deadlock {
                        cycles: DEADLOCK_WINDOW,
                    });
                }
            } else {
                stale_cycles = 0;
                last_retired = self.counter.retired_instruction_count;
            }
        }
        Ok(())
    }

    /// Column headers for a `-t three-valued` trace, in the same order
    /// as [`Cpu::three_valued_row`].
    pub fn three_valued_header(&self) -> String {
        let mut s = String::new();
        for col in self.mem.get_state_three_valued_header() {
            let _ = write!(s, "{col:>3}");
        }
        let _ = write!(s, " FE SC EX");
        s
    }

    /// One row of compact per-unit occupancy for a `-t three-valued`
    /// trace, sampled as of the end of the cycle just committed.
    pub fn three_valued_row(&self) -> String {
        let mut s = String::new();
        for v in self.mem.get_state_three_valued() {
            let _ = write!(s, "{v:>3}");
        }
        let _ = write!(
            s,
            " {:>2} {:>2} {:>2}",
            self.fetch.three_valued(),
            self.sched.three_valued(),
            self.exec.three_valued()
        );
        s
    }

    fn sample_utilization(&mut self) {
        self.counter
            .sample_utilization(self.fetch.name(), self.fetch.pending(), self.fetch.pending().max(1));
        self.counter
            .sample_utilization(self.sched.name(), self.sched.pending(), self.sched.pending().max(1));
        self.counter
            .sample_utilization(self.mem.name(), self.mem.pending(), self.mem.pending().max(1));
    }

    pub fn print_report(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        self.counter.print(out)
    }

    pub fn print_state_detailed(&self, out: &mut dyn std::fmt::Write) {
        self.mem.print_state_detailed(out);
        let _ = writeln!(
            out,
            "FE: {} pending | SC: {} in-flight | EX: {} pending",
            self.fetch.pending(),
            self.sched.pending(),
            self.exec.pending()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec_unit::scalar_unit;
    use crate::sched_unit::SchedUnit;
    use crate::trace_source::JsonLineTraceSource;
    use std::io::Cursor;

    fn simple_cpu() -> Cpu {
        let mut pipe_map = HashMap::new();
        pipe_map.insert("add".to_string(), "alu".to_string());
        let units = HashMap::from([scalar_unit("alu", 1, None, None)]);
        let exec = ExecUnit::new(pipe_map, units, 4, None, None, &[], &[], None, None, &[], &[]);
        let mem = MemorySystem::new(vec![], 4);
        let sched = SchedUnit::new(1, crate::sched_unit::BranchPrediction::NoPrediction);
        let fetch = FetchUnit::new(1, 4, None);
        Cpu::new(mem, exec, sched, fetch)
    }

    #[test]
    fn a_trivial_trace_retires_every_instruction() {
        let mut cpu = simple_cpu();
        let mut trace = JsonLineTraceSource::new(Cursor::new(
            "{\"addr\":0,\"mnemonic\":\"add\"}\n{\"addr\":4,\"mnemonic\":\"add\"}\n",
        ));
        cpu.simulate(&mut trace).unwrap();
        assert_eq!(cpu.counter().retired_instruction_count, 2);
    }

    #[test]
    fn an_instruction_with_no_mapped_unit_is_a_fatal_error() {
        let mut cpu = simple_cpu();
        let mut trace = JsonLineTraceSource::new(Cursor::new("{\"addr\":0,\"mnemonic\":\"frobnicate\"}\n"));
        let err = cpu.simulate(&mut trace).unwrap_err();
        assert!(matches!(err, SimError::UnknownMnemonic(_)));
    }
}
