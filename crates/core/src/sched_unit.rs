//! Schedule: drains up to `dispatch_rate` fetched instructions per
//! cycle, in program order, into their mapped functional unit.
//!
//! Sits between `FetchUnit` and `ExecUnit` and enforces three
//! in-order stalls: a flush instruction may not dispatch while any
//! older instruction is still in flight; a structural conflict with
//! an already-dispatched-but-unretired instruction (see
//! [`crate::instruction::Instruction::conflicts_with`]) blocks
//! dispatch the same way; and, under the no-prediction policy, once a
//! branch has dispatched, nothing newer may dispatch until `ExecUnit`
//! reports it resolved.

use serde::Deserialize;

use crate::counter::Counter;
use crate::exec_unit::ExecUnit;
use crate::fetch_unit::FetchUnit;
use crate::instruction::{Instruction, InstrId};
use crate::memory_system::MemorySystem;
use crate::module::Phase;

/// The two branch policies a trace replay can be configured with.
///
/// Both assume the trace is already the resolved, correct dynamic
/// path; the difference is purely in what `SchedUnit`/`FetchUnit` do
/// with a dispatched-but-unretired branch. `Perfect` never stalls on
/// one (the machine is assumed to always guess right); `NoPrediction`
/// stalls fetch and dispatch until the branch retires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPrediction {
    Perfect,
    NoPrediction,
}

pub struct SchedUnit {
    dispatch_rate: usize,
    policy: BranchPrediction,
    in_flight: Vec<Instruction>,
    pending_branch: Option<InstrId>,
    phase: Phase,
}

impl SchedUnit {
    pub fn new(dispatch_rate: usize, policy: BranchPrediction) -> Self {
        Self {
            dispatch_rate,
            policy,
            in_flight: Vec::new(),
            pending_branch: None,
            phase: Phase::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        "SC"
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.pending_branch = None;
        self.phase = Phase::default();
    }

    /// True while a dispatched-but-unresolved branch blocks further
    /// dispatch; `FetchUnit::tick`'s `hold_for_branch` argument.
    pub fn hold_for_branch(&self) -> bool {
        self.pending_branch.is_some()
    }

    /// Drain up to `dispatch_rate` fetched slots this cycle. `fetch`
    /// supplies the next instruction ids (or `None` holes left by a
    /// fetch-side stall); `instructions` is the canonical decode
    /// table; a `None`-hole or a blocking condition ends this cycle's
    /// loop early since dispatch is strictly in order.
    pub fn tick(
        &mut self,
        fetch: &mut FetchUnit,
        instructions: &std::collections::HashMap<InstrId, Instruction>,
        exec: &mut ExecUnit,
        mem: &mut MemorySystem,
        counter: &mut Counter,
    ) -> Result<(), crate::common::SimError> {
        debug_assert_eq!(self.phase, Phase::Tock, "tick called out of phase");
        self.phase = Phase::Tick;

        for retired in exec.take_retired() {
            if self.pending_branch == Some(retired) {
                self.pending_branch = None;
                fetch.branch_resolved();
            }
            self.in_flight.retain(|i| i.id != retired);
        }

        if self.hold_for_branch() {
            counter.bump_stall(self.name());
            return Ok(());
        }

        for _ in 0..self.dispatch_rate {
            let Some(slot) = fetch.peek() else {
                break;
            };
            let Some(id) = *slot else {
                // A fetch-side placeholder: nothing to dispatch this
                // slot, and since dispatch is in order nothing past it
                // can proceed either.
                fetch.dequeue();
                counter.bump_stall(self.name());
                break;
            };
            let instr = instructions
                .get(&id)
                .expect("fetched id missing from instruction table");

            if instr.is_nop {
                fetch.dequeue();
                counter.retired_instruction_count += 1;
                continue;
            }

            if instr.is_flush && !self.in_flight.is_empty() {
                counter.bump_stall(self.name());
                break;
            }
            if self.in_flight.iter().any(|other| other.conflicts_with(instr)) {
                counter.bump_stall(self.name());
                break;
            }

            if !exec.dispatch(instr, mem)? {
                counter.bump_stall(self.name());
                break;
            }

            fetch.dequeue();
            self.in_flight.push(instr.clone());
            if instr.is_branch && self.policy == BranchPrediction::NoPrediction {
                self.pending_branch = Some(instr.id);
                break;
            }
        }
        Ok(())
    }

    pub fn tock(&mut self) {
        debug_assert_eq!(self.phase, Phase::Tick, "tock called out of phase");
        self.phase = Phase::Tock;
    }

    pub fn three_valued(&self) -> crate::module::ThreeValued {
        if self.in_flight.is_empty() {
            crate::module::ThreeValued::Empty
        } else {
            crate::module::ThreeValued::Partial
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn exec_with_alu() -> ExecUnit {
        let mut pipe_map = HashMap::new();
        pipe_map.insert("add".to_string(), "alu".to_string());
        pipe_map.insert("beq".to_string(), "alu".to_string());
        let units = std::collections::HashMap::from([crate::exec_unit::scalar_unit(
            "alu", 1, None, None,
        )]);
        ExecUnit::new(pipe_map, units, 4, None, None, &[], &[], None, None, &[], &[])
    }

    #[test]
    fn nop_retires_without_dispatch() {
        let mut sched = SchedUnit::new(4, BranchPrediction::NoPrediction);
        let mut fetch = FetchUnit::new(1, 4, None);
        let mut instructions = HashMap::new();
        let mut alloc = crate::instruction::InstrIdAllocator::default();
        let mut exec = exec_with_alu();
        let mut mem = MemorySystem::new(vec![], 10);
        let mut counter = Counter::default();

        let trace_json = "{\"addr\":0,\"mnemonic\":\"nop\"}\n";
        let mut trace = crate::trace_source::JsonLineTraceSource::new(std::io::Cursor::new(trace_json));
        fetch
            .tick(&mut trace, &mut instructions, &mut alloc, false, &mut counter)
            .unwrap();
        fetch.tock();

        sched
            .tick(&mut fetch, &instructions, &mut exec, &mut mem, &mut counter)
            .unwrap();
        assert_eq!(counter.retired_instruction_count, 1);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn branch_stalls_further_dispatch_until_resolved() {
        let mut sched = SchedUnit::new(4, BranchPrediction::NoPrediction);
        let mut fetch = FetchUnit::new(2, 4, None);
        let mut instructions = HashMap::new();
        let mut alloc = crate::instruction::InstrIdAllocator::default();
        let mut counter = Counter::default();
        let trace_json = "{\"addr\":0,\"mnemonic\":\"beq\"}\n{\"addr\":4,\"mnemonic\":\"add\"}\n";
        let mut trace = crate::trace_source::JsonLineTraceSource::new(std::io::Cursor::new(trace_json));
        fetch
            .tick(&mut trace, &mut instructions, &mut alloc, false, &mut counter)
            .unwrap();
        fetch.tock();

        let mut exec = exec_with_alu();
        let mut mem = MemorySystem::new(vec![], 10);
        sched
            .tick(&mut fetch, &instructions, &mut exec, &mut mem, &mut counter)
            .unwrap();
        assert!(sched.hold_for_branch());
        assert_eq!(fetch.pending(), 1, "the add behind the branch stays queued");
    }

    #[test]
    fn perfect_prediction_never_stalls_on_a_branch() {
        let mut sched = SchedUnit::new(4, BranchPrediction::Perfect);
        let mut fetch = FetchUnit::new(2, 4, None);
        let mut instructions = HashMap::new();
        let mut alloc = crate::instruction::InstrIdAllocator::default();
        let mut counter = Counter::default();
        let trace_json = "{\"addr\":0,\"mnemonic\":\"beq\"}\n{\"addr\":4,\"mnemonic\":\"add\"}\n";
        let mut trace = crate::trace_source::JsonLineTraceSource::new(std::io::Cursor::new(trace_json));
        fetch
            .tick(&mut trace, &mut instructions, &mut alloc, false, &mut counter)
            .unwrap();
        fetch.tock();

        let mut exec = exec_with_alu();
        let mut mem = MemorySystem::new(vec![], 10);
        sched
            .tick(&mut fetch, &instructions, &mut exec, &mut mem, &mut counter)
            .unwrap();
        assert!(!sched.hold_for_branch());
        assert_eq!(sched.pending(), 2, "both instructions dispatched in the same cycle");
    }
}
