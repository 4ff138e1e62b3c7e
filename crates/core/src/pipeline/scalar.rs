//! A scalar functional unit: one fixed-latency shift-register lane
//! between an issue queue and a writeback queue.

use std::collections::{HashMap, VecDeque};

use crate::buffered_queue::BufferedQueue;
use crate::counter::Counter;
use crate::instruction::{InstrId, Instruction};
use crate::memory_system::{MemorySystem, RequestId};
use crate::pipeline::mem_port::MemPort;
use crate::scoreboard::scalar::{ScalarScoreboard, ScalarToken};

/// Precomputed register tokens an instruction reads/writes, cached at
/// dispatch time so the pipeline never re-interns register names on
/// its per-cycle hot path.
#[derive(Clone, Debug, Default)]
pub struct RegAccess {
    pub reads: Vec<ScalarToken>,
    pub writes: Vec<ScalarToken>,
}

/// One scalar execute pipeline: an admission queue (EIQ), a fixed
/// number of shift-register stages, and a writeback queue (WBQ).
#[derive(Debug)]
pub struct ScalarPipeline {
    name: String,
    eiq: BufferedQueue<InstrId>,
    stages: VecDeque<Option<InstrId>>,
    wbq: BufferedQueue<InstrId>,
    load_stage: Option<usize>,
    fixed_load_latency: usize,
    stalling_loads: MemPort<InstrId>,
    store_stage: Option<usize>,
    fixed_store_latency: usize,
    stalling_stores: MemPort<InstrId>,
}

impl ScalarPipeline {
    pub fn new(
        name: impl Into<String>,
        latency: usize,
        eiq_capacity: Option<usize>,
        wbq_capacity: Option<usize>,
    ) -> Self {
        Self::with_memory(name, latency, eiq_capacity, wbq_capacity, None, None, None, None)
    }

    /// Like [`ScalarPipeline::new`] but also wires the stage-keyed
    /// memory timing: `load_stage`/`store_stage` name the absolute
    /// stage index a load/store is issued at; `fixed_load_latency`/
    /// `fixed_store_latency` name how many stages later the reply is
    /// expected. `None` disables the corresponding access kind.
    pub fn with_memory(
        name: impl Into<String>,
        latency: usize,
        eiq_capacity: Option<usize>,
        wbq_capacity: Option<usize>,
        load_stage: Option<usize>,
        fixed_load_latency: Option<usize>,
        store_stage: Option<usize>,
        fixed_store_latency: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            eiq: BufferedQueue::new(eiq_capacity),
            stages: std::iter::repeat(None).take(latency.max(1)).collect(),
            wbq: BufferedQueue::new(wbq_capacity),
            load_stage,
            fixed_load_latency: fixed_load_latency.unwrap_or(0),
            stalling_loads: MemPort::new(),
            store_stage,
            fixed_store_latency: fixed_store_latency.unwrap_or(0),
            stalling_stores: MemPort::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit `id` into the issue queue. Fails if the queue's pending
    /// side is already full this cycle.
    pub fn try_dispatch(&mut self, id: InstrId) -> bool {
        if self.eiq.is_buffer_full() {
            return false;
        }
        self.eiq.buffer(id);
        true
    }

    pub fn pending(&self) -> usize {
        self.eiq.len() + self.stages.iter().filter(|s| s.is_some()).count() + self.wbq.len()
    }

    /// Advance one cycle. `accesses` supplies each in-flight
    /// instruction's register tokens; `instructions` supplies each
    /// in-flight instruction's load/store addresses for stage-keyed
    /// memory timing. Returns instructions retired (written back) this
    /// cycle.
    pub fn tick(
        &mut self,
        scoreboard: &mut ScalarScoreboard,
        accesses: &HashMap<InstrId, RegAccess>,
        instructions: &HashMap<InstrId, Instruction>,
        mem: &mut MemorySystem,
        counter: &mut Counter,
    ) -> Vec<InstrId> {
        let mut retired = Vec::new();

        // 1. Attempt writeback: at most the head, once per cycle.
        if let Some(&id) = self.wbq.peek() {
            let empty = RegAccess::default();
            let access = accesses.get(&id).unwrap_or(&empty);
            if scoreboard.can_write(id, &access.writes) {
                scoreboard.write(id, &access.writes);
                self.wbq.dequeue();
                retired.push(id);
            } else {
                counter.bump_stall(&self.name);
            }
        }

        // 2. Stall if the exit stage needs a free WBQ slot it doesn't
        // have, or a load/store is still waiting on a reply.
        let exit = *self.stages.back().unwrap();
        let exit_needs_write =
            exit.is_some_and(|id| accesses.get(&id).is_some_and(|a| !a.writes.is_empty()));
        let mem_stalled = self.stalling_loads.is_stalling() || self.stalling_stores.is_stalling();
        let stalled = (exit_needs_write && self.wbq.is_buffer_full()) || mem_stalled;
        if stalled {
            counter.bump_stall(&self.name);
        }

        if !stalled {
            let exit = self.stages.pop_back().flatten();
            if let Some(id) = exit {
                let empty = RegAccess::default();
                let access = accesses.get(&id).unwrap_or(&empty);
                if !access.writes.is_empty() {
                    self.wbq.buffer(id);
                    scoreboard.buff_write(id, &access.writes);
                } else {
                    retired.push(id);
                }
            }
            self.stages.push_front(None);
        }

        self.do_load(instructions, mem, counter);
        self.do_store(instructions, mem, counter);

        // 3. Issue from EIQ into the freed entry stage.
        if self.stages[0].is_none() {
            if let Some(&candidate) = self.eiq.peek() {
                let empty = RegAccess::default();
                let access = accesses.get(&candidate).unwrap_or(&empty);
                if scoreboard.can_issue(candidate)
                    && scoreboard.can_read(candidate, &access.reads)
                {
                    scoreboard.read(candidate, &access.reads);
                    scoreboard.issue(candidate);
                    self.eiq.dequeue();
                    self.stages[0] = Some(candidate);
                }
            }
        }

        retired
    }

    /// Issue a load once its instruction reaches `load_stage`; drain
    /// the reply once it reaches `load_stage + fixed_load_latency`.
    fn do_load(
        &mut self,
        instructions: &HashMap<InstrId, Instruction>,
        mem: &mut MemorySystem,
        counter: &mut Counter,
    ) {
        let Some(load_stage) = self.load_stage else { return };

        if let Some(id) = self.stages.get(load_stage).copied().flatten() {
            if let Some(instr) = instructions.get(&id) {
                if !instr.loads.is_empty() && self.stalling_loads.mark_issued(id) {
                    for &addr in &instr.loads {
                        mem.issue_load(RequestId::Scalar(id), addr);
                    }
                }
            }
        }

        let check_stage = load_stage + self.fixed_load_latency;
        if let Some(id) = self.stages.get(check_stage).copied().flatten() {
            let replied = !mem.take_load_replys(RequestId::Scalar(id)).is_empty();
            self.stalling_loads.check(id, replied);
        }

        if self.stalling_loads.has_outstanding() {
            counter.load_stall_cycles += 1;
        }
    }

    /// Symmetric to [`ScalarPipeline::do_load`] for stores.
    fn do_store(
        &mut self,
        instructions: &HashMap<InstrId, Instruction>,
        mem: &mut MemorySystem,
        counter: &mut Counter,
    ) {
        let Some(store_stage) = self.store_stage else { return };

        if let Some(id) = self.stages.get(store_stage).copied().flatten() {
            if let Some(instr) = instructions.get(&id) {
                if !instr.stores.is_empty() && self.stalling_stores.mark_issued(id) {
                    for &addr in &instr.stores {
                        mem.issue_store(RequestId::Scalar(id), addr);
                    }
                }
            }
        }

        let check_stage = store_stage + self.fixed_store_latency;
        if let Some(id) = self.stages.get(check_stage).copied().flatten() {
            let replied = !mem.take_store_replys(RequestId::Scalar(id)).is_empty();
            self.stalling_stores.check(id, replied);
        }

        if self.stalling_stores.has_outstanding() {
            counter.store_stall_cycles += 1;
        }
    }

    /// Commit this cycle's EIQ/WBQ admissions, making them visible to
    /// the next cycle's `tick`.
    pub fn tock(&mut self) {
        self.eiq.flush();
        self.wbq.flush();
    }

    pub fn three_valued(&self) -> crate::module::ThreeValued {
        if self.pending() == 0 {
            crate::module::ThreeValued::Empty
        } else if self.stages.iter().all(Option::is_none) && self.wbq.is_empty() {
            crate::module::ThreeValued::Partial
        } else {
            crate::module::ThreeValued::Full
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoreboard::scalar::new_scalar_scoreboard;
    use crate::scoreboard::scalar::ScalarRegisterArena;
    use std::collections::HashMap;

    #[test]
    fn instruction_flows_from_issue_to_retirement() {
        let mut arena = ScalarRegisterArena::default();
        let mut sb = new_scalar_scoreboard(&mut arena, None, None, &[], &[]);
        let mut pipe = ScalarPipeline::new("ALU", 2, None, None);
        let mut counter = Counter::default();
        let id = InstrId(1);
        let tok = arena.intern("x1");
        sb.insert_accesses(id, &[], &[tok]);
        let mut accesses = HashMap::new();
        accesses.insert(
            id,
            RegAccess {
                reads: vec![],
                writes: vec![tok],
            },
        );
        let instructions = HashMap::new();
        let mut mem = MemorySystem::new(vec![], 10);
        pipe.try_dispatch(id);
        pipe.tock(); // commit the dispatch

        // Cycle 1: issue into stage 0.
        let r1 = pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        pipe.tock();
        assert!(r1.is_empty());
        // Cycle 2: shift into stage 1.
        pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        pipe.tock();
        // Cycle 3: exit stage hands to WBQ.
        pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        pipe.tock(); // commit the WBQ admission
        // Cycle 4: writeback attempt succeeds.
        let r4 = pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        assert_eq!(r4, vec![id]);
    }

    #[test]
    fn writeback_commits_only_the_head_per_cycle() {
        let mut arena = ScalarRegisterArena::default();
        let mut sb = new_scalar_scoreboard(&mut arena, None, None, &[], &[]);
        let mut pipe = ScalarPipeline::new("ALU", 1, None, None);
        let mut counter = Counter::default();
        let instructions = HashMap::new();
        let mut mem = MemorySystem::new(vec![], 10);
        let a = InstrId(1);
        let b = InstrId(2);
        let ta = arena.intern("x1");
        let tb = arena.intern("x2");
        sb.insert_accesses(a, &[], &[ta]);
        sb.insert_accesses(b, &[], &[tb]);
        let mut accesses = HashMap::new();
        accesses.insert(a, RegAccess { reads: vec![], writes: vec![ta] });
        accesses.insert(b, RegAccess { reads: vec![], writes: vec![tb] });

        pipe.try_dispatch(a);
        pipe.tock();
        pipe.try_dispatch(b);
        pipe.tock();

        let mut retired = Vec::new();
        for _ in 0..8 {
            if retired.len() == 2 {
                break;
            }
            let r = pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
            assert!(r.len() <= 1, "at most the WBQ head may retire in a single cycle");
            retired.extend(r);
            pipe.tock();
        }
        assert_eq!(retired, vec![a, b], "both retire, in order, one cycle apart");
    }

    #[test]
    fn load_stalls_the_pipe_until_the_reply_lands_at_the_configured_stage() {
        let mut arena = ScalarRegisterArena::default();
        let mut sb = new_scalar_scoreboard(&mut arena, None, None, &[], &[]);
        let mut pipe = ScalarPipeline::with_memory("LSU", 4, None, None, Some(1), Some(2), None, None);
        let mut counter = Counter::default();
        let id = InstrId(7);
        sb.insert_accesses(id, &[], &[]);
        let mut instructions = HashMap::new();
        instructions.insert(
            id,
            Instruction {
                id,
                mnemonic: "lw".to_string(),
                addr: 0,
                operands: vec![],
                is_branch: false,
                is_flush: false,
                is_nop: false,
                is_vctrl: false,
                inputs_by_type: HashMap::new(),
                outputs_by_type: HashMap::new(),
                loads: vec![0x100],
                stores: vec![],
                lmul: None,
            },
        );
        let accesses = HashMap::new();
        let mut mem = MemorySystem::new(vec![], 10);

        pipe.try_dispatch(id);
        pipe.tock();
        // Cycle 1: issue into stage 0.
        pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        pipe.tock();
        // Cycle 2: shift into stage 1, the load stage; issued this cycle.
        pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        pipe.tock();
        assert!(pipe.pending() > 0, "instruction still in flight");

        // Cycle 3: the reply hasn't arrived; the check stage (3) isn't
        // reached yet, so the pipe keeps shifting.
        pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        pipe.tock();
        // Cycle 4: at the check stage with no reply queued, the pipe
        // holds rather than losing the instruction.
        pipe.tick(&mut sb, &accesses, &instructions, &mut mem, &mut counter);
        assert!(pipe.pending() > 0, "instruction held, not lost");
    }
}
