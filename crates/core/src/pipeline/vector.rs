//! A vector functional unit: a single `depth`-stage shift register
//! streaming one element group ("slice") per cycle, fed by a lone
//! admission cursor (`inflight`) when an instruction's element-group
//! count `E(i) = ceil(lmul * slices)` exceeds one.
//!
//! Only one vector instruction occupies the admission cursor at a
//! time — a later instruction cannot begin until the current one has
//! fed every slice into stage 0 — but the stage array itself streams
//! independently of admission, so a slice stalled on a slow memory
//! reply holds the whole pipe rather than just its own slot (matching
//! the scalar pipeline's single shift-register discipline).

use std::collections::{HashMap, VecDeque};

use crate::buffered_queue::BufferedQueue;
use crate::counter::Counter;
use crate::instruction::InstrId;
use crate::memory_system::{MemorySystem, RequestId};
use crate::pipeline::mem_port::MemPort;
use crate::scoreboard::vector::{VectorScoreboard, VectorToken};

/// One element group's register tokens and memory addresses, already
/// resolved for any widening-operand slice repetition and chunked to
/// this slice's share of the instruction's full access list.
#[derive(Clone, Debug, Default)]
pub struct SliceAccess {
    pub slice: u16,
    pub reads: Vec<VectorToken>,
    pub writes: Vec<VectorToken>,
    pub loads: Vec<u64>,
    pub stores: Vec<u64>,
}

/// A dispatched vector instruction: its full per-element-group access
/// sequence, `E(i)` entries long.
#[derive(Clone, Debug)]
pub struct VectorDispatch {
    pub id: InstrId,
    pub steps: Vec<SliceAccess>,
}

struct Inflight {
    id: InstrId,
    steps: Vec<SliceAccess>,
    next: usize,
}

type StageCell = Option<(InstrId, SliceAccess)>;

pub struct VectorPipeline {
    name: String,
    eiq: BufferedQueue<VectorDispatch>,
    stage: VecDeque<StageCell>,
    wbq: BufferedQueue<(InstrId, SliceAccess)>,
    inflight: Option<Inflight>,
    remaining: HashMap<InstrId, usize>,
    load_stage: Option<usize>,
    fixed_load_latency: usize,
    stalling_loads: MemPort<(InstrId, u16)>,
    store_stage: Option<usize>,
    fixed_store_latency: usize,
    stalling_stores: MemPort<(InstrId, u16)>,
}

impl VectorPipeline {
    pub fn new(
        name: impl Into<String>,
        depth: usize,
        eiq_capacity: Option<usize>,
        wbq_capacity: Option<usize>,
    ) -> Self {
        Self::with_memory(name, depth, eiq_capacity, wbq_capacity, None, None, None, None)
    }

    /// Like [`VectorPipeline::new`] but also wires the stage-keyed
    /// memory timing, symmetric to [`crate::pipeline::scalar::ScalarPipeline::with_memory`]:
    /// a slice's load/store is issued once it reaches `load_stage`/
    /// `store_stage` and checked for a reply `fixed_load_latency`/
    /// `fixed_store_latency` stages later.
    pub fn with_memory(
        name: impl Into<String>,
        depth: usize,
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
            stage: std::iter::repeat(None).take(depth.max(1)).collect(),
            wbq: BufferedQueue::new(wbq_capacity),
            inflight: None,
            remaining: HashMap::new(),
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

    pub fn try_dispatch(&mut self, dispatch: VectorDispatch) -> bool {
        if self.eiq.is_buffer_full() {
            return false;
        }
        self.eiq.buffer(dispatch);
        true
    }

    pub fn pending(&self) -> usize {
        self.eiq.len()
            + self.stage.iter().filter(|c| c.is_some()).count()
            + self.wbq.len()
            + usize::from(self.inflight.is_some())
    }

    /// Advance one cycle. Returns instructions that have fully retired
    /// (every element group written back) this cycle.
    pub fn tick(
        &mut self,
        scoreboard: &mut VectorScoreboard,
        mem: &mut MemorySystem,
        counter: &mut Counter,
    ) -> Vec<InstrId> {
        let mut retired = Vec::new();

        // 1. Attempt writeback: at most the head, once per cycle.
        if let Some((id, access)) = self.wbq.peek().cloned() {
            if scoreboard.can_write(id, &access.writes) {
                scoreboard.write(id, &access.writes);
                self.wbq.dequeue();
                if let Some(left) = self.remaining.get_mut(&id) {
                    *left -= 1;
                    if *left == 0 {
                        self.remaining.remove(&id);
                        retired.push(id);
                    }
                }
            } else {
                counter.bump_stall(&self.name);
            }
        }

        // 2. Stall if the exit stage needs a free WBQ slot it doesn't
        // have, or a load/store is still waiting on a reply.
        let exit = self.stage.back().and_then(|c| c.clone());
        let exit_needs_wbq = exit.is_some() && self.wbq.is_buffer_full();
        let mem_stalled = self.stalling_loads.is_stalling() || self.stalling_stores.is_stalling();
        let stalled = exit_needs_wbq || mem_stalled;
        if stalled {
            counter.bump_stall(&self.name);
        }

        if !stalled {
            let exit = self.stage.pop_back().flatten();
            if let Some((id, access)) = exit {
                if !access.writes.is_empty() {
                    scoreboard.buff_write(id, &access.writes);
                }
                self.wbq.buffer((id, access));
            }
            self.stage.push_front(None);
        }

        self.do_load(mem, counter);
        self.do_store(mem, counter);

        // 3. Admission: feed exactly one slice into stage 0 per cycle,
        // gated one slice at a time.
        if self.stage[0].is_none() {
            let mut admitted = None;
            if let Some(inflight) = &self.inflight {
                let s = inflight.steps[inflight.next].clone();
                if scoreboard.can_read(inflight.id, &s.reads) {
                    admitted = Some((inflight.id, s));
                }
            }
            if let Some((id, s)) = admitted {
                scoreboard.read(id, &s.reads);
                self.stage[0] = Some((id, s));
                if let Some(inflight) = &mut self.inflight {
                    inflight.next += 1;
                    if inflight.next == inflight.steps.len() {
                        self.inflight = None;
                    }
                }
            } else if self.inflight.is_none() {
                if let Some(dispatch) = self.eiq.peek() {
                    let first = dispatch.steps[0].clone();
                    if scoreboard.can_issue(dispatch.id) && scoreboard.can_read(dispatch.id, &first.reads)
                    {
                        let dispatch = self.eiq.dequeue().unwrap();
                        scoreboard.issue(dispatch.id);
                        scoreboard.read(dispatch.id, &first.reads);
                        self.remaining.insert(dispatch.id, dispatch.steps.len());
                        let id = dispatch.id;
                        let mut steps = dispatch.steps;
                        steps.remove(0);
                        self.stage[0] = Some((id, first));
                        if !steps.is_empty() {
                            self.inflight = Some(Inflight { id, steps, next: 0 });
                        }
                    }
                }
            }
        }

        retired
    }

    /// Issue a slice's load once it reaches `load_stage`; drain the
    /// reply once it reaches `load_stage + fixed_load_latency`.
    fn do_load(&mut self, mem: &mut MemorySystem, counter: &mut Counter) {
        let Some(load_stage) = self.load_stage else { return };

        if let Some((id, access)) = self.stage.get(load_stage).and_then(|c| c.clone()) {
            if !access.loads.is_empty() && self.stalling_loads.mark_issued((id, access.slice)) {
                for &addr in &access.loads {
                    mem.issue_load(RequestId::Vector(id, access.slice), addr);
                }
            }
        }

        let check_stage = load_stage + self.fixed_load_latency;
        if let Some((id, access)) = self.stage.get(check_stage).and_then(|c| c.clone()) {
            let replied = !mem.take_load_replys(RequestId::Vector(id, access.slice)).is_empty();
            self.stalling_loads.check((id, access.slice), replied);
        }

        if self.stalling_loads.has_outstanding() {
            counter.load_stall_cycles += 1;
        }
    }

    /// Symmetric to [`VectorPipeline::do_load`] for stores.
    fn do_store(&mut self, mem: &mut MemorySystem, counter: &mut Counter) {
        let Some(store_stage) = self.store_stage else { return };

        if let Some((id, access)) = self.stage.get(store_stage).and_then(|c| c.clone()) {
            if !access.stores.is_empty() && self.stalling_stores.mark_issued((id, access.slice)) {
                for &addr in &access.stores {
                    mem.issue_store(RequestId::Vector(id, access.slice), addr);
                }
            }
        }

        let check_stage = store_stage + self.fixed_store_latency;
        if let Some((id, access)) = self.stage.get(check_stage).and_then(|c| c.clone()) {
            let replied = !mem.take_store_replys(RequestId::Vector(id, access.slice)).is_empty();
            self.stalling_stores.check((id, access.slice), replied);
        }

        if self.stalling_stores.has_outstanding() {
            counter.store_stall_cycles += 1;
        }
    }

    /// Commit this cycle's EIQ/WBQ admissions.
    pub fn tock(&mut self) {
        self.eiq.flush();
        self.wbq.flush();
    }

    pub fn three_valued(&self) -> crate::module::ThreeValued {
        if self.pending() == 0 {
            crate::module::ThreeValued::Empty
        } else if self.inflight.is_some() || self.stage.iter().any(|c| c.is_some()) {
            crate::module::ThreeValued::Full
        } else {
            crate::module::ThreeValued::Partial
        }
    }
}

/// Resolve the slice sequence a register operand visits across
/// `dest_slices` element groups. A normal operand visits every slice
/// once, in order; a narrower operand under a widening instruction
/// (whose own EMUL is half the destination's) repeats each of its
/// slices across two aligned destination slices.
pub fn vec_reg_seq(dest_slices: u16, is_narrow_operand: bool) -> Vec<u16> {
    if !is_narrow_operand {
        return (0..dest_slices).collect();
    }
    (0..dest_slices).map(|i| i / 2).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoreboard::vector::{new_vector_scoreboard, VectorRegisterArena};

    fn access(token: VectorToken, slice: u16) -> SliceAccess {
        SliceAccess {
            slice,
            reads: vec![],
            writes: vec![token],
            loads: vec![],
            stores: vec![],
        }
    }

    #[test]
    fn single_slice_instruction_retires_once_written_back() {
        let mut arena = VectorRegisterArena::default();
        let mut sb = new_vector_scoreboard(&mut arena, 2, None, None, &[], &[]);
        let mut pipe = VectorPipeline::new("VALU", 1, None, None);
        let mut counter = Counter::default();
        let mut mem = MemorySystem::new(vec![], 10);
        let id = InstrId(1);
        let t0 = arena.intern("v1", 0);
        sb.insert_accesses(id, &[], &[t0]);

        let dispatch = VectorDispatch {
            id,
            steps: vec![access(t0, 0)],
        };
        pipe.try_dispatch(dispatch);
        pipe.tock();

        // Admission into stage 0.
        pipe.tick(&mut sb, &mut mem, &mut counter);
        pipe.tock();
        // Exit handoff into WBQ.
        pipe.tick(&mut sb, &mut mem, &mut counter);
        pipe.tock();
        // Writeback.
        let retired = pipe.tick(&mut sb, &mut mem, &mut counter);
        assert_eq!(retired, vec![id]);
    }

    #[test]
    fn wide_instruction_streams_one_slice_per_cycle_into_stage_zero() {
        let mut arena = VectorRegisterArena::default();
        let mut sb = new_vector_scoreboard(&mut arena, 4, None, None, &[], &[]);
        let mut pipe = VectorPipeline::new("VALU", 2, None, None);
        let mut counter = Counter::default();
        let mut mem = MemorySystem::new(vec![], 10);
        let id = InstrId(1);
        let toks: Vec<_> = (0..4).map(|s| arena.intern("v1", s)).collect();
        sb.insert_accesses(id, &[], &toks);
        let dispatch = VectorDispatch {
            id,
            steps: (0..4u16).map(|s| access(toks[s as usize], s)).collect(),
        };
        pipe.try_dispatch(dispatch);
        pipe.tock();

        // Cycle 1: slice 0 admitted into stage 0.
        pipe.tick(&mut sb, &mut mem, &mut counter);
        pipe.tock();
        assert!(pipe.pending() > 0);
        // Cycle 2: slice 0 shifts to stage 1, slice 1 admits into stage 0 —
        // exactly one new slice per cycle, not a second lane's worth.
        pipe.tick(&mut sb, &mut mem, &mut counter);
        pipe.tock();
        assert_eq!(
            pipe.stage.iter().filter(|c| c.is_some()).count(),
            2,
            "one slice occupies each of the two stages, not a whole pass"
        );
        assert!(pipe.inflight.is_some(), "slices 2 and 3 still await admission");
    }

    #[test]
    fn narrow_operand_repeats_across_aligned_slice_pairs() {
        assert_eq!(vec_reg_seq(4, true), vec![0, 0, 1, 1]);
        assert_eq!(vec_reg_seq(4, false), vec![0, 1, 2, 3]);
    }
}
