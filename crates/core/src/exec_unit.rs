//! Execution: owns every functional unit's scoreboard and pipeline.
//! Each pipeline issues its own dispatched instructions' memory access
//! to the [`MemorySystem`] once a slice reaches its configured
//! `load_stage`/`store_stage`; `ExecUnit` itself only routes dispatch
//! and collects retirement.
//!
//! `ExecUnit::tick` runs before `SchedUnit`'s and after
//! `MemorySystem`'s in the fixed counter-to-instruction-flow unit
//! order (§5), so it always observes last cycle's committed dispatch
//! queues and this cycle's freshly-ticked (but not yet flushed) memory
//! replies from the cycle before.

use std::collections::{HashMap, HashSet};

use crate::common::SimError;
use crate::counter::Counter;
use crate::instruction::{Instruction, InstrId, Lmul, RegisterFileKind};
use crate::memory_system::MemorySystem;
use crate::pipeline::scalar::RegAccess;
use crate::pipeline::vector::{vec_reg_seq, SliceAccess, VectorDispatch};
use crate::pipeline::{ScalarPipeline, VectorPipeline};
use crate::scoreboard::scalar::{ScalarRegisterArena, ScalarScoreboard};
use crate::scoreboard::vector::{VectorRegisterArena, VectorScoreboard};

/// One functional unit's kind of pipeline.
pub(crate) enum Kind {
    Scalar(ScalarPipeline),
    Vector(VectorPipeline),
}

pub struct ExecUnit {
    pipe_map: HashMap<String, String>,
    units: HashMap<String, Kind>,
    vector_slices: u16,

    scalar_arena: ScalarRegisterArena,
    scalar_scoreboard: ScalarScoreboard,
    scalar_access: HashMap<InstrId, RegAccess>,

    vector_arena: VectorRegisterArena,
    vector_scoreboard: VectorScoreboard,
    vector_registered: HashSet<InstrId>,

    retired_ids: Vec<InstrId>,
}

impl ExecUnit {
    pub fn new(
        pipe_map: HashMap<String, String>,
        units: HashMap<String, Kind>,
        vector_slices: u16,
        scalar_read_ports: Option<usize>,
        scalar_write_ports: Option<usize>,
        scalar_dedicated_read: &[String],
        scalar_dedicated_write: &[String],
        vector_read_ports: Option<usize>,
        vector_write_ports: Option<usize>,
        vector_dedicated_read: &[String],
        vector_dedicated_write: &[String],
    ) -> Self {
        let mut scalar_arena = ScalarRegisterArena::default();
        let scalar_scoreboard = crate::scoreboard::scalar::new_scalar_scoreboard(
            &mut scalar_arena,
            scalar_read_ports,
            scalar_write_ports,
            scalar_dedicated_read,
            scalar_dedicated_write,
        );
        let mut vector_arena = VectorRegisterArena::default();
        let vector_scoreboard = crate::scoreboard::vector::new_vector_scoreboard(
            &mut vector_arena,
            vector_slices,
            vector_read_ports,
            vector_write_ports,
            vector_dedicated_read,
            vector_dedicated_write,
        );
        Self {
            pipe_map,
            units,
            vector_slices,
            scalar_arena,
            scalar_scoreboard,
            scalar_access: HashMap::new(),
            vector_arena,
            vector_scoreboard,
            vector_registered: HashSet::new(),
            retired_ids: Vec::new(),
        }
    }

    fn queue_id_for(&self, mnemonic: &str) -> Result<&str, SimError> {
        self.pipe_map
            .get(mnemonic)
            .map(String::as_str)
            .ok_or_else(|| SimError::UnknownMnemonic(mnemonic.to_string()))
    }

    /// Try to admit `instr` into its mapped functional unit's EIQ.
    /// `Ok(false)` means the EIQ is full this cycle; the caller (in
    /// strict program order) must retry the same instruction next
    /// cycle rather than advance.
    pub fn dispatch(&mut self, instr: &Instruction, _mem: &mut MemorySystem) -> Result<bool, SimError> {
        let queue_id = self.queue_id_for(&instr.mnemonic)?.to_string();
        let unit = self
            .units
            .get_mut(&queue_id)
            .ok_or_else(|| SimError::UnknownMnemonic(instr.mnemonic.clone()))?;

        let admitted = match unit {
            Kind::Scalar(pipe) => {
                if !self.scalar_access.contains_key(&instr.id) {
                    let reads = instr
                        .inputs_by_type
                        .get(&RegisterFileKind::Scalar)
                        .cloned()
                        .unwrap_or_default();
                    let writes = instr
                        .outputs_by_type
                        .get(&RegisterFileKind::Scalar)
                        .cloned()
                        .unwrap_or_default();
                    let reads = self.scalar_arena.intern_all(&reads);
                    let writes = self.scalar_arena.intern_all(&writes);
                    self.scalar_scoreboard.insert_accesses(instr.id, &reads, &writes);
                    self.scalar_access.insert(instr.id, RegAccess { reads, writes });
                }
                pipe.try_dispatch(instr.id)
            }
            Kind::Vector(pipe) => {
                let steps = build_vector_steps(instr, self.vector_slices, &mut self.vector_arena);
                if self.vector_registered.insert(instr.id) {
                    let all_reads: Vec<_> = steps.iter().flat_map(|s| s.reads.iter().copied()).collect();
                    let all_writes: Vec<_> =
                        steps.iter().flat_map(|s| s.writes.iter().copied()).collect();
                    self.vector_scoreboard.insert_accesses(instr.id, &all_reads, &all_writes);
                }
                pipe.try_dispatch(VectorDispatch { id: instr.id, steps })
            }
        };

        Ok(admitted)
    }

    /// Every instruction that wrote back (retired) last cycle.
    /// `SchedUnit` uses this both to prune its in-flight conflict set
    /// and, for branches specifically, to release its no-prediction
    /// stall.
    pub fn take_retired(&mut self) -> Vec<InstrId> {
        std::mem::take(&mut self.retired_ids)
    }

    pub fn pending(&self) -> usize {
        self.units
            .values()
            .map(|u| match u {
                Kind::Scalar(p) => p.pending(),
                Kind::Vector(p) => p.pending(),
            })
            .sum()
    }

    /// Compact occupancy summary across every pipeline this unit owns,
    /// for a `-t three-valued` trace row.
    pub fn three_valued(&self) -> crate::module::ThreeValued {
        if self.pending() == 0 {
            crate::module::ThreeValued::Empty
        } else {
            crate::module::ThreeValued::Partial
        }
    }

    pub fn tick(
        &mut self,
        instructions: &HashMap<InstrId, Instruction>,
        mem: &mut MemorySystem,
        counter: &mut Counter,
    ) {
        let mut retired_this_cycle = Vec::new();
        for unit in self.units.values_mut() {
            match unit {
                Kind::Scalar(pipe) => {
                    let retired = pipe.tick(
                        &mut self.scalar_scoreboard,
                        &self.scalar_access,
                        instructions,
                        mem,
                        counter,
                    );
                    retired_this_cycle.extend(retired);
                }
                Kind::Vector(pipe) => {
                    let retired = pipe.tick(&mut self.vector_scoreboard, mem, counter);
                    retired_this_cycle.extend(retired);
                }
            }
        }

        for id in &retired_this_cycle {
            counter.retired_instruction_count += 1;
            if let Some(instr) = instructions.get(id) {
                if instr.is_branch {
                    counter.branch_count += 1;
                }
            }
            self.scalar_access.remove(id);
            self.vector_registered.remove(id);
            self.retired_ids.push(*id);
        }
    }

    pub fn tock(&mut self) {
        self.scalar_scoreboard.tock();
        self.vector_scoreboard.tock();
        for unit in self.units.values_mut() {
            match unit {
                Kind::Scalar(pipe) => pipe.tock(),
                Kind::Vector(pipe) => pipe.tock(),
            }
        }
    }
}

fn build_vector_steps(
    instr: &Instruction,
    config_slices: u16,
    arena: &mut VectorRegisterArena,
) -> Vec<SliceAccess> {
    let own_lmul = instr.lmul.unwrap_or(Lmul::One);
    let emul = instr.max_emul();
    let is_widening = own_lmul.as_ratio() != emul.as_ratio();
    let e = emul.slice_count(config_slices as usize) as u16;

    let input_seq = vec_reg_seq(e, is_widening);
    let output_seq = vec_reg_seq(e, false);

    let inputs = instr
        .inputs_by_type
        .get(&RegisterFileKind::Vector)
        .cloned()
        .unwrap_or_default();
    let outputs = instr
        .outputs_by_type
        .get(&RegisterFileKind::Vector)
        .cloned()
        .unwrap_or_default();

    let loads = chunk_per_slice(&instr.loads, e as usize);
    let stores = chunk_per_slice(&instr.stores, e as usize);

    (0..e as usize)
        .map(|step| {
            let in_slice = input_seq[step];
            let out_slice = output_seq[step];
            SliceAccess {
                slice: out_slice,
                reads: inputs.iter().map(|base| arena.intern(base, in_slice)).collect(),
                writes: outputs.iter().map(|base| arena.intern(base, out_slice)).collect(),
                loads: loads[step].clone(),
                stores: stores[step].clone(),
            }
        })
        .collect()
}

/// Split a vector instruction's flat per-element access list into `e`
/// equal shares, one per slice (`per_slice_count = accesses.len() / e`).
/// Empty for scalar instructions or accesses that don't divide evenly
/// per element group (e.g. a whole-register load).
fn chunk_per_slice(accesses: &[u64], e: usize) -> Vec<Vec<u64>> {
    if accesses.is_empty() || e == 0 || accesses.len() % e != 0 {
        return vec![Vec::new(); e];
    }
    let per_slice = accesses.len() / e;
    accesses.chunks(per_slice).map(<[u64]>::to_vec).collect()
}

/// Constructs the named functional units from config-resolved shapes.
/// Kept free so `Cpu::new` can build the map without `ExecUnit`
/// exposing its private `Kind` enum.
pub(crate) fn scalar_unit(
    name: impl Into<String>,
    latency: usize,
    eiq_capacity: Option<usize>,
    wbq_capacity: Option<usize>,
) -> (String, Kind) {
    scalar_unit_with_memory(name, latency, eiq_capacity, wbq_capacity, None, None, None, None)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn scalar_unit_with_memory(
    name: impl Into<String>,
    latency: usize,
    eiq_capacity: Option<usize>,
    wbq_capacity: Option<usize>,
    load_stage: Option<usize>,
    fixed_load_latency: Option<usize>,
    store_stage: Option<usize>,
    fixed_store_latency: Option<usize>,
) -> (String, Kind) {
    let name = name.into();
    (
        name.clone(),
        Kind::Scalar(ScalarPipeline::with_memory(
            name,
            latency,
            eiq_capacity,
            wbq_capacity,
            load_stage,
            fixed_load_latency,
            store_stage,
            fixed_store_latency,
        )),
    )
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn vector_unit_with_memory(
    name: impl Into<String>,
    depth: usize,
    eiq_capacity: Option<usize>,
    wbq_capacity: Option<usize>,
    load_stage: Option<usize>,
    fixed_load_latency: Option<usize>,
    store_stage: Option<usize>,
    fixed_store_latency: Option<usize>,
) -> (String, Kind) {
    let name = name.into();
    (
        name.clone(),
        Kind::Vector(VectorPipeline::with_memory(
            name,
            depth,
            eiq_capacity,
            wbq_capacity,
            load_stage,
            fixed_load_latency,
            store_stage,
            fixed_store_latency,
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstrId;
    use std::collections::HashMap as Map;

    fn make_instr(id: u64, mnemonic: &str) -> Instruction {
        Instruction {
            id: InstrId(id),
            mnemonic: mnemonic.to_string(),
            addr: 0,
            operands: vec![],
            is_branch: mnemonic == "beq",
            is_flush: false,
            is_nop: false,
            is_vctrl: false,
            inputs_by_type: Map::new(),
            outputs_by_type: Map::new(),
            loads: vec![],
            stores: vec![],
            lmul: None,
        }
    }

    #[test]
    fn unmapped_mnemonic_is_a_fatal_error() {
        let mut pipe_map = HashMap::new();
        pipe_map.insert("add".to_string(), "alu".to_string());
        let units = HashMap::from([scalar_unit("alu", 1, None, None)]);
        let mut exec = ExecUnit::new(pipe_map, units, 4, None, None, &[], &[], None, None, &[], &[]);
        let mut mem = MemorySystem::new(vec![], 10);
        let instr = make_instr(1, "totally_unknown");
        assert!(matches!(
            exec.dispatch(&instr, &mut mem),
            Err(SimError::UnknownMnemonic(_))
        ));
    }

    #[test]
    fn dispatch_admits_into_the_mapped_unit() {
        let mut pipe_map = HashMap::new();
        pipe_map.insert("add".to_string(), "alu".to_string());
        let units = HashMap::from([scalar_unit("alu", 1, None, None)]);
        let mut exec = ExecUnit::new(pipe_map, units, 4, None, None, &[], &[], None, None, &[], &[]);
        let mut mem = MemorySystem::new(vec![], 10);
        let instr = make_instr(1, "add");
        assert_eq!(exec.dispatch(&instr, &mut mem).unwrap(), true);
        assert_eq!(exec.pending(), 1);
    }
}
