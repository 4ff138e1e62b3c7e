//! The `Instruction` value type and its small supporting types.
//!
//! `Instruction` is produced by the external trace-ingest collaborator
//! (see [`crate::trace_source`]) and is otherwise immutable: the core
//! never mutates a fetched instruction, only the structures that hold
//! references to it (scoreboards, queues, pipeline stages) change.

use std::collections::HashMap;
use std::fmt;

/// Opaque identity assigned to an instruction at decode time.
///
/// All scoreboard maps, dispatch-queue membership, and pipeline-stage
/// occupancy are keyed by this id rather than by instruction equality,
/// matching the design note that instruction identity should be "an
/// opaque integer id handed out at decode time" rather than reference
/// equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u64);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing `InstrId`s as instructions are
/// decoded from the trace.
#[derive(Debug, Default)]
pub struct InstrIdAllocator {
    next: u64,
}

impl InstrIdAllocator {
    /// Allocate the next identity.
    pub fn alloc(&mut self) -> InstrId {
        let id = InstrId(self.next);
        self.next += 1;
        id
    }
}

/// A register file an operand can belong to.
///
/// `Csr` registers are not scoreboarded the way scalar/vector registers
/// are (no `register_files` config entry names a CSR file); instead
/// CSR reads/writes participate in [`Instruction::conflicts_with`] so
/// cross-queue reordering at least respects flat CSR ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterFileKind {
    /// General scalar integer/FP register file.
    Scalar,
    /// Vector register file (operands are sliced at the pipeline).
    Vector,
    /// Control/status registers.
    Csr,
}

/// Vector grouping factor (`LMUL`).
///
/// Represented as an exact ratio rather than a float so slice-count
/// arithmetic (`ceil(lmul * slices)`) never drifts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lmul {
    /// 1/8
    OneEighth,
    /// 1/4
    OneQuarter,
    /// 1/2
    OneHalf,
    /// 1
    One,
    /// 2
    Two,
    /// 4
    Four,
    /// 8
    Eight,
}

impl Lmul {
    /// Returns `(numerator, denominator)` of this grouping factor.
    pub fn as_ratio(self) -> (u32, u32) {
        match self {
            Lmul::OneEighth => (1, 8),
            Lmul::OneQuarter => (1, 4),
            Lmul::OneHalf => (1, 2),
            Lmul::One => (1, 1),
            Lmul::Two => (2, 1),
            Lmul::Four => (4, 1),
            Lmul::Eight => (8, 1),
        }
    }

    /// `ceil(self * slices)`, the number of pipeline slices a vector
    /// instruction with this `lmul` occupies on a machine with the
    /// given slice count.
    pub fn slice_count(self, slices: usize) -> usize {
        let (num, den) = self.as_ratio();
        let slices = slices as u64;
        let num = num as u64 * slices;
        let den = den as u64;
        usize::try_from(num.div_ceil(den)).unwrap_or(usize::MAX)
    }

    /// Parse a trace record's `lmul` field (`"1"`, `"2"`, `"1/4"`, ...).
    pub fn parse(text: &str) -> Option<Lmul> {
        Some(match text {
            "1/8" => Lmul::OneEighth,
            "1/4" => Lmul::OneQuarter,
            "1/2" => Lmul::OneHalf,
            "1" => Lmul::One,
            "2" => Lmul::Two,
            "4" => Lmul::Four,
            "8" => Lmul::Eight,
            _ => return None,
        })
    }
}

/// One fetched, classified instruction.
///
/// Immutable once produced by the trace source. Cheap to clone: the
/// payload is a handful of small `Vec`s populated once at decode time.
#[derive(Clone, Debug)]
pub struct Instruction {
    /// Identity used as the key in every scoreboard/queue/stage map.
    pub id: InstrId,
    /// Assembly mnemonic, e.g. `"add"`, `"vadd.vv"`, `"csrrw"`.
    pub mnemonic: String,
    /// Instruction's byte address in the functional trace.
    pub addr: u64,
    /// Raw operand tokens, in source order (diagnostic/disassembly use
    /// only — dependency tracking uses `inputs_by_type`/`outputs_by_type`).
    pub operands: Vec<String>,
    /// True if this mnemonic is a branch/jump per the classification
    /// tables in [`crate::disasm`].
    pub is_branch: bool,
    /// True if this mnemonic may not be dispatched while any older
    /// instruction is still in flight (see [`crate::disasm::is_flush`]).
    pub is_flush: bool,
    /// True if this mnemonic retires immediately at decode without
    /// ever entering a dispatch queue.
    pub is_nop: bool,
    /// True if this mnemonic is a vector-control instruction
    /// (`vset{i}vli`/`vsetvl`) that changes `vtype`/`vl`.
    pub is_vctrl: bool,
    /// Normalized input registers, keyed by register file.
    pub inputs_by_type: HashMap<RegisterFileKind, Vec<String>>,
    /// Normalized output registers, keyed by register file.
    pub outputs_by_type: HashMap<RegisterFileKind, Vec<String>>,
    /// Byte addresses this instruction loads from, one per vector
    /// element for vector loads, at most one entry for scalar loads.
    pub loads: Vec<u64>,
    /// Byte addresses this instruction stores to, same shape as `loads`.
    pub stores: Vec<u64>,
    /// Vector grouping factor, `None` for scalar instructions.
    pub lmul: Option<Lmul>,
}

impl Instruction {
    /// All input registers across every register file, flattened.
    pub fn inputs(&self) -> impl Iterator<Item = (RegisterFileKind, &str)> {
        self.inputs_by_type
            .iter()
            .flat_map(|(&k, regs)| regs.iter().map(move |r| (k, r.as_str())))
    }

    /// All output registers across every register file, flattened.
    pub fn outputs(&self) -> impl Iterator<Item = (RegisterFileKind, &str)> {
        self.outputs_by_type
            .iter()
            .flat_map(|(&k, regs)| regs.iter().map(move |r| (k, r.as_str())))
    }

    /// Effective multiplier used to size this instruction's slice
    /// sequence: the widest of its own `lmul` and the `lmul` implied by
    /// any widening (`.wv/.wx/.wf/.wi`) operand or `vw*`/`vfw*`
    /// destination, which always doubles relative to `lmul` in the
    /// supported ISA (§9 design notes).
    pub fn max_emul(&self) -> Lmul {
        let base = self.lmul.unwrap_or(Lmul::One);
        if self.is_widening() {
            widen(base)
        } else {
            base
        }
    }

    fn is_widening(&self) -> bool {
        self.operands.iter().any(|op| {
            op.ends_with(".wv") || op.ends_with(".wx") || op.ends_with(".wf") || op.ends_with(".wi")
        }) || self.mnemonic.starts_with("vw")
            || self.mnemonic.starts_with("vfw")
    }

    /// Structural conflict predicate consulted by `SchedUnit` when
    /// checking an instruction against every *other* dispatch queue's
    /// contents (the target queue is exempt — it is in-order).
    ///
    /// Two instructions conflict if either is a vector-control
    /// instruction (it changes `vtype`/`vl`, which every other vector
    /// instruction implicitly depends on but which no register-file
    /// scoreboard tracks), or if they share a CSR register: CSRs have
    /// no dedicated scoreboard in this model, so cross-queue CSR
    /// ordering is enforced here instead.
    pub fn conflicts_with(&self, other: &Instruction) -> bool {
        if self.is_vctrl || other.is_vctrl {
            return true;
        }
        let self_csrs = csr_regs(self);
        let other_csrs = csr_regs(other);
        self_csrs.iter().any(|r| other_csrs.contains(r))
    }
}

fn csr_regs(instr: &Instruction) -> Vec<&str> {
    let mut regs: Vec<&str> = Vec::new();
    if let Some(rs) = instr.inputs_by_type.get(&RegisterFileKind::Csr) {
        regs.extend(rs.iter().map(String::as_str));
    }
    if let Some(rs) = instr.outputs_by_type.get(&RegisterFileKind::Csr) {
        regs.extend(rs.iter().map(String::as_str));
    }
    regs
}

fn widen(lmul: Lmul) -> Lmul {
    match lmul {
        Lmul::OneEighth => Lmul::OneQuarter,
        Lmul::OneQuarter => Lmul::OneHalf,
        Lmul::OneHalf => Lmul::One,
        Lmul::One => Lmul::Two,
        Lmul::Two => Lmul::Four,
        Lmul::Four => Lmul::Eight,
        Lmul::Eight => Lmul::Eight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(mnemonic: &str) -> Instruction {
        Instruction {
            id: InstrId(0),
            mnemonic: mnemonic.to_string(),
            addr: 0,
            operands: vec![],
            is_branch: false,
            is_flush: false,
            is_nop: false,
            is_vctrl: false,
            inputs_by_type: HashMap::new(),
            outputs_by_type: HashMap::new(),
            loads: vec![],
            stores: vec![],
            lmul: None,
        }
    }

    #[test]
    fn slice_count_rounds_up() {
        assert_eq!(Lmul::OneHalf.slice_count(4), 2);
        assert_eq!(Lmul::OneEighth.slice_count(4), 1);
        assert_eq!(Lmul::Two.slice_count(4), 8);
    }

    #[test]
    fn max_emul_doubles_on_widening_mnemonic() {
        let i = instr("vwadd.vv");
        assert_eq!(i.max_emul().as_ratio(), Lmul::Two.as_ratio());
    }

    #[test]
    fn vctrl_conflicts_with_everything() {
        let mut a = instr("vsetvli");
        a.is_vctrl = true;
        let b = instr("vadd.vv");
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
    }

    #[test]
    fn shared_csr_conflicts() {
        let mut a = instr("csrrw");
        a.outputs_by_type
            .insert(RegisterFileKind::Csr, vec!["mstatus".to_string()]);
        let mut b = instr("csrrs");
        b.inputs_by_type
            .insert(RegisterFileKind::Csr, vec!["mstatus".to_string()]);
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn unrelated_instructions_do_not_conflict() {
        let a = instr("add");
        let b = instr("sub");
        assert!(!a.conflicts_with(&b));
    }
}
