//! Turns a raw [`TraceRecord`] into a classified [`Instruction`]:
//! mnemonic classification via [`crate::disasm`], register-name
//! normalization, and register-file assignment.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::disasm;
use crate::instruction::{Instruction, InstrId, Lmul, RegisterFileKind};
use crate::trace_source::TraceRecord;

fn csr_names() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "mstatus", "mcause", "mepc", "mtvec", "mie", "mip", "mscratch", "medeleg", "mideleg",
            "satp", "sstatus", "scause", "sepc", "stvec", "sie", "sip", "sscratch",
            "fcsr", "frm", "fflags", "vtype", "vl", "vlenb", "vstart", "vxsat", "vxrm",
            "cycle", "instret", "time",
        ]
        .into_iter()
        .collect()
    })
}

fn classify(reg: &str) -> RegisterFileKind {
    if csr_names().contains(reg) {
        RegisterFileKind::Csr
    } else if reg.starts_with('v') && reg[1..].chars().next().is_some_and(|c| c.is_ascii_digit()) {
        RegisterFileKind::Vector
    } else {
        RegisterFileKind::Scalar
    }
}

fn bucket(regs: Vec<String>) -> HashMap<RegisterFileKind, Vec<String>> {
    let mut by_type: HashMap<RegisterFileKind, Vec<String>> = HashMap::new();
    for r in regs {
        let kind = classify(&r);
        by_type.entry(kind).or_default().push(r);
    }
    by_type
}

/// Classify a trace record into an `Instruction`, assigning it `id`.
pub fn decode(id: InstrId, record: TraceRecord) -> Instruction {
    let inputs = disasm::normalize(&record.inputs);
    let outputs = disasm::normalize(&record.outputs);
    Instruction {
        id,
        is_branch: disasm::is_branch(&record.mnemonic),
        is_flush: disasm::is_flush(&record.mnemonic),
        is_nop: disasm::is_nop(&record.mnemonic),
        is_vctrl: disasm::is_vctrl(&record.mnemonic),
        mnemonic: record.mnemonic,
        addr: record.addr,
        operands: record.operands,
        inputs_by_type: bucket(inputs),
        outputs_by_type: bucket(outputs),
        loads: record.loads,
        stores: record.stores,
        lmul: record.lmul.as_deref().and_then(Lmul::parse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mnemonic: &str) -> TraceRecord {
        TraceRecord {
            addr: 0x1000,
            mnemonic: mnemonic.to_string(),
            operands: vec![],
            inputs: vec!["a0".to_string(), "mstatus".to_string()],
            outputs: vec!["a1".to_string()],
            loads: vec![],
            stores: vec![],
            lmul: None,
            exception_redirect: None,
        }
    }

    #[test]
    fn buckets_registers_by_file() {
        let instr = decode(InstrId(1), record("csrrs"));
        assert_eq!(
            instr.inputs_by_type[&RegisterFileKind::Scalar],
            vec!["x10".to_string()]
        );
        assert_eq!(
            instr.inputs_by_type[&RegisterFileKind::Csr],
            vec!["mstatus".to_string()]
        );
    }

    #[test]
    fn vector_register_names_are_classified_as_vector() {
        let mut r = record("vadd.vv");
        r.inputs = vec!["v2".to_string()];
        r.outputs = vec!["v1".to_string()];
        let instr = decode(InstrId(1), r);
        assert!(instr.inputs_by_type.contains_key(&RegisterFileKind::Vector));
    }
}
