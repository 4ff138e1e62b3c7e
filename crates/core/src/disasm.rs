//! Mnemonic classification tables and register-name normalization.
//!
//! These tables are ambient knowledge the trace-ingest adapter and
//! `SchedUnit` both need (which mnemonics are NOPs, branches, flush
//! barriers, or vector-control instructions); they carry over the
//! meaning of the reference implementation's disassembler tables
//! without its operand-parsing machinery, which this crate's
//! `TraceSource` contract makes unnecessary (trace records arrive with
//! pre-classified input/output register lists).

use std::collections::HashSet;
use std::sync::OnceLock;

/// Mnemonics that retire immediately at decode without entering a
/// dispatch queue.
fn nops() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        ["nop", "c.nop", "fence", "fence.i", "sfence.vma", "wfi"]
            .into_iter()
            .collect()
    })
}

/// Mnemonics classified as branches/jumps.
fn branches() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "beq", "bne", "blt", "bge", "bltu", "bgeu", "jal", "jalr", "bnez", "beqz", "blez",
            "bgez", "bltz", "bgtz", "bleu", "bgtu", "j", "c.j", "jr", "ret", "sret", "mret",
            "ecall", "ebreak",
        ]
        .into_iter()
        .collect()
    })
}

/// Mnemonics that may not dispatch while an older instruction is still
/// in flight.
fn flushes() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "csrr", "csrw", "csrs", "csrwi", "csrrw", "csrrs", "csrrc", "csrrwi", "csrrsi",
            "csrrci", "fence", "fence.i", "sfence.vma",
        ]
        .into_iter()
        .collect()
    })
}

/// Vector-control mnemonics that change `vtype`/`vl`.
fn vctrls() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| ["vsetivli", "vsetvli", "vsetvl"].into_iter().collect())
}

/// True if `mnemonic` is a NOP in the sense this simulator cares about:
/// retired without ever occupying a dispatch queue.
pub fn is_nop(mnemonic: &str) -> bool {
    nops().contains(mnemonic)
}

/// True if `mnemonic` is a branch or jump.
pub fn is_branch(mnemonic: &str) -> bool {
    branches().contains(mnemonic)
}

/// True if `mnemonic` is a flush barrier.
pub fn is_flush(mnemonic: &str) -> bool {
    flushes().contains(mnemonic)
}

/// True if `mnemonic` is a vector-control instruction.
pub fn is_vctrl(mnemonic: &str) -> bool {
    vctrls().contains(mnemonic)
}

fn abi_name(reg: &str) -> Option<&'static str> {
    Some(match reg {
        "zero" => "x0",
        "ra" => "x1",
        "sp" => "x2",
        "gp" => "x3",
        "tp" => "x4",
        "t0" => "x5",
        "t1" => "x6",
        "t2" => "x7",
        "s0" => "x8",
        "s1" => "x9",
        "a0" => "x10",
        "a1" => "x11",
        "a2" => "x12",
        "a3" => "x13",
        "a4" => "x14",
        "a5" => "x15",
        "a6" => "x16",
        "a7" => "x17",
        "s2" => "x18",
        "s3" => "x19",
        "s4" => "x20",
        "s5" => "x21",
        "s6" => "x22",
        "s7" => "x23",
        "s8" => "x24",
        "s9" => "x25",
        "s10" => "x26",
        "s11" => "x27",
        "t3" => "x28",
        "t4" => "x29",
        "t5" => "x30",
        "t6" => "x31",
        "v0.t" => "v0",
        _ => return None,
    })
}

fn is_bogus(reg: &str) -> bool {
    matches!(
        reg,
        "x0" | "e8"
            | "e16"
            | "e32"
            | "e64"
            | "e128"
            | "m1"
            | "m2"
            | "m4"
            | "m8"
            | "m16"
            | "ta"
            | "tu"
            | "ma"
            | "mu"
    )
}

/// Replace ABI register names with their architectural names, and drop
/// the hardwired-zero register and assembler-only tokens. Deduplicates.
pub fn normalize(regs: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for r in regs {
        let canonical = abi_name(r).map(str::to_string).unwrap_or_else(|| r.clone());
        if is_bogus(&canonical) {
            continue;
        }
        if seen.insert(canonical.clone()) {
            out.push(canonical);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_mnemonics() {
        assert!(is_nop("nop"));
        assert!(is_branch("beq"));
        assert!(is_flush("csrrw"));
        assert!(is_vctrl("vsetvli"));
        assert!(!is_nop("add"));
    }

    #[test]
    fn normalize_maps_abi_names_and_drops_zero() {
        let regs = vec!["a0".to_string(), "zero".to_string(), "ra".to_string()];
        let got = normalize(&regs);
        assert_eq!(got, vec!["x10".to_string(), "x1".to_string()]);
    }

    #[test]
    fn normalize_deduplicates() {
        let regs = vec!["a0".to_string(), "x10".to_string()];
        let got = normalize(&regs);
        assert_eq!(got, vec!["x10".to_string()]);
    }
}
