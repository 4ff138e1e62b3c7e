//! Cycle-level accounting: the `Counter` aggregate and its `Utilization`
//! samples.
//!
//! `Counter` is the only mutable state shared across every module in the
//! core. Every module's `tick`/`tock` only ever increments it, so updates
//! commute within a phase (§5 concurrency model) — there is no ordering
//! requirement among the modules that bump it in the same phase.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Per-structural-unit occupancy accumulator.
///
/// Sampled once per cycle (in `tock`, after the cycle's state has
/// settled) by whichever structure owns it — a `BufferedQueue`, a
/// pipeline stage array, a WBQ. `ratio()` is the average occupancy
/// fraction over the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    /// Sum of per-cycle occupancy (e.g. queue length) across all samples.
    pub occupied: u64,
    /// Sum of per-cycle capacity across all samples (unbounded
    /// structures contribute their *actual* length as their own
    /// capacity for this purpose, so they never show over 100%).
    pub capacity: u64,
    /// Number of cycles sampled.
    pub samples: u64,
}

impl Utilization {
    /// Record one cycle's occupancy against the given capacity.
    pub fn sample(&mut self, occupied: usize, capacity: usize) {
        self.occupied += occupied as u64;
        self.capacity += capacity as u64;
        self.samples += 1;
    }

    /// Average occupancy as a fraction of capacity, `0.0` if nothing was
    /// ever sampled or capacity was always zero.
    pub fn ratio(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.occupied as f64 / self.capacity as f64
        }
    }
}

impl AddAssign for Utilization {
    fn add_assign(&mut self, rhs: Self) {
        self.occupied += rhs.occupied;
        self.capacity += rhs.capacity;
        self.samples += rhs.samples;
    }
}

/// Cycle-level counters accumulated over a full simulation run.
///
/// Stall and utilization counters are keyed by a short structural-unit
/// tag (`"FE"` fetch, `"SC"` schedule, or a functional-unit kind name
/// like `"alu0"`) rather than fixed struct fields, since the set of
/// structural units is determined by the loaded configuration, not
/// known at compile time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Counter {
    /// Total cycles simulated.
    pub cycles: u64,
    /// Total instructions retired (monotonically non-decreasing, §8
    /// invariant 6).
    pub retired_instruction_count: u64,
    /// Total branches retired.
    pub branch_count: u64,
    /// Per-structural-unit stall-cycle counts.
    pub stalls: BTreeMap<String, u64>,
    /// Per-structural-unit occupancy samples.
    pub utilizations: BTreeMap<String, Utilization>,
    /// Cycles a pipeline stalled waiting for a load reply.
    pub load_stall_cycles: u64,
    /// Cycles a pipeline stalled waiting for a store reply.
    pub store_stall_cycles: u64,
}

impl Counter {
    /// Bump a named stall counter by one cycle.
    pub fn bump_stall(&mut self, unit: &str) {
        *self.stalls.entry(unit.to_string()).or_insert(0) += 1;
    }

    /// Record one cycle's occupancy sample for a named structural unit.
    pub fn sample_utilization(&mut self, unit: &str, occupied: usize, capacity: usize) {
        self.utilizations
            .entry(unit.to_string())
            .or_default()
            .sample(occupied, capacity);
    }

    /// Write the human-readable end-of-run report (§6 "Counter
    /// serialization" companion to the binary format).
    pub fn print(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let cyc = self.cycles.max(1);
        let instr = self.retired_instruction_count.max(1);
        let ipc = self.retired_instruction_count as f64 / cyc as f64;

        writeln!(out, "==========================================================")?;
        writeln!(out, "PIPESIM SIMULATION REPORT")?;
        writeln!(out, "==========================================================")?;
        writeln!(out, "cycles                   {}", self.cycles)?;
        writeln!(out, "retired                  {}", self.retired_instruction_count)?;
        writeln!(out, "branches                 {}", self.branch_count)?;
        writeln!(out, "ipc                      {ipc:.4}")?;
        writeln!(out, "load_stall_cycles        {} ({:.2}%)", self.load_stall_cycles,
            100.0 * self.load_stall_cycles as f64 / cyc as f64)?;
        writeln!(out, "store_stall_cycles       {} ({:.2}%)", self.store_stall_cycles,
            100.0 * self.store_stall_cycles as f64 / cyc as f64)?;
        writeln!(out, "----------------------------------------------------------")?;
        writeln!(out, "STALLS")?;
        for (unit, count) in &self.stalls {
            writeln!(out, "  {unit:<10} {count} ({:.2}%)", 100.0 * *count as f64 / cyc as f64)?;
        }
        writeln!(out, "----------------------------------------------------------")?;
        writeln!(out, "UTILIZATION")?;
        for (unit, util) in &self.utilizations {
            writeln!(out, "  {unit:<10} {:.2}% ({} samples)", 100.0 * util.ratio(), util.samples)?;
        }
        writeln!(out, "==========================================================")?;
        let _ = instr;
        Ok(())
    }

    /// Render the same report to a `String`, for tests that assert on
    /// content rather than writing to a file.
    pub fn to_report_string(&self) -> String {
        let mut s = String::new();
        // `Counter::print` takes `dyn std::io::Write`; adapt a `String`
        // via a small buffer instead of duplicating the format logic.
        let mut buf = Vec::new();
        let _ = self.print(&mut buf);
        let _ = write!(s, "{}", String::from_utf8_lossy(&buf));
        s
    }
}

impl AddAssign for Counter {
    /// Additive merge used by `--save-counters` round-tripping and the
    /// `merge-counters` auxiliary tool: every field is a plain sum.
    fn add_assign(&mut self, rhs: Self) {
        self.cycles += rhs.cycles;
        self.retired_instruction_count += rhs.retired_instruction_count;
        self.branch_count += rhs.branch_count;
        for (k, v) in rhs.stalls {
            *self.stalls.entry(k).or_insert(0) += v;
        }
        for (k, v) in rhs.utilizations {
            *self.utilizations.entry(k).or_default() += v;
        }
        self.load_stall_cycles += rhs.load_stall_cycles;
        self.store_stall_cycles += rhs.store_stall_cycles;
    }
}

impl std::ops::Add for Counter {
    type Output = Counter;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_every_field() {
        let mut a = Counter {
            cycles: 10,
            retired_instruction_count: 5,
            ..Default::default()
        };
        a.bump_stall("FE");
        let mut b = Counter {
            cycles: 3,
            retired_instruction_count: 2,
            ..Default::default()
        };
        b.bump_stall("FE");
        b.bump_stall("SC");

        a += b;
        assert_eq!(a.cycles, 13);
        assert_eq!(a.retired_instruction_count, 7);
        assert_eq!(a.stalls["FE"], 2);
        assert_eq!(a.stalls["SC"], 1);
    }

    #[test]
    fn retired_count_is_nondecreasing_under_repeated_merge() {
        let mut total = Counter::default();
        let mut prev = 0;
        for n in [1, 0, 3, 0, 2] {
            let mut c = Counter::default();
            c.retired_instruction_count = n;
            total += c;
            assert!(total.retired_instruction_count >= prev);
            prev = total.retired_instruction_count;
        }
    }

    #[test]
    fn utilization_ratio_is_bounded() {
        let mut u = Utilization::default();
        u.sample(3, 4);
        u.sample(4, 4);
        assert!(u.ratio() > 0.0 && u.ratio() <= 1.0);
    }
}
