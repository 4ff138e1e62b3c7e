//! Register scoreboards: per-register-file dependency and port trackers.
//!
//! The scalar and vector variants share one algorithm (§4.5 of the
//! design): RAW/WAW/WAR ordering with bypass via a write buffer, and a
//! cycle-breaking `issued` set. The only structural difference is the
//! register token — a scalar register name vs. a `(base, slice)` pair —
//! and how many independent port-budget "lanes" a token can fall into
//! (one for scalar, one per vector slice). [`Scoreboard<T>`] is generic
//! over the token type via the [`RegToken`] trait so both variants are
//! the same code; [`scalar`] and [`vector`] just supply concrete tokens.

pub mod scalar;
pub mod vector;

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::instruction::InstrId;

/// A register token a scoreboard can track.
///
/// `lane()` partitions tokens into independent port-budget groups: the
/// scalar scoreboard has exactly one lane, the vector scoreboard has one
/// lane per slice index (port contention is tracked per slice, not
/// globally, since each slice executes as an independent lane).
pub trait RegToken: Copy + Eq + Hash {
    /// Which port-budget lane this token belongs to.
    fn lane(&self) -> usize;
}

/// Per-register-file dependency and port tracker.
///
/// Every operation is keyed by [`InstrId`]; see the module's operations
/// for the exact contract of each method (mirrors spec §4.5 one for
/// one).
#[derive(Debug)]
pub struct Scoreboard<T: RegToken> {
    rw: HashMap<InstrId, HashMap<T, Option<InstrId>>>,
    ww: HashMap<InstrId, HashMap<T, Option<InstrId>>>,
    wr: HashMap<InstrId, HashMap<T, HashSet<InstrId>>>,
    writes: HashMap<T, InstrId>,
    reads: HashMap<T, HashSet<InstrId>>,
    issued: HashSet<InstrId>,
    write_buff: HashMap<InstrId, HashSet<T>>,
    dedicated_read: HashSet<T>,
    dedicated_write: HashSet<T>,
    read_port_cap: Vec<Option<usize>>,
    write_port_cap: Vec<Option<usize>>,
    used_read_ports: Vec<usize>,
    used_write_ports: Vec<usize>,
}

impl<T: RegToken> Scoreboard<T> {
    /// Construct an empty scoreboard with `num_lanes` independent port
    /// budgets, each capped at `read_ports`/`write_ports` (`None` =
    /// unbounded), with `dedicated_read`/`dedicated_write` naming
    /// tokens that never consume a shared port.
    pub fn new(
        num_lanes: usize,
        read_ports: Option<usize>,
        write_ports: Option<usize>,
        dedicated_read: HashSet<T>,
        dedicated_write: HashSet<T>,
    ) -> Self {
        Self {
            rw: HashMap::new(),
            ww: HashMap::new(),
            wr: HashMap::new(),
            writes: HashMap::new(),
            reads: HashMap::new(),
            issued: HashSet::new(),
            write_buff: HashMap::new(),
            dedicated_read,
            dedicated_write,
            read_port_cap: vec![read_ports; num_lanes.max(1)],
            write_port_cap: vec![write_ports; num_lanes.max(1)],
            used_read_ports: vec![0; num_lanes.max(1)],
            used_write_ports: vec![0; num_lanes.max(1)],
        }
    }

    /// Number of distinct instructions this scoreboard currently has any
    /// record of — used for `Module::pending`.
    pub fn pending(&self) -> usize {
        let mut ids: HashSet<InstrId> = HashSet::new();
        ids.extend(self.rw.keys().copied());
        ids.extend(self.ww.keys().copied());
        ids.extend(self.wr.keys().copied());
        ids.extend(self.write_buff.keys().copied());
        ids.len()
    }

    /// Record `i`'s full read and write sets at dispatch.
    pub fn insert_accesses(&mut self, i: InstrId, reads: &[T], writes: &[T]) {
        for &r in reads {
            let producer = self.writes.get(&r).copied();
            self.rw.entry(i).or_default().insert(r, producer);
            self.reads.entry(r).or_default().insert(i);
        }
        for &w in writes {
            let prior_writer = self.writes.get(&w).copied();
            self.ww.entry(i).or_default().insert(w, prior_writer);
            let prior_readers = self.reads.remove(&w).unwrap_or_default();
            self.wr.entry(i).or_default().insert(w, prior_readers);
            self.writes.insert(w, i);
        }
    }

    /// True iff every recorded producer/prior-writer/prior-reader
    /// dependency of `i` is already in the `issued` set (admits cyclic
    /// producer/consumer pairs co-resident in the same pipeline).
    pub fn can_issue(&self, i: InstrId) -> bool {
        if let Some(m) = self.rw.get(&i) {
            for producer in m.values().flatten() {
                if !self.issued.contains(producer) {
                    return false;
                }
            }
        }
        if let Some(m) = self.ww.get(&i) {
            for producer in m.values().flatten() {
                if !self.issued.contains(producer) {
                    return false;
                }
            }
        }
        if let Some(m) = self.wr.get(&i) {
            for waiters in m.values() {
                if waiters.iter().any(|w| !self.issued.contains(w)) {
                    return false;
                }
            }
        }
        true
    }

    /// True iff `i` can read `regs` this cycle: every producer either
    /// already wrote architecturally or has a bypass value buffered,
    /// and the shared port budget (excluding dedicated ports and
    /// bypass reads) has room.
    pub fn can_read(&self, i: InstrId, regs: &[T]) -> bool {
        for &r in regs {
            if let Some(Some(producer)) = self.rw.get(&i).and_then(|m| m.get(&r)) {
                let ready = self
                    .write_buff
                    .get(producer)
                    .is_some_and(|set| set.contains(&r));
                if !ready {
                    return false;
                }
            }
        }
        let mut extra: HashMap<usize, usize> = HashMap::new();
        for &r in regs {
            if self.dedicated_read.contains(&r) {
                continue;
            }
            let is_bypass = matches!(self.rw.get(&i).and_then(|m| m.get(&r)), Some(Some(_)));
            if is_bypass {
                continue;
            }
            *extra.entry(r.lane()).or_insert(0) += 1;
        }
        extra.into_iter().all(|(lane, n)| self.port_fits(&self.read_port_cap, &self.used_read_ports, lane, n))
    }

    /// Commit reads of `regs` by `i`. Must be preceded by a true
    /// `can_read`.
    pub fn read(&mut self, i: InstrId, regs: &[T]) {
        for &r in regs {
            let producer = self.rw.get_mut(&i).and_then(|m| m.remove(&r)).flatten();
            if let Some(p) = producer {
                if let Some(set) = self.wr.get_mut(&p).and_then(|m| m.get_mut(&r)) {
                    set.remove(&i);
                }
            } else if !self.dedicated_read.contains(&r) {
                self.used_read_ports[r.lane()] += 1;
            }
            if let Some(set) = self.reads.get_mut(&r) {
                set.remove(&i);
            }
        }
        self.maybe_retire_from_issued(i);
    }

    /// True iff `i` can write `regs` this cycle: no remaining
    /// prior-writer or prior-reader dependency, and the shared write
    /// port budget has room.
    pub fn can_write(&self, i: InstrId, regs: &[T]) -> bool {
        for &r in regs {
            if let Some(Some(_)) = self.ww.get(&i).and_then(|m| m.get(&r)) {
                return false;
            }
            if let Some(set) = self.wr.get(&i).and_then(|m| m.get(&r)) {
                if !set.is_empty() {
                    return false;
                }
            }
        }
        let mut extra: HashMap<usize, usize> = HashMap::new();
        for &r in regs {
            if self.dedicated_write.contains(&r) {
                continue;
            }
            *extra.entry(r.lane()).or_insert(0) += 1;
        }
        extra
            .into_iter()
            .all(|(lane, n)| self.port_fits(&self.write_port_cap, &self.used_write_ports, lane, n))
    }

    /// Record that `i` has a bypassable value ready for `regs`, ahead of
    /// its architectural write.
    pub fn buff_write(&mut self, i: InstrId, regs: &[T]) {
        self.write_buff.entry(i).or_default().extend(regs);
    }

    /// Commit writes of `regs` by `i`. Must be preceded by a true
    /// `can_write`.
    pub fn write(&mut self, i: InstrId, regs: &[T]) {
        for &r in regs {
            if let Some(m) = self.ww.get_mut(&i) {
                m.remove(&r);
            }
            if let Some(m) = self.wr.get_mut(&i) {
                m.remove(&r);
            }
            if !self.dedicated_write.contains(&r) {
                self.used_write_ports[r.lane()] += 1;
            }
            for m in self.rw.values_mut() {
                if let Some(slot) = m.get_mut(&r) {
                    if *slot == Some(i) {
                        *slot = None;
                    }
                }
            }
            for m in self.ww.values_mut() {
                if let Some(slot) = m.get_mut(&r) {
                    if *slot == Some(i) {
                        *slot = None;
                    }
                }
            }
            if self.writes.get(&r) == Some(&i) {
                self.writes.remove(&r);
            }
            if let Some(set) = self.write_buff.get_mut(&i) {
                set.remove(&r);
                if set.is_empty() {
                    self.write_buff.remove(&i);
                }
            }
        }
        self.maybe_retire_from_issued(i);
    }

    /// Add `i` to the `issued` set iff it has any recorded dependency.
    /// Dependency-free instructions need not be tracked; pure in-order
    /// pipelines may still call this unconditionally.
    pub fn issue(&mut self, i: InstrId) {
        let has_deps = self.rw.get(&i).is_some_and(|m| !m.is_empty())
            || self.ww.get(&i).is_some_and(|m| !m.is_empty())
            || self.wr.get(&i).is_some_and(|m| !m.is_empty());
        if has_deps {
            self.issued.insert(i);
        }
    }

    /// Reset per-cycle port-usage counters. Called once per cycle from
    /// the owning `tock`.
    pub fn tock(&mut self) {
        self.used_read_ports.iter_mut().for_each(|u| *u = 0);
        self.used_write_ports.iter_mut().for_each(|u| *u = 0);
    }

    fn maybe_retire_from_issued(&mut self, i: InstrId) {
        let rw_empty = self.rw.get(&i).is_none_or(HashMap::is_empty);
        let ww_empty = self.ww.get(&i).is_none_or(HashMap::is_empty);
        if rw_empty && ww_empty {
            self.issued.remove(&i);
        }
    }

    fn port_fits(&self, caps: &[Option<usize>], used: &[usize], lane: usize, n: usize) -> bool {
        match caps.get(lane).copied().flatten() {
            None => true,
            Some(cap) => used.get(lane).copied().unwrap_or(0) + n <= cap,
        }
    }
}
