//! The cache hierarchy: a narrow request/reply interface a pipeline
//! uses to issue loads/stores, backed by a chain of cache levels and a
//! `MainMemory` root.
//!
//! Unlike the scoreboards and pipelines, the memory hierarchy
//! participates in the core through a small surface
//! (`issue_load`/`issue_store`/`take_*_replys`); its internal state
//! machine (§6) is summarized rather than exhaustively cross-checked by
//! the testable properties, so this module favors a single linear
//! chain of levels (the shape every example in spec.md §8 uses) over a
//! fully general cache tree.

mod cache;
mod main_memory;

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;

use crate::instruction::InstrId;
use crate::module::{Module, ThreeValued};

pub use cache::{CacheConfig, CacheLevel, InclusionPolicy, Placement, WritePolicy};
pub use main_memory::MainMemory;

/// Kind of access flowing through the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// A pipeline's own load.
    Read,
    /// A pipeline's own store, or a dirty-victim write-back.
    Write,
    /// A child cache's miss-fill read request.
    FetchRead,
    /// A child cache's miss-fill write request (write-allocate on a
    /// store miss).
    FetchWrite,
}

/// Identifies the requester a reply is destined for: the instruction
/// itself for a scalar pipe, or `(instruction, slice)` for a vector
/// pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// A scalar pipeline's request.
    Scalar(InstrId),
    /// A vector pipeline's per-slice request.
    Vector(InstrId, u16),
}

/// One in-flight request as it threads through the hierarchy.
#[derive(Clone, Copy, Debug)]
pub struct Request {
    /// Requester identity, used to route the eventual reply.
    pub requester: RequestId,
    /// Byte address.
    pub addr: u64,
    /// Access kind.
    pub kind: RequestKind,
}

/// The full memory hierarchy: an ordered chain of cache levels (index 0
/// is the level closest to the pipelines) terminating at `MainMemory`.
#[derive(Debug)]
pub struct MemorySystem {
    levels: Vec<CacheLevel>,
    main_memory: MainMemory,
    /// Requests a pipeline has issued but the front level hasn't yet
    /// accepted (front-level admission is one request per cycle).
    front_intake: VecDeque<Request>,
    load_replies: HashMap<RequestId, VecDeque<u64>>,
    store_replies: HashMap<RequestId, VecDeque<u64>>,
}

impl MemorySystem {
    /// Build a memory system from an ordered list of level configs
    /// (front to back) and a main-memory latency.
    pub fn new(configs: Vec<CacheConfig>, main_memory_latency: u32) -> Self {
        let levels = configs.into_iter().map(CacheLevel::new).collect();
        Self {
            levels,
            main_memory: MainMemory::new(main_memory_latency),
            front_intake: VecDeque::new(),
            load_replies: HashMap::new(),
            store_replies: HashMap::new(),
        }
    }

    /// Enqueue a load request from a pipeline.
    pub fn issue_load(&mut self, requester: RequestId, addr: u64) {
        self.front_intake.push_back(Request {
            requester,
            addr,
            kind: RequestKind::Read,
        });
    }

    /// Enqueue a store request from a pipeline.
    pub fn issue_store(&mut self, requester: RequestId, addr: u64) {
        self.front_intake.push_back(Request {
            requester,
            addr,
            kind: RequestKind::Write,
        });
    }

    /// Drain delivered load replies addressed to `requester`, in
    /// delivery order.
    pub fn take_load_replys(&mut self, requester: RequestId) -> Vec<u64> {
        self.load_replies
            .get_mut(&requester)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Drain delivered store replies addressed to `requester`.
    pub fn take_store_replys(&mut self, requester: RequestId) -> Vec<u64> {
        self.store_replies
            .get_mut(&requester)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    fn route_reply(&mut self, requester: RequestId, addr: u64, kind: RequestKind) {
        let table = match kind {
            RequestKind::Read => &mut self.load_replies,
            RequestKind::Write => &mut self.store_replies,
            RequestKind::FetchRead | RequestKind::FetchWrite => return,
        };
        table.entry(requester).or_default().push_back(addr);
    }
}

impl Module for MemorySystem {
    fn reset(&mut self) {
        for level in &mut self.levels {
            level.reset();
        }
        self.main_memory.reset();
        self.front_intake.clear();
        self.load_replies.clear();
        self.store_replies.clear();
    }

    fn tick(&mut self) {
        // Admit one new front-level request per cycle, if the front
        // level is idle enough to accept it.
        if let Some(req) = self.front_intake.front().copied() {
            if self.levels.first().is_some_and(CacheLevel::can_accept) {
                self.front_intake.pop_front();
                self.levels[0].accept(req);
            }
        }

        // Tick every level, back to front, so a level sees its parent's
        // *current* (pre-tick) reply state this cycle — the parent's own
        // reply computed this tick becomes visible to the child next
        // cycle through the normal tick/tock boundary.
        for i in (0..self.levels.len()).rev() {
            let parent_reply = if i + 1 < self.levels.len() {
                self.levels[i + 1].take_reply_for_child()
            } else {
                self.main_memory.take_reply()
            };
            let outgoing = self.levels[i].tick(parent_reply);
            if let Some(req) = outgoing {
                if i + 1 < self.levels.len() {
                    self.levels[i + 1].accept(req);
                } else {
                    self.main_memory.accept(req);
                }
            }
        }
        self.main_memory.tick();
    }

    fn tock(&mut self) {
        for level in &mut self.levels {
            level.tock();
        }
        self.main_memory.tock();

        // Deliver any level-0 replies to their pipeline requesters.
        if let Some(reply) = self.levels.first_mut().and_then(CacheLevel::take_front_reply) {
            self.route_reply(reply.requester, reply.addr, reply.kind);
        }
    }

    fn pending(&self) -> usize {
        self.front_intake.len()
            + self.levels.iter().map(CacheLevel::pending).sum::<usize>()
            + self.main_memory.pending()
    }

    fn name(&self) -> &'static str {
        "MEM"
    }

    fn print_state_detailed(&self, out: &mut dyn std::fmt::Write) {
        let _ = writeln!(out, "MemorySystem:");
        for level in &self.levels {
            let _ = writeln!(out, "  {}: {:?}", level.name(), level.state_label());
        }
        let _ = writeln!(out, "  main_memory: {} in flight", self.main_memory.pending());
    }

    fn get_state_three_valued(&self) -> Vec<ThreeValued> {
        self.levels.iter().map(CacheLevel::three_valued).collect()
    }

    fn get_state_three_valued_header(&self) -> Vec<&'static str> {
        self.levels.iter().map(CacheLevel::name).collect()
    }
}
