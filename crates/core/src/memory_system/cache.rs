//! A single cache level: set-associative (or direct-mapped, the
//! `ways == 1` case) storage, LRU replacement, and a small state
//! machine that serializes one request at a time.

use std::collections::{HashMap, VecDeque};

use crate::module::ThreeValued;

use super::{Request, RequestKind};

/// Write-back defers dirty data to eviction; write-through also
/// forwards every hit write to the parent immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePolicy {
    WriteBack,
    WriteThrough,
}

/// Inclusive hierarchies guarantee a parent holds a superset of its
/// children's lines; exclusive hierarchies hold a line at exactly one
/// level. This model enforces the inclusive write-back-on-eviction
/// discipline; exclusive back-invalidation would need a wire this
/// hierarchy's narrow request/reply interface doesn't carry, so an
/// exclusive level behaves like an inclusive one that simply never
/// assumes the parent already has the line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InclusionPolicy {
    Inclusive,
    Exclusive,
}

/// Set placement. `SetAssociative` with `ways == 1` and `DirectMapped`
/// describe the same storage shape; the variant is purely descriptive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    DirectMapped,
    SetAssociative,
}

/// Static configuration for one cache level.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub name: String,
    pub placement: Placement,
    pub line_size: u64,
    pub num_sets: usize,
    pub ways: usize,
    pub write_policy: WritePolicy,
    pub inclusion: InclusionPolicy,
    /// Hit latency in cycles, by access kind.
    pub latency: HashMap<RequestKind, u32>,
}

#[derive(Clone, Copy, Debug)]
struct Line {
    tag: u64,
    dirty: bool,
    last_used: u64,
}

#[derive(Clone, Copy, Debug)]
enum State {
    Idle,
    Stall { remaining: u32, reply: Request },
    Miss { req: Request, fetch_sent: bool },
}

/// One level of the hierarchy.
#[derive(Debug)]
pub struct CacheLevel {
    name: &'static str,
    line_size: u64,
    num_sets: usize,
    write_policy: WritePolicy,
    #[allow(dead_code)]
    inclusion: InclusionPolicy,
    latency: HashMap<RequestKind, u32>,
    sets: Vec<Vec<Option<Line>>>,
    clock: u64,
    incoming: VecDeque<Request>,
    writeback_queue: VecDeque<Request>,
    state: State,
    reply_out: Option<Request>,
}

impl CacheLevel {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            name: Box::leak(config.name.into_boxed_str()),
            line_size: config.line_size,
            num_sets: config.num_sets,
            write_policy: config.write_policy,
            inclusion: config.inclusion,
            latency: config.latency,
            sets: vec![vec![None; config.ways]; config.num_sets],
            clock: 0,
            incoming: VecDeque::new(),
            writeback_queue: VecDeque::new(),
            state: State::Idle,
            reply_out: None,
        }
    }

    pub fn reset(&mut self) {
        for set in &mut self.sets {
            for way in set {
                *way = None;
            }
        }
        self.clock = 0;
        self.incoming.clear();
        self.writeback_queue.clear();
        self.state = State::Idle;
        self.reply_out = None;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn can_accept(&self) -> bool {
        self.incoming.is_empty()
    }

    pub fn accept(&mut self, req: Request) {
        self.incoming.push_back(req);
    }

    pub fn pending(&self) -> usize {
        self.incoming.len()
            + self.writeback_queue.len()
            + usize::from(!matches!(self.state, State::Idle))
    }

    pub fn three_valued(&self) -> ThreeValued {
        match (self.pending(), matches!(self.state, State::Idle)) {
            (0, true) => ThreeValued::Empty,
            (_, true) => ThreeValued::Partial,
            _ => ThreeValued::Full,
        }
    }

    pub fn state_label(&self) -> &'static str {
        if !self.writeback_queue.is_empty() {
            return "stall_parent";
        }
        match self.state {
            State::Idle => "idle",
            State::Stall { .. } => "stall",
            State::Miss { .. } => "miss",
        }
    }

    fn index_and_tag(&self, addr: u64) -> (usize, u64) {
        let line = addr / self.line_size;
        let set = (line % self.num_sets as u64) as usize;
        let tag = line / self.num_sets as u64;
        (set, tag)
    }

    fn find_way(&self, set: usize, tag: u64) -> Option<usize> {
        self.sets[set]
            .iter()
            .position(|w| w.is_some_and(|l| l.tag == tag))
    }

    fn pick_victim(&self, set: usize) -> usize {
        if let Some(i) = self.sets[set].iter().position(Option::is_none) {
            return i;
        }
        self.sets[set]
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.unwrap().last_used)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Advance one cycle. `parent_reply` is the parent's reply visible
    /// this cycle, if any. Returns an outgoing request for the parent,
    /// at most one per cycle.
    pub fn tick(&mut self, parent_reply: Option<Request>) -> Option<Request> {
        self.clock += 1;

        if let State::Miss { req, fetch_sent: true } = self.state {
            if let Some(reply) = parent_reply {
                if reply.addr / self.line_size == req.addr / self.line_size {
                    let (set, tag) = self.index_and_tag(req.addr);
                    let victim = self.pick_victim(set);
                    self.sets[set][victim] = Some(Line {
                        tag,
                        dirty: req.kind == RequestKind::Write
                            && self.write_policy == WritePolicy::WriteBack,
                        last_used: self.clock,
                    });
                    let latency = *self.latency.get(&req.kind).unwrap_or(&1);
                    self.state = State::Stall {
                        remaining: latency.saturating_sub(1),
                        reply: req,
                    };
                }
            }
        }

        // Drain any pending dirty-victim write-backs ahead of new traffic.
        if let Some(wb) = self.writeback_queue.pop_front() {
            return Some(wb);
        }

        match self.state {
            State::Idle => self.start_request(),
            State::Stall { remaining, reply } => {
                if remaining == 0 {
                    self.reply_out = Some(reply);
                    self.state = State::Idle;
                } else {
                    self.state = State::Stall {
                        remaining: remaining - 1,
                        reply,
                    };
                }
                None
            }
            State::Miss {
                req,
                fetch_sent: false,
            } => {
                let fetch_kind = if req.kind == RequestKind::Write {
                    RequestKind::FetchWrite
                } else {
                    RequestKind::FetchRead
                };
                self.state = State::Miss {
                    req,
                    fetch_sent: true,
                };
                Some(Request {
                    requester: req.requester,
                    addr: req.addr,
                    kind: fetch_kind,
                })
            }
            State::Miss { .. } => None,
        }
    }

    fn start_request(&mut self) -> Option<Request> {
        let req = self.incoming.pop_front()?;
        let (set, tag) = self.index_and_tag(req.addr);

        if let Some(way) = self.find_way(set, tag) {
            self.sets[set][way].as_mut().unwrap().last_used = self.clock;
            let mut forward = None;
            if req.kind == RequestKind::Write {
                match self.write_policy {
                    WritePolicy::WriteBack => {
                        self.sets[set][way].as_mut().unwrap().dirty = true;
                    }
                    WritePolicy::WriteThrough => {
                        forward = Some(Request {
                            requester: req.requester,
                            addr: req.addr,
                            kind: RequestKind::FetchWrite,
                        });
                    }
                }
            }
            let latency = *self.latency.get(&req.kind).unwrap_or(&1);
            self.state = State::Stall {
                remaining: latency.saturating_sub(1),
                reply: req,
            };
            return forward;
        }

        let victim_idx = self.pick_victim(set);
        if let Some(victim) = self.sets[set][victim_idx].take() {
            if victim.dirty {
                let victim_addr = (victim.tag * self.num_sets as u64 + set as u64) * self.line_size;
                self.writeback_queue.push_back(Request {
                    requester: req.requester,
                    addr: victim_addr,
                    kind: RequestKind::FetchWrite,
                });
            }
        }
        self.state = State::Miss {
            req,
            fetch_sent: false,
        };
        None
    }

    pub fn tock(&mut self) {}

    /// Take a reply this level produced, for a child cache level to
    /// consume in its own `tick`.
    pub fn take_reply_for_child(&mut self) -> Option<Request> {
        self.reply_out.take()
    }

    /// Take a reply this (front) level produced, for delivery to the
    /// pipeline that issued the original request.
    pub fn take_front_reply(&mut self) -> Option<Request> {
        self.reply_out.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_system::RequestId;
    use crate::instruction::InstrId;

    fn config() -> CacheConfig {
        let mut latency = HashMap::new();
        latency.insert(RequestKind::Read, 2);
        latency.insert(RequestKind::Write, 2);
        latency.insert(RequestKind::FetchRead, 1);
        latency.insert(RequestKind::FetchWrite, 1);
        CacheConfig {
            name: "L1".to_string(),
            placement: Placement::SetAssociative,
            line_size: 64,
            num_sets: 4,
            ways: 2,
            write_policy: WritePolicy::WriteBack,
            inclusion: InclusionPolicy::Inclusive,
            latency,
        }
    }

    fn req(addr: u64) -> Request {
        Request {
            requester: RequestId::Scalar(InstrId(1)),
            addr,
            kind: RequestKind::Read,
        }
    }

    #[test]
    fn cold_access_misses_then_hits_on_refill() {
        let mut cache = CacheLevel::new(config());
        cache.accept(req(0));
        // First tick starts the request and finds a miss.
        assert!(cache.tick(None).is_none());
        // Second tick sends the fetch to the parent.
        let outgoing = cache.tick(None).expect("fetch issued");
        assert_eq!(outgoing.kind, RequestKind::FetchRead);

        // Parent replies; cache installs the line and starts the stall.
        let reply = Request {
            requester: outgoing.requester,
            addr: 0,
            kind: RequestKind::FetchRead,
        };
        cache.tick(Some(reply));
        // Drain the hit-latency stall.
        cache.tick(None);
        let delivered = cache.tick(None);
        assert!(delivered.is_none());
        assert!(cache.take_front_reply().is_some());
    }

    #[test]
    fn repeated_hit_does_not_refetch() {
        let mut cache = CacheLevel::new(config());
        cache.accept(req(0));
        cache.tick(None); // miss detected
        let fetch = cache.tick(None).unwrap();
        cache.tick(Some(Request {
            requester: fetch.requester,
            addr: 0,
            kind: RequestKind::FetchRead,
        }));
        cache.tick(None);
        cache.tick(None);
        cache.take_front_reply();

        cache.accept(req(0));
        assert!(cache.tick(None).is_none(), "hit issues no parent request");
    }
}
