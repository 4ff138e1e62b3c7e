//! Instruction fetch: pulls records off a [`TraceSource`], decodes
//! them, and buffers up to `fetch_rate` per cycle into a queue
//! `SchedUnit` drains from the front.
//!
//! This simulator replays an already-resolved execution trace, so
//! fetch never predicts or walks the wrong path — the trace order
//! *is* the correct dynamic path. What the no-prediction policy (§5)
//! actually stalls is fetch itself: while an older branch is
//! unresolved, `FetchUnit` is told to hold rather than race ahead of
//! it, and buffers `None` placeholder slots so downstream occupancy
//! accounting still reflects a stalled cycle. Once the branch
//! resolves, those placeholders are dropped from the head and real
//! fetching resumes.

use std::collections::HashMap;

use crate::buffered_queue::BufferedQueue;
use crate::common::TraceError;
use crate::counter::Counter;
use crate::decode::decode;
use crate::instruction::{Instruction, InstrId, InstrIdAllocator};
use crate::module::{Phase, ThreeValued};
use crate::trace_source::TraceSource;

/// Address the unit expects its next fetch to land on, informational
/// only (the trace's own addresses are authoritative).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NextFetch {
    Sequential(u64),
    Unknown,
}

pub struct FetchUnit {
    fetch_rate: usize,
    inst_size: u64,
    queue: BufferedQueue<Option<InstrId>>,
    next: NextFetch,
    exhausted: bool,
    phase: Phase,
}

impl FetchUnit {
    pub fn new(fetch_rate: usize, inst_size: u64, queue_capacity: Option<usize>) -> Self {
        Self {
            fetch_rate,
            inst_size,
            queue: BufferedQueue::new(queue_capacity),
            next: NextFetch::Unknown,
            exhausted: false,
            phase: Phase::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        "FE"
    }

    /// True once the trace is drained and no fetched instruction
    /// remains queued — the point past which the simulation can never
    /// retire anything further.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.queue.is_empty()
    }

    pub fn peek(&self) -> Option<&Option<InstrId>> {
        self.queue.peek()
    }

    pub fn dequeue(&mut self) -> Option<Option<InstrId>> {
        self.queue.dequeue()
    }

    /// Discard leading `None` placeholder slots once the branch that
    /// stalled fetching has resolved.
    pub fn branch_resolved(&mut self) {
        self.queue.drop_leading_while(Option::is_none);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn three_valued(&self) -> ThreeValued {
        self.queue.three_valued()
    }

    pub fn reset(&mut self) {
        self.queue = BufferedQueue::new(None);
        self.next = NextFetch::Unknown;
        self.exhausted = false;
        self.phase = Phase::default();
    }

    /// Fetch up to `fetch_rate` instructions this cycle. `hold_for_branch`
    /// is the no-prediction fetch stall: while set, a single `None`
    /// placeholder is buffered instead of consulting the trace.
    pub fn tick(
        &mut self,
        trace: &mut dyn TraceSource,
        instructions: &mut HashMap<InstrId, Instruction>,
        allocator: &mut InstrIdAllocator,
        hold_for_branch: bool,
        counter: &mut Counter,
    ) -> Result<(), TraceError> {
        debug_assert_eq!(self.phase, Phase::Tock, "tick called out of phase");
        self.phase = Phase::Tick;
        if self.queue.is_buffer_full() {
            counter.bump_stall(self.name());
            return Ok(());
        }
        if hold_for_branch {
            self.queue.buffer(None);
            counter.bump_stall(self.name());
            return Ok(());
        }
        if self.exhausted {
            return Ok(());
        }
        for _ in 0..self.fetch_rate {
            if self.queue.is_buffer_full() {
                break;
            }
            let Some(record) = trace.next_record()? else {
                self.exhausted = true;
                break;
            };
            if record.addr % self.inst_size != 0 {
                return Err(TraceError::Misaligned { addr: record.addr });
            }
            // The trace always carries its own next address, either
            // implicitly (straight-line) or via `exception_redirect`; a
            // mismatch means the functional trace itself is inconsistent.
            if let NextFetch::Sequential(expected) = self.next {
                debug_assert_eq!(
                    record.addr, expected,
                    "trace address {:#x} does not match the predicted next fetch address {:#x}",
                    record.addr, expected
                );
            }
            self.next = NextFetch::Sequential(
                record.exception_redirect.unwrap_or(record.addr + self.inst_size),
            );
            let id = allocator.alloc();
            instructions.insert(id, decode(id, record));
            self.queue.buffer(Some(id));
        }
        Ok(())
    }

    pub fn tock(&mut self) {
        debug_assert_eq!(self.phase, Phase::Tick, "tock called out of phase");
        self.phase = Phase::Tock;
        self.queue.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_source::JsonLineTraceSource;
    use std::io::Cursor;

    fn two_record_trace() -> JsonLineTraceSource<Cursor<&'static str>> {
        JsonLineTraceSource::new(Cursor::new(
            "{\"addr\":0,\"mnemonic\":\"add\"}\n{\"addr\":4,\"mnemonic\":\"sub\"}\n",
        ))
    }

    #[test]
    fn fetches_up_to_fetch_rate_per_cycle() {
        let mut fe = FetchUnit::new(2, 4, None);
        let mut trace = two_record_trace();
        let mut instructions = HashMap::new();
        let mut alloc = InstrIdAllocator::default();
        let mut counter = Counter::default();
        fe.tick(&mut trace, &mut instructions, &mut alloc, false, &mut counter)
            .unwrap();
        fe.tock();
        assert_eq!(fe.pending(), 2);
        assert_eq!(instructions.len(), 2);
    }

    #[test]
    fn misaligned_address_is_rejected() {
        let mut fe = FetchUnit::new(1, 4, None);
        let mut trace = JsonLineTraceSource::new(Cursor::new(
            "{\"addr\":2,\"mnemonic\":\"add\"}\n",
        ));
        let mut instructions = HashMap::new();
        let mut alloc = InstrIdAllocator::default();
        let mut counter = Counter::default();
        let err = fe
            .tick(&mut trace, &mut instructions, &mut alloc, false, &mut counter)
            .unwrap_err();
        assert!(matches!(err, TraceError::Misaligned { addr: 2 }));
    }

    #[test]
    fn holding_for_a_branch_buffers_a_placeholder_not_a_fetch() {
        let mut fe = FetchUnit::new(1, 4, None);
        let mut trace = two_record_trace();
        let mut instructions = HashMap::new();
        let mut alloc = InstrIdAllocator::default();
        let mut counter = Counter::default();
        fe.tick(&mut trace, &mut instructions, &mut alloc, true, &mut counter)
            .unwrap();
        fe.tock();
        assert_eq!(fe.dequeue(), Some(None));
        assert!(instructions.is_empty());
    }

    #[test]
    fn branch_resolved_drops_leading_placeholders_only() {
        let mut fe = FetchUnit::new(1, 4, None);
        let mut trace = two_record_trace();
        let mut instructions = HashMap::new();
        let mut alloc = InstrIdAllocator::default();
        let mut counter = Counter::default();
        fe.tick(&mut trace, &mut instructions, &mut alloc, true, &mut counter)
            .unwrap();
        fe.tock();
        fe.tick(&mut trace, &mut instructions, &mut alloc, false, &mut counter)
            .unwrap();
        fe.tock();
        fe.branch_resolved();
        assert!(matches!(fe.peek(), Some(Some(_))));
    }
}
