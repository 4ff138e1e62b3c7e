//! The root of the hierarchy: fixed-latency, always-replies, no parent
//! of its own.

use std::collections::VecDeque;

use super::Request;

#[derive(Debug)]
pub struct MainMemory {
    latency: u32,
    in_flight: VecDeque<(Request, u32)>,
}

impl MainMemory {
    pub fn new(latency: u32) -> Self {
        Self {
            latency: latency.max(1),
            in_flight: VecDeque::new(),
        }
    }

    pub fn reset(&mut self) {
        self.in_flight.clear();
    }

    pub fn accept(&mut self, req: Request) {
        self.in_flight.push_back((req, self.latency - 1));
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// The reply visible this cycle, if the oldest in-flight request has
    /// finished counting down.
    pub fn take_reply(&mut self) -> Option<Request> {
        match self.in_flight.front() {
            Some((_, 0)) => Some(self.in_flight.pop_front().unwrap().0),
            _ => None,
        }
    }

    pub fn tick(&mut self) {
        for (_, remaining) in &mut self.in_flight {
            if *remaining > 0 {
                *remaining -= 1;
            }
        }
    }

    pub fn tock(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstrId;
    use crate::memory_system::{RequestId, RequestKind};

    #[test]
    fn reply_arrives_after_configured_latency() {
        let mut mem = MainMemory::new(3);
        mem.accept(Request {
            requester: RequestId::Scalar(InstrId(1)),
            addr: 0x1000,
            kind: RequestKind::FetchRead,
        });
        assert!(mem.take_reply().is_none());
        mem.tick();
        assert!(mem.take_reply().is_none());
        mem.tick();
        assert!(mem.take_reply().is_some());
    }
}
