//! A trace-driven, cycle-accurate microarchitecture pipeline simulator.
//!
//! `pipesim-core` replays an already-resolved instruction trace through
//! a configurable pipeline model: fetch, schedule, and a set of scalar
//! and vector functional units sitting on top of a multi-level cache
//! hierarchy. It does not execute instructions (no ALU, no register
//! values) — every cycle-level effect (stalls, hazards, cache misses,
//! vector slicing) is reproduced from the trace's own load/store
//! addresses and register lists.
//!
//! Layout:
//! - [`instruction`]/[`decode`]/[`disasm`]/[`trace_source`]: trace
//!   ingest, turning a raw record into a classified [`Instruction`].
//! - [`buffered_queue`]/[`scoreboard`]/[`pipeline`]: the generic
//!   two-phase structures every structural unit is built from.
//! - [`fetch_unit`]/[`sched_unit`]/[`exec_unit`]/[`memory_system`]: the
//!   four structural units [`cpu::Cpu`] drives each cycle.
//! - [`config`]: the JSON configuration surface and pipe-map loading.
//! - [`counter`]: cycle-level accounting and reporting.

/// Error types shared across configuration, trace-ingest, and
/// simulation-core surfaces.
pub mod common;
/// Microarchitecture configuration: JSON shape, merge/override, pipe maps.
pub mod config;
/// Cycle-level accounting: the `Counter` aggregate.
pub mod counter;
/// `Cpu`: wires the four structural units into the main simulation loop.
pub mod cpu;
/// Turns a raw trace record into a classified `Instruction`.
pub mod decode;
/// Mnemonic classification tables and register-name normalization.
pub mod disasm;
/// Execution: scoreboards, pipelines, and memory-access issuance.
pub mod exec_unit;
/// Instruction fetch from a `TraceSource` into the dispatch front end.
pub mod fetch_unit;
/// The `Instruction` value type and its small supporting types.
pub mod instruction;
/// The cache hierarchy.
pub mod memory_system;
/// The uniform module lifecycle shared by every structural unit.
pub mod module;
/// Execution pipelines: scalar and vector functional-unit lanes.
pub mod pipeline;
/// Schedule: in-order dispatch from fetch into the execution core.
pub mod sched_unit;
/// Register scoreboards (scalar and vector variants).
pub mod scoreboard;
/// Trace ingestion: `TraceSource` and its JSON-line/binary readers.
pub mod trace_source;

mod buffered_queue;

pub use crate::common::{ConfigError, SimError, TraceError};
pub use crate::config::Config;
pub use crate::counter::Counter;
pub use crate::cpu::Cpu;
pub use crate::instruction::{InstrId, Instruction};
pub use crate::trace_source::{BinaryFrameTraceSource, JsonLineTraceSource, TraceSource};
