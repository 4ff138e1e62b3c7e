//! Error types for configuration, trace ingest, and simulation faults.
//!
//! Every fallible surface in the crate funnels into one of these three
//! enums. None of them are recoverable: a `ConfigError` aborts before the
//! first cycle, a `TraceError` aborts mid-run, and `SimError` is the
//! top-level type `Cpu::simulate` returns to its caller. Transient
//! conditions (port exhaustion, a full queue, a dependency not yet ready)
//! are never represented here — they are plain `bool` stall predicates
//! that the caller retries next cycle.

use std::path::PathBuf;

/// Fatal error in the microarchitecture configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field failed schema validation (wrong type, out of range, or a
    /// cross-reference to a key that doesn't exist).
    #[error("schema violation at {path}: {reason}")]
    SchemaViolation {
        /// Dotted path to the offending field.
        path: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// `memory_system.placement.type` named something other than
    /// `direct_map` or `set_assoc`.
    #[error("unknown cache placement type: {0}")]
    UnknownCacheType(String),

    /// A `-s PATH=VALUE` override named a path with no corresponding field.
    #[error("override path does not exist: {0}")]
    UnknownOverridePath(String),

    /// The same mnemonic appeared in two pipe-map files with two different,
    /// non-`UNKNOWN` functional-unit kinds.
    #[error("mnemonic `{mnemonic}` mapped to conflicting kinds `{a}` and `{b}`")]
    DuplicatePipeMapping {
        /// The conflicting mnemonic.
        mnemonic: String,
        /// The kind recorded first.
        a: String,
        /// The kind the later pipe-map file tried to assign.
        b: String,
    },

    /// A config or pipe-map file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config or pipe-map file was not valid JSON.
    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Fatal error while consuming the external instruction trace.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// A trace record could not be decoded.
    #[error("malformed trace record at line {line}: {source}")]
    Malformed {
        /// 1-based line number in the trace file.
        line: u64,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A fetched instruction's address was not a multiple of `inst_size`.
    /// Compressed/misaligned instructions are unsupported (§9 design
    /// notes) and surface as a fatal error rather than a guess.
    #[error("instruction at {addr:#x} is misaligned")]
    Misaligned {
        /// The offending address.
        addr: u64,
    },

    /// The binary frame trace format's length prefix didn't match the
    /// bytes actually available.
    #[error("truncated binary trace frame at offset {offset}")]
    TruncatedFrame {
        /// Byte offset of the truncated frame.
        offset: u64,
    },

    /// The trace stream could not be read at all (as opposed to being
    /// read but failing to decode, which is `Malformed`).
    #[error("failed to read trace stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level simulation error, returned by `Cpu::simulate`.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// `ExecUnit::get_functional_unit` found no pipe-map entry for a
    /// mnemonic. The pipe-map is considered incomplete and this is fatal.
    #[error("unknown mnemonic: {0}")]
    UnknownMnemonic(String),

    /// Propagated configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Propagated trace error.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// The deadlock watchdog fired: retired-instruction count held steady
    /// for 100 consecutive cycles while work remained.
    #[error("deadlock: retired instruction count unchanged for {cycles} cycles")]
    Deadlock {
        /// Number of cycles the count was observed to be unchanged.
        cycles: u64,
    },
}
