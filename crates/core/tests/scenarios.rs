//! End-to-end scenarios: a small microarchitecture assembled from a
//! config document (the same path `pipesim-cli` drives), a short trace
//! fed in as newline-delimited JSON, and an assertion on the resulting
//! [`Counter`].

use std::io::Cursor;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use pipesim_core::config::{self, Config};
use pipesim_core::{Cpu, JsonLineTraceSource};

/// Write `pipe_map` to a temp file, point `config_json.pipe_maps` at
/// it, and build the `Cpu` the same way `pipesim-cli` does: parse the
/// config, then build each structural unit from it.
fn build_cpu(mut config_json: Value, pipe_map: &[(&str, &str)]) -> Cpu {
    let mut map = serde_json::Map::new();
    for (mnemonic, unit) in pipe_map {
        map.insert((*mnemonic).to_string(), Value::String((*unit).to_string()));
    }
    let file = tempfile::NamedTempFile::new().unwrap();
    serde_json::to_writer(&file, &Value::Object(map)).unwrap();
    config_json["pipe_maps"] = json!([file.path()]);

    let parsed = Config::from_value(config_json).unwrap();
    parsed.validate().unwrap();

    let mem = config::build_memory_system(&parsed);
    let exec = config::build_exec_unit(&parsed).unwrap();
    let (sched, fetch) = config::build_sched_and_fetch(&parsed);
    Cpu::new(mem, exec, sched, fetch)
}

fn run(cpu: &mut Cpu, trace_json: &str) {
    let mut trace = JsonLineTraceSource::new(Cursor::new(trace_json.to_string()));
    cpu.simulate(&mut trace).unwrap();
}

#[test]
fn trivial_trace_under_perfect_prediction_retires_every_instruction() {
    let config = json!({
        "branch_prediction": "perfect",
        "fetch_rate": 2,
        "decode_rate": 2,
        "issue_queues": {"alu_q": {}},
        "functional_units": {
            "alu": {"type": "scalar", "issue_queue": "alu_q", "depth": 1},
        },
    });
    let mut cpu = build_cpu(config, &[("add", "alu"), ("beq", "alu")]);

    let trace = "\
{\"addr\":0,\"mnemonic\":\"add\",\"inputs\":[],\"outputs\":[\"x1\"]}
{\"addr\":4,\"mnemonic\":\"beq\",\"inputs\":[\"x1\"],\"outputs\":[]}
{\"addr\":8,\"mnemonic\":\"add\",\"inputs\":[],\"outputs\":[\"x2\"]}
";
    run(&mut cpu, trace);
    assert_eq!(cpu.counter().retired_instruction_count, 3);
    assert_eq!(cpu.counter().branch_count, 1);
}

#[test]
fn raw_hazard_is_satisfied_by_bypass_before_the_producer_architecturally_retires() {
    // A 3-stage ALU: the second add's read-after-write dependency on
    // `x1` is satisfied by the producer's bypass value the cycle it
    // exits the pipe into the writeback queue, one cycle ahead of the
    // producer's own architectural writeback/retirement.
    let config = json!({
        "branch_prediction": "perfect",
        "fetch_rate": 1,
        "decode_rate": 1,
        "issue_queues": {"alu_q": {}},
        "functional_units": {
            "alu": {"type": "scalar", "issue_queue": "alu_q", "depth": 3},
        },
    });
    let mut cpu = build_cpu(config, &[("add", "alu")]);

    let trace = "\
{\"addr\":0,\"mnemonic\":\"add\",\"inputs\":[],\"outputs\":[\"x1\"]}
{\"addr\":4,\"mnemonic\":\"add\",\"inputs\":[\"x1\"],\"outputs\":[\"x2\"]}
";
    run(&mut cpu, trace);
    assert_eq!(cpu.counter().retired_instruction_count, 2);
    assert!(cpu.counter().cycles >= 6, "cycles = {}", cpu.counter().cycles);
}

#[test]
fn no_prediction_branch_stalls_fetch_and_dispatch_until_it_retires() {
    let config = json!({
        "branch_prediction": "no_prediction",
        "fetch_rate": 1,
        "decode_rate": 1,
        "issue_queues": {"alu_q": {}},
        "functional_units": {
            "alu": {"type": "scalar", "issue_queue": "alu_q", "depth": 2},
        },
    });
    let mut cpu = build_cpu(config, &[("beq", "alu"), ("add", "alu")]);

    let trace = "\
{\"addr\":0,\"mnemonic\":\"beq\",\"inputs\":[\"x1\"],\"outputs\":[]}
{\"addr\":4,\"mnemonic\":\"add\",\"inputs\":[],\"outputs\":[\"x2\"]}
";
    run(&mut cpu, trace);
    assert_eq!(cpu.counter().retired_instruction_count, 2);
    assert_eq!(cpu.counter().branch_count, 1);
    assert!(cpu.counter().stalls.get("SC").copied().unwrap_or(0) > 0);
}

#[test]
fn cache_miss_then_conflicting_access_triggers_a_dirty_writeback() {
    let config = json!({
        "branch_prediction": "perfect",
        "fetch_rate": 1,
        "decode_rate": 1,
        "issue_queues": {"lsu_q": {}},
        "functional_units": {
            "lsu": {
                "type": "scalar", "issue_queue": "lsu_q", "depth": 1,
                "load_stage": 0, "fixed_load_latency": 0,
                "store_stage": 0, "fixed_store_latency": 0,
            },
        },
        "memory_system": {
            "levels": [{
                "name": "L1",
                "line_size": 64,
                "size": 64,
                "placement": {"type": "direct_map"},
                "write_policy": "write_back",
                "inclusion": "inclusive",
                "latency": {"read": 2, "write": 2, "fetch_read": 1, "fetch_write": 1},
            }],
            "main_memory": {"latency": 8},
        },
    });
    let mut cpu = build_cpu(config, &[("sd", "lsu"), ("ld", "lsu")]);

    // A store to line 0, then a load to line 2 — with one 64-byte,
    // direct-mapped set, both map to the cache's only line, so the
    // load evicts the store's now-dirty line and must write it back
    // before its own refill completes.
    let trace = "\
{\"addr\":0,\"mnemonic\":\"sd\",\"inputs\":[],\"outputs\":[],\"stores\":[0]}
{\"addr\":4,\"mnemonic\":\"ld\",\"inputs\":[],\"outputs\":[\"x1\"],\"loads\":[128]}
";
    run(&mut cpu, trace);
    assert_eq!(cpu.counter().retired_instruction_count, 2);
    assert!(cpu.counter().store_stall_cycles > 0, "the store should miss and stall");
    assert!(cpu.counter().load_stall_cycles > 0, "the load should miss and stall");
}

#[test]
fn widening_vector_instruction_crosses_multiple_admission_passes() {
    // Two configured slices but an `lmul` of 2 needs four element
    // groups, so each instruction streams four slices through the
    // pipe one per cycle before it can retire — and the second
    // instruction chains off the first's result register.
    let config = json!({
        "branch_prediction": "perfect",
        "fetch_rate": 1,
        "decode_rate": 1,
        "vector_slices": 2,
        "issue_queues": {"valu_q": {}},
        "functional_units": {
            "valu": {"type": "vector", "issue_queue": "valu_q", "depth": 1},
        },
    });
    let mut cpu = build_cpu(config, &[("vadd.vv", "valu")]);

    let trace = "\
{\"addr\":0,\"mnemonic\":\"vadd.vv\",\"inputs\":[\"v1\",\"v2\"],\"outputs\":[\"v3\"],\"lmul\":\"2\"}
{\"addr\":4,\"mnemonic\":\"vadd.vv\",\"inputs\":[\"v3\",\"v2\"],\"outputs\":[\"v4\"],\"lmul\":\"2\"}
";
    run(&mut cpu, trace);
    assert_eq!(cpu.counter().retired_instruction_count, 2);
}

#[test]
fn flush_barrier_waits_for_every_older_in_flight_instruction_to_retire() {
    let config = json!({
        "branch_prediction": "perfect",
        "fetch_rate": 2,
        "decode_rate": 2,
        "issue_queues": {"alu_q": {}},
        "functional_units": {
            "alu": {"type": "scalar", "issue_queue": "alu_q", "depth": 4},
        },
    });
    let mut cpu = build_cpu(config, &[("add", "alu"), ("csrrw", "alu")]);

    // The csr write may not dispatch while the long-latency add ahead
    // of it is still in flight.
    let trace = "\
{\"addr\":0,\"mnemonic\":\"add\",\"inputs\":[],\"outputs\":[\"x1\"]}
{\"addr\":4,\"mnemonic\":\"csrrw\",\"inputs\":[],\"outputs\":[\"mstatus\"]}
{\"addr\":8,\"mnemonic\":\"add\",\"inputs\":[],\"outputs\":[\"x2\"]}
";
    run(&mut cpu, trace);
    assert_eq!(cpu.counter().retired_instruction_count, 3);
    assert!(
        cpu.counter().stalls.get("SC").copied().unwrap_or(0) > 0,
        "the flush should force at least one dispatch stall"
    );
}
