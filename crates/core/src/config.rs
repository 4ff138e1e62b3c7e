//! The microarchitecture configuration: the JSON shape `pipesim-cli`
//! loads (`-u`), the `-e`/`-s` extend/override machinery, pipe-map
//! loading, and the small size-with-unit-suffix parser cache and
//! main-memory sizes are written with.
//!
//! `Config::validate` walks every cross-referencing field by hand
//! (there is no generic JSON-schema dependency in this stack) and is
//! the only place `ConfigError::SchemaViolation` is raised from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::common::ConfigError;
use crate::exec_unit::ExecUnit;
use crate::fetch_unit::FetchUnit;
use crate::instruction::RegisterFileKind;
use crate::memory_system::{CacheConfig, InclusionPolicy, MemorySystem, Placement, WritePolicy};
use crate::sched_unit::{BranchPrediction, SchedUnit};

/// A byte count parsed from a bare integer or a unit-suffixed string
/// (`"4kb"`, `"2MB"`, `"1gb"`). Suffixes are case-insensitive; a bare
/// number is bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl ByteSize {
    fn parse(s: &str) -> Option<u64> {
        let s = s.trim();
        let (digits, mult) = if let Some(d) = s.strip_suffix(|c: char| c.is_ascii_alphabetic()) {
            let suffix_len = s.len() - d.len();
            let suffix = s[s.len() - suffix_len..].to_ascii_lowercase();
            let mult = match suffix.as_str() {
                "b" => 1,
                "kb" => 1024,
                "mb" => 1024 * 1024,
                "gb" => 1024 * 1024 * 1024,
                "tb" => 1024u64.pow(4),
                _ => return None,
            };
            (d, mult)
        } else {
            (s, 1)
        };
        digits.trim().parse::<u64>().ok().map(|n| n * mult)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Str(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => Ok(ByteSize(n)),
            Repr::Str(s) => ByteSize::parse(&s)
                .map(ByteSize)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid size suffix: {s}"))),
        }
    }
}

/// One entry in `config.issue_queues`.
#[derive(Clone, Debug, Deserialize)]
pub struct IssueQueueConfig {
    pub size: Option<usize>,
}

/// One entry in `config.register_files`.
#[derive(Clone, Debug, Deserialize)]
pub struct RegisterFileConfig {
    #[serde(rename = "type")]
    pub kind: RegisterFileKind,
    #[serde(default)]
    pub read_ports: Option<usize>,
    #[serde(default)]
    pub write_ports: Option<usize>,
    #[serde(default)]
    pub dedicated_read_ports: Vec<String>,
    #[serde(default)]
    pub dedicated_write_ports: Vec<String>,
}

/// One entry in `config.functional_units`.
#[derive(Clone, Debug, Deserialize)]
pub struct FunctionalUnitConfig {
    #[serde(rename = "type")]
    pub kind: RegisterFileKind,
    #[serde(default = "FunctionalUnitConfig::default_count")]
    pub count: usize,
    pub issue_queue: String,
    pub depth: usize,
    #[serde(default)]
    pub pipelined: bool,
    #[serde(default)]
    pub can_skip_eiq: bool,
    #[serde(default)]
    pub eiq_size: Option<usize>,
    #[serde(default)]
    pub writeback_buff_size: Option<usize>,
    #[serde(default)]
    pub memory_interface: Option<String>,
    #[serde(default)]
    pub load_stage: Option<usize>,
    #[serde(default)]
    pub fixed_load_latency: Option<usize>,
    #[serde(default)]
    pub store_stage: Option<usize>,
    #[serde(default)]
    pub fixed_store_latency: Option<usize>,
}

impl FunctionalUnitConfig {
    fn default_count() -> usize {
        1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PlacementKind {
    DirectMap,
    SetAssoc,
}

#[derive(Clone, Debug, Deserialize)]
struct PlacementConfig {
    #[serde(rename = "type")]
    kind: PlacementKind,
    #[serde(default)]
    set_size: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
struct LatencyConfig {
    read: u32,
    write: u32,
    #[serde(default)]
    fetch_read: Option<u32>,
    #[serde(default)]
    fetch_write: Option<u32>,
}

/// One level of `config.memory_system.levels`, front (closest to the
/// pipelines) to back.
#[derive(Clone, Debug, Deserialize)]
pub struct CacheLevelConfig {
    pub name: String,
    pub line_size: ByteSize,
    pub size: ByteSize,
    placement: PlacementConfig,
    write_policy: WritePolicyConfig,
    inclusion: InclusionConfig,
    latency: LatencyConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WritePolicyConfig {
    WriteBack,
    WriteThrough,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum InclusionConfig {
    Inclusive,
    Exclusive,
}

/// `config.memory_system.main_memory`.
#[derive(Clone, Debug, Deserialize)]
pub struct MainMemoryConfig {
    #[serde(default = "MainMemoryConfig::default_latency")]
    pub latency: u32,
}

impl MainMemoryConfig {
    fn default_latency() -> u32 {
        100
    }
}

/// `config.memory_system`.
#[derive(Clone, Debug, Deserialize)]
pub struct MemorySystemConfig {
    #[serde(default)]
    pub levels: Vec<CacheLevelConfig>,
    #[serde(default)]
    pub main_memory: MainMemoryConfig,
}

impl Default for MainMemoryConfig {
    fn default() -> Self {
        Self {
            latency: Self::default_latency(),
        }
    }
}

impl Default for MemorySystemConfig {
    fn default() -> Self {
        Self {
            levels: Vec::new(),
            main_memory: MainMemoryConfig::default(),
        }
    }
}

/// The full microarchitecture configuration, as loaded from `-u` and
/// merged with `-e`/`-s`.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_branch_prediction")]
    pub branch_prediction: BranchPrediction,
    pub fetch_rate: usize,
    #[serde(default)]
    pub fetch_queue_size: Option<usize>,
    /// `None` = unlimited (every fetched slot may dispatch the same cycle).
    #[serde(default)]
    pub decode_rate: Option<usize>,
    #[serde(default = "Config::default_vector_slices")]
    pub vector_slices: usize,
    #[serde(default)]
    pub issue_queues: HashMap<String, IssueQueueConfig>,
    #[serde(default)]
    pub register_files: HashMap<String, RegisterFileConfig>,
    pub functional_units: HashMap<String, FunctionalUnitConfig>,
    #[serde(default)]
    pub pipe_maps: Vec<PathBuf>,
    #[serde(default)]
    pub memory_system: MemorySystemConfig,
}

impl Config {
    fn default_branch_prediction() -> BranchPrediction {
        BranchPrediction::NoPrediction
    }

    fn default_vector_slices() -> usize {
        4
    }

    /// Parse a config document already merged with its `-e` extensions
    /// and `-s` overrides.
    pub fn from_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::SchemaViolation {
            path: "$".to_string(),
            reason: e.to_string(),
        })
    }

    /// Cross-reference every field that names another field: every
    /// `functional_units[_].issue_queue` must name a key in
    /// `issue_queues`; every `register_files[_].type` and
    /// `functional_units[_].type` must be a recognized kind (always
    /// true here since `RegisterFileKind` is a closed enum, so this is
    /// really about dangling string references).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_rate == 0 {
            return Err(ConfigError::SchemaViolation {
                path: "fetch_rate".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for (name, fu) in &self.functional_units {
            if !self.issue_queues.contains_key(&fu.issue_queue) {
                return Err(ConfigError::SchemaViolation {
                    path: format!("functional_units.{name}.issue_queue"),
                    reason: format!("names unknown issue queue `{}`", fu.issue_queue),
                });
            }
            if fu.depth == 0 {
                return Err(ConfigError::SchemaViolation {
                    path: format!("functional_units.{name}.depth"),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        for level in &self.memory_system.levels {
            if level.placement.kind == PlacementKind::SetAssoc && level.placement.set_size.is_none() {
                return Err(ConfigError::SchemaViolation {
                    path: format!("memory_system.levels[{}].placement.set_size", level.name),
                    reason: "set_assoc placement requires set_size".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Deep-merge a `-e` extension document into this config's JSON
    /// representation: object keys merge recursively, every other
    /// value (including whole arrays) is overwritten wholesale.
    pub fn merge_extension(base: &mut serde_json::Value, ext: serde_json::Value) {
        deep_merge(base, ext);
    }

    /// Apply one `-s a.b.c=VALUE` override: walk the dotted path and
    /// replace the leaf. `VALUE` is parsed as JSON first, falling back
    /// to a bare JSON string if that fails (so `-s fetch_rate=2` and
    /// `-s uarch.name=foo` both work without quoting).
    pub fn apply_override(base: &mut serde_json::Value, path: &str, value: &str) -> Result<(), ConfigError> {
        let parsed = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        let segments: Vec<&str> = path.split('.').collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(ConfigError::UnknownOverridePath(path.to_string()));
        };
        let mut cursor = base;
        for seg in parents {
            cursor = cursor
                .get_mut(*seg)
                .ok_or_else(|| ConfigError::UnknownOverridePath(path.to_string()))?;
        }
        let obj = cursor
            .as_object_mut()
            .ok_or_else(|| ConfigError::UnknownOverridePath(path.to_string()))?;
        if !obj.contains_key(*leaf) {
            return Err(ConfigError::UnknownOverridePath(path.to_string()));
        }
        obj.insert((*leaf).to_string(), parsed);
        Ok(())
    }
}

fn deep_merge(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                deep_merge(base_map.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (base, patch) => *base = patch,
    }
}

/// Load and deep-merge a base config file with its `-e` extensions,
/// apply every `-s` override, then parse and validate the result.
/// Mirrors the reference tool's `merge_config`/`apply_setting` flow.
pub fn load_config(
    base_path: &Path,
    extensions: &[PathBuf],
    overrides: &[String],
) -> Result<Config, ConfigError> {
    let mut value = read_json(base_path)?;
    for ext_path in extensions {
        let ext = read_json(ext_path)?;
        Config::merge_extension(&mut value, ext);
    }
    for setting in overrides {
        let Some((path, val)) = setting.split_once('=') else {
            return Err(ConfigError::UnknownOverridePath(setting.clone()));
        };
        Config::apply_override(&mut value, path, val)?;
    }
    let config = Config::from_value(value)?;
    config.validate()?;
    Ok(config)
}

fn read_json(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Load one or more pipe-map files, dropping `"UNKNOWN"`-valued
/// entries and raising `ConfigError::DuplicatePipeMapping` if a
/// mnemonic is assigned two different non-`UNKNOWN` kinds across files.
pub fn load_pipe_maps(paths: &[PathBuf]) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();
    for path in paths {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let raw: HashMap<String, String> = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;
        for (mnemonic, kind) in raw {
            if kind == "UNKNOWN" {
                continue;
            }
            if let Some(existing) = map.get(&mnemonic) {
                if *existing != kind {
                    return Err(ConfigError::DuplicatePipeMapping {
                        mnemonic,
                        a: existing.clone(),
                        b: kind,
                    });
                }
            } else {
                map.insert(mnemonic, kind);
            }
        }
    }
    Ok(map)
}

fn placement_of(cfg: &PlacementConfig) -> Placement {
    match cfg.kind {
        PlacementKind::DirectMap => Placement::DirectMapped,
        PlacementKind::SetAssoc => Placement::SetAssociative,
    }
}

fn build_cache_config(level: &CacheLevelConfig) -> CacheConfig {
    let line_size = level.line_size.0.max(1);
    let ways = match level.placement.kind {
        PlacementKind::DirectMap => 1,
        PlacementKind::SetAssoc => level.placement.set_size.unwrap_or(1).max(1),
    };
    let num_sets = ((level.size.0 / line_size) as usize / ways).max(1);
    let mut latency = HashMap::new();
    latency.insert(crate::memory_system::RequestKind::Read, level.latency.read);
    latency.insert(crate::memory_system::RequestKind::Write, level.latency.write);
    latency.insert(
        crate::memory_system::RequestKind::FetchRead,
        level.latency.fetch_read.unwrap_or(level.latency.read),
    );
    latency.insert(
        crate::memory_system::RequestKind::FetchWrite,
        level.latency.fetch_write.unwrap_or(level.latency.write),
    );
    CacheConfig {
        name: level.name.clone(),
        placement: placement_of(&level.placement),
        line_size,
        num_sets,
        ways,
        write_policy: match level.write_policy {
            WritePolicyConfig::WriteBack => WritePolicy::WriteBack,
            WritePolicyConfig::WriteThrough => WritePolicy::WriteThrough,
        },
        inclusion: match level.inclusion {
            InclusionConfig::Inclusive => InclusionPolicy::Inclusive,
            InclusionConfig::Exclusive => InclusionPolicy::Exclusive,
        },
        latency,
    }
}

/// Build the memory hierarchy named in `config.memory_system`.
pub fn build_memory_system(config: &Config) -> MemorySystem {
    let levels = config.memory_system.levels.iter().map(build_cache_config).collect();
    MemorySystem::new(levels, config.memory_system.main_memory.latency)
}

/// Build the execution core (scoreboards, pipelines, pipe-map) named
/// by `config.functional_units`/`config.register_files` plus the
/// mnemonic routing loaded from `config.pipe_maps`.
///
/// `count > 1` on a functional unit is accepted but folded to a single
/// pipeline instance (see `DESIGN.md`); only one physical unit per
/// configured kind is modeled.
pub fn build_exec_unit(config: &Config) -> Result<ExecUnit, ConfigError> {
    let pipe_map = load_pipe_maps(&config.pipe_maps)?;

    let mut units = HashMap::new();
    for (name, fu) in &config.functional_units {
        let eiq = fu.eiq_size.or(config.issue_queues.get(&fu.issue_queue).and_then(|q| q.size));
        let wbq = fu.writeback_buff_size;
        match fu.kind {
            RegisterFileKind::Vector => {
                let (id, kind) = crate::exec_unit::vector_unit_with_memory(
                    name.clone(),
                    fu.depth,
                    eiq,
                    wbq,
                    fu.load_stage,
                    fu.fixed_load_latency,
                    fu.store_stage,
                    fu.fixed_store_latency,
                );
                units.insert(id, kind);
            }
            RegisterFileKind::Scalar | RegisterFileKind::Csr => {
                let (id, kind) = crate::exec_unit::scalar_unit_with_memory(
                    name.clone(),
                    fu.depth,
                    eiq,
                    wbq,
                    fu.load_stage,
                    fu.fixed_load_latency,
                    fu.store_stage,
                    fu.fixed_store_latency,
                );
                units.insert(id, kind);
            }
        }
    }

    let scalar_rf = config
        .register_files
        .values()
        .find(|rf| rf.kind == RegisterFileKind::Scalar);
    let vector_rf = config
        .register_files
        .values()
        .find(|rf| rf.kind == RegisterFileKind::Vector);

    let empty: Vec<String> = Vec::new();
    Ok(ExecUnit::new(
        pipe_map,
        units,
        config.vector_slices as u16,
        scalar_rf.and_then(|rf| rf.read_ports),
        scalar_rf.and_then(|rf| rf.write_ports),
        scalar_rf.map_or(&empty, |rf| &rf.dedicated_read_ports),
        scalar_rf.map_or(&empty, |rf| &rf.dedicated_write_ports),
        vector_rf.and_then(|rf| rf.read_ports),
        vector_rf.and_then(|rf| rf.write_ports),
        vector_rf.map_or(&empty, |rf| &rf.dedicated_read_ports),
        vector_rf.map_or(&empty, |rf| &rf.dedicated_write_ports),
    ))
}

/// Build the schedule and fetch units named by the top-level config
/// fields.
pub fn build_sched_and_fetch(config: &Config) -> (SchedUnit, FetchUnit) {
    let sched = SchedUnit::new(config.decode_rate.unwrap_or(usize::MAX), config.branch_prediction);
    let fetch = FetchUnit::new(config.fetch_rate, 4, config.fetch_queue_size);
    (sched, fetch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_parses_unit_suffixes() {
        assert_eq!(ByteSize::parse("4kb"), Some(4096));
        assert_eq!(ByteSize::parse("2MB"), Some(2 * 1024 * 1024));
        assert_eq!(ByteSize::parse("1024"), Some(1024));
        assert_eq!(ByteSize::parse("bogus"), None);
    }

    #[test]
    fn override_replaces_a_leaf_by_dotted_path() {
        let mut v = serde_json::json!({"fetch_rate": 1, "nested": {"x": 2}});
        Config::apply_override(&mut v, "nested.x", "9").unwrap();
        assert_eq!(v["nested"]["x"], 9);
    }

    #[test]
    fn override_on_unknown_path_is_an_error() {
        let mut v = serde_json::json!({"fetch_rate": 1});
        let err = Config::apply_override(&mut v, "nope", "1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOverridePath(_)));
    }

    #[test]
    fn extension_merges_nested_objects_without_clobbering_siblings() {
        let mut base = serde_json::json!({"a": {"x": 1, "y": 2}});
        let ext = serde_json::json!({"a": {"y": 9}});
        Config::merge_extension(&mut base, ext);
        assert_eq!(base["a"]["x"], 1);
        assert_eq!(base["a"]["y"], 9);
    }

    #[test]
    fn unknown_pipe_mapping_is_dropped_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, r#"{"add": "alu", "frobnicate": "UNKNOWN"}"#).unwrap();
        let map = load_pipe_maps(&[path]).unwrap();
        assert_eq!(map.get("add").map(String::as_str), Some("alu"));
        assert!(!map.contains_key("frobnicate"));
    }

    #[test]
    fn conflicting_pipe_mapping_across_files_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, r#"{"add": "alu"}"#).unwrap();
        std::fs::write(&b, r#"{"add": "fpu"}"#).unwrap();
        let err = load_pipe_maps(&[a, b]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePipeMapping { .. }));
    }
}
