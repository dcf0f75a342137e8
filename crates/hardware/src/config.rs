//! Configuration system for the coherence engine.
//!
//! This module defines all configuration structures and enums used to parameterize
//! the caches and the simulation harness. It provides:
//! 1. **Defaults:** Baseline geometry, latency, MSHR and credit constants.
//! 2. **Structures:** Per-level cache geometry, per-level controller settings, memory,
//!    network and system shape.
//! 3. **Enums:** Replacement policy selection.
//!
//! Configuration is supplied as JSON (`Config::from_json_str` / `Config::from_json_file`);
//! every field is optional and falls back to the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::error::{CoherenceError, Result};

/// Default configuration constants.
///
/// These values define the baseline two-level hierarchy when not explicitly
/// overridden in a JSON configuration file.
mod defaults {
    /// Cache line size in bytes, shared by both levels.
    pub const LINE_BYTES: usize = 64;

    /// Private L1 size in bytes (32 KiB).
    pub const L1_SIZE: usize = 32 * 1024;

    /// Private L1 associativity.
    pub const L1_WAYS: usize = 4;

    /// L1 hit latency in cycles (request to processor response).
    pub const L1_HIT_LATENCY: u64 = 2;

    /// L1 tag lookup latency in cycles (request to outgoing message release).
    pub const L1_LOOKUP_LATENCY: u64 = 1;

    /// Shared L2 size in bytes (256 KiB).
    pub const L2_SIZE: usize = 256 * 1024;

    /// Shared L2 associativity.
    pub const L2_WAYS: usize = 8;

    /// L2 hit latency in cycles.
    pub const L2_HIT_LATENCY: u64 = 10;

    /// L2 tag lookup latency in cycles.
    pub const L2_LOOKUP_LATENCY: u64 = 4;

    /// L1 miss status holding register entries.
    pub const L1_MSHR_SIZE: usize = 8;

    /// L2 miss status holding register entries.
    pub const L2_MSHR_SIZE: usize = 16;

    /// Credits toward the network interface per outgoing link.
    pub const DOWNSTREAM_CREDITS: u32 = 8;

    /// Fixed memory controller access latency in cycles.
    pub const MEMORY_LATENCY: u64 = 100;

    /// Page size used to interleave lines over memory controllers and L2 banks (4 KiB).
    pub const PAGE_OFFSET_BITS: u32 = 12;

    /// Point-to-point network hop latency in cycles.
    pub const LINK_LATENCY: u64 = 2;

    /// Number of private L1 caches.
    pub const NUM_L1: usize = 2;

    /// Number of shared L2 banks.
    pub const NUM_L2: usize = 1;

    /// Number of memory controllers.
    pub const NUM_MC: usize = 1;

    /// Outstanding processor requests allowed per L1.
    pub const MAX_OUTSTANDING: usize = 4;

    /// L1s and L2 banks sit on separate nodes unless tiles are requested.
    pub const TILED: bool = false;
}

/// Cache replacement policy types.
///
/// Specifies the algorithm used to select which line to evict when a new
/// line must be installed in a full set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplacementPolicy {
    /// Least Recently Used; evicts the line accessed least recently.
    #[default]
    #[serde(alias = "Lru")]
    Lru,
    /// First In First Out; evicts lines in installation order (round-robin).
    #[serde(alias = "Fifo")]
    Fifo,
    /// Pseudo-random victim selection (deterministic xorshift).
    #[serde(alias = "Random")]
    Random,
}

/// Geometry and timing of one cache level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total cache size in bytes
    #[serde(default = "CacheConfig::default_size")]
    pub size_bytes: usize,

    /// Cache line size in bytes
    #[serde(default = "CacheConfig::default_line")]
    pub line_bytes: usize,

    /// Associativity (number of ways)
    #[serde(default = "CacheConfig::default_ways")]
    pub ways: usize,

    /// Replacement policy
    #[serde(default)]
    pub policy: ReplacementPolicy,

    /// Cycles from a hit to the processor response
    #[serde(default = "CacheConfig::default_hit_latency")]
    pub hit_latency: u64,

    /// Cycles from handling a request to releasing the messages it produced
    #[serde(default = "CacheConfig::default_lookup_latency")]
    pub lookup_latency: u64,
}

impl CacheConfig {
    /// Returns the default cache size in bytes.
    fn default_size() -> usize {
        defaults::L1_SIZE
    }

    /// Returns the default cache line size in bytes.
    fn default_line() -> usize {
        defaults::LINE_BYTES
    }

    /// Returns the default cache associativity (number of ways).
    fn default_ways() -> usize {
        defaults::L1_WAYS
    }

    /// Returns the default hit latency in cycles.
    fn default_hit_latency() -> u64 {
        defaults::L1_HIT_LATENCY
    }

    /// Returns the default lookup latency in cycles.
    fn default_lookup_latency() -> u64 {
        defaults::L1_LOOKUP_LATENCY
    }

    /// Returns the default private L1 configuration.
    pub fn default_l1() -> Self {
        Self::default()
    }

    /// Returns the default shared L2 configuration.
    pub fn default_l2() -> Self {
        Self {
            size_bytes: defaults::L2_SIZE,
            line_bytes: defaults::LINE_BYTES,
            ways: defaults::L2_WAYS,
            policy: ReplacementPolicy::default(),
            hit_latency: defaults::L2_HIT_LATENCY,
            lookup_latency: defaults::L2_LOOKUP_LATENCY,
        }
    }

    /// Number of sets implied by size, line size and associativity.
    ///
    /// Returns 0 when the geometry is degenerate; `Config::validate` rejects that case.
    pub const fn num_sets(&self) -> usize {
        let set_bytes = self.line_bytes * self.ways;
        if set_bytes == 0 { 0 } else { self.size_bytes / set_bytes }
    }

    /// Checks that the geometry can be realized by a tag store.
    ///
    /// # Arguments
    ///
    /// * `level` - Name used in the error message (e.g. `"l1"`).
    pub fn validate(&self, level: &str) -> Result<()> {
        if self.ways == 0 {
            return Err(CoherenceError::InvalidGeometry(format!("{level}: ways must be non-zero")));
        }
        if !self.line_bytes.is_power_of_two() {
            return Err(CoherenceError::InvalidGeometry(format!(
                "{level}: line_bytes {} is not a power of two",
                self.line_bytes
            )));
        }
        if self.size_bytes % (self.line_bytes * self.ways) != 0 {
            return Err(CoherenceError::InvalidGeometry(format!(
                "{level}: size_bytes {} is not a multiple of line_bytes * ways",
                self.size_bytes
            )));
        }
        let sets = self.num_sets();
        if !sets.is_power_of_two() {
            return Err(CoherenceError::InvalidGeometry(format!(
                "{level}: {sets} sets is not a power of two"
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    /// Creates the default private L1 geometry: 32 KiB, 4-way, 64-byte lines, LRU.
    fn default() -> Self {
        Self {
            size_bytes: defaults::L1_SIZE,
            line_bytes: defaults::LINE_BYTES,
            ways: defaults::L1_WAYS,
            policy: ReplacementPolicy::default(),
            hit_latency: defaults::L1_HIT_LATENCY,
            lookup_latency: defaults::L1_LOOKUP_LATENCY,
        }
    }
}

/// Controller resources of one cache level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// MSHR entries (maximum in-flight lines)
    #[serde(default = "CacheSettings::default_mshr")]
    pub mshr_size: usize,

    /// Credits toward the network interface on the outgoing link
    #[serde(default = "CacheSettings::default_credits")]
    pub downstream_credits: u32,
}

impl CacheSettings {
    fn default_mshr() -> usize {
        defaults::L1_MSHR_SIZE
    }

    fn default_credits() -> u32 {
        defaults::DOWNSTREAM_CREDITS
    }

    /// Returns the default L1 controller settings.
    pub fn default_l1() -> Self {
        Self::default()
    }

    /// Returns the default L2 controller settings.
    pub fn default_l2() -> Self {
        Self {
            mshr_size: defaults::L2_MSHR_SIZE,
            downstream_credits: defaults::DOWNSTREAM_CREDITS,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            mshr_size: defaults::L1_MSHR_SIZE,
            downstream_credits: defaults::DOWNSTREAM_CREDITS,
        }
    }
}

/// Memory controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Fixed access latency in cycles
    #[serde(default = "MemoryConfig::default_latency")]
    pub latency: u64,

    /// Interleaving granularity: lines are mapped to controllers by page
    #[serde(default = "MemoryConfig::default_page_offset_bits")]
    pub page_offset_bits: u32,
}

impl MemoryConfig {
    fn default_latency() -> u64 {
        defaults::MEMORY_LATENCY
    }

    fn default_page_offset_bits() -> u32 {
        defaults::PAGE_OFFSET_BITS
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            latency: defaults::MEMORY_LATENCY,
            page_offset_bits: defaults::PAGE_OFFSET_BITS,
        }
    }
}

/// Harness network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Cycles for a packet (or a returned credit) to cross one hop
    #[serde(default = "NetworkConfig::default_link_latency")]
    pub link_latency: u64,
}

impl NetworkConfig {
    fn default_link_latency() -> u64 {
        defaults::LINK_LATENCY
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            link_latency: defaults::LINK_LATENCY,
        }
    }
}

/// Shape of the simulated system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Private L1 caches (one per processor stub)
    #[serde(default = "SystemConfig::default_num_l1")]
    pub num_l1: usize,

    /// Shared L2 banks, page-interleaved
    #[serde(default = "SystemConfig::default_num_l2")]
    pub num_l2: usize,

    /// Memory controllers, page-interleaved
    #[serde(default = "SystemConfig::default_num_mc")]
    pub num_mc: usize,

    /// Processor requests each stub keeps in flight
    #[serde(default = "SystemConfig::default_max_outstanding")]
    pub max_outstanding: usize,

    /// Put L2 bank i on the same node as L1 i; traffic between them skips the network
    #[serde(default = "SystemConfig::default_tiled")]
    pub tiled: bool,
}

impl SystemConfig {
    fn default_num_l1() -> usize {
        defaults::NUM_L1
    }

    fn default_num_l2() -> usize {
        defaults::NUM_L2
    }

    fn default_num_mc() -> usize {
        defaults::NUM_MC
    }

    fn default_max_outstanding() -> usize {
        defaults::MAX_OUTSTANDING
    }

    fn default_tiled() -> bool {
        defaults::TILED
    }

    /// Node id of L2 bank `index`.
    pub const fn l2_node(&self, index: usize) -> usize {
        if self.tiled { index } else { self.num_l1 + index }
    }

    /// Node id of memory controller `index`.
    pub const fn mc_node(&self, index: usize) -> usize {
        if self.tiled {
            self.num_l1 + index
        } else {
            self.num_l1 + self.num_l2 + index
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            num_l1: defaults::NUM_L1,
            num_l2: defaults::NUM_L2,
            num_mc: defaults::NUM_MC,
            max_outstanding: defaults::MAX_OUTSTANDING,
            tiled: defaults::TILED,
        }
    }
}

/// Root configuration.
///
/// # Examples
///
/// ```
/// use cohsim_core::config::{Config, ReplacementPolicy};
///
/// let config = Config::from_json_str(r#"{ "l1": { "ways": 2, "policy": "FIFO" } }"#).unwrap();
/// assert_eq!(config.l1.ways, 2);
/// assert_eq!(config.l1.policy, ReplacementPolicy::Fifo);
/// assert_eq!(config.l2.ways, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Private L1 geometry
    #[serde(default = "CacheConfig::default_l1")]
    pub l1: CacheConfig,

    /// Shared L2 geometry
    #[serde(default = "CacheConfig::default_l2")]
    pub l2: CacheConfig,

    /// L1 controller resources
    #[serde(default = "CacheSettings::default_l1")]
    pub l1_settings: CacheSettings,

    /// L2 controller resources
    #[serde(default = "CacheSettings::default_l2")]
    pub l2_settings: CacheSettings,

    /// Memory controllers
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Harness network
    #[serde(default)]
    pub network: NetworkConfig,

    /// System shape
    #[serde(default)]
    pub system: SystemConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            l1: CacheConfig::default_l1(),
            l2: CacheConfig::default_l2(),
            l1_settings: CacheSettings::default_l1(),
            l2_settings: CacheSettings::default_l2(),
            memory: MemoryConfig::default(),
            network: NetworkConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

impl Config {
    /// Parses and validates a JSON configuration.
    ///
    /// # Arguments
    ///
    /// * `json` - JSON text; absent fields take their defaults.
    ///
    /// # Returns
    ///
    /// The validated configuration, or a `Json` / `InvalidGeometry` / `Config` error.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks geometry and resource counts.
    pub fn validate(&self) -> Result<()> {
        self.l1.validate("l1")?;
        self.l2.validate("l2")?;
        if self.l1.line_bytes != self.l2.line_bytes {
            return Err(CoherenceError::Config(format!(
                "l1 and l2 line sizes differ ({} vs {})",
                self.l1.line_bytes, self.l2.line_bytes
            )));
        }
        for (level, settings) in [("l1", &self.l1_settings), ("l2", &self.l2_settings)] {
            if settings.mshr_size == 0 {
                return Err(CoherenceError::Config(format!("{level}: mshr_size must be non-zero")));
            }
            if settings.downstream_credits == 0 {
                return Err(CoherenceError::Config(format!(
                    "{level}: downstream_credits must be non-zero"
                )));
            }
        }
        let system = &self.system;
        if system.num_l1 == 0 || system.num_l2 == 0 || system.num_mc == 0 {
            return Err(CoherenceError::Config(
                "system needs at least one l1, one l2 and one memory controller".to_string(),
            ));
        }
        if system.tiled && system.num_l2 > system.num_l1 {
            return Err(CoherenceError::Config(format!(
                "tiled system has {} l2 banks but only {} tiles",
                system.num_l2, system.num_l1
            )));
        }
        if system.max_outstanding == 0 {
            return Err(CoherenceError::Config("max_outstanding must be non-zero".to_string()));
        }
        if (self.memory.page_offset_bits as usize) < self.l1.line_bytes.trailing_zeros() as usize {
            return Err(CoherenceError::Config(
                "page_offset_bits must cover at least one cache line".to_string(),
            ));
        }
        Ok(())
    }
}
