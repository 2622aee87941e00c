//! Key to entry store shared by the structural and result namespaces.

use std::{
    collections::HashMap,
    mem,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use pathway_core::{GeneratedPath, LevelId, PathMode, Theme, ValidationResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::version::VersionToken;

/// Logical partition of the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    /// Large derived data keyed by entity type and variant.
    Structural,
    /// One entry per distinct generation request.
    Result,
}

/// Identity of a generation request in the result namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    /// Level the path was generated for.
    pub level: LevelId,
    /// Theme the path was generated for.
    pub theme: Theme,
    /// Mode that produced the path.
    pub mode: PathMode,
    /// Seed the generator was driven with.
    pub seed: u64,
}

/// Key addressing a single cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheKey {
    /// Derived structural data such as capability trees.
    Structural {
        /// Kind of entity the data belongs to, such as a defense type.
        entity_type: String,
        /// Variant of the entity, such as an upgrade tier.
        variant: String,
    },
    /// Memoized generation or validation result.
    Result(ResultKey),
}

impl CacheKey {
    /// Builds a structural key.
    #[must_use]
    pub fn structural(entity_type: impl Into<String>, variant: impl Into<String>) -> Self {
        Self::Structural {
            entity_type: entity_type.into(),
            variant: variant.into(),
        }
    }

    /// Namespace the key belongs to.
    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        match self {
            Self::Structural { .. } => Namespace::Structural,
            Self::Result(_) => Namespace::Result,
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            Self::Structural {
                entity_type,
                variant,
            } => entity_type.capacity() + variant.capacity(),
            Self::Result(key) => key.theme.as_str().len(),
        }
    }
}

/// Approximate heap footprint of a cached value.
pub trait EstimateSize {
    /// Bytes owned by the value beyond its inline size.
    fn estimated_bytes(&self) -> usize;
}

impl EstimateSize for GeneratedPath {
    fn estimated_bytes(&self) -> usize {
        mem::size_of_val(self.points()) + self.theme().as_str().len()
    }
}

impl EstimateSize for ValidationResult {
    fn estimated_bytes(&self) -> usize {
        let issues: usize = self
            .issues()
            .iter()
            .map(|issue| mem::size_of_val(issue) + issue.message.len())
            .sum();
        let recommendations: usize = self
            .recommendations()
            .iter()
            .map(|text| mem::size_of::<String>() + text.len())
            .sum();
        issues + recommendations
    }
}

impl EstimateSize for serde_json::Value {
    fn estimated_bytes(&self) -> usize {
        let nested = match self {
            Self::String(text) => text.len(),
            Self::Array(items) => items.iter().map(EstimateSize::estimated_bytes).sum::<usize>(),
            Self::Object(map) => map
                .iter()
                .map(|(key, value)| key.len() + value.estimated_bytes())
                .sum::<usize>(),
            Self::Null | Self::Bool(_) | Self::Number(_) => 0,
        };
        mem::size_of::<Self>() + nested
    }
}

impl EstimateSize for String {
    fn estimated_bytes(&self) -> usize {
        self.capacity()
    }
}

/// Stored value together with its provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    key: CacheKey,
    value: V,
    version: VersionToken,
    created_at_ms: u64,
    #[serde(skip)]
    last_used: u64,
    #[serde(skip)]
    size_bytes: usize,
    #[serde(skip)]
    invalidated: bool,
}

impl<V> CacheEntry<V> {
    /// Key the entry is stored under.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Version token the value was derived under.
    #[must_use]
    pub const fn version(&self) -> VersionToken {
        self.version
    }

    /// Milliseconds since the Unix epoch when the entry was written.
    #[must_use]
    pub const fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Estimated bytes charged against the memory threshold.
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Reports whether a stale lookup logically deleted the entry.
    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Consumes the entry, yielding key, value and version.
    #[must_use]
    pub fn into_parts(self) -> (CacheKey, V, VersionToken) {
        (self.key, self.value, self.version)
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, PartialEq)]
pub enum Lookup<'a, V> {
    /// The entry exists and its version matches.
    Hit(&'a V),
    /// No usable entry exists.
    Miss,
    /// The entry exists but was derived from an older configuration.
    Stale,
}

impl<'a, V> Lookup<'a, V> {
    /// Value of a hit, if any.
    #[must_use]
    pub fn hit(self) -> Option<&'a V> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Stale => None,
        }
    }
}

/// Memory-pressure policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Footprint above which memory pressure is reported.
    pub threshold_bytes: usize,
    /// Fraction of the threshold cleanup shrinks the footprint to.
    pub cleanup_target_ratio: f32,
    /// Runs cleanup automatically after writes that push the footprint over the threshold.
    pub auto_cleanup: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            threshold_bytes: 512 * 1024,
            cleanup_target_ratio: 0.75,
            auto_cleanup: true,
        }
    }
}

/// Counters describing cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that found nothing usable, stale entries included.
    pub misses: u64,
    /// Lookups that found an entry with an outdated version.
    pub invalidations: u64,
    /// Cleanup passes that evicted at least one entry.
    pub cleanups: u64,
    /// Entries removed by cleanup or explicit eviction.
    pub evictions: u64,
    /// Time spent inside lookups.
    pub total_lookup_time: Duration,
    /// Live entries in the structural namespace.
    pub structural_entries: usize,
    /// Live entries in the result namespace.
    pub result_entries: usize,
    /// Current estimated footprint.
    pub footprint_bytes: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, zero before the first lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }

    /// Mean time spent per lookup.
    #[must_use]
    pub fn average_lookup_time(&self) -> Duration {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return Duration::ZERO;
        }
        self.total_lookup_time / u32::try_from(lookups).unwrap_or(u32::MAX)
    }
}

/// Summary of one cleanup pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Entries removed.
    pub evicted: usize,
    /// Bytes released.
    pub freed_bytes: usize,
    /// Footprint after the pass.
    pub footprint_bytes: usize,
}

/// Operations every cache implementation offers the engine.
pub trait CacheStore<V> {
    /// Looks up `key`, treating entries stamped with another version as stale.
    fn get(&mut self, key: &CacheKey, current: VersionToken) -> Lookup<'_, V>;

    /// Inserts or replaces the entry for `key`.
    fn put(&mut self, key: CacheKey, value: V, version: VersionToken);

    /// Logically deletes the entry for `key`; returns whether one existed.
    fn invalidate(&mut self, key: &CacheKey) -> bool;

    /// Logically deletes every entry of a namespace; returns how many were affected.
    fn invalidate_namespace(&mut self, namespace: Namespace) -> usize;

    /// Physically removes the entry for `key`.
    fn evict(&mut self, key: &CacheKey) -> Option<V>;

    /// Removes every entry.
    fn clear(&mut self);

    /// Current estimated footprint in bytes.
    fn footprint_bytes(&self) -> usize;

    /// Reports whether the footprint exceeds the configured threshold.
    fn is_memory_pressure_high(&self) -> bool;

    /// Evicts invalidated and then least recently used entries until under the target.
    fn adaptive_cleanup(&mut self) -> CleanupReport;

    /// Snapshot of the counters.
    fn stats(&self) -> CacheStats;

    /// Zeroes the hit, miss, invalidation, cleanup and timing counters.
    fn reset_stats(&mut self);

    /// Live entries ordered from least to most recently used.
    fn entries(&self) -> Vec<&CacheEntry<V>>;

    /// Replaces the memory-pressure policy.
    fn configure(&mut self, settings: CacheSettings);
}

/// In-memory [`CacheStore`] with exact byte accounting.
#[derive(Debug)]
pub struct MemoryCache<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    settings: CacheSettings,
    footprint: usize,
    clock: u64,
    stats: CacheStats,
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

impl<V> MemoryCache<V> {
    /// Creates an empty cache using the provided policy.
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: HashMap::new(),
            settings,
            footprint: 0,
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Policy in use.
    #[must_use]
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Number of stored entries, invalidated ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn cleanup_target(&self) -> usize {
        let ratio = f64::from(self.settings.cleanup_target_ratio.clamp(0.0, 1.0));
        (self.settings.threshold_bytes as f64 * ratio) as usize
    }

    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.footprint = self.footprint.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn namespace_count(&self, namespace: Namespace) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.invalidated && entry.key.namespace() == namespace)
            .count()
    }
}

impl<V: EstimateSize> CacheStore<V> for MemoryCache<V> {
    fn get(&mut self, key: &CacheKey, current: VersionToken) -> Lookup<'_, V> {
        let started = Instant::now();
        let tick = self.touch();

        let outcome = match self.entries.get_mut(key) {
            None => LookupOutcome::Miss,
            Some(entry) if entry.invalidated => LookupOutcome::Miss,
            Some(entry) if entry.version != current => {
                entry.invalidated = true;
                LookupOutcome::Stale
            }
            Some(entry) => {
                entry.last_used = tick;
                LookupOutcome::Hit
            }
        };

        match outcome {
            LookupOutcome::Hit => self.stats.hits += 1,
            LookupOutcome::Miss => self.stats.misses += 1,
            LookupOutcome::Stale => {
                self.stats.misses += 1;
                self.stats.invalidations += 1;
                debug!(?key, %current, "stale cache entry invalidated");
            }
        }
        self.stats.total_lookup_time += started.elapsed();

        match outcome {
            LookupOutcome::Hit => match self.entries.get(key) {
                Some(entry) => Lookup::Hit(&entry.value),
                None => Lookup::Miss,
            },
            LookupOutcome::Miss => Lookup::Miss,
            LookupOutcome::Stale => Lookup::Stale,
        }
    }

    fn put(&mut self, key: CacheKey, value: V, version: VersionToken) {
        let size_bytes =
            mem::size_of::<CacheEntry<V>>() + key.heap_bytes() + value.estimated_bytes();
        let tick = self.touch();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            version,
            created_at_ms: unix_millis(),
            last_used: tick,
            size_bytes,
            invalidated: false,
        };

        let _ = self.remove_entry(&key);
        self.footprint += size_bytes;
        let _ = self.entries.insert(key, entry);
    }

    fn invalidate(&mut self, key: &CacheKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if !entry.invalidated => {
                entry.invalidated = true;
                true
            }
            _ => false,
        }
    }

    fn invalidate_namespace(&mut self, namespace: Namespace) -> usize {
        let mut affected = 0;
        for entry in self.entries.values_mut() {
            if entry.key.namespace() == namespace && !entry.invalidated {
                entry.invalidated = true;
                affected += 1;
            }
        }
        affected
    }

    fn evict(&mut self, key: &CacheKey) -> Option<V> {
        let entry = self.remove_entry(key)?;
        self.stats.evictions += 1;
        Some(entry.value)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.footprint = 0;
    }

    fn footprint_bytes(&self) -> usize {
        self.footprint
    }

    fn is_memory_pressure_high(&self) -> bool {
        self.footprint > self.settings.threshold_bytes
    }

    fn adaptive_cleanup(&mut self) -> CleanupReport {
        let target = self.cleanup_target();
        let before = self.footprint;
        if before <= target && !self.entries.values().any(|entry| entry.invalidated) {
            return CleanupReport {
                footprint_bytes: before,
                ..CleanupReport::default()
            };
        }

        let mut order: Vec<(bool, u64, CacheKey)> = self
            .entries
            .values()
            .map(|entry| (!entry.invalidated, entry.last_used, entry.key.clone()))
            .collect();
        order.sort();

        let mut evicted = 0;
        for (live, _, key) in order {
            if live && self.footprint <= target {
                break;
            }
            if self.remove_entry(&key).is_some() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.cleanups += 1;
            self.stats.evictions += evicted as u64;
        }

        let report = CleanupReport {
            evicted,
            freed_bytes: before.saturating_sub(self.footprint),
            footprint_bytes: self.footprint,
        };
        debug!(
            evicted = report.evicted,
            freed = report.freed_bytes,
            footprint = report.footprint_bytes,
            "adaptive cache cleanup"
        );
        report
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            structural_entries: self.namespace_count(Namespace::Structural),
            result_entries: self.namespace_count(Namespace::Result),
            footprint_bytes: self.footprint,
            ..self.stats
        }
    }

    fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    fn entries(&self) -> Vec<&CacheEntry<V>> {
        let mut live: Vec<&CacheEntry<V>> = self
            .entries
            .values()
            .filter(|entry| !entry.invalidated)
            .collect();
        live.sort_by_key(|entry| entry.last_used);
        live
    }

    fn configure(&mut self, settings: CacheSettings) {
        self.settings = settings;
    }
}

#[derive(Clone, Copy)]
enum LookupOutcome {
    Hit,
    Miss,
    Stale,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
