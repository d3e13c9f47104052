//! Resource quantities
//!
//! Parses CPU and memory quantities as written in manifests and printed by
//! the metrics pipeline, so declared resources can be compared by value
//! (`500m` equals `0.5`, `1Gi` equals `1024Mi`).

use serde::{Deserialize, Serialize};

/// Parse a CPU quantity into millicores
#[must_use]
pub fn parse_cpu_millicores(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if let Some(milli) = s.strip_suffix('m') {
        return milli.parse::<f64>().ok().map(to_u64);
    }
    if let Some(nano) = s.strip_suffix('n') {
        return nano.parse::<f64>().ok().map(|n| to_u64(n / 1_000_000.0));
    }
    if let Some(micro) = s.strip_suffix('u') {
        return micro.parse::<f64>().ok().map(|u| to_u64(u / 1_000.0));
    }
    s.parse::<f64>().ok().map(|cores| to_u64(cores * 1000.0))
}

/// Parse a memory quantity into bytes
#[must_use]
pub fn parse_memory_bytes(raw: &str) -> Option<u64> {
    const UNITS: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("k", 1e3),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
    ];
    let s = raw.trim();
    for (suffix, factor) in UNITS {
        if let Some(number) = s.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| to_u64(n * factor));
        }
    }
    s.parse::<f64>().ok().map(to_u64)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u64(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// CPU and memory amounts of one section (`requests` or `limits`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceList {
    /// Create a list from raw quantities
    #[inline]
    #[must_use]
    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: Some(cpu.into()),
            memory: Some(memory.into()),
        }
    }

    /// CPU in millicores
    #[inline]
    #[must_use]
    pub fn cpu_millicores(&self) -> Option<u64> {
        self.cpu.as_deref().and_then(parse_cpu_millicores)
    }

    /// Memory in bytes
    #[inline]
    #[must_use]
    pub fn memory_bytes(&self) -> Option<u64> {
        self.memory.as_deref().and_then(parse_memory_bytes)
    }

    fn normalized(&self) -> (Option<u64>, Option<u64>) {
        (self.cpu_millicores(), self.memory_bytes())
    }

    /// Whether both lists denote the same amounts
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

/// Declared resources of one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceList,
    #[serde(default)]
    pub limits: ResourceList,
}

impl ResourceRequirements {
    /// Create requirements from requests and limits
    #[inline]
    #[must_use]
    pub fn new(requests: ResourceList, limits: ResourceList) -> Self {
        Self { requests, limits }
    }

    /// Whether both requirements denote the same amounts
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.requests.equivalent(&other.requests) && self.limits.equivalent(&other.limits)
    }

    /// Canonical form used for fingerprints
    #[must_use]
    pub fn canonical(&self) -> String {
        let fmt = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |n| n.to_string());
        format!(
            "req(cpu={},mem={}) lim(cpu={},mem={})",
            fmt(self.requests.cpu_millicores()),
            fmt(self.requests.memory_bytes()),
            fmt(self.limits.cpu_millicores()),
            fmt(self.limits.memory_bytes()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_cpu_forms() {
        assert_eq!(parse_cpu_millicores("500m"), Some(500));
        assert_eq!(parse_cpu_millicores("0.5"), Some(500));
        assert_eq!(parse_cpu_millicores("2"), Some(2000));
        assert_eq!(parse_cpu_millicores("250000000n"), Some(250));
        assert_eq!(parse_cpu_millicores("lots"), None);
    }

    #[test]
    fn parses_memory_forms() {
        assert_eq!(parse_memory_bytes("128Mi"), Some(128 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("1.5Gi"), Some(1_610_612_736));
        assert_eq!(parse_memory_bytes("1G"), Some(1_000_000_000));
        assert_eq!(parse_memory_bytes("4096"), Some(4096));
        assert_eq!(parse_memory_bytes("12Xi"), None);
    }

    #[test]
    fn equivalent_resources_ignore_notation() {
        let a = ResourceRequirements::new(
            ResourceList::new("500m", "1Gi"),
            ResourceList::new("1", "2048Mi"),
        );
        let b = ResourceRequirements::new(
            ResourceList::new("0.5", "1024Mi"),
            ResourceList::new("1000m", "2Gi"),
        );
        assert!(a.equivalent(&b));
        assert_eq!(a.canonical(), b.canonical());

        let shrunk = ResourceRequirements::new(
            ResourceList::new("1m", "100Mi"),
            ResourceList::new("2m", "200Mi"),
        );
        assert!(!a.equivalent(&shrunk));
    }

    proptest! {
        #[test]
        fn millicore_notation_matches_core_notation(milli in 0u64..64_000) {
            let cores = format!("{}", milli as f64 / 1000.0);
            prop_assert_eq!(
                parse_cpu_millicores(&format!("{milli}m")),
                parse_cpu_millicores(&cores)
            );
        }
    }
}
