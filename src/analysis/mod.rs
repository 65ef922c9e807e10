//! Analysis Engines: three pure, config-in data-out functions over a
//! job's persisted results — no shared state, no I/O.

pub mod error_patterns;
pub mod reflection;
pub mod time_delay;

use crate::expansion::Provenance;

pub use error_patterns::{ErrorPatternConfig, ErrorPatternFinding, ErrorPatternReport};
pub use reflection::{ReflectionConfig, ReflectionFinding, ReflectionReport};
pub use time_delay::{BaselineMethod, TimeDelayConfig, TimeDelayFinding, TimeDelayReport};

/// The payload substituted for one result, or `None` for the seed/original
/// row, which carries no attacker-controlled value.
#[must_use]
pub fn payload_of(provenance: &Provenance) -> Option<String> {
    match provenance {
        Provenance::Original => None,
        Provenance::Sniper { payload, .. } | Provenance::BatteringRam { payload, .. } => {
            Some(payload.clone())
        }
        Provenance::Mapped { payloads } => {
            if payloads.is_empty() {
                None
            } else {
                Some(payloads.values().cloned().collect::<Vec<_>>().join(","))
            }
        }
        Provenance::Mutation { value, .. } => Some(value.clone()),
    }
}

/// True if any default SQL-injection timing keyword appears in `payload`
/// (case-insensitive), used by the Time-Delay detector's payload-type
/// partition.
#[must_use]
pub fn is_timing_payload(payload: &str) -> bool {
    const KEYWORDS: [&str; 5] = ["SLEEP", "WAITFOR", "BENCHMARK", "pg_sleep", "dbms_pipe.receive_message"];
    let lower = payload.to_lowercase();
    KEYWORDS.iter().any(|k| lower.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn payload_of_original_is_none() {
        assert_eq!(payload_of(&Provenance::Original), None);
    }

    #[test]
    fn payload_of_sniper_returns_payload() {
        let p = Provenance::Sniper {
            payload: "' OR 1=1".to_string(),
            position: 1,
        };
        assert_eq!(payload_of(&p).as_deref(), Some("' OR 1=1"));
    }

    #[test]
    fn payload_of_mapped_joins_values() {
        let mut map = IndexMap::new();
        map.insert("A".to_string(), "x".to_string());
        map.insert("B".to_string(), "y".to_string());
        let p = Provenance::Mapped { payloads: map };
        assert_eq!(payload_of(&p).as_deref(), Some("x,y"));
    }

    #[test]
    fn is_timing_payload_detects_known_keywords() {
        assert!(is_timing_payload("1' AND SLEEP(5)--"));
        assert!(is_timing_payload("waitfor delay '0:0:5'"));
        assert!(!is_timing_payload("' OR 1=1"));
    }
}
