//! Expansion Engine: the four combinatorial strategies plus Mutation.
//!
//! Every strategy emits a seed "original" row first — the template with
//! every placeholder occurrence replaced by the empty string — then one
//! row per combination.
//!
//! Placeholder syntax: `<<>>` (unnamed, Sniper only) or `<<NAME>>` (the
//! other strategies, and Mutation's caller-specified tokens).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One of the five expansion algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sniper,
    BatteringRam,
    Pitchfork,
    ClusterBomb,
    Mutation,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sniper => "sniper",
            Self::BatteringRam => "battering_ram",
            Self::Pitchfork => "pitchfork",
            Self::ClusterBomb => "cluster_bomb",
            Self::Mutation => "mutation",
        };
        f.write_str(s)
    }
}

/// An ordered, named list of substitution strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSet {
    pub name: String,
    pub payloads: Vec<String>,
}

impl PayloadSet {
    #[must_use]
    pub fn new(name: impl Into<String>, payloads: Vec<String>) -> Self {
        Self {
            name: name.into(),
            payloads,
        }
    }
}

/// Where a [`GeneratedRequest`] came from, so callers can reconstruct what
/// was substituted without re-parsing the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// The seed row: every placeholder replaced with the empty string.
    Original,
    /// Sniper: the single placeholder token and its 1-based insertion index.
    Sniper { payload: String, position: usize },
    /// Battering Ram: one payload applied to every listed placeholder name.
    BatteringRam {
        payload: String,
        applied_to: Vec<String>,
    },
    /// Pitchfork / Cluster Bomb: the payload used at each placeholder name.
    Mapped { payloads: IndexMap<String, String> },
    /// Mutation: the token mutated and the materialized value used.
    Mutation { token: String, value: String },
}

/// One row of template expansion, prior to persistence as a
/// [`crate::corpus::GeneratedRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub request: String,
    pub provenance: Provenance,
}

/// A literal substitution, or a value repeated `n` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MutationValue {
    Literal(String),
    Repeat { value: String, repeat: u32 },
}

impl MutationValue {
    /// Produce the concrete substitution string for this value.
    #[must_use]
    pub fn materialize(&self) -> String {
        match self {
            Self::Literal(s) => s.clone(),
            Self::Repeat { value, repeat } if *repeat > 0 => value.repeat(*repeat as usize),
            Self::Repeat { value, .. } => value.clone(),
        }
    }
}

/// One mutation definition: a token to substitute, a caller-facing label
/// for the substitution strategy, and the values to try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationSpec {
    pub token: String,
    pub label: String,
    pub values: Vec<MutationValue>,
}

const SNIPER_PLACEHOLDER: &str = "<<>>";

fn named_placeholder(name: &str) -> String {
    format!("<<{name}>>")
}

/// Expand `template` under `strategy` using `payload_sets`.
///
/// # Errors
/// Returns [`Error::invalid_input`] (surfaced by callers as
/// `InvalidExpansion`) when a strategy's payload-set cardinality
/// requirement is not met.
pub fn expand(
    template: &str,
    placeholders: &[String],
    strategy: Strategy,
    payload_sets: &[PayloadSet],
) -> Result<Vec<Generated>, Error> {
    match strategy {
        Strategy::Sniper => sniper(template, payload_sets),
        Strategy::BatteringRam => battering_ram(template, placeholders, payload_sets),
        Strategy::Pitchfork => pitchfork(template, placeholders, payload_sets),
        Strategy::ClusterBomb => cluster_bomb(template, placeholders, payload_sets),
        Strategy::Mutation => Err(Error::invalid_input(
            "mutation strategy requires expand_mutations, not expand",
        )),
    }
}

fn strip_unnamed(template: &str) -> String {
    template.replace(SNIPER_PLACEHOLDER, "")
}

fn strip_named(template: &str, placeholders: &[String]) -> String {
    let mut out = template.to_string();
    for name in placeholders {
        out = out.replace(&named_placeholder(name), "");
    }
    out
}

/// Sniper: for each payload, substitute it at one occurrence of `<<>>` in
/// turn, leaving all other occurrences empty. Total = 1 + N·|S0|.
fn sniper(template: &str, payload_sets: &[PayloadSet]) -> Result<Vec<Generated>, Error> {
    let Some(set) = payload_sets.first() else {
        return Err(Error::invalid_input(
            "sniper requires at least one payload set",
        ));
    };

    let mut out = vec![Generated {
        request: strip_unnamed(template),
        provenance: Provenance::Original,
    }];

    let occurrence_count = template.matches(SNIPER_PLACEHOLDER).count();
    let occurrences: Vec<usize> = template.match_indices(SNIPER_PLACEHOLDER).map(|(i, _)| i).collect();

    for payload in &set.payloads {
        for position in 0..occurrence_count {
            let mut result = String::with_capacity(template.len());
            let mut cursor = 0;
            for (idx, &start) in occurrences.iter().enumerate() {
                result.push_str(&template[cursor..start]);
                if idx == position {
                    result.push_str(payload);
                }
                cursor = start + SNIPER_PLACEHOLDER.len();
            }
            result.push_str(&template[cursor..]);

            out.push(Generated {
                request: result,
                provenance: Provenance::Sniper {
                    payload: payload.clone(),
                    position: position + 1,
                },
            });
        }
    }

    Ok(out)
}

/// Battering Ram: each payload is substituted at every declared placeholder
/// simultaneously. Total = 1 + |S0|.
fn battering_ram(
    template: &str,
    placeholders: &[String],
    payload_sets: &[PayloadSet],
) -> Result<Vec<Generated>, Error> {
    let Some(set) = payload_sets.first() else {
        return Err(Error::invalid_input(
            "battering_ram requires at least one payload set",
        ));
    };

    let mut out = vec![Generated {
        request: strip_named(template, placeholders),
        provenance: Provenance::Original,
    }];

    for payload in &set.payloads {
        let mut result = template.to_string();
        for name in placeholders {
            result = result.replace(&named_placeholder(name), payload);
        }
        out.push(Generated {
            request: result,
            provenance: Provenance::BatteringRam {
                payload: payload.clone(),
                applied_to: placeholders.to_vec(),
            },
        });
    }

    Ok(out)
}

/// Pitchfork: requires exactly `placeholders.len()` payload sets, aligned
/// by index. Total = 1 + min(|S_i|).
fn pitchfork(
    template: &str,
    placeholders: &[String],
    payload_sets: &[PayloadSet],
) -> Result<Vec<Generated>, Error> {
    if payload_sets.len() != placeholders.len() {
        return Err(Error::invalid_input(
            "pitchfork requires exactly one payload set per declared placeholder",
        ));
    }

    let mut out = vec![Generated {
        request: strip_named(template, placeholders),
        provenance: Provenance::Original,
    }];

    let min_len = payload_sets.iter().map(|s| s.payloads.len()).min().unwrap_or(0);

    for i in 0..min_len {
        let mut result = template.to_string();
        let mut map = IndexMap::new();
        for (name, set) in placeholders.iter().zip(payload_sets.iter()) {
            let payload = &set.payloads[i];
            result = result.replace(&named_placeholder(name), payload);
            map.insert(name.clone(), payload.clone());
        }
        out.push(Generated {
            request: result,
            provenance: Provenance::Mapped { payloads: map },
        });
    }

    Ok(out)
}

/// Cluster Bomb: full cross-product in lexicographic order, first
/// placeholder varying slowest. Total = 1 + ∏|S_i|. An empty set among the
/// `payload_sets` collapses the whole product to zero non-seed rows.
fn cluster_bomb(
    template: &str,
    placeholders: &[String],
    payload_sets: &[PayloadSet],
) -> Result<Vec<Generated>, Error> {
    if payload_sets.len() != placeholders.len() {
        return Err(Error::invalid_input(
            "cluster_bomb requires exactly one payload set per declared placeholder",
        ));
    }

    let mut out = vec![Generated {
        request: strip_named(template, placeholders),
        provenance: Provenance::Original,
    }];

    if payload_sets.iter().any(|s| s.payloads.is_empty()) {
        return Ok(out);
    }

    for combination in cartesian_product(payload_sets) {
        let mut result = template.to_string();
        let mut map = IndexMap::new();
        for (name, payload) in placeholders.iter().zip(combination.iter()) {
            result = result.replace(&named_placeholder(name), payload);
            map.insert(name.clone(), payload.clone());
        }
        out.push(Generated {
            request: result,
            provenance: Provenance::Mapped { payloads: map },
        });
    }

    Ok(out)
}

/// Lexicographic cross-product with the first set varying slowest, matching
/// `itertools.product(*[ps.payloads for ps in payload_sets])`.
fn cartesian_product(payload_sets: &[PayloadSet]) -> Vec<Vec<String>> {
    let mut combos: Vec<Vec<String>> = vec![Vec::new()];
    for set in payload_sets {
        let mut next = Vec::with_capacity(combos.len() * set.payloads.len());
        for combo in &combos {
            for payload in &set.payloads {
                let mut extended = combo.clone();
                extended.push(payload.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Mutation: one request per (mutation, value), substituting only that
/// mutation's token. Total = 1 + Σ|values_i|. Unlike the other strategies,
/// mutations are caller-specified tokens rather than declared placeholder
/// names, so the seed row strips every mutation's token independently.
#[must_use]
pub fn expand_mutations(template: &str, mutations: &[MutationSpec]) -> Vec<Generated> {
    let mut seed = template.to_string();
    for m in mutations {
        seed = seed.replace(&m.token, "");
    }
    let mut out = vec![Generated {
        request: seed,
        provenance: Provenance::Original,
    }];

    for m in mutations {
        for value in &m.values {
            let materialized = value.materialize();
            let result = template.replace(&m.token, &materialized);
            out.push(Generated {
                request: result,
                provenance: Provenance::Mutation {
                    token: m.token.clone(),
                    value: materialized,
                },
            });
        }
    }

    out
}

/// The cardinality a strategy produces for given inputs, used by the
/// Corpus Store to validate `CorpusRun::total_generated` against the
/// generated sequence length.
#[must_use]
pub fn expected_total(
    template: &str,
    placeholders: &[String],
    strategy: Strategy,
    payload_sets: &[PayloadSet],
) -> usize {
    match strategy {
        Strategy::Sniper => {
            let n = template.matches(SNIPER_PLACEHOLDER).count();
            let s0 = payload_sets.first().map_or(0, |s| s.payloads.len());
            1 + n * s0
        }
        Strategy::BatteringRam => 1 + payload_sets.first().map_or(0, |s| s.payloads.len()),
        Strategy::Pitchfork => {
            if payload_sets.len() != placeholders.len() {
                1
            } else {
                1 + payload_sets.iter().map(|s| s.payloads.len()).min().unwrap_or(0)
            }
        }
        Strategy::ClusterBomb => {
            if payload_sets.len() != placeholders.len()
                || payload_sets.iter().any(|s| s.payloads.is_empty())
            {
                1
            } else {
                1 + payload_sets.iter().map(|s| s.payloads.len()).product::<usize>()
            }
        }
        Strategy::Mutation => 1,
    }
}


#[cfg(test)]
mod cardinality_properties {
    use super::*;
    use proptest::prelude::*;
    use super::Strategy;

    fn payload_values(max_len: usize) -> impl proptest::strategy::Strategy<Value = Vec<String>> {
        proptest::collection::vec("[a-z]{1,4}", 0..=max_len)
    }

    proptest! {
        /// Sniper's `1 + n * s0` formula must match the actual row count for
        /// any number of placeholder occurrences and any payload set size.
        #[test]
        fn sniper_cardinality_matches_expected_total(
            occurrences in 0usize..5,
            values in payload_values(6),
        ) {
            let template = "x=<<>>&".repeat(occurrences);
            let sets = vec![PayloadSet::new("p", values)];
            if sets[0].payloads.is_empty() {
                prop_assert!(expand(&template, &[], Strategy::Sniper, &sets).is_err());
            } else {
                let out = expand(&template, &[], Strategy::Sniper, &sets).unwrap();
                prop_assert_eq!(out.len(), expected_total(&template, &[], Strategy::Sniper, &sets));
            }
        }

        /// Cluster Bomb's product formula must match the actual row count
        /// for any non-empty pair of payload sets.
        #[test]
        fn cluster_bomb_cardinality_matches_expected_total(
            a in payload_values(4),
            b in payload_values(4),
        ) {
            let template = "<<A>>-<<B>>";
            let placeholders = vec!["A".to_string(), "B".to_string()];
            let sets = vec![PayloadSet::new("a", a), PayloadSet::new("b", b)];
            let out = expand(template, &placeholders, Strategy::ClusterBomb, &sets).unwrap();
            prop_assert_eq!(
                out.len(),
                expected_total(template, &placeholders, Strategy::ClusterBomb, &sets)
            );
        }
    }
}
