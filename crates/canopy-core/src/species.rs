//! Species resolver: one label per footprint from many-to-many match evidence.
//!
//! Three independent policies read the same [`MatchSet`]; a run picks one.
//! References with an unknown label never vote and are never assigned.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::footprint::Footprint;
use crate::matching::{MatchEdge, MatchSet};
use crate::reference::ReferencePoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeciesPolicy {
    /// Exactly one match, and no other footprint contains that reference.
    #[default]
    StrictUnique,
    /// All labelled matches agree.
    Consistent,
    /// Inverse-distance vote per label.
    Weighted,
}

/// A resolved footprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeciesAssignment {
    pub cluster_id: i64,
    pub species: String,
    /// Number of references contained in the footprint.
    pub match_count: usize,
    /// Ids of the contained references, ascending.
    #[serde(serialize_with = "join_ids")]
    pub reference_ids: Vec<i64>,
    /// Support for the winning label: 1 for strict, the number of agreeing references
    /// for consistency, the summed inverse distance for voting (infinite when a
    /// reference sits exactly on the centroid).
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    NoMatch,
    MultipleMatches,
    SharedReference,
    MixedSpecies,
    UnknownSpecies,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnresolvedReason::NoMatch => "no match",
            UnresolvedReason::MultipleMatches => "multiple matches",
            UnresolvedReason::SharedReference => "shared reference",
            UnresolvedReason::MixedSpecies => "mixed species",
            UnresolvedReason::UnknownSpecies => "unknown species",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub cluster_id: i64,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeciesResolution {
    /// In footprint order.
    pub assigned: Vec<SpeciesAssignment>,
    pub unresolved: Vec<Unresolved>,
}

/// Resolve a species label for every footprint under `policy`.
pub fn resolve(
    footprints: &[Footprint],
    references: &[ReferencePoint],
    matches: &MatchSet,
    policy: SpeciesPolicy,
    ctx: &RunContext,
) -> SpeciesResolution {
    let mut out = SpeciesResolution::default();
    for (fi, fp) in footprints.iter().enumerate() {
        let mut edges: Vec<&MatchEdge> = matches.edges_of(fi).iter().collect();
        edges.sort_by_key(|e| references[e.reference].id);

        let result = if edges.is_empty() {
            Err(UnresolvedReason::NoMatch)
        } else {
            match policy {
                SpeciesPolicy::StrictUnique => strict_unique(&edges, references, matches),
                SpeciesPolicy::Consistent => consistent(&edges, references),
                SpeciesPolicy::Weighted => weighted_vote(&edges, references),
            }
        };

        match result {
            Ok((species, weight)) => out.assigned.push(SpeciesAssignment {
                cluster_id: fp.cluster_id,
                species,
                match_count: edges.len(),
                reference_ids: edges.iter().map(|e| references[e.reference].id).collect(),
                weight,
            }),
            Err(reason) => out.unresolved.push(Unresolved { cluster_id: fp.cluster_id, reason }),
        }
    }

    tracing::info!(
        parent: ctx.span(),
        ?policy,
        assigned = out.assigned.len(),
        unresolved = out.unresolved.len(),
        "species resolved"
    );
    out
}

type Vote = Result<(String, f64), UnresolvedReason>;

fn strict_unique(edges: &[&MatchEdge], references: &[ReferencePoint], matches: &MatchSet) -> Vote {
    let [edge] = edges else {
        return Err(UnresolvedReason::MultipleMatches);
    };
    if matches.per_reference[edge.reference] > 1 {
        return Err(UnresolvedReason::SharedReference);
    }
    references[edge.reference]
        .species
        .clone()
        .map(|s| (s, 1.0))
        .ok_or(UnresolvedReason::UnknownSpecies)
}

fn consistent(edges: &[&MatchEdge], references: &[ReferencePoint]) -> Vote {
    let mut labels = edges.iter().filter_map(|e| references[e.reference].species.as_deref());
    let Some(first) = labels.next() else {
        return Err(UnresolvedReason::UnknownSpecies);
    };
    let mut agreeing = 1usize;
    for label in labels {
        if label != first {
            return Err(UnresolvedReason::MixedSpecies);
        }
        agreeing += 1;
    }
    Ok((first.to_string(), agreeing as f64))
}

/// Inverse-distance vote. A zero distance beats every finite weight; among
/// zero-distance labels the one with most such votes wins. Remaining ties go to
/// the lexicographically smallest label.
fn weighted_vote(edges: &[&MatchEdge], references: &[ReferencePoint]) -> Vote {
    let mut weights: BTreeMap<&str, f64> = BTreeMap::new();
    let mut on_centroid: BTreeMap<&str, usize> = BTreeMap::new();

    for e in edges {
        let Some(label) = references[e.reference].species.as_deref() else {
            continue;
        };
        if e.distance > 0.0 {
            *weights.entry(label).or_insert(0.0) += 1.0 / e.distance;
        } else {
            *on_centroid.entry(label).or_insert(0) += 1;
        }
    }

    if !on_centroid.is_empty() {
        let label = arg_max(on_centroid.iter().map(|(l, &n)| (*l, n as f64)));
        return label
            .map(|l| (l.to_string(), f64::INFINITY))
            .ok_or(UnresolvedReason::UnknownSpecies);
    }
    let label = arg_max(weights.iter().map(|(l, &w)| (*l, w)));
    label
        .map(|l| (l.to_string(), weights[l]))
        .ok_or(UnresolvedReason::UnknownSpecies)
}

/// First maximum of a label-ordered sequence, so ties keep the smallest label.
fn arg_max<'a>(scores: impl Iterator<Item = (&'a str, f64)>) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for (label, score) in scores {
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((label, score));
        }
    }
    best.map(|(l, _)| l)
}

/// Number of assigned footprints per species, label-ordered.
pub fn species_counts(assigned: &[SpeciesAssignment]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for a in assigned {
        *counts.entry(a.species.clone()).or_insert(0) += 1;
    }
    counts
}

fn join_ids<S: serde::Serializer>(ids: &[i64], s: S) -> Result<S::Ok, S::Error> {
    let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(";");
    s.serialize_str(&joined)
}
