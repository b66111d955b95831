//! Hull classifier: bucket footprints by how many reference points they contain.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Footprint bucket keyed by match count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bucket {
    H0,
    H1,
    H2,
    H3,
    #[serde(rename = "H4+")]
    H4Plus,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [Bucket::H0, Bucket::H1, Bucket::H2, Bucket::H3, Bucket::H4Plus];

    pub fn from_count(matches: usize) -> Self {
        match matches {
            0 => Bucket::H0,
            1 => Bucket::H1,
            2 => Bucket::H2,
            3 => Bucket::H3,
            _ => Bucket::H4Plus,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Bucket::H0 => "H0",
            Bucket::H1 => "H1",
            Bucket::H2 => "H2",
            Bucket::H3 => "H3",
            Bucket::H4Plus => "H4+",
        }
    }

    /// Two or more matches.
    pub fn is_multi(self) -> bool {
        matches!(self, Bucket::H2 | Bucket::H3 | Bucket::H4Plus)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Partition of a footprint slice into buckets. Holds footprint indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    members: [Vec<usize>; 5],
    buckets: Vec<Bucket>,
}

impl Classification {
    /// Footprints of one bucket, in ascending index order.
    pub fn members(&self, bucket: Bucket) -> &[usize] {
        &self.members[bucket.slot()]
    }

    pub fn count(&self, bucket: Bucket) -> usize {
        self.members[bucket.slot()].len()
    }

    /// `|H2| + |H3| + |H4+|`.
    pub fn multi(&self) -> usize {
        Bucket::ALL.iter().filter(|b| b.is_multi()).map(|&b| self.count(b)).sum()
    }

    pub fn bucket_of(&self, footprint: usize) -> Bucket {
        self.buckets[footprint]
    }

    /// Number of classified footprints.
    pub fn total(&self) -> usize {
        self.buckets.len()
    }
}

/// Classify every footprint from its match count.
pub fn classify(per_footprint: &[usize]) -> Classification {
    let mut out = Classification { buckets: Vec::with_capacity(per_footprint.len()), ..Default::default() };
    for (i, &n) in per_footprint.iter().enumerate() {
        let b = Bucket::from_count(n);
        out.members[b.slot()].push(i);
        out.buckets.push(b);
    }
    out
}
