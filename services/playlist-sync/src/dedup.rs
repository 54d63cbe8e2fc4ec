//!
//! src/dedup.rs
//!
//! Decides which freshly fetched tracks are new relative to a reference set
//!

use std::collections::HashSet;

use crate::types::TrackRecord;

/// Which fields decide that two observations are the same song
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKey {
    /// (name, artist)
    Weak,
    /// track_url
    Strong
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key<'a> {
    Weak(&'a str, &'a str),
    Strong(&'a str)
}

impl IdentityKey {
    fn of<'a>(&self, t: &'a TrackRecord) -> Key<'a> {
        match self {
            IdentityKey::Weak => {
                let (name, artist) = t.weak_key();
                Key::Weak(name, artist)
            }
            IdentityKey::Strong => Key::Strong(t.strong_key())
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    key: IdentityKey
}

impl Deduplicator {
    pub fn new(key: IdentityKey) -> Self {
        Self { key }
    }

    /// Candidates absent from `known`, in order, first occurrence wins.
    /// An empty reference set passes every candidate through untouched.
    pub fn unique(&self, candidates: &[TrackRecord], known: &[TrackRecord]) -> Vec<TrackRecord> {
        if known.is_empty() {
            return candidates.to_vec();
        }
        self.partition(candidates, known).0
    }

    /// Splits candidates into (unique, duplicate). Duplicates are the
    /// candidates whose key is in `known` or repeats an earlier candidate.
    pub fn partition(&self, candidates: &[TrackRecord], known: &[TrackRecord]) ->
        (Vec<TrackRecord>, Vec<TrackRecord>) {
        let mut seen: HashSet<Key<'_>> = known.iter().map(|t| self.key.of(t)).collect();
        let mut unique = Vec::new();
        let mut duplicate = Vec::new();

        for c in candidates {
            if seen.insert(self.key.of(c)) {
                unique.push(c.clone());
            } else {
                duplicate.push(c.clone());
            }
        }
        (unique, duplicate)
    }
}
