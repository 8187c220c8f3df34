//! Filter, first-write-wins dedup and stable ranking of candidates.

use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::Serialize;
use sift_core::{Candidate, CuratedList};

use crate::filter::ResultFilter;

/// Insertion-ordered accumulation keyed by url. The first candidate for a url wins.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: IndexMap<String, Candidate>,
    duplicates: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the url was already taken.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        match self.seen.entry(candidate.url.clone()) {
            Entry::Occupied(_) => {
                self.duplicates += 1;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.seen.into_values().collect()
    }
}

/// Stable sort by (recency window, title). Ties keep their incoming order.
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        a.recency_tag
            .cmp(&b.recency_tag)
            .then_with(|| a.title.cmp(&b.title))
    });
    candidates
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CurationStats {
    pub offered: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub kept: usize,
}

/// One streaming curation run. Candidates must be pushed in query issue order.
#[derive(Debug)]
pub struct CurationPass<'a> {
    filter: &'a ResultFilter,
    dedup: Deduplicator,
    offered: usize,
    rejected: usize,
}

impl<'a> CurationPass<'a> {
    pub fn push(&mut self, candidate: Candidate) {
        self.offered += 1;
        if !self.filter.is_acceptable(&candidate) {
            self.rejected += 1;
            return;
        }
        self.dedup.offer(candidate);
    }

    pub fn extend<I: IntoIterator<Item = Candidate>>(&mut self, candidates: I) {
        for candidate in candidates {
            self.push(candidate);
        }
    }

    pub fn finish(self) -> (CuratedList, CurationStats) {
        let stats = CurationStats {
            offered: self.offered,
            rejected: self.rejected,
            duplicates: self.dedup.duplicates(),
            kept: self.dedup.len(),
        };
        let ranked = rank(self.dedup.into_candidates());
        (CuratedList::from_ranked(ranked), stats)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Curator {
    filter: ResultFilter,
}

impl Curator {
    pub fn new(filter: ResultFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &ResultFilter {
        &self.filter
    }

    pub fn begin(&self) -> CurationPass<'_> {
        CurationPass {
            filter: &self.filter,
            dedup: Deduplicator::new(),
            offered: 0,
            rejected: 0,
        }
    }

    pub fn curate(&self, candidates: impl IntoIterator<Item = Candidate>) -> CuratedList {
        self.curate_with_stats(candidates).0
    }

    pub fn curate_with_stats(
        &self,
        candidates: impl IntoIterator<Item = Candidate>,
    ) -> (CuratedList, CurationStats) {
        let mut pass = self.begin();
        pass.extend(candidates);
        pass.finish()
    }
}
