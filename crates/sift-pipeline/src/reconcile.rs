//! Set difference of two tabular sources under canonical-key equality.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;
use sift_core::{CanonicalKey, MissingRecord, RawRecord};

use crate::canonical::Canonicalizer;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    /// One record per distinct missing key, in competitor encounter order.
    pub missing: Vec<MissingRecord>,
    pub competitor_distinct_keys: usize,
    pub mine_distinct_keys: usize,
    /// Rows on either side whose content canonicalized to the empty key.
    pub skipped_empty: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SetReconciler {
    canonicalizer: Canonicalizer,
}

impl SetReconciler {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self { canonicalizer }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// Records of `competitor` whose key is absent from `mine`.
    pub fn reconcile(
        &self,
        competitor: &[RawRecord],
        mine: &[RawRecord],
        competitor_column: &str,
        mine_column: &str,
    ) -> Vec<MissingRecord> {
        self.reconcile_detailed(competitor, mine, competitor_column, mine_column)
            .missing
    }

    pub fn reconcile_detailed(
        &self,
        competitor: &[RawRecord],
        mine: &[RawRecord],
        competitor_column: &str,
        mine_column: &str,
    ) -> Reconciliation {
        let mut skipped_empty = 0;

        let mut mine_keys = HashSet::with_capacity(mine.len());
        for record in mine {
            let key = self.key_of(record, mine_column);
            if key.is_empty() {
                skipped_empty += 1;
            } else {
                mine_keys.insert(key);
            }
        }

        let mut competitor_keys: IndexMap<CanonicalKey, &RawRecord> =
            IndexMap::with_capacity(competitor.len());
        for record in competitor {
            let key = self.key_of(record, competitor_column);
            if key.is_empty() {
                skipped_empty += 1;
                continue;
            }
            competitor_keys.entry(key).or_insert(record);
        }

        let competitor_distinct_keys = competitor_keys.len();
        let missing = competitor_keys
            .into_iter()
            .filter(|(key, _)| !mine_keys.contains(key))
            .map(|(key, record)| MissingRecord {
                key,
                record: record.clone(),
            })
            .collect();

        Reconciliation {
            missing,
            competitor_distinct_keys,
            mine_distinct_keys: mine_keys.len(),
            skipped_empty,
        }
    }

    fn key_of(&self, record: &RawRecord, column: &str) -> CanonicalKey {
        self.canonicalizer.canonicalize_cell(record.get(column))
    }
}
