//! Batch planning: splitting an ID range into descending, disjoint batches.

use crate::types::ItemId;

/// One unit of work between two barriers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Highest ID in the batch
    pub high: ItemId,
    /// Lowest ID in the batch
    pub low: ItemId,
    /// IDs to fetch, highest first
    pub ids: Vec<ItemId>,
}

impl Batch {
    /// Number of IDs in the batch
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if the batch holds no IDs
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Clone, Debug)]
enum PlanSource {
    /// Every ID from `start` down to `end`, both inclusive
    Range { start: i64, end: i64 },
    /// An explicit ID list, sorted descending without duplicates
    Ids(Vec<ItemId>),
}

/// The ordered list of batches for one run
///
/// Batches are produced lazily, so a plan over tens of millions of IDs costs
/// nothing until it is walked.
#[derive(Clone, Debug)]
pub struct BatchPlan {
    source: PlanSource,
    batch_size: usize,
}

impl BatchPlan {
    /// Plan `[end, start]` in descending order
    ///
    /// `descending(105, 100, 3)` yields `[105, 104, 103]` then `[102, 101, 100]`.
    /// An inverted range yields no batches.
    pub fn descending(start: ItemId, end: ItemId, batch_size: usize) -> Self {
        Self {
            source: PlanSource::Range {
                start: start.0,
                end: end.0,
            },
            batch_size: batch_size.max(1),
        }
    }

    /// Plan an arbitrary set of IDs, visited highest first
    pub fn from_ids(mut ids: Vec<ItemId>, batch_size: usize) -> Self {
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();
        Self {
            source: PlanSource::Ids(ids),
            batch_size: batch_size.max(1),
        }
    }

    /// Items across all batches
    pub fn total_items(&self) -> u64 {
        match &self.source {
            PlanSource::Range { start, end } if start >= end => (start - end + 1) as u64,
            PlanSource::Range { .. } => 0,
            PlanSource::Ids(ids) => ids.len() as u64,
        }
    }

    /// Number of batches
    pub fn total_batches(&self) -> u64 {
        self.total_items().div_ceil(self.batch_size as u64)
    }

    /// Configured batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Walk the batches in order
    pub fn batches(&self) -> Batches<'_> {
        Batches {
            plan: self,
            index: 0,
        }
    }

    fn batch_at(&self, index: u64) -> Option<Batch> {
        if index >= self.total_batches() {
            return None;
        }
        let ids: Vec<ItemId> = match &self.source {
            PlanSource::Range { start, end } => {
                // sizes beyond i64 cover any range in one batch
                let size = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
                let offset = i64::try_from(index).ok()?.checked_mul(size)?;
                let high = start.checked_sub(offset)?;
                let low = high.saturating_sub(size - 1).max(*end);
                (low..=high).rev().map(ItemId).collect()
            }
            PlanSource::Ids(ids) => {
                let from = usize::try_from(index).ok()?.checked_mul(self.batch_size)?;
                let to = from.saturating_add(self.batch_size).min(ids.len());
                ids.get(from..to)?.to_vec()
            }
        };

        let high = *ids.first()?;
        let low = *ids.last()?;
        Some(Batch { high, low, ids })
    }
}

/// Iterator over the batches of a [`BatchPlan`]
pub struct Batches<'a> {
    plan: &'a BatchPlan,
    index: u64,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let batch = self.plan.batch_at(self.index)?;
        self.index += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.total_batches().saturating_sub(self.index) as usize;
        (left, Some(left))
    }
}
