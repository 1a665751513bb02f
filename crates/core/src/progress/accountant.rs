//! Progress accountant.

use serde::Serialize;
use std::collections::HashMap;
use tracing::trace;

use super::weights::ProgressWeights;
use crate::workload::{ItemId, MediaKind, Stage, WorkItem};

const WEIGHTED_STAGES: [Stage; 3] = [Stage::Compression, Stage::Upload, Stage::LinkRewrite];

/// Snapshot of run progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    pub total_work: u64,
    pub completed_work: u64,
    pub percent: u8,
    /// False before a run starts and once 100% is reached.
    pub active: bool,
}

/// Result of feeding one event to the accountant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    /// The percentage moved since the previous update.
    pub changed: bool,
    /// 100% was reached for the first time.
    pub work_completed: bool,
}

#[derive(Debug)]
struct ItemLedger {
    kind: MediaKind,
    size_bytes: u64,
    done: [bool; 3],
    /// Upload work credited from partial progress, before completion.
    upload_partial: u64,
    retired: bool,
}

impl ItemLedger {
    fn slot(stage: Stage) -> Option<usize> {
        WEIGHTED_STAGES.iter().position(|s| *s == stage)
    }

    fn settled(&self) -> bool {
        self.retired || self.done.iter().all(|d| *d)
    }
}

/// Turns per-item stage events into a single monotonic percentage.
///
/// Every (item, stage) pair is credited at most once. Partial upload
/// progress credits a proportional share of the upload weight, and the
/// completion event later credits only the remainder. When an item fails,
/// its outstanding work is removed from the total so the run can still
/// reach 100%.
#[derive(Debug)]
pub struct ProgressAccountant {
    weights: ProgressWeights,
    ledgers: HashMap<ItemId, ItemLedger>,
    /// Items neither fully credited nor retired.
    unsettled: usize,
    total: u64,
    completed: u64,
    percent: u8,
    active: bool,
    signalled: bool,
}

impl ProgressAccountant {
    pub fn new(weights: ProgressWeights) -> Self {
        Self {
            weights,
            ledgers: HashMap::new(),
            unsettled: 0,
            total: 0,
            completed: 0,
            percent: 0,
            active: false,
            signalled: false,
        }
    }

    /// Clears all state. The accountant is inactive until `start` is called.
    pub fn reset(&mut self) {
        self.ledgers.clear();
        self.unsettled = 0;
        self.total = 0;
        self.completed = 0;
        self.percent = 0;
        self.active = false;
        self.signalled = false;
    }

    /// Resets and sizes the run for the given items.
    pub fn start<'a>(&mut self, items: impl IntoIterator<Item = &'a WorkItem>) {
        self.reset();
        for item in items {
            self.total = self
                .total
                .saturating_add(self.weights.item_work(item.kind, item.size_bytes));
            self.ledgers.insert(
                item.id,
                ItemLedger {
                    kind: item.kind,
                    size_bytes: item.size_bytes,
                    done: [false; 3],
                    upload_partial: 0,
                    retired: false,
                },
            );
        }
        self.unsettled = self.ledgers.len();
        self.active = true;
    }

    pub fn state(&self) -> ProgressState {
        ProgressState {
            total_work: self.total,
            completed_work: self.completed,
            percent: self.percent,
            active: self.active,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Credits a completed stage. Repeated calls for the same pair, unknown
    /// items, retired items and the unweighted deletion stage change nothing.
    pub fn complete_stage(&mut self, id: ItemId, stage: Stage) -> ProgressUpdate {
        let Some(slot) = ItemLedger::slot(stage) else {
            return self.unchanged();
        };
        let weights = &self.weights;
        let Some(ledger) = self.ledgers.get_mut(&id) else {
            return self.unchanged();
        };
        if ledger.retired || ledger.done[slot] {
            return self.unchanged();
        }

        let mut credit = weights.stage_work(stage, ledger.kind, ledger.size_bytes);
        if stage == Stage::Upload {
            credit = credit.saturating_sub(ledger.upload_partial);
            ledger.upload_partial = 0;
        }
        ledger.done[slot] = true;
        if ledger.settled() {
            self.unsettled = self.unsettled.saturating_sub(1);
        }

        self.completed = self.completed.saturating_add(credit);
        self.recompute()
    }

    /// Credits mid-upload progress as a share of the upload weight.
    ///
    /// Only the increase over what was already credited is added, so
    /// repeated or out-of-order updates never over-count.
    pub fn record_upload_progress(
        &mut self,
        id: ItemId,
        bytes_transferred: u64,
        total_bytes: u64,
    ) -> ProgressUpdate {
        let weights = &self.weights;
        let Some(ledger) = self.ledgers.get_mut(&id) else {
            return self.unchanged();
        };
        let upload_slot = 1;
        if ledger.retired || ledger.done[upload_slot] || total_bytes == 0 {
            return self.unchanged();
        }

        let weight = weights.stage_work(Stage::Upload, ledger.kind, ledger.size_bytes);
        let fraction = u128::from(bytes_transferred.min(total_bytes)) * u128::from(weight)
            / u128::from(total_bytes);
        let target = fraction as u64;
        if target <= ledger.upload_partial {
            return self.unchanged();
        }

        let delta = target - ledger.upload_partial;
        ledger.upload_partial = target;
        trace!(item = %id, bytes_transferred, total_bytes, "Upload progress");

        self.completed = self.completed.saturating_add(delta);
        self.recompute()
    }

    /// Removes an item's outstanding work from the total after it failed.
    pub fn retire_item(&mut self, id: ItemId) -> ProgressUpdate {
        let weights = &self.weights;
        let Some(ledger) = self.ledgers.get_mut(&id) else {
            return self.unchanged();
        };
        if ledger.retired {
            return self.unchanged();
        }

        let outstanding = WEIGHTED_STAGES
            .iter()
            .zip(ledger.done.iter())
            .filter(|(_, done)| !**done)
            .map(|(stage, _)| weights.stage_work(*stage, ledger.kind, ledger.size_bytes))
            .fold(0u64, u64::saturating_add)
            .saturating_sub(ledger.upload_partial);
        let was_settled = ledger.settled();
        ledger.retired = true;
        if !was_settled {
            self.unsettled = self.unsettled.saturating_sub(1);
        }

        self.total = self.total.saturating_sub(outstanding);
        self.recompute()
    }

    fn unchanged(&self) -> ProgressUpdate {
        ProgressUpdate {
            percent: self.percent,
            changed: false,
            work_completed: false,
        }
    }

    fn recompute(&mut self) -> ProgressUpdate {
        let all_settled = self.unsettled == 0;

        let computed = if self.total == 0 {
            if all_settled {
                100
            } else {
                0
            }
        } else if self.completed >= self.total {
            if all_settled {
                100
            } else {
                99
            }
        } else {
            let pct = u128::from(self.completed) * 100 / u128::from(self.total);
            (pct as u8).min(if all_settled { 100 } else { 99 })
        };

        let previous = self.percent;
        self.percent = previous.max(computed);

        let work_completed = self.percent == 100 && !self.signalled;
        if work_completed {
            self.signalled = true;
            self.active = false;
        }

        ProgressUpdate {
            percent: self.percent,
            changed: self.percent != previous,
            work_completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn items() -> Vec<WorkItem> {
        vec![
            WorkItem::new(ItemId(0), PathBuf::from("/v/a.png"), 1_000_000, MediaKind::Image),
            WorkItem::new(ItemId(1), PathBuf::from("/v/b.mp4"), 2_000_000, MediaKind::Video),
        ]
    }

    fn started() -> ProgressAccountant {
        let mut accountant = ProgressAccountant::new(ProgressWeights::default());
        accountant.start(items().iter());
        accountant
    }

    #[test]
    fn test_retiring_a_finished_item_keeps_others_unsettled() {
        let weights = ProgressWeights {
            link_work: 0,
            ..ProgressWeights::default()
        };
        let mut accountant = ProgressAccountant::new(weights);
        accountant.start(items().iter());

        for stage in WEIGHTED_STAGES {
            accountant.complete_stage(ItemId(0), stage);
        }
        // Deletion failed after every weighted stage was credited.
        accountant.retire_item(ItemId(0));

        accountant.complete_stage(ItemId(1), Stage::Compression);
        let update = accountant.complete_stage(ItemId(1), Stage::Upload);
        assert_eq!(accountant.state().completed_work, accountant.state().total_work);
        assert_eq!(update.percent, 99);
        assert!(!update.work_completed);

        let update = accountant.complete_stage(ItemId(1), Stage::LinkRewrite);
        assert_eq!(update.percent, 100);
        assert!(update.work_completed);
    }

    #[test]
    fn test_total_work() {
        let accountant = started();
        assert_eq!(accountant.state().total_work, 36_040_000);
        assert!(accountant.state().active);
    }

    #[test]
    fn test_image_compression_is_two_percent() {
        let mut accountant = started();
        let update = accountant.complete_stage(ItemId(0), Stage::Compression);
        assert_eq!(update.percent, 2);
        assert!(update.changed);
        assert_eq!(accountant.state().completed_work, 1_000_000);
    }

    #[test]
    fn test_stage_completion_is_idempotent() {
        let mut accountant = started();
        accountant.complete_stage(ItemId(1), Stage::Compression);
        let before = accountant.state();
        let update = accountant.complete_stage(ItemId(1), Stage::Compression);
        assert!(!update.changed);
        assert_eq!(accountant.state(), before);
    }

    #[test]
    fn test_partial_upload_does_not_double_count() {
        let mut accountant = started();
        accountant.record_upload_progress(ItemId(0), 500_000, 1_000_000);
        assert_eq!(accountant.state().completed_work, 2_500_000);

        // Stale and repeated updates are ignored
        accountant.record_upload_progress(ItemId(0), 100_000, 1_000_000);
        accountant.record_upload_progress(ItemId(0), 500_000, 1_000_000);
        assert_eq!(accountant.state().completed_work, 2_500_000);

        accountant.complete_stage(ItemId(0), Stage::Upload);
        assert_eq!(accountant.state().completed_work, 5_000_000);

        accountant.record_upload_progress(ItemId(0), 1_000_000, 1_000_000);
        assert_eq!(accountant.state().completed_work, 5_000_000);
    }

    #[test]
    fn test_partial_upload_with_compressed_total() {
        let mut accountant = started();
        // Derivative is smaller than the original; the share is what matters
        accountant.record_upload_progress(ItemId(1), 150, 300);
        assert_eq!(accountant.state().completed_work, 5_000_000);
    }

    #[test]
    fn test_reaches_hundred_once() {
        let mut accountant = started();
        let mut signals = 0;
        let mut last = 0;
        for id in [ItemId(0), ItemId(1)] {
            for stage in WEIGHTED_STAGES {
                let update = accountant.complete_stage(id, stage);
                assert!(update.percent >= last);
                last = update.percent;
                if update.work_completed {
                    signals += 1;
                }
            }
        }
        assert_eq!(last, 100);
        assert_eq!(signals, 1);
        assert!(!accountant.state().active);

        let again = accountant.complete_stage(ItemId(0), Stage::LinkRewrite);
        assert!(!again.work_completed);
    }

    #[test]
    fn test_failed_item_is_retired() {
        let mut accountant = started();
        accountant.complete_stage(ItemId(0), Stage::Compression);
        accountant.record_upload_progress(ItemId(0), 10, 100);
        let before = accountant.percent();

        let update = accountant.retire_item(ItemId(0));
        assert!(update.percent >= before);

        for stage in WEIGHTED_STAGES {
            accountant.complete_stage(ItemId(1), stage);
        }
        assert_eq!(accountant.percent(), 100);
        // Credited work of the failed item stays in both sides of the ratio
        assert_eq!(accountant.state().total_work, 30_020_000 + 1_500_000);
    }

    #[test]
    fn test_not_hundred_while_items_outstanding() {
        let mut accountant = ProgressAccountant::new(ProgressWeights::default());
        let items = vec![
            WorkItem::new(ItemId(0), PathBuf::from("/v/big.mp4"), 100_000_000, MediaKind::Video),
            WorkItem::new(ItemId(1), PathBuf::from("/v/tiny.png"), 1, MediaKind::Image),
        ];
        accountant.start(items.iter());
        for stage in WEIGHTED_STAGES {
            accountant.complete_stage(ItemId(0), stage);
        }
        assert_eq!(accountant.percent(), 99);
        accountant.complete_stage(ItemId(1), Stage::Compression);
        accountant.complete_stage(ItemId(1), Stage::Upload);
        accountant.complete_stage(ItemId(1), Stage::LinkRewrite);
        assert_eq!(accountant.percent(), 100);
    }

    #[test]
    fn test_zero_sized_workload() {
        let mut accountant = ProgressAccountant::new(ProgressWeights {
            image_multiplier: 0,
            video_multiplier: 0,
            upload_multiplier: 0,
            link_work: 0,
        });
        let items = items();
        accountant.start(items.iter());
        assert_eq!(accountant.percent(), 0);
        accountant.retire_item(ItemId(0));
        let update = accountant.retire_item(ItemId(1));
        assert_eq!(update.percent, 100);
        assert!(update.work_completed);
    }

    #[test]
    fn test_reset() {
        let mut accountant = started();
        accountant.complete_stage(ItemId(0), Stage::Compression);
        accountant.reset();
        let state = accountant.state();
        assert_eq!(state.total_work, 0);
        assert_eq!(state.percent, 0);
        assert!(!state.active);
    }
}
