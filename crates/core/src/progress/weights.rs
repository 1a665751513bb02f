//! Per-stage work weights.

use serde::{Deserialize, Serialize};

use crate::workload::{MediaKind, Stage};

/// Multipliers that turn file sizes into work units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressWeights {
    /// Compression work per image byte.
    #[serde(default = "default_image_multiplier")]
    pub image_multiplier: u64,

    /// Compression work per video byte.
    #[serde(default = "default_video_multiplier")]
    pub video_multiplier: u64,

    /// Upload work per byte, regardless of kind.
    #[serde(default = "default_upload_multiplier")]
    pub upload_multiplier: u64,

    /// Fixed link-rewrite work per item.
    #[serde(default = "default_link_work")]
    pub link_work: u64,
}

fn default_image_multiplier() -> u64 {
    1
}

fn default_video_multiplier() -> u64 {
    10
}

fn default_upload_multiplier() -> u64 {
    5
}

fn default_link_work() -> u64 {
    20_000
}

impl Default for ProgressWeights {
    fn default() -> Self {
        Self {
            image_multiplier: default_image_multiplier(),
            video_multiplier: default_video_multiplier(),
            upload_multiplier: default_upload_multiplier(),
            link_work: default_link_work(),
        }
    }
}

impl ProgressWeights {
    /// Work units for one stage of one item. Deletion carries no weight.
    pub fn stage_work(&self, stage: Stage, kind: MediaKind, size_bytes: u64) -> u64 {
        match stage {
            Stage::Compression => {
                let multiplier = match kind {
                    MediaKind::Image => self.image_multiplier,
                    MediaKind::Video => self.video_multiplier,
                };
                size_bytes.saturating_mul(multiplier)
            }
            Stage::Upload => size_bytes.saturating_mul(self.upload_multiplier),
            Stage::LinkRewrite => self.link_work,
            Stage::Deletion => 0,
        }
    }

    /// Total work units for one item across all weighted stages.
    pub fn item_work(&self, kind: MediaKind, size_bytes: u64) -> u64 {
        [Stage::Compression, Stage::Upload, Stage::LinkRewrite]
            .into_iter()
            .map(|stage| self.stage_work(stage, kind, size_bytes))
            .fold(0u64, u64::saturating_add)
    }

    pub fn is_zero(&self) -> bool {
        self.image_multiplier == 0
            && self.video_multiplier == 0
            && self.upload_multiplier == 0
            && self.link_work == 0
    }
}
