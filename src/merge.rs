//! Merge a finished snake back into the label volume
//!
//! A 2×256 lookup table is built once per merge. Row 1 holds the output
//! label for voxels inside the snake (φ ≤ 0), row 0 for voxels outside it;
//! each row is indexed by the label currently in the target.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SnakeError};
use crate::volume::{Region, Volume};

/// Number of distinct labels
pub const MAX_COLOR_LABELS: usize = 256;

/// Which existing labels the drawing label may replace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoverageMode {
    /// Replace every label
    #[default]
    PaintOverAll,
    /// Replace only the overwrite label
    PaintOverOne,
    /// Replace only labels that are currently visible
    PaintOverColors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorLabel {
    pub valid: bool,
    pub visible: bool,
}

/// Per-label flags consulted by `CoverageMode::PaintOverColors`
#[derive(Debug, Clone)]
pub struct ColorLabelTable {
    labels: [ColorLabel; MAX_COLOR_LABELS],
}

impl Default for ColorLabelTable {
    /// Every label valid and visible except the clear label 0.
    fn default() -> Self {
        let mut labels = [ColorLabel { valid: true, visible: true }; MAX_COLOR_LABELS];
        labels[0].visible = false;
        Self { labels }
    }
}

impl ColorLabelTable {
    pub fn get(&self, label: u8) -> ColorLabel {
        self.labels[label as usize]
    }

    pub fn set_visible(&mut self, label: u8, visible: bool) {
        self.labels[label as usize].visible = visible;
    }

    pub fn set_valid(&mut self, label: u8, valid: bool) {
        self.labels[label as usize].valid = valid;
    }

    pub fn is_drawable(&self, label: u8) -> bool {
        let l = self.get(label);
        l.valid && l.visible
    }
}

/// Label state used when merging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSettings {
    pub drawing_label: u8,
    pub overwrite_label: u8,
    pub coverage: CoverageMode,
    /// Draw on the outside of the snake instead of the inside
    pub invert: bool,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            drawing_label: 1,
            overwrite_label: 0,
            coverage: CoverageMode::PaintOverAll,
            invert: false,
        }
    }
}

/// Voxel counts changed by a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeStats {
    /// Voxels given the drawing label
    pub painted: usize,
    /// Drawing-label voxels reset to 0
    pub cleared: usize,
}

/// One-shot merger; `merge` consumes it.
#[derive(Debug)]
pub struct ResultMerger {
    settings: MergeSettings,
    table: [[u8; MAX_COLOR_LABELS]; 2],
}

impl ResultMerger {
    pub fn new(settings: MergeSettings, colors: &ColorLabelTable) -> Self {
        let drawing = settings.drawing_label;
        let clear_row = if settings.invert { 1 } else { 0 };
        let draw_row = 1 - clear_row;

        let mut table = [[0u8; MAX_COLOR_LABELS]; 2];
        for i in 0..MAX_COLOR_LABELS {
            let label = i as u8;
            table[clear_row][i] = if label != drawing { label } else { 0 };
            let draw_over = match settings.coverage {
                CoverageMode::PaintOverAll => true,
                CoverageMode::PaintOverOne => label == settings.overwrite_label,
                CoverageMode::PaintOverColors => colors.is_drawable(label),
            };
            table[draw_row][i] = if draw_over || label == drawing { drawing } else { label };
        }

        Self { settings, table }
    }

    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    /// Output label for a voxel currently labelled `current`.
    #[inline]
    pub fn lookup(&self, inside: bool, current: u8) -> u8 {
        self.table[inside as usize][current as usize]
    }

    /// Write the snake into `target` over `roi`.
    ///
    /// # Arguments
    /// * `phi` - Final level set, with the ROI's dimensions
    /// * `target` - Full label volume
    /// * `roi` - Placement of `phi` inside `target`
    pub fn merge(self, phi: &Volume<f32>, target: &mut Volume<u8>, roi: &Region) -> Result<MergeStats> {
        roi.check_inside(target.dims())?;
        if phi.dims() != roi.size {
            return Err(SnakeError::DimensionMismatch {
                expected: roi.size,
                actual: phi.dims(),
            });
        }

        let drawing = self.settings.drawing_label;
        let [sx, sy, sz] = roi.size;
        let [ox, oy, oz] = roi.index;
        let mut stats = MergeStats::default();

        for k in 0..sz {
            for j in 0..sy {
                for i in 0..sx {
                    let inside = phi.get(i, j, k) <= 0.0;
                    let idx = target.idx(ox + i, oy + j, oz + k);
                    let voxel = &mut target.data_mut()[idx];
                    let old = *voxel;
                    let new = self.lookup(inside, old);
                    if new != old {
                        if new == drawing {
                            stats.painted += 1;
                        } else {
                            stats.cleared += 1;
                        }
                    }
                    *voxel = new;
                }
            }
        }

        info!(
            label = drawing,
            coverage = ?self.settings.coverage,
            painted = stats.painted,
            cleared = stats.cleared,
            "Merged segmentation into label volume"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1-D strip: φ = [-1, -1, 1, 1]
    fn strip() -> Volume<f32> {
        Volume::from_vec(vec![-1.0, -1.0, 1.0, 1.0], [4, 1, 1], [1.0; 3]).unwrap()
    }

    #[test]
    fn test_paint_over_all() {
        let mut target = Volume::from_vec(vec![0u8, 2, 3, 5], [4, 1, 1], [1.0; 3]).unwrap();
        let settings = MergeSettings { drawing_label: 3, ..MergeSettings::default() };
        let stats = ResultMerger::new(settings, &ColorLabelTable::default())
            .merge(&strip(), &mut target, &Region::whole([4, 1, 1]))
            .unwrap();
        assert_eq!(target.data(), &[3, 3, 0, 5]);
        assert_eq!(stats, MergeStats { painted: 2, cleared: 1 });
    }

    #[test]
    fn test_paint_over_one() {
        let mut target = Volume::from_vec(vec![0u8, 2, 2, 5], [4, 1, 1], [1.0; 3]).unwrap();
        let settings = MergeSettings {
            drawing_label: 4,
            overwrite_label: 2,
            coverage: CoverageMode::PaintOverOne,
            invert: false,
        };
        ResultMerger::new(settings, &ColorLabelTable::default())
            .merge(&strip(), &mut target, &Region::whole([4, 1, 1]))
            .unwrap();
        assert_eq!(target.data(), &[0, 4, 2, 5]);
    }

    #[test]
    fn test_paint_over_colors() {
        let mut colors = ColorLabelTable::default();
        colors.set_visible(2, false);
        let mut target = Volume::from_vec(vec![2u8, 6, 6, 0], [4, 1, 1], [1.0; 3]).unwrap();
        let settings = MergeSettings {
            drawing_label: 1,
            coverage: CoverageMode::PaintOverColors,
            ..MergeSettings::default()
        };
        ResultMerger::new(settings, &colors)
            .merge(&strip(), &mut target, &Region::whole([4, 1, 1]))
            .unwrap();
        assert_eq!(target.data(), &[2, 1, 6, 0]);
    }

    #[test]
    fn test_invert_swaps_sides() {
        let mut target = Volume::from_vec(vec![1u8, 0, 0, 0], [4, 1, 1], [1.0; 3]).unwrap();
        let settings = MergeSettings { invert: true, ..MergeSettings::default() };
        ResultMerger::new(settings, &ColorLabelTable::default())
            .merge(&strip(), &mut target, &Region::whole([4, 1, 1]))
            .unwrap();
        assert_eq!(target.data(), &[0, 0, 1, 1]);
    }

    #[test]
    fn test_merge_into_roi_only() {
        let mut target = Volume::new([4, 4, 1], [1.0; 3], 9u8);
        let phi = Volume::new([2, 2, 1], [1.0; 3], -1.0f32);
        let settings = MergeSettings { drawing_label: 1, ..MergeSettings::default() };
        let stats = ResultMerger::new(settings, &ColorLabelTable::default())
            .merge(&phi, &mut target, &Region::new([1, 1, 0], [2, 2, 1]))
            .unwrap();
        assert_eq!(stats.painted, 4);
        assert_eq!(target.get(1, 1, 0), 1);
        assert_eq!(target.get(2, 2, 0), 1);
        assert_eq!(target.get(0, 0, 0), 9);
        assert_eq!(target.get(3, 3, 0), 9);
    }

    #[test]
    fn test_merge_checks_geometry() {
        let mut target = Volume::new([4, 4, 1], [1.0; 3], 0u8);
        let phi = Volume::new([3, 3, 1], [1.0; 3], -1.0f32);
        let merger = || ResultMerger::new(MergeSettings::default(), &ColorLabelTable::default());
        assert!(merger()
            .merge(&phi, &mut target, &Region::new([2, 2, 0], [3, 3, 1]))
            .is_err());
        assert!(matches!(
            merger().merge(&phi, &mut target, &Region::new([0, 0, 0], [2, 2, 1])),
            Err(SnakeError::DimensionMismatch { .. })
        ));
    }
}
