//! Live speed preview, kept apart from the applied speed image
//!
//! Settings edits refresh the preview buffer only. The solver sees speed
//! data after an explicit `commit`, and receives its own copy of it.

use tracing::debug;

use super::colormap::SpeedColorMap;
use super::speed::{SpeedFieldComputer, SpeedMode};
use crate::error::{Result, SnakeError};
use crate::volume::Volume;

pub struct SpeedPreview {
    grey: Volume<f32>,
    computer: SpeedFieldComputer,
    preview: Option<Volume<f32>>,
    applied: Option<Volume<f32>>,
    color_map: SpeedColorMap,
}

impl SpeedPreview {
    pub fn new(grey: Volume<f32>, mode: SpeedMode) -> Self {
        Self {
            grey,
            computer: SpeedFieldComputer::new(mode),
            preview: None,
            applied: None,
            color_map: SpeedColorMap::default(),
        }
    }

    pub fn grey(&self) -> &Volume<f32> {
        &self.grey
    }

    pub fn mode(&self) -> &SpeedMode {
        self.computer.mode()
    }

    /// Replace the settings; the preview becomes stale, the applied speed is untouched.
    pub fn set_mode(&mut self, mode: SpeedMode) {
        self.computer = SpeedFieldComputer::new(mode);
        self.preview = None;
    }

    pub fn set_color_map(&mut self, color_map: SpeedColorMap) {
        self.color_map = color_map;
    }

    pub fn is_preview_valid(&self) -> bool {
        self.preview.is_some()
    }

    /// Recompute the whole-volume preview if stale.
    pub fn update_preview(&mut self) -> Result<&Volume<f32>> {
        if self.preview.is_none() {
            debug!("Refreshing speed preview");
            self.preview = Some(self.computer.compute(&self.grey)?);
        }
        match &self.preview {
            Some(preview) => Ok(preview),
            None => Err(SnakeError::configuration("speed preview unavailable")),
        }
    }

    /// Preview a single slice.
    ///
    /// Threshold mode computes only the slice; edge mode refreshes the
    /// full preview and slices it.
    pub fn preview_slice(&mut self, axis: usize, index: usize) -> Result<Vec<f32>> {
        if matches!(self.computer.mode(), SpeedMode::Threshold(_)) {
            return self.computer.compute_slice(&self.grey, axis, index);
        }
        let preview = self.update_preview()?;
        super::speed::extract_slice(preview, axis, index)
    }

    /// RGBA rendering of a preview slice.
    pub fn preview_slice_rgba(&mut self, axis: usize, index: usize) -> Result<Vec<u8>> {
        let slice = self.preview_slice(axis, index)?;
        Ok(self.color_map.map_slice(&slice))
    }

    /// Promote the current preview to the applied speed.
    pub fn commit(&mut self) -> Result<&Volume<f32>> {
        let preview = self.update_preview()?.clone();
        self.applied = Some(preview);
        match &self.applied {
            Some(applied) => Ok(applied),
            None => Err(SnakeError::configuration("applied speed unavailable")),
        }
    }

    /// Speed image last committed, if any.
    pub fn applied(&self) -> Option<&Volume<f32>> {
        self.applied.as_ref()
    }
}
