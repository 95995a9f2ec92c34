//! SNAP-WASM: interactive level set segmentation compiled to WebAssembly
//!
//! A snake is seeded from bubbles and a prior label volume, evolved under a
//! speed image derived from grey intensities, and merged back into the
//! label volume.
//!
//! # Modules
//! - `volume`: value-typed 3D grids and regions of interest
//! - `initialization`: ±1 seed level set from bubbles and prior labels
//! - `preprocessing`: edge and threshold speed images, preview, color map
//! - `levelset`: level set function, solvers and the iteration driver
//! - `merge`: label volume merge with coverage modes
//! - `registry`: key/value persistence of all settings
//! - `utils`: gradient, smoothing and SIMD helpers

pub mod error;
pub mod volume;

pub mod initialization;
pub mod preprocessing;
pub mod levelset;
pub mod merge;
pub mod registry;
pub mod utils;

pub use error::{Result, SnakeError};
pub use volume::{Region, Volume};

use std::ops::ControlFlow;

use wasm_bindgen::prelude::*;

use initialization::{snake_mask, Bubble, SignedDistanceBuilder};
use levelset::{LevelSetDriver, SnakeParameters, SnakeType, UpdateEvent};
use merge::{ColorLabelTable, MergeSettings, ResultMerger};
use preprocessing::{
    ColorMapPreset, EdgePreprocessingSettings, SmoothBinaryThreshold, SpeedColorMap,
    ThresholdSettings, edge_speed,
};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

#[allow(unused_macros)]
macro_rules! console_log {
    ($($t:tt)*) => (log(&format_args!($($t)*).to_string()))
}

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn to_js(err: SnakeError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn parse_json<T: serde::de::DeserializeOwned>(json: &str) -> std::result::Result<T, JsValue> {
    serde_json::from_str(json).map_err(|e| JsValue::from_str(&format!("Invalid JSON: {}", e)))
}

// ============================================================================
// WASM Exports: Speed Images
// ============================================================================

/// Smooth binary threshold speed for region competition snakes
///
/// # Arguments
/// * `grey` - Grey intensities (nx * ny * nz)
/// * `lower`, `upper` - Intensity band
/// * `smoothness` - Width of the tanh transition, > 0
/// * `lower_enabled`, `upper_enabled` - Which sides of the band are active
///
/// # Returns
/// Speed values in [-1, 1]
#[wasm_bindgen]
pub fn threshold_speed_wasm(
    grey: &[f32],
    lower: f64,
    upper: f64,
    smoothness: f64,
    lower_enabled: bool,
    upper_enabled: bool,
) -> std::result::Result<Vec<f32>, JsValue> {
    console_log!("WASM threshold speed: {} voxels, band [{}, {}]", grey.len(), lower, upper);

    let settings = ThresholdSettings {
        lower_threshold: lower,
        upper_threshold: upper,
        smoothness,
        lower_enabled,
        upper_enabled,
    };
    let functor = SmoothBinaryThreshold::new(&settings).map_err(to_js)?;
    Ok(functor.apply_slice(grey))
}

/// Edge speed for edge-stopping snakes
///
/// # Arguments
/// * `grey` - Grey intensities (nx * ny * nz)
/// * `nx`, `ny`, `nz` - Array dimensions
/// * `vsx`, `vsy`, `vsz` - Voxel sizes in mm
/// * `blur` - Gaussian blur scale in mm
/// * `steepness`, `exponent` - Remapping of the gradient magnitude
///
/// # Returns
/// Speed values in (0, 1]
#[wasm_bindgen]
pub fn edge_speed_wasm(
    grey: &[f32],
    nx: usize, ny: usize, nz: usize,
    vsx: f64, vsy: f64, vsz: f64,
    blur: f64,
    steepness: f64,
    exponent: f64,
) -> std::result::Result<Vec<f32>, JsValue> {
    console_log!("WASM edge speed: {}x{}x{}, blur={}", nx, ny, nz, blur);

    let volume = Volume::from_vec(grey.to_vec(), [nx, ny, nz], [vsx, vsy, vsz]).map_err(to_js)?;
    let settings = EdgePreprocessingSettings {
        gaussian_blur_scale: blur,
        remapping_steepness: steepness,
        remapping_exponent: exponent,
    };
    let speed = edge_speed(&volume, &settings).map_err(to_js)?;

    console_log!("WASM edge speed complete");
    Ok(speed.into_vec())
}

/// Map speed values to RGBA for display
///
/// # Arguments
/// * `speed` - Speed values
/// * `preset` - 0 blue/black/white, 1 black/gray/white, 2 blue/white/red,
///   3 black/black/white
#[wasm_bindgen]
pub fn speed_preview_rgba_wasm(speed: &[f32], preset: u8) -> Vec<u8> {
    let preset = match preset {
        1 => ColorMapPreset::BlackGrayWhite,
        2 => ColorMapPreset::BlueWhiteRed,
        3 => ColorMapPreset::BlackBlackWhite,
        _ => ColorMapPreset::BlueBlackWhite,
    };
    SpeedColorMap::preset(preset).map_slice(speed)
}

/// Label image of a level set: `label` where φ ≤ 0, 0 elsewhere
#[wasm_bindgen]
pub fn snake_mask_wasm(phi: &[f32], label: u8) -> Vec<u8> {
    snake_mask(phi, label)
}

/// Default snake parameters as JSON
///
/// # Arguments
/// * `region` - true for region competition, false for edge stopping
#[wasm_bindgen]
pub fn default_parameters_json(region: bool) -> std::result::Result<String, JsValue> {
    let snake_type = if region { SnakeType::RegionSnake } else { SnakeType::EdgeSnake };
    serde_json::to_string(&SnakeParameters::default_for(snake_type))
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

// ============================================================================
// WASM Exports: Snake Session
// ============================================================================

/// Interactive snake evolution over one region of interest
#[wasm_bindgen]
pub struct SnakeSession {
    driver: LevelSetDriver,
    label: u8,
}

#[wasm_bindgen]
impl SnakeSession {
    /// Seed a snake and prepare the solver
    ///
    /// # Arguments
    /// * `speed` - Speed image over the ROI (nx * ny * nz)
    /// * `labels` - Prior labels over the ROI (nx * ny * nz), can be empty
    /// * `nx`, `ny`, `nz` - ROI dimensions
    /// * `vsx`, `vsy`, `vsz` - Voxel sizes in mm
    /// * `bubbles` - Flat (x, y, z, radius) quadruples, centres in ROI voxels
    /// * `label` - Drawing label
    /// * `params_json` - Snake parameters as JSON
    /// * `batch_size` - Iterations between callbacks in `begin_update`
    #[wasm_bindgen(constructor)]
    pub fn new(
        speed: &[f32],
        labels: &[u8],
        nx: usize, ny: usize, nz: usize,
        vsx: f64, vsy: f64, vsz: f64,
        bubbles: &[f64],
        label: u8,
        params_json: &str,
        batch_size: usize,
    ) -> std::result::Result<SnakeSession, JsValue> {
        console_log!("WASM snake session: {}x{}x{}, {} bubbles", nx, ny, nz, bubbles.len() / 4);

        if bubbles.len() % 4 != 0 {
            return Err(JsValue::from_str("bubbles must be (x, y, z, radius) quadruples"));
        }
        let params: SnakeParameters = parse_json(params_json)?;
        let dims = [nx, ny, nz];
        let spacing = [vsx, vsy, vsz];

        let bubbles = bubbles
            .chunks_exact(4)
            .map(|b| Bubble::from_voxel_coords([b[0], b[1], b[2]], b[3]))
            .collect::<Result<Vec<_>>>()
            .map_err(to_js)?;
        let prior = if labels.is_empty() {
            None
        } else {
            Some(Volume::from_vec(labels.to_vec(), dims, spacing).map_err(to_js)?)
        };

        let initial = SignedDistanceBuilder::new(dims, spacing, label)
            .build(&bubbles, prior.as_ref())
            .map_err(to_js)?;
        let speed = Volume::from_vec(speed.to_vec(), dims, spacing).map_err(to_js)?;

        let mut driver = LevelSetDriver::new().with_batch_size(batch_size);
        driver.initialize(initial.phi, speed, params).map_err(to_js)?;

        console_log!("WASM snake initialized with {} inside voxels", initial.inside_voxels);
        Ok(SnakeSession { driver, label })
    }

    /// Run `n` iterations and return the resulting state name
    pub fn run(&mut self, n: usize) -> std::result::Result<String, JsValue> {
        let state = self.driver.run(n).map_err(to_js)?;
        Ok(state.to_string())
    }

    /// Run under control of a JS callback
    ///
    /// The callback is called as `callback(event, totalIterations, maxChange)`
    /// with `event` either "iteration" or "idle". Returning a positive number
    /// requests that many further iterations, a negative number stops the
    /// update, anything else continues. An idle tick with nothing requested
    /// ends the update.
    pub fn begin_update(&mut self, callback: &js_sys::Function) -> std::result::Result<String, JsValue> {
        let this = JsValue::null();
        let mut js_error = None;

        let state = self
            .driver
            .begin_update(|ctx| {
                let (name, total, change) = match ctx.event() {
                    UpdateEvent::Iteration(r) => ("iteration", r.total_iterations, r.max_change),
                    UpdateEvent::Idle => ("idle", 0, 0.0),
                };
                let reply = match callback.call3(
                    &this,
                    &JsValue::from_str(name),
                    &JsValue::from(total as u32),
                    &JsValue::from(change),
                ) {
                    Ok(reply) => reply,
                    Err(e) => {
                        js_error = Some(e);
                        return ControlFlow::Break(());
                    }
                };

                match reply.as_f64() {
                    Some(n) if n > 0.0 => {
                        ctx.request_iterations(n as usize);
                        ControlFlow::Continue(())
                    }
                    Some(n) if n < 0.0 => ControlFlow::Break(()),
                    _ if name == "idle" => ControlFlow::Break(()),
                    _ => ControlFlow::Continue(()),
                }
            })
            .map_err(to_js)?;

        match js_error {
            Some(e) => Err(e),
            None => Ok(state.to_string()),
        }
    }

    /// Rewind to the initial level set
    pub fn restart(&mut self) -> std::result::Result<(), JsValue> {
        self.driver.request_restart().map_err(to_js)
    }

    /// Replace the snake parameters
    ///
    /// A new solver always rewinds to the initial level set; `restart`
    /// rewinds for any change.
    pub fn set_parameters(&mut self, params_json: &str, restart: bool) -> std::result::Result<(), JsValue> {
        let params: SnakeParameters = parse_json(params_json)?;
        self.driver.set_snake_parameters(params).map_err(to_js)?;
        if restart {
            self.driver.request_restart().map_err(to_js)?;
        }
        Ok(())
    }

    /// Current level set values (nx * ny * nz)
    pub fn phi(&self) -> std::result::Result<Vec<f32>, JsValue> {
        Ok(self.driver.snapshot().map_err(to_js)?.into_vec())
    }

    /// Current snake as a label image
    pub fn snake_mask(&self) -> Vec<u8> {
        self.driver.phi().map(|phi| snake_mask(phi, self.label)).unwrap_or_default()
    }

    pub fn state(&self) -> String {
        self.driver.state().to_string()
    }

    pub fn elapsed_iterations(&self) -> usize {
        self.driver.elapsed_iterations()
    }

    /// Merge the snake into a full label volume and end the session
    ///
    /// # Arguments
    /// * `target` - Label volume (tnx * tny * tnz), modified in-place
    /// * `tnx`, `tny`, `tnz` - Label volume dimensions
    /// * `ox`, `oy`, `oz` - ROI offset inside the label volume
    /// * `merge_json` - Merge settings as JSON
    ///
    /// # Returns
    /// [painted, cleared] voxel counts
    pub fn merge_into(
        &mut self,
        target: &mut [u8],
        tnx: usize, tny: usize, tnz: usize,
        ox: usize, oy: usize, oz: usize,
        merge_json: &str,
    ) -> std::result::Result<Vec<u32>, JsValue> {
        let settings: MergeSettings = parse_json(merge_json)?;
        let phi = self.driver.snapshot().map_err(to_js)?;
        let roi = Region::new([ox, oy, oz], phi.dims());
        let mut labels = Volume::from_vec(target.to_vec(), [tnx, tny, tnz], [1.0; 3]).map_err(to_js)?;

        let stats = ResultMerger::new(settings, &ColorLabelTable::default())
            .merge(&phi, &mut labels, &roi)
            .map_err(to_js)?;
        target.copy_from_slice(labels.data());
        self.driver.terminate();

        console_log!("WASM merge: {} painted, {} cleared", stats.painted, stats.cleared);
        Ok(vec![stats.painted as u32, stats.cleared as u32])
    }

    pub fn terminate(&mut self) {
        self.driver.terminate();
    }
}
