//! End-to-end segmentation: seed, speed, evolve, merge

use std::ops::ControlFlow;

use approx::assert_abs_diff_eq;

use snap_wasm::initialization::{Bubble, SignedDistanceBuilder};
use snap_wasm::levelset::{DriverState, LevelSetDriver, SnakeParameters, SolverType, UpdateEvent};
use snap_wasm::merge::{ColorLabelTable, CoverageMode, MergeSettings, ResultMerger};
use snap_wasm::preprocessing::{SmoothBinaryThreshold, SpeedFieldComputer, SpeedMode, ThresholdSettings};
use snap_wasm::registry::{Registry, RegistrySettings};
use snap_wasm::{Region, SnakeError, Volume};

const N: usize = 10;

fn band_settings() -> ThresholdSettings {
    ThresholdSettings {
        lower_threshold: 40.0,
        upper_threshold: 100.0,
        smoothness: 10.0,
        lower_enabled: true,
        upper_enabled: true,
    }
}

fn region_params(propagation: f64) -> SnakeParameters {
    SnakeParameters {
        solver: SolverType::SparseField,
        curvature_weight: 0.0,
        advection_weight: 0.0,
        laplacian_weight: 0.0,
        propagation_weight: propagation,
        ..SnakeParameters::default_region()
    }
}

fn inside(phi: &[f32]) -> Vec<bool> {
    phi.iter().map(|&v| v <= 0.0).collect()
}

/// Seed one bubble in a uniform grey volume and run five iterations.
fn evolve(propagation: f64) -> (Vec<bool>, Vec<bool>) {
    let grey = Volume::new([N; 3], [1.0; 3], 70.0f32);
    let speed = SpeedFieldComputer::new(SpeedMode::Threshold(band_settings()))
        .compute(&grey)
        .unwrap();

    let init = SignedDistanceBuilder::new([N; 3], [1.0; 3], 1)
        .build(&[Bubble::new([5, 5, 5], 2.0)], None)
        .unwrap();
    assert_eq!(init.inside_voxels, 33);
    let before = inside(init.phi.data());

    let mut driver = LevelSetDriver::new().with_batch_size(5);
    driver.initialize(init.phi, speed, region_params(propagation)).unwrap();
    assert_eq!(driver.run(5).unwrap(), DriverState::Paused);
    assert_eq!(driver.elapsed_iterations(), 5);

    let after = inside(driver.snapshot().unwrap().data());
    (before, after)
}

#[test]
fn test_threshold_speed_band() {
    let f = SmoothBinaryThreshold::new(&band_settings()).unwrap();
    assert_abs_diff_eq!(f.apply(70.0), 1.0, epsilon = 0.02);
    assert_abs_diff_eq!(f.apply(10.0), -1.0, epsilon = 0.02);
    assert_abs_diff_eq!(f.apply(130.0), -1.0, epsilon = 0.02);
}

#[test]
fn test_negative_propagation_contracts_to_subset() {
    let (before, after) = evolve(-1.5);
    assert!(before.iter().zip(&after).all(|(b, a)| *b || !*a));
    assert!(after.iter().filter(|&&a| a).count() < 33);
}

#[test]
fn test_positive_propagation_expands_to_superset() {
    let (before, after) = evolve(1.5);
    assert!(before.iter().zip(&after).all(|(b, a)| !*b || *a));
    assert!(after.iter().filter(|&&a| a).count() > 33);
}

#[test]
fn test_restart_reproduces_fresh_driver() {
    let speed = Volume::new([N; 3], [1.0; 3], 1.0f32);
    let init = SignedDistanceBuilder::new([N; 3], [1.0; 3], 1)
        .build(&[Bubble::new([4, 5, 5], 2.0)], None)
        .unwrap();

    let mut fresh = LevelSetDriver::new();
    fresh.initialize(init.phi.clone(), speed.clone(), region_params(1.0)).unwrap();
    fresh.run(3).unwrap();

    let mut restarted = LevelSetDriver::new();
    restarted.initialize(init.phi, speed, region_params(1.0)).unwrap();
    restarted.run(7).unwrap();
    restarted.request_restart().unwrap();
    restarted.run(3).unwrap();

    assert_eq!(restarted.snapshot().unwrap(), fresh.snapshot().unwrap());
}

#[test]
fn test_interactive_session_and_merge() {
    // Bright cube on a dark background; the snake should fill the cube
    let mut grey = Volume::new([12, 12, 12], [1.0; 3], 0.0f32);
    for k in 3..9 {
        for j in 3..9 {
            for i in 3..9 {
                grey.set(i, j, k, 70.0);
            }
        }
    }
    let speed = SpeedFieldComputer::new(SpeedMode::Threshold(band_settings()))
        .compute(&grey)
        .unwrap();
    let init = SignedDistanceBuilder::new([12; 3], [1.0; 3], 2)
        .build(&[Bubble::new([6, 6, 6], 1.0)], None)
        .unwrap();

    let mut driver = LevelSetDriver::new().with_batch_size(10);
    driver.initialize(init.phi, speed, region_params(1.0)).unwrap();
    driver.request_iterations(200).unwrap();

    let mut batches = 0;
    let state = driver
        .begin_update(|ctx| match ctx.event() {
            UpdateEvent::Iteration(_) => {
                batches += 1;
                ControlFlow::Continue(())
            }
            UpdateEvent::Idle => ControlFlow::Break(()),
        })
        .unwrap();
    assert!(batches > 0);
    assert!(matches!(state, DriverState::Paused | DriverState::Converged));

    let phi = driver.snapshot().unwrap();
    assert!(phi.get(6, 6, 6) < 0.0);
    assert!(phi.get(4, 4, 4) < 0.0);
    assert!(phi.get(0, 0, 0) > 0.0);
    assert!(phi.get(10, 6, 6) > 0.0);

    // Merge into a larger label volume with the ROI offset by one voxel
    let mut labels = Volume::new([14, 14, 14], [1.0; 3], 0u8);
    labels.set(0, 0, 0, 5);
    let settings = MergeSettings {
        drawing_label: 2,
        coverage: CoverageMode::PaintOverAll,
        ..MergeSettings::default()
    };
    let stats = ResultMerger::new(settings, &ColorLabelTable::default())
        .merge(&phi, &mut labels, &Region::new([1, 1, 1], [12, 12, 12]))
        .unwrap();
    assert!(stats.painted > 0);
    assert_eq!(labels.get(7, 7, 7), 2);
    assert_eq!(labels.get(0, 0, 0), 5);
    let painted = labels.data().iter().filter(|&&l| l == 2).count();
    assert_eq!(painted, phi.data().iter().filter(|&&v| v <= 0.0).count());

    driver.terminate();
    assert!(matches!(driver.run(1), Err(SnakeError::StateMisuse { .. })));
}

#[test]
fn test_empty_initialization() {
    let labels = Volume::new([N; 3], [1.0; 3], 4u8);
    let err = SignedDistanceBuilder::new([N; 3], [1.0; 3], 1)
        .build(&[], Some(&labels))
        .unwrap_err();
    assert!(matches!(err, SnakeError::InitializationEmpty { label: 1 }));
}

#[test]
fn test_parameters_survive_registry() {
    let params = SnakeParameters {
        solver: SolverType::NarrowBand,
        automatic_time_step: false,
        time_step: 0.05,
        ..region_params(-1.5)
    };
    let mut reg = Registry::new();
    params.write(&mut reg);
    let json = reg.to_json().unwrap();

    let restored = SnakeParameters::read(&Registry::from_json(&json).unwrap(), &SnakeParameters::default()).unwrap();
    assert_eq!(restored, params);
}
