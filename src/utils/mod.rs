//! Utility functions for snake segmentation
//!
//! This module provides common numerical helpers:
//! - Central difference gradients with voxel spacing
//! - Separable Gaussian smoothing
//! - SIMD-accelerated operations (optional, with `simd` feature)

pub mod gradient;
pub mod smoothing;
pub mod simd_ops;

pub use gradient::*;
pub use smoothing::*;
pub use simd_ops::*;
