//! Shared test utilities for the forcing collector workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic remote catalogs held in an in-memory object store
//! - Zone GeoJSON fixtures
//! - Grid data generators
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then build a catalog in a test:
//!
//! ```ignore
//! use test_utils::SyntheticCatalog;
//!
//! let catalog = SyntheticCatalog::new(4, 4).steps(6).build().await;
//! let (storage, path) = catalog.router.resolve(&catalog.root)?;
//! ```

pub mod catalog;
pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use catalog::*;
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
