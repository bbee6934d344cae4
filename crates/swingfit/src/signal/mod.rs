//! One-dimensional signal helpers shared by edge detection and template building.
//!
//! - **Smoothing** – odd-length running mean with replicated ends.
//! - **Levels** – lo/hi (and optionally mid) plateau estimation.
//! - **Regression** – least-squares line zero crossing for sub-sample edges.

pub(crate) mod levels;
pub(crate) mod regress;
pub(crate) mod smooth;

pub use levels::{LevelEstimator, Levels};
