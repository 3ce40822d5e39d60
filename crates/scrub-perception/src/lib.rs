//! `scrub-perception` – single-frame object validation.
//!
//! Answers one question per instruction cycle: is the instrument the arm
//! should hand over actually in front of the camera, at the expected size
//! and distance?
//!
//! # Modules
//!
//! - [`color`] – RGB→HSV conversion, [`HsvRange`][color::HsvRange] and the
//!   binary [`Mask`][color::Mask] produced by segmentation.
//! - [`regions`] – 8-connected [`Region`][regions::Region] extraction.
//! - [`validator`] – [`PerceptionValidator`][validator::PerceptionValidator]:
//!   full and colour-only verdicts, calibration, and the placeholder
//!   [`DistanceModel`][validator::DistanceModel].

pub mod color;
pub mod regions;
pub mod validator;

pub use color::{Hsv, HsvRange};
pub use validator::{DistanceModel, PerceptionConfig, PerceptionValidator};
