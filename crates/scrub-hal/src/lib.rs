//! `scrub-hal` – hardware seams of the surgical assistant.
//!
//! # Modules
//!
//! - [`camera`] – [`Camera`][camera::Camera] trait, [`CameraFrame`][camera::CameraFrame]
//!   and the bundled frame sources ([`PpmFileCamera`][camera::PpmFileCamera],
//!   [`StaticCamera`][camera::StaticCamera]).
//! - [`ppm`] – binary PPM codec backing the file camera.
//! - [`actuator`] – [`CommandLink`][actuator::CommandLink] trait and the
//!   [`HttpActuator`][actuator::HttpActuator] that talks to the arm
//!   controller with a bounded timeout.

pub mod actuator;
pub mod camera;
pub mod ppm;

pub use actuator::{CommandLink, DEFAULT_TIMEOUT, DeviceConfig, DeviceStatus, HttpActuator};
pub use camera::{Camera, CameraFrame, PpmFileCamera, StaticCamera};
