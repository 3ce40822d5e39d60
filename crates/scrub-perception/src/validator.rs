//! Perception Validator.
//!
//! Turns one camera frame into a [`DetectionResult`]: is an object of the
//! configured colour in view, and (in full mode) does its apparent size put
//! it inside the height and distance windows the arm expects?
//!
//! ```text
//! frame ──► HSV mask ──► 8-connected regions ──► largest ──► verdict
//! ```
//!
//! Failures never escape.  A missing frame or a malformed buffer becomes a
//! "no object" verdict carrying the [`ScrubError`] that caused it.

use scrub_hal::{Camera, CameraFrame};
use scrub_types::{DetectionMode, DetectionResult, ScrubError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::color::{self, HsvRange};
use crate::regions::{self, Region};

/// Object distance at the reference height for the inverse-height model.
pub const BASE_DISTANCE_CM: f64 = 50.0;
/// Object height that maps to [`BASE_DISTANCE_CM`].
pub const REFERENCE_HEIGHT_CM: f64 = 10.0;

// ────────────────────────────────────────────────────────────────────────────
// Distance model
// ────────────────────────────────────────────────────────────────────────────

/// Placeholder distance estimate derived from calibrated object height.
///
/// `distance = base_distance_cm * reference_height_cm / height_cm`
///
/// This is not a camera model.  It stands in until the rig has proper
/// intrinsics, so both constants are public and overridable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceModel {
    pub base_distance_cm: f64,
    pub reference_height_cm: f64,
}

impl DistanceModel {
    pub fn inverse_height() -> Self {
        Self {
            base_distance_cm: BASE_DISTANCE_CM,
            reference_height_cm: REFERENCE_HEIGHT_CM,
        }
    }

    /// Estimated distance in cm, rounded to two decimals.  Non-positive
    /// heights yield `f64::INFINITY`, which never matches a window.
    pub fn estimate(&self, height_cm: f64) -> f64 {
        if height_cm <= 0.0 {
            return f64::INFINITY;
        }
        round2(self.base_distance_cm * (self.reference_height_cm / height_cm))
    }
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::inverse_height()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionConfig {
    pub mode: DetectionMode,
    pub color_range: HsvRange,
    pub target_height_cm: f64,
    pub height_tolerance_cm: f64,
    pub target_distance_cm: f64,
    pub distance_tolerance_cm: f64,
    /// Calibration factor.  `None` disables cm measurements.
    pub pixels_per_cm: Option<f64>,
    /// Full mode: the largest region must be strictly larger than this.
    pub min_contour_area: f64,
    /// Colour-only mode: the largest region must be at least this large.
    pub color_only_min_area: f64,
    pub distance_model: DistanceModel,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Full,
            color_range: HsvRange::default(),
            target_height_cm: 15.0,
            height_tolerance_cm: 5.0,
            target_distance_cm: 30.0,
            distance_tolerance_cm: 10.0,
            pixels_per_cm: Some(10.0),
            min_contour_area: 1000.0,
            color_only_min_area: 500.0,
            distance_model: DistanceModel::inverse_height(),
        }
    }
}

impl PerceptionConfig {
    fn height_in_window(&self, height_cm: f64) -> bool {
        within(height_cm, self.target_height_cm, self.height_tolerance_cm)
    }

    fn distance_in_window(&self, distance_cm: f64) -> bool {
        within(distance_cm, self.target_distance_cm, self.distance_tolerance_cm)
    }

    // Zero or negative calibration is treated as absent.
    fn calibration(&self) -> Option<f64> {
        self.pixels_per_cm.filter(|p| *p > 0.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PerceptionValidator
// ────────────────────────────────────────────────────────────────────────────

pub struct PerceptionValidator {
    config: PerceptionConfig,
}

impl PerceptionValidator {
    pub fn new(config: PerceptionConfig) -> Self {
        info!(
            mode = %config.mode,
            color_range = %format!("{}..{}", config.color_range.lower, config.color_range.upper),
            pixels_per_cm = ?config.pixels_per_cm,
            "perception validator ready"
        );
        Self { config }
    }

    /// Active configuration, for status reporting.
    pub fn configuration(&self) -> &PerceptionConfig {
        &self.config
    }

    /// Capture one frame from `camera` and validate it.
    pub fn observe(&self, camera: &mut dyn Camera) -> DetectionResult {
        match camera.capture() {
            Ok(frame) => self.validate_frame(&frame),
            Err(e) => {
                warn!(camera = camera.id(), error = %e, "frame acquisition failed");
                DetectionResult::failed(self.config.mode, e)
            }
        }
    }

    /// Segment `frame` and judge its largest matching region.
    pub fn validate_frame(&self, frame: &CameraFrame) -> DetectionResult {
        if let Err(e) = frame.validate() {
            warn!(error = %e, "frame rejected");
            return DetectionResult::failed(self.config.mode, e);
        }

        let mask = color::segment(frame, &self.config.color_range);
        let found = regions::find_regions(&mask);
        debug!(
            foreground_px = mask.count(),
            regions = found.len(),
            "frame segmented"
        );

        let result = self.evaluate_region(regions::largest(&found));
        info!(
            object_detected = result.object_detected,
            height_match = result.height_match,
            distance_match = result.distance_match,
            height_cm = ?result.measured_height_cm,
            distance_cm = ?result.derived_distance_cm,
            "detection complete"
        );
        result
    }

    /// Verdict for the largest region of a frame (`None` when the mask was
    /// empty).
    pub fn evaluate_region(&self, largest: Option<&Region>) -> DetectionResult {
        let Some(region) = largest else {
            debug!("no matching regions");
            return DetectionResult::no_object(self.config.mode);
        };
        match self.config.mode {
            DetectionMode::Full => self.evaluate_full(region),
            DetectionMode::ColorOnly => self.evaluate_color_only(region),
        }
    }

    /// "No object" verdict used when no camera is attached.
    pub fn simulated(&self) -> DetectionResult {
        DetectionResult::simulated(self.config.mode)
    }

    /// Synthetic "object at target" verdict for diagnostics.
    pub fn test_detection(&self) -> DetectionResult {
        let cfg = &self.config;
        let mut result = DetectionResult::no_object(cfg.mode);
        result.object_detected = true;
        result.simulated = true;

        match cfg.mode {
            DetectionMode::ColorOnly => {
                result.color_only_detected = Some(true);
                result.contour_area = Some(cfg.color_only_min_area + 100.0);
            }
            DetectionMode::Full => {
                let height = cfg.target_height_cm;
                let distance = cfg.distance_model.estimate(height);
                result.measured_height_cm = Some(height);
                result.derived_distance_cm = Some(distance);
                result.height_match = cfg.height_in_window(height);
                result.distance_match = cfg.distance_in_window(distance);
            }
        }
        result
    }

    fn evaluate_full(&self, region: &Region) -> DetectionResult {
        let cfg = &self.config;
        if region.area <= cfg.min_contour_area {
            debug!(area = region.area, min = cfg.min_contour_area, "largest region too small");
            return DetectionResult::no_object(DetectionMode::Full);
        }

        let height_px = region.bounding_box.height;
        let mut result = DetectionResult::no_object(DetectionMode::Full);
        result.object_detected = true;
        result.measured_height_px = Some(height_px);
        result.contour_area = Some(region.area);
        result.bounding_box = Some(region.bounding_box);

        let Some(px_per_cm) = cfg.calibration() else {
            debug!(height_px, "no calibration; geometric windows not evaluated");
            return result;
        };

        let height_cm = round2(height_px as f64 / px_per_cm);
        let distance_cm = cfg.distance_model.estimate(height_cm);
        result.measured_height_cm = Some(height_cm);
        result.derived_distance_cm = Some(distance_cm);
        result.height_match = cfg.height_in_window(height_cm);
        result.distance_match = cfg.distance_in_window(distance_cm);
        result
    }

    fn evaluate_color_only(&self, region: &Region) -> DetectionResult {
        let detected = region.area >= self.config.color_only_min_area;
        debug!(
            area = region.area,
            min = self.config.color_only_min_area,
            detected,
            "colour-only check"
        );
        let mut result = DetectionResult::no_object(DetectionMode::ColorOnly);
        result.object_detected = detected;
        result.color_only_detected = Some(detected);
        result.contour_area = Some(region.area);
        if detected {
            result.measured_height_px = Some(region.bounding_box.height);
            result.bounding_box = Some(region.bounding_box);
        }
        result
    }
}

fn within(value: f64, target: f64, tolerance: f64) -> bool {
    target - tolerance <= value && value <= target + tolerance
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
