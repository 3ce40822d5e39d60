use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The hand an operator works with.  Decides the suffix appended to every
/// actuator command (`l` / `r`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Case-insensitive parse of `"left"` / `"right"`.  Anything else is
    /// `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Handedness::Left),
            "right" => Some(Handedness::Right),
            _ => None,
        }
    }

    /// Single-letter command suffix understood by the arm firmware.
    pub fn suffix(self) -> char {
        match self {
            Handedness::Left => 'l',
            Handedness::Right => 'r',
        }
    }
}

impl std::fmt::Display for Handedness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handedness::Left => write!(f, "left"),
            Handedness::Right => write!(f, "right"),
        }
    }
}

/// Surgical actions the arm knows about.
///
/// The four built-ins are matched exhaustively by the command table;
/// anything registered at runtime travels as [`SurgicalAction::Custom`].
/// Names are always stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SurgicalAction {
    Incision,
    Stitch,
    Grasp,
    Cut,
    Custom(String),
}

impl SurgicalAction {
    /// Built-in actions, in their canonical order.
    pub const BUILTIN: [SurgicalAction; 4] = [
        SurgicalAction::Incision,
        SurgicalAction::Stitch,
        SurgicalAction::Grasp,
        SurgicalAction::Cut,
    ];

    /// Parse an action name.  Blank input means "no action" and yields
    /// `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some(match name.as_str() {
            "incision" => SurgicalAction::Incision,
            "stitch" => SurgicalAction::Stitch,
            "grasp" => SurgicalAction::Grasp,
            "cut" => SurgicalAction::Cut,
            _ => SurgicalAction::Custom(name),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            SurgicalAction::Incision => "incision",
            SurgicalAction::Stitch => "stitch",
            SurgicalAction::Grasp => "grasp",
            SurgicalAction::Cut => "cut",
            SurgicalAction::Custom(name) => name,
        }
    }

    /// First character of the action name, used by the fallback command
    /// code `<letter><0|1>`.
    pub fn first_letter(&self) -> char {
        self.as_str().chars().next().unwrap_or('x')
    }
}

impl From<String> for SurgicalAction {
    fn from(raw: String) -> Self {
        SurgicalAction::parse(&raw).unwrap_or(SurgicalAction::Custom(String::new()))
    }
}

impl From<SurgicalAction> for String {
    fn from(action: SurgicalAction) -> Self {
        action.as_str().to_string()
    }
}

impl std::fmt::Display for SurgicalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical intent produced by the intent normalizer for one cycle.
///
/// A successfully normalized record always carries a handedness; `None`
/// only appears when the record was assembled from a failed stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntentRecord {
    pub tool: Option<String>,
    pub action: Option<SurgicalAction>,
    pub handedness: Option<Handedness>,
    /// Operator identifier detected in the instruction text.
    pub operator: Option<String>,
}

/// Exact shape the reasoning service must reply with.  The JSON Schema of
/// this type is sent along with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntentReply {
    /// Surgical tool to use, e.g. `"scalpel"`.
    pub tool: Option<String>,
    /// Action to perform, e.g. `"incision"`.
    pub action: Option<String>,
    /// `"left"` or `"right"`.
    pub handedness: Option<String>,
}

/// How the perception validator gates on the observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Colour presence plus height/distance tolerance windows.
    #[default]
    Full,
    /// Colour presence only; geometric gating disabled.
    ColorOnly,
}

impl DetectionMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => Some(DetectionMode::Full),
            "color_only" | "coloronly" | "colour_only" => Some(DetectionMode::ColorOnly),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMode::Full => write!(f, "full"),
            DetectionMode::ColorOnly => write!(f, "color_only"),
        }
    }
}

/// Axis-aligned pixel bounding box of a detected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Structured verdict for one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub object_detected: bool,
    /// Calibrated object height (cm).  Absent without a calibration factor.
    pub measured_height_cm: Option<f64>,
    /// Raw bounding-box height (px).
    pub measured_height_px: Option<u32>,
    /// Distance derived from the calibrated height (cm).  `f64::INFINITY`
    /// serialises as `null`.
    pub derived_distance_cm: Option<f64>,
    pub height_match: bool,
    pub distance_match: bool,
    pub mode: DetectionMode,
    /// Only set in colour-only mode.
    pub color_only_detected: Option<bool>,
    pub contour_area: Option<f64>,
    pub bounding_box: Option<BoundingBox>,
    /// `true` when no camera was consulted.
    pub simulated: bool,
    /// Acquisition or processing failure that forced a "no object" verdict.
    pub failure: Option<ScrubError>,
}

impl DetectionResult {
    /// "Nothing seen" verdict for `mode`.
    ///
    /// In colour-only mode the geometric flags stay forced to `true` and
    /// `color_only_detected` carries the negative signal.
    pub fn no_object(mode: DetectionMode) -> Self {
        let color_only = mode == DetectionMode::ColorOnly;
        Self {
            object_detected: false,
            measured_height_cm: None,
            measured_height_px: None,
            derived_distance_cm: None,
            height_match: color_only,
            distance_match: color_only,
            mode,
            color_only_detected: color_only.then_some(false),
            contour_area: None,
            bounding_box: None,
            simulated: false,
            failure: None,
        }
    }

    /// "No object" verdict carrying the failure that caused it.
    pub fn failed(mode: DetectionMode, failure: ScrubError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::no_object(mode)
        }
    }

    /// "No object" verdict produced without a camera.
    pub fn simulated(mode: DetectionMode) -> Self {
        Self {
            simulated: true,
            ..Self::no_object(mode)
        }
    }

    /// Combined verdict used by the command resolver: the colour-only flag
    /// when present, otherwise presence plus both geometric windows.
    pub fn criteria_met(&self) -> bool {
        match self.color_only_detected {
            Some(detected) => detected,
            None => self.object_detected && self.height_match && self.distance_match,
        }
    }
}

/// Why a dispatch did not reach the device as a real, accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    Timeout,
    ConnectionError,
    HttpError,
    /// Simulation mode marker; the outcome is still a success.
    Disabled,
}

/// Result of sending one command to the actuator controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub command: String,
    pub response_body: Option<String>,
    pub error_kind: Option<DispatchErrorKind>,
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

impl DispatchOutcome {
    pub fn delivered(command: &str, status: u16, body: String) -> Self {
        Self {
            success: true,
            command: command.to_string(),
            response_body: Some(body),
            error_kind: None,
            status_code: Some(status),
            message: None,
        }
    }

    pub fn simulated(command: &str) -> Self {
        Self {
            success: true,
            command: command.to_string(),
            response_body: Some("OK (simulation)".to_string()),
            error_kind: Some(DispatchErrorKind::Disabled),
            status_code: None,
            message: Some("device integration disabled".to_string()),
        }
    }

    pub fn failed(
        command: &str,
        kind: DispatchErrorKind,
        status_code: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            command: command.to_string(),
            response_body: None,
            error_kind: Some(kind),
            status_code,
            message: Some(message.into()),
        }
    }

    /// The taxonomy entry matching this outcome, if any.
    pub fn error(&self) -> Option<ScrubError> {
        let kind = self.error_kind?;
        let detail = self.message.clone().unwrap_or_default();
        Some(match kind {
            DispatchErrorKind::Timeout => ScrubError::ActuatorTimeout,
            DispatchErrorKind::ConnectionError => ScrubError::ActuatorConnectionError(detail),
            DispatchErrorKind::HttpError => ScrubError::ActuatorHttpError {
                status: self.status_code.unwrap_or_default(),
            },
            DispatchErrorKind::Disabled => ScrubError::ActuatorDisabledSimulation,
        })
    }
}

/// Result of the actuator connectivity probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityResult {
    pub reachable: bool,
    pub status_code: Option<u16>,
    pub error_kind: Option<DispatchErrorKind>,
    pub message: String,
}

/// Overall verdict of one instruction cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every stage succeeded and the device accepted the command.
    Completed,
    /// A command was resolved but at least one stage reported an error.
    Degraded,
    /// Nothing was dispatched.
    Failed,
}

/// Complete structured response of one instruction cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub instruction: String,
    pub intent: Option<IntentRecord>,
    pub detection: Option<DetectionResult>,
    pub command: Option<String>,
    pub dispatch: Option<DispatchOutcome>,
    pub success: bool,
    pub status: CycleStatus,
    /// Per-stage errors, in pipeline order.
    pub errors: Vec<ScrubError>,
}

/// Error taxonomy shared by every stage of the pipeline.
///
/// Stages return these as data; the composed cycle collects them into
/// [`CycleReport::errors`] instead of aborting.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScrubError {
    #[error("No operator detected in instruction")]
    NoOperatorDetected,

    #[error("Malformed reasoning response: {0}")]
    MalformedResponse(String),

    #[error("Reasoning service failure: {0}")]
    ReasoningServiceFailure(String),

    #[error("Reasoning service timed out after {0} ms")]
    ReasoningTimeout(u64),

    #[error("Frame acquisition failure: {0}")]
    FrameAcquisitionFailure(String),

    #[error("Frame processing failure: {0}")]
    FrameProcessingFailure(String),

    #[error("Perception timed out after {0} ms")]
    PerceptionTimeout(u64),

    #[error("Actuator request timed out")]
    ActuatorTimeout,

    #[error("Actuator connection error: {0}")]
    ActuatorConnectionError(String),

    #[error("Actuator returned HTTP {status}")]
    ActuatorHttpError { status: u16 },

    #[error("Actuator disabled; command simulated")]
    ActuatorDisabledSimulation,

    #[error("Invalid command mapping: {0}")]
    InvalidMapping(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScrubError {
    /// `false` only for the simulation marker, which is not a real failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, ScrubError::ActuatorDisabledSimulation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handedness_parse_is_case_insensitive() {
        assert_eq!(Handedness::parse("LEFT"), Some(Handedness::Left));
        assert_eq!(Handedness::parse(" right "), Some(Handedness::Right));
        assert_eq!(Handedness::parse("ambidextrous"), None);
    }

    #[test]
    fn handedness_serializes_lowercase() {
        let json = serde_json::to_string(&Handedness::Left).unwrap();
        assert_eq!(json, "\"left\"");
    }

    #[test]
    fn surgical_action_parse_builtins_and_custom() {
        assert_eq!(SurgicalAction::parse("Incision"), Some(SurgicalAction::Incision));
        assert_eq!(SurgicalAction::parse("STITCH"), Some(SurgicalAction::Stitch));
        assert_eq!(
            SurgicalAction::parse("Suture"),
            Some(SurgicalAction::Custom("suture".to_string()))
        );
        assert_eq!(SurgicalAction::parse("   "), None);
    }

    #[test]
    fn surgical_action_serializes_as_plain_string() {
        let json = serde_json::to_string(&SurgicalAction::Grasp).unwrap();
        assert_eq!(json, "\"grasp\"");
        let back: SurgicalAction = serde_json::from_str("\"retract\"").unwrap();
        assert_eq!(back, SurgicalAction::Custom("retract".to_string()));
    }

    #[test]
    fn first_letter_drives_fallback_codes() {
        assert_eq!(SurgicalAction::Cut.first_letter(), 'c');
        assert_eq!(SurgicalAction::Custom("probe".into()).first_letter(), 'p');
    }

    #[test]
    fn no_object_in_full_mode_clears_everything() {
        let d = DetectionResult::no_object(DetectionMode::Full);
        assert!(!d.object_detected);
        assert!(!d.height_match);
        assert!(!d.distance_match);
        assert!(d.measured_height_cm.is_none());
        assert!(d.derived_distance_cm.is_none());
        assert!(d.color_only_detected.is_none());
        assert!(!d.criteria_met());
    }

    #[test]
    fn no_object_in_color_only_mode_keeps_forced_flags() {
        let d = DetectionResult::no_object(DetectionMode::ColorOnly);
        assert!(d.height_match && d.distance_match);
        assert_eq!(d.color_only_detected, Some(false));
        assert!(!d.criteria_met());
    }

    #[test]
    fn failed_detection_carries_marker() {
        let d = DetectionResult::failed(
            DetectionMode::Full,
            ScrubError::FrameAcquisitionFailure("camera unplugged".into()),
        );
        assert!(!d.object_detected);
        assert!(matches!(d.failure, Some(ScrubError::FrameAcquisitionFailure(_))));
    }

    #[test]
    fn dispatch_outcome_maps_to_taxonomy() {
        let timeout = DispatchOutcome::failed("a0r", DispatchErrorKind::Timeout, None, "late");
        assert_eq!(timeout.error(), Some(ScrubError::ActuatorTimeout));

        let http = DispatchOutcome::failed("a0r", DispatchErrorKind::HttpError, Some(503), "busy");
        assert_eq!(http.error(), Some(ScrubError::ActuatorHttpError { status: 503 }));

        let sim = DispatchOutcome::simulated("x");
        assert!(sim.success);
        assert_eq!(sim.error(), Some(ScrubError::ActuatorDisabledSimulation));
        assert!(!ScrubError::ActuatorDisabledSimulation.is_failure());

        let ok = DispatchOutcome::delivered("b1l", 200, "OK".into());
        assert!(ok.error().is_none());
    }

    #[test]
    fn detection_result_roundtrip() {
        let d = DetectionResult::failed(
            DetectionMode::ColorOnly,
            ScrubError::FrameProcessingFailure("empty frame".into()),
        );
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"color_only\""));
        let back: DetectionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn scrub_error_display() {
        let err = ScrubError::ActuatorHttpError { status: 404 };
        assert!(err.to_string().contains("404"));
        assert!(ScrubError::NoOperatorDetected.to_string().contains("No operator"));
    }
}
