//! [`InstructionPipeline`] – one instruction in, one actuator command out.
//!
//! Each call to [`InstructionPipeline::process_instruction`] runs a full
//! cycle:
//!
//! 1. **Operator** – find the operator named in the text.  None found ends
//!    the cycle immediately with [`CycleStatus::Failed`]; nothing is sent.
//! 2. **Interpret ∥ Observe** – the reasoning call and the camera frame
//!    (captured and processed on a blocking worker) run concurrently, each
//!    bounded by the stage timeout.  A failed stage contributes its fallback:
//!    no intent degenerates to the `"x"` sentinel, no frame to a "no object"
//!    verdict.
//! 3. **Resolve** – pure table lookup under the table's read lock.
//! 4. **Dispatch** – exactly one send, serialized across concurrent cycles.
//!
//! The cycle never returns an error.  Every stage failure is recorded in
//! [`CycleReport::errors`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scrub_hal::{DeviceConfig, HttpActuator};
//! use scrub_kernel::{OperatorProfiles, SharedCommandTable};
//! use scrub_perception::{PerceptionConfig, PerceptionValidator};
//! use scrub_runtime::intent::IntentNormalizer;
//! use scrub_runtime::llm_driver::LlmDriver;
//! use scrub_runtime::pipeline::{InstructionPipeline, PipelineConfig};
//!
//! # async fn run() {
//! let reasoning = Arc::new(LlmDriver::new("http://localhost:11434", "llama3"));
//! let pipeline = InstructionPipeline::new(
//!     IntentNormalizer::new(OperatorProfiles::default(), reasoning),
//!     PerceptionValidator::new(PerceptionConfig::default()),
//!     None,
//!     SharedCommandTable::default(),
//!     Arc::new(HttpActuator::new(DeviceConfig::default())),
//!     PipelineConfig::default(),
//! );
//! let report = pipeline.process_instruction("kiran, stitch the wound").await;
//! println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use scrub_hal::{Camera, CommandLink};
use scrub_kernel::{OperatorProfile, SharedCommandTable, resolve};
use scrub_perception::PerceptionValidator;
use scrub_types::{
    ConnectivityResult, CycleReport, CycleStatus, DetectionResult, IntentRecord, ScrubError,
    SurgicalAction,
};
use tracing::{Span, info, instrument, warn};
use uuid::Uuid;

use crate::intent::IntentNormalizer;

/// Default bound for the reasoning and perception stages.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Upper bound for each of the two concurrent stages.
    pub stage_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

type SharedCamera = Arc<Mutex<Box<dyn Camera>>>;

pub struct InstructionPipeline {
    normalizer: IntentNormalizer,
    perception: Arc<PerceptionValidator>,
    /// `None` runs perception in simulation.
    camera: Option<SharedCamera>,
    table: SharedCommandTable,
    actuator: Arc<dyn CommandLink>,
    dispatch_lock: tokio::sync::Mutex<()>,
    config: PipelineConfig,
}

impl InstructionPipeline {
    pub fn new(
        normalizer: IntentNormalizer,
        perception: PerceptionValidator,
        camera: Option<Box<dyn Camera>>,
        table: SharedCommandTable,
        actuator: Arc<dyn CommandLink>,
        config: PipelineConfig,
    ) -> Self {
        info!(
            camera = ?camera.as_ref().map(|c| c.id()),
            stage_timeout_ms = config.stage_timeout.as_millis() as u64,
            "instruction pipeline ready"
        );
        Self {
            normalizer,
            perception: Arc::new(perception),
            camera: camera.map(|c| Arc::new(Mutex::new(c))),
            table,
            actuator,
            dispatch_lock: tokio::sync::Mutex::new(()),
            config,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn normalizer(&self) -> &IntentNormalizer {
        &self.normalizer
    }

    pub fn perception(&self) -> &PerceptionValidator {
        &self.perception
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera.is_some()
    }

    /// Handle to the live command table.
    pub fn command_table(&self) -> SharedCommandTable {
        self.table.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Register or replace an action mapping on the live table.
    ///
    /// # Errors
    ///
    /// [`ScrubError::InvalidMapping`] for blank or whitespace-containing
    /// codes.
    pub fn add_action_mapping(
        &self,
        action: SurgicalAction,
        code_without_object: &str,
        code_with_object: Option<&str>,
    ) -> Result<(), ScrubError> {
        self.table
            .add_action_mapping(action, code_without_object, code_with_object)
            .map_err(ScrubError::from)
    }

    /// Check that the actuator controller answers.
    pub async fn probe(&self) -> ConnectivityResult {
        self.actuator.probe().await
    }

    // -------------------------------------------------------------------------
    // Cycle
    // -------------------------------------------------------------------------

    /// Run one instruction cycle.  Never fails; see [`CycleReport`].
    #[instrument(name = "cycle", skip_all, fields(cycle_id = tracing::field::Empty))]
    pub async fn process_instruction(&self, instruction: &str) -> CycleReport {
        let mut report = CycleReport {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            instruction: instruction.to_string(),
            intent: None,
            detection: None,
            command: None,
            dispatch: None,
            success: false,
            status: CycleStatus::Failed,
            errors: Vec::new(),
        };
        Span::current().record("cycle_id", tracing::field::display(report.cycle_id));
        info!(instruction, "cycle started");

        // ── 1. Operator ───────────────────────────────────────────────────────
        let operator = match self.normalizer.detect_operator(instruction) {
            Ok(op) => op.clone(),
            Err(e) => {
                warn!(error = %e, "no operator in instruction; nothing dispatched");
                report.errors.push(e);
                return report;
            }
        };

        // ── 2. Interpret ∥ Observe ────────────────────────────────────────────
        let (intent, detection) =
            tokio::join!(self.interpret(instruction, &operator), self.observe());

        let intent = match intent {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "intent stage failed; falling back to no action");
                report.errors.push(e);
                IntentRecord {
                    operator: Some(operator.name.clone()),
                    ..IntentRecord::default()
                }
            }
        };
        if let Some(failure) = &detection.failure {
            report.errors.push(failure.clone());
        }

        // ── 3. Resolve ────────────────────────────────────────────────────────
        let command = {
            let table = self.table.read();
            resolve(&intent, &detection, &table)
        };
        info!(%command, "command resolved");

        // ── 4. Dispatch ───────────────────────────────────────────────────────
        let outcome = {
            let _exclusive = self.dispatch_lock.lock().await;
            self.actuator.dispatch(&command).await
        };
        if let Some(e) = outcome.error() {
            report.errors.push(e);
        }

        report.success = outcome.success;
        report.status = if outcome.success && !report.errors.iter().any(ScrubError::is_failure) {
            CycleStatus::Completed
        } else {
            CycleStatus::Degraded
        };
        report.intent = Some(intent);
        report.detection = Some(detection);
        report.command = Some(command);
        report.dispatch = Some(outcome);

        info!(
            status = ?report.status,
            success = report.success,
            errors = report.errors.len(),
            "cycle finished"
        );
        report
    }

    async fn interpret(
        &self,
        instruction: &str,
        operator: &OperatorProfile,
    ) -> Result<IntentRecord, ScrubError> {
        let bound = self.config.stage_timeout;
        match tokio::time::timeout(bound, self.normalizer.interpret_for(instruction, operator))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ScrubError::ReasoningTimeout(bound.as_millis() as u64)),
        }
    }

    async fn observe(&self) -> DetectionResult {
        let Some(camera) = &self.camera else {
            return self.perception.simulated();
        };
        let mode = self.perception.configuration().mode;
        let camera = Arc::clone(camera);
        let validator = Arc::clone(&self.perception);

        let worker = tokio::task::spawn_blocking(move || {
            let mut camera = camera.lock().unwrap_or_else(|p| p.into_inner());
            validator.observe(&mut **camera)
        });

        let bound = self.config.stage_timeout;
        match tokio::time::timeout(bound, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "perception worker aborted");
                DetectionResult::failed(
                    mode,
                    ScrubError::FrameProcessingFailure(format!("perception worker aborted: {e}")),
                )
            }
            Err(_) => {
                warn!(timeout_ms = bound.as_millis() as u64, "perception timed out");
                DetectionResult::failed(mode, ScrubError::PerceptionTimeout(bound.as_millis() as u64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scrub_hal::{CameraFrame, StaticCamera};
    use scrub_kernel::OperatorProfiles;
    use scrub_perception::PerceptionConfig;
    use scrub_types::{DispatchErrorKind, DispatchOutcome};

    use crate::intent::ReasoningService;

    struct Fixed(&'static str);

    #[async_trait]
    impl ReasoningService for Fixed {
        async fn interpret(&self, _: &str, _: &OperatorProfiles) -> Result<String, ScrubError> {
            Ok(self.0.to_string())
        }
    }

    struct Slow;

    #[async_trait]
    impl ReasoningService for Slow {
        async fn interpret(&self, _: &str, _: &OperatorProfiles) -> Result<String, ScrubError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{}".into())
        }
    }

    struct SlowCamera;

    impl Camera for SlowCamera {
        fn id(&self) -> &str {
            "slow"
        }

        fn capture(&mut self) -> Result<CameraFrame, ScrubError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(CameraFrame::filled(4, 4, [0, 0, 0]))
        }
    }

    /// Records every command; always accepts.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl CommandLink for Recorder {
        async fn dispatch(&self, command: &str) -> DispatchOutcome {
            self.0.lock().unwrap().push(command.to_string());
            DispatchOutcome::delivered(command, 200, "OK".into())
        }

        async fn probe(&self) -> ConnectivityResult {
            ConnectivityResult {
                reachable: true,
                status_code: Some(200),
                error_kind: None,
                message: "ok".into(),
            }
        }
    }

    fn pipeline(
        reasoning: Arc<dyn ReasoningService>,
        camera: Option<Box<dyn Camera>>,
        link: Arc<Recorder>,
        stage_timeout: Duration,
    ) -> InstructionPipeline {
        InstructionPipeline::new(
            IntentNormalizer::new(OperatorProfiles::default(), reasoning),
            PerceptionValidator::new(PerceptionConfig::default()),
            camera,
            SharedCommandTable::default(),
            link,
            PipelineConfig { stage_timeout },
        )
    }

    const STITCH_LEFT: &str = r#"{"tool":"scissors","action":"stitch","handedness":"left"}"#;

    #[tokio::test]
    async fn green_object_on_target_selects_with_object_code() {
        let mut frame = CameraFrame::filled(40, 200, [0, 0, 0]);
        frame.fill_rect(10, 20, 10, 150, [20, 180, 40]);
        let link = Arc::new(Recorder::default());
        let p = pipeline(
            Arc::new(Fixed(STITCH_LEFT)),
            Some(Box::new(StaticCamera::new("table", frame))),
            link.clone(),
            DEFAULT_STAGE_TIMEOUT,
        );

        let report = p.process_instruction("kiran, stitch the wound").await;
        assert_eq!(report.command.as_deref(), Some("b1l"));
        assert_eq!(report.status, CycleStatus::Completed);
        assert!(report.success);
        assert!(report.errors.is_empty());
        assert_eq!(*link.0.lock().unwrap(), ["b1l"]);
    }

    #[tokio::test]
    async fn reasoning_timeout_degrades_to_sentinel() {
        let link = Arc::new(Recorder::default());
        let p = pipeline(Arc::new(Slow), None, link.clone(), Duration::from_millis(100));

        let report = p.process_instruction("sharath, incision").await;
        assert_eq!(report.command.as_deref(), Some("x"));
        assert_eq!(report.status, CycleStatus::Degraded);
        assert_eq!(report.errors, [ScrubError::ReasoningTimeout(100)]);
        assert_eq!(report.intent.unwrap().operator.as_deref(), Some("sharath"));
    }

    #[tokio::test]
    async fn perception_timeout_yields_no_object() {
        let link = Arc::new(Recorder::default());
        let p = pipeline(
            Arc::new(Fixed(STITCH_LEFT)),
            Some(Box::new(SlowCamera)),
            link,
            Duration::from_millis(100),
        );

        let report = p.process_instruction("kiran, stitch").await;
        assert_eq!(report.command.as_deref(), Some("b0l"));
        assert_eq!(report.status, CycleStatus::Degraded);
        let detection = report.detection.unwrap();
        assert!(!detection.object_detected);
        assert_eq!(detection.failure, Some(ScrubError::PerceptionTimeout(100)));
    }

    #[tokio::test]
    async fn add_action_mapping_reaches_resolution() {
        let link = Arc::new(Recorder::default());
        let p = pipeline(Arc::new(Fixed(STITCH_LEFT)), None, link, DEFAULT_STAGE_TIMEOUT);
        p.add_action_mapping(SurgicalAction::Stitch, "s9", None).unwrap();
        assert!(matches!(
            p.add_action_mapping(SurgicalAction::Stitch, "", None),
            Err(ScrubError::InvalidMapping(_))
        ));

        let report = p.process_instruction("kiran, stitch").await;
        assert_eq!(report.command.as_deref(), Some("s9l"));
    }

    #[tokio::test]
    async fn failed_dispatch_keeps_intent_and_command() {
        struct Down;

        #[async_trait]
        impl CommandLink for Down {
            async fn dispatch(&self, command: &str) -> DispatchOutcome {
                DispatchOutcome::failed(command, DispatchErrorKind::ConnectionError, None, "refused")
            }

            async fn probe(&self) -> ConnectivityResult {
                ConnectivityResult {
                    reachable: false,
                    status_code: None,
                    error_kind: Some(DispatchErrorKind::ConnectionError),
                    message: "refused".into(),
                }
            }
        }

        let p = InstructionPipeline::new(
            IntentNormalizer::new(OperatorProfiles::default(), Arc::new(Fixed(STITCH_LEFT))),
            PerceptionValidator::new(PerceptionConfig::default()),
            None,
            SharedCommandTable::default(),
            Arc::new(Down),
            PipelineConfig::default(),
        );
        let report = p.process_instruction("kiran, stitch").await;
        assert!(!report.success);
        assert_eq!(report.status, CycleStatus::Degraded);
        assert!(report.intent.is_some());
        assert_eq!(report.command.as_deref(), Some("b0l"));
        assert!(matches!(
            report.errors.last(),
            Some(ScrubError::ActuatorConnectionError(_))
        ));
        assert!(!p.probe().await.reachable);
    }
}
