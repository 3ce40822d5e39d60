//! Wires a [`Config`] into a running [`InstructionPipeline`].

use std::sync::Arc;

use scrub_hal::{Camera, DeviceStatus, HttpActuator, PpmFileCamera};
use scrub_kernel::SharedCommandTable;
use scrub_perception::PerceptionValidator;
use scrub_runtime::{InstructionPipeline, IntentNormalizer, LlmDriver};
use tracing::{info, warn};

use crate::config::Config;

/// Everything the shell talks to.  The driver and actuator are shared with
/// the pipeline so the shell can retune the prompt and read device status.
pub struct Session {
    pub config: Config,
    pub pipeline: InstructionPipeline,
    pub driver: Arc<LlmDriver>,
    actuator: Arc<HttpActuator>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let mut driver = LlmDriver::new(&config.llm_url, &config.llm_model)
            .with_profile(config.prompt_profile)
            .with_timeout(config.pipeline_config().stage_timeout);
        if !config.llm_api_key.is_empty() {
            driver = driver.with_api_key(config.llm_api_key.expose());
        } else if config.llm_provider.requires_api_key() {
            warn!(provider = %config.llm_provider, "no API key configured for hosted provider");
        }
        let driver = Arc::new(driver);

        let camera: Option<Box<dyn Camera>> = config.use_camera.then(|| {
            Box::new(PpmFileCamera::new("frame-file", &config.camera_frame_path))
                as Box<dyn Camera>
        });
        let actuator = Arc::new(HttpActuator::new(config.device_config()));

        let pipeline = InstructionPipeline::new(
            IntentNormalizer::new(config.operator_profiles(), driver.clone()),
            PerceptionValidator::new(config.perception_config()),
            camera,
            SharedCommandTable::default(),
            actuator.clone(),
            config.pipeline_config(),
        );
        info!(
            provider = %config.llm_provider,
            model = %config.llm_model,
            profile = %config.prompt_profile,
            "session ready"
        );

        Self {
            config,
            pipeline,
            driver,
            actuator,
        }
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.actuator.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use scrub_runtime::PromptProfile;

    #[test]
    fn session_reflects_config() {
        let config = Config {
            llm_url: "http://llm.local:11434/".into(),
            prompt_profile: PromptProfile::Detailed,
            device_address: "http://arm.local".into(),
            ..Config::default()
        };
        let session = Session::new(config);
        assert_eq!(session.driver.base_url(), "http://llm.local:11434");
        assert_eq!(session.driver.profile(), PromptProfile::Detailed);
        assert!(!session.pipeline.camera_enabled());
        let status = session.device_status();
        assert!(!status.enabled);
        assert_eq!(status.address, "http://arm.local");
    }

    #[test]
    fn camera_flag_attaches_frame_file() {
        let session = Session::new(Config {
            use_camera: true,
            ..Config::default()
        });
        assert!(session.pipeline.camera_enabled());
    }

    #[test]
    fn reasoning_timeout_follows_stage_timeout() {
        let session = Session::new(Config {
            stage_timeout_secs: 30,
            ..Config::default()
        });
        assert_eq!(session.driver.timeout(), Duration::from_secs(30));
        assert_eq!(session.pipeline.config().stage_timeout, Duration::from_secs(30));

        let default = Session::new(Config::default());
        assert_eq!(default.driver.timeout(), Duration::from_secs(5));
    }
}
