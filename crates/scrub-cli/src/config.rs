//! Configuration Vault – reads/writes `~/.scrubnurse/config.toml`.
//!
//! Every field has a default, so a partial (or absent) file is valid.
//! `SCRUB_*` environment variables are applied on top of whatever was read.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scrub_hal::DeviceConfig;
use scrub_kernel::{OperatorProfile, OperatorProfiles};
use scrub_perception::{DistanceModel, Hsv, HsvRange, PerceptionConfig};
use scrub_runtime::{LlmProvider, PipelineConfig, PromptProfile};
use scrub_types::{DetectionMode, ScrubError};
use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ─────────────────────────────────────────────────────────────────────────────
// Secrets
// ─────────────────────────────────────────────────────────────────────────────

/// Reasoning-service API key.  Never printed; wiped from memory on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_empty() { "<not set>" } else { "<redacted>" })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted configuration stored in `~/.scrubnurse/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm_provider: LlmProvider,
    /// Base URL of the chat-completions server.
    pub llm_url: String,
    pub llm_model: String,
    #[serde(skip_serializing_if = "ApiKey::is_empty")]
    pub llm_api_key: ApiKey,
    pub prompt_profile: PromptProfile,

    pub use_camera: bool,
    /// PPM frame kept fresh by an external grabber.
    pub camera_frame_path: PathBuf,
    pub detection_mode: DetectionMode,
    /// `"h,s,v"`; invalid bounds fall back to the default green range.
    pub color_lower_hsv: String,
    pub color_upper_hsv: String,
    pub detection_height: f64,
    pub height_tolerance: f64,
    pub detection_distance: f64,
    pub distance_tolerance: f64,
    /// `0` disables centimetre measurements.
    pub pixels_per_cm: f64,
    pub color_only_min_area: f64,

    pub device_enabled: bool,
    pub device_address: String,

    pub stage_timeout_secs: u64,

    pub operators: Vec<OperatorProfile>,
}

impl Default for Config {
    fn default() -> Self {
        let perception = PerceptionConfig::default();
        let range = perception.color_range;
        Self {
            llm_provider: LlmProvider::Ollama,
            llm_url: LlmProvider::Ollama.default_base_url().to_string(),
            llm_model: "llama3".to_string(),
            llm_api_key: ApiKey::default(),
            prompt_profile: PromptProfile::Default,
            use_camera: false,
            camera_frame_path: std::env::temp_dir().join("scrubnurse-frame.ppm"),
            detection_mode: perception.mode,
            color_lower_hsv: range.lower.to_string(),
            color_upper_hsv: range.upper.to_string(),
            detection_height: perception.target_height_cm,
            height_tolerance: perception.height_tolerance_cm,
            detection_distance: perception.target_distance_cm,
            distance_tolerance: perception.distance_tolerance_cm,
            pixels_per_cm: perception.pixels_per_cm.unwrap_or(0.0),
            color_only_min_area: perception.color_only_min_area,
            device_enabled: false,
            device_address: DeviceConfig::default().address,
            stage_timeout_secs: 5,
            operators: OperatorProfiles::default().iter().cloned().collect(),
        }
    }
}

impl Config {
    /// Colour range from the two HSV strings.  Either bound failing to
    /// parse yields the default green range.
    pub fn color_range(&self) -> HsvRange {
        match (Hsv::parse(&self.color_lower_hsv), Hsv::parse(&self.color_upper_hsv)) {
            (Some(lower), Some(upper)) => HsvRange { lower, upper },
            _ => {
                warn!(
                    lower = %self.color_lower_hsv,
                    upper = %self.color_upper_hsv,
                    "invalid HSV colour bounds; using the default green range"
                );
                HsvRange::default()
            }
        }
    }

    pub fn perception_config(&self) -> PerceptionConfig {
        PerceptionConfig {
            mode: self.detection_mode,
            color_range: self.color_range(),
            target_height_cm: self.detection_height,
            height_tolerance_cm: self.height_tolerance,
            target_distance_cm: self.detection_distance,
            distance_tolerance_cm: self.distance_tolerance,
            pixels_per_cm: (self.pixels_per_cm > 0.0).then_some(self.pixels_per_cm),
            color_only_min_area: self.color_only_min_area,
            distance_model: DistanceModel::inverse_height(),
            ..PerceptionConfig::default()
        }
    }

    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            enabled: self.device_enabled,
            address: self.device_address.clone(),
            ..DeviceConfig::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            stage_timeout: Duration::from_secs(self.stage_timeout_secs.max(1)),
        }
    }

    /// Operator table; an empty list in the file means the default team.
    pub fn operator_profiles(&self) -> OperatorProfiles {
        let table =
            OperatorProfiles::new(self.operators.iter().map(|op| (&op.name, op.handedness)));
        if table.is_empty() {
            OperatorProfiles::default()
        } else {
            table
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths & persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.scrubnurse/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".scrubnurse").join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ScrubError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Read a config file as written, without environment overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ScrubError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        ScrubError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| ScrubError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Save the config to disk, creating `~/.scrubnurse/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ScrubError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ScrubError> {
    let io_err = |what: &str, e: std::io::Error| ScrubError::Config(format!("{what}: {e}"));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create config directory", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to set config directory permissions", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ScrubError::Config(format!("failed to serialize config: {e}")))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("failed to write {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err(&format!("failed to write {}", path.display()), e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment overrides
// ─────────────────────────────────────────────────────────────────────────────

/// Apply `SCRUB_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SCRUB_LLM_PROVIDER` | `llm_provider` |
/// | `SCRUB_LLM_URL` | `llm_url` |
/// | `SCRUB_LLM_MODEL` | `llm_model` |
/// | `SCRUB_LLM_API_KEY` | `llm_api_key` |
/// | `SCRUB_PROMPT_PROFILE` | `prompt_profile` |
/// | `SCRUB_USE_CAMERA` | `use_camera` |
/// | `SCRUB_CAMERA_FRAME_PATH` | `camera_frame_path` |
/// | `SCRUB_DETECTION_MODE` | `detection_mode` |
/// | `SCRUB_COLOR_LOWER_HSV` / `SCRUB_COLOR_UPPER_HSV` | colour bounds |
/// | `SCRUB_DETECTION_HEIGHT` / `SCRUB_HEIGHT_TOLERANCE` | height window |
/// | `SCRUB_DETECTION_DISTANCE` / `SCRUB_DISTANCE_TOLERANCE` | distance window |
/// | `SCRUB_PIXELS_PER_CM` | `pixels_per_cm` (`0` or `none` disables) |
/// | `SCRUB_COLOR_ONLY_MIN_AREA` | `color_only_min_area` |
/// | `SCRUB_USE_DEVICE` | `device_enabled` |
/// | `SCRUB_DEVICE_ADDRESS` | `device_address` |
/// | `SCRUB_STAGE_TIMEOUT_SECS` | `stage_timeout_secs` |
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = var("SCRUB_LLM_PROVIDER") {
        match LlmProvider::parse(&v) {
            Some(provider) => {
                // Follow the provider's endpoint unless one is set explicitly.
                if cfg.llm_url == cfg.llm_provider.default_base_url() {
                    cfg.llm_url = provider.default_base_url().to_string();
                }
                cfg.llm_provider = provider;
            }
            None => ignored("SCRUB_LLM_PROVIDER", &v),
        }
    }
    if let Some(v) = var("SCRUB_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Some(v) = var("SCRUB_LLM_MODEL") {
        cfg.llm_model = v;
    }
    if let Some(v) = var("SCRUB_LLM_API_KEY") {
        cfg.llm_api_key = ApiKey::new(v);
    }
    if let Some(v) = var("SCRUB_PROMPT_PROFILE") {
        match PromptProfile::parse(&v) {
            Some(p) => cfg.prompt_profile = p,
            None => ignored("SCRUB_PROMPT_PROFILE", &v),
        }
    }

    override_bool("SCRUB_USE_CAMERA", &mut cfg.use_camera);
    if let Some(v) = var("SCRUB_CAMERA_FRAME_PATH") {
        cfg.camera_frame_path = PathBuf::from(v);
    }
    if let Some(v) = var("SCRUB_DETECTION_MODE") {
        match DetectionMode::parse(&v) {
            Some(mode) => cfg.detection_mode = mode,
            None => ignored("SCRUB_DETECTION_MODE", &v),
        }
    }
    if let Some(v) = var("SCRUB_COLOR_LOWER_HSV") {
        cfg.color_lower_hsv = v;
    }
    if let Some(v) = var("SCRUB_COLOR_UPPER_HSV") {
        cfg.color_upper_hsv = v;
    }
    override_f64("SCRUB_DETECTION_HEIGHT", &mut cfg.detection_height);
    override_f64("SCRUB_HEIGHT_TOLERANCE", &mut cfg.height_tolerance);
    override_f64("SCRUB_DETECTION_DISTANCE", &mut cfg.detection_distance);
    override_f64("SCRUB_DISTANCE_TOLERANCE", &mut cfg.distance_tolerance);
    if let Some(v) = var("SCRUB_PIXELS_PER_CM") {
        match v.trim().to_ascii_lowercase().as_str() {
            "none" => cfg.pixels_per_cm = 0.0,
            other => match other.parse::<f64>() {
                Ok(p) if p.is_finite() => cfg.pixels_per_cm = p.max(0.0),
                _ => ignored("SCRUB_PIXELS_PER_CM", &v),
            },
        }
    }
    override_f64("SCRUB_COLOR_ONLY_MIN_AREA", &mut cfg.color_only_min_area);

    override_bool("SCRUB_USE_DEVICE", &mut cfg.device_enabled);
    if let Some(v) = var("SCRUB_DEVICE_ADDRESS") {
        cfg.device_address = v;
    }

    if let Some(v) = var("SCRUB_STAGE_TIMEOUT_SECS") {
        match v.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => cfg.stage_timeout_secs = secs,
            _ => ignored("SCRUB_STAGE_TIMEOUT_SECS", &v),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn ignored(name: &str, value: &str) {
    warn!(variable = name, value, "ignoring unparseable environment override");
}

/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, any case.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn override_bool(name: &str, field: &mut bool) {
    if let Some(v) = var(name) {
        match parse_bool(&v) {
            Some(b) => *field = b,
            None => ignored(name, &v),
        }
    }
}

fn override_f64(name: &str, field: &mut f64) {
    if let Some(v) = var(name) {
        match v.trim().parse::<f64>() {
            Ok(x) if x.is_finite() => *field = x,
            _ => ignored(name, &v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    use scrub_types::Handedness;

    fn operator_names(cfg: &Config) -> Vec<(String, Handedness)> {
        cfg.operators
            .iter()
            .map(|op| (op.name.clone(), op.handedness))
            .collect()
    }

    #[test]
    fn config_debug_redacts_api_key() {
        let cfg = Config {
            llm_api_key: ApiKey::new("sk-super-secret"),
            ..Config::default()
        };
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("sk-super-secret"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_key() {
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[test]
    fn defaults_match_the_bench_setup() {
        let cfg = Config::default();
        assert!(!cfg.use_camera && !cfg.device_enabled);
        assert_eq!(cfg.device_address, "http://192.168.0.131");
        assert_eq!(cfg.llm_url, "http://localhost:11434");
        assert_eq!(cfg.llm_model, "llama3");
        assert_eq!(cfg.color_lower_hsv, "35,40,40");
        assert_eq!(cfg.color_upper_hsv, "90,255,255");
        assert_eq!(cfg.pixels_per_cm, 10.0);
        assert_eq!(
            operator_names(&cfg),
            [
                ("sharath".to_string(), Handedness::Right),
                ("sarath".to_string(), Handedness::Right),
                ("sarad".to_string(), Handedness::Right),
                ("sharad".to_string(), Handedness::Right),
                ("kiran".to_string(), Handedness::Left),
            ]
        );
        assert_eq!(cfg.perception_config(), PerceptionConfig::default());
    }

    #[test]
    fn invalid_hsv_falls_back_to_default_green() {
        let cfg = Config {
            color_lower_hsv: "200,0,0".into(),
            ..Config::default()
        };
        assert_eq!(cfg.color_range(), HsvRange::default());

        let red = Config {
            color_lower_hsv: "170,100,100".into(),
            color_upper_hsv: "10,255,255".into(),
            ..Config::default()
        };
        assert_eq!(red.color_range().lower, Hsv { h: 170, s: 100, v: 100 });
    }

    #[test]
    fn empty_operator_list_means_default_team() {
        let cfg = Config {
            operators: Vec::new(),
            ..Config::default()
        };
        assert_eq!(cfg.operator_profiles(), OperatorProfiles::default());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_keeps_key_and_operators() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = Config {
            llm_provider: LlmProvider::OpenRouter,
            llm_api_key: ApiKey::new("or-key"),
            prompt_profile: PromptProfile::Conservative,
            detection_mode: DetectionMode::ColorOnly,
            pixels_per_cm: 0.0,
            operators: vec![OperatorProfile {
                name: "meera".into(),
                handedness: Handedness::Left,
            }],
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.llm_provider, LlmProvider::OpenRouter);
        assert_eq!(loaded.llm_api_key.expose(), "or-key");
        assert_eq!(loaded.prompt_profile, PromptProfile::Conservative);
        assert_eq!(loaded.detection_mode, DetectionMode::ColorOnly);
        assert_eq!(loaded.perception_config().pixels_per_cm, None);
        assert_eq!(
            loaded.operator_profiles().handedness_of("meera"),
            Some(Handedness::Left)
        );
    }

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "llm_model = \"mistral\"\nuse_camera = true\n").unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.llm_model, "mistral");
        assert!(loaded.use_camera);
        assert_eq!(loaded.stage_timeout_secs, 5);
    }

    #[test]
    fn garbage_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "use_camera = [").unwrap();
        assert!(matches!(load_from(&path), Err(ScrubError::Config(_))));
    }

    #[test]
    fn config_path_points_to_scrubnurse_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.ends_with(".scrubnurse/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn parse_bool_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    /// `apply_env_overrides` reads every `SCRUB_*` variable, so tests that
    /// set any of them hold this lock for their whole body.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner())
    }

    #[test]
    fn apply_env_overrides_device_settings() {
        let _env = env_lock();
        // SAFETY: ENV_LOCK serializes every test that touches SCRUB_* vars.
        unsafe {
            std::env::set_var("SCRUB_USE_DEVICE", "true");
            std::env::set_var("SCRUB_DEVICE_ADDRESS", "http://10.0.0.7");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.device_enabled);
        assert_eq!(cfg.device_config().address, "http://10.0.0.7");
        unsafe {
            std::env::remove_var("SCRUB_USE_DEVICE");
            std::env::remove_var("SCRUB_DEVICE_ADDRESS");
        }
    }

    #[test]
    fn apply_env_overrides_provider_follows_default_url() {
        let _env = env_lock();
        // SAFETY: ENV_LOCK serializes every test that touches SCRUB_* vars.
        unsafe {
            std::env::set_var("SCRUB_LLM_PROVIDER", "openai");
            std::env::set_var("SCRUB_LLM_API_KEY", "sk-env");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAi);
        assert_eq!(cfg.llm_url, "https://api.openai.com");
        assert_eq!(cfg.llm_api_key.expose(), "sk-env");
        unsafe {
            std::env::remove_var("SCRUB_LLM_PROVIDER");
            std::env::remove_var("SCRUB_LLM_API_KEY");
        }
    }

    #[test]
    fn apply_env_overrides_perception_windows() {
        let _env = env_lock();
        // SAFETY: ENV_LOCK serializes every test that touches SCRUB_* vars.
        unsafe {
            std::env::set_var("SCRUB_DETECTION_HEIGHT", "20");
            std::env::set_var("SCRUB_PIXELS_PER_CM", "none");
            std::env::set_var("SCRUB_DETECTION_MODE", "color_only");
            std::env::set_var("SCRUB_HEIGHT_TOLERANCE", "wide");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.detection_height, 20.0);
        assert_eq!(cfg.height_tolerance, 5.0);
        assert_eq!(cfg.perception_config().pixels_per_cm, None);
        assert_eq!(cfg.detection_mode, DetectionMode::ColorOnly);
        unsafe {
            std::env::remove_var("SCRUB_DETECTION_HEIGHT");
            std::env::remove_var("SCRUB_PIXELS_PER_CM");
            std::env::remove_var("SCRUB_DETECTION_MODE");
            std::env::remove_var("SCRUB_HEIGHT_TOLERANCE");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_bad_timeout() {
        let _env = env_lock();
        // SAFETY: ENV_LOCK serializes every test that touches SCRUB_* vars.
        unsafe { std::env::set_var("SCRUB_STAGE_TIMEOUT_SECS", "0") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.pipeline_config().stage_timeout, Duration::from_secs(5));
        unsafe { std::env::remove_var("SCRUB_STAGE_TIMEOUT_SECS") };
    }
}
