use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{BackgroundModelParams, CascadeParams, DetectorSettings, MotionParams};
use crate::ingest::CameraConfig;
use crate::pipeline::LoopSettings;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::sink::parse_sink_url;

const DEFAULT_GET_TIMEOUT_MS: u64 = 100;
const DEFAULT_CASCADE_PATHS: &[&str] = &[
    "haarcascade_car.xml",
    "/usr/share/opencv/haarcascades/haarcascade_car.xml",
];
const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_WAITING_AFTER_EMPTY_POLLS: u32 = 10;
const DEFAULT_KEY_POLL_MS: u64 = 1;
const DEFAULT_SINK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SINK_TIMEOUT_MS: u64 = 500;
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CarwatchConfigFile {
    camera: Option<CameraConfigFile>,
    queue: Option<QueueConfigFile>,
    detector: Option<DetectorConfigFile>,
    display: Option<DisplayConfigFile>,
    sink: Option<SinkConfigFile>,
    shutdown: Option<ShutdownConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    buffer_frames: Option<u32>,
    warmup_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QueueConfigFile {
    capacity: Option<usize>,
    get_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    cascade_paths: Option<Vec<PathBuf>>,
    min_area: Option<f64>,
    max_area: Option<f64>,
    min_aspect_ratio: Option<f64>,
    max_aspect_ratio: Option<f64>,
    min_fill_ratio: Option<f64>,
    history: Option<usize>,
    var_threshold: Option<f32>,
    detect_shadows: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    headless: Option<bool>,
    output_dir: Option<PathBuf>,
    waiting_after_empty_polls: Option<u32>,
    key_poll_ms: Option<u64>,
    preview_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SinkConfigFile {
    url: Option<String>,
    interval_ms: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ShutdownConfigFile {
    join_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CarwatchConfig {
    pub camera: CameraConfig,
    pub queue: QueueSettings,
    pub detector: DetectorSettings,
    pub display: DisplaySettings,
    pub sink: SinkSettings,
    pub shutdown: ShutdownSettings,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub get_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub headless: bool,
    pub output_dir: PathBuf,
    pub waiting_after_empty_polls: u32,
    pub key_poll: Duration,
    /// JPEG replaced with every presented frame; `None` disables it.
    pub preview_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Dashboard endpoint; `None` disables publication.
    pub url: Option<String>,
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ShutdownSettings {
    pub join_timeout: Duration,
}

impl Default for CarwatchConfig {
    fn default() -> Self {
        // An empty file yields every default; it cannot fail.
        Self::from_file(CarwatchConfigFile::default())
    }
}

impl CarwatchConfig {
    /// Load from the file named by `CARWATCH_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CARWATCH_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => CarwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CarwatchConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let camera_defaults = CameraConfig::default();
        let camera = CameraConfig {
            device: camera_file.device.unwrap_or(camera_defaults.device),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
            target_fps: camera_file.target_fps.unwrap_or(camera_defaults.target_fps),
            buffer_frames: camera_file
                .buffer_frames
                .unwrap_or(camera_defaults.buffer_frames),
            warmup_frames: camera_file
                .warmup_frames
                .unwrap_or(camera_defaults.warmup_frames),
        };

        let queue_file = file.queue.unwrap_or_default();
        let queue = QueueSettings {
            capacity: queue_file.capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            get_timeout: Duration::from_millis(
                queue_file.get_timeout_ms.unwrap_or(DEFAULT_GET_TIMEOUT_MS),
            ),
        };

        let detector_file = file.detector.unwrap_or_default();
        let motion_defaults = MotionParams::default();
        let background_defaults = BackgroundModelParams::default();
        let detector = DetectorSettings {
            cascade_paths: detector_file.cascade_paths.unwrap_or_else(|| {
                DEFAULT_CASCADE_PATHS.iter().map(PathBuf::from).collect()
            }),
            cascade: CascadeParams::default(),
            motion: MotionParams {
                min_area: detector_file.min_area.unwrap_or(motion_defaults.min_area),
                max_area: detector_file.max_area.unwrap_or(motion_defaults.max_area),
                min_aspect_ratio: detector_file
                    .min_aspect_ratio
                    .unwrap_or(motion_defaults.min_aspect_ratio),
                max_aspect_ratio: detector_file
                    .max_aspect_ratio
                    .unwrap_or(motion_defaults.max_aspect_ratio),
                min_fill_ratio: detector_file
                    .min_fill_ratio
                    .unwrap_or(motion_defaults.min_fill_ratio),
                background: BackgroundModelParams {
                    history: detector_file.history.unwrap_or(background_defaults.history),
                    var_threshold: detector_file
                        .var_threshold
                        .unwrap_or(background_defaults.var_threshold),
                    detect_shadows: detector_file
                        .detect_shadows
                        .unwrap_or(background_defaults.detect_shadows),
                },
            },
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            headless: display_file.headless.unwrap_or(false),
            output_dir: display_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            waiting_after_empty_polls: display_file
                .waiting_after_empty_polls
                .unwrap_or(DEFAULT_WAITING_AFTER_EMPTY_POLLS),
            key_poll: Duration::from_millis(display_file.key_poll_ms.unwrap_or(DEFAULT_KEY_POLL_MS)),
            preview_path: display_file.preview_path,
        };

        let sink_file = file.sink.unwrap_or_default();
        let sink = SinkSettings {
            url: sink_file.url.filter(|url| !url.trim().is_empty()),
            interval: Duration::from_millis(sink_file.interval_ms.unwrap_or(DEFAULT_SINK_INTERVAL_MS)),
            timeout: Duration::from_millis(sink_file.timeout_ms.unwrap_or(DEFAULT_SINK_TIMEOUT_MS)),
        };

        let shutdown = ShutdownSettings {
            join_timeout: Duration::from_millis(
                file.shutdown
                    .and_then(|shutdown| shutdown.join_timeout_ms)
                    .unwrap_or(DEFAULT_JOIN_TIMEOUT_MS),
            ),
        };

        Self {
            camera,
            queue,
            detector,
            display,
            sink,
            shutdown,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("CARWATCH_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Some(fps) = env_parse::<u32>("CARWATCH_TARGET_FPS")? {
            self.camera.target_fps = fps;
        }
        if let Some(capacity) = env_parse::<usize>("CARWATCH_QUEUE_CAPACITY")? {
            self.queue.capacity = capacity;
        }
        if let Ok(paths) = std::env::var("CARWATCH_CASCADE_PATHS") {
            let parsed = split_csv(&paths);
            if !parsed.is_empty() {
                self.detector.cascade_paths = parsed.into_iter().map(PathBuf::from).collect();
            }
        }
        if let Ok(url) = std::env::var("CARWATCH_SINK_URL") {
            if !url.trim().is_empty() {
                self.sink.url = Some(url);
            }
        }
        if let Ok(dir) = std::env::var("CARWATCH_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.display.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("CARWATCH_PREVIEW_PATH") {
            if !path.trim().is_empty() {
                self.display.preview_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var("CARWATCH_HEADLESS") {
            self.display.headless = parse_bool(&value)
                .ok_or_else(|| anyhow!("CARWATCH_HEADLESS must be true/false, got {value:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if camera.width == 0 || camera.height == 0 {
            return Err(anyhow!(
                "camera dimensions must be non-zero ({}x{})",
                camera.width,
                camera.height
            ));
        }
        if camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.queue.capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if self.queue.get_timeout.is_zero() {
            return Err(anyhow!("queue get timeout must be greater than zero"));
        }

        let motion = &self.detector.motion;
        if !(motion.min_area >= 0.0 && motion.min_area < motion.max_area) {
            return Err(anyhow!(
                "detector area range is empty ({}..{})",
                motion.min_area,
                motion.max_area
            ));
        }
        if !(motion.min_aspect_ratio > 0.0 && motion.min_aspect_ratio <= motion.max_aspect_ratio) {
            return Err(anyhow!(
                "detector aspect ratio range is invalid ({}..{})",
                motion.min_aspect_ratio,
                motion.max_aspect_ratio
            ));
        }
        if !(motion.min_fill_ratio > 0.0 && motion.min_fill_ratio <= 1.0) {
            return Err(anyhow!(
                "detector fill ratio must be in (0, 1], got {}",
                motion.min_fill_ratio
            ));
        }
        if motion.background.history == 0 {
            return Err(anyhow!("detector history must be at least one frame"));
        }
        if !(motion.background.var_threshold > 0.0) {
            return Err(anyhow!("detector var_threshold must be positive"));
        }

        if let Some(path) = &self.display.preview_path {
            if path.file_name().is_none() {
                return Err(anyhow!("preview path {} must name a file", path.display()));
            }
        }

        if let Some(url) = &self.sink.url {
            parse_sink_url(url).context("invalid sink configuration")?;
        }
        if self.sink.timeout.is_zero() {
            return Err(anyhow!("sink timeout must be greater than zero"));
        }
        if self.shutdown.join_timeout.is_zero() {
            return Err(anyhow!("shutdown join timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Consumer-loop settings derived from this configuration.
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            get_timeout: self.queue.get_timeout,
            waiting_after_empty_polls: self.display.waiting_after_empty_polls,
            key_poll: self.display.key_poll,
            output_dir: self.display.output_dir.clone(),
            sink_interval: self.sink.interval,
            join_timeout: self.shutdown.join_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<CarwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{name} is invalid ({value:?}): {e}")),
        _ => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
