use crate::pipeline::PipelineSettings;
use facefeed_core::{AnnotateSettings, IdentitySpec, MultiFacePolicy, OverlayStyle};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid identity entry {0:?}: expected name=path")]
    IdentityEntry(String),
    #[error("skip_interval must be at least 1")]
    ZeroSkipInterval,
    #[error("target_fps must be positive with a representable frame interval, got {0}")]
    TargetFps(f32),
    #[error("downsample_scale must be in (0, 1], got {0}")]
    DownsampleScale(f32),
    #[error("jpeg_quality must be in 1..=100, got {0}")]
    JpegQuality(u8),
    #[error("frame size must be non-zero, got {0}x{1}")]
    FrameSize(u32, u32),
    #[error("box_padding and label_height must not be negative")]
    NegativeOverlay,
    #[error("identity name must not be empty")]
    EmptyIdentityName,
    #[error("identity {0:?} is configured more than once")]
    DuplicateIdentity(String),
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `FACEFEED_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Known identities, in match priority order.
    pub identities: Vec<IdentitySpec>,
    /// V4L2 device index, opened as `/dev/video{N}`.
    pub camera_device: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Capture pacing target in frames per second.
    pub target_fps: f32,
    /// Analyze one frame out of every `skip_interval`.
    pub skip_interval: u64,
    /// Linear scale of the detection copy.
    pub downsample_scale: f32,
    pub box_padding: i32,
    pub label_height: i32,
    pub jpeg_quality: u8,
    /// Pending raw frames before the oldest is dropped. 0 = unbounded.
    pub raw_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub listen: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    pub multi_face_policy: MultiFacePolicy,
}

impl Default for Config {
    fn default() -> Self {
        let style = OverlayStyle::default();
        Self {
            identities: Vec::new(),
            camera_device: 0,
            frame_width: 640,
            frame_height: 480,
            target_fps: 15.0,
            skip_interval: 2,
            downsample_scale: 0.25,
            box_padding: style.box_padding,
            label_height: style.label_height,
            jpeg_quality: 95,
            raw_queue_capacity: 1,
            output_queue_capacity: 2,
            listen: SocketAddr::from(([127, 0, 0, 1], 5000)),
            model_dir: default_model_dir(),
            similarity_threshold: 0.40,
            multi_face_policy: MultiFacePolicy::First,
        }
    }
}

fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facefeed/models")
}

/// Config file named by `FACEFEED_CONFIG`, if set.
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os("FACEFEED_CONFIG").map(PathBuf::from)
}

impl Config {
    /// Load configuration from `path` (if any) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `FACEFEED_*` variables resolved through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let env = Env(&lookup);

        if let Some(raw) = lookup("FACEFEED_IDENTITIES") {
            self.identities = parse_identities(&raw)?;
        }
        if let Some(dir) = lookup("FACEFEED_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup("FACEFEED_MULTI_FACE_POLICY") {
            match policy.to_ascii_lowercase().as_str() {
                "first" => self.multi_face_policy = MultiFacePolicy::First,
                "reject" => self.multi_face_policy = MultiFacePolicy::Reject,
                other => {
                    tracing::warn!(value = other, "ignoring unknown FACEFEED_MULTI_FACE_POLICY")
                }
            }
        }

        env.parse("FACEFEED_CAMERA_DEVICE", &mut self.camera_device);
        env.parse("FACEFEED_FRAME_WIDTH", &mut self.frame_width);
        env.parse("FACEFEED_FRAME_HEIGHT", &mut self.frame_height);
        env.parse("FACEFEED_TARGET_FPS", &mut self.target_fps);
        env.parse("FACEFEED_SKIP_INTERVAL", &mut self.skip_interval);
        env.parse("FACEFEED_DOWNSAMPLE_SCALE", &mut self.downsample_scale);
        env.parse("FACEFEED_BOX_PADDING", &mut self.box_padding);
        env.parse("FACEFEED_LABEL_HEIGHT", &mut self.label_height);
        env.parse("FACEFEED_JPEG_QUALITY", &mut self.jpeg_quality);
        env.parse("FACEFEED_RAW_QUEUE_CAPACITY", &mut self.raw_queue_capacity);
        env.parse("FACEFEED_OUTPUT_QUEUE_CAPACITY", &mut self.output_queue_capacity);
        env.parse("FACEFEED_LISTEN", &mut self.listen);
        env.parse("FACEFEED_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.skip_interval == 0 {
            return Err(ConfigError::ZeroSkipInterval);
        }
        let interval = std::time::Duration::try_from_secs_f32(1.0 / self.target_fps);
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) || interval.is_err() {
            return Err(ConfigError::TargetFps(self.target_fps));
        }
        if !(self.downsample_scale > 0.0 && self.downsample_scale <= 1.0) {
            return Err(ConfigError::DownsampleScale(self.downsample_scale));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::JpegQuality(self.jpeg_quality));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::FrameSize(self.frame_width, self.frame_height));
        }
        if self.box_padding < 0 || self.label_height < 0 {
            return Err(ConfigError::NegativeOverlay);
        }

        let mut seen = HashSet::new();
        for identity in &self.identities {
            if identity.name.trim().is_empty() {
                return Err(ConfigError::EmptyIdentityName);
            }
            if !seen.insert(identity.name.as_str()) {
                return Err(ConfigError::DuplicateIdentity(identity.name.clone()));
            }
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn annotate_settings(&self) -> AnnotateSettings {
        AnnotateSettings {
            downsample_scale: self.downsample_scale,
            style: OverlayStyle {
                box_padding: self.box_padding,
                label_height: self.label_height,
            },
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            target_fps: self.target_fps,
            skip_interval: self.skip_interval,
            raw_queue_capacity: self.raw_queue_capacity,
            output_queue_capacity: self.output_queue_capacity,
            jpeg_quality: self.jpeg_quality,
            annotate: self.annotate_settings(),
        }
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Replace `slot` when `key` is set and parses; otherwise keep it.
    fn parse<T: std::str::FromStr>(&self, key: &str, slot: &mut T) {
        let Some(raw) = (self.0)(key) else {
            return;
        };
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
        }
    }
}

/// Parse `name=path;name=path`. Empty segments are skipped.
fn parse_identities(raw: &str) -> Result<Vec<IdentitySpec>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
                Ok(IdentitySpec {
                    name: name.trim().to_string(),
                    image: PathBuf::from(path.trim()),
                })
            }
            _ => Err(ConfigError::IdentityEntry(entry.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn identity(name: &str, image: &str) -> IdentitySpec {
        IdentitySpec {
            name: name.into(),
            image: PathBuf::from(image),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_device, 0);
        assert_eq!(config.target_fps, 15.0);
        assert_eq!(config.skip_interval, 2);
        assert_eq!(config.downsample_scale, 0.25);
        assert_eq!(config.box_padding, 40);
        assert_eq!(config.listen.to_string(), "127.0.0.1:5000");
        assert_eq!(config.multi_face_policy, MultiFacePolicy::First);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_toml_keeps_identity_order() {
        let config = Config::from_toml(
            r#"
            skip_interval = 3
            listen = "0.0.0.0:8080"
            multi_face_policy = "reject"

            [[identities]]
            name = "Barack Obama"
            image = "refs/obama.jpg"

            [[identities]]
            name = "Joe Biden"
            image = "refs/biden.jpg"
            "#,
        )
        .unwrap();

        assert_eq!(config.skip_interval, 3);
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.multi_face_policy, MultiFacePolicy::Reject);
        assert_eq!(
            config.identities,
            vec![
                identity("Barack Obama", "refs/obama.jpg"),
                identity("Joe Biden", "refs/biden.jpg"),
            ]
        );
        // Untouched fields keep their defaults.
        assert_eq!(config.target_fps, 15.0);
    }

    #[test]
    fn test_from_toml_rejects_unknown_field() {
        assert!(Config::from_toml("skip_intervall = 3").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "camera_device = 2\njpeg_quality = 80").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.camera_device, 2);
        assert_eq!(config.jpeg_quality, 80);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/facefeed.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("FACEFEED_TARGET_FPS", "30"),
                ("FACEFEED_SKIP_INTERVAL", "4"),
                ("FACEFEED_LISTEN", "127.0.0.1:9000"),
                ("FACEFEED_MULTI_FACE_POLICY", "Reject"),
                ("FACEFEED_IDENTITIES", "alice=/a.png; bob=/b.png;"),
            ]))
            .unwrap();
        assert_eq!(config.target_fps, 30.0);
        assert_eq!(config.skip_interval, 4);
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.multi_face_policy, MultiFacePolicy::Reject);
        assert_eq!(
            config.identities,
            vec![identity("alice", "/a.png"), identity("bob", "/b.png")]
        );
    }

    #[test]
    fn test_env_unparsable_value_keeps_default() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("FACEFEED_TARGET_FPS", "fast")]))
            .unwrap();
        assert_eq!(config.target_fps, 15.0);
    }

    #[test]
    fn test_env_malformed_identity() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("FACEFEED_IDENTITIES", "alice")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::IdentityEntry(entry) if entry == "alice"));
    }

    fn rejected(mutate: impl FnOnce(&mut Config)) -> ConfigError {
        let mut config = Config::default();
        mutate(&mut config);
        config.validate().unwrap_err()
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(rejected(|c| c.skip_interval = 0), ConfigError::ZeroSkipInterval));
        assert!(matches!(rejected(|c| c.target_fps = 0.0), ConfigError::TargetFps(_)));
        assert!(matches!(rejected(|c| c.target_fps = 1e-30), ConfigError::TargetFps(_)));
        assert!(matches!(rejected(|c| c.downsample_scale = 1.5), ConfigError::DownsampleScale(_)));
        assert!(matches!(rejected(|c| c.downsample_scale = 0.0), ConfigError::DownsampleScale(_)));
        assert!(matches!(rejected(|c| c.jpeg_quality = 0), ConfigError::JpegQuality(0)));
        assert!(matches!(rejected(|c| c.frame_width = 0), ConfigError::FrameSize(0, _)));
        assert!(matches!(rejected(|c| c.box_padding = -1), ConfigError::NegativeOverlay));
    }

    #[test]
    fn test_validate_rejects_duplicate_identity() {
        let err = rejected(|c| {
            c.identities = vec![identity("alice", "a.png"), identity("alice", "b.png")];
        });
        assert!(matches!(err, ConfigError::DuplicateIdentity(name) if name == "alice"));
    }

    #[test]
    fn test_model_paths() {
        let mut config = Config::default();
        config.model_dir = PathBuf::from("/opt/models");
        assert_eq!(config.scrfd_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(config.arcface_model_path(), "/opt/models/w600k_r50.onnx");
    }

    #[test]
    fn test_pipeline_settings() {
        let mut config = Config::default();
        config.box_padding = 12;
        let settings = config.pipeline_settings();
        assert_eq!(settings.skip_interval, 2);
        assert_eq!(settings.annotate.style.box_padding, 12);
        assert_eq!(settings.annotate.downsample_scale, 0.25);
    }
}
