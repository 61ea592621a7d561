use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SketchKind {
    ShaderField,
    StarTrail,
    FloatingShapes,
    Noise,
}

impl SketchKind {
    pub const ALL: [SketchKind; 4] = [
        SketchKind::ShaderField,
        SketchKind::StarTrail,
        SketchKind::FloatingShapes,
        SketchKind::Noise,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SketchKind::ShaderField => "shader-field",
            SketchKind::StarTrail => "star-trail",
            SketchKind::FloatingShapes => "floating-shapes",
            SketchKind::Noise => "noise",
        }
    }

    /// Whether instances of this kind hold a GPU context.
    pub fn uses_gpu(self) -> bool {
        matches!(self, SketchKind::ShaderField)
    }
}

impl fmt::Display for SketchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArtConfig {
    pub version: u32,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub monitors: Monitors,
    #[serde(default)]
    pub sketches: Vec<SketchEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

/// Which periodic monitors the host starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Monitors {
    /// Starts the page-load, memory and FPS samplers.
    #[serde(default)]
    pub development: bool,
    #[serde(default = "enabled")]
    pub program_cache: bool,
    #[serde(default = "enabled")]
    pub sketch_registry: bool,
    #[serde(default = "enabled")]
    pub warnings: bool,
}

impl Default for Monitors {
    fn default() -> Self {
        Self {
            development: false,
            program_cache: true,
            sketch_registry: true,
            warnings: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SketchEntry {
    pub id: String,
    pub kind: SketchKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Fragment source for `shader-field`; the built-in field otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSketch {
    pub id: String,
    pub kind: SketchKind,
    pub container: String,
    pub width: u32,
    pub height: u32,
    pub fragment: Option<PathBuf>,
}

fn enabled() -> bool {
    true
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_FPS: f32 = 60.0;
/// Accepted frame rate range, inclusive.
pub const MIN_FPS: f32 = 0.1;
pub const MAX_FPS: f32 = 1000.0;

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }
        None => serializer.serialize_none(),
    }
}

impl Default for ArtConfig {
    /// The built-in exhibition: one instance of every demo sketch.
    fn default() -> Self {
        let sketches = SketchKind::ALL
            .iter()
            .map(|kind| SketchEntry {
                id: kind.as_str().to_string(),
                kind: *kind,
                container: None,
                width: None,
                height: None,
                fragment: None,
            })
            .collect();
        Self {
            version: 1,
            duration: None,
            fps: None,
            defaults: Defaults::default(),
            monitors: Monitors::default(),
            sketches,
        }
    }
}

impl ArtConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ArtConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn run_duration(&self) -> Duration {
        self.duration.unwrap_or(DEFAULT_DURATION)
    }

    pub fn frame_rate(&self) -> f32 {
        self.fps.unwrap_or(DEFAULT_FPS)
    }

    /// Sketch entries with container and size defaults filled in.
    pub fn resolved_sketches(&self) -> Vec<ResolvedSketch> {
        self.sketches
            .iter()
            .map(|entry| ResolvedSketch {
                id: entry.id.clone(),
                kind: entry.kind,
                container: entry
                    .container
                    .clone()
                    .unwrap_or_else(|| format!("{}-canvas", entry.id)),
                width: entry.width.unwrap_or(self.defaults.width),
                height: entry.height.unwrap_or(self.defaults.height),
                fragment: entry.fragment.clone(),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if let Some(fps) = self.fps {
            if !(MIN_FPS..=MAX_FPS).contains(&fps) {
                return Err(ConfigError::Invalid(format!(
                    "fps must be between {MIN_FPS} and {MAX_FPS}, got {fps}"
                )));
            }
        }

        if let Some(duration) = self.duration {
            if duration.is_zero() {
                return Err(ConfigError::Invalid("duration must be greater than zero".into()));
            }
        }

        if self.defaults.width == 0 || self.defaults.height == 0 {
            return Err(ConfigError::Invalid(
                "defaults.width and defaults.height must be > 0".into(),
            ));
        }

        if self.sketches.is_empty() {
            return Err(ConfigError::Invalid(
                "config must define at least one sketch".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for sketch in &self.sketches {
            if sketch.id.trim().is_empty() {
                return Err(ConfigError::Invalid("sketch id may not be empty".into()));
            }
            if !seen.insert(sketch.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "sketch '{}' is defined more than once",
                    sketch.id
                )));
            }
            if sketch.width == Some(0) || sketch.height == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "sketch '{}' width and height must be > 0",
                    sketch.id
                )));
            }
            if let Some(container) = &sketch.container {
                if container.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "sketch '{}' container may not be empty",
                        sketch.id
                    )));
                }
            }
            if sketch.fragment.is_some() && !sketch.kind.uses_gpu() {
                return Err(ConfigError::Invalid(format!(
                    "sketch '{}' of kind '{}' does not take a fragment shader",
                    sketch.id, sketch.kind
                )));
            }
        }

        Ok(())
    }
}
