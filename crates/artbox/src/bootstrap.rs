use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use artconfig::ArtConfig;

use crate::cli::RunArgs;
use crate::paths::AppPaths;

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    BuiltIn,
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::File(path) => write!(f, "{}", path.display()),
            ConfigOrigin::BuiltIn => f.write_str("built-in exhibition"),
        }
    }
}

/// Loads `explicit` when given (it must exist), otherwise the config file in
/// the config directory, falling back to the built-in exhibition.
pub fn load_config(explicit: Option<&Path>, paths: &AppPaths) -> Result<(ArtConfig, ConfigOrigin)> {
    if let Some(path) = explicit {
        let config = ArtConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        return Ok((config, ConfigOrigin::File(path.to_path_buf())));
    }

    let discovered = paths.config_file();
    if discovered.exists() {
        let config = ArtConfig::from_path(&discovered)
            .with_context(|| format!("failed to load config {}", discovered.display()))?;
        return Ok((config, ConfigOrigin::File(discovered)));
    }

    tracing::debug!(
        searched = %discovered.display(),
        "no config file found; using the built-in exhibition"
    );
    Ok((ArtConfig::default(), ConfigOrigin::BuiltIn))
}

/// Folds command-line overrides into the loaded configuration.
pub fn apply_overrides(config: &mut ArtConfig, args: &RunArgs) -> Result<()> {
    if let Some(duration) = args.duration {
        config.duration = Some(duration);
    }
    if let Some(fps) = args.fps {
        config.fps = Some(fps);
    }
    if args.development {
        config.monitors.development = true;
    }
    config
        .validate()
        .context("command-line overrides produced an invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const MINIMAL: &str = "version = 1\n\n[[sketches]]\nid = \"only\"\nkind = \"noise\"\n";

    fn paths_in(dir: &Path) -> AppPaths {
        AppPaths::from_raw(dir.to_path_buf())
    }

    #[test]
    fn falls_back_to_builtin_without_a_file() {
        let root = TempDir::new().unwrap();
        let (config, origin) = load_config(None, &paths_in(root.path())).unwrap();
        assert_eq!(origin, ConfigOrigin::BuiltIn);
        assert_eq!(config, ArtConfig::default());
    }

    #[test]
    fn discovers_file_in_config_dir() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("artbox.toml"), MINIMAL).unwrap();
        let (config, origin) = load_config(None, &paths_in(root.path())).unwrap();
        assert_eq!(origin, ConfigOrigin::File(root.path().join("artbox.toml")));
        assert_eq!(config.sketches.len(), 1);
    }

    #[test]
    fn explicit_path_must_exist() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("missing.toml");
        let err = load_config(Some(&missing), &paths_in(root.path())).unwrap_err();
        assert!(format!("{err:#}").contains("missing.toml"));
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = ArtConfig::default();
        let args = RunArgs {
            duration: Some(Duration::from_millis(300)),
            fps: Some(24.0),
            development: true,
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.run_duration(), Duration::from_millis(300));
        assert_eq!(config.frame_rate(), 24.0);
        assert!(config.monitors.development);
    }
}
