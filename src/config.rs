use crate::model::ResourceKind;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_ENV: &str = "SKIFF_CONFIG";
pub const HOME_ENV: &str = "SKIFF_HOME";

/// Optional settings read from `skiff.yaml`; CLI flags win over every field.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SkiffConfig {
    #[serde(default, alias = "refreshMs")]
    pub refresh_ms: Option<u64>,
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default, alias = "defaultView")]
    pub default_view: Option<String>,
}

impl SkiffConfig {
    /// Discovers and parses the config file. No file means defaults.
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        let override_path = std::env::var(CONFIG_ENV).ok();
        let Some(path) = discover_config_path(override_path.as_deref(), dirs::home_dir())
        else {
            return Ok((Self::default(), None));
        };
        let config = Self::from_file(&path)?;
        Ok((config, Some(path)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn start_view(&self) -> ResourceKind {
        let Some(token) = self.default_view.as_deref() else {
            return ResourceKind::Pods;
        };
        match ResourceKind::from_token(token) {
            Some(ResourceKind::Containers) | None => {
                warn!(view = token, "unusable default view, starting on pods");
                ResourceKind::Pods
            }
            Some(kind) => kind,
        }
    }
}

fn discover_config_path(override_path: Option<&str>, home: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = override_path
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [PathBuf::from("skiff.yaml"), PathBuf::from(".skiff.yaml")];
    if let Some(found) = cwd_candidates.into_iter().find(|path| path.exists()) {
        return Some(found);
    }

    home.map(|home| home.join(".config/skiff/config.yaml"))
        .filter(|path| path.exists())
}

/// Picks the skiff home: flag, then `SKIFF_HOME`, then the config file, then
/// the platform config dir.
pub fn resolve_home(
    cli: Option<&Path>,
    env: Option<&str>,
    config: Option<&Path>,
    fallback: Option<PathBuf>,
) -> PathBuf {
    let env = env
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    cli.map(Path::to_path_buf)
        .or(env)
        .or_else(|| config.map(expand_tilde))
        .or_else(|| fallback.map(|dir| dir.join("skiff")))
        .unwrap_or_else(|| PathBuf::from(".skiff"))
}

fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::{SkiffConfig, discover_config_path, resolve_home};
    use crate::model::ResourceKind;
    use std::path::{Path, PathBuf};

    #[test]
    fn parses_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skiff.yaml");
        std::fs::write(
            &path,
            "refresh_ms: 1000\nhome: /var/skiff\ndefault_view: svc\n",
        )
        .unwrap();

        let config = SkiffConfig::from_file(&path).expect("config");
        assert_eq!(config.refresh_ms, Some(1_000));
        assert_eq!(config.home.as_deref(), Some(Path::new("/var/skiff")));
        assert_eq!(config.start_view(), ResourceKind::Services);
    }

    #[test]
    fn empty_file_is_default_and_bad_yaml_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = dir.path().join("empty.yaml");
        std::fs::write(&empty, "\n").unwrap();
        assert_eq!(SkiffConfig::from_file(&empty).unwrap(), SkiffConfig::default());

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "refresh_ms: [").unwrap();
        let error = SkiffConfig::from_file(&bad).unwrap_err();
        assert!(format!("{error:#}").contains("failed to parse config"));
    }

    #[test]
    fn unknown_default_view_falls_back_to_pods() {
        let config = SkiffConfig {
            default_view: Some("widgets".to_string()),
            ..SkiffConfig::default()
        };
        assert_eq!(config.start_view(), ResourceKind::Pods);
    }

    #[test]
    fn override_path_and_home_config_are_discovered() {
        assert_eq!(
            discover_config_path(Some("/etc/skiff.yaml"), None),
            Some(PathBuf::from("/etc/skiff.yaml"))
        );

        let home = tempfile::tempdir().expect("tempdir");
        let nested = home.path().join(".config/skiff");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("config.yaml"), "refresh_ms: 900\n").unwrap();
        assert_eq!(
            discover_config_path(Some("  "), Some(home.path().to_path_buf())),
            Some(nested.join("config.yaml"))
        );
    }

    #[test]
    fn home_precedence() {
        let fallback = Some(PathBuf::from("/cfg"));
        assert_eq!(
            resolve_home(
                Some(Path::new("/cli")),
                Some("/env"),
                Some(Path::new("/file")),
                fallback.clone()
            ),
            PathBuf::from("/cli")
        );
        assert_eq!(
            resolve_home(None, Some("/env"), Some(Path::new("/file")), fallback.clone()),
            PathBuf::from("/env")
        );
        assert_eq!(
            resolve_home(None, Some(""), Some(Path::new("/file")), fallback.clone()),
            PathBuf::from("/file")
        );
        assert_eq!(
            resolve_home(None, None, None, fallback),
            PathBuf::from("/cfg/skiff")
        );
    }
}
