use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use knownface_core::MatchConfig;
use knownface_models::ARCFACE_DISTANCE_THRESHOLD;
use serde::Deserialize;

const CONFIG_ENV: &str = "KNOWNFACE_CONFIG";

/// Optional settings read from a TOML file; unset keys fall through.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub gallery_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub distance_threshold: Option<f32>,
    pub extraction_timeout_secs: Option<u64>,
}

/// CLI configuration: defaults, then the TOML file, then `KNOWNFACE_*`
/// environment variables, then command-line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory of reference images (default: ./known_faces).
    pub gallery_dir: PathBuf,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Euclidean distance strictly below which two faces match. Defaults to
    /// the ArcFace operating point, not the core's generic 0.6.
    pub distance_threshold: f32,
    /// Per-image embedding extraction deadline in seconds.
    pub extraction_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("known_faces"),
            model_dir: knownface_models::default_model_dir(),
            distance_threshold: ARCFACE_DISTANCE_THRESHOLD,
            extraction_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load from `path` (or `$KNOWNFACE_CONFIG`) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let file = match path {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };

        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Layer `file` and then the variables visible through `env` over the defaults.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            gallery_dir: env("KNOWNFACE_GALLERY_DIR")
                .map(PathBuf::from)
                .or(file.gallery_dir)
                .unwrap_or(defaults.gallery_dir),
            model_dir: env("KNOWNFACE_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or(defaults.model_dir),
            distance_threshold: env_parse(&env, "KNOWNFACE_DISTANCE_THRESHOLD")
                .or(file.distance_threshold)
                .unwrap_or(defaults.distance_threshold),
            extraction_timeout_secs: env_parse(&env, "KNOWNFACE_EXTRACTION_TIMEOUT_SECS")
                .or(file.extraction_timeout_secs)
                .unwrap_or(defaults.extraction_timeout_secs),
        }
    }

    /// Apply command-line overrides.
    pub fn with_overrides(
        mut self,
        gallery_dir: Option<PathBuf>,
        model_dir: Option<PathBuf>,
        distance_threshold: Option<f32>,
    ) -> Self {
        if let Some(dir) = gallery_dir {
            self.gallery_dir = dir;
        }
        if let Some(dir) = model_dir {
            self.model_dir = dir;
        }
        if let Some(threshold) = distance_threshold {
            self.distance_threshold = threshold;
        }
        self
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            gallery_dir: self.gallery_dir.clone(),
            distance_threshold: self.distance_threshold,
            extraction_timeout: Duration::from_secs(self.extraction_timeout_secs),
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knownface_core::{
        BoundingBox, DetectedFace, Embedding, EuclideanMatcher, GalleryEntry, GallerySnapshot,
        Matcher,
    };
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_from(&[]));
        assert_eq!(config.gallery_dir, PathBuf::from("known_faces"));
        assert_eq!(config.distance_threshold, ARCFACE_DISTANCE_THRESHOLD);
        assert_eq!(config.extraction_timeout_secs, 10);
    }

    fn unit_pair(cos: f32) -> (Embedding, Embedding) {
        let mut reference = vec![0.0; 512];
        reference[0] = 1.0;
        let mut query = vec![0.0; 512];
        query[0] = cos;
        query[1] = (1.0 - cos * cos).sqrt();
        (Embedding::new(reference), Embedding::new(query))
    }

    #[test]
    fn test_default_threshold_accepts_same_person_arcface_pair() {
        let config = Config::resolve(FileConfig::default(), env_from(&[]));
        let matcher = EuclideanMatcher::new(config.distance_threshold).unwrap();

        let (reference, same) = unit_pair(0.6);
        let gallery = GallerySnapshot::from_entries(vec![GalleryEntry::new("alice.jpg", vec![reference])]);
        let face = DetectedFace::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), same);
        let report = matcher.compare(&[face], &gallery).unwrap();
        assert!(report.faces[0].is_match());

        let (_, stranger) = unit_pair(0.2);
        let face = DetectedFace::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), stranger);
        let report = matcher.compare(&[face], &gallery).unwrap();
        assert!(!report.faces[0].is_match());
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            gallery_dir = "/srv/faces"
            distance_threshold = 0.5
            extraction_timeout_secs = 3
            "#,
        )
        .unwrap();
        let config = Config::resolve(file, env_from(&[("KNOWNFACE_DISTANCE_THRESHOLD", "0.45")]));

        assert_eq!(config.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.distance_threshold, 0.45);
        assert_eq!(config.extraction_timeout_secs, 3);
    }

    #[test]
    fn test_unparsable_env_falls_through() {
        let config = Config::resolve(
            FileConfig::default(),
            env_from(&[("KNOWNFACE_EXTRACTION_TIMEOUT_SECS", "soon")]),
        );
        assert_eq!(config.extraction_timeout_secs, 10);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("threshold = 0.4").is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("knownface.toml");
        std::fs::write(&path, "model_dir = \"/opt/models\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        if std::env::var("KNOWNFACE_MODEL_DIR").is_err() {
            assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        }
        assert!(Config::load(Some(&tmp.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_overrides_and_match_config() {
        let config = Config::resolve(FileConfig::default(), env_from(&[])).with_overrides(
            Some(PathBuf::from("/tmp/gallery")),
            None,
            Some(0.3),
        );
        let match_config = config.match_config();
        assert_eq!(match_config.gallery_dir, PathBuf::from("/tmp/gallery"));
        assert_eq!(match_config.distance_threshold, 0.3);
        assert_eq!(match_config.extraction_timeout, Duration::from_secs(10));
    }
}
