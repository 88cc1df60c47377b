use crate::composer::{Composer, ConfigFileComposer, ShellComposer};
use crate::error::{ProdlineError, Result};
use crate::job::{JobParams, DEFAULT_POLL_INTERVAL, UNBOUNDED};
use crate::paths;
use crate::sampling::twise::{TWiseAlgorithm, MAX_STRENGTH};
use crate::types::{BuildKind, BuildOrder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// BuildConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_kind")]
    pub kind: BuildKind,
    #[serde(default)]
    pub order: BuildOrder,
    #[serde(default = "default_t")]
    pub t: usize,
    /// Strength of the interaction ordering.
    #[serde(default = "default_t")]
    pub t_order: usize,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Upper bound on configurations. Absent means no bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default)]
    pub create_new_projects: bool,
    #[serde(default)]
    pub run_tests: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Feature under test for integration builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
}

fn default_kind() -> BuildKind {
    BuildKind::AllValid
}

fn default_t() -> usize {
    2
}

fn default_algorithm() -> String {
    "chvatal".to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            order: BuildOrder::default(),
            t: default_t(),
            t_order: default_t(),
            algorithm: default_algorithm(),
            max: None,
            create_new_projects: false,
            run_tests: false,
            poll_interval_ms: default_poll_interval_ms(),
            seed: None,
            feature: None,
        }
    }
}

impl BuildConfig {
    /// Job parameters for this section. `defaults` are the model's feature
    /// defaults.
    pub fn job_params(&self, defaults: Vec<bool>) -> JobParams {
        JobParams {
            kind: self.kind,
            order: self.order,
            t: self.t,
            t_order: self.t_order,
            algorithm: self.algorithm.clone(),
            create_new_projects: self.create_new_projects,
            run_tests: self.run_tests,
            max: self.max.unwrap_or(UNBOUNDED),
            feature: self.feature.clone(),
            seed: self.seed,
            defaults,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// ComposerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComposerConfig {
    /// Write each selection as a `.config` file.
    #[default]
    ConfigFile,
    /// Run a command per variant.
    Shell {
        command: String,
        #[serde(default = "default_parallel")]
        parallel: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
    },
}

fn default_parallel() -> bool {
    true
}

impl ComposerConfig {
    pub fn build(&self) -> Arc<dyn Composer> {
        match self {
            ComposerConfig::ConfigFile => Arc::new(ConfigFileComposer),
            ComposerConfig::Shell {
                command,
                parallel,
                timeout_seconds,
            } => Arc::new(
                ShellComposer::new(command.clone())
                    .parallel(*parallel)
                    .timeout(timeout_seconds.map(Duration::from_secs)),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    /// Feature model path, relative to the project root.
    #[serde(default = "default_model")]
    pub model: PathBuf,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classpath: Vec<PathBuf>,
}

fn default_version() -> u32 {
    1
}

fn default_model() -> PathBuf {
    PathBuf::from(paths::MODEL_FILE)
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            model: default_model(),
            build: BuildConfig::default(),
            composer: ComposerConfig::default(),
            classpath: Vec::new(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ProdlineError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Err(e) = paths::validate_name(&self.project.name) {
            warnings.push(ConfigWarning::error(e.to_string()));
        }

        let build = &self.build;
        if let Err(e) = build.algorithm.parse::<TWiseAlgorithm>() {
            warnings.push(ConfigWarning::error(e.to_string()));
        }
        for (key, t) in [("t", build.t), ("t_order", build.t_order)] {
            if !(1..=MAX_STRENGTH).contains(&t) {
                warnings.push(ConfigWarning::error(format!(
                    "build.{key}={t} is outside 1..={MAX_STRENGTH}"
                )));
            }
        }
        if build.kind == BuildKind::Integration && build.feature.is_none() {
            warnings.push(ConfigWarning::error(
                "integration builds need build.feature",
            ));
        }
        if matches!(build.max, Some(max) if max <= 0) {
            warnings.push(ConfigWarning::warning(
                "build.max is not positive; builds will do nothing",
            ));
        }
        if build.kind == BuildKind::Random && build.max.is_none() {
            warnings.push(ConfigWarning::warning(
                "random builds without build.max run until the sample space is exhausted",
            ));
        }

        if let ComposerConfig::Shell {
            command,
            timeout_seconds,
            ..
        } = &self.composer
        {
            if command.trim().is_empty() {
                warnings.push(ConfigWarning::warning(
                    "shell composer has an empty command",
                ));
            }
            if *timeout_seconds == Some(0) {
                warnings.push(ConfigWarning::warning(
                    "composer.timeout_seconds=0 fails every build",
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("test-project");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.name, "test-project");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.composer, ComposerConfig::ConfigFile);
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let cfg: Config = serde_yaml::from_str("project:\n  name: shop\n").unwrap();
        assert_eq!(cfg.model, PathBuf::from(".prodline/model.yaml"));
        assert_eq!(cfg.build.kind, BuildKind::AllValid);
        assert_eq!(cfg.build.t, 2);
        assert_eq!(cfg.build.poll_interval_ms, 150);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn shell_composer_yaml_tagged() {
        let yaml = "\
project:
  name: shop
build:
  kind: t_wise
  order: interaction
  t: 3
  max: 20
composer:
  type: shell
  command: make
  timeout_seconds: 60
";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.build.kind, BuildKind::TWise);
        assert_eq!(cfg.build.order, BuildOrder::Interaction);
        assert_eq!(
            cfg.composer,
            ComposerConfig::Shell {
                command: "make".to_string(),
                parallel: true,
                timeout_seconds: Some(60),
            }
        );
        assert!(cfg.composer.build().supports_parallel_build());
        let params = cfg.build.job_params(vec![]);
        assert_eq!(params.max, 20);
        assert_eq!((params.t, params.t_order), (3, 2));
    }

    #[test]
    fn missing_max_is_unbounded() {
        let params = BuildConfig::default().job_params(vec![true]);
        assert_eq!(params.max, UNBOUNDED);
        assert_eq!(params.defaults, vec![true]);
    }

    #[test]
    fn validate_flags_bad_settings() {
        let mut cfg = Config::new("shop");
        cfg.build.algorithm = "casa".to_string();
        cfg.build.t = 9;
        cfg.build.kind = BuildKind::Integration;
        cfg.composer = ComposerConfig::Shell {
            command: " ".to_string(),
            parallel: false,
            timeout_seconds: None,
        };
        let warnings = cfg.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 3);
        assert!(warnings.iter().any(|w| w.message.contains("empty command")));
    }

    #[test]
    fn load_requires_init() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ProdlineError::NotInitialized)
        ));
        Config::new("shop").save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()).unwrap().project.name, "shop");
    }
}
