use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::environment::Environment;
use crate::shared::{RunnerConfig, ValidationError};

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration layer.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Environment variables starting with `APP_` override file values.
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separates nested keys, as in `APP_STAGING__DIR`.
const ENV_SEPARATOR: &str = "__";

/// A file layer of the runner configuration. Later layers override earlier ones.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn stem(self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(environment) => environment.as_str(),
        }
    }

    /// Returns the first existing file of this layer in `directory`.
    fn locate(self, directory: &Path) -> Result<PathBuf, LoadConfigError> {
        let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
            .iter()
            .map(|extension| directory.join(format!("{}.{extension}", self.stem())))
            .collect();

        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(LoadConfigError::MissingFile {
                layer: self.stem(),
                directory: directory.to_path_buf(),
                attempted: candidates,
            }),
        }
    }

    /// Parses the layer file on its own so syntax errors name the file they come from.
    fn check(self, path: &Path) -> Result<(), LoadConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map(|_| ())
            .map_err(|source| LoadConfigError::UnreadableFile {
                layer: self.stem(),
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Errors raised while loading the [`RunnerConfig`].
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("no `{layer}` configuration file in `{directory}`, tried {attempted:?}")]
    MissingFile {
        layer: &'static str,
        directory: PathBuf,
        attempted: Vec<PathBuf>,
    },

    #[error("failed to read the `{layer}` configuration file `{path}`: {source}")]
    UnreadableFile {
        layer: &'static str,
        path: PathBuf,
        source: config::ConfigError,
    },

    /// The layers were merged but do not describe a [`RunnerConfig`], or an `APP_` override
    /// could not be applied.
    #[error("malformed runner configuration: {0}")]
    Malformed(#[source] config::ConfigError),

    #[error("invalid runner configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads and validates the runner configuration of the current process.
///
/// Reads `configuration/base.*` and `configuration/{environment}.*` from the working directory,
/// with the environment taken from `APP_ENVIRONMENT`, then applies `APP_` environment variable
/// overrides such as `APP_STAGING__DIR`.
pub fn load_config() -> Result<RunnerConfig, LoadConfigError> {
    let working_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&working_dir.join(CONFIGURATION_DIR), environment)
}

/// Loads and validates the runner configuration from `directory` for `environment`.
pub fn load_config_from(
    directory: &Path,
    environment: Environment,
) -> Result<RunnerConfig, LoadConfigError> {
    load_layers(directory, environment, env_overrides())
}

fn env_overrides() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
}

fn load_layers(
    directory: &Path,
    environment: Environment,
    overrides: config::Environment,
) -> Result<RunnerConfig, LoadConfigError> {
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let mut builder = config::Config::builder();
    for layer in [Layer::Base, Layer::Environment(environment)] {
        let path = layer.locate(directory)?;
        layer.check(&path)?;
        builder = builder.add_source(config::File::from(path));
    }

    let config: RunnerConfig = builder
        .add_source(overrides)
        .build()
        .and_then(config::Config::try_deserialize)
        .map_err(LoadConfigError::Malformed)?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{UpstreamConfig, WarehouseConfig};
    use std::fs;

    const BASE: &str = r#"
upstream:
  local:
    dir: "data/archives"
warehouse: memory
staging:
  dir: "data/staging"
"#;

    fn configuration_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    fn no_overrides() -> config::Environment {
        env_overrides().source(Some(config::Map::new()))
    }

    #[test]
    fn environment_file_overrides_base_file() {
        let dir = configuration_dir(&[
            ("base.yaml", BASE),
            ("prod.json", r#"{ "staging": { "keep_after_merge": true } }"#),
        ]);

        let config = load_layers(dir.path(), Environment::Prod, no_overrides()).unwrap();

        assert!(config.staging.keep_after_merge);
        assert_eq!(config.staging.dir, PathBuf::from("data/staging"));
        assert!(matches!(config.warehouse, WarehouseConfig::Memory));
    }

    #[test]
    fn env_variables_override_files() {
        let dir = configuration_dir(&[("base.yaml", BASE), ("dev.yml", "staging:\n  dir: x\n")]);
        let overrides = env_overrides().source(Some(
            [("APP_UPSTREAM__LOCAL__DIR".to_owned(), "/srv/archives".to_owned())]
                .into_iter()
                .collect(),
        ));

        let config = load_layers(dir.path(), Environment::Dev, overrides).unwrap();

        let UpstreamConfig::Local { dir } = &config.upstream else {
            panic!("expected the local upstream");
        };
        assert_eq!(dir, &PathBuf::from("/srv/archives"));
        assert_eq!(config.staging.dir, PathBuf::from("x"));
    }

    #[test]
    fn invalid_settings_fail_loading() {
        let dir = configuration_dir(&[
            ("base.yaml", BASE),
            ("dev.yaml", "staging:\n  write_buffer_bytes: 0\n"),
        ]);

        let err = load_layers(dir.path(), Environment::Dev, no_overrides()).unwrap_err();

        assert!(matches!(
            err,
            LoadConfigError::Invalid(ValidationError::WriteBufferBytesZero)
        ));
    }

    #[test]
    fn unknown_warehouse_is_malformed() {
        let dir = configuration_dir(&[("base.yaml", BASE), ("dev.yaml", "warehouse: postgres\n")]);

        let err = load_layers(dir.path(), Environment::Dev, no_overrides()).unwrap_err();

        assert!(matches!(err, LoadConfigError::Malformed(_)));
    }

    #[test]
    fn syntax_error_names_the_file() {
        let dir = configuration_dir(&[("base.yaml", BASE), ("prod.json", "{ not json")]);

        let err = load_layers(dir.path(), Environment::Prod, no_overrides()).unwrap_err();

        let LoadConfigError::UnreadableFile { layer, path, .. } = err else {
            panic!("expected an unreadable file, got {err}");
        };
        assert_eq!(layer, "prod");
        assert_eq!(path, dir.path().join("prod.json"));
    }

    #[test]
    fn missing_environment_file_is_reported() {
        let dir = configuration_dir(&[("base.yaml", BASE)]);

        let err = load_layers(dir.path(), Environment::Dev, no_overrides()).unwrap_err();

        let LoadConfigError::MissingFile { layer, attempted, .. } = err else {
            panic!("expected a missing file, got {err}");
        };
        assert_eq!(layer, "dev");
        assert_eq!(attempted.len(), CONFIG_FILE_EXTENSIONS.len());
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        let err = load_config_from(&dir.path().join(CONFIGURATION_DIR), Environment::Dev)
            .unwrap_err();

        assert!(matches!(err, LoadConfigError::MissingDirectory(_)));
    }
}
