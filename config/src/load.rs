use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::FileFormat;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::ValidationError;

/// Directory holding the configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

const BASE_FILE_STEM: &str = "base";

/// Accepted configuration file extensions, in lookup order.
const FILE_EXTENSIONS: &[(&str, FileFormat)] = &[
    ("yaml", FileFormat::Yaml),
    ("yml", FileFormat::Yaml),
    ("json", FileFormat::Json),
];

/// Environment variables starting with `APP_` override file values.
const ENV_PREFIX: &str = "APP";

/// Separates nested keys in override variables, as in `APP_BATCH__MAX_CONCURRENT_KEYS`.
const ENV_NESTING_SEPARATOR: &str = "__";

const ENV_LIST_SEPARATOR: &str = ",";

/// Configuration structures loadable with [`load_config`].
pub trait Config {
    /// Keys whose overrides are comma separated lists, such as `APP_KEY_COLUMNS=tenant,id`.
    const LIST_PARSE_KEYS: &'static [&'static str];

    /// Checks the loaded values. Loading fails when this returns an error.
    fn validate(&self) -> Result<(), ValidationError>;
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("no `{stem}` configuration file in `{directory}` (tried {tried})")]
    MissingFile {
        stem: String,
        directory: PathBuf,
        tried: String,
    },

    #[error("invalid configuration file `{path}`: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to resolve the configuration: {0}")]
    Resolve(#[source] rust_cli_config::ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// Loads the configuration from `./configuration` for the environment named by
/// `APP_ENVIRONMENT`.
///
/// The base file is `base.(yaml|yml|json)` and the environment file, for instance `prod.yaml`,
/// is layered on top of it. `APP_`-prefixed environment variables are applied last, nested keys
/// being separated by a double underscore (`APP_RETRY__MAX_ATTEMPTS=5`).
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::CurrentDir)?
        .join(CONFIGURATION_DIR);

    load_config_from(&directory, Environment::load()?)
}

/// Same as [`load_config`] with an explicit directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let files = [
        locate_file(directory, BASE_FILE_STEM)?,
        locate_file(directory, environment.as_str())?,
    ];

    let mut builder = rust_cli_config::Config::builder();
    for (path, format) in &files {
        let source = rust_cli_config::File::from(path.as_path()).format(*format);

        // Parsing each file alone reports a syntax error against the file that holds it.
        rust_cli_config::Config::builder()
            .add_source(source.clone())
            .build()
            .map_err(|source| LoadConfigError::InvalidFile {
                path: path.clone(),
                source,
            })?;

        builder = builder.add_source(source);
    }

    let config: T = builder
        .add_source(environment_overrides::<T>())
        .build()
        .and_then(|settings| settings.try_deserialize())
        .map_err(LoadConfigError::Resolve)?;
    config.validate()?;

    Ok(config)
}

fn locate_file(directory: &Path, stem: &str) -> Result<(PathBuf, FileFormat), LoadConfigError> {
    let candidates = FILE_EXTENSIONS
        .iter()
        .map(|(extension, format)| (directory.join(format!("{stem}.{extension}")), *format))
        .collect::<Vec<_>>();

    if let Some(found) = candidates.iter().find(|(path, _)| path.is_file()) {
        return Ok(found.clone());
    }

    Err(LoadConfigError::MissingFile {
        stem: stem.to_string(),
        directory: directory.to_path_buf(),
        tried: candidates
            .iter()
            .map(|(path, _)| format!("`{}`", path.display()))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn environment_overrides<T: Config>() -> rust_cli_config::Environment {
    let mut overrides = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_NESTING_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_PARSE_KEYS.is_empty() {
        overrides = overrides.list_separator(ENV_LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            overrides = overrides.with_list_parse_key(key);
        }
    }

    overrides
}
