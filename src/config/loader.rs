//! Layered configuration loading.

use super::sources::{environment, explicit_file, global_file};
use super::GenflowConfig;
use crate::error::GenerationError;
use config::Config;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    ///
    /// Precedence (highest last): defaults, user config file, `explicit` file,
    /// `GENFLOW__*` environment variables. The result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<GenflowConfig, GenerationError> {
        let mut builder = Config::builder();
        builder = global_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = explicit_file::add_to_builder(builder, path)?;
        }
        builder = environment::add_to_builder(builder);

        let config: GenflowConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single file without the user file or environment layers.
    pub fn load_from_file(path: &Path) -> Result<GenflowConfig, GenerationError> {
        let builder = explicit_file::add_to_builder(Config::builder(), path)?;
        let config: GenflowConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}
