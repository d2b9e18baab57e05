use motwot_config::load_config;
use motwot_config::shared::RunnerConfig;

use crate::error::{RunnerError, RunnerResult};

/// Loads the validated runner configuration of this process.
pub fn load_runner_config() -> RunnerResult<RunnerConfig> {
    load_config().map_err(RunnerError::config)
}
