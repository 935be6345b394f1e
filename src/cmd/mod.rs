//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `build`  | `Build`          |
//! | `plan`   | `Plan`           |
//! | `worker` | `Worker`         |

pub mod build;
pub mod plan;
pub mod worker;

pub use build::cmd_build;
pub use plan::cmd_plan;
pub use worker::cmd_worker;

use std::path::Path;

use fleetpack::config::FleetConfig;
use fleetpack::errors::RunError;

/// Load the build-plan config, folding any failure into the configuration category.
pub(crate) fn load_config(project_dir: &Path, explicit: Option<&Path>) -> Result<FleetConfig, RunError> {
    FleetConfig::load(project_dir, explicit).map_err(|e| RunError::Config(format!("{:#}", e)))
}
