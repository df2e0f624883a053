//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `project`       | `Init`, `Project`                                  |
//! | `generate`      | `Generate`                                         |
//! | `runs`          | `Runs`, `Session`                                  |
//! | `catalog`       | `Catalog`                                          |
//! | `config`        | `Config`                                           |

pub mod catalog;
pub mod config;
pub mod generate;
pub mod project;
pub mod runs;

pub use catalog::cmd_catalog;
pub use config::cmd_config;
pub use generate::cmd_generate;
pub use project::{cmd_init, cmd_project};
pub use runs::{cmd_runs, cmd_session};

use anyhow::{Context, Result};
use stageforge::ledger::{LedgerDb, LedgerHandle};
use stageforge::stageforge_config::StageforgeConfig;

/// Open the run ledger under the state directory.
pub(crate) fn open_ledger(config: &StageforgeConfig) -> Result<LedgerHandle> {
    let path = config.ledger_file();
    let db = LedgerDb::new(&path)
        .with_context(|| format!("Failed to open run ledger at {}", path.display()))?;
    Ok(LedgerHandle::new(db))
}
