//! Process-boundary adapters: everything that shells out to `git`, `gh`,
//! or a project validator lives here, behind small focused functions
//! rather than a single do-everything client (spec §4.1-§4.3).

pub mod cancel;
pub mod error;
pub mod pr;
pub mod runner;
pub mod validator;
pub mod worktree;

pub use cancel::{CancellationToken, install_signal_handlers};
pub use error::ProcError;
pub use runner::{CommandOutput, run, run_checked, run_streaming};
