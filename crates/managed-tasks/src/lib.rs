//!
//! # Managed Tasks
//!
//! Background tasks whose progress and completion are routed through a
//! [`MessageSwitch`](bc_message_switch::MessageSwitch), so whichever observer currently exists
//! (a screen that got recreated, a CLI progress bar, ...) can follow them.
//!
//! - A [`ManagedTask`] runs one [`Task`] on the tokio runtime, can be canceled cooperatively through
//!   its [`Interrupter`], and always announces its end with exactly one [`TaskFinished`] message;
//! - A [`TaskManager`] owns the tasks of one UI owner, merges their progress into a single
//!   [`Progress`] status and can cancel all of them at once;
//! - A [`Switchboard`] holds the two switches tasks and managers talk through.
//!
//! ## Basic example
//!
//! ```
//! use bc_managed_tasks::{
//!     check_interruption, ExecStatus, Switchboard, Task, TaskContext, TaskManager, TaskOutcome,
//! };
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! #[error("import failed")]
//! pub struct ImportError;
//!
//! pub struct ImportTask {
//!     books: Vec<String>,
//! }
//!
//! #[async_trait]
//! impl Task<ImportError> for ImportTask {
//!     fn name(&self) -> &str {
//!         "import"
//!     }
//!
//!     async fn run(&mut self, ctx: &TaskContext) -> Result<ExecStatus, ImportError> {
//!         ctx.set_max_progress(self.books.len() as u64);
//!
//!         for (count, title) in self.books.iter().enumerate() {
//!             check_interruption!(ctx.interrupter());
//!             ctx.report_progress(Some(format!("Importing {title}")), count as u64 + 1);
//!         }
//!
//!         Ok(ExecStatus::Done)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let switchboard = Switchboard::new();
//!     let manager = TaskManager::new(&switchboard);
//!
//!     let task = manager
//!         .spawn(ImportTask {
//!             books: vec!["Dune".to_string(), "Emma".to_string()],
//!         })
//!         .expect("manager is accepting tasks");
//!
//!     assert!(matches!(task.wait().await, TaskOutcome::Done));
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod interrupter;
mod manager;
mod progress;
mod task;

pub use bc_message_switch::{SenderId, Subscription};

#[doc(hidden)]
pub use tracing as __tracing;

pub use error::{Error, RunError};
pub use interrupter::Interrupter;
pub use manager::{
	ManagerSwitch, Switchboard, TaskManager, TaskManagerConfig, TaskManagerController,
	TaskManagerListener,
};
pub use progress::{Progress, TaskProgress};
pub use task::{
	ExecStatus, ManagedTask, ManagedTaskController, ManagedTaskListener, Task, TaskContext,
	TaskFinished, TaskOutcome, TaskState, TaskSwitch,
};
