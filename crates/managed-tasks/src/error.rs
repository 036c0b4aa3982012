use bc_message_switch::SenderId;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("task manager <id='{0}'> is closing and can't accept new tasks")]
	ManagerClosing(SenderId),
	#[error("task <id='{task_id}', name='{name}'> was already started")]
	AlreadyStarted { task_id: SenderId, name: String },
	#[error("task <name='{0}'> panicked")]
	TaskPanicked(String),

	#[error(transparent)]
	Switch(#[from] bc_message_switch::Error),
}

/// Errors a [`Task`](crate::Task) work routine may return, they are kept in the task outcome
/// instead of being propagated to whoever spawned the task.
pub trait RunError: std::error::Error + Send + Sync + 'static {}

impl<T: std::error::Error + Send + Sync + 'static> RunError for T {}
