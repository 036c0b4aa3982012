use std::{
	error::Error as StdError,
	fmt,
	panic::AssertUnwindSafe,
	sync::{
		atomic::{AtomicU8, Ordering},
		Arc, Weak,
	},
};

use async_trait::async_trait;
use bc_message_switch::{Message, MessageSwitch, SenderId};
use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, trace, warn, Instrument};

use super::{
	error::{Error, RunError},
	interrupter::Interrupter,
	manager::{TaskManager, WeakTaskManager},
};

/// The switch every [`ManagedTask`] announces its completion through.
pub type TaskSwitch = MessageSwitch<dyn ManagedTaskListener, ManagedTaskController>;

/// How a single [`Task::run`] invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
	Done,
	Canceled,
}

/// Final result of a managed task, errors and panics included.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
	Done,
	Canceled,
	Failed(Arc<dyn StdError + Send + Sync>),
}

impl TaskOutcome {
	#[must_use]
	pub const fn is_done(&self) -> bool {
		matches!(self, Self::Done)
	}

	#[must_use]
	pub const fn is_canceled(&self) -> bool {
		matches!(self, Self::Canceled)
	}

	#[must_use]
	pub fn error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
		match self {
			Self::Failed(e) => Some(e.as_ref()),
			Self::Done | Self::Canceled => None,
		}
	}
}

/// Lifecycle of a managed task: `Created → Running → {Finished, Canceled}`.
///
/// A task that failed is `Finished`; the failure itself lives in its [`TaskOutcome`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	Created = 0,
	Running = 1,
	Finished = 2,
	Canceled = 3,
}

impl TaskState {
	const fn from_u8(state: u8) -> Self {
		match state {
			0 => Self::Created,
			1 => Self::Running,
			2 => Self::Finished,
			_ => Self::Canceled,
		}
	}
}

/// A unit of work run in the background by a [`ManagedTask`].
///
/// We're using the [`async_trait`](https://docs.rs/async-trait) crate as the task is type erased
/// once handed to its [`ManagedTask`].
#[async_trait]
pub trait Task<E: RunError>: Send + 'static {
	/// Name used in logs and in the finish message.
	fn name(&self) -> &str;

	/// The actual work. The [`TaskContext`] gives access to the [`Interrupter`] and to the
	/// progress reporting of the owning [`TaskManager`].
	async fn run(&mut self, ctx: &TaskContext) -> Result<ExecStatus, E>;

	/// Called once the task is over, whatever the outcome, right before the finish message is
	/// sent. Also called for tasks canceled before they started running.
	async fn on_finish(&mut self, _outcome: &TaskOutcome) {}
}

/// Everything a running [`Task`] can reach.
#[derive(Debug, Clone)]
pub struct TaskContext {
	task_id: SenderId,
	interrupter: Interrupter,
	manager: WeakTaskManager,
}

impl TaskContext {
	#[must_use]
	pub const fn task_id(&self) -> SenderId {
		self.task_id
	}

	#[must_use]
	pub const fn interrupter(&self) -> &Interrupter {
		&self.interrupter
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.interrupter.is_cancelled()
	}

	/// The manager that owns this task, if it is still around.
	#[must_use]
	pub fn manager(&self) -> Option<TaskManager> {
		self.manager.upgrade()
	}

	pub fn set_max_progress(&self, max: u64) {
		if let Some(manager) = self.manager() {
			manager.set_max_progress(self.task_id, max);
		}
	}

	pub fn report_progress(&self, message: Option<String>, count: u64) {
		if let Some(manager) = self.manager() {
			manager.send_task_progress(self.task_id, message, count);
		}
	}

	pub fn set_progress_count(&self, count: u64) {
		if let Some(manager) = self.manager() {
			manager.set_progress_count(self.task_id, count);
		}
	}

	pub fn user_message(&self, message: impl Into<String>) {
		if let Some(manager) = self.manager() {
			manager.send_user_message(message);
		}
	}
}

/// Payload of the message every managed task sends exactly once, when it is over.
#[derive(Debug, Clone)]
pub struct TaskFinished {
	pub task_id: SenderId,
	pub name: String,
	pub outcome: TaskOutcome,
}

pub trait ManagedTaskListener: Send + Sync {
	fn on_task_finished(&self, finished: &TaskFinished);
}

#[derive(Debug)]
pub(crate) struct TaskFinishedMessage(TaskFinished);

impl Message<dyn ManagedTaskListener> for TaskFinishedMessage {
	fn deliver(&self, listener: &dyn ManagedTaskListener) -> bool {
		listener.on_task_finished(&self.0);
		false
	}
}

/// Controller registered with the [`TaskSwitch`] for each task, so listeners can reach it.
#[derive(Debug, Clone)]
pub struct ManagedTaskController {
	task: Weak<Inner>,
}

impl ManagedTaskController {
	/// Returns `false` if the task no longer exists.
	pub fn cancel_task(&self) -> bool {
		if let Some(task) = self.task() {
			task.cancel_task();
			true
		} else {
			false
		}
	}

	#[must_use]
	pub fn task(&self) -> Option<ManagedTask> {
		self.task.upgrade().map(|inner| ManagedTask { inner })
	}
}

type BoxedRun = Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, TaskOutcome> + Send>;

/// Handle to a [`Task`] running in the background on behalf of a [`TaskManager`].
///
/// Cheap to clone, all clones refer to the same task. When the last handle goes away the task's
/// sender is closed on the [`TaskSwitch`].
#[derive(Clone)]
pub struct ManagedTask {
	inner: Arc<Inner>,
}

struct Inner {
	sender_id: SenderId,
	name: String,
	state: AtomicU8,
	cancel_token: CancellationToken,
	switch: TaskSwitch,
	manager: WeakTaskManager,
	pending_run: Mutex<Option<BoxedRun>>,
	outcome_tx: watch::Sender<Option<TaskOutcome>>,
}

impl ManagedTask {
	/// Wrap `task` and register it with `manager`. The task doesn't run until [`ManagedTask::start`],
	/// and stays tracked by `manager` until it is started or canceled.
	pub fn new<E: RunError>(manager: &TaskManager, task: impl Task<E>) -> Result<Self, Error> {
		let name = task.name().to_string();
		let switch = manager.switchboard().tasks().clone();

		let this = Self {
			inner: Arc::new_cyclic(|weak| {
				let sender_id = switch.create_sender(ManagedTaskController {
					task: Weak::clone(weak),
				});

				trace!(task_id = %sender_id, %name, "Created managed task");

				Inner {
					sender_id,
					pending_run: Mutex::new(Some(into_boxed_run(task, name.clone()))),
					name,
					state: AtomicU8::new(TaskState::Created as u8),
					cancel_token: CancellationToken::new(),
					switch,
					manager: manager.downgrade(),
					outcome_tx: watch::Sender::new(None),
				}
			}),
		};

		manager.add_task(&this)?;

		Ok(this)
	}

	/// Spawn the work routine on the tokio runtime.
	///
	/// Starting a task that was canceled before it ever started is a no-op, cancellation already
	/// finished it.
	///
	/// # Panics
	///
	/// Must be called from within a tokio runtime.
	#[instrument(skip(self), fields(task_id = %self.inner.sender_id, name = %self.inner.name), err)]
	pub fn start(&self) -> Result<(), Error> {
		let handle = Handle::current();

		let Some(run) = self.inner.pending_run.lock().take() else {
			if self.is_cancelled() {
				trace!("Task was canceled before it started, nothing left to run");
				return Ok(());
			}

			return Err(Error::AlreadyStarted {
				task_id: self.inner.sender_id,
				name: self.inner.name.clone(),
			});
		};

		self.launch(run, &handle);

		Ok(())
	}

	/// Ask the task to stop. Cooperative: the work routine decides when to honor it.
	///
	/// A task that wasn't started yet is finished right away as canceled, without running its
	/// routine, so its manager stops tracking it.
	#[instrument(skip(self), fields(task_id = %self.inner.sender_id, name = %self.inner.name))]
	pub fn cancel_task(&self) {
		if self.inner.cancel_token.is_cancelled() {
			trace!("Task cancellation was already requested");
			return;
		}

		trace!(state = ?self.state(), "Requesting task cancellation");
		self.inner.cancel_token.cancel();

		// Without a runtime the run stays pending, a later `start` finishes it
		let Ok(handle) = Handle::try_current() else {
			trace!("No tokio runtime around, the task will finish once started");
			return;
		};

		let pending_run = self.inner.pending_run.lock().take();
		if let Some(run) = pending_run {
			trace!("Task was never started, finishing it as canceled");
			self.launch(run, &handle);
		}
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.inner.cancel_token.is_cancelled()
	}

	#[must_use]
	pub fn sender_id(&self) -> SenderId {
		self.inner.sender_id
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	#[must_use]
	pub fn state(&self) -> TaskState {
		TaskState::from_u8(self.inner.state.load(Ordering::Acquire))
	}

	/// Wait until the task is over and get its outcome.
	pub async fn wait(&self) -> TaskOutcome {
		let mut outcome_rx = self.inner.outcome_tx.subscribe();

		// The sender lives as long as `self`, so the wait can only end with an outcome
		outcome_rx
			.wait_for(Option::is_some)
			.await
			.ok()
			.and_then(|outcome| (*outcome).clone())
			.unwrap_or(TaskOutcome::Canceled)
	}

	fn launch(&self, run: BoxedRun, handle: &Handle) {
		self.inner
			.state
			.store(TaskState::Running as u8, Ordering::Release);

		let ctx = TaskContext {
			task_id: self.inner.sender_id,
			interrupter: Interrupter::new(self.inner.cancel_token.clone()),
			manager: self.inner.manager.clone(),
		};

		handle.spawn({
			let this = self.clone();

			async move {
				trace!("Task starting...");
				let outcome = run(ctx).await;
				this.finish(outcome);
			}
			.in_current_span()
		});
	}

	fn finish(&self, outcome: TaskOutcome) {
		let state = if outcome.is_canceled() {
			TaskState::Canceled
		} else {
			TaskState::Finished
		};

		self.inner.state.store(state as u8, Ordering::Release);

		trace!(?outcome, "Task finished");

		self.inner.switch.send(
			self.inner.sender_id,
			TaskFinishedMessage(TaskFinished {
				task_id: self.inner.sender_id,
				name: self.inner.name.clone(),
				outcome: outcome.clone(),
			}),
		);

		self.inner.outcome_tx.send_replace(Some(outcome));
	}
}

fn into_boxed_run<E: RunError>(mut task: impl Task<E>, name: String) -> BoxedRun {
	Box::new(move |ctx: TaskContext| {
		async move {
			let outcome = if ctx.is_cancelled() {
				trace!("Task was canceled before it started running");
				TaskOutcome::Canceled
			} else {
				match AssertUnwindSafe(task.run(&ctx)).catch_unwind().await {
					Ok(Ok(ExecStatus::Done)) => TaskOutcome::Done,
					Ok(Ok(ExecStatus::Canceled)) => TaskOutcome::Canceled,
					Ok(Err(e)) => {
						warn!(?e, "Task failed");
						TaskOutcome::Failed(Arc::new(e))
					}
					Err(_) => {
						error!("Task panicked");
						TaskOutcome::Failed(Arc::new(Error::TaskPanicked(name)))
					}
				}
			};

			if AssertUnwindSafe(task.on_finish(&outcome))
				.catch_unwind()
				.await
				.is_err()
			{
				error!("Task finish hook panicked");
			}

			outcome
		}
		.boxed()
	})
}

impl PartialEq for ManagedTask {
	fn eq(&self, other: &Self) -> bool {
		self.inner.sender_id == other.inner.sender_id
	}
}

impl Eq for ManagedTask {}

impl fmt::Debug for ManagedTask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ManagedTask")
			.field("sender_id", &self.inner.sender_id)
			.field("name", &self.inner.name)
			.field("state", &self.state())
			.field("is_cancelled", &self.is_cancelled())
			.finish()
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		trace!(task_id = %self.sender_id, name = %self.name, "Dropping managed task");
		self.switch.close_sender(self.sender_id);
	}
}
