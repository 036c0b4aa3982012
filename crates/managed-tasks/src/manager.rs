use std::{
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Weak,
	},
};

use bc_message_switch::{Message, MessageSwitch, SenderId, Subscription};
use parking_lot::Mutex;
use tracing::{instrument, trace};

use super::{
	error::{Error, RunError},
	progress::{Progress, TaskProgress},
	task::{ManagedTask, ManagedTaskListener, Task, TaskFinished, TaskSwitch},
};

/// The switch managers report aggregated progress, user messages and task endings through.
pub type ManagerSwitch = MessageSwitch<dyn TaskManagerListener, TaskManagerController>;

/// The pair of switches shared by every manager and task of an application.
#[derive(Debug, Clone)]
pub struct Switchboard {
	tasks: TaskSwitch,
	managers: ManagerSwitch,
}

impl Switchboard {
	/// # Panics
	///
	/// Must be called from within a tokio runtime, as each switch spawns its delivery loop.
	#[must_use]
	pub fn new() -> Self {
		Self {
			tasks: TaskSwitch::new(),
			managers: ManagerSwitch::new(),
		}
	}

	#[must_use]
	pub const fn tasks(&self) -> &TaskSwitch {
		&self.tasks
	}

	#[must_use]
	pub const fn managers(&self) -> &ManagerSwitch {
		&self.managers
	}

	/// Wait for every pending message to be delivered, task messages first as handling them
	/// makes managers send their own.
	pub async fn flush(&self) -> Result<(), Error> {
		self.tasks.flush().await?;
		self.managers.flush().await?;

		Ok(())
	}
}

impl Default for Switchboard {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
	/// Prepended to each task's text when more than one task is active.
	pub task_line_prefix: String,
}

impl Default for TaskManagerConfig {
	fn default() -> Self {
		Self {
			task_line_prefix: " - ".to_string(),
		}
	}
}

/// Observer of a [`TaskManager`], typically whatever UI currently displays its progress.
pub trait TaskManagerListener: Send + Sync {
	fn on_progress(&self, progress: &Progress);

	fn on_user_message(&self, _message: &str) {}

	fn on_task_finished(&self, _manager_id: SenderId, _finished: &TaskFinished) {}
}

#[derive(Debug)]
pub(crate) struct ProgressMessage(Progress);

impl Message<dyn TaskManagerListener> for ProgressMessage {
	fn deliver(&self, listener: &dyn TaskManagerListener) -> bool {
		listener.on_progress(&self.0);
		false
	}
}

#[derive(Debug)]
pub(crate) struct UserMessage(String);

impl Message<dyn TaskManagerListener> for UserMessage {
	fn deliver(&self, listener: &dyn TaskManagerListener) -> bool {
		listener.on_user_message(&self.0);
		false
	}
}

#[derive(Debug)]
pub(crate) struct TaskEndedMessage {
	manager_id: SenderId,
	finished: TaskFinished,
}

impl Message<dyn TaskManagerListener> for TaskEndedMessage {
	fn deliver(&self, listener: &dyn TaskManagerListener) -> bool {
		listener.on_task_finished(self.manager_id, &self.finished);
		false
	}
}

/// Controller registered with the [`ManagerSwitch`] for each manager.
#[derive(Debug, Clone)]
pub struct TaskManagerController {
	manager: Weak<Inner>,
}

impl TaskManagerController {
	/// Cancel every task of the manager, which keeps accepting new ones.
	pub fn request_abort(&self) {
		if let Some(manager) = self.task_manager() {
			manager.cancel_all_tasks();
		}
	}

	#[must_use]
	pub fn task_manager(&self) -> Option<TaskManager> {
		self.manager.upgrade().map(|inner| TaskManager { inner })
	}
}

/// Owns the [`ManagedTask`]s started on behalf of one UI owner and merges their progress.
#[derive(Clone)]
pub struct TaskManager {
	inner: Arc<Inner>,
}

struct Inner {
	sender_id: SenderId,
	switchboard: Switchboard,
	config: TaskManagerConfig,
	tasks: Mutex<Vec<TaskInfo>>,
	header: Mutex<Option<String>>,
	is_cancelling: AtomicBool,
	is_closing: AtomicBool,
	task_listener: Arc<dyn ManagedTaskListener>,
}

struct TaskInfo {
	task: ManagedTask,
	progress: TaskProgress,
	_subscription: Subscription,
}

/// Forwards the finish message of our tasks without keeping the manager alive.
struct FinishedTaskRelay {
	manager: Weak<Inner>,
}

impl ManagedTaskListener for FinishedTaskRelay {
	fn on_task_finished(&self, finished: &TaskFinished) {
		if let Some(inner) = self.manager.upgrade() {
			TaskManager { inner }.on_task_finished(finished);
		}
	}
}

#[derive(Debug, Clone)]
pub(crate) struct WeakTaskManager(Weak<Inner>);

impl WeakTaskManager {
	pub(crate) fn upgrade(&self) -> Option<TaskManager> {
		self.0.upgrade().map(|inner| TaskManager { inner })
	}
}

impl TaskManager {
	#[must_use]
	pub fn new(switchboard: &Switchboard) -> Self {
		Self::with_config(switchboard, TaskManagerConfig::default())
	}

	#[must_use]
	pub fn with_config(switchboard: &Switchboard, config: TaskManagerConfig) -> Self {
		let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
			let sender_id = switchboard
				.managers()
				.create_sender(TaskManagerController {
					manager: Weak::clone(weak),
				});

			trace!(manager_id = %sender_id, "Created task manager");

			Inner {
				sender_id,
				switchboard: switchboard.clone(),
				config,
				tasks: Mutex::default(),
				header: Mutex::default(),
				is_cancelling: AtomicBool::new(false),
				is_closing: AtomicBool::new(false),
				task_listener: Arc::new(FinishedTaskRelay {
					manager: Weak::clone(weak),
				}),
			}
		});

		Self { inner }
	}

	/// Sender id of this manager on the [`ManagerSwitch`].
	#[must_use]
	pub fn id(&self) -> SenderId {
		self.inner.sender_id
	}

	#[must_use]
	pub fn switchboard(&self) -> &Switchboard {
		&self.inner.switchboard
	}

	pub(crate) fn downgrade(&self) -> WeakTaskManager {
		WeakTaskManager(Arc::downgrade(&self.inner))
	}

	/// Start observing this manager, see [`MessageSwitch::add_listener`].
	pub fn add_listener(
		&self,
		listener: Arc<dyn TaskManagerListener>,
		deliver_last: bool,
	) -> Subscription {
		self.inner
			.switchboard
			.managers()
			.add_listener(self.inner.sender_id, listener, deliver_last)
	}

	/// Track `task`, ignoring tasks already tracked.
	#[instrument(
		skip_all,
		fields(manager_id = %self.inner.sender_id, task_id = %task.sender_id()),
		err,
	)]
	pub fn add_task(&self, task: &ManagedTask) -> Result<(), Error> {
		// Checked under the lock, closing sets the flag and cancels tasks while holding it
		let mut tasks = self.inner.tasks.lock();

		if self.is_closing() {
			return Err(Error::ManagerClosing(self.inner.sender_id));
		}

		self.inner.is_cancelling.store(false, Ordering::Release);

		if tasks.iter().any(|info| info.task == *task) {
			trace!("Task is already managed");
			return Ok(());
		}

		// With replay, so a task that finished before we got here is still accounted for
		let subscription = self.inner.switchboard.tasks().add_listener(
			task.sender_id(),
			Arc::clone(&self.inner.task_listener),
			true,
		);

		tasks.push(TaskInfo {
			task: task.clone(),
			progress: TaskProgress::default(),
			_subscription: subscription,
		});

		trace!(total_tasks = tasks.len(), "Task added");

		Ok(())
	}

	/// Create a [`ManagedTask`] for `task`, track it and start it.
	pub fn spawn<E: RunError>(&self, task: impl Task<E>) -> Result<ManagedTask, Error> {
		let task = ManagedTask::new(self, task)?;
		task.start()?;

		Ok(task)
	}

	/// Set the text shown above the tasks' own texts, `None` clears it.
	pub fn send_header_progress(&self, header: Option<String>) {
		*self.inner.header.lock() = header;
		self.broadcast_progress();
	}

	pub fn send_task_progress(&self, task_id: SenderId, message: Option<String>, count: u64) {
		self.update_task_progress(task_id, |progress| {
			progress.message = message;
			progress.current = count;
		});
	}

	pub fn set_max_progress(&self, task_id: SenderId, max: u64) {
		self.update_task_progress(task_id, |progress| progress.max = max);
	}

	pub fn set_progress_count(&self, task_id: SenderId, count: u64) {
		self.update_task_progress(task_id, |progress| progress.current = count);
	}

	pub fn send_user_message(&self, message: impl Into<String>) {
		self.inner
			.switchboard
			.managers()
			.send(self.inner.sender_id, UserMessage(message.into()));
	}

	/// Current aggregate of every tracked task.
	#[must_use]
	pub fn progress(&self) -> Progress {
		let header = self.inner.header.lock().clone();
		let tasks = self.inner.tasks.lock();

		Progress::aggregate(
			header.as_deref(),
			&tasks.iter().map(|info| &info.progress).collect::<Vec<_>>(),
			&self.inner.config.task_line_prefix,
		)
	}

	/// Request cancellation of every tracked task; new tasks are still accepted.
	pub fn cancel_all_tasks(&self) {
		self.cancel_tasks(false);
	}

	/// Cancel every tracked task and refuse any new one from now on.
	pub fn cancel_all_tasks_and_stop_listening(&self) {
		self.cancel_tasks(true);
	}

	/// Set by a cancel request, reset when a task is added.
	#[must_use]
	pub fn is_cancelling(&self) -> bool {
		self.inner.is_cancelling.load(Ordering::Acquire)
	}

	#[must_use]
	pub fn is_closing(&self) -> bool {
		self.inner.is_closing.load(Ordering::Acquire)
	}

	#[must_use]
	pub fn task_count(&self) -> usize {
		self.inner.tasks.lock().len()
	}

	#[must_use]
	pub fn tasks(&self) -> Vec<ManagedTask> {
		self.inner
			.tasks
			.lock()
			.iter()
			.map(|info| info.task.clone())
			.collect()
	}

	#[instrument(skip(self), fields(manager_id = %self.inner.sender_id))]
	fn cancel_tasks(&self, stop_listening: bool) {
		let tasks = self.inner.tasks.lock();

		if stop_listening {
			self.inner.is_closing.store(true, Ordering::Release);
		}
		self.inner.is_cancelling.store(true, Ordering::Release);

		trace!(total_tasks = tasks.len(), "Cancelling all tasks");

		for info in tasks.iter() {
			info.task.cancel_task();
		}
	}

	fn update_task_progress(&self, task_id: SenderId, update: impl FnOnce(&mut TaskProgress)) {
		let found = {
			let mut tasks = self.inner.tasks.lock();

			if let Some(info) = tasks.iter_mut().find(|info| info.task.sender_id() == task_id) {
				update(&mut info.progress);
				true
			} else {
				false
			}
		};

		if found {
			self.broadcast_progress();
		} else {
			trace!(%task_id, "Ignoring progress of a task this manager doesn't track");
		}
	}

	fn broadcast_progress(&self) {
		let progress = self.progress();

		trace!(
			manager_id = %self.inner.sender_id,
			count = progress.count,
			max = progress.max,
			"Broadcasting progress",
		);

		self.inner
			.switchboard
			.managers()
			.send(self.inner.sender_id, ProgressMessage(progress));
	}

	#[instrument(skip_all, fields(manager_id = %self.inner.sender_id, task_id = %finished.task_id))]
	fn on_task_finished(&self, finished: &TaskFinished) {
		let removed = {
			let mut tasks = self.inner.tasks.lock();

			let removed = tasks
				.iter()
				.position(|info| info.task.sender_id() == finished.task_id)
				.map(|idx| tasks.remove(idx));

			for info in tasks.iter() {
				trace!(task_id = %info.task.sender_id(), name = %info.task.name(), "Task still running");
			}

			removed
		};

		// Dropped out of the lock, it may be the last handle of the task
		let Some(removed) = removed else {
			trace!("Finished task isn't tracked by this manager anymore");
			return;
		};
		drop(removed);

		trace!(outcome = ?finished.outcome, "Task ended");

		self.inner.switchboard.managers().send(
			self.inner.sender_id,
			TaskEndedMessage {
				manager_id: self.inner.sender_id,
				finished: finished.clone(),
			},
		);

		self.broadcast_progress();
	}
}

impl fmt::Debug for TaskManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskManager")
			.field("sender_id", &self.inner.sender_id)
			.field("tasks", &self.tasks())
			.field("header", &*self.inner.header.lock())
			.field("is_cancelling", &self.is_cancelling())
			.field("is_closing", &self.is_closing())
			.finish_non_exhaustive()
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		let tasks = std::mem::take(self.tasks.get_mut());

		trace!(
			manager_id = %self.sender_id,
			remaining_tasks = tasks.len(),
			"Dropping task manager, cancelling remaining tasks",
		);

		for info in &tasks {
			info.task.cancel_task();
		}

		self.switchboard.managers().close_sender(self.sender_id);
	}
}
