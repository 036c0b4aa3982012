#![allow(dead_code)]

use bc_managed_tasks::{
	ExecStatus, Progress, SenderId, Task, TaskContext, TaskFinished, TaskManagerListener,
	TaskOutcome,
};

use std::{
	future::IntoFuture,
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("sample error")]
	SampleError,
}

#[derive(Debug, Default)]
pub struct ReadyTask;

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn name(&self) -> &str {
		"ready"
	}

	async fn run(&mut self, _ctx: &TaskContext) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done)
	}
}

#[derive(Debug, Default)]
pub struct BogusTask;

#[async_trait]
impl Task<SampleError> for BogusTask {
	fn name(&self) -> &str {
		"bogus"
	}

	async fn run(&mut self, _ctx: &TaskContext) -> Result<ExecStatus, SampleError> {
		Err(SampleError::SampleError)
	}
}

#[derive(Debug, Default)]
pub struct BrokenTask;

#[async_trait]
impl Task<SampleError> for BrokenTask {
	fn name(&self) -> &str {
		"broken"
	}

	async fn run(&mut self, _ctx: &TaskContext) -> Result<ExecStatus, SampleError> {
		panic!("broken task");
	}
}

/// Waits until canceled, marking whether its routine ever ran.
#[derive(Debug, Default)]
pub struct NeverTask {
	pub has_run: Arc<AtomicBool>,
}

#[async_trait]
impl Task<SampleError> for NeverTask {
	fn name(&self) -> &str {
		"never"
	}

	async fn run(&mut self, ctx: &TaskContext) -> Result<ExecStatus, SampleError> {
		self.has_run.store(true, Ordering::Release);

		ctx.interrupter().await;

		info!("Canceling NeverTask <id='{}'>", ctx.task_id());
		Ok(ExecStatus::Canceled)
	}
}

/// Reports its progress, signals it began, then waits to be released or canceled.
#[derive(Debug)]
pub struct ProgressTask {
	name: String,
	count: u64,
	max: u64,
	began_tx: Option<oneshot::Sender<()>>,
	release_rx: Option<oneshot::Receiver<()>>,
}

impl ProgressTask {
	pub fn new(
		name: &str,
		count: u64,
		max: u64,
	) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
		let (began_tx, began_rx) = oneshot::channel();
		let (release_tx, release_rx) = oneshot::channel();

		(
			Self {
				name: name.to_string(),
				count,
				max,
				began_tx: Some(began_tx),
				release_rx: Some(release_rx),
			},
			began_rx,
			release_tx,
		)
	}
}

#[async_trait]
impl Task<SampleError> for ProgressTask {
	fn name(&self) -> &str {
		&self.name
	}

	async fn run(&mut self, ctx: &TaskContext) -> Result<ExecStatus, SampleError> {
		ctx.set_max_progress(self.max);
		ctx.report_progress(Some(format!("{} working", self.name)), self.count);

		if let Some(began_tx) = self.began_tx.take() {
			began_tx.send(()).ok();
		}

		let Some(release_rx) = self.release_rx.take() else {
			return Ok(ExecStatus::Done);
		};

		tokio::select! {
			_ = release_rx => Ok(ExecStatus::Done),
			() = ctx.interrupter().into_future() => Ok(ExecStatus::Canceled),
		}
	}
}

/// Records every call of its finish hook.
#[derive(Debug, Default)]
pub struct HookTask {
	pub finished: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Task<SampleError> for HookTask {
	fn name(&self) -> &str {
		"hook"
	}

	async fn run(&mut self, ctx: &TaskContext) -> Result<ExecStatus, SampleError> {
		ctx.user_message("hook task says hi");
		Ok(ExecStatus::Done)
	}

	async fn on_finish(&mut self, outcome: &TaskOutcome) {
		self.finished.lock().push(format!("{outcome:?}"));
	}
}

#[derive(Debug, Default)]
pub struct ManagerRecorder {
	pub progress: Mutex<Vec<Progress>>,
	pub user_messages: Mutex<Vec<String>>,
	pub finished: Mutex<Vec<(SenderId, String, bool)>>,
	pub calls: AtomicUsize,
}

impl ManagerRecorder {
	pub fn last_progress(&self) -> Option<Progress> {
		self.progress.lock().last().cloned()
	}
}

impl TaskManagerListener for ManagerRecorder {
	fn on_progress(&self, progress: &Progress) {
		self.calls.fetch_add(1, Ordering::Relaxed);
		self.progress.lock().push(progress.clone());
	}

	fn on_user_message(&self, message: &str) {
		self.calls.fetch_add(1, Ordering::Relaxed);
		self.user_messages.lock().push(message.to_string());
	}

	fn on_task_finished(&self, manager_id: SenderId, finished: &TaskFinished) {
		self.calls.fetch_add(1, Ordering::Relaxed);
		self.finished.lock().push((
			manager_id,
			finished.name.clone(),
			finished.outcome.is_done(),
		));
	}
}
