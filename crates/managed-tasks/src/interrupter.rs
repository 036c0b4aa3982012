use std::future::IntoFuture;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Lets a task's work routine notice cancellation requests at points where stopping is safe.
///
/// Cancellation is cooperative: nothing is aborted, the routine is expected to check
/// [`Interrupter::is_cancelled`] (or use [`check_interruption!`](crate::check_interruption)) and
/// return [`ExecStatus::Canceled`](crate::ExecStatus::Canceled).
#[derive(Debug, Clone)]
pub struct Interrupter {
	token: CancellationToken,
}

impl Interrupter {
	pub(crate) const fn new(token: CancellationToken) -> Self {
		Self { token }
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}
}

/// `(&interrupter).await` completes once the task gets cancelled, handy to race long waits.
impl<'token> IntoFuture for &'token Interrupter {
	type Output = ();

	type IntoFuture = WaitForCancellationFuture<'token>;

	fn into_future(self) -> Self::IntoFuture {
		self.token.cancelled()
	}
}

#[macro_export]
macro_rules! check_interruption {
	($interrupter:expr) => {
		if $crate::Interrupter::is_cancelled($interrupter) {
			$crate::__tracing::trace!("Task was canceled by the user");
			return Ok($crate::ExecStatus::Canceled);
		}
	};
}
