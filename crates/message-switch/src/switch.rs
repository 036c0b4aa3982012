use std::{
	collections::HashMap,
	fmt,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Weak,
	},
};

use async_channel as chan;
use parking_lot::Mutex;
use tokio::{spawn, sync::oneshot};
use tracing::{error, instrument, trace, Instrument};

use super::{
	error::Error,
	listeners::{ListenerEntry, ListenerId, ListenerQueue, Subscription},
	message::{Message, RoutingSlip, SharedMessage},
};

/// Seeded above zero so low ids stay free for well known senders.
static SENDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1024);

/// Opaque handle naming one message source. Unique for the whole process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId(u64);

impl SenderId {
	fn next() -> Self {
		Self(SENDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
	}

	#[must_use]
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for SenderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Switchboard between message sources and the listeners interested in them.
///
/// `L` is the listener type, usually a `dyn Trait` with one callback per message kind, and `C` is
/// the controller object a sender registers so listeners can reach back to it.
///
/// Producers never wait on delivery: [`MessageSwitch::send`] only enqueues a routing slip. A single
/// delivery loop, spawned on the tokio runtime when the switch is created, drains the slips in
/// order and invokes the listeners. Each sender queue remembers its last message so a listener
/// that subscribes late can catch up on the current state.
pub struct MessageSwitch<L: ?Sized + 'static, C> {
	inner: Arc<Inner<L, C>>,
}

struct Inner<L: ?Sized + 'static, C> {
	senders: Mutex<HashMap<SenderId, C>>,
	queues: Mutex<HashMap<SenderId, ListenerQueue<L>>>,
	slips_tx: chan::Sender<RoutingSlip<L>>,
}

impl<L, C> MessageSwitch<L, C>
where
	L: ?Sized + Send + Sync + 'static,
	C: Clone + Send + Sync + 'static,
{
	/// Create a new switch and spawn its delivery loop.
	///
	/// # Panics
	///
	/// Must be called from within a tokio runtime.
	#[must_use]
	pub fn new() -> Self {
		let (slips_tx, slips_rx) = chan::unbounded();

		let inner = Arc::new(Inner {
			senders: Mutex::default(),
			queues: Mutex::default(),
			slips_tx,
		});

		spawn({
			let inner = Arc::downgrade(&inner);

			async move {
				trace!("Message switch delivery loop starting...");
				while let Err(e) =
					spawn(Inner::run(Weak::clone(&inner), slips_rx.clone()).in_current_span()).await
				{
					if e.is_panic() {
						error!(?e, "Message switch delivery loop critically failed and will restart;");
					} else {
						trace!("Message switch delivery loop was cancelled");
						break;
					}
				}
				trace!("Message switch delivery loop stopped");
			}
			.in_current_span()
		});

		Self { inner }
	}

	/// Register a new message source and its controller, returning the id to send and listen with.
	#[instrument(skip_all)]
	pub fn create_sender(&self, controller: C) -> SenderId {
		let sender_id = SenderId::next();

		self.inner.senders.lock().insert(sender_id, controller);

		trace!(%sender_id, "Created message sender");

		sender_id
	}

	/// Add `listener` to the queue of `sender_id`.
	///
	/// With `deliver_last`, the last message sent by that sender, if it is still a replay candidate,
	/// is delivered to this listener by the delivery loop. The replay is dropped if a newer message
	/// reaches the listener first.
	#[instrument(skip(self, listener))]
	pub fn add_listener(
		&self,
		sender_id: SenderId,
		listener: Arc<L>,
		deliver_last: bool,
	) -> Subscription {
		let (listener_id, active, last_message) = {
			let mut queues = self.inner.queues.lock();
			let Some(queue) = self.inner.registered_queue(&mut queues, sender_id) else {
				trace!("Sender is closed, listener won't receive anything");
				return Subscription::inactive(sender_id);
			};
			let (listener_id, active) = queue.add(listener);

			(
				listener_id,
				active,
				deliver_last.then(|| queue.last_message()).flatten(),
			)
		};

		trace!(%listener_id, "Added listener");

		if let Some(message) = last_message {
			trace!(%listener_id, ?message, "Scheduling replay of last message");
			self.inner.enqueue(RoutingSlip::Replay {
				destination: sender_id,
				listener_id,
				message,
			});
		}

		Subscription::new(sender_id, listener_id, active)
	}

	/// Remove a listener from the queue of `sender_id`, returning whether it was registered.
	///
	/// Slips already enqueued but not yet delivered will skip it.
	#[instrument(skip(self))]
	pub fn remove_listener(&self, sender_id: SenderId, listener_id: ListenerId) -> bool {
		let removed = self
			.inner
			.queues
			.lock()
			.get_mut(&sender_id)
			.is_some_and(|queue| queue.remove(listener_id));

		if removed {
			trace!("Removed listener");
		}

		removed
	}

	/// Enqueue `message` for delivery to every current listener of `sender_id`.
	pub fn send(&self, sender_id: SenderId, message: impl Message<L>) {
		let message: SharedMessage<L> = Arc::new(message);

		trace!(%sender_id, ?message, "Sending message");

		self.inner.enqueue(RoutingSlip::Deliver {
			destination: sender_id,
			message,
		});
	}

	#[must_use]
	pub fn get_controller(&self, sender_id: SenderId) -> Option<C> {
		self.inner.senders.lock().get(&sender_id).cloned()
	}

	/// Forget a sender, its listeners and its last message, returning its controller.
	///
	/// Slips still pending for this sender are discarded by the delivery loop.
	#[instrument(skip(self))]
	pub fn close_sender(&self, sender_id: SenderId) -> Option<C> {
		// Unregistered first, so the delivery loop can't bring the queue back to life
		let controller = self.inner.senders.lock().remove(&sender_id);

		if let Some(mut queue) = self.inner.queues.lock().remove(&sender_id) {
			queue.close();
		}

		trace!(had_controller = controller.is_some(), "Closed message sender");

		controller
	}

	/// Number of live listeners of `sender_id`.
	#[must_use]
	pub fn listener_count(&self, sender_id: SenderId) -> usize {
		self.inner
			.queues
			.lock()
			.get_mut(&sender_id)
			.map_or(0, ListenerQueue::len)
	}

	/// Wait until every slip enqueued before this call has been delivered.
	pub async fn flush(&self) -> Result<(), Error> {
		let (tx, rx) = oneshot::channel();

		if !self.inner.enqueue(RoutingSlip::Flush(tx)) {
			return Err(Error::DeliveryLoopStopped);
		}

		rx.await.map_err(|_| Error::DeliveryLoopStopped)
	}
}

impl<L, C> Default for MessageSwitch<L, C>
where
	L: ?Sized + Send + Sync + 'static,
	C: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<L: ?Sized + 'static, C> Clone for MessageSwitch<L, C> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<L: ?Sized + 'static, C> fmt::Debug for MessageSwitch<L, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let senders = self.inner.senders.lock().len();
		let queues = self.inner.queues.lock().len();

		f.debug_struct("MessageSwitch")
			.field("senders", &senders)
			.field("queues", &queues)
			.field("pending_slips", &self.inner.slips_tx.len())
			.finish()
	}
}

impl<L: ?Sized + 'static, C> Inner<L, C> {
	async fn run(this: Weak<Self>, slips_rx: chan::Receiver<RoutingSlip<L>>) {
		while let Ok(slip) = slips_rx.recv().await {
			let Some(this) = this.upgrade() else {
				trace!("Message switch was dropped, discarding pending routing slips");
				break;
			};

			this.route(slip);
		}
	}

	fn enqueue(&self, slip: RoutingSlip<L>) -> bool {
		if self.slips_tx.try_send(slip).is_err() {
			error!("Message switch delivery loop is gone, dropping routing slip");
			false
		} else {
			true
		}
	}

	fn route(&self, slip: RoutingSlip<L>) {
		match slip {
			RoutingSlip::Deliver {
				destination,
				message,
			} => self.deliver(destination, &message),

			RoutingSlip::Replay {
				destination,
				listener_id,
				message,
			} => self.replay(destination, listener_id, &message),

			RoutingSlip::Flush(ack) => {
				if ack.send(()).is_err() {
					trace!("Flush requester went away before the ack");
				}
			}
		}
	}

	/// Queue of `sender_id`, created on demand, as long as the sender is still registered.
	///
	/// Lock order is `queues` then `senders`, callers must hold the `queues` lock.
	fn registered_queue<'q>(
		&self,
		queues: &'q mut HashMap<SenderId, ListenerQueue<L>>,
		sender_id: SenderId,
	) -> Option<&'q mut ListenerQueue<L>> {
		if self.senders.lock().contains_key(&sender_id) {
			Some(queues.entry(sender_id).or_default())
		} else {
			None
		}
	}

	fn deliver(&self, destination: SenderId, message: &SharedMessage<L>) {
		let listeners = {
			let mut queues = self.queues.lock();
			let Some(queue) = self.registered_queue(&mut queues, destination) else {
				trace!(%destination, ?message, "Sender was closed, discarding message");
				return;
			};
			queue.set_last_message(Arc::clone(message));
			queue.snapshot()
		};

		// Listeners deactivated after the snapshot was taken are still skipped
		if let Some(entry) = listeners
			.iter()
			.filter(|entry| entry.is_active())
			.find(|entry| deliver_to(destination, entry, message.as_ref()))
		{
			trace!(
				%destination,
				listener_id = %entry.id,
				?message,
				"Message handled terminally, it won't reach other listeners or be replayed",
			);

			self.clear_last_message_if(destination, message);
		}
	}

	fn replay(&self, destination: SenderId, listener_id: ListenerId, message: &SharedMessage<L>) {
		let entry = {
			let mut queues = self.queues.lock();
			let Some(queue) = queues.get_mut(&destination) else {
				trace!(%destination, "Sender closed before replay");
				return;
			};

			if !queue.is_last_message(message) {
				trace!(
					%destination,
					%listener_id,
					"Replay superseded by a newer message or claimed by another listener",
				);
				return;
			}

			queue.get(listener_id)
		};

		let Some(entry) = entry else {
			trace!(%destination, %listener_id, "Listener went away before replay");
			return;
		};

		if deliver_to(destination, &entry, message.as_ref()) {
			self.clear_last_message_if(destination, message);
		}
	}

	fn clear_last_message_if(&self, destination: SenderId, message: &SharedMessage<L>) {
		if let Some(queue) = self.queues.lock().get_mut(&destination) {
			queue.clear_last_message_if(message);
		}
	}
}

fn deliver_to<L: ?Sized + 'static>(
	destination: SenderId,
	entry: &ListenerEntry<L>,
	message: &dyn Message<L>,
) -> bool {
	catch_unwind(AssertUnwindSafe(|| message.deliver(entry.listener.as_ref()))).unwrap_or_else(
		|_| {
			error!(
				%destination,
				listener_id = %entry.id,
				?message,
				"Listener panicked while a message was delivered to it",
			);
			false
		},
	)
}
