use std::{
	fmt,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
};

use tracing::trace;

use super::{message::SharedMessage, switch::SenderId};

static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifies one registration of a listener on a sender queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
	fn next() -> Self {
		Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
	}
}

impl fmt::Display for ListenerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

pub(crate) struct ListenerEntry<L: ?Sized> {
	pub(crate) id: ListenerId,
	pub(crate) listener: Arc<L>,
	active: Arc<AtomicBool>,
}

impl<L: ?Sized> Clone for ListenerEntry<L> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			listener: Arc::clone(&self.listener),
			active: Arc::clone(&self.active),
		}
	}
}

impl<L: ?Sized> ListenerEntry<L> {
	#[inline]
	pub(crate) fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}
}

/// Listeners registered against one sender, plus the message kept for late subscribers.
pub(crate) struct ListenerQueue<L: ?Sized + 'static> {
	entries: Vec<ListenerEntry<L>>,
	last_message: Option<SharedMessage<L>>,
}

impl<L: ?Sized + 'static> Default for ListenerQueue<L> {
	fn default() -> Self {
		Self {
			entries: Vec::new(),
			last_message: None,
		}
	}
}

impl<L: ?Sized + 'static> ListenerQueue<L> {
	pub(crate) fn add(&mut self, listener: Arc<L>) -> (ListenerId, Arc<AtomicBool>) {
		self.prune();

		let id = ListenerId::next();
		let active = Arc::new(AtomicBool::new(true));

		self.entries.push(ListenerEntry {
			id,
			listener,
			active: Arc::clone(&active),
		});

		(id, active)
	}

	pub(crate) fn remove(&mut self, listener_id: ListenerId) -> bool {
		let mut found = false;

		self.entries.retain(|entry| {
			if entry.id == listener_id {
				entry.active.store(false, Ordering::Release);
				found = true;
				false
			} else {
				entry.is_active()
			}
		});

		found
	}

	/// Copy of the live listeners, in registration order. Callers iterate over the copy without
	/// holding the registry lock, so listeners can (un)subscribe from inside their callbacks.
	pub(crate) fn snapshot(&mut self) -> Vec<ListenerEntry<L>> {
		self.prune();
		self.entries.clone()
	}

	pub(crate) fn get(&mut self, listener_id: ListenerId) -> Option<ListenerEntry<L>> {
		self.prune();
		self.entries
			.iter()
			.find(|entry| entry.id == listener_id)
			.cloned()
	}

	pub(crate) fn len(&mut self) -> usize {
		self.prune();
		self.entries.len()
	}

	pub(crate) fn last_message(&self) -> Option<SharedMessage<L>> {
		self.last_message.clone()
	}

	pub(crate) fn set_last_message(&mut self, message: SharedMessage<L>) {
		self.last_message = Some(message);
	}

	pub(crate) fn is_last_message(&self, message: &SharedMessage<L>) -> bool {
		self.last_message
			.as_ref()
			.is_some_and(|last| Arc::ptr_eq(last, message))
	}

	/// Only clears the candidate if nothing newer replaced it in the meantime.
	pub(crate) fn clear_last_message_if(&mut self, message: &SharedMessage<L>) {
		if self.is_last_message(message) {
			self.last_message = None;
		}
	}

	pub(crate) fn close(&mut self) {
		for entry in self.entries.drain(..) {
			entry.active.store(false, Ordering::Release);
		}
		self.last_message = None;
	}

	fn prune(&mut self) {
		let before = self.entries.len();

		self.entries.retain(ListenerEntry::is_active);

		let pruned = before - self.entries.len();
		if pruned > 0 {
			trace!(%pruned, "Pruned inactive listeners");
		}
	}
}

/// Handle to a listener registration.
///
/// The listener keeps receiving messages for as long as this handle lives. Dropping it (or calling
/// [`Subscription::unsubscribe`]) deactivates the listener immediately; the registry entry itself is
/// pruned the next time its queue is touched.
#[must_use = "dropping a `Subscription` stops delivering messages to its listener"]
#[derive(Debug)]
pub struct Subscription {
	sender_id: SenderId,
	listener_id: ListenerId,
	active: Option<Arc<AtomicBool>>,
}

impl Subscription {
	pub(crate) const fn new(
		sender_id: SenderId,
		listener_id: ListenerId,
		active: Arc<AtomicBool>,
	) -> Self {
		Self {
			sender_id,
			listener_id,
			active: Some(active),
		}
	}

	/// Handle for a listener that was never registered, its sender being closed.
	pub(crate) fn inactive(sender_id: SenderId) -> Self {
		Self {
			sender_id,
			listener_id: ListenerId::next(),
			active: None,
		}
	}

	#[must_use]
	pub const fn sender_id(&self) -> SenderId {
		self.sender_id
	}

	#[must_use]
	pub const fn listener_id(&self) -> ListenerId {
		self.listener_id
	}

	/// Whether the listener is still registered; `false` once it was removed from the switch or
	/// its sender was closed.
	#[must_use]
	pub fn is_active(&self) -> bool {
		self.active
			.as_ref()
			.is_some_and(|active| active.load(Ordering::Acquire))
	}

	pub fn unsubscribe(self) {
		drop(self);
	}

	/// Give up the handle but keep the listener registered, it will only go away through
	/// [`MessageSwitch::remove_listener`](crate::MessageSwitch::remove_listener) or
	/// [`MessageSwitch::close_sender`](crate::MessageSwitch::close_sender).
	pub fn detach(mut self) {
		self.active = None;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(active) = self.active.take() {
			trace!(sender_id = %self.sender_id, listener_id = %self.listener_id, "Unsubscribing listener");
			active.store(false, Ordering::Release);
		}
	}
}
