use std::{fmt, sync::Arc};

use tokio::sync::oneshot;

use super::{listeners::ListenerId, switch::SenderId};

/// A payload that knows how to hand itself over to one listener.
///
/// Messages are shared between every listener of a sender and may be kept by the switch to be
/// replayed to listeners that subscribe later, so they are delivered by reference.
pub trait Message<L: ?Sized>: fmt::Debug + Send + Sync + 'static {
	/// Deliver this message to `listener`.
	///
	/// Returning `true` means the listener handled the message terminally: the remaining listeners
	/// of the same sender will not receive it and it will not be replayed to late subscribers.
	fn deliver(&self, listener: &L) -> bool;
}

pub(crate) type SharedMessage<L> = Arc<dyn Message<L>>;

/// Work item processed by the delivery loop, in the exact order it was enqueued.
pub(crate) enum RoutingSlip<L: ?Sized + 'static> {
	Deliver {
		destination: SenderId,
		message: SharedMessage<L>,
	},
	Replay {
		destination: SenderId,
		listener_id: ListenerId,
		message: SharedMessage<L>,
	},
	Flush(oneshot::Sender<()>),
}
