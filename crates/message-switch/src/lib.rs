//!
//! # Message Switch
//!
//! A switchboard that decouples message producers, usually background tasks, from the listeners
//! observing them. Listeners may come and go while a producer is running: every sender queue
//! keeps its last message, so whichever listener currently exists can catch up on the latest
//! state as soon as it subscribes.
//!
//! - Senders get a process-wide unique [`SenderId`] and register a controller object listeners can
//!   fetch with [`MessageSwitch::get_controller`];
//! - [`MessageSwitch::send`] never blocks, it just enqueues a routing slip;
//! - A single delivery loop processes slips strictly in enqueue order;
//! - A listener panicking while handling a message doesn't prevent the others from receiving it;
//! - Subscriptions are owned handles, dropping one stops delivery to its listener.
//!
//! ## Basic example
//!
//! ```
//! use std::sync::{
//!     atomic::{AtomicUsize, Ordering},
//!     Arc,
//! };
//!
//! use bc_message_switch::{Message, MessageSwitch};
//!
//! trait CountListener: Send + Sync {
//!     fn on_count(&self, count: usize);
//! }
//!
//! #[derive(Debug)]
//! struct CountMessage(usize);
//!
//! impl Message<dyn CountListener> for CountMessage {
//!     fn deliver(&self, listener: &dyn CountListener) -> bool {
//!         listener.on_count(self.0);
//!         false
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Total(AtomicUsize);
//!
//! impl CountListener for Total {
//!     fn on_count(&self, count: usize) {
//!         self.0.fetch_add(count, Ordering::Relaxed);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let switch = MessageSwitch::<dyn CountListener, ()>::new();
//!     let sender_id = switch.create_sender(());
//!
//!     switch.send(sender_id, CountMessage(3));
//!     switch.flush().await.expect("delivery loop is running");
//!
//!     // Subscribing late still gets the last message
//!     let total = Arc::new(Total::default());
//!     let _subscription =
//!         switch.add_listener(sender_id, Arc::clone(&total) as Arc<dyn CountListener>, true);
//!     switch.flush().await.expect("delivery loop is running");
//!
//!     assert_eq!(total.0.load(Ordering::Relaxed), 3);
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
mod listeners;
mod message;
mod switch;

pub use error::Error;
pub use listeners::{ListenerId, Subscription};
pub use message::Message;
pub use switch::{MessageSwitch, SenderId};
