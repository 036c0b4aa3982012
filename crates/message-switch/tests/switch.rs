use bc_message_switch::{Message, MessageSwitch, SenderId};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing_test::traced_test;

trait TextListener: Send + Sync {
	fn on_text(&self, text: &str) -> bool;
}

#[derive(Debug)]
struct Text(String);

impl Text {
	fn new(text: impl Into<String>) -> Self {
		Self(text.into())
	}
}

impl Message<dyn TextListener> for Text {
	fn deliver(&self, listener: &dyn TextListener) -> bool {
		listener.on_text(&self.0)
	}
}

#[derive(Debug, Default)]
struct Recorder {
	received: Mutex<Vec<String>>,
	claims: bool,
}

impl Recorder {
	fn claiming() -> Arc<Self> {
		Arc::new(Self {
			received: Mutex::default(),
			claims: true,
		})
	}

	fn received(&self) -> Vec<String> {
		self.received.lock().clone()
	}
}

impl TextListener for Recorder {
	fn on_text(&self, text: &str) -> bool {
		self.received.lock().push(text.to_string());
		self.claims
	}
}

struct Panicker;

impl TextListener for Panicker {
	fn on_text(&self, text: &str) -> bool {
		panic!("listener blew up on {text}");
	}
}

type TextSwitch = MessageSwitch<dyn TextListener, &'static str>;

fn as_listener(recorder: &Arc<Recorder>) -> Arc<dyn TextListener> {
	Arc::clone(recorder) as Arc<dyn TextListener>
}

#[tokio::test]
#[traced_test]
async fn sender_ids_are_unique_and_increasing() {
	let first = TextSwitch::new();
	let second = TextSwitch::new();

	let ids = (0..64)
		.map(|i| {
			if i % 2 == 0 {
				first.create_sender("even")
			} else {
				second.create_sender("odd")
			}
		})
		.collect::<Vec<SenderId>>();

	assert!(ids.iter().all(|id| id.get() > 1024));
	assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
#[traced_test]
async fn delivers_in_enqueue_order() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("ordered");

	let recorder = Arc::new(Recorder::default());
	let _subscription = switch.add_listener(sender_id, as_listener(&recorder), false);

	for i in 0..100 {
		switch.send(sender_id, Text::new(i.to_string()));
	}

	switch.flush().await.unwrap();

	assert_eq!(
		recorder.received(),
		(0..100).map(|i| i.to_string()).collect::<Vec<_>>()
	);
}

#[tokio::test]
#[traced_test]
async fn late_listener_receives_only_the_last_message() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("late");

	switch.send(sender_id, Text::new("first"));
	switch.send(sender_id, Text::new("second"));
	switch.flush().await.unwrap();

	let late = Arc::new(Recorder::default());
	let _late_subscription = switch.add_listener(sender_id, as_listener(&late), true);

	let uninterested = Arc::new(Recorder::default());
	let _uninterested_subscription =
		switch.add_listener(sender_id, as_listener(&uninterested), false);

	switch.flush().await.unwrap();

	assert_eq!(late.received(), vec!["second".to_string()]);
	assert!(uninterested.received().is_empty());
}

#[tokio::test]
#[traced_test]
async fn replay_is_not_duplicated_by_pending_messages() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("pending");

	// Not delivered yet, so there is nothing to replay and the listener gets it live
	switch.send(sender_id, Text::new("pending"));

	let recorder = Arc::new(Recorder::default());
	let _subscription = switch.add_listener(sender_id, as_listener(&recorder), true);

	switch.flush().await.unwrap();

	assert_eq!(recorder.received(), vec!["pending".to_string()]);

	let late = Arc::new(Recorder::default());
	let _late_subscription = switch.add_listener(sender_id, as_listener(&late), true);
	switch.send(sender_id, Text::new("newer"));

	switch.flush().await.unwrap();

	assert_eq!(
		late.received(),
		vec!["pending".to_string(), "newer".to_string()]
	);
	assert_eq!(
		recorder.received(),
		vec!["pending".to_string(), "newer".to_string()]
	);
}

#[tokio::test]
#[traced_test]
async fn terminal_delivery_stops_fan_out_and_replay() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("terminal");

	let claimer = Recorder::claiming();
	let after_claimer = Arc::new(Recorder::default());

	let _claimer_subscription = switch.add_listener(sender_id, as_listener(&claimer), false);
	let _after_subscription = switch.add_listener(sender_id, as_listener(&after_claimer), false);

	switch.send(sender_id, Text::new("claimed"));
	switch.flush().await.unwrap();

	assert_eq!(claimer.received(), vec!["claimed".to_string()]);
	assert!(after_claimer.received().is_empty());

	let late = Arc::new(Recorder::default());
	let _late_subscription = switch.add_listener(sender_id, as_listener(&late), true);
	switch.flush().await.unwrap();

	assert!(late.received().is_empty());
}

#[tokio::test]
#[traced_test]
async fn removed_listener_misses_already_enqueued_messages() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("removal");

	let removed = Arc::new(Recorder::default());
	let dropped = Arc::new(Recorder::default());
	let kept = Arc::new(Recorder::default());

	let removed_subscription = switch.add_listener(sender_id, as_listener(&removed), false);
	let dropped_subscription = switch.add_listener(sender_id, as_listener(&dropped), false);
	let _kept_subscription = switch.add_listener(sender_id, as_listener(&kept), false);

	// Current thread runtime: the delivery loop can't run before the next await point
	switch.send(sender_id, Text::new("one"));
	switch.send(sender_id, Text::new("two"));

	assert!(switch.remove_listener(sender_id, removed_subscription.listener_id()));
	assert!(!removed_subscription.is_active());
	drop(dropped_subscription);

	switch.flush().await.unwrap();

	assert!(removed.received().is_empty());
	assert!(dropped.received().is_empty());
	assert_eq!(kept.received(), vec!["one".to_string(), "two".to_string()]);

	assert!(!switch.remove_listener(sender_id, removed_subscription.listener_id()));
}

#[tokio::test]
#[traced_test]
async fn dropped_subscriptions_are_pruned() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("pruning");

	let subscriptions = (0..3)
		.map(|_| switch.add_listener(sender_id, Arc::new(Recorder::default()), false))
		.collect::<Vec<_>>();

	assert_eq!(switch.listener_count(sender_id), 3);

	let mut subscriptions = subscriptions.into_iter();
	let kept = subscriptions.next().unwrap();
	subscriptions.for_each(drop);

	assert_eq!(switch.listener_count(sender_id), 1);

	switch.send(sender_id, Text::new("still fine"));
	switch.flush().await.unwrap();

	assert!(kept.is_active());
	kept.unsubscribe();

	assert_eq!(switch.listener_count(sender_id), 0);
}

#[tokio::test]
#[traced_test]
async fn detached_listener_lives_until_removed() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("detached");

	let recorder = Arc::new(Recorder::default());
	let subscription = switch.add_listener(sender_id, as_listener(&recorder), false);
	let listener_id = subscription.listener_id();
	subscription.detach();

	switch.send(sender_id, Text::new("kept"));
	switch.flush().await.unwrap();

	assert_eq!(recorder.received(), vec!["kept".to_string()]);

	assert!(switch.remove_listener(sender_id, listener_id));
	assert_eq!(switch.listener_count(sender_id), 0);
}

#[tokio::test]
#[traced_test]
async fn panicking_listener_does_not_block_others() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("panics");

	let _panicker_subscription = switch.add_listener(sender_id, Arc::new(Panicker), false);

	let recorder = Arc::new(Recorder::default());
	let _subscription = switch.add_listener(sender_id, as_listener(&recorder), false);

	switch.send(sender_id, Text::new("survived"));
	switch.flush().await.unwrap();

	assert_eq!(recorder.received(), vec!["survived".to_string()]);
	assert!(logs_contain("Listener panicked"));
}

#[tokio::test]
#[traced_test]
async fn controllers_live_until_sender_is_closed() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("controller");

	assert_eq!(switch.get_controller(sender_id), Some("controller"));

	let recorder = Arc::new(Recorder::default());
	let subscription = switch.add_listener(sender_id, as_listener(&recorder), false);

	assert_eq!(switch.close_sender(sender_id), Some("controller"));
	assert_eq!(switch.get_controller(sender_id), None);
	assert!(!subscription.is_active());
	assert_eq!(switch.listener_count(sender_id), 0);

	switch.flush().await.unwrap();
	assert!(recorder.received().is_empty());
}

#[tokio::test]
#[traced_test]
async fn closed_sender_leaves_nothing_behind() {
	let switch = TextSwitch::new();
	let sender_id = switch.create_sender("closing");

	// Current thread runtime: both messages are still pending when the sender is closed
	switch.send(sender_id, Text::new("in flight"));
	switch.send(sender_id, Text::new("also in flight"));
	assert_eq!(switch.close_sender(sender_id), Some("closing"));

	switch.flush().await.unwrap();

	assert_eq!(switch.listener_count(sender_id), 0);
	assert!(format!("{switch:?}").contains("queues: 0"));
	assert!(logs_contain("Sender was closed, discarding message"));

	// Nothing to replay, and nobody gets registered on a closed sender
	let late = Arc::new(Recorder::default());
	let subscription = switch.add_listener(sender_id, as_listener(&late), true);
	assert!(!subscription.is_active());

	switch.send(sender_id, Text::new("after close"));
	switch.flush().await.unwrap();

	assert!(late.received().is_empty());
	assert_eq!(
		format!("{switch:?}"),
		"MessageSwitch { senders: 0, queues: 0, pending_slips: 0 }"
	);
}

#[tokio::test]
#[traced_test]
async fn open_senders_keep_their_last_message_after_a_neighbour_closes() {
	let switch = TextSwitch::new();
	let closed = switch.create_sender("closed");
	let open = switch.create_sender("open");

	switch.send(closed, Text::new("dropped"));
	switch.send(open, Text::new("kept"));
	switch.close_sender(closed);
	switch.flush().await.unwrap();

	let late = Arc::new(Recorder::default());
	let _subscription = switch.add_listener(open, as_listener(&late), true);
	switch.flush().await.unwrap();

	assert_eq!(late.received(), vec!["kept".to_string()]);
	assert!(format!("{switch:?}").contains("queues: 1"));
}

struct Relay {
	switch: TextSwitch,
	forward_to: SenderId,
}

impl TextListener for Relay {
	fn on_text(&self, text: &str) -> bool {
		self.switch.send(self.forward_to, Text::new(format!("relayed {text}")));
		false
	}
}

#[tokio::test]
#[traced_test]
async fn listeners_can_send_from_their_callbacks() {
	let switch = TextSwitch::new();
	let source = switch.create_sender("source");
	let target = switch.create_sender("target");

	let _relay_subscription = switch.add_listener(
		source,
		Arc::new(Relay {
			switch: switch.clone(),
			forward_to: target,
		}),
		false,
	);

	let recorder = Arc::new(Recorder::default());
	let _subscription = switch.add_listener(target, as_listener(&recorder), false);

	switch.send(source, Text::new("ping"));
	switch.flush().await.unwrap();
	switch.flush().await.unwrap();

	assert_eq!(recorder.received(), vec!["relayed ping".to_string()]);
}

#[test]
fn many_producer_threads() {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.unwrap()
		.block_on(async {
			let switch = TextSwitch::new();
			let sender_id = switch.create_sender("threads");

			let recorder = Arc::new(Recorder::default());
			let _subscription = switch.add_listener(sender_id, as_listener(&recorder), false);

			let producers = (0..4)
				.map(|thread_idx| {
					let switch = switch.clone();
					std::thread::spawn(move || {
						for i in 0..25 {
							switch.send(sender_id, Text::new(format!("{thread_idx}:{i}")));
						}
					})
				})
				.collect::<Vec<_>>();

			for producer in producers {
				producer.join().unwrap();
			}

			switch.flush().await.unwrap();

			let received = recorder.received();
			assert_eq!(received.len(), 100);

			// Each producer's own messages keep their relative order
			for thread_idx in 0..4 {
				let from_thread = received
					.iter()
					.filter_map(|text| text.strip_prefix(&format!("{thread_idx}:")))
					.map(|i| i.parse::<usize>().unwrap())
					.collect::<Vec<_>>();

				assert_eq!(from_thread, (0..25).collect::<Vec<_>>());
			}
		});
}
