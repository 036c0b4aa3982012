/// Progress of a single task, as tracked by the manager that owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskProgress {
	pub current: u64,
	pub max: u64,
	pub message: Option<String>,
}

/// Progress of every active task of a manager merged into one status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
	pub count: u64,
	pub max: u64,
	pub message: String,
}

impl Progress {
	/// Sums counters and builds the status text: the header first, then the text of the only
	/// active task, or the prefixed text of each task when several are running. Blank texts are
	/// skipped so a task can stay hidden.
	pub(crate) fn aggregate(
		header: Option<&str>,
		tasks: &[&TaskProgress],
		task_line_prefix: &str,
	) -> Self {
		let (count, max) = tasks
			.iter()
			.fold((0_u64, 0_u64), |(count, max), progress| {
				(
					count.saturating_add(progress.current),
					max.saturating_add(progress.max),
				)
			});

		let tasks_text = match tasks {
			[] => String::new(),
			[single] => non_blank(single).unwrap_or_default().to_string(),
			many => many
				.iter()
				.filter_map(|progress| non_blank(progress))
				.map(|message| format!("{task_line_prefix}{message}"))
				.collect::<Vec<_>>()
				.join("\n"),
		};

		let header = header.filter(|header| !header.is_empty());

		let message = match header {
			Some(header) if tasks_text.is_empty() => header.to_string(),
			Some(header) => format!("{header}\n{tasks_text}"),
			None => tasks_text,
		};

		Self {
			count,
			max,
			message,
		}
	}
}

fn non_blank(progress: &TaskProgress) -> Option<&str> {
	progress
		.message
		.as_deref()
		.filter(|message| !message.trim().is_empty())
}
