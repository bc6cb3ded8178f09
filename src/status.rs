use ninka::build::Status;
use ninka::manifest::Spec;
use raw_string::RawStr;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Prints a `[n/total] description` line per started command, and command
/// output as it comes in.
pub struct ConsoleStatus<'a> {
	spec: &'a Spec,
	n_total: AtomicUsize,
	n_started: AtomicUsize,
	output: Mutex<()>,
}

impl<'a> ConsoleStatus<'a> {
	pub fn new(spec: &'a Spec) -> Self {
		ConsoleStatus {
			spec,
			n_total: AtomicUsize::new(0),
			n_started: AtomicUsize::new(0),
			output: Mutex::new(()),
		}
	}

	/// The number of commands that were started.
	pub fn n_started(&self) -> usize {
		self.n_started.load(Ordering::Relaxed)
	}
}

impl<'a> Status for ConsoleStatus<'a> {
	fn build_started(&self, n_tasks: usize) {
		self.n_total.store(n_tasks, Ordering::Relaxed);
	}

	fn task_started(&self, task: usize) {
		let n = self.n_started.fetch_add(1, Ordering::Relaxed) + 1;
		let command = self.spec.build_rules[task]
			.command
			.as_ref()
			.expect("Got a phony task");
		let description = if command.description.is_empty() {
			&command.command
		} else {
			&command.description
		};
		let mut line = format!(
			"[{}/{}] {}",
			n,
			self.n_total.load(Ordering::Relaxed),
			description
		);
		if let Some((width, _)) = term_size::dimensions() {
			if line.len() > width {
				let mut end = width;
				while !line.is_char_boundary(end) {
					end -= 1;
				}
				line.truncate(end);
			}
		}
		let _lock = self.output.lock().unwrap();
		println!("{}", line);
	}

	fn task_output(&self, _task: usize, data: &RawStr) {
		let _lock = self.output.lock().unwrap();
		let stdout = std::io::stdout();
		let mut stdout = stdout.lock();
		stdout.write_all(data.as_bytes()).ok();
		stdout.flush().ok();
	}

	fn task_finished(&self, task: usize, success: bool) {
		if !success {
			let _lock = self.output.lock().unwrap();
			println!(
				"FAILED: {}",
				self.spec.build_rules[task].outputs[0]
			);
		}
	}

	fn build_finished(&self, success: bool) {
		if success && self.n_started() == 0 {
			println!("ninka: no work to do.");
		}
	}
}
