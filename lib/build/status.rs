//! Reporting of build progress.

use raw_string::RawStr;

/// Something the [`Builder`][super::Builder] reports progress to.
///
/// The builder calls these from its worker threads, so implementations have
/// to synchronize internally.
pub trait Status: Sync {
	/// The build is about to start. `n_tasks` is the number of tasks that
	/// look outdated up front; `restat` rules can still shrink it.
	fn build_started(&self, n_tasks: usize);

	/// A task was taken off the queue and its command is about to run.
	fn task_started(&self, task: usize);

	/// A running command wrote to stdout or stderr.
	///
	/// Not called for `console` tasks, which own the terminal while they
	/// run.
	fn task_output(&self, task: usize, data: &RawStr);

	/// A task finished, successfully or not.
	fn task_finished(&self, task: usize, success: bool);

	/// The whole build finished.
	fn build_finished(&self, success: bool);

	/// Free-form messages.
	fn info(&self, message: &str) {
		log::info!("{}", message);
	}
	fn warning(&self, message: &str) {
		log::warn!("{}", message);
	}
	fn error(&self, message: &str) {
		log::error!("{}", message);
	}
}

/// A [`Status`] that reports nothing.
///
/// Messages still go to the log.
pub struct SilentStatus;

impl Status for SilentStatus {
	fn build_started(&self, _: usize) {}
	fn task_started(&self, _: usize) {}
	fn task_output(&self, _: usize, _: &RawStr) {}
	fn task_finished(&self, _: usize, _: bool) {}
	fn build_finished(&self, _: bool) {}
}
