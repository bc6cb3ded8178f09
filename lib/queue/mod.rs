//! Tracking of which tasks need to be executed in what order.
//!
//! A [`BuildQueue`] tracks which tasks need to be executed, with very
//! minimal information about those tasks. It barely knows anything about
//! the tasks, and only refers to them by 'task number', which is simply an
//! index into a vector.

use std::collections::VecDeque;
use std::mem::replace;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Knows which tasks should be executed, and in what order.
///
/// The `BuildQueue` is de-coupled from any details of what the tasks
/// actually are. It only knows about task numbers, and tracks only very
/// minimal information of each task:
///
///  - The state (waiting, running, finished, etc.),
///  - whether it is a 'phony' task,
///  - whether it was marked as outdated,
///  - which pool it runs in, and
///  - the task numbers of the tasks it depends on.
///
/// Tasks become ready in the order their dependencies complete, and
/// [`next`][Self::next] hands them out in that same order, skipping tasks
/// whose pool is full until the pool has room again.
///
/// [`make_async`][Self::make_async] turns this into a concurrent
/// data-structure on which threads can [wait][LockedAsyncBuildQueue::wait].
pub struct BuildQueue {
	/// Information related to build rules.
	///
	/// The index in this vector is their ID.
	tasks: Vec<Task>,
	/// The tasks which are ready to run, oldest first. Never contains
	/// phony tasks.
	ready: VecDeque<usize>,
	/// The concurrency limits, by pool ID.
	pools: Vec<PoolState>,
	/// Number of non-phony tasks which still need to be started.
	///
	/// Includes tasks which are not outdated, but might turn out to be
	/// outdated later.
	n_left: usize,
	/// Number of tasks which have failed so far.
	n_failed: usize,
	/// How many failures stop the build. 0 means never stop.
	failures_allowed: usize,
	/// No new tasks are handed out once set.
	cancelled: bool,
}

/// The tasks tracked by a [`BuildQueue`].
#[derive(Clone, Debug)]
struct Task {
	/// Status of this task.
	status: TaskStatus,
	/// Build rules which depend on this build rule.
	next: Vec<DepInfo>,
	/// Number of unfinished build rules which have this rule in their
	/// `next` list.
	n_deps_left: usize,
	/// The pool this task runs in.
	pool: usize,
}

#[derive(Clone, Debug, Default)]
struct PoolState {
	/// The maximum number of concurrently running tasks. 0 means
	/// unlimited.
	depth: u16,
	/// The number of tasks of this pool currently running.
	running: u16,
	/// Tasks which are ready, but waiting for room in this pool.
	delayed: VecDeque<usize>,
}

/// The status of a [`Task`] inside a [`BuildQueue`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskStatus {
	/// The task does not appear in the dependency tree of the targets we
	/// want.
	NotNeeded,
	/// The task does appear in the dependency tree, but we don't know
	/// anything about the task yet.
	///
	/// Only exists while building up the dependency tree (e.g. inside
	/// [`BuildQueue::new`]), but never inside a finished [`BuildQueue`].
	WillBeNeeded,
	/// The task appears in the dependency tree.
	///
	/// If [`Task::n_deps_left`] is zero, it is ready to be run.
	///
	/// If it is not outdated, it does not need to run. It might be marked
	/// as outdated later.
	Needed { phony: bool, outdated: bool },
	/// The task is running.
	Running {
		/// The time since when it has been running.
		start_time: Instant,
	},
	/// The task is finished.
	Finished {
		/// The time it took to run this task.
		running_time: Duration,
	},
	/// The task failed.
	Failed,
	/// The task was not run, because a task it depends on failed.
	Skipped,
	/// The task was not outdated, so did not need to be run.
	NotRun,
	/// The task is phony and was outdated, and all dependencies have been
	/// finished.
	PhonyFinished,
}

/// Wraps a [`BuildQueue`] to allow multiple threads to use it and wait for
/// it.
pub struct AsyncBuildQueue {
	queue: Mutex<BuildQueue>,
	condvar: Condvar,
}

/// A lock on a [`AsyncBuildQueue`], which prevents other threads from
/// accessing the queue.
pub struct LockedAsyncBuildQueue<'a> {
	queue: MutexGuard<'a, BuildQueue>,
	condvar: &'a Condvar,
}

/// The information the [`BuildQueue`] needs for each task.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo<T> {
	pub phony: bool,
	pub pool: usize,
	pub dependencies: T,
	pub outdated: bool,
}

/// The information the [`BuildQueue`] needs for each task dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepInfo {
	pub task: usize,
	pub order_only: bool,
}

impl BuildQueue {
	/// Construct a new build dependency graph.
	///
	/// - The (potential) tasks are numbered 0 to `max_task_num`.
	///
	/// - `pool_depths` gives the concurrency limit per pool ID; tasks
	///   refer to these through [`TaskInfo::pool`].
	///
	/// - `failures_allowed` is the number of task failures after which no
	///   new tasks are started. 0 means keep going.
	///
	/// - `targets` are the tasks that need to be executed.
	///
	/// - `get_task` is used to get the information the queue needs of each
	///   (relevant) task: whether it is phony, in which pool it runs, on
	///   which tasks it depends (and how), and if it is outdated. It is
	///   called exactly once for every task in the dependency tree of the
	///   targets.
	pub fn new<T, F, D>(
		max_task_num: usize,
		pool_depths: &[u16],
		failures_allowed: usize,
		targets: T,
		mut get_task: F,
	) -> BuildQueue
	where
		T: IntoIterator<Item = usize>,
		F: FnMut(usize) -> TaskInfo<D>,
		D: IntoIterator<Item = DepInfo>,
	{
		let mut tasks = vec![
			Task {
				status: TaskStatus::NotNeeded,
				next: vec![],
				n_deps_left: 0,
				pool: 0,
			};
			max_task_num
		];

		let mut to_visit = Vec::new();

		for task in targets {
			if tasks[task].status == TaskStatus::NotNeeded {
				to_visit.push(task);
				tasks[task].status = TaskStatus::WillBeNeeded;
			}
		}

		let mut n_tasks = 0;
		let mut finished = Vec::new();
		let mut ready = VecDeque::new();

		// Build dependency graph
		while let Some(task) = to_visit.pop() {
			assert_eq!(tasks[task].status, TaskStatus::WillBeNeeded);
			let info = get_task(task);
			let mut n_deps = 0;
			for dep in info.dependencies {
				if tasks[dep.task].status == TaskStatus::NotNeeded {
					to_visit.push(dep.task);
					tasks[dep.task].status = TaskStatus::WillBeNeeded;
				}
				n_deps += 1;
				tasks[dep.task].next.push(DepInfo {
					task,
					order_only: dep.order_only,
				});
			}
			tasks[task].status = TaskStatus::Needed {
				phony: info.phony,
				outdated: info.outdated,
			};
			tasks[task].pool = info.pool;
			if !info.phony {
				n_tasks += 1;
			}
			tasks[task].n_deps_left = n_deps;
			if n_deps == 0 {
				if !info.outdated {
					if !info.phony {
						n_tasks -= 1;
					}
					tasks[task].status = TaskStatus::NotRun;
					finished.push(task);
				} else if info.phony {
					tasks[task].status = TaskStatus::PhonyFinished;
					finished.push(task);
				} else {
					ready.push_back(task);
				}
			}
		}

		let mut queue = BuildQueue {
			tasks,
			ready,
			pools: pool_depths
				.iter()
				.map(|&depth| PoolState {
					depth,
					..PoolState::default()
				})
				.collect(),
			n_left: n_tasks,
			n_failed: 0,
			failures_allowed,
			cancelled: false,
		};

		// Mark any ready phony tasks as finished, and update the tasks
		// dependent on them.
		while let Some(task) = finished.pop() {
			queue.update_finished_task(task, &mut finished, None);
		}

		queue
	}

	/// Turn the [`BuildQueue`] into an [`AsyncBuildQueue`], which can be
	/// used concurrently from multiple threads.
	pub fn make_async(self) -> AsyncBuildQueue {
		AsyncBuildQueue {
			queue: Mutex::new(self),
			condvar: Condvar::new(),
		}
	}

	/// Check if there is something to do right now.
	///
	/// Returns the index of the task. Will never return a phony task, as
	/// those don't have any work to do.
	pub fn next(&mut self) -> Option<usize> {
		self.next_at(Instant::now())
	}

	/// Like next(), returns the next thing to do, but notes it as having
	/// started at the given time instead of now.
	pub fn next_at(&mut self, start_time: Instant) -> Option<usize> {
		if self.cancelled {
			return None;
		}
		let mut n = self.ready.len();
		while n > 0 {
			n -= 1;
			let task = self.ready.pop_front().unwrap();
			let pool = self.tasks[task].pool;
			if !self.pool_has_room(pool) {
				// Keep it around until a task of this pool finishes.
				self.pools[pool].delayed.push_back(task);
				continue;
			}
			assert_eq!(self.tasks[task].n_deps_left, 0);
			assert_eq!(
				self.tasks[task].status,
				TaskStatus::Needed {
					phony: false,
					outdated: true,
				}
			);
			self.tasks[task].status = TaskStatus::Running { start_time };
			self.pools[pool].running += 1;
			self.n_left -= 1;
			return Some(task);
		}
		None
	}

	fn pool_has_room(&self, pool: usize) -> bool {
		let pool = &self.pools[pool];
		pool.depth == 0 || pool.running < pool.depth
	}

	/// Mark the task as ready, possibly queueing dependent tasks.
	///
	/// `restat` is called for the non-outdated tasks dependent on this task
	/// to check if they're now outdated. If not given, they are all
	/// considered outdated.
	///
	/// Returns the number of newly ready tasks that were unblocked by the
	/// completion of this one.
	pub fn complete_task(
		&mut self,
		task: usize,
		restat: Option<&mut dyn FnMut(usize) -> bool>,
	) -> usize {
		self.complete_task_at(task, restat, Instant::now())
	}

	/// Like complete_task, marks a task as completed, but notes it as
	/// having finished at the given time instead of now.
	pub fn complete_task_at(
		&mut self,
		task: usize,
		restat: Option<&mut dyn FnMut(usize) -> bool>,
		finish_time: Instant,
	) -> usize {
		self.tasks[task].status = match &self.tasks[task].status {
			TaskStatus::Running { start_time } => TaskStatus::Finished {
				running_time: finish_time - *start_time,
			},
			_ => panic!(
				"complete_task({}) on task that isn't Running: {:?}",
				task, self.tasks[task]
			),
		};
		self.release_pool(task);
		let mut newly_ready = self.promote_delayed(self.tasks[task].pool);
		let mut newly_finished = Vec::new();
		newly_ready += self.update_finished_task(task, &mut newly_finished, restat);
		while let Some(task) = newly_finished.pop() {
			newly_ready += self.update_finished_task(task, &mut newly_finished, None);
		}
		newly_ready
	}

	/// Mark a running task as failed.
	///
	/// Everything that depends on it is skipped. Once the number of
	/// failures reaches `failures_allowed`, the whole queue is cancelled.
	///
	/// Returns the number of newly ready tasks (tasks can become ready
	/// when a pool slot frees up).
	pub fn fail_task(&mut self, task: usize) -> usize {
		match self.tasks[task].status {
			TaskStatus::Running { .. } => {}
			_ => panic!(
				"fail_task({}) on task that isn't Running: {:?}",
				task, self.tasks[task]
			),
		}
		self.tasks[task].status = TaskStatus::Failed;
		self.n_failed += 1;
		self.release_pool(task);

		// Skip everything that (transitively) depends on the failed task.
		let mut to_skip = replace(&mut self.tasks[task].next, Vec::new());
		while let Some(DepInfo { task: next, .. }) = to_skip.pop() {
			if let TaskStatus::Needed { phony, .. } = self.tasks[next].status {
				self.tasks[next].status = TaskStatus::Skipped;
				if !phony {
					self.n_left -= 1;
				}
				let mut next_next = replace(&mut self.tasks[next].next, Vec::new());
				to_skip.append(&mut next_next);
			}
		}

		if self.failures_allowed != 0 && self.n_failed >= self.failures_allowed {
			self.cancel();
		}

		self.promote_delayed(self.tasks[task].pool)
	}

	/// Move tasks that were waiting for room in `pool` back into the ready
	/// queue, now that a slot freed up.
	fn promote_delayed(&mut self, pool: usize) -> usize {
		let mut newly_ready = 0;
		while !self.pools[pool].delayed.is_empty() && self.pool_has_room(pool) {
			let task = self.pools[pool].delayed.pop_front().unwrap();
			self.ready.push_back(task);
			newly_ready += 1;
		}
		newly_ready
	}

	/// Stop handing out new tasks. Running tasks are unaffected.
	pub fn cancel(&mut self) {
		self.cancelled = true;
		let ready = replace(&mut self.ready, VecDeque::new());
		let mut delayed = Vec::new();
		for pool in &mut self.pools {
			delayed.extend(replace(&mut pool.delayed, VecDeque::new()));
		}
		for task in ready.into_iter().chain(delayed) {
			if let TaskStatus::Needed { phony, .. } = self.tasks[task].status {
				self.tasks[task].status = TaskStatus::Skipped;
				if !phony {
					self.n_left -= 1;
				}
			}
		}
	}

	/// Whether the queue was cancelled, by [`cancel`][Self::cancel] or by
	/// hitting the failure limit.
	pub fn is_cancelled(&self) -> bool {
		self.cancelled
	}

	/// Add an extra dependency between two tasks, discovered during the
	/// build (through a dyndep file).
	///
	/// Must be called while `task` still has unfinished dependencies (the
	/// rule producing the dyndep file, at least), so it cannot be in the
	/// ready queue yet. It does nothing when either side already finished,
	/// or was never part of this build.
	pub fn add_dependency(&mut self, task: usize, dep: usize) {
		match self.tasks[task].status {
			TaskStatus::Needed { .. } => {}
			_ => return,
		}
		match self.tasks[dep].status {
			TaskStatus::Needed { .. } | TaskStatus::Running { .. } => {
				assert!(
					self.tasks[task].n_deps_left > 0,
					"add_dependency({}) on a task with no unfinished dependencies",
					task
				);
				self.tasks[dep].next.push(DepInfo {
					task,
					order_only: false,
				});
				self.tasks[task].n_deps_left += 1;
			}
			_ => {}
		}
	}

	fn release_pool(&mut self, task: usize) {
		let pool = self.tasks[task].pool;
		self.pools[pool].running -= 1;
	}

	/// Decrement the `n_deps_left` of all the tasks depending on this
	/// task, and mark any newly ready tasks as ready.
	///
	/// Returns the amount of newly ready tasks.
	///
	/// Adds any now finished (phony and up-to-date) tasks to
	/// `newly_finished`.
	fn update_finished_task(
		&mut self,
		task: usize,
		newly_finished: &mut Vec<usize>,
		mut restat: Option<&mut dyn FnMut(usize) -> bool>,
	) -> usize {
		let did_run = match &self.tasks[task].status {
			TaskStatus::NotRun => false,
			TaskStatus::PhonyFinished => true,
			TaskStatus::Finished { .. } => true,
			_ => unreachable!("Task {} was not finished: {:?}", task, self.tasks[task]),
		};
		let mut newly_ready = 0;
		for DepInfo {
			task: next,
			order_only,
		} in replace(&mut self.tasks[task].next, Vec::new())
		{
			let next_phony;
			let next_outdated;
			match &mut self.tasks[next].status {
				TaskStatus::Needed { phony, outdated } => {
					if did_run && !order_only && !*outdated {
						*outdated = if let Some(restat) = restat.as_mut() {
							restat(next)
						} else {
							true
						};
					}
					next_phony = *phony;
					next_outdated = *outdated;
				}
				TaskStatus::Skipped => continue,
				_ => unreachable!(
					"Task {} in `next' list was not `Needed': {:?}",
					next, self.tasks[next]
				),
			}
			self.tasks[next].n_deps_left -= 1;
			if self.tasks[next].n_deps_left == 0 {
				if !next_outdated {
					if !next_phony {
						self.n_left -= 1;
					}
					self.tasks[next].status = TaskStatus::NotRun;
					newly_finished.push(next);
				} else if next_phony {
					// Phony tasks are instantly finished, as they have no
					// work to do.
					self.tasks[next].status = TaskStatus::PhonyFinished;
					newly_finished.push(next);
				} else {
					self.ready.push_back(next);
					newly_ready += 1;
				}
			}
		}
		newly_ready
	}

	/// Get the status of a task.
	pub fn get_task_status(&self, task: usize) -> TaskStatus {
		self.tasks[task].status
	}

	/// Number of tasks left.
	///
	/// Does not include phony tasks. Does include tasks which are not
	/// marked as outdated, but might be later because an (indirect)
	/// dependency is outdated.
	pub fn n_left(&self) -> usize {
		self.n_left
	}

	/// Number of tasks that failed.
	pub fn n_failed(&self) -> usize {
		self.n_failed
	}
}

impl AsyncBuildQueue {
	/// Get exclusive access to the build queue.
	pub fn lock(&self) -> LockedAsyncBuildQueue {
		LockedAsyncBuildQueue {
			queue: self.queue.lock().unwrap(),
			condvar: &self.condvar,
		}
	}

	/// Stop handing out new tasks, and wake up all waiting workers.
	pub fn cancel(&self) {
		self.lock().queue.cancel();
		self.condvar.notify_all();
	}
}

impl<'a> LockedAsyncBuildQueue<'a> {
	/// Check if there is something to do right now.
	///
	/// Returns the index of the task. Will never return a phony task, as
	/// those don't have any work to do.
	///
	/// Does not block.
	pub fn next(&mut self) -> Option<usize> {
		let next = self.queue.next();
		if next.is_some() {
			if self.queue.n_left == 0 {
				self.condvar.notify_all();
			}
		}
		next
	}

	/// Wait for something to do.
	///
	/// Returns `None` when all tasks are finished or the queue was
	/// cancelled.
	pub fn wait(mut self) -> Option<usize> {
		while self.queue.ready.is_empty() && self.queue.n_left > 0 && !self.queue.cancelled {
			self.queue = self.condvar.wait(self.queue).unwrap();
		}
		self.next()
	}

	/// Mark the task as done, unblocking dependent tasks.
	///
	/// See [`BuildQueue::complete_task`].
	pub fn complete_task(&mut self, task: usize, restat: Option<&mut dyn FnMut(usize) -> bool>) {
		let n = self.queue.complete_task(task, restat);
		self.notify(n);
	}

	/// Mark the task as failed, skipping everything that depends on it.
	///
	/// See [`BuildQueue::fail_task`].
	pub fn fail_task(&mut self, task: usize) {
		let n = self.queue.fail_task(task);
		if self.queue.cancelled {
			self.condvar.notify_all();
		} else {
			self.notify(n);
		}
	}

	/// See [`BuildQueue::add_dependency`].
	pub fn add_dependency(&mut self, task: usize, dep: usize) {
		self.queue.add_dependency(task, dep);
	}

	/// Get the status of a task.
	pub fn get_task_status(&self, task: usize) -> TaskStatus {
		self.queue.get_task_status(task)
	}

	/// See [`BuildQueue::n_left`].
	pub fn n_left(&self) -> usize {
		self.queue.n_left()
	}

	/// See [`BuildQueue::n_failed`].
	pub fn n_failed(&self) -> usize {
		self.queue.n_failed()
	}

	/// See [`BuildQueue::is_cancelled`].
	pub fn is_cancelled(&self) -> bool {
		self.queue.is_cancelled()
	}

	fn notify(&mut self, newly_ready: usize) {
		// TODO: In most cases we'll want to notify one time less, because
		// this thread itself will also continue executing tasks.
		if self.queue.n_left == 0 {
			self.condvar.notify_all();
		} else {
			for _ in 0..newly_ready {
				self.condvar.notify_one();
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn dep(task: usize) -> DepInfo {
		DepInfo {
			task,
			order_only: false,
		}
	}

	fn order_dep(task: usize) -> DepInfo {
		DepInfo {
			task,
			order_only: true,
		}
	}

	/// A chain 0 <- 1 <- 2, everything outdated.
	fn chain() -> BuildQueue {
		BuildQueue::new(3, &[0], 1, vec![2], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: true,
			dependencies: match task {
				1 => vec![dep(0)],
				2 => vec![dep(1)],
				_ => vec![],
			},
		})
	}

	#[test]
	fn tasks_run_in_dependency_order() {
		let mut queue = chain();
		assert_eq!(queue.next(), Some(0));
		assert_eq!(queue.next(), None);
		queue.complete_task(0, None);
		assert_eq!(queue.next(), Some(1));
		queue.complete_task(1, None);
		assert_eq!(queue.next(), Some(2));
		queue.complete_task(2, None);
		assert_eq!(queue.next(), None);
		assert_eq!(queue.n_left(), 0);
	}

	#[test]
	fn independent_tasks_all_come_out() {
		let mut queue = BuildQueue::new(3, &[0], 1, vec![0, 1, 2], |_| TaskInfo {
			phony: false,
			pool: 0,
			outdated: true,
			dependencies: vec![],
		});
		let mut dispatched = vec![
			queue.next().unwrap(),
			queue.next().unwrap(),
			queue.next().unwrap(),
		];
		dispatched.sort();
		assert_eq!(dispatched, vec![0, 1, 2]);
		assert_eq!(queue.next(), None);
	}

	#[test]
	fn newly_ready_tasks_queue_behind_older_ones() {
		// 3 depends on 0. Completing 0 makes 3 ready *after* 1 and 2,
		// which were ready the whole time.
		let mut queue = BuildQueue::new(4, &[0], 1, vec![1, 2, 3], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: true,
			dependencies: match task {
				3 => vec![dep(0)],
				_ => vec![],
			},
		});
		let first = queue.next().unwrap();
		queue.complete_task(first, None);
		if first == 0 {
			// 3 became ready last, so both 1 and 2 come out before it.
			let second = queue.next().unwrap();
			let third = queue.next().unwrap();
			assert!(second != 3 && third != 3);
			assert_eq!(queue.next(), Some(3));
		}
	}

	#[test]
	fn up_to_date_tasks_do_not_run() {
		let mut queue = BuildQueue::new(2, &[0], 1, vec![1], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: false,
			dependencies: match task {
				1 => vec![dep(0)],
				_ => vec![],
			},
		});
		assert_eq!(queue.next(), None);
		assert_eq!(queue.n_left(), 0);
		assert_eq!(queue.get_task_status(0), TaskStatus::NotRun);
		assert_eq!(queue.get_task_status(1), TaskStatus::NotRun);
	}

	#[test]
	fn completion_marks_dependents_outdated() {
		// 0 is outdated, 1 is not; once 0 ran, 1 has to run too.
		let mut queue = BuildQueue::new(2, &[0], 1, vec![1], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: task == 0,
			dependencies: match task {
				1 => vec![dep(0)],
				_ => vec![],
			},
		});
		assert_eq!(queue.next(), Some(0));
		queue.complete_task(0, None);
		assert_eq!(queue.next(), Some(1));
	}

	#[test]
	fn restat_can_keep_dependents_clean() {
		let mut queue = BuildQueue::new(2, &[0], 1, vec![1], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: task == 0,
			dependencies: match task {
				1 => vec![dep(0)],
				_ => vec![],
			},
		});
		assert_eq!(queue.next(), Some(0));
		let mut still_clean = |_task: usize| false;
		queue.complete_task(0, Some(&mut still_clean));
		assert_eq!(queue.next(), None);
		assert_eq!(queue.get_task_status(1), TaskStatus::NotRun);
		assert_eq!(queue.n_left(), 0);
	}

	#[test]
	fn order_only_completion_does_not_outdate_dependents() {
		let mut queue = BuildQueue::new(2, &[0], 1, vec![1], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: task == 0,
			dependencies: match task {
				1 => vec![order_dep(0)],
				_ => vec![],
			},
		});
		assert_eq!(queue.next(), Some(0));
		queue.complete_task(0, None);
		assert_eq!(queue.next(), None);
		assert_eq!(queue.get_task_status(1), TaskStatus::NotRun);
	}

	#[test]
	fn phony_tasks_cascade() {
		// 0 <- 1 (phony) <- 2: the phony task is never handed out.
		let mut queue = BuildQueue::new(3, &[0], 1, vec![2], |task| TaskInfo {
			phony: task == 1,
			pool: 0,
			outdated: true,
			dependencies: match task {
				1 => vec![dep(0)],
				2 => vec![dep(1)],
				_ => vec![],
			},
		});
		assert_eq!(queue.next(), Some(0));
		queue.complete_task(0, None);
		assert_eq!(queue.get_task_status(1), TaskStatus::PhonyFinished);
		assert_eq!(queue.next(), Some(2));
	}

	#[test]
	fn pools_limit_concurrency() {
		// Tasks 0 and 1 share a depth-1 pool; task 2 is unconstrained.
		let mut queue = BuildQueue::new(3, &[0, 1], 1, vec![0, 1, 2], |task| TaskInfo {
			phony: false,
			pool: if task < 2 { 1 } else { 0 },
			outdated: true,
			dependencies: vec![],
		});
		// Only one of the two pooled tasks comes out, plus the
		// unconstrained one.
		let mut dispatched = vec![queue.next().unwrap(), queue.next().unwrap()];
		assert_eq!(queue.next(), None);
		let pooled = *dispatched.iter().find(|&&t| t < 2).unwrap();
		dispatched.sort();
		assert!(dispatched.contains(&2));
		// Completing the pooled task frees up the pool for the other one.
		queue.complete_task(pooled, None);
		let second = queue.next().unwrap();
		assert!(second < 2 && second != pooled);
		assert_eq!(queue.next(), None);
	}

	#[test]
	fn failed_tasks_skip_their_dependents() {
		// 0 <- 1, and an independent 2, with room for many failures.
		let mut queue = BuildQueue::new(3, &[0], 10, vec![1, 2], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: true,
			dependencies: match task {
				1 => vec![dep(0)],
				_ => vec![],
			},
		});
		let mut dispatched = vec![queue.next().unwrap(), queue.next().unwrap()];
		dispatched.sort();
		assert_eq!(dispatched, vec![0, 2]);
		queue.fail_task(0);
		assert_eq!(queue.get_task_status(1), TaskStatus::Skipped);
		assert!(!queue.is_cancelled());
		assert_eq!(queue.n_failed(), 1);
		// The independent task is unaffected.
		queue.complete_task(2, None);
		assert_eq!(queue.next(), None);
		assert_eq!(queue.n_left(), 0);
	}

	#[test]
	fn failure_limit_cancels_the_queue() {
		let mut queue = BuildQueue::new(2, &[0], 1, vec![0, 1], |_| TaskInfo {
			phony: false,
			pool: 0,
			outdated: true,
			dependencies: vec![],
		});
		let first = queue.next().unwrap();
		queue.fail_task(first);
		assert!(queue.is_cancelled());
		assert_eq!(queue.next(), None);
	}

	#[test]
	fn extra_dependencies_are_awaited() {
		// 2 depends on 1; during 1's run we learn 2 also needs 0.
		let mut queue = BuildQueue::new(3, &[0], 1, vec![0, 2], |task| TaskInfo {
			phony: false,
			pool: 0,
			outdated: true,
			dependencies: match task {
				2 => vec![dep(1)],
				1 => vec![],
				_ => vec![],
			},
		});
		let mut first_two = vec![queue.next().unwrap(), queue.next().unwrap()];
		first_two.sort();
		assert_eq!(first_two, vec![0, 1]);
		queue.add_dependency(2, 0);
		queue.complete_task(1, None);
		// 2 still waits for 0.
		assert_eq!(queue.next(), None);
		queue.complete_task(0, None);
		assert_eq!(queue.next(), Some(2));
	}
}
