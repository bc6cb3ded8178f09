//! Running the outdated tasks, in order.
//!
//! The [`Builder`] drains an [`AsyncBuildQueue`] with a set of worker
//! threads. Each worker picks a ready task, runs its command through `sh`,
//! and on success works through the completion sequence: drain the output,
//! observe the exit code, parse discovered dependencies, write the logs,
//! and only then mark the outputs ready so dependent tasks can start.

mod msvc;
mod subprocess;
pub mod status;

pub use self::status::{SilentStatus, Status};

use self::subprocess::{listen_to_child, Source};
use crate::buildlog::BuildLogMut;
use crate::deplog::DepLogMut;
use crate::depfile;
use crate::disk::Disk;
use crate::dyndep::DyndepStore;
use crate::graph::Graph;
use crate::manifest::canonicalizepath::canonicalize_path_in_place;
use crate::manifest::{DepStyle, Spec, CONSOLE_POOL};
use crate::mtime::{StatCache, Timestamp};
use crate::outdated::edge_outdated;
use crate::queue::AsyncBuildQueue;
use log::{debug, warn};
use raw_string::unix::RawStrExt;
use raw_string::{RawStr, RawString};
use std::collections::BTreeMap;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Settings for one build.
#[derive(Clone, Copy, Debug)]
pub struct BuildOptions {
	/// The number of commands to run in parallel.
	pub n_threads: usize,
	/// Don't run anything; pretend every task succeeded.
	pub dry_run: bool,
	/// Leave depfiles on disk after reading them.
	pub keep_depfiles: bool,
	/// Leave rspfiles on disk after the command ran.
	pub keep_rspfiles: bool,
}

impl Default for BuildOptions {
	fn default() -> Self {
		BuildOptions {
			n_threads: 1,
			dry_run: false,
			keep_depfiles: false,
			keep_rspfiles: false,
		}
	}
}

/// How a finished build went.
#[derive(Clone, Copy, Debug)]
pub struct BuildSummary {
	/// No failures, and nothing cancelled the build.
	pub success: bool,
	/// The number of tasks that failed.
	pub n_failed: usize,
	/// The build stopped early because of the cancel flag.
	pub interrupted: bool,
}

/// Executes the tasks of a build, as described by a queue.
pub struct Builder<'a> {
	pub spec: &'a Spec,
	pub graph: &'a Graph,
	pub queue: &'a AsyncBuildQueue,
	pub build_log: &'a Mutex<BuildLogMut>,
	pub dep_log: &'a Mutex<DepLogMut>,
	pub dyndep: &'a Mutex<DyndepStore>,
	pub status: &'a dyn Status,
	pub disk: &'a dyn Disk,
	pub options: BuildOptions,
	/// The moment the build started; build log times are relative to it.
	pub start_time: Instant,
	/// Set from outside (e.g. a signal handler) to stop dispatching new
	/// tasks. Running commands finish normally.
	pub cancel: Option<&'a AtomicBool>,
}

impl<'a> Builder<'a> {
	/// Run tasks until the queue is drained, a failure limit is hit, or
	/// the build is cancelled.
	pub fn run(&self) -> BuildSummary {
		self.status.build_started(self.queue.lock().n_left());

		// The tasks interested in each dyndep file, by path.
		let mut dyndep_consumers: BTreeMap<&RawStr, Vec<usize>> = BTreeMap::new();
		for (i, rule) in self.spec.build_rules.iter().enumerate() {
			if let Some(dyndep) = rule.command.as_ref().and_then(|c| c.dyndep.as_ref()) {
				dyndep_consumers
					.entry(&dyndep[..])
					.or_insert_with(Vec::new)
					.push(i);
			}
		}
		let dyndep_consumers = &dyndep_consumers;

		let done = AtomicBool::new(false);
		crossbeam::thread::scope(|scope| {
			let mut workers = Vec::with_capacity(self.options.n_threads);
			for worker_id in 0..self.options.n_threads {
				workers.push(scope.spawn(move |_| {
					Worker {
						builder: self,
						dyndep_consumers,
						worker_id,
					}
					.run()
				}));
			}
			if let Some(cancel) = self.cancel {
				let queue = self.queue;
				let done = &done;
				scope.spawn(move |_| {
					while !done.load(Ordering::Relaxed) {
						if cancel.load(Ordering::Relaxed) {
							queue.cancel();
						}
						std::thread::sleep(std::time::Duration::from_millis(50));
					}
				});
			}
			for worker in workers {
				worker.join().unwrap();
			}
			done.store(true, Ordering::Relaxed);
		})
		.unwrap();

		let queue = self.queue.lock();
		let interrupted = self.cancel.map_or(false, |c| c.load(Ordering::Relaxed));
		let summary = BuildSummary {
			success: queue.n_failed() == 0 && !queue.is_cancelled(),
			n_failed: queue.n_failed(),
			interrupted,
		};
		drop(queue);
		self.status.build_finished(summary.success);
		summary
	}
}

/// What happened to one task.
struct TaskResult {
	success: bool,
	/// Re-check dependents instead of assuming they're outdated now.
	restat_recheck: bool,
	/// Dependencies discovered through a dyndep file this task produced:
	/// `(waiting task, task it has to wait for)`.
	new_deps: Vec<(usize, usize)>,
}

impl TaskResult {
	fn failed() -> TaskResult {
		TaskResult {
			success: false,
			restat_recheck: false,
			new_deps: Vec::new(),
		}
	}
}

struct Worker<'a, 'b> {
	builder: &'b Builder<'a>,
	dyndep_consumers: &'b BTreeMap<&'a RawStr, Vec<usize>>,
	worker_id: usize,
}

impl<'a, 'b> Worker<'a, 'b> {
	fn run(self) {
		let queue = self.builder.queue;
		let log = format!("ninka::worker-{}", self.worker_id);
		let mut lock = queue.lock();
		loop {
			let mut next = lock.next();
			drop(lock);
			if next.is_none() {
				next = queue.lock().wait();
			}
			let task = match next {
				Some(task) => task,
				None => break, // No remaining work.
			};

			debug!(target: &log, "Running task {}", task);
			let result = self.run_task(task);

			lock = queue.lock();
			for &(waiting, dep) in &result.new_deps {
				lock.add_dependency(waiting, dep);
			}
			if !result.success {
				lock.fail_task(task);
			} else if result.restat_recheck {
				let builder = self.builder;
				let mut fresh_stats = StatCache::new();
				fresh_stats.allow_cache(false);
				let mut recheck = |task: usize| {
					edge_outdated(
						builder.spec,
						builder.graph,
						&builder.build_log.lock().unwrap(),
						&builder.dep_log.lock().unwrap(),
						&builder.dyndep.lock().unwrap(),
						&mut fresh_stats,
						task,
					)
				};
				lock.complete_task(task, Some(&mut recheck));
			} else {
				lock.complete_task(task, None);
			}
		}
	}

	/// Run one task through the whole completion sequence. Queue updates
	/// are left to the caller.
	fn run_task(&self, task: usize) -> TaskResult {
		let builder = self.builder;
		let spec = builder.spec;
		let status = builder.status;
		let disk = builder.disk;
		let rule = &spec.build_rules[task];
		let command = rule.command.as_ref().expect("Got a phony task");

		status.task_started(task);

		if builder.options.dry_run {
			status.task_finished(task, true);
			return TaskResult {
				success: true,
				restat_recheck: false,
				new_deps: Vec::new(),
			};
		}

		// A task whose dyndep file was written earlier in this build gets
		// its restated dependencies now, and a fresh verdict: the extra
		// information can show there is nothing to do after all.
		if let Some(dyndep_path) = &command.dyndep {
			{
				let mut store = builder.dyndep.lock().unwrap();
				if !store.is_loaded(task) {
					if let Err(e) = store.load_file(spec, dyndep_path) {
						status.error(&format!("{}", e));
						status.task_finished(task, false);
						return TaskResult::failed();
					}
				}
			}
			let mut fresh_stats = StatCache::new();
			fresh_stats.allow_cache(false);
			// Lock order matters here: build log, dependency log, dyndep
			// store, same as the restat re-check.
			let still_outdated = edge_outdated(
				spec,
				builder.graph,
				&builder.build_log.lock().unwrap(),
				&builder.dep_log.lock().unwrap(),
				&builder.dyndep.lock().unwrap(),
				&mut fresh_stats,
				task,
			);
			if !still_outdated {
				status.task_finished(task, true);
				return TaskResult {
					success: true,
					restat_recheck: true,
					new_deps: Vec::new(),
				};
			}
		}

		let (extra_inputs, extra_outputs, dyndep_restat) = {
			let store = builder.dyndep.lock().unwrap();
			match store.get(task) {
				Some(e) => (
					e.implicit_inputs.clone(),
					e.implicit_outputs.clone(),
					e.restat,
				),
				None => (Vec::new(), Vec::new(), false),
			}
		};
		let restat = command.restat || dyndep_restat;

		// Remember the output mtimes, to detect unchanged outputs.
		let outputs: Vec<&RawString> = rule.outputs.iter().chain(extra_outputs.iter()).collect();
		let mtimes_before: Vec<Option<Timestamp>> = if restat {
			outputs
				.iter()
				.map(|o| disk.stat(o.as_path()).unwrap_or(None))
				.collect()
		} else {
			Vec::new()
		};

		// Make room for the outputs, and write the rspfile.
		for output in &outputs {
			if let Some(parent) = output.as_path().parent() {
				if !parent.as_os_str().is_empty() {
					if let Err(e) = disk.make_dirs(parent) {
						status.error(&format!("Unable to create {:?}: {}", parent, e));
						status.task_finished(task, false);
						return TaskResult::failed();
					}
				}
			}
		}
		if !command.rspfile.is_empty() {
			if let Err(e) = disk.write_file(command.rspfile.as_path(), &command.rspfile_content) {
				status.error(&format!(
					"Unable to write {:?}: {}",
					command.rspfile, e
				));
				status.task_finished(task, false);
				return TaskResult::failed();
			}
		}

		// Run the command, draining its output as it runs. Console tasks
		// own the terminal instead.
		let worker_start = Instant::now();
		let console = command.pool == CONSOLE_POOL;
		let mut output = RawString::new();
		let exit = if console {
			Command::new("sh")
				.arg("-c")
				.arg(command.command.as_osstr())
				.stdin(Stdio::inherit())
				.stdout(Stdio::inherit())
				.stderr(Stdio::inherit())
				.status()
		} else {
			Command::new("sh")
				.arg("-c")
				.arg(command.command.as_osstr())
				.stdin(Stdio::null())
				.stdout(Stdio::piped())
				.stderr(Stdio::piped())
				.spawn()
				.and_then(|child| {
					let stream = command.deps != Some(DepStyle::Msvc);
					listen_to_child(child, 10, &mut |_source: Source, data: &[u8]| {
						if stream {
							status.task_output(task, RawStr::from_bytes(data));
						}
						output.push_str(RawStr::from_bytes(data));
					})
				})
		};
		let exit = match exit {
			Ok(exit) => exit,
			Err(e) => {
				status.error(&format!("Unable to run {:?}: {}", command.command, e));
				status.task_finished(task, false);
				return TaskResult::failed();
			}
		};
		if !exit.success() {
			status.error(&format!(
				"Command exited with {}: {}",
				exit, command.command
			));
			status.task_finished(task, false);
			return TaskResult::failed();
		}

		// Collect the dependencies the command discovered.
		let discovered_deps = match command.deps {
			Some(DepStyle::Gcc) => {
				let depfile = command.depfile.as_path();
				let (depfile_target, mut deps) = match depfile::read_deps_file(depfile) {
					Ok(result) => result,
					Err(e) => {
						status.error(&format!("Unable to read {:?}: {}", depfile, e));
						status.task_finished(task, false);
						return TaskResult::failed();
					}
				};
				if !rule.outputs.contains(&depfile_target) {
					warn!(
						"Depfile {:?} talks about {:?}, not about any output of the task",
						depfile, depfile_target
					);
				}
				if !builder.options.keep_depfiles {
					if let Err(e) = disk.remove_file(depfile) {
						warn!("Unable to remove {:?}: {}", depfile, e);
					}
				}
				for dep in &mut deps {
					canonicalize_path_in_place(dep);
				}
				Some(deps)
			}
			Some(DepStyle::Msvc) => {
				let (filtered, mut deps) =
					msvc::parse_showincludes(&output, &command.msvc_deps_prefix);
				if !filtered.is_empty() {
					status.task_output(task, &filtered);
				}
				for dep in &mut deps {
					canonicalize_path_in_place(dep);
				}
				Some(deps)
			}
			None => None,
		};

		// Every output, including the implicit ones, has to exist now.
		let mut mtimes_after = Vec::with_capacity(outputs.len());
		for output in &outputs {
			match disk.stat(output.as_path()) {
				Ok(Some(mtime)) => mtimes_after.push(mtime),
				Ok(None) => {
					status.error(&format!(
						"Output {} is missing after the command succeeded",
						output
					));
					status.task_finished(task, false);
					return TaskResult::failed();
				}
				Err(e) => {
					status.error(&format!("Unable to stat {}: {}", output, e));
					status.task_finished(task, false);
					return TaskResult::failed();
				}
			}
		}

		// For restat rules whose outputs did not change, the build log gets
		// the newest input mtime, so the next run sees the outputs as up to
		// date with their inputs. Otherwise it gets the real output mtime.
		let outputs_unchanged = restat
			&& mtimes_before.len() == mtimes_after.len()
			&& mtimes_before
				.iter()
				.zip(mtimes_after.iter())
				.all(|(before, after)| *before == Some(*after));
		let logged_mtime = if outputs_unchanged {
			let mut newest = None;
			for input in rule
				.inputs
				.iter()
				.chain(extra_inputs.iter())
				.chain(discovered_deps.iter().flatten())
			{
				let t = disk.stat(input.as_path()).unwrap_or(None);
				if t > newest {
					newest = t;
				}
			}
			newest
		} else {
			mtimes_after.iter().cloned().max()
		};

		// Log writes have to land before dependents are unblocked, so a
		// crash can never leave the logs behind the build outputs.
		{
			let mut build_log = builder.build_log.lock().unwrap();
			if let Err(e) = build_log.record(
				rule,
				builder.start_time,
				worker_start,
				Instant::now(),
				logged_mtime,
			) {
				status.error(&format!("Unable to write the build log: {}", e));
				status.task_finished(task, false);
				return TaskResult::failed();
			}
		}
		if let Some(deps) = discovered_deps {
			let mut dep_log = builder.dep_log.lock().unwrap();
			if let Err(e) = dep_log.insert_deps(
				rule.outputs[0].clone(),
				Some(mtimes_after[0]),
				deps,
			) {
				status.error(&format!("Unable to write the dependency log: {}", e));
				status.task_finished(task, false);
				return TaskResult::failed();
			}
		}

		if !command.rspfile.is_empty() && !builder.options.keep_rspfiles {
			if let Err(e) = disk.remove_file(command.rspfile.as_path()) {
				warn!("Unable to remove {:?}: {}", command.rspfile, e);
			}
		}

		// If an output is some other task's dyndep file, load it now, and
		// tell the caller which extra dependencies the waiting tasks got.
		let mut new_deps = Vec::new();
		for output in &outputs {
			let consumers = match self.dyndep_consumers.get(&output[..]) {
				Some(consumers) => consumers,
				None => continue,
			};
			let mut store = builder.dyndep.lock().unwrap();
			if let Err(e) = store.load_file(spec, output) {
				status.error(&format!("{}", e));
				status.task_finished(task, false);
				return TaskResult::failed();
			}
			for &consumer in consumers {
				if consumer == task {
					continue;
				}
				if let Some(entry) = store.get(consumer) {
					for input in &entry.implicit_inputs {
						let producer = builder
							.graph
							.node_id(input)
							.and_then(|node| builder.graph[node].in_edge);
						if let Some(producer) = producer {
							if producer != task {
								new_deps.push((consumer, producer));
							}
						}
					}
				}
			}
		}

		status.task_finished(task, true);
		TaskResult {
			success: true,
			restat_recheck: restat,
			new_deps,
		}
	}
}
