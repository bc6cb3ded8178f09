//! Checking which build rules are outdated.
//!
//! The [`Scanner`] walks the graph from the requested targets and decides,
//! for every build rule it passes, whether that rule has to run. The
//! verdict for one rule only looks at its own outputs and inputs; "my input
//! is about to be rebuilt, so I will be outdated too" is handled later, by
//! the [`queue`][crate::queue], when the input's rule actually runs. That
//! split is what makes `restat` work: a rule that ran but changed nothing
//! does not drag its dependents along.
//!
//! A rule is outdated when any of these hold:
//!
//!  - an output is missing,
//!  - an input (including dependencies recorded in the dependency log) is
//!    newer than the oldest output,
//!  - the command changed since the build log last saw the output,
//!  - the dependency log has no (or stale) information for a rule that
//!    declared `deps`,
//!  - its dyndep file has not been loaded yet.

use crate::buildlog::{murmur_hash_64a, BuildLog};
use crate::deplog::DepLog;
use crate::dyndep::DyndepStore;
use crate::graph::Graph;
use crate::manifest::Spec;
use crate::mtime::{StatCache, Timestamp};
use crate::queue::DepInfo;
use raw_string::unix::RawStrExt;
use raw_string::{RawStr, RawString};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;

/// Everything the scanner reads while deciding what is outdated.
pub struct Scanner<'a> {
	pub spec: &'a Spec,
	pub graph: &'a Graph,
	pub build_log: &'a BuildLog,
	pub dep_log: &'a DepLog,
	pub dyndep: &'a DyndepStore,
	pub stat_cache: &'a mut StatCache,
}

/// The result of scanning a set of targets.
#[derive(Debug)]
pub struct ScanOutcome {
	/// Per build rule: whether it has to run.
	///
	/// Only meaningful for rules reachable from the targets.
	pub outdated: Vec<bool>,
	/// Per build rule: the rules it has to wait for.
	pub deps: Vec<Vec<DepInfo>>,
	/// The rules to hand to the queue as roots: the ones producing the
	/// requested targets, plus any validation rules picked up on the way.
	pub targets: Vec<usize>,
	/// The targets that cannot be built. Independent targets are still
	/// scanned and built.
	pub errors: Vec<ScanError>,
}

/// Why a target cannot be built.
#[derive(Debug)]
pub enum ScanError {
	/// A file is needed, doesn't exist, and no rule makes it.
	MissingInput {
		input: RawString,
		needed_by: RawString,
	},
	/// A requested target is not produced by any rule and doesn't exist.
	MissingTarget { target: RawString },
}

impl fmt::Display for ScanError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ScanError::MissingInput { input, needed_by } => write!(
				f,
				"{} (needed by {}) does not exist, and no rule makes it",
				input, needed_by
			),
			ScanError::MissingTarget { target } => write!(
				f,
				"{} does not exist, and no rule makes it",
				target
			),
		}
	}
}

impl Error for ScanError {}

/// The build graph contains a dependency cycle.
#[derive(Debug)]
pub struct CycleError {
	/// The outputs along the cycle. First and last are the same.
	pub path: Vec<RawString>,
}

impl fmt::Display for CycleError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Dependency cycle: ")?;
		for (i, path) in self.path.iter().enumerate() {
			if i > 0 {
				write!(f, " -> ")?;
			}
			write!(f, "{}", path)?;
		}
		Ok(())
	}
}

impl Error for CycleError {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mark {
	Unvisited,
	Visiting,
	Visited,
	Failed,
}

enum Visit {
	Cycle(CycleError),
	Failed,
}

struct ScanState {
	marks: Vec<Mark>,
	outdated: Vec<bool>,
	deps: Vec<Vec<DepInfo>>,
	stack: Vec<usize>,
	errors: Vec<ScanError>,
	targets: Vec<usize>,
	pending_validations: Vec<usize>,
	seen_validations: BTreeSet<usize>,
}

impl<'a> Scanner<'a> {
	/// Scan from the given target nodes.
	///
	/// A dependency cycle is fatal. A missing input only poisons the
	/// targets that need it; they are reported in
	/// [`errors`][ScanOutcome::errors] and left out of
	/// [`targets`][ScanOutcome::targets].
	pub fn check_targets(mut self, target_nodes: &[usize]) -> Result<ScanOutcome, CycleError> {
		let n = self.spec.build_rules.len();
		let mut state = ScanState {
			marks: vec![Mark::Unvisited; n],
			outdated: vec![false; n],
			deps: vec![Vec::new(); n],
			stack: Vec::new(),
			errors: Vec::new(),
			targets: Vec::new(),
			pending_validations: Vec::new(),
			seen_validations: BTreeSet::new(),
		};

		for &node in target_nodes {
			match self.graph[node].in_edge {
				Some(edge) => match self.visit(edge, &mut state) {
					Ok(()) => state.targets.push(edge),
					Err(Visit::Cycle(cycle)) => return Err(cycle),
					Err(Visit::Failed) => {}
				},
				None => {
					// A source file: nothing to do, but it has to exist.
					let path = self.graph.path(node);
					if self.stat_cache.mtime(path.as_path()).is_none() {
						state.errors.push(ScanError::MissingTarget {
							target: path.to_owned(),
						});
					}
				}
			}
		}

		// Validations are extra roots: they are built, but nothing waits
		// for them. Their own validations end up in the same list.
		let mut next_validation = 0;
		while next_validation < state.pending_validations.len() {
			let node = state.pending_validations[next_validation];
			next_validation += 1;
			match self.graph[node].in_edge {
				Some(edge) => match self.visit(edge, &mut state) {
					Ok(()) => {
						if !state.targets.contains(&edge) {
							state.targets.push(edge);
						}
					}
					Err(Visit::Cycle(cycle)) => return Err(cycle),
					Err(Visit::Failed) => {}
				},
				None => {
					let path = self.graph.path(node);
					if self.stat_cache.mtime(path.as_path()).is_none() {
						state.errors.push(ScanError::MissingTarget {
							target: path.to_owned(),
						});
					}
				}
			}
		}

		Ok(ScanOutcome {
			outdated: state.outdated,
			deps: state.deps,
			targets: state.targets,
			errors: state.errors,
		})
	}

	fn visit(&mut self, edge: usize, state: &mut ScanState) -> Result<(), Visit> {
		match state.marks[edge] {
			Mark::Visiting => {
				let spec = self.spec;
				let first = state.stack.iter().position(|&e| e == edge).unwrap();
				let mut path: Vec<RawString> = state.stack[first..]
					.iter()
					.map(|&e| spec.build_rules[e].outputs[0].clone())
					.collect();
				path.push(spec.build_rules[edge].outputs[0].clone());
				return Err(Visit::Cycle(CycleError { path }));
			}
			Mark::Visited => return Ok(()),
			Mark::Failed => return Err(Visit::Failed),
			Mark::Unvisited => {}
		}

		state.marks[edge] = Mark::Visiting;
		state.stack.push(edge);
		let result = self.visit_inputs(edge, state);
		state.stack.pop();

		match result {
			Ok(()) => {
				state.outdated[edge] = edge_outdated(
					self.spec,
					self.graph,
					self.build_log,
					self.dep_log,
					self.dyndep,
					self.stat_cache,
					edge,
				);
				state.marks[edge] = Mark::Visited;
				let graph = self.graph;
				for validation in &self.spec.build_rules[edge].validations {
					let node = graph
						.node_id(validation)
						.expect("Validation targets are interned with the graph");
					if state.seen_validations.insert(node) {
						state.pending_validations.push(node);
					}
				}
				Ok(())
			}
			Err(e) => {
				state.marks[edge] = Mark::Failed;
				Err(e)
			}
		}
	}

	fn visit_inputs(&mut self, edge: usize, state: &mut ScanState) -> Result<(), Visit> {
		let spec = self.spec;
		let dyndep = self.dyndep;
		let dep_log = self.dep_log;
		let rule = &spec.build_rules[edge];

		for input in &rule.inputs {
			self.check_input(edge, input, false, true, state)?;
		}
		if let Some(extra) = dyndep.get(edge) {
			for input in &extra.implicit_inputs {
				self.check_input(edge, input, false, true, state)?;
			}
		}
		for input in &rule.order_deps {
			self.check_input(edge, input, true, true, state)?;
		}

		// Dependencies recorded in the dependency log behave like implicit
		// inputs, except that a recorded path that no longer exists just
		// means the rule is outdated, not that the build is broken.
		let uses_deps = rule.command.as_ref().map_or(false, |c| c.deps.is_some());
		if uses_deps {
			if let Some(info) = rule.outputs.first().and_then(|out| dep_log.get(out)) {
				for dep in info.deps() {
					self.check_input(edge, dep, false, false, state)?;
				}
			}
		}

		Ok(())
	}

	fn check_input(
		&mut self,
		edge: usize,
		input: &RawStr,
		order_only: bool,
		required: bool,
		state: &mut ScanState,
	) -> Result<(), Visit> {
		let in_edge = self
			.graph
			.node_id(input)
			.and_then(|id| self.graph[id].in_edge);
		match in_edge {
			Some(dep) => {
				if order_only && state.marks[dep] == Mark::Visiting {
					// An order-only reference back into the rules we're
					// already working on does not make a cycle; there is
					// just nothing extra to wait for.
					return Ok(());
				}
				self.visit(dep, state)?;
				state.deps[edge].push(DepInfo {
					task: dep,
					order_only,
				});
			}
			None => {
				if required && self.stat_cache.mtime(input.as_path()).is_none() {
					state.errors.push(ScanError::MissingInput {
						input: input.to_owned(),
						needed_by: self.spec.build_rules[edge].outputs[0].clone(),
					});
					return Err(Visit::Failed);
				}
			}
		}
		Ok(())
	}
}

/// Decide whether one build rule is outdated, looking only at this rule.
///
/// This is the check the scanner runs for every rule it visits, and the
/// check the builder re-runs on the dependents of a `restat` rule (with the
/// stat cache disabled, so it sees the fresh `mtime`s).
pub fn edge_outdated(
	spec: &Spec,
	graph: &Graph,
	build_log: &BuildLog,
	dep_log: &DepLog,
	dyndep: &DyndepStore,
	stat_cache: &mut StatCache,
	edge: usize,
) -> bool {
	let rule = &spec.build_rules[edge];
	let extra = dyndep.get(edge);

	// The newest regular input.
	let mut newest_input: Option<Timestamp> = None;
	let extra_inputs = extra.map_or(&[][..], |e| &e.implicit_inputs[..]);
	for input in rule.inputs.iter().chain(extra_inputs) {
		if let Some(t) = input_mtime(spec, graph, stat_cache, input) {
			if newest_input.map_or(true, |n| t > n) {
				newest_input = Some(t);
			}
		}
	}

	if rule.is_phony() {
		// An alias with no inputs is never outdated. Otherwise it is
		// outdated when an output that actually exists on disk is older
		// than an input; outputs that don't exist borrow their inputs'
		// mtime (see `input_mtime`), so a plain alias stays clean.
		if rule.inputs.is_empty() {
			return false;
		}
		for output in &rule.outputs {
			if let Some(t) = stat_cache.mtime(output.as_path()) {
				if Some(t) < newest_input {
					return true;
				}
			}
		}
		return false;
	}
	let command = rule.command.as_ref().unwrap();

	// A rule whose dyndep file hasn't been loaded yet must at least run
	// its dependency discovery before it can be called clean.
	if command.dyndep.is_some() && extra.is_none() {
		return true;
	}

	// All outputs have to exist; remember the oldest.
	let mut oldest_output: Option<Timestamp> = None;
	let extra_outputs = extra.map_or(&[][..], |e| &e.implicit_outputs[..]);
	for output in rule.outputs.iter().chain(extra_outputs) {
		match stat_cache.mtime(output.as_path()) {
			Some(t) => {
				if oldest_output.map_or(true, |o| t < o) {
					oldest_output = Some(t);
				}
			}
			None => return true,
		}
	}

	// The command changed since an output was last built.
	if !command.generator {
		let hash = murmur_hash_64a(command.command.as_bytes());
		for output in &rule.outputs {
			if let Some(entry) = build_log.entries.get(output) {
				if entry.command_hash != hash {
					return true;
				}
			}
		}
	}

	// The dependency log has to have fresh information for rules that
	// discover dependencies.
	if command.deps.is_some() {
		match rule.outputs.first().and_then(|out| dep_log.get(out)) {
			None => return true,
			Some(info) => {
				let recorded = info.mtime();
				for dep in info.deps() {
					match stat_cache.mtime(dep.as_path()) {
						// A recorded dependency disappeared.
						None => return true,
						Some(t) => {
							// The dependency information predates this
							// dependency's last change.
							if Some(t) > recorded {
								return true;
							}
							if newest_input.map_or(true, |n| t > n) {
								newest_input = Some(t);
							}
						}
					}
				}
			}
		}
	}

	// Finally the plain mtime comparison, with the restat escape hatch:
	// for restat rules the build log remembers which input mtime the
	// outputs were up to date with, even when the outputs themselves kept
	// an older mtime.
	let mut input_newer = match (newest_input, oldest_output) {
		(Some(i), Some(o)) => i > o,
		_ => false,
	};
	let restat = command.restat || extra.map_or(false, |e| e.restat);
	if input_newer && restat {
		let mut logged: Option<Timestamp> = None;
		let mut all_logged = true;
		for output in &rule.outputs {
			match build_log.entries.get(output).and_then(|e| e.mtime) {
				Some(t) => {
					if logged.map_or(true, |l| t < l) {
						logged = Some(t);
					}
				}
				None => {
					all_logged = false;
					break;
				}
			}
		}
		if all_logged && newest_input <= logged {
			input_newer = false;
		}
	}
	input_newer
}

/// The `mtime` of a path when used as an input.
///
/// A path which does not exist but is produced by a phony rule takes the
/// mtime of that rule's newest input, so that depending on an alias is the
/// same as depending on what it aliases.
fn input_mtime(
	spec: &Spec,
	graph: &Graph,
	stat_cache: &mut StatCache,
	path: &RawStr,
) -> Option<Timestamp> {
	if let Some(t) = stat_cache.mtime(path.as_path()) {
		return Some(t);
	}
	let in_edge = graph.node_id(path).and_then(|id| graph[id].in_edge)?;
	let rule = &spec.build_rules[in_edge];
	if !rule.is_phony() {
		return None;
	}
	let mut newest = None;
	for input in &rule.inputs {
		let t = input_mtime(spec, graph, stat_cache, input);
		if t > newest {
			newest = t;
		}
	}
	newest
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::graph::{Graph, GraphOptions};
	use crate::manifest::read_from;
	use crate::mtime::mtime;
	use std::fs;
	use std::path::Path;
	use std::thread::sleep;
	use std::time::Duration;

	/// Writes `path` far enough after any earlier write that its mtime is
	/// strictly newer.
	fn touch(path: &Path, contents: &str) {
		sleep(Duration::from_millis(15));
		fs::write(path, contents).unwrap();
	}

	fn spec_and_graph(dir: &Path, source: &str) -> (Spec, Graph) {
		let source = source.replace("@dir@", &dir.display().to_string());
		let mut spec = read_from("test.ninja".as_ref(), source.as_bytes()).unwrap();
		let graph = Graph::new(&mut spec, GraphOptions::default()).unwrap();
		(spec, graph)
	}

	fn scan(
		spec: &Spec,
		graph: &Graph,
		build_log: &BuildLog,
		dep_log: &DepLog,
		dir: &Path,
		targets: &[&str],
	) -> Result<ScanOutcome, CycleError> {
		let dyndep = DyndepStore::new(spec.build_rules.len());
		let mut stat_cache = StatCache::new();
		let nodes: Vec<usize> = targets
			.iter()
			.map(|t| {
				let path = format!("{}/{}", dir.display(), t);
				graph.node_id(RawStr::from_str(&path)).unwrap()
			})
			.collect();
		Scanner {
			spec,
			graph,
			build_log,
			dep_log,
			dyndep: &dyndep,
			stat_cache: &mut stat_cache,
		}
		.check_targets(&nodes)
	}

	const TWO_STEP: &str = "rule cc\n\
		\x20 command = cc\n\
		build @dir@/a.o: cc @dir@/a.c\n\
		build @dir@/app: cc @dir@/a.o\n";

	#[test]
	fn missing_outputs_are_outdated() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(dir.path(), TWO_STEP);
		fs::write(dir.path().join("a.c"), "int x;").unwrap();
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["app"],
		)
		.unwrap();
		assert!(outcome.errors.is_empty());
		assert!(outcome.outdated[0]);
		assert!(outcome.outdated[1]);
		assert_eq!(outcome.targets, vec![1]);
		assert_eq!(
			outcome.deps[1],
			vec![DepInfo {
				task: 0,
				order_only: false
			}]
		);
	}

	#[test]
	fn up_to_date_outputs_are_clean() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(dir.path(), TWO_STEP);
		fs::write(dir.path().join("a.c"), "int x;").unwrap();
		touch(&dir.path().join("a.o"), "obj");
		touch(&dir.path().join("app"), "bin");
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["app"],
		)
		.unwrap();
		assert!(!outcome.outdated[0]);
		assert!(!outcome.outdated[1]);
	}

	#[test]
	fn newer_inputs_make_outputs_outdated() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(dir.path(), TWO_STEP);
		fs::write(dir.path().join("a.o"), "obj").unwrap();
		touch(&dir.path().join("app"), "bin");
		touch(&dir.path().join("a.c"), "int x;");
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["app"],
		)
		.unwrap();
		assert!(outcome.outdated[0]);
		// The link step itself is still clean; it only reruns if compiling
		// actually changes a.o.
		assert!(!outcome.outdated[1]);
	}

	#[test]
	fn changed_commands_make_outputs_outdated() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(dir.path(), TWO_STEP);
		fs::write(dir.path().join("a.c"), "int x;").unwrap();
		touch(&dir.path().join("a.o"), "obj");
		touch(&dir.path().join("app"), "bin");

		let mut build_log = BuildLog::new();
		let entry = crate::buildlog::Entry {
			start_time_ms: 0,
			end_time_ms: 1,
			mtime: None,
			command_hash: murmur_hash_64a(b"cc"),
		};
		build_log.entries.insert(
			RawString::from(format!("{}/a.o", dir.path().display())),
			entry,
		);
		let mut old_command = entry;
		old_command.command_hash = 0x1234;
		build_log.entries.insert(
			RawString::from(format!("{}/app", dir.path().display())),
			old_command,
		);

		let outcome = scan(
			&spec,
			&graph,
			&build_log,
			&DepLog::new(),
			dir.path(),
			&["app"],
		)
		.unwrap();
		// a.o was built by this same command, app by a different one.
		assert!(!outcome.outdated[0]);
		assert!(outcome.outdated[1]);
	}

	#[test]
	fn generator_rules_ignore_command_changes() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule gen\n\
			 \x20 command = gen\n\
			 \x20 generator = 1\n\
			 build @dir@/build.ninja: gen @dir@/conf\n",
		);
		fs::write(dir.path().join("conf"), "x").unwrap();
		touch(&dir.path().join("build.ninja"), "rules");

		let mut build_log = BuildLog::new();
		build_log.entries.insert(
			RawString::from(format!("{}/build.ninja", dir.path().display())),
			crate::buildlog::Entry {
				start_time_ms: 0,
				end_time_ms: 1,
				mtime: None,
				command_hash: 0x1234,
			},
		);
		let outcome = scan(
			&spec,
			&graph,
			&build_log,
			&DepLog::new(),
			dir.path(),
			&["build.ninja"],
		)
		.unwrap();
		assert!(!outcome.outdated[0]);
	}

	const WITH_DEPS: &str = "rule cc\n\
		\x20 command = cc\n\
		\x20 deps = gcc\n\
		\x20 depfile = $out.d\n\
		build @dir@/a.o: cc @dir@/a.c\n";

	#[test]
	fn deps_rules_need_a_deps_log_entry() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(dir.path(), WITH_DEPS);
		fs::write(dir.path().join("a.c"), "int x;").unwrap();
		touch(&dir.path().join("a.o"), "obj");
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["a.o"],
		)
		.unwrap();
		assert!(outcome.outdated[0]);
	}

	#[test]
	fn recorded_deps_participate_in_the_mtime_check() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(dir.path(), WITH_DEPS);
		fs::write(dir.path().join("hdr.h"), "x").unwrap();
		touch(&dir.path().join("a.c"), "int x;");
		touch(&dir.path().join("a.o"), "obj");
		let out_path = RawString::from(format!("{}/a.o", dir.path().display()));
		let hdr_path = RawString::from(format!("{}/hdr.h", dir.path().display()));

		let deps_file = dir.path().join(".ninja_deps");
		{
			let mut dep_log = crate::deplog::DepLogMut::open(&deps_file).unwrap();
			dep_log
				.insert_deps(
					out_path.clone(),
					mtime(&dir.path().join("a.o")).unwrap(),
					vec![hdr_path.clone()],
				)
				.unwrap();
		}
		let dep_log = DepLog::read(&deps_file).unwrap();

		// Everything recorded and older than the output: clean.
		let outcome = scan(&spec, &graph, &BuildLog::new(), &dep_log, dir.path(), &["a.o"]).unwrap();
		assert!(!outcome.outdated[0]);

		// The recorded header changed: outdated.
		touch(&dir.path().join("hdr.h"), "y");
		let outcome = scan(&spec, &graph, &BuildLog::new(), &dep_log, dir.path(), &["a.o"]).unwrap();
		assert!(outcome.outdated[0]);

		// The recorded header disappeared: outdated.
		fs::remove_file(dir.path().join("hdr.h")).unwrap();
		let outcome = scan(&spec, &graph, &BuildLog::new(), &dep_log, dir.path(), &["a.o"]).unwrap();
		assert!(outcome.outdated[0]);
	}

	#[test]
	fn restat_log_entry_keeps_rule_clean() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule cc\n\
			 \x20 command = cc\n\
			 \x20 restat = 1\n\
			 build @dir@/a.o: cc @dir@/a.c\n",
		);
		fs::write(dir.path().join("a.o"), "obj").unwrap();
		touch(&dir.path().join("a.c"), "int x;");

		// Without a log entry the newer input wins.
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["a.o"],
		)
		.unwrap();
		assert!(outcome.outdated[0]);

		// The build log says the output was up to date with an input this
		// new, so the rule is clean even though the output file is older.
		let mut build_log = BuildLog::new();
		build_log.entries.insert(
			RawString::from(format!("{}/a.o", dir.path().display())),
			crate::buildlog::Entry {
				start_time_ms: 0,
				end_time_ms: 1,
				mtime: mtime(&dir.path().join("a.c")).unwrap(),
				command_hash: murmur_hash_64a(b"cc"),
			},
		);
		let outcome = scan(&spec, &graph, &build_log, &DepLog::new(), dir.path(), &["a.o"]).unwrap();
		assert!(!outcome.outdated[0]);
	}

	#[test]
	fn phony_aliases_stay_clean() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule cc\n\
			 \x20 command = cc\n\
			 build @dir@/app: cc @dir@/a.c\n\
			 build @dir@/all: phony @dir@/app\n",
		);
		fs::write(dir.path().join("a.c"), "int x;").unwrap();
		touch(&dir.path().join("app"), "bin");
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["all"],
		)
		.unwrap();
		assert!(!outcome.outdated[0]);
		assert!(!outcome.outdated[1]);
	}

	#[test]
	fn cycles_are_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule cc\n\
			 \x20 command = cc\n\
			 build @dir@/a: cc @dir@/b\n\
			 build @dir@/b: cc @dir@/a\n",
		);
		let cycle = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["a"],
		)
		.unwrap_err();
		assert!(cycle.path.len() >= 3);
	}

	#[test]
	fn order_only_references_do_not_make_cycles() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule cc\n\
			 \x20 command = cc\n\
			 build @dir@/a: cc @dir@/src || @dir@/b\n\
			 build @dir@/b: cc @dir@/a\n",
		);
		fs::write(dir.path().join("src"), "x").unwrap();
		// b order-depends on nothing new once a is already being scanned.
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["b"],
		);
		assert!(outcome.is_ok());
	}

	#[test]
	fn missing_inputs_poison_only_their_targets() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule cc\n\
			 \x20 command = cc\n\
			 build @dir@/bad: cc @dir@/nonexistent\n\
			 build @dir@/good: cc @dir@/src\n",
		);
		fs::write(dir.path().join("src"), "x").unwrap();
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["bad", "good"],
		)
		.unwrap();
		assert_eq!(outcome.errors.len(), 1);
		assert_eq!(outcome.targets, vec![1]);
	}

	#[test]
	fn validations_become_extra_targets() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule cc\n\
			 \x20 command = cc\n\
			 build @dir@/a.o: cc @dir@/a.c |@ @dir@/check\n\
			 build @dir@/check: cc @dir@/a.c\n",
		);
		fs::write(dir.path().join("a.c"), "int x;").unwrap();
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["a.o"],
		)
		.unwrap();
		assert!(outcome.targets.contains(&0));
		assert!(outcome.targets.contains(&1));
		// Nothing waits for the validation.
		assert!(outcome.deps[0].is_empty());
	}

	#[test]
	fn unloaded_dyndep_files_force_a_run() {
		let dir = tempfile::tempdir().unwrap();
		let (spec, graph) = spec_and_graph(
			dir.path(),
			"rule cc\n\
			 \x20 command = cc\n\
			 \x20 dyndep = @dir@/dd\n\
			 rule scan\n\
			 \x20 command = scan\n\
			 build @dir@/a.o: cc @dir@/a.c || @dir@/dd\n\
			 build @dir@/dd: scan @dir@/a.c\n",
		);
		fs::write(dir.path().join("a.c"), "int x;").unwrap();
		touch(&dir.path().join("a.o"), "obj");
		touch(&dir.path().join("dd"), "ninja_dyndep_version = 1\n");
		// The dyndep file exists but was not loaded into the store, so the
		// rule cannot be proven clean.
		let outcome = scan(
			&spec,
			&graph,
			&BuildLog::new(),
			&DepLog::new(),
			dir.path(),
			&["a.o"],
		)
		.unwrap();
		assert!(outcome.outdated[0]);
	}
}
