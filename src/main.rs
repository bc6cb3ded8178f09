mod logger;
mod status;

use self::status::ConsoleStatus;
use log::warn;
use ninka::build::{BuildOptions, BuildSummary, Builder};
use ninka::buildlog::BuildLogMut;
use ninka::deplog::DepLogMut;
use ninka::disk::RealDisk;
use ninka::dyndep::DyndepStore;
use ninka::graph::{Graph, GraphOptions};
use ninka::manifest::canonicalizepath::canonicalize_path_in_place;
use ninka::manifest::{read, Spec};
use ninka::mtime::StatCache;
use ninka::outdated::Scanner;
use ninka::queue::{BuildQueue, TaskInfo};
use raw_string::RawString;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(
	name = "ninka",
	about = "An implementation of the ninja build system."
)]
struct Options {
	/// The targets to build. The spec's default targets if empty.
	targets: Vec<String>,

	/// Change to this directory before doing anything else.
	#[structopt(short = "C", parse(from_os_str))]
	directory: Option<PathBuf>,

	/// The build specification file.
	#[structopt(
		short = "f",
		long = "file",
		default_value = "build.ninja",
		parse(from_os_str)
	)]
	file: PathBuf,

	/// Run this many jobs in parallel.
	#[structopt(short = "j", long = "jobs")]
	jobs: Option<usize>,

	/// Keep going until this many jobs fail. 0 means keep going.
	#[structopt(short = "k", long = "keep-going", default_value = "1")]
	keep_going: usize,

	/// Dry run: don't run any commands, pretend they all succeed.
	#[structopt(short = "n", long = "dry-run")]
	dry_run: bool,

	/// Show debug messages.
	#[structopt(short = "v", long = "verbose")]
	verbose: bool,

	/// Turn warnings into errors: dupbuild=err, phonycycle=err.
	#[structopt(short = "w", long = "warn")]
	warnings: Vec<String>,

	/// Debugging tweaks: keepdepfile, keeprsp.
	#[structopt(short = "d", long = "debug")]
	debug: Vec<String>,
}

static CANCELLED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: nix::libc::c_int) {
	CANCELLED.store(true, Ordering::Relaxed);
}

fn main() {
	exit(run());
}

fn run() -> i32 {
	let options = Options::from_args();

	logger::init(options.verbose);

	if let Some(dir) = &options.directory {
		if let Err(e) = std::env::set_current_dir(dir) {
			eprintln!("ninka: Unable to change to {:?}: {}", dir, e);
			return 1;
		}
	}

	let mut graph_options = GraphOptions::default();
	for warning in &options.warnings {
		match warning.as_str() {
			"dupbuild=err" => graph_options.dupe_edges_should_err = true,
			"dupbuild=warn" => graph_options.dupe_edges_should_err = false,
			"phonycycle=err" => graph_options.phony_cycle_should_err = true,
			"phonycycle=warn" => graph_options.phony_cycle_should_err = false,
			other => {
				eprintln!("ninka: Unknown warning flag: {}", other);
				return 1;
			}
		}
	}

	let build_options = BuildOptions {
		n_threads: options.jobs.unwrap_or_else(default_parallelism),
		dry_run: options.dry_run,
		keep_depfiles: options.debug.iter().any(|d| d == "keepdepfile"),
		keep_rspfiles: options.debug.iter().any(|d| d == "keeprsp"),
	};

	{
		use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
		let action = SigAction::new(
			SigHandler::Handler(handle_sigint),
			SaFlags::empty(),
			SigSet::empty(),
		);
		if let Err(e) = unsafe { sigaction(Signal::SIGINT, &action) } {
			warn!("Unable to install the interrupt handler: {}", e);
		}
	}

	// The spec file can be a target of its own build. Bring it up to date
	// first, re-reading it as long as that changes it.
	let mut spec;
	let mut graph;
	let mut generations = 0;
	loop {
		spec = match read(&options.file) {
			Ok(spec) => spec,
			Err(e) => {
				eprintln!("ninka: {}", e);
				return 1;
			}
		};
		graph = match Graph::new(&mut spec, graph_options) {
			Ok(graph) => graph,
			Err(e) => {
				eprintln!("ninka: {}", e);
				return 1;
			}
		};

		generations += 1;
		if generations > 100 {
			warn!("The spec file kept changing; giving up on regenerating it");
			break;
		}

		let mut spec_path = RawString::from(options.file.to_string_lossy().into_owned());
		canonicalize_path_in_place(&mut spec_path);
		let spec_node = match graph.node_id(&spec_path) {
			Some(node) if graph[node].in_edge.is_some() => node,
			_ => break,
		};

		match build_targets(&spec, &graph, &[spec_node], &options, build_options) {
			Ok((summary, n_started)) if summary.success => {
				if n_started == 0 {
					break;
				}
				// The spec was regenerated; read the new one.
			}
			Ok((summary, _)) => return exit_code(&summary),
			Err(code) => return code,
		}
	}

	// Figure out which targets to build: the requested ones, the spec's
	// defaults, or everything nothing else depends on.
	let mut targets = Vec::new();
	if !options.targets.is_empty() {
		for target in &options.targets {
			let mut path = RawString::from(target.clone());
			canonicalize_path_in_place(&mut path);
			match graph.node_id(&path) {
				Some(node) => targets.push(node),
				None => {
					eprintln!("ninka: Unknown target: {}", target);
					return 1;
				}
			}
		}
	} else if !spec.default_targets.is_empty() {
		for path in &spec.default_targets {
			match graph.node_id(path) {
				Some(node) => targets.push(node),
				None => {
					eprintln!("ninka: Unknown default target: {}", path);
					return 1;
				}
			}
		}
	} else {
		targets = graph.root_nodes();
		if targets.is_empty() {
			eprintln!("ninka: No targets, and no rules to make any.");
			return 1;
		}
	}

	match build_targets(&spec, &graph, &targets, &options, build_options) {
		Ok((summary, _)) => exit_code(&summary),
		Err(code) => code,
	}
}

fn exit_code(summary: &BuildSummary) -> i32 {
	if summary.success {
		0
	} else if summary.interrupted && summary.n_failed == 0 {
		2
	} else {
		1
	}
}

/// Scan the given target nodes and run everything that's outdated.
///
/// Returns the build summary and the number of commands started, or an
/// exit code when the build can't even start.
fn build_targets(
	spec: &Spec,
	graph: &Graph,
	targets: &[usize],
	options: &Options,
	build_options: BuildOptions,
) -> Result<(BuildSummary, usize), i32> {
	let build_dir = spec.build_dir();
	if let Err(e) = std::fs::create_dir_all(build_dir) {
		eprintln!("ninka: Unable to create {:?}: {}", build_dir, e);
		return Err(1);
	}

	let build_log = match BuildLogMut::open(build_dir.join(".ninja_log")) {
		Ok(log) => Mutex::new(log),
		Err(e) => {
			eprintln!("ninka: Unable to open the build log: {}", e);
			return Err(1);
		}
	};
	let dep_log = match DepLogMut::open(build_dir.join(".ninja_deps")) {
		Ok(log) => Mutex::new(log),
		Err(e) => {
			eprintln!("ninka: Unable to open the dependency log: {}", e);
			return Err(1);
		}
	};

	let mut dyndep_store = DyndepStore::new(spec.build_rules.len());
	let mut stat_cache = StatCache::new();
	if let Err(e) = dyndep_store.load_available(spec, &mut stat_cache) {
		eprintln!("ninka: {}", e);
		return Err(1);
	}

	let outcome = {
		let build_log = build_log.lock().unwrap();
		let dep_log = dep_log.lock().unwrap();
		let scanner = Scanner {
			spec,
			graph,
			build_log: &build_log,
			dep_log: &dep_log,
			dyndep: &dyndep_store,
			stat_cache: &mut stat_cache,
		};
		match scanner.check_targets(targets) {
			Ok(outcome) => outcome,
			Err(cycle) => {
				eprintln!("ninka: {}", cycle);
				return Err(1);
			}
		}
	};

	for error in &outcome.errors {
		eprintln!("ninka: {}", error);
	}
	if !outcome.errors.is_empty() && options.keep_going == 1 {
		return Err(1);
	}

	let pool_depths: Vec<u16> = spec.pools.iter().map(|pool| pool.depth).collect();
	let queue = BuildQueue::new(
		spec.build_rules.len(),
		&pool_depths,
		options.keep_going,
		outcome.targets.iter().cloned(),
		|task| TaskInfo {
			phony: spec.build_rules[task].is_phony(),
			pool: spec.build_rules[task]
				.command
				.as_ref()
				.map_or(0, |c| c.pool),
			outdated: outcome.outdated[task],
			dependencies: outcome.deps[task].iter().cloned(),
		},
	)
	.make_async();

	let dyndep = Mutex::new(dyndep_store);
	let console = ConsoleStatus::new(spec);
	let builder = Builder {
		spec,
		graph,
		queue: &queue,
		build_log: &build_log,
		dep_log: &dep_log,
		dyndep: &dyndep,
		status: &console,
		disk: &RealDisk,
		options: build_options,
		start_time: Instant::now(),
		cancel: Some(&CANCELLED),
	};
	let mut summary = builder.run();
	if !outcome.errors.is_empty() {
		summary.success = false;
	}
	Ok((summary, console.n_started()))
}

fn default_parallelism() -> usize {
	let n = unsafe { nix::libc::sysconf(nix::libc::_SC_NPROCESSORS_ONLN) };
	if n > 0 {
		n as usize + 2
	} else {
		3
	}
}
