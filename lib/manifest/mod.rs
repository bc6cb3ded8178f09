//! Everything related to the `build.ninja` file format.
//!
//! > `build.ninja` file → [`read()`] → [`Spec`]

mod eat;
mod read;

pub mod canonicalizepath;
pub mod error;
pub mod eval;
pub mod parse;

pub use self::read::read;
pub use self::read::read_from;

use raw_string::unix::RawStrExt;
use raw_string::RawString;
use std::collections::BTreeMap;
use std::path::Path;

/// The result of reading a `build.ninja` file: the specification of how to
/// build what.
#[derive(Debug)]
pub struct Spec {
	/// All the build rules.
	pub build_rules: Vec<BuildRule>,
	/// The targets to build when none are requested, already canonicalized.
	pub default_targets: Vec<RawString>,
	/// The build dir specified by `builddir = ..`, if any.
	pub build_dir: Option<RawString>,
	/// All the pools, by pool ID.
	///
	/// Pool 0 is the default pool (unlimited), pool 1 is `console`.
	pub pools: Vec<Pool>,
	/// The slash bits of canonicalized paths which originally used other
	/// separators. Paths not in here have no bits set.
	pub slash_bits: BTreeMap<RawString, u64>,
}

/// The pool ID of the default (unlimited) pool.
pub const DEFAULT_POOL: usize = 0;

/// The pool ID of the built-in `console` pool.
pub const CONSOLE_POOL: usize = 1;

/// A named limit on the number of concurrently running build rules.
#[derive(Debug)]
pub struct Pool {
	pub name: String,
	/// The maximum number of concurrent jobs. 0 means unlimited.
	pub depth: u16,
}

/// How to build a set of outputs from a set of inputs.
///
/// The direct result of a single `build` definition in the ninja file. All
/// paths are expanded and canonicalized.
#[derive(Debug)]
pub struct BuildRule {
	/// The outputs: first the explicit ones, then the implicit ones.
	///
	/// Never empty, if produced by [`read()`].
	pub outputs: Vec<RawString>,
	/// How many of the `outputs` are explicit (listed before the `|`).
	pub explicit_outputs: usize,
	/// The inputs: first the explicit ones, then the implicit ones.
	pub inputs: Vec<RawString>,
	/// How many of the `inputs` are explicit (listed before the `|`).
	pub explicit_inputs: usize,
	/// The order-only dependencies (listed after `||`).
	pub order_deps: Vec<RawString>,
	/// The validation targets (listed after `|@`).
	///
	/// These are built whenever this rule's outputs are requested, but
	/// nothing waits for them.
	pub validations: Vec<RawString>,
	/// The details of the command to run, or `None` for phony rules.
	pub command: Option<BuildCommand>,
}

impl BuildRule {
	/// Check if the build rule is just a phony rule.
	///
	/// Returns true iff `command` is `None`.
	pub fn is_phony(&self) -> bool {
		self.command.is_none()
	}
}

/// The method of discovering extra dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepStyle {
	/// Through a Makefile-formatted file as specified by `depfile`.
	Gcc,
	/// Through specific messages detected on the standard output.
	Msvc,
}

/// The command to run for a non-phony `BuildRule`.
#[derive(Debug)]
pub struct BuildCommand {
	/// The name of the rule which was used for this build rule.
	pub rule_name: String,
	/// The (shell-escaped) command to be executed.
	pub command: RawString,
	/// The description to be shown to the user.
	pub description: RawString,
	/// The file to read the extra dependencies from.
	pub depfile: RawString,
	/// The way extra dependencies are to be discovered.
	pub deps: Option<DepStyle>,
	/// The message to watch for on standard output for extra dependencies.
	pub msvc_deps_prefix: RawString,
	/// Rule is used to re-invoke the generator.
	///
	/// Generator rules are not re-run when only their command line changed.
	pub generator: bool,
	/// Re-stat the outputs after running to check if they actually changed.
	pub restat: bool,
	/// A file to write before executing the command.
	pub rspfile: RawString,
	/// The contents of the file to write before executing the command.
	pub rspfile_content: RawString,
	/// The pool in which the command runs, as an index into
	/// [`Spec::pools`].
	pub pool: usize,
	/// The file which restates this rule's dependencies during the build,
	/// if any. Also appears in the inputs or order-only dependencies.
	pub dyndep: Option<RawString>,
}

impl Spec {
	/// Create an empty specification.
	pub fn new() -> Self {
		Spec {
			build_rules: Vec::new(),
			default_targets: Vec::new(),
			build_dir: None,
			pools: vec![
				Pool {
					name: String::new(),
					depth: 0,
				},
				Pool {
					name: "console".to_string(),
					depth: 1,
				},
			],
			slash_bits: BTreeMap::new(),
		}
	}

	/// The directory to keep the build log and dependency log in.
	pub fn build_dir(&self) -> &Path {
		self.build_dir
			.as_ref()
			.map_or(Path::new("."), |dir| dir.as_path())
	}
}
