//! Loading of dyndep files.
//!
//! A build rule may point at a `dyndep` file which is itself produced
//! during the build, and which restates the rule's implicit inputs and
//! outputs once it exists. Think of Fortran modules: which `.mod` files a
//! compilation really needs is only known after a scanner tool ran.
//!
//! The file format is a restricted `build.ninja`:
//!
//! ```text
//! ninja_dyndep_version = 1
//! build out | extra-out: dyndep | extra-in
//!   restat = 1
//! ```

use crate::error::{AddLocationToError, ErrorWithLocation, Location};
use crate::manifest::canonicalizepath::canonicalize_path_in_place;
use crate::manifest::error::{ExpansionError, ParseError};
use crate::manifest::eval::{expand_str, FileScope};
use crate::manifest::parse::{Parser, Statement};
use crate::manifest::Spec;
use crate::mtime::StatCache;
use raw_string::unix::RawStrExt;
use raw_string::{RawStr, RawString};
use std::error::Error;
use std::fmt;
use std::path::Path;

/// What a dyndep file restated about one build rule.
#[derive(Clone, Debug, Default)]
pub struct DyndepEdge {
	/// Extra implicit inputs of the rule.
	pub implicit_inputs: Vec<RawString>,
	/// Extra implicit outputs of the rule.
	pub implicit_outputs: Vec<RawString>,
	/// Whether the file turned on `restat` for the rule.
	pub restat: bool,
}

/// The dyndep information loaded so far, per build rule.
///
/// Starts out empty; entries appear as dyndep files are loaded, either
/// before scanning (for files that already exist) or mid-build (right after
/// the rule producing the file finished).
#[derive(Debug)]
pub struct DyndepStore {
	entries: Vec<Option<DyndepEdge>>,
}

/// A problem with a dyndep file.
#[derive(Debug)]
pub enum DyndepError {
	/// The file did not start with `ninja_dyndep_version = ..`.
	ExpectedVersion,
	/// The version is not one we understand.
	UnsupportedVersion(String),
	/// Something other than a `build` statement after the version.
	UnexpectedStatement,
	/// A `build` statement used a rule other than `dyndep`.
	UnexpectedRule(String),
	/// A variable other than `restat` under a `build` statement.
	UnknownVariable(String),
	/// The file talks about an output which is not an output of any build
	/// rule bound to this file.
	UnknownOutput(RawString),
	/// A build rule bound to this file has no entry in it.
	MissingEntry(RawString),
	/// Some syntax error.
	ParseError(ParseError),
	/// Variable expansion encountered a cycle.
	ExpansionError(ExpansionError),
	/// A problem while trying to open or read the file.
	IoError(std::io::Error),
}

impl fmt::Display for DyndepError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			DyndepError::ExpectedVersion => {
				write!(f, "Expected `ninja_dyndep_version = ..' first")
			}
			DyndepError::UnsupportedVersion(v) => {
				write!(f, "Unsupported dyndep version {}", v)
			}
			DyndepError::UnexpectedStatement => write!(
				f,
				"Expected only `build <output> | .. : dyndep | ..' statements"
			),
			DyndepError::UnexpectedRule(n) => {
				write!(f, "Expected the `dyndep' rule, not {:?}", n)
			}
			DyndepError::UnknownVariable(n) => write!(f, "Unexpected variable: {}", n),
			DyndepError::UnknownOutput(p) => write!(
				f,
				"{} is not an output of any build rule using this dyndep file",
				p
			),
			DyndepError::MissingEntry(p) => {
				write!(f, "No entry for the build rule that generates {}", p)
			}
			DyndepError::ParseError(e) => write!(f, "{}", e),
			DyndepError::ExpansionError(e) => write!(f, "{}", e),
			DyndepError::IoError(e) => write!(f, "{}", e),
		}
	}
}

impl Error for DyndepError {}

impl From<ParseError> for DyndepError {
	fn from(src: ParseError) -> DyndepError {
		DyndepError::ParseError(src)
	}
}

impl From<ErrorWithLocation<ParseError>> for ErrorWithLocation<DyndepError> {
	fn from(src: ErrorWithLocation<ParseError>) -> Self {
		src.convert()
	}
}

impl DyndepStore {
	/// Create a store with no information yet, for `n_rules` build rules.
	pub fn new(n_rules: usize) -> Self {
		DyndepStore {
			entries: vec![None; n_rules],
		}
	}

	/// The loaded dyndep information for a rule, if any.
	pub fn get(&self, edge: usize) -> Option<&DyndepEdge> {
		self.entries[edge].as_ref()
	}

	/// Whether the dyndep file of this rule has been loaded.
	pub fn is_loaded(&self, edge: usize) -> bool {
		self.entries[edge].is_some()
	}

	/// Load every dyndep file that already exists on disk.
	///
	/// Files that don't exist yet are left for the builder to load once the
	/// rules producing them have run.
	pub fn load_available(
		&mut self,
		spec: &Spec,
		stat_cache: &mut StatCache,
	) -> Result<(), ErrorWithLocation<DyndepError>> {
		let mut files = Vec::new();
		for (i, rule) in spec.build_rules.iter().enumerate() {
			if self.entries[i].is_some() {
				continue;
			}
			if let Some(dyndep) = rule.command.as_ref().and_then(|c| c.dyndep.as_ref()) {
				if !files.iter().any(|f| f == dyndep) && stat_cache.mtime(dyndep.as_path()).is_some()
				{
					files.push(dyndep.clone());
				}
			}
		}
		for file in files {
			self.load_file(spec, &file)?;
		}
		Ok(())
	}

	/// Load one dyndep file, filling in the entries of every build rule
	/// bound to it.
	pub fn load_file(
		&mut self,
		spec: &Spec,
		dyndep_path: &RawStr,
	) -> Result<(), ErrorWithLocation<DyndepError>> {
		let file_name = dyndep_path.as_path();
		let source = std::fs::read(file_name)
			.map_err(|e| DyndepError::IoError(e).at(Location::UNKNOWN))?;
		let entries = parse(file_name, &source)?;

		// Every rule bound to this file must have exactly one entry,
		// matched through one of its declared outputs.
		let mut used = vec![false; entries.len()];
		for (i, rule) in spec.build_rules.iter().enumerate() {
			let bound = rule
				.command
				.as_ref()
				.and_then(|c| c.dyndep.as_ref())
				.map_or(false, |d| &d[..] == dyndep_path);
			if !bound {
				continue;
			}
			let entry = entries
				.iter()
				.position(|(output, _)| rule.outputs.contains(output));
			match entry {
				Some(n) => {
					used[n] = true;
					self.entries[i] = Some(entries[n].1.clone());
				}
				None => {
					return Err(DyndepError::MissingEntry(rule.outputs[0].clone())
						.at(Location::UNKNOWN));
				}
			}
		}
		if let Some(n) = used.iter().position(|used| !used) {
			return Err(DyndepError::UnknownOutput(entries[n].0.clone()).at(Location::UNKNOWN));
		}
		Ok(())
	}
}

/// Parse a dyndep file into (explicit output, restated edge) pairs.
fn parse(
	file_name: &Path,
	source: &[u8],
) -> Result<Vec<(RawString, DyndepEdge)>, ErrorWithLocation<DyndepError>> {
	let scope = FileScope::new();
	let mut parser = Parser::new(file_name, RawStr::from_bytes(source));
	let mut entries = Vec::new();
	let mut saw_version = false;

	while let Some(statement) = parser.next_statement()? {
		let loc = parser.location();
		match statement {
			Statement::Variable { name, value } => {
				if name != "ninja_dyndep_version" || saw_version {
					return Err(DyndepError::ExpectedVersion.at(loc));
				}
				let value = expand_str(value, &scope)
					.map_err(|e| DyndepError::ExpansionError(e).at(loc))?;
				if value != "1" && !value.starts_with("1.") {
					return Err(DyndepError::UnsupportedVersion(format!("{}", value)).at(loc));
				}
				saw_version = true;
			}
			Statement::Build {
				rule_name,
				explicit_outputs,
				implicit_outputs,
				explicit_deps,
				implicit_deps,
				order_deps,
				validations,
			} => {
				if !saw_version {
					return Err(DyndepError::ExpectedVersion.at(loc));
				}
				if rule_name != "dyndep" {
					return Err(DyndepError::UnexpectedRule(rule_name.to_string()).at(loc));
				}
				if explicit_outputs.len() != 1
					|| !explicit_deps.is_empty()
					|| !order_deps.is_empty()
					|| !validations.is_empty()
				{
					return Err(DyndepError::UnexpectedStatement.at(loc));
				}

				let mut edge = DyndepEdge::default();
				while let Some(var) = parser.next_variable()? {
					if var.name != "restat" {
						return Err(
							DyndepError::UnknownVariable(var.name.to_string()).at(parser.location())
						);
					}
					edge.restat = true;
				}

				let expand_path = |path: &&RawStr| -> Result<RawString, ErrorWithLocation<DyndepError>> {
					let mut path = expand_str(*path, &scope)
						.map_err(|e| DyndepError::ExpansionError(e).at(loc))?;
					canonicalize_path_in_place(&mut path);
					Ok(path)
				};

				let output = expand_path(&explicit_outputs[0])?;
				for path in &implicit_outputs {
					edge.implicit_outputs.push(expand_path(path)?);
				}
				for path in &implicit_deps {
					edge.implicit_inputs.push(expand_path(path)?);
				}
				entries.push((output, edge));
			}
			_ => return Err(DyndepError::UnexpectedStatement.at(loc)),
		}
	}

	if !saw_version {
		return Err(DyndepError::ExpectedVersion.at(parser.location()));
	}

	Ok(entries)
}
