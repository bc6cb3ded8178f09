//! Parsing of Makefile-style dependency files.
//!
//! Compilers write these with flags like `-MD`: a target, a colon, and the
//! headers the target depends on, possibly over multiple `\`-continued
//! lines. Only the subset of Makefile syntax that compilers actually emit is
//! understood here.

use log::warn;
use raw_string::{RawStr, RawString};
use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind, Read};
use std::mem::replace;
use std::path::Path;

/// Read a Makefile-style dependency file.
///
/// Returns the first output named in the file, and the dependencies of all
/// rules in the file, in encounter order, without duplicates. (Files written
/// with `-MP` contain an extra empty rule per header; their dependencies all
/// belong to the one real output.)
///
/// Extra outputs are ignored with a warning.
pub fn read_deps_file(file_name: &Path) -> Result<(RawString, Vec<RawString>), Error> {
	read_deps_from(File::open(file_name)?)
}

#[derive(Default)]
struct State {
	/// The (incomplete) path we're currently reading.
	path: RawString,
	/// The outputs read so far, before the `:` was seen.
	outputs: Vec<RawString>,
	/// The first output of the first rule in the file.
	target: Option<RawString>,
	/// Whether the current rule's `:` has been seen.
	in_deps: bool,
	/// The dependencies read so far, deduplicated.
	deps: Vec<RawString>,
}

impl State {
	fn add_part(&mut self, s: &RawStr) {
		self.path.push_str(s);
	}

	fn finish_path(&mut self) -> Result<(), Error> {
		let mut path = replace(&mut self.path, RawString::new());
		if self.in_deps {
			if !path.is_empty() && !self.deps.contains(&path) {
				self.deps.push(path);
			}
		} else if path.last() == Some(b':') {
			path.pop();
			if !path.is_empty() {
				self.outputs.push(path);
			}
			if self.outputs.is_empty() {
				return Err(Error::new(
					ErrorKind::InvalidData,
					"Rule in dependency file has no outputs",
				));
			}
			for extra in &self.outputs[1..] {
				warn!("Ignoring extra output {:?} in dependency file", extra);
			}
			let first = self.outputs.drain(..).next().unwrap();
			if self.target.is_none() {
				self.target = Some(first);
			}
			self.in_deps = true;
		} else if !path.is_empty() {
			self.outputs.push(path);
		}
		Ok(())
	}

	fn finish_rule(&mut self) -> Result<(), Error> {
		self.finish_path()?;
		if !self.in_deps && !self.outputs.is_empty() {
			return Err(Error::new(
				ErrorKind::InvalidData,
				"Missing `:' in dependency file",
			));
		}
		self.in_deps = false;
		self.outputs.clear();
		Ok(())
	}
}

fn is_separator(c: u8) -> bool {
	c == b' ' || c == b'\t' || c == b'\\' || c == b'$' || c == b'#'
}

fn read_deps_from(file: impl Read) -> Result<(RawString, Vec<RawString>), Error> {
	let mut file = BufReader::new(file);

	let mut state = State::default();

	let mut line = RawString::new();

	loop {
		line.clear();
		if file.read_until(b'\n', &mut line.as_mut_bytes())? == 0 {
			break;
		}

		if line.last() == Some(b'\n') {
			line.pop();
		}

		if line.last() == Some(b'\r') {
			line.pop();
		}

		let mut write_offset = 0;
		let mut read_offset = 0;

		loop {
			match line[read_offset..]
				.bytes()
				.position(is_separator)
				.map(|i| i + read_offset)
			{
				Some(i) if line[i] == b'\\' && i + 1 == line.len() => {
					// Backslash at the end of the line: continuation.
					state.add_part(&line[write_offset..i]);
					state.finish_path()?;
					break;
				}
				Some(i) if line[i] == b'\\' => {
					// Backslash before a character.
					match line[i + 1] {
						b' ' | b'\\' | b'#' | b'*' | b'[' | b']' | b'|' => {
							// Escaped character. Drop the '\'.
							state.add_part(&line[write_offset..i]);
							write_offset = i + 1;
						}
						_ => (), // Keep the '\'.
					}
					read_offset = i + 2;
				}
				Some(i) if line[i] == b'$' => {
					if line.get(i + 1) == Some(&b'$') {
						// "$$" is a literal '$'.
						state.add_part(&line[write_offset..i + 1]);
						write_offset = i + 2;
						read_offset = i + 2;
					} else {
						read_offset = i + 1;
					}
				}
				Some(i) if line[i] == b'#' => {
					// Comment until the end of the line.
					state.add_part(&line[write_offset..i]);
					state.finish_rule()?;
					break;
				}
				Some(i) => {
					// A space or tab.
					state.add_part(&line[write_offset..i]);
					state.finish_path()?;
					write_offset = i + 1;
					read_offset = i + 1;
				}
				None => {
					// End of the line.
					state.add_part(&line[write_offset..]);
					state.finish_rule()?;
					break;
				}
			}
		}
	}

	if !state.path.is_empty() || !state.outputs.is_empty() || state.in_deps {
		state.finish_rule()?;
	}

	match state.target.take() {
		Some(target) => Ok((target, state.deps)),
		None => Err(Error::new(
			ErrorKind::InvalidData,
			"Dependency file has no rules",
		)),
	}
}
