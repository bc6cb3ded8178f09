//! Reading and writing build logs (i.e. `.ninja_log` files).
//!
//! The build log has one text record per finished command: when it started
//! and finished, the `mtime` of its output when it was recorded, and a hash
//! of the command itself. The hash is what makes "the flags changed, so
//! rebuild" work.

use crate::manifest::BuildRule;
use crate::mtime::Timestamp;
use log::warn;
use raw_string::{RawStr, RawString};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Error, ErrorKind, Seek, SeekFrom, Write};
use std::iter::FromIterator;
use std::path::Path;
use std::time::{Duration, Instant};

mod murmurhash;

pub use self::murmurhash::murmur_hash_64a;

/// The latest entries for all targets in the build log.
#[derive(Clone, Debug)]
pub struct BuildLog {
	pub entries: BTreeMap<RawString, Entry>,
}

/// An entry in the build log for a specific target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Entry {
	/// Milliseconds since the start of the build this entry was made in.
	pub start_time_ms: u32,
	pub end_time_ms: u32,
	/// The `mtime` of the target when the entry was recorded.
	///
	/// For `restat` rules whose output did not change, this is the `mtime`
	/// of the newest input instead, so an unchanged output stays clean on
	/// the next run.
	pub mtime: Option<Timestamp>,
	/// The Murmur64A hash of the command that produced the target.
	pub command_hash: u64,
}

/// A build log opened for appending new entries.
///
/// Dereferences to the [`BuildLog`] holding everything read and written so
/// far.
#[derive(Debug)]
pub struct BuildLogMut {
	log: BuildLog,
	file: BufWriter<File>,
}

impl BuildLog {
	/// Create an empty build log.
	pub fn new() -> BuildLog {
		BuildLog {
			entries: BTreeMap::new(),
		}
	}

	/// Read a build log from a file.
	///
	/// A malformed record makes reading stop with a warning; everything
	/// before it is kept. A malformed header is an error.
	pub fn read(file: impl AsRef<Path>) -> Result<BuildLog, Error> {
		let file = File::open(file.as_ref()).map_err(|e| {
			Error::new(
				e.kind(),
				format!("Unable to read {:?}: {}", file.as_ref(), e),
			)
		})?;
		Ok(BuildLog::read_from(file)?.0)
	}

	/// Read a build log.
	///
	/// Also returns the file offset right after the last well-formed
	/// record, so a writer can truncate a malformed tail away.
	pub fn read_from(file: File) -> Result<(BuildLog, u64), Error> {
		let mut file = BufReader::new(file);

		let mut line = RawString::new();

		let mut valid_len = file.read_until(b'\n', &mut line.as_mut_bytes())? as u64;

		if !line.starts_with("# ninja log v") {
			return Err(Error::new(ErrorKind::InvalidData, "Not a ninja log file"));
		}

		if line.last() == Some(b'\n') {
			line.pop();
		}

		let version: u32 = parse(&line[13..])
			.ok_or_else(|| Error::new(ErrorKind::InvalidData, "Version is not an integer"))?;

		if version != 4 && version != 5 {
			return Err(Error::new(
				ErrorKind::InvalidData,
				format!(
					"Unsupported version {} (only version 4 and 5 are supported)",
					version
				),
			));
		}

		let mut entries = BTreeMap::new();

		loop {
			line.clear();
			let n_read = file.read_until(b'\n', &mut line.as_mut_bytes())?;
			if n_read == 0 {
				break;
			}

			if line.last() != Some(b'\n') {
				// A record without a newline was cut short mid-write.
				warn!("Build log has a truncated last record; ignoring it");
				break;
			}
			line.pop();

			match parse_record(&line, version) {
				Some((key, value)) => {
					// Later records override earlier ones.
					entries.insert(key, value);
				}
				None => {
					warn!("Malformed build log record; ignoring the rest of the log");
					break;
				}
			}

			valid_len += n_read as u64;
		}

		Ok((BuildLog { entries }, valid_len))
	}

	/// Rewrite the log at `file`, keeping only the entries for which
	/// `alive` returns true.
	pub fn recompact(
		&self,
		file: impl AsRef<Path>,
		alive: impl Fn(&RawStr) -> bool,
	) -> Result<(), Error> {
		let mut file = BufWriter::new(File::create(file)?);

		file.write_all(b"# ninja log v5\n")?;

		// Write entries in order of finishing time, oldest first, like an
		// append-only log would have looked.
		let mut entries = Vec::from_iter(self.entries.iter().filter(|(path, _)| alive(path)));
		entries.sort_by_key(|(_, entry)| entry.end_time_ms);
		for (output, entry) in entries {
			write_record(&mut file, output, entry)?;
		}

		file.flush()
	}
}

impl BuildLogMut {
	/// Open a build log for appending, or start a new one.
	///
	/// If the existing log has a malformed tail, the tail is removed.
	pub fn open(file: impl AsRef<Path>) -> Result<BuildLogMut, Error> {
		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(file)?;
		if file.metadata()?.len() == 0 {
			file.write_all(b"# ninja log v5\n")?;
			Ok(BuildLogMut {
				log: BuildLog::new(),
				file: BufWriter::new(file),
			})
		} else {
			let (log, valid_len) = BuildLog::read_from(file.try_clone()?)?;
			if file.metadata()?.len() != valid_len {
				file.set_len(valid_len)?;
			}
			file.seek(SeekFrom::End(0))?;
			Ok(BuildLogMut {
				log,
				file: BufWriter::new(file),
			})
		}
	}

	/// Add an entry for every output of `rule`, and flush it to disk.
	pub fn record(
		&mut self,
		rule: &BuildRule,
		build_start: Instant,
		start: Instant,
		end: Instant,
		mtime: Option<Timestamp>,
	) -> Result<(), Error> {
		assert!(start >= build_start, "Job started before the build started");
		assert!(end >= start, "Job ended before it started");
		let command = &rule.command.as_ref().expect("Got a phony rule").command;
		let entry = Entry {
			start_time_ms: as_millis(start - build_start),
			end_time_ms: as_millis(end - build_start),
			mtime,
			command_hash: murmur_hash_64a(command.as_bytes()),
		};
		for output in &rule.outputs {
			self.add_entry(output.clone(), entry)?;
		}
		self.file.flush()
	}

	/// Update the recorded `mtime` of a single output, without changing the
	/// rest of its entry.
	///
	/// Used by `restat` rules. Does nothing for unknown outputs.
	pub fn restat(&mut self, output: &RawStr, mtime: Option<Timestamp>) -> Result<(), Error> {
		if let Some(mut entry) = self.log.entries.get(output).cloned() {
			entry.mtime = mtime;
			self.add_entry(output.to_owned(), entry)?;
			self.file.flush()?;
		}
		Ok(())
	}

	fn add_entry(&mut self, output: RawString, entry: Entry) -> Result<(), Error> {
		write_record(&mut self.file, &output, &entry)?;
		self.log.entries.insert(output, entry);
		Ok(())
	}
}

impl std::ops::Deref for BuildLogMut {
	type Target = BuildLog;
	fn deref(&self) -> &Self::Target {
		&self.log
	}
}

fn write_record(file: &mut impl Write, output: &RawStr, entry: &Entry) -> Result<(), Error> {
	writeln!(
		file,
		"{}\t{}\t{}\t{}\t{:x}",
		entry.start_time_ms,
		entry.end_time_ms,
		entry.mtime.map_or(0, Timestamp::to_nanos),
		output,
		entry.command_hash
	)
}

fn parse_record(line: &RawStr, version: u32) -> Option<(RawString, Entry)> {
	let mut tab_iter = memchr::memchr_iter(b'\t', line.as_bytes());

	let tab1 = tab_iter.next()?;
	let tab2 = tab_iter.next()?;
	let tab3 = tab_iter.next()?;
	let tab4 = tab_iter.next()?;

	let key = line[tab3 + 1..tab4].into();
	let value = Entry {
		start_time_ms: parse(&line[0..tab1])?,
		end_time_ms: parse(&line[tab1 + 1..tab2])?,
		mtime: Timestamp::from_nanos(parse(&line[tab2 + 1..tab3])?),
		command_hash: if version < 5 {
			// Version 4 stored the whole command instead of its hash.
			murmur_hash_64a(&line[tab4 + 1..].as_bytes())
		} else {
			parse_hex(&line[tab4 + 1..])?
		},
	};
	Some((key, value))
}

fn parse<T: std::str::FromStr>(s: &RawStr) -> Option<T> {
	s.to_str().ok().and_then(|s| s.parse().ok())
}

fn parse_hex(s: &RawStr) -> Option<u64> {
	s.to_str()
		.ok()
		.and_then(|s| u64::from_str_radix(s, 16).ok())
}

fn as_millis(d: Duration) -> u32 {
	d.as_secs() as u32 * 1000 + d.subsec_millis()
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Read;

	fn entry(hash: u64) -> Entry {
		Entry {
			start_time_ms: 10,
			end_time_ms: 20,
			mtime: Timestamp::from_nanos(300),
			command_hash: hash,
		}
	}

	#[test]
	fn roundtrip() -> Result<(), Error> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(".ninja_log");
		{
			let mut log = BuildLogMut::open(&path)?;
			log.add_entry("out1".into(), entry(0xabc))?;
			log.add_entry("out2".into(), entry(0xdef))?;
			log.file.flush()?;
		}
		{
			// Re-open and append: both old and new entries survive.
			let mut log = BuildLogMut::open(&path)?;
			assert_eq!(log.entries.len(), 2);
			log.add_entry("out3".into(), entry(0x123))?;
			log.file.flush()?;
		}
		let log = BuildLog::read(&path)?;
		assert_eq!(log.entries.len(), 3);
		assert_eq!(log.entries[RawStr::from_str("out1")], entry(0xabc));
		assert_eq!(log.entries[RawStr::from_str("out3")], entry(0x123));
		Ok(())
	}

	#[test]
	fn later_records_override() -> Result<(), Error> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(".ninja_log");
		let mut log = BuildLogMut::open(&path)?;
		log.add_entry("out".into(), entry(1))?;
		log.add_entry("out".into(), entry(2))?;
		log.file.flush()?;
		drop(log);
		let log = BuildLog::read(&path)?;
		assert_eq!(log.entries[RawStr::from_str("out")].command_hash, 2);
		Ok(())
	}

	#[test]
	fn truncated_tail_is_dropped() -> Result<(), Error> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(".ninja_log");
		{
			let mut log = BuildLogMut::open(&path)?;
			log.add_entry("out1".into(), entry(1))?;
			log.file.flush()?;
		}
		{
			use std::io::Write;
			let mut file = OpenOptions::new().append(true).open(&path)?;
			file.write_all(b"12\t34\tgarbage")?;
		}
		{
			// Open for write: the garbage is truncated away, and the log is
			// appendable again.
			let mut log = BuildLogMut::open(&path)?;
			assert_eq!(log.entries.len(), 1);
			log.add_entry("out2".into(), entry(2))?;
			log.file.flush()?;
		}
		let log = BuildLog::read(&path)?;
		assert_eq!(log.entries.len(), 2);
		Ok(())
	}

	#[test]
	fn restat_updates_only_the_mtime() -> Result<(), Error> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(".ninja_log");
		{
			let mut log = BuildLogMut::open(&path)?;
			log.add_entry("out".into(), entry(0xabc))?;
			log.restat(RawStr::from_str("out"), Timestamp::from_nanos(999))?;
			// Unknown outputs are left alone.
			log.restat(RawStr::from_str("unknown"), Timestamp::from_nanos(1))?;
		}
		let log = BuildLog::read(&path)?;
		assert_eq!(log.entries.len(), 1);
		let updated = &log.entries[RawStr::from_str("out")];
		assert_eq!(updated.mtime, Timestamp::from_nanos(999));
		assert_eq!(updated.command_hash, 0xabc);
		Ok(())
	}

	#[test]
	fn invalid_header_is_fatal() -> Result<(), Error> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(".ninja_log");
		std::fs::write(&path, b"not a log\n")?;
		assert!(BuildLog::read(&path).is_err());
		Ok(())
	}

	#[test]
	fn recompact_keeps_only_live_entries() -> Result<(), Error> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join(".ninja_log");
		{
			let mut log = BuildLogMut::open(&path)?;
			log.add_entry("live".into(), entry(1))?;
			log.add_entry("dead".into(), entry(2))?;
			log.file.flush()?;
		}
		let log = BuildLog::read(&path)?;
		log.recompact(&path, |path| path == RawStr::from_str("live"))?;
		let log = BuildLog::read(&path)?;
		assert_eq!(log.entries.len(), 1);
		assert!(log.entries.contains_key(RawStr::from_str("live")));

		let mut contents = String::new();
		File::open(&path)?.read_to_string(&mut contents)?;
		assert!(contents.starts_with("# ninja log v5\n"));
		Ok(())
	}
}
