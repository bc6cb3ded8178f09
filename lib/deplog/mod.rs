//! Reading and writing dependency logs (i.e. `.ninja_deps` files).
//!
//! The dependency log replaces re-reading every depfile on every build: once
//! a compiler has told us which headers a target depends on, the answer is
//! appended here, together with the `mtime` of the target it was valid for.
//!
//! The format is binary: a header, then a sequence of records. A *path
//! record* assigns the next numeric ID to a path; a *deps record* stores the
//! dependencies of one target, referring to paths by ID.

use crate::mtime::Timestamp;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use indexmap::map::IndexMap;
use log::warn;
use raw_string::{RawStr, RawString};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Cursor, Error, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Represents the contents of a `.ninja_deps` file.
#[derive(Clone, Debug)]
pub struct DepLog {
	records: IndexMap<RawString, Option<Record>>,
}

/// Represents a `.ninja_deps` file, and allows making additions to it.
#[derive(Debug)]
pub struct DepLogMut {
	deps: DepLog,
	file: BufWriter<File>,
}

/// The information you get out of a `DepLog` for a specific target.
#[derive(Clone, Copy, Debug)]
pub struct TargetInfo<'a> {
	record: &'a Record,
	log: &'a DepLog,
}

#[derive(Clone, Debug)]
struct Record {
	deps: Vec<u32>,
	mtime: Option<Timestamp>,
}

/// One record of the on-disk format, before it is tied into the log.
enum RawRecord {
	/// A path, implicitly numbered by its position in the file.
	Path(RawString),
	/// The dependencies of one target, as path IDs.
	Deps {
		target: u32,
		mtime: u64,
		deps: Vec<u32>,
	},
}

impl DepLog {
	/// Create a new empty log.
	pub fn new() -> Self {
		DepLog {
			records: IndexMap::new(),
		}
	}

	fn path_of(&self, id: u32) -> Option<&RawStr> {
		let (path, _) = self.records.get_index(id as usize)?;
		Some(path)
	}

	/// Look up a target in the log.
	pub fn get(&self, path: &RawStr) -> Option<TargetInfo> {
		match self.records.get(path) {
			Some(Some(record)) => Some(TargetInfo { record, log: self }),
			_ => None,
		}
	}

	/// Iterate over all targets in the log.
	pub fn iter(&self) -> impl Iterator<Item = (&RawStr, TargetInfo)> {
		self.records.iter().filter_map(move |(path, record)| {
			let record = record.as_ref()?;
			Some((&path[..], TargetInfo { record, log: self }))
		})
	}

	/// Read a log from a file.
	pub fn read(file: impl AsRef<Path>) -> Result<DepLog, Error> {
		let file = file.as_ref();
		let mut file = File::open(file)
			.map_err(|e| Error::new(e.kind(), format!("Unable to open {:?}: {}", file, e)))?;
		Ok(DepLog::read_from(&mut file)?.0)
	}

	/// Read a log.
	///
	/// A corrupt record makes reading stop with a warning; everything before
	/// it is kept. A corrupt header is an error. Also returns the offset
	/// right after the last whole record, so a writer can truncate the
	/// corruption away.
	pub fn read_from(file: &mut dyn Read) -> Result<(DepLog, u64), Error> {
		let mut bytes = Vec::new();
		file.read_to_end(&mut bytes)?;
		let mut file = Cursor::new(bytes);

		{
			let mut header = [0u8; 12];
			file.read_exact(&mut header)?;
			if &header != b"# ninjadeps\n" {
				return Err(Error::new(ErrorKind::InvalidData, "Not a ninja deps log"));
			}
		}

		let version = file.read_u32::<LE>()?;
		if version != 3 && version != 4 {
			return Err(Error::new(
				ErrorKind::InvalidData,
				format!("Unsupported dependency log version {}", version),
			));
		}

		let mut records = IndexMap::<RawString, Option<Record>>::new();
		let mut valid_len = file.position();

		loop {
			let record = match next_record(&mut file, version, records.len() as u32) {
				Ok(Some(record)) => record,
				Ok(None) => break,
				Err(e) => {
					warn!(
						"Dependency log is corrupt from offset {} on ({}); ignoring the rest",
						valid_len, e
					);
					break;
				}
			};
			match apply_record(&mut records, record) {
				Ok(()) => valid_len = file.position(),
				Err(e) => {
					warn!(
						"Dependency log is corrupt from offset {} on ({}); ignoring the rest",
						valid_len, e
					);
					break;
				}
			}
		}

		Ok((DepLog { records }, valid_len))
	}

	/// Rewrite the log at `file`, keeping only the targets for which `alive`
	/// returns true.
	///
	/// Path IDs are renumbered, but every kept target keeps its
	/// dependencies.
	pub fn recompact(
		&self,
		file: impl AsRef<Path>,
		alive: impl Fn(&RawStr) -> bool,
	) -> Result<(), Error> {
		let file = file.as_ref();
		match std::fs::remove_file(file) {
			Err(ref e) if e.kind() != ErrorKind::NotFound => {
				return Err(Error::new(
					e.kind(),
					format!("Unable to replace {:?}", file),
				));
			}
			_ => {}
		}
		let mut new_log = DepLogMut::open(file)?;
		for (path, info) in self.iter() {
			if alive(path) {
				new_log.insert_deps(
					path.to_owned(),
					info.mtime(),
					info.deps().map(|d| d.to_owned()).collect(),
				)?;
			}
		}
		Ok(())
	}
}

/// Decode one record. Returns `None` on a clean end of file.
///
/// `n_paths` is the number of paths seen so far: the ID the next path record
/// will get, and the bound on the IDs a deps record may mention.
fn next_record(
	file: &mut Cursor<Vec<u8>>,
	version: u32,
	n_paths: u32,
) -> Result<Option<RawRecord>, Error> {
	let head = match file.read_u32::<LE>() {
		Ok(head) => head,
		Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e),
	};
	let size = head & 0x7FFF_FFFF;
	let is_deps = head != size;

	if !is_deps {
		// A path record: the name, NUL-padded to a multiple of four bytes,
		// and a checksum tying it to its position in the file.
		if size < 4 || size % 4 != 0 {
			return Err(Error::new(
				ErrorKind::InvalidData,
				format!("Path record has a bad size ({} bytes)", size),
			));
		}
		let mut name = vec![0u8; size as usize - 4];
		file.read_exact(&mut name)?;
		let unpadded = name.iter().rposition(|&b| b != 0).map_or(0, |n| n + 1);
		name.truncate(unpadded);

		let checksum = file.read_u32::<LE>()?;
		if checksum != !n_paths {
			return Err(Error::new(
				ErrorKind::InvalidData,
				format!(
					"Path record checksum 0x{:08x} does not match its ID {}",
					checksum, n_paths
				),
			));
		}
		Ok(Some(RawRecord::Path(RawString::from_bytes(name))))
	} else {
		// A deps record: target ID, mtime, and the dependencies' IDs.
		let fixed = if version < 4 { 8 } else { 12 };
		if size < fixed || size % 4 != 0 {
			return Err(Error::new(
				ErrorKind::InvalidData,
				format!("Dependency record has a bad size ({} bytes)", size),
			));
		}
		let target = file.read_u32::<LE>()?;
		let mtime = if version < 4 {
			// Version 3 stored whole seconds; round up to the latest
			// nanosecond they could mean.
			u64::from(file.read_u32::<LE>()?) * 1_000_000_000 + 999_999_999
		} else {
			file.read_u64::<LE>()?
		};
		let mut deps = Vec::with_capacity(((size - fixed) / 4) as usize);
		for _ in 0..(size - fixed) / 4 {
			deps.push(file.read_u32::<LE>()?);
		}
		Ok(Some(RawRecord::Deps {
			target,
			mtime,
			deps,
		}))
	}
}

/// Tie a decoded record into the log.
fn apply_record(
	records: &mut IndexMap<RawString, Option<Record>>,
	record: RawRecord,
) -> Result<(), Error> {
	match record {
		RawRecord::Path(name) => {
			if records.insert(name.clone(), None).is_some() {
				return Err(Error::new(
					ErrorKind::InvalidData,
					format!("The same path appears twice: {:?}", name),
				));
			}
		}
		RawRecord::Deps {
			target,
			mtime,
			deps,
		} => {
			let n_paths = records.len() as u32;
			if let Some(&bad) = deps.iter().find(|&&dep| dep >= n_paths) {
				return Err(Error::new(
					ErrorKind::InvalidData,
					format!("Dependency refers to unknown path ID {}", bad),
				));
			}
			match records.get_index_mut(target as usize) {
				Some((_, record)) => {
					*record = Some(Record {
						deps,
						mtime: Timestamp::from_nanos(mtime),
					});
				}
				None => {
					return Err(Error::new(
						ErrorKind::InvalidData,
						format!("Dependencies given for unknown path ID {}", target),
					));
				}
			}
		}
	}
	Ok(())
}

impl<'a> TargetInfo<'a> {
	/// Get the `mtime` that was recorded in the log.
	pub fn mtime(&self) -> Option<Timestamp> {
		self.record.mtime
	}

	/// Get an iterator over the dependencies.
	pub fn deps(&self) -> impl Iterator<Item = &'a RawStr> + ExactSizeIterator {
		let log = self.log;
		self.record
			.deps
			.iter()
			.map(move |&id| log.path_of(id).unwrap())
	}
}

impl DepLogMut {
	/// Open and read a dependency log, or start a new one.
	///
	/// If the existing log has a corrupt tail, the tail is removed.
	pub fn open(file: impl AsRef<Path>) -> Result<DepLogMut, Error> {
		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(file)?;
		let deps = if file.metadata()?.len() == 0 {
			file.write_all(b"# ninjadeps\n")?;
			file.write_u32::<LE>(4)?;
			DepLog::new()
		} else {
			let (deps, valid_len) = DepLog::read_from(&mut file)?;
			if file.metadata()?.len() != valid_len {
				file.set_len(valid_len)?;
			}
			deps
		};
		file.seek(SeekFrom::End(0))?;
		Ok(DepLogMut {
			deps,
			file: BufWriter::new(file),
		})
	}

	/// Writes a path to the file, if it wasn't already in there.
	///
	/// In both cases, it returns the ID of the path.
	fn intern_path(&mut self, path: RawString) -> Result<u32, Error> {
		if let Some((id, _, _)) = self.deps.records.get_full(&path[..]) {
			return Ok(id as u32);
		}
		let id = self.deps.records.len() as u32;
		let padding = (4 - path.len() % 4) % 4;
		self.file
			.write_u32::<LE>((path.len() + padding + 4) as u32)?;
		self.file.write_all(path.as_bytes())?;
		for _ in 0..padding {
			self.file.write_u8(0)?;
		}
		self.file.write_u32::<LE>(!id)?;
		self.deps.records.insert(path, None);
		Ok(id)
	}

	/// Write a list of dependencies to the file, if it is different than
	/// what's already in the file.
	pub fn insert_deps(
		&mut self,
		target: RawString,
		mtime: Option<Timestamp>,
		deps: Vec<RawString>,
	) -> Result<(), Error> {
		let target = self.intern_path(target)?;
		let mut dep_ids = Vec::with_capacity(deps.len());
		for dep in deps {
			dep_ids.push(self.intern_path(dep)?);
		}

		let record = self.deps.records.get_index_mut(target as usize).unwrap().1;
		let unchanged = match record {
			Some(record) => record.mtime == mtime && record.deps == dep_ids,
			None => false,
		};

		if !unchanged {
			self.file
				.write_u32::<LE>(0x8000_0000 | (dep_ids.len() as u32 * 4 + 12))?;
			self.file.write_u32::<LE>(target)?;
			self.file
				.write_u64::<LE>(mtime.map_or(0, Timestamp::to_nanos))?;
			for &dep in &dep_ids {
				self.file.write_u32::<LE>(dep)?;
			}
			self.file.flush()?;
		}

		*record = Some(Record {
			deps: dep_ids,
			mtime,
		});

		Ok(())
	}
}

impl std::ops::Deref for DepLogMut {
	type Target = DepLog;
	fn deref(&self) -> &Self::Target {
		&self.deps
	}
}
