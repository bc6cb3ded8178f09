//! The file system interface used while running commands.
//!
//! The build core itself only reads `mtime`s (through
//! [`StatCache`][crate::mtime::StatCache]); everything else the builder does
//! to the disk goes through the [`Disk`] trait, so tests and dry runs can
//! substitute their own.

use crate::mtime::{mtime, Timestamp};
use raw_string::RawStr;
use std::fs;
use std::io::{Error, ErrorKind, Write};
use std::path::Path;

/// The file system operations the builder needs.
///
/// The builder calls these from its worker threads.
pub trait Disk: Sync {
	/// The `mtime` of a file, or `None` if it does not exist.
	fn stat(&self, path: &Path) -> Result<Option<Timestamp>, Error>;

	/// Read a whole file.
	fn read_file(&self, path: &Path) -> Result<Vec<u8>, Error>;

	/// Write a whole file, replacing anything that was there.
	fn write_file(&self, path: &Path, contents: &RawStr) -> Result<(), Error>;

	/// Remove a file. Removing a file that does not exist is not an error.
	fn remove_file(&self, path: &Path) -> Result<(), Error>;

	/// Create a directory and any missing parents. Existing directories are
	/// fine.
	fn make_dirs(&self, path: &Path) -> Result<(), Error>;
}

/// The real file system.
pub struct RealDisk;

impl Disk for RealDisk {
	fn stat(&self, path: &Path) -> Result<Option<Timestamp>, Error> {
		mtime(path)
	}

	fn read_file(&self, path: &Path) -> Result<Vec<u8>, Error> {
		fs::read(path)
	}

	fn write_file(&self, path: &Path, contents: &RawStr) -> Result<(), Error> {
		let mut file = fs::File::create(path)?;
		file.write_all(contents.as_bytes())
	}

	fn remove_file(&self, path: &Path) -> Result<(), Error> {
		match fs::remove_file(path) {
			Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(()),
			result => result,
		}
	}

	fn make_dirs(&self, path: &Path) -> Result<(), Error> {
		fs::create_dir_all(path)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn removing_nothing_is_fine() {
		let dir = tempfile::tempdir().unwrap();
		assert!(RealDisk.remove_file(&dir.path().join("nope")).is_ok());
	}

	#[test]
	fn write_and_read() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("sub").join("file");
		RealDisk.make_dirs(path.parent().unwrap()).unwrap();
		RealDisk
			.write_file(&path, RawStr::from_str("hello"))
			.unwrap();
		assert_eq!(RealDisk.read_file(&path).unwrap(), b"hello");
		assert!(RealDisk.stat(&path).unwrap().is_some());
	}
}
