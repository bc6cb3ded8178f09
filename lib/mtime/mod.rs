//! Getting the `mtime` of files to check if they're outdated.

use log::warn;
use std::cmp::max;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Error;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A timestamp of a file.
///
/// `Option<Timestamp>` is the same size as `Timestamp`, as a timestamp is
/// never 0. `None` means the file does not exist.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Timestamp(NonZeroU64);

impl Timestamp {
	/// Convert a `mtime` in nanoseconds (as used by the log files) to a
	/// [`Timestamp`].
	///
	/// A value of `0` is used for files that do not exist, and results in
	/// [`None`].
	pub fn from_nanos(mtime: u64) -> Option<Self> {
		NonZeroU64::new(mtime).map(Timestamp)
	}

	/// Convert a [`Timestamp`] to a timestamp in nanoseconds (as used in the
	/// log files).
	pub fn to_nanos(self) -> u64 {
		self.0.get()
	}

	/// Convert a [`SystemTime`] to a [`Timestamp`].
	pub fn from_system_time(time: SystemTime) -> Self {
		let ns = time.duration_since(UNIX_EPOCH).ok().map_or(1, |d| {
			max(
				1,
				d.as_secs()
					.saturating_mul(1_000_000_000)
					.saturating_add(d.subsec_nanos().into()),
			)
		});
		debug_assert!(ns > 0);
		Timestamp(unsafe { NonZeroU64::new_unchecked(ns) })
	}

	/// Convert a [`Timestamp`] to a [`SystemTime`].
	pub fn to_system_time(self) -> SystemTime {
		UNIX_EPOCH + Duration::from_nanos(self.to_nanos())
	}
}

/// Looks up the `mtime` of a file. Returns `None` if the file does not
/// exist.
///
/// Each call to this function corresponds to a syscall. To save on
/// syscalls, consider using [`StatCache`] if you're going to check many
/// paths in the same directories.
pub fn mtime(file: &Path) -> Result<Option<Timestamp>, Error> {
	match std::fs::metadata(file).and_then(|m| m.modified()) {
		Ok(time) => Ok(Some(Timestamp::from_system_time(time))),
		Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e),
	}
}

/// A cache that remembers the `mtime`s of files.
///
/// The first lookup in a directory lists the whole directory and remembers
/// the `mtime`s of everything in it, so that the other files in it never
/// need their own `stat()`.
///
/// A `stat()` failure which is not 'file not found' is reported as a
/// warning, and the file is treated as missing.
pub struct StatCache {
	// `None` means the file does not exist.
	cache: BTreeMap<PathBuf, Option<Timestamp>>,
	/// The directories that have been listed into `cache`.
	listed: BTreeSet<PathBuf>,
	enabled: bool,
}

impl StatCache {
	/// Create an empty StatCache.
	pub fn new() -> Self {
		StatCache {
			cache: BTreeMap::new(),
			listed: BTreeSet::new(),
			enabled: true,
		}
	}

	/// Enable or disable the cache.
	///
	/// While disabled, every lookup goes to the file system, as with
	/// [`fresh_mtime`][Self::fresh_mtime]. The builder disables the cache
	/// before re-checking the outputs of `restat` rules, so the `mtime`s
	/// observed after a command ran are never stale.
	pub fn allow_cache(&mut self, allow: bool) {
		self.enabled = allow;
	}

	/// Looks up the `mtime` of a file, returning the cached value if there
	/// is one.
	pub fn mtime(&mut self, file: &Path) -> Option<Timestamp> {
		if !self.enabled {
			return self.fresh_mtime(file);
		}
		if let Some(&cached) = self.cache.get(file) {
			return cached;
		}
		match file.parent() {
			Some(dir) if !dir.as_os_str().is_empty() && !self.listed.contains(dir) => {
				self.list_dir(dir);
				match self.cache.entry(file.to_path_buf()) {
					// The directory listing didn't see the file.
					Entry::Vacant(v) => *v.insert(None),
					Entry::Occupied(v) => *v.get(),
				}
			}
			_ => self.fresh_mtime(file),
		}
	}

	/// Looks up the current `mtime` of a file without consulting the cache.
	///
	/// It does, however, store the result in the cache.
	pub fn fresh_mtime(&mut self, file: &Path) -> Option<Timestamp> {
		let time = stat(file);
		self.cache.insert(file.to_path_buf(), time);
		time
	}

	/// Looks up the `mtime` of a file in the cache.
	///
	/// *Only* checks the cache. Will not check the file system.
	///
	/// If the cache does not contain an entry for this file, returns
	/// `None`. If the file does not exist according to the cache, returns
	/// `Some(None)`.
	pub fn cached_mtime(&self, file: &Path) -> Option<Option<Timestamp>> {
		self.cache.get(file).cloned()
	}

	/// Forget everything, so that all lookups go back to the file system.
	pub fn clear(&mut self) {
		self.cache.clear();
		self.listed.clear();
	}

	fn list_dir(&mut self, dir: &Path) {
		self.listed.insert(dir.to_path_buf());
		let entries = match std::fs::read_dir(dir) {
			Ok(entries) => entries,
			// A missing or unreadable directory means all files in it are
			// missing; the per-file lookup will cache that.
			Err(_) => return,
		};
		for entry in entries {
			let entry = match entry {
				Ok(entry) => entry,
				Err(_) => continue,
			};
			let time = entry
				.metadata()
				.and_then(|m| m.modified())
				.ok()
				.map(Timestamp::from_system_time);
			self.cache.insert(entry.path(), time);
		}
	}
}

fn stat(file: &Path) -> Option<Timestamp> {
	match mtime(file) {
		Ok(time) => time,
		Err(e) => {
			warn!("Unable to get the mtime of {:?}: {}", file, e);
			None
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::fs::File;

	#[test]
	fn timestamps_are_ordered() {
		let a = Timestamp::from_nanos(100).unwrap();
		let b = Timestamp::from_nanos(200).unwrap();
		assert!(a < b);
		assert_eq!(Timestamp::from_nanos(0), None);
		assert_eq!(a.to_nanos(), 100);
	}

	#[test]
	fn cache_batches_directories() {
		let dir = tempfile::tempdir().unwrap();
		File::create(dir.path().join("a")).unwrap();
		File::create(dir.path().join("b")).unwrap();

		let mut cache = StatCache::new();
		assert!(cache.mtime(&dir.path().join("a")).is_some());
		// The directory listing already cached `b` and knows `c` is absent.
		assert_eq!(cache.cached_mtime(&dir.path().join("b")).map(|t| t.is_some()), Some(true));
		assert!(cache.mtime(&dir.path().join("c")).is_none());

		// A file created after the listing is invisible until refreshed.
		File::create(dir.path().join("c")).unwrap();
		assert!(cache.mtime(&dir.path().join("c")).is_none());
		assert!(cache.fresh_mtime(&dir.path().join("c")).is_some());
		assert!(cache.mtime(&dir.path().join("c")).is_some());
	}

	#[test]
	fn disabled_cache_sees_changes() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("x");
		let mut cache = StatCache::new();
		assert!(cache.mtime(&file).is_none());
		File::create(&file).unwrap();
		assert!(cache.mtime(&file).is_none());
		cache.allow_cache(false);
		assert!(cache.mtime(&file).is_some());
	}
}
