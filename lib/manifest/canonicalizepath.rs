//! Path canonicalization.
//!
//! All paths are canonicalized before they are interned, so that two
//! spellings of the same file compare equal: separators become forward
//! slashes, duplicate separators collapse, and `.` and `..` components are
//! resolved where possible. Case is preserved.

use raw_string::RawString;

/// Canonicalize a path, in place.
///
/// Returns the slash bits: bit `n` is set when the `n`th separator of the
/// path was originally a backslash (only on Windows; always 0 elsewhere).
/// [`decanonicalize_path`] uses them to restore the original separator
/// style for display.
pub fn canonicalize_path_in_place(path: &mut RawString) -> u64 {
	if path.is_empty() {
		return 0;
	}

	let mut slash_bits = 0;

	if cfg!(windows) {
		let mut separator = 0;
		for b in path.as_mut_bytes().iter_mut() {
			if *b == b'\\' {
				if separator < 64 {
					slash_bits |= 1 << separator;
				}
				*b = b'/';
			}
			if *b == b'/' {
				separator += 1;
			}
		}
	}

	let bytes = path.as_mut_bytes();
	let len = bytes.len();

	// Anything in bytes[..fixed] is not going to change anymore: the leading
	// '/' (or '//' on Windows), and any '../' components that cannot be
	// resolved.
	let mut fixed = 0;
	if bytes[0] == b'/' {
		fixed = 1;
		if cfg!(windows) && len > 1 && bytes[1] == b'/' {
			fixed = 2;
		}
	}

	// We still need to process bytes[src..]; the output so far is
	// bytes[..dst]. dst <= src, so the two regions never overlap.
	let mut src = fixed;
	let mut dst = fixed;

	while src < len {
		if bytes[src] == b'/' {
			// Skip duplicate path separators.
			src += 1;
			continue;
		}
		let end = memchr::memchr(b'/', &bytes[src..]).map_or(len, |n| src + n);
		let component = end - src;
		if component == 1 && bytes[src] == b'.' {
			// Skip '.' components.
			src = end + 1;
		} else if component == 2 && bytes[src] == b'.' && bytes[src + 1] == b'.' {
			if dst > fixed {
				// Remove '..' together with the previous component.
				dst = bytes[..dst - 1]
					.iter()
					.rposition(|&c| c == b'/')
					.map_or(fixed, |n| n + 1);
				src = end + 1;
			} else {
				// No previous component. Keep the '..'.
				let n = component + if end < len { 1 } else { 0 };
				bytes.copy_within(src..src + n, dst);
				src += n;
				dst += n;
				fixed = dst;
			}
		} else {
			// An ordinary component, copied together with its separator.
			let n = component + if end < len { 1 } else { 0 };
			bytes.copy_within(src..src + n, dst);
			src += n;
			dst += n;
		}
	}

	if dst == 0 {
		path.clear();
		path.push(b'.');
	} else {
		if dst > 1 && path[dst - 1] == b'/' {
			dst -= 1;
		}
		path.truncate(dst);
	}

	slash_bits
}

/// Restore the original separator style of a canonicalized path.
///
/// A no-op unless some of the `slash_bits` are set.
pub fn decanonicalize_path(path: &RawString, slash_bits: u64) -> RawString {
	let mut path = path.clone();
	if slash_bits != 0 {
		let mut separator = 0;
		for b in path.as_mut_bytes().iter_mut() {
			if *b == b'/' {
				if separator < 64 && slash_bits & (1 << separator) != 0 {
					*b = b'\\';
				}
				separator += 1;
			}
		}
	}
	path
}

#[cfg(test)]
mod test {
	use super::*;

	fn canon(path: &str) -> String {
		let mut path = RawString::from(path.to_string());
		canonicalize_path_in_place(&mut path);
		String::from_utf8(path.into_bytes()).unwrap()
	}

	#[test]
	#[rustfmt::skip]
	fn canonicalize() {
		assert_eq!(canon(""), "");
		assert_eq!(canon("hello"), "hello");
		assert_eq!(canon("./hello"), "hello");
		assert_eq!(canon("./a"), "a");
		assert_eq!(canon("foo/bar/baz"), "foo/bar/baz");
		assert_eq!(canon("foo/./bar/baz"), "foo/bar/baz");
		assert_eq!(canon("foo/bar/baz/."), "foo/bar/baz");
		assert_eq!(canon("foo/bar/baz/./."), "foo/bar/baz");
		assert_eq!(canon("./foo/bar/baz"), "foo/bar/baz");
		assert_eq!(canon("/foo/bar/baz"), "/foo/bar/baz");
		assert_eq!(canon("/foo/./bar/baz"), "/foo/bar/baz");
		assert_eq!(canon("/foo/bar/baz/."), "/foo/bar/baz");
		assert_eq!(canon("/./foo/bar/baz"), "/foo/bar/baz");
		assert_eq!(canon("foo/../baz"), "baz");
		assert_eq!(canon("foo/.ok"), "foo/.ok");
		assert_eq!(canon("./foo/bar/../baz/blah.x"), "foo/baz/blah.x");
		assert_eq!(canon(".//foo///bar////..//baz////blah.x"), "foo/baz/blah.x");
		assert_eq!(canon("./."), ".");
		assert_eq!(canon("/."), "/");
		assert_eq!(canon("foo/.."), ".");
		assert_eq!(canon("/foo/.."), "/");
		assert_eq!(canon("/foo/../"), "/");
		assert_eq!(canon("../foo/../"), "..");
		assert_eq!(canon("../foo/../test"), "../test");
		assert_eq!(canon("../test"), "../test");
		assert_eq!(canon("../../test"), "../../test");
		assert_eq!(canon("./../test"), "../test");
		assert_eq!(canon("foo/../../test"), "../test");
		assert_eq!(canon("../foo/../.."), "../..");
		assert_eq!(canon("../x/a/b/../c/../.."), "../x");
	}

	#[test]
	fn slash_bits_roundtrip() {
		let mut path = RawString::from("a/b/c");
		let bits = canonicalize_path_in_place(&mut path);
		assert_eq!(decanonicalize_path(&path, bits), path);
	}
}
