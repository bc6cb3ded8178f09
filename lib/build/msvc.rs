//! Extracting dependencies from MSVC `/showIncludes` output.
//!
//! `cl.exe` has no depfile support; instead it prints a line per included
//! header, marked with a localizable prefix. Those lines are dependencies,
//! the rest is output the user should see.

use raw_string::{RawStr, RawString};

/// Split command output into the lines meant for the user and the
/// dependencies hidden in it.
///
/// A line starting with `prefix` contributes a dependency (the rest of the
/// line, with leading spaces stripped) and is dropped from the output.
/// Dependencies are deduplicated, keeping encounter order.
pub fn parse_showincludes(output: &RawStr, prefix: &RawStr) -> (RawString, Vec<RawString>) {
	let mut filtered = RawString::new();
	let mut deps: Vec<RawString> = Vec::new();

	let mut rest = output;
	while !rest.is_empty() {
		let line_end = memchr::memchr(b'\n', rest.as_bytes()).map_or(rest.len(), |n| n + 1);
		let line = &rest[..line_end];
		rest = &rest[line_end..];

		let without_newline = match line.last() {
			Some(b'\n') => &line[..line.len() - 1],
			_ => line,
		};
		if without_newline.starts_with(prefix) {
			let mut dep = &without_newline[prefix.len()..];
			while dep.first() == Some(b' ') {
				dep = &dep[1..];
			}
			if !dep.is_empty() && !deps.iter().any(|d| &d[..] == dep) {
				deps.push(dep.to_owned());
			}
		} else {
			filtered.push_str(line);
		}
	}

	(filtered, deps)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn includes_are_extracted() {
		let output = RawStr::from_str(
			"foo.c\n\
			 Note: including file: foo.h\n\
			 Note: including file:   deep/bar.h\n\
			 Note: including file: foo.h\n\
			 some diagnostic\n",
		);
		let (filtered, deps) =
			parse_showincludes(output, RawStr::from_str("Note: including file: "));
		assert_eq!(filtered, "foo.c\nsome diagnostic\n");
		assert!(deps.iter().eq(&["foo.h", "deep/bar.h"]));
	}

	#[test]
	fn no_includes() {
		let (filtered, deps) =
			parse_showincludes(RawStr::from_str("hello\n"), RawStr::from_str("Note: "));
		assert_eq!(filtered, "hello\n");
		assert!(deps.is_empty());
	}
}
