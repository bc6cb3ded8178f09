//! Low-level token eating for the `build.ninja` lexer.
//!
//! All functions take a `&mut &RawStr` and advance it past whatever they
//! consumed.

use super::error::ParseError;
use super::eval::check_escapes;
use raw_string::RawStr;
use std::str::from_utf8_unchecked;

/// Eats spaces. Returns the amount of space eaten.
pub fn eat_whitespace(src: &mut &RawStr) -> usize {
	let mut n = 0;
	while src.get(n) == Some(&b' ') {
		n += 1;
	}
	*src = &src[n..];
	n
}

pub fn is_identifier_char(c: u8) -> bool {
	match c {
		b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => true,
		b'_' | b'-' | b'.' => true,
		_ => false,
	}
}

/// Eats an identifier: rule names, pool names, variable names.
///
/// Identifiers are always valid UTF-8, so this returns a `&str`.
pub fn eat_identifier<'a>(src: &mut &'a RawStr) -> Option<&'a str> {
	let mut end = 0;
	while end < src.len() && is_identifier_char(src[end]) {
		end += 1;
	}
	if end == 0 {
		return None;
	}
	let (ident, rest) = src.split_at(end);
	*src = rest;
	Some(unsafe { from_utf8_unchecked(ident.as_bytes()) })
}

/// Eats a single (unexpanded) path.
///
/// The path ends at an unescaped space, `:`, or `|`, which is not consumed.
/// A `$` keeps whatever follows it in the path, so escaped delimiters don't
/// end it; a `$\n` continuation also swallows the indentation of the next
/// line. (`$$` is consumed as one unit, so a space after it still counts as
/// a delimiter.)
pub fn eat_path<'a>(src: &mut &'a RawStr) -> Result<&'a RawStr, ParseError> {
	let mut end = 0;
	while end < src.len() {
		match src[end] {
			b' ' | b':' | b'|' => break,
			b'$' if end + 1 < src.len() => {
				end += 2;
				if src[end - 1] == b'\n' {
					while end < src.len() && src[end] == b' ' {
						end += 1;
					}
				}
			}
			_ => end += 1,
		}
	}
	let (path, rest) = src.split_at(end);
	*src = rest;
	if path.is_empty() {
		Err(ParseError::ExpectedPath)
	} else {
		check_escapes(path)?;
		Ok(path)
	}
}

/// Eats space-separated paths until one of the `endings` bytes or the end of
/// the line.
///
/// Returns the paths, and the ending byte (which is consumed), if any.
pub fn eat_paths<'a>(
	src: &mut &'a RawStr,
	endings: &[u8],
) -> Result<(Vec<&'a RawStr>, Option<u8>), ParseError> {
	let mut paths = Vec::new();
	loop {
		match src.split_first() {
			Some((c, rest)) if endings.contains(&c) => {
				*src = rest;
				return Ok((paths, Some(c)));
			}
			None => return Ok((paths, None)),
			Some(_) => {
				paths.push(eat_path(src)?);
				eat_whitespace(src);
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn identifier() {
		let mut src = RawStr::from_str("cc_rule.x: rest");
		assert_eq!(eat_identifier(&mut src), Some("cc_rule.x"));
		assert_eq!(src.as_bytes(), b": rest");
		assert_eq!(eat_identifier(&mut src), None);
	}

	#[test]
	fn path_stops_at_delimiters() {
		let mut src = RawStr::from_str("foo/bar.o: next");
		assert_eq!(eat_path(&mut src).unwrap().as_bytes(), b"foo/bar.o");
		assert_eq!(src.as_bytes(), b": next");
	}

	#[test]
	fn path_keeps_escapes() {
		let mut src = RawStr::from_str("a$ b|c");
		assert_eq!(eat_path(&mut src).unwrap().as_bytes(), b"a$ b");
		assert_eq!(src.as_bytes(), b"|c");
	}

	#[test]
	fn escaped_dollar_does_not_escape_a_delimiter() {
		let mut src = RawStr::from_str("a$$ b");
		assert_eq!(eat_path(&mut src).unwrap().as_bytes(), b"a$$");
		assert_eq!(src.as_bytes(), b" b");
	}

	#[test]
	fn trailing_dollar_is_rejected() {
		let mut src = RawStr::from_str("odd$");
		assert_eq!(eat_path(&mut src).unwrap_err(), ParseError::InvalidEscape);
	}

	#[test]
	fn paths_with_ending() {
		let mut src = RawStr::from_str("a b c | d");
		let (paths, ending) = eat_paths(&mut src, b"|").unwrap();
		assert!(paths
			.iter()
			.map(|p| p.as_bytes())
			.eq(vec![&b"a"[..], &b"b"[..], &b"c"[..]]));
		assert_eq!(ending, Some(b'|'));
		assert_eq!(src.as_bytes(), b" d");
	}
}
