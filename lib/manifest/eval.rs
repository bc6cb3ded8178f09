//! The evaluation environment: variable scoping and `$`-expansion.
//!
//! Values read from a `build.ninja` file are kept unexpanded, as raw bytes
//! containing `$`-escapes and `$`-references. Expanding one resolves each
//! reference through an [`Env`]: the `build` definition's own bindings, then
//! the `rule`'s variables, then the file's, then the file that `subninja`'d
//! it, if any. Unknown names expand to nothing.

use super::eat::{eat_identifier, is_identifier_char};
use super::error::{ExpansionError, InvalidEscape};
use super::parse::Variable;
use raw_string::{RawStr, RawString};

/// A name bound to an already expanded value.
#[derive(Debug)]
pub struct Binding<'a> {
	pub name: &'a str,
	pub value: RawString,
}

/// A rule definition with a name and its (unexpanded) variables.
///
/// Rule variables stay unexpanded until a `build` definition instantiates
/// the rule, because `$in` and `$out` only exist at that point.
#[derive(Debug)]
pub struct Rule<'a> {
	pub name: &'a str,
	pub vars: Vec<Variable<'a>>,
}

/// A file-level scope, containing bindings and rules.
#[derive(Debug)]
pub struct FileScope<'a: 'p, 'p> {
	/// The scope of the file that subninja'd this file, if any.
	pub parent_scope: Option<&'p FileScope<'a, 'p>>,

	/// The bindings made in this file (and included files).
	///
	/// Later definitions shadow earlier ones, so lookup starts at the end.
	pub bindings: Vec<Binding<'a>>,

	/// The rules defined in this file (and included files).
	pub rules: Vec<Rule<'a>>,
}

/// The scope of one `build` definition.
///
/// Used twice per definition: once with empty `rule`, `inputs`, and
/// `outputs` to expand the path lists themselves, and once fully populated
/// to expand `$command` and friends.
#[derive(Debug)]
pub struct EdgeScope<'a> {
	pub file: &'a FileScope<'a, 'a>,

	/// The indented bindings of the `build` definition.
	pub bindings: &'a [Binding<'a>],

	/// The variables of the rule being instantiated.
	pub rule: &'a [Variable<'a>],

	/// The explicit inputs, for `$in` and `$in_newline`.
	pub inputs: &'a [RawString],

	/// The explicit outputs, for `$out`.
	pub outputs: &'a [RawString],
}

/// The ways a variable lookup can resolve.
pub enum Lookup<'a> {
	/// A definition that was already expanded when it was read.
	Done(&'a RawStr),

	/// A rule definition, to be expanded only now that it is used.
	Deferred(&'a RawStr),

	/// One of the built-in path list variables.
	Paths {
		paths: &'a [RawString],
		/// `$in_newline` puts every path on its own line; the others
		/// separate them with spaces.
		one_per_line: bool,
	},
}

/// Something variable references can be resolved against.
pub trait Env {
	/// Look up a variable definition.
	fn lookup_var(&self, name: &str) -> Option<Lookup>;
}

fn find_binding<'a>(bindings: &'a [Binding], name: &str) -> Option<&'a RawStr> {
	bindings
		.iter()
		.rfind(|binding| binding.name == name)
		.map(|binding| &binding.value[..])
}

fn find_rule_var<'a>(vars: &'a [Variable], name: &str) -> Option<&'a RawStr> {
	vars.iter().rfind(|var| var.name == name).map(|var| var.value)
}

impl<'a, 'p> Env for FileScope<'a, 'p> {
	fn lookup_var(&self, name: &str) -> Option<Lookup> {
		match find_binding(&self.bindings, name) {
			Some(value) => Some(Lookup::Done(value)),
			None => self.parent_scope?.lookup_var(name),
		}
	}
}

impl<'a> Env for EdgeScope<'a> {
	fn lookup_var(&self, name: &str) -> Option<Lookup> {
		match name {
			"in" => Some(Lookup::Paths {
				paths: self.inputs,
				one_per_line: false,
			}),
			"in_newline" => Some(Lookup::Paths {
				paths: self.inputs,
				one_per_line: true,
			}),
			"out" => Some(Lookup::Paths {
				paths: self.outputs,
				one_per_line: false,
			}),
			_ => find_binding(self.bindings, name)
				.map(Lookup::Done)
				.or_else(|| find_rule_var(self.rule, name).map(Lookup::Deferred))
				.or_else(|| self.file.lookup_var(name)),
		}
	}
}

impl<'a, 'p> FileScope<'a, 'p> {
	/// Create an empty scope containing no definitions.
	pub fn new() -> Self {
		FileScope {
			parent_scope: None,
			bindings: Vec::new(),
			rules: Vec::new(),
		}
	}

	/// Create an empty scope which inherits the parent scope's definitions.
	pub fn new_subscope(&'p self) -> FileScope<'a, 'p> {
		FileScope {
			parent_scope: Some(self),
			bindings: Vec::new(),
			rules: Vec::new(),
		}
	}

	/// Look up a rule definition.
	pub fn lookup_rule(&self, rule_name: &str) -> Option<&Rule<'a>> {
		let mut scope = Some(self);
		while let Some(s) = scope {
			if let Some(rule) = s.rules.iter().rfind(|rule| rule.name == rule_name) {
				return Some(rule);
			}
			scope = s.parent_scope;
		}
		None
	}
}

/// Check if the given string contains only valid escape sequences.
pub fn check_escapes(src: &RawStr) -> Result<(), InvalidEscape> {
	let mut rest = src;
	while let Some(n) = memchr::memchr(b'$', rest.as_bytes()) {
		rest = &rest[n + 1..];
		match rest.get(0) {
			Some(&b' ') | Some(&b':') | Some(&b'$') | Some(&b'\n') => rest = &rest[1..],
			Some(&b'{') => {
				let mut inner = &rest[1..];
				match eat_identifier(&mut inner) {
					Some(_) if inner.starts_with("}") => rest = &inner[1..],
					_ => return Err(InvalidEscape),
				}
			}
			Some(&c) if is_identifier_char(c) => rest = &rest[1..],
			_ => return Err(InvalidEscape),
		}
	}
	Ok(())
}

/// Expand a variable, such as `"command"`.
///
/// Note: Takes the variable name without the `$`.
///
/// Note: Does *not* check if the escape sequences (in any deferred
/// definitions) are valid. Invalid ones are ignored. The parser uses
/// [`check_escapes`] on all definitions it reads, so anything that came
/// through the parser contains only valid escape sequences.
pub fn expand_var<S: Env>(var_name: &str, env: &S) -> Result<RawString, ExpansionError> {
	let mut out = RawString::new();
	expand_var_into(var_name, env, &mut out, &mut Vec::new())?;
	Ok(out)
}

/// Expand a string containing variables and `$`-escapes.
///
/// Note: Does *not* check if the escape sequences (in both the given string,
/// and in any deferred definitions it references) are valid. Invalid ones
/// are ignored. Use [`check_escapes`] to validate the escape sequences.
pub fn expand_str<T: AsRef<RawStr>, S: Env>(
	source: T,
	env: &S,
) -> Result<RawString, ExpansionError> {
	let mut out = RawString::new();
	expand_str_into(source.as_ref(), env, &mut out, &mut Vec::new())?;
	Ok(out)
}

pub(super) fn expand_strs<S: Env>(
	sources: &[&RawStr],
	env: &S,
) -> Result<Vec<RawString>, ExpansionError> {
	let mut vec = Vec::new();
	expand_strs_into(sources, env, &mut vec)?;
	Ok(vec)
}

pub(super) fn expand_strs_into<S: Env>(
	sources: &[&RawStr],
	env: &S,
	vec: &mut Vec<RawString>,
) -> Result<(), ExpansionError> {
	vec.reserve(sources.len());
	for source in sources {
		vec.push(expand_str(source, env)?);
	}
	Ok(())
}

fn is_plain_shell_byte(c: u8) -> bool {
	c.is_ascii_alphanumeric() || b"_-+/.".contains(&c)
}

/// Append `path` to `out`, single-quoting whatever a shell would interpret.
///
/// Single quotes themselves cannot appear inside a quoted part, so they are
/// written as `\'` between parts.
fn push_shell_quoted(path: &RawStr, out: &mut RawString) {
	let mut rest = path;
	loop {
		let quote = memchr::memchr(b'\'', rest.as_bytes());
		let part = &rest[..quote.unwrap_or(rest.len())];
		if !part.is_empty() {
			if part.bytes().all(is_plain_shell_byte) {
				out.push_str(part);
			} else {
				out.push(b'\'');
				out.push_str(part);
				out.push(b'\'');
			}
		}
		match quote {
			Some(q) => {
				out.push_str("\\'");
				rest = &rest[q + 1..];
			}
			None => break,
		}
	}
}

fn expand_var_into<S: Env>(
	var_name: &str,
	env: &S,
	out: &mut RawString,
	stack: &mut Vec<String>,
) -> Result<(), ExpansionError> {
	match env.lookup_var(var_name) {
		Some(Lookup::Done(value)) => out.push_str(value),
		Some(Lookup::Deferred(value)) => {
			if let Some(start) = stack.iter().position(|name| name == var_name) {
				return Err(ExpansionError {
					cycle: stack[start..].to_vec(),
				});
			}
			stack.push(var_name.to_string());
			expand_str_into(value, env, out, stack)?;
			stack.pop();
		}
		Some(Lookup::Paths {
			paths,
			one_per_line,
		}) => {
			for (i, path) in paths.iter().enumerate() {
				if i > 0 && !one_per_line {
					out.push(b' ');
				}
				push_shell_quoted(path, out);
				if one_per_line {
					out.push(b'\n');
				}
			}
		}
		None => {}
	}
	Ok(())
}

fn expand_str_into<S: Env>(
	source: &RawStr,
	env: &S,
	out: &mut RawString,
	stack: &mut Vec<String>,
) -> Result<(), ExpansionError> {
	let mut rest = source;
	while let Some(dollar) = memchr::memchr(b'$', rest.as_bytes()) {
		out.push_str(&rest[..dollar]);
		rest = &rest[dollar + 1..];
		match rest.get(0) {
			// Escaped dollar sign: "$$"
			Some(&b'$') => {
				out.push(b'$');
				rest = &rest[1..];
			}
			// Escaped newline: "$\n". Skip it and the indentation after it.
			Some(&b'\n') => {
				rest = &rest[1..];
				let indent = rest
					.bytes()
					.position(|b| b != b' ' && b != b'\t')
					.unwrap_or(rest.len());
				rest = &rest[indent..];
			}
			// Braced reference: "${name}"
			Some(&b'{') => {
				let mut inner = &rest[1..];
				if let Some(name) = eat_identifier(&mut inner) {
					if inner.starts_with("}") {
						// Only expand when the matching '}' is in the right
						// place. (Already checked by `check_escapes`.)
						expand_var_into(name, env, out, stack)?;
						rest = &inner[1..];
					}
				}
			}
			// Either a plain reference ("$name"), or "$ "/"$:", which just
			// drop the '$' and keep the escaped character.
			_ => {
				if let Some(name) = eat_identifier(&mut rest) {
					expand_var_into(name, env, out, stack)?;
				}
			}
		}
	}
	out.push_str(rest);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	struct TestEnv {
		paths: Vec<RawString>,
	}

	impl TestEnv {
		fn new() -> Self {
			TestEnv {
				paths: vec![RawString::from("lib/a.o"), RawString::from("b c.o")],
			}
		}
	}

	impl Env for TestEnv {
		fn lookup_var(&self, name: &str) -> Option<Lookup> {
			match name {
				"greeting" => Some(Lookup::Done("oh hi".as_ref())),
				"raw" => Some(Lookup::Done("$not_expanded".as_ref())),
				"flags" => Some(Lookup::Deferred("-O2".as_ref())),
				"cmd" => Some(Lookup::Deferred("cc $flags $greeting $$HOME".as_ref())),
				"self_ref" => Some(Lookup::Deferred("x $self_ref y".as_ref())),
				"loop_a" => Some(Lookup::Deferred("$loop_b".as_ref())),
				"loop_b" => Some(Lookup::Deferred("$loop_c".as_ref())),
				"loop_c" => Some(Lookup::Deferred("$loop_a".as_ref())),
				"in" => Some(Lookup::Paths {
					paths: &self.paths,
					one_per_line: false,
				}),
				"in_newline" => Some(Lookup::Paths {
					paths: &self.paths,
					one_per_line: true,
				}),
				_ => None,
			}
		}
	}

	#[test]
	#[rustfmt::skip]
	fn expansion() {
		let env = TestEnv::new();
		assert_eq!(expand_str("well, $greeting!", &env).unwrap(), "well, oh hi!");
		assert_eq!(expand_str("${greeting}s", &env).unwrap(), "oh his");
		assert_eq!(expand_str("$unknown>", &env).unwrap(), ">");
		assert_eq!(expand_str("a$ b$:c$$d", &env).unwrap(), "a b:c$d");
		assert_eq!(expand_str("one$\n\t two", &env).unwrap(), "onetwo");
		// Already-expanded definitions are used as they are; deferred
		// definitions expand recursively.
		assert_eq!(expand_str("$raw", &env).unwrap(), "$not_expanded");
		assert_eq!(expand_str("$cmd", &env).unwrap(), "cc -O2 oh hi $HOME");
		assert_eq!(expand_var("cmd", &env).unwrap(), "cc -O2 oh hi $HOME");
	}

	#[test]
	fn expansion_cycles_are_reported() {
		let env = TestEnv::new();
		let err = expand_str("$self_ref", &env).unwrap_err();
		assert_eq!(err.cycle, vec!["self_ref".to_string()]);
		let err = expand_str("$loop_b", &env).unwrap_err();
		assert_eq!(
			err.cycle,
			vec![
				"loop_b".to_string(),
				"loop_c".to_string(),
				"loop_a".to_string()
			]
		);
		assert_eq!(
			format!("{}", err),
			"Cycle in variable expansion: loop_b -> loop_c -> loop_a -> loop_b"
		);
	}

	#[test]
	#[rustfmt::skip]
	fn paths_are_shell_quoted() {
		let env = TestEnv::new();
		assert_eq!(expand_str("$in", &env).unwrap(), "lib/a.o 'b c.o'");
		assert_eq!(expand_str("$in_newline", &env).unwrap(), "lib/a.o\n'b c.o'\n");
		let mut quoted = RawString::new();
		push_shell_quoted(RawStr::from_str("it's odd"), &mut quoted);
		assert_eq!(quoted, "it\\''s odd'");
	}

	#[test]
	fn escapes() {
		assert!(check_escapes(RawStr::from_str("a$ b $$ $: $var ${var}")).is_ok());
		assert!(check_escapes(RawStr::from_str("a$")).is_err());
		assert!(check_escapes(RawStr::from_str("a$|")).is_err());
		assert!(check_escapes(RawStr::from_str("${unclosed")).is_err());
		assert!(check_escapes(RawStr::from_str("${}")).is_err());
	}

	#[test]
	fn scope_chain() {
		let mut root = FileScope::new();
		root.bindings.push(Binding {
			name: "x",
			value: RawString::from("outer"),
		});
		root.bindings.push(Binding {
			name: "y",
			value: RawString::from("kept"),
		});
		{
			let mut sub = root.new_subscope();
			sub.bindings.push(Binding {
				name: "x",
				value: RawString::from("inner"),
			});
			assert_eq!(expand_str("$x $y", &sub).unwrap(), "inner kept");
		}
		assert_eq!(expand_str("$x $y", &root).unwrap(), "outer kept");
	}
}
