use super::canonicalizepath::canonicalize_path_in_place;
use super::error::ReadError;
use super::eval::{
	expand_str, expand_strs, expand_strs_into, expand_var, Binding, EdgeScope, Env, FileScope,
	Rule,
};
use super::parse::{Parser, Statement, Variable};
use super::{BuildCommand, BuildRule, DepStyle, Pool, Spec};
use crate::error::{AddLocationToError, AddLocationToResult, ErrorWithLocation, Location};
use pile::Pile;
use raw_string::unix::RawStrExt;
use raw_string::{RawStr, RawString};
use std::fs::File;
use std::io::{BufReader, Read};
use std::mem::replace;
use std::path::Path;
use std::str::from_utf8;

fn read_bytes(file_name: &Path) -> Result<Vec<u8>, ReadError> {
	let mut bytes = Vec::new();
	File::open(file_name)
		.and_then(|f| BufReader::with_capacity(0x10000, f).read_to_end(&mut bytes))
		.map_err(|error| ReadError::IoError {
			file_name: file_name.to_owned(),
			error,
		})?;
	Ok(bytes)
}

/// Read, parse, and resolve rules and variables in a `build.ninja` file.
///
/// Parses the file, including any included and subninja'd files, and
/// resolves all rules and variables, resulting in a `Spec`.
pub fn read(file_name: &Path) -> Result<Spec, ErrorWithLocation<ReadError>> {
	let source = read_bytes(file_name).err_at(Location::UNKNOWN)?;
	read_from(file_name, &source)
}

/// [`read()`], but with the source given directly instead of read from a
/// file.
///
/// Useful for testing and fuzzing.
///
/// `file_name` is used in errors, and to know where to look for `include`
/// and `subninja` files.
pub fn read_from(file_name: &Path, source: &[u8]) -> Result<Spec, ErrorWithLocation<ReadError>> {
	let pile = Pile::new();
	let mut spec = Spec::new();
	let mut scope = FileScope::new();
	read_into(
		file_name,
		RawStr::from_bytes(source),
		&pile,
		&mut spec,
		&mut scope,
	)?;
	if let Some(binding) = scope
		.bindings
		.iter_mut()
		.rfind(|binding| binding.name.as_bytes() == b"builddir")
	{
		spec.build_dir = Some(replace(&mut binding.value, RawString::new()));
	}
	Ok(spec)
}

fn read_into<'a: 'p, 'p>(
	file_name: &Path,
	source: &'a RawStr,
	pile: &'a Pile<Vec<u8>>,
	spec: &mut Spec,
	scope: &mut FileScope<'a, 'p>,
) -> Result<(), ErrorWithLocation<ReadError>> {
	let mut parser = Parser::new(file_name, source);

	while let Some(statement) = parser.next_statement()? {
		let loc = parser.location();
		match statement {
			Statement::Variable { name, value } => {
				let value = expand_str(value, scope).err_at(loc)?;
				scope.bindings.push(Binding { name, value })
			}
			Statement::Rule { name } => {
				if scope.rules.iter().any(|rule| rule.name == name) {
					return Err(ReadError::DuplicateRule(name.to_string()).at(loc));
				}
				let mut vars = Vec::new();
				while let Some(var) = parser.next_variable()? {
					if !match var.name {
						"command" | "description" | "depfile" | "deps" | "msvc_deps_prefix" => true,
						"rspfile" | "rspfile_content" | "generator" | "restat" => true,
						"pool" | "dyndep" => true,
						_ => false,
					} {
						return Err(
							ReadError::UnknownVariable(var.name.to_string()).at(parser.location())
						);
					}
					vars.push(var);
				}
				scope.rules.push(Rule { name, vars })
			}
			Statement::Pool { name } => {
				if spec.pools.iter().any(|pool| pool.name == name) {
					return Err(ReadError::DuplicatePool(name.to_string()).at(loc));
				}
				let mut depth = None;
				while let Some(Variable { name, value }) = parser.next_variable()? {
					let loc = parser.location();
					if name != "depth" {
						return Err(ReadError::UnknownVariable(name.to_string()).at(loc));
					}
					let value = expand_str(value, scope).err_at(loc)?;
					depth = Some(
						from_utf8(value.as_bytes())
							.ok()
							.and_then(|s| s.parse().ok())
							.ok_or_else(|| ReadError::InvalidPoolDepth.at(loc))?,
					);
				}
				if let Some(depth) = depth {
					spec.pools.push(Pool {
						name: name.to_string(),
						depth,
					});
				} else {
					return Err(ReadError::ExpectedPoolDepth.at(parser.location()));
				}
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
				let mut vars = Vec::new();
				while let Some(Variable { name, value }) = parser.next_variable()? {
					vars.push(Binding {
						name,
						value: expand_str(value, scope).err_at(parser.location())?,
					});
				}

				// Expand the explicit input and output paths. The rule and
				// the path lists themselves are not in scope yet. ($in and
				// $out only contain the explicit ones.)
				let path_scope = EdgeScope {
					file: &scope,
					bindings: &vars,
					rule: &[],
					inputs: &[],
					outputs: &[],
				};
				let n_explicit_outputs = explicit_outputs.len();
				let n_explicit_inputs = explicit_deps.len();
				let mut outputs =
					Vec::with_capacity(explicit_outputs.len() + implicit_outputs.len());
				let mut inputs = Vec::with_capacity(explicit_deps.len() + implicit_deps.len());
				expand_strs_into(&explicit_outputs, &path_scope, &mut outputs).err_at(loc)?;
				expand_strs_into(&explicit_deps, &path_scope, &mut inputs).err_at(loc)?;

				let command = if rule_name == "phony" {
					None
				} else {
					// Look up the rule in the current scope.
					let rule = scope
						.lookup_rule(rule_name)
						.ok_or_else(|| ReadError::UndefinedRule(rule_name.to_string()).at(loc))?;

					// Now $in, $out, and the rule variables exist too.
					let edge_scope = EdgeScope {
						file: &scope,
						bindings: &vars,
						rule: &rule.vars,
						inputs: &inputs,
						outputs: &outputs,
					};

					let expand_var = |name| expand_var(name, &edge_scope).err_at(loc);

					// And expand the special variables with it:

					// First the pool, and also look it up:
					let pool = expand_var("pool")?;
					let pool = if pool.is_empty() {
						super::DEFAULT_POOL
					} else {
						spec.pools
							.iter()
							.position(|p| p.name.as_bytes() == pool.as_bytes())
							.ok_or_else(|| ReadError::UndefinedPool(pool).at(loc))?
					};

					// Then the dyndep file, which needs canonicalization:
					let dyndep = expand_var("dyndep")?;
					let dyndep = if dyndep.is_empty() {
						None
					} else {
						let mut dyndep = dyndep;
						canonicalize_path_in_place(&mut dyndep);
						Some(dyndep)
					};

					// And then the rest:
					let msvc_deps_prefix = expand_var("msvc_deps_prefix")?;
					Some(BuildCommand {
						rule_name: rule_name.to_string(),
						command: expand_var("command")?,
						description: expand_var("description")?,
						depfile: expand_var("depfile")?,
						deps: match expand_var("deps")?.as_bytes() {
							b"gcc" => Some(DepStyle::Gcc),
							b"msvc" => Some(DepStyle::Msvc),
							_ => None,
						},
						msvc_deps_prefix: if msvc_deps_prefix.is_empty() {
							RawString::from("Note: including file: ")
						} else {
							msvc_deps_prefix
						},
						generator: edge_scope.lookup_var("generator").is_some(),
						restat: edge_scope.lookup_var("restat").is_some(),
						rspfile: expand_var("rspfile")?,
						rspfile_content: expand_var("rspfile_content")?,
						pool,
						dyndep,
					})
				};

				expand_strs_into(&implicit_outputs, &path_scope, &mut outputs).err_at(loc)?;
				expand_strs_into(&implicit_deps, &path_scope, &mut inputs).err_at(loc)?;

				let mut order_deps = expand_strs(&order_deps, &path_scope).err_at(loc)?;
				let mut validations = expand_strs(&validations, &path_scope).err_at(loc)?;

				for path in outputs
					.iter_mut()
					.chain(inputs.iter_mut())
					.chain(order_deps.iter_mut())
					.chain(validations.iter_mut())
				{
					let slash_bits = canonicalize_path_in_place(path);
					if slash_bits != 0 {
						spec.slash_bits.insert(path.clone(), slash_bits);
					}
				}

				if let Some(dyndep) = command.as_ref().and_then(|c| c.dyndep.as_ref()) {
					if !inputs.contains(dyndep) && !order_deps.contains(dyndep) {
						return Err(ReadError::DyndepNotAnInput(dyndep.clone()).at(loc));
					}
				}

				spec.build_rules.push(BuildRule {
					outputs,
					explicit_outputs: n_explicit_outputs,
					inputs,
					explicit_inputs: n_explicit_inputs,
					order_deps,
					validations,
					command,
				});
			}
			Statement::Default { paths } => {
				spec.default_targets.reserve(paths.len());
				for p in paths {
					let mut path = expand_str(p, scope).err_at(loc)?;
					canonicalize_path_in_place(&mut path);
					spec.default_targets.push(path);
				}
			}
			Statement::Include { path } => {
				let path = expand_str(path, scope).err_at(loc)?;
				let source = RawStr::from_bytes(pile.add(read_bytes(path.as_path()).err_at(loc)?));
				read_into(path.as_path(), source, pile, spec, scope)?;
			}
			Statement::SubNinja { path } => {
				let path = expand_str(path, scope).err_at(loc)?;
				let source = read_bytes(path.as_path()).err_at(loc)?;
				read_into(
					path.as_path(),
					RawStr::from_bytes(&source),
					&Pile::new(),
					spec,
					&mut scope.new_subscope(),
				)?;
			}
		}
	}

	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	fn read_str(source: &str) -> Spec {
		read_from("test.ninja".as_ref(), source.as_bytes()).unwrap()
	}

	#[test]
	fn simple_build() {
		let spec = read_str(
			"rule cc\n\
			 \x20 command = gcc -c $in -o $out\n\
			 build foo.o: cc foo.c\n",
		);
		assert_eq!(spec.build_rules.len(), 1);
		let rule = &spec.build_rules[0];
		assert_eq!(rule.outputs[0], "foo.o");
		assert_eq!(rule.inputs[0], "foo.c");
		let command = rule.command.as_ref().unwrap();
		assert_eq!(command.command, "gcc -c foo.c -o foo.o");
		assert_eq!(command.rule_name, "cc");
	}

	#[test]
	fn phony_and_regions() {
		let spec = read_str(
			"rule cc\n\
			 \x20 command = cc\n\
			 build a.o | a.d: cc a.c | x.h || gen |@ val\n\
			 build all: phony a.o\n",
		);
		let rule = &spec.build_rules[0];
		assert_eq!(rule.explicit_outputs, 1);
		assert_eq!(rule.outputs.len(), 2);
		assert_eq!(rule.explicit_inputs, 1);
		assert_eq!(rule.inputs.len(), 2);
		assert_eq!(rule.order_deps[0], "gen");
		assert_eq!(rule.validations[0], "val");
		assert!(spec.build_rules[1].is_phony());
	}

	#[test]
	fn edge_vars_and_scoping() {
		let spec = read_str(
			"flags = -O2\n\
			 rule cc\n\
			 \x20 command = gcc $flags $in -o $out\n\
			 build a: cc b\n\
			 \x20 flags = -O0\n\
			 build c: cc d\n",
		);
		assert_eq!(
			spec.build_rules[0].command.as_ref().unwrap().command,
			"gcc -O0 b -o a"
		);
		assert_eq!(
			spec.build_rules[1].command.as_ref().unwrap().command,
			"gcc -O2 d -o c"
		);
	}

	#[test]
	fn pools() {
		let spec = read_str(
			"pool link\n\
			 \x20 depth = 2\n\
			 rule ld\n\
			 \x20 command = ld\n\
			 \x20 pool = link\n\
			 build a: ld b\n\
			 build c: ld d\n\
			 \x20 pool = console\n",
		);
		assert_eq!(spec.pools[2].name, "link");
		assert_eq!(spec.pools[2].depth, 2);
		assert_eq!(spec.build_rules[0].command.as_ref().unwrap().pool, 2);
		assert_eq!(
			spec.build_rules[1].command.as_ref().unwrap().pool,
			super::super::CONSOLE_POOL
		);
	}

	#[test]
	fn dyndep_must_be_an_input() {
		let err = read_from(
			"test.ninja".as_ref(),
			b"rule cc\n  command = cc\n  dyndep = dd\nbuild a: cc b\n",
		)
		.unwrap_err();
		match err.error {
			ReadError::DyndepNotAnInput(path) => assert_eq!(path, "dd"),
			e => panic!("Expected a dyndep error, got {:?}", e),
		}
		let spec = read_str(
			"rule cc\n\
			 \x20 command = cc\n\
			 \x20 dyndep = dd\n\
			 build a: cc b || dd\n",
		);
		let command = spec.build_rules[0].command.as_ref().unwrap();
		assert_eq!(command.dyndep.as_ref().unwrap(), "dd");
	}

	#[test]
	fn duplicate_rule() {
		let err = read_from(
			"test.ninja".as_ref(),
			b"rule cc\n  command = a\nrule cc\n  command = b\n",
		)
		.unwrap_err();
		match err.error {
			ReadError::DuplicateRule(name) => assert_eq!(name, "cc"),
			e => panic!("Expected a duplicate rule error, got {:?}", e),
		}
	}

	#[test]
	fn builddir() {
		let spec = read_str("builddir = out\nrule cc\n  command = cc\nbuild a: cc b\n");
		assert_eq!(spec.build_dir(), Path::new("out"));
	}

	#[test]
	fn default_targets_are_canonicalized() {
		let spec = read_str(
			"rule cc\n\
			 \x20 command = cc\n\
			 build a/b: cc c\n\
			 default ./a/b\n",
		);
		assert_eq!(spec.default_targets[0], "a/b");
	}
}
