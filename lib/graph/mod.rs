//! The build graph: interned target paths, wired to build rules.
//!
//! Build rules and the paths between them form a DAG. A [`Node`] is one
//! (canonicalized) path; the rules are referred to by their index in
//! [`Spec::build_rules`][crate::manifest::Spec::build_rules]. All references
//! are plain indices, so the graph is just two flat tables.

use crate::manifest::Spec;
use indexmap::IndexMap;
use log::warn;
use raw_string::{RawStr, RawString};
use std::error::Error;
use std::fmt;

/// One file (or phony name) in the build graph.
#[derive(Clone, Debug, Default)]
pub struct Node {
	/// The build rule that produces this file, if any. At most one.
	pub in_edge: Option<usize>,
	/// The build rules that have this file as an input (of any kind).
	pub out_edges: Vec<usize>,
	/// The build rules that have this file as a validation target.
	pub validation_out_edges: Vec<usize>,
	/// Which separators of the original spelling were backslashes.
	pub slash_bits: u64,
}

/// All the nodes, indexed by canonicalized path.
///
/// The position of a path in the map is its node ID.
#[derive(Debug)]
pub struct Graph {
	nodes: IndexMap<RawString, Node>,
}

/// How to treat the suspicious constructs that `ninja` historically only
/// warns about.
#[derive(Clone, Copy, Debug, Default)]
pub struct GraphOptions {
	/// Fail when two build rules declare the same output, instead of
	/// ignoring the later rule.
	pub dupe_edges_should_err: bool,
	/// Fail when a phony rule has its own output as input, instead of
	/// dropping the self-reference.
	pub phony_cycle_should_err: bool,
}

/// A problem with the shape of the graph.
#[derive(Debug)]
pub enum GraphError {
	/// Two build rules generate the same output.
	DuplicateEdge { output: RawString },
	/// A phony rule has its own output as an input.
	PhonyCycle { output: RawString },
}

impl fmt::Display for GraphError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			GraphError::DuplicateEdge { output } => {
				write!(f, "Multiple build rules generate {}", output)
			}
			GraphError::PhonyCycle { output } => {
				write!(f, "Phony target {} depends on itself", output)
			}
		}
	}
}

impl Error for GraphError {}

impl Graph {
	/// Build the graph for a spec.
	///
	/// Duplicate outputs and phony self-references are fixed up (or
	/// rejected, per `options`), so this takes the spec mutably: a build
	/// rule whose outputs were all claimed by earlier rules is removed.
	pub fn new(spec: &mut Spec, options: GraphOptions) -> Result<Graph, GraphError> {
		// First fix up the rules, so the indices we store below are final.
		let mut claimed = IndexMap::<RawString, ()>::new();
		let mut keep = Vec::with_capacity(spec.build_rules.len());
		for rule in spec.build_rules.iter_mut() {
			if rule.is_phony() {
				let outputs = &rule.outputs;
				if rule.inputs.iter().any(|input| outputs.contains(input)) {
					if options.phony_cycle_should_err {
						return Err(GraphError::PhonyCycle {
							output: rule.outputs[0].clone(),
						});
					}
					warn!(
						"Phony target {} depends on itself; ignoring the self-reference",
						rule.outputs[0]
					);
					let mut index = 0;
					let explicit_inputs = &mut rule.explicit_inputs;
					let outputs = &rule.outputs;
					rule.inputs.retain(|input| {
						let keep = !outputs.contains(input);
						if !keep && index < *explicit_inputs {
							*explicit_inputs -= 1;
						}
						index += 1;
						keep
					});
				}
			}

			let mut index = 0;
			let explicit_outputs = &mut rule.explicit_outputs;
			let mut duplicate = None;
			rule.outputs.retain(|output| {
				let keep = claimed.insert(output.clone(), ()).is_none();
				if !keep {
					duplicate.get_or_insert_with(|| output.clone());
					if index < *explicit_outputs {
						*explicit_outputs -= 1;
					}
				}
				index += 1;
				keep
			});
			if let Some(output) = duplicate {
				if options.dupe_edges_should_err {
					return Err(GraphError::DuplicateEdge { output });
				}
				warn!("Multiple build rules generate {}", output);
			}
			if rule.outputs.is_empty() {
				warn!("A build rule lost all its outputs to earlier rules; ignoring it");
			}
			keep.push(!rule.outputs.is_empty());
		}
		let mut keep = keep.iter();
		spec.build_rules.retain(|_| *keep.next().unwrap());

		// Then wire everything up.
		let mut graph = Graph {
			nodes: IndexMap::new(),
		};
		for (i, rule) in spec.build_rules.iter().enumerate() {
			for output in &rule.outputs {
				let node = graph.intern(output, spec);
				let node = graph.nodes.get_index_mut(node).unwrap().1;
				debug_assert!(node.in_edge.is_none());
				node.in_edge = Some(i);
			}
			for input in rule.inputs.iter().chain(rule.order_deps.iter()) {
				let node = graph.intern(input, spec);
				graph.nodes.get_index_mut(node).unwrap().1.out_edges.push(i);
			}
			for validation in &rule.validations {
				let node = graph.intern(validation, spec);
				graph
					.nodes
					.get_index_mut(node)
					.unwrap()
					.1
					.validation_out_edges
					.push(i);
			}
		}
		Ok(graph)
	}

	fn intern(&mut self, path: &RawStr, spec: &Spec) -> usize {
		if let Some((index, _, _)) = self.nodes.get_full(path) {
			return index;
		}
		let slash_bits = spec.slash_bits.get(path).cloned().unwrap_or(0);
		let entry = self.nodes.entry(path.to_owned());
		let index = entry.index();
		entry.or_insert(Node {
			slash_bits,
			..Node::default()
		});
		index
	}

	/// The number of nodes.
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	/// Look up a node by (canonicalized) path.
	pub fn node_id(&self, path: &RawStr) -> Option<usize> {
		self.nodes.get_full(path).map(|(index, _, _)| index)
	}

	/// The path of a node.
	pub fn path(&self, id: usize) -> &RawStr {
		self.nodes.get_index(id).unwrap().0
	}

	/// A node, by ID.
	pub fn node(&self, id: usize) -> &Node {
		self.nodes.get_index(id).unwrap().1
	}

	/// Iterate over all (node ID, path, node) triples.
	pub fn iter(&self) -> impl Iterator<Item = (usize, &RawStr, &Node)> {
		self.nodes
			.iter()
			.enumerate()
			.map(|(id, (path, node))| (id, &path[..], node))
	}

	/// The nodes that are produced by some rule, but consumed by none.
	///
	/// These are built when the spec has no `default` statements and the
	/// user didn't ask for anything specific.
	pub fn root_nodes(&self) -> Vec<usize> {
		self.iter()
			.filter(|(_, _, node)| node.in_edge.is_some() && node.out_edges.is_empty())
			.map(|(id, _, _)| id)
			.collect()
	}

	/// Whether a dependency log entry for this path is still meaningful:
	/// true iff the path is produced by a rule that uses the dependency log.
	pub fn is_deps_entry_live_for(&self, spec: &Spec, path: &RawStr) -> bool {
		self.nodes
			.get(path)
			.and_then(|node| node.in_edge)
			.and_then(|edge| spec.build_rules[edge].command.as_ref())
			.map_or(false, |command| command.deps.is_some())
	}
}

impl std::ops::Index<usize> for Graph {
	type Output = Node;
	fn index(&self, id: usize) -> &Node {
		self.node(id)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::manifest::read_from;

	fn spec(source: &str) -> Spec {
		read_from("test.ninja".as_ref(), source.as_bytes()).unwrap()
	}

	#[test]
	fn wiring() {
		let mut spec = spec(
			"rule cc\n\
			 \x20 command = cc\n\
			 build a.o: cc a.c || gen |@ check\n\
			 build app: cc a.o\n",
		);
		let graph = Graph::new(&mut spec, GraphOptions::default()).unwrap();
		let a_o = graph.node_id(RawStr::from_str("a.o")).unwrap();
		let a_c = graph.node_id(RawStr::from_str("a.c")).unwrap();
		let gen = graph.node_id(RawStr::from_str("gen")).unwrap();
		let check = graph.node_id(RawStr::from_str("check")).unwrap();
		let app = graph.node_id(RawStr::from_str("app")).unwrap();
		assert_eq!(graph[a_o].in_edge, Some(0));
		assert_eq!(graph[a_o].out_edges, vec![1]);
		assert_eq!(graph[a_c].in_edge, None);
		assert_eq!(graph[gen].out_edges, vec![0]);
		assert_eq!(graph[check].validation_out_edges, vec![0]);
		assert_eq!(graph[app].in_edge, Some(1));
		assert_eq!(graph.root_nodes(), vec![app]);
	}

	#[test]
	fn duplicate_outputs_drop_the_later_rule() {
		let mut spec = spec(
			"rule cc\n\
			 \x20 command = cc\n\
			 build a: cc b\n\
			 build a: cc c\n",
		);
		let graph = Graph::new(&mut spec, GraphOptions::default()).unwrap();
		assert_eq!(spec.build_rules.len(), 1);
		assert_eq!(spec.build_rules[0].inputs[0], "b");
		let a = graph.node_id(RawStr::from_str("a")).unwrap();
		assert_eq!(graph[a].in_edge, Some(0));
	}

	#[test]
	fn duplicate_outputs_can_be_fatal() {
		let mut spec = spec(
			"rule cc\n\
			 \x20 command = cc\n\
			 build a: cc b\n\
			 build a: cc c\n",
		);
		let options = GraphOptions {
			dupe_edges_should_err: true,
			..GraphOptions::default()
		};
		match Graph::new(&mut spec, options) {
			Err(GraphError::DuplicateEdge { output }) => assert_eq!(output, "a"),
			other => panic!("Expected a duplicate edge error, got {:?}", other),
		}
	}

	#[test]
	fn phony_cycle_is_dropped() {
		let mut spec = spec("build x: phony x y\n");
		let graph = Graph::new(&mut spec, GraphOptions::default()).unwrap();
		assert_eq!(spec.build_rules[0].inputs, vec![RawString::from("y")]);
		assert_eq!(spec.build_rules[0].explicit_inputs, 1);
		let x = graph.node_id(RawStr::from_str("x")).unwrap();
		assert_eq!(graph[x].in_edge, Some(0));
		assert!(graph[x].out_edges.is_empty());
	}

	#[test]
	fn deps_entries_live_only_for_deps_rules() {
		let mut spec = spec(
			"rule cc\n\
			 \x20 command = cc\n\
			 rule scan\n\
			 \x20 command = cc\n\
			 \x20 deps = gcc\n\
			 \x20 depfile = $out.d\n\
			 build plain: cc src\n\
			 build scanned: scan src\n",
		);
		let graph = Graph::new(&mut spec, GraphOptions::default()).unwrap();
		assert!(!graph.is_deps_entry_live_for(&spec, RawStr::from_str("plain")));
		assert!(graph.is_deps_entry_live_for(&spec, RawStr::from_str("scanned")));
		assert!(!graph.is_deps_entry_live_for(&spec, RawStr::from_str("src")));
		assert!(!graph.is_deps_entry_live_for(&spec, RawStr::from_str("stale")));
	}

	#[test]
	fn phony_cycle_can_be_fatal() {
		let mut spec = spec("build x: phony x\n");
		let options = GraphOptions {
			phony_cycle_should_err: true,
			..GraphOptions::default()
		};
		assert!(Graph::new(&mut spec, options).is_err());
	}
}
