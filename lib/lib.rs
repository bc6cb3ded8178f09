//! This library crate contains the engine of `ninka`, an implementation of
//! the `ninja` build system.
//!
//! # File formats
//!
//! This crate implements support for several file formats:
//!
//! - **`build.ninja` files**
//!
//!   The [`manifest`] module contains everything you need to parse
//!   `build.ninja` files, including variable expansion, traversing other
//!   ninja files, and resolving build rules.
//!
//! - **`.ninja_log` files**
//!
//!   The [`buildlog`] module allows both reading from and writing to
//!   `.ninja_log` files, which store when and with which command each target
//!   was built previously.
//!
//! - **`.ninja_deps` files**
//!
//!   The [`deplog`] module can read and write `.ninja_deps` files, which hold
//!   the dependency information discovered during previous builds.
//!
//! - **`Makefile`-style dependency files**
//!
//!   The [`depfile`] module can read `Makefile`-style dependency files which
//!   are written by some compilers, such as GCC and Clang.
//!
//! - **dyndep files**
//!
//!   The [`dyndep`] module can read the files which restate the dependencies
//!   of a build rule during the build itself.
//!
//! # The engine
//!
//! On top of the file formats, the crate provides the pieces that make up an
//! incremental build:
//!
//! - The [`graph`] module interns target paths and connects build rules into
//!   a dependency graph.
//!
//! - The [`outdated`] module walks that graph from the requested targets and
//!   decides which build rules have to run, based on `mtime`s, the build log,
//!   and the dependency log.
//!
//! - The [`queue`] module tracks which outdated build rules can run in what
//!   order, honoring pools and failure limits.
//!
//! - The [`build`] module drains the queue with a set of worker threads,
//!   running commands, feeding discovered dependencies back into the logs,
//!   and re-checking `restat` rules.
//!
//! - The [`mtime`] and [`disk`] modules isolate all file system access, so
//!   the graph core itself never touches the disk.

pub mod build;
pub mod buildlog;
pub mod depfile;
pub mod deplog;
pub mod disk;
pub mod dyndep;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod mtime;
pub mod outdated;
pub mod queue;
