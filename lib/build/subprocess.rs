//! Running a command while reading its output live.

use nix::poll::{poll, EventFlags, PollFd};
use std::fs::File;
use std::io::{Read, Result as IoResult};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::process::{Child, ExitStatus};

/// Which stream a chunk of output came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Source {
	Stdout,
	Stderr,
}

/// Waits for a [`Child`] to finish, while reading its output live as it
/// runs.
///
/// Requires stdout and stderr to be [`piped`][std::process::Stdio::piped].
///
/// Output is buffered per stream, and handed to `output_callback` when the
/// stream switches, after `timeout_ms` milliseconds of silence, and when
/// the stream closes. Waits for the child to exit, and returns its
/// [`ExitStatus`].
pub fn listen_to_child(
	mut child: Child,
	timeout_ms: i32,
	output_callback: &mut dyn FnMut(Source, &[u8]),
) -> IoResult<ExitStatus> {
	// The pipes we're reading from, in the same order as `poll_fds`.
	let mut pipes = [
		child.stdout.take().map(|f| unsafe { into_file(f) }),
		child.stderr.take().map(|f| unsafe { into_file(f) }),
	];

	let mut poll_fds = [
		PollFd::new(pipes[0].as_ref().unwrap().as_raw_fd(), EventFlags::POLLIN),
		PollFd::new(pipes[1].as_ref().unwrap().as_raw_fd(), EventFlags::POLLIN),
	];

	// Data read from one of the pipes, and which pipe it came from. (The
	// streams are never mixed into one buffer.)
	let mut buffer = Vec::<u8>::with_capacity(16 * 1024);
	let mut buffer_source = Source::Stdout;

	loop {
		// Only poll the streams that are still open.
		let start = if pipes[0].is_some() { 0 } else { 1 };
		let end = if pipes[1].is_some() { 2 } else { 1 };
		if start == end {
			break;
		}

		// With buffered data, wake up after a while to flush it.
		let timeout_ms = if buffer.is_empty() { -1 } else { timeout_ms };

		if poll(&mut poll_fds[start..end], timeout_ms).map_err(|e| e.as_errno().unwrap())? == 0 {
			// Timeout. Flush the buffer.
			output_callback(buffer_source, &buffer);
			buffer.clear();
		} else {
			for i in start..end {
				let source = match i {
					0 => Source::Stdout,
					_ => Source::Stderr,
				};

				if poll_fds[i].revents().unwrap().contains(EventFlags::POLLIN) {
					if source != buffer_source {
						// Switch from stdout to stderr or back. Flush the
						// buffer first.
						if !buffer.is_empty() {
							output_callback(buffer_source, &buffer);
							buffer.clear();
						}
						buffer_source = source;
					}

					// Read bytes, and ignore any errors. Errors are
					// handled by checking `revents` for POLLERR.
					let mut chunk = [0u8; 4096];
					let n_read = pipes[i].as_mut().unwrap().read(&mut chunk).unwrap_or(0);
					buffer.extend_from_slice(&chunk[..n_read]);
				}

				if poll_fds[i]
					.revents()
					.unwrap()
					.intersects(EventFlags::POLLERR | EventFlags::POLLHUP)
				{
					// Our side of a pipe the child closed.
					pipes[i].take();
				}
			}
		}
	}

	// Flush the buffer, if there's anything left in there.
	if !buffer.is_empty() {
		output_callback(buffer_source, &buffer);
	}

	// Both pipes have been closed. Now just wait for the process to exit.
	child.wait()
}

unsafe fn into_file(stream: impl IntoRawFd) -> File {
	File::from_raw_fd(stream.into_raw_fd())
}
