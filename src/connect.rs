//! C4: connection retry loop (spec.md §4.1, §4.4).
//!
//! A freshly spawned command server binds and listens at
//! [`SocketPaths::init_socket_path`] before it is discoverable at the stable
//! [`SocketPaths::socket_path`]; promoting it is this client's job, via a
//! single atomic `rename(2)` once the first connection succeeds. Every
//! later client for the same repository then finds the server directly at
//! `socket_path`, with no window where a half-bound socket is visible there.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use miette::Result;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::debug;

use crate::error::ClientError;
use crate::socket::SocketPaths;

/// Poll cadence while waiting for a freshly spawned server to start
/// listening (spec.md §4.4).
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of waiting for a freshly spawned server. A nonzero exit or a
/// death by signal is *not* a [`ClientError`]: spec.md §7 classifies it as
/// "server-terminal" and requires that it "propagate that exit code as the
/// client's own" rather than surface as an error diagnostic (§8 scenario 6).
pub enum SpawnOutcome {
	Connected(UnixStream),
	/// The child exited (or was killed) before it ever started listening;
	/// this exit/signal code should become the client's own exit code.
	ServerExited(i32),
}

/// Wait for `child` to start listening on `paths.init_socket_path`, then
/// promote it to `paths.socket_path` with a single atomic rename. Polls at
/// [`POLL_INTERVAL`], reaping `child` non-blockingly on every iteration so a
/// server that dies during start-up is reported instead of waited on
/// forever. `timeout_secs == 0` means wait indefinitely.
pub fn connect_spawned(paths: &SocketPaths, child: Pid, timeout_secs: u64) -> Result<SpawnOutcome> {
	let deadline = (timeout_secs > 0).then(|| Instant::now() + Duration::from_secs(timeout_secs));

	loop {
		if let Ok(stream) = UnixStream::connect(&paths.init_socket_path) {
			rename_into_place(&paths.init_socket_path, &paths.socket_path)?;
			return Ok(SpawnOutcome::Connected(stream));
		}

		match waitpid(child, Some(WaitPidFlag::WNOHANG)).map_err(|source| ClientError::WaitFailed {
			source: std::io::Error::from(source),
		})? {
			WaitStatus::StillAlive => {}
			WaitStatus::Exited(_, 0) => return Err(ClientError::ServerQuitClean.into()),
			WaitStatus::Exited(_, code) => return Ok(SpawnOutcome::ServerExited(code)),
			WaitStatus::Signaled(_, signal, _) => {
				return Ok(SpawnOutcome::ServerExited(signal as i32));
			}
			other => {
				debug!(?other, "unexpected wait status, continuing to poll");
			}
		}

		if let Some(deadline) = deadline {
			if Instant::now() >= deadline {
				return Err(ClientError::ConnectTimeout {
					path: paths.init_socket_path.clone(),
				}
				.into());
			}
		}

		sleep(POLL_INTERVAL);
	}
}

fn rename_into_place(from: &Path, to: &Path) -> Result<()> {
	std::fs::rename(from, to).map_err(|source| {
		ClientError::RenameFailed {
			from: from.to_path_buf(),
			to: to.to_path_buf(),
			source,
		}
		.into()
	})
}

#[cfg(test)]
mod tests {
	use std::os::unix::net::UnixListener;

	use nix::sys::signal::{kill, Signal};

	use super::*;

	fn paths(tmp: &tempfile::TempDir) -> SocketPaths {
		SocketPaths {
			socket_path: tmp.path().join("server"),
			init_socket_path: tmp.path().join("server.init"),
		}
	}

	/// spec.md §3 invariant: after a successful handshake the init path no
	/// longer exists and the primary path does.
	#[test]
	fn connects_and_renames_once_listener_is_up() {
		let tmp = tempfile::tempdir().unwrap();
		let paths = paths(&tmp);
		let init = paths.init_socket_path.clone();

		let mut child = std::process::Command::new("sleep")
			.arg("5")
			.spawn()
			.unwrap();
		let pid = Pid::from_raw(child.id() as i32);

		let listener_thread = std::thread::spawn(move || {
			std::thread::sleep(Duration::from_millis(50));
			let listener = UnixListener::bind(&init).unwrap();
			// keep it alive long enough for the connect side to succeed
			std::thread::sleep(Duration::from_millis(500));
			drop(listener);
		});

		let outcome = connect_spawned(&paths, pid, 5).unwrap();
		assert!(matches!(outcome, SpawnOutcome::Connected(_)));
		assert!(paths.socket_path.exists());
		assert!(!paths.init_socket_path.exists());

		listener_thread.join().unwrap();
		let _ = kill(pid, Signal::SIGKILL);
		let _ = child.wait();
	}

	/// spec.md §7: a nonzero exit during the retry is "server-terminal", not
	/// an error diagnostic — it must come back as `ServerExited`, not `Err`.
	#[test]
	fn nonzero_exit_before_listening_is_reported_not_errored() {
		let tmp = tempfile::tempdir().unwrap();
		let paths = paths(&tmp);

		let mut child = std::process::Command::new("sh")
			.args(["-c", "exit 7"])
			.spawn()
			.unwrap();
		let pid = Pid::from_raw(child.id() as i32);

		let outcome = connect_spawned(&paths, pid, 5).unwrap();
		assert!(matches!(outcome, SpawnOutcome::ServerExited(7)));
		let _ = child.wait();
	}

	/// spec.md §7: a clean (status 0) exit during the retry means the server
	/// quit without ever serving — this is anomalous and fatal, unlike a
	/// nonzero exit.
	#[test]
	fn clean_exit_before_listening_is_an_error() {
		let tmp = tempfile::tempdir().unwrap();
		let paths = paths(&tmp);

		let mut child = std::process::Command::new("true").spawn().unwrap();
		let pid = Pid::from_raw(child.id() as i32);

		assert!(connect_spawned(&paths, pid, 5).is_err());
		let _ = child.wait();
	}

	#[test]
	fn timeout_elapses_while_child_stays_alive() {
		let tmp = tempfile::tempdir().unwrap();
		let paths = paths(&tmp);

		let mut child = std::process::Command::new("sleep")
			.arg("5")
			.spawn()
			.unwrap();
		let pid = Pid::from_raw(child.id() as i32);

		let result = connect_spawned(&paths, pid, 1);
		assert!(result.is_err());

		let _ = kill(pid, Signal::SIGKILL);
		let _ = child.wait();
	}
}
