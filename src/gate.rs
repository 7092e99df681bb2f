//! C8: start-up gate (spec.md §4.8).
//!
//! Checks that run before any socket or process work: loop detection, the
//! `--kill-chg-daemon` escape hatch, and resolving which argv elements are
//! actually meant for this client versus the backing tool.

use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;

use miette::Result;
use tracing::debug;

use crate::config::Config;
use crate::error::ClientError;
use crate::socket;

/// Fail fast if this process was itself started by a command server it
/// spawned (spec.md §4.8, §11 item 2): a faithfully faulty wrapper around
/// the backing tool could otherwise recurse forever. The marker is set right
/// before `execvp` in [`crate::supervisor::exec_command_server`] and is
/// always present (even if empty) in a server's environment, never in a
/// plain user shell.
pub fn check_self_invocation(config: &Config) -> Result<()> {
	if std::env::var_os(config.env("INTERNALMARK")).is_some() {
		return Err(ClientError::SelfInvocation.into());
	}
	Ok(())
}

/// `--kill-chg-daemon` as the sole argument: resolve this invocation's own
/// rendezvous socket path (the same resolution `socket::resolve` uses for an
/// ordinary session, not a path taken from argv — `chg.c`'s `killcmdserver`
/// reuses the very `opts.sockname` that `setcmdserveropts` already computed),
/// resolve it through any symlinks, and best-effort unlink the target
/// (spec.md §6, §11 item 5). Always exits the process with status 0, whether
/// or not the file existed, mirroring the original's fire-and-forget
/// semantics.
pub fn maybe_handle_kill_daemon(config: &Config, argv: &[OsString]) -> Result<Option<i32>> {
	if argv.len() != 1 || argv[0] != "--kill-chg-daemon" {
		return Ok(None);
	}

	let paths = socket::resolve(config, std::process::id())?;
	let resolved = std::fs::canonicalize(&paths.socket_path).unwrap_or(paths.socket_path);
	if let Err(err) = std::fs::remove_file(&resolved) {
		debug!(?resolved, %err, "kill-chg-daemon: nothing to remove, ignoring");
	}
	Ok(Some(0))
}

/// Split `argv` (the arguments after the program name) into the slice that
/// should be forwarded to the command server and sensitive flags extracted
/// separately by [`crate::flags::extract`]. Currently identity: every
/// argument after the program name is forwarded verbatim, since this client
/// does not parse or rewrite the backing tool's own grammar (spec.md §1
/// Non-goals).
#[must_use]
pub fn command_argv(argv: &[OsString]) -> &[OsString] {
	argv
}

/// Render an [`OsString`] for inclusion in a diagnostic without risking a
/// panic on non-UTF-8 input.
#[must_use]
pub fn display_lossy(arg: &OsString) -> String {
	String::from_utf8_lossy(arg.as_bytes()).into_owned()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn v(items: &[&str]) -> Vec<OsString> {
		items.iter().map(OsString::from).collect()
	}

	#[test]
	fn self_invocation_is_detected_via_marker() {
		let config = Config::from_env();
		std::env::set_var(config.env("INTERNALMARK"), "");
		let result = check_self_invocation(&config);
		std::env::remove_var(config.env("INTERNALMARK"));
		assert!(result.is_err());
	}

	#[test]
	fn no_marker_means_no_self_invocation() {
		let config = Config::from_env();
		std::env::remove_var(config.env("INTERNALMARK"));
		assert!(check_self_invocation(&config).is_ok());
	}

	#[test]
	fn kill_daemon_requires_sole_argument() {
		let config = Config::from_env();
		let argv = v(&["--kill-chg-daemon", "extra"]);
		assert_eq!(maybe_handle_kill_daemon(&config, &argv).unwrap(), None);
	}

	#[test]
	fn non_kill_daemon_invocation_is_not_handled() {
		let config = Config::from_env();
		let argv = v(&["status"]);
		assert_eq!(maybe_handle_kill_daemon(&config, &argv).unwrap(), None);
	}

	#[test]
	fn kill_daemon_always_exits_zero_even_if_socket_missing() {
		let tmp = tempfile::tempdir().unwrap();
		let config = Config {
			sockname_override: Some(tmp.path().join("server")),
			..Config::from_env()
		};
		let argv = v(&["--kill-chg-daemon"]);
		assert_eq!(maybe_handle_kill_daemon(&config, &argv).unwrap(), Some(0));
	}
}
