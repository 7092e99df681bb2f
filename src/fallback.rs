//! C7: unsupported-invocation fallback (spec.md §4.7).
//!
//! Some invocations can never be served by a long-lived command server and
//! must instead `exec` the backing tool directly, in this same process: the
//! tool is already being asked to `serve` (avoids spawning a server from a
//! server), or standard descriptors have been rewired in a way the command
//! server protocol doesn't model.

use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use miette::Result;

use crate::error::ClientError;

/// True if this invocation can never go through the command server and must
/// fall back to a direct exec (spec.md §4.7 conditions):
/// - the argument vector contains both `serve` and one of `-d`/`--daemon`
///   (scanning stops at the first literal `--`), since `serve --daemon` must
///   double-fork under the backing tool's own control;
/// - any of stdin/stdout/stderr is not currently open.
#[must_use]
pub fn requires_fallback(argv: &[OsString]) -> bool {
	is_serve_daemon_invocation(argv) || missing_standard_fds()
}

fn is_serve_daemon_invocation(argv: &[OsString]) -> bool {
	let mut has_serve = false;
	let mut has_daemon_flag = false;
	for arg in argv {
		if arg == "--" {
			break;
		}
		if arg == "serve" {
			has_serve = true;
		}
		if arg == "-d" || arg == "--daemon" {
			has_daemon_flag = true;
		}
	}
	has_serve && has_daemon_flag
}

fn missing_standard_fds() -> bool {
	[
		libc::STDIN_FILENO,
		libc::STDOUT_FILENO,
		libc::STDERR_FILENO,
	]
	.iter()
	.any(|&fd| !fd_is_open(fd))
}

fn fd_is_open(fd: RawFd) -> bool {
	// SAFETY: fcntl(F_GETFD) on a small fixed fd number never aliases memory;
	// a negative return only signals the fd is closed.
	unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Exec the backing tool in place of this process, passing `argv` through
/// unmodified. Never returns on success; returns only if `execvp` itself
/// fails (spec.md §4.7).
pub fn exec_original(tool_path: &Path, argv: &[OsString]) -> Result<()> {
	let c_tool = to_cstring(tool_path.as_os_str())?;
	let mut c_argv = vec![c_tool.clone()];
	for arg in argv {
		c_argv.push(to_cstring(arg)?);
	}

	let err = nix::unistd::execvp(&c_tool, &c_argv).unwrap_err();
	Err(ClientError::ExecOriginalFailed {
		source: std::io::Error::from(err),
	}
	.into())
}

fn to_cstring(s: &std::ffi::OsStr) -> Result<CString> {
	CString::new(s.as_bytes())
		.map_err(|_| {
			ClientError::ExecOriginalFailed {
				source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "embedded NUL in argv"),
			}
			.into()
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn v(items: &[&str]) -> Vec<OsString> {
		items.iter().map(OsString::from).collect()
	}

	#[test]
	fn serve_alone_is_not_a_fallback_invocation() {
		assert!(!is_serve_daemon_invocation(&v(&["serve", "--cmdserver", "unix"])));
	}

	#[test]
	fn daemon_flag_alone_is_not_a_fallback_invocation() {
		assert!(!is_serve_daemon_invocation(&v(&["-d", "--port", "8000"])));
	}

	#[test]
	fn serve_with_daemon_flag_is_a_fallback_invocation() {
		assert!(is_serve_daemon_invocation(&v(&["serve", "--daemon"])));
		assert!(is_serve_daemon_invocation(&v(&["serve", "-d"])));
	}

	#[test]
	fn serve_after_double_dash_does_not_count() {
		assert!(!is_serve_daemon_invocation(&v(&["log", "--", "serve", "-d"])));
	}

	#[test]
	fn ordinary_command_is_not_fallback() {
		assert!(!is_serve_daemon_invocation(&v(&["status", "-v"])));
	}
}
