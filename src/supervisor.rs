//! C3: server supervisor (spec.md §4.3).
//!
//! Forks and execs the backing tool as a command server. Descriptor
//! enumeration is abstracted behind [`close_inherited_fds`] so platforms
//! without a `/proc/self/fd`-equivalent could substitute a `closefrom`-style
//! bulk close with the same observable effect (Design Notes §9); this crate
//! only targets unix, where `/proc/self/fd` is assumed per spec.md §1.

use std::env;
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use miette::Result;
use nix::unistd::{fork, ForkResult, Pid};
use tracing::debug;

use crate::config::Config;
use crate::error::ClientError;
use crate::session::ServerOptions;

/// Where to find the backing tool executable (spec.md §4.3 resolution
/// order). Reading `/proc/self/exe` and trying a sibling binary is left out:
/// spec.md's resolution order lists it as compile-time optional, and this
/// crate does not enable it, instead stopping at the env overrides and a
/// bare-name `PATH` lookup.
pub fn resolve_tool_path(config: &Config) -> OsString {
	if let Some(path) = env::var_os(config.env("HG")).filter(|v| !v.is_empty()) {
		return path;
	}
	if let Some(path) = env::var_os("HG").filter(|v| !v.is_empty()) {
		return path;
	}
	OsString::from("hg")
}

/// Fork and exec the backing tool as a command server listening on
/// `opts.init_socket_path`. Returns the child's pid to the parent; never
/// returns in the child (the child either execs or aborts the process).
pub fn spawn(config: &Config, tool_path: &Path, opts: &ServerOptions) -> Result<Pid> {
	debug!(?opts.init_socket_path, "starting command server");

	// SAFETY: between fork and exec only async-signal-safe operations run
	// in the child (env var plumbing via std::env and a descriptor scan),
	// matching the constraints the original C implementation observes
	// between its own fork() and execvp().
	match unsafe { fork() }.map_err(|source| ClientError::ForkFailed {
		source: std::io::Error::from(source),
	})? {
		ForkResult::Parent { child } => Ok(child),
		ForkResult::Child => {
			if let Err(err) = exec_command_server(config, tool_path, opts) {
				eprintln!("chg: failed to exec command server: {err}");
				std::process::exit(255);
			}
			unreachable!("exec_command_server only returns on error")
		}
	}
}

fn exec_command_server(config: &Config, tool_path: &Path, opts: &ServerOptions) -> Result<()> {
	prepare_locale_env(config)?;
	close_inherited_fds();

	// Set right before exec, mirroring the original's placement: any
	// process that inherits this unset marker and spawns its own client
	// will trip the loop-detection check in gate::check_self_invocation.
	crate::config::set_env(&config.env("INTERNALMARK"), "")?;

	let mut argv: Vec<OsString> = vec![
		tool_path.as_os_str().to_owned(),
		"serve".into(),
		"--no-profile".into(),
		"--cmdserver".into(),
		"chgunix".into(),
		"--address".into(),
		opts.init_socket_path.clone().into_os_string(),
		"--daemon-postexec".into(),
		"chdir:/".into(),
	];
	argv.extend(opts.sensitive_args.iter().cloned());

	let c_tool = to_cstring(tool_path.as_os_str())?;
	let c_argv: Vec<CString> = argv
		.iter()
		.map(|a| to_cstring(a))
		.collect::<Result<_>>()?;

	let err = nix::unistd::execvp(&c_tool, &c_argv).unwrap_err();
	Err(ClientError::ExecFailed {
		source: std::io::Error::from(err),
	}
	.into())
}

fn to_cstring(s: &std::ffi::OsStr) -> Result<CString> {
	CString::new(s.as_bytes())
		.map_err(|_| ClientError::ExecFailed {
			source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "embedded NUL in argv"),
		})
		.map_err(Into::into)
}

/// Preserve `LC_CTYPE` under an alternate variable if set, or signal its
/// absence, so the server can restore or clear it after its own locale
/// normalization (spec.md §4.3, §6 `LC_CTYPE` row).
fn prepare_locale_env(config: &Config) -> Result<()> {
	match env::var_os("LC_CTYPE") {
		Some(value) => crate::config::set_env(&config.env("ORIG_LC_CTYPE"), value),
		None => crate::config::set_env(&config.env("_CLEAR_LC_CTYPE"), ""),
	}
}

/// Close every open descriptor greater than 2 before handing control to the
/// command server, so inherited locks or connected sockets don't pin
/// resources there (spec.md §4.3, §5).
fn close_inherited_fds() {
	let Ok(entries) = std::fs::read_dir("/proc/self/fd") else {
		return;
	};
	// Collect every fd number before closing any of them: closing fds while
	// still iterating the directory stream would risk closing the very
	// descriptor backing the iteration (the enumeration handle itself).
	let fds: Vec<i32> = entries
		.flatten()
		.filter_map(|entry| entry.file_name().to_string_lossy().parse::<i32>().ok())
		.collect();

	for fd in fds {
		if fd <= libc::STDERR_FILENO {
			continue;
		}
		// SAFETY: fd came from enumerating our own /proc/self/fd; closing
		// an fd we don't otherwise hold open across fork is safe here,
		// and a failure is not fatal (best-effort per spec.md §7).
		let res = unsafe { libc::close(fd) };
		if res != 0 {
			debug!(fd, "failed to close inherited descriptor, ignoring");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn falls_back_to_bare_name() {
		let config = Config::from_env();
		std::env::remove_var(config.env("HG"));
		std::env::remove_var("HG");
		assert_eq!(resolve_tool_path(&config), OsString::from("hg"));
	}

	#[test]
	fn app_prefixed_override_wins_over_unprefixed() {
		let config = Config::from_env();
		std::env::set_var(config.env("HG"), "/opt/app/hg");
		std::env::set_var("HG", "/usr/bin/hg");
		let resolved = resolve_tool_path(&config);
		std::env::remove_var(config.env("HG"));
		std::env::remove_var("HG");
		assert_eq!(resolved, OsString::from("/opt/app/hg"));
	}
}
