//! C6: the session driver (spec.md §4.6) — the state machine that ties every
//! other component together for one invocation: `Starting` → `Connecting` →
//! (`Spawning`) → `Validating` → (`Redirecting`) → `Running` → `TearingDown`
//! → `Terminal`.

use std::ffi::OsString;
use std::path::PathBuf;

use miette::Result;
use tracing::{debug, info};

use crate::client::{ClientHandle, UnixClientHandle};
use crate::config::Config;
use crate::connect;
use crate::error::ClientError;
use crate::fallback;
use crate::flags;
use crate::gate;
use crate::instructions::{self, Applied};
use crate::signal;
use crate::socket::{self, SocketPaths};
use crate::supervisor;

/// Hard cap on reconnects in a single invocation (spec.md §3 invariant,
/// §8 property 6): bounds a misbehaving or looping server into a
/// diagnosable error instead of a silent hang.
const MAX_REDIRECTS: u32 = 10;

/// Mutable session state threaded through the state machine; distinct from
/// the immutable [`Config`] gathered once at start-up.
#[derive(Debug, Clone)]
pub struct ServerOptions {
	pub socket_path: PathBuf,
	pub init_socket_path: PathBuf,
	pub redirect_socket_path: Option<PathBuf>,
	pub sensitive_args: Vec<OsString>,
}

/// Named states from spec.md §4.6, kept explicit rather than folded into
/// control flow so each transition is a single, named, loggable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
	Starting,
	Connecting,
	Spawning,
	Validating,
	Running,
	TearingDown,
}

/// Drives one client invocation end to end and returns the process exit
/// code the backing tool (or an `exit <n>` instruction) produced.
pub struct Driver {
	config: Config,
	argv: Vec<OsString>,
}

impl Driver {
	#[must_use]
	pub fn new(config: Config, argv: Vec<OsString>) -> Self {
		Self { config, argv }
	}

	pub fn run(&self) -> Result<i32> {
		gate::check_self_invocation(&self.config)?;

		let tool_path = PathBuf::from(supervisor::resolve_tool_path(&self.config));
		let command_argv = gate::command_argv(&self.argv);

		// Unsupported shapes are resolved before any other local check
		// (spec.md §4.6 `Starting`; `chg.c`'s `isunsupported` call precedes
		// both the kill-daemon check and `setenv("CHGHG", ...)`) so a
		// falling-back invocation execs the original tool without this
		// client's own env plumbing leaking into it.
		if fallback::requires_fallback(command_argv) {
			debug!("invocation cannot use a command server, falling back to direct exec");
			fallback::exec_original(&tool_path, command_argv)?;
			unreachable!("exec_original only returns on failure");
		}

		if let Some(code) = gate::maybe_handle_kill_daemon(&self.config, &self.argv)? {
			return Ok(code);
		}

		// Pin the resolved tool path back into the environment under its own
		// name so the command server (and anything it spawns) resolves the
		// same backing tool this client just picked, rather than re-running
		// its own `HG`/`PATH` lookup and potentially finding something else.
		crate::config::set_env(&self.config.env("HG"), tool_path.as_os_str())?;

		let paths = socket::resolve(&self.config, std::process::id())?;
		let mut opts = ServerOptions {
			socket_path: paths.socket_path,
			init_socket_path: paths.init_socket_path,
			redirect_socket_path: None,
			sensitive_args: flags::extract(command_argv),
		};

		let mut state = SessionState::Starting;
		let mut handle: Option<UnixClientHandle> = None;
		let mut redirects = 0u32;

		loop {
			state = match state {
				SessionState::Starting => SessionState::Connecting,

				// Try `redirect_socket_path` when the server most recently
				// asked us to use it, else the stable primary
				// `socket_path` (spec.md §3/§4.6: "try open at socket_path
				// or redirect_socket_path"). `socket_path` itself is never
				// overwritten by a redirect — it stays the rendezvous point
				// every independent client invocation resolves on its own.
				SessionState::Connecting => {
					let target = opts
						.redirect_socket_path
						.as_deref()
						.unwrap_or(&opts.socket_path);
					if let Some(h) = UnixClientHandle::open(target) {
						handle = Some(h);
						SessionState::Validating
					} else {
						// Failure on a prior redirect target: the server
						// that told us to redirect is unreachable there, so
						// purge the *original* primary (not the redirect
						// target) to make sure we don't reconnect to an
						// outdated server that would just redirect us again
						// (spec.md §4.6 Connecting, "failure on a prior
						// redirect target").
						if opts.redirect_socket_path.is_some() {
							if let Err(err) = std::fs::remove_file(&opts.socket_path) {
								debug!(path = ?opts.socket_path, %err, "no stale primary to purge");
							}
						}
						SessionState::Spawning
					}
				}

				// Always forks against the fixed `init_socket_path`
				// (`<socket_path>.<pid>`, computed once and never
				// recomputed from a redirect) and, on success, rebinds the
				// stable primary — never the redirect target — so later,
				// independent client invocations can still find this
				// server at the canonical rendezvous path.
				SessionState::Spawning => {
					let child = supervisor::spawn(&self.config, &tool_path, &opts)?;
					match connect::connect_spawned(
						&SocketPaths {
							socket_path: opts.socket_path.clone(),
							init_socket_path: opts.init_socket_path.clone(),
						},
						child,
						self.config.timeout_secs,
					)? {
						connect::SpawnOutcome::Connected(probe) => {
							drop(probe);
							info!(pid = child.as_raw(), "command server is ready");
							// Open against the now-promoted primary directly
							// rather than looping back through `Connecting`,
							// which would otherwise retry the stale
							// `redirect_socket_path` instead of the server
							// we just spawned.
							handle = Some(
								UnixClientHandle::open(&opts.socket_path)
									.ok_or(ClientError::OpenFailed)?,
							);
							SessionState::Validating
						}
						// Server-terminal (spec.md §7): the child exited or
						// was killed before it ever started listening. Its
						// code becomes this client's own exit code, not an
						// error diagnostic.
						connect::SpawnOutcome::ServerExited(code) => return Ok(code),
					}
				}

				SessionState::Validating => {
					let h = handle.as_mut().expect("handle set before Validating");
					h.set_environment(&current_env())?;

					match h.validate(&opts.sensitive_args)? {
						None => SessionState::Running,
						Some(batch) => match instructions::apply(&mut opts, &batch)? {
							Applied::Exit(code) => return Ok(code),
							Applied::Continue { need_reconnect } if need_reconnect => {
								handle = None;
								redirects += 1;
								if redirects > MAX_REDIRECTS {
									return Err(ClientError::TooManyRedirections.into());
								}
								SessionState::Connecting
							}
							Applied::Continue { .. } => SessionState::Running,
						},
					}
				}

				SessionState::Running => {
					let h = handle.as_mut().expect("handle set before Running");
					let guard = signal::forward_while_running(h.peer_pid(), h.peer_pgid())?;
					let code = h.run_command(command_argv);
					drop(guard);
					return code;
				}

				SessionState::TearingDown => unreachable!("no transition targets TearingDown yet"),
			};
		}
	}
}

/// Snapshot the live process environment to push to the server at
/// `Validating` time — read live rather than cached from start-up, since a
/// redirect/reconnect can happen after other code has adjusted variables
/// (spec.md §4.3's locale plumbing, for one).
fn current_env() -> Vec<(OsString, OsString)> {
	std::env::vars_os().collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn server_options_clone_is_independent() {
		let opts = ServerOptions {
			socket_path: PathBuf::from("/tmp/chg1000/server"),
			init_socket_path: PathBuf::from("/tmp/chg1000/server.1"),
			redirect_socket_path: None,
			sensitive_args: vec![OsString::from("--repo"), OsString::from("/x")],
		};
		let mut clone = opts.clone();
		clone.redirect_socket_path = Some(PathBuf::from("/tmp/chg1000/server.alt"));
		assert_eq!(opts.redirect_socket_path, None);
		assert_eq!(
			clone.redirect_socket_path,
			Some(PathBuf::from("/tmp/chg1000/server.alt"))
		);
	}
}
