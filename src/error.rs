//! The error taxonomy from the design (environment-fatal, spawn-fatal,
//! session-fatal). Best-effort failures (stale unlinks, descriptor-close
//! errors) are logged in place and never become one of these.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
	#[error("path too long: {path} (limit {limit} bytes)")]
	#[diagnostic(code(chg::path_too_long))]
	PathTooLong { path: String, limit: usize },

	#[error("insecure socket directory {path:?}: {reason}")]
	#[diagnostic(code(chg::insecure_sockdir))]
	InsecureSockDir { path: PathBuf, reason: &'static str },

	#[error("cannot create socket directory {path:?}")]
	#[diagnostic(code(chg::sockdir_create))]
	SockDirCreate {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("chg started by chg detected.\nPlease make sure the backing tool is not a symlink or wrapper to this client. Alternatively, set the override environment variable to the path of the real tool.")]
	#[diagnostic(code(chg::self_invocation))]
	SelfInvocation,

	#[error("failed to fork command server process")]
	#[diagnostic(code(chg::fork_failed))]
	ForkFailed {
		#[source]
		source: std::io::Error,
	},

	#[error("failed to exec command server")]
	#[diagnostic(code(chg::exec_failed))]
	ExecFailed {
		#[source]
		source: std::io::Error,
	},

	#[error("failed to exec original tool")]
	#[diagnostic(code(chg::exec_original_failed))]
	ExecOriginalFailed {
		#[source]
		source: std::io::Error,
	},

	#[error("could not connect to command server (exited with status 0)")]
	#[diagnostic(code(chg::server_quit_clean))]
	ServerQuitClean,

	#[error("error while waiting for command server")]
	#[diagnostic(code(chg::wait_failed))]
	WaitFailed {
		#[source]
		source: std::io::Error,
	},

	#[error("timed out waiting for command server at {path:?}")]
	#[diagnostic(code(chg::connect_timeout))]
	ConnectTimeout { path: PathBuf },

	#[error("cannot rename {from:?} to {to:?}")]
	#[diagnostic(code(chg::rename_failed))]
	RenameFailed {
		from: PathBuf,
		to: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("unknown instruction: {0}")]
	#[diagnostic(code(chg::unknown_instruction))]
	UnknownInstruction(String),

	#[error("cannot read the exit code in instruction: {0}")]
	#[diagnostic(code(chg::bad_exit_instruction))]
	BadExitInstruction(String),

	#[error("redirect path is too long ({len} bytes)")]
	#[diagnostic(code(chg::redirect_too_long))]
	RedirectTooLong { len: usize },

	#[error(
		"too many redirections.\nPlease make sure the backing tool is not a wrapper which changes sensitive environment variables before executing the real command. If you have to use a wrapper, wrap this client instead."
	)]
	#[diagnostic(code(chg::too_many_redirections))]
	TooManyRedirections,

	#[error("cannot open the command server client handle")]
	#[diagnostic(code(chg::open_failed))]
	OpenFailed,

	#[error("failed to set environment variable {name}")]
	#[diagnostic(code(chg::setenv_failed))]
	SetEnvFailed { name: String },

	#[error(transparent)]
	#[diagnostic(code(chg::io))]
	Io(#[from] std::io::Error),
}
