//! C5: instruction interpreter (spec.md §4.5).
//!
//! Server-issued post-handshake directives, expressed as a tagged variant
//! with an exhaustive match (Design Notes §9) instead of the original's
//! string-prefix dispatch — unknown instructions are a fatal case by
//! construction (the `FromStr` impl below), not a default branch reached at
//! dispatch time.

use std::str::FromStr;

use miette::Result;

use crate::error::ClientError;

/// One directive from a [`validate`](crate::client::ClientHandle::validate)
/// response (spec.md §3 `InstructionBatch`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
	/// Best-effort removal of a stale path.
	Unlink(String),
	/// Reconnect at a different socket path.
	Redirect(String),
	/// Reconnect at the same paths (server wants a fresh session).
	Reconnect,
	/// Terminate the client immediately with this exit status.
	Exit(i32),
}

impl FromStr for Instruction {
	type Err = ClientError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Some(path) = s.strip_prefix("unlink ") {
			Ok(Self::Unlink(path.to_string()))
		} else if let Some(path) = s.strip_prefix("redirect ") {
			Ok(Self::Redirect(path.to_string()))
		} else if s == "reconnect" {
			Ok(Self::Reconnect)
		} else if let Some(code) = s.strip_prefix("exit ") {
			let n = code
				.trim()
				.parse::<i32>()
				.map_err(|_| ClientError::BadExitInstruction(s.to_string()))?;
			Ok(Self::Exit(n))
		} else {
			Err(ClientError::UnknownInstruction(s.to_string()))
		}
	}
}

/// Outcome of applying a batch: either the client should reconnect, or an
/// `exit <n>` directive that must short-circuit the session immediately.
pub enum Applied {
	Continue { need_reconnect: bool },
	Exit(i32),
}

/// Apply a batch in order against `opts`, per spec.md §4.5's contract.
/// Clears `redirect_socket_path` at entry. Returns as soon as an `Exit`
/// directive is seen, without processing the rest of the batch (mirrors the
/// original's immediate `exit()` call).
pub fn apply(opts: &mut crate::session::ServerOptions, batch: &[String]) -> Result<Applied> {
	opts.redirect_socket_path = None;
	let mut need_reconnect = false;

	for raw in batch {
		let instruction = raw.parse::<Instruction>()?;
		tracing::debug!(?instruction, "applying server instruction");
		match instruction {
			Instruction::Unlink(path) => {
				if let Err(err) = std::fs::remove_file(&path) {
					tracing::debug!(?path, %err, "best-effort unlink failed, ignoring");
				}
			}
			Instruction::Redirect(path) => {
				if path.len() >= crate::socket::PATH_MAX {
					return Err(ClientError::RedirectTooLong { len: path.len() }.into());
				}
				opts.redirect_socket_path = Some(path.into());
				need_reconnect = true;
			}
			Instruction::Reconnect => {
				need_reconnect = true;
			}
			Instruction::Exit(n) => {
				return Ok(Applied::Exit(n));
			}
		}
	}

	Ok(Applied::Continue { need_reconnect })
}
