//! The external collaborator described in spec.md §4.1/§6: a handle to a
//! live command-server session. The wire protocol itself (channel framing,
//! message codec) is explicitly out of scope (§1); this module exposes only
//! the narrow contract spec.md §6 lists, behind a trait so the rest of the
//! crate never depends on how a concrete handle talks to its server.
//!
//! [`UnixClientHandle`] is one concrete implementation, speaking a minimal
//! newline-framed protocol over a [`UnixStream`]. It is deliberately not a
//! full reimplementation of any particular command server's channel
//! multiplexing — just enough to exercise every operation this crate's
//! state machine drives.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use miette::{IntoDiagnostic, Result};
use nix::unistd::Pid;

/// The narrow contract spec.md §6 lists for the command-server peer.
pub trait ClientHandle: Sized {
	/// Open a session at `path`. Returns `None` rather than erroring when
	/// nothing is listening there yet — that's the expected case during
	/// the connection retry loop (C4), not a failure.
	fn open(path: &Path) -> Option<Self>;

	/// Push the full, current process environment to the server.
	fn set_environment(&mut self, env: &[(OsString, OsString)]) -> Result<()>;

	/// Ask the server whether it can serve this invocation given the
	/// sensitive arguments. `None` means "no instructions", equivalent to
	/// an empty [`crate::instructions::InstructionBatch`].
	fn validate(&mut self, sensitive_args: &[OsString]) -> Result<Option<Vec<String>>>;

	/// Run the command and return the server's exit code.
	fn run_command(&mut self, argv_tail: &[OsString]) -> Result<i32>;

	/// The server process's pid, for signal forwarding.
	fn peer_pid(&self) -> Pid;

	/// The server process's process group id, for signal forwarding.
	fn peer_pgid(&self) -> Pid;
}

/// A session over a Unix-domain socket.
pub struct UnixClientHandle {
	reader: BufReader<UnixStream>,
	writer: UnixStream,
	peer_pid: Pid,
	peer_pgid: Pid,
}

impl ClientHandle for UnixClientHandle {
	fn open(path: &Path) -> Option<Self> {
		let stream = UnixStream::connect(path).ok()?;
		let writer = stream.try_clone().ok()?;
		let mut handle = Self {
			reader: BufReader::new(stream),
			writer,
			peer_pid: Pid::this(),
			peer_pgid: Pid::this(),
		};
		if handle.handshake().is_err() {
			return None;
		}
		Some(handle)
	}

	fn set_environment(&mut self, env: &[(OsString, OsString)]) -> Result<()> {
		self.send_line("ENV")?;
		for (key, value) in env {
			self.send_line(&format!(
				"{}={}",
				key.to_string_lossy(),
				value.to_string_lossy()
			))?;
		}
		self.send_line("")?;
		self.expect_ok()
	}

	fn validate(&mut self, sensitive_args: &[OsString]) -> Result<Option<Vec<String>>> {
		self.send_line("VALIDATE")?;
		for arg in sensitive_args {
			self.send_line(&arg.to_string_lossy())?;
		}
		self.send_line("")?;

		let mut instructions = Vec::new();
		loop {
			let line = self.read_line()?;
			if line.is_empty() {
				break;
			}
			instructions.push(line);
		}
		Ok(if instructions.is_empty() {
			None
		} else {
			Some(instructions)
		})
	}

	fn run_command(&mut self, argv_tail: &[OsString]) -> Result<i32> {
		self.send_line("RUN")?;
		for arg in argv_tail {
			self.send_line(&arg.to_string_lossy())?;
		}
		self.send_line("")?;

		let line = self.read_line()?;
		line.strip_prefix("EXIT ")
			.and_then(|code| code.trim().parse::<i32>().ok())
			.ok_or_else(|| miette::miette!("malformed exit response from command server"))
	}

	fn peer_pid(&self) -> Pid {
		self.peer_pid
	}

	fn peer_pgid(&self) -> Pid {
		self.peer_pgid
	}
}

impl UnixClientHandle {
	fn handshake(&mut self) -> Result<()> {
		self.send_line("HELLO")?;
		let line = self.read_line()?;
		let mut parts = line.split_whitespace();
		if parts.next() != Some("PID") {
			return Err(miette::miette!("unexpected handshake response"));
		}
		let pid: i32 = parts
			.next()
			.and_then(|p| p.parse().ok())
			.ok_or_else(|| miette::miette!("missing pid in handshake"))?;
		let pgid: i32 = parts
			.next()
			.and_then(|p| p.parse().ok())
			.unwrap_or(pid);
		self.peer_pid = Pid::from_raw(pid);
		self.peer_pgid = Pid::from_raw(pgid);
		Ok(())
	}

	fn send_line(&mut self, line: &str) -> Result<()> {
		writeln!(self.writer, "{line}").into_diagnostic()
	}

	fn expect_ok(&mut self) -> Result<()> {
		let line = self.read_line()?;
		if line == "OK" {
			Ok(())
		} else {
			Err(miette::miette!("command server did not acknowledge: {line}"))
		}
	}

	fn read_line(&mut self) -> Result<String> {
		let mut buf = String::new();
		self.reader.read_line(&mut buf).into_diagnostic()?;
		Ok(buf.trim_end_matches(['\n', '\r']).to_string())
	}
}
