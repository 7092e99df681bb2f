//! Signal forwarding to the command server while a command is running
//! (spec.md §4.6 `Running` state). Installed only for the lifetime of one
//! `run_command` call and always restored afterwards, so a signal arriving
//! before the server is attached or after it has answered uses this
//! process's ordinary default disposition instead.

use std::sync::atomic::{AtomicI32, Ordering};

use miette::{IntoDiagnostic, Result};
use nix::sys::signal::{self, SigHandler, Signal as NixSignal};
use nix::unistd::Pid;

/// Forwarded signals: everything that can plausibly interrupt a foreground
/// command. `SIGCHLD` is deliberately excluded — it describes this
/// process's own children, not a signal meant for the peer.
const FORWARDED: &[NixSignal] = &[
	NixSignal::SIGHUP,
	NixSignal::SIGINT,
	NixSignal::SIGQUIT,
	NixSignal::SIGTERM,
	NixSignal::SIGUSR1,
	NixSignal::SIGUSR2,
	NixSignal::SIGWINCH,
];

static TARGET_PID: AtomicI32 = AtomicI32::new(0);

/// Installs forwarding handlers for [`FORWARDED`], sending every caught
/// signal on to `peer_pgid` (falling back to `peer_pid` if the two are
/// equal, which is the common case for a directly-spawned child). Returns a
/// guard that restores the previous dispositions when dropped.
pub fn forward_while_running(peer_pid: Pid, peer_pgid: Pid) -> Result<ForwardGuard> {
	let target = if peer_pgid.as_raw() > 0 {
		peer_pgid
	} else {
		peer_pid
	};
	TARGET_PID.store(target.as_raw(), Ordering::SeqCst);

	let mut restored = Vec::with_capacity(FORWARDED.len());
	for &sig in FORWARDED {
		// SAFETY: handler only calls async-signal-safe `kill(2)` via nix.
		let previous = unsafe { signal::signal(sig, SigHandler::Handler(relay)) }.into_diagnostic()?;
		restored.push((sig, previous));
	}

	Ok(ForwardGuard { restored })
}

extern "C" fn relay(raw: libc::c_int) {
	let pid = TARGET_PID.load(Ordering::SeqCst);
	if pid == 0 {
		return;
	}
	if let Ok(sig) = NixSignal::try_from(raw) {
		let _ = signal::kill(Pid::from_raw(pid), sig);
	}
}

/// Restores the signal dispositions captured by
/// [`forward_while_running`] when dropped, so this process behaves normally
/// again once the foreground command has finished.
pub struct ForwardGuard {
	restored: Vec<(NixSignal, SigHandler)>,
}

impl Drop for ForwardGuard {
	fn drop(&mut self) {
		for &(sig, handler) in &self.restored {
			// SAFETY: restoring a disposition this same process captured
			// moments earlier; no new async-signal-unsafe state is touched.
			let _ = unsafe { signal::signal(sig, handler) };
		}
		TARGET_PID.store(0, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

	use super::*;

	/// spec.md §4.6 `Running`/§5 "Signals": a signal caught by this process
	/// while a guard is live is relayed to the peer, not handled locally.
	#[test]
	fn relay_forwards_signal_to_peer_process() {
		let mut child = std::process::Command::new("sleep")
			.arg("5")
			.spawn()
			.unwrap();
		let pid = Pid::from_raw(child.id() as i32);

		let guard = forward_while_running(pid, pid).unwrap();
		signal::kill(Pid::this(), NixSignal::SIGUSR1).unwrap();

		// Default disposition of SIGUSR1 is termination; give the child a
		// moment to receive the relayed signal and die from it.
		std::thread::sleep(Duration::from_millis(200));
		match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::Signaled(_, sig, _)) => assert_eq!(sig, NixSignal::SIGUSR1),
			other => panic!("expected child to be killed by SIGUSR1, got {other:?}"),
		}

		drop(guard);
	}

	/// The guard must put every disposition it touched back exactly as it
	/// found it, not just to some default.
	#[test]
	fn guard_restores_previous_disposition() {
		// SAFETY: test-only; establishes a known, non-terminating baseline
		// disposition before installing and then tearing down the guard.
		unsafe {
			signal::signal(NixSignal::SIGUSR1, SigHandler::SigIgn).unwrap();
		}

		let mut child = std::process::Command::new("sleep")
			.arg("5")
			.spawn()
			.unwrap();
		let pid = Pid::from_raw(child.id() as i32);

		let guard = forward_while_running(pid, pid).unwrap();
		drop(guard);

		// SAFETY: same as above; only reads back what was just restored by
		// swapping in an identical disposition and inspecting the old one.
		let restored = unsafe { signal::signal(NixSignal::SIGUSR1, SigHandler::SigIgn) }.unwrap();
		assert_eq!(restored, SigHandler::SigIgn);

		let _ = signal::kill(pid, NixSignal::SIGKILL);
		let _ = child.wait();
	}
}
