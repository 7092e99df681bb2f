//! C2: sensitive-flag extractor (spec.md §4.2).
//!
//! Ported from `chg.c`'s `testsensitiveflag`/`setcmdserverargs`: a fixed,
//! small table of flags that change server identity, scanned once up to the
//! first literal `--`.

use std::ffi::OsString;

/// `(name, narg)`: the flag's exact string and how many following arguments
/// it consumes when given as `--flag value` (spec.md §4.2 table).
const SENSITIVE_FLAGS: &[(&str, usize)] = &[
	("--config", 1),
	("--cwd", 1),
	("--repo", 1),
	("--repository", 1),
	("--traceback", 0),
	("-R", 1),
];

/// How many argv slots, starting at `arg`, belong to a sensitive flag. `0`
/// means `arg` isn't one. Mirrors `testsensitiveflag`'s three checks, tried
/// in order for each table entry: bare `--flag` (takes `narg` following
/// args), `--flag=value`/`-f=value` glued with `=` (only when `narg > 0`,
/// long or short alike), and — as a catch-all for any other glued shape
/// (`-fvalue` with no `=`) — a short flag always takes just itself.
fn sensitive_span(arg: &str) -> usize {
	for &(name, narg) in SENSITIVE_FLAGS {
		let Some(rest) = arg.strip_prefix(name) else {
			continue;
		};
		if rest.is_empty() {
			return narg + 1;
		}
		if rest.starts_with('=') && narg > 0 {
			return 1;
		}
		let is_short = name.len() < 2 || name.as_bytes()[1] != b'-';
		if is_short {
			return 1;
		}
	}
	0
}

/// Scan `argv` (the arguments after the program name) for sensitive flags,
/// stopping at the first literal `--`. Truncated tails are silently
/// ignored, exactly like the original's `i + n > argc` guard.
#[must_use]
pub fn extract(argv: &[OsString]) -> Vec<OsString> {
	let mut out = Vec::new();
	let mut i = 0;
	while i < argv.len() {
		let Some(arg) = argv[i].to_str() else {
			i += 1;
			continue;
		};
		if arg == "--" {
			break;
		}
		let span = sensitive_span(arg);
		if span == 0 || i + span > argv.len() {
			i += 1;
			continue;
		}
		out.extend_from_slice(&argv[i..i + span]);
		i += span;
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn v(items: &[&str]) -> Vec<OsString> {
		items.iter().map(OsString::from).collect()
	}

	#[test]
	fn config_flag_consumes_value() {
		let argv = v(&["--config", "ui.foo=1", "status"]);
		assert_eq!(extract(&argv), v(&["--config", "ui.foo=1"]));
	}

	#[test]
	fn config_equals_form_consumes_only_itself() {
		let argv = v(&["--config=ui.foo=1", "status"]);
		assert_eq!(extract(&argv), v(&["--config=ui.foo=1"]));
	}

	#[test]
	fn traceback_takes_no_argument() {
		let argv = v(&["--traceback", "status"]);
		assert_eq!(extract(&argv), v(&["--traceback"]));
	}

	#[test]
	fn short_flag_never_consumes_attached_value() {
		let argv = v(&["-R", "/repo", "log"]);
		assert_eq!(extract(&argv), v(&["-R", "/repo"]));
	}

	#[test]
	fn short_flag_glued_without_equals_consumes_only_itself() {
		let argv = v(&["-R/repo", "log"]);
		assert_eq!(extract(&argv), v(&["-R/repo"]));
	}

	#[test]
	fn short_flag_equals_form_is_sensitive() {
		let argv = v(&["-R=repo", "log"]);
		assert_eq!(extract(&argv), v(&["-R=repo"]));
	}

	#[test]
	fn stops_at_double_dash() {
		let argv = v(&["status", "--", "--config", "x=1"]);
		assert!(extract(&argv).is_empty());
	}

	#[test]
	fn truncated_tail_is_ignored() {
		let argv = v(&["log", "--repo"]);
		assert!(extract(&argv).is_empty());
	}

	#[test]
	fn unrelated_flags_are_dropped() {
		let argv = v(&["--verbose", "--config", "a=b", "-q"]);
		assert_eq!(extract(&argv), v(&["--config", "a=b"]));
	}

	/// spec.md §8 property 1: output is a contiguous subsequence preserving
	/// order and containing no element beyond a literal `--`.
	#[test]
	fn output_is_subsequence_preserving_order() {
		let argv = v(&["--cwd", "/a", "--traceback", "--repo", "/b", "cmd"]);
		let got = extract(&argv);
		assert_eq!(got, v(&["--cwd", "/a", "--traceback", "--repo", "/b"]));
		let mut cursor = 0;
		for item in &got {
			let pos = argv[cursor..].iter().position(|a| a == item).unwrap();
			cursor += pos + 1;
		}
	}

	/// spec.md §8: idempotence across disjoint tails with no `--`.
	#[test]
	fn idempotent_over_disjoint_tails() {
		let head = v(&["--config", "a=1"]);
		let tail = v(&["--repo", "/x", "status"]);
		let mut whole = head.clone();
		whole.extend(tail.clone());

		let mut combined = extract(&head);
		combined.extend(extract(&tail));
		assert_eq!(extract(&whole), combined);
	}
}
