use std::env;
use std::process::Command;

use thiserror::Error;

use crate::rules::RuleOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Legacy,
    Nft,
}

impl Backend {
    pub fn binary(&self) -> &'static str {
        match self {
            Backend::Legacy => "iptables-legacy",
            Backend::Nft => "iptables",
        }
    }

    /// Prefers the legacy backend when present in `$PATH`, per spec.md
    /// §4.A's detection heuristic; `AUTHBRIDGE_IPTABLES_MODE` overrides
    /// ("legacy" | "nft").
    pub fn detect() -> Self {
        match env::var("AUTHBRIDGE_IPTABLES_MODE").ok().as_deref() {
            Some("legacy") => return Backend::Legacy,
            Some("nft") => return Backend::Nft,
            _ => {}
        }

        if command_exists("iptables-legacy") {
            Backend::Legacy
        } else {
            Backend::Nft
        }
    }
}

fn command_exists(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[derive(Debug, Error)]
#[error("rule installation failed: {description} (exit status: {status})")]
pub struct RuleError {
    pub description: String,
    pub status: String,
}

/// Runs the rule program in order. In dry-run mode, every op is logged
/// and none are executed. `tolerate_failure` ops swallow a non-zero
/// exit; anything else aborts on the first failure (spec.md §4.A
/// Failure: "any individual rule failure is fatal").
pub fn apply(ops: &[RuleOp], dry_run: bool) -> Result<(), RuleError> {
    for rule_op in ops {
        if dry_run {
            tracing::info!(description = rule_op.description, args = ?rule_op.args, "dry-run: would execute");
            continue;
        }

        if let Some(guard) = &rule_op.guard {
            let (program, argv) = guard
                .split_first()
                .expect("guards always carry a program name as the first argument");
            let already_present = Command::new(program)
                .args(argv)
                .output()
                .map(|output| output.status.success())
                .unwrap_or(false);
            if already_present {
                tracing::debug!(description = rule_op.description, "already present; skipping");
                continue;
            }
        }

        let (program, argv) = rule_op
            .args
            .split_first()
            .expect("rule ops always carry a program name as the first argument");

        let result = Command::new(program).args(argv).output();
        match result {
            Ok(output) if output.status.success() => {
                tracing::info!(description = rule_op.description, "rule applied");
            }
            Ok(output) if rule_op.tolerate_failure => {
                tracing::debug!(
                    description = rule_op.description,
                    status = ?output.status,
                    "tolerated non-zero exit"
                );
            }
            Ok(output) => {
                return Err(RuleError {
                    description: rule_op.description.to_string(),
                    status: format!("{:?}", output.status),
                });
            }
            Err(err) => {
                return Err(RuleError {
                    description: rule_op.description.to_string(),
                    status: err.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_takes_precedence_over_detection() {
        std::env::set_var("AUTHBRIDGE_IPTABLES_MODE", "nft");
        assert_eq!(Backend::detect(), Backend::Nft);
        std::env::set_var("AUTHBRIDGE_IPTABLES_MODE", "legacy");
        assert_eq!(Backend::detect(), Backend::Legacy);
        std::env::remove_var("AUTHBRIDGE_IPTABLES_MODE");
    }

    #[test]
    fn dry_run_never_invokes_a_process() {
        let ops = vec![RuleOp {
            description: "would fail if actually run",
            args: vec!["definitely-not-a-real-binary".to_string(), "-v".to_string()],
            tolerate_failure: false,
            guard: None,
        }];
        assert!(apply(&ops, true).is_ok());
    }
}
