//! The firewall rule program as data (spec.md §4.A), so idempotency can
//! be tested by diffing the generated command sequence against itself
//! without requiring root or a network namespace.

use crate::backend::Backend;
use crate::config::InterceptorConfig;

/// Peer mesh's firewall mark (Istio ambient's ztunnel uses this value
/// to tag already-meshed traffic) and its HBONE tunnel port. These are
/// fixed, not configurable — the Interceptor coexists with a specific
/// peer contract, it does not negotiate one.
pub const PEER_FIREWALL_MARK: u32 = 0x4d3;
pub const PEER_HBONE_PORT: u16 = 15008;
pub const PEER_HEALTH_PROBE_SRC: &str = "169.254.7.127";

pub const OUTBOUND_CHAIN: &str = "AUTHBRIDGE_OUTPUT";
pub const INBOUND_CHAIN: &str = "AUTHBRIDGE_INBOUND";
pub const MANGLE_CHAIN: &str = "AUTHBRIDGE_MANGLE";

/// One invocation of the detected firewall backend's CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOp {
    pub description: &'static str,
    pub args: Vec<String>,
    /// A non-zero exit is expected and swallowed for this op (e.g.
    /// "chain already exists"); anything else is fatal.
    pub tolerate_failure: bool,
    /// When set, run this check first; a zero exit means the rule this
    /// op would install is already present, so `args` is skipped. Used
    /// for the parent-chain jumps, where `-I` would otherwise duplicate
    /// the jump on every re-run.
    pub guard: Option<Vec<String>>,
}

fn op(description: &'static str, args: Vec<String>) -> RuleOp {
    RuleOp {
        description,
        args,
        tolerate_failure: false,
        guard: None,
    }
}

fn tolerant_op(description: &'static str, args: Vec<String>) -> RuleOp {
    RuleOp {
        description,
        args,
        tolerate_failure: true,
        guard: None,
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Builds the full, ordered rule program for one backend invocation
/// (`iptables` or `ip6tables`, legacy or nft-backed — `backend` only
/// picks the binary name, the argv shape is identical for both).
pub fn rule_program(config: &InterceptorConfig, backend: &Backend) -> Vec<RuleOp> {
    let bin = backend.binary();
    let mut ops = Vec::new();

    for chain in [OUTBOUND_CHAIN, INBOUND_CHAIN] {
        ops.push(tolerant_op(
            "create custom chain (idempotent: tolerate already-exists)",
            args(&[bin, "-t", "nat", "-N", chain]),
        ));
        ops.push(op(
            "flush custom chain before repopulating",
            args(&[bin, "-t", "nat", "-F", chain]),
        ));
    }
    ops.push(tolerant_op(
        "create mangle chain (idempotent: tolerate already-exists)",
        args(&[bin, "-t", "mangle", "-N", MANGLE_CHAIN]),
    ));
    ops.push(op(
        "flush mangle chain before repopulating",
        args(&[bin, "-t", "mangle", "-F", MANGLE_CHAIN]),
    ));

    // Jump from OUTPUT into our outbound chain at position 1, so we
    // evaluate before a peer mesh's own OUTPUT rules regardless of
    // install order (spec.md §4.A Coexistence contract).
    ops.push(check_then_insert_jump(
        bin,
        "nat",
        "OUTPUT",
        OUTBOUND_CHAIN,
        "install outbound jump at position 1",
    ));
    ops.push(check_then_insert_jump(
        bin,
        "nat",
        "PREROUTING",
        INBOUND_CHAIN,
        "install inbound jump at position 1",
    ));
    ops.push(check_then_insert_jump(
        bin,
        "mangle",
        "OUTPUT",
        MANGLE_CHAIN,
        "install mangle jump at position 1",
    ));

    // --- Outbound chain body ---
    // 3. Exempt the proxy's own outbound traffic so it falls through to
    //    the peer mesh's outbound chain for HBONE wrapping.
    ops.push(op(
        "exempt proxy uid from outbound redirection",
        args(&[
            bin,
            "-t",
            "nat",
            "-A",
            OUTBOUND_CHAIN,
            "-m",
            "owner",
            "--uid-owner",
            &config.proxy_uid.to_string(),
            "-j",
            "RETURN",
        ]),
    ));
    // 2. Ignore all other peer-marked traffic, preserving the peer
    //    mesh's outbound HBONE tunnels.
    ops.push(op(
        "return peer-marked traffic unmodified",
        args(&[
            bin,
            "-t",
            "nat",
            "-A",
            OUTBOUND_CHAIN,
            "-m",
            "mark",
            "--mark",
            &format!("{PEER_FIREWALL_MARK}"),
            "-j",
            "RETURN",
        ]),
    ));
    ops.push(op(
        "bypass loopback destinations",
        args(&[
            bin, "-t", "nat", "-A", OUTBOUND_CHAIN, "-d", "127.0.0.0/8", "-j", "RETURN",
        ]),
    ));
    for port in [config.outbound_port, config.inbound_port, 22] {
        ops.push(op(
            "bypass a listener port or ssh",
            args(&[
                bin,
                "-t",
                "nat",
                "-A",
                OUTBOUND_CHAIN,
                "-p",
                "tcp",
                "--dport",
                &port.to_string(),
                "-j",
                "RETURN",
            ]),
        ));
    }
    for port in &config.outbound_ports_exclude {
        ops.push(op(
            "bypass caller-excluded outbound port",
            args(&[
                bin,
                "-t",
                "nat",
                "-A",
                OUTBOUND_CHAIN,
                "-p",
                "tcp",
                "--dport",
                &port.to_string(),
                "-j",
                "RETURN",
            ]),
        ));
    }
    ops.push(op(
        "redirect remaining outbound tcp to the outbound listener",
        args(&[
            bin,
            "-t",
            "nat",
            "-A",
            OUTBOUND_CHAIN,
            "-p",
            "tcp",
            "-j",
            "REDIRECT",
            "--to-port",
            &config.outbound_port.to_string(),
        ]),
    ));

    // --- Inbound chain body ---
    // Kubelet health probes arrive from the peer mesh's well-known probe
    // source address, unauthenticated by design; redirecting them into
    // the inbound listener would make liveness checks depend on a token
    // kubelet doesn't have.
    ops.push(op(
        "bypass the peer mesh's health probe source",
        args(&[
            bin,
            "-t",
            "nat",
            "-A",
            INBOUND_CHAIN,
            "-s",
            PEER_HEALTH_PROBE_SRC,
            "-j",
            "RETURN",
        ]),
    ));
    // 1. Capture peer-delivered inbound: a locally-originated connection
    //    after the peer mesh's own decryption, identified by its mark and
    //    a non-proxy source uid, destined locally.
    ops.push(op(
        "capture peer-delivered inbound traffic",
        args(&[
            bin,
            "-t",
            "nat",
            "-A",
            INBOUND_CHAIN,
            "-m",
            "mark",
            "--mark",
            &format!("{PEER_FIREWALL_MARK}"),
            "-m",
            "owner",
            "!",
            "--uid-owner",
            &config.proxy_uid.to_string(),
            "-d",
            "127.0.0.1/32",
            "-j",
            "REDIRECT",
            "--to-port",
            &config.inbound_port.to_string(),
        ]),
    ));
    // 2. Ignore all other peer-marked traffic.
    ops.push(op(
        "return other peer-marked inbound traffic unmodified",
        args(&[
            bin,
            "-t",
            "nat",
            "-A",
            INBOUND_CHAIN,
            "-m",
            "mark",
            "--mark",
            &format!("{PEER_FIREWALL_MARK}"),
            "-j",
            "RETURN",
        ]),
    ));
    for port in [22, PEER_HBONE_PORT] {
        ops.push(op(
            "bypass ssh/hbone from inbound redirection",
            args(&[
                bin,
                "-t",
                "nat",
                "-A",
                INBOUND_CHAIN,
                "-p",
                "tcp",
                "--dport",
                &port.to_string(),
                "-j",
                "RETURN",
            ]),
        ));
    }
    for port in &config.inbound_ports_exclude {
        ops.push(op(
            "bypass caller-excluded inbound port",
            args(&[
                bin,
                "-t",
                "nat",
                "-A",
                INBOUND_CHAIN,
                "-p",
                "tcp",
                "--dport",
                &port.to_string(),
                "-j",
                "RETURN",
            ]),
        ));
    }
    ops.push(op(
        "redirect remaining inbound tcp to the inbound listener",
        args(&[
            bin,
            "-t",
            "nat",
            "-A",
            INBOUND_CHAIN,
            "-p",
            "tcp",
            "-j",
            "REDIRECT",
            "--to-port",
            &config.inbound_port.to_string(),
        ]),
    ));

    // --- Mangle chain body ---
    // 4. Prevent a self-delivery loop: mark proxy->local packets with
    //    the peer mark so the peer mesh's outbound chain treats them as
    //    already-meshed and does not redirect them again.
    ops.push(op(
        "mark proxy-to-local traffic to prevent a self-delivery loop",
        args(&[
            bin,
            "-t",
            "mangle",
            "-A",
            MANGLE_CHAIN,
            "-m",
            "owner",
            "--uid-owner",
            &config.proxy_uid.to_string(),
            "-d",
            "127.0.0.1/32",
            "-j",
            "MARK",
            "--set-mark",
            &format!("{PEER_FIREWALL_MARK}"),
        ]),
    ));

    ops
}

fn check_then_insert_jump(
    bin: &str,
    table: &str,
    parent_chain: &str,
    target_chain: &str,
    description: &'static str,
) -> RuleOp {
    RuleOp {
        description,
        args: args(&[
            bin, "-t", table, "-I", parent_chain, "1", "-j", target_chain,
        ]),
        tolerate_failure: false,
        guard: Some(args(&[bin, "-t", table, "-C", parent_chain, "-j", target_chain])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::config::InterceptorConfig;

    #[test]
    fn rule_program_is_identical_across_repeated_generation() {
        let config = InterceptorConfig::default();
        let backend = Backend::Legacy;
        let first = rule_program(&config, &backend);
        let second = rule_program(&config, &backend);
        assert_eq!(first, second, "generating the rule program twice must be idempotent");
    }

    #[test]
    fn outbound_chain_exempts_proxy_uid_before_redirect() {
        let config = InterceptorConfig::default();
        let ops = rule_program(&config, &Backend::Nft);
        let exempt_idx = ops
            .iter()
            .position(|op| op.description.contains("exempt proxy uid"))
            .expect("exempt rule present");
        let redirect_idx = ops
            .iter()
            .position(|op| op.description.contains("redirect remaining outbound"))
            .expect("redirect rule present");
        assert!(exempt_idx < redirect_idx);
    }

    #[test]
    fn custom_excluded_ports_are_present_in_outbound_chain() {
        let mut config = InterceptorConfig::default();
        config.outbound_ports_exclude = vec![5432];
        let ops = rule_program(&config, &Backend::Legacy);
        assert!(ops.iter().any(|op| op.args.contains(&"5432".to_string())));
    }
}
