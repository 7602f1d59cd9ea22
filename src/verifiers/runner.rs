//! Sandbox-runner record verification (`RN*` rules).
//!
//! A runner record documents one sandboxed command execution: platform,
//! sandbox configuration, resource limits, command policy, and outcome.
//! The core projection excludes `timing` and `ephemeral`, so two runs with
//! identical configuration and outcome hash identically even when their
//! timestamps and host ids differ.

use crate::core::canonical::canonical_round_trip_ok;
use crate::core::paths::{first_overlap, is_sorted, is_sorted_strict, unsafe_path_reason};
use crate::core::report::{
    Finding, Rule, SCHEMA_RULE, Verdict, json_type_name, run_checklist, top_level_gate,
};
use crate::core::shape::{
    array_field, bool_field, get_arr, get_i64, get_obj, get_str, get_u64, i64_field, obj_field,
    object_elements, opt_obj_field, opt_str_field, opt_u64_field, str_field, string_array_field,
    string_vec, u64_field,
};
use crate::core::time::parse_utc_millis;
use crate::verifiers::{project_without, seal};
use regex::Regex;
use serde_json::{Map, Value};

/// Environment variable prefixes a sandbox must never forward.
pub const FORBIDDEN_ENV_PREFIXES: &[&str] = &[
    "ANTHROPIC_",
    "AWS_",
    "GIT_",
    "NPM_",
    "OPENAI_",
    "SSH_",
];

pub const SUPPORTED_OS: &[&str] = &["linux", "darwin", "win32"];
pub const SUPPORTED_ARCH: &[&str] = &["x64", "arm64", "ia32"];
pub const SANDBOX_BACKENDS: &[&str] = &["process", "container", "vm", "none"];
pub const ISOLATION_LEVELS: &[&str] = &["strict", "standard", "none"];

pub const TIMEOUT_MS_RANGE: (u64, u64) = (1_000, 600_000);
pub const MAX_OUTPUT_FILES_RANGE: (u64, u64) = (1, 10_000);
pub const MAX_TOTAL_OUTPUT_BYTES_RANGE: (u64, u64) = (1_024, 1 << 30);

/// Fields excluded from the RunnerCore projection.
const EPHEMERAL_KEYS: &[&str] = &["timing", "ephemeral"];

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "schema_version",
    "runner_id",
    "platform",
    "sandbox",
    "limits",
    "commands",
    "write_roots",
    "context",
    "exit",
    "timing",
];

#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Disable the RN9 timing consistency group.
    pub skip_timing_validation: bool,
    /// Disable the RN4 node_version prefix check.
    pub skip_node_version_check: bool,
}

type Doc = Map<String, Value>;

const RULES: &[Rule<Doc, RunnerOptions>] = &[
    (SCHEMA_RULE, check_shape),
    ("RN1", check_schema_version),
    ("RN2", check_runner_id),
    ("RN3", check_platform),
    ("RN4", check_node_version),
    ("RN5", check_sandbox),
    ("RN6", check_limits),
    ("RN7", check_commands),
    ("RN8", check_context),
    ("RN9", check_timing),
    ("RN10", check_exit),
    ("RN11", check_write_roots),
    ("RN12", check_warnings),
    ("RN13", check_round_trip),
];

/// RunnerCore: everything except `timing` and `ephemeral`.
pub fn to_core(doc: &Doc) -> Value {
    project_without(doc, EPHEMERAL_KEYS)
}

/// Verify a sandbox-runner record.
pub fn verify(input: &Value, opts: &RunnerOptions) -> Verdict {
    let doc = match top_level_gate(input, REQUIRED_TOP_LEVEL) {
        Ok(doc) => doc,
        Err(violations) => return Verdict::invalid(violations),
    };
    let violations = run_checklist(doc, opts, RULES);
    seal(to_core(doc), violations, "RN13")
}

fn check_shape(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();

    str_field(doc, "schema_version", "", &mut out);
    str_field(doc, "runner_id", "", &mut out);

    if let Some(platform) = obj_field(doc, "platform", "", &mut out) {
        str_field(platform, "os", "platform", &mut out);
        str_field(platform, "arch", "platform", &mut out);
        str_field(platform, "node_version", "platform", &mut out);
        str_field(platform, "npm_version", "platform", &mut out);
    }

    if let Some(sandbox) = obj_field(doc, "sandbox", "", &mut out) {
        str_field(sandbox, "backend", "sandbox", &mut out);
        str_field(sandbox, "isolation_level", "sandbox", &mut out);
        bool_field(sandbox, "network_blocked", "sandbox", &mut out);
        bool_field(sandbox, "filesystem_readonly", "sandbox", &mut out);
    }

    if let Some(limits) = obj_field(doc, "limits", "", &mut out) {
        u64_field(limits, "timeout_ms", "limits", &mut out);
        u64_field(limits, "max_output_files", "limits", &mut out);
        u64_field(limits, "max_total_output_bytes", "limits", &mut out);
        opt_u64_field(limits, "max_memory_bytes", "limits", &mut out);
        opt_u64_field(limits, "max_cpu_seconds", "limits", &mut out);
    }

    if let Some(commands) = obj_field(doc, "commands", "", &mut out) {
        string_array_field(commands, "allowlist", "commands", &mut out);
        string_array_field(commands, "blocklist", "commands", &mut out);
        str_field(commands, "shell", "commands", &mut out);
    }

    string_array_field(doc, "write_roots", "", &mut out);

    if let Some(context) = obj_field(doc, "context", "", &mut out) {
        str_field(context, "working_dir", "context", &mut out);
        string_array_field(context, "env_allowlist", "context", &mut out);
        str_field(context, "locale", "context", &mut out);
        str_field(context, "timezone", "context", &mut out);
    }

    if let Some(exit) = obj_field(doc, "exit", "", &mut out) {
        i64_field(exit, "code", "exit", &mut out);
        opt_str_field(exit, "signal", "exit", &mut out);
        bool_field(exit, "oom_killed", "exit", &mut out);
        bool_field(exit, "timeout_killed", "exit", &mut out);
    }

    if let Some(timing) = obj_field(doc, "timing", "", &mut out) {
        str_field(timing, "started_at", "timing", &mut out);
        str_field(timing, "completed_at", "timing", &mut out);
        u64_field(timing, "duration_ms", "timing", &mut out);
        if timing.contains_key("phases") {
            if let Some(phases) = array_field(timing, "phases", "timing", &mut out) {
                for (i, phase) in phases.iter().enumerate() {
                    let at = format!("timing.phases[{}]", i);
                    match phase.as_object() {
                        Some(phase) => {
                            str_field(phase, "name", &at, &mut out);
                            str_field(phase, "started_at", &at, &mut out);
                        }
                        None => out.push((
                            Some(at),
                            format!("expected object, found {}", json_type_name(phase)),
                        )),
                    }
                }
            }
        }
    }

    if doc.contains_key("warnings") {
        string_array_field(doc, "warnings", "", &mut out);
    }
    if doc.contains_key("ephemeral") {
        opt_obj_field(doc, "ephemeral", "", &mut out);
    }

    out
}

fn check_schema_version(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    match get_str(doc, "schema_version") {
        Some("1.0.0") | None => Vec::new(),
        Some(other) => vec![(
            Some("schema_version".to_string()),
            format!("unsupported schema_version `{}`, expected `1.0.0`", other),
        )],
    }
}

fn check_runner_id(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let Some(id) = get_str(doc, "runner_id") else {
        return Vec::new();
    };
    let re = Regex::new(r"^runner_[0-9]{8}_[0-9]{6}_[A-Za-z0-9]+$")
        .expect("runner id pattern is valid");
    if re.is_match(id) {
        Vec::new()
    } else {
        vec![(
            Some("runner_id".to_string()),
            format!(
                "runner_id `{}` does not match runner_{{8digits}}_{{6digits}}_{{alnum}}",
                id
            ),
        )]
    }
}

fn check_platform(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(platform) = get_obj(doc, "platform") else {
        return out;
    };
    if let Some(os) = get_str(platform, "os") {
        if !SUPPORTED_OS.contains(&os) {
            out.push((
                Some("platform.os".to_string()),
                format!("unknown os `{}`, expected one of {:?}", os, SUPPORTED_OS),
            ));
        }
    }
    if let Some(arch) = get_str(platform, "arch") {
        if !SUPPORTED_ARCH.contains(&arch) {
            out.push((
                Some("platform.arch".to_string()),
                format!("unknown arch `{}`, expected one of {:?}", arch, SUPPORTED_ARCH),
            ));
        }
    }
    out
}

fn check_node_version(doc: &Doc, opts: &RunnerOptions) -> Vec<Finding> {
    if opts.skip_node_version_check {
        return Vec::new();
    }
    let Some(platform) = get_obj(doc, "platform") else {
        return Vec::new();
    };
    match get_str(platform, "node_version") {
        Some(v) if !v.starts_with('v') => vec![(
            Some("platform.node_version".to_string()),
            format!("node_version `{}` must start with `v`", v),
        )],
        _ => Vec::new(),
    }
}

fn check_sandbox(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(sandbox) = get_obj(doc, "sandbox") else {
        return out;
    };
    let backend = get_str(sandbox, "backend");
    let isolation = get_str(sandbox, "isolation_level");
    if let Some(backend) = backend {
        if !SANDBOX_BACKENDS.contains(&backend) {
            out.push((
                Some("sandbox.backend".to_string()),
                format!(
                    "unknown backend `{}`, expected one of {:?}",
                    backend, SANDBOX_BACKENDS
                ),
            ));
        }
    }
    if let Some(isolation) = isolation {
        if !ISOLATION_LEVELS.contains(&isolation) {
            out.push((
                Some("sandbox.isolation_level".to_string()),
                format!(
                    "unknown isolation_level `{}`, expected one of {:?}",
                    isolation, ISOLATION_LEVELS
                ),
            ));
        }
    }
    if isolation == Some("none") && backend.is_some() && backend != Some("none") {
        out.push((
            Some("sandbox.isolation_level".to_string()),
            format!(
                "isolation_level `none` requires backend `none`, found `{}`",
                backend.unwrap_or_default()
            ),
        ));
    }
    out
}

fn range_finding(path: &str, value: u64, (lo, hi): (u64, u64)) -> Option<Finding> {
    if (lo..=hi).contains(&value) {
        None
    } else {
        Some((
            Some(path.to_string()),
            format!("{} is out of range [{}, {}]", value, lo, hi),
        ))
    }
}

fn check_limits(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(limits) = get_obj(doc, "limits") else {
        return out;
    };
    if let Some(v) = get_u64(limits, "timeout_ms") {
        out.extend(range_finding("limits.timeout_ms", v, TIMEOUT_MS_RANGE));
    }
    if let Some(v) = get_u64(limits, "max_output_files") {
        out.extend(range_finding(
            "limits.max_output_files",
            v,
            MAX_OUTPUT_FILES_RANGE,
        ));
    }
    if let Some(v) = get_u64(limits, "max_total_output_bytes") {
        out.extend(range_finding(
            "limits.max_total_output_bytes",
            v,
            MAX_TOTAL_OUTPUT_BYTES_RANGE,
        ));
    }
    for key in ["max_memory_bytes", "max_cpu_seconds"] {
        if limits.contains_key(key) {
            if let Some(v) = get_u64(limits, key) {
                if v == 0 {
                    out.push((
                        Some(format!("limits.{}", key)),
                        format!("{} must be positive when present", key),
                    ));
                }
            }
        }
    }
    out
}

fn check_commands(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(commands) = get_obj(doc, "commands") else {
        return out;
    };
    let allowlist = string_vec(commands, "allowlist");
    let blocklist = string_vec(commands, "blocklist");
    for (key, list) in [("allowlist", &allowlist), ("blocklist", &blocklist)] {
        if let Some(list) = list {
            if !is_sorted(list) {
                out.push((
                    Some(format!("commands.{}", key)),
                    format!("{} is not sorted", key),
                ));
            }
        }
    }
    if let (Some(allow), Some(block)) = (&allowlist, &blocklist) {
        let allow: Vec<String> = allow.iter().map(|s| s.to_string()).collect();
        let block: Vec<String> = block.iter().map(|s| s.to_string()).collect();
        // Disjointness is checked on sorted copies so an unsorted input
        // still gets an accurate overlap report.
        let (mut a, mut b) = (allow, block);
        a.sort();
        b.sort();
        if let Some(shared) = first_overlap(&a, &b) {
            out.push((
                Some("commands".to_string()),
                format!("`{}` appears in both allowlist and blocklist", shared),
            ));
        }
    }
    if let Some(shell) = get_str(commands, "shell") {
        if shell.is_empty() {
            out.push((
                Some("commands.shell".to_string()),
                "shell must be non-empty".to_string(),
            ));
        }
    }
    out
}

fn check_context(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(context) = get_obj(doc, "context") else {
        return out;
    };
    if let Some(wd) = get_str(context, "working_dir") {
        if wd != "." {
            out.push((
                Some("context.working_dir".to_string()),
                format!("working_dir must be `.`, found `{}`", wd),
            ));
        }
    }
    if let Some(env) = string_vec(context, "env_allowlist") {
        if !is_sorted(&env) {
            out.push((
                Some("context.env_allowlist".to_string()),
                "env_allowlist is not sorted".to_string(),
            ));
        }
        for (i, entry) in env.iter().enumerate() {
            if let Some(prefix) = FORBIDDEN_ENV_PREFIXES
                .iter()
                .find(|p| entry.starts_with(**p))
            {
                out.push((
                    Some(format!("context.env_allowlist[{}]", i)),
                    format!("`{}` uses forbidden prefix `{}`", entry, prefix),
                ));
            }
        }
    }
    out
}

fn check_timing(doc: &Doc, opts: &RunnerOptions) -> Vec<Finding> {
    if opts.skip_timing_validation {
        return Vec::new();
    }
    let mut out = Vec::new();
    let Some(timing) = get_obj(doc, "timing") else {
        return out;
    };

    let started = get_str(timing, "started_at").map(|s| (s, parse_utc_millis(s)));
    let completed = get_str(timing, "completed_at").map(|s| (s, parse_utc_millis(s)));

    for (key, parsed) in [("started_at", &started), ("completed_at", &completed)] {
        if let Some((raw, None)) = parsed {
            out.push((
                Some(format!("timing.{}", key)),
                format!("`{}` is not an ISO-8601 UTC timestamp", raw),
            ));
        }
    }

    if let (Some((_, Some(start_ms))), Some((_, Some(end_ms)))) = (&started, &completed) {
        if end_ms < start_ms {
            out.push((
                Some("timing.completed_at".to_string()),
                "completed_at is before started_at".to_string(),
            ));
        } else if let Some(duration) = get_u64(timing, "duration_ms") {
            let delta = i128::from(end_ms - start_ms);
            let drift = (i128::from(duration) - delta).abs();
            if drift > 1 {
                out.push((
                    Some("timing.duration_ms".to_string()),
                    format!(
                        "duration_ms {} differs from completed_at - started_at ({}ms) by {}ms",
                        duration, delta, drift
                    ),
                ));
            }
        }
    }

    if let Some(phases) = get_arr(timing, "phases") {
        let mut previous: Option<i64> = None;
        for (i, phase) in object_elements(phases) {
            let Some(raw) = get_str(phase, "started_at") else {
                continue;
            };
            let Some(ms) = parse_utc_millis(raw) else {
                out.push((
                    Some(format!("timing.phases[{}].started_at", i)),
                    format!("`{}` is not an ISO-8601 UTC timestamp", raw),
                ));
                continue;
            };
            if let Some(prev) = previous {
                if ms < prev {
                    out.push((
                        Some(format!("timing.phases[{}]", i)),
                        "phases are not sorted by started_at".to_string(),
                    ));
                }
            }
            previous = Some(ms);
        }
    }

    out
}

fn check_exit(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(exit) = get_obj(doc, "exit") else {
        return out;
    };
    if let Some(code) = get_i64(exit, "code") {
        if !(0..=255).contains(&code) {
            out.push((
                Some("exit.code".to_string()),
                format!("exit code {} is out of range [0, 255]", code),
            ));
        }
    }
    if let Some(signal) = get_str(exit, "signal") {
        if signal.is_empty() || signal.chars().any(|c| c.is_ascii_lowercase()) {
            out.push((
                Some("exit.signal".to_string()),
                format!("signal `{}` must be upper-case", signal),
            ));
        }
    }
    out
}

fn check_write_roots(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(roots) = string_vec(doc, "write_roots") else {
        return out;
    };
    if !is_sorted_strict(&roots) {
        out.push((
            Some("write_roots".to_string()),
            "write_roots is not strictly sorted".to_string(),
        ));
    }
    for (i, root) in roots.iter().enumerate() {
        if let Some(reason) = unsafe_path_reason(root) {
            out.push((
                Some(format!("write_roots[{}]", i)),
                format!("`{}`: {}", root, reason),
            ));
        }
    }
    out
}

fn check_warnings(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    let Some(warnings) = string_vec(doc, "warnings") else {
        return Vec::new();
    };
    if is_sorted(&warnings) {
        Vec::new()
    } else {
        vec![(
            Some("warnings".to_string()),
            "warnings is not sorted".to_string(),
        )]
    }
}

fn check_round_trip(doc: &Doc, _opts: &RunnerOptions) -> Vec<Finding> {
    if canonical_round_trip_ok(&Value::Object(doc.clone())) {
        Vec::new()
    } else {
        vec![(
            None,
            "record does not survive canonical parse/re-encode".to_string(),
        )]
    }
}
