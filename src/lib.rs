//! Verdict: deterministic verification for AI code-generation artifacts
//!
//! **Verdict is the canonical-hash and invariant-checking layer between an
//! AI code-generation pipeline and anything that consumes its output.**
//!
//! Generation is probabilistic; everything downstream of it should not be.
//! Verdict gives every artifact a single canonical byte encoding, a
//! content address derived from it, and a declarative rule engine that
//! says exactly why a record is unacceptable.
//!
//! # Core Principles
//!
//! - **Deterministic**: one JSON value, one canonical encoding, one hash
//! - **Total**: engines classify malformed input, they never throw
//! - **Exhaustive**: every applicable rule runs; violations never mask each other
//! - **Reproducible**: violation lists are sorted, so reports diff cleanly
//! - **Core-addressed**: ephemeral fields never influence an artifact's hash
//!
//! # Artifact engines
//!
//! - `bundle`: generation output bundles (constraint tree, outputs, open questions)
//! - `patch`: patch sets (ordered create/modify/delete operations)
//! - `runner`: execution environment records (host, sandbox, limits, timing)
//! - `repo-state`: repository state pins (commit, lockfile, contract versions)
//! - `apply-result`: patch application reports (per-operation outcomes, summary)
//! - `proposal`: planning-side proposals (kind, risk, approval)
//! - `pack`: directory-level artifact packs (manifest, symlinks, cross-file hashes)
//!
//! # Examples
//!
//! ```bash
//! # Verify a runner record, human-readable
//! verdict runner run/runner.json
//!
//! # Verify a patch set from stdin, machine-readable
//! cat patch.json | verdict patch - --format json
//!
//! # Check a whole artifact pack
//! verdict pack runs/run_20260823/
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: canonical encoding, hashing, violation reports, shared shape helpers
//! - [`verifiers`]: the seven rule engines

pub mod core;
pub mod verifiers;

use core::error::VerdictError;
use core::output::{render_verdict, render_violation};
use core::report::Verdict;
use verifiers::{apply_result, bundle, pack, patch, proposal, repo_state, runner};

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Artifact verified, no violations.
pub const EXIT_VALID: i32 = 0;
/// Input file could not be read.
pub const EXIT_IO: i32 = 1;
/// Input was not valid JSON.
pub const EXIT_PARSE: i32 = 2;
/// Artifact parsed but violated at least one rule.
pub const EXIT_VIOLATIONS: i32 = 3;

/// Pack verified, no violations.
pub const EXIT_PACK_VALID: i32 = 0;
/// Pack scanned, at least one violation.
pub const EXIT_PACK_VIOLATIONS: i32 = 1;
/// Pack path missing, unreadable, or not a directory.
pub const EXIT_PACK_INACCESSIBLE: i32 = 2;
/// Bad command-line usage.
pub const EXIT_USAGE: i32 = 3;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[clap(
    name = "verdict",
    version = env!("CARGO_PKG_VERSION"),
    about = "Deterministic verification and content addressing for AI code-generation artifacts",
    after_help = "Exit codes: document subcommands exit 0 (valid), 1 (I/O error), \
                  2 (JSON parse error), 3 (rule violations); pack exits 0 (valid), \
                  1 (violations), 2 (path inaccessible). Bad usage exits 3 for \
                  every subcommand."
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Output format for verdicts and pack reports.
    #[clap(long, global = true, value_enum, default_value = "text")]
    format: Format,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify an output bundle record
    #[clap(name = "bundle", visible_alias = "b")]
    Bundle {
        /// Path to bundle JSON, or `-` for stdin.
        file: String,
        /// Skip recomputing per-output content hashes.
        #[clap(long)]
        shallow: bool,
    },

    /// Verify a patch set record
    #[clap(name = "patch", visible_alias = "p")]
    Patch {
        /// Path to patch-set JSON, or `-` for stdin.
        file: String,
        /// Maximum combined content size across all operations, in bytes.
        #[clap(long, default_value_t = patch::DEFAULT_MAX_TOTAL_BYTES)]
        max_total_bytes: u64,
    },

    /// Verify an execution environment record
    #[clap(name = "runner", visible_alias = "r")]
    Runner {
        /// Path to runner JSON, or `-` for stdin.
        file: String,
        /// Skip wall-clock drift checks on the timing block.
        #[clap(long)]
        skip_timing: bool,
        /// Skip the node runtime version check.
        #[clap(long)]
        skip_node_check: bool,
    },

    /// Verify a repository-state record
    #[clap(name = "repo-state")]
    RepoState {
        /// Path to repo-state JSON, or `-` for stdin.
        file: String,
    },

    /// Verify a patch application report
    #[clap(name = "apply-result")]
    ApplyResult {
        /// Path to apply-result JSON, or `-` for stdin.
        file: String,
    },

    /// Verify an internal proposal record
    #[clap(name = "proposal")]
    Proposal {
        /// Path to proposal JSON, or `-` for stdin.
        file: String,
    },

    /// Verify an artifact pack directory
    #[clap(name = "pack")]
    Pack {
        /// Path to the pack directory.
        dir: PathBuf,
        /// Skip delegating bundle.json/patch.json to their engines.
        #[clap(long)]
        shallow: bool,
        /// Skip recomputing declared cross-file hashes.
        #[clap(long)]
        no_references: bool,
    },
}

/// Parse arguments and dispatch. Returns the process exit code.
pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version are not usage errors.
            let benign = matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = err.print();
            return if benign { EXIT_VALID } else { EXIT_USAGE };
        }
    };

    let format = cli.format;
    match cli.command {
        Command::Bundle { file, shallow } => {
            let opts = bundle::BundleOptions {
                deep_validation: !shallow,
            };
            verify_document(&file, format, |input| bundle::verify(input, &opts))
        }
        Command::Patch {
            file,
            max_total_bytes,
        } => {
            let opts = patch::PatchOptions { max_total_bytes };
            verify_document(&file, format, |input| patch::verify(input, &opts))
        }
        Command::Runner {
            file,
            skip_timing,
            skip_node_check,
        } => {
            let opts = runner::RunnerOptions {
                skip_timing_validation: skip_timing,
                skip_node_version_check: skip_node_check,
            };
            verify_document(&file, format, |input| runner::verify(input, &opts))
        }
        Command::RepoState { file } => verify_document(&file, format, repo_state::verify),
        Command::ApplyResult { file } => verify_document(&file, format, apply_result::verify),
        Command::Proposal { file } => verify_document(&file, format, proposal::verify),
        Command::Pack {
            dir,
            shallow,
            no_references,
        } => {
            let opts = pack::PackOptions {
                verify_references: !no_references,
                deep_validation: !shallow,
            };
            verify_pack(&dir, format, &opts)
        }
    }
}

fn read_input(file: &str) -> Result<String, VerdictError> {
    if file == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        Ok(std::fs::read_to_string(file)?)
    }
}

/// Read and decode one artifact; malformed content past this point is the
/// engines' business, not an error.
fn load_document(file: &str) -> Result<Value, VerdictError> {
    let text = read_input(file)?;
    Ok(serde_json::from_str(&text)?)
}

fn error_exit_code(err: &VerdictError) -> i32 {
    match err {
        VerdictError::IoError(_) => EXIT_IO,
        VerdictError::JsonError(_) => EXIT_PARSE,
    }
}

fn verify_document(file: &str, format: Format, verify: impl FnOnce(&Value) -> Verdict) -> i32 {
    let input = match load_document(file) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("error: `{}`: {}", file, err);
            return error_exit_code(&err);
        }
    };

    let verdict = verify(&input);
    let label = if file == "-" { "<stdin>" } else { file };
    match format {
        Format::Text => println!("{}", render_verdict(label, &verdict)),
        Format::Json => print_json(&verdict),
    }
    if verdict.valid { EXIT_VALID } else { EXIT_VIOLATIONS }
}

fn verify_pack(dir: &Path, format: Format, opts: &pack::PackOptions) -> i32 {
    // Distinguish "pack can't be scanned" from "pack scanned and found
    // wanting": the former is an I/O-level failure with its own exit code.
    let scannable = match std::fs::symlink_metadata(dir) {
        Ok(_) => dir.is_dir(),
        Err(_) => false,
    };
    let report = pack::verify(dir, opts);
    match format {
        Format::Text => println!("{}", render_pack_report(dir, &report)),
        Format::Json => print_json(&report),
    }
    if !scannable {
        EXIT_PACK_INACCESSIBLE
    } else if report.valid {
        EXIT_PACK_VALID
    } else {
        EXIT_PACK_VIOLATIONS
    }
}

fn render_pack_report(dir: &Path, report: &pack::PackReport) -> String {
    let label = dir.display().to_string();
    let mut lines = Vec::new();
    if report.valid {
        lines.push(format!(
            "{} {} ({} file(s) verified)",
            "valid".green().bold(),
            label,
            report.verified_files.len()
        ));
    } else {
        lines.push(format!(
            "{} {} ({} violation(s))",
            "invalid".red().bold(),
            label,
            report.violations.len()
        ));
        for v in &report.violations {
            lines.push(render_violation(v));
        }
    }
    for check in &report.reference_checks {
        let mark = if check.matched {
            "✓".green().to_string()
        } else {
            "✗".red().to_string()
        };
        lines.push(format!(
            "  {} {} {} -> {}",
            mark, check.source, check.field, check.target
        ));
    }
    lines.join("\n")
}

/// Reports go out in canonical form, so piping the same verdict twice
/// yields byte-identical output.
fn print_json<T: serde::Serialize>(value: &T) {
    let encoded = serde_json::to_value(value)
        .map_err(|e| e.to_string())
        .and_then(|v| core::canonical::canonicalize(&v).map_err(|e| e.to_string()));
    match encoded {
        Ok(text) => println!("{}", text),
        Err(err) => eprintln!("error: cannot serialize report: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_document("/no/such/file.json").unwrap_err();
        assert!(matches!(err, VerdictError::IoError(_)));
        assert_eq!(error_exit_code(&err), EXIT_IO);
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_document(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, VerdictError::JsonError(_)));
        assert_eq!(error_exit_code(&err), EXIT_PARSE);
    }

    #[test]
    fn readable_json_loads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"a\": 1}}").unwrap();
        let doc = load_document(file.path().to_str().unwrap()).unwrap();
        assert_eq!(doc["a"], 1);
    }

    #[test]
    fn unknown_subcommand_is_a_usage_error_not_help() {
        let err = Cli::try_parse_from(["verdict", "bogus"]).unwrap_err();
        assert!(!matches!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
        ));
    }

    #[test]
    fn help_states_the_exit_code_contract() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("Exit codes"));
        assert!(help.contains("Bad usage exits 3"));
    }
}
