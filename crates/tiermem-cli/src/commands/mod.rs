use anyhow::Context as _;
use clap::Args;
use console::style;
use serde::Serialize;
use std::path::PathBuf;

use tiermem_config::LoggingConfig;
use tiermem_core::{MemError, exit};

use crate::context::Context;

mod imp;
mod mem;

pub use imp::ImpCli;
pub use mem::MemCli;

/// Flags shared by `mem` and `imp`.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Workspace root holding MEMORY.md, memory/ and .checkpoint/
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Path to tiermem.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging and error chains)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

/// How an invocation that did not fail outright ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Finished, but with quarantined state or per-file import errors.
    Partial,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => exit::SUCCESS,
            Outcome::Partial => exit::PARTIAL,
        }
    }
}

/// Initialize tracing on stderr. `RUST_LOG` wins over every flag.
///
/// Level resolution: --verbose > --quiet > --log-level > config.
/// Fails if a global subscriber is already installed.
fn init_logging(config: &LoggingConfig, args: &GlobalArgs) -> tiermem_core::Result<()> {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        args.log_level.as_deref().unwrap_or(&config.level)
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format.as_str() {
        "json" => builder.json().with_target(true).try_init(),
        "compact" => builder.compact().with_target(false).try_init(),
        _ => builder.with_target(false).try_init(),
    };
    installed
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("failed to install the {} log subscriber", config.format))?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> tiermem_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Report quarantined state files and pick the outcome.
fn finish(ctx: &Context, partial: bool) -> Outcome {
    for path in ctx.quarantined() {
        eprintln!(
            "{} corrupt state moved to {}",
            style("warning:").yellow().bold(),
            path.display()
        );
    }
    if partial || !ctx.quarantined().is_empty() {
        Outcome::Partial
    } else {
        Outcome::Success
    }
}

/// `error[<kind>]: <message>` plus a one-line hint; `verbose` adds the debug form.
fn render_error(err: &MemError, verbose: bool) {
    eprintln!(
        "{} {}",
        style(format!("error[{}]:", err.kind())).red().bold(),
        err
    );
    eprintln!("{} {}", style("hint:").cyan(), err.hint());
    if verbose {
        eprintln!("{}", style(format!("{err:?}")).dim());
    }
}

fn parse_json(flag: &str, raw: &str) -> tiermem_core::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| MemError::usage(format!("{flag} is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_subscriber_install_is_reported() {
        let config = LoggingConfig::default();
        let args = GlobalArgs {
            quiet: true,
            ..Default::default()
        };
        let _ = init_logging(&config, &args);
        let err = init_logging(&config, &args).unwrap_err();
        assert!(err.to_string().contains("log subscriber"));
        assert_eq!(err.exit_code(), exit::IO);
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(Outcome::Success.exit_code(), exit::SUCCESS);
        assert_eq!(Outcome::Partial.exit_code(), exit::PARTIAL);
    }
}
