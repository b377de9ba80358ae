use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use tiermem_config::ConfigLoader;
use tiermem_core::{MemError, Result};
use tiermem_import::ImportMode;

use super::{GlobalArgs, Outcome, finish, init_logging, print_json, render_error};
use crate::context::{Context, ImportRequest, ImportSource, Overrides};

/// Import JSONL session usage into the workspace usage ledger
#[derive(Parser, Debug)]
#[command(name = "imp", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct ImpCli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    import: ImportArgs,

    #[command(subcommand)]
    command: Option<ImpCommand>,
}

#[derive(Args, Debug, Clone, Default)]
struct ImportArgs {
    /// Import every discovered session directory
    #[arg(long, conflicts_with = "path")]
    auto: bool,

    /// Import the *.jsonl files in DIR
    #[arg(long, value_name = "DIR")]
    path: Option<PathBuf>,

    /// Ignore checkpoints and re-read every file (deduplication still applies)
    #[arg(long)]
    full: bool,

    /// Use checkpoints (default)
    #[arg(long, overrides_with = "no_incremental")]
    incremental: bool,

    /// Same as --full
    #[arg(long, overrides_with = "incremental")]
    no_incremental: bool,

    /// Count what would be imported without writing anything
    #[arg(long)]
    dry_run: bool,

    /// App label stored with each record
    #[arg(long)]
    app: Option<String>,
}

impl ImportArgs {
    fn mode(&self) -> ImportMode {
        if self.full || self.no_incremental {
            ImportMode::Full
        } else {
            ImportMode::Incremental
        }
    }

    fn source(&self) -> Result<ImportSource> {
        match (&self.path, self.auto) {
            (Some(dir), _) => Ok(ImportSource::Path(dir.clone())),
            (None, true) => Ok(ImportSource::Auto),
            (None, false) => Err(MemError::usage("pass --auto or --path DIR")),
        }
    }
}

#[derive(Subcommand, Debug)]
enum ImpCommand {
    /// List the session directories --auto would import
    Scan,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl ImpCli {
    /// Run and map the result to a process exit code.
    pub async fn execute(self) -> i32 {
        let verbose = self.global.verbose;
        match self.run().await {
            Ok(outcome) => outcome.exit_code(),
            Err(e) => {
                render_error(&e, verbose);
                e.exit_code()
            }
        }
    }

    pub async fn run(self) -> Result<Outcome> {
        if let Some(ImpCommand::Completions { shell }) = self.command {
            let mut cmd = ImpCli::command();
            generate(shell, &mut cmd, "imp", &mut std::io::stdout());
            return Ok(Outcome::Success);
        }

        let config_loader = ConfigLoader::load(self.global.config.as_deref())?;
        let config = config_loader.get();
        init_logging(&config.logging, &self.global)?;

        let mut ctx = Context::new(
            config,
            Overrides {
                workspace: self.global.workspace.clone(),
                ..Default::default()
            },
        )?;

        if let Some(ImpCommand::Scan) = self.command {
            print_json(&ctx.scan()?)?;
            return Ok(finish(&ctx, false));
        }

        let request = ImportRequest {
            source: self.import.source()?,
            mode: self.import.mode(),
            dry_run: self.import.dry_run,
            app: self.import.app.clone(),
        };
        let report = ctx.import(request, Utc::now())?;
        print_json(&report)?;
        Ok(finish(&ctx, report.has_errors()))
    }
}
