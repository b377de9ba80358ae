use std::path::PathBuf;

use chrono::Utc;
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use serde_json::json;

use tiermem_config::ConfigLoader;
use tiermem_core::Result;
use tiermem_memory::{HotKey, TagMode};

use super::{GlobalArgs, Outcome, finish, init_logging, parse_json, print_json, render_error};
use crate::context::{Context, Overrides, StoreRequest};

/// Tiered agent memory: hot digest, warm facts, cold archive
#[derive(Parser, Debug)]
#[command(name = "mem", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct MemCli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    cold: ColdArgs,

    #[command(subcommand)]
    command: MemCommand,
}

/// Cold-tier endpoint; overrides `[cold]` in tiermem.toml.
#[derive(Args, Debug, Clone, Default)]
struct ColdArgs {
    /// Cold store URL (https://, libsql://, file: or a local path)
    #[arg(long = "db-url", visible_alias = "cold", global = true, value_name = "URL")]
    db_url: Option<String>,

    /// Bearer token for a remote cold store
    #[arg(long = "auth-token", visible_alias = "token", global = true, value_name = "TOKEN")]
    auth_token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum MemCommand {
    /// Store a fact in the warm tier and index its category
    Store {
        #[arg(long)]
        text: String,
        /// Slash-separated category path, e.g. work/projectA
        #[arg(long)]
        category: String,
        #[arg(long, default_value_t = 0.5)]
        importance: f64,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Derive tags from the fact text
        #[arg(long)]
        auto_tag: bool,
    },
    /// Search tree-routed warm categories, warm keywords, then cold
    Retrieve {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Evict expired warm facts, archive them, recount the tree and rebuild MEMORY.md
    Consolidate,
    /// Show hot, warm and tree usage
    Stats,
    /// Inspect or edit the category tree
    Tree(TreeArgs),
    /// Inspect or maintain the warm tier
    Warm(WarmArgs),
    /// Talk to the cold tier directly
    Cold(ColdVerbArgs),
    /// Regenerate the MEMORY.md digest
    RebuildHot {
        /// Output path (default: <workspace>/MEMORY.md)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Update the identity state rendered into MEMORY.md
    HotState {
        #[arg(long, value_parser = parse_hot_key)]
        key: HotKey,
        /// JSON payload
        #[arg(long)]
        data: String,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("tree_action").args(["show", "add", "remove", "search"])))]
struct TreeArgs {
    #[arg(long)]
    show: bool,
    /// Add PATH with description DESC
    #[arg(long, num_args = 2, value_names = ["PATH", "DESC"])]
    add: Option<Vec<String>>,
    #[arg(long, value_name = "PATH")]
    remove: Option<String>,
    #[arg(long, value_name = "QUERY")]
    search: Option<String>,
    #[arg(long, default_value_t = 5)]
    limit: usize,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("warm_action").args(["list", "evict", "search", "recent", "tags"])))]
struct WarmArgs {
    #[arg(long)]
    list: bool,
    /// Remove facts older than 30 days that score below 0.3
    #[arg(long)]
    evict: bool,
    #[arg(long, value_name = "QUERY")]
    search: Option<String>,
    /// Search without reinforcing the returned facts
    #[arg(long, requires = "search")]
    no_touch: bool,
    #[arg(long, value_name = "N")]
    recent: Option<usize>,
    /// Comma-separated tags
    #[arg(long, value_delimiter = ',')]
    tags: Option<Vec<String>>,
    /// Require every tag instead of any
    #[arg(long, requires = "tags")]
    all: bool,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("cold_action").args(["init", "store_text", "query"]).required(true)))]
struct ColdVerbArgs {
    #[arg(long)]
    init: bool,
    #[arg(long, value_name = "TEXT")]
    store_text: Option<String>,
    #[arg(long, default_value = "general")]
    category: String,
    #[arg(long, default_value_t = 0.5)]
    importance: f64,
    #[arg(long, value_name = "QUERY")]
    query: Option<String>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

fn parse_hot_key(s: &str) -> std::result::Result<HotKey, String> {
    s.parse::<HotKey>().map_err(|e| e.to_string())
}

impl MemCli {
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
        if let MemCommand::Completions { shell } = self.command {
            let mut cmd = MemCli::command();
            generate(shell, &mut cmd, "mem", &mut std::io::stdout());
            return Ok(Outcome::Success);
        }

        let config_loader = ConfigLoader::load(self.global.config.as_deref())?;
        let config = config_loader.get();
        init_logging(&config.logging, &self.global)?;

        let mut ctx = Context::new(
            config,
            Overrides {
                workspace: self.global.workspace.clone(),
                db_url: self.cold.db_url.clone(),
                auth_token: self.cold.auth_token.clone(),
            },
        )?;
        let now = Utc::now();

        match self.command {
            MemCommand::Store {
                text,
                category,
                importance,
                tags,
                auto_tag,
            } => {
                let report = ctx
                    .store(
                        StoreRequest {
                            text,
                            category,
                            importance,
                            tags,
                            auto_tag,
                        },
                        now,
                    )
                    .await?;
                print_json(&report)?;
            }
            MemCommand::Retrieve { query, limit } => {
                print_json(&ctx.retrieve(&query, limit, now).await?)?;
            }
            MemCommand::Consolidate => {
                print_json(&ctx.consolidate(now).await?)?;
            }
            MemCommand::Stats => print_json(&ctx.stats()?)?,
            MemCommand::Tree(args) => Self::cmd_tree(&mut ctx, args, now)?,
            MemCommand::Warm(args) => Self::cmd_warm(&mut ctx, args, now)?,
            MemCommand::Cold(args) => Self::cmd_cold(&ctx, args, now).await?,
            MemCommand::RebuildHot { output } => {
                let digest = ctx.rebuild_hot(output.as_deref(), now)?;
                let output = output.unwrap_or_else(|| ctx.paths.hot_output.clone());
                print_json(&json!({
                    "output": output,
                    "size_bytes": digest.bytes,
                    "max_bytes": digest.max_bytes,
                    "pruned_lines": digest.pruned_lines,
                    "truncated": digest.truncated,
                }))?;
            }
            MemCommand::HotState { key, data } => {
                let data = parse_json("--data", &data)?;
                ctx.hot_state(key, data)?;
                print_json(&json!({ "key": format!("{key:?}").to_lowercase(), "updated": true }))?;
            }
            MemCommand::Completions { .. } => {}
        }

        Ok(finish(&ctx, false))
    }

    fn cmd_tree(ctx: &mut Context, args: TreeArgs, now: chrono::DateTime<Utc>) -> Result<()> {
        if let Some(pair) = args.add {
            let (path, desc) = (&pair[0], &pair[1]);
            let added = ctx.tree_add(path, desc)?;
            print_json(&json!({ "path": path, "added": added }))
        } else if let Some(path) = args.remove {
            print_json(&ctx.tree_remove(&path)?)
        } else if let Some(query) = args.search {
            print_json(&ctx.tree_search(&query, args.limit, now)?)
        } else {
            println!("{}", ctx.tree_show()?);
            Ok(())
        }
    }

    fn cmd_warm(ctx: &mut Context, args: WarmArgs, now: chrono::DateTime<Utc>) -> Result<()> {
        if args.list {
            print_json(&ctx.warm_list(now)?)
        } else if args.evict {
            print_json(&ctx.warm_evict(now)?)
        } else if let Some(query) = args.search {
            print_json(&ctx.warm_search(&query, args.limit, !args.no_touch, now)?)
        } else if let Some(n) = args.recent {
            print_json(&ctx.warm_recent(n, now)?)
        } else if let Some(tags) = args.tags {
            let mode = if args.all { TagMode::All } else { TagMode::Any };
            print_json(&ctx.warm_tags(&tags, mode, args.limit, now)?)
        } else {
            print_json(&ctx.warm_stats()?)
        }
    }

    async fn cmd_cold(ctx: &Context, args: ColdVerbArgs, now: chrono::DateTime<Utc>) -> Result<()> {
        if args.init {
            ctx.cold_init().await?;
            print_json(&json!({ "initialized": true }))
        } else if let Some(text) = args.store_text {
            print_json(&ctx.cold_store(&text, &args.category, args.importance, now).await?)
        } else if let Some(query) = args.query {
            print_json(&ctx.cold_query(&query, args.limit).await?)
        } else {
            Ok(())
        }
    }
}
