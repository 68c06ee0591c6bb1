//! Echo Daemon Example
//!
//! Runs a server under Hearth with the greeter plugin and a small set of
//! management commands.
//!
//! # Usage
//!
//! ```bash
//! # hearth.toml in the current directory
//! cargo run --package echo-daemon
//!
//! # any line-oriented program works as a server
//! cargo run --package echo-daemon -- --no-auto-start -- sh -c 'while read l; do echo "$l"; done'
//! ```
//!
//! # Commands
//!
//! | Command | Level |
//! |---------|-------|
//! | `!!help` | guest |
//! | `!!plugins` | user |
//! | `!!reload <plugin>` | admin |
//! | `!!restart` | admin |
//! | `!!perm <player> <level>` | owner |

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use clap::Parser;
use hearth::framework::PluginManager;
use hearth::prelude::*;
use hearth_greeter::GREETER;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "echo-daemon", version, about = "Supervise a game server with Hearth")]
struct Cli {
    /// Configuration file; hearth.toml in the current directory if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. "production"
    #[arg(short, long, env = "HEARTH_PROFILE")]
    profile: Option<String>,

    /// Output dialect of the server
    #[arg(long)]
    dialect: Option<String>,

    /// Wait for `!!restart` or the console before starting the server
    #[arg(long)]
    no_auto_start: bool,

    /// Do not read commands from stdin
    #[arg(long)]
    no_console: bool,

    /// Server command line, overriding the configuration
    #[arg(last = true)]
    server: Vec<String>,
}

// ============================================================================
// Management plugin
// ============================================================================

/// The runtime's plugin manager, for `!!help`.
static MANAGER: OnceLock<Arc<PluginManager>> = OnceLock::new();

#[derive(Default)]
struct Daemon;

#[async_trait]
impl Plugin for Daemon {
    async fn on_load(
        &self,
        ctx: &PluginContext,
        _previous: Option<Arc<dyn Plugin>>,
    ) -> Result<(), BoxError> {
        ctx.register_command(CommandNode::literal("!!help").runs(|c| async move {
            let Some(manager) = MANAGER.get() else {
                return Ok(());
            };
            for help in manager.help_messages(c.source().level()) {
                c.reply(format!("{}: {}", help.prefix, help.message));
            }
            Ok(())
        }))?;

        let plugins_ctx = ctx.clone();
        ctx.register_command(CommandNode::literal("!!plugins").runs(move |c| {
            let ctx = plugins_ctx.clone();
            async move {
                for (metadata, state) in ctx.server()?.plugin_list() {
                    c.reply(format!("{} {} ({state})", metadata.id, metadata.version));
                }
                Ok(())
            }
        }))?;

        let reload_ctx = ctx.clone();
        ctx.register_command(
            CommandNode::literal("!!reload")
                .permission(PermissionLevel::Admin)
                .then(CommandNode::text("plugin").runs(move |c| {
                    let ctx = reload_ctx.clone();
                    async move {
                        let id = c.get_str("plugin").unwrap_or_default().to_string();
                        let report = ctx.server()?.reload_plugin(&id).await?;
                        c.reply(format!("Reloaded {:?}", report.loaded_ids()));
                        Ok(())
                    }
                })),
        )?;

        let restart_ctx = ctx.clone();
        ctx.register_command(
            CommandNode::literal("!!restart")
                .permission(PermissionLevel::Admin)
                .runs(move |c| {
                    let ctx = restart_ctx.clone();
                    async move {
                        let server = ctx.server()?;
                        c.reply("Restarting the server");
                        // The stop event goes through the dispatch task this
                        // executor is running on.
                        tokio::spawn(async move {
                            if let Err(e) = server.restart().await {
                                error!(error = %e, "Restart failed");
                            }
                        });
                        Ok(())
                    }
                }),
        )?;

        let perm_ctx = ctx.clone();
        ctx.register_command(
            CommandNode::literal("!!perm")
                .permission(PermissionLevel::Owner)
                .then(CommandNode::text("player").then(CommandNode::text("level").runs(
                    move |c| {
                        let ctx = perm_ctx.clone();
                        async move {
                            let player = c.get_str("player").unwrap_or_default().to_string();
                            let level: PermissionLevel =
                                c.get_str("level").unwrap_or_default().parse()?;
                            ctx.server()?.set_permission_level(&player, level);
                            c.reply(format!("{player} is now {level}"));
                            Ok(())
                        }
                    },
                ))),
        )?;

        ctx.register_help_message("!!help", "Show this list", PermissionLevel::Guest)?;
        ctx.register_help_message("!!plugins", "List plugins", PermissionLevel::User)?;
        ctx.register_help_message("!!reload", "Reload a plugin", PermissionLevel::Admin)?;
        ctx.register_help_message("!!restart", "Restart the server", PermissionLevel::Admin)?;
        ctx.register_help_message("!!perm", "Set a permission level", PermissionLevel::Owner)?;
        Ok(())
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn build_runtime(cli: &Cli) -> Result<HearthRuntime> {
    let mut builder = HearthRuntime::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }
    if let Some(dialect) = &cli.dialect {
        builder = builder.set("server.dialect", dialect);
    }
    if cli.no_auto_start {
        builder = builder.set("server.auto_start", false);
    }
    if let Some((command, args)) = cli.server.split_first() {
        builder = builder
            .set("server.command", command)
            .set("server.args", args)
            .set("server.working_dir", ".");
    }
    if cli.no_console {
        builder = builder.without_console();
    }
    builder.build().context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = build_runtime(&cli)?;
    let _ = MANAGER.set(runtime.plugins().clone());

    runtime
        .register_plugin(define_plugin!(Daemon {
            id: "daemon",
            name: "Daemon commands",
        }))
        .await?;
    info!(greeter = GREETER.id, "Demo plugins registered");

    runtime.run().await?;
    Ok(())
}
