//! Command trees for console and player commands.
//!
//! Plugins register root literals built from [`CommandNode`] builders. The
//! [`CommandTree`] matches input text against all roots and runs the
//! executor it lands on:
//!
//! ```rust,ignore
//! use hearth_framework::command::CommandNode;
//! use hearth_core::PermissionLevel;
//!
//! let root = CommandNode::literal("!!calc")
//!     .then(
//!         CommandNode::literal("add").then(
//!             CommandNode::number("a").then(CommandNode::number("b").runs(|ctx| async move {
//!                 let sum = ctx.get_f64("a").unwrap_or(0.0) + ctx.get_f64("b").unwrap_or(0.0);
//!                 ctx.reply(format!("{sum}"));
//!                 Ok(())
//!             })),
//!         ),
//!     )
//!     .then(CommandNode::literal("reset").permission(PermissionLevel::Admin).runs(reset));
//! ```

pub mod argument;
pub mod context;
pub mod error;
pub mod node;
pub mod reader;
pub mod tree;

pub use argument::{ArgumentParser, ArgumentValue, NumberRange};
pub use context::CommandContext;
pub use error::{CommandError, NodeError, NodeResult, ParseFailure};
pub use node::{CommandExecutor, CommandNode, Requirement};
pub use tree::{CommandExecuted, CommandOutcome, CommandRoot, CommandTree, ResolvedCommand};
