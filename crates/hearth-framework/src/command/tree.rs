//! The command tree: root registry, matcher and executor.
//!
//! Matching walks one node per token:
//!
//! ```text
//!  parse token ──▶ requirement ──▶ store value ──▶ end of text? ──▶ executor
//!                                                      │              or Incomplete
//!                                                      ▼
//!                                          literal children (first hit)
//!                                          then the first argument child
//! ```
//!
//! Roots sharing a literal are tried in registration order; the first one
//! that does not report [`CommandError::NotFound`] decides.
//!
//! The root list is swapped as a whole on [`CommandTree::rebuild`]. Matching
//! works on an `Arc` snapshot, so an in-flight command never sees a half
//! built tree.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use hearth_core::{
    BoxedEvent, CommandSource, DispatchMode, Event, EventBus, EventKind, panic_message,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::argument::ArgumentValue;
use super::context::CommandContext;
use super::error::{CommandError, hint};
use super::node::{CommandExecutor, CommandNode};
use super::reader::{get_element, remove_divider_prefix};

// =============================================================================
// Registered roots
// =============================================================================

/// A root literal and the plugin that registered it.
#[derive(Clone)]
pub struct CommandRoot {
    plugin: Arc<str>,
    node: Arc<CommandNode>,
}

impl CommandRoot {
    pub fn new(plugin: impl Into<Arc<str>>, node: impl Into<Arc<CommandNode>>) -> Self {
        Self {
            plugin: plugin.into(),
            node: node.into(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn node(&self) -> &CommandNode {
        &self.node
    }
}

impl fmt::Debug for CommandRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRoot")
            .field("plugin", &self.plugin)
            .field("literal", &self.node.name())
            .finish()
    }
}

// =============================================================================
// Outcome and event
// =============================================================================

/// A matched command, ready to run.
pub struct ResolvedCommand {
    pub plugin: Arc<str>,
    pub context: CommandContext,
    executor: CommandExecutor,
}

impl fmt::Debug for ResolvedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCommand")
            .field("plugin", &self.plugin)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Result of [`CommandTree::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The executor ran and returned `Ok`.
    Executed,
    /// The executor returned an error or panicked.
    Failed(String),
    /// No executor was reached.
    Rejected(CommandError),
}

impl CommandOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed)
    }
}

/// Published as [`EventKind::COMMAND_EXECUTED`] after an executor ran.
#[derive(Debug, Clone)]
pub struct CommandExecuted {
    pub source: CommandSource,
    pub command: String,
    pub plugin: Arc<str>,
    pub outcome: CommandOutcome,
}

impl Event for CommandExecuted {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// =============================================================================
// Walk
// =============================================================================

enum WalkError {
    /// A literal node did not match; the caller tries the next sibling.
    Literal,
    Command(CommandError),
}

impl From<CommandError> for WalkError {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}

/// Clamps a parser-reported end position to a valid prefix of `command`.
fn prefix(command: &str, end: usize) -> &str {
    let end = end.min(command.len());
    command.get(..end).unwrap_or(command)
}

fn walk(
    node: &CommandNode,
    source: &CommandSource,
    command: &str,
    pos: usize,
    args: &mut HashMap<String, ArgumentValue>,
) -> Result<CommandExecutor, WalkError> {
    let remaining = &command[pos..];
    let (read, value) = match node.parse(remaining) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return Err(WalkError::Literal),
        Err(failure) => {
            let consumed = prefix(command, pos + failure.read());
            return Err(failure.into_command_error(hint(consumed)).into());
        }
    };

    let consumed = prefix(command, pos + read);
    let rest = remove_divider_prefix(&command[consumed.len()..]);
    let next = command.len() - rest.len();

    if !node.allows(source) {
        return Err(CommandError::PermissionDenied {
            hint: hint(consumed),
        }
        .into());
    }
    if let (Some(name), Some(value)) = (node.argument_name(), value) {
        args.insert(name.to_string(), value);
    }

    if rest.is_empty() {
        return node.executor.clone().ok_or_else(|| {
            CommandError::Incomplete {
                hint: hint(consumed),
            }
            .into()
        });
    }

    let (literals, arguments) = node.children();
    if literals.is_empty() && arguments.is_empty() {
        return Err(CommandError::NotFound { hint: hint(command) }.into());
    }
    for child in literals {
        match walk(child, source, command, next, args) {
            Err(WalkError::Literal) => continue,
            other => return other,
        }
    }
    match arguments.first() {
        Some(child) => walk(child, source, command, next, args),
        None => Err(CommandError::NotFound { hint: hint(command) }.into()),
    }
}

// =============================================================================
// CommandTree
// =============================================================================

/// Registry of root literals plus the matcher over them.
pub struct CommandTree {
    roots: RwLock<Arc<Vec<CommandRoot>>>,
    bus: Arc<EventBus>,
}

impl CommandTree {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            roots: RwLock::new(Arc::new(Vec::new())),
            bus,
        }
    }

    /// Replaces every root at once.
    pub fn rebuild(&self, roots: Vec<CommandRoot>) {
        let count = roots.len();
        *self.roots.write() = Arc::new(roots);
        debug!(roots = count, "Command tree rebuilt");
    }

    /// Snapshot of the registered roots, in registration order.
    pub fn roots(&self) -> Arc<Vec<CommandRoot>> {
        Arc::clone(&self.roots.read())
    }

    /// Returns `true` if some root matches `word` as its literal.
    pub fn matches_literal(&self, word: &str) -> bool {
        self.roots()
            .iter()
            .any(|root| root.node.spellings().iter().any(|s| s == word))
    }

    /// Matches `text` without running anything.
    pub fn resolve(
        &self,
        source: &CommandSource,
        text: &str,
    ) -> Result<ResolvedCommand, CommandError> {
        let command = remove_divider_prefix(text);
        let roots = self.roots();
        let mut not_found = None;

        for root in roots.iter() {
            let mut args = HashMap::new();
            match walk(&root.node, source, command, 0, &mut args) {
                Ok(executor) => {
                    return Ok(ResolvedCommand {
                        plugin: Arc::clone(&root.plugin),
                        context: CommandContext::new(source.clone(), command, args),
                        executor,
                    });
                }
                Err(WalkError::Literal) => continue,
                Err(WalkError::Command(err)) if err.is_not_found() => {
                    not_found.get_or_insert(err);
                }
                Err(WalkError::Command(err)) => return Err(err),
            }
        }

        Err(not_found.unwrap_or_else(|| CommandError::NotFound {
            hint: hint(get_element(command)),
        }))
    }

    /// Matches and runs `text` for `source`.
    ///
    /// Matching failures are replied to the source. After an executor ran,
    /// [`EventKind::COMMAND_EXECUTED`] is published in blocking mode.
    pub async fn execute(&self, source: &CommandSource, text: &str) -> CommandOutcome {
        let resolved = match self.resolve(source, text) {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!(source = %source, command = text, error = %err, "Command rejected");
                source.reply(err.to_string());
                return CommandOutcome::Rejected(err);
            }
        };

        let ResolvedCommand {
            plugin,
            context,
            executor,
        } = resolved;
        let command = context.command().to_string();
        debug!(source = %source, plugin = %plugin, command = %command, "Executing command");

        let outcome = match AssertUnwindSafe(executor(context)).catch_unwind().await {
            Ok(Ok(())) => CommandOutcome::Executed,
            Ok(Err(err)) => CommandOutcome::Failed(err.to_string()),
            Err(payload) => CommandOutcome::Failed(panic_message(&*payload)),
        };
        if let CommandOutcome::Failed(reason) = &outcome {
            warn!(plugin = %plugin, command = %command, reason = %reason, "Command executor failed");
            source.reply(format!("Error while executing command: {reason}"));
        }

        let event = CommandExecuted {
            source: source.clone(),
            command,
            plugin,
            outcome: outcome.clone(),
        };
        self.bus
            .publish(
                &EventKind::COMMAND_EXECUTED,
                BoxedEvent::new(event),
                DispatchMode::Blocking,
            )
            .await;
        outcome
    }
}

impl fmt::Debug for CommandTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTree")
            .field("roots", &self.roots.read().len())
            .finish()
    }
}
