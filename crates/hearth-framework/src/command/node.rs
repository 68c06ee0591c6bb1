//! Command node builders.
//!
//! A command is a tree of nodes. Literal nodes match fixed words; argument
//! nodes parse a value and store it under their name:
//!
//! ```text
//! !!warp ─┬─ list                        (literal)
//!         └─ <target> ──┬─ (runs)        (argument: text)
//!                       └─ <seconds>     (argument: integer 1..=60)
//! ```
//!
//! Builder calls never panic. Mistakes such as a duplicate child are recorded
//! on the node and reported by [`CommandNode::validate`], which plugin
//! registration calls.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use hearth_core::{BoxError, CommandSource, PermissionLevel};

use super::argument::{ArgumentParser, ArgumentValue, NumberRange, Parser};
use super::context::CommandContext;
use super::error::{NodeError, NodeResult, ParseFailure};
use super::reader::{DIVIDER, get_element};

/// Executor invoked when a command ends on a node.
pub type CommandExecutor =
    Arc<dyn Fn(CommandContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Predicate a source must satisfy to pass a node.
pub type Requirement = Arc<dyn Fn(&CommandSource) -> bool + Send + Sync>;

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    Literal(Vec<String>),
    Argument { name: String, parser: Parser },
}

/// One node of a command tree.
#[derive(Clone)]
pub struct CommandNode {
    pub(crate) kind: NodeKind,
    pub(crate) literals: Vec<CommandNode>,
    pub(crate) arguments: Vec<CommandNode>,
    pub(crate) executor: Option<CommandExecutor>,
    pub(crate) requirements: Vec<Requirement>,
    pub(crate) redirect: Option<Arc<CommandNode>>,
    errors: Vec<NodeError>,
}

impl CommandNode {
    fn with_kind(kind: NodeKind) -> Self {
        Self {
            kind,
            literals: Vec::new(),
            arguments: Vec::new(),
            executor: None,
            requirements: Vec::new(),
            redirect: None,
            errors: Vec::new(),
        }
    }

    // ─── Constructors ────────────────────────────────────────────────────────

    /// A literal node matching exactly `word`.
    pub fn literal(word: impl Into<String>) -> Self {
        Self::literals([word])
    }

    /// A literal node matching any of `words`.
    pub fn literals<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        let mut node = Self::with_kind(NodeKind::Literal(Vec::new()));
        if words.is_empty() {
            node.errors.push(NodeError::InvalidLiteral(String::new()));
        }
        let mut accepted = Vec::with_capacity(words.len());
        for word in words {
            if word.is_empty() || word.contains(DIVIDER) {
                node.errors.push(NodeError::InvalidLiteral(word));
            } else if !accepted.contains(&word) {
                accepted.push(word);
            }
        }
        node.kind = NodeKind::Literal(accepted);
        node
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::parsed(name, Parser::Integer(NumberRange::UNBOUNDED))
    }

    /// An integer or a float.
    pub fn number(name: impl Into<String>) -> Self {
        Self::parsed(name, Parser::Number(NumberRange::UNBOUNDED))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::parsed(name, Parser::Float(NumberRange::UNBOUNDED))
    }

    /// A single word.
    pub fn text(name: impl Into<String>) -> Self {
        Self::parsed(name, Parser::Text)
    }

    /// A single word, or a double-quoted string with `\"` and `\\` escapes.
    pub fn quotable_text(name: impl Into<String>) -> Self {
        Self::parsed(name, Parser::QuotableText { allow_empty: false })
    }

    /// Everything up to the end of the input.
    pub fn greedy_text(name: impl Into<String>) -> Self {
        Self::parsed(name, Parser::GreedyText)
    }

    /// An argument parsed by a custom parser.
    pub fn argument(name: impl Into<String>, parser: impl ArgumentParser + 'static) -> Self {
        Self::parsed(name, Parser::Custom(Arc::new(parser)))
    }

    fn parsed(name: impl Into<String>, parser: Parser) -> Self {
        Self::with_kind(NodeKind::Argument {
            name: name.into(),
            parser,
        })
    }

    // ─── Builders ────────────────────────────────────────────────────────────

    /// Inclusive bounds for a numeric argument.
    pub fn in_range(mut self, min: impl Into<f64>, max: impl Into<f64>) -> Self {
        let range = NumberRange {
            min: min.into(),
            max: max.into(),
        };
        let name = self.name();
        match &mut self.kind {
            NodeKind::Argument {
                parser: Parser::Integer(r) | Parser::Number(r) | Parser::Float(r),
                ..
            } => *r = range,
            _ => {
                self.errors.push(NodeError::InvalidOption {
                    node: name,
                    option: "in_range",
                });
            }
        }
        self
    }

    /// Accepts `""` on a quotable text argument.
    pub fn allow_empty(mut self) -> Self {
        let name = self.name();
        match &mut self.kind {
            NodeKind::Argument {
                parser: Parser::QuotableText { allow_empty },
                ..
            } => *allow_empty = true,
            _ => {
                self.errors.push(NodeError::InvalidOption {
                    node: name,
                    option: "allow_empty",
                });
            }
        }
        self
    }

    /// Adds a child node.
    pub fn then(mut self, child: CommandNode) -> Self {
        if self.redirect.is_some() {
            self.errors.push(NodeError::ChildOnRedirected(self.name()));
            return self;
        }
        match &child.kind {
            NodeKind::Literal(words) => {
                let clash = self.literals.iter().find_map(|existing| {
                    existing
                        .spellings()
                        .iter()
                        .find(|w| words.contains(*w))
                        .cloned()
                });
                if let Some(literal) = clash {
                    self.errors.push(NodeError::DuplicateLiteral {
                        parent: self.name(),
                        literal,
                    });
                } else {
                    self.literals.push(child);
                }
            }
            NodeKind::Argument { name, .. } => {
                if self.arguments.iter().any(|a| a.argument_name() == Some(name.as_str())) {
                    self.errors.push(NodeError::DuplicateArgument {
                        parent: self.name(),
                        name: name.clone(),
                    });
                } else {
                    self.arguments.push(child);
                }
            }
        }
        self
    }

    /// Sets the executor run when the command ends on this node.
    pub fn runs<F, Fut>(mut self, executor: F) -> Self
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.executor = Some(Arc::new(
            move |ctx: CommandContext| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(executor(ctx))
            },
        ));
        self
    }

    /// Adds a requirement. All requirements must hold.
    pub fn requires<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CommandSource) -> bool + Send + Sync + 'static,
    {
        self.requirements.push(Arc::new(predicate));
        self
    }

    /// Requires at least `level`.
    pub fn permission(self, level: PermissionLevel) -> Self {
        self.requires(move |source| source.has_permission(level))
    }

    /// Continues matching with the children of `target`.
    pub fn redirects(mut self, target: CommandNode) -> Self {
        if !self.literals.is_empty() || !self.arguments.is_empty() {
            self.errors.push(NodeError::RedirectWithChildren(self.name()));
            return self;
        }
        self.redirect = Some(Arc::new(target));
        self
    }

    // ─── Inspection ──────────────────────────────────────────────────────────

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, NodeKind::Literal(_))
    }

    /// The literal spellings, empty for argument nodes.
    pub fn spellings(&self) -> &[String] {
        match &self.kind {
            NodeKind::Literal(words) => words,
            NodeKind::Argument { .. } => &[],
        }
    }

    pub fn argument_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Argument { name, .. } => Some(name),
            NodeKind::Literal(_) => None,
        }
    }

    /// Display name: the literal spellings joined by `|`, or `<name>`.
    pub fn name(&self) -> String {
        match &self.kind {
            NodeKind::Literal(words) => words.join("|"),
            NodeKind::Argument { name, .. } => format!("<{name}>"),
        }
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }

    /// Reports the first builder mistake in this subtree.
    pub fn validate(&self) -> NodeResult<()> {
        if let Some(err) = self.errors.first() {
            return Err(err.clone());
        }
        self.literals
            .iter()
            .chain(&self.arguments)
            .chain(self.redirect.as_deref())
            .try_for_each(CommandNode::validate)
    }

    /// Children consulted after this node matched.
    pub(crate) fn children(&self) -> (&[CommandNode], &[CommandNode]) {
        let node = self.redirect.as_deref().unwrap_or(self);
        (&node.literals, &node.arguments)
    }

    /// Parses this node's token off `remaining`.
    ///
    /// A literal mismatch is `Ok(None)` so callers can try the next sibling.
    pub(crate) fn parse(
        &self,
        remaining: &str,
    ) -> Result<Option<(usize, Option<ArgumentValue>)>, ParseFailure> {
        match &self.kind {
            NodeKind::Literal(words) => {
                let element = get_element(remaining);
                Ok(words
                    .iter()
                    .any(|w| w == element)
                    .then_some((element.len(), None)))
            }
            NodeKind::Argument { parser, .. } => {
                let (read, value) = parser.parse(remaining)?;
                Ok(Some((read, Some(value))))
            }
        }
    }

    pub(crate) fn allows(&self, source: &CommandSource) -> bool {
        self.requirements.iter().all(|requirement| requirement(source))
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("kind", &self.kind)
            .field("literals", &self.literals)
            .field("arguments", &self.arguments)
            .field("runs", &self.executor.is_some())
            .field("requirements", &self.requirements.len())
            .field("redirect", &self.redirect.as_ref().map(|n| n.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_validation() {
        assert!(CommandNode::literal("ok").validate().is_ok());
        assert_eq!(
            CommandNode::literal("two words").validate(),
            Err(NodeError::InvalidLiteral("two words".into()))
        );
        assert_eq!(
            CommandNode::literals(["a", "b", "a"]).spellings(),
            &["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_duplicate_children_are_reported() {
        let node = CommandNode::literal("root")
            .then(CommandNode::literals(["x", "y"]))
            .then(CommandNode::literal("y"));
        assert_eq!(
            node.validate(),
            Err(NodeError::DuplicateLiteral {
                parent: "root".into(),
                literal: "y".into()
            })
        );
        assert_eq!(node.literals.len(), 1);

        let node = CommandNode::literal("root")
            .then(CommandNode::integer("n"))
            .then(CommandNode::text("n"));
        assert!(matches!(
            node.validate(),
            Err(NodeError::DuplicateArgument { .. })
        ));
    }

    #[test]
    fn test_nested_errors_surface() {
        let node = CommandNode::literal("root")
            .then(CommandNode::literal("sub").then(CommandNode::text("t").in_range(1, 2)));
        assert_eq!(
            node.validate(),
            Err(NodeError::InvalidOption {
                node: "<t>".into(),
                option: "in_range"
            })
        );
    }

    #[test]
    fn test_redirect_rules() {
        let target = CommandNode::literal("target").then(CommandNode::literal("leaf"));
        let node = CommandNode::literal("alias")
            .redirects(target.clone())
            .then(CommandNode::literal("extra"));
        assert_eq!(
            node.validate(),
            Err(NodeError::ChildOnRedirected("alias".into()))
        );

        let node = CommandNode::literal("alias")
            .then(CommandNode::literal("child"))
            .redirects(target);
        assert_eq!(
            node.validate(),
            Err(NodeError::RedirectWithChildren("alias".into()))
        );
    }

    #[test]
    fn test_in_range_applies_to_numbers() {
        let node = CommandNode::integer("n").in_range(1, 10);
        assert!(node.validate().is_ok());
        assert_eq!(node.name(), "<n>");
        assert!(node.parse("10").is_ok());
        assert!(matches!(
            node.parse("11"),
            Err(ParseFailure::OutOfRange { .. })
        ));
        assert!(CommandNode::quotable_text("q").allow_empty().validate().is_ok());
        assert!(CommandNode::integer("n").allow_empty().validate().is_err());
    }
}
