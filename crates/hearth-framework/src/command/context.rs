use std::collections::HashMap;

use hearth_core::CommandSource;

use super::argument::ArgumentValue;

/// What an executor receives: the invoker, the full command text and the
/// parsed arguments keyed by node name.
#[derive(Debug, Clone)]
pub struct CommandContext {
    source: CommandSource,
    command: String,
    args: HashMap<String, ArgumentValue>,
}

impl CommandContext {
    pub fn new(
        source: CommandSource,
        command: impl Into<String>,
        args: HashMap<String, ArgumentValue>,
    ) -> Self {
        Self {
            source,
            command: command.into(),
            args,
        }
    }

    pub fn source(&self) -> &CommandSource {
        &self.source
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn get(&self, name: &str) -> Option<&ArgumentValue> {
        self.args.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ArgumentValue::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ArgumentValue::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ArgumentValue::as_str)
    }

    pub fn args(&self) -> &HashMap<String, ArgumentValue> {
        &self.args
    }

    /// Replies to the invoker.
    pub fn reply(&self, text: impl Into<String>) {
        self.source.reply(text);
    }
}
