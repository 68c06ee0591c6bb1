//! Help messages registered by plugins.

use std::cmp::Ordering;

use hearth_core::PermissionLevel;

/// One help entry: a command prefix and what it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpMessage {
    pub plugin: String,
    pub prefix: String,
    pub message: String,
    /// Minimum level that sees this entry.
    pub permission: PermissionLevel,
}

impl HelpMessage {
    /// Sort key: the prefix with its first letter upper-cased.
    fn sort_key(&self) -> String {
        let mut chars = self.prefix.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    fn cmp_by_prefix(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.plugin.cmp(&other.plugin))
    }
}

/// Keeps the entries visible to `level` and sorts them by prefix.
pub fn visible_help(
    messages: impl IntoIterator<Item = HelpMessage>,
    level: PermissionLevel,
) -> Vec<HelpMessage> {
    let mut visible: Vec<HelpMessage> = messages
        .into_iter()
        .filter(|m| m.permission <= level)
        .collect();
    visible.sort_by(HelpMessage::cmp_by_prefix);
    visible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn help(prefix: &str, permission: PermissionLevel) -> HelpMessage {
        HelpMessage {
            plugin: "p".into(),
            prefix: prefix.into(),
            message: format!("about {prefix}"),
            permission,
        }
    }

    #[test]
    fn test_sorted_and_filtered() {
        let messages = vec![
            help("zeta", PermissionLevel::User),
            help("!!backup", PermissionLevel::Admin),
            help("alpha", PermissionLevel::User),
            help("Beta", PermissionLevel::Guest),
        ];

        let user: Vec<String> = visible_help(messages.clone(), PermissionLevel::User)
            .into_iter()
            .map(|m| m.prefix)
            .collect();
        assert_eq!(user, vec!["alpha", "Beta", "zeta"]);

        let admin = visible_help(messages, PermissionLevel::Admin);
        assert_eq!(admin.len(), 4);
        assert_eq!(admin[0].prefix, "!!backup");
    }
}
