//! The fixed whitelist of file-operation verbs.

use serde::Serialize;

/// A whitelisted file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    List,
    Read,
    Write,
    Append,
    Copy,
    Move,
    Remove,
    Rename,
    MakeDirectory,
    NewItem,
    Stat,
}

/// Every accepted spelling, lowercase. Short names plus the PowerShell cmdlet
/// names agents tend to reach for.
const ALIASES: &[(&str, Verb)] = &[
    ("ls", Verb::List),
    ("list", Verb::List),
    ("dir", Verb::List),
    ("get-childitem", Verb::List),
    ("cat", Verb::Read),
    ("read", Verb::Read),
    ("get-content", Verb::Read),
    ("write", Verb::Write),
    ("set-content", Verb::Write),
    ("append", Verb::Append),
    ("add-content", Verb::Append),
    ("cp", Verb::Copy),
    ("copy", Verb::Copy),
    ("copy-item", Verb::Copy),
    ("mv", Verb::Move),
    ("move", Verb::Move),
    ("move-item", Verb::Move),
    ("rm", Verb::Remove),
    ("del", Verb::Remove),
    ("delete", Verb::Remove),
    ("remove-item", Verb::Remove),
    ("rename", Verb::Rename),
    ("rename-item", Verb::Rename),
    ("mkdir", Verb::MakeDirectory),
    ("new-item", Verb::NewItem),
    ("stat", Verb::Stat),
    ("test-path", Verb::Stat),
];

impl Verb {
    /// Look up a verb token case-insensitively. `None` means "not allowed".
    pub fn parse(token: &str) -> Option<Self> {
        let lowered = token.to_ascii_lowercase();
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map(|(_, verb)| *verb)
    }

    /// Canonical short name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::List => "ls",
            Self::Read => "cat",
            Self::Write => "write",
            Self::Append => "append",
            Self::Copy => "cp",
            Self::Move => "mv",
            Self::Remove => "rm",
            Self::Rename => "rename",
            Self::MakeDirectory => "mkdir",
            Self::NewItem => "new-item",
            Self::Stat => "stat",
        }
    }

    /// Whether the verb can change the filesystem.
    pub fn mutates(self) -> bool {
        !matches!(self, Self::List | Self::Read | Self::Stat)
    }
}

/// All accepted spellings, for help text and error messages.
pub fn allowed_spellings() -> impl Iterator<Item = &'static str> {
    ALIASES.iter().map(|(alias, _)| *alias)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Verb::parse("Get-ChildItem"), Some(Verb::List));
        assert_eq!(Verb::parse("REMOVE-ITEM"), Some(Verb::Remove));
        assert_eq!(Verb::parse("Cp"), Some(Verb::Copy));
    }

    #[test]
    fn unknown_verbs_are_not_allowed() {
        for verb in ["curl", "bash", "python", "Invoke-Expression", "chmod", ""] {
            assert_eq!(Verb::parse(verb), None, "{verb}");
        }
    }

    #[test]
    fn read_only_verbs_do_not_mutate() {
        assert!(!Verb::List.mutates());
        assert!(!Verb::Stat.mutates());
        assert!(Verb::Write.mutates());
    }

    #[test]
    fn every_alias_round_trips_to_a_verb() {
        for alias in allowed_spellings() {
            assert!(Verb::parse(alias).is_some(), "{alias}");
        }
    }
}
