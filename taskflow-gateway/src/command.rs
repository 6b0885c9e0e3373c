//! Typed file commands parsed from a token vector.
//!
//! Operands may be given positionally (`cp a b`) or with PowerShell-style
//! named parameters (`Copy-Item -Path a -Destination b`). Paths are kept as
//! raw strings here; [`crate::containment`] resolves them.

use std::collections::VecDeque;

use crate::error::SecurityError;
use crate::verbs::Verb;

/// A parsed file operation, generic over its path representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCommand<P = String> {
    List { path: P },
    Read { path: P },
    Write { path: P, value: String, append: bool },
    Copy { from: P, to: P, recurse: bool, force: bool },
    Move { from: P, to: P, force: bool },
    Remove { path: P, recurse: bool },
    Rename { path: P, new_name: String, force: bool },
    CreateDirectory { path: P },
    CreateFile { path: P, value: String, force: bool },
    Stat { path: P },
}

impl<P> FileCommand<P> {
    /// Convert every path operand, stopping at the first error.
    pub fn try_map_paths<Q, E>(
        self,
        mut f: impl FnMut(P) -> Result<Q, E>,
    ) -> Result<FileCommand<Q>, E> {
        Ok(match self {
            Self::List { path } => FileCommand::List { path: f(path)? },
            Self::Read { path } => FileCommand::Read { path: f(path)? },
            Self::Write {
                path,
                value,
                append,
            } => FileCommand::Write {
                path: f(path)?,
                value,
                append,
            },
            Self::Copy {
                from,
                to,
                recurse,
                force,
            } => FileCommand::Copy {
                from: f(from)?,
                to: f(to)?,
                recurse,
                force,
            },
            Self::Move { from, to, force } => FileCommand::Move {
                from: f(from)?,
                to: f(to)?,
                force,
            },
            Self::Remove { path, recurse } => FileCommand::Remove {
                path: f(path)?,
                recurse,
            },
            Self::Rename {
                path,
                new_name,
                force,
            } => FileCommand::Rename {
                path: f(path)?,
                new_name,
                force,
            },
            Self::CreateDirectory { path } => FileCommand::CreateDirectory { path: f(path)? },
            Self::CreateFile { path, value, force } => FileCommand::CreateFile {
                path: f(path)?,
                value,
                force,
            },
            Self::Stat { path } => FileCommand::Stat { path: f(path)? },
        })
    }
}

#[derive(Debug, Default)]
struct Args {
    positional: VecDeque<String>,
    path: Option<String>,
    destination: Option<String>,
    value: Option<String>,
    new_name: Option<String>,
    item_type: Option<String>,
    force: bool,
    recurse: bool,
}

impl Args {
    fn parse(tokens: &[String]) -> Result<Self, SecurityError> {
        let mut args = Self::default();
        let mut options_done = false;
        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            if options_done || !is_flag(token) {
                args.positional.push_back(token.clone());
                continue;
            }
            if token == "--" {
                options_done = true;
                continue;
            }
            let name = token.trim_start_matches('-').to_ascii_lowercase();
            let mut value_for = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| SecurityError::Malformed(format!("{flag} requires a value")))
            };
            match name.as_str() {
                "path" | "literalpath" => args.path = Some(value_for(token)?),
                "destination" | "dest" => args.destination = Some(value_for(token)?),
                "value" => args.value = Some(value_for(token)?),
                "newname" => args.new_name = Some(value_for(token)?),
                "itemtype" | "type" => args.item_type = Some(value_for(token)?),
                "force" | "f" => args.force = true,
                "recurse" | "r" => args.recurse = true,
                "rf" | "fr" => {
                    args.force = true;
                    args.recurse = true;
                }
                _ => {
                    return Err(SecurityError::Malformed(format!(
                        "unknown parameter {token}"
                    )));
                }
            }
        }
        Ok(args)
    }

    fn take_path(&mut self, what: &str) -> Result<String, SecurityError> {
        self.path
            .take()
            .or_else(|| self.positional.pop_front())
            .ok_or_else(|| SecurityError::Malformed(format!("missing {what}")))
    }

    fn take_destination(&mut self) -> Result<String, SecurityError> {
        self.destination
            .take()
            .or_else(|| self.positional.pop_front())
            .ok_or_else(|| SecurityError::Malformed("missing destination".to_string()))
    }

    fn take_value(&mut self) -> String {
        match self.value.take() {
            Some(value) => value,
            None => self.positional.drain(..).collect::<Vec<_>>().join(" "),
        }
    }

    fn finish(self, verb: Verb) -> Result<(), SecurityError> {
        match self.positional.front() {
            Some(extra) => Err(SecurityError::Malformed(format!(
                "unexpected argument '{extra}' for {}",
                verb.name()
            ))),
            None => Ok(()),
        }
    }
}

// `-5` and `-` are data, `-Path` and `--` are flags.
fn is_flag(token: &str) -> bool {
    if token == "--" {
        return true;
    }
    let body = token.trim_start_matches('-');
    token.starts_with('-')
        && token.len() - body.len() <= 2
        && body.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// Parse tokens (verb first) into a [`FileCommand`].
///
/// Verbs off the whitelist yield [`SecurityError::VerbNotAllowed`].
pub fn parse(tokens: &[String]) -> Result<(Verb, FileCommand), SecurityError> {
    let (verb_token, rest) = tokens.split_first().ok_or(SecurityError::EmptyCommand)?;
    let verb =
        Verb::parse(verb_token).ok_or_else(|| SecurityError::VerbNotAllowed(verb_token.clone()))?;
    let mut args = Args::parse(rest)?;

    let command = match verb {
        Verb::List => {
            let path = args
                .path
                .take()
                .or_else(|| args.positional.pop_front())
                .unwrap_or_else(|| ".".to_string());
            FileCommand::List { path }
        }
        Verb::Read => FileCommand::Read {
            path: args.take_path("path")?,
        },
        Verb::Stat => FileCommand::Stat {
            path: args.take_path("path")?,
        },
        Verb::Write | Verb::Append => {
            let path = args.take_path("path")?;
            let value = args.take_value();
            FileCommand::Write {
                path,
                value,
                append: verb == Verb::Append,
            }
        }
        Verb::Copy => FileCommand::Copy {
            from: args.take_path("source")?,
            to: args.take_destination()?,
            recurse: args.recurse,
            force: args.force,
        },
        Verb::Move => FileCommand::Move {
            from: args.take_path("source")?,
            to: args.take_destination()?,
            force: args.force,
        },
        Verb::Remove => FileCommand::Remove {
            path: args.take_path("path")?,
            recurse: args.recurse,
        },
        Verb::Rename => {
            let path = args.take_path("path")?;
            let new_name = args
                .new_name
                .take()
                .or_else(|| args.positional.pop_front())
                .ok_or_else(|| SecurityError::Malformed("missing new name".to_string()))?;
            if new_name.is_empty()
                || new_name == "."
                || new_name == ".."
                || new_name.contains(['/', '\\'])
            {
                return Err(SecurityError::Malformed(format!(
                    "new name '{new_name}' must be a plain file name"
                )));
            }
            FileCommand::Rename {
                path,
                new_name,
                force: args.force,
            }
        }
        Verb::MakeDirectory => FileCommand::CreateDirectory {
            path: args.take_path("path")?,
        },
        Verb::NewItem => {
            let item_type = args.item_type.take().map(|t| t.to_ascii_lowercase());
            let path = args.take_path("path")?;
            match item_type.as_deref() {
                Some("directory") => FileCommand::CreateDirectory { path },
                Some("file") | None => FileCommand::CreateFile {
                    value: args.take_value(),
                    path,
                    force: args.force,
                },
                Some(other) => {
                    return Err(SecurityError::Malformed(format!(
                        "unsupported item type '{other}'"
                    )));
                }
            }
        }
    };
    args.finish(verb)?;
    Ok((verb, command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::tokenize;

    fn parse_line(line: &str) -> Result<(Verb, FileCommand), SecurityError> {
        parse(&tokenize(line).expect("tokenize"))
    }

    #[test]
    fn list_defaults_to_current_directory() {
        let (verb, cmd) = parse_line("ls").expect("parse");
        assert_eq!(verb, Verb::List);
        assert_eq!(
            cmd,
            FileCommand::List {
                path: ".".to_string()
            }
        );
    }

    #[test]
    fn named_and_positional_forms_agree() {
        let positional = parse_line("cp a.txt b.txt").expect("parse").1;
        let named = parse_line("Copy-Item -Path a.txt -Destination b.txt")
            .expect("parse")
            .1;
        assert_eq!(positional, named);
    }

    #[test]
    fn write_joins_remaining_words() {
        let (_, cmd) = parse_line("write notes.txt hello world").expect("parse");
        assert_eq!(
            cmd,
            FileCommand::Write {
                path: "notes.txt".to_string(),
                value: "hello world".to_string(),
                append: false,
            }
        );
    }

    #[test]
    fn set_content_takes_value_parameter() {
        let (_, cmd) =
            parse_line("Set-Content -Path 'out.md' -Value '# Title'").expect("parse");
        assert_eq!(
            cmd,
            FileCommand::Write {
                path: "out.md".to_string(),
                value: "# Title".to_string(),
                append: false,
            }
        );
    }

    #[test]
    fn new_item_directory_maps_to_create_directory() {
        let (_, cmd) = parse_line("New-Item -ItemType Directory -Path reports").expect("parse");
        assert_eq!(
            cmd,
            FileCommand::CreateDirectory {
                path: "reports".to_string()
            }
        );
    }

    #[test]
    fn remove_flags_are_recognised() {
        let (_, cmd) = parse_line("Remove-Item -Recurse -Force build").expect("parse");
        assert_eq!(
            cmd,
            FileCommand::Remove {
                path: "build".to_string(),
                recurse: true,
            }
        );
        let (_, cmd) = parse_line("rm -rf build").expect("parse");
        assert!(matches!(cmd, FileCommand::Remove { recurse: true, .. }));
    }

    #[test]
    fn double_dash_ends_options() {
        let (_, cmd) = parse_line("cat -- -weird.txt").expect("parse");
        assert_eq!(
            cmd,
            FileCommand::Read {
                path: "-weird.txt".to_string()
            }
        );
    }

    #[test]
    fn negative_numbers_are_values() {
        let (_, cmd) = parse_line("write n.txt -5").expect("parse");
        assert!(matches!(cmd, FileCommand::Write { ref value, .. } if value == "-5"));
    }

    #[test]
    fn rejects_unknown_verb_and_parameters() {
        assert_eq!(
            parse_line("curl http://x").unwrap_err(),
            SecurityError::VerbNotAllowed("curl".to_string())
        );
        assert!(matches!(
            parse_line("cat -Encoding utf8 a.txt").unwrap_err(),
            SecurityError::Malformed(_)
        ));
    }

    #[test]
    fn rejects_missing_and_extra_operands() {
        assert!(matches!(
            parse_line("cp a.txt").unwrap_err(),
            SecurityError::Malformed(_)
        ));
        assert!(matches!(
            parse_line("cat a.txt b.txt").unwrap_err(),
            SecurityError::Malformed(_)
        ));
    }

    #[test]
    fn rename_requires_plain_name() {
        assert!(matches!(
            parse_line("rename a.txt ../b.txt").unwrap_err(),
            SecurityError::Malformed(_)
        ));
        assert!(parse_line("Rename-Item -Path a.txt -NewName b.txt").is_ok());
    }

    #[test]
    fn empty_tokens_are_empty_command() {
        assert_eq!(parse(&[]).unwrap_err(), SecurityError::EmptyCommand);
    }
}
