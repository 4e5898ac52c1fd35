//! Command line parsing for the session worker.

use crate::lines::parse_line_number;

pub const COMMAND_NAMES: &str =
    "help, list, readF, writeT, upload, download, archServer, quit, killServer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help(Option<String>),
    List,
    ReadFile { file: String, line: Option<usize> },
    /// `line == None` appends.
    WriteText {
        file: String,
        line: Option<usize>,
        text: String,
    },
    Upload(String),
    Download(String),
    ArchServer(String),
    Quit,
    KillServer,
}

/// Rejections that go back to the client as plain reply text.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command.")]
    Empty,
    #[error("The required number of arguments has been exceeded.")]
    Arity,
    #[error("{0}")]
    BadLine(&'static str),
    #[error("Unknown command \"{0}\". Available commands are: {}", COMMAND_NAMES)]
    Unknown(String),
}

/// Splits off the first whitespace-delimited token.
fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((&input[..end], &input[end..]))
}

fn check_arity(count: usize, allowed: &[usize]) -> Result<(), CommandError> {
    if allowed.contains(&count) {
        Ok(())
    } else {
        Err(CommandError::Arity)
    }
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let line = line.trim_end_matches(['\r', '\n', '\0']);
        let (name, rest) = next_token(line).ok_or(CommandError::Empty)?;
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match name {
            "help" => {
                check_arity(args.len(), &[0, 1])?;
                Command::Help(args.first().map(|s| s.to_string()))
            }
            "list" => {
                check_arity(args.len(), &[0])?;
                Command::List
            }
            "readF" => {
                check_arity(args.len(), &[1, 2])?;
                let line = match args.get(1) {
                    Some(raw) => Some(parse_line_number(raw).map_err(CommandError::BadLine)?),
                    None => None,
                };
                Command::ReadFile {
                    file: args[0].to_string(),
                    line,
                }
            }
            "writeT" => match args.len() {
                0 | 1 => return Err(CommandError::Arity),
                2 => Command::WriteText {
                    file: args[0].to_string(),
                    line: None,
                    text: args[1].to_string(),
                },
                _ => {
                    let line = parse_line_number(args[1]).map_err(CommandError::BadLine)?;
                    // Text keeps its inner spacing: everything after the line number.
                    let (_, after_file) = next_token(rest).ok_or(CommandError::Arity)?;
                    let (_, after_line) = next_token(after_file).ok_or(CommandError::Arity)?;
                    Command::WriteText {
                        file: args[0].to_string(),
                        line: Some(line),
                        text: after_line.trim().to_string(),
                    }
                }
            },
            "upload" => {
                check_arity(args.len(), &[1])?;
                Command::Upload(args[0].to_string())
            }
            "download" => {
                check_arity(args.len(), &[1])?;
                Command::Download(args[0].to_string())
            }
            "archServer" => {
                check_arity(args.len(), &[1])?;
                Command::ArchServer(args[0].to_string())
            }
            "quit" => {
                check_arity(args.len(), &[0])?;
                Command::Quit
            }
            "killServer" => {
                check_arity(args.len(), &[0])?;
                Command::KillServer
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

pub fn help_text(topic: Option<&str>) -> String {
    let Some(topic) = topic else {
        return format!("Available commands are:\n{COMMAND_NAMES}\n");
    };
    let usage = match topic {
        "help" => "help [command]\n\tlist the commands, or show how <command> is used",
        "list" => "list\n\tshow the files in the server directory",
        "readF" => {
            "readF <file> [line #]\n\tshow line # of <file>, or the whole file when no line is given"
        }
        "writeT" => {
            "writeT <file> [line #] <text>\n\twrite <text> as line # of <file>, or append it\n\twhen no line is given; <file> is created if missing"
        }
        "upload" => "upload <file>\n\tcopy <file> from the client directory to the server",
        "download" => "download <file>\n\tcopy <file> from the server to the client directory",
        "archServer" => {
            "archServer <name>.tar\n\tcollect every server file into <name>.tar in the client directory"
        }
        "quit" => "quit\n\tclose this session",
        "killServer" => "killServer\n\tshut the server and every session down",
        other => return format!("No help for \"{other}\". Available commands are:\n{COMMAND_NAMES}\n"),
    };
    format!("{usage}\n")
}
