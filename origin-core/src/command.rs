//! In-chat operator commands.
//!
//! Outbound chat that starts with the command prefix never reaches the
//! server; it is decoded once into a [`Command`].

use thiserror::Error;

/// Errors from decoding a chat command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("no {argument} provided for :{command} command")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
}

/// A decoded chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `copy <username>`: wear the user's outfit.
    Copy { username: String },
    /// `follow <username>`: set the follow/mimic target.
    Follow { username: String },
    FollowOn,
    FollowOff,
    MimicOn,
    MimicOff,
}

impl Command {
    /// Decode the text after the prefix. Words past the required arity are
    /// ignored.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let mut words = text.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?;

        let mut username = |command: &'static str| {
            words
                .next()
                .map(str::to_string)
                .ok_or(CommandError::MissingArgument {
                    command,
                    argument: "username",
                })
        };

        match verb {
            "copy" => Ok(Command::Copy {
                username: username("copy")?,
            }),
            "follow" => Ok(Command::Follow {
                username: username("follow")?,
            }),
            "followon" => Ok(Command::FollowOn),
            "followoff" => Ok(Command::FollowOff),
            "mimicon" => Ok(Command::MimicOn),
            "mimicoff" => Ok(Command::MimicOff),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// Strip `prefix` and decode. `None` when the text is ordinary chat.
    pub fn from_chat(text: &str, prefix: char) -> Option<Result<Self, CommandError>> {
        text.strip_prefix(prefix).map(Self::parse)
    }
}
