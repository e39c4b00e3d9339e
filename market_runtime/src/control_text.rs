use thiserror::Error;

/// Commands accepted on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Shut the whole simulation down.
    End,
    /// Snapshot of `price;temperature;cloudCover`.
    Report,
    /// Release one turn when the pacer runs in manual mode.
    Next,
}

impl ControlCommand {
    pub const fn verb(self) -> &'static str {
        match self {
            ControlCommand::End => "end",
            ControlCommand::Report => "report",
            ControlCommand::Next => "next",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unexpected argument '{argument}' for {verb}")]
    UnexpectedArgument {
        verb: &'static str,
        argument: String,
    },
}

pub fn parse_control_line(input: &str) -> Result<ControlCommand, ControlParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ControlParseError::Empty);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .map(|v| v.to_ascii_lowercase())
        .ok_or(ControlParseError::Empty)?;

    let command = match verb.as_str() {
        "end" => ControlCommand::End,
        "report" => ControlCommand::Report,
        "next" => ControlCommand::Next,
        other => return Err(ControlParseError::UnknownCommand(other.to_string())),
    };

    if let Some(argument) = parts.next() {
        return Err(ControlParseError::UnexpectedArgument {
            verb: command.verb(),
            argument: argument.to_string(),
        });
    }

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_verbs() {
        assert_eq!(parse_control_line("end"), Ok(ControlCommand::End));
        assert_eq!(parse_control_line("  REPORT\n"), Ok(ControlCommand::Report));
        assert_eq!(parse_control_line("next"), Ok(ControlCommand::Next));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(parse_control_line(""), Err(ControlParseError::Empty));
        assert_eq!(
            parse_control_line("turn 3"),
            Err(ControlParseError::UnknownCommand("turn".to_string()))
        );
        assert_eq!(
            parse_control_line("end now"),
            Err(ControlParseError::UnexpectedArgument {
                verb: "end",
                argument: "now".to_string(),
            })
        );
    }
}
