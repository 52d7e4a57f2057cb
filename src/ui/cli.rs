use std::io::{BufRead, IsTerminal};

use dialoguer::{BasicHistory, Input};
use tracing::trace;

use super::{DebuggerUI, Status};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;

/// Line based user interface on stdin and stdout
///
/// On a terminal, lines are read with a prompt and a history. Otherwise stdin is read line by
/// line without a prompt, so that scripts can drive the debugger. End of input quits.
pub struct CliUi {
    json: bool,
    interactive: bool,
    history: BasicHistory,
}

impl CliUi {
    pub fn build(json: bool) -> Result<Self> {
        Ok(CliUi {
            json,
            interactive: std::io::stdin().is_terminal(),
            history: BasicHistory::new().max_entries(64).no_duplicates(true),
        })
    }

    pub fn show(&self, feedback: &Feedback) {
        if self.json {
            println!("{}", feedback.to_json());
        } else {
            println!("{feedback}");
        }
    }

    /// The next line of input, [None] at end of input
    pub fn get_line(&mut self) -> Result<Option<String>> {
        if !self.interactive {
            let mut buf = String::new();
            let read = std::io::stdin().lock().read_line(&mut buf)?;
            return Ok((read > 0).then_some(buf));
        }

        match Input::<String>::new()
            .with_prompt("tm")
            .allow_empty(true)
            .history_with(&mut self.history)
            .interact_text()
        {
            Ok(line) => Ok(Some(line)),
            Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Splits a command line like a shell would
pub fn parse_line(line: &str) -> Result<Option<Status>> {
    let words = shlex::split(line).ok_or_else(|| DebuggerError::UnknownCommand(line.to_string()))?;
    if words.is_empty() {
        return Ok(None);
    }
    Status::from_words(&words).map(Some)
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: Feedback) -> Result<Status> {
        self.show(&feedback);
        loop {
            let Some(line) = self.get_line()? else {
                trace!("end of input");
                return Ok(Status::DebuggerQuit);
            };
            match parse_line(&line) {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => continue,
                Err(e) => self.show(&Feedback::Error(e)),
            }
        }
    }

    fn report(&mut self, feedback: Feedback) -> Result<()> {
        self.show(&feedback);
        Ok(())
    }
}
