use std::io::{self, BufRead};

use anyhow::Context;
use codeupdate_core::UpdateError;
use codeupdate_installer::{Interrupt, ProcessSnapshot, ShutdownChoice, ShutdownGate};
use console::Term;

/// Invalid answers tolerated before a menu gives up.
pub(crate) const MAX_INVALID_ANSWERS: u32 = 3;

/// Questions the orchestrator may put to the user.
pub(crate) trait Prompter {
    fn choose_shutdown(
        &mut self,
        process_name: &str,
        snapshot: &ProcessSnapshot,
    ) -> Result<ShutdownChoice, UpdateError>;

    fn confirm(&mut self, question: &str) -> Result<bool, UpdateError>;
}

/// Lets a [`Prompter`] drive the shutdown controller.
pub(crate) struct PromptGate<'a> {
    prompter: &'a mut dyn Prompter,
}

impl<'a> PromptGate<'a> {
    pub(crate) fn new(prompter: &'a mut dyn Prompter) -> Self {
        Self { prompter }
    }
}

impl ShutdownGate for PromptGate<'_> {
    fn choose(
        &mut self,
        process_name: &str,
        snapshot: &ProcessSnapshot,
    ) -> Result<ShutdownChoice, UpdateError> {
        self.prompter.choose_shutdown(process_name, snapshot)
    }
}

/// Never asks; used for unattended runs where no terminal is expected.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UnattendedPrompter;

impl Prompter for UnattendedPrompter {
    fn choose_shutdown(
        &mut self,
        _process_name: &str,
        _snapshot: &ProcessSnapshot,
    ) -> Result<ShutdownChoice, UpdateError> {
        Ok(ShutdownChoice::AutoClose)
    }

    fn confirm(&mut self, question: &str) -> Result<bool, UpdateError> {
        Err(UpdateError::Aborted(format!(
            "cannot ask '{question}' in unattended mode"
        )))
    }
}

pub(crate) trait LineSource {
    /// Shows `prompt` and reads one line. `Ok(None)` means input is closed.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;

    fn notice(&mut self, message: &str) -> io::Result<()>;
}

pub(crate) struct TermLines {
    term: Term,
}

impl TermLines {
    pub(crate) fn stderr() -> Self {
        Self {
            term: Term::stderr(),
        }
    }
}

impl LineSource for TermLines {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.term.write_str(prompt)?;
        self.term.flush()?;
        if self.term.is_term() {
            return self.term.read_line().map(Some);
        }

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn notice(&mut self, message: &str) -> io::Result<()> {
        self.term.write_line(message)
    }
}

pub(crate) struct InteractivePrompter<S> {
    lines: S,
    interrupt: Interrupt,
}

impl<S: LineSource> InteractivePrompter<S> {
    pub(crate) fn new(lines: S, interrupt: Interrupt) -> Self {
        Self { lines, interrupt }
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> S {
        self.lines
    }

    fn ask<T>(
        &mut self,
        prompt: &str,
        help: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, UpdateError> {
        for _ in 0..MAX_INVALID_ANSWERS {
            self.interrupt.check()?;
            let answer = self.lines.read_line(prompt);
            self.interrupt.check()?;
            let answer = match answer {
                Ok(answer) => answer,
                // Ctrl-C during a raw-mode read comes back as `Interrupted`.
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    return Err(UpdateError::Interrupted);
                }
                Err(err) => {
                    return Err(anyhow::Error::from(err)
                        .context("failed to read answer from terminal")
                        .into());
                }
            };

            let Some(answer) = answer else {
                return Err(UpdateError::Aborted(
                    "input closed before an answer was given".to_string(),
                ));
            };
            if let Some(choice) = parse(answer.trim()) {
                return Ok(choice);
            }
            self.lines
                .notice(help)
                .context("failed to write to terminal")?;
        }

        Err(UpdateError::Aborted(format!(
            "no valid answer after {MAX_INVALID_ANSWERS} attempts"
        )))
    }
}

impl<S: LineSource> Prompter for InteractivePrompter<S> {
    fn choose_shutdown(
        &mut self,
        process_name: &str,
        snapshot: &ProcessSnapshot,
    ) -> Result<ShutdownChoice, UpdateError> {
        let prompt = format!(
            "{process_name} is running ({} process(es)). [c] close it now, [r] re-check after closing it yourself, [a] abort: ",
            snapshot.len()
        );
        self.ask(&prompt, "please answer c, r or a", parse_shutdown_choice)
    }

    fn confirm(&mut self, question: &str) -> Result<bool, UpdateError> {
        let prompt = format!("{question} [y/n]: ");
        self.ask(&prompt, "please answer y or n", parse_yes_no)
    }
}

pub(crate) fn parse_shutdown_choice(answer: &str) -> Option<ShutdownChoice> {
    match answer.to_ascii_lowercase().as_str() {
        "c" | "close" => Some(ShutdownChoice::AutoClose),
        "r" | "retry" | "recheck" | "re-check" => Some(ShutdownChoice::RetryCheck),
        "a" | "abort" => Some(ShutdownChoice::Abort),
        _ => None,
    }
}

pub(crate) fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
