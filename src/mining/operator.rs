//! The person (or script) answering configuration questions.

use crate::error::{MinerError, Result};
use crate::mining::config::MiningStrategy;

use console::{Term, style};
use std::str::FromStr;

/// Answers the questions asked while a session is being configured.
///
/// Only consulted before the first cycle. An `Err` or a "no" ends the session
/// with `ConfigurationCancelled`.
pub trait Operator {
    fn confirm(&self, prompt: &str) -> Result<bool>;

    /// Strategy for the whole session.
    fn strategy(&self) -> Result<MiningStrategy>;
}

/// Approves everything and hands back a fixed strategy. Used with `--yes`.
pub struct PresetOperator {
    strategy: Option<MiningStrategy>,
}

impl PresetOperator {
    pub fn new(strategy: Option<MiningStrategy>) -> Self {
        Self { strategy }
    }
}

impl Operator for PresetOperator {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }

    fn strategy(&self) -> Result<MiningStrategy> {
        self.strategy.ok_or_else(|| {
            MinerError::InvalidConfig("strategy commit selected but no [strategy] configured".into())
        })
    }
}

/// Prompts on the terminal.
///
/// A strategy from the settings file is offered for confirmation; without one
/// each field is asked for in turn.
pub struct ConsoleOperator {
    term: Term,
    strategy: Option<MiningStrategy>,
}

impl ConsoleOperator {
    pub fn new(strategy: Option<MiningStrategy>) -> Self {
        Self::with_term(Term::stderr(), strategy)
    }

    pub fn with_term(term: Term, strategy: Option<MiningStrategy>) -> Self {
        Self { term, strategy }
    }

    /// Fails when nobody can answer; `Term::read_line` returns `""` off a tty.
    fn read_line(&self, prompt: &str) -> Result<String> {
        if !self.term.is_term() {
            return Err(MinerError::ConfigurationCancelled(
                "no terminal attached, use --yes".to_string(),
            ));
        }
        self.term
            .write_str(&format!("{} {} ", style("?").cyan().bold(), prompt))
            .and_then(|_| self.term.read_line())
            .map(|line| line.trim().to_string())
            .map_err(|e| MinerError::ConfigurationCancelled(format!("prompt aborted: {}", e)))
    }

    /// Ask until the answer parses and passes `check`.
    fn ask<T: FromStr>(&self, prompt: &str, check: impl Fn(&T) -> bool) -> Result<T> {
        loop {
            let line = self.read_line(prompt)?;
            match line.parse::<T>() {
                Ok(value) if check(&value) => return Ok(value),
                _ => {
                    let _ = self
                        .term
                        .write_line(&format!("{}", style("invalid value, try again").yellow()));
                }
            }
        }
    }
}

impl Operator for ConsoleOperator {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        loop {
            let answer = self.read_line(&format!("{} [y/n]", prompt))?;
            match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => {}
            }
        }
    }

    fn strategy(&self) -> Result<MiningStrategy> {
        if let Some(strategy) = self.strategy {
            return Ok(strategy);
        }
        let strategy = MiningStrategy {
            search_distance: self.ask("Number of blocks to search for strategy (1-100)?", |d: &u32| {
                (1..=100).contains(d)
            })?,
            target_percentage: self.ask("Target percentage of total for each block (1-100)?", |p: &u8| {
                (1..=100).contains(p)
            })?,
            max_commit_per_block: self.ask("Max commit per block in uSTX?", |m: &u64| *m > 0)?,
        };
        strategy.validate()?;
        Ok(strategy)
    }
}
