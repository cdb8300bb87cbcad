use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use vmbundle_fs::FsError;

use crate::host::Host;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("failed to read answer: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write prompt: {0}")]
    Write(#[source] std::io::Error),

    #[error("input closed while waiting for an answer to {question:?}")]
    EndOfInput { question: String },

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Asks the operator questions, one line per answer.
#[async_trait]
pub trait Prompter: Send {
    /// Show `question` and return the trimmed answer.
    async fn ask(&mut self, question: &str) -> Result<String, PromptError>;

    /// Show a message that needs no answer.
    async fn tell(&mut self, message: &str) -> Result<(), PromptError>;
}

pub struct StdioPrompter {
    stdin: Lines<BufReader<Stdin>>,
    stdout: Stdout,
}

impl StdioPrompter {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()).lines(),
            stdout: tokio::io::stdout(),
        }
    }

    async fn write(&mut self, text: &str) -> Result<(), PromptError> {
        self.stdout
            .write_all(text.as_bytes())
            .await
            .map_err(PromptError::Write)?;
        self.stdout.flush().await.map_err(PromptError::Write)
    }
}

impl Default for StdioPrompter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prompter for StdioPrompter {
    async fn ask(&mut self, question: &str) -> Result<String, PromptError> {
        self.write(&format!("\n{question}")).await?;
        match self.stdin.next_line().await.map_err(PromptError::Read)? {
            Some(line) => Ok(line.trim().to_owned()),
            None => Err(PromptError::EndOfInput {
                question: question.to_owned(),
            }),
        }
    }

    async fn tell(&mut self, message: &str) -> Result<(), PromptError> {
        self.write(&format!("{message}\n")).await
    }
}

/// `<label> (<default>): `, falling back to `default` on an empty answer.
pub async fn ask_with_default(
    prompter: &mut dyn Prompter,
    label: &str,
    default: &str,
) -> Result<String, PromptError> {
    let answer = prompter.ask(&format!("{label} ({default}): ")).await?;
    if answer.is_empty() {
        Ok(default.to_owned())
    } else {
        Ok(answer)
    }
}

/// Ask until the answer is empty or names an existing path. There is no retry
/// limit; only closed input ends the loop early.
pub async fn ask_existing_path(
    prompter: &mut dyn Prompter,
    host: &dyn Host,
    question: &str,
) -> Result<Option<PathBuf>, PromptError> {
    loop {
        let answer = prompter.ask(question).await?;
        if answer.is_empty() {
            return Ok(None);
        }
        let path = PathBuf::from(&answer);
        if host.path_exists(&path).await? {
            return Ok(Some(path));
        }
        prompter.tell(&format!("{answer} does not exist")).await?;
    }
}

/// `y`/`yes` and `n`/`no` in any case; anything else means `default`.
pub async fn ask_yes_no(
    prompter: &mut dyn Prompter,
    question: &str,
    default: bool,
) -> Result<bool, PromptError> {
    let answer = prompter.ask(question).await?;
    Ok(match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    })
}
