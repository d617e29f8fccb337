//! The user-interaction channel behind `askUser`.

use async_trait::async_trait;
use std::io::{BufRead, Write};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::UserError;
use crate::types::{AskKind, UserPrompt};

/// Typing this as an answer aborts the running task.
pub const ABORT_ANSWER: &str = "/abort";

/// A blocking prompt/response pair. Implementations suspend until the user
/// answers; the control loop bounds the wait.
#[async_trait]
pub trait UserChannel: Send + Sync {
    async fn ask(&self, prompt: &UserPrompt) -> Result<String, UserError>;
}

/// Interpret one raw answer.
///
/// Returns `Ok(None)` when the answer is not acceptable (an unknown choice)
/// and the question should be asked again.
pub fn resolve_answer(prompt: &UserPrompt, raw: &str) -> Result<Option<String>, UserError> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    let trimmed = raw.trim();

    if trimmed == ABORT_ANSWER {
        return Err(UserError::Aborted);
    }
    if trimmed.is_empty() {
        return Ok(prompt.default.clone().or_else(|| {
            (prompt.kind != AskKind::Choice).then(String::new)
        }));
    }

    match prompt.kind {
        AskKind::Password => Ok(Some(raw.to_string())),
        AskKind::Text => Ok(Some(trimmed.to_string())),
        AskKind::Choice if prompt.choices.is_empty() => Ok(Some(trimmed.to_string())),
        AskKind::Choice => {
            if let Ok(n) = trimmed.parse::<usize>() {
                if let Some(choice) = n.checked_sub(1).and_then(|i| prompt.choices.get(i)) {
                    return Ok(Some(choice.clone()));
                }
            }
            Ok(prompt
                .choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(trimmed))
                .cloned())
        }
    }
}

/// Render a prompt for a terminal.
pub fn render_prompt(prompt: &UserPrompt) -> String {
    let mut text = format!("\n{}\n", prompt.prompt);
    for (i, choice) in prompt.choices.iter().enumerate() {
        text.push_str(&format!("  {}. {}\n", i + 1, choice));
    }
    match &prompt.default {
        Some(default) if prompt.kind != AskKind::Password => {
            text.push_str(&format!("[default: {}] ", default))
        }
        _ => {}
    }
    text.push_str("> ");
    text
}

/// One pending terminal read.
struct LineRequest {
    prompt: String,
    hidden: bool,
    reply: oneshot::Sender<Result<String, UserError>>,
}

/// The terminal's single reader.
///
/// Every read of the terminal, instructions and `askUser` answers alike,
/// goes through one long-lived thread. A caller that stops waiting (the
/// question timed out, the task was cancelled) only drops its reply; a line
/// typed after that is handed to the next caller instead of being lost.
/// Hidden input that nobody waits for any more is discarded.
#[derive(Clone)]
pub struct ConsoleInput {
    requests: mpsc::UnboundedSender<LineRequest>,
}

impl ConsoleInput {
    /// Reads the process's terminal: stdin for lines, no-echo for hidden input.
    pub fn stdin() -> Self {
        Self::with_reader(read_terminal)
    }

    /// Same plumbing over any blocking line source.
    pub fn with_reader<R>(mut read: R) -> Self
    where
        R: FnMut(&str, bool) -> Result<String, UserError> + Send + 'static,
    {
        let (requests, mut pending) = mpsc::unbounded_channel::<LineRequest>();
        std::thread::spawn(move || {
            let mut unclaimed: Option<Result<String, UserError>> = None;
            while let Some(request) = pending.blocking_recv() {
                let line = match unclaimed.take() {
                    Some(line) => line,
                    None => read(&request.prompt, request.hidden),
                };
                if let Err(line) = request.reply.send(line) {
                    if request.hidden {
                        debug!("hidden answer arrived after its question was dropped");
                    } else {
                        unclaimed = Some(line);
                    }
                }
            }
        });
        Self { requests }
    }

    /// Show `prompt` and wait for one line. Dropping the future gives up the
    /// claim on the terminal.
    pub async fn read(&self, prompt: &str, hidden: bool) -> Result<String, UserError> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(LineRequest {
                prompt: prompt.to_string(),
                hidden,
                reply,
            })
            .map_err(|_| UserError::Closed)?;
        answer.await.map_err(|_| UserError::Closed)?
    }
}

fn read_terminal(prompt: &str, hidden: bool) -> Result<String, UserError> {
    if hidden {
        match rpassword::prompt_password(prompt) {
            Ok(secret) => return Ok(secret),
            Err(err) => warn!(error = %err, "no terminal for hidden input, echoing"),
        }
    }
    eprint!("{}", prompt);
    let _ = std::io::stderr().flush();

    let mut line = String::new();
    let read = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| UserError::Io(e.to_string()))?;
    if read == 0 {
        return Err(UserError::Closed);
    }
    Ok(line)
}

/// Asks on the terminal through the shared [`ConsoleInput`]. Passwords are
/// read without echo.
#[derive(Clone)]
pub struct ConsoleChannel {
    input: ConsoleInput,
}

impl ConsoleChannel {
    pub fn new(input: ConsoleInput) -> Self {
        Self { input }
    }
}

#[async_trait]
impl UserChannel for ConsoleChannel {
    async fn ask(&self, prompt: &UserPrompt) -> Result<String, UserError> {
        let rendered = render_prompt(prompt);
        let hidden = prompt.kind == AskKind::Password;
        loop {
            let raw = self.input.read(&rendered, hidden).await?;
            match resolve_answer(prompt, &raw)? {
                Some(answer) => return Ok(answer),
                None => eprintln!("Please pick one of the listed choices."),
            }
        }
    }
}

/// Answers arrive on a channel, e.g. from the web UI. A closed sender is
/// treated as the user walking away.
pub struct QueuedChannel {
    answers: Mutex<mpsc::Receiver<String>>,
}

impl QueuedChannel {
    pub fn new(answers: mpsc::Receiver<String>) -> Self {
        Self {
            answers: Mutex::new(answers),
        }
    }

    /// A channel plus the sender that feeds it.
    pub fn pair(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl UserChannel for QueuedChannel {
    async fn ask(&self, prompt: &UserPrompt) -> Result<String, UserError> {
        let mut answers = self.answers.lock().await;
        loop {
            let raw = answers.recv().await.ok_or(UserError::Closed)?;
            if let Some(answer) = resolve_answer(prompt, &raw)? {
                return Ok(answer);
            }
            warn!("answer does not match any choice, waiting for another");
        }
    }
}
