//! Local web UI: submit instructions, watch progress, answer prompts.

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webpilot::AgentEvent;

fn to_sse_event(event: &AgentEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

struct AppState {
    cmd_tx: mpsc::Sender<String>,
    answer_tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
    current: Arc<Mutex<CancellationToken>>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

#[derive(Deserialize)]
struct AnswerPayload {
    answer: String,
}

/// Serve the UI on the first free port from 3000 to 3009. Returns the
/// stream of submitted instructions.
pub async fn start_server(
    event_tx: broadcast::Sender<AgentEvent>,
    answer_tx: mpsc::Sender<String>,
    current: Arc<Mutex<CancellationToken>>,
) -> Result<mpsc::Receiver<String>> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);

    let state = Arc::new(AppState {
        cmd_tx,
        answer_tx,
        event_tx,
        current,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/answer", post(answer_handler))
        .route("/cancel", post(cancel_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for port in 3000..3010 {
        match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                bound = Some((listener, port));
                break;
            }
            Err(err) => debug!(port, error = %err, "port busy"),
        }
    }
    let (listener, port) =
        bound.context("could not bind any port in 3000-3009; is another agent running?")?;

    info!("web UI running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "web UI stopped");
        }
    });

    Ok(cmd_rx)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> StatusCode {
    info!(command = %payload.command, "instruction submitted");
    match state.cmd_tx.try_send(payload.command) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(err) => {
            warn!(error = %err, "instruction rejected");
            StatusCode::CONFLICT
        }
    }
}

async fn answer_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AnswerPayload>,
) -> StatusCode {
    // The answer may be a password; it is not logged.
    debug!("answer submitted");
    match state.answer_tx.send(payload.answer).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::GONE,
    }
}

async fn cancel_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    info!("cancel requested from the UI");
    state
        .current
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .cancel();
    StatusCode::ACCEPTED
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>webpilot</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 24px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 {
    font-size: 20px;
    font-weight: 600;
    color: #fff;
  }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #22c55e;
    animation: pulse 2s infinite;
  }
  header .dot.busy { background: #f59e0b; }
  @keyframes pulse {
    0%, 100% { opacity: 1; }
    50% { opacity: 0.4; }
  }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 800px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 16px;
    overflow: hidden;
  }
  #log {
    flex: 1;
    overflow-y: auto;
    display: flex;
    flex-direction: column;
    gap: 8px;
    padding-right: 8px;
  }
  #log::-webkit-scrollbar { width: 6px; }
  #log::-webkit-scrollbar-track { background: transparent; }
  #log::-webkit-scrollbar-thumb { background: #333; border-radius: 3px; }
  .entry {
    padding: 10px 14px;
    border-radius: 8px;
    font-size: 14px;
    line-height: 1.5;
    animation: fadeIn 0.2s ease;
  }
  @keyframes fadeIn { from { opacity: 0; transform: translateY(4px); } to { opacity: 1; } }
  .entry.user {
    background: #1a1a2e;
    border-left: 3px solid #6366f1;
  }
  .entry.step {
    background: #111118;
    border-left: 3px solid #3b82f6;
    font-family: 'Cascadia Code', 'Fira Code', monospace;
    font-size: 13px;
  }
  .entry.step .num {
    color: #6366f1;
    font-weight: 700;
    margin-right: 8px;
  }
  .entry.error {
    background: #1a0a0a;
    border-left: 3px solid #ef4444;
    color: #fca5a5;
  }
  .entry.done {
    background: #0a1a0a;
    border-left: 3px solid #22c55e;
    color: #86efac;
  }
  .entry.ask {
    background: #1a1406;
    border-left: 3px solid #eab308;
    color: #fde68a;
  }
  .entry.thinking {
    background: #111118;
    border-left: 3px solid #f59e0b;
    color: #fcd34d;
  }
  .input-area {
    display: flex;
    gap: 8px;
  }
  #cmd {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 16px;
    outline: none;
    transition: border-color 0.2s;
  }
  #cmd:focus { border-color: #6366f1; }
  #cmd::placeholder { color: #555; }
  #cmd:disabled { opacity: 0.5; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 24px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
    transition: background 0.2s;
  }
  button:hover { background: #4f46e5; }
  button:disabled { background: #333; cursor: not-allowed; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>webpilot</h1>
  </header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="cmd" placeholder="Tell the agent what to do..." autofocus />
      <button id="send" onclick="send()">Send</button>
      <button id="stop" onclick="stop()" disabled>Stop</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const sendBtn = document.getElementById('send');
  const dot = document.getElementById('status-dot');
  const stopBtn = document.getElementById('stop');
  let busy = false;
  let asking = null;

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    busy = b;
    cmd.disabled = b && !asking;
    sendBtn.disabled = b && !asking;
    stopBtn.disabled = !b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) cmd.focus();
  }

  function setAsking(prompt) {
    asking = prompt;
    cmd.type = prompt && prompt.kind === 'password' ? 'password' : 'text';
    cmd.placeholder = prompt ? 'Your answer...' : 'Tell the agent what to do...';
    setBusy(busy);
    if (prompt) cmd.focus();
  }

  async function send() {
    const text = asking && asking.kind === 'password' ? cmd.value : cmd.value.trim();
    if (asking) {
      const shown = asking.kind === 'password' ? '********' : text.replace(/</g,'&lt;');
      cmd.value = '';
      addEntry('user', '<strong>You:</strong> ' + shown);
      setAsking(null);
      await fetch('/answer', {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify({answer: text}),
      });
      return;
    }
    if (!text || busy) return;
    cmd.value = '';
    addEntry('user', '<strong>You:</strong> ' + text.replace(/</g,'&lt;'));
    setBusy(true);
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  }

  async function stop() {
    await fetch('/cancel', {method: 'POST'});
  }

  cmd.addEventListener('keydown', e => {
    if (e.key === 'Enter') send();
  });

  const es = new EventSource('/events');

  es.addEventListener('step', e => {
    const d = JSON.parse(e.data);
    addEntry('step', '<span class="num">Step ' + d.number + '</span>' + d.description.replace(/</g,'&lt;'));
  });

  es.addEventListener('step_error', e => {
    const d = JSON.parse(e.data);
    addEntry('error', '<strong>Error:</strong> ' + d.message.replace(/</g,'&lt;'));
  });

  es.addEventListener('task_complete', e => {
    const d = JSON.parse(e.data);
    addEntry('done', '<strong>Done:</strong> ' + d.summary.replace(/</g,'&lt;'));
    setBusy(false);
  });

  es.addEventListener('task_error', e => {
    const d = JSON.parse(e.data);
    addEntry('error', '<strong>Task failed:</strong> ' + d.message.replace(/</g,'&lt;'));
    setBusy(false);
  });

  es.addEventListener('awaiting_user', e => {
    const d = JSON.parse(e.data);
    let text = d.prompt.prompt.replace(/</g,'&lt;');
    (d.prompt.choices || []).forEach((c, i) => {
      text += '<br>' + (i + 1) + '. ' + c.replace(/</g,'&lt;');
    });
    addEntry('ask', '<strong>Agent asks:</strong> ' + text);
    setAsking(d.prompt);
  });

  es.addEventListener('thinking', () => {
    addEntry('thinking', 'Thinking...');
  });

  es.addEventListener('ready', () => {
    setAsking(null);
    setBusy(false);
  });

  addEntry('done', 'Agent ready. Type a command to begin.');
</script>
</body>
</html>
"##;
