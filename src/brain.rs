//! The LLM oracle: given the instruction and the history so far, pick the
//! next tool call.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::error::{ConfigError, OracleError};
use crate::types::{
    ActionRequest, ActionVerb, AskKind, HistoryEntry, TargetSpec, UserPrompt,
};

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You control a real Chrome browser by calling exactly ONE tool per turn.

How to work:
1. Call analyzePage to see the page. It lists interactive elements as [id][kind]text, followed by page text.
2. Target elements by their id from the latest analyzePage output, e.g. {"target": 12}. IDs change whenever the page changes, so call analyzePage again after navigation or when the page looks different.
3. To fill a field call type with the field as target and the text as value; the field is cleared first. A trailing "\n" presses Enter.
4. Use askUser for anything only the user knows (credentials, choices, confirmation). Use kind "password" for secrets.
5. If an action fails, read the error and try something different. Never repeat a failing call unchanged.
6. When the task is accomplished, or cannot be accomplished, call done with a short summary.
7. Keep steps minimal. Do not over-navigate."#;

/// What the oracle wants next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act(ActionRequest),
    Done { summary: String },
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn decide(
        &self,
        instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<Decision, OracleError>;
}

/// OpenAI-compatible chat-completions client using function calling.
pub struct OpenAiOracle {
    client: Client,
    api_key: String,
    config: OracleConfig,
}

impl OpenAiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        Ok(Self {
            client: Client::new(),
            api_key,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn decide(
        &self,
        instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<Decision, OracleError> {
        let messages = build_messages(instruction, history);
        if messages.len() > 60 {
            warn!(messages = messages.len(), "conversation history is long");
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "tools": tool_definitions(),
                "tool_choice": "required",
                "parallel_tool_calls": false,
                "temperature": self.config.temperature,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error")
                .to_string();
            warn!(status = status.as_u16(), %message, "oracle API error");
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let message = &body["choices"][0]["message"];
        if let Some(call) = message["tool_calls"].get(0) {
            let name = call["function"]["name"].as_str().unwrap_or_default();
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            debug!(tool = name, "oracle tool call");
            let decision = parse_tool_call(name, arguments)?;
            info!(decision = ?decision_label(&decision), "oracle decided");
            return Ok(decision);
        }

        match message["content"].as_str() {
            Some(content) => {
                debug!(%content, "oracle answered with text, parsing as JSON");
                parse_content(content)
            }
            None => Err(OracleError::Parse(format!("no tool call in response: {}", body))),
        }
    }
}

fn decision_label(decision: &Decision) -> String {
    match decision {
        Decision::Act(request) => request.verb.to_string(),
        Decision::Done { .. } => "done".to_string(),
    }
}

/// Conversation sent to the oracle: system prompt, the task, then one
/// assistant tool call and one tool result per history entry.
pub fn build_messages(instruction: &str, history: &[HistoryEntry]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2 + history.len() * 2);
    messages.push(json!({"role": "system", "content": SYSTEM_PROMPT}));
    messages.push(json!({
        "role": "user",
        "content": format!(
            "Task: {}\n\nThe browser is on its current page. What is your next step?",
            instruction
        ),
    }));

    for (n, entry) in history.iter().enumerate() {
        let id = format!("call_{}", n + 1);
        messages.push(json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": [{
                "id": id,
                "type": "function",
                "function": {
                    "name": entry.request.verb.as_str(),
                    "arguments": request_arguments(&entry.request).to_string(),
                },
            }],
        }));
        messages.push(json!({
            "role": "tool",
            "tool_call_id": id,
            "content": entry.result.observation(),
        }));
    }

    messages
}

fn target_value(target: &TargetSpec) -> Value {
    match target {
        TargetSpec::ById(id) => json!(id),
        TargetSpec::ByNaturalLanguage(desc) => json!(desc),
        TargetSpec::ByStructured { .. } => {
            serde_json::to_value(target)
                .ok()
                .and_then(|v| v.get("byStructured").cloned())
                .unwrap_or(Value::Null)
        }
    }
}

/// Arguments object for a past request, mirroring [`tool_definitions`].
pub fn request_arguments(request: &ActionRequest) -> Value {
    let mut args = Map::new();
    if let Some(target) = &request.target {
        args.insert("target".to_string(), target_value(target));
    }
    if let Some(payload) = &request.payload {
        let key = payload_key(request.verb);
        args.insert(key.to_string(), json!(payload));
    }
    if let Some(prompt) = &request.prompt {
        args.insert("prompt".to_string(), json!(prompt.prompt));
        args.insert("kind".to_string(), json!(prompt.kind));
        if !prompt.choices.is_empty() {
            args.insert("choices".to_string(), json!(prompt.choices));
        }
        if let Some(default) = &prompt.default {
            args.insert("default".to_string(), json!(default));
        }
    }
    Value::Object(args)
}

fn payload_key(verb: ActionVerb) -> &'static str {
    match verb {
        ActionVerb::KeyboardAction => "keys",
        ActionVerb::Navigate => "url",
        ActionVerb::Scroll => "direction",
        ActionVerb::Search => "query",
        _ => "value",
    }
}

fn verb_from_name(name: &str) -> Option<ActionVerb> {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();
    let verb = match normalized.as_str() {
        "click" => ActionVerb::Click,
        "type" | "typetext" => ActionVerb::Type,
        "selectoption" | "select" => ActionVerb::SelectOption,
        "keyboardaction" | "presskey" | "keyboard" => ActionVerb::KeyboardAction,
        "navigate" | "goto" => ActionVerb::Navigate,
        "scroll" => ActionVerb::Scroll,
        "askuser" => ActionVerb::AskUser,
        "analyzepage" | "analyze" => ActionVerb::AnalyzePage,
        "goback" | "back" => ActionVerb::GoBack,
        "search" => ActionVerb::Search,
        _ => return None,
    };
    Some(verb)
}

fn string_arg(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match args.get(*key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Turn one tool call into a decision.
pub fn parse_tool_call(name: &str, arguments: &str) -> Result<Decision, OracleError> {
    let args: Map<String, Value> = if arguments.trim().is_empty() {
        Map::new()
    } else {
        serde_json::from_str(arguments)
            .map_err(|e| OracleError::Parse(format!("arguments of {}: {}", name, e)))?
    };

    if name.eq_ignore_ascii_case("done") || name.eq_ignore_ascii_case("finish") {
        let summary = string_arg(&args, &["summary", "result", "message"]).unwrap_or_default();
        return Ok(Decision::Done { summary });
    }

    let verb =
        verb_from_name(name).ok_or_else(|| OracleError::Parse(format!("unknown tool {:?}", name)))?;
    let mut request = ActionRequest::new(verb);

    request.target = args
        .get("target")
        .or_else(|| args.get("element"))
        .or_else(|| args.get("id"))
        .and_then(TargetSpec::from_value);

    request.payload = match verb {
        ActionVerb::Type | ActionVerb::SelectOption => {
            string_arg(&args, &["value", "text", "option"])
        }
        ActionVerb::KeyboardAction => string_arg(&args, &["keys", "key", "combo"]),
        ActionVerb::Navigate => string_arg(&args, &["url"]),
        ActionVerb::Scroll => string_arg(&args, &["direction"]),
        ActionVerb::Search => string_arg(&args, &["query", "q"]),
        _ => None,
    };

    if verb == ActionVerb::AskUser {
        let prompt = string_arg(&args, &["prompt", "question"])
            .ok_or_else(|| OracleError::Parse("askUser without a prompt".to_string()))?;
        let kind = match string_arg(&args, &["kind", "type"]).as_deref() {
            Some("password") | Some("secret") => AskKind::Password,
            Some("choice") | Some("select") => AskKind::Choice,
            _ => AskKind::Text,
        };
        let choices = args
            .get("choices")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        request.prompt = Some(UserPrompt {
            prompt,
            kind,
            choices,
            default: string_arg(&args, &["default"]),
        });
    }

    Ok(Decision::Act(request))
}

/// Fallback for models that answer with JSON text instead of a tool call,
/// e.g. `{"tool": "click", "arguments": {"target": 3}}`.
pub fn parse_content(content: &str) -> Result<Decision, OracleError> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| OracleError::Parse(format!("{} in {:?}", e, cleaned)))?;
    let Value::Object(mut object) = value else {
        return Err(OracleError::Parse(format!("expected an object, got {}", cleaned)));
    };

    let name = ["tool", "name", "action"]
        .iter()
        .find_map(|key| object.remove(*key))
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| OracleError::Parse(format!("no tool name in {}", cleaned)))?;
    let arguments = match object.remove("arguments") {
        Some(Value::String(raw)) => raw,
        Some(args) => args.to_string(),
        None => Value::Object(object).to_string(),
    };
    parse_tool_call(&name, &arguments)
}

fn function(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// One function per verb plus `done`.
pub fn tool_definitions() -> Vec<Value> {
    let target = json!({
        "description": "Element id from the latest analyzePage output (preferred), or a short description such as \"the search box\".",
        "type": ["integer", "string"],
    });
    vec![
        function(
            "analyzePage",
            "List the interactive elements of the current page as [id][kind]text, followed by visible page text.",
            json!({"type": "object", "properties": {}}),
        ),
        function(
            "click",
            "Click an element.",
            json!({"type": "object", "properties": {"target": target}, "required": ["target"]}),
        ),
        function(
            "type",
            "Clear a field and type text into it. Without target, types into the focused element.",
            json!({
                "type": "object",
                "properties": {"target": target, "value": {"type": "string"}},
                "required": ["value"],
            }),
        ),
        function(
            "selectOption",
            "Choose an option of a dropdown by its visible text or value.",
            json!({
                "type": "object",
                "properties": {"target": target, "value": {"type": "string"}},
                "required": ["target", "value"],
            }),
        ),
        function(
            "keyboardAction",
            "Press keys: a name (Enter, Tab, Escape), a combo (ctrl+a), a sequence (Tab, Tab, Enter) or \"hold shift, press Tab\".",
            json!({
                "type": "object",
                "properties": {"keys": {"type": "string"}, "target": target},
                "required": ["keys"],
            }),
        ),
        function(
            "navigate",
            "Open a URL in the current tab.",
            json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}),
        ),
        function(
            "scroll",
            "Scroll the page.",
            json!({
                "type": "object",
                "properties": {"direction": {"type": "string", "enum": ["up", "down", "top", "bottom"]}},
                "required": ["direction"],
            }),
        ),
        function(
            "askUser",
            "Ask the user a question and wait for the answer.",
            json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string"},
                    "kind": {"type": "string", "enum": ["text", "password", "choice"]},
                    "choices": {"type": "array", "items": {"type": "string"}},
                    "default": {"type": "string"},
                },
                "required": ["prompt"],
            }),
        ),
        function(
            "goBack",
            "Go back to the previous page.",
            json!({"type": "object", "properties": {}}),
        ),
        function(
            "search",
            "Search the web for a query.",
            json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
        ),
        function(
            "done",
            "Finish the task with a summary of what was achieved or why it cannot be done.",
            json!({"type": "object", "properties": {"summary": {"type": "string"}}, "required": ["summary"]}),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::ActionResult;

    #[test]
    fn click_with_element_map_line() {
        let decision = parse_tool_call("click", r#"{"target": "[2][button]Submit"}"#).unwrap();
        assert_eq!(
            decision,
            Decision::Act(ActionRequest::click(TargetSpec::ById(2)))
        );
    }

    #[test]
    fn type_with_numeric_target() {
        let decision = parse_tool_call("type", r#"{"target": 4, "value": "hello\n"}"#).unwrap();
        let Decision::Act(request) = decision else {
            panic!("expected an action");
        };
        assert_eq!(request.verb, ActionVerb::Type);
        assert_eq!(request.target, Some(TargetSpec::ById(4)));
        assert_eq!(request.payload(), Some("hello\n"));
    }

    #[test]
    fn ask_user_password() {
        let decision = parse_tool_call(
            "ask_user",
            r#"{"prompt": "Password for example.com?", "kind": "password"}"#,
        )
        .unwrap();
        let Decision::Act(request) = decision else {
            panic!("expected an action");
        };
        let prompt = request.prompt.unwrap();
        assert_eq!(prompt.kind, AskKind::Password);
        assert_eq!(prompt.prompt, "Password for example.com?");
    }

    #[test]
    fn done_and_unknown_tools() {
        assert_eq!(
            parse_tool_call("done", r#"{"summary": "Ordered the book"}"#).unwrap(),
            Decision::Done {
                summary: "Ordered the book".to_string()
            }
        );
        assert!(matches!(
            parse_tool_call("teleport", "{}"),
            Err(OracleError::Parse(_))
        ));
        assert!(matches!(
            parse_tool_call("click", "{not json"),
            Err(OracleError::Parse(_))
        ));
    }

    #[test]
    fn fenced_json_content_fallback() {
        let decision =
            parse_content("```json\n{\"tool\": \"navigate\", \"arguments\": {\"url\": \"example.com\"}}\n```")
                .unwrap();
        assert_eq!(
            decision,
            Decision::Act(ActionRequest::navigate("example.com"))
        );
        let flat = parse_content(r#"{"action": "scroll", "direction": "down"}"#).unwrap();
        assert_eq!(
            flat,
            Decision::Act(ActionRequest::new(ActionVerb::Scroll).with_payload("down"))
        );
    }

    #[test]
    fn history_becomes_tool_call_pairs() {
        let history = vec![
            HistoryEntry {
                request: ActionRequest::new(ActionVerb::AnalyzePage),
                result: ActionResult::success("[1][button]Go"),
            },
            HistoryEntry {
                request: ActionRequest::click(TargetSpec::ById(1)),
                result: ActionResult::failure(ErrorKind::NotFound, "gone"),
            },
        ];
        let messages = build_messages("press go", &history);
        assert_eq!(messages.len(), 2 + 4);
        assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(messages[4]["tool_calls"][0]["function"]["name"], "click");
        assert_eq!(
            messages[4]["tool_calls"][0]["function"]["arguments"],
            r#"{"target":1}"#
        );
        assert_eq!(messages[5]["content"], "ERROR (not_found): gone");
    }

    #[test]
    fn every_verb_has_a_tool() {
        let names: Vec<String> = tool_definitions()
            .iter()
            .filter_map(|t| t["function"]["name"].as_str().map(String::from))
            .collect();
        for verb in [
            ActionVerb::Click,
            ActionVerb::Type,
            ActionVerb::SelectOption,
            ActionVerb::KeyboardAction,
            ActionVerb::Navigate,
            ActionVerb::Scroll,
            ActionVerb::AskUser,
            ActionVerb::AnalyzePage,
            ActionVerb::GoBack,
            ActionVerb::Search,
        ] {
            assert!(names.iter().any(|n| n == verb.as_str()), "{}", verb);
            assert_eq!(verb_from_name(verb.as_str()), Some(verb));
        }
        assert!(names.iter().any(|n| n == "done"));
    }
}
