//! Tools offered to the coordinator
//!
//! `print_playbook` carries the proposed remediation; `probe_system` asks for
//! read-only diagnostics. Models without native tool calling use a text
//! protocol of `Action:` / `Action Input:` lines instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Name of the tool that carries a playbook
pub const PRINT_PLAYBOOK: &str = "print_playbook";

/// Name of the tool that requests diagnostics
pub const PROBE_SYSTEM: &str = "probe_system";

/// Function-style tool declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

impl ToolSpec {
    /// `print_playbook { code }`
    #[must_use]
    pub fn print_playbook() -> Self {
        Self {
            name: PRINT_PLAYBOOK.to_string(),
            description: "Print playbook code to remediate the current microservice anomaly."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Playbook executed directly with `ansible-playbook -i inventory.ini remediation.yml` to remediate the anomaly."
                    }
                },
                "required": ["code"]
            }),
        }
    }

    /// `probe_system { cmds }`
    #[must_use]
    pub fn probe_system() -> Self {
        Self {
            name: PROBE_SYSTEM.to_string(),
            description: "Output shell commands that inspect the microservice system. Separate multiple commands with ';'. Results are returned before the playbook is generated."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "cmds": {
                        "type": "string",
                        "description": "Commands separated by ';'."
                    }
                },
                "required": ["cmds"]
            }),
        }
    }

    /// OpenAI-style `{"type": "function", "function": {...}}` wrapper
    #[must_use]
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// Anthropic-style `{"name", "description", "input_schema"}`
    #[must_use]
    pub fn to_anthropic(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

/// A tool invocation returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Arguments; some backends send them as a JSON string, others as an object
    pub arguments: Value,
}

impl ToolCall {
    /// Create a call
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as an object, decoding string-encoded arguments
    fn argument_object(&self) -> Option<Value> {
        match &self.arguments {
            Value::String(raw) => serde_json::from_str(raw).ok(),
            Value::Object(_) => Some(self.arguments.clone()),
            _ => None,
        }
    }

    /// Raw argument text, as recorded in the conversation
    #[must_use]
    pub fn arguments_text(&self) -> String {
        match &self.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }
    }
}

/// Decoded coordinator request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    /// A playbook to execute
    PrintPlaybook { code: String },
    /// Commands to run read-only
    ProbeSystem { commands: Vec<String> },
    /// A call that could not be decoded
    Malformed { tool: String, reason: String },
}

impl ToolRequest {
    /// Decode a backend tool call
    #[must_use]
    pub fn from_call(call: &ToolCall) -> Self {
        let Some(args) = call.argument_object() else {
            return Self::Malformed {
                tool: call.name.clone(),
                reason: "arguments are not a JSON object".into(),
            };
        };
        let field = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
        match call.name.as_str() {
            PRINT_PLAYBOOK => match field("code") {
                Some(code) => Self::PrintPlaybook { code },
                None => Self::Malformed {
                    tool: call.name.clone(),
                    reason: "missing `code`".into(),
                },
            },
            PROBE_SYSTEM => match field("cmds") {
                Some(cmds) => Self::ProbeSystem {
                    commands: split_commands(&cmds),
                },
                None => Self::Malformed {
                    tool: call.name.clone(),
                    reason: "missing `cmds`".into(),
                },
            },
            other => Self::Malformed {
                tool: other.to_string(),
                reason: "unknown tool".into(),
            },
        }
    }
}

/// Split a `;`-separated command string, dropping empty pieces
#[must_use]
pub fn split_commands(cmds: &str) -> Vec<String> {
    cmds.split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Append tool instructions for models without native tool calling
#[must_use]
pub fn text_protocol_prompt(message: &str, tools: &[ToolSpec]) -> String {
    let tool_text = serde_json::to_string(
        &tools.iter().map(ToolSpec::to_openai).collect::<Vec<_>>(),
    )
    .unwrap_or_default();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    format!(
        "{message}\nYou have access to the following tools:\n{tool_text}\n\
         Use the following format if using a tool:\n```\n\
         Action: tool name (one of [{}])\n\
         Action Input: the input to the tool, in a JSON format representing the kwargs \
         (e.g. ```{{\"input\": \"hello world\", \"num_beams\": 5}}```)\n```\n",
        names.join(",")
    )
}

/// Extract tool calls written with the text protocol
#[must_use]
pub fn parse_text_protocol(content: &str, tools: &[ToolSpec]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut name: Option<&str> = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Action: ") {
            name = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("Action Input: ") {
            if let Some(n) = name.filter(|n| tools.iter().any(|t| t.name == *n)) {
                calls.push(ToolCall::new(n, Value::String(rest.trim().to_string())));
            }
        }
    }
    calls
}
