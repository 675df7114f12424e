//! Agent turn: append the user message to a session's history, call the model, run any tool
//! calls and re-call until the model answers without tools (or the iteration limit is hit).

use async_trait::async_trait;

use crate::llm::{ChatMessage, LlmBackend, LlmError, ToolCall, ToolDefinition};

/// Result of one agent turn: final text and the tool calls of the final message, if any.
#[derive(Debug, Clone)]
pub struct AgentTurnResult {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Executes a tool by name and JSON arguments. Returns output or an error string for the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String, String>;
}

/// Notified around each tool call of a turn (e.g. to show progress in the channel).
#[async_trait]
pub trait TurnObserver: Send + Sync {
    async fn tool_started(&self, _name: &str) {}
    async fn tool_finished(&self, _name: &str) {}
}

/// Run one turn against `history`, which is extended in place with the user message, every
/// assistant message and every tool result.
pub async fn run_turn<B: LlmBackend + ?Sized>(
    history: &mut Vec<ChatMessage>,
    user_text: &str,
    backend: &B,
    model: &str,
    tools: Option<Vec<ToolDefinition>>,
    tool_executor: Option<&dyn ToolExecutor>,
    observer: Option<&dyn TurnObserver>,
    max_iterations: usize,
) -> Result<AgentTurnResult, LlmError> {
    history.push(ChatMessage::user(user_text));

    let mut iterations = 0;
    loop {
        let res = backend.chat(model, history.clone(), tools.clone()).await?;
        let content = res.content().to_string();
        let tool_calls = res.tool_calls().to_vec();
        history.push(ChatMessage::assistant(content.clone(), tool_calls.clone()));

        if tool_calls.is_empty() {
            return Ok(AgentTurnResult {
                content,
                tool_calls,
            });
        }

        iterations += 1;
        let executor = match tool_executor {
            Some(e) if iterations < max_iterations => e,
            Some(_) => {
                log::debug!("agent: max tool loop iterations reached");
                return Ok(AgentTurnResult {
                    content,
                    tool_calls,
                });
            }
            None => {
                log::debug!("agent: tool_calls returned but no executor");
                return Ok(AgentTurnResult {
                    content,
                    tool_calls,
                });
            }
        };

        for call in &tool_calls {
            let name = call.function.name.as_str();
            let args = call.function.arguments_object();
            if let Some(o) = observer {
                o.tool_started(name).await;
            }
            let result = match executor.execute(name, &args).await {
                Ok(out) => out,
                Err(e) => {
                    log::warn!("agent: tool {} failed: {}", name, e);
                    format!("error: {}", e)
                }
            };
            if let Some(o) = observer {
                o.tool_finished(name).await;
            }
            history.push(ChatMessage::tool_result(name, result));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ToolCallFunction};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns canned responses in order; records the message count of each request.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub responses: Mutex<VecDeque<ChatResponse>>,
        pub seen: Mutex<Vec<usize>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    pub(crate) fn text(content: &str) -> ChatResponse {
        ChatResponse {
            message: Some(ChatMessage::assistant(content, Vec::new())),
            done: true,
        }
    }

    pub(crate) fn call(name: &str, args: serde_json::Value) -> ChatResponse {
        ChatResponse {
            message: Some(ChatMessage::assistant(
                "",
                vec![ToolCall {
                    typ: "function".into(),
                    function: ToolCallFunction {
                        name: name.into(),
                        arguments: args,
                    },
                }],
            )),
            done: true,
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn chat(
            &self,
            _model: &str,
            messages: Vec<ChatMessage>,
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<ChatResponse, LlmError> {
            self.seen.lock().unwrap().push(messages.len());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Api("script exhausted".into()))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ToolExecutor for EchoTool {
        async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<String, String> {
            if name == "echo" {
                Ok(args["message"].as_str().unwrap_or("").to_string())
            } else {
                Err(format!("unknown tool: {}", name))
            }
        }
    }

    #[tokio::test]
    async fn plain_answer_appends_user_and_assistant() {
        let backend = ScriptedBackend::new(vec![text("hi there")]);
        let mut history = vec![ChatMessage::system("be nice")];
        let res = run_turn(&mut history, "hello", &backend, "m", None, None, None, 5)
            .await
            .unwrap();
        assert_eq!(res.content, "hi there");
        let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
    }

    #[tokio::test]
    async fn tool_calls_are_executed_then_model_recalled() {
        let backend = ScriptedBackend::new(vec![
            call("echo", serde_json::json!({ "message": "pong" })),
            call("nope", serde_json::json!({})),
            text("done"),
        ]);
        let mut history = Vec::new();
        let res = run_turn(&mut history, "go", &backend, "m", None, Some(&EchoTool), None, 5)
            .await
            .unwrap();
        assert_eq!(res.content, "done");
        let tool_results: Vec<&str> = history
            .iter()
            .filter(|m| m.role == "tool")
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tool_results, ["pong", "error: unknown tool: nope"]);
        assert_eq!(*backend.seen.lock().unwrap(), vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn stops_at_iteration_limit() {
        let backend = ScriptedBackend::new(vec![
            call("echo", serde_json::json!({ "message": "1" })),
            call("echo", serde_json::json!({ "message": "2" })),
            text("never reached"),
        ]);
        let mut history = Vec::new();
        let res = run_turn(&mut history, "go", &backend, "m", None, Some(&EchoTool), None, 2)
            .await
            .unwrap();
        assert_eq!(res.tool_calls.len(), 1);
        assert_eq!(backend.seen.lock().unwrap().len(), 2);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl TurnObserver for Recorder {
        async fn tool_started(&self, name: &str) {
            self.0.lock().unwrap().push(format!("start:{}", name));
        }
        async fn tool_finished(&self, name: &str) {
            self.0.lock().unwrap().push(format!("end:{}", name));
        }
    }

    #[tokio::test]
    async fn observer_sees_each_tool_call() {
        let backend = ScriptedBackend::new(vec![
            call("echo", serde_json::json!({ "message": "a" })),
            text("done"),
        ]);
        let recorder = Recorder::default();
        let mut history = Vec::new();
        run_turn(
            &mut history,
            "go",
            &backend,
            "m",
            None,
            Some(&EchoTool),
            Some(&recorder),
            5,
        )
        .await
        .unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["start:echo", "end:echo"]);
    }

    #[tokio::test]
    async fn backend_error_propagates() {
        let backend = ScriptedBackend::new(Vec::new());
        let mut history = Vec::new();
        let err = run_turn(&mut history, "go", &backend, "m", None, None, None, 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
    }
}
