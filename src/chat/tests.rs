use super::*;
use crate::llm::{Generation, Role};
use crate::tools::{ToolDefinition, ToolFunction};
use async_trait::async_trait;
use serde_json::Map;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Replays canned replies and records what each turn offered
struct ScriptedGenerator {
    replies: Mutex<VecDeque<AssistantReply>>,
    offered_tools: Mutex<Vec<usize>>,
    seen_lengths: Mutex<Vec<usize>>,
}

impl ScriptedGenerator {
    fn new(replies: impl IntoIterator<Item = AssistantReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            offered_tools: Mutex::new(Vec::new()),
            seen_lengths: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<Generation> {
        Err(RagError::GenerationFailure("not used".to_string()))
    }

    async fn converse(
        &self,
        transcript: &[ChatMessage],
        _options: &GenerationOptions,
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        self.offered_tools.lock().expect("lock").push(tools.len());
        self.seen_lengths.lock().expect("lock").push(transcript.len());
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| RagError::GenerationFailure("script exhausted".to_string()))
    }
}

/// Always calls the counter tool
struct LoopingGenerator;

#[async_trait]
impl GenerationProvider for LoopingGenerator {
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<Generation> {
        Err(RagError::GenerationFailure("not used".to_string()))
    }

    async fn converse(
        &self,
        _transcript: &[ChatMessage],
        _options: &GenerationOptions,
        _tools: &[ToolDefinition],
    ) -> Result<AssistantReply> {
        Ok(tool_calls(&["counter"]))
    }
}

#[derive(Default)]
struct CounterTool {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolFunction for CounterTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Counts invocations"
    }

    fn json_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: &Map<String, Value>) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "count": n }))
    }
}

struct FailingTool;

#[async_trait]
impl ToolFunction for FailingTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn json_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: &Map<String, Value>) -> Result<Value> {
        Err(RagError::ToolExecution {
            tool: "flaky".to_string(),
            message: "upstream timed out".to_string(),
        })
    }
}

const TOOL_MODEL: &str = "qwen2.5:3b";

fn tool_calls(names: &[&str]) -> AssistantReply {
    AssistantReply::ToolCalls {
        content: String::new(),
        calls: names
            .iter()
            .map(|name| ToolCallRequest::new(*name, Map::new()))
            .collect(),
    }
}

fn options(model: &str) -> GenerationOptions {
    GenerationOptions {
        model: model.to_string(),
        temperature: 0.7,
        top_p: 0.9,
    }
}

fn registry(counter: Arc<CounterTool>) -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new([TOOL_MODEL])
        .with_tool(counter)
        .and_then(|r| r.with_tool(Arc::new(FailingTool)))
        .expect("tools register");
    Arc::new(registry)
}

fn opening() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are helpful."),
        ChatMessage::user("What day is it?"),
    ]
}

#[tokio::test]
async fn plain_reply_finishes_immediately() {
    let generator = Arc::new(ScriptedGenerator::new([AssistantReply::Text(
        "Tuesday".to_string(),
    )]));
    let tool_loop = ToolLoop::new(
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        registry(Arc::default()),
        10,
    );

    let outcome = tool_loop
        .chat(opening(), &options(TOOL_MODEL))
        .await
        .expect("chat succeeds");

    assert_eq!(outcome.answer, "Tuesday");
    assert_eq!(outcome.rounds, 0);
    assert_eq!(outcome.transcript, opening());
}

#[tokio::test]
async fn three_tool_rounds_then_text() {
    let counter = Arc::new(CounterTool::default());
    let generator = Arc::new(ScriptedGenerator::new([
        tool_calls(&["counter"]),
        tool_calls(&["counter"]),
        tool_calls(&["counter"]),
        AssistantReply::Text("Counted three times".to_string()),
    ]));
    let tool_loop = ToolLoop::new(
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        registry(Arc::clone(&counter)),
        10,
    );

    let outcome = tool_loop
        .chat(opening(), &options(TOOL_MODEL))
        .await
        .expect("chat succeeds");

    assert_eq!(outcome.answer, "Counted three times");
    assert_eq!(outcome.rounds, 3);
    assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.transcript.len(), 2 + 3 * 2);
    assert_eq!(outcome.transcript[..2], opening()[..]);

    for (i, pair) in outcome.transcript[2..].chunks(2).enumerate() {
        assert_eq!(pair[0].role, Role::Assistant);
        assert_eq!(pair[0].tool_calls.len(), 1);
        assert_eq!(pair[1].role, Role::Tool);
        assert_eq!(pair[1].tool_name.as_deref(), Some("counter"));
        let payload: Value = serde_json::from_str(&pair[1].content).expect("tool result is JSON");
        assert_eq!(payload, json!({ "count": i + 1 }));
    }

    assert_eq!(
        *generator.seen_lengths.lock().expect("lock"),
        vec![2, 4, 6, 8]
    );
}

#[tokio::test]
async fn unknown_tool_leaves_transcript_untouched() {
    let counter = Arc::new(CounterTool::default());
    let generator = Arc::new(ScriptedGenerator::new([tool_calls(&["counter", "teleport"])]));
    let tool_loop = ToolLoop::new(
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        registry(Arc::clone(&counter)),
        10,
    );

    let mut transcript = opening();
    let err = tool_loop
        .run(&mut transcript, &options(TOOL_MODEL))
        .await
        .expect_err("unknown tool is fatal");

    assert!(matches!(err, RagError::UnknownTool { ref name } if name == "teleport"));
    assert_eq!(transcript, opening());
    assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn loop_is_capped() {
    let counter = Arc::new(CounterTool::default());
    let tool_loop = ToolLoop::new(Arc::new(LoopingGenerator), registry(Arc::clone(&counter)), 3);

    let mut transcript = opening();
    let err = tool_loop
        .run(&mut transcript, &options(TOOL_MODEL))
        .await
        .expect_err("never stops calling tools");

    assert!(matches!(err, RagError::ToolLoopExceeded { max_rounds: 3 }));
    assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    assert_eq!(transcript.len(), 2 + 3 * 2);
}

#[tokio::test]
async fn tool_failure_is_handed_back_to_model() {
    let generator = Arc::new(ScriptedGenerator::new([
        tool_calls(&["flaky"]),
        AssistantReply::Text("Sorry, the service is down.".to_string()),
    ]));
    let tool_loop = ToolLoop::new(
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        registry(Arc::default()),
        10,
    );

    let outcome = tool_loop
        .chat(opening(), &options(TOOL_MODEL))
        .await
        .expect("tool failure is not fatal");

    assert_eq!(outcome.answer, "Sorry, the service is down.");
    let tool_message = outcome.transcript.last().expect("tool message");
    assert_eq!(tool_message.role, Role::Tool);
    let payload: Value = serde_json::from_str(&tool_message.content).expect("JSON payload");
    assert_eq!(payload, json!({"error": "upstream timed out"}));
}

#[tokio::test]
async fn multiple_calls_in_one_reply() {
    let counter = Arc::new(CounterTool::default());
    let generator = Arc::new(ScriptedGenerator::new([
        tool_calls(&["counter", "flaky", "counter"]),
        AssistantReply::Text("done".to_string()),
    ]));
    let tool_loop = ToolLoop::new(
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        registry(Arc::clone(&counter)),
        10,
    );

    let outcome = tool_loop
        .chat(opening(), &options(TOOL_MODEL))
        .await
        .expect("chat succeeds");

    assert_eq!(outcome.rounds, 1);
    let names: Vec<Option<&str>> = outcome.transcript[3..]
        .iter()
        .map(|m| m.tool_name.as_deref())
        .collect();
    assert_eq!(names, vec![Some("counter"), Some("flaky"), Some("counter")]);
    assert_eq!(outcome.transcript[2].tool_calls.len(), 3);
}

#[tokio::test]
async fn models_without_tool_support_get_no_definitions() {
    let generator = Arc::new(ScriptedGenerator::new([
        AssistantReply::Text("hi".to_string()),
        AssistantReply::Text("hi".to_string()),
    ]));
    let tool_loop = ToolLoop::new(
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        registry(Arc::default()),
        10,
    );

    tool_loop
        .chat(opening(), &options("llama2"))
        .await
        .expect("chat succeeds");
    tool_loop
        .chat(opening(), &options(TOOL_MODEL))
        .await
        .expect("chat succeeds");

    assert_eq!(*generator.offered_tools.lock().expect("lock"), vec![0, 2]);
}
