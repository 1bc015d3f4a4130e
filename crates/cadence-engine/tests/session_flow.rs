//! End-to-end flow through a chat session: transcript in, queued turn,
//! tool round, follow-up turn, sentences out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use cadence_core::messages::Role;
use cadence_core::stream::CompletionEvent;
use cadence_core::tools::{ToolChannel, ToolError, ToolMetadata, ToolParameter};
use cadence_engine::{ChatSession, CollectingSink, SinkEvent, ToolRegistry, TurnOrchestrator};
use cadence_llm::mock::{tool_call_event, MockClient, MockResponse};

/// Records calls and answers every one with the same payload.
struct ClockChannel {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ToolChannel for ClockChannel {
    async fn call_tool(&self, name: &str, arguments: &str) -> Result<Value, ToolError> {
        self.calls.lock().push((name.to_string(), arguments.to_string()));
        Ok(json!({"type": "llmresult", "content": "It is 10:42."}))
    }
}

struct Fixture {
    session: ChatSession,
    client: Arc<MockClient>,
    channel: Arc<ClockChannel>,
    sink: Arc<CollectingSink>,
}

fn fixture(responses: Vec<MockResponse>, greeting: &str) -> Fixture {
    let client = Arc::new(MockClient::new(responses));
    let channel = Arc::new(ClockChannel {
        calls: Mutex::new(Vec::new()),
    });
    let sink = Arc::new(CollectingSink::new());
    let orchestrator = TurnOrchestrator::new(
        client.clone(),
        ToolRegistry::new().into_shared(),
        channel.clone(),
        sink.clone(),
        10,
    );
    Fixture {
        session: ChatSession::new(orchestrator, greeting),
        client,
        channel,
        sink,
    }
}

fn clock_tool() -> ToolMetadata {
    ToolMetadata {
        name: "get_time".into(),
        description: "Current local time".into(),
        parameters: vec![ToolParameter {
            name: "timezone".into(),
            param_type: "string".into(),
            description: "IANA timezone".into(),
            required: false,
        }],
    }
}

async fn wait_finished(session: &ChatSession, count: u64) {
    let mut finished = session.finished_turns();
    while *finished.borrow_and_update() < count {
        finished.changed().await.unwrap();
    }
}

#[tokio::test]
async fn transcript_to_tool_answer() {
    let f = fixture(
        vec![
            MockResponse::Stream(vec![
                tool_call_event("call_1", "get_time", r#"{"timezone":"UTC"}"#),
                CompletionEvent::ContentFinished,
            ]),
            MockResponse::text(&["It is ten forty", "-two. Anything else?"]),
        ],
        "Hi! How can I help?",
    );
    f.session.update_tools(clock_tool());
    f.session.on_user_joined();
    f.session.on_text("What time is it?", true);
    wait_finished(&f.session, 1).await;

    assert_eq!(
        f.channel.calls.lock().clone(),
        vec![("get_time".to_string(), r#"{"timezone":"UTC"}"#.to_string())]
    );

    let requests = f.client.requests();
    assert_eq!(requests.len(), 2);
    let tools = requests[0].tools.as_ref().unwrap();
    assert_eq!(tools[0].name, "get_time");
    assert!(requests[1].tools.is_none());

    // Greeting segment, parent segment, follow-up segment.
    assert_eq!(
        f.sink.events().first(),
        Some(&SinkEvent::Text {
            text: "Hi! How can I help?".into(),
            end_of_segment: true
        })
    );
    assert_eq!(
        f.sink.sentences(),
        vec!["Hi! How can I help?", "It is ten forty-two.", "Anything else?"]
    );
    assert_eq!(f.sink.end_of_segment_count(), 3);

    let orchestrator = f.session.shutdown().await.unwrap();
    let roles: Vec<_> = orchestrator.memory().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);
}

#[tokio::test]
async fn flush_interrupts_and_session_recovers() {
    let f = fixture(
        vec![
            MockResponse::Stall(vec![CompletionEvent::content("Let me think about")]),
            MockResponse::text(&["Sure."]),
        ],
        "",
    );
    f.session.on_text("Tell me a long story", true);
    f.session.on_text("Queued behind it", true);
    while f.client.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    f.session.flush();
    wait_finished(&f.session, 1).await;
    assert_eq!(f.sink.flush_count(), 1);
    assert_eq!(f.sink.end_of_segment_count(), 1);

    f.session.on_text("Never mind, short one", true);
    wait_finished(&f.session, 2).await;
    assert_eq!(f.sink.sentences(), vec!["Sure."]);

    let orchestrator = f.session.shutdown().await.unwrap();
    let texts: Vec<_> = orchestrator
        .memory()
        .iter()
        .map(|m| m.text_content())
        .collect();
    assert_eq!(
        texts,
        vec!["Tell me a long story", "Never mind, short one", "Sure."]
    );
}
