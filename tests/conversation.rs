//! Conversation orchestrator integration tests
//!
//! Runs the orchestrator against scripted LLM sessions and in-memory tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voxloop::conversation::{
    MessagePart, Orchestrator, OrchestratorSettings, Role, Status, StreamScanner,
};
use voxloop::tools::{ContentItem, ToolDispatcher};
use voxloop::{Error, Result};

mod common;
use common::{STREAM_FAILURE, ScriptedBackend, StaticTools};

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        restart_delay: Duration::from_millis(5),
        ..OrchestratorSettings::default()
    }
}

fn orchestrator(backend: &Arc<ScriptedBackend>, tools: ToolDispatcher) -> Orchestrator {
    Orchestrator::new(backend.clone(), Arc::new(tools), settings())
}

/// Run a turn, collecting the sentences handed to the speaker
async fn turn(
    orchestrator: &Orchestrator,
    text: &str,
) -> (Result<voxloop::conversation::TurnOutcome>, Vec<String>) {
    let mut spoken = Vec::new();
    let outcome = orchestrator
        .submit_user_turn(text, |sentence| spoken.push(sentence.to_string()))
        .await;
    (outcome, spoken)
}

#[tokio::test]
async fn sentences_and_tool_calls_keep_stream_order() {
    let backend = Arc::new(ScriptedBackend::new([vec![
        "Hello wor",
        "ld. <functionCall><name>x</name><para",
        "meters></parameters></functionCall> do",
        "ne.",
    ]]));
    let orchestrator = orchestrator(&backend, ToolDispatcher::new());
    orchestrator.create_conversation(false).await.unwrap();

    let (outcome, spoken) = turn(&orchestrator, "hi").await;
    let outcome = outcome.unwrap();
    assert_eq!(spoken, ["Hello world.", "done."]);
    assert_eq!(outcome.tool_calls, 1);

    let messages = orchestrator.messages();
    let assistant = messages.last().unwrap();
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(assistant.parts.len(), 3);
    assert_eq!(
        assistant.parts[0],
        MessagePart::Text {
            text: "Hello world.".to_string()
        }
    );
    let MessagePart::ToolCall(call) = &assistant.parts[1] else {
        panic!("expected a tool call part");
    };
    assert_eq!(call.function_name, "x");
    assert!(call.parameters.is_empty());
    assert_eq!(call.response, "Cannot call tool \"x\": it is not available.");
    assert_eq!(
        assistant.parts[2],
        MessagePart::Text {
            text: "done.".to_string()
        }
    );
}

#[test]
fn scanner_handles_the_same_stream_in_one_delta() {
    let mut scanner = StreamScanner::new();
    let mut items = scanner.push(
        "Hello world. <functionCall><name>x</name><parameters></parameters></functionCall> done.",
    );
    items.extend(scanner.finish());
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn tool_results_feed_the_next_round() {
    let backend = Arc::new(ScriptedBackend::new([
        vec![
            "<functionCall><name>a</name><parameters><q type=\"string\">one</q></parameters></functionCall>",
            "<functionCall><name>b</name><parameters><n type=\"integer\">2</n></parameters></functionCall>",
        ],
        vec!["Both tools answered."],
    ]));
    let failing = StaticTools::new("flaky", &["a"], |_, _| {
        Err(Error::Tool("backend exploded".to_string()))
    });
    let tools = ToolDispatcher::new()
        .with_backend(Arc::new(failing))
        .with_backend(Arc::new(StaticTools::echo("steady", &["b"])));
    let orchestrator = orchestrator(&backend, tools);
    orchestrator.create_conversation(false).await.unwrap();

    let (outcome, spoken) = turn(&orchestrator, "use both").await;
    let outcome = outcome.unwrap();

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.tool_calls, 2);
    assert_eq!(spoken, ["Both tools answered."]);

    let messages = orchestrator.messages();
    let calls: Vec<_> = messages.last().unwrap().tool_calls().cloned().collect();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].response.starts_with("Error calling tool \"a\""));
    assert!(calls[0].response.contains("backend exploded"));
    assert_eq!(calls[0].parameters["q"], "one");
    assert_eq!(calls[1].response, "b ok");
    assert_eq!(calls[1].parameters["n"], 2);

    let prompts = backend.log.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("<functionResult>"));
    assert!(prompts[1].contains("b ok"));
    assert!(prompts[1].contains("backend exploded"));
}

#[tokio::test]
async fn tool_rounds_are_capped() {
    let call = "<functionCall><name>b</name><parameters></parameters></functionCall>";
    let backend = Arc::new(ScriptedBackend::new(vec![vec![call]; 10]));
    let tools = ToolDispatcher::new().with_backend(Arc::new(StaticTools::echo("steady", &["b"])));
    let orchestrator = Orchestrator::new(
        backend.clone(),
        Arc::new(tools),
        OrchestratorSettings {
            max_tool_rounds: 3,
            ..settings()
        },
    );
    orchestrator.create_conversation(false).await.unwrap();

    let outcome = turn(&orchestrator, "loop").await.0.unwrap();
    assert_eq!(outcome.rounds, 3);
    assert_eq!(outcome.tool_calls, 3);
    assert_eq!(backend.log.prompts().len(), 3);
}

#[tokio::test]
async fn end_keyword_must_terminate_the_reply() {
    let backend = Arc::new(ScriptedBackend::new([
        vec!["Say <END> whenever. ", "Anything else?"],
        vec!["It was nice talking. Goodbye!\n", "<END>"],
    ]));
    let orchestrator = orchestrator(&backend, ToolDispatcher::new());
    orchestrator.create_conversation(false).await.unwrap();

    let ended = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ended);
    let _sub = orchestrator.subscribe_conversation_end(move |()| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (outcome, spoken) = turn(&orchestrator, "how do I stop?").await;
    assert!(!outcome.unwrap().conversation_ended);
    assert_eq!(spoken, ["Say whenever.", "Anything else?"]);
    assert_eq!(ended.load(Ordering::SeqCst), 0);
    assert_eq!(orchestrator.messages().len(), 3);

    let (outcome, spoken) = turn(&orchestrator, "bye").await;
    let outcome = outcome.unwrap();
    assert!(outcome.conversation_ended);
    assert!(!outcome.spoken.contains("<END>"));
    assert_eq!(spoken, ["It was nice talking.", "Goodbye!"]);
    assert_eq!(ended.load(Ordering::SeqCst), 1);

    // Fresh conversation seeded with the same system prompt
    assert_eq!(backend.log.sessions_created.load(Ordering::SeqCst), 2);
    assert_eq!(backend.log.live_sessions(), 1);
    let prompts = backend.log.system_prompts();
    assert_eq!(prompts[0], prompts[1]);

    let messages = orchestrator.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(orchestrator.status(), Status::Ready);
}

#[tokio::test]
async fn unchanged_prompt_keeps_the_session() {
    let backend = Arc::new(ScriptedBackend::new(Vec::<Vec<String>>::new()));
    let orchestrator = orchestrator(&backend, ToolDispatcher::new());

    assert!(orchestrator.create_conversation(false).await.unwrap());
    assert!(!orchestrator.create_conversation(false).await.unwrap());
    assert_eq!(backend.log.sessions_created.load(Ordering::SeqCst), 1);
    assert_eq!(backend.log.sessions_destroyed.load(Ordering::SeqCst), 0);

    assert!(orchestrator.create_conversation(true).await.unwrap());
    assert_eq!(backend.log.sessions_created.load(Ordering::SeqCst), 2);
    assert_eq!(backend.log.live_sessions(), 1);
    assert_eq!(backend.log.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tool_changes_rebuild_the_conversation() {
    let backend = Arc::new(ScriptedBackend::new(Vec::<Vec<String>>::new()));
    let tools = Arc::new(StaticTools::echo("switchable", &["lamp_on"]));
    let dispatcher = ToolDispatcher::new().with_backend(tools.clone());
    let orchestrator = orchestrator(&backend, dispatcher);

    orchestrator.create_conversation(false).await.unwrap();
    assert!(backend.log.system_prompts()[0].contains("lamp_on"));

    // The backend going away changes the tool-derived prompt
    tools.set_reachable(false);
    assert!(orchestrator.create_conversation(false).await.unwrap());
    assert!(!backend.log.system_prompts()[1].contains("lamp_on"));
}

#[tokio::test]
async fn status_walks_through_loading() {
    let backend = Arc::new(ScriptedBackend::new(Vec::<Vec<String>>::new()));
    let orchestrator = orchestrator(&backend, ToolDispatcher::new());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let sub = orchestrator.subscribe_status(move |status| log.lock().unwrap().push(status.clone()));

    orchestrator.create_conversation(false).await.unwrap();
    sub.unsubscribe();
    orchestrator.shutdown().await;

    assert_eq!(
        *seen.lock().unwrap(),
        [
            Status::ModelLoading { progress: 0.0 },
            Status::ModelLoading { progress: 0.5 },
            Status::ModelLoading { progress: 1.0 },
            Status::Idle,
            Status::ConversationLoading,
            Status::Ready,
        ]
    );
    assert_eq!(backend.log.live_sessions(), 0);
}

#[tokio::test]
async fn session_failure_is_reported() {
    let backend = Arc::new(ScriptedBackend::new(Vec::<Vec<String>>::new()));
    backend.fail_sessions(true);
    let orchestrator = orchestrator(&backend, ToolDispatcher::new());

    assert!(orchestrator.create_conversation(false).await.is_err());
    assert!(matches!(orchestrator.status(), Status::Error(_)));

    let err = turn(&orchestrator, "hello?").await.0.unwrap_err();
    assert!(matches!(err, Error::Conversation(_)));

    backend.fail_sessions(false);
    orchestrator.create_conversation(false).await.unwrap();
    assert_eq!(orchestrator.status(), Status::Ready);
}

#[tokio::test]
async fn turns_alternate_user_and_assistant() {
    let backend = Arc::new(ScriptedBackend::new([vec!["One."], vec!["Two."]]));
    let orchestrator = orchestrator(&backend, ToolDispatcher::new());
    orchestrator.create_conversation(false).await.unwrap();

    let updates = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&updates);
    let _sub = orchestrator.subscribe_messages(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    turn(&orchestrator, "first").await.0.unwrap();
    turn(&orchestrator, "second").await.0.unwrap();

    let roles: Vec<Role> = orchestrator.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(orchestrator.messages()[4].text(), "Two.");
    assert!(updates.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn stopped_generation_skips_tools_and_end_check() {
    let mut reply = vec!["Let me think. "; 10];
    reply.push("<functionCall><name>b</name><parameters></parameters></functionCall>");
    reply.push("<END>");
    let backend = Arc::new(
        ScriptedBackend::new([reply]).with_delta_delay(Duration::from_millis(20)),
    );
    let steady = Arc::new(StaticTools::echo("steady", &["b"]));
    let tools = ToolDispatcher::new().with_backend(steady.clone());
    let orchestrator = Arc::new(orchestrator(&backend, tools));
    orchestrator.create_conversation(false).await.unwrap();

    let running = Arc::clone(&orchestrator);
    let turn = tokio::spawn(async move { running.submit_user_turn("think hard", |_| {}).await });

    tokio::time::sleep(Duration::from_millis(70)).await;
    orchestrator.stop_handle().stop();

    let outcome = turn.await.unwrap().unwrap();
    assert!(outcome.stopped);
    assert!(!outcome.conversation_ended);
    assert_eq!(outcome.tool_calls, 0);
    assert_eq!(steady.calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.log.sessions_created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn media_from_tools_is_attached() {
    let backend = Arc::new(ScriptedBackend::new([
        vec!["<functionCall><name>snap</name><parameters></parameters></functionCall>"],
        vec!["Here it is."],
    ]));
    let camera = StaticTools::new("camera", &["snap"], |_, _| {
        Ok(vec![
            ContentItem::text("captured"),
            ContentItem::Image {
                data: "aGk=".to_string(),
                mime_type: "image/png".to_string(),
            },
        ])
    });
    let orchestrator = orchestrator(&backend, ToolDispatcher::new().with_backend(Arc::new(camera)));
    orchestrator.create_conversation(false).await.unwrap();

    turn(&orchestrator, "take a picture").await.0.unwrap();

    let messages = orchestrator.messages();
    let call = messages.last().unwrap().tool_calls().next().cloned().unwrap();
    assert_eq!(call.response, "captured");
    let media = call.response_media.unwrap();
    assert_eq!(media.mime_type, "image/png");
    assert_eq!(media.decode().unwrap(), b"hi");
}

#[tokio::test]
async fn stream_failure_aborts_turn_and_keeps_partial_parts() {
    let backend = Arc::new(ScriptedBackend::new([vec![
        "Let me check. ",
        "<functionCall><name>b</name><parameters></parameters></functionCall>",
        STREAM_FAILURE,
        "Never seen.",
    ]]));
    let steady = Arc::new(StaticTools::echo("steady", &["b"]));
    let tools = ToolDispatcher::new().with_backend(steady.clone());
    let orchestrator = orchestrator(&backend, tools);
    orchestrator.create_conversation(false).await.unwrap();

    let (outcome, spoken) = turn(&orchestrator, "check it").await;
    assert!(matches!(outcome, Err(Error::Llm(_))));
    assert_eq!(spoken, ["Let me check."]);
    assert_eq!(steady.calls.load(Ordering::SeqCst), 0);

    let messages = orchestrator.messages();
    let assistant = messages.last().unwrap();
    assert_eq!(assistant.role, Role::Assistant);
    assert_eq!(assistant.parts.len(), 2);
    assert_eq!(
        assistant.parts[0],
        MessagePart::Text {
            text: "Let me check.".to_string()
        }
    );
    let MessagePart::ToolCall(call) = &assistant.parts[1] else {
        panic!("expected a tool call part");
    };
    assert_eq!(call.function_name, "b");
    assert!(call.response.is_empty());
}
