//! Session lifecycle tests against an in-memory launcher.
//!
//! The mock reads behavior from each spec: `command` selects how launch goes
//! ("ok", "fail", "hang", "interrupt"), `args` are the advertised tool names,
//! and env `CLOSE` selects how release goes ("hang", "error").

use futures_util::future::{BoxFuture, pending};
use relay_mcp::{
    Connection, Launcher, McpError, McpSession, McpToolContent, McpToolInfo, McpToolResult,
    ProviderState, ServerSpec, SessionError, SessionOptions, SessionState, ToolProviderHandle,
};
use relay_types::{ToolError, ToolRouter};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Ledger {
    launches: Vec<String>,
    closes: Vec<String>,
    calls: Vec<String>,
}

#[derive(Clone, Default)]
struct MockLauncher {
    ledger: Arc<Mutex<Ledger>>,
    interrupt: CancellationToken,
}

impl MockLauncher {
    fn launches(&self) -> Vec<String> {
        self.ledger.lock().unwrap().launches.clone()
    }

    fn closes(&self) -> Vec<String> {
        self.ledger.lock().unwrap().closes.clone()
    }

    fn calls(&self) -> Vec<String> {
        self.ledger.lock().unwrap().calls.clone()
    }
}

impl Launcher for MockLauncher {
    fn launch<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, McpError>> {
        Box::pin(async move {
            self.ledger.lock().unwrap().launches.push(spec.name.clone());
            match spec.command.as_str() {
                "fail" => Err(McpError::Protocol(format!(
                    "{} crashed during initialize",
                    spec.name
                ))),
                "hang" => pending().await,
                "interrupt" => {
                    self.interrupt.cancel();
                    pending().await
                }
                _ => Ok(Box::new(MockConnection {
                    name: spec.name.clone(),
                    tools: spec.args.clone(),
                    close_mode: spec.env.get("CLOSE").cloned(),
                    ledger: Arc::clone(&self.ledger),
                }) as Box<dyn Connection>),
            }
        })
    }
}

struct MockConnection {
    name: String,
    tools: Vec<String>,
    close_mode: Option<String>,
    ledger: Arc<Mutex<Ledger>>,
}

impl Connection for MockConnection {
    fn tools(&self) -> BoxFuture<'_, Result<Vec<McpToolInfo>, McpError>> {
        let tools = self
            .tools
            .iter()
            .map(|t| McpToolInfo {
                name: t.clone(),
                description: format!("{t} on {}", self.name),
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect();
        Box::pin(async move { Ok(tools) })
    }

    fn invoke<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, Result<McpToolResult, McpError>> {
        Box::pin(async move {
            self.ledger
                .lock()
                .unwrap()
                .calls
                .push(format!("{}/{tool_name}", self.name));
            if tool_name == "boom" {
                return Err(McpError::JsonRpc {
                    server: self.name.clone(),
                    code: -32000,
                    message: "tool exploded".into(),
                });
            }
            Ok(McpToolResult {
                content: vec![McpToolContent::Text {
                    text: format!("{}/{tool_name} {arguments}", self.name),
                }],
                is_error: false,
                structured_content: None,
            })
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), McpError>> {
        Box::pin(async move {
            match self.close_mode.as_deref() {
                Some("hang") => pending().await,
                Some("error") => Err(McpError::Protocol(format!("{} refused to exit", self.name))),
                _ => {
                    self.ledger.lock().unwrap().closes.push(self.name.clone());
                    Ok(())
                }
            }
        })
    }
}

fn ok(name: &str, tools: &[&str]) -> ServerSpec {
    ServerSpec::new(name, "ok").with_args(tools.iter().copied())
}

fn quick() -> SessionOptions {
    SessionOptions {
        startup_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_millis(200),
    }
}

fn tool_names(session: &McpSession) -> Vec<String> {
    session
        .registry()
        .iter()
        .map(|t| t.qualified_name.clone())
        .collect()
}

async fn opened(specs: Vec<ServerSpec>, launcher: &MockLauncher) -> McpSession {
    let mut session = McpSession::new(specs, launcher.clone(), quick());
    session.open(&CancellationToken::new()).await.unwrap();
    session
}

#[tokio::test]
async fn open_attempts_every_spec_exactly_once() {
    let launcher = MockLauncher::default();
    let specs = vec![
        ok("a", &["one"]),
        ServerSpec::new("b", "fail"),
        ok("c", &["two"]),
        ServerSpec::new("d", "hang"),
    ];
    let mut session = opened(specs, &launcher).await;

    assert_eq!(session.handles().len(), 4);
    let mut launches = launcher.launches();
    launches.sort();
    assert_eq!(launches, ["a", "b", "c", "d"]);

    let states: Vec<ProviderState> = session.handles().iter().map(|h| h.state()).collect();
    assert_eq!(
        states,
        [
            ProviderState::Ready,
            ProviderState::Failed,
            ProviderState::Ready,
            ProviderState::Failed,
        ]
    );
    session.close().await;
}

#[tokio::test]
async fn registry_build_is_deterministic() {
    let specs = || {
        vec![
            ok("docs", &["search", "fetch", "search"]),
            ok("web", &["fetch", "search"]),
            ok("files", &["read"]),
        ]
    };

    let launcher = MockLauncher::default();
    let mut first = opened(specs(), &launcher).await;
    let mut second = opened(specs(), &launcher).await;

    assert_eq!(tool_names(&first), tool_names(&second));
    assert_eq!(
        tool_names(&first),
        [
            "search",
            "fetch",
            "docs.search",
            "web.fetch",
            "web.search",
            "read"
        ]
    );

    first.refresh();
    assert_eq!(tool_names(&first), tool_names(&second));

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn colliding_search_tools_are_both_registered() {
    let launcher = MockLauncher::default();
    let mut session = opened(vec![ok("docs", &["search"]), ok("web", &["search"])], &launcher).await;

    assert_eq!(session.registry().len(), 2);
    let web = session.registry().get("web.search").unwrap();
    assert_eq!(web.server, "web");
    assert_eq!(web.tool_name, "search");

    let result = session
        .route_tool_call("web.search", serde_json::json!({"q": "rust"}))
        .await
        .unwrap();
    assert_eq!(
        result.content,
        [McpToolContent::Text {
            text: r#"web/search {"q":"rust"}"#.into()
        }]
    );

    session.route_tool_call("search", serde_json::json!({})).await.unwrap();
    assert_eq!(launcher.calls(), ["web/search", "docs/search"]);
    session.close().await;
}

#[tokio::test]
async fn failed_provider_degrades_without_aborting() {
    let launcher = MockLauncher::default();
    let specs = vec![
        ok("alpha", &["a1", "a2"]),
        ServerSpec::new("beta", "fail"),
        ok("gamma", &["g1"]),
    ];
    let mut session = opened(specs, &launcher).await;

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(tool_names(&session), ["a1", "a2", "g1"]);
    assert!(session.registry().iter().all(|t| t.server != "beta"));

    assert!(session.is_degraded());
    assert_eq!(session.warnings().len(), 1);
    assert!(session.warnings()[0].contains("beta"));

    let summary = session.summary();
    assert_eq!(summary[1].state, ProviderState::Failed);
    assert_eq!(summary[1].tools, 0);
    assert!(summary[1].error.as_deref().unwrap().contains("crashed"));
    assert_eq!(summary[0].tools, 2);

    let report = session.close().await;
    assert_eq!(report.stopped, ["alpha", "gamma"]);
    assert!(report.is_clean());
}

#[tokio::test]
async fn session_with_no_ready_providers_is_still_active() {
    let launcher = MockLauncher::default();
    let mut session = opened(
        vec![ServerSpec::new("x", "fail"), ServerSpec::new("y", "fail")],
        &launcher,
    )
    .await;

    assert_eq!(session.state(), SessionState::Active);
    assert!(session.registry().is_empty());
    assert_eq!(session.warnings().len(), 2);
    session.close().await;
}

#[tokio::test]
async fn unknown_tool_leaves_session_untouched() {
    let launcher = MockLauncher::default();
    let mut session = opened(vec![ok("docs", &["search"])], &launcher).await;
    let before = tool_names(&session);

    match session
        .route_tool_call("nonexistent.tool", serde_json::json!({}))
        .await
    {
        Err(SessionError::UnknownTool { name }) => assert_eq!(name, "nonexistent.tool"),
        other => panic!("Expected UnknownTool, got: {other:?}"),
    }

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(tool_names(&session), before);
    assert!(launcher.calls().is_empty());
    session.close().await;
}

#[tokio::test]
async fn provider_error_is_a_tool_level_failure() {
    let launcher = MockLauncher::default();
    let mut session = opened(vec![ok("lab", &["boom", "echo"])], &launcher).await;

    match session.route_tool_call("boom", serde_json::json!({})).await {
        Err(SessionError::ToolInvocation { tool, server, source }) => {
            assert_eq!(tool, "boom");
            assert_eq!(server, "lab");
            assert!(matches!(source, McpError::JsonRpc { code: -32000, .. }));
        }
        other => panic!("Expected ToolInvocation, got: {other:?}"),
    }

    assert_eq!(session.state(), SessionState::Active);
    assert!(session.route_tool_call("echo", serde_json::json!({})).await.is_ok());
    session.close().await;
}

#[tokio::test]
async fn close_after_interrupted_open_stops_started_handles() {
    let launcher = MockLauncher::default();
    let specs = vec![
        ok("first", &["f"]),
        ServerSpec::new("second", "interrupt"),
        ok("third", &["t"]),
    ];
    let mut session = McpSession::new(specs, launcher.clone(), quick());

    let result = session.open(&launcher.interrupt).await;
    assert!(matches!(result, Err(SessionError::Interrupted)));
    assert_eq!(session.state(), SessionState::Initializing);

    let report = session.close().await;
    assert_eq!(report.stopped, ["first", "third"]);
    assert!(report.is_clean());
    assert_eq!(launcher.closes(), ["first", "third"]);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(
        session
            .handles()
            .iter()
            .all(|h| h.state() == ProviderState::Stopped)
    );
}

#[tokio::test]
async fn cancelled_before_open_starts_nothing() {
    let launcher = MockLauncher::default();
    let mut session = McpSession::new(vec![ok("a", &["x"])], launcher.clone(), quick());

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        session.open(&cancel).await,
        Err(SessionError::Interrupted)
    ));
    assert!(launcher.launches().is_empty());

    let report = session.close().await;
    assert!(report.stopped.is_empty());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn slow_provider_fails_on_startup_timeout() {
    let launcher = MockLauncher::default();
    let specs = vec![ServerSpec::new("sloth", "hang"), ok("quick", &["q"])];
    let mut session = McpSession::new(
        specs,
        launcher.clone(),
        SessionOptions {
            startup_timeout: Duration::from_millis(50),
            ..SessionOptions::default()
        },
    );
    session.open(&CancellationToken::new()).await.unwrap();

    assert_eq!(tool_names(&session), ["q"]);
    assert_eq!(session.warnings().len(), 1);
    assert!(session.warnings()[0].contains("timed out after 50ms"));
    session.close().await;
}

#[tokio::test]
async fn stop_twice_releases_once() {
    let launcher = MockLauncher::default();
    let mut handle = ToolProviderHandle::new(ok("solo", &["x"]));
    handle
        .start(&launcher, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(handle.list_tools().await.unwrap().len(), 1);

    handle.stop(Duration::from_secs(1)).await.unwrap();
    handle.stop(Duration::from_secs(1)).await.unwrap();

    assert_eq!(handle.state(), ProviderState::Stopped);
    assert_eq!(launcher.closes(), ["solo"]);
}

#[tokio::test]
async fn close_is_best_effort_and_never_fails() {
    let launcher = MockLauncher::default();
    let specs = vec![
        ok("stuck", &["s"]).with_env("CLOSE", "hang"),
        ok("grumpy", &["g"]).with_env("CLOSE", "error"),
        ok("fine", &["f"]),
    ];
    let mut session = McpSession::new(
        specs,
        launcher.clone(),
        SessionOptions {
            shutdown_timeout: Duration::from_millis(50),
            ..quick()
        },
    );
    session.open(&CancellationToken::new()).await.unwrap();

    let report = session.close().await;
    assert_eq!(report.stopped, ["stuck", "grumpy", "fine"]);
    let failed: Vec<&str> = report.failures.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(failed, ["stuck", "grumpy"]);
    assert!(report.failures[0].1.contains("timed out"));
    assert_eq!(launcher.closes(), ["fine"]);

    assert_eq!(session.state(), SessionState::Closed);
    assert!(
        session
            .handles()
            .iter()
            .all(|h| h.state() == ProviderState::Stopped)
    );

    // Second close is a no-op
    let again = session.close().await;
    assert!(again.stopped.is_empty() && again.is_clean());
}

#[tokio::test]
async fn closed_session_routes_nothing() {
    let launcher = MockLauncher::default();
    let mut session = opened(vec![ok("docs", &["search"])], &launcher).await;
    session.close().await;

    assert!(session.registry().is_empty());
    assert!(matches!(
        session.route_tool_call("search", serde_json::json!({})).await,
        Err(SessionError::UnknownTool { .. })
    ));
}

#[tokio::test]
async fn session_serves_as_tool_router() {
    let launcher = MockLauncher::default();
    let mut session = opened(vec![ok("lab", &["echo", "boom"])], &launcher).await;
    let router: &dyn ToolRouter = &session;

    let names: Vec<String> = router.tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["echo", "boom"]);

    let output = router
        .route("echo", serde_json::json!({"n": 1}))
        .await
        .unwrap();
    assert_eq!(output.to_text(), r#"lab/echo {"n":1}"#);
    assert!(!output.is_error);

    assert!(matches!(
        router.route("missing", serde_json::json!({})).await,
        Err(ToolError::UnknownTool { name }) if name == "missing"
    ));
    match router.route("boom", serde_json::json!({})).await {
        Err(ToolError::ExecutionFailed(message)) => assert!(message.contains("tool exploded")),
        other => panic!("Expected ExecutionFailed, got: {other:?}"),
    }

    session.close().await;
}
