//! Toolflow - 工具编排引擎
//!
//! 入口：初始化日志、加载配置与能力表、创建会话并提交命令行中的请求，打印结果。
//!
//! 用法：toolflow [--config <path>] [--upload] <request...>

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use toolflow::capability::CapabilityRegistry;
use toolflow::config::{load_config, AppConfig};
use toolflow::core::{spawn_session, Orchestrator, SessionState};
use toolflow::flow::{EventSink, FlowEvent};
use toolflow::llm::create_llm_from_config;
use toolflow::tools::ExecutorRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toolflow::observability::init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut upload_file = false;
    let mut words = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(args.next().context("--config needs a path")?))
            }
            "--upload" => upload_file = true,
            _ => words.push(arg),
        }
    }
    let request = words.join(" ");
    if request.trim().is_empty() {
        bail!("usage: toolflow [--config <path>] [--upload] <request...>");
    }

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let capabilities = match &cfg.app.capabilities_path {
        Some(path) => CapabilityRegistry::from_toml_file(path)
            .with_context(|| format!("Failed to load capabilities from {}", path.display()))?,
        None => {
            tracing::warn!("No capabilities_path configured, only direct answers are available");
            CapabilityRegistry::new()
        }
    };

    let llm = create_llm_from_config(&cfg);
    // 远程执行器由部署方注册；这里只有内置直答执行器（Orchestrator 自动补上）
    let orchestrator = Arc::new(Orchestrator::new(
        llm.clone(),
        Arc::new(capabilities),
        ExecutorRegistry::new(),
        &cfg,
    ));

    tracing::info!(
        app = cfg.app.name.as_deref().unwrap_or("toolflow"),
        capabilities = orchestrator.capabilities().capability_list().len(),
        "orchestrator ready"
    );

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<FlowEvent>();
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                tracing::debug!(event = %line, "flow");
            }
        }
    });

    let state = SessionState::new().with_upload_file(upload_file);
    let mut session = spawn_session(orchestrator, state, EventSink::new(event_tx));
    session.submit(request).context("Failed to submit request")?;

    let report = session
        .next_report()
        .await
        .context("Session closed without a report")?
        .context("Turn failed")?;
    println!("{}", report.render());
    session.quit();

    let usage = llm.usage();
    tracing::info!(
        calls = usage.calls,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        "llm usage"
    );
    Ok(())
}
