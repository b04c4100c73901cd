//! Concierge 无头运行
//!
//! 从 stdin 逐行读取用户输入，打印回复；空行跳过，`quit` / `exit` 或 EOF 退出。
//! 用于本地联调：业务技能由宿主注册，这里只注册 echo。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use concierge::config::load_config;
use concierge::core::{spawn_janitor, OrchestratorBuilder, TurnRequest};
use concierge::skills::EchoSkill;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    concierge::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    let janitor_interval = Duration::from_secs(cfg.cache.sweep_interval_secs.max(1));

    let orchestrator = Arc::new(
        OrchestratorBuilder::new(cfg)
            .with_skill(EchoSkill)
            .build()
            .context("Failed to build orchestrator")?,
    );
    let janitor = spawn_janitor(Arc::clone(&orchestrator), janitor_interval);

    let session_id = uuid::Uuid::new_v4().to_string();
    let user_id = std::env::var("CONCIERGE_USER").unwrap_or_else(|_| "local".to_string());
    tracing::info!(session = %session_id, user = %user_id, "concierge ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }
        if utterance.eq_ignore_ascii_case("quit") || utterance.eq_ignore_ascii_case("exit") {
            break;
        }
        let response = orchestrator
            .handle_turn(TurnRequest::new(&user_id, &session_id, utterance))
            .await;
        println!("{}", response.text);
    }

    orchestrator.shutdown().await;
    let _ = janitor.await;
    Ok(())
}
