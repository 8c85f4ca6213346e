//! Wren - 命令行入口
//!
//! 初始化日志、按配置创建 Agent，逐行读取 stdin 作为用户输入，在同一会话中跑 turn 并打印回复。
//! 输入 /reset 清零用量计数，/usage 查看累计用量。
//! turn 进行中按 Ctrl-C 取消当前 turn（包括正在执行的工具）；空闲时 Ctrl-C 退出。

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use wren::{config::load_config, observability, Agent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let agent = Agent::from_config(&cfg).context("Failed to create agent")?;
    let session_id = std::env::var("WREN_SESSION").unwrap_or_else(|_| "cli".to_string());
    let session = agent.open_session(&session_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.supervisor().shutdown();
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        match input {
            "" => continue,
            "/reset" => {
                agent.reset_usage(&session).await;
                println!("usage counters reset");
            }
            "/usage" => {
                let usage = session.lock().await.usage;
                println!(
                    "requests={} input={} output={} total={}",
                    usage.requests, usage.input_tokens, usage.output_tokens, usage.total_tokens
                );
            }
            _ => {
                let turn = agent.run_turn(&session, input);
                tokio::pin!(turn);
                let outcome = tokio::select! {
                    outcome = &mut turn => outcome,
                    _ = tokio::signal::ctrl_c() => {
                        session.supervisor().cancel_current();
                        turn.await
                    }
                };
                println!("{}", outcome.text);
            }
        }
    }
    Ok(())
}
