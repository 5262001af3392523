//! CLI entry point: starts the MCP HTTP server standalone, without an
//! attached agent turn engine. Tool-call clients connect over HTTP/JSON
//! the same way the agent's own `McpClient` does.

use agentctl::config::RuntimeConfig;
use agentctl::mcp_server::{self, ServerContext};
use agentctl::mcp_tools::ToolRegistry;
use std::net::SocketAddr;

fn usage() -> String {
    "usage: agentctl [--addr HOST:PORT] [--bearer-token TOKEN]".to_string()
}

fn parse_args(args: &[String]) -> Result<(SocketAddr, Option<String>), String> {
    let mut addr = SocketAddr::from(([127, 0, 0, 1], 8088));
    let mut bearer_token = std::env::var("AGENTCTL_BEARER_TOKEN").ok();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                let value = args.get(i + 1).ok_or_else(usage)?;
                addr = value.parse().map_err(|e| format!("invalid --addr: {e}"))?;
                i += 2;
            }
            "--bearer-token" => {
                let value = args.get(i + 1).ok_or_else(usage)?;
                bearer_token = Some(value.clone());
                i += 2;
            }
            "-h" | "--help" => return Err(usage()),
            other => return Err(format!("unrecognized argument: {other}\n{}", usage())),
        }
    }

    Ok((addr, bearer_token))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    agentctl::logging::init_with_config(&RuntimeConfig::from_env());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (addr, bearer_token) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    if bearer_token.is_none() {
        log::warn!("starting without a bearer token; every /mcp request will be accepted unauthenticated");
    }

    let registry = ToolRegistry::bootstrap();
    let ctx = ServerContext::new(registry, bearer_token);
    let handle = mcp_server::http::start_server(ctx, addr).await?;
    log::info!("mcp server listening on {}", handle.addr);

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received, stopping mcp server");
    handle.stop().await;

    Ok(())
}
