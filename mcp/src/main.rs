use clap::Parser;
use tracing_subscriber::EnvFilter;

use slack_mcp_runtime::{McpCommands, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "slack-mcp",
    version,
    about = "Slack MCP server over stdio"
)]
struct Cli {
    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "slack_mcp_runtime=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let code = run_mcp(cli.command).await;
    std::process::exit(code);
}
