//! `homelink servers` - list configured MCP servers.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use homelink_config::ServerEntry;

use super::{Context, print_json, truncate};

/// Arguments for `homelink servers`.
#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Include disabled servers
    #[arg(long)]
    pub all: bool,
}

/// Run `homelink servers`.
pub async fn run(args: ServersArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;
    let servers: Vec<&ServerEntry> = config
        .servers
        .iter()
        .filter(|s| args.all || s.enabled)
        .collect();

    if ctx.json_output {
        let output: Vec<_> = servers
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "command": s.command,
                    "args": s.args,
                    "transport_mode": s.transport_mode,
                    "log_level": s.log_level,
                    "enabled": s.enabled,
                })
            })
            .collect();
        return print_json(&json!(output));
    }

    if servers.is_empty() {
        println!("No MCP servers configured.");
        println!();
        println!("Add a [[servers]] entry to homelink.toml or the user config:");
        println!("  [[servers]]");
        println!("  name = \"smartthings\"");
        println!("  command = \"node\"");
        println!("  args = [\"dist/index.js\"]");
        return Ok(());
    }

    println!("{:<20} {:<10} {:<10} {:<40}", "NAME", "STATUS", "LOG", "COMMAND");
    println!("{}", "-".repeat(80));

    for server in servers {
        let status = if server.enabled { "enabled" } else { "disabled" };
        let mut command = server.command.clone();
        if !server.args.is_empty() {
            command.push(' ');
            command.push_str(&server.args.join(" "));
        }

        println!(
            "{:<20} {:<10} {:<10} {:<40}",
            truncate(&server.name, 20),
            status,
            server.log_level,
            truncate(&command, 40)
        );

        if ctx.verbose {
            println!("  MCP_TRANSPORT={}", server.transport_mode);
            println!("  LOG_LEVEL={}", server.log_level);
        }
    }

    Ok(())
}
