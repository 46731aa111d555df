//! `homelink check` - start a server and perform the handshake.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{Context, print_json};

/// Arguments for `homelink check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Name of the configured server
    pub server: String,
}

/// Run `homelink check`.
pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client_for(&args.server)?;

    if !ctx.json_output {
        println!("Checking MCP server: {}", args.server);
        println!("  Command: {}", client.config().command);
        println!();
    }

    let info = match client.initialize().await {
        Ok(info) => info,
        Err(e) => {
            if ctx.json_output {
                print_json(&json!({
                    "status": "error",
                    "phase": "initialize",
                    "error": e.to_string(),
                }))?;
            } else {
                println!("✗ Initialization failed: {e}");
            }
            client.close().await?;
            return Err(e.into());
        }
    };
    let pid = client.pid();
    client.close().await?;

    if ctx.json_output {
        print_json(&json!({
            "status": "ready",
            "server": {
                "name": info.server_info.name,
                "version": info.server_info.version,
            },
            "protocol_version": info.protocol_version,
            "capabilities": info.capabilities,
            "pid": pid,
        }))?;
    } else {
        println!(
            "✓ Initialized: {} v{}",
            info.server_info.name, info.server_info.version
        );
        println!("  Protocol: {}", info.protocol_version);
        if let Some(pid) = pid {
            println!("  PID: {pid}");
        }
        if ctx.verbose {
            println!(
                "  Capabilities: {}",
                serde_json::to_string(&info.capabilities)?
            );
        }
    }

    Ok(())
}
