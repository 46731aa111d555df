//! `homelink tools` - list the tools offered by one server or all of them.

use anyhow::Result;
use clap::Args;
use serde_json::{Value, json};

use homelink_mcp::ToolDefinition;

use super::{Context, print_json};

/// Arguments for `homelink tools`.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Name of the configured server; every enabled server when omitted
    pub server: Option<String>,

    /// Show full input schemas
    #[arg(long)]
    pub full: bool,
}

/// Run `homelink tools`.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let Some(server) = args.server.as_deref() else {
        return run_all(&args, ctx).await;
    };
    let client = ctx.client_for(server)?;

    let listed = async {
        client.initialize().await?;
        client.list_tools().await
    }
    .await;
    client.close().await?;
    let tools = listed?;

    if ctx.json_output {
        let tools_json: Vec<_> = tools.iter().map(|t| tool_json(t, args.full)).collect();
        return print_json(&json!(tools_json));
    }

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("Available tools ({}):", tools.len());
    for tool in &tools {
        print_tool(tool, args.full)?;
    }

    Ok(())
}

/// List tools across every enabled server. Servers that fail to start are
/// skipped.
async fn run_all(args: &ToolsArgs, ctx: &Context) -> Result<()> {
    let mut manager = ctx.manager()?;
    let configured = manager.config_count();
    let connected = manager.connect_all().await;
    let tools = manager.all_tools_flat().await;
    manager.shutdown_all().await;

    if ctx.json_output {
        let tools_json: Vec<_> = tools
            .iter()
            .map(|(server, t)| {
                let mut value = tool_json(t, args.full);
                value["server"] = json!(server);
                value
            })
            .collect();
        return print_json(&json!(tools_json));
    }

    if configured == 0 {
        println!("No MCP servers configured.");
        return Ok(());
    }
    if connected < configured {
        eprintln!("warning: {connected} of {configured} servers connected");
    }
    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("Available tools ({}):", tools.len());
    let mut current: Option<&str> = None;
    for (server, tool) in &tools {
        if current != Some(server.as_str()) {
            println!("[{server}]");
            current = Some(server.as_str());
        }
        print_tool(tool, args.full)?;
    }

    Ok(())
}

fn tool_json(tool: &ToolDefinition, full: bool) -> Value {
    if full {
        json!({
            "name": tool.name,
            "description": tool.description,
            "schema": tool.input_schema,
        })
    } else {
        json!({
            "name": tool.name,
            "description": tool.description,
        })
    }
}

fn print_tool(tool: &ToolDefinition, full: bool) -> Result<()> {
    println!("  • {}", tool.name);
    if let Some(desc) = &tool.description {
        for line in textwrap_simple(desc, 70).lines() {
            println!("      {line}");
        }
    }
    if full {
        println!(
            "      Schema: {}",
            serde_json::to_string(&tool.input_schema)?
        );
    }
    Ok(())
}

/// Simple text wrapping helper.
fn textwrap_simple(text: &str, max_width: usize) -> String {
    let mut result = String::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            result.push_str(&current_line);
            result.push('\n');
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        result.push_str(&current_line);
    }

    result
}
