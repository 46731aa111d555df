//! `homelink call` - invoke a tool on a server.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::{Value, json};

use super::{Context, print_json};

/// Arguments for `homelink call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Name of the configured server
    pub server: String,

    /// Tool to invoke
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    pub args: String,
}

/// Parse `--args`, which must be a JSON object.
fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

/// Run `homelink call`.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(&args.args)?;
    let client = ctx.client_for(&args.server)?;

    let outcome = async {
        client.initialize().await?;
        client.call_tool(&args.tool, arguments).await
    }
    .await;
    client.close().await?;
    let result = outcome?;

    if ctx.json_output {
        print_json(&json!(result))?;
    } else if let Some(text) = result.text() {
        println!("{text}");
    } else if let Some(data) = &result.data {
        println!("{}", serde_json::to_string_pretty(data)?);
    }

    if result.is_error() {
        bail!("tool '{}' reported an error", args.tool);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let value = parse_arguments(r#"{"deviceId": "abc"}"#).unwrap();
        assert_eq!(value["deviceId"], "abc");
        assert!(parse_arguments("[1, 2]").is_err());
        assert!(parse_arguments("{not json").is_err());
    }
}
