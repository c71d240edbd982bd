//! Client side of the remote dispatch endpoint, run by coordinators

use anyhow::{Context, Result, bail};
use clap::Args;
use crew_core::{DISPATCH_URL_ENV, DispatchRequest, DispatchResponse, TASK_ID_ENV};
use tracing::debug;

#[derive(Args)]
pub struct DispatchArgs {
    /// Role to run
    #[arg(short, long)]
    pub role: String,

    /// Instructions for the role
    pub task: String,

    /// System prompt for a role that isn't registered (auto strategy)
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Tools for an ad hoc role (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub tools: Option<Vec<String>>,

    /// Turn limit for an ad hoc role
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Dispatch endpoint (defaults to $CREW_DISPATCH_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// Print the full response as JSON
    #[arg(long)]
    pub json: bool,
}

impl DispatchArgs {
    fn request(&self) -> DispatchRequest {
        DispatchRequest {
            task_id: std::env::var(TASK_ID_ENV).ok(),
            system_prompt: self.system_prompt.clone(),
            allowed_tools: self.tools.clone(),
            max_turns: self.max_turns,
            ..DispatchRequest::new(self.role.as_str(), self.task.as_str())
        }
    }

    fn endpoint(&self) -> Result<String> {
        let base = match &self.url {
            Some(url) => url.clone(),
            None => std::env::var(DISPATCH_URL_ENV).with_context(|| {
                format!("{DISPATCH_URL_ENV} is not set; dispatch only works inside a crew task")
            })?,
        };
        Ok(format!("{}/dispatch", base.trim_end_matches('/')))
    }
}

pub async fn run(args: DispatchArgs) -> Result<()> {
    let endpoint = args.endpoint()?;
    let request = args.request();
    debug!(%endpoint, role = %request.role, "Sending dispatch");

    let response = reqwest::Client::new()
        .post(&endpoint)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to reach dispatch endpoint at {endpoint}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("Dispatch rejected ({status}): {body}");
    }

    let response: DispatchResponse = response
        .json()
        .await
        .context("Invalid response from dispatch endpoint")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render(&response));
    }

    if !response.ok {
        bail!("{} failed", response.label);
    }
    Ok(())
}

/// Plain-text result for the coordinator to read
fn render(response: &DispatchResponse) -> String {
    let mut text = String::new();
    if response.ok {
        text.push_str(&response.output);
    } else {
        text.push_str(&format!(
            "Dispatch {} failed: {}\n",
            response.label,
            response.error.as_deref().unwrap_or("no details")
        ));
        if !response.output.is_empty() {
            text.push_str("\nPartial output:\n");
            text.push_str(&response.output);
        }
    }
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
