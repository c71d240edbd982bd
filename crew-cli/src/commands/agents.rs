use anyhow::{Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::config::{AgentConfig, ConfigLoader};

#[derive(Args)]
pub struct AgentsArgs {
    /// Show one agent in full, including its system prompt
    pub name: Option<String>,
}

pub fn run(args: AgentsArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    // Surface duplicate or otherwise unusable definitions the same way `run` would
    config.registry()?;

    match args.name {
        Some(name) => match config.agents.iter().find(|agent| agent.name == name) {
            Some(agent) => show_agent(agent),
            None => {
                let known: Vec<_> = config.agents.iter().map(|a| a.name.as_str()).collect();
                bail!("Unknown agent: {name}. Available agents: {}", known.join(", "))
            }
        },
        None => list_agents(&config.agents),
    }
    Ok(())
}

fn list_agents(agents: &[AgentConfig]) {
    if agents.is_empty() {
        println!("No agents configured.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Description").fg(Color::Cyan),
        Cell::new("Tools").fg(Color::Cyan),
        Cell::new("Max turns").fg(Color::Cyan),
    ]);

    for agent in agents {
        table.add_row(vec![
            Cell::new(&agent.name),
            Cell::new(&agent.description),
            Cell::new(format_tools(&agent.tools)),
            Cell::new(agent.max_turns),
        ]);
    }

    println!("{table}");
}

fn show_agent(agent: &AgentConfig) {
    println!("Name:        {}", agent.name);
    if !agent.description.is_empty() {
        println!("Description: {}", agent.description);
    }
    println!("Tools:       {}", format_tools(&agent.tools));
    println!("Max turns:   {}", agent.max_turns);
    println!();
    println!("{}", agent.system_prompt);
}

fn format_tools(tools: &[String]) -> String {
    if tools.is_empty() {
        "(worker defaults)".to_string()
    } else {
        tools.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tools() {
        assert_eq!(format_tools(&[]), "(worker defaults)");
        assert_eq!(
            format_tools(&["Read".to_string(), "Bash".to_string()]),
            "Read, Bash"
        );
    }
}
