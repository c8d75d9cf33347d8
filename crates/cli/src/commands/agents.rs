// Agent catalog listing command

use crate::output::{print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use juris_resilience::coordinator::AgentCatalog;

pub fn run(output: OutputFormat) -> Result<()> {
    let agents = AgentCatalog::default().list();

    if output.is_text() {
        if agents.is_empty() {
            println!("No agents found");
            return Ok(());
        }

        print_table_header(&[("AGENT", 26), ("GRAPH", 14)]);
        for agent in &agents {
            print_table_row(&[(&agent.agent_id, 26), (&agent.kind.to_string(), 14)]);
        }
    } else {
        output.print_value(&serde_json::json!({ "data": agents, "total": agents.len() }))?;
    }

    Ok(())
}
