//! Table rendering for CLI output.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;

use crate::domain::models::{Agent, EventEnvelope, Task, Ticket};

fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(headers.iter().map(|h| Cell::new(style(h).bold().to_string())));
    table
}

fn short_id(id: uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub fn agents_table(agents: &[Agent]) -> Table {
    let mut table = base_table(&["ID", "NAME", "TYPE", "STATUS", "PHASE", "CAPABILITIES", "LAST HEARTBEAT"]);
    for agent in agents {
        table.add_row(vec![
            short_id(agent.id),
            agent.name.clone(),
            agent.agent_type.as_str().to_string(),
            agent.status.as_str().to_string(),
            agent.phase_id.map_or_else(|| "-".to_string(), short_id),
            agent.capabilities.iter().cloned().collect::<Vec<_>>().join(","),
            agent.last_heartbeat_at.format("%H:%M:%S").to_string(),
        ]);
    }
    table
}

pub fn tasks_table(tasks: &[Task]) -> Table {
    let mut table = base_table(&["ID", "TITLE", "STATUS", "PRIORITY", "PHASE", "AGENT", "ITER"]);
    for task in tasks {
        table.add_row(vec![
            short_id(task.id),
            task.title.clone(),
            task.status.as_str().to_string(),
            task.priority.as_str().to_string(),
            short_id(task.phase_id),
            task.assigned_agent_id.map_or_else(|| "-".to_string(), short_id),
            task.validation_iteration.to_string(),
        ]);
    }
    table
}

pub fn tickets_table(tickets: &[Ticket]) -> Table {
    let mut table = base_table(&["ID", "TITLE", "PHASE", "APPROVAL", "PRIORITY", "UPDATED"]);
    for ticket in tickets {
        table.add_row(vec![
            short_id(ticket.id),
            ticket.title.clone(),
            short_id(ticket.phase_id),
            ticket.approval_status.as_str().to_string(),
            ticket.priority.as_str().to_string(),
            ticket.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table
}

pub fn events_table(events: &[(u64, EventEnvelope)]) -> Table {
    let mut table = base_table(&["POS", "TOPIC", "PARTITION", "SEQ", "ACTOR", "OCCURRED"]);
    for (position, envelope) in events {
        table.add_row(vec![
            position.to_string(),
            envelope.topic.clone(),
            short_id(envelope.partition_key),
            envelope.sequence.to_string(),
            envelope.actor.label(),
            envelope.occurred_at.format("%H:%M:%S%.3f").to_string(),
        ]);
    }
    table
}
