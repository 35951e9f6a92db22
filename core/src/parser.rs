//! Optional front end that recognizes structured commands directly in user
//! input, short-circuiting the planner conversation. The request pipeline
//! works unchanged when no parser is configured.

use deskpilot_protocol::Command;

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct ParsedIntent {
    pub kind: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedRequest {
    pub commands: Vec<Command>,
    pub intent: ParsedIntent,
}

pub trait CommandParser: Send + Sync {
    fn parse(&self, input: &str) -> Result<ParsedRequest>;
}
