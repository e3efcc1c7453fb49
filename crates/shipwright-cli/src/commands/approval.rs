//! /approve and /reject - answer a workflow waiting on a human

use super::CommandResult;

pub struct ApprovalCommand;

impl ApprovalCommand {
    pub fn decide(approved: bool, args: &str) -> CommandResult {
        CommandResult::Decide {
            approved,
            comment: (!args.is_empty()).then(|| args.to_string()),
        }
    }
}
