//! Slash commands for interactive mode

mod approval;
mod form;

pub use approval::ApprovalCommand;
pub use form::FormCommand;

use shipwright_chat::ReleaseForm;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Clear the conversation
    Clear,
    /// Show a message to the user (not sent to the backend)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
    /// List the repository directory
    ListRepos,
    /// Replace the form's repositories after resolving these names
    SetRepositories(Vec<String>),
    /// Approve or reject the pending step of the last workflow
    Decide {
        approved: bool,
        comment: Option<String>,
    },
    /// Show the approval state of the last workflow
    ApprovalStatus,
    /// Print the conversation so far
    History,
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, form: &mut ReleaseForm) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "repos" => CommandResult::ListRepos,

        "history" => CommandResult::History,

        "form" | "f" => CommandResult::Message(FormCommand::show(form)),

        "repo" | "r" => FormCommand::repositories(args, form),

        "release" => FormCommand::release_type(args, form),

        "sprint" => FormCommand::sprint(args, form),

        "fix-version" | "fix" => FormCommand::fix_version(args, form),

        "approve" => ApprovalCommand::decide(true, args),

        "reject" => ApprovalCommand::decide(false, args),

        "approval" => CommandResult::ApprovalStatus,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?             Show this help message
  /repos                    List repositories known to the backend
  /form, /f                 Show the release form sent with each message
  /repo, /r <names...>      Set repositories (space or comma separated, "none" clears)
  /release <type>           Set release type (release/hotfix/none)
  /sprint <name>            Set sprint name ("none" clears)
  /fix-version <v>          Set fix version ("none" clears)
  /approval                 Show whether the last workflow awaits approval
  /approve [comment]        Approve the last workflow's pending step
  /reject [comment]         Reject the last workflow's pending step
  /history                  Show the conversation
  /clear, /c                Clear conversation history
  /quit, /exit, /q          Exit shipwright

Press Ctrl-C while a response is streaming to stop waiting for it.

Examples:
  /repo billing-service web
  /release hotfix
  /fix-version 2.4.1
  /approve looks good"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_api::ReleaseType;

    #[test]
    fn test_plain_text_is_not_a_command() {
        let mut form = ReleaseForm::default();
        assert_eq!(execute_command("cut a release", &mut form), None);
    }

    #[test]
    fn test_basic_commands() {
        let mut form = ReleaseForm::default();
        assert_eq!(execute_command("/clear", &mut form), Some(CommandResult::Clear));
        assert_eq!(execute_command("  /Q ", &mut form), Some(CommandResult::Exit));
        assert_eq!(execute_command("/repos", &mut form), Some(CommandResult::ListRepos));
        assert_eq!(
            execute_command("/bogus arg", &mut form),
            Some(CommandResult::Unknown("bogus".into()))
        );
        assert!(matches!(
            execute_command("/help", &mut form),
            Some(CommandResult::Message(_))
        ));
    }

    #[test]
    fn test_form_commands_mutate_form() {
        let mut form = ReleaseForm::default();
        execute_command("/release hotfix", &mut form);
        execute_command("/sprint Sprint 42", &mut form);
        execute_command("/fix-version 2.4.1", &mut form);
        assert_eq!(form.release_type, Some(ReleaseType::Hotfix));
        assert_eq!(form.sprint_name.as_deref(), Some("Sprint 42"));
        assert_eq!(form.fix_version.as_deref(), Some("2.4.1"));

        execute_command("/sprint none", &mut form);
        assert_eq!(form.sprint_name, None);
    }

    #[test]
    fn test_repo_command_defers_resolution() {
        let mut form = ReleaseForm::default();
        assert_eq!(
            execute_command("/repo billing-service, web", &mut form),
            Some(CommandResult::SetRepositories(vec![
                "billing-service".into(),
                "web".into()
            ]))
        );
        // Resolution happens in the caller
        assert!(form.repositories.is_empty());
    }

    #[test]
    fn test_decisions() {
        let mut form = ReleaseForm::default();
        assert_eq!(
            execute_command("/approve ship it", &mut form),
            Some(CommandResult::Decide {
                approved: true,
                comment: Some("ship it".into())
            })
        );
        assert_eq!(
            execute_command("/reject", &mut form),
            Some(CommandResult::Decide {
                approved: false,
                comment: None
            })
        );
    }
}
