//! /form, /repo, /release, /sprint, /fix-version - edit the release form

use super::CommandResult;
use shipwright_api::ReleaseType;
use shipwright_chat::ReleaseForm;

pub struct FormCommand;

impl FormCommand {
    pub fn show(form: &ReleaseForm) -> String {
        let mut output = String::from("Release form\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');

        let repositories = if form.repositories.is_empty() {
            "(none)".to_string()
        } else {
            form.repositories.join(", ")
        };
        output.push_str(&format!("Repositories: {}\n", repositories));
        output.push_str(&format!(
            "Release type: {}\n",
            form.release_type.map(|t| t.as_str()).unwrap_or("(none)")
        ));
        output.push_str(&format!(
            "Sprint:       {}\n",
            form.sprint_name.as_deref().unwrap_or("(none)")
        ));
        output.push_str(&format!(
            "Fix version:  {}",
            form.fix_version.as_deref().unwrap_or("(none)")
        ));
        output
    }

    pub fn repositories(args: &str, form: &mut ReleaseForm) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(
                "Usage: /repo <names...>  (use /repos to list, /repo none to clear)".into(),
            );
        }
        if is_none(args) {
            form.repositories.clear();
            return CommandResult::Message("Cleared repositories.".into());
        }

        let names = args
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        CommandResult::SetRepositories(names)
    }

    pub fn release_type(args: &str, form: &mut ReleaseForm) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(format!(
                "Release type: {}\nSet with: /release <release|hotfix|none>",
                form.release_type.map(|t| t.as_str()).unwrap_or("(none)")
            ));
        }
        if is_none(args) {
            form.release_type = None;
            return CommandResult::Message("Cleared release type.".into());
        }

        match args.parse::<ReleaseType>() {
            Ok(release_type) => {
                form.release_type = Some(release_type);
                CommandResult::Message(format!("Release type set to: {}", release_type))
            }
            Err(e) => CommandResult::Message(e),
        }
    }

    pub fn sprint(args: &str, form: &mut ReleaseForm) -> CommandResult {
        set_text("Sprint", "/sprint <name|none>", args, &mut form.sprint_name)
    }

    pub fn fix_version(args: &str, form: &mut ReleaseForm) -> CommandResult {
        set_text("Fix version", "/fix-version <version|none>", args, &mut form.fix_version)
    }
}

fn set_text(label: &str, usage: &str, args: &str, field: &mut Option<String>) -> CommandResult {
    if args.is_empty() {
        return CommandResult::Message(format!(
            "{}: {}\nSet with: {}",
            label,
            field.as_deref().unwrap_or("(none)"),
            usage
        ));
    }
    if is_none(args) {
        *field = None;
        return CommandResult::Message(format!("Cleared {}.", label.to_lowercase()));
    }

    *field = Some(args.to_string());
    CommandResult::Message(format!("{} set to: {}", label, args))
}

fn is_none(args: &str) -> bool {
    matches!(args.to_lowercase().as_str(), "none" | "clear" | "-")
}
