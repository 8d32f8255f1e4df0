//! Shared output formatting for joblink commands.
//!
//! `--json` wraps every result in one envelope; otherwise commands build a
//! [`HumanOutput`] with a header line and optional sections.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::notice::{Notice, NoticeLevel};

pub const SCHEMA_VERSION: &str = "joblink.v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            summary: Vec::new(),
            details: Vec::new(),
            warnings: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    /// Header from a notice; failures also land in the warnings section.
    pub fn from_notice(notice: &Notice) -> Self {
        let mut output = Self::new(notice.to_string());
        if notice.is_failure() {
            output.push_warning(notice.title.clone());
        }
        for warning in &notice.warnings {
            output.push_warning(warning.clone());
        }
        output
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let warnings = human.map(|h| h.warnings.clone()).unwrap_or_default();
        let next_steps = human.map(|h| h.next_steps.clone()).unwrap_or_default();

        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            data: &'a T,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            warnings: Vec<String>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            next_steps: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data,
            warnings,
            next_steps,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if options.quiet {
        return Ok(());
    }

    if let Some(human) = human {
        println!("{}", format_human(human));
    }

    Ok(())
}

/// Emit the outcome of a dashboard action.
///
/// Soft notices (success, info) are successes. Warning and error notices
/// only appear here when an action already mapped its failure; hard
/// failures go through [`emit_error`].
pub fn emit_notice(options: OutputOptions, command: &str, notice: &Notice) -> Result<()> {
    let human = HumanOutput::from_notice(notice);
    emit_success(options, command, notice, Some(&human))
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    let hint = next_steps.first().map(|step| step.as_str());
    let notice = Notice::from_error(err);
    if json {
        #[derive(Serialize)]
        struct ErrorBody<'a> {
            message: &'a str,
            code: i32,
            kind: &'static str,
            notice: &'a Notice,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<serde_json::Value>,
        }

        #[derive(Serialize)]
        struct Envelope<'a> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            error: ErrorBody<'a>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            next_steps: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            error: ErrorBody {
                message: &err.to_string(),
                code: err.exit_code(),
                kind: error_kind(err),
                notice: &notice,
                details: err.details(),
            },
            next_steps,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    match notice.level {
        NoticeLevel::Success | NoticeLevel::Info => eprintln!("{notice}"),
        NoticeLevel::Warning | NoticeLevel::Error => eprintln!("error: {err}"),
    }
    if let Some(hint) = hint {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = Vec::new();
    lines.push(output.header.clone());

    push_summary(&mut lines, &output.summary);
    push_section(&mut lines, "Details", &output.details);
    push_section(&mut lines, "Warnings", &output.warnings);
    push_section(&mut lines, "Next steps", &output.next_steps);

    lines.join("\n")
}

/// Global flags whose value is a separate argument.
const VALUE_FLAGS: &[&str] = &["--backend-url", "--backend-key", "--state-dir", "--config"];

pub fn infer_command_name_from_args() -> String {
    infer_command_name(std::env::args().skip(1))
}

fn infer_command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut words = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
        } else if !arg.starts_with('-') {
            words.push(arg);
        }
    }

    let mut words = words.into_iter();
    let command = match words.next() {
        Some(cmd) => cmd,
        None => return "joblink".to_string(),
    };

    if matches!(command.as_str(), "note" | "global-note") {
        if let Some(sub) = words.next() {
            return format!("{command} {sub}");
        }
    }
    command
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        0 => "already_recorded",
        2 => "user_error",
        3 => "policy_blocked",
        _ => "operation_failed",
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::MissingEnv(var) => vec![format!("export {var}=...")],
        Error::NotSignedIn | Error::Backend { status: 401, .. } => {
            vec!["joblink login --email <email>".to_string()]
        }
        Error::PriorityLocked(_) => vec!["joblink tasks --tab open --priority high".to_string()],
        Error::TaskNotFound(_) => vec!["joblink tasks".to_string()],
        Error::InvalidConfig(_) => vec!["fix .joblink.toml then retry".to_string()],
        _ => Vec::new(),
    }
}

fn push_summary(lines: &mut Vec<String>, summary: &[(String, String)]) {
    if summary.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push("Summary:".to_string());
    for (key, value) in summary {
        if value.is_empty() {
            lines.push(format!("- {key}"));
        } else {
            lines.push(format!("- {key}: {value}"));
        }
    }
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push(format!("{title}:"));
    for item in items {
        lines.push(format!("- {item}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_output_sections() {
        let mut output = HumanOutput::new("Dashboard");
        output.push_summary("open", "3");
        output.push_summary("locked", "");
        output.push_next_step("joblink feed");

        let text = format_human(&output);
        assert_eq!(
            text,
            "Dashboard\n\nSummary:\n- open: 3\n- locked\n\nNext steps:\n- joblink feed"
        );
    }

    #[test]
    fn failing_notice_is_listed_as_warning() {
        let notice = Notice::from_error(&Error::PriorityLocked("7".into()));
        let text = format_human(&HumanOutput::from_notice(&notice));
        assert!(text.starts_with("Finish High priority first"));
        assert!(text.contains("Warnings:\n- Finish High priority first"));
    }

    #[test]
    fn command_name_skips_flag_values() {
        let args = |raw: &[&str]| raw.iter().map(|arg| arg.to_string()).collect::<Vec<_>>();
        assert_eq!(
            infer_command_name(args(&["--state-dir", "/tmp/jl", "tasks", "--page", "2"])),
            "tasks"
        );
        assert_eq!(
            infer_command_name(args(&["--json", "--config=jl.toml", "note", "set", "7", "hi"])),
            "note set"
        );
        assert_eq!(infer_command_name(args(&["--config", "jl.toml"])), "joblink");
    }

    #[test]
    fn error_kinds_follow_exit_codes() {
        assert_eq!(error_kind(&Error::NotSignedIn), "policy_blocked");
        assert_eq!(error_kind(&Error::MissingEnv("X")), "user_error");
        assert_eq!(error_kind(&Error::AlreadyRecorded("x".into())), "already_recorded");
        assert_eq!(
            error_kind(&Error::OperationFailed("x".into())),
            "operation_failed"
        );
    }
}
