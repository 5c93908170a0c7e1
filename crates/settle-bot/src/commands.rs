#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandKind {
    AnalyzeThread,
    AnalyzeGroup,
    AnalyzeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlashCommand {
    AnalyzeThread { thread_ts: String },
    AnalyzeGroup,
    AnalyzeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandError {
    Unknown(String),
    Usage(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandDef {
    kind: CommandKind,
    name: &'static str,
    usage: &'static str,
    description: &'static str,
}

const COMMAND_DEFS: &[CommandDef] = &[
    CommandDef {
        kind: CommandKind::AnalyzeThread,
        name: "/analyze-thread",
        usage: "/analyze-thread <thread_ts>",
        description: "Analyze a thread now, without waiting for it to settle",
    },
    CommandDef {
        kind: CommandKind::AnalyzeGroup,
        name: "/analyze-group",
        usage: "/analyze-group",
        description: "Flush this channel's buffered messages into groups",
    },
    CommandDef {
        kind: CommandKind::AnalyzeStatus,
        name: "/analyze-status",
        usage: "/analyze-status",
        description: "Show buffered messages, armed timers and watched threads",
    },
];

pub(crate) fn parse_command(command: &str, text: &str) -> Result<SlashCommand, CommandError> {
    let name = command.trim();
    let def = COMMAND_DEFS
        .iter()
        .find(|def| def.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| CommandError::Unknown(name.to_string()))?;

    match def.kind {
        CommandKind::AnalyzeThread => {
            let thread_ts = text
                .split_whitespace()
                .next()
                .filter(|ts| is_slack_ts(ts))
                .ok_or(CommandError::Usage(def.usage))?;
            Ok(SlashCommand::AnalyzeThread {
                thread_ts: thread_ts.to_string(),
            })
        }
        CommandKind::AnalyzeGroup => Ok(SlashCommand::AnalyzeGroup),
        CommandKind::AnalyzeStatus => Ok(SlashCommand::AnalyzeStatus),
    }
}

/// `seconds.micros` as Slack formats message timestamps.
fn is_slack_ts(value: &str) -> bool {
    let mut parts = value.splitn(2, '.');
    let secs = parts.next().unwrap_or_default();
    let frac = parts.next().unwrap_or_default();
    !secs.is_empty()
        && secs.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

/// Reply to an @-mention.
pub(crate) fn help_text(min_replies: usize) -> String {
    let mut text = format!(
        "Hi! I summarize threads once they have at least {min_replies} replies and have gone quiet, \
         and I recap bursts of channel conversation.\n\nCommands:"
    );
    for def in COMMAND_DEFS {
        text.push_str(&format!("\n• `{}` {}", def.usage, def.description));
    }
    text
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "Unknown command `{name}`."),
            Self::Usage(usage) => write!(f, "Usage: `{usage}`"),
        }
    }
}
