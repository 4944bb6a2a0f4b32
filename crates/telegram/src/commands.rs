/// Slash commands the bot understands. Anything else starting with `/` is
/// reported as [`BotCommand::Unknown`] so the dispatcher can drop it quietly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    New,
    Restart,
    Cancel,
    Leads { limit: u32 },
    Unknown { name: String },
}

pub const DEFAULT_LEAD_PAGE: u32 = 10;
pub const MAX_LEAD_PAGE: u32 = 30;

impl BotCommand {
    /// Parses `/name[@bot] args`. Returns `None` for text that is not a command.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix('/')?;

        let mut parts = body.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }

        let command = match name.as_str() {
            "start" => Self::Start,
            "new" => Self::New,
            "restart" => Self::Restart,
            "cancel" => Self::Cancel,
            "leads" => Self::Leads { limit: lead_page_size(parts.next()) },
            _ => Self::Unknown { name },
        };
        Some(command)
    }

    /// Commands that abandon the current intake and start over.
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::Start | Self::New | Self::Restart | Self::Cancel)
    }
}

fn lead_page_size(argument: Option<&str>) -> u32 {
    argument
        .and_then(|raw| raw.parse::<i64>().ok())
        .map(|limit| limit.clamp(1, i64::from(MAX_LEAD_PAGE)) as u32)
        .unwrap_or(DEFAULT_LEAD_PAGE)
}
