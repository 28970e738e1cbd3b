//! Shared mapping helpers used by the source adapters: duration formatting,
//! call classification, usage event naming and app categories.

/// Formats a call duration given in seconds: `45s`, `2m 5s`, `1h 2m 3s`.
pub fn format_duration_secs(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!(
            "{}h {}m {}s",
            seconds / 3600,
            (seconds % 3600) / 60,
            seconds % 60
        )
    }
}

/// Formats a foreground-usage duration given in milliseconds.
/// Hour-scale values drop the seconds: `1h 2m`.
pub fn format_duration_ms(milliseconds: i64) -> String {
    let seconds = milliseconds.max(0) / 1000;
    if seconds < 3600 {
        format_duration_secs(seconds)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
    Voicemail,
    Rejected,
    Blocked,
    AnsweredExternally,
    Unknown,
}

impl CallType {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => CallType::Incoming,
            2 => CallType::Outgoing,
            3 => CallType::Missed,
            4 => CallType::Voicemail,
            5 => CallType::Rejected,
            6 => CallType::Blocked,
            7 => CallType::AnsweredExternally,
            _ => CallType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Incoming => "incoming",
            CallType::Outgoing => "outgoing",
            CallType::Missed => "missed",
            CallType::Voicemail => "voicemail",
            CallType::Rejected => "rejected",
            CallType::Blocked => "blocked",
            CallType::AnsweredExternally => "answered_externally",
            CallType::Unknown => "unknown",
        }
    }

    pub fn direction(&self) -> &'static str {
        match self {
            CallType::Incoming
            | CallType::Missed
            | CallType::Voicemail
            | CallType::Rejected
            | CallType::Blocked
            | CallType::AnsweredExternally => "inbound",
            CallType::Outgoing => "outbound",
            CallType::Unknown => "unknown",
        }
    }

    /// Outcome of the call; connected calls are told apart by a non-zero duration.
    pub fn status(&self, duration_secs: i64) -> &'static str {
        match self {
            CallType::Missed => "missed",
            CallType::Rejected => "rejected",
            CallType::Blocked => "blocked",
            _ if duration_secs > 0 => "answered",
            _ => "no_answer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageEventType {
    Foreground,
    Background,
    ConfigurationChange,
    UserInteraction,
    ShortcutInvocation,
    Unknown,
}

impl UsageEventType {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => UsageEventType::Foreground,
            2 => UsageEventType::Background,
            5 => UsageEventType::ConfigurationChange,
            7 => UsageEventType::UserInteraction,
            8 => UsageEventType::ShortcutInvocation,
            _ => UsageEventType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageEventType::Foreground => "foreground",
            UsageEventType::Background => "background",
            UsageEventType::ConfigurationChange => "configuration_change",
            UsageEventType::UserInteraction => "user_interaction",
            UsageEventType::ShortcutInvocation => "shortcut_invocation",
            UsageEventType::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            UsageEventType::Foreground => "App moved to foreground",
            UsageEventType::Background => "App moved to background",
            UsageEventType::ConfigurationChange => "Configuration changed",
            UsageEventType::UserInteraction => "User interaction",
            UsageEventType::ShortcutInvocation => "Shortcut invoked",
            UsageEventType::Unknown => "Unknown event",
        }
    }
}

/// Label for a platform app category code. `None` means the catalog had no
/// category information for the package.
pub fn app_category_label(code: Option<i32>) -> &'static str {
    match code {
        Some(0) => "Game",
        Some(1) => "Audio",
        Some(2) => "Video",
        Some(3) => "Image",
        Some(4) => "Social",
        Some(5) => "News",
        Some(6) => "Maps",
        Some(7) => "Productivity",
        Some(_) => "Other",
        None => "Unknown",
    }
}
