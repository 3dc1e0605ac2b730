//! Owner-only admin commands.
//!
//! Commands arrive as chat messages starting with `/` from the
//! configured owner. The set is a closed enum so dispatch is an
//! exhaustive match and a new command cannot be added without the
//! compiler pointing at every place it must be handled.

use crate::responder::Responder;
use ar_channels::SenderId;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Help,
    Status,
    Stats,
    AddReply { keyword: String, response: String },
    RemoveReply { keyword: String, response: Option<String> },
    Test { text: String },
    Set { path: String, value: String },
    Get { path: String },
    Limit { per_minute: u32 },
    Unmute { sender: String },
    Reset,
    ResetLimiter,
    Clear,
    Reload,
}

const HELP_TEXT: &str = "\
Commands:
/help - this list
/status - lifecycle and queue
/stats - full counters
/addreply <keyword> | <response> - add a reply
/removereply <keyword> [| <response>] - remove a response or keyword
/test <text> - dry-run the matcher
/set <path> <value> - change a setting (e.g. behavior.use_borders false)
/get <path> - read a setting
/limit <n> - set the per-minute action ceiling
/unmute <sender> - lift a flood mute early
/reset - zero the pipeline counters
/resetlimiter - clear the rate limiter window
/clear - drop queued messages
/reload - reload replies from disk";

impl AdminCommand {
    /// Parse a `/command args` message. `None` for unknown commands or
    /// malformed arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().strip_prefix('/')?;
        let (name, rest) = match text.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (text, ""),
        };

        match name.to_lowercase().as_str() {
            "help" => Some(Self::Help),
            "status" => Some(Self::Status),
            "stats" => Some(Self::Stats),
            "addreply" => {
                let (keyword, response) = rest.split_once('|')?;
                let keyword = keyword.trim();
                let response = response.trim();
                if keyword.is_empty() || response.is_empty() {
                    return None;
                }
                Some(Self::AddReply {
                    keyword: keyword.to_string(),
                    response: response.to_string(),
                })
            }
            "removereply" => {
                let (keyword, response) = match rest.split_once('|') {
                    Some((keyword, response)) => {
                        (keyword.trim(), Some(response.trim().to_string()))
                    }
                    None => (rest, None),
                };
                if keyword.is_empty() {
                    return None;
                }
                Some(Self::RemoveReply {
                    keyword: keyword.to_string(),
                    response,
                })
            }
            "test" => {
                if rest.is_empty() {
                    return None;
                }
                Some(Self::Test {
                    text: rest.to_string(),
                })
            }
            "set" => {
                let (path, value) = rest.split_once(char::is_whitespace)?;
                Some(Self::Set {
                    path: path.to_string(),
                    value: value.trim().to_string(),
                })
            }
            "get" => {
                if rest.is_empty() {
                    return None;
                }
                Some(Self::Get {
                    path: rest.to_string(),
                })
            }
            "limit" => {
                let per_minute = rest.parse().ok()?;
                Some(Self::Limit { per_minute })
            }
            "unmute" => {
                if rest.is_empty() {
                    return None;
                }
                Some(Self::Unmute {
                    sender: rest.to_string(),
                })
            }
            "reset" => Some(Self::Reset),
            "resetlimiter" => Some(Self::ResetLimiter),
            "clear" => Some(Self::Clear),
            "reload" => Some(Self::Reload),
            _ => None,
        }
    }

    pub async fn execute(self, responder: &Responder) -> String {
        match self {
            Self::Help => HELP_TEXT.to_string(),
            Self::Status => {
                let stats = responder.stats();
                format!(
                    "State: {}\nQueue: {}\nWindow: {}/{} actions\nMuted senders: {}",
                    stats.lifecycle_state,
                    stats.pipeline.queue_length,
                    stats.limiter.actions_in_window,
                    stats.limiter.limit,
                    stats.muted_senders,
                )
            }
            Self::Stats => {
                let stats = responder.stats();
                format!(
                    "Received: {}\nProcessed: {}\nResponded: {}\nSilenced: {}\nErrors: {}\nQueue: {}\nPatterns: {}\nCached lookups: {}\nLimiter: {}/{} in window, {} blocked",
                    stats.pipeline.received,
                    stats.pipeline.processed,
                    stats.pipeline.responded,
                    stats.pipeline.silenced,
                    stats.pipeline.errors,
                    stats.pipeline.queue_length,
                    stats.reply_patterns,
                    stats.cached_lookups,
                    stats.limiter.actions_in_window,
                    stats.limiter.limit,
                    stats.limiter.blocked_actions,
                )
            }
            Self::AddReply { keyword, response } => {
                match responder.add_reply(&keyword, &response).await {
                    Ok(true) => format!("Added reply for \"{keyword}\""),
                    Ok(false) => "Nothing added (empty keyword or response).".to_string(),
                    Err(e) => format!("Added in memory but saving failed: {e}"),
                }
            }
            Self::RemoveReply { keyword, response } => {
                match responder.remove_reply(&keyword, response.as_deref()).await {
                    Ok(true) => format!("Removed from \"{keyword}\""),
                    Ok(false) => format!("No such reply for \"{keyword}\""),
                    Err(e) => format!("Removed in memory but saving failed: {e}"),
                }
            }
            Self::Test { text } => match responder.test_response(&text) {
                Some(reply) => format!("Would reply: {reply}"),
                None => "No reply would be sent.".to_string(),
            },
            Self::Set { path, value } => {
                let parsed: Value =
                    serde_json::from_str(&value).unwrap_or(Value::String(value.clone()));
                match responder.settings().set(&path, parsed).await {
                    Ok(()) => format!("Set {path} = {value}"),
                    Err(e) => format!("Failed to set {path}: {e}"),
                }
            }
            Self::Get { path } => match responder.settings().get(&path) {
                Some(value) => format!("{path} = {value}"),
                None => format!("{path} is not set"),
            },
            Self::Limit { per_minute } => {
                if responder.update_rate_limit(per_minute) {
                    format!("Rate limit set to {per_minute}/min")
                } else {
                    "Rejected: limit must be between 1 and 100.".to_string()
                }
            }
            Self::Unmute { sender } => {
                if responder.unmute_sender(&SenderId::from(sender.as_str())) {
                    format!("Unmuted {sender}")
                } else {
                    format!("{sender} was not muted")
                }
            }
            Self::Reset => {
                responder.reset_stats();
                "Counters reset.".to_string()
            }
            Self::ResetLimiter => {
                responder.reset_limiter();
                "Rate limiter reset.".to_string()
            }
            Self::Clear => {
                let dropped = responder.clear_queue();
                format!("Dropped {dropped} queued message(s).")
            }
            Self::Reload => {
                let patterns = responder.reload_replies().await;
                format!("Reloaded {patterns} reply pattern(s) from disk.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(AdminCommand::parse("/help"), Some(AdminCommand::Help));
        assert_eq!(AdminCommand::parse("/STATUS"), Some(AdminCommand::Status));
        assert_eq!(AdminCommand::parse(" /stats "), Some(AdminCommand::Stats));
        assert_eq!(AdminCommand::parse("/reset"), Some(AdminCommand::Reset));
        assert_eq!(
            AdminCommand::parse("/resetlimiter"),
            Some(AdminCommand::ResetLimiter)
        );
        assert_eq!(AdminCommand::parse("/clear"), Some(AdminCommand::Clear));
        assert_eq!(AdminCommand::parse("/reload"), Some(AdminCommand::Reload));
    }

    #[test]
    fn parses_addreply_with_pipe_separator() {
        assert_eq!(
            AdminCommand::parse("/addreply good evening | Evening!"),
            Some(AdminCommand::AddReply {
                keyword: "good evening".to_string(),
                response: "Evening!".to_string(),
            })
        );
        assert_eq!(AdminCommand::parse("/addreply nopipe"), None);
        assert_eq!(AdminCommand::parse("/addreply | response only"), None);
    }

    #[test]
    fn parses_removereply_with_optional_response() {
        assert_eq!(
            AdminCommand::parse("/removereply hi"),
            Some(AdminCommand::RemoveReply {
                keyword: "hi".to_string(),
                response: None,
            })
        );
        assert_eq!(
            AdminCommand::parse("/removereply hi | Hello!"),
            Some(AdminCommand::RemoveReply {
                keyword: "hi".to_string(),
                response: Some("Hello!".to_string()),
            })
        );
        assert_eq!(AdminCommand::parse("/removereply"), None);
    }

    #[test]
    fn parses_set_get_limit_and_test() {
        assert_eq!(
            AdminCommand::parse("/set behavior.use_borders false"),
            Some(AdminCommand::Set {
                path: "behavior.use_borders".to_string(),
                value: "false".to_string(),
            })
        );
        assert_eq!(
            AdminCommand::parse("/get behavior.auto_react"),
            Some(AdminCommand::Get {
                path: "behavior.auto_react".to_string(),
            })
        );
        assert_eq!(
            AdminCommand::parse("/limit 25"),
            Some(AdminCommand::Limit { per_minute: 25 })
        );
        assert_eq!(AdminCommand::parse("/limit lots"), None);
        assert_eq!(
            AdminCommand::parse("/unmute sender-9"),
            Some(AdminCommand::Unmute {
                sender: "sender-9".to_string(),
            })
        );
        assert_eq!(
            AdminCommand::parse("/test good morning"),
            Some(AdminCommand::Test {
                text: "good morning".to_string(),
            })
        );
        assert_eq!(AdminCommand::parse("/test"), None);
    }

    #[test]
    fn unknown_or_plain_text_is_rejected() {
        assert_eq!(AdminCommand::parse("/frobnicate"), None);
        assert_eq!(AdminCommand::parse("hello"), None);
        assert_eq!(AdminCommand::parse(""), None);
    }
}
