//! Configuration scaffolding for `autoreply init`.
//!
//! Initializes `~/.autoreply/` with a commented config and the default
//! data files without overwriting anything that already exists.

use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct TemplateFile {
    relative_path: &'static str,
    contents: &'static str,
}

const CONFIG_TEMPLATE: &str = r#"# AutoReply configuration. All keys are optional; missing keys use the
# built-in defaults shown here.

[general]
bot_name = "autoreply"
# Sender id allowed to issue /commands. Empty disables admin commands.
owner_id = ""

[behavior]
max_message_len = 1000

[limits]
max_actions_per_minute = 50
backoff_multiplier = 1.5
max_block_secs = 300

[flood]
window_secs = 60
max_per_window = 7
mute_secs = 60
sweep_interval_secs = 300

[pacing]
typing_min_ms = 800
typing_max_ms = 4000
cooldown_min_ms = 500
cooldown_max_ms = 2000
reaction_chance = 0.3

[matcher]
cache_ttl_secs = 300

[server]
enabled = true
port = 3000
"#;

const REPLIES_TEMPLATE: &str = r#"{
  "hi": ["Hello!", "Hi there!", "Hey!"],
  "hello": ["Hi!", "Hello!", "Hey there!"],
  "test": ["Test successful!", "Working!"],
  "how are you": ["I'm good, thanks!", "Doing well! How about you?"],
  "good morning": ["Good morning!", "Morning! Have a great day!"],
  "good night": ["Good night!", "Sweet dreams!"],
  "thanks": ["You're welcome!", "Anytime!"],
  "bye": ["Bye!", "Goodbye!", "See you!"]
}
"#;

const REACTIONS_TEMPLATE: &str = r#"["👍", "❤️", "😂", "🔥", "🎉"]
"#;

const SETTINGS_TEMPLATE: &str = r#"{
  "behavior": {
    "use_borders": true,
    "auto_react": true,
    "reply_in_groups": false,
    "reply_in_channels": false
  }
}
"#;

const TEMPLATE_FILES: &[TemplateFile] = &[
    TemplateFile {
        relative_path: "config.toml",
        contents: CONFIG_TEMPLATE,
    },
    TemplateFile {
        relative_path: "data/replies.json",
        contents: REPLIES_TEMPLATE,
    },
    TemplateFile {
        relative_path: "data/reactions.json",
        contents: REACTIONS_TEMPLATE,
    },
    TemplateFile {
        relative_path: "data/settings.json",
        contents: SETTINGS_TEMPLATE,
    },
];

pub async fn initialize_default() -> Result<InitReport> {
    let config_path = crate::config::default_config_path();
    let root = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid default config path: {}", config_path.display()))?
        .to_path_buf();
    initialize_at_root(&root).await
}

pub async fn initialize_at_root(root: &Path) -> Result<InitReport> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root: root.to_path_buf(),
        created: Vec::new(),
        skipped: Vec::new(),
    };

    for template in TEMPLATE_FILES {
        let target = root.join(template.relative_path);
        match tokio::fs::metadata(&target).await {
            Ok(_) => {
                report.skipped.push(target);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        anyhow::anyhow!("create config dir {}: {e}", parent.display())
                    })?;
                }
                tokio::fs::write(&target, template.contents)
                    .await
                    .map_err(|e| {
                        anyhow::anyhow!("write config template {}: {e}", target.display())
                    })?;
                report.created.push(target);
            }
            Err(err) => {
                return Err(anyhow::anyhow!(
                    "inspect config path {}: {err}",
                    target.display()
                ));
            }
        }
    }

    Ok(report)
}
