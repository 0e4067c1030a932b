/// Configuration management
use crate::conversation::ParticipantId;
use crate::error::{ChatError, Result};
use crate::store::DEFAULT_FEED_BUFFER;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = ".syncin";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the message and profile databases
    pub data_dir: PathBuf,

    /// Signed-in user
    pub user: Option<ParticipantId>,

    /// Command and its arguments (everything that is not a flag)
    pub command: Vec<String>,

    /// Capacity of each conversation subscription channel
    pub feed_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            user: None,
            command: Vec::new(),
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut data_dir: Option<PathBuf> = None;
        let mut user: Option<ParticipantId> = None;
        let mut feed_buffer: Option<usize> = None;
        let mut command = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--user" => {
                    let id = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--user requires a user id".to_string())
                    })?;
                    user = Some(ParticipantId::from(id.as_str()));
                    i += 2;
                }
                "--feed-buffer" => {
                    let n = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--feed-buffer requires a number".to_string())
                    })?;
                    feed_buffer = Some(n.parse::<usize>().map_err(|_| {
                        ChatError::Config("--feed-buffer must be a positive number".to_string())
                    })?);
                    i += 2;
                }
                other => {
                    command.push(other.to_string());
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(dir) = std::env::var("SYNCIN_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(id) = std::env::var("SYNCIN_USER") {
            user = Some(ParticipantId::from(id));
        }

        if let Some(u) = &user {
            if u.is_empty() {
                return Err(ChatError::Config("user id must not be empty".to_string()));
            }
        }

        let defaults = Self::default();
        Ok(Self {
            data_dir: data_dir.unwrap_or(defaults.data_dir),
            user,
            command,
            feed_buffer: feed_buffer.unwrap_or(defaults.feed_buffer).max(1),
        })
    }

    /// The signed-in user, required by every command that talks to the store
    pub fn require_user(&self) -> Result<&ParticipantId> {
        self.user.as_ref().ok_or_else(|| {
            ChatError::Config("no user set; pass --user <id> or SYNCIN_USER".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_args_flags_and_command() {
        if std::env::var("SYNCIN_DATA_DIR").is_ok() || std::env::var("SYNCIN_USER").is_ok() {
            return;
        }
        let cfg = Config::from_args(&args(&[
            "syncin", "--user", "alice", "send", "bob", "hi", "--data-dir", "/tmp/x",
        ]))
        .unwrap();
        assert_eq!(cfg.user, Some(ParticipantId::from("alice")));
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(cfg.command, args(&["send", "bob", "hi"]));
        assert_eq!(cfg.feed_buffer, DEFAULT_FEED_BUFFER);
    }

    #[test]
    fn test_missing_flag_value() {
        assert!(matches!(
            Config::from_args(&args(&["syncin", "--user"])),
            Err(ChatError::Config(_))
        ));
        assert!(matches!(
            Config::from_args(&args(&["syncin", "--feed-buffer", "many"])),
            Err(ChatError::Config(_))
        ));
    }
}
