/// Configuration management
use crate::auth::CurrentUser;
use crate::error::{Result, VoxieError};
use crate::feed::reconciler::DEFAULT_PENDING_TIMEOUT;
use crate::feed::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = ".voxie";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the local post store
    pub data_dir: PathBuf,

    /// Email of the signed-in user (none = browse only)
    pub email: Option<String>,

    /// Display name stamped on new posts
    pub display_name: Option<String>,

    /// How long an optimistic edit/delete may stay unconfirmed
    pub pending_timeout: Duration,

    /// How often stale optimistic entries are checked
    pub timeout_check_interval: Duration,

    /// Start on the profile feed instead of the home feed
    pub start_on_profile: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            email: None,
            display_name: None,
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
            timeout_check_interval: Duration::from_secs(1),
            start_on_profile: false,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        VoxieError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = PathBuf::from(path);
                    i += 2;
                }
                "--email" => {
                    let email = args.get(i + 1).ok_or_else(|| {
                        VoxieError::Config("--email requires an address".to_string())
                    })?;
                    config.email = Some(email.clone());
                    i += 2;
                }
                "--name" => {
                    let name = args.get(i + 1).ok_or_else(|| {
                        VoxieError::Config("--name requires a display name".to_string())
                    })?;
                    config.display_name = Some(name.clone());
                    i += 2;
                }
                "--pending-timeout-ms" => {
                    let ms = args.get(i + 1).ok_or_else(|| {
                        VoxieError::Config("--pending-timeout-ms requires a value".to_string())
                    })?;
                    config.pending_timeout = parse_millis(ms)?;
                    i += 2;
                }
                "--profile" => {
                    config.start_on_profile = true;
                    i += 1;
                }
                other => {
                    return Err(VoxieError::Config(format!(
                        "Unknown argument: {}. Usage: {} [--email <addr>] [--name <name>] [--data-dir <path>] [--pending-timeout-ms <ms>] [--profile]",
                        other,
                        args.first().map(String::as_str).unwrap_or("voxie")
                    )));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(dir) = std::env::var("VOXIE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(ms) = std::env::var("VOXIE_PENDING_TIMEOUT_MS") {
            config.pending_timeout = parse_millis(&ms)?;
        }

        if let Some(email) = &config.email {
            let form = crate::auth::LoginForm {
                email: email.clone(),
                password: "unchecked".to_string(),
            };
            if let Some(msg) = form.validate().email {
                return Err(VoxieError::Config(format!("--email: {}", msg)));
            }
        }

        Ok(config)
    }

    /// Identity for this run, if an email was given
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.email
            .as_deref()
            .map(|email| CurrentUser::from_email(email, self.display_name.clone()))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            pending_timeout: self.pending_timeout,
            timeout_check_interval: self.timeout_check_interval,
        }
    }
}

fn parse_millis(s: &str) -> Result<Duration> {
    let ms = s
        .parse::<u64>()
        .map_err(|_| VoxieError::Config(format!("Invalid millisecond value: {}", s)))?;
    if ms == 0 {
        return Err(VoxieError::Config("Pending timeout must be positive".to_string()));
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&args(&["voxie"])).unwrap();
        assert_eq!(config.pending_timeout, Duration::from_secs(10));
        assert!(config.current_user().is_none());
    }

    #[test]
    fn test_flags() {
        let config = Config::from_args(&args(&[
            "voxie",
            "--email",
            "alice@example.com",
            "--name",
            "Alice",
            "--pending-timeout-ms",
            "2500",
            "--profile",
        ]))
        .unwrap();
        assert_eq!(config.pending_timeout, Duration::from_millis(2500));
        assert!(config.start_on_profile);
        let user = config.current_user().unwrap();
        assert_eq!(user.author_display_name(), "Alice");
    }

    #[test]
    fn test_bad_input() {
        assert!(Config::from_args(&args(&["voxie", "--email"])).is_err());
        assert!(Config::from_args(&args(&["voxie", "--email", "nope"])).is_err());
        assert!(Config::from_args(&args(&["voxie", "--pending-timeout-ms", "0"])).is_err());
        assert!(Config::from_args(&args(&["voxie", "--bogus"])).is_err());
    }
}
