use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

const CONFIG_PATHS: [&str; 2] = ["./isodemux.toml", "./config.toml"];

/// Options of a segmented ISOBMFF reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Explicit source locator. When set the reader opens it at initialization
    /// and treats the input as completely loaded.
    pub src: Option<String>,
    /// Open media segments without checking fragment sequence order.
    pub no_order_check: bool,
    /// Accept locators with a non-local scheme (`http://`, ...).
    pub allow_remote: bool,
}

impl ReaderOptions {
    /// Loads options from the environment, then from the first config file found.
    ///
    /// Environment variables: `ISODEMUX_SRC`, `ISODEMUX_NO_ORDER_CHECK`,
    /// `ISODEMUX_ALLOW_REMOTE`. Config files hold `key = value` lines using the
    /// same keys in lower case without the prefix.
    pub fn load() -> Self {
        let mut options = ReaderOptions::default();

        if let Ok(src) = env::var("ISODEMUX_SRC") {
            options.set("src", &src);
        }
        if let Ok(value) = env::var("ISODEMUX_NO_ORDER_CHECK") {
            options.set("no_order_check", &value);
        }
        if let Ok(value) = env::var("ISODEMUX_ALLOW_REMOTE") {
            options.set("allow_remote", &value);
        }

        for path in &CONFIG_PATHS {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    options.apply_config(&content);
                    break;
                }
            }
        }

        options
    }

    /// Loads options from a specific config file, on top of the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut options = ReaderOptions::default();
        options.apply_config(&content);
        Ok(options)
    }

    /// Applies `key = value` lines; comments and unknown keys are ignored.
    pub fn apply_config(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.set(key.trim(), value);
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            "src" => {
                if !value.is_empty() {
                    self.src = Some(value.to_string());
                }
            }
            "no_order_check" => self.no_order_check = parse_flag(value),
            "allow_remote" => self.allow_remote = parse_flag(value),
            _ => log::debug!("ignoring unknown option {}", key),
        }
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn with_no_order_check(mut self, no_order_check: bool) -> Self {
        self.no_order_check = no_order_check;
        self
    }

    pub fn with_allow_remote(mut self, allow_remote: bool) -> Self {
        self.allow_remote = allow_remote;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
