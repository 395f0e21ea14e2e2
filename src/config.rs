use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::AppError;

pub const SETTINGS_FILE_NAME: &str = ".askllm";
pub const PLACEHOLDER_KEY: &str = "REPLACE_WITH_YOUR_ACTUAL_KEY";
pub const DEFAULT_MAX_TOKENS: u32 = 400;
pub const DEFAULT_MODEL: &str = "gpt-4-1106-preview";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

// Written on first run; the user is expected to edit the key in place.
const TEMPLATE: &str = "openai_key=REPLACE_WITH_YOUR_ACTUAL_KEY\nmax_tokens=300\nsystem_info=";

/// The contents of `~/.askllm`, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    // The bearer token sent with every request
    pub api_key: String,

    // Free text describing the user's machine, sent with `--system`
    pub system_info: String,

    // Upper bound on generated tokens; always positive
    pub max_tokens: u32,

    pub model_id: String,

    // Base URL of an OpenAI compatible endpoint, without the `/v1/...` path
    pub api_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_key: String::new(),
            system_info: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            model_id: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl Settings {
    /// Path of the settings file inside the user's home directory.
    pub fn default_path() -> Result<PathBuf, AppError> {
        let home = dirs::home_dir().ok_or(AppError::HomeDirUnknown)?;
        Ok(home.join(SETTINGS_FILE_NAME))
    }

    /// Reads and validates the settings file at `path`.
    ///
    /// Only a file that does not exist is reported as
    /// `AppError::ConfigMissing`, which lets the caller drop a template in its
    /// place; any other read failure is `AppError::ConfigRead`. Bytes that are
    /// not valid UTF-8 are replaced rather than rejected. A missing or
    /// placeholder key is `AppError::ConfigInvalid`; nothing should reach the
    /// network with it.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let bytes = fs::read(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => AppError::ConfigMissing {
                path: path.to_path_buf(),
                source,
            },
            _ => AppError::ConfigRead {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let settings = Self::parse(&String::from_utf8_lossy(&bytes));
        if settings.api_key.is_empty() || settings.api_key == PLACEHOLDER_KEY {
            return Err(AppError::ConfigInvalid {
                path: path.to_path_buf(),
            });
        }

        Ok(settings)
    }

    /// Parses `key=value` lines. Unknown keys and lines without a `=` are
    /// skipped, so a hand-edited file never aborts the parse.
    pub fn parse(contents: &str) -> Self {
        let mut settings = Settings::default();

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                debug!(line = line_no + 1, "skipping settings line without '='");
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "openai_key" => settings.api_key = value.to_string(),
                "system_info" => settings.system_info = value.to_string(),
                "max_tokens" => settings.max_tokens = parse_max_tokens(value),
                "model" if !value.is_empty() => settings.model_id = value.to_string(),
                "api_base" if !value.is_empty() => {
                    settings.api_base = value.trim_end_matches('/').to_string()
                }
                other => debug!(key = other, "ignoring settings key"),
            }
        }

        settings
    }
}

fn parse_max_tokens(value: &str) -> u32 {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            warn!("max_tokens must be greater than zero; using default value of {DEFAULT_MAX_TOKENS}, but please fix the value in the ~/{SETTINGS_FILE_NAME} file");
            DEFAULT_MAX_TOKENS
        }
        Err(e) => {
            warn!("Error converting max_tokens '{value}' to int: {e}; using default value of {DEFAULT_MAX_TOKENS}, but please fix the value in the ~/{SETTINGS_FILE_NAME} file");
            DEFAULT_MAX_TOKENS
        }
    }
}

/// Writes the starter settings file that the user then fills in. Fails with
/// `AlreadyExists` rather than replacing a file that is already there.
pub fn write_template(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(TEMPLATE.as_bytes())
}
