use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that stops `askllm` before (or while) an answer is printed.
///
/// Each variant maps to its own process exit code so scripts can tell a
/// missing settings file apart from a dropped connection.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Usage(String),

    #[error("No arguments provided. Try 'askllm --help'.")]
    NoArguments,

    #[error("No question means no answer. Formulate your request as a question or a problem, don't enter gibberish.")]
    PromptTooShort,

    #[error("You have to have a {} file with your OpenAI API key in it, like 'openai_key=xxxxxxxxxxxxx' ({source})", .path.display())]
    ConfigMissing { path: PathBuf, source: io::Error },

    #[error("Unable to read the settings file {}: {source}", .path.display())]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Replace the key in the {} file with your actual OpenAI API key, that you can get here: https://platform.openai.com/api-keys", .path.display())]
    ConfigInvalid { path: PathBuf },

    #[error("Unable to determine the home directory for the settings file")]
    HomeDirUnknown,

    #[error("Error reading file {}: {source}", .path.display())]
    FileRead { path: PathBuf, source: io::Error },

    #[error("Completion stream error: {0}")]
    Connection(String),

    #[error("Stream error: {0}")]
    StreamReceive(String),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Usage(_) => 2,
            AppError::NoArguments => 3,
            AppError::PromptTooShort => 4,
            AppError::ConfigMissing { .. } => 5,
            AppError::ConfigInvalid { .. } => 6,
            AppError::HomeDirUnknown => 7,
            AppError::FileRead { .. } => 8,
            AppError::Connection(_) => 9,
            AppError::StreamReceive(_) => 10,
            AppError::ConfigRead { .. } => 11,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Connection(e.to_string())
    }
}
