use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use crate::error::AppError;

const MIN_PROMPT_CHARS: usize = 3;
const MORE_MULTIPLIER: u32 = 3;

#[derive(Debug, Parser)]
#[clap(
    name = "askllm",
    version,
    about = "Ask an LLM a question from the command line and stream the answer. The OpenAI API key must be set in the ~/.askllm file.",
    disable_help_flag = true
)]
struct Cli {
    #[clap(
        short('s'),
        long("system"),
        help = "Prepend the question with system info from ~/.askllm"
    )]
    system: bool,

    #[clap(
        short('f'),
        long("file"),
        value_name = "FILEPATH",
        help = "Add the file contents to the prompt for analysis"
    )]
    file: Option<PathBuf>,

    #[clap(
        short('m'),
        long("more"),
        help = "Triples the max_tokens value, for longer answers"
    )]
    more: bool,

    #[clap(short('h'), long("help"), help = "Show this help")]
    help: bool,

    #[clap(
        value_name = "QUESTION",
        help = "The question to ask; use '--' before words that start with '-'"
    )]
    question: Vec<String>,
}

/// What the user asked for on the command line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help(String),
    Version(String),
    Ask(Invocation),
}

/// A validated question plus the flags that shape the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub system_info: bool,
    pub file: Option<PathBuf>,
    pub more: bool,
    pub prompt: String,
}

impl Invocation {
    /// The token budget for this request, given the configured one.
    pub fn max_tokens(&self, configured: u32) -> u32 {
        if self.more {
            configured.saturating_mul(MORE_MULTIPLIER)
        } else {
            configured
        }
    }
}

/// The usage text printed for `--help`.
pub fn help_text() -> String {
    Cli::command().render_help().to_string()
}

/// Interprets the arguments that follow the program name.
///
/// Flags are recognized wherever they appear; every other token becomes part
/// of the question, in order. Nothing here touches the filesystem or the
/// network.
pub fn interpret<I, T>(args: I) -> Result<Command, AppError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    if args.is_empty() {
        return Err(AppError::NoArguments);
    }

    let argv = std::iter::once(OsString::from("askllm")).chain(args);
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e) if e.kind() == ErrorKind::DisplayVersion => {
            return Ok(Command::Version(e.to_string()));
        }
        Err(e) => return Err(AppError::Usage(e.to_string().trim_end().to_string())),
    };

    if cli.help {
        return Ok(Command::Help(help_text()));
    }

    let prompt = cli.question.join(" ").trim().to_string();
    if prompt.chars().count() < MIN_PROMPT_CHARS {
        return Err(AppError::PromptTooShort);
    }

    Ok(Command::Ask(Invocation {
        system_info: cli.system,
        file: cli.file,
        more: cli.more,
        prompt,
    }))
}
