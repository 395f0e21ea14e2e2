mod api;
mod cli;
mod config;
mod error;
mod messages;
#[cfg(test)]
mod test_support;

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::Path;
use std::process::exit;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};
use tracing_subscriber::EnvFilter;

use api::ApiClient;
use cli::Command;
use config::Settings;
use error::AppError;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();

    if let Err(e) = run(std::env::args_os().skip(1)).await {
        let message = match &e {
            AppError::Usage(usage) => usage.clone(),
            // a partial answer may still be on the current line
            AppError::StreamReceive(_) => format!("\nERROR: {}", e),
            _ => format!("ERROR: {}", e),
        };
        eprintln!(
            "{}",
            message.if_supports_color(Stream::Stderr, |text| text.red())
        );
        exit(e.exit_code());
    }
}

// Warnings go to stderr as plain lines; RUST_LOG=debug shows request details.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(args: impl IntoIterator<Item = OsString>) -> Result<(), AppError> {
    let invocation = match cli::interpret(args)? {
        Command::Help(text) | Command::Version(text) => {
            println!("{}", text.trim_end());
            return Ok(());
        }
        Command::Ask(invocation) => invocation,
    };

    let settings_path = Settings::default_path()?;
    let settings = load_settings(&settings_path)?;

    let messages = messages::assemble(&settings, &invocation)?;
    let max_tokens = invocation.max_tokens(settings.max_tokens);

    let mut out = Highlighted(io::stdout().lock());
    ApiClient::new(&settings)
        .stream_completion(&messages, max_tokens, &mut out)
        .await
}

/// Prints answer text in yellow when the stream is a color-capable terminal
/// and passes it through untouched otherwise.
struct Highlighted<W>(W);

impl<W: Write> Write for Highlighted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        write!(
            self.0,
            "{}",
            text.if_supports_color(Stream::Stdout, |text| text.yellow())
        )?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

fn load_settings(path: &Path) -> Result<Settings, AppError> {
    let result = Settings::load(path);
    if let Err(AppError::ConfigMissing { .. }) = &result {
        if let Err(e) = create_template(path) {
            eprintln!("{:#}", e);
        }
    }
    result
}

fn create_template(path: &Path) -> anyhow::Result<()> {
    config::write_template(path).with_context(|| {
        format!(
            "Tried to create a template {} file, but failed",
            path.display()
        )
    })
}
