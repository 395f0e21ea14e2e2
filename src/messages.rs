use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::cli::Invocation;
use crate::config::Settings;
use crate::error::AppError;

pub const SYSTEM_INSTRUCTION: &str = "Answer the following question in a brief and informative way. Format the output for a bash-like console output.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Why a message is in the conversation. Not sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Instruction,
    SystemContext,
    AttachmentHeader,
    AttachmentBody,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    #[serde(skip)]
    pub kind: MessageKind,
}

impl Message {
    fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        let role = match kind {
            MessageKind::Instruction | MessageKind::SystemContext => Role::System,
            MessageKind::AttachmentHeader | MessageKind::AttachmentBody | MessageKind::Prompt => {
                Role::User
            }
        };
        Message {
            role,
            content: content.into(),
            kind,
        }
    }
}

/// Builds the conversation sent to the model.
///
/// The order is fixed: the console-answer instruction, the optional system
/// context from the settings file, the optional file attachment (a header
/// naming the file, then its raw contents) and finally the user's question.
/// The only failure is an unreadable attachment, which is reported before
/// anything is sent.
pub fn assemble(settings: &Settings, invocation: &Invocation) -> Result<Vec<Message>, AppError> {
    let mut messages = vec![Message::new(MessageKind::Instruction, SYSTEM_INSTRUCTION)];

    if invocation.system_info {
        messages.push(Message::new(
            MessageKind::SystemContext,
            settings.system_info.as_str(),
        ));
    }

    if let Some(path) = &invocation.file {
        let contents = fs::read_to_string(path).map_err(|source| AppError::FileRead {
            path: path.clone(),
            source,
        })?;

        messages.push(Message::new(
            MessageKind::AttachmentHeader,
            format!(
                "My question is about the file {}. Here's its contents:\n",
                file_name(path)
            ),
        ));
        messages.push(Message::new(MessageKind::AttachmentBody, contents));
    }

    messages.push(Message::new(MessageKind::Prompt, invocation.prompt.as_str()));

    debug!(kinds = ?messages.iter().map(|m| m.kind).collect::<Vec<_>>(), "assembled conversation");
    Ok(messages)
}

// The last path segment, falling back to the whole path for things like `..`
fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn invocation(prompt: &str) -> Invocation {
        Invocation {
            system_info: false,
            file: None,
            more: false,
            prompt: prompt.to_string(),
        }
    }

    fn kinds(messages: &[Message]) -> Vec<MessageKind> {
        messages.iter().map(|m| m.kind).collect()
    }

    #[test]
    fn instruction_then_prompt() {
        let messages = assemble(&Settings::default(), &invocation("why is the sky blue")).unwrap();
        assert_eq!(
            kinds(&messages),
            vec![MessageKind::Instruction, MessageKind::Prompt]
        );
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, SYSTEM_INSTRUCTION);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "why is the sky blue");
    }

    #[test]
    fn system_context_is_passed_verbatim() {
        let settings = Settings {
            system_info: "Ubuntu 22.04".to_string(),
            ..Settings::default()
        };
        let mut inv = invocation("how do I list files");
        inv.system_info = true;

        let messages = assemble(&settings, &inv).unwrap();
        assert_eq!(
            kinds(&messages),
            vec![
                MessageKind::Instruction,
                MessageKind::SystemContext,
                MessageKind::Prompt
            ]
        );
        assert_eq!(messages[1].role, Role::System);
        assert_eq!(messages[1].content, "Ubuntu 22.04");
        assert_eq!(messages[2].content, "how do I list files");

        // an empty context is still sent when asked for
        let messages = assemble(&Settings::default(), &inv).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "");
    }

    #[test]
    fn file_attachment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "line one\nline two\n").unwrap();

        let mut inv = invocation("what is this");
        inv.system_info = true;
        inv.file = Some(path);

        let messages = assemble(&Settings::default(), &inv).unwrap();
        assert_eq!(
            kinds(&messages),
            vec![
                MessageKind::Instruction,
                MessageKind::SystemContext,
                MessageKind::AttachmentHeader,
                MessageKind::AttachmentBody,
                MessageKind::Prompt
            ]
        );
        assert_eq!(
            messages[2].content,
            "My question is about the file notes.txt. Here's its contents:\n"
        );
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(messages[3].content, "line one\nline two\n");
        assert_eq!(messages[4].content, "what is this");
    }

    #[test]
    fn unreadable_file_aborts() {
        let mut inv = invocation("what is this");
        inv.file = Some(PathBuf::from("/definitely/not/here.txt"));

        let err = assemble(&Settings::default(), &inv).unwrap_err();
        assert!(matches!(err, AppError::FileRead { .. }));
    }

    #[test]
    fn prompt_is_always_last_and_unique() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn main() {}").unwrap();

        for (system_info, file) in [(false, None), (true, None), (false, Some(path.clone())), (true, Some(path))] {
            let inv = Invocation {
                system_info,
                file,
                more: false,
                prompt: "explain".to_string(),
            };
            let messages = assemble(&Settings::default(), &inv).unwrap();
            assert_eq!(messages.last().map(|m| m.kind), Some(MessageKind::Prompt));
            assert_eq!(
                messages.iter().filter(|m| m.kind == MessageKind::Prompt).count(),
                1
            );
        }
    }

    #[test]
    fn serializes_role_and_content_only() {
        let message = Message::new(MessageKind::Prompt, "hi there");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({ "role": "user", "content": "hi there" })
        );
    }
}
