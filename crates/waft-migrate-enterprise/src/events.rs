use tracing::info;

const COMMUNICATION_ERROR: &str = "Error: Upgrade server communication error";
const RESUME_PROMPT: &str =
    "This upgrade request seems to have been interrupted. Do you want to resume it? [Y/n]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    CommunicationError,
    ResumePrompt,
    Output,
}

pub fn classify_line(line: &str) -> LineEvent {
    if line.contains(COMMUNICATION_ERROR) {
        LineEvent::CommunicationError
    } else if line.contains(RESUME_PROMPT) {
        LineEvent::ResumePrompt
    } else {
        LineEvent::Output
    }
}

/// Answers the tool's "resume interrupted request" prompt.
///
/// Only the first prompt of an upgrade may be declined; every later prompt,
/// including those of retried attempts, is answered with `Y`.
#[derive(Debug, Clone, Default)]
pub struct PromptResponder {
    decline_first: bool,
    answered: bool,
}

impl PromptResponder {
    pub fn new(decline_first: bool) -> Self {
        Self {
            decline_first,
            answered: false,
        }
    }

    pub fn respond(&mut self) -> &'static str {
        let decline = self.decline_first && !self.answered;
        self.answered = true;
        if decline {
            info!("Restarting enterprise upgrade request...");
            "n"
        } else {
            info!("Resuming enterprise upgrade request...");
            "Y"
        }
    }
}
