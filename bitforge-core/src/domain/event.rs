//! Streamed event types
//!
//! Every message a pipeline run produces is an [`Event`]. The serialized form
//! is the wire contract with the browser client: a JSON object with a `type`
//! discriminator.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::command::CommandSpec;

/// Encoding tag prepended to the artifact payload of a success event
pub const ARTIFACT_ENCODING: &str = "base64";

/// Output stream of a running process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// One message of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// A command is about to be launched
    Command { command: String, args: Vec<String> },
    /// A chunk read from a process's standard output
    Stdout { data: String },
    /// A chunk read from a process's standard error
    Stderr { data: String },
    /// Terminal failure of the run
    Error { message: String },
    /// Terminal success of the run, carrying the encoded artifact
    Success { data: String },
}

impl Event {
    /// Announcement emitted before a command is launched
    pub fn command(spec: &CommandSpec) -> Self {
        Event::Command {
            command: spec.program().to_string(),
            args: spec.args().to_vec(),
        }
    }

    /// Output chunk tagged with the stream it was read from
    ///
    /// Bytes are decoded lossily; a multi-byte character split across two
    /// reads shows up as replacement characters.
    pub fn output(stream: Stream, bytes: &[u8]) -> Self {
        let data = String::from_utf8_lossy(bytes).into_owned();
        match stream {
            Stream::Stdout => Event::Stdout { data },
            Stream::Stderr => Event::Stderr { data },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    /// Success event carrying `base64:<artifact>`
    pub fn success(artifact: &[u8]) -> Self {
        Event::Success {
            data: format!("{}:{}", ARTIFACT_ENCODING, STANDARD.encode(artifact)),
        }
    }

    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Error { .. } | Event::Success { .. })
    }

    /// Short name of the event kind, as used in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Command { .. } => "command",
            Event::Stdout { .. } => "stdout",
            Event::Stderr { .. } => "stderr",
            Event::Error { .. } => "error",
            Event::Success { .. } => "success",
        }
    }

    /// Recovers the raw artifact bytes from a success event
    ///
    /// The payload is split on its first `:`; anything but a `base64` tag is
    /// rejected.
    pub fn decode_artifact(&self) -> Option<Vec<u8>> {
        let Event::Success { data } = self else {
            return None;
        };
        let (encoding, payload) = data.split_once(':')?;
        if encoding != ARTIFACT_ENCODING {
            return None;
        }
        STANDARD.decode(payload).ok()
    }
}
