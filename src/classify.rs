//! Code → user-facing text mapping.
//!
//! Two ordered tables: one for connection-level failures (socket errors,
//! handshake rejects) and one for disconnect notifications (close frames,
//! self-disconnect pushes). A code not in the table falls through to the
//! table's default template.

use crate::error::{CODE_NO_RESPONSE, CODE_SERVER_DISCONNECTED, CODE_SERVER_ERROR, ErrorInfo};

/// How a table entry turns `(code, message)` into text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rule {
    /// Fixed text, raw message discarded.
    Fixed(&'static str),
    /// Raw message verbatim.
    Passthrough,
    /// Template with `{code}` and `{message}` placeholders.
    Template(&'static str),
}

impl Rule {
    fn render(self, code: i32, message: &str) -> String {
        match self {
            Self::Fixed(text) => text.to_owned(),
            Self::Passthrough => message.to_owned(),
            Self::Template(template) => render_template(template, code, message),
        }
    }
}

struct Table {
    entries: &'static [(i32, Rule)],
    fallback: Rule,
}

impl Table {
    fn classify(&self, code: i32, message: &str) -> String {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(self.fallback, |(_, rule)| *rule)
            .render(code, message)
    }
}

const CONNECTION: Table = Table {
    entries: &[
        (CODE_SERVER_DISCONNECTED, Rule::Fixed("server disconnected")),
        (CODE_NO_RESPONSE, Rule::Fixed("no response from server")),
    ],
    fallback: Rule::Template("unknown error: {code}\ndetails: {message}"),
};

const DISCONNECT: Table = Table {
    entries: &[
        (CODE_SERVER_ERROR, Rule::Fixed("server error")),
        (CODE_NO_RESPONSE, Rule::Passthrough),
    ],
    fallback: Rule::Template("{code}: {message}"),
};

/// Text for a connection-level failure.
#[must_use]
pub fn connection_message(code: i32, message: &str) -> String {
    CONNECTION.classify(code, message)
}

/// Text for a disconnect notification.
#[must_use]
pub fn disconnect_message(code: i32, message: &str) -> String {
    DISCONNECT.classify(code, message)
}

#[must_use]
pub fn connection_error(code: i32, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, connection_message(code, message))
}

#[must_use]
pub fn disconnect_error(code: i32, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, disconnect_message(code, message))
}

/// Substitute `{code}` and `{message}` in a caller-supplied template.
///
/// Used for per-request fail text such as `"login failed:\n{message}"`.
#[must_use]
pub fn render_template(template: &str, code: i32, message: &str) -> String {
    template.replace("{code}", &code.to_string()).replace("{message}", message)
}

#[cfg(test)]
#[path = "classify_test.rs"]
mod tests;
