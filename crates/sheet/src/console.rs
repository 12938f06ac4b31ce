//! Console log attached to a worksheet.
//!
//! Entries are stored as HTML fragments,
//! `<span class="console_{type}_text">escaped text</span>`, appended under a
//! mutex so concurrent evaluation threads can write to the same log.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleTextType {
    Output,
    #[default]
    Error,
    System,
}

impl ConsoleTextType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleTextType::Output => "output",
            ConsoleTextType::Error => "error",
            ConsoleTextType::System => "system",
        }
    }
}

impl fmt::Display for ConsoleTextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to a console log. Clones refer to the same log; use
/// [`Console::detached`] for an independent copy.
#[derive(Debug, Clone, Default)]
pub struct Console {
    text: Arc<Mutex<String>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Arc::new(Mutex::new(text.into())),
        }
    }

    /// Append one escaped entry.
    pub fn append(&self, text: &str, kind: ConsoleTextType) {
        let entry = format!(
            "<span class=\"console_{}_text\">{}</span>",
            kind.as_str(),
            escape_html(text)
        );
        self.text.lock().push_str(&entry);
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock() = text.into();
    }

    pub fn clear(&self) {
        self.text.lock().clear();
    }

    /// An independent copy of the current contents.
    pub fn detached(&self) -> Self {
        Self::from_text(self.text())
    }

    /// The log with markup removed and entities decoded.
    pub fn plain_text(&self) -> String {
        strip_markup(&self.text())
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_html(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    unescape_html(&out)
}
