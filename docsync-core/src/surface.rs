//! The rich text surface: the editor component the sync layer drives.
//!
//! The sync layer never looks inside the document. It only needs to read the
//! current contents, replace them, apply an incremental delta, toggle
//! read-only mode, and hear about changes. Every change notification carries a
//! [`ChangeOrigin`] so that remote edits applied programmatically are never
//! mistaken for something the local user typed.
//!
//! [`MemorySurface`] is a headless implementation used by the terminal client
//! and the tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::delta::{Delta, Insert, Op};

/// Who caused a content change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOrigin {
    /// Typed or formatted by the local user.
    #[serde(rename = "user")]
    UserEdit,
    /// Applied through the API: initial load, remote deltas.
    #[serde(rename = "api")]
    ProgrammaticEdit,
}

/// Emitted after every content change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub delta: Delta,
    pub old_contents: Delta,
    pub origin: ChangeOrigin,
}

/// Handle for a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("editor is read-only until the document has loaded")]
    ReadOnly,
}

/// Contract between the sync layer and an editor component.
pub trait RichTextSurface: Send + 'static {
    /// Full current contents.
    fn contents(&self) -> Delta;

    /// Replace the whole document.
    fn set_contents(&mut self, snapshot: Delta, origin: ChangeOrigin);

    /// Apply an incremental change on top of the current contents.
    fn update_contents(&mut self, delta: &Delta, origin: ChangeOrigin);

    fn enable(&mut self);

    fn disable(&mut self);

    fn is_enabled(&self) -> bool;

    /// Register a change listener. Events arrive in the order changes happen.
    fn on_change(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<ChangeEvent>);

    /// Deregister a listener. Returns `false` if it was not registered.
    fn off_change(&mut self, id: ListenerId) -> bool;
}

// ───────────────────────────────────────────────────────────────────
// Editor configuration
// ───────────────────────────────────────────────────────────────────

/// Formats the editor knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Header,
    Font,
    Size,
    Bold,
    Italic,
    Underline,
    Strike,
    Blockquote,
    List,
    Bullet,
    Indent,
    Link,
    Image,
    Video,
    Color,
    Background,
    Script,
    Align,
    CodeBlock,
    Direction,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Header => "header",
            Format::Font => "font",
            Format::Size => "size",
            Format::Bold => "bold",
            Format::Italic => "italic",
            Format::Underline => "underline",
            Format::Strike => "strike",
            Format::Blockquote => "blockquote",
            Format::List => "list",
            Format::Bullet => "bullet",
            Format::Indent => "indent",
            Format::Link => "link",
            Format::Image => "image",
            Format::Video => "video",
            Format::Color => "color",
            Format::Background => "background",
            Format::Script => "script",
            Format::Align => "align",
            Format::CodeBlock => "code-block",
            Format::Direction => "direction",
        }
    }
}

/// One toolbar control.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolbarItem {
    /// On/off button, e.g. bold.
    Toggle(Format),
    /// Button that sets one value, e.g. ordered list.
    Value(Format, Value),
    /// Picker over a list of values; empty means the editor's defaults.
    Choice(Format, Vec<Value>),
    /// Remove all formatting from the selection.
    Clean,
}

/// Immutable editor configuration, built once per session.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorConfig {
    pub theme: String,
    pub toolbar: Vec<Vec<ToolbarItem>>,
    pub formats: Vec<Format>,
}

impl EditorConfig {
    pub fn allows(&self, name: &str) -> bool {
        self.formats.iter().any(|format| format.as_str() == name)
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        use serde_json::json;
        use ToolbarItem::{Choice, Clean, Toggle};

        let value = |format, v| ToolbarItem::Value(format, v);
        Self {
            theme: "snow".to_string(),
            toolbar: vec![
                vec![Choice(Format::Header, vec![json!(false), json!(1), json!(2), json!(3), json!(4), json!(5), json!(6)])],
                vec![Toggle(Format::Bold), Toggle(Format::Italic), Toggle(Format::Underline), Toggle(Format::Strike)],
                vec![Choice(Format::Color, Vec::new()), Choice(Format::Background, Vec::new())],
                vec![value(Format::List, json!("ordered")), value(Format::List, json!("bullet"))],
                vec![value(Format::Script, json!("sub")), value(Format::Script, json!("super"))],
                vec![value(Format::Indent, json!("-1")), value(Format::Indent, json!("+1"))],
                vec![value(Format::Direction, json!("rtl"))],
                vec![Choice(Format::Align, Vec::new())],
                vec![Toggle(Format::Blockquote), Toggle(Format::CodeBlock)],
                vec![Toggle(Format::Link), Toggle(Format::Image), Toggle(Format::Video)],
                vec![Clean],
                vec![Choice(Format::Font, Vec::new())],
                vec![Choice(Format::Size, vec![json!("small"), json!(false), json!("large"), json!("huge")])],
            ],
            formats: vec![
                Format::Header,
                Format::Font,
                Format::Size,
                Format::Bold,
                Format::Italic,
                Format::Underline,
                Format::Strike,
                Format::Blockquote,
                Format::List,
                Format::Bullet,
                Format::Indent,
                Format::Link,
                Format::Image,
                Format::Color,
                Format::Background,
                Format::Script,
                Format::Align,
                Format::CodeBlock,
                Format::Direction,
            ],
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory surface
// ───────────────────────────────────────────────────────────────────

/// Headless surface holding the document as a [`Delta`].
///
/// Starts disabled with a single empty line, like a freshly mounted editor.
pub struct MemorySurface {
    config: EditorConfig,
    contents: Delta,
    enabled: bool,
    listeners: Vec<(ListenerId, mpsc::UnboundedSender<ChangeEvent>)>,
    next_listener: u64,
    /// Bumped on every content mutation.
    revision: u64,
}

impl MemorySurface {
    pub fn new(config: EditorConfig) -> Self {
        Self {
            config,
            contents: Delta::new().insert("\n"),
            enabled: false,
            listeners: Vec::new(),
            next_listener: 0,
            revision: 0,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Apply an edit as if the local user made it.
    ///
    /// Formats outside the configured whitelist are stripped first.
    pub fn user_edit(&mut self, delta: Delta) -> Result<(), SurfaceError> {
        if !self.enabled {
            return Err(SurfaceError::ReadOnly);
        }
        let delta = self.sanitize(delta);
        self.apply(delta, ChangeOrigin::UserEdit);
        Ok(())
    }

    /// Type `text` at the end of the document, before the final newline.
    pub fn append_text(&mut self, text: &str) -> Result<Delta, SurfaceError> {
        let length = self.contents.length();
        let position = if self.contents.to_plain_text().ends_with('\n') {
            length - 1
        } else {
            length
        };
        let delta = Delta::new().retain(position).insert(text);
        self.user_edit(delta.clone())?;
        Ok(delta)
    }

    pub fn text(&self) -> String {
        self.contents.to_plain_text()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn sanitize(&self, delta: Delta) -> Delta {
        let mut clean = Delta::new();
        for op in delta.ops {
            match op {
                Op::Insert { insert: Insert::Embed(embed), .. }
                    if !embed.keys().all(|key| self.config.allows(key)) =>
                {
                    log::debug!("Dropping embed with unsupported format: {:?}", embed.keys());
                }
                Op::Insert { insert, attributes } => clean.push(Op::Insert {
                    insert,
                    attributes: attributes.map(|a| self.allowed(a)),
                }),
                Op::Retain { retain, attributes } => clean.push(Op::Retain {
                    retain,
                    attributes: attributes.map(|a| self.allowed(a)),
                }),
                delete @ Op::Delete { .. } => clean.push(delete),
            }
        }
        clean
    }

    fn allowed(&self, mut attributes: crate::delta::Attributes) -> crate::delta::Attributes {
        attributes.retain(|key, _| self.config.allows(key));
        attributes
    }

    fn apply(&mut self, delta: Delta, origin: ChangeOrigin) {
        if delta.is_empty() {
            return;
        }
        let old_contents = std::mem::take(&mut self.contents);
        self.contents = old_contents.compose(&delta);
        self.revision += 1;
        self.emit(ChangeEvent { delta, old_contents, origin });
    }

    fn emit(&mut self, event: ChangeEvent) {
        self.listeners
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl RichTextSurface for MemorySurface {
    fn contents(&self) -> Delta {
        self.contents.clone()
    }

    fn set_contents(&mut self, snapshot: Delta, origin: ChangeOrigin) {
        let mut document = Delta::new();
        for op in snapshot.ops.into_iter().filter(Op::is_insert) {
            document.push(op);
        }
        if !document.to_plain_text().ends_with('\n') {
            document.push(Op::Insert { insert: Insert::Text("\n".into()), attributes: None });
        }

        let change = document.clone().delete(self.contents.length());
        let old_contents = std::mem::replace(&mut self.contents, document);
        self.revision += 1;
        self.emit(ChangeEvent { delta: change, old_contents, origin });
    }

    fn update_contents(&mut self, delta: &Delta, origin: ChangeOrigin) {
        self.apply(delta.clone(), origin);
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn on_change(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<ChangeEvent>) {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push((id, tx));
        (id, rx)
    }

    fn off_change(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }
}
