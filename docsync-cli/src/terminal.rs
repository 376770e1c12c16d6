//! Plain-text rendering for the terminal client.
//!
//! Everything here returns a `String` so the output can be checked without
//! a terminal attached.

use docsync_collab::{Notice, NoticeLevel, PresenceDisplay};
use docsync_core::{Delta, DocumentSummary, Insert, Op};

/// One line per document: id, filename, creator.
pub fn render_listing(documents: &[&DocumentSummary]) -> String {
    if documents.is_empty() {
        return "No documents found".to_string();
    }
    let width = documents
        .iter()
        .map(|doc| doc.filename.chars().count())
        .max()
        .unwrap_or(0)
        .max("FILENAME".len());

    let mut out = format!("{:<36}  {:<width$}  CREATED BY\n", "ID", "FILENAME");
    for doc in documents {
        out.push_str(&format!(
            "{:<36}  {:<width$}  {}\n",
            doc.id.to_string(),
            doc.filename,
            doc.created_by
        ));
    }
    out
}

/// `[User 1] [User 2] [User 3] +4`
pub fn render_presence(display: &PresenceDisplay) -> String {
    if display.indicators.is_empty() {
        return "no collaborators".to_string();
    }
    let mut parts: Vec<String> = display
        .indicators
        .iter()
        .map(|indicator| format!("[{}]", indicator.label))
        .collect();
    if let Some(label) = display.overflow_label() {
        parts.push(label);
    }
    parts.join(" ")
}

/// Short human summary of a remote change, e.g. `+5 -2 ~1`.
pub fn render_change(delta: &Delta) -> String {
    let mut inserted = 0;
    let mut deleted = 0;
    let mut formatted = 0;
    for op in &delta.ops {
        match op {
            Op::Insert { insert: Insert::Text(text), .. } => inserted += text.chars().count(),
            Op::Insert { .. } => inserted += 1,
            Op::Delete { delete } => deleted += *delete,
            Op::Retain { attributes: Some(_), retain } => formatted += *retain,
            Op::Retain { .. } => {}
        }
    }

    let mut parts = Vec::new();
    if inserted > 0 {
        parts.push(format!("+{inserted}"));
    }
    if deleted > 0 {
        parts.push(format!("-{deleted}"));
    }
    if formatted > 0 {
        parts.push(format!("~{formatted}"));
    }
    if parts.is_empty() {
        "no-op".to_string()
    } else {
        parts.join(" ")
    }
}

pub fn render_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Success => format!("✓ {}", notice.message),
        NoticeLevel::Error => format!("✗ {}", notice.message),
    }
}

pub fn share_notice(url: &str) -> String {
    format!("Share this document: {url}")
}

/// Document text with a gutter, trailing newline dropped.
pub fn render_document(text: &str) -> String {
    text.strip_suffix('\n')
        .unwrap_or(text)
        .lines()
        .map(|line| format!("│ {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text to append so that a typed line becomes its own paragraph.
pub fn typed_line(current: &str, line: &str) -> String {
    if current.trim_end_matches('\n').is_empty() {
        line.to_string()
    } else {
        format!("\n{line}")
    }
}
