//! Telegram HTML for job progress, page results and the summary document.

use crate::job::{PageOutcome, PageResult};

const TRUNCATION_MARKER: &str = "\n…";

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape `text`, keeping the escaped form within `max_chars`.
///
/// Returns the escaped string and whether anything was cut.
fn escape_within(text: &str, max_chars: usize) -> (String, bool) {
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let piece = match ch {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            c => c.to_string(),
        };
        let n = piece.chars().count();
        if used + n > max_chars {
            return (out, true);
        }
        used += n;
        out.push_str(&piece);
    }
    (out, false)
}

/// One page result as a single Telegram message no longer than `limit` chars.
///
/// Returns the HTML and whether the page text had to be truncated.
pub fn format_page_message(page: &PageResult, index: usize, total: usize, limit: usize) -> (String, bool) {
    let header = format!(
        "📄 <b>{}</b> ({index}/{total})\n\n",
        escape_html(&page.name)
    );

    match &page.outcome {
        PageOutcome::Failed(reason) => {
            let (reason, _) = escape_within(reason, 300);
            (format!("{header}⚠️ OCR failed: {reason}"), false)
        }
        PageOutcome::Text(text) if text.trim().is_empty() => {
            (format!("{header}<i>(no text detected)</i>"), false)
        }
        PageOutcome::Text(text) => {
            let overhead = header.chars().count()
                + "<pre></pre>".len()
                + TRUNCATION_MARKER.chars().count();
            let budget = limit.saturating_sub(overhead).max(1);
            let (body, truncated) = escape_within(text.trim(), budget);
            let marker = if truncated { TRUNCATION_MARKER } else { "" };
            (format!("{header}<pre>{body}{marker}</pre>"), truncated)
        }
    }
}

/// Plain-text concatenation of every page, in delivery order.
pub fn build_summary_text(pages: &[PageResult]) -> String {
    let mut out = String::new();
    for page in pages {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("--- {} ---\n", page.name));
        match &page.outcome {
            PageOutcome::Text(t) => out.push_str(t.trim()),
            PageOutcome::Failed(reason) => out.push_str(&format!("[OCR failed: {reason}]")),
        }
    }
    out.push('\n');
    out
}

/// `photos.zip` → `photos.txt`.
pub fn summary_file_name(upload_name: &str) -> String {
    let base = upload_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(upload_name);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    if stem.is_empty() {
        "ocr.txt".to_string()
    } else {
        format!("{stem}.txt")
    }
}

/// Single-line progress for the job status message.
pub fn progress_line(file_name: &str, done: usize, total: usize) -> String {
    format!(
        "🔎 <b>{}</b>: OCR {done}/{total}...",
        escape_html(file_name)
    )
}
