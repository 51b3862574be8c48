use std::io::Write;

use notelock::storage::{plain_text_preview, Attachment, ChecklistItem, LinkItem};
use notelock::SecureNotePayload;

/// ANSI color codes
#[allow(dead_code)]
pub struct Color;

#[allow(dead_code)]
impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Render a decrypted payload to terminal text
pub fn render_payload(
    payload: &SecureNotePayload,
    attachments: &[Attachment],
    use_color: bool,
) -> String {
    let mut lines = Vec::new();

    let body = plain_text_preview(&payload.content);
    if !body.is_empty() {
        lines.extend(wrap_lines(&body, "", 80));
    }

    if !payload.checklist.is_empty() {
        lines.push(String::new());
        lines.extend(render_checklist(&payload.checklist, use_color));
    }

    if !payload.links.is_empty() {
        lines.push(String::new());
        lines.extend(render_links(&payload.links, use_color));
    }

    if !attachments.is_empty() {
        lines.push(String::new());
        for attachment in attachments {
            let name = attachment.name.as_deref().unwrap_or(&attachment.id);
            lines.push(format!(
                "{} {} {}",
                paint("@", Color::CYAN, use_color),
                name,
                paint(&format!("({})", attachment.uri), Color::DIM, use_color)
            ));
        }
    }

    lines.join("\n")
}

fn render_checklist(items: &[ChecklistItem], use_color: bool) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            if item.done {
                format!("{} {}", paint("[x]", Color::GREEN, use_color), item.text)
            } else {
                format!("[ ] {}", item.text)
            }
        })
        .collect()
}

fn render_links(links: &[LinkItem], use_color: bool) -> Vec<String> {
    links
        .iter()
        .map(|link| {
            let url = paint(&link.url, Color::CYAN, use_color);
            if link.label.is_empty() {
                url
            } else {
                format!("{} <{}>", link.label, url)
            }
        })
        .collect()
}

/// Redraw a single-line progress bar on stderr
pub fn print_progress(label: &str, progress: f32) {
    let width = 30;
    let filled = ((progress.clamp(0.0, 1.0)) * width as f32).round() as usize;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(width - filled));
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\r{} [{}] {:>3.0}%", label, bar, progress * 100.0);
    if progress >= 1.0 {
        let _ = writeln!(stderr);
    }
    let _ = stderr.flush();
}

/// Simple word-wrapping for terminal output
fn wrap_lines(text: &str, prefix: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let effective_width = max_width.saturating_sub(prefix.len());

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut current_line = String::new();
    for word in words {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= effective_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(format!("{}{}", prefix, current_line));
            current_line = word.to_string();
        }
    }
    if !current_line.is_empty() {
        lines.push(format!("{}{}", prefix, current_line));
    }

    lines
}
