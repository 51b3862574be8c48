//! Plain-text preview extraction for rich note content.

use std::sync::OnceLock;

use regex::Regex;

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex pattern"))
}

/// Derive the plain-text preview stored next to a note's markup.
///
/// Drops `<script>`/`<style>` blocks and all tags, decodes the common
/// entities and collapses whitespace to single spaces.
pub fn plain_text_preview(html: &str) -> String {
    static SCRIPT_STYLE: OnceLock<Regex> = OnceLock::new();
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let text = compiled(&SCRIPT_STYLE, r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .replace_all(html, "");

    // Block boundaries become spaces so "<p>a</p><p>b</p>" reads "a b"
    let text = compiled(&BLOCK, r"(?i)</?(div|p|br|h[1-6]|li|ul|ol|tr|blockquote)[^>]*>")
        .replace_all(&text, " ");

    let text = compiled(&TAG, r"<[^>]+>").replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    compiled(&SPACE, r"\s+")
        .replace_all(&text, " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_paragraph() {
        assert_eq!(plain_text_preview("<p>hi</p>"), "hi");
    }

    #[test]
    fn test_blocks_are_separated() {
        let html = "<h1>Title</h1><p>First</p><ul><li>one</li><li>two</li></ul>";
        assert_eq!(plain_text_preview(html), "Title First one two");
    }

    #[test]
    fn test_strips_scripts_and_styles() {
        let html = "<p>Before</p><script>alert('hi');</script><style>p{}</style><p>After</p>";
        assert_eq!(plain_text_preview(html), "Before After");
    }

    #[test]
    fn test_decodes_entities() {
        let html = "<p>Tom &amp; Jerry &lt;3</p>";
        assert_eq!(plain_text_preview(html), "Tom & Jerry <3");
    }

    #[test]
    fn test_inline_tags_do_not_split_words() {
        assert_eq!(plain_text_preview("<p>bo<b>ld</b> text</p>"), "bold text");
    }
}
