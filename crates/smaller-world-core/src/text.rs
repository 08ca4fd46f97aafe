//! # Text
//!
//! Conversions between post bodies (HTML) and the plain text used in
//! notifications, SMS messages and reply snippets.
//!
//! Bodies come from a rich text editor and only use a handful of tags
//! (`p`, `br`, `ul`/`ol`/`li`, inline formatting), so a small tag scanner
//! is enough: no DOM is built.

/// Omission marker appended by [`truncate`].
pub const OMISSION: &str = "...";

// =============================================================================
// HTML -> TEXT
// =============================================================================

/// Render an HTML body as plain text.
///
/// Block elements are separated by blank lines, list items become `- item`
/// lines, `<br>` becomes a newline, entities are decoded and runs of
/// whitespace collapse to a single space.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let mut renderer = Renderer::default();
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        renderer.text(&rest[..start]);
        let after = &rest[start..];
        let Some(end) = after.find('>') else {
            renderer.text(after);
            rest = "";
            break;
        };
        renderer.tag(&after[1..end]);
        rest = &after[end + 1..];
    }
    renderer.text(rest);
    renderer.finish()
}

#[derive(Default)]
struct Renderer {
    out: String,
    list_depth: usize,
}

impl Renderer {
    fn text(&mut self, raw: &str) {
        for c in decode_entities(raw).chars() {
            if c.is_whitespace() {
                if !self.out.is_empty() && !self.out.ends_with([' ', '\n']) {
                    self.out.push(' ');
                }
            } else {
                self.out.push(c);
            }
        }
    }

    fn tag(&mut self, tag: &str) {
        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match name.as_str() {
            "br" => {
                self.trim_trailing_spaces();
                self.out.push('\n');
            }
            "ul" | "ol" => {
                if closing {
                    self.list_depth = self.list_depth.saturating_sub(1);
                } else {
                    self.list_depth = self.list_depth.saturating_add(1);
                }
                self.block_break();
            }
            "li" => {
                if !closing {
                    self.line_break();
                    self.out.push_str("- ");
                }
            }
            // Paragraphs wrapping list item content render inline.
            "p" if self.list_depth > 0 => {}
            "p" | "div" | "blockquote" | "pre" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.block_break();
            }
            _ => {}
        }
    }

    fn trim_trailing_spaces(&mut self) {
        let trimmed = self.out.trim_end_matches(' ').len();
        self.out.truncate(trimmed);
    }

    fn line_break(&mut self) {
        self.trim_trailing_spaces();
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn block_break(&mut self) {
        self.trim_trailing_spaces();
        if self.out.is_empty() {
            return;
        }
        while !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn finish(self) -> String {
        let mut result = String::with_capacity(self.out.len());
        let mut newlines = 0usize;
        for line in self.out.split('\n') {
            let line = line.trim_end();
            if line.is_empty() {
                newlines = newlines.saturating_add(1);
                continue;
            }
            if !result.is_empty() {
                let breaks = newlines.clamp(1, 2);
                result.push_str(&"\n".repeat(breaks));
            }
            result.push_str(line);
            newlines = 1;
        }
        result
    }
}

/// Decode the HTML entities that appear in editor output.
#[must_use]
pub fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let decoded = after
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&after[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

// =============================================================================
// TEXT -> HTML
// =============================================================================

/// Escape text for inclusion in HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Format plain text as HTML paragraphs. Blank lines separate paragraphs,
/// single newlines become `<br>`.
#[must_use]
pub fn text_to_html(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| {
            let lines: Vec<String> = paragraph.lines().map(|l| escape_html(l.trim())).collect();
            format!("<p>{}</p>", lines.join("<br>"))
        })
        .collect()
}

// =============================================================================
// SNIPPETS
// =============================================================================

/// Truncate to at most `max` characters, ending in `...` when cut.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let keep = max.saturating_sub(OMISSION.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(&OMISSION[..max.min(OMISSION.len())]);
    out
}

/// Quote every line with `> `.
#[must_use]
pub fn snip(text: &str) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    format!("> {}", lines.join("\n> "))
}

/// `journal_entry` -> `journal entry`.
#[must_use]
pub fn humanize(identifier: &str) -> String {
    identifier
        .trim_end_matches("_id")
        .replace('_', " ")
        .trim()
        .to_lowercase()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WELCOME: &str = "<p>this is a space where i'll:</p><ul><li><p>keep you updated</p></li><li><p>post asks for help</p></li></ul>";

    #[test]
    fn renders_paragraphs_and_lists() {
        assert_eq!(
            html_to_text(WELCOME),
            "this is a space where i'll:\n\n- keep you updated\n- post asks for help"
        );
    }

    #[test]
    fn renders_breaks_and_entities() {
        assert_eq!(
            html_to_text("<p>fish &amp; chips<br>tonight &lt;3</p><p>  see   u  </p>"),
            "fish & chips\ntonight <3\n\nsee u"
        );
        assert_eq!(html_to_text("a &unknown; b &#x1F30A;"), "a &unknown; b 🌊");
    }

    #[test]
    fn inline_formatting_is_dropped() {
        assert_eq!(html_to_text("<p><strong>big</strong> <em>news</em></p>"), "big news");
    }

    #[test]
    fn text_to_html_builds_paragraphs() {
        assert_eq!(
            text_to_html("hello\nworld\n\n<b>bye</b>"),
            "<p>hello<br>world</p><p>&lt;b&gt;bye&lt;/b&gt;</p>"
        );
        assert_eq!(html_to_text(&text_to_html("a\nb\n\nc")), "a\nb\n\nc");
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("🌊🌊🌊🌊🌊", 4), "🌊...");
    }

    #[test]
    fn snipping() {
        assert_eq!(snip("a\nb"), "> a\n> b");
        assert_eq!(snip("a\n"), "> a");
        assert_eq!(snip(""), "> ");
    }

    #[test]
    fn humanizing() {
        assert_eq!(humanize("journal_entry"), "journal entry");
        assert_eq!(humanize("follow_up"), "follow up");
    }

    proptest! {
        #[test]
        fn truncate_never_exceeds_limit(text in "\\PC{0,200}", max in 3usize..150) {
            let truncated = truncate(&text, max);
            prop_assert!(truncated.chars().count() <= max);
        }

        #[test]
        fn truncate_keeps_short_text(text in "\\PC{0,40}") {
            prop_assert_eq!(truncate(&text, 40), text);
        }

        #[test]
        fn truncate_keeps_prefix(text in "[a-z ]{20,80}", max in 3usize..20) {
            let truncated = truncate(&text, max);
            let kept = truncated.trim_end_matches(OMISSION);
            prop_assert!(text.starts_with(kept));
        }
    }
}
