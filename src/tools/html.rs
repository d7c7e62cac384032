//! HTML to text/markdown conversion for fetched pages.
//!
//! Script, style, and other non-content subtrees are stripped first, then
//! the remaining markup is either flattened to plain text (block tags become
//! newlines) or mapped to markdown. Entities are decoded in both modes.

use std::sync::LazyLock;

use regex::Regex;

// ─── Subtree stripping ────────────────────────────────────────────────────────

static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static SCRIPTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|iframe|svg)\b.*?</(script|style|noscript|iframe|svg)\s*>")
        .expect("static regex")
});

/// Drop comments and the contents of script/style/noscript/iframe/svg.
pub(crate) fn strip_non_content(html: &str) -> String {
    let no_comments = COMMENTS.replace_all(html, "");
    SCRIPTS.replace_all(&no_comments, "").into_owned()
}

// ─── Entities ─────────────────────────────────────────────────────────────────

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", " "),
    ("mdash", "\u{2014}"),
    ("ndash", "\u{2013}"),
    ("hellip", "\u{2026}"),
    ("copy", "\u{a9}"),
    ("reg", "\u{ae}"),
    ("trade", "\u{2122}"),
    ("laquo", "\u{ab}"),
    ("raquo", "\u{bb}"),
    ("ldquo", "\u{201c}"),
    ("rdquo", "\u{201d}"),
    ("lsquo", "\u{2018}"),
    ("rsquo", "\u{2019}"),
];

/// Decode named plus numeric (`&#65;`, `&#x41;`) entities. Unknown entities
/// are left as-is.
pub(crate) fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let Some(semi) = tail.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = tail;
            continue;
        };
        let name = &tail[..semi];
        let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X"))
        {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = name.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            NAMED_ENTITIES
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, v)| v.chars().next())
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

// ─── Plain text ───────────────────────────────────────────────────────────────

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "tr", "table",
    "section", "article", "header", "footer", "blockquote", "pre", "hr",
];

/// Strip all tags, emitting a newline wherever a block-level tag opened or
/// closed so the document structure survives.
fn strip_tags_with_breaks(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        match tail.find('>') {
            Some(close) => {
                let tag = &tail[..close];
                let name: String = tag
                    .trim_start_matches('/')
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                if BLOCK_TAGS.contains(&name.as_str()) {
                    out.push('\n');
                }
                rest = &tail[close + 1..];
            }
            // Unclosed tag: drop the rest as markup.
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Collapse runs of spaces/tabs and cap blank-line runs at one.
fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        lines.push(collapsed);
    }
    let mut out = String::new();
    let mut blank_run = 0;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Convert an HTML document to readable plain text.
pub fn html_to_text(html: &str) -> String {
    let clean = strip_non_content(html);
    let stripped = strip_tags_with_breaks(&clean);
    collapse_whitespace(&decode_entities(&stripped))
}

// ─── Markdown ─────────────────────────────────────────────────────────────────

static HEADINGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]\s*>").expect("static regex"));
static LINKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*"([^"]*)"[^>]*>(.*?)</a\s*>"#).expect("static regex")
});
static STRONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:strong|b)\b[^>]*>(.*?)</(?:strong|b)\s*>").expect("static regex")
});
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:em|i)\b[^>]*>(.*?)</(?:em|i)\s*>").expect("static regex")
});
static PRE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<pre[^>]*>\s*<code[^>]*>(.*?)</code>\s*</pre\s*>").expect("static regex")
});
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<code[^>]*>(.*?)</code\s*>").expect("static regex"));
static LIST_ITEMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<li[^>]*>").expect("static regex"));
static PARAGRAPHS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p[^>]*>").expect("static regex"));
static BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("static regex"));

/// Convert an HTML document to markdown.
pub fn html_to_markdown(html: &str) -> String {
    let clean = strip_non_content(html);

    let step = HEADINGS.replace_all(&clean, |caps: &regex::Captures<'_>| {
        let level: usize = caps[1].parse().unwrap_or(1);
        format!("\n{} {}\n", "#".repeat(level), caps[2].trim())
    });
    let step = PRE_CODE.replace_all(&step, "\n```\n$1\n```\n");
    let step = INLINE_CODE.replace_all(&step, "`$1`");
    let step = LINKS.replace_all(&step, "[$2]($1)");
    let step = STRONG.replace_all(&step, "**$1**");
    let step = EMPHASIS.replace_all(&step, "*$1*");
    let step = LIST_ITEMS.replace_all(&step, "\n- ");
    let step = PARAGRAPHS.replace_all(&step, "\n\n");
    let step = BREAKS.replace_all(&step, "\n");

    let stripped = strip_tags_with_breaks(&step);
    collapse_whitespace(&decode_entities(&stripped))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
