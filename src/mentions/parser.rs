//! Mention parsing: `@file:…`, `@clipboard`, `@git`, `@codebase`,
//! `@error`, `@url:…` in free text.
//!
//! The parser records each mention with its byte span and produces a clean
//! message with the mentions removed. Expansion renders fetched content
//! into a `<context>` block ahead of the clean text.

use serde::{Deserialize, Serialize};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionKind {
    File,
    Clipboard,
    Git,
    Codebase,
    Error,
    Url,
}

impl MentionKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Clipboard => "clipboard",
            Self::Git => "git",
            Self::Codebase => "codebase",
            Self::Error => "error",
            Self::Url => "url",
        }
    }
}

/// One parsed mention. `content`/`error` are filled by the fetchers.
#[derive(Debug, Clone)]
pub struct Mention {
    pub kind: MentionKind,
    /// The matched text, including the `@`.
    pub raw: String,
    /// Path, git range, or URL, when the kind takes one.
    pub argument: Option<String>,
    /// Byte span in the original input.
    pub start: usize,
    pub end: usize,
    pub content: Option<String>,
    pub error: Option<String>,
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

/// Extract all mentions and return them with the cleaned message (mentions
/// removed, whitespace collapsed). Parsing the clean message again yields
/// no mentions.
pub fn parse_mentions(input: &str) -> (Vec<Mention>, String) {
    let mut mentions = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'@' || !input.is_char_boundary(i) {
            i += 1;
            continue;
        }
        // An email-like `a@b` is not a mention; require start-of-word.
        if i > 0 && bytes[i - 1].is_ascii_alphanumeric() {
            i += 1;
            continue;
        }
        match match_mention(input, i) {
            Some(mention) => {
                i = mention.end;
                mentions.push(mention);
            }
            None => i += 1,
        }
    }

    let clean = remove_spans(input, &mentions);
    (mentions, clean)
}

fn match_mention(input: &str, at: usize) -> Option<Mention> {
    let rest = &input[at + 1..];

    let (kind, keyword, takes_arg) = if rest.starts_with("file:") {
        (MentionKind::File, "file", true)
    } else if rest.starts_with("url:") {
        (MentionKind::Url, "url", true)
    } else if starts_word(rest, "clipboard") {
        (MentionKind::Clipboard, "clipboard", false)
    } else if starts_word(rest, "codebase") {
        (MentionKind::Codebase, "codebase", false)
    } else if starts_word(rest, "error") {
        (MentionKind::Error, "error", false)
    } else if rest.starts_with("git") {
        (MentionKind::Git, "git", false)
    } else {
        return None;
    };

    let mut end = at + 1 + keyword.len();
    let mut argument = None;

    if takes_arg {
        end += 1; // the ':'
        let (arg, consumed) = take_argument(&input[end..]);
        if arg.is_empty() {
            return None;
        }
        argument = Some(arg);
        end += consumed;
    } else if kind == MentionKind::Git {
        // Optional `:range` suffix.
        if input[end..].starts_with(':') {
            let (arg, consumed) = take_argument(&input[end + 1..]);
            if !arg.is_empty() {
                argument = Some(arg);
                end += 1 + consumed;
            }
        } else if !rest["git".len()..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c.is_ascii_punctuation())
        {
            return None; // e.g. @github
        }
    }

    Some(Mention {
        kind,
        raw: input[at..end].to_string(),
        argument,
        start: at,
        end,
        content: None,
        error: None,
    })
}

/// Keyword followed by a non-word character or end of input.
fn starts_word(rest: &str, keyword: &str) -> bool {
    rest.starts_with(keyword)
        && rest[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric() && c != '_' && c != ':')
}

/// Take a quoted or whitespace-delimited argument; returns (value,
/// bytes consumed).
fn take_argument(rest: &str) -> (String, usize) {
    if let Some(stripped) = rest.strip_prefix('"') {
        match stripped.find('"') {
            Some(close) => (stripped[..close].to_string(), close + 2),
            None => (stripped.to_string(), rest.len()),
        }
    } else {
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        (rest[..end].to_string(), end)
    }
}

fn remove_spans(input: &str, mentions: &[Mention]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for mention in mentions {
        out.push_str(&input[cursor..mention.start]);
        cursor = mention.end;
    }
    out.push_str(&input[cursor..]);

    // Collapse doubled spaces left by the removals.
    let mut clean = String::with_capacity(out.len());
    let mut last_space = false;
    for c in out.chars() {
        if c == ' ' {
            if !last_space {
                clean.push(c);
            }
            last_space = true;
        } else {
            clean.push(c);
            last_space = false;
        }
    }
    clean.trim().to_string()
}

// ─── Expansion ────────────────────────────────────────────────────────────────

/// Render fetched mentions plus the clean message:
/// `<context><file path="…">…</file>…</context>\n\n<clean>`.
pub fn expand(mentions: &[Mention], clean: &str) -> String {
    if mentions.is_empty() {
        return clean.to_string();
    }

    let mut out = String::from("<context>\n");
    for mention in mentions {
        let tag = mention.kind.tag();
        match &mention.argument {
            Some(arg) if matches!(mention.kind, MentionKind::File | MentionKind::Url) => {
                out.push_str(&format!("<{tag} path=\"{arg}\">\n"));
            }
            _ => out.push_str(&format!("<{tag}>\n")),
        }
        match (&mention.content, &mention.error) {
            (Some(content), _) => out.push_str(content),
            (None, Some(error)) => out.push_str(&format!("(unavailable: {error})")),
            (None, None) => out.push_str("(not fetched)"),
        }
        out.push_str(&format!("\n</{tag}>\n"));
    }
    out.push_str("</context>\n\n");
    out.push_str(clean);
    out
}

/// I/O-free size estimate for budgeting, by mention type.
pub fn estimate_expansion_size(mentions: &[Mention]) -> usize {
    mentions
        .iter()
        .map(|m| match m.kind {
            MentionKind::File => 4096,
            MentionKind::Clipboard => 1024,
            MentionKind::Git => 2048,
            MentionKind::Codebase => 8192,
            MentionKind::Error => 512,
            MentionKind::Url => 8192,
        })
        .sum()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_mention_bare_path() {
        let (mentions, clean) = parse_mentions("look at @file:src/main.rs please");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].kind, MentionKind::File);
        assert_eq!(mentions[0].argument.as_deref(), Some("src/main.rs"));
        assert_eq!(clean, "look at please");
    }

    #[test]
    fn file_mention_quoted_path() {
        let (mentions, clean) = parse_mentions(r#"check @file:"my docs/notes.txt" now"#);
        assert_eq!(mentions[0].argument.as_deref(), Some("my docs/notes.txt"));
        assert_eq!(clean, "check now");
    }

    #[test]
    fn bare_keywords() {
        let (mentions, _) = parse_mentions("@clipboard and @codebase and @error");
        let kinds: Vec<MentionKind> = mentions.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MentionKind::Clipboard, MentionKind::Codebase, MentionKind::Error]
        );
    }

    #[test]
    fn git_with_and_without_range() {
        let (mentions, _) = parse_mentions("@git please");
        assert_eq!(mentions[0].kind, MentionKind::Git);
        assert!(mentions[0].argument.is_none());

        let (mentions, _) = parse_mentions("@git:HEAD~5..HEAD please");
        assert_eq!(mentions[0].argument.as_deref(), Some("HEAD~5..HEAD"));
    }

    #[test]
    fn url_mention() {
        let (mentions, _) = parse_mentions("see @url:https://example.com/docs ok");
        assert_eq!(mentions[0].kind, MentionKind::Url);
        assert_eq!(
            mentions[0].argument.as_deref(),
            Some("https://example.com/docs")
        );
    }

    #[test]
    fn email_is_not_a_mention() {
        let (mentions, clean) = parse_mentions("mail me at user@example.com");
        assert!(mentions.is_empty());
        assert_eq!(clean, "mail me at user@example.com");
    }

    #[test]
    fn unknown_at_word_is_ignored() {
        let (mentions, _) = parse_mentions("ping @github for status");
        assert!(mentions.is_empty());
    }

    #[test]
    fn positions_cover_the_raw_text() {
        let input = "a @clipboard b";
        let (mentions, _) = parse_mentions(input);
        let m = &mentions[0];
        assert_eq!(&input[m.start..m.end], m.raw);
        assert_eq!(m.raw, "@clipboard");
    }

    #[test]
    fn clean_message_reparses_to_nothing() {
        let input = r#"summarize @file:a.txt and @git:HEAD~3 and @clipboard thanks"#;
        let (mentions, clean) = parse_mentions(input);
        assert_eq!(mentions.len(), 3);
        let (again, _) = parse_mentions(&clean);
        assert!(again.is_empty(), "clean message still has mentions: {clean}");
    }

    #[test]
    fn expansion_renders_context_block() {
        let (mut mentions, clean) = parse_mentions("what is in @file:a.txt ?");
        mentions[0].content = Some("File: a.txt\ncontents here".to_string());

        let expanded = expand(&mentions, &clean);
        assert!(expanded.starts_with("<context>\n<file path=\"a.txt\">\n"));
        assert!(expanded.contains("contents here"));
        assert!(expanded.contains("</file>\n</context>\n\nwhat is in ?"));
    }

    #[test]
    fn expansion_reports_fetch_errors_inline() {
        let (mut mentions, clean) = parse_mentions("@clipboard go");
        mentions[0].error = Some("clipboard is empty".to_string());
        let expanded = expand(&mentions, &clean);
        assert!(expanded.contains("(unavailable: clipboard is empty)"));
    }

    #[test]
    fn no_mentions_passthrough() {
        let (mentions, clean) = parse_mentions("plain message");
        assert!(mentions.is_empty());
        assert_eq!(expand(&mentions, &clean), "plain message");
    }

    #[test]
    fn size_estimate_needs_no_io() {
        let (mentions, _) = parse_mentions("@file:x @clipboard @git");
        assert_eq!(estimate_expansion_size(&mentions), 4096 + 1024 + 2048);
    }
}
