//! Markdown rendering for bot replies, with syntect-highlighted code blocks.
//!
//! A reply renders to two views of the same content: an HTML fragment, and a
//! list of [`Segment`]s that the GUI lays out as prose text and code blocks.

use once_cell::sync::Lazy;
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use tracing::warn;

const THEME_NAME: &str = "base16-ocean.dark";

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static THEME: Lazy<Theme> = Lazy::new(|| {
    let mut themes = ThemeSet::load_defaults();
    themes.themes.remove(THEME_NAME).unwrap_or_default()
});

#[derive(Debug, Clone, PartialEq)]
pub struct StyledSpan {
    pub text: String,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HighlightedLine {
    pub spans: Vec<StyledSpan>,
}

#[derive(Debug, Clone)]
pub struct CodeBlock {
    /// Language as declared on the fence, if any.
    pub language: Option<String>,
    /// Name of the syntax the block was highlighted with, e.g. "Python".
    pub syntax_name: String,
    /// Raw code exactly as written between the fences.
    pub code: String,
    pub lines: Vec<HighlightedLine>,
}

impl CodeBlock {
    /// Short tag used for css classes and the block header.
    pub fn language_tag(&self) -> String {
        let raw = match &self.language {
            Some(language) => language.clone(),
            None => self.syntax_name.to_lowercase().replace(' ', "-"),
        };
        raw.chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '#' | '.' | '_'))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Prose(String),
    /// Index into [`RenderedReply::code_blocks`].
    Code(usize),
}

#[derive(Debug, Clone)]
pub struct RenderedReply {
    #[allow(dead_code)]
    pub html: String,
    pub segments: Vec<Segment>,
    pub code_blocks: Vec<CodeBlock>,
}

struct PendingCode {
    language: Option<String>,
    buffer: String,
}

/// Render model output. Raw HTML inside the reply is shown as text.
pub fn render_bot_text(text: &str, copy_label: &str) -> RenderedReply {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(text, options);

    let mut html_events: Vec<Event> = Vec::new();
    let mut segments = Vec::new();
    let mut code_blocks: Vec<CodeBlock> = Vec::new();
    let mut prose = String::new();
    let mut pending: Option<PendingCode> = None;

    for event in parser {
        if let Some(mut state) = pending.take() {
            match event {
                Event::Text(chunk) => {
                    state.buffer.push_str(&chunk);
                    pending = Some(state);
                }
                Event::End(Tag::CodeBlock(_)) => {
                    flush_prose(&mut prose, &mut segments);
                    let code = state.buffer.strip_suffix('\n').unwrap_or(&state.buffer);
                    let block = highlight_code(code, state.language.as_deref());
                    let index = code_blocks.len();
                    html_events.push(Event::Html(code_block_html(&block, index, copy_label).into()));
                    segments.push(Segment::Code(index));
                    code_blocks.push(block);
                }
                _ => pending = Some(state),
            }
            continue;
        }

        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                pending = Some(PendingCode { language, buffer: String::new() });
            }
            Event::Html(raw) => {
                prose.push_str(&raw);
                html_events.push(Event::Text(raw));
            }
            Event::SoftBreak | Event::HardBreak => {
                prose.push('\n');
                html_events.push(Event::HardBreak);
            }
            other => {
                append_prose(&other, &mut prose);
                html_events.push(other);
            }
        }
    }
    flush_prose(&mut prose, &mut segments);

    let mut html_out = String::new();
    html::push_html(&mut html_out, html_events.into_iter());

    RenderedReply {
        html: html_out,
        segments,
        code_blocks,
    }
}

/// User text is never parsed: it renders as literal, escaped text.
#[allow(dead_code)]
pub fn render_user_text(text: &str) -> String {
    format!("<div class=\"message user-message\">{}</div>", escape(text))
}

fn append_prose(event: &Event, prose: &mut String) {
    match event {
        Event::Text(text) | Event::Code(text) => prose.push_str(text),
        Event::Start(Tag::Item) => prose.push_str("• "),
        Event::End(Tag::Item) | Event::End(Tag::TableRow) | Event::End(Tag::TableHead) => {
            if !prose.ends_with('\n') {
                prose.push('\n');
            }
        }
        Event::End(Tag::TableCell) => prose.push_str("  "),
        Event::End(Tag::Paragraph) | Event::End(Tag::Heading(..)) | Event::End(Tag::List(_)) => {
            prose.push_str("\n\n")
        }
        Event::TaskListMarker(done) => prose.push_str(if *done { "[x] " } else { "[ ] " }),
        Event::Rule => prose.push_str("────────\n\n"),
        _ => {}
    }
}

fn flush_prose(prose: &mut String, segments: &mut Vec<Segment>) {
    let trimmed = prose.trim();
    if !trimmed.is_empty() {
        segments.push(Segment::Prose(trimmed.to_string()));
    }
    prose.clear();
}

fn escape(text: &str) -> String {
    let mut out = String::new();
    html::push_html(&mut out, std::iter::once(Event::Text(CowStr::Borrowed(text))));
    out
}

fn code_block_html(block: &CodeBlock, index: usize, copy_label: &str) -> String {
    let tag = block.language_tag();
    let mut out = format!(
        "<pre class=\"code-block\" data-language=\"{tag}\"><code class=\"language-{tag}\">"
    );
    for line in &block.lines {
        for span in &line.spans {
            let [r, g, b] = span.color;
            out.push_str(&format!(
                "<span style=\"color:#{:02x}{:02x}{:02x}\">{}</span>",
                r,
                g,
                b,
                escape(&span.text)
            ));
        }
    }
    out.push_str(&format!(
        "</code><button class=\"copy-button\" data-block=\"{}\">{}</button></pre>\n",
        index,
        escape(copy_label)
    ));
    out
}

fn find_syntax(code: &str, language: Option<&str>) -> &'static SyntaxReference {
    language
        .and_then(|token| SYNTAX_SET.find_syntax_by_token(token))
        .or_else(|| {
            code.lines()
                .next()
                .and_then(|first| SYNTAX_SET.find_syntax_by_first_line(first))
        })
        .unwrap_or_else(|| SYNTAX_SET.find_syntax_plain_text())
}

/// Highlight `code` by its declared language, falling back to first-line
/// detection and then plain text.
pub fn highlight_code(code: &str, language: Option<&str>) -> CodeBlock {
    let syntax = find_syntax(code, language);
    let mut highlighter = HighlightLines::new(syntax, &THEME);
    let plain = THEME.settings.foreground.map(|c| [c.r, c.g, c.b]).unwrap_or([0xc0, 0xc5, 0xce]);

    let mut lines = Vec::new();
    for line in LinesWithEndings::from(code) {
        let spans = match highlighter.highlight_line(line, &SYNTAX_SET) {
            Ok(ranges) => ranges
                .into_iter()
                .filter(|(_, text)| !text.is_empty())
                .map(|(style, text)| StyledSpan {
                    text: text.to_string(),
                    color: [style.foreground.r, style.foreground.g, style.foreground.b],
                })
                .collect(),
            Err(e) => {
                warn!("Highlighting failed for {}: {}", syntax.name, e);
                vec![StyledSpan { text: line.to_string(), color: plain }]
            }
        };
        lines.push(HighlightedLine { spans });
    }

    CodeBlock {
        language: language.map(str::to_string),
        syntax_name: syntax.name.clone(),
        code: code.to_string(),
        lines,
    }
}
