use crate::result::Span;

/// Bytes of context kept on each side of the first match in a snippet.
pub const DEFAULT_SNIPPET_RADIUS: usize = 120;

/// Marker pair wrapped around highlighted spans in terminal output.
pub const HIGHLIGHT_OPEN: &str = "[";
pub const HIGHLIGHT_CLOSE: &str = "]";

/// A window of page text with the spans that fall inside it, rebased onto
/// the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub text: String,
    pub spans: Vec<Span>,
    /// Whether text was cut before the window.
    pub leading_cut: bool,
    /// Whether text was cut after the window.
    pub trailing_cut: bool,
}

/// Cut a window of `text` centred on the first span.
///
/// Without spans the window starts at the beginning of the page. Window
/// bounds always fall on character boundaries.
///
/// ```
/// use pdfdex::{result::Span, text_util::extract_snippet};
///
/// let text = "aaaa needle bbbb";
/// let snippet = extract_snippet(text, &[Span { start: 5, end: 11 }], 3);
/// assert_eq!(snippet.text, "aa needle bb");
/// assert_eq!(snippet.spans, [Span { start: 3, end: 9 }]);
/// ```
pub fn extract_snippet(text: &str, spans: &[Span], radius: usize) -> Snippet {
    let (lo, hi) = match spans.iter().min() {
        Some(first) => (
            first.start.saturating_sub(radius),
            first.end.saturating_add(radius),
        ),
        None => (0, radius.saturating_mul(2)),
    };
    let lo = floor_boundary(text, lo);
    let hi = ceil_boundary(text, hi);

    let spans = spans
        .iter()
        .filter(|s| s.start >= lo && s.end <= hi && s.start < s.end)
        .map(|s| Span {
            start: s.start - lo,
            end: s.end - lo,
        })
        .collect();

    Snippet {
        text: text[lo..hi].to_string(),
        spans,
        leading_cut: lo > 0,
        trailing_cut: hi < text.len(),
    }
}

/// Wrap each span of `text` in `open`/`close`.
///
/// Overlapping spans are merged and spans that do not sit on character
/// boundaries are ignored.
pub fn highlight(text: &str, spans: &[Span], open: &str, close: &str) -> String {
    let mut spans: Vec<Span> = spans
        .iter()
        .copied()
        .filter(|s| {
            s.start < s.end
                && s.end <= text.len()
                && text.is_char_boundary(s.start)
                && text.is_char_boundary(s.end)
        })
        .collect();
    spans.sort_unstable();

    let mut out = String::with_capacity(text.len() + spans.len() * 2);
    let mut cursor = 0;
    let mut iter = spans.into_iter().peekable();
    while let Some(mut span) = iter.next() {
        while let Some(next) = iter.peek()
            && next.start <= span.end
        {
            span.end = span.end.max(next.end);
            iter.next();
        }
        let start = span.start.max(cursor);
        out.push_str(&text[cursor..start]);
        out.push_str(open);
        out.push_str(&text[start..span.end]);
        out.push_str(close);
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Collapse runs of whitespace (including line breaks) into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render a one-line, highlighted snippet for terminal output.
pub fn render_snippet(text: &str, spans: &[Span]) -> String {
    let snippet = extract_snippet(text, spans, DEFAULT_SNIPPET_RADIUS);
    let body = collapse_whitespace(&highlight(
        &snippet.text,
        &snippet.spans,
        HIGHLIGHT_OPEN,
        HIGHLIGHT_CLOSE,
    ));
    match (snippet.leading_cut, snippet.trailing_cut) {
        (true, true) => format!("...{body}..."),
        (true, false) => format!("...{body}"),
        (false, true) => format!("{body}..."),
        (false, false) => body,
    }
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
