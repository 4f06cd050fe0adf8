//! Statement lexer.
//!
//! Single-pass scanner that splits a file's text into statements, tracking
//! quote and paren depth byte-by-byte with a configurable delimiter instead
//! of a fixed `;`.

use once_cell::sync::Lazy;
use regex::Regex;

/// One parsed statement: trimmed, delimiter-stripped text, its byte offset
/// in the source file, and any leading comment lines attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub pos: usize,
    pub comments: Vec<String>,
}

/// A recognized `-- SYSTEM:<name> <args>` / `/*SYSTEM:<name> <args>*/`
/// directive attached to a statement or to the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// File-level only, must be the very first line.
    Delimiter(String),
    /// Suppresses analyzer diagnostics. Empty `classes` means "suppress
    /// everything".
    NoLint { classes: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("unterminated quote starting at byte {0}")]
    UnterminatedQuote(usize),
    #[error("unterminated statement (unbalanced parens) starting at byte {0}")]
    UnbalancedParens(usize),
    #[error("empty delimiter directive value")]
    EmptyDelimiter,
}

static DIRECTIVE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:--|#)\s*SYSTEM:(\w+)\s*(.*)$").unwrap());
static DIRECTIVE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^/\*\s*SYSTEM:(\w+)\s*(.*?)\s*\*/$").unwrap());

/// Parse a single comment line/block into a typed directive, if it is one.
pub fn parse_directive(comment: &str) -> Option<Directive> {
    let trimmed = comment.trim();
    let (name, args) = if let Some(caps) = DIRECTIVE_LINE_RE.captures(trimmed) {
        (caps[1].to_string(), caps[2].trim().to_string())
    } else if let Some(caps) = DIRECTIVE_BLOCK_RE.captures(trimmed) {
        (caps[1].to_string(), caps[2].trim().to_string())
    } else {
        return None;
    };

    match name.as_str() {
        "delimiter" => Some(Directive::Delimiter(unescape(&args))),
        "nolint" => {
            let classes = args.split_whitespace().map(|s| s.to_string()).collect();
            Some(Directive::NoLint { classes })
        }
        _ => None,
    }
}

fn unescape(s: &str) -> String {
    s.replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    delim: Vec<u8>,
}

/// Tokenize `text` into its component statements. Honors a leading
/// `-- SYSTEM:delimiter <value>` directive (the only place a custom
/// delimiter may be declared) and attaches immediately preceding comment
/// groups to the statement that follows them.
pub fn lex(text: &str) -> Result<Vec<Statement>, LexError> {
    let mut input = text;
    let mut delimiter = b";".to_vec();
    let mut base_offset = 0usize;

    if let Some(first_line_end) = input.find('\n').map(|i| i + 1).or(Some(input.len())) {
        let first_line = &input[..first_line_end.min(input.len())];
        let trimmed = first_line.trim_end_matches(['\n', '\r']);
        if let Some(Directive::Delimiter(value)) = parse_directive(trimmed) {
            if value.is_empty() {
                return Err(LexError::EmptyDelimiter);
            }
            delimiter = value.into_bytes();
            base_offset = first_line_end;
            input = &input[first_line_end.min(text.len())..];
        }
    }

    let mut scanner = Scanner {
        bytes: input.as_bytes(),
        pos: 0,
        delim: delimiter,
    };
    scanner.run(base_offset)
}

impl<'a> Scanner<'a> {
    fn run(&mut self, base_offset: usize) -> Result<Vec<Statement>, LexError> {
        let mut statements = Vec::new();
        let mut comments: Vec<String> = Vec::new();
        let mut pending_blank_since_comment = false;

        loop {
            self.skip_ignorable(&mut comments, &mut pending_blank_since_comment)?;
            if self.pos >= self.bytes.len() {
                break;
            }

            let stmt_start = self.pos;
            let (end, hit_delim) = self.scan_statement_body()?;
            let raw = &self.bytes[stmt_start..end];
            let text = String::from_utf8_lossy(raw).trim().to_string();

            if text.is_empty() {
                // A bare delimiter with nothing before it, or EOF with only
                // whitespace pending: nothing to emit.
                comments.clear();
                if !hit_delim {
                    break;
                }
                continue;
            }
            statements.push(Statement {
                text,
                pos: base_offset + stmt_start,
                comments: std::mem::take(&mut comments),
            });
            pending_blank_since_comment = false;
        }

        Ok(statements)
    }

    /// Skip whitespace and accumulate leading comment lines. A blank line
    /// following a comment group clears it.
    fn skip_ignorable(
        &mut self,
        comments: &mut Vec<String>,
        pending_blank: &mut bool,
    ) -> Result<(), LexError> {
        loop {
            self.skip_inline_whitespace_tracking_blank(comments, pending_blank);
            if self.pos >= self.bytes.len() {
                return Ok(());
            }
            let rest = &self.bytes[self.pos..];
            if rest.starts_with(b"--") || rest.starts_with(b"#") {
                let nl = memchr_newline(rest).unwrap_or(rest.len());
                let line = String::from_utf8_lossy(&rest[..nl]).trim().to_string();
                self.pos += nl;
                if !line.is_empty() {
                    comments.push(line);
                }
                *pending_blank = false;
                continue;
            }
            if rest.starts_with(b"/*") {
                if let Some(end) = find_subslice(&rest[2..], b"*/") {
                    let block_end = end + 2 + 2;
                    let block = String::from_utf8_lossy(&rest[..block_end])
                        .trim()
                        .to_string();
                    self.pos += block_end;
                    comments.push(block);
                    *pending_blank = false;
                    continue;
                } else {
                    // unterminated block comment: treat rest of input as comment
                    let block = String::from_utf8_lossy(rest).trim().to_string();
                    self.pos = self.bytes.len();
                    comments.push(block);
                    continue;
                }
            }
            return Ok(());
        }
    }

    fn skip_inline_whitespace_tracking_blank(
        &mut self,
        comments: &mut Vec<String>,
        pending_blank: &mut bool,
    ) {
        let mut newlines_seen = 0;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'\n' => {
                    newlines_seen += 1;
                    self.pos += 1;
                    if newlines_seen >= 2 && !comments.is_empty() {
                        comments.clear();
                        *pending_blank = true;
                    }
                }
                _ => break,
            }
        }
    }

    /// Scan from `self.pos` to the end of the next statement (at the
    /// delimiter, with `depth == 0`), honoring quotes, nested parens, and
    /// embedded comments (a delimiter byte inside a `--`/`#`/`/*...*/` span
    /// is retained as statement text, not treated as a terminator).
    /// Returns the end offset (exclusive of the delimiter) and whether a
    /// delimiter was actually found.
    fn scan_statement_body(&mut self) -> Result<(usize, bool), LexError> {
        let start = self.pos;
        let mut depth: i32 = 0;
        let mut quote: Option<u8> = None;

        while self.pos < self.bytes.len() {
            if quote.is_none() {
                if let Some(skip_to) = self.comment_span_at(self.pos) {
                    self.pos = skip_to;
                    continue;
                }
            }

            if self.match_delimiter_at(self.pos) && depth == 0 && quote.is_none() {
                let end = self.pos;
                self.pos += self.delim.len();
                return Ok((end, true));
            }

            let b = self.bytes[self.pos];

            if let Some(q) = quote {
                if b == b'\\' {
                    self.pos += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
                self.pos += 1;
                continue;
            }

            match b {
                b'\'' | b'"' | b'`' => {
                    quote = Some(b);
                    self.pos += 1;
                }
                b'(' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' => {
                    depth -= 1;
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }

        if quote.is_some() {
            return Err(LexError::UnterminatedQuote(start));
        }
        if depth != 0 {
            return Err(LexError::UnbalancedParens(start));
        }
        // EOF with pending characters but no final delimiter: emit what we have.
        Ok((self.bytes.len(), false))
    }

    fn match_delimiter_at(&self, pos: usize) -> bool {
        self.bytes[pos..].starts_with(self.delim.as_slice())
    }

    /// If a line or block comment starts at `pos`, the offset just past it.
    fn comment_span_at(&self, pos: usize) -> Option<usize> {
        let rest = &self.bytes[pos..];
        if rest.starts_with(b"--") || rest.starts_with(b"#") {
            let nl = memchr_newline(rest).unwrap_or(rest.len());
            return Some(pos + nl);
        }
        if rest.starts_with(b"/*") {
            return match find_subslice(&rest[2..], b"*/") {
                Some(end) => Some(pos + end + 2 + 2),
                None => Some(self.bytes.len()),
            };
        }
        None
    }
}

fn memchr_newline(s: &[u8]) -> Option<usize> {
    s.iter().position(|&b| b == b'\n')
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}
