//! Parseability checks
//!
//! Lexical validation of generated ES modules and skill documents. The module
//! check tokenizes just enough JavaScript to know where strings, template
//! literals, comments and regular expressions begin and end, then verifies
//! that every `(`, `[` and `{` is closed by its partner.

use std::fmt;

/// Location and description of a syntax problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}, column {}", self.message, self.line, self.column)
    }
}

/// Parsed skill front matter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub name: String,
    pub description: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Paren,
    Bracket,
    Brace,
    /// `${` inside a template literal
    Interpolation,
}

impl Frame {
    fn opener(&self) -> &'static str {
        match self {
            Frame::Paren => "(",
            Frame::Bracket => "[",
            Frame::Brace => "{",
            Frame::Interpolation => "${",
        }
    }
}

/// Keywords after which `/` starts a regular expression
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Last significant token, for the regex-vs-division decision
#[derive(Debug, Clone, PartialEq)]
enum Prev {
    Start,
    Punct(char),
    Word(String),
    Value,
}

impl Prev {
    fn allows_regex(&self) -> bool {
        match self {
            Prev::Start => true,
            Prev::Punct(c) => !matches!(c, ')' | ']'),
            Prev::Word(w) => REGEX_PREFIX_KEYWORDS.contains(&w.as_str()),
            Prev::Value => false,
        }
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    stack: Vec<(Frame, usize, usize)>,
    prev: Prev,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            stack: Vec::new(),
            prev: Prev::Start,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn issue(&self, line: usize, column: usize, message: impl Into<String>) -> SyntaxIssue {
        SyntaxIssue {
            line,
            column,
            message: message.into(),
        }
    }

    fn run(mut self) -> Result<(), SyntaxIssue> {
        if self.peek() == Some('#') && self.peek_at(1) == Some('!') {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.bump();
            }
        }

        while let Some(c) = self.peek() {
            let (line, column) = (self.line, self.column);
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        if c == '*' && self.peek() == Some('/') {
                            self.bump();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(self.issue(line, column, "unterminated block comment"));
                    }
                }
                '/' if self.prev.allows_regex() => {
                    self.regex_literal(line, column)?;
                    self.prev = Prev::Value;
                }
                '\'' | '"' => {
                    self.string_literal(c, line, column)?;
                    self.prev = Prev::Value;
                }
                '`' => {
                    self.bump();
                    self.template_literal(line, column)?;
                }
                '(' | '[' | '{' => {
                    self.bump();
                    let frame = match c {
                        '(' => Frame::Paren,
                        '[' => Frame::Bracket,
                        _ => Frame::Brace,
                    };
                    self.stack.push((frame, line, column));
                    self.prev = Prev::Punct(c);
                }
                ')' | ']' | '}' => {
                    self.bump();
                    let (frame, open_line, open_col) = self
                        .stack
                        .pop()
                        .ok_or_else(|| self.issue(line, column, format!("unexpected '{}'", c)))?;
                    match (frame, c) {
                        (Frame::Paren, ')') | (Frame::Bracket, ']') | (Frame::Brace, '}') => {
                            self.prev = Prev::Punct(c);
                        }
                        (Frame::Interpolation, '}') => {
                            self.template_literal(open_line, open_col)?;
                        }
                        (frame, _) => {
                            return Err(self.issue(
                                line,
                                column,
                                format!(
                                    "'{}' does not close '{}' opened at line {}, column {}",
                                    c,
                                    frame.opener(),
                                    open_line,
                                    open_col
                                ),
                            ))
                        }
                    }
                }
                c if c.is_alphanumeric() || c == '_' || c == '$' => {
                    let mut word = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_alphanumeric() || c == '_' || c == '$' {
                            word.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    self.prev = if word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                        Prev::Value
                    } else {
                        Prev::Word(word)
                    };
                }
                _ => {
                    self.bump();
                    self.prev = Prev::Punct(c);
                }
            }
        }

        if let Some((frame, line, column)) = self.stack.pop() {
            let what = match frame {
                Frame::Interpolation => "unterminated template literal".to_string(),
                other => format!("unclosed '{}'", other.opener()),
            };
            return Err(self.issue(line, column, what));
        }
        Ok(())
    }

    fn string_literal(&mut self, quote: char, line: usize, column: usize) -> Result<(), SyntaxIssue> {
        self.bump();
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    self.bump();
                }
                '\n' => return Err(self.issue(line, column, "unterminated string literal")),
                c if c == quote => return Ok(()),
                _ => {}
            }
        }
        Err(self.issue(line, column, "unterminated string literal"))
    }

    /// Scan template text up to the closing backtick or the next `${`.
    fn template_literal(&mut self, line: usize, column: usize) -> Result<(), SyntaxIssue> {
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    self.bump();
                }
                '`' => {
                    self.prev = Prev::Value;
                    return Ok(());
                }
                '$' if self.peek() == Some('{') => {
                    self.bump();
                    self.stack.push((Frame::Interpolation, line, column));
                    self.prev = Prev::Start;
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(self.issue(line, column, "unterminated template literal"))
    }

    fn regex_literal(&mut self, line: usize, column: usize) -> Result<(), SyntaxIssue> {
        self.bump();
        let mut in_class = false;
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(self.issue(line, column, "unterminated regular expression"))
                }
                Some('\\') => {
                    self.bump();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() {
                self.bump();
            } else {
                break;
            }
        }
        Ok(())
    }
}

/// Check that an ES module is lexically well formed
pub fn check_module(source: &str) -> Result<(), SyntaxIssue> {
    if source.trim().is_empty() {
        return Err(SyntaxIssue {
            line: 1,
            column: 1,
            message: "empty source".to_string(),
        });
    }
    Lexer::new(source).run()
}

/// Parse the `---` delimited header of a skill document
pub fn parse_front_matter(source: &str) -> Result<FrontMatter, SyntaxIssue> {
    let issue = |line: usize, message: &str| SyntaxIssue {
        line,
        column: 1,
        message: message.to_string(),
    };

    let text = source.trim_start_matches('\u{feff}');
    let mut lines = text.lines().enumerate();
    match lines.next() {
        Some((_, first)) if first.trim_end() == "---" => {}
        _ => return Err(issue(1, "missing front matter")),
    }

    let mut name = None;
    let mut description = None;
    let mut body_start = None;

    for (idx, line) in lines.by_ref() {
        if line.trim_end() == "---" {
            body_start = Some(idx + 1);
            break;
        }
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| issue(idx + 1, "front matter line is not 'key: value'"))?;
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key.trim() {
            "name" => name = Some(value),
            "description" => description = Some(value),
            _ => {}
        }
    }

    let body_start = body_start.ok_or_else(|| issue(1, "unterminated front matter"))?;
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| issue(1, "front matter has no name"))?;
    let description = description
        .filter(|d| !d.is_empty())
        .ok_or_else(|| issue(1, "front matter has no description"))?;
    let body = text.lines().skip(body_start).collect::<Vec<_>>().join("\n");

    Ok(FrontMatter {
        name,
        description,
        body,
    })
}
