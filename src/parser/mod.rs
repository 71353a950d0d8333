//! Lexer and statement parser for the shell surface.
//!
//! The lexer scans a statement left to right into tokens, tagging every
//! word segment with how it was quoted so the expander can apply the right
//! rules later:
//!
//! - single quotes: fully literal, no escapes;
//! - double quotes: `\$`, `\"`, `\\`, `` \` `` are escapes, everything else
//!   literal; expansion happens later but results are never re-split;
//! - unquoted: backslash escapes the next character; `|`, `<`, `>`, `;` and
//!   whitespace separate; `$(…)` and backtick spans are kept intact inside
//!   the word even when they contain pipes or spaces.
//!
//! `>`/`>>`, `2>`/`2>>`, `<` and `<<` are distinct operator tokens. A
//! redirection and its operand may appear anywhere in a simple command and
//! are peeled off into the stage's redirection list rather than becoming
//! positional arguments.
//!
//! Control flow (`for`/`if`) is line-oriented and handled above this layer;
//! the parser here produces pipelines and assignments.

use std::fmt;

// ---------------------------------------------------------------------------
// Words and tokens
// ---------------------------------------------------------------------------

/// How a word segment was quoted in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    None,
    Single,
    Double,
}

/// A contiguous run of characters with uniform quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub quote: Quote,
}

/// One shell word: a sequence of adjacent segments (`a"b"'c'` is one word
/// of three segments).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Word {
    pub segments: Vec<Segment>,
}

impl Word {
    pub fn from_unquoted(text: &str) -> Self {
        Word {
            segments: vec![Segment {
                text: text.to_string(),
                quote: Quote::None,
            }],
        }
    }

    /// The word's text with quoting stripped and no expansion applied.
    pub fn literal(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// True when no segment is unquoted (so the word is never split or
    /// glob-expanded).
    pub fn fully_quoted(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.quote != Quote::None)
    }
}

/// Redirection operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirOp {
    /// `<` — stdin from a file.
    In,
    /// `>` — stdout overwrite.
    Out,
    /// `>>` — stdout append.
    Append,
    /// `2>` — stderr overwrite.
    ErrOut,
    /// `2>>` — stderr append.
    ErrAppend,
    /// `<<DELIM` — here-document.
    Heredoc,
}

impl RedirOp {
    pub fn is_output(self) -> bool {
        matches!(self, RedirOp::Out | RedirOp::Append)
    }

    pub fn is_stderr(self) -> bool {
        matches!(self, RedirOp::ErrOut | RedirOp::ErrAppend)
    }

    pub fn appends(self) -> bool {
        matches!(self, RedirOp::Append | RedirOp::ErrAppend)
    }
}

impl fmt::Display for RedirOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedirOp::In => "<",
            RedirOp::Out => ">",
            RedirOp::Append => ">>",
            RedirOp::ErrOut => "2>",
            RedirOp::ErrAppend => "2>>",
            RedirOp::Heredoc => "<<",
        };
        f.write_str(s)
    }
}

/// A redirection attached to one pipeline stage. For here-docs the target
/// holds the delimiter; the collected body is supplied at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub op: RedirOp,
    pub target: Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Word),
    Pipe,
    Semi,
    Redirect(RedirOp),
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// One stage of a pipeline before expansion.
#[derive(Debug, Clone, Default)]
pub struct SimpleCommand {
    pub name: Word,
    pub args: Vec<Word>,
    pub redirections: Vec<Redirection>,
}

impl SimpleCommand {
    pub fn heredoc_delimiter(&self) -> Option<String> {
        self.redirections
            .iter()
            .find(|r| r.op == RedirOp::Heredoc)
            .map(|r| r.target.literal())
    }
}

/// A parsed statement: a pipeline of one or more stages, or a variable
/// assignment at statement head.
#[derive(Debug, Clone)]
pub enum Statement {
    Pipeline(Vec<SimpleCommand>),
    Assignment { name: String, value: Vec<Word> },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnclosedSingleQuote,
    UnclosedDoubleQuote,
    UnclosedBacktick,
    UnclosedSubstitution,
    /// A redirection operator with nothing after it.
    MissingRedirectTarget(RedirOp),
    /// A `|` with no command on one side, or redirections with no command.
    EmptyCommand,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnclosedSingleQuote => {
                write!(f, "unexpected EOF while looking for matching `''")
            }
            ParseError::UnclosedDoubleQuote => {
                write!(f, "unexpected EOF while looking for matching `\"'")
            }
            ParseError::UnclosedBacktick => {
                write!(f, "unexpected EOF while looking for matching backquote")
            }
            ParseError::UnclosedSubstitution => {
                write!(f, "unexpected EOF while looking for matching `)'")
            }
            ParseError::MissingRedirectTarget(op) => {
                write!(f, "syntax error near unexpected token `newline' after `{op}'")
            }
            ParseError::EmptyCommand => write!(f, "syntax error near unexpected token `|'"),
        }
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
    /// Segments of the word currently being scanned.
    segments: Vec<Segment>,
    /// Unquoted run not yet closed into a segment.
    current: String,
    /// True once anything (even an empty quoted span) started this word,
    /// so `""` survives as an empty argument.
    word_started: bool,
}

/// Tokenize one statement.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: input.chars().collect(),
        pos: 0,
        tokens: Vec::new(),
        segments: Vec::new(),
        current: String::new(),
        word_started: false,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn run(&mut self) -> Result<(), ParseError> {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\n' => {
                    self.flush_word();
                    self.pos += 1;
                }
                '\'' => self.scan_single_quoted()?,
                '"' => self.scan_double_quoted()?,
                '\\' => {
                    // Backslash escapes the next character at top level. A
                    // trailing backslash is a line continuation the REPL
                    // already consumed; ignore it if one slips through.
                    self.pos += 1;
                    if self.pos < self.chars.len() {
                        let next = self.chars[self.pos];
                        // Escaped expansion characters keep their backslash
                        // so the expander treats them as literals.
                        if next == '$' || next == '`' {
                            self.current.push('\\');
                        }
                        self.current.push(next);
                        self.word_started = true;
                        self.pos += 1;
                    }
                }
                '|' => {
                    self.flush_word();
                    self.tokens.push(Token::Pipe);
                    self.pos += 1;
                }
                ';' => {
                    self.flush_word();
                    self.tokens.push(Token::Semi);
                    self.pos += 1;
                }
                '<' => {
                    self.flush_word();
                    if self.peek(1) == Some('<') {
                        self.tokens.push(Token::Redirect(RedirOp::Heredoc));
                        self.pos += 2;
                    } else {
                        self.tokens.push(Token::Redirect(RedirOp::In));
                        self.pos += 1;
                    }
                }
                '>' => {
                    // `2>` / `2>>` when the word so far is exactly "2".
                    let stderr_fd = self.segments.is_empty() && self.current == "2";
                    if stderr_fd {
                        self.current.clear();
                        self.word_started = false;
                    }
                    self.flush_word();
                    let append = self.peek(1) == Some('>');
                    let op = match (stderr_fd, append) {
                        (true, true) => RedirOp::ErrAppend,
                        (true, false) => RedirOp::ErrOut,
                        (false, true) => RedirOp::Append,
                        (false, false) => RedirOp::Out,
                    };
                    self.tokens.push(Token::Redirect(op));
                    self.pos += if append { 2 } else { 1 };
                }
                '`' => self.scan_backticks()?,
                '$' if self.peek(1) == Some('(') => self.scan_substitution()?,
                _ => {
                    self.current.push(c);
                    self.word_started = true;
                    self.pos += 1;
                }
            }
        }
        self.flush_word();
        Ok(())
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn flush_current(&mut self) {
        if !self.current.is_empty() {
            self.segments.push(Segment {
                text: std::mem::take(&mut self.current),
                quote: Quote::None,
            });
        }
    }

    fn flush_word(&mut self) {
        self.flush_current();
        if !self.segments.is_empty() || self.word_started {
            self.tokens.push(Token::Word(Word {
                segments: std::mem::take(&mut self.segments),
            }));
        }
        self.word_started = false;
    }

    fn scan_single_quoted(&mut self) -> Result<(), ParseError> {
        self.flush_current();
        self.word_started = true;
        self.pos += 1; // opening quote
        let mut text = String::new();
        loop {
            match self.chars.get(self.pos) {
                Some('\'') => {
                    self.pos += 1;
                    break;
                }
                Some(&c) => {
                    text.push(c);
                    self.pos += 1;
                }
                None => return Err(ParseError::UnclosedSingleQuote),
            }
        }
        self.segments.push(Segment {
            text,
            quote: Quote::Single,
        });
        Ok(())
    }

    fn scan_double_quoted(&mut self) -> Result<(), ParseError> {
        self.flush_current();
        self.word_started = true;
        self.pos += 1; // opening quote
        let mut text = String::new();
        loop {
            match self.chars.get(self.pos) {
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    // Only \$ \" \\ \` are escapes inside double quotes.
                    match self.chars.get(self.pos + 1) {
                        Some(&next @ ('$' | '"' | '\\' | '`')) => {
                            // Keep the backslash before $ and ` so the
                            // expander sees a literal, not an expansion.
                            if next == '$' || next == '`' {
                                text.push('\\');
                            }
                            text.push(next);
                            self.pos += 2;
                        }
                        _ => {
                            text.push('\\');
                            self.pos += 1;
                        }
                    }
                }
                Some(&c) => {
                    text.push(c);
                    self.pos += 1;
                }
                None => return Err(ParseError::UnclosedDoubleQuote),
            }
        }
        self.segments.push(Segment {
            text,
            quote: Quote::Double,
        });
        Ok(())
    }

    /// Consume a backtick substitution into the current unquoted run, kept
    /// verbatim (backticks included) for the expander.
    fn scan_backticks(&mut self) -> Result<(), ParseError> {
        self.word_started = true;
        self.current.push('`');
        self.pos += 1;
        loop {
            match self.chars.get(self.pos) {
                Some('`') => {
                    self.current.push('`');
                    self.pos += 1;
                    return Ok(());
                }
                Some(&c) => {
                    self.current.push(c);
                    self.pos += 1;
                }
                None => return Err(ParseError::UnclosedBacktick),
            }
        }
    }

    /// Consume `$(…)` with nesting into the current unquoted run, kept
    /// verbatim. Pipes and spaces inside belong to the inner command, not
    /// to this statement.
    fn scan_substitution(&mut self) -> Result<(), ParseError> {
        self.word_started = true;
        self.current.push('$');
        self.current.push('(');
        self.pos += 2;
        let mut depth = 1usize;
        while depth > 0 {
            match self.chars.get(self.pos) {
                Some('(') => {
                    depth += 1;
                    self.current.push('(');
                    self.pos += 1;
                }
                Some(')') => {
                    depth -= 1;
                    self.current.push(')');
                    self.pos += 1;
                }
                Some(&c) => {
                    self.current.push(c);
                    self.pos += 1;
                }
                None => return Err(ParseError::UnclosedSubstitution),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse one statement (no `;` inside — the engine splits those first).
///
/// Returns `None` for blank input.
pub fn parse_statement(line: &str) -> Result<Option<Statement>, ParseError> {
    let tokens = tokenize(line)?;
    if tokens.is_empty() {
        return Ok(None);
    }

    // NAME=value at statement head, provided nothing pipeline-shaped
    // follows: the whole statement becomes the assignment.
    if let Token::Word(first) = &tokens[0]
        && let Some((name, value_head)) = split_assignment(first)
        && tokens[1..].iter().all(|t| matches!(t, Token::Word(_)))
    {
        let mut value = vec![value_head];
        for token in &tokens[1..] {
            if let Token::Word(w) = token {
                value.push(w.clone());
            }
        }
        return Ok(Some(Statement::Assignment { name, value }));
    }

    let mut stages: Vec<SimpleCommand> = Vec::new();
    let mut stage = SimpleCommand::default();
    let mut stage_has_name = false;
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        match token {
            Token::Word(w) => {
                if stage_has_name {
                    stage.args.push(w);
                } else {
                    stage.name = w;
                    stage_has_name = true;
                }
            }
            Token::Redirect(op) => match iter.next() {
                Some(Token::Word(target)) => {
                    stage.redirections.push(Redirection { op, target });
                }
                _ => return Err(ParseError::MissingRedirectTarget(op)),
            },
            Token::Pipe => {
                if !stage_has_name {
                    return Err(ParseError::EmptyCommand);
                }
                stages.push(std::mem::take(&mut stage));
                stage_has_name = false;
            }
            Token::Semi => return Err(ParseError::EmptyCommand),
        }
    }

    if !stage_has_name {
        return Err(ParseError::EmptyCommand);
    }
    stages.push(stage);
    Ok(Some(Statement::Pipeline(stages)))
}

/// Try to read `NAME=value` off a word's leading unquoted segment.
///
/// `NAME` must be a letter or underscore followed by letters, digits, or
/// underscores, immediately followed by `=` with no whitespace (whitespace
/// would have split the word).
fn split_assignment(word: &Word) -> Option<(String, Word)> {
    let first = word.segments.first()?;
    if first.quote != Quote::None {
        return None;
    }
    let eq = first.text.find('=')?;
    let name = &first.text[..eq];
    if !is_valid_identifier(name) {
        return None;
    }

    let mut value_segments = Vec::new();
    let rest = &first.text[eq + 1..];
    if !rest.is_empty() {
        value_segments.push(Segment {
            text: rest.to_string(),
            quote: Quote::None,
        });
    }
    value_segments.extend(word.segments[1..].iter().cloned());
    Some((
        name.to_string(),
        Word {
            segments: value_segments,
        },
    ))
}

/// The effective head of a statement for keyword recognition: keywords
/// count at the start of a statement and directly after `do`, `then`, or
/// `else`, so those prefixes are stripped.
pub fn statement_head(line: &str) -> &str {
    let mut head = line.trim_start();
    loop {
        if let Some(rest) = head.strip_prefix("do ") {
            head = rest.trim_start();
        } else if let Some(rest) = head.strip_prefix("then ") {
            head = rest.trim_start();
        } else if let Some(rest) = head.strip_prefix("else ") {
            head = rest.trim_start();
        } else {
            return head;
        }
    }
}

/// Shell identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Statement splitting & continuation scanning
// ---------------------------------------------------------------------------

/// Split submitted text into statements on unquoted `;` and newlines,
/// respecting quotes, backticks, and `$(…)` nesting.
pub fn split_statements(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;
    let mut paren_depth = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if !in_single => {
                current.push(c);
                if i + 1 < chars.len() {
                    current.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
            }
            '\'' if !in_double && !in_backtick => in_single = !in_single,
            '"' if !in_single && !in_backtick => in_double = !in_double,
            '`' if !in_single => in_backtick = !in_backtick,
            '(' if !in_single && !in_double && !in_backtick => paren_depth += 1,
            ')' if !in_single && !in_double && !in_backtick => {
                paren_depth = paren_depth.saturating_sub(1)
            }
            ';' | '\n'
                if !in_single && !in_double && !in_backtick && paren_depth == 0 =>
            {
                let part = current.trim().to_string();
                if !part.is_empty() {
                    parts.push(part);
                }
                current.clear();
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(c);
        i += 1;
    }

    let part = current.trim().to_string();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

/// Continuation test for accumulated input: true when the text cannot be a
/// complete statement yet.
///
/// Holds when the last non-whitespace character is `\`, a single- or
/// double-quoted span is unclosed (backslash escapes honored outside single
/// quotes), or `(`/`{` are unbalanced.
pub fn needs_continuation(text: &str) -> bool {
    if text.trim_end().ends_with('\\') {
        return true;
    }

    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut paren = 0i32;
    let mut brace = 0i32;

    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '(' if !in_single && !in_double => paren += 1,
            ')' if !in_single && !in_double => paren -= 1,
            '{' if !in_single && !in_double => brace += 1,
            '}' if !in_single && !in_double => brace -= 1,
            _ => {}
        }
    }

    in_single || in_double || paren > 0 || brace > 0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        tokenize(line)
            .unwrap()
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w.literal()),
                _ => None,
            })
            .collect()
    }

    fn pipeline(line: &str) -> Vec<SimpleCommand> {
        match parse_statement(line).unwrap().unwrap() {
            Statement::Pipeline(stages) => stages,
            other => panic!("expected pipeline, got {other:?}"),
        }
    }

    // -- lexer --------------------------------------------------------------

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(words("cat a.txt  b.txt"), vec!["cat", "a.txt", "b.txt"]);
    }

    #[test]
    fn single_quotes_are_literal() {
        assert_eq!(words(r"echo 'a $X \n b'"), vec!["echo", r"a $X \n b"]);
    }

    #[test]
    fn double_quote_escapes() {
        let ws = words(r#"echo "a \" b \\ c""#);
        assert_eq!(ws, vec!["echo", r#"a " b \ c"#]);
    }

    #[test]
    fn double_quote_keeps_escaped_dollar_for_expander() {
        let tokens = tokenize(r#"echo "\$HOME""#).unwrap();
        let Token::Word(w) = &tokens[1] else {
            panic!()
        };
        assert_eq!(w.segments[0].text, r"\$HOME");
        assert_eq!(w.segments[0].quote, Quote::Double);
    }

    #[test]
    fn empty_quoted_word_survives() {
        assert_eq!(words(r#"echo "" x"#), vec!["echo", "", "x"]);
    }

    #[test]
    fn adjacent_segments_form_one_word() {
        let tokens = tokenize(r#"echo pre"mid"'post'"#).unwrap();
        assert_eq!(tokens.len(), 2);
        let Token::Word(w) = &tokens[1] else {
            panic!()
        };
        assert_eq!(w.segments.len(), 3);
        assert_eq!(w.literal(), "premidpost");
    }

    #[test]
    fn backslash_escapes_at_top_level() {
        assert_eq!(words(r"echo a\ b"), vec!["echo", "a b"]);
        assert_eq!(words(r"echo \|"), vec!["echo", "|"]);
    }

    #[test]
    fn pipe_separates_tokens() {
        let tokens = tokenize("a | b|c").unwrap();
        let pipes = tokens.iter().filter(|t| **t == Token::Pipe).count();
        assert_eq!(pipes, 2);
    }

    #[test]
    fn redirect_operators_distinct() {
        let ops: Vec<RedirOp> = tokenize("cmd < in > out >> app 2> err 2>> errapp")
            .unwrap()
            .into_iter()
            .filter_map(|t| match t {
                Token::Redirect(op) => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                RedirOp::In,
                RedirOp::Out,
                RedirOp::Append,
                RedirOp::ErrOut,
                RedirOp::ErrAppend
            ]
        );
    }

    #[test]
    fn heredoc_operator() {
        let tokens = tokenize("grep -i error <<EOF").unwrap();
        assert!(tokens.contains(&Token::Redirect(RedirOp::Heredoc)));
        assert_eq!(tokens.last(), Some(&Token::Word(Word::from_unquoted("EOF"))));
    }

    #[test]
    fn quoted_pipe_is_not_a_separator() {
        assert_eq!(words("echo 'a | b'"), vec!["echo", "a | b"]);
        assert!(
            !tokenize("echo 'a | b'")
                .unwrap()
                .contains(&Token::Pipe)
        );
    }

    #[test]
    fn substitution_keeps_inner_pipe() {
        assert_eq!(words("echo $(ls | wc -l)"), vec!["echo", "$(ls | wc -l)"]);
    }

    #[test]
    fn substitution_nesting() {
        assert_eq!(words("echo $(echo $(echo x))"), vec!["echo", "$(echo $(echo x))"]);
    }

    #[test]
    fn backtick_span_kept_verbatim() {
        assert_eq!(words("echo `ls /d`"), vec!["echo", "`ls /d`"]);
    }

    #[test]
    fn unclosed_quote_is_an_error() {
        assert_eq!(tokenize("echo 'abc"), Err(ParseError::UnclosedSingleQuote));
        assert_eq!(tokenize("echo \"abc"), Err(ParseError::UnclosedDoubleQuote));
    }

    // -- parser -------------------------------------------------------------

    #[test]
    fn simple_command() {
        let stages = pipeline("cat file.txt");
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name.literal(), "cat");
        assert_eq!(stages[0].args[0].literal(), "file.txt");
    }

    #[test]
    fn three_stage_pipeline() {
        let stages = pipeline("cat f | grep x | wc -l");
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[1].name.literal(), "grep");
        assert_eq!(stages[2].args[0].literal(), "-l");
    }

    #[test]
    fn redirections_peel_off_anywhere() {
        let stages = pipeline("> out cat < in file.txt");
        assert_eq!(stages[0].name.literal(), "cat");
        assert_eq!(stages[0].args.len(), 1);
        assert_eq!(stages[0].args[0].literal(), "file.txt");
        assert_eq!(stages[0].redirections.len(), 2);
        assert_eq!(stages[0].redirections[0].op, RedirOp::Out);
        assert_eq!(stages[0].redirections[1].op, RedirOp::In);
    }

    #[test]
    fn chained_output_redirections_preserve_order() {
        let stages = pipeline("echo hi > a > b >> c");
        let targets: Vec<String> = stages[0]
            .redirections
            .iter()
            .map(|r| r.target.literal())
            .collect();
        assert_eq!(targets, vec!["a", "b", "c"]);
        assert_eq!(stages[0].redirections[2].op, RedirOp::Append);
    }

    #[test]
    fn missing_redirect_target_is_an_error() {
        assert!(matches!(
            parse_statement("echo hi >"),
            Err(ParseError::MissingRedirectTarget(RedirOp::Out))
        ));
    }

    #[test]
    fn empty_pipeline_stage_is_an_error() {
        assert!(parse_statement("| cat").is_err());
        assert!(parse_statement("cat |").is_err());
    }

    #[test]
    fn assignment_at_statement_head() {
        match parse_statement("N=3").unwrap().unwrap() {
            Statement::Assignment { name, value } => {
                assert_eq!(name, "N");
                assert_eq!(value[0].literal(), "3");
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn assignment_with_substitution_value() {
        match parse_statement("N=$(echo 3)").unwrap().unwrap() {
            Statement::Assignment { name, value } => {
                assert_eq!(name, "N");
                assert_eq!(value[0].literal(), "$(echo 3)");
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn flag_with_equals_is_not_an_assignment() {
        // `--format=x` does not start with a valid identifier head.
        let stages = pipeline("ls --format=long");
        assert_eq!(stages[0].name.literal(), "ls");
    }

    #[test]
    fn equals_in_second_word_is_not_an_assignment() {
        let stages = pipeline("echo a=b");
        assert_eq!(stages[0].name.literal(), "echo");
        assert_eq!(stages[0].args[0].literal(), "a=b");
    }

    #[test]
    fn valid_identifiers() {
        assert!(is_valid_identifier("FOO"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier("1x"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("a-b"));
    }

    // -- statement splitting ------------------------------------------------

    #[test]
    fn splits_on_semicolons_and_newlines() {
        assert_eq!(
            split_statements("a; b\nc"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn does_not_split_inside_quotes_or_substitution() {
        assert_eq!(split_statements("echo 'a; b'"), vec!["echo 'a; b'"]);
        assert_eq!(
            split_statements("N=$(echo 3; echo 4)"),
            vec!["N=$(echo 3; echo 4)"]
        );
    }

    // -- continuation test --------------------------------------------------

    #[test]
    fn continuation_on_trailing_backslash() {
        assert!(needs_continuation("echo abc \\"));
        assert!(!needs_continuation("echo abc"));
    }

    #[test]
    fn continuation_on_unclosed_quotes() {
        assert!(needs_continuation("echo 'abc"));
        assert!(needs_continuation("echo \"abc"));
        assert!(!needs_continuation("echo 'abc'"));
    }

    #[test]
    fn continuation_on_unbalanced_brackets() {
        assert!(needs_continuation("echo $(ls"));
        assert!(needs_continuation("echo {"));
        assert!(!needs_continuation("echo $(ls)"));
    }

    #[test]
    fn escaped_quote_does_not_open_span() {
        assert!(!needs_continuation(r#"echo \""#));
    }
}
