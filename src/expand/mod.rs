//! Word expansion: command substitution, variables, field splitting, globs.
//!
//! Applied to parsed words in this order:
//!
//! 1. **Command substitution** — `$(…)` (nesting allowed) and backticks.
//!    The inner command runs through the engine with stdout captured; a
//!    single trailing newline is trimmed, not all whitespace.
//! 2. **Variable expansion** — `$?`, `${NAME}`, `$NAME` from the session
//!    environment, empty when unset. No expansion inside single quotes;
//!    inside double quotes expansion happens but the result is not split.
//! 3. **Field splitting** — results of 1–2 in unquoted segments split on
//!    whitespace into separate fields.
//! 4. **Glob expansion** — unquoted fields containing `*`, `?` or `[` are
//!    matched against the remote listing of their directory portion.
//!    Wildcards in the directory portion are unsupported: the pattern is
//!    left as-is with a warning. Matches splice in sorted order; a
//!    matchless pattern follows the calling command's no-match policy.
//!
//! The expander reaches the engine (for substitution output) and the
//! server (for listings) through [`ExpansionHost`], so this module stays
//! free of any HTTP or pipeline machinery.

use crate::parser::{Quote, Word};
use crate::path;

/// What to do when a glob pattern matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatchPolicy {
    /// Abort the command with `<cmd>: no match: <pattern>`.
    Error,
    /// Warn and drop the pattern.
    Warn,
    /// Silently drop the pattern.
    Skip,
}

/// Engine-side services the expander needs.
pub trait ExpansionHost {
    /// Run a command line and return its captured stdout.
    fn command_output(&mut self, command: &str) -> Vec<u8>;

    /// Look up an environment variable.
    fn var(&self, name: &str) -> Option<String>;

    /// Entry names of a remote directory, or `None` when it cannot be
    /// listed.
    fn list_dir(&mut self, dir: &str) -> Option<Vec<String>>;

    /// Surface a non-fatal warning to the user.
    fn warn(&mut self, message: &str);
}

/// A post-split field, remembering whether any part of it came from
/// unquoted text (only those participate in glob expansion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub text: String,
    pub globbable: bool,
}

/// Expansion failure that aborts the whole command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoMatchError {
    pub pattern: String,
}

pub struct Expander<'a> {
    host: &'a mut dyn ExpansionHost,
    cwd: String,
}

impl<'a> Expander<'a> {
    pub fn new(host: &'a mut dyn ExpansionHost, cwd: &str) -> Self {
        Self {
            host,
            cwd: cwd.to_string(),
        }
    }

    /// Expand a word into zero or more fields (steps 1–3).
    ///
    /// A word that is entirely an unquoted variable expanding to nothing
    /// yields zero fields; an empty quoted word yields one empty field.
    pub fn expand_fields(&mut self, word: &Word) -> Vec<Field> {
        let mut fields: Vec<Field> = Vec::new();
        let mut pending: Option<Field> = None;

        for segment in &word.segments {
            match segment.quote {
                Quote::Single => {
                    append_to(&mut pending, &segment.text, false);
                }
                Quote::Double => {
                    let expanded = self.expand_text(&segment.text);
                    append_to(&mut pending, &expanded, false);
                }
                Quote::None => {
                    let expanded = self.expand_text(&segment.text);
                    self.split_into(&mut fields, &mut pending, &expanded);
                }
            }
        }

        if let Some(field) = pending {
            fields.push(field);
        }
        fields
    }

    /// Expand a word to a single string: substitutions and variables only,
    /// never split, never globbed. Used for redirection targets and
    /// assignment values.
    pub fn expand_single(&mut self, word: &Word) -> String {
        let mut out = String::new();
        for segment in &word.segments {
            match segment.quote {
                Quote::Single => out.push_str(&segment.text),
                Quote::Double => out.push_str(&self.expand_text(&segment.text)),
                Quote::None => out.push_str(&self.expand_text(&segment.text)),
            }
        }
        out
    }

    /// Step 4 for one field: splice glob matches, or apply the no-match
    /// policy. Fields without wildcards (or fully quoted) pass through.
    pub fn expand_glob(
        &mut self,
        field: &Field,
        policy: NoMatchPolicy,
    ) -> Result<Vec<String>, NoMatchError> {
        if !field.globbable || !path::has_wildcards(&field.text) {
            return Ok(vec![field.text.clone()]);
        }

        let resolved = path::resolve(&field.text, &self.cwd);
        let dir = path::dirname(&resolved).to_string();
        let pattern = path::basename(&resolved).to_string();

        if path::has_wildcards(&dir) {
            self.host
                .warn(&format!("wildcards in directory path not supported: {dir}"));
            return Ok(vec![field.text.clone()]);
        }

        let mut matches: Vec<String> = match self.host.list_dir(&dir) {
            Some(names) => names
                .into_iter()
                .filter(|name| path::wildcard_match(&pattern, name))
                .map(|name| path::join(&dir, &name))
                .collect(),
            None => Vec::new(),
        };
        matches.sort();

        if matches.is_empty() {
            return match policy {
                NoMatchPolicy::Error => Err(NoMatchError {
                    pattern: field.text.clone(),
                }),
                NoMatchPolicy::Warn => {
                    self.host.warn(&format!("no match: {}", field.text));
                    Ok(Vec::new())
                }
                NoMatchPolicy::Skip => Ok(Vec::new()),
            };
        }
        Ok(matches)
    }

    /// Merge an unquoted expansion into the field stream, splitting on
    /// whitespace. Leading whitespace closes the pending field; a
    /// non-whitespace tail leaves the last piece pending for the next
    /// segment.
    fn split_into(&mut self, fields: &mut Vec<Field>, pending: &mut Option<Field>, text: &str) {
        if text.is_empty() {
            return;
        }
        let starts_ws = text.starts_with(char::is_whitespace);
        let ends_ws = text.ends_with(char::is_whitespace);
        let pieces: Vec<&str> = text.split_whitespace().collect();

        if starts_ws
            && let Some(field) = pending.take()
        {
            fields.push(field);
        }

        for (i, piece) in pieces.iter().enumerate() {
            let last = i + 1 == pieces.len();
            append_to(pending, piece, true);
            if !last || ends_ws {
                if let Some(field) = pending.take() {
                    fields.push(field);
                }
            }
        }
    }

    // -- text-level expansion (steps 1 and 2) -------------------------------

    /// Expand substitutions and variables in one segment's text. The lexer
    /// leaves `\$` and `` \` `` escape pairs in place; here they collapse
    /// to literal characters instead of expanding.
    fn expand_text(&mut self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '\\' if matches!(chars.get(i + 1), Some(&'$') | Some(&'`')) => {
                    out.push(chars[i + 1]);
                    i += 2;
                }
                '$' => {
                    let (expanded, consumed) = self.expand_dollar(&chars[i..]);
                    out.push_str(&expanded);
                    i += consumed;
                }
                '`' => match chars[i + 1..].iter().position(|&c| c == '`') {
                    Some(rel) => {
                        let inner: String = chars[i + 1..i + 1 + rel].iter().collect();
                        out.push_str(&self.substitute(&inner));
                        i += rel + 2;
                    }
                    None => {
                        out.push('`');
                        i += 1;
                    }
                },
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        out
    }

    /// Expand one `$…` form starting at `chars[0] == '$'`. Returns the
    /// replacement and how many characters were consumed.
    fn expand_dollar(&mut self, chars: &[char]) -> (String, usize) {
        match chars.get(1).copied() {
            Some('?') => (self.host.var("?").unwrap_or_else(|| "0".into()), 2),
            Some('(') => {
                let mut depth = 1usize;
                let mut j = 2;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth > 0 {
                    // Unterminated; keep literal.
                    return ("$".to_string(), 1);
                }
                let inner: String = chars[2..j - 1].iter().collect();
                (self.substitute(&inner), j)
            }
            Some('{') => match chars.iter().position(|&c| c == '}') {
                Some(end) => {
                    let name: String = chars[2..end].iter().collect();
                    let value = if crate::parser::is_valid_identifier(&name) {
                        self.host.var(&name).unwrap_or_default()
                    } else {
                        String::new()
                    };
                    (value, end + 1)
                }
                None => ("$".to_string(), 1),
            },
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = 2;
                while j < chars.len()
                    && (chars[j].is_ascii_alphanumeric() || chars[j] == '_')
                {
                    j += 1;
                }
                let name: String = chars[1..j].iter().collect();
                (self.host.var(&name).unwrap_or_default(), j)
            }
            _ => ("$".to_string(), 1),
        }
    }

    /// Run a substitution body and trim a single trailing newline.
    fn substitute(&mut self, command: &str) -> String {
        let output = self.host.command_output(command);
        let mut text = String::from_utf8_lossy(&output).into_owned();
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        text
    }
}

fn append_to(pending: &mut Option<Field>, text: &str, globbable: bool) {
    match pending {
        Some(field) => {
            field.text.push_str(text);
            field.globbable |= globbable;
        }
        None => {
            *pending = Some(Field {
                text: text.to_string(),
                globbable,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Statement, parse_statement};
    use std::collections::HashMap;

    struct MockHost {
        env: HashMap<String, String>,
        dirs: HashMap<String, Vec<String>>,
        outputs: HashMap<String, Vec<u8>>,
        warnings: Vec<String>,
    }

    impl MockHost {
        fn new() -> Self {
            Self {
                env: HashMap::new(),
                dirs: HashMap::new(),
                outputs: HashMap::new(),
                warnings: Vec::new(),
            }
        }
    }

    impl ExpansionHost for MockHost {
        fn command_output(&mut self, command: &str) -> Vec<u8> {
            self.outputs.get(command).cloned().unwrap_or_default()
        }

        fn var(&self, name: &str) -> Option<String> {
            self.env.get(name).cloned()
        }

        fn list_dir(&mut self, dir: &str) -> Option<Vec<String>> {
            self.dirs.get(dir).cloned()
        }

        fn warn(&mut self, message: &str) {
            self.warnings.push(message.to_string());
        }
    }

    fn first_arg_word(line: &str) -> Word {
        match parse_statement(line).unwrap().unwrap() {
            Statement::Pipeline(stages) => stages[0].args[0].clone(),
            other => panic!("expected pipeline, got {other:?}"),
        }
    }

    fn texts(fields: &[Field]) -> Vec<&str> {
        fields.iter().map(|f| f.text.as_str()).collect()
    }

    #[test]
    fn plain_word_is_one_field() {
        let mut host = MockHost::new();
        let mut exp = Expander::new(&mut host, "/");
        let fields = exp.expand_fields(&Word::from_unquoted("hello"));
        assert_eq!(texts(&fields), vec!["hello"]);
        assert!(fields[0].globbable);
    }

    #[test]
    fn variable_expansion_unquoted() {
        let mut host = MockHost::new();
        host.env.insert("NAME".into(), "world".into());
        let mut exp = Expander::new(&mut host, "/");
        let fields = exp.expand_fields(&Word::from_unquoted("$NAME"));
        assert_eq!(texts(&fields), vec!["world"]);
    }

    #[test]
    fn braced_and_simple_forms() {
        let mut host = MockHost::new();
        host.env.insert("A".into(), "x".into());
        let mut exp = Expander::new(&mut host, "/");
        assert_eq!(
            texts(&exp.expand_fields(&Word::from_unquoted("${A}y"))),
            vec!["xy"]
        );
        assert_eq!(
            texts(&exp.expand_fields(&Word::from_unquoted("$Ay"))),
            Vec::<&str>::new(),
            "$Ay reads the whole identifier Ay, which is unset"
        );
    }

    #[test]
    fn unset_variable_is_empty() {
        let mut host = MockHost::new();
        let mut exp = Expander::new(&mut host, "/");
        assert!(exp.expand_fields(&Word::from_unquoted("$MISSING")).is_empty());
    }

    #[test]
    fn exit_code_variable() {
        let mut host = MockHost::new();
        host.env.insert("?".into(), "2".into());
        let mut exp = Expander::new(&mut host, "/");
        assert_eq!(
            texts(&exp.expand_fields(&Word::from_unquoted("$?"))),
            vec!["2"]
        );
    }

    #[test]
    fn single_quotes_suppress_expansion() {
        let mut host = MockHost::new();
        host.env.insert("X".into(), "v".into());
        let word = first_arg_word("echo '$X'");
        let mut exp = Expander::new(&mut host, "/");
        assert_eq!(texts(&exp.expand_fields(&word)), vec!["$X"]);
    }

    #[test]
    fn double_quotes_expand_without_splitting() {
        let mut host = MockHost::new();
        host.env.insert("LIST".into(), "a b c".into());
        let word = first_arg_word(r#"echo "$LIST""#);
        let mut exp = Expander::new(&mut host, "/");
        let fields = exp.expand_fields(&word);
        assert_eq!(texts(&fields), vec!["a b c"]);
        assert!(!fields[0].globbable);
    }

    #[test]
    fn unquoted_expansion_field_splits() {
        let mut host = MockHost::new();
        host.env.insert("LIST".into(), "a b c".into());
        let mut exp = Expander::new(&mut host, "/");
        let fields = exp.expand_fields(&Word::from_unquoted("$LIST"));
        assert_eq!(texts(&fields), vec!["a", "b", "c"]);
    }

    #[test]
    fn split_joins_adjacent_text() {
        let mut host = MockHost::new();
        host.env.insert("X".into(), "1 2".into());
        let mut exp = Expander::new(&mut host, "/");
        let fields = exp.expand_fields(&Word::from_unquoted("a$X-b"));
        assert_eq!(texts(&fields), vec!["a1", "2-b"]);
    }

    #[test]
    fn command_substitution_trims_one_newline() {
        let mut host = MockHost::new();
        host.outputs.insert("echo 3".into(), b"3\n".to_vec());
        let word = first_arg_word("x $(echo 3)");
        let mut exp = Expander::new(&mut host, "/");
        assert_eq!(texts(&exp.expand_fields(&word)), vec!["3"]);
    }

    #[test]
    fn command_substitution_keeps_inner_newlines() {
        let mut host = MockHost::new();
        host.outputs.insert("ls".into(), b"a\nb\n".to_vec());
        let mut exp = Expander::new(&mut host, "/");
        // Unquoted: splits on the surviving newline.
        let fields = exp.expand_fields(&Word::from_unquoted("$(ls)"));
        assert_eq!(texts(&fields), vec!["a", "b"]);
    }

    #[test]
    fn backtick_substitution() {
        let mut host = MockHost::new();
        host.outputs.insert("pwd".into(), b"/work\n".to_vec());
        let mut exp = Expander::new(&mut host, "/");
        let fields = exp.expand_fields(&Word::from_unquoted("`pwd`"));
        assert_eq!(texts(&fields), vec!["/work"]);
    }

    #[test]
    fn escaped_dollar_in_double_quotes_is_literal() {
        let mut host = MockHost::new();
        host.env.insert("HOME".into(), "/h".into());
        let word = first_arg_word(r#"echo "\$HOME""#);
        let mut exp = Expander::new(&mut host, "/");
        assert_eq!(texts(&exp.expand_fields(&word)), vec!["$HOME"]);
    }

    #[test]
    fn glob_matches_sorted_full_paths() {
        let mut host = MockHost::new();
        host.dirs.insert(
            "/d".into(),
            vec!["x2.log".into(), "x1.log".into(), "notes.txt".into()],
        );
        let mut exp = Expander::new(&mut host, "/");
        let field = Field {
            text: "/d/*.log".into(),
            globbable: true,
        };
        let matches = exp.expand_glob(&field, NoMatchPolicy::Error).unwrap();
        assert_eq!(matches, vec!["/d/x1.log", "/d/x2.log"]);
    }

    #[test]
    fn glob_relative_pattern_uses_cwd() {
        let mut host = MockHost::new();
        host.dirs.insert("/work".into(), vec!["a.txt".into()]);
        let mut exp = Expander::new(&mut host, "/work");
        let field = Field {
            text: "*.txt".into(),
            globbable: true,
        };
        assert_eq!(
            exp.expand_glob(&field, NoMatchPolicy::Error).unwrap(),
            vec!["/work/a.txt"]
        );
    }

    #[test]
    fn glob_no_match_policies() {
        let mut host = MockHost::new();
        host.dirs.insert("/d".into(), vec!["a.txt".into()]);
        let field = Field {
            text: "/d/*.log".into(),
            globbable: true,
        };

        let mut exp = Expander::new(&mut host, "/");
        assert!(exp.expand_glob(&field, NoMatchPolicy::Error).is_err());
        assert_eq!(exp.expand_glob(&field, NoMatchPolicy::Skip).unwrap(), Vec::<String>::new());
        assert_eq!(exp.expand_glob(&field, NoMatchPolicy::Warn).unwrap(), Vec::<String>::new());
        assert_eq!(host.warnings.len(), 1);
    }

    #[test]
    fn glob_wildcard_in_directory_warns_and_keeps_pattern() {
        let mut host = MockHost::new();
        let field = Field {
            text: "/*/x.log".into(),
            globbable: true,
        };
        let mut exp = Expander::new(&mut host, "/");
        let result = exp.expand_glob(&field, NoMatchPolicy::Error).unwrap();
        assert_eq!(result, vec!["/*/x.log"]);
        assert_eq!(host.warnings.len(), 1);
    }

    #[test]
    fn quoted_field_never_globs() {
        let mut host = MockHost::new();
        host.dirs.insert("/d".into(), vec!["a.log".into()]);
        let field = Field {
            text: "/d/*.log".into(),
            globbable: false,
        };
        let mut exp = Expander::new(&mut host, "/");
        assert_eq!(
            exp.expand_glob(&field, NoMatchPolicy::Error).unwrap(),
            vec!["/d/*.log"]
        );
    }

    #[test]
    fn expand_single_never_splits() {
        let mut host = MockHost::new();
        host.outputs.insert("echo 3".into(), b"3\n".to_vec());
        host.env.insert("D".into(), "sub dir".into());
        let mut exp = Expander::new(&mut host, "/");
        assert_eq!(exp.expand_single(&Word::from_unquoted("$D/$(echo 3)")), "sub dir/3");
    }
}
