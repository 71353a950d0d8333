//! `for`/`do`/`done` and `if`/`then`/`elif`/`else`/`fi` execution.
//!
//! Control flow is line-oriented: a construct arrives as a block of lines
//! (one statement per line after `;`-splitting), its header is parsed, and
//! body lines run back through the engine one at a time. Nested constructs
//! stay raw inside the body and are collected again, with depth tracking,
//! when their turn comes.

use crate::expand::{Expander, NoMatchPolicy};
use crate::parser::{self, Token};

use super::{ExecOutcome, Shell};

/// Parsed `for var in items...; do body; done`.
#[derive(Debug)]
struct ForBlock {
    var: String,
    /// Raw items text, expanded per iteration of the construct.
    items: String,
    body: Vec<String>,
}

/// Parsed `if cond; then body; [elif...]* [else...] fi`.
#[derive(Debug, Default)]
struct IfBlock {
    branches: Vec<(String, Vec<String>)>,
    else_body: Vec<String>,
}

/// Flatten raw construct lines into one statement per element.
fn normalize(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .flat_map(|line| parser::split_statements(line))
        .collect()
}

/// Track nesting: does this line open another construct? Fused forms
/// (`do for …`, `then if …`) count too.
fn opens_for(line: &str) -> bool {
    let head = parser::statement_head(line);
    head == "for" || head.starts_with("for ")
}

fn opens_if(line: &str) -> bool {
    parser::statement_head(line).starts_with("if ")
}

// ---------------------------------------------------------------------------
// for
// ---------------------------------------------------------------------------

/// Execute a complete `for` block. Returns the last body statement's exit
/// code (0 for an empty items list).
pub fn execute_for(shell: &mut Shell, lines: &[String]) -> i32 {
    let parts = normalize(lines);
    let Some(block) = parse_for(&parts) else {
        shell.print_error("syntax error in for loop");
        return 2;
    };

    // Items get the full treatment: substitution, variables, splitting,
    // globs. A pattern with no matches silently contributes nothing.
    let items = expand_items(shell, &block.items);

    let mut last = 0;
    for item in items {
        shell
            .env
            .borrow_mut()
            .insert(block.var.clone(), item);
        last = run_body(shell, &block.body);
    }
    last
}

fn parse_for(parts: &[String]) -> Option<ForBlock> {
    let header = parser::statement_head(parts.first()?);
    let rest = header.strip_prefix("for ")?.trim();

    // `for VAR in ITEMS...` — keep the items text raw for later expansion.
    // `for VAR in` with an empty list is legal and runs zero iterations.
    let (var, items) = if let Some((var, items)) = rest.split_once(" in ") {
        (var.trim().to_string(), items.trim().to_string())
    } else if let Some(var) = rest.strip_suffix(" in") {
        (var.trim().to_string(), String::new())
    } else {
        return None;
    };
    if var.is_empty() || var.contains(' ') {
        return None;
    }

    let mut body = Vec::new();
    let mut seen_do = false;
    let mut depth = 0usize;

    for part in &parts[1..] {
        let line = part.as_str();
        if !seen_do {
            if line == "do" {
                seen_do = true;
            } else if let Some(first_cmd) = line.strip_prefix("do ") {
                seen_do = true;
                push_body(&mut body, first_cmd, &mut depth);
            }
            continue;
        }
        if line == "done" {
            if depth == 0 {
                return Some(ForBlock { var, items, body });
            }
            depth -= 1;
            body.push(line.to_string());
            continue;
        }
        push_body(&mut body, line, &mut depth);
    }
    // Terminator never arrived (collection should have prevented this).
    Some(ForBlock { var, items, body })
}

fn push_body(body: &mut Vec<String>, line: &str, depth: &mut usize) {
    if opens_for(line) {
        *depth += 1;
    }
    body.push(line.to_string());
}

fn expand_items(shell: &mut Shell, items: &str) -> Vec<String> {
    let words: Vec<parser::Word> = match parser::tokenize(items) {
        Ok(tokens) => tokens
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w),
                _ => None,
            })
            .collect(),
        Err(_) => return Vec::new(),
    };

    let cwd = shell.cwd.clone();
    let mut expander = Expander::new(shell, &cwd);
    let mut out = Vec::new();
    for word in &words {
        let fields = expander.expand_fields(word);
        for field in fields {
            if let Ok(matches) = expander.expand_glob(&field, NoMatchPolicy::Skip) {
                out.extend(matches);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// if
// ---------------------------------------------------------------------------

/// Execute a complete `if` block: the first condition exiting 0 selects
/// its body; otherwise the `else` body runs if present. Exit code is the
/// chosen body's last statement (0 when nothing ran).
pub fn execute_if(shell: &mut Shell, lines: &[String]) -> i32 {
    let parts = normalize(lines);
    let Some(block) = parse_if(&parts) else {
        shell.print_error("syntax error in if statement");
        return 2;
    };

    for (condition, body) in &block.branches {
        let code = match shell.execute_statement_text(condition) {
            ExecOutcome::Completed(code) => code,
            _ => 2,
        };
        if code == 0 {
            return run_body(shell, body);
        }
    }
    if !block.else_body.is_empty() {
        return run_body(shell, &block.else_body);
    }
    0
}

fn parse_if(parts: &[String]) -> Option<IfBlock> {
    let header = parser::statement_head(parts.first()?);
    let first_cond = header.strip_prefix("if ")?.trim().to_string();
    if first_cond.is_empty() {
        return None;
    }

    let mut block = IfBlock::default();
    let mut condition = Some(first_cond);
    let mut body: Vec<String> = Vec::new();
    let mut in_else = false;
    let mut depth = 0usize;

    for part in &parts[1..] {
        let line = part.as_str();

        if depth > 0 {
            // Inside a nested if: everything is body text until its fi.
            if opens_if(line) {
                depth += 1;
            } else if line == "fi" {
                depth -= 1;
            }
            body.push(line.to_string());
            continue;
        }

        match line {
            "then" => {}
            "fi" => {
                close_branch(&mut block, &mut condition, &mut body, in_else);
                return Some(block);
            }
            "else" => {
                close_branch(&mut block, &mut condition, &mut body, in_else);
                in_else = true;
            }
            _ => {
                if let Some(cmd) = line.strip_prefix("then ") {
                    if opens_if(cmd) {
                        depth += 1;
                    }
                    body.push(cmd.to_string());
                } else if let Some(cond) = line.strip_prefix("elif ") {
                    close_branch(&mut block, &mut condition, &mut body, in_else);
                    condition = Some(cond.trim().to_string());
                } else if let Some(cmd) = line.strip_prefix("else ") {
                    close_branch(&mut block, &mut condition, &mut body, in_else);
                    in_else = true;
                    if opens_if(cmd) {
                        depth += 1;
                    }
                    body.push(cmd.to_string());
                } else {
                    if opens_if(line) {
                        depth += 1;
                    }
                    body.push(line.to_string());
                }
            }
        }
    }
    // fi never arrived; treat what we have as complete.
    close_branch(&mut block, &mut condition, &mut body, in_else);
    Some(block)
}

fn close_branch(
    block: &mut IfBlock,
    condition: &mut Option<String>,
    body: &mut Vec<String>,
    in_else: bool,
) {
    if in_else {
        block.else_body = std::mem::take(body);
    } else if let Some(cond) = condition.take() {
        block.branches.push((cond, std::mem::take(body)));
    } else {
        body.clear();
    }
}

// ---------------------------------------------------------------------------
// Body execution
// ---------------------------------------------------------------------------

/// Run a body's statements in order, re-entering nested constructs.
pub fn run_body(shell: &mut Shell, lines: &[String]) -> i32 {
    let mut last = 0;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim().to_string();
        if line.is_empty() || line.starts_with('#') {
            i += 1;
            continue;
        }

        if opens_for(&line) {
            let (block, next) = collect_nested(lines, i, opens_for, "done");
            last = execute_for(shell, &block);
            shell.set_status(last);
            i = next;
            continue;
        }
        if opens_if(&line) {
            let (block, next) = collect_nested(lines, i, opens_if, "fi");
            last = execute_if(shell, &block);
            shell.set_status(last);
            i = next;
            continue;
        }

        last = match shell.execute_statement_text(&line) {
            ExecOutcome::Completed(code) => code,
            // Here-doc bodies cannot start mid-block.
            _ => {
                shell.print_error(&format!("incomplete construct in block: {line}"));
                2
            }
        };
        shell.set_status(last);
        i += 1;
    }
    last
}

/// Gather a nested construct's lines starting at `start`, balancing
/// openers against `terminator`. Returns the block and the index after it.
fn collect_nested(
    lines: &[String],
    start: usize,
    opens: fn(&str) -> bool,
    terminator: &str,
) -> (Vec<String>, usize) {
    let mut block = vec![lines[start].clone()];
    let mut depth = 1usize;
    let mut i = start + 1;

    while i < lines.len() {
        let line = lines[i].trim();
        block.push(lines[i].clone());
        if opens(line) {
            depth += 1;
        } else if parser::statement_head(line) == terminator {
            depth -= 1;
            if depth == 0 {
                return (block, i + 1);
            }
        }
        i += 1;
    }
    (block, i)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_for_single_line_form() {
        let parts = strs(&["for f in a b c", "do echo $f", "done"]);
        let block = parse_for(&parts).unwrap();
        assert_eq!(block.var, "f");
        assert_eq!(block.items, "a b c");
        assert_eq!(block.body, vec!["echo $f"]);
    }

    #[test]
    fn parse_for_multi_line_form() {
        let parts = strs(&["for x in 1 2", "do", "echo $x", "echo again", "done"]);
        let block = parse_for(&parts).unwrap();
        assert_eq!(block.body, vec!["echo $x", "echo again"]);
    }

    #[test]
    fn parse_for_nested_keeps_inner_raw() {
        let parts = strs(&[
            "for a in 1",
            "do",
            "for b in 2",
            "do",
            "echo $a$b",
            "done",
            "done",
        ]);
        let block = parse_for(&parts).unwrap();
        assert_eq!(
            block.body,
            vec!["for b in 2", "do", "echo $a$b", "done"]
        );
    }

    #[test]
    fn parse_for_without_in_is_malformed() {
        assert!(parse_for(&strs(&["for f a b", "do", "done"])).is_none());
    }

    #[test]
    fn parse_if_with_else() {
        let parts = strs(&["if test -f /x", "then echo yes", "else echo no", "fi"]);
        let block = parse_if(&parts).unwrap();
        assert_eq!(block.branches.len(), 1);
        assert_eq!(block.branches[0].0, "test -f /x");
        assert_eq!(block.branches[0].1, vec!["echo yes"]);
        assert_eq!(block.else_body, vec!["echo no"]);
    }

    #[test]
    fn parse_if_with_elif_chain() {
        let parts = strs(&[
            "if test -f /a",
            "then echo a",
            "elif test -f /b",
            "then echo b",
            "elif test -f /c",
            "then echo c",
            "fi",
        ]);
        let block = parse_if(&parts).unwrap();
        assert_eq!(block.branches.len(), 3);
        assert_eq!(block.branches[2].0, "test -f /c");
        assert!(block.else_body.is_empty());
    }

    #[test]
    fn parse_if_nested_stays_in_body() {
        let parts = strs(&[
            "if test -d /x",
            "then",
            "if test -f /y",
            "then echo inner",
            "fi",
            "fi",
        ]);
        let block = parse_if(&parts).unwrap();
        assert_eq!(block.branches.len(), 1);
        assert_eq!(
            block.branches[0].1,
            vec!["if test -f /y", "then echo inner", "fi"]
        );
    }

    #[test]
    fn collect_nested_balances_depth() {
        let lines = strs(&["for a in 1", "do", "for b in 2", "do", "done", "done", "echo after"]);
        let (block, next) = collect_nested(&lines, 0, opens_for, "done");
        assert_eq!(block.len(), 6);
        assert_eq!(next, 6);
    }
}
