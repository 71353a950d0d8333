//! The command execution engine.
//!
//! [`Shell`] owns the session state (cwd, environment, shared AGFS client)
//! and turns text lines into executed statements: splitting on `;`,
//! handling assignments, expanding words, planning redirections, running
//! pipelines, and driving `for`/`if` blocks.
//!
//! Multi-line constructs surface as [`ExecOutcome`] values instead of
//! executing: the REPL driver (or the script runner) sees `NeedsHeredoc` /
//! `NeedsFor` / `NeedsIf`, collects the remaining lines, and re-enters.

pub mod control;
mod pipeline;
mod redirect;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use colored::Colorize;

use crate::client::AgfsClient;
use crate::commands;
use crate::expand::{Expander, ExpansionHost, NoMatchPolicy};
use crate::interrupt;
use crate::parser::{self, RedirOp, SimpleCommand, Statement};
use crate::path;

use pipeline::PreparedStage;
use redirect::Planned;

/// Default history file name under the user's home directory.
const HISTORY_FILE: &str = ".agfs_shell_history";

/// Result of handing a line to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Completed(i32),
    /// A here-doc needs its body; the payload is the delimiter.
    NeedsHeredoc(String),
    /// A `for` without its `done` yet.
    NeedsFor,
    /// An `if` without its `fi` yet.
    NeedsIf,
}

/// Process-wide shell session.
pub struct Shell {
    pub fs: Rc<AgfsClient>,
    pub env: Rc<RefCell<HashMap<String, String>>>,
    /// Absolute, normalized current working directory.
    pub cwd: String,
    pub interactive: bool,
    /// When true, pass-through output is collected into `captured`
    /// instead of reaching the terminal.
    capturing: bool,
    captured: Vec<u8>,
}

impl Shell {
    pub fn new(client: AgfsClient) -> Self {
        let mut env = HashMap::new();
        env.insert("?".to_string(), "0".to_string());
        if let Some(home) = dirs::home_dir() {
            env.insert(
                "HISTFILE".to_string(),
                home.join(HISTORY_FILE).to_string_lossy().into_owned(),
            );
        }

        Self {
            fs: Rc::new(client),
            env: Rc::new(RefCell::new(env)),
            cwd: "/".to_string(),
            interactive: false,
            capturing: false,
            captured: Vec::new(),
        }
    }

    /// Current `HISTFILE` value with a leading `~` expanded.
    pub fn history_file(&self) -> Option<PathBuf> {
        let raw = self.env.borrow().get("HISTFILE").cloned()?;
        if let Some(rest) = raw.strip_prefix("~/") {
            return dirs::home_dir().map(|home| home.join(rest));
        }
        Some(PathBuf::from(raw))
    }

    pub fn set_status(&mut self, code: i32) {
        self.env
            .borrow_mut()
            .insert("?".to_string(), code.to_string());
    }

    pub fn status(&self) -> i32 {
        self.env
            .borrow()
            .get("?")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn print_error(&self, message: &str) {
        if !self.capturing {
            eprintln!("{}", message.red());
        }
    }

    pub fn print_warning(&self, message: &str) {
        if !self.capturing {
            eprintln!("{}", message.yellow());
        }
    }

    // -----------------------------------------------------------------------
    // Line-level execution
    // -----------------------------------------------------------------------

    /// Execute one logical line (which may hold several `;`-separated
    /// statements, or open a multi-line construct).
    pub fn execute_line(&mut self, line: &str) -> ExecOutcome {
        let statements = parser::split_statements(line);
        if statements.is_empty() {
            return ExecOutcome::Completed(self.status());
        }

        // An opener without its terminator means the caller must collect
        // more lines before anything runs.
        if let Some(outcome) = unbalanced_construct(&statements) {
            return outcome;
        }

        // A here-doc likewise defers execution until its body arrives --
        // checked up front so no earlier statement runs twice on re-entry.
        for statement in &statements {
            if let Some(delimiter) = heredoc_delimiter(statement) {
                return ExecOutcome::NeedsHeredoc(delimiter);
            }
        }

        let code = control::run_body(self, &statements);
        ExecOutcome::Completed(code)
    }

    /// Re-run a line whose here-doc body has now been collected.
    pub fn execute_line_with_heredoc(&mut self, line: &str, body: Vec<u8>) -> i32 {
        let statements = parser::split_statements(line);
        let mut last = 0;
        let mut body = Some(body);

        for statement in &statements {
            let heredoc = if heredoc_delimiter(statement).is_some() {
                body.take()
            } else {
                None
            };
            match self.execute_statement(statement, heredoc) {
                ExecOutcome::Completed(code) => {
                    last = code;
                    self.set_status(code);
                }
                _ => {
                    last = 2;
                    break;
                }
            }
        }
        last
    }

    /// Execute a single statement: an assignment or one pipeline. No `;`
    /// splitting, no control flow.
    pub fn execute_statement_text(&mut self, text: &str) -> ExecOutcome {
        self.execute_statement(text, None)
    }

    /// Run text with pass-through output captured instead of printed.
    /// Returns the exit code and everything the last stages wrote.
    pub fn run_captured(&mut self, text: &str) -> (i32, Vec<u8>) {
        let previous_flag = self.capturing;
        let previous_buffer = std::mem::take(&mut self.captured);
        self.capturing = true;

        let code = self.run_source(text, false);

        self.capturing = previous_flag;
        let output = std::mem::replace(&mut self.captured, previous_buffer);
        (code, output)
    }

    // -----------------------------------------------------------------------
    // Source execution (scripts, -c strings)
    // -----------------------------------------------------------------------

    /// Execute multi-line source: one statement per line, `#` comments,
    /// with here-doc bodies and `for`/`if` blocks consumed from the
    /// following lines. With `stop_on_error`, the first non-zero exit
    /// aborts and propagates.
    pub fn run_source(&mut self, source: &str, stop_on_error: bool) -> i32 {
        let lines: Vec<&str> = source.lines().collect();
        let mut last = 0;
        let mut i = 0;

        while i < lines.len() {
            let trimmed = lines[i].trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                i += 1;
                continue;
            }

            // Line continuations: trailing backslash splices, unclosed
            // quotes keep their newline.
            let mut buffer = lines[i].to_string();
            while parser::needs_continuation(&buffer) && i + 1 < lines.len() {
                i += 1;
                buffer = join_continuation(&buffer, lines[i]);
            }

            if !self.capturing {
                interrupt::reset();
            }

            let code = match self.execute_line(&buffer) {
                ExecOutcome::Completed(code) => code,
                ExecOutcome::NeedsHeredoc(delimiter) => {
                    let mut body_lines: Vec<&str> = Vec::new();
                    let mut found = false;
                    while i + 1 < lines.len() {
                        i += 1;
                        if lines[i].trim() == delimiter {
                            found = true;
                            break;
                        }
                        body_lines.push(lines[i]);
                    }
                    if !found {
                        self.print_warning(&format!(
                            "warning: here-document delimited by end-of-file (wanted `{delimiter}`)"
                        ));
                    }
                    let mut body = body_lines.join("\n");
                    if !body_lines.is_empty() {
                        body.push('\n');
                    }
                    self.execute_line_with_heredoc(&buffer, body.into_bytes())
                }
                ExecOutcome::NeedsFor => {
                    let block = collect_block(&lines, &mut i, buffer.clone(), "for", "done");
                    let code = control::execute_for(self, &block);
                    self.set_status(code);
                    code
                }
                ExecOutcome::NeedsIf => {
                    let block = collect_block(&lines, &mut i, buffer.clone(), "if", "fi");
                    let code = control::execute_if(self, &block);
                    self.set_status(code);
                    code
                }
            };

            last = code;
            if stop_on_error && code != 0 {
                return code;
            }
            i += 1;
        }
        last
    }

    // -----------------------------------------------------------------------
    // Statement execution
    // -----------------------------------------------------------------------

    fn execute_statement(&mut self, text: &str, heredoc: Option<Vec<u8>>) -> ExecOutcome {
        let parsed = match parser::parse_statement(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.print_error(&format!("agfs: {e}"));
                return ExecOutcome::Completed(2);
            }
        };

        match parsed {
            None => ExecOutcome::Completed(0),
            Some(Statement::Assignment { name, value }) => {
                let cwd = self.cwd.clone();
                let parts: Vec<String> = {
                    let mut expander = Expander::new(self, &cwd);
                    value.iter().map(|w| expander.expand_single(w)).collect()
                };
                self.env.borrow_mut().insert(name, parts.join(" "));
                ExecOutcome::Completed(0)
            }
            Some(Statement::Pipeline(stages)) => {
                if heredoc.is_none()
                    && let Some(delim) = stages.iter().find_map(|s| s.heredoc_delimiter())
                {
                    return ExecOutcome::NeedsHeredoc(delim);
                }
                self.run_pipeline(&stages, heredoc)
            }
        }
    }

    fn run_pipeline(&mut self, stages: &[SimpleCommand], stdin_data: Option<Vec<u8>>) -> ExecOutcome {
        let prepared = match self.prepare_stages(stages) {
            Ok(prepared) => prepared,
            Err(code) => return ExecOutcome::Completed(code),
        };

        // A no-pipeline command parses anywhere but runs only solo.
        if prepared.len() > 1
            && let Some(stage) = prepared
                .iter()
                .find(|s| s.spec.map(|spec| spec.no_pipeline).unwrap_or(false))
        {
            self.print_error(&format!("{}: not allowed in a pipeline", stage.name));
            return ExecOutcome::Completed(1);
        }

        let may_change_cwd = prepared.len() == 1
            && prepared[0]
                .spec
                .map(|spec| spec.changes_cwd)
                .unwrap_or(false);

        let outcome = pipeline::run(
            &self.fs,
            &self.env,
            &self.cwd,
            prepared,
            stdin_data,
            self.capturing,
        );

        if may_change_cwd
            && outcome.exit_code == 0
            && let Some(target) = outcome.cd_target
        {
            self.cwd = target;
        }

        if self.capturing {
            self.captured.extend_from_slice(&outcome.captured);
        } else if self.interactive && outcome.missing_newline {
            println!();
        }

        ExecOutcome::Completed(outcome.exit_code)
    }

    /// Expand every stage: name, arguments (fields + globs), redirection
    /// targets; resolve paths per the registry flags.
    fn prepare_stages(&mut self, stages: &[SimpleCommand]) -> Result<Vec<PreparedStage>, i32> {
        let cwd = self.cwd.clone();
        let mut prepared = Vec::new();
        // Deferred so diagnostics print after the expander releases self.
        let mut no_match: Option<(String, String)> = None;

        {
            let mut expander = Expander::new(self, &cwd);

            'stages: for stage in stages {
                let mut name_fields = expander.expand_fields(&stage.name);
                if name_fields.is_empty() {
                    continue;
                }
                let name = name_fields.remove(0).text;
                let spec = commands::lookup(&name);
                let policy = spec.map(|s| s.no_match).unwrap_or(NoMatchPolicy::Error);

                let mut args: Vec<String> = Vec::new();
                let mut arg_fields = name_fields;
                for word in &stage.args {
                    arg_fields.extend(expander.expand_fields(word));
                }
                for field in &arg_fields {
                    match expander.expand_glob(field, policy) {
                        Ok(matches) => args.extend(matches),
                        Err(e) => {
                            no_match = Some((name.clone(), e.pattern));
                            break 'stages;
                        }
                    }
                }

                if spec.map(|s| s.needs_path_resolution).unwrap_or(false) {
                    args = args
                        .into_iter()
                        .map(|arg| {
                            if arg.starts_with('-') {
                                arg
                            } else {
                                path::resolve(&arg, &cwd)
                            }
                        })
                        .collect();
                }

                let mut out_chain = Vec::new();
                let mut err_chain = Vec::new();
                let mut stdin_file = None;
                for redirection in &stage.redirections {
                    match redirection.op {
                        RedirOp::Heredoc => {}
                        RedirOp::In => {
                            let target = expander.expand_single(&redirection.target);
                            stdin_file = Some(path::resolve(&target, &cwd));
                        }
                        op => {
                            let target = expander.expand_single(&redirection.target);
                            let planned = Planned {
                                op,
                                target: path::resolve(&target, &cwd),
                            };
                            if op.is_stderr() {
                                err_chain.push(planned);
                            } else {
                                out_chain.push(planned);
                            }
                        }
                    }
                }

                prepared.push(PreparedStage {
                    name,
                    args,
                    spec,
                    out_chain,
                    err_chain,
                    stdin_file,
                });
            }
        }

        if let Some((command, pattern)) = no_match {
            self.print_warning(&format!("{command}: no match: {pattern}"));
            return Err(1);
        }
        Ok(prepared)
    }
}

// ---------------------------------------------------------------------------
// ExpansionHost
// ---------------------------------------------------------------------------

impl ExpansionHost for Shell {
    fn command_output(&mut self, command: &str) -> Vec<u8> {
        self.run_captured(command).1
    }

    fn var(&self, name: &str) -> Option<String> {
        self.env.borrow().get(name).cloned()
    }

    fn list_dir(&mut self, dir: &str) -> Option<Vec<String>> {
        self.fs
            .ls(dir)
            .ok()
            .map(|entries| entries.into_iter().map(|e| e.name).collect())
    }

    fn warn(&mut self, message: &str) {
        self.print_warning(&format!("warning: {message}"));
    }
}

// ---------------------------------------------------------------------------
// Line scanning helpers
// ---------------------------------------------------------------------------

/// Splice a continuation line onto the buffer: a trailing backslash joins
/// without a newline; an open quote keeps it.
pub fn join_continuation(buffer: &str, next: &str) -> String {
    let trimmed = buffer.trim_end();
    if let Some(stripped) = trimmed.strip_suffix('\\') {
        format!("{stripped}{next}")
    } else {
        format!("{buffer}\n{next}")
    }
}

/// Detect an opener whose terminator has not arrived within this line's
/// statements. The outermost unclosed construct decides the sentinel.
fn unbalanced_construct(statements: &[String]) -> Option<ExecOutcome> {
    let mut stack: Vec<&'static str> = Vec::new();
    for statement in statements {
        let head = parser::statement_head(statement);
        if head == "for" || head.starts_with("for ") {
            stack.push("for");
        } else if head.starts_with("if ") {
            stack.push("if");
        } else if head == "done" {
            if stack.last() == Some(&"for") {
                stack.pop();
            }
        } else if head == "fi" && stack.last() == Some(&"if") {
            stack.pop();
        }
    }
    match stack.first() {
        Some(&"for") => Some(ExecOutcome::NeedsFor),
        Some(&"if") => Some(ExecOutcome::NeedsIf),
        _ => None,
    }
}

/// The delimiter of a statement's here-doc, if it has one.
fn heredoc_delimiter(statement: &str) -> Option<String> {
    match parser::parse_statement(statement) {
        Ok(Some(Statement::Pipeline(stages))) => {
            stages.iter().find_map(|s| s.heredoc_delimiter())
        }
        _ => None,
    }
}

/// Collect a multi-line construct from script source, starting from the
/// already-read opener line. Advances `i` past the block.
fn collect_block(
    lines: &[&str],
    i: &mut usize,
    first: String,
    opener: &str,
    terminator: &str,
) -> Vec<String> {
    let mut depth = block_depth(&first, opener, terminator);
    let mut block = vec![first];

    while depth > 0 && *i + 1 < lines.len() {
        *i += 1;
        let line = lines[*i].to_string();
        depth += block_depth(&line, opener, terminator);
        block.push(line);
    }
    block
}

pub(crate) fn block_depth(line: &str, opener: &str, terminator: &str) -> i32 {
    let mut depth = 0;
    for statement in parser::split_statements(line) {
        let head = parser::statement_head(&statement);
        if head == opener || head.starts_with(&format!("{opener} ")) {
            depth += 1;
        } else if head == terminator {
            depth -= 1;
        }
    }
    depth
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
