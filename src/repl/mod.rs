//! Interactive REPL driver.
//!
//! Reads lines with `rustyline`, assembles complete statements across
//! continuation lines (trailing `\`, open quotes, unbalanced brackets, and
//! the engine's needs-more signals for here-docs and `for`/`if` blocks),
//! and hands them to the engine. History persists to the `HISTFILE` path;
//! tab completion offers command names for the first token and remote
//! paths after that.

use std::rc::Rc;

use anyhow::{Context, Result};
use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config, Editor, Helper, Highlighter, Hinter, Validator};

use crate::client::AgfsClient;
use crate::commands;
use crate::engine::{self, ExecOutcome, Shell, control, join_continuation};
use crate::interrupt;
use crate::parser;
use crate::path;

// ---------------------------------------------------------------------------
// Tab completion
// ---------------------------------------------------------------------------

/// Completion helper: command names at the first token, remote paths for
/// later tokens (directories shown with a trailing `/`).
#[derive(Helper, Highlighter, Hinter, Validator)]
struct ShellHelper {
    fs: Rc<AgfsClient>,
    /// Refreshed from the session before every prompt.
    cwd: String,
    commands: Vec<&'static str>,
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let text = &line[..pos];
        let words: Vec<&str> = text.split_whitespace().collect();

        // First token: complete command names.
        if words.is_empty() || (words.len() == 1 && !text.ends_with(' ')) {
            let word = words.first().copied().unwrap_or("");
            let candidates = self
                .commands
                .iter()
                .filter(|name| name.starts_with(word))
                .map(|name| Pair {
                    display: name.to_string(),
                    replacement: name.to_string(),
                })
                .collect();
            return Ok((pos - word.len(), candidates));
        }

        // Later tokens: complete against the remote listing of the
        // longest directory prefix.
        let current = if text.ends_with(' ') {
            ""
        } else {
            words.last().copied().unwrap_or("")
        };

        let (dir_part, file_part) = match current.rfind('/') {
            Some(idx) => (&current[..idx + 1], &current[idx + 1..]),
            None => ("", current),
        };
        let list_path = if dir_part.is_empty() {
            self.cwd.clone()
        } else {
            path::resolve(dir_part, &self.cwd)
        };

        let Ok(entries) = self.fs.ls(&list_path) else {
            return Ok((pos, Vec::new()));
        };

        let candidates = entries
            .iter()
            .filter(|entry| entry.name.starts_with(file_part))
            .map(|entry| {
                let display = if entry.is_dir {
                    format!("{}/", entry.name)
                } else {
                    entry.name.clone()
                };
                Pair {
                    replacement: format!("{dir_part}{display}"),
                    display,
                }
            })
            .collect();
        Ok((pos - current.len(), candidates))
    }
}

// ---------------------------------------------------------------------------
// REPL loop
// ---------------------------------------------------------------------------

/// Run the interactive loop. Returns the session's final exit code.
pub fn run(shell: &mut Shell) -> Result<i32> {
    shell.interactive = true;

    // A dead server makes an interactive session useless: bail before the
    // first prompt.
    let health = match shell.fs.health() {
        Ok(health) => health,
        Err(_) => {
            eprintln!(
                "{}",
                format!(
                    "Error: Cannot connect to AGFS server at {}",
                    shell.fs.base_url()
                )
                .red()
            );
            eprintln!("Make sure the server is running.");
            return Ok(1);
        }
    };
    print_banner(shell, &health);

    let config = Config::builder()
        .completion_type(CompletionType::List)
        .build();
    let mut editor: Editor<ShellHelper, DefaultHistory> =
        Editor::with_config(config).context("failed to initialize line editor")?;
    editor.set_helper(Some(ShellHelper {
        fs: Rc::clone(&shell.fs),
        cwd: shell.cwd.clone(),
        commands: commands::command_names(),
    }));

    if let Some(history) = shell.history_file()
        && editor.load_history(&history).is_err()
    {
        // First session: the file appears on exit.
    }

    loop {
        if let Some(helper) = editor.helper_mut() {
            helper.cwd.clone_from(&shell.cwd);
        }

        let prompt = format!("agfs:{}> ", shell.cwd);
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}", format!("agfs: {e}").red());
                break;
            }
        };

        // Keep reading while the statement is lexically incomplete.
        let mut buffer = line;
        let mut cancelled = false;
        while parser::needs_continuation(&buffer) {
            match editor.readline("> ") {
                Ok(next) => buffer = join_continuation(&buffer, &next),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    cancelled = true;
                    break;
                }
                Err(_) => {
                    cancelled = true;
                    break;
                }
            }
        }
        if cancelled {
            continue;
        }

        let command = buffer.trim().to_string();
        if command.is_empty() {
            continue;
        }
        if command == "exit" || command == "quit" {
            break;
        }
        let _ = editor.add_history_entry(&command);

        interrupt::reset();
        match shell.execute_line(&command) {
            ExecOutcome::Completed(code) => shell.set_status(code),
            ExecOutcome::NeedsHeredoc(delimiter) => {
                match collect_heredoc(&mut editor, &delimiter) {
                    Some(body) => {
                        let code = shell.execute_line_with_heredoc(&command, body);
                        shell.set_status(code);
                    }
                    None => continue,
                }
            }
            ExecOutcome::NeedsFor => {
                match collect_construct(&mut editor, &command, "for", "done") {
                    Some(block) => {
                        let code = control::execute_for(shell, &block);
                        shell.set_status(code);
                    }
                    None => continue,
                }
            }
            ExecOutcome::NeedsIf => match collect_construct(&mut editor, &command, "if", "fi") {
                Some(block) => {
                    let code = control::execute_if(shell, &block);
                    shell.set_status(code);
                }
                None => continue,
            },
        }
    }

    if let Some(history) = shell.history_file()
        && let Err(e) = editor.save_history(&history)
    {
        eprintln!(
            "{}",
            format!("Warning: Could not save history: {e}").yellow()
        );
    }

    println!("Goodbye!");
    Ok(shell.status())
}

fn print_banner(shell: &Shell, health: &serde_json::Value) {
    println!("agfs-shell v{}", env!("CARGO_PKG_VERSION"));

    let server_version = health
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let server_commit = health
        .get("gitCommit")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    println!(
        "{}",
        format!("Server: version={server_version}, commit={server_commit}").dimmed()
    );
    println!(
        "Connected to AGFS server at {}",
        shell.fs.base_url().green()
    );
    println!("Type 'help' for help, Ctrl+D or 'exit' to quit");
    println!();
}

/// Read here-doc body lines until one equals the delimiter. `None` on
/// Ctrl-C; EOF warns and keeps what was collected.
fn collect_heredoc(
    editor: &mut Editor<ShellHelper, DefaultHistory>,
    delimiter: &str,
) -> Option<Vec<u8>> {
    let mut lines: Vec<String> = Vec::new();
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim() == delimiter {
                    break;
                }
                lines.push(line);
            }
            Err(ReadlineError::Eof) => {
                eprintln!(
                    "{}",
                    format!(
                        "Warning: here-document delimited by end-of-file (wanted `{delimiter}`)"
                    )
                    .yellow()
                );
                break;
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                return None;
            }
            Err(_) => return None,
        }
    }

    let mut body = lines.join("\n");
    if !lines.is_empty() {
        body.push('\n');
    }
    Some(body.into_bytes())
}

/// Collect a multi-line `for`/`if` block, tracking nesting depth until
/// the outermost terminator. `None` on Ctrl-C; EOF warns and returns the
/// partial block.
fn collect_construct(
    editor: &mut Editor<ShellHelper, DefaultHistory>,
    opener_line: &str,
    opener: &str,
    terminator: &str,
) -> Option<Vec<String>> {
    let mut block = vec![opener_line.to_string()];
    let mut depth = engine::block_depth(opener_line, opener, terminator);

    while depth > 0 {
        match editor.readline("> ") {
            Ok(line) => {
                depth += engine::block_depth(&line, opener, terminator);
                block.push(line);
            }
            Err(ReadlineError::Eof) => {
                eprintln!(
                    "{}",
                    format!("Warning: block ended by end-of-file (wanted `{terminator}`)").yellow()
                );
                break;
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                return None;
            }
            Err(_) => return None,
        }
    }
    Some(block)
}
