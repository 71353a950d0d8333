//! Pipeline runtime: wires expanded stages together and executes them in
//! sequence.
//!
//! Stage i+1's stdin is the buffered stdout of stage i. The last stage
//! writes straight through to the terminal unless its output is redirected
//! or the caller is capturing (command substitution, tests). Redirections
//! are applied after all stages finish, from the buffered content: first
//! every stage's stdout chain, then the stderr chains.
//!
//! The one deliberate special case is the direct streaming bridge: a
//! single-stage pipeline whose command supports streaming, has no
//! arguments, carries exactly one output redirection, and no pre-fed
//! stdin. Local stdin is then copied to the remote in fixed chunks (the
//! first write honoring `>` vs `>>`, the rest appending) so arbitrarily
//! large input never materializes in memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use colored::Colorize;

use crate::client::{AgfsClient, WRITE_CHUNK};
use crate::commands::{CommandSpec, Process};
use crate::interrupt::{self, EXIT_INTERRUPTED};
use crate::stream::{InputStream, OutputStream};

use super::redirect::{self, Planned};

/// A fully expanded stage, ready to run: resolved arguments, registry
/// entry, and planned redirections.
pub struct PreparedStage {
    pub name: String,
    pub args: Vec<String>,
    pub spec: Option<&'static CommandSpec>,
    /// Ordered `>`/`>>` chain.
    pub out_chain: Vec<Planned>,
    /// Ordered `2>`/`2>>` chain.
    pub err_chain: Vec<Planned>,
    /// Resolved `<` source, if any.
    pub stdin_file: Option<String>,
}

pub struct PipelineOutcome {
    pub exit_code: i32,
    /// Last stage's stdout when capturing.
    pub captured: Vec<u8>,
    /// Set when a `changes_cwd` stage succeeded.
    pub cd_target: Option<String>,
    /// True when pass-through output left the cursor mid-line.
    pub missing_newline: bool,
}

impl PipelineOutcome {
    fn failed(exit_code: i32) -> Self {
        Self {
            exit_code,
            captured: Vec::new(),
            cd_target: None,
            missing_newline: false,
        }
    }
}

/// Execute a prepared pipeline.
pub fn run(
    fs: &Rc<AgfsClient>,
    env: &Rc<RefCell<HashMap<String, String>>>,
    cwd: &str,
    stages: Vec<PreparedStage>,
    stdin_data: Option<Vec<u8>>,
    capture: bool,
) -> PipelineOutcome {
    if stages.is_empty() {
        return PipelineOutcome::failed(0);
    }

    if !capture && stdin_data.is_none() && is_bridge_candidate(&stages) {
        let exit_code = streaming_bridge(fs, &stages[0]);
        return PipelineOutcome::failed(exit_code);
    }

    let total = stages.len();
    let mut piped: Vec<u8> = Vec::new();
    let mut stdin_data = stdin_data;
    let mut exit_code = 0;
    let mut cd_target = None;
    let mut captured = Vec::new();
    let mut missing_newline = false;

    // Buffered (stdout, stderr) per stage, replayed through the planner
    // once every stage has run.
    let mut outputs: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(total);

    for (i, stage) in stages.iter().enumerate() {
        let last = i + 1 == total;

        // Stage stdin: an explicit `<` wins, then pre-fed bytes (stage 0),
        // then the previous stage's buffered stdout.
        let input = if let Some(file) = &stage.stdin_file {
            match fs.cat(file, 0, -1) {
                Ok(bytes) => bytes,
                Err(e) => {
                    report_error(&format!("{}: {e}", file), capture);
                    return PipelineOutcome::failed(1);
                }
            }
        } else if i == 0 {
            stdin_data.take().unwrap_or_default()
        } else {
            std::mem::take(&mut piped)
        };

        let passthrough = last && stage.out_chain.is_empty() && !capture;
        let mut process = Process {
            name: stage.name.clone(),
            args: stage.args.clone(),
            stdin: InputStream::from_bytes(input),
            stdout: if passthrough {
                OutputStream::passthrough()
            } else {
                OutputStream::buffer()
            },
            stderr: OutputStream::buffer(),
            fs: Rc::clone(fs),
            env: Rc::clone(env),
            cwd: cwd.to_string(),
            cd_target: None,
        };

        exit_code = match stage.spec {
            Some(spec) => (spec.executor)(&mut process),
            None => {
                let name = stage.name.clone();
                process
                    .stderr
                    .write_str(&format!("{name}: command not found\n"));
                127
            }
        };

        if process.cd_target.is_some() {
            cd_target = process.cd_target.take();
        }
        if passthrough {
            missing_newline = !process.stdout.ends_with_newline();
        }

        let stdout_bytes = process.stdout.take();
        let stderr_bytes = process.stderr.take();

        if !last {
            piped.clone_from(&stdout_bytes);
        } else if capture && stage.out_chain.is_empty() {
            captured = stdout_bytes.clone();
        }
        outputs.push((stdout_bytes, stderr_bytes));
    }

    // Replay output redirections, then stderr.
    for (stage, (stdout_bytes, _)) in stages.iter().zip(&outputs) {
        if stage.out_chain.is_empty() {
            continue;
        }
        if let Err(diag) = redirect::apply_chain(fs, stdout_bytes, &stage.out_chain) {
            report_error(&diag, capture);
            return PipelineOutcome {
                exit_code: 1,
                captured,
                cd_target,
                missing_newline,
            };
        }
    }
    for (stage, (_, stderr_bytes)) in stages.iter().zip(&outputs) {
        if !stage.err_chain.is_empty() {
            if let Err(diag) = redirect::apply_chain(fs, stderr_bytes, &stage.err_chain) {
                report_error(&diag, capture);
                return PipelineOutcome {
                    exit_code: 1,
                    captured,
                    cd_target,
                    missing_newline,
                };
            }
        } else if !capture && !stderr_bytes.is_empty() {
            let text = String::from_utf8_lossy(stderr_bytes);
            eprint!("{}", text.red());
        }
    }

    PipelineOutcome {
        exit_code,
        captured,
        cd_target,
        missing_newline,
    }
}

fn report_error(message: &str, capture: bool) {
    if !capture {
        eprintln!("{}", format!("agfs: {message}").red());
    }
}

// ---------------------------------------------------------------------------
// Direct streaming bridge
// ---------------------------------------------------------------------------

fn is_bridge_candidate(stages: &[PreparedStage]) -> bool {
    if stages.len() != 1 {
        return false;
    }
    let stage = &stages[0];
    stage
        .spec
        .map(|s| s.supports_streaming)
        .unwrap_or(false)
        && stage.args.is_empty()
        && stage.out_chain.len() == 1
        && stage.stdin_file.is_none()
}

/// Copy local stdin to the remote target chunk by chunk. The first write
/// honors the redirection mode; every subsequent chunk appends, so the
/// file grows as the input arrives.
fn streaming_bridge(fs: &AgfsClient, stage: &PreparedStage) -> i32 {
    let redirect = &stage.out_chain[0];
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut buf = vec![0u8; WRITE_CHUNK];
    let mut first = true;

    loop {
        if interrupt::interrupted() {
            return EXIT_INTERRUPTED;
        }
        let n = match input.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                report_error(&format!("stdin: {e}"), false);
                return 1;
            }
        };
        if n == 0 {
            return 0;
        }

        let append = redirect.op.appends() || !first;
        let result = if append {
            fs.write_append(&redirect.target, &buf[..n])
        } else {
            fs.write(&redirect.target, &buf[..n])
        };
        if let Err(e) = result {
            report_error(&format!("{}: {e}", redirect.target), false);
            return 1;
        }
        first = false;
    }
}
