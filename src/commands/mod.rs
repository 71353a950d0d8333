//! Command registry and the Process execution contract.
//!
//! Every builtin is a plain function `fn(&mut Process) -> i32` registered
//! in a name-keyed table together with its capability flags. The engine
//! never inspects command identity; it only consults the flags:
//!
//! - `needs_path_resolution` — non-flag arguments are resolved against the
//!   session cwd before the executor runs;
//! - `supports_streaming` — eligible for the direct stdin→remote bridge
//!   and for pass-through stdout;
//! - `no_pipeline` — must be the sole stage of its pipeline (`cd`);
//! - `changes_cwd` — the engine reads `Process.cd_target` afterwards and
//!   updates the session cwd;
//! - `no_match` — glob no-match policy applied to this command's
//!   arguments.
//!
//! Executors see the world only through the Process: its streams, its
//! environment map, its cwd snapshot, and the shared AGFS client. Exit
//! codes: 0 success, 1 failure, 2 usage or bad pattern, 127 unknown
//! command, 130 interrupted.

mod env;
mod fs;
mod mount;
mod text;
mod transfer;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

use crate::client::{AgfsClient, AgfsError};
use crate::expand::NoMatchPolicy;
use crate::stream::{InputStream, OutputStream};

/// Runtime instance of one pipeline stage.
pub struct Process {
    pub name: String,
    pub args: Vec<String>,
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub fs: Rc<AgfsClient>,
    pub env: Rc<RefCell<HashMap<String, String>>>,
    /// Session cwd at construction time.
    pub cwd: String,
    /// Set by `cd` on success; the engine applies it to the session.
    pub cd_target: Option<String>,
}

impl Process {
    /// Write a Unix-style diagnostic for a client error:
    /// `<cmd>: <path>: No such file or directory` for path-shaped errors,
    /// `<cmd>: <message>` for transport-level ones.
    pub fn report(&mut self, path: &str, err: &AgfsError) {
        let name = self.name.clone();
        let line = match err {
            AgfsError::NotFound
            | AgfsError::PermissionDenied
            | AgfsError::NotADirectory => format!("{name}: {path}: {err}\n"),
            _ => format!("{name}: {err}\n"),
        };
        self.stderr.write_str(&line);
    }

    pub fn usage(&mut self, text: &str) -> i32 {
        let name = self.name.clone();
        self.stderr.write_str(&format!("Usage: {name} {text}\n"));
        2
    }
}

pub type Executor = fn(&mut Process) -> i32;

/// Registry entry: executor plus the capability flags the engine drives
/// uniform behavior from.
pub struct CommandSpec {
    pub name: &'static str,
    pub executor: Executor,
    pub needs_path_resolution: bool,
    pub supports_streaming: bool,
    pub no_pipeline: bool,
    pub changes_cwd: bool,
    pub no_match: NoMatchPolicy,
}

impl CommandSpec {
    const fn new(name: &'static str, executor: Executor) -> Self {
        Self {
            name,
            executor,
            needs_path_resolution: false,
            supports_streaming: false,
            no_pipeline: false,
            changes_cwd: false,
            no_match: NoMatchPolicy::Error,
        }
    }

    const fn paths(mut self) -> Self {
        self.needs_path_resolution = true;
        self
    }

    const fn streaming(mut self) -> Self {
        self.supports_streaming = true;
        self
    }

    const fn solo_cwd(mut self) -> Self {
        self.no_pipeline = true;
        self.changes_cwd = true;
        self
    }

    const fn on_no_match(mut self, policy: NoMatchPolicy) -> Self {
        self.no_match = policy;
        self
    }
}

static REGISTRY: OnceLock<HashMap<&'static str, CommandSpec>> = OnceLock::new();

fn build_registry() -> HashMap<&'static str, CommandSpec> {
    let specs = [
        // File system
        CommandSpec::new("cat", fs::cat).paths().streaming(),
        CommandSpec::new("ls", fs::ls).paths().on_no_match(NoMatchPolicy::Warn),
        CommandSpec::new("cd", fs::cd).paths().solo_cwd(),
        CommandSpec::new("pwd", fs::pwd),
        CommandSpec::new("mkdir", fs::mkdir).paths(),
        CommandSpec::new("touch", fs::touch).paths(),
        CommandSpec::new("rm", fs::rm).paths().on_no_match(NoMatchPolicy::Skip),
        CommandSpec::new("stat", fs::stat).paths(),
        CommandSpec::new("cp", fs::cp).paths(),
        CommandSpec::new("mv", fs::mv).paths(),
        // Mode and content operands must not be path-resolved; these two
        // resolve their path arguments themselves.
        CommandSpec::new("chmod", fs::chmod).on_no_match(NoMatchPolicy::Skip),
        CommandSpec::new("write", fs::write),
        // `-n COUNT` operands must stay numeric; the file argument is
        // resolved by the executor.
        CommandSpec::new("tail", fs::tail),
        CommandSpec::new("tailf", fs::tailf).streaming(),
        // Text processing
        CommandSpec::new("echo", text::echo),
        // The pattern operand must stay verbatim; file operands are
        // resolved by the executor.
        CommandSpec::new("grep", text::grep).streaming(),
        CommandSpec::new("tee", text::tee).paths(),
        CommandSpec::new("wc", text::wc),
        CommandSpec::new("head", text::head),
        CommandSpec::new("sort", text::sort),
        CommandSpec::new("uniq", text::uniq),
        CommandSpec::new("tr", text::tr),
        // Environment & conditions
        CommandSpec::new("export", env::export),
        CommandSpec::new("env", env::env),
        CommandSpec::new("unset", env::unset),
        CommandSpec::new("test", env::test),
        CommandSpec::new("[", env::test),
        // Transfer
        // Mixed local/remote arguments: these resolve their remote side
        // themselves.
        CommandSpec::new("upload", transfer::upload),
        CommandSpec::new("download", transfer::download),
        // Plugins
        CommandSpec::new("mounts", mount::mounts),
        CommandSpec::new("mount", mount::mount),
        CommandSpec::new("unmount", mount::unmount),
        CommandSpec::new("plugins", mount::plugins),
        // Utility
        CommandSpec::new("clear", clear),
        CommandSpec::new("help", help),
    ];

    specs.into_iter().map(|s| (s.name, s)).collect()
}

/// Look up a command's registry entry.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    REGISTRY.get_or_init(build_registry).get(name)
}

/// All registered command names, sorted, for tab completion and help.
pub fn command_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.get_or_init(build_registry).keys().copied().collect();
    names.sort_unstable();
    names
}

// ---------------------------------------------------------------------------
// Shared argument helpers
// ---------------------------------------------------------------------------

/// Parse a `-n COUNT` option, returning the count and the remaining args.
pub(crate) fn parse_count(args: &[String], default: usize) -> Result<(usize, Vec<String>), String> {
    let mut n = default;
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "-n" {
            match args.get(i + 1).map(|v| v.parse::<usize>()) {
                Some(Ok(value)) => {
                    n = value;
                    i += 2;
                }
                _ => {
                    return Err(format!(
                        "invalid number of lines: '{}'",
                        args.get(i + 1).map(String::as_str).unwrap_or("")
                    ));
                }
            }
        } else {
            rest.push(args[i].clone());
            i += 1;
        }
    }
    Ok((n, rest))
}

// ---------------------------------------------------------------------------
// Utility commands
// ---------------------------------------------------------------------------

fn clear(process: &mut Process) -> i32 {
    process.stdout.write_str("\x1b[2J\x1b[H");
    process.stdout.flush();
    0
}

fn help(process: &mut Process) -> i32 {
    let text = "\
AGFS shell commands

File system
  ls [-l] [-h] [path]         List directory (dirs first, newest first)
  cd [path]                   Change directory
  pwd                         Print working directory
  cat [file...]               Concatenate files or stdin
  mkdir <dir>                 Create directory
  touch <file>                Create empty file
  rm [-r] <path...>           Remove files or directories
  stat <path...>              Show file metadata
  cp [-r] <src...> <dst>      Copy within AGFS
  mv <src...> <dst>           Move or rename
  chmod <mode> <path...>      Change permissions
  write <file> <content...>   Write content to a file
  tail [-n N] [file]          Last N lines
  tailf [-n N] <file>         Follow file growth

Text
  echo [args...]              Print arguments
  grep [-ivnclhH] [-r] PATTERN [file...]
  tee [-a] <file...>          Copy stdin to files and stdout
  wc [-l] [-w] [-c]           Count lines, words, bytes
  head [-n N]                 First N lines
  sort [-r]                   Sort lines
  uniq                        Drop repeated adjacent lines
  tr SET1 SET2                Translate characters

Environment
  export [VAR=value...]       Set variables
  env                         Show variables
  unset VAR...                Remove variables
  test EXPR / [ EXPR ]        Evaluate conditions

Transfer
  upload [-r] <local> <remote>
  download [-r] <remote> <local>

Plugins
  mounts                      List mounted plugins
  mount <fstype> <path> [k=v...]
  unmount <path>
  plugins load|unload|list

Syntax: pipes `|`, redirections `< > >> 2> 2>> <<DELIM` (multiple `>` form
a chain), quoting `'…' \"…\"`, expansion `$VAR ${VAR} $? $(cmd)`, wildcards
`* ? [set]`, `for`/`if` control flow, `;` separators.
";
    process.stdout.write_str(text);
    0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
