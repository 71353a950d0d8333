use std::path::Path;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;

use agfs_shell::client::AgfsClient;
use agfs_shell::engine::Shell;
use agfs_shell::{interrupt, repl};

/// Default server endpoint when neither the flag nor `AGFS_API_URL` is set.
const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

/// Request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "agfs")]
#[command(about = "Unix-like shell for the AGFS virtual file system")]
#[command(version)]
struct App {
    /// AGFS API base URL (env: AGFS_API_URL)
    #[arg(long = "agfs-api-baseurl", value_name = "URL")]
    agfs_api_baseurl: Option<String>,

    /// Execute a command string and exit with its status
    #[arg(short = 'c', value_name = "COMMAND")]
    command: Option<String>,

    /// Script file to run, or a command with its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    let app = App::parse();

    let base_url = app
        .agfs_api_baseurl
        .or_else(|| std::env::var("AGFS_API_URL").ok())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    interrupt::install();

    let client = AgfsClient::new(&base_url, REQUEST_TIMEOUT);
    let mut shell = Shell::new(client);

    // Mode selection, first match wins: -c string, script file, one-shot
    // command, interactive REPL.
    let code = if let Some(command) = app.command {
        shell.run_source(&command, false)
    } else if let Some(first) = app.args.first()
        && Path::new(first).is_file()
    {
        run_script(&mut shell, first)
    } else if !app.args.is_empty() {
        shell.run_source(&app.args.join(" "), false)
    } else {
        match repl::run(&mut shell) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{}", format!("agfs: {e}").red());
                1
            }
        }
    };

    std::process::exit(code);
}

/// Script mode: one statement per line, `#` comments, stop on the first
/// non-zero exit and propagate it.
fn run_script(shell: &mut Shell, path: &str) -> i32 {
    match std::fs::read_to_string(path) {
        Ok(source) => shell.run_source(&source, true),
        Err(e) => {
            eprintln!("{}", format!("agfs: {path}: {e}").red());
            127
        }
    }
}
