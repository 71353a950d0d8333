//! Environment builtins (export, env, unset) and the `test`/`[` condition
//! evaluator.

use super::Process;
use crate::parser::is_valid_identifier;
use crate::path;

/// Set variables (`export VAR=value ...`) or, with no arguments, display
/// the environment.
pub fn export(process: &mut Process) -> i32 {
    if process.args.is_empty() {
        return env(process);
    }

    let args = process.args.clone();
    for arg in &args {
        match arg.split_once('=') {
            Some((name, value)) if is_valid_identifier(name) => {
                process
                    .env
                    .borrow_mut()
                    .insert(name.to_string(), value.to_string());
            }
            Some((name, _)) => {
                process
                    .stderr
                    .write_str(&format!("export: invalid variable name: {name}\n"));
                return 2;
            }
            None => {
                process.stderr.write_str("export: usage: export VAR=value\n");
                return 2;
            }
        }
    }
    0
}

/// Print all variables, sorted by name.
pub fn env(process: &mut Process) -> i32 {
    let mut entries: Vec<(String, String)> = process
        .env
        .borrow()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entries.sort();
    for (name, value) in entries {
        process.stdout.write_str(&format!("{name}={value}\n"));
    }
    0
}

/// Remove variables.
pub fn unset(process: &mut Process) -> i32 {
    if process.args.is_empty() {
        process.stderr.write_str("unset: missing variable name\n");
        return 2;
    }
    let args = process.args.clone();
    let mut env = process.env.borrow_mut();
    for name in &args {
        env.remove(name);
    }
    0
}

// ---------------------------------------------------------------------------
// test / [
// ---------------------------------------------------------------------------

/// Evaluate a conditional expression.
///
/// File operators `-f`/`-d`/`-e` consult the server; string operators
/// `-z`/`-n`/`=`/`!=`, integer comparisons `-eq -ne -gt -lt -ge -le`, and
/// the logical forms `!`, `-a`, `-o` are local. Exit 0 when true, 1 when
/// false, 2 on a malformed expression.
pub fn test(process: &mut Process) -> i32 {
    let mut args = process.args.clone();

    if process.name == "[" {
        if args.last().map(String::as_str) != Some("]") {
            process.stderr.write_str("[: missing ']'\n");
            return 2;
        }
        args.pop();
    }

    if args.is_empty() {
        return 1;
    }

    match evaluate(process, &args) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(msg) => {
            let name = process.name.clone();
            process.stderr.write_str(&format!("{name}: {msg}\n"));
            2
        }
    }
}

fn evaluate(process: &Process, args: &[String]) -> Result<bool, String> {
    if args.is_empty() {
        return Ok(false);
    }

    // Single operand: true when non-empty.
    if args.len() == 1 {
        return Ok(!args[0].is_empty());
    }

    if args[0] == "!" {
        return Ok(!evaluate(process, &args[1..])?);
    }

    // Unary operators.
    match args[0].as_str() {
        "-f" => {
            let target = operand(args, "-f")?;
            let resolved = path::resolve(target, &process.cwd);
            return Ok(process
                .fs
                .stat(&resolved)
                .map(|e| !e.is_dir)
                .unwrap_or(false));
        }
        "-d" => {
            let target = operand(args, "-d")?;
            let resolved = path::resolve(target, &process.cwd);
            return Ok(process.fs.is_directory(&resolved));
        }
        "-e" => {
            let target = operand(args, "-e")?;
            let resolved = path::resolve(target, &process.cwd);
            return Ok(process.fs.exists(&resolved));
        }
        "-z" => return Ok(operand(args, "-z")?.is_empty()),
        "-n" => return Ok(!operand(args, "-n")?.is_empty()),
        _ => {}
    }

    if args.len() >= 3 {
        // Logical connectives, lowest precedence first.
        if let Some(idx) = args.iter().position(|a| a == "-o") {
            return Ok(evaluate(process, &args[..idx])? || evaluate(process, &args[idx + 1..])?);
        }
        if let Some(idx) = args.iter().position(|a| a == "-a") {
            return Ok(evaluate(process, &args[..idx])? && evaluate(process, &args[idx + 1..])?);
        }

        match args[1].as_str() {
            "=" => return Ok(args[0] == args[2]),
            "!=" => return Ok(args[0] != args[2]),
            op @ ("-eq" | "-ne" | "-gt" | "-lt" | "-ge" | "-le") => {
                let left: i64 = args[0]
                    .parse()
                    .map_err(|_| format!("integer expression expected: {}", args[0]))?;
                let right: i64 = args[2]
                    .parse()
                    .map_err(|_| format!("integer expression expected: {}", args[2]))?;
                return Ok(match op {
                    "-eq" => left == right,
                    "-ne" => left != right,
                    "-gt" => left > right,
                    "-lt" => left < right,
                    "-ge" => left >= right,
                    _ => left <= right,
                });
            }
            _ => {}
        }
    }

    Ok(!args[0].is_empty())
}

fn operand<'a>(args: &'a [String], op: &str) -> Result<&'a str, String> {
    args.get(1)
        .map(String::as_str)
        .ok_or_else(|| format!("{op} requires an argument"))
}
