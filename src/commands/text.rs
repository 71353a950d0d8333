//! Text-processing builtins: echo, grep, tee, wc, head, sort, uniq, tr.

use regex::RegexBuilder;

use super::Process;
use crate::client::AgfsError;
use crate::path;

/// Join arguments with single spaces, append a newline. Stdin is ignored.
pub fn echo(process: &mut Process) -> i32 {
    let line = process.args.join(" ");
    process.stdout.write_str(&line);
    process.stdout.write_str("\n");
    0
}

// ---------------------------------------------------------------------------
// grep
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GrepOptions {
    ignore_case: bool,
    invert: bool,
    line_numbers: bool,
    count_only: bool,
    files_only: bool,
    recursive: bool,
    /// None = auto (prefix when searching more than one file).
    show_filename: Option<bool>,
}

/// Search for a regex in files or stdin.
///
/// `-i` case-fold, `-v` invert, `-n` line numbers, `-c` count only, `-l`
/// filenames only, `-h`/`-H` suppress/force the filename prefix, `-r`
/// recursive search delegated to the server. Exit 0 when anything matched,
/// 1 when nothing did, 2 on usage or pattern errors.
pub fn grep(process: &mut Process) -> i32 {
    let mut opts = GrepOptions::default();
    let mut operands: Vec<String> = Vec::new();
    let arg_list = process.args.clone();
    let mut args = arg_list.iter();

    for arg in args.by_ref() {
        match arg.as_str() {
            "--" => break,
            "-r" | "--recursive" => opts.recursive = true,
            "-i" | "--ignore-case" => opts.ignore_case = true,
            "-v" | "--invert-match" => opts.invert = true,
            "-c" | "--count" => opts.count_only = true,
            "-l" => opts.files_only = true,
            "-n" => opts.line_numbers = true,
            "-h" => opts.show_filename = Some(false),
            "-H" => opts.show_filename = Some(true),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                // Combined short flags: -in, -vc, ...
                for c in flag[1..].chars() {
                    match c {
                        'i' => opts.ignore_case = true,
                        'v' => opts.invert = true,
                        'n' => opts.line_numbers = true,
                        'c' => opts.count_only = true,
                        'l' => opts.files_only = true,
                        'h' => opts.show_filename = Some(false),
                        'H' => opts.show_filename = Some(true),
                        'r' => opts.recursive = true,
                        other => {
                            process
                                .stderr
                                .write_str(&format!("grep: invalid option -- '{other}'\n"));
                            return 2;
                        }
                    }
                }
            }
            operand => operands.push(operand.to_string()),
        }
    }
    operands.extend(args.cloned());

    if operands.is_empty() {
        process.stderr.write_str("grep: missing pattern\n");
        return process.usage("[-i] [-v] [-n] [-c] [-l] [-r] PATTERN [FILE...]");
    }
    let pattern = operands.remove(0);
    let files: Vec<String> = operands
        .iter()
        .map(|f| path::resolve(f, &process.cwd))
        .collect();

    let regex = match RegexBuilder::new(&pattern)
        .case_insensitive(opts.ignore_case)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            process
                .stderr
                .write_str(&format!("grep: invalid pattern: {e}\n"));
            return 2;
        }
    };

    if opts.recursive {
        return grep_remote(process, &pattern, &files, &opts);
    }

    let show_filename = opts.show_filename.unwrap_or(files.len() > 1);
    let mut any_match = false;

    if files.is_empty() {
        let data = process.stdin.read_to_end();
        any_match = grep_lines(process, &regex, &data, None, &opts);
    } else {
        for file in &files {
            let data = match process.fs.cat(file, 0, -1) {
                Ok(data) => data,
                Err(e) => {
                    process.report(file, &e);
                    continue;
                }
            };
            let name = show_filename.then_some(file.as_str());
            if grep_lines(process, &regex, &data, name, &opts) {
                any_match = true;
            }
        }
    }

    if any_match { 0 } else { 1 }
}

/// Scan one buffer line by line, writing matches per the options. Returns
/// whether anything matched.
fn grep_lines(
    process: &mut Process,
    regex: &regex::Regex,
    data: &[u8],
    filename: Option<&str>,
    opts: &GrepOptions,
) -> bool {
    let mut match_count = 0u64;

    for (index, raw) in data.split_inclusive(|&b| b == b'\n').enumerate() {
        let line = String::from_utf8_lossy(raw);
        let clean = line.trim_end_matches(['\n', '\r']);

        let mut matched = regex.is_match(clean);
        if opts.invert {
            matched = !matched;
        }
        if !matched {
            continue;
        }
        match_count += 1;

        if opts.files_only {
            if let Some(name) = filename {
                process.stdout.write_str(&format!("{name}\n"));
            }
            return true;
        }
        if opts.count_only {
            continue;
        }

        let mut prefix = String::new();
        if let Some(name) = filename {
            prefix.push_str(name);
            prefix.push(':');
        }
        if opts.line_numbers {
            prefix.push_str(&(index + 1).to_string());
            prefix.push(':');
        }
        process.stdout.write_str(&prefix);
        process.stdout.write_str(clean);
        process.stdout.write_str("\n");
    }

    if opts.count_only {
        match filename {
            Some(name) => process.stdout.write_str(&format!("{name}:{match_count}\n")),
            None => process.stdout.write_str(&format!("{match_count}\n")),
        }
    }
    match_count > 0
}

/// `-r`: let the server walk the tree and match.
fn grep_remote(process: &mut Process, pattern: &str, files: &[String], opts: &GrepOptions) -> i32 {
    let path = files
        .first()
        .cloned()
        .unwrap_or_else(|| process.cwd.clone());

    let result = match process
        .fs
        .grep(&path, pattern, true, opts.ignore_case)
    {
        Ok(result) => result,
        Err(e) => {
            process.report(&path, &e);
            return match e {
                AgfsError::BadRequest(_) => 2,
                _ => 1,
            };
        }
    };

    if opts.count_only {
        process
            .stdout
            .write_str(&format!("{}\n", result.total_matches));
    } else {
        for m in &result.matches {
            process
                .stdout
                .write_str(&format!("{}:{}:{}\n", m.file, m.line_number, m.line));
        }
    }
    if result.matches.is_empty() && result.total_matches == 0 {
        1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// tee
// ---------------------------------------------------------------------------

/// Copy stdin to every named file (overwrite, or append with `-a`), then
/// pass it through to stdout.
pub fn tee(process: &mut Process) -> i32 {
    let append = process.args.iter().any(|a| a == "-a");
    let files: Vec<String> = process
        .args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect();

    let data = process.stdin.read_to_end();
    let mut status = 0;

    for file in &files {
        let result = if append {
            process.fs.write_append(file, &data)
        } else {
            process.fs.write(file, &data)
        };
        if let Err(e) = result {
            process.report(file, &e);
            status = 1;
        }
    }

    process.stdout.write(&data);
    status
}

// ---------------------------------------------------------------------------
// Line utilities
// ---------------------------------------------------------------------------

/// Count lines, words, and bytes of stdin. Default prints all three.
pub fn wc(process: &mut Process) -> i32 {
    let mut count_lines = false;
    let mut count_words = false;
    let mut count_bytes = false;

    for flag in process.args.iter().filter(|a| a.starts_with('-')) {
        if flag.contains('l') {
            count_lines = true;
        }
        if flag.contains('w') {
            count_words = true;
        }
        if flag.contains('c') {
            count_bytes = true;
        }
    }
    if !count_lines && !count_words && !count_bytes {
        count_lines = true;
        count_words = true;
        count_bytes = true;
    }

    let data = process.stdin.read_to_end();
    let lines = data.iter().filter(|&&b| b == b'\n').count();
    let words = data.split(|b| b.is_ascii_whitespace()).filter(|w| !w.is_empty()).count();
    let bytes = data.len();

    let mut parts = Vec::new();
    if count_lines {
        parts.push(lines.to_string());
    }
    if count_words {
        parts.push(words.to_string());
    }
    if count_bytes {
        parts.push(bytes.to_string());
    }
    process.stdout.write_str(&parts.join(" "));
    process.stdout.write_str("\n");
    0
}

/// First N lines of stdin (default 10).
pub fn head(process: &mut Process) -> i32 {
    let (n, _) = match super::parse_count(&process.args, 10) {
        Ok(parsed) => parsed,
        Err(msg) => {
            process.stderr.write_str(&format!("head: {msg}\n"));
            return 2;
        }
    };

    let data = process.stdin.read_to_end();
    for line in data.split_inclusive(|&b| b == b'\n').take(n) {
        process.stdout.write(line);
    }
    0
}

/// Sort stdin lines (`-r` reverses).
pub fn sort(process: &mut Process) -> i32 {
    let reverse = process.args.iter().any(|a| a == "-r");

    let data = process.stdin.read_to_end();
    let mut lines: Vec<&[u8]> = data
        .split_inclusive(|&b| b == b'\n')
        .map(|l| strip_newline(l))
        .collect();
    lines.sort_unstable();
    if reverse {
        lines.reverse();
    }
    for line in lines {
        process.stdout.write(line);
        process.stdout.write(b"\n");
    }
    0
}

/// Drop repeated adjacent lines.
pub fn uniq(process: &mut Process) -> i32 {
    let data = process.stdin.read_to_end();
    let mut previous: Option<&[u8]> = None;
    for raw in data.split_inclusive(|&b| b == b'\n') {
        let line = strip_newline(raw);
        if previous != Some(line) {
            process.stdout.write(line);
            process.stdout.write(b"\n");
            previous = Some(line);
        }
    }
    0
}

/// Translate bytes of SET1 to the corresponding bytes of SET2.
pub fn tr(process: &mut Process) -> i32 {
    if process.args.len() < 2 {
        process.stderr.write_str("tr: missing operand\n");
        return 2;
    }
    let set1 = process.args[0].as_bytes().to_vec();
    let set2 = process.args[1].as_bytes().to_vec();
    if set1.len() != set2.len() {
        process.stderr.write_str("tr: sets must be same length\n");
        return 2;
    }

    let mut table: [u8; 256] = std::array::from_fn(|i| i as u8);
    for (from, to) in set1.iter().zip(&set2) {
        table[*from as usize] = *to;
    }

    let data = process.stdin.read_to_end();
    let translated: Vec<u8> = data.iter().map(|&b| table[b as usize]).collect();
    process.stdout.write(&translated);
    0
}

fn strip_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
