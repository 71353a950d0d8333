//! File-system builtins: cat, ls, cd, pwd, mkdir, touch, rm, stat, cp, mv,
//! chmod, write, tail, tailf.
//!
//! Everything here goes through the shared AGFS client; arguments arrive
//! already resolved to absolute paths by the pipeline runtime.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use colored::Colorize;

use super::Process;
use crate::client::{AgfsError, Entry, READ_CHUNK};
use crate::interrupt::{self, EXIT_INTERRUPTED};
use crate::path;

// ---------------------------------------------------------------------------
// cat
// ---------------------------------------------------------------------------

/// Concatenate files (streamed chunk by chunk from the server) or copy
/// stdin through. Bytes pass through untouched, binary included.
pub fn cat(process: &mut Process) -> i32 {
    if process.args.is_empty() {
        let Process { stdin, stdout, .. } = process;
        while let Some(chunk) = stdin.read_chunk(READ_CHUNK) {
            stdout.write(chunk);
        }
        stdout.flush();
        return 0;
    }

    let fs = Rc::clone(&process.fs);
    let files = process.args.clone();

    for file in &files {
        let mut reader = match fs.cat_stream(file) {
            Ok(reader) => reader,
            Err(e) => {
                process.report(file, &e);
                return 1;
            }
        };

        let mut buf = [0u8; READ_CHUNK];
        loop {
            if interrupt::interrupted() {
                process.stderr.write_str("\ncat: interrupted\n");
                return EXIT_INTERRUPTED;
            }
            match std::io::Read::read(&mut reader, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    process.stdout.write(&buf[..n]);
                    process.stdout.flush();
                }
                Err(_) => {
                    process.report(file, &AgfsError::Transport(fs.host()));
                    return 1;
                }
            }
        }
    }
    0
}

// ---------------------------------------------------------------------------
// ls
// ---------------------------------------------------------------------------

/// List a directory: directories before regular files, each group newest
/// first. `-l` renders mode, size, and mtime; `-h` human-readable sizes.
pub fn ls(process: &mut Process) -> i32 {
    let mut long_format = false;
    let mut human = false;
    let mut target: Option<String> = None;

    for arg in &process.args {
        if arg.starts_with('-') && arg.len() > 1 {
            if arg.contains('l') {
                long_format = true;
            }
            if arg.contains('h') {
                human = true;
            }
        } else {
            target = Some(arg.clone());
        }
    }
    let dir = target.unwrap_or_else(|| process.cwd.clone());

    let mut entries = match process.fs.ls(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            process.report(&dir, &e);
            return 1;
        }
    };

    // Directories first, then files; both newest first.
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| parse_mtime(&b.mod_time).cmp(&parse_mtime(&a.mod_time)))
    });

    let colorize = process.stdout.is_passthrough();
    for entry in &entries {
        let line = if long_format {
            render_long(entry, human, colorize)
        } else {
            format!("{}\n", render_name(entry, colorize))
        };
        process.stdout.write_str(&line);
    }
    0
}

fn render_name(entry: &Entry, colorize: bool) -> String {
    if entry.is_dir {
        let name = format!("{}/", entry.name);
        if colorize {
            name.blue().bold().to_string()
        } else {
            name
        }
    } else {
        entry.name.clone()
    }
}

fn render_long(entry: &Entry, human: bool, colorize: bool) -> String {
    let perms = mode_string(entry.mode, entry.is_dir);
    let size = if human {
        format!("{:>8}", human_size(entry.size))
    } else {
        format!("{:>8}", entry.size)
    };
    let mtime = match parse_mtime(&entry.mod_time) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "0000-00-00 00:00:00".to_string(),
    };
    format!("{perms} {size} {mtime} {}\n", render_name(entry, colorize))
}

fn parse_mtime(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

/// `drwxr-xr-x`-style mode rendering.
pub(crate) fn mode_string(mode: u32, is_dir: bool) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_dir { 'd' } else { '-' });
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// `1023` → `1023B`, `2048` → `2.0K`, capped at one decimal below 10.
pub(crate) fn human_size(size: u64) -> String {
    const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value >= 10.0 {
        format!("{}{}", value as u64, UNITS[unit])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

// ---------------------------------------------------------------------------
// cd / pwd
// ---------------------------------------------------------------------------

/// Verify the target is a listable directory, then hand the new cwd to the
/// engine through `cd_target`. Never legal inside a pipeline.
pub fn cd(process: &mut Process) -> i32 {
    let target = process
        .args
        .first()
        .cloned()
        .unwrap_or_else(|| "/".to_string());

    match process.fs.ls(&target) {
        Ok(_) => {
            process.cd_target = Some(target);
            0
        }
        Err(e) => {
            process.report(&target, &e);
            1
        }
    }
}

pub fn pwd(process: &mut Process) -> i32 {
    let cwd = process.cwd.clone();
    process.stdout.write_str(&cwd);
    process.stdout.write_str("\n");
    0
}

// ---------------------------------------------------------------------------
// mkdir / touch / rm / stat / chmod / write
// ---------------------------------------------------------------------------

pub fn mkdir(process: &mut Process) -> i32 {
    if process.args.is_empty() {
        process.stderr.write_str("mkdir: missing operand\n");
        return 2;
    }
    let fs = Rc::clone(&process.fs);
    let mut status = 0;
    for dir in process.args.clone() {
        if let Err(e) = fs.mkdir(&dir, 0o755) {
            process.report(&dir, &e);
            status = 1;
        }
    }
    status
}

pub fn touch(process: &mut Process) -> i32 {
    if process.args.is_empty() {
        process.stderr.write_str("touch: missing file operand\n");
        return 2;
    }
    let fs = Rc::clone(&process.fs);
    let mut status = 0;
    for file in process.args.clone() {
        if let Err(e) = fs.create(&file) {
            process.report(&file, &e);
            status = 1;
        }
    }
    status
}

pub fn rm(process: &mut Process) -> i32 {
    let recursive = process
        .args
        .iter()
        .any(|a| a == "-r" || a == "-rf" || a == "--recursive");
    let paths: Vec<String> = process
        .args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect();

    if paths.is_empty() {
        process.stderr.write_str("rm: missing operand\n");
        return 2;
    }

    let fs = Rc::clone(&process.fs);
    let mut status = 0;
    for target in &paths {
        match fs.rm(target, recursive) {
            Ok(()) => {
                process.stdout.write_str(&format!("removed '{target}'\n"));
            }
            Err(e) => {
                process.report(target, &e);
                status = 1;
            }
        }
    }
    status
}

pub fn stat(process: &mut Process) -> i32 {
    if process.args.is_empty() {
        return process.usage("<path>");
    }
    let fs = Rc::clone(&process.fs);
    let targets = process.args.clone();
    let mut status = 0;
    for (i, target) in targets.iter().enumerate() {
        match fs.stat(target) {
            Ok(entry) => {
                if i > 0 {
                    process.stdout.write_str("\n");
                }
                let kind = if entry.is_dir { "directory" } else { "regular file" };
                process.stdout.write_str(&format!(
                    "  File: {}\n  Size: {}\n  Type: {}\n  Mode: {} ({:o})\nModified: {}\n",
                    target,
                    entry.size,
                    kind,
                    mode_string(entry.mode, entry.is_dir),
                    entry.mode,
                    entry.mod_time,
                ));
            }
            Err(e) => {
                process.report(target, &e);
                status = 1;
            }
        }
    }
    status
}

pub fn chmod(process: &mut Process) -> i32 {
    if process.args.len() < 2 {
        return process.usage("<mode> <path...>");
    }
    let mode_arg = process.args[0].clone();
    let Ok(mode) = u32::from_str_radix(&mode_arg, 8) else {
        process
            .stderr
            .write_str(&format!("chmod: invalid mode: '{mode_arg}'\n"));
        return 2;
    };

    let fs = Rc::clone(&process.fs);
    let cwd = process.cwd.clone();
    let mut status = 0;
    for raw in process.args[1..].to_vec() {
        let target = path::resolve(&raw, &cwd);
        match fs.chmod(&target, mode) {
            Ok(()) => {
                process
                    .stdout
                    .write_str(&format!("changed mode of '{target}' to {mode:o}\n"));
            }
            Err(e) => {
                process.report(&target, &e);
                status = 1;
            }
        }
    }
    status
}

/// `write <file> <content...>` — join the content words and write them.
pub fn write(process: &mut Process) -> i32 {
    if process.args.len() < 2 {
        return process.usage("<file> <content...>");
    }
    let target = path::resolve(&process.args[0], &process.cwd);
    let content = process.args[1..].join(" ");
    match process.fs.write(&target, content.as_bytes()) {
        Ok(message) => {
            if !message.is_empty() {
                process.stdout.write_str(&message);
                process.stdout.write_str("\n");
            }
            0
        }
        Err(e) => {
            process.report(&target, &e);
            1
        }
    }
}

// ---------------------------------------------------------------------------
// cp / mv
// ---------------------------------------------------------------------------

/// Copy within the remote tree. Each file is one read and one write;
/// `-r` walks directories breadth-first, creating them as it goes.
pub fn cp(process: &mut Process) -> i32 {
    let recursive = process
        .args
        .iter()
        .any(|a| a == "-r" || a == "--recursive");
    let paths: Vec<String> = process
        .args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .cloned()
        .collect();

    if paths.len() < 2 {
        return process.usage("[-r] <source...> <destination>");
    }
    let dst = paths[paths.len() - 1].clone();
    let sources = &paths[..paths.len() - 1];
    let fs = Rc::clone(&process.fs);

    if sources.len() > 1 && !fs.is_directory(&dst) {
        process
            .stderr
            .write_str(&format!("cp: target '{dst}' is not a directory\n"));
        return 1;
    }

    let mut status = 0;
    for src in sources {
        let info = match fs.stat(src) {
            Ok(info) => info,
            Err(e) => {
                process.report(src, &e);
                status = 1;
                continue;
            }
        };

        if info.is_dir {
            if !recursive {
                process
                    .stderr
                    .write_str(&format!("cp: {src}: is a directory (not copied, use -r)\n"));
                status = 1;
                continue;
            }
            if copy_directory(process, src, &dst) != 0 {
                status = 1;
            }
            continue;
        }

        let final_dst = destination_for(&fs, src, &dst);
        match fs.cat(src, 0, -1).and_then(|content| fs.write(&final_dst, &content)) {
            Ok(_) => {
                process
                    .stdout
                    .write_str(&format!("  {src} -> {final_dst}\n"));
            }
            Err(e) => {
                process.report(src, &e);
                status = 1;
            }
        }
    }
    status
}

/// Breadth-first directory copy.
fn copy_directory(process: &mut Process, src_dir: &str, dst_dir: &str) -> i32 {
    let fs = Rc::clone(&process.fs);

    let mut dst_root = dst_dir.to_string();
    if fs.is_directory(&dst_root) {
        dst_root = path::join(&dst_root, path::basename(src_dir));
    }
    if let Err(e) = fs.mkdir(&dst_root, 0o755) {
        // Pre-existing destination directories are fine.
        if !matches!(e, AgfsError::BadRequest(_)) && !fs.is_directory(&dst_root) {
            process.report(&dst_root, &e);
            return 1;
        }
    }

    let mut status = 0;
    let mut queue = VecDeque::from([(src_dir.to_string(), dst_root)]);

    while let Some((src, dst)) = queue.pop_front() {
        let entries = match fs.ls(&src) {
            Ok(entries) => entries,
            Err(e) => {
                process.report(&src, &e);
                status = 1;
                continue;
            }
        };

        for entry in entries {
            let child_src = path::join(&src, &entry.name);
            let child_dst = path::join(&dst, &entry.name);
            if entry.is_dir {
                match fs.mkdir(&child_dst, 0o755) {
                    Ok(_) => queue.push_back((child_src, child_dst)),
                    Err(e) => {
                        process.report(&child_dst, &e);
                        status = 1;
                    }
                }
            } else {
                match fs
                    .cat(&child_src, 0, -1)
                    .and_then(|content| fs.write(&child_dst, &content))
                {
                    Ok(_) => {
                        process
                            .stdout
                            .write_str(&format!("  {child_src} -> {child_dst}\n"));
                    }
                    Err(e) => {
                        process.report(&child_src, &e);
                        status = 1;
                    }
                }
            }
        }
    }
    status
}

pub fn mv(process: &mut Process) -> i32 {
    if process.args.len() < 2 {
        return process.usage("<source...> <destination>");
    }
    let dst = process.args[process.args.len() - 1].clone();
    let sources = process.args[..process.args.len() - 1].to_vec();
    let fs = Rc::clone(&process.fs);

    if sources.len() > 1 && !fs.is_directory(&dst) {
        process
            .stderr
            .write_str(&format!("mv: target '{dst}' is not a directory\n"));
        return 1;
    }

    let mut status = 0;
    for src in &sources {
        let final_dst = destination_for(&fs, src, &dst);
        match fs.mv(src, &final_dst) {
            Ok(()) => {
                process
                    .stdout
                    .write_str(&format!("  {src} -> {final_dst}\n"));
            }
            Err(e) => {
                process.report(src, &e);
                status = 1;
            }
        }
    }
    status
}

/// When the destination is an existing directory, file operations land
/// inside it under the source's basename.
fn destination_for(fs: &crate::client::AgfsClient, src: &str, dst: &str) -> String {
    if fs.is_directory(dst) {
        path::join(dst, path::basename(src))
    } else {
        dst.to_string()
    }
}

// ---------------------------------------------------------------------------
// tail / tailf
// ---------------------------------------------------------------------------

/// Last N lines. With a file, reads only the trailing chunk via a ranged
/// request; without one, consumes stdin.
pub fn tail(process: &mut Process) -> i32 {
    let (n, rest) = match super::parse_count(&process.args, 10) {
        Ok(parsed) => parsed,
        Err(msg) => {
            process.stderr.write_str(&format!("tail: {msg}\n"));
            return 2;
        }
    };

    let data = match rest.first() {
        None => process.stdin.read_to_end(),
        Some(raw) => {
            let file = &path::resolve(raw, &process.cwd);
            let fs = Rc::clone(&process.fs);
            let info = match fs.stat(file) {
                Ok(info) => info,
                Err(e) => {
                    process.report(file, &e);
                    return 1;
                }
            };
            if info.is_dir {
                process
                    .stderr
                    .write_str(&format!("tail: {file}: Is a directory\n"));
                return 1;
            }
            if info.size == 0 {
                return 0;
            }
            let chunk = info.size.min(READ_CHUNK as u64);
            match fs.cat(file, info.size - chunk, chunk as i64) {
                Ok(data) => data,
                Err(e) => {
                    process.report(file, &e);
                    return 1;
                }
            }
        }
    };

    for line in last_lines(&data, n) {
        process.stdout.write(line);
    }
    if !data.is_empty() && !data.ends_with(b"\n") {
        process.stdout.write(b"\n");
    }
    0
}

/// The last `n` lines of a buffer, terminators preserved.
pub(crate) fn last_lines(data: &[u8], n: usize) -> Vec<&[u8]> {
    let lines: Vec<&[u8]> = data.split_inclusive(|&b| b == b'\n').collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}

/// Follow a file: print the last N lines, then poll for growth and stream
/// everything new. Polling adapts between 0.1s and 2s depending on
/// activity; a shrinking file (truncation) restarts from offset 0.
pub fn tailf(process: &mut Process) -> i32 {
    let (n, rest) = match super::parse_count(&process.args, 10) {
        Ok(parsed) => parsed,
        Err(msg) => {
            process.stderr.write_str(&format!("tailf: {msg}\n"));
            return 2;
        }
    };
    let Some(raw) = rest.first() else {
        return process.usage("[-n lines] <file>");
    };
    let file = path::resolve(raw, &process.cwd);

    let fs = Rc::clone(&process.fs);
    let info = match fs.stat(&file) {
        Ok(info) => info,
        Err(e) => {
            process.report(&file, &e);
            return 1;
        }
    };
    if info.is_dir {
        process
            .stderr
            .write_str(&format!("tailf: {file}: Is a directory\n"));
        return 1;
    }

    if info.size > 0 {
        let chunk = info.size.min(READ_CHUNK as u64);
        match fs.cat(&file, info.size - chunk, chunk as i64) {
            Ok(data) => {
                for line in last_lines(&data, n) {
                    process.stdout.write(line);
                }
                if !data.ends_with(b"\n") {
                    process.stdout.write(b"\n");
                }
                process.stdout.flush();
            }
            Err(e) => {
                process.report(&file, &e);
                return 1;
            }
        }
    }

    let mut offset = info.size;
    let mut poll = Duration::from_millis(1000);
    let mut idle = 0u32;

    loop {
        if sleep_interruptible(poll) {
            process.stdout.write(b"\n");
            return EXIT_INTERRUPTED;
        }

        let new_size = match fs.stat(&file) {
            Ok(info) => info.size,
            Err(e) => {
                process.report(&file, &e);
                return 1;
            }
        };

        if new_size > offset {
            match fs.cat(&file, offset, -1) {
                Ok(data) => {
                    process.stdout.write(&data);
                    process.stdout.flush();
                }
                Err(e) => {
                    process.report(&file, &e);
                    return 1;
                }
            }
            offset = new_size;
            idle = 0;
            poll = poll.mul_f64(0.8).max(Duration::from_millis(100));
        } else if new_size < offset {
            // Truncated: start over from the top.
            offset = 0;
            poll = Duration::from_millis(500);
        } else {
            idle += 1;
            if idle > 3 {
                poll = poll.mul_f64(1.2).min(Duration::from_millis(2000));
            }
        }
    }
}

/// Sleep in short slices so Ctrl-C is noticed promptly. Returns true when
/// interrupted.
fn sleep_interruptible(total: Duration) -> bool {
    let slice = Duration::from_millis(50);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if interrupt::interrupted() {
            return true;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    interrupt::interrupted()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
