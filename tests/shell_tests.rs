//! End-to-end engine tests against an in-process mock AGFS server.
//!
//! The mock (tiny_http, one thread) implements the slice of the server
//! API the shell exercises: health, directories, stat, files with ranged
//! reads, rename, chmod, grep, and mounts. File state lives in a shared
//! map so tests can seed and inspect the remote side directly.
//!
//! Write responses normally carry a message (which redirect chains feed
//! forward); paths under `/quiet/` respond with an empty message to
//! exercise the chain-abort guard.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tiny_http::{Header, Method, Response, Server, StatusCode};

use agfs_shell::client::AgfsClient;
use agfs_shell::engine::Shell;

// ---------------------------------------------------------------------------
// Mock AGFS server
// ---------------------------------------------------------------------------

const MTIME: &str = "2025-06-01T12:00:00Z";

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

struct MockAgfs {
    url: String,
    state: Arc<Mutex<State>>,
}

impl MockAgfs {
    fn start() -> Self {
        let server = Server::http("127.0.0.1:0").expect("bind mock server");
        let port = server
            .server_addr()
            .to_ip()
            .expect("expected an IP listener")
            .port();

        let state = Arc::new(Mutex::new(State::default()));
        state.lock().unwrap().dirs.insert("/".to_string());

        let thread_state = Arc::clone(&state);
        std::thread::spawn(move || {
            for mut request in server.incoming_requests() {
                let method = request.method().clone();
                let url = request.url().to_string();
                let mut body = Vec::new();
                let _ = request.as_reader().read_to_end(&mut body);
                let response = handle(&thread_state, &method, &url, &body);
                let _ = request.respond(response);
            }
        });

        MockAgfs {
            url: format!("http://127.0.0.1:{port}/api/v1"),
            state,
        }
    }

    fn shell(&self) -> Shell {
        Shell::new(AgfsClient::new(&self.url, Duration::from_secs(5)))
    }

    fn seed_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        insert_dir_chain(&mut state.dirs, path);
    }

    fn seed_file(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        insert_dir_chain(&mut state.dirs, parent(path));
        state.files.insert(path.to_string(), content.to_vec());
    }

    fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }
}

fn insert_dir_chain(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        dirs.insert(current.clone());
    }
    dirs.insert("/".to_string());
}

fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn handle(
    state: &Arc<Mutex<State>>,
    method: &Method,
    url: &str,
    body: &[u8],
) -> Response<Cursor<Vec<u8>>> {
    let (route, query) = url.split_once('?').unwrap_or((url, ""));
    let route = route.strip_prefix("/api/v1").unwrap_or(route);
    let params = parse_query(query);
    let fs_path = params.get("path").cloned().unwrap_or_else(|| "/".to_string());
    let mut state = state.lock().unwrap();

    match (method, route) {
        (&Method::Get, "/health") => {
            json_response(200, r#"{"version":"mock","gitCommit":"0000000"}"#)
        }

        (&Method::Get, "/directories") => {
            if state.files.contains_key(&fs_path) {
                return json_response(500, r#"{"error":"not a directory"}"#);
            }
            if !state.dirs.contains(&fs_path) {
                return json_response(404, r#"{"error":"no such file or directory"}"#);
            }
            let mut entries = Vec::new();
            for dir in &state.dirs {
                if dir != &fs_path && parent(dir) == fs_path {
                    entries.push(entry_json(basename(dir), true, 0));
                }
            }
            for (file, content) in &state.files {
                if parent(file) == fs_path {
                    entries.push(entry_json(basename(file), false, content.len()));
                }
            }
            json_response(200, &format!(r#"{{"files":[{}]}}"#, entries.join(",")))
        }

        (&Method::Post, "/directories") => {
            insert_dir_chain(&mut state.dirs, &fs_path);
            json_response(200, &entry_json(basename(&fs_path), true, 0))
        }

        (&Method::Get, "/stat") => {
            if let Some(content) = state.files.get(&fs_path) {
                json_response(200, &entry_json(basename(&fs_path), false, content.len()))
            } else if state.dirs.contains(&fs_path) {
                json_response(200, &entry_json(basename(&fs_path), true, 0))
            } else {
                json_response(404, r#"{"error":"no such file or directory"}"#)
            }
        }

        (&Method::Get, "/files") => {
            let Some(content) = state.files.get(&fs_path) else {
                return json_response(404, r#"{"error":"no such file or directory"}"#);
            };
            let offset: usize = params
                .get("offset")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let size: i64 = params
                .get("size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(-1);
            let start = offset.min(content.len());
            let end = if size < 0 {
                content.len()
            } else {
                (start + size as usize).min(content.len())
            };
            Response::from_data(content[start..end].to_vec()).with_status_code(StatusCode(200))
        }

        (&Method::Put, "/files") => {
            state.files.insert(fs_path.clone(), body.to_vec());
            let message = if fs_path.starts_with("/quiet/") {
                String::new()
            } else {
                format!("wrote {} bytes", body.len())
            };
            json_response(200, &format!(r#"{{"message":"{message}"}}"#))
        }

        (&Method::Post, "/files") => {
            state.files.entry(fs_path.clone()).or_default();
            json_response(200, &entry_json(basename(&fs_path), false, 0))
        }

        (&Method::Delete, "/files") => {
            if state.files.remove(&fs_path).is_none() && !state.dirs.remove(&fs_path) {
                return json_response(404, r#"{"error":"no such file or directory"}"#);
            }
            json_response(200, r#"{"message":"removed"}"#)
        }

        (&Method::Post, "/rename") => {
            let new_path: String = serde_json::from_slice::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v.get("newPath").and_then(|p| p.as_str()).map(str::to_string))
                .unwrap_or_default();
            match state.files.remove(&fs_path) {
                Some(content) => {
                    state.files.insert(new_path, content);
                    json_response(200, r#"{"message":"renamed"}"#)
                }
                None => json_response(404, r#"{"error":"no such file or directory"}"#),
            }
        }

        (&Method::Post, "/chmod") => json_response(200, r#"{"message":"ok"}"#),
        (&Method::Post, "/grep") => {
            json_response(200, r#"{"matches":[],"totalMatches":0,"filesSearched":0}"#)
        }
        (&Method::Get, "/mounts") => json_response(200, r#"{"mounts":[]}"#),

        _ => json_response(404, r#"{"error":"unknown endpoint"}"#),
    }
}

fn entry_json(name: &str, is_dir: bool, size: usize) -> String {
    format!(
        r#"{{"name":"{name}","isDir":{is_dir},"size":{size},"mode":{},"modTime":"{MTIME}"}}"#,
        if is_dir { 0o755 } else { 0o644 }
    )
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

fn json_response(status: u16, body: &str) -> Response<Cursor<Vec<u8>>> {
    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
    Response::from_data(body.as_bytes().to_vec())
        .with_header(header)
        .with_status_code(StatusCode(status))
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Pipelines and expansion
// ---------------------------------------------------------------------------

#[test]
fn basic_pipeline_echo_grep() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("echo \"hello world\" | grep hello");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "hello world\n");
}

#[test]
fn echo_through_cat_round_trip() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("echo X | cat");
    assert_eq!(code, 0);
    assert_eq!(out, b"X\n");
}

#[test]
fn three_stage_pipeline_counts_lines() {
    let server = MockAgfs::start();
    server.seed_file("/t/lines.txt", b"alpha\nbeta\nalpha beta\n");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("cat /t/lines.txt | grep alpha | wc -l");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out).trim(), "2");
}

#[test]
fn grep_no_match_exits_one() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("echo nope | grep missing");
    assert_eq!(code, 1);
}

#[test]
fn unknown_command_exits_127() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("definitely-not-a-command");
    assert_eq!(code, 127);
}

#[test]
fn command_substitution_and_assignment() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("N=$(echo 3); echo $N");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "3\n");
}

#[test]
fn exit_code_variable_tracks_last_statement() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (_, out) = shell.run_captured("test -f /missing\necho $?");
    assert_eq!(String::from_utf8_lossy(&out), "1\n");

    let (_, out) = shell.run_captured("echo fine > /t2/x.txt\necho $?");
    // /t2 does not exist as a directory but the mock accepts any PUT.
    assert_eq!(String::from_utf8_lossy(&out), "0\n");
}

#[test]
fn single_quotes_suppress_variable_expansion() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (_, out) = shell.run_captured("V=abc; echo '$V' \"$V\"");
    assert_eq!(String::from_utf8_lossy(&out), "$V abc\n");
}

// ---------------------------------------------------------------------------
// Redirections
// ---------------------------------------------------------------------------

#[test]
fn overwrite_then_append_then_read() {
    let server = MockAgfs::start();
    server.seed_dir("/t");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("echo one > /t/a.txt");
    assert_eq!(code, 0);
    let (code, _) = shell.run_captured("echo two >> /t/a.txt");
    assert_eq!(code, 0);

    let (code, out) = shell.run_captured("cat /t/a.txt");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "one\ntwo\n");
    assert_eq!(server.file("/t/a.txt").unwrap(), b"one\ntwo\n");
}

#[test]
fn append_to_absent_file_behaves_as_overwrite() {
    let server = MockAgfs::start();
    server.seed_dir("/t");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("echo fresh >> /t/new.txt");
    assert_eq!(code, 0);
    assert_eq!(server.file("/t/new.txt").unwrap(), b"fresh\n");
}

#[test]
fn stdin_redirection_feeds_stage() {
    let server = MockAgfs::start();
    server.seed_file("/t/in.txt", b"keep this\ndrop that\n");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("grep keep < /t/in.txt");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "keep this\n");
}

#[test]
fn redirect_chain_feeds_write_response_forward() {
    let server = MockAgfs::start();
    server.seed_dir("/t");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("echo A > /t/c1 > /t/c2");
    assert_eq!(code, 0);
    assert_eq!(server.file("/t/c1").unwrap(), b"A\n");
    // The second link receives the first write's response body.
    assert_eq!(server.file("/t/c2").unwrap(), b"wrote 2 bytes");
}

#[test]
fn redirect_chain_aborts_on_empty_response() {
    let server = MockAgfs::start();
    server.seed_dir("/quiet");
    server.seed_dir("/t");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("echo A > /quiet/f1 > /t/f2");
    assert_eq!(code, 1);
    assert_eq!(server.file("/quiet/f1").unwrap(), b"A\n");
    assert!(server.file("/t/f2").is_none(), "chain must stop before f2");
}

#[test]
fn empty_final_response_is_legal() {
    let server = MockAgfs::start();
    server.seed_dir("/quiet");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("echo A > /quiet/only");
    assert_eq!(code, 0);
    assert_eq!(server.file("/quiet/only").unwrap(), b"A\n");
}

#[test]
fn stderr_redirection_captures_diagnostics() {
    let server = MockAgfs::start();
    server.seed_dir("/t");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("cat /t/none.txt 2> /t/err.txt");
    assert_eq!(code, 1);
    assert!(out.is_empty());
    let err = server.file("/t/err.txt").unwrap();
    let err = String::from_utf8_lossy(&err);
    assert!(err.contains("No such file or directory"), "got: {err}");
}

// ---------------------------------------------------------------------------
// Globs and control flow
// ---------------------------------------------------------------------------

#[test]
fn for_loop_over_glob_matches() {
    let server = MockAgfs::start();
    server.seed_file("/d/x1.log", b"one");
    server.seed_file("/d/x2.log", b"two");
    server.seed_file("/d/notes.txt", b"skip");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("for f in /d/*.log; do echo $f; done");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "/d/x1.log\n/d/x2.log\n");
}

#[test]
fn glob_expands_sorted_for_command_args() {
    let server = MockAgfs::start();
    server.seed_file("/d/b.txt", b"B\n");
    server.seed_file("/d/a.txt", b"A\n");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("cat /d/*.txt");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "A\nB\n");
}

#[test]
fn glob_without_match_aborts_command() {
    let server = MockAgfs::start();
    server.seed_file("/d/a.txt", b"A\n");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("cat /d/*.zip");
    assert_eq!(code, 1);
    assert!(out.is_empty());
}

#[test]
fn if_test_selects_then_branch() {
    let server = MockAgfs::start();
    server.seed_file("/etc/hosts", b"127.0.0.1 localhost\n");
    let mut shell = server.shell();

    let (code, out) =
        shell.run_captured("if test -f /etc/hosts; then echo yes; else echo no; fi");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "yes\n");
    assert_eq!(shell.env.borrow().get("?").unwrap(), "0");
}

#[test]
fn if_test_selects_else_branch() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (_, out) = shell.run_captured("if test -f /absent; then echo yes; else echo no; fi");
    assert_eq!(String::from_utf8_lossy(&out), "no\n");
}

#[test]
fn multi_line_for_block_in_source() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let source = "for x in 1 2 3\ndo\necho item $x\ndone";
    let (code, out) = shell.run_captured(source);
    assert_eq!(code, 0);
    assert_eq!(
        String::from_utf8_lossy(&out),
        "item 1\nitem 2\nitem 3\n"
    );
}

#[test]
fn nested_for_loops() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let source = "for a in 1 2; do for b in x y; do echo $a$b; done; done";
    let (code, out) = shell.run_captured(source);
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "1x\n1y\n2x\n2y\n");
}

#[test]
fn for_loop_variable_persists_after_loop() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (_, out) = shell.run_captured("for v in a b; do echo $v; done\necho last=$v");
    assert_eq!(String::from_utf8_lossy(&out), "a\nb\nlast=b\n");
}

// ---------------------------------------------------------------------------
// Here-docs
// ---------------------------------------------------------------------------

#[test]
fn heredoc_to_grep_case_insensitive() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let source = "grep -i error <<EOF\nInfo: ok\nERROR: boom\ndone\nEOF";
    let (code, out) = shell.run_captured(source);
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "ERROR: boom\n");
}

#[test]
fn heredoc_body_is_literal_until_delimiter() {
    let server = MockAgfs::start();
    server.seed_dir("/t");
    let mut shell = server.shell();

    let source = "cat <<END > /t/doc.txt\nline one\nline two\nEND";
    let (code, _) = shell.run_captured(source);
    assert_eq!(code, 0);
    assert_eq!(server.file("/t/doc.txt").unwrap(), b"line one\nline two\n");
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

#[test]
fn cd_updates_cwd_and_relative_paths_follow() {
    let server = MockAgfs::start();
    server.seed_file("/d/x1.log", b"hello from x1\n");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("cd /d\npwd\ncat x1.log");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "/d\nhello from x1\n");
    assert_eq!(shell.cwd, "/d");
}

#[test]
fn cd_to_missing_directory_fails_and_keeps_cwd() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("cd /nowhere");
    assert_eq!(code, 1);
    assert_eq!(shell.cwd, "/");
}

#[test]
fn cd_inside_pipeline_is_rejected() {
    let server = MockAgfs::start();
    server.seed_dir("/d");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("cd /d | cat");
    assert_eq!(code, 1);
    assert_eq!(shell.cwd, "/", "pipeline cd must not change the session");
}

#[test]
fn export_and_unset_mutate_session_env() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (_, out) = shell.run_captured("export MODE=fast; echo $MODE");
    assert_eq!(String::from_utf8_lossy(&out), "fast\n");

    let (_, out) = shell.run_captured("unset MODE; echo [$MODE]");
    assert_eq!(String::from_utf8_lossy(&out), "[]\n");
}

#[test]
fn script_mode_stops_on_first_failure() {
    let server = MockAgfs::start();
    server.seed_dir("/t");
    let mut shell = server.shell();

    let script = "echo first > /t/s.txt\ncat /t/missing.txt\necho never >> /t/s.txt";
    let code = shell.run_source(script, true);
    assert_eq!(code, 1);
    assert_eq!(server.file("/t/s.txt").unwrap(), b"first\n");
}

#[test]
fn script_comments_and_blank_lines_are_skipped() {
    let server = MockAgfs::start();
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("# a comment\n\necho visible\n");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "visible\n");
}

// ---------------------------------------------------------------------------
// Remote listing behavior
// ---------------------------------------------------------------------------

#[test]
fn ls_directories_sort_before_files() {
    let server = MockAgfs::start();
    server.seed_dir("/top/sub");
    server.seed_file("/top/file.txt", b"x");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("ls /top");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "sub/\nfile.txt\n");
}

#[test]
fn ls_of_file_reports_not_a_directory() {
    let server = MockAgfs::start();
    server.seed_file("/t/plain.txt", b"x");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("ls /t/plain.txt");
    assert_eq!(code, 1);
}

#[test]
fn tail_reads_only_trailing_lines() {
    let server = MockAgfs::start();
    let body: String = (1..=50).map(|i| format!("line {i}\n")).collect();
    server.seed_file("/t/big.txt", body.as_bytes());
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("tail -n 2 /t/big.txt");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "line 49\nline 50\n");
}

#[test]
fn tee_writes_files_and_passes_through() {
    let server = MockAgfs::start();
    server.seed_dir("/t");
    let mut shell = server.shell();

    let (code, out) = shell.run_captured("echo data | tee /t/t1.txt /t/t2.txt");
    assert_eq!(code, 0);
    assert_eq!(String::from_utf8_lossy(&out), "data\n");
    assert_eq!(server.file("/t/t1.txt").unwrap(), b"data\n");
    assert_eq!(server.file("/t/t2.txt").unwrap(), b"data\n");
}

#[test]
fn cp_copies_within_remote() {
    let server = MockAgfs::start();
    server.seed_file("/t/src.txt", b"payload");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("cp /t/src.txt /t/dst.txt");
    assert_eq!(code, 0);
    assert_eq!(server.file("/t/dst.txt").unwrap(), b"payload");
}

#[test]
fn mv_renames_remote_file() {
    let server = MockAgfs::start();
    server.seed_file("/t/old.txt", b"payload");
    let mut shell = server.shell();

    let (code, _) = shell.run_captured("mv /t/old.txt /t/new.txt");
    assert_eq!(code, 0);
    assert!(server.file("/t/old.txt").is_none());
    assert_eq!(server.file("/t/new.txt").unwrap(), b"payload");
}
