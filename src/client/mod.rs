//! AGFS HTTP API client.
//!
//! A thin synchronous client for the AGFS (Agent File System) server,
//! built on `ureq`. The shell talks to the server exclusively through this
//! surface:
//!
//! - **Files**: `cat` (ranged and streaming), `write` (buffered and
//!   chunked-streaming), `create`, `rm`, `mv`, `chmod`
//! - **Directories**: `ls`, `mkdir`, `stat`
//! - **Search**: `grep` (server-side, used for recursive searches)
//! - **Plugins**: `mounts`, `mount`, `unmount`, `load_plugin`,
//!   `unload_plugin`, `list_plugins`
//!
//! All paths passed to this client are absolute and normalized; relative
//! path handling lives in the shell layers above.

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Read chunk size for streaming downloads.
pub const READ_CHUNK: usize = 8 * 1024;

/// Write chunk size for streaming uploads.
pub const WRITE_CHUNK: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors surfaced by the AGFS client, mapped from HTTP status codes and
/// transport failures into the classes the shell reports to the user.
#[derive(Debug, Error)]
pub enum AgfsError {
    #[error("No such file or directory")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    /// 400 with the server's own message extracted from the JSON body.
    #[error("{0}")]
    BadRequest(String),

    #[error("Not a directory")]
    NotADirectory,

    /// Any other non-2xx response.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// Connection refused, DNS failure, broken pipe.
    #[error("AGFS server not running at {0}")]
    Transport(String),

    #[error("Request timeout after {0}s")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, AgfsError>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A directory entry or stat result.
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "isDir")]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mode: u32,
    #[serde(default, rename = "modTime")]
    pub mod_time: String,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// A mounted plugin as reported by `GET /mounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct Mount {
    #[serde(default)]
    pub path: String,
    #[serde(default, rename = "pluginName")]
    pub plugin_name: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// A single match from server-side grep.
#[derive(Debug, Clone, Deserialize)]
pub struct GrepMatch {
    #[serde(default)]
    pub file: String,
    #[serde(default, rename = "lineNumber")]
    pub line_number: u64,
    #[serde(default)]
    pub line: String,
}

/// Result of a server-side grep: the matches plus a summary.
#[derive(Debug, Clone, Deserialize)]
pub struct GrepResult {
    #[serde(default)]
    pub matches: Vec<GrepMatch>,
    #[serde(default, rename = "filesSearched")]
    pub files_searched: u64,
    #[serde(default, rename = "totalMatches")]
    pub total_matches: u64,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(default)]
    files: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct MountsResponse {
    #[serde(default)]
    mounts: Vec<Mount>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct PluginsResponse {
    #[serde(default)]
    plugins: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Synchronous AGFS API client.
///
/// One instance is shared by the whole shell session; `ureq::Agent` keeps a
/// connection pool underneath, so consecutive calls reuse the socket. The
/// client itself holds no per-call state.
///
/// Retry policy: idempotent reads are retried once on transport failure;
/// writes are never retried, so `>>` keeps append-exactly-once semantics.
pub struct AgfsClient {
    agent: ureq::Agent,
    api_base: String,
    timeout: Duration,
}

impl AgfsClient {
    /// Build a client for the given API base URL
    /// (e.g. `http://localhost:8080/api/v1`).
    pub fn new(api_base_url: &str, timeout: Duration) -> Self {
        Self {
            // No agent-level timeout: streaming cat/write must be able to
            // run indefinitely. Non-streaming calls set one per request.
            agent: ureq::AgentBuilder::new().build(),
            api_base: api_base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// The API base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.api_base
    }

    /// `host:port` portion of the base URL, for error messages.
    pub fn host(&self) -> String {
        host_of(&self.api_base)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base, endpoint)
    }

    // -- request plumbing ---------------------------------------------------

    /// Perform a GET, retrying once on a transport failure.
    fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<ureq::Response> {
        let mut attempts = 0;
        loop {
            let mut req = self.agent.get(&self.url(endpoint)).timeout(self.timeout);
            for (k, v) in params {
                req = req.query(k, v);
            }
            match req.call() {
                Ok(resp) => return Ok(resp),
                Err(ureq::Error::Transport(t)) if attempts == 0 => {
                    let _ = t;
                    attempts += 1;
                }
                Err(e) => return Err(self.map_error(e)),
            }
        }
    }

    fn map_error(&self, err: ureq::Error) -> AgfsError {
        match err {
            ureq::Error::Status(status, resp) => {
                let message = extract_error_message(resp);
                match status {
                    404 => AgfsError::NotFound,
                    403 => AgfsError::PermissionDenied,
                    400 => AgfsError::BadRequest(if message.is_empty() {
                        "Bad request".to_string()
                    } else {
                        message
                    }),
                    _ => AgfsError::Server {
                        status,
                        message: if message.is_empty() {
                            format!("HTTP error {status}")
                        } else {
                            message
                        },
                    },
                }
            }
            ureq::Error::Transport(t) => {
                if t.kind() == ureq::ErrorKind::Io
                    && t.to_string().to_lowercase().contains("timed out")
                {
                    AgfsError::Timeout(self.timeout.as_secs())
                } else {
                    AgfsError::Transport(self.host())
                }
            }
        }
    }

    // -- health -------------------------------------------------------------

    /// `GET /health` — server metadata (version, commit, build time).
    pub fn health(&self) -> Result<serde_json::Value> {
        let resp = self.get("/health", &[])?;
        resp.into_json().map_err(|_| AgfsError::Server {
            status: 200,
            message: "malformed health response".to_string(),
        })
    }

    // -- directories --------------------------------------------------------

    /// `GET /directories` — list a directory.
    ///
    /// A 500 here means the path names a file, which the shell reports as
    /// "Not a directory".
    pub fn ls(&self, path: &str) -> Result<Vec<Entry>> {
        let resp = match self.get("/directories", &[("path", path)]) {
            Ok(resp) => resp,
            Err(AgfsError::Server { status: 500, .. }) => return Err(AgfsError::NotADirectory),
            Err(e) => return Err(e),
        };
        let body: FilesResponse = resp
            .into_json()
            .map_err(|e| malformed("directory listing", e))?;
        Ok(body.files)
    }

    /// `POST /directories` — create a directory.
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<Entry> {
        let mode = format!("{mode:o}");
        let resp = self
            .agent
            .post(&self.url("/directories"))
            .timeout(self.timeout)
            .query("path", path)
            .query("mode", &mode)
            .call()
            .map_err(|e| self.map_error(e))?;
        resp.into_json().map_err(|e| malformed("mkdir response", e))
    }

    /// `GET /stat` — file or directory metadata.
    pub fn stat(&self, path: &str) -> Result<Entry> {
        let resp = self.get("/stat", &[("path", path)])?;
        resp.into_json().map_err(|e| malformed("stat response", e))
    }

    // -- files --------------------------------------------------------------

    /// `GET /files` — read file content, optionally a byte range.
    ///
    /// `size = -1` reads to EOF.
    pub fn cat(&self, path: &str, offset: u64, size: i64) -> Result<Vec<u8>> {
        let offset_s = offset.to_string();
        let size_s = size.to_string();
        let mut params: Vec<(&str, &str)> = vec![("path", path)];
        if offset > 0 {
            params.push(("offset", &offset_s));
        }
        if size >= 0 {
            params.push(("size", &size_s));
        }
        let resp = self.get("/files", &params)?;
        let mut buf = Vec::new();
        resp.into_reader()
            .read_to_end(&mut buf)
            .map_err(|_| AgfsError::Transport(self.host()))?;
        Ok(buf)
    }

    /// `GET /files?stream=true` — open a streaming read.
    ///
    /// Returns a reader over the response body with no internal buffering
    /// beyond the transport's; dropping it releases the connection. No
    /// timeout is applied, the stream may run indefinitely.
    pub fn cat_stream(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let resp = self
            .agent
            .get(&self.url("/files"))
            .query("path", path)
            .query("stream", "true")
            .call()
            .map_err(|e| self.map_error(e))?;
        Ok(Box::new(resp.into_reader()))
    }

    /// `PUT /files` — write a full byte buffer.
    ///
    /// Returns the server's response message, which backends may leave
    /// empty. Never retried.
    pub fn write(&self, path: &str, data: &[u8]) -> Result<String> {
        let resp = self
            .agent
            .put(&self.url("/files"))
            .timeout(self.timeout)
            .query("path", path)
            .send_bytes(data)
            .map_err(|e| self.map_error(e))?;
        let body: MessageResponse = resp.into_json().unwrap_or(MessageResponse {
            message: String::new(),
        });
        Ok(body.message)
    }

    /// `PUT /files` with a streaming body (chunked transfer encoding).
    pub fn write_stream(&self, path: &str, data: impl Read) -> Result<String> {
        let resp = self
            .agent
            .put(&self.url("/files"))
            .query("path", path)
            .send(data)
            .map_err(|e| self.map_error(e))?;
        let body: MessageResponse = resp.into_json().unwrap_or(MessageResponse {
            message: String::new(),
        });
        Ok(body.message)
    }

    /// `POST /files` — create an empty file.
    pub fn create(&self, path: &str) -> Result<Entry> {
        let resp = self
            .agent
            .post(&self.url("/files"))
            .timeout(self.timeout)
            .query("path", path)
            .call()
            .map_err(|e| self.map_error(e))?;
        resp.into_json()
            .map_err(|e| malformed("create response", e))
    }

    /// `DELETE /files` — remove a file or directory.
    pub fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        let mut req = self
            .agent
            .delete(&self.url("/files"))
            .timeout(self.timeout)
            .query("path", path);
        if recursive {
            req = req.query("recursive", "true");
        }
        req.call().map_err(|e| self.map_error(e))?;
        Ok(())
    }

    /// `POST /rename` — move or rename.
    pub fn mv(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.agent
            .post(&self.url("/rename"))
            .timeout(self.timeout)
            .query("path", old_path)
            .send_json(serde_json::json!({ "newPath": new_path }))
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    /// `POST /chmod` — change permissions.
    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.agent
            .post(&self.url("/chmod"))
            .timeout(self.timeout)
            .query("path", path)
            .send_json(serde_json::json!({ "mode": mode }))
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    // -- search -------------------------------------------------------------

    /// `POST /grep` — server-side regex search under a path.
    pub fn grep(
        &self,
        path: &str,
        pattern: &str,
        recursive: bool,
        case_insensitive: bool,
    ) -> Result<GrepResult> {
        let resp = self
            .agent
            .post(&self.url("/grep"))
            .timeout(self.timeout)
            .send_json(serde_json::json!({
                "path": path,
                "pattern": pattern,
                "recursive": recursive,
                "caseInsensitive": case_insensitive,
            }))
            .map_err(|e| self.map_error(e))?;
        resp.into_json().map_err(|e| malformed("grep response", e))
    }

    // -- plugins ------------------------------------------------------------

    /// `GET /mounts` — list mounted plugins.
    pub fn mounts(&self) -> Result<Vec<Mount>> {
        let resp = self.get("/mounts", &[])?;
        let body: MountsResponse = resp.into_json().map_err(|e| malformed("mount list", e))?;
        Ok(body.mounts)
    }

    /// `POST /mount` — mount a plugin at a path.
    pub fn mount(&self, fstype: &str, path: &str, config: serde_json::Value) -> Result<String> {
        let resp = self
            .agent
            .post(&self.url("/mount"))
            .timeout(self.timeout)
            .send_json(serde_json::json!({
                "fstype": fstype,
                "path": path,
                "config": config,
            }))
            .map_err(|e| self.map_error(e))?;
        let body: MessageResponse = resp.into_json().unwrap_or(MessageResponse {
            message: String::new(),
        });
        Ok(body.message)
    }

    /// `POST /unmount` — unmount the plugin at a path.
    pub fn unmount(&self, path: &str) -> Result<()> {
        self.agent
            .post(&self.url("/unmount"))
            .timeout(self.timeout)
            .send_json(serde_json::json!({ "path": path }))
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    /// `POST /plugins/load` — load an external plugin from a library path,
    /// HTTP(S) URL, or `pfs://` URL.
    pub fn load_plugin(&self, uri: &str) -> Result<serde_json::Value> {
        let resp = self
            .agent
            .post(&self.url("/plugins/load"))
            .timeout(self.timeout)
            .send_json(serde_json::json!({ "uri": uri }))
            .map_err(|e| self.map_error(e))?;
        resp.into_json()
            .map_err(|e| malformed("plugin load response", e))
    }

    /// `POST /plugins/unload` — unload an external plugin.
    pub fn unload_plugin(&self, uri: &str) -> Result<()> {
        self.agent
            .post(&self.url("/plugins/unload"))
            .timeout(self.timeout)
            .send_json(serde_json::json!({ "uri": uri }))
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    /// `GET /plugins` — list loaded external plugins.
    pub fn list_plugins(&self) -> Result<Vec<serde_json::Value>> {
        let resp = self.get("/plugins", &[])?;
        let body: PluginsResponse = resp.into_json().map_err(|e| malformed("plugin list", e))?;
        Ok(body.plugins)
    }

    // -- convenience --------------------------------------------------------

    /// Whether `path` exists on the server.
    pub fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }

    /// Whether `path` exists and is a directory.
    pub fn is_directory(&self, path: &str) -> bool {
        self.stat(path).map(|e| e.is_dir).unwrap_or(false)
    }

    /// Write with append semantics: read the current content if present,
    /// concatenate, write back. An absent file behaves like a plain write.
    pub fn write_append(&self, path: &str, data: &[u8]) -> Result<String> {
        let mut combined = match self.cat(path, 0, -1) {
            Ok(existing) => existing,
            Err(AgfsError::NotFound) => Vec::new(),
            Err(e) => return Err(e),
        };
        combined.extend_from_slice(data);
        self.write(path, &combined)
    }
}

/// Pull the server's `{"error": "..."}` message out of a failed response.
fn extract_error_message(resp: ureq::Response) -> String {
    match resp.into_json::<ErrorBody>() {
        Ok(body) => body.error,
        Err(_) => String::new(),
    }
}

fn malformed(what: &str, err: std::io::Error) -> AgfsError {
    AgfsError::Server {
        status: 200,
        message: format!("malformed {what}: {err}"),
    }
}

/// `host:port` portion of a URL, for "server not running" messages.
fn host_of(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    rest.split('/').next().unwrap_or(rest).to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
