//! Redirection application: `>`/`>>` chains and `2>`/`2>>`.
//!
//! A stage's output redirections form an ordered chain. The first write
//! sends the stage's captured output; every later write sends the
//! *response body* of the write before it, which turns multi-step
//! remote-to-remote transforms (query files, queues) into one line:
//!
//! ```text
//! echo 'select 1' > /sqlfs/query > /local/result.json
//! ```
//!
//! When an intermediate write returns an empty response there is nothing
//! to feed the next link, so the chain aborts with a diagnostic. The final
//! write may legally return an empty body. Append (`>>`) links read the
//! current remote content and write back the concatenation; an absent file
//! appends as a plain write.

use crate::client::AgfsClient;
use crate::parser::RedirOp;

/// One resolved redirection: operator plus an absolute target path.
#[derive(Debug, Clone)]
pub struct Planned {
    pub op: RedirOp,
    pub target: String,
}

/// Apply an ordered chain of output redirections.
///
/// Returns a user-facing diagnostic on failure; the remote may be left
/// mid-chain (writes are not compensated).
pub fn apply_chain(fs: &AgfsClient, content: &[u8], chain: &[Planned]) -> Result<(), String> {
    let mut current: Vec<u8> = content.to_vec();
    let total = chain.len();

    for (index, redirect) in chain.iter().enumerate() {
        let response = if redirect.op.appends() {
            fs.write_append(&redirect.target, &current)
        } else {
            fs.write(&redirect.target, &current)
        };

        let message = match response {
            Ok(message) => message,
            Err(e) => {
                let mut diag = format!("{}: {e}", redirect.target);
                if index + 1 < total {
                    diag.push_str(&format!(" (chain stopped at redirect {}/{total})", index + 1));
                }
                return Err(diag);
            }
        };

        if index + 1 < total {
            if message.is_empty() {
                return Err(format!(
                    "write to {} returned no response; redirect chain stopped at {}/{total}",
                    redirect.target,
                    index + 1
                ));
            }
            current = message.into_bytes();
        }
    }
    Ok(())
}
