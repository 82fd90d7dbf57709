//! External builder process adapter.
//!
//! The process is spawned once and kept alive. Requests are written to its
//! stdin as one JSON object per line and answered on stdout the same way:
//!
//! ```text
//! -> {"id":1,"op":"compile","path":"/srv/www/lib/a.js","flags":{...}}
//! <- {"id":1,"ok":{"source":"...","sourceMap":{...},"moduleGraph":{...}}}
//! <- {"id":2,"error":"Unexpected token in lib/b.js"}
//! ```
//!
//! Replies may arrive out of order; they are matched to requests by `id`.
//! Builders of this kind are assumed not to be re-entrant for a given path,
//! so the coordinator coalesces concurrent builds in front of them.

use super::{BuildFlags, BuildResult, InvalidateTarget, ModuleBuilder, ModuleGraph};
use crate::config::CommandSpec;
use crate::error::{BuildError, Result, ResultExt};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};

type Pending = Arc<DashMap<u64, oneshot::Sender<Reply>>>;

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    Compile {
        path: &'a Path,
        flags: &'a BuildFlags,
    },
    Bundle {
        path: &'a Path,
        flags: &'a BuildFlags,
    },
    Trace {
        path: &'a Path,
    },
    Invalidate {
        target: &'a InvalidateTarget,
    },
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: Request<'a>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    #[serde(default)]
    ok: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Builder backed by a long-lived child process.
pub struct CommandBuilder {
    program: String,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    // Held so the child is killed when the builder is dropped
    _child: Child,
}

impl CommandBuilder {
    /// Check whether `spec.program` can be executed.
    ///
    /// Programs containing a path separator are checked directly, bare names
    /// are looked up on `PATH`.
    pub fn is_available(spec: &CommandSpec) -> bool {
        let program = Path::new(&spec.program);
        if program.components().count() > 1 {
            return program.is_file();
        }

        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| {
                    let candidate = dir.join(program);
                    candidate.is_file()
                        || (cfg!(windows) && candidate.with_extension("exe").is_file())
                })
            })
            .unwrap_or(false)
    }

    /// Spawn the builder process with `root` as its working directory.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(spec: &CommandSpec, root: &Path) -> Result<Self> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .context(format!("Failed to spawn builder '{}'", spec.program))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BuildError::External("builder stdio was not captured".to_string()).into());
        };

        let pending: Pending = Arc::new(DashMap::new());
        let reader_pending = Arc::clone(&pending);
        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::clone(&closed);
        let program = spec.program.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<Reply>(&line) {
                        Ok(reply) => {
                            if let Some((_, tx)) = reader_pending.remove(&reply.id) {
                                let _ = tx.send(reply);
                            } else {
                                tracing::warn!("Builder '{}' replied to unknown request {}", program, reply.id);
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Ignoring malformed reply from builder '{}': {}", program, e);
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read from builder '{}': {}", program, e);
                        break;
                    }
                }
            }
            tracing::debug!("Builder '{}' closed its output", program);
            // Dropping the senders fails every request still waiting
            reader_closed.store(true, Ordering::SeqCst);
            reader_pending.clear();
        });

        tracing::debug!("Started builder '{}' in {}", spec.program, root.display());

        Ok(Self {
            program: spec.program.clone(),
            stdin: Mutex::new(stdin),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            _child: child,
        })
    }

    async fn request<T: DeserializeOwned>(&self, request: Request<'_>) -> Result<T, BuildError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Envelope { id, request })
            .map_err(|e| BuildError::External(format!("failed to encode request: {}", e)))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(BuildError::External(format!("'{}' exited", self.program)));
        }

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.remove(&id);
            return Err(BuildError::External(format!(
                "failed to write to '{}': {}",
                self.program, e
            )));
        }

        let reply = rx
            .await
            .map_err(|_| BuildError::External(format!("'{}' exited", self.program)))?;

        if let Some(message) = reply.error {
            return Err(BuildError::Custom(message));
        }
        serde_json::from_value(reply.ok.unwrap_or(serde_json::Value::Null)).map_err(|e| {
            BuildError::External(format!("invalid reply from '{}': {}", self.program, e))
        })
    }
}

#[async_trait]
impl ModuleBuilder for CommandBuilder {
    async fn compile(&self, path: &Path, flags: &BuildFlags) -> Result<BuildResult, BuildError> {
        self.request(Request::Compile { path, flags }).await
    }

    async fn bundle(&self, path: &Path, flags: &BuildFlags) -> Result<BuildResult, BuildError> {
        self.request(Request::Bundle { path, flags }).await
    }

    async fn invalidate(&self, target: InvalidateTarget) {
        if let Err(e) = self
            .request::<()>(Request::Invalidate { target: &target })
            .await
        {
            tracing::warn!("Builder '{}' failed to invalidate: {}", self.program, e);
        }
    }

    async fn trace(&self, path: &Path) -> Result<ModuleGraph, BuildError> {
        self.request(Request::Trace { path }).await
    }

    fn is_reentrant(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

impl std::fmt::Debug for CommandBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("program", &self.program)
            .field("pending", &self.pending.len())
            .finish()
    }
}
