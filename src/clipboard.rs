//! Clipboard copy with a legacy fallback.
//!
//! The primary path pipes the text into the platform's clipboard tool
//! (`pbcopy`, `wl-copy`, `xclip`, `xsel` or `clip`). When no tool is found or
//! the tool fails, the text is sent through the OSC 52 terminal escape
//! sequence, which most modern terminals (and tmux with `set-clipboard on`)
//! turn into a clipboard write, including over SSH.

use crate::error::ClipboardError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Something that can receive text.
pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<(), ClipboardError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Which path ended up accepting the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMethod {
    Primary,
    Fallback,
}

/// Try `primary`, then `fallback`. Returns the primary's error only when both fail.
pub fn copy_with_fallback(
    primary: &dyn Clipboard,
    fallback: &dyn Clipboard,
    text: &str,
) -> Result<CopyMethod, ClipboardError> {
    match primary.copy(text) {
        Ok(()) => Ok(CopyMethod::Primary),
        Err(primary_err) => {
            warn!(
                "Clipboard '{}' failed ({}); trying '{}'",
                primary.name(),
                primary_err,
                fallback.name()
            );
            fallback
                .copy(text)
                .map(|()| CopyMethod::Fallback)
                .map_err(|fallback_err| {
                    debug!("Fallback clipboard failed: {}", fallback_err);
                    primary_err
                })
        }
    }
}

// ── Platform command ─────────────────────────────────────────────────────────

/// Program name and its arguments.
type Candidate = (&'static str, &'static [&'static str]);

/// Pipes text into an external clipboard program.
#[derive(Debug, Clone)]
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
}

impl CommandClipboard {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// The first clipboard tool found on `PATH` for this platform.
    pub fn detect() -> Result<Self, ClipboardError> {
        const MACOS: &[Candidate] = &[("pbcopy", &[])];
        const WINDOWS: &[Candidate] = &[("clip", &[])];
        const WAYLAND: &[Candidate] = &[
            ("wl-copy", &[]),
            ("xclip", &["-selection", "clipboard"]),
            ("xsel", &["--clipboard", "--input"]),
        ];
        const X11: &[Candidate] = &[
            ("xclip", &["-selection", "clipboard"]),
            ("xsel", &["--clipboard", "--input"]),
            ("wl-copy", &[]),
        ];

        let candidates = match std::env::consts::OS {
            "macos" => MACOS,
            "windows" => WINDOWS,
            _ if std::env::var_os("WAYLAND_DISPLAY").is_some() => WAYLAND,
            _ => X11,
        };

        candidates
            .iter()
            .find(|(program, _)| on_path(program))
            .map(|(program, args)| Self::new(*program, args))
            .ok_or_else(|| {
                ClipboardError::Unavailable(format!(
                    "none of {} found on PATH",
                    candidates
                        .iter()
                        .map(|(p, _)| *p)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

impl Clipboard for CommandClipboard {
    fn copy(&self, text: &str) -> Result<(), ClipboardError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ClipboardError::Unavailable(format!("{}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| ClipboardError::WriteFailed(format!("{}: {e}", self.program)))?;
        }

        // Tools like xclip and wl-copy fork a server that keeps stderr open,
        // so stderr is only read once the tool itself has failed.
        let status = child
            .wait()
            .map_err(|e| ClipboardError::WriteFailed(format!("{}: {e}", self.program)))?;
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(ClipboardError::WriteFailed(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }
        debug!("Copied {} bytes via {}", text.len(), self.program);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

fn on_path(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    let exe = if cfg!(windows) {
        format!("{program}.exe")
    } else {
        program.to_string()
    };
    std::env::split_paths(&paths).any(|dir| dir.join(&exe).is_file())
}

// ── OSC 52 ───────────────────────────────────────────────────────────────────

/// Writes the OSC 52 "set clipboard" sequence to a terminal stream.
pub struct Osc52Clipboard<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> Osc52Clipboard<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Osc52Clipboard<std::io::Stderr> {
    /// OSC 52 on stderr, leaving stdout free for piped output.
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

/// The escape sequence that sets the system clipboard to `text`.
pub fn osc52_sequence(text: &str) -> String {
    format!("\x1b]52;c;{}\x07", STANDARD.encode(text.as_bytes()))
}

impl<W: Write + Send> Clipboard for Osc52Clipboard<W> {
    fn copy(&self, text: &str) -> Result<(), ClipboardError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| ClipboardError::WriteFailed("terminal writer lock poisoned".into()))?;
        out.write_all(osc52_sequence(text).as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| ClipboardError::WriteFailed(e.to_string()))
    }

    fn name(&self) -> &str {
        "osc52"
    }
}
