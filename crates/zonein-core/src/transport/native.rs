//! Persistent channel to a native messaging host.
//!
//! The host is a child process speaking length-prefixed JSON over its
//! stdin/stdout, the same contract browsers use for native messaging. A reader
//! task drains the host's acknowledgements and marks the port disconnected
//! when the host goes away.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::TransportError;
use crate::framing::{read_frame, write_frame, FrameError, MAX_HOST_MESSAGE_LEN};

/// Registered name of the native messaging host
pub const NATIVE_HOST_NAME: &str = "com.zonein.host";

/// How to launch the native messaging host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHostConfig {
    pub name: String,
    pub program: PathBuf,
    /// Extra arguments; browsers pass the calling extension's origin here
    pub args: Vec<String>,
}

impl Default for NativeHostConfig {
    fn default() -> Self {
        Self {
            name: NATIVE_HOST_NAME.to_string(),
            program: PathBuf::from("zonein-host"),
            args: Vec::new(),
        }
    }
}

/// Live connection to a native host process
pub struct NativePort {
    child: Child,
    stdin: ChildStdin,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl NativePort {
    /// Launch the host and start watching its output
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Unavailable` if the host cannot be started
    pub fn connect(config: &NativeHostConfig) -> Result<Self, TransportError> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Unavailable(format!(
                    "native host '{}' ({}) could not be started: {e}",
                    config.name,
                    config.program.display()
                ))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::Unavailable(format!(
                "native host '{}' has no stdio pipes",
                config.name
            )));
        };

        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(watch_host_output(
            stdout,
            Arc::clone(&connected),
            config.name.clone(),
        ));

        log::info!("Connected to native messaging host '{}'", config.name);
        Ok(Self {
            child,
            stdin,
            connected,
            reader,
        })
    }

    /// False once the host closed its end of the channel or a write failed
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Write one framed message to the host
    ///
    /// # Errors
    ///
    /// Returns an error if the port is already disconnected or the write fails;
    /// a failed write also marks the port disconnected
    pub async fn post_message<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        if let Err(e) = write_frame(&mut self.stdin, message).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the channel, ignoring errors from an already-dead host
    pub fn disconnect(mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        if let Err(e) = self.child.start_kill() {
            log::debug!("Ignoring native host disconnect error: {e}");
        }
    }
}

async fn watch_host_output(mut stdout: ChildStdout, connected: Arc<AtomicBool>, name: String) {
    loop {
        match read_frame::<_, Value>(&mut stdout, MAX_HOST_MESSAGE_LEN).await {
            Ok(Some(reply)) => log::debug!("Native host '{name}' replied: {reply}"),
            Ok(None) => {
                log::info!("Native messaging host '{name}' disconnected");
                break;
            }
            Err(FrameError::Json(e)) => {
                log::warn!("Ignoring undecodable reply from native host '{name}': {e}");
            }
            Err(e) => {
                log::info!("Native messaging host '{name}' disconnected: {e}");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}
