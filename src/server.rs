//! Control server: a UNIX stream socket accepting framed JSON commands,
//! one worker thread per connection. Every command runs under the service
//! lock, so clients always observe a whole-tick-consistent snapshot.

use crate::protocol::{self, Command, ErrorReply, OkReply};
use crate::service::Service;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive accept failures tolerated before the server requests a
/// global shutdown.
const MAX_ACCEPT_FAILURES: u32 = 100;

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    service: Arc<Mutex<Service>>,
}

impl Server {
    /// Bind the control socket, replacing any stale socket file. The socket
    /// is world-writable so unprivileged clients can talk to the daemon.
    pub fn bind(socket_path: &Path, service: Arc<Mutex<Service>>) -> Result<Self> {
        if socket_path.exists() {
            fs::remove_file(socket_path)
                .with_context(|| format!("failed to remove stale socket {:?}", socket_path))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("failed to bind control socket {:?}", socket_path))?;

        let mut perms = fs::metadata(socket_path)
            .with_context(|| format!("failed to stat {:?}", socket_path))?
            .permissions();
        perms.set_mode(0o666);
        fs::set_permissions(socket_path, perms)
            .with_context(|| format!("failed to chmod {:?}", socket_path))?;

        // Non-blocking accept lets the loop poll the quit flag.
        listener
            .set_nonblocking(true)
            .context("failed to make listener non-blocking")?;

        info!("Control server listening on {:?}", socket_path);
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            service,
        })
    }

    /// Accept loop. Returns once `quit` is set; sets it itself after too
    /// many consecutive accept failures.
    pub fn run(&self, quit: &AtomicBool) {
        let mut failures: u32 = 0;
        while !quit.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    failures = 0;
                    let service = Arc::clone(&self.service);
                    thread::spawn(move || {
                        if let Err(err) = handle_client(stream, &service) {
                            debug!("Client connection failed: {:#}", err);
                        }
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    if quit.load(Ordering::SeqCst) {
                        break;
                    }
                    failures += 1;
                    error!("accept failed ({} consecutive): {}", failures, err);
                    if failures >= MAX_ACCEPT_FAILURES {
                        error!("Too many accept failures, requesting shutdown");
                        quit.store(true, Ordering::SeqCst);
                    }
                }
            }
        }

        if let Err(err) = fs::remove_file(&self.socket_path) {
            debug!("Could not remove socket {:?}: {}", self.socket_path, err);
        }
        info!("Control server stopped");
    }
}

/// Serve exactly one request, reporting any failure back to the client as
/// an error object on the same socket.
fn handle_client(mut stream: UnixStream, service: &Mutex<Service>) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_IO_TIMEOUT))?;

    let reply = match process_request(&mut stream, service) {
        Ok(reply) => reply,
        Err(err) => {
            debug!("Request failed: {:#}", err);
            serde_json::to_vec(&ErrorReply {
                error: format!("{:#}", err),
            })?
        }
    };
    protocol::write_frame(&mut stream, &reply)
}

fn process_request(stream: &mut UnixStream, service: &Mutex<Service>) -> Result<Vec<u8>> {
    let payload = protocol::read_frame(stream)?;
    let command = protocol::parse_command(&payload)?;

    let mut svc = service.lock().unwrap();
    match command {
        Command::SetFanSpeed { fan, speed } => {
            svc.set_fan_speed(fan, speed)?;
            Ok(serde_json::to_vec(&OkReply::new())?)
        }
        Command::Status => Ok(serde_json::to_vec(&svc.status())?),
    }
}
