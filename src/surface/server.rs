use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::orchestrator::control::RuntimeHandle;
use crate::orchestrator::threads::{DoneGuard, ManagedThread, ThreadInfo};

use super::command::respond_line;

/// Accept-loop back-off while no client is connected.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read timeout on a connected client, bounding shutdown latency.
const CLIENT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Spawns the control-surface listener thread. The listener serves one
/// client at a time (the surface is a thin command source, not an API
/// gateway) and exits once shutdown begins.
pub fn spawn_surface(listener: TcpListener, handle: RuntimeHandle) -> ManagedThread {
    let info = ThreadInfo::new("control-api", None);
    let ready = info.ready.clone();
    let done = info.done.clone();
    let thread_handle = thread::Builder::new()
        .name("control-api".to_string())
        .spawn(move || {
            let _done = DoneGuard::new(done);
            ready.set(true);
            accept_loop(&listener, &handle);
        })
        .expect("failed to spawn control surface thread");
    ManagedThread {
        info,
        handle: thread_handle,
    }
}

fn accept_loop(listener: &TcpListener, handle: &RuntimeHandle) {
    loop {
        if handle.state().is_terminal() {
            return;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "control client connected");
                if let Err(err) = serve_client(stream, handle) {
                    warn!(peer = %peer, error = %err, "control client failed");
                }
                debug!(peer = %peer, "control client disconnected");
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                warn!(error = %err, "control surface accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Serves one client: one command per line in, one JSON line out.
fn serve_client(stream: TcpStream, handle: &RuntimeHandle) -> io::Result<()> {
    // The accept loop runs the listener non-blocking; the per-client stream
    // switches to timed blocking reads so shutdown is observed promptly.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        if handle.state().is_terminal() {
            return Ok(());
        }
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    let response = respond_line(trimmed, handle);
                    writer.write_all(response.as_bytes())?;
                    writer.write_all(b"\n")?;
                    writer.flush()?;
                }
                line.clear();
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                // Partial input stays buffered in `line` until the newline
                // arrives.
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}
