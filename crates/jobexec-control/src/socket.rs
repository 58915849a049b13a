// SPDX-License-Identifier: Apache-2.0

//! Serves an [`ApiServer`] over a local Unix domain socket, one
//! newline-delimited JSON-RPC request/response pair per line, one thread
//! per connection.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::server::ApiServer;

/// Binds `socket_path` at `file_mode` and serves requests against `server`
/// until `stop` is set, polling the non-blocking listener every
/// `poll_interval` while idle. Removes any stale socket file left behind by
/// a previous run before binding.
pub fn serve_unix_socket(
    socket_path: &Path,
    file_mode: u32,
    poll_interval: Duration,
    server: Arc<ApiServer>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    listener.set_nonblocking(true)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(file_mode))?;

    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let server = server.clone();
                std::thread::spawn(move || handle_connection(stream, &server));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(poll_interval);
            }
            Err(err) => {
                tracing::warn!(error = %err, "control socket accept failed");
            }
        }
    }
    Ok(())
}

fn handle_connection(stream: UnixStream, server: &ApiServer) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to clone control socket connection");
            return;
        }
    });
    let mut writer = stream;

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response = server.handle(trimmed);
                if writeln!(writer, "{response}").is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "control socket read failed");
                return;
            }
        }
    }
}
