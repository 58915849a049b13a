// SPDX-License-Identifier: Apache-2.0

//! Event dispatchers: fan a phase's transitions and a job's captured output
//! out to whichever listener sockets are currently registered in a
//! directory, discovered by file extension.
//!
//! A listener that can't be reached, or a payload too large to send, is
//! logged and skipped rather than propagated — an unreachable observer must
//! never take down the phase tree driving it.

use jobexec_engine::PhaseObserver;
use jobexec_types::PhaseUpdateEvent;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use crate::instance::OutputLine;

pub const TRANSITION_LISTENER_EXTENSION: &str = "tlistener";
pub const OUTPUT_LISTENER_EXTENSION: &str = "olistener";

/// A payload larger than this is dropped rather than sent; real listener
/// transports (a constrained socket buffer, a message queue with a size
/// cap) typically enforce something similar.
const MAX_EVENT_PAYLOAD_BYTES: usize = 64 * 1024;

/// Finds listener sockets by scanning a directory for files named
/// `<anything>.<extension>`, where the file itself is (or names) the Unix
/// socket to connect to.
pub struct ListenerDiscovery {
    dir: PathBuf,
    extension: &'static str,
}

impl ListenerDiscovery {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self { dir: dir.into(), extension }
    }

    #[must_use]
    pub fn discover(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(self.extension))
            .collect()
    }
}

fn send_line(socket_path: &Path, body: &str) -> std::io::Result<()> {
    let mut stream = UnixStream::connect(socket_path)?;
    writeln!(stream, "{body}")
}

/// Minimal view of a job instance an event dispatcher needs to identify the
/// sender in the event envelope.
pub trait EventInstanceMeta {
    fn instance_id(&self) -> &str;
    fn attributes(&self) -> &HashMap<String, String>;
}

/// Shared event-sending plumbing: builds the `{event_metadata, instance_metadata,
/// event}` envelope and fans it out to every currently discoverable listener.
pub struct EventDispatcher {
    listeners: ListenerDiscovery,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(listeners: ListenerDiscovery) -> Self {
        Self { listeners }
    }

    fn send_event(&self, event_type: &str, instance: &dyn EventInstanceMeta, event: Value) {
        let body = json!({
            "event_metadata": { "event_type": event_type },
            "instance_metadata": {
                "instance_id": instance.instance_id(),
                "attributes": instance.attributes(),
            },
            "event": event,
        });
        let serialized = match serde_json::to_string(&body) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize event; dropping");
                return;
            }
        };
        if serialized.len() > MAX_EVENT_PAYLOAD_BYTES {
            tracing::warn!(event_type, note = "please report this issue", "event dispatch failed: payload too large");
            return;
        }
        for socket_path in self.listeners.discover() {
            if let Err(err) = send_line(&socket_path, &serialized) {
                tracing::warn!(error = %err, listener = %socket_path.display(), "failed to reach event listener");
            }
        }
    }
}

/// Sends a `new_instance_transition` event to every `.tlistener` socket each
/// time a phase anywhere in the tree enters or leaves `RUNNING`.
pub struct TransitionDispatcher {
    inner: EventDispatcher,
}

impl TransitionDispatcher {
    #[must_use]
    pub fn new(listener_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: EventDispatcher::new(ListenerDiscovery::new(listener_dir, TRANSITION_LISTENER_EXTENSION)),
        }
    }

    pub fn dispatch(&self, instance: &dyn EventInstanceMeta, event: &PhaseUpdateEvent<jobexec_engine::PhaseDetail>) {
        let serialized = serde_json::to_value(event).unwrap_or(Value::Null);
        self.inner.send_event("new_instance_transition", instance, serialized);
    }
}

/// Adapts a [`TransitionDispatcher`] plus a fixed instance identity into a
/// [`PhaseObserver`] that can be registered directly on a phase tree.
pub struct TransitionObserver<M> {
    dispatcher: std::sync::Arc<TransitionDispatcher>,
    meta: M,
}

impl<M: EventInstanceMeta + Send + Sync + 'static> TransitionObserver<M> {
    #[must_use]
    pub fn new(dispatcher: std::sync::Arc<TransitionDispatcher>, meta: M) -> Self {
        Self { dispatcher, meta }
    }
}

impl<M: EventInstanceMeta + Send + Sync> PhaseObserver for TransitionObserver<M> {
    fn on_phase_update(&self, event: &PhaseUpdateEvent<jobexec_engine::PhaseDetail>) {
        self.dispatcher.dispatch(&self.meta, event);
    }
}

/// Sends a `new_instance_output` event to every `.olistener` socket, each
/// event's text truncated to 10,000 characters.
pub struct OutputDispatcher {
    inner: EventDispatcher,
}

const OUTPUT_TRUNCATION_CHARS: usize = 10_000;

impl OutputDispatcher {
    #[must_use]
    pub fn new(listener_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: EventDispatcher::new(ListenerDiscovery::new(listener_dir, OUTPUT_LISTENER_EXTENSION)),
        }
    }

    pub fn dispatch(&self, instance: &dyn EventInstanceMeta, line: &OutputLine) {
        let truncated: String = line.text.chars().take(OUTPUT_TRUNCATION_CHARS).collect();
        let event = json!({
            "text": truncated,
            "is_error": line.is_error,
            "source": line.source,
        });
        self.inner.send_event("new_instance_output", instance, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Meta {
        id: String,
        attrs: HashMap<String, String>,
    }

    impl EventInstanceMeta for Meta {
        fn instance_id(&self) -> &str {
            &self.id
        }

        fn attributes(&self) -> &HashMap<String, String> {
            &self.attrs
        }
    }

    #[test]
    fn discovery_with_no_listeners_directory_returns_empty() {
        let discovery = ListenerDiscovery::new("/no/such/directory", TRANSITION_LISTENER_EXTENSION);
        assert!(discovery.discover().is_empty());
    }

    #[test]
    fn discovery_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tlistener"), b"").unwrap();
        std::fs::write(dir.path().join("b.olistener"), b"").unwrap();
        let discovery = ListenerDiscovery::new(dir.path(), TRANSITION_LISTENER_EXTENSION);
        let found = discovery.discover();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].extension().unwrap(), "tlistener");
    }

    #[test]
    fn dispatch_with_no_listeners_present_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = OutputDispatcher::new(dir.path());
        let meta = Meta {
            id: "i1".to_string(),
            attrs: HashMap::new(),
        };
        dispatcher.dispatch(
            &meta,
            &OutputLine {
                text: "hello".to_string(),
                is_error: false,
                source: None,
            },
        );
    }
}
