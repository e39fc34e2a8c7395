//! Routing for driver messages that arrive without a context pointer.
//!
//! Some native drivers report errors through plain function callbacks that
//! carry no user data, so there is no way to tell which context a message
//! belongs to. Contexts register a sink here; messages go to the most
//! recently registered one. With nobody registered they are written to
//! stderr. This is the only process-wide mutable state in the crate.

use std::sync::{Mutex, MutexGuard};

use log::Level;

type Sink = Box<dyn Fn(Level, &str) + Send>;

struct Client {
    id: u64,
    name: String,
    sink: Sink,
}

struct Registry {
    clients: Vec<Client>,
    next_id: u64,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    clients: Vec::new(),
    next_id: 0,
});

fn registry() -> MutexGuard<'static, Registry> {
    // A panicking sink must not take routing down with it.
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps a sink registered. Dropping it unregisters the sink.
#[derive(Debug)]
pub struct Registration {
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        registry().clients.retain(|c| c.id != self.id);
    }
}

/// Registers `sink` as the receiver of driver messages until the returned
/// guard is dropped.
///
/// Sinks run with the registry locked and must not register or unregister.
pub fn register<F>(name: &str, sink: F) -> Registration
where
    F: Fn(Level, &str) + Send + 'static,
{
    let mut reg = registry();
    let id = reg.next_id;
    reg.next_id += 1;
    reg.clients.push(Client {
        id,
        name: name.to_string(),
        sink: Box::new(sink),
    });
    Registration { id }
}

/// Name of the client currently receiving messages.
pub fn active_client() -> Option<String> {
    registry().clients.last().map(|c| c.name.clone())
}

pub fn client_count() -> usize {
    registry().clients.len()
}

/// Drops every registered sink. Outstanding guards become no-ops.
pub fn teardown() {
    registry().clients.clear();
}

pub fn route(level: Level, msg: &str) {
    let msg = msg.trim_end();
    let reg = registry();
    match reg.clients.last() {
        Some(client) => (client.sink)(level, msg),
        None => {
            let kind = if level <= Level::Error { "error" } else { "info" };
            eprintln!("driver {}: {}", kind, msg);
        }
    }
}

/// Context-free entry point for driver error callbacks.
pub fn error_callback(msg: &str) {
    route(Level::Error, msg);
}

/// Context-free entry point for driver info callbacks.
pub fn info_callback(msg: &str) {
    route(Level::Info, msg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::{Arc, Mutex};

    fn collector() -> (Arc<Mutex<Vec<(Level, String)>>>, impl Fn(Level, &str) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |level: Level, msg: &str| seen.lock().unwrap().push((level, msg.to_string()))
        };
        (seen, sink)
    }

    #[test]
    #[serial]
    fn routes_to_most_recent_client() {
        teardown();
        let (first_seen, first) = collector();
        let (second_seen, second) = collector();

        let _a = register("first", first);
        let b = register("second", second);
        assert_eq!(active_client().as_deref(), Some("second"));

        error_callback("bad surface\n");
        assert_eq!(
            *second_seen.lock().unwrap(),
            vec![(Level::Error, "bad surface".to_string())]
        );
        assert!(first_seen.lock().unwrap().is_empty());

        drop(b);
        info_callback("hello");
        assert_eq!(
            *first_seen.lock().unwrap(),
            vec![(Level::Info, "hello".to_string())]
        );
        teardown();
    }

    #[test]
    #[serial]
    fn unregistering_out_of_order() {
        teardown();
        let (_, a) = collector();
        let (_, b) = collector();
        let a = register("a", a);
        let _b = register("b", b);
        drop(a);
        assert_eq!(active_client().as_deref(), Some("b"));
        assert_eq!(client_count(), 1);
        teardown();
        assert_eq!(client_count(), 0);
    }

    #[test]
    #[serial]
    fn falls_back_without_clients() {
        teardown();
        // Goes to stderr; only checks nothing panics with no sink.
        route(Level::Warn, "no one is listening");
        assert!(active_client().is_none());
    }
}
