mod common;

use std::sync::{Arc, Mutex};

use log::Level;
use serial_test::serial;
use vkring::diagnostics;

type Seen = Arc<Mutex<Vec<(Level, String)>>>;

fn sink(seen: &Seen) -> impl Fn(Level, &str) + Send + 'static {
    let seen = seen.clone();
    move |level: Level, msg: &str| seen.lock().unwrap().push((level, msg.to_string()))
}

#[test]
#[serial]
fn messages_follow_the_newest_context() {
    common::init_logging();
    diagnostics::teardown();
    let main: Seen = Default::default();
    let overlay: Seen = Default::default();

    let _main = diagnostics::register("main window", sink(&main));
    diagnostics::info_callback("device ready");

    let overlay_reg = diagnostics::register("overlay", sink(&overlay));
    diagnostics::error_callback("surface lost\n");
    drop(overlay_reg);
    diagnostics::error_callback("swapchain out of date");

    assert_eq!(
        *main.lock().unwrap(),
        vec![
            (Level::Info, "device ready".to_string()),
            (Level::Error, "swapchain out of date".to_string()),
        ]
    );
    assert_eq!(
        *overlay.lock().unwrap(),
        vec![(Level::Error, "surface lost".to_string())]
    );
    diagnostics::teardown();
}

#[test]
#[serial]
fn teardown_leaves_guards_harmless() {
    diagnostics::teardown();
    let seen: Seen = Default::default();
    let guard = diagnostics::register("short lived", sink(&seen));
    assert_eq!(diagnostics::client_count(), 1);

    diagnostics::teardown();
    assert_eq!(diagnostics::client_count(), 0);
    assert!(diagnostics::active_client().is_none());
    drop(guard);

    diagnostics::error_callback("nobody home");
    assert!(seen.lock().unwrap().is_empty());
}
