#![allow(dead_code)]

use vkring::gpu::null::NullDevice;
use vkring::{Context, ContextInfo, QueueFamily};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A null device with one graphics queue.
pub fn headless() -> (NullDevice, Context<NullDevice>) {
    init_logging();
    let device = NullDevice::new();
    let ctx = Context::new(device.clone(), &ContextInfo::default()).expect("context");
    (device, ctx)
}

/// A null device with a separate single-queue transfer family.
pub fn headless_with_transfer() -> (NullDevice, Context<NullDevice>) {
    init_logging();
    let device = NullDevice::new();
    let info = ContextInfo {
        graphics: QueueFamily {
            index: 0,
            queue_count: 2,
        },
        transfer: Some(QueueFamily {
            index: 1,
            queue_count: 1,
        }),
    };
    let ctx = Context::new(device.clone(), &info).expect("context");
    (device, ctx)
}
