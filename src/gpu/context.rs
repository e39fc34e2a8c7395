use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use log::debug;

use super::{CommandPool, ContextInfo, Device, QueueType, Result};

/// One logical GPU context: a device plus the command pools feeding it.
///
/// Owns the graphics pool and, when the device has a distinct
/// transfer-capable family, a second pool for async uploads. Everything
/// hanging off a context is driven from a single thread.
pub struct Context<D: Device> {
    device: D,
    gfx: CommandPool<D>,
    transfer: Option<CommandPool<D>>,
}

impl<D: Device> Context<D> {
    pub fn new(device: D, info: &ContextInfo) -> Result<Self> {
        let gfx = CommandPool::new(device.clone(), info.graphics)?;
        let transfer = match info.transfer {
            Some(family) if family.index != info.graphics.index => {
                debug!("Using queue family {} for async transfers", family.index);
                Some(CommandPool::new(device.clone(), family)?)
            }
            _ => None,
        };

        Ok(Self {
            device,
            gfx,
            transfer,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn has_async_transfer(&self) -> bool {
        self.transfer.is_some()
    }

    /// The pool for `queue`. Transfer falls back to graphics.
    pub fn pool(&self, queue: QueueType) -> &CommandPool<D> {
        match (queue, &self.transfer) {
            (QueueType::Transfer, Some(pool)) => pool,
            _ => &self.gfx,
        }
    }

    pub fn pool_mut(&mut self, queue: QueueType) -> &mut CommandPool<D> {
        match (queue, &mut self.transfer) {
            (QueueType::Transfer, Some(pool)) => pool,
            _ => &mut self.gfx,
        }
    }

    fn pools_mut(&mut self) -> impl Iterator<Item = &mut CommandPool<D>> {
        std::iter::once(&mut self.gfx).chain(self.transfer.as_mut())
    }

    pub fn is_idle(&self) -> bool {
        self.gfx.is_idle() && self.transfer.as_ref().map_or(true, |p| p.is_idle())
    }

    /// Collects finished work on every pool.
    pub fn poll(&mut self, timeout: Duration) -> Result<()> {
        for pool in self.pools_mut() {
            pool.poll(timeout)?;
        }
        Ok(())
    }

    pub fn wait_idle(&mut self) -> Result<()> {
        for pool in self.pools_mut() {
            pool.wait_idle()?;
        }
        Ok(())
    }

    /// Runs `callback` once the last submission of every pool has completed,
    /// or right away when nothing is in flight.
    pub fn defer<F>(&mut self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let mut busy: Vec<&mut CommandPool<D>> = self
            .pools_mut()
            .filter(|p| p.last_submitted().is_some())
            .collect();

        match busy.len() {
            0 => callback(),
            1 => busy[0].defer(callback),
            n => {
                let remaining = Rc::new(Cell::new(n));
                let callback = Rc::new(RefCell::new(Some(callback)));
                for pool in busy {
                    let remaining = remaining.clone();
                    let callback = callback.clone();
                    pool.defer(move || {
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let func = callback.borrow_mut().take();
                            if let Some(func) = func {
                                func();
                            }
                        }
                    });
                }
            }
        }
    }
}
