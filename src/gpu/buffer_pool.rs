use std::cell::Cell;
use std::rc::Rc;

use log::{debug, warn};

use super::{
    BufferKind, BufferShape, BufferTextureCopy, CmdSlot, CommandPool, Context, Device, GPUError,
    QueueType, Result,
};

#[derive(Debug, Default)]
struct Usage {
    in_flight: Cell<u32>,
    released: Cell<bool>,
}

/// A buffer handed out by a [`BufferPool`].
///
/// Cheap to clone. The pool keeps ownership of the device buffer; once the
/// pool drops it (shape change or teardown) every copy reports
/// [`PooledBuffer::is_released`] and must not be used again.
pub struct PooledBuffer<D: Device> {
    buffer: D::Buffer,
    shape: BufferShape,
    usage: Rc<Usage>,
}

impl<D: Device> Clone for PooledBuffer<D> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer,
            shape: self.shape,
            usage: self.usage.clone(),
        }
    }
}

impl<D: Device> std::fmt::Debug for PooledBuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("buffer", &self.buffer)
            .field("shape", &self.shape)
            .field("in_flight", &self.usage.in_flight.get())
            .finish()
    }
}

impl<D: Device> PooledBuffer<D> {
    pub fn buffer(&self) -> D::Buffer {
        self.buffer
    }

    pub fn shape(&self) -> &BufferShape {
        &self.shape
    }

    /// Not referenced by any unfinished GPU work.
    pub fn is_idle(&self) -> bool {
        self.usage.in_flight.get() == 0
    }

    pub fn is_released(&self) -> bool {
        self.usage.released.get()
    }

    /// Marks the buffer as used by `slot` until that slot completes.
    pub fn track(&self, pool: &mut CommandPool<D>, slot: CmdSlot) -> Result<()> {
        let usage = self.usage.clone();
        usage.in_flight.set(usage.in_flight.get() + 1);

        let tracked = usage.clone();
        let res = pool.add_callback(slot, move || {
            tracked.in_flight.set(tracked.in_flight.get() - 1);
        });
        if res.is_err() {
            usage.in_flight.set(usage.in_flight.get() - 1);
        }
        res
    }
}

/// Round-robin pool of buffers sharing one shape.
///
/// Instead of stalling on a busy buffer the pool grows, so it settles at
/// roughly one buffer per frame the GPU keeps in flight.
pub struct BufferPool<D: Device> {
    device: D,
    buffers: Vec<PooledBuffer<D>>,
    shape: BufferShape,
    index: usize,
}

impl<D: Device> BufferPool<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            buffers: Vec::new(),
            shape: BufferShape::default(),
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn shape(&self) -> &BufferShape {
        &self.shape
    }

    fn grow(&mut self) -> Result<()> {
        let buffer = self.device.create_buffer(&self.shape)?;
        // Inserted at the cursor, ahead of the busy buffer, so it is served
        // next and the cyclic order of the rest is kept.
        self.buffers.insert(
            self.index,
            PooledBuffer {
                buffer,
                shape: self.shape,
                usage: Rc::new(Usage::default()),
            },
        );
        debug!(
            "Resized buffer pool of type {:?} to size {}",
            self.shape.kind,
            self.buffers.len()
        );
        Ok(())
    }

    /// Returns the next buffer able to hold `shape`.
    ///
    /// An incompatible shape drops every buffer the pool holds first. Fails
    /// with [`GPUError::AllocationFailure`] if a needed buffer cannot be
    /// created; the pool is left usable.
    pub fn acquire(&mut self, ctx: &mut Context<D>, shape: &BufferShape) -> Result<PooledBuffer<D>> {
        if !shape.compatible_with(&self.shape) {
            self.release_all(ctx);
            self.shape = *shape;
        }

        if self.buffers.is_empty() {
            self.index = 0;
            self.grow()?;
        }

        if !self.buffers[self.index].is_idle() {
            self.grow()?;
        }

        let buf = self.buffers[self.index].clone();
        self.index = (self.index + 1) % self.buffers.len();
        Ok(buf)
    }

    /// Drops every buffer. Destruction waits for in-flight work.
    pub fn release_all(&mut self, ctx: &mut Context<D>) {
        if self.buffers.is_empty() {
            return;
        }

        let buffers: Vec<D::Buffer> = self
            .buffers
            .drain(..)
            .map(|b| {
                b.usage.released.set(true);
                b.buffer
            })
            .collect();
        self.index = 0;

        let device = self.device.clone();
        ctx.defer(move || {
            for buffer in buffers {
                device.destroy_buffer(buffer);
            }
        });
    }

    /// Tears the pool down. Buffers are freed once the work submitted so far
    /// has completed.
    pub fn destroy(mut self, ctx: &mut Context<D>) {
        self.release_all(ctx);
    }
}

// Fallback for pools not torn down with `destroy`. Busy buffers are left to
// the device, which frees whatever it still owns when it goes away.
impl<D: Device> Drop for BufferPool<D> {
    fn drop(&mut self) {
        for buf in self.buffers.drain(..) {
            buf.usage.released.set(true);
            if buf.is_idle() {
                self.device.destroy_buffer(buf.buffer);
            } else {
                warn!(
                    "Pooled buffer {:?} dropped while still in use; leaving it to the device",
                    buf.buffer
                );
            }
        }
    }
}

/// Uploads `data` into `texture` through a pooled staging buffer.
///
/// `stride` is the row pitch of `data` in bytes; `stride * height` bytes are
/// staged. The copy is recorded into `slot`, which must be recording on the
/// `queue` pool, and the staging buffer stays busy until that slot completes.
pub fn upload_texture<D: Device>(
    ctx: &mut Context<D>,
    pbo: &mut BufferPool<D>,
    queue: QueueType,
    slot: CmdSlot,
    texture: D::Texture,
    data: &[u8],
    stride: u32,
) -> Result<()> {
    let [width, height] = ctx.device().texture_extent(texture);
    let size = stride as u64 * height as u64;
    if (data.len() as u64) < size {
        return Err(GPUError::InvalidState {
            expected: "data covering stride * height",
            found: "short upload",
        });
    }

    let cmd = ctx.pool(queue).command_buffer(slot)?;
    let buf = pbo.acquire(
        ctx,
        &BufferShape {
            kind: BufferKind::TexUpload,
            size,
            host_mapped: false,
            host_mutable: true,
        },
    )?;

    let device = ctx.device().clone();
    device.write_buffer(buf.buffer(), 0, &data[..size as usize])?;
    device.cmd_copy_buffer_to_texture(
        cmd,
        buf.buffer(),
        texture,
        &BufferTextureCopy {
            buffer_offset: 0,
            row_stride: stride,
            extent: [width, height],
        },
    );
    buf.track(ctx.pool_mut(queue), slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::NullDevice;
    use crate::gpu::ContextInfo;

    fn setup() -> (NullDevice, Context<NullDevice>, BufferPool<NullDevice>) {
        let device = NullDevice::new();
        let ctx = Context::new(device.clone(), &ContextInfo::default()).unwrap();
        let pool = BufferPool::new(device.clone());
        (device, ctx, pool)
    }

    fn upload_shape(size: u64) -> BufferShape {
        BufferShape {
            kind: BufferKind::TexUpload,
            size,
            host_mapped: false,
            host_mutable: true,
        }
    }

    #[test]
    fn idle_buffers_are_reused_round_robin() {
        let (device, mut ctx, mut pool) = setup();
        let a = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        let b = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        assert_eq!(a.buffer(), b.buffer());
        assert_eq!(pool.len(), 1);
        assert_eq!(device.stats().buffers_created, 1);
    }

    #[test]
    fn grows_instead_of_stalling() {
        let (device, mut ctx, mut pool) = setup();

        let mut held = Vec::new();
        for _ in 0..3 {
            let buf = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
            let cmd = ctx.pool_mut(QueueType::Graphics);
            let slot = cmd.begin().unwrap();
            buf.track(cmd, slot).unwrap();
            cmd.submit(slot, false).unwrap();
            held.push(buf);
        }
        assert_eq!(pool.len(), 3);
        assert!(held.iter().all(|b| !b.is_idle()));

        // Once the GPU catches up the pool stops growing.
        device.retire_all();
        ctx.poll(std::time::Duration::ZERO).unwrap();
        for _ in 0..6 {
            pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        }
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn busy_buffer_is_skipped_by_inserting_before_it() {
        let (device, mut ctx, mut pool) = setup();

        let first = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        let cmd = ctx.pool_mut(QueueType::Graphics);
        let slot = cmd.begin().unwrap();
        first.track(cmd, slot).unwrap();
        cmd.submit(slot, false).unwrap();

        let second = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        assert_ne!(first.buffer(), second.buffer());
        assert_eq!(pool.len(), 2);

        // The fresh buffer sits ahead of the busy one, which is next in line
        // once it frees up.
        device.retire_all();
        ctx.poll(std::time::Duration::ZERO).unwrap();
        let third = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        assert_eq!(third.buffer(), first.buffer());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn larger_shape_releases_old_buffers() {
        let (device, mut ctx, mut pool) = setup();
        let small = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();

        // Smaller requests are served by the existing shape.
        let smaller = pool.acquire(&mut ctx, &upload_shape(16)).unwrap();
        assert_eq!(smaller.buffer(), small.buffer());
        assert_eq!(pool.shape().size, 64);

        let large = pool.acquire(&mut ctx, &upload_shape(256)).unwrap();
        assert!(small.is_released());
        assert!(!large.is_released());
        assert_ne!(small.buffer(), large.buffer());
        assert_eq!(pool.len(), 1);
        assert_eq!(device.stats().buffers_destroyed, 1);
    }

    #[test]
    fn release_waits_for_in_flight_work() {
        let (device, mut ctx, mut pool) = setup();
        let buf = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        let cmd = ctx.pool_mut(QueueType::Graphics);
        let slot = cmd.begin().unwrap();
        buf.track(cmd, slot).unwrap();
        cmd.submit(slot, false).unwrap();

        pool.release_all(&mut ctx);
        assert!(buf.is_released());
        assert_eq!(device.live_buffers(), 1);

        device.retire_all();
        ctx.poll(std::time::Duration::ZERO).unwrap();
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn destroy_defers_until_work_completes() {
        let (device, mut ctx, mut pool) = setup();
        let buf = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        let cmd = ctx.pool_mut(QueueType::Graphics);
        let slot = cmd.begin().unwrap();
        buf.track(cmd, slot).unwrap();
        cmd.submit(slot, false).unwrap();

        pool.destroy(&mut ctx);
        assert!(buf.is_released());
        assert_eq!(device.outstanding(), 1);
        assert_eq!(device.live_buffers(), 1);

        device.retire_all();
        ctx.poll(std::time::Duration::ZERO).unwrap();
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn dropping_never_frees_busy_buffers() {
        let (device, mut ctx, mut pool) = setup();
        let busy = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        let cmd = ctx.pool_mut(QueueType::Graphics);
        let slot = cmd.begin().unwrap();
        busy.track(cmd, slot).unwrap();
        cmd.submit(slot, false).unwrap();
        let idle = pool.acquire(&mut ctx, &upload_shape(64)).unwrap();
        assert_ne!(idle.buffer(), busy.buffer());

        drop(pool);
        assert!(busy.is_released());
        assert_eq!(device.outstanding(), 1);
        assert_eq!(device.live_buffers(), 1);
        assert!(device.buffer_contents(busy.buffer()).is_some());
        assert!(device.buffer_contents(idle.buffer()).is_none());
    }

    #[test]
    fn allocation_failure_is_reported() {
        let (device, mut ctx, mut pool) = setup();
        device.fail_allocations(1);
        assert!(matches!(
            pool.acquire(&mut ctx, &upload_shape(64)),
            Err(GPUError::AllocationFailure(_))
        ));
        assert!(pool.acquire(&mut ctx, &upload_shape(64)).is_ok());
    }
}
