use log::{debug, error, warn};

use crate::utils::{Handle, Pool};

use super::{Context, Device, Format, GPUError, Result, TextureInfo, TextureUsage};

/// Ticks an unused texture survives before it is destroyed.
pub const MAX_AGE: u32 = 10;

pub struct TextureEntry<D: Device> {
    texture: D::Texture,
    extent: [u32; 2],
    age: u32,
    refcount: u32,
}

/// Reference to a pooled texture. Goes stale once the last reference is
/// released.
pub type TexRef<D> = Handle<TextureEntry<D>>;

/// Cache of render targets of one format, recycled by size.
///
/// Released textures stay around for [`MAX_AGE`] calls to
/// [`TexturePool::gc_tick`] so a size that comes back (e.g. a window
/// toggling between two resolutions) reuses them. A miss allocates and a
/// failed allocation aborts the process.
pub struct TexturePool<D: Device> {
    device: D,
    format: Format,
    usage: TextureUsage,
    entries: Pool<TextureEntry<D>>,
    available: Vec<TexRef<D>>,
}

impl<D: Device> TexturePool<D> {
    /// Fails if `format` cannot be both rendered to and linearly sampled.
    pub fn new(device: D, format: Format) -> Result<Self> {
        let caps = device.format_caps(format);
        if !caps.renderable || !caps.linear_filter {
            error!(
                "Texture format {:?} is not renderable and linearly filterable",
                format
            );
            return Err(GPUError::UnsupportedConfiguration(format!(
                "texture pool format {:?}",
                format
            )));
        }

        let mut usage = TextureUsage::SAMPLED
            | TextureUsage::RENDER_TARGET
            | TextureUsage::BLIT_SRC
            | TextureUsage::TRANSFER_DST;
        if caps.storable {
            usage |= TextureUsage::STORAGE;
        }

        Ok(Self {
            device,
            format,
            usage,
            entries: Pool::default(),
            available: Vec::new(),
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Textures currently owned, in use or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn available_len(&self) -> usize {
        self.available.len()
    }

    /// A texture of exactly `width` x `height`, recycled when possible.
    pub fn acquire(&mut self, width: u32, height: u32) -> TexRef<D> {
        let hit = self.available.iter().position(|h| {
            self.entries
                .get_ref(*h)
                .map_or(false, |e| e.extent == [width, height])
        });

        if let Some(pos) = hit {
            let handle = self.available.remove(pos);
            if let Some(entry) = self.entries.get_mut_ref(handle) {
                entry.refcount = 1;
                return handle;
            }
        }

        let info = TextureInfo {
            debug_name: "pooled texture",
            dim: [width, height],
            format: self.format,
            usage: self.usage,
        };
        let texture = match self.device.create_texture(&info) {
            Ok(texture) => texture,
            Err(err) => {
                error!("Failed allocating {}x{} pooled texture: {}", width, height, err);
                std::process::abort();
            }
        };
        debug!(
            "Allocated {}x{} {:?} texture ({} pooled)",
            width,
            height,
            self.format,
            self.entries.len() + 1
        );

        self.entries.insert(TextureEntry {
            texture,
            extent: [width, height],
            age: 0,
            refcount: 1,
        })
    }

    /// Adds a reference. `None` passes through.
    pub fn duplicate(&mut self, tex: Option<TexRef<D>>) -> Option<TexRef<D>> {
        let tex = tex?;
        match self.entries.get_mut_ref(tex) {
            Some(entry) if entry.refcount > 0 => {
                entry.refcount += 1;
                Some(tex)
            }
            _ => {
                warn!("Duplicating stale texture reference {:?}", tex);
                None
            }
        }
    }

    /// Drops a reference. The last one returns the texture to the cache and
    /// invalidates every outstanding handle to it.
    pub fn release(&mut self, tex: TexRef<D>) {
        let entry = match self.entries.get_mut_ref(tex) {
            Some(entry) if entry.refcount > 0 => entry,
            _ => {
                warn!("Releasing stale texture reference {:?}", tex);
                return;
            }
        };

        entry.refcount -= 1;
        if entry.refcount > 0 {
            return;
        }

        entry.age = 0;
        self.device.invalidate_texture(entry.texture);
        if let Some(fresh) = self.entries.renew(tex) {
            self.available.push(fresh);
        }
    }

    pub fn texture(&self, tex: TexRef<D>) -> Option<D::Texture> {
        self.entries
            .get_ref(tex)
            .filter(|e| e.refcount > 0)
            .map(|e| e.texture)
    }

    pub fn extent(&self, tex: TexRef<D>) -> Option<[u32; 2]> {
        self.entries
            .get_ref(tex)
            .filter(|e| e.refcount > 0)
            .map(|e| e.extent)
    }

    /// Ages every unused texture by one tick and destroys the ones that
    /// have been unused for more than [`MAX_AGE`] ticks. Call once per frame.
    pub fn gc_tick(&mut self) {
        let Self {
            device,
            entries,
            available,
            ..
        } = self;

        available.retain(|handle| {
            let expired = match entries.get_mut_ref(*handle) {
                Some(entry) => {
                    entry.age += 1;
                    entry.age > MAX_AGE
                }
                None => return false,
            };

            if expired {
                if let Some(entry) = entries.release(*handle) {
                    debug!(
                        "Garbage collected {}x{} pooled texture",
                        entry.extent[0], entry.extent[1]
                    );
                    device.destroy_texture(entry.texture);
                }
            }
            !expired
        });
    }

    /// Tears the pool down. Textures are freed once the work submitted so
    /// far has completed.
    pub fn destroy(mut self, ctx: &mut Context<D>) {
        let mut textures = Vec::with_capacity(self.entries.len());
        self.entries.drain(|entry| textures.push(entry.texture));
        self.available.clear();
        if textures.is_empty() {
            return;
        }

        let device = self.device.clone();
        ctx.defer(move || {
            for texture in textures {
                device.destroy_texture(texture);
            }
        });
    }
}

// Fallback for pools not torn down with `destroy`. Nothing tracks GPU use of
// the textures, so they are left to the device, which frees whatever it still
// owns when it goes away.
impl<D: Device> Drop for TexturePool<D> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                "Texture pool dropped with {} textures; leaving them to the device",
                self.entries.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::NullDevice;
    use crate::gpu::{ContextInfo, FormatCaps, QueueType};

    fn make_pool() -> (NullDevice, TexturePool<NullDevice>) {
        let device = NullDevice::new();
        let pool = TexturePool::new(device.clone(), Format::RGBA16F).unwrap();
        (device, pool)
    }

    #[test]
    fn rejects_unfilterable_format() {
        let device = NullDevice::new();
        device.set_format_caps(
            Format::RGBA32F,
            FormatCaps {
                renderable: true,
                linear_filter: false,
                storable: true,
            },
        );
        assert!(matches!(
            TexturePool::new(device, Format::RGBA32F),
            Err(GPUError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn release_then_acquire_reuses_texture() {
        let (device, mut pool) = make_pool();
        let a = pool.acquire(64, 32);
        let raw = pool.texture(a).unwrap();
        pool.release(a);
        assert_eq!(pool.available_len(), 1);
        assert_eq!(device.stats().invalidations, 1);

        let b = pool.acquire(64, 32);
        assert_eq!(pool.texture(b), Some(raw));
        assert_eq!(device.stats().textures_created, 1);
        assert_eq!(pool.available_len(), 0);
    }

    #[test]
    fn size_must_match_exactly() {
        let (device, mut pool) = make_pool();
        let a = pool.acquire(64, 32);
        pool.release(a);
        let b = pool.acquire(64, 33);
        assert!(pool.texture(b).is_some());
        assert_eq!(device.stats().textures_created, 2);
        assert_eq!(pool.available_len(), 1);
    }

    #[test]
    fn released_handles_go_stale() {
        let (_device, mut pool) = make_pool();
        let a = pool.acquire(8, 8);
        pool.release(a);
        assert!(pool.texture(a).is_none());
        assert!(pool.duplicate(Some(a)).is_none());
        // A second release of the same handle is ignored.
        pool.release(a);
        assert_eq!(pool.available_len(), 1);
    }

    #[test]
    fn duplicate_keeps_texture_alive() {
        let (_device, mut pool) = make_pool();
        assert!(pool.duplicate(None).is_none());

        let a = pool.acquire(8, 8);
        let b = pool.duplicate(Some(a)).unwrap();
        pool.release(a);
        assert_eq!(pool.available_len(), 0);
        assert!(pool.texture(b).is_some());
        pool.release(b);
        assert_eq!(pool.available_len(), 1);
    }

    #[test]
    fn unused_textures_expire_after_max_age() {
        let (device, mut pool) = make_pool();
        let a = pool.acquire(16, 16);
        pool.release(a);

        for _ in 0..MAX_AGE {
            pool.gc_tick();
        }
        assert_eq!(pool.available_len(), 1);
        assert_eq!(device.live_textures(), 1);

        pool.gc_tick();
        assert_eq!(pool.available_len(), 0);
        assert_eq!(device.live_textures(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn reacquiring_resets_age() {
        let (_device, mut pool) = make_pool();
        let a = pool.acquire(16, 16);
        pool.release(a);
        for _ in 0..MAX_AGE {
            pool.gc_tick();
        }

        let b = pool.acquire(16, 16);
        pool.gc_tick();
        pool.release(b);
        for _ in 0..MAX_AGE {
            pool.gc_tick();
        }
        assert_eq!(pool.available_len(), 1);
    }

    #[test]
    fn textures_in_use_are_not_aged() {
        let (device, mut pool) = make_pool();
        let a = pool.acquire(16, 16);
        for _ in 0..MAX_AGE * 2 {
            pool.gc_tick();
        }
        assert!(pool.texture(a).is_some());
        assert_eq!(device.live_textures(), 1);
    }

    #[test]
    fn destroy_waits_for_submitted_work() {
        let (device, mut pool) = make_pool();
        let mut ctx = Context::new(device.clone(), &ContextInfo::default()).unwrap();
        let _in_use = pool.acquire(16, 16);
        let cached = pool.acquire(8, 8);
        pool.release(cached);

        let cmd = ctx.pool_mut(QueueType::Graphics);
        let slot = cmd.begin().unwrap();
        cmd.submit(slot, false).unwrap();

        pool.destroy(&mut ctx);
        assert_eq!(device.live_textures(), 2);

        device.retire_all();
        ctx.poll(std::time::Duration::ZERO).unwrap();
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn dropping_leaves_textures_to_the_device() {
        let (device, mut pool) = make_pool();
        pool.acquire(16, 16);
        drop(pool);
        assert_eq!(device.live_textures(), 1);
    }
}
