use std::time::Duration;

use log::{error, trace, warn};

use crate::utils::RingIndex;

use super::{Device, GPUError, PipelineStage, QueueFamily, Result, Submission};

/// Number of command slots per pool. One slot always stays empty so a full
/// ring can be told apart from an empty one.
pub const MAX_CMDS: usize = 64;
/// Dependencies a single submission may wait on.
pub const MAX_CMD_DEPS: usize = 8;
/// Queues used round-robin by one pool.
pub const MAX_QUEUES: usize = 8;

/// Monotonic token identifying one use of a command slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionId(u64);

/// Handle to a begun command slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CmdSlot {
    index: u16,
    id: SubmissionId,
}

impl CmdSlot {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn id(&self) -> SubmissionId {
        self.id
    }
}

type Callback = Box<dyn FnOnce()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Idle,
    Recording,
    Submitted,
    /// Discarded or rejected by the device. Its fence will not be signaled by
    /// this use, so the collector treats it as complete.
    Abandoned,
}

impl SlotState {
    fn name(&self) -> &'static str {
        match self {
            SlotState::Idle => "idle",
            SlotState::Recording => "recording",
            SlotState::Submitted => "submitted",
            SlotState::Abandoned => "abandoned",
        }
    }
}

struct CommandSlot<D: Device> {
    buf: D::CommandBuffer,
    fence: D::Fence,
    done: D::Semaphore,
    deps: Vec<D::Semaphore>,
    depstages: Vec<PipelineStage>,
    callbacks: Vec<Callback>,
    id: SubmissionId,
    state: SlotState,
}

impl<D: Device> CommandSlot<D> {
    fn new(device: &D, buf: D::CommandBuffer) -> Result<Self> {
        // Created signaled so a never-submitted slot reads as complete.
        let fence = device.create_fence(true)?;
        let done = match device.create_semaphore() {
            Ok(sem) => sem,
            Err(err) => {
                device.destroy_fence(fence);
                return Err(err);
            }
        };

        Ok(Self {
            buf,
            fence,
            done,
            deps: Vec::with_capacity(MAX_CMD_DEPS),
            depstages: Vec::with_capacity(MAX_CMD_DEPS),
            callbacks: Vec::new(),
            id: SubmissionId(0),
            state: SlotState::Idle,
        })
    }
}

/// Fixed ring of reusable command slots.
///
/// Slots in `[pending_oldest, next)` have outstanding work. Completion is
/// detected lazily: [`CommandPool::poll`] walks the window from the oldest
/// slot, runs each finished slot's callbacks in order and stops at the first
/// slot that is still busy. Must only be used from the thread driving the
/// owning context.
pub struct CommandPool<D: Device> {
    device: D,
    family: QueueFamily,
    slots: Vec<CommandSlot<D>>,
    next: RingIndex,
    pending_oldest: RingIndex,
    queues: Vec<D::Queue>,
    queue_index: RingIndex,
    last_submitted: Option<CmdSlot>,
    next_id: u64,
}

impl<D: Device> CommandPool<D> {
    pub fn new(device: D, family: QueueFamily) -> Result<Self> {
        let mut queues = device.queues(family);
        queues.truncate(MAX_QUEUES);
        if queues.is_empty() {
            return Err(GPUError::UnsupportedConfiguration(format!(
                "queue family {} exposes no queues",
                family.index
            )));
        }

        let bufs = device.create_command_buffers(family.index, MAX_CMDS)?;
        let queue_index = RingIndex::new(queues.len());
        let mut pool = Self {
            device,
            family,
            slots: Vec::with_capacity(MAX_CMDS),
            next: RingIndex::new(MAX_CMDS),
            pending_oldest: RingIndex::new(MAX_CMDS),
            queues,
            queue_index,
            last_submitted: None,
            next_id: 1,
        };

        for (n, buf) in bufs.iter().enumerate() {
            match CommandSlot::new(&pool.device, *buf) {
                Ok(slot) => pool.slots.push(slot),
                Err(err) => {
                    pool.device.free_command_buffers(family.index, &bufs[n..]);
                    return Err(err);
                }
            }
        }

        Ok(pool)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn family(&self) -> QueueFamily {
        self.family
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// The queue the next submission goes to.
    pub fn current_queue(&self) -> D::Queue {
        self.queues[self.queue_index.get()]
    }

    /// Number of slots with outstanding (or still recording) work.
    pub fn pending(&self) -> usize {
        self.pending_oldest.distance_to(self.next)
    }

    pub fn is_idle(&self) -> bool {
        self.pending_oldest == self.next
    }

    /// The most recently submitted slot that has not been collected yet.
    pub fn last_submitted(&self) -> Option<CmdSlot> {
        self.last_submitted
    }

    /// Starts recording into the next free slot.
    ///
    /// Collects finished slots first without blocking. Fails with
    /// [`GPUError::ResourceExhausted`] when every slot is still in flight.
    pub fn begin(&mut self) -> Result<CmdSlot> {
        self.poll(Duration::ZERO)?;

        let next = self.next.next();
        if next == self.pending_oldest {
            warn!("No free command buffers!");
            return Err(GPUError::ResourceExhausted);
        }

        let index = self.next.get();
        self.next = next;

        let id = SubmissionId(self.next_id);
        self.next_id += 1;

        let slot = &mut self.slots[index];
        slot.id = id;
        // Stays abandoned if the reset or begin below fails, so the collector
        // can still move past it.
        slot.state = SlotState::Abandoned;
        self.device.reset_command_buffer(slot.buf)?;
        self.device.begin_command_buffer(slot.buf)?;
        slot.state = SlotState::Recording;

        Ok(CmdSlot {
            index: index as u16,
            id,
        })
    }

    fn slot_index(&self, slot: CmdSlot) -> Result<usize> {
        let index = slot.index();
        match self.slots.get(index) {
            Some(entry) if entry.id == slot.id => Ok(index),
            _ => Err(GPUError::InvalidHandle),
        }
    }

    fn expect_recording(&self, index: usize) -> Result<()> {
        let state = self.slots[index].state;
        if state != SlotState::Recording {
            return Err(GPUError::InvalidState {
                expected: SlotState::Recording.name(),
                found: state.name(),
            });
        }
        Ok(())
    }

    /// The backend command buffer of a slot that is being recorded.
    pub fn command_buffer(&self, slot: CmdSlot) -> Result<D::CommandBuffer> {
        let index = self.slot_index(slot)?;
        self.expect_recording(index)?;
        Ok(self.slots[index].buf)
    }

    /// Makes the slot's submission wait on `semaphore` at `stage`.
    pub fn add_dependency(
        &mut self,
        slot: CmdSlot,
        semaphore: D::Semaphore,
        stage: PipelineStage,
    ) -> Result<()> {
        let index = self.slot_index(slot)?;
        self.expect_recording(index)?;

        let entry = &mut self.slots[index];
        if entry.deps.len() >= MAX_CMD_DEPS {
            error!(
                "Command slot {} already waits on {} semaphores",
                index, MAX_CMD_DEPS
            );
            return Err(GPUError::CapacityExceeded {
                limit: MAX_CMD_DEPS,
            });
        }

        entry.deps.push(semaphore);
        entry.depstages.push(stage);
        Ok(())
    }

    /// Queues `callback` to run once the slot's work has completed.
    ///
    /// If the slot was already collected the callback runs immediately.
    pub fn add_callback<F>(&mut self, slot: CmdSlot, callback: F) -> Result<()>
    where
        F: FnOnce() + 'static,
    {
        let index = self.slot_index(slot)?;
        let entry = &mut self.slots[index];
        if entry.state == SlotState::Idle {
            callback();
        } else {
            entry.callbacks.push(Box::new(callback));
        }
        Ok(())
    }

    /// Ends recording and submits the slot on the next queue in turn.
    ///
    /// With `want_signal` the returned semaphore is signaled when the work
    /// completes; later submissions can depend on it. Device rejections come
    /// back as [`GPUError::SubmitError`] and are not retried.
    pub fn submit(&mut self, slot: CmdSlot, want_signal: bool) -> Result<Option<D::Semaphore>> {
        let index = self.slot_index(slot)?;
        self.expect_recording(index)?;

        let queue = self.queues[self.queue_index.get()];
        self.queue_index.advance();

        let device = &self.device;
        let entry = &mut self.slots[index];

        let prepared = device
            .end_command_buffer(entry.buf)
            .and_then(|_| device.reset_fence(entry.fence));
        if let Err(err) = prepared {
            entry.deps.clear();
            entry.depstages.clear();
            entry.state = SlotState::Abandoned;
            return Err(err);
        }

        let signal = want_signal.then_some(entry.done);
        let res = device.queue_submit(
            queue,
            &Submission {
                command_buffer: entry.buf,
                wait_semaphores: &entry.deps,
                wait_stages: &entry.depstages,
                signal_semaphore: signal,
                fence: entry.fence,
            },
        );

        entry.deps.clear();
        entry.depstages.clear();

        match res {
            Ok(()) => {
                trace!(
                    "Submitted command on queue {:?} (QF {})",
                    queue,
                    self.family.index
                );
                entry.state = SlotState::Submitted;
                self.last_submitted = Some(slot);
                Ok(signal)
            }
            Err(err) => {
                error!("Failed submitting command slot {}: {}", index, err);
                entry.state = SlotState::Abandoned;
                Err(GPUError::SubmitError(Box::new(err)))
            }
        }
    }

    /// Gives up on a slot that was begun but never submitted.
    ///
    /// Best-effort: the slot keeps its place in the ring and is returned to
    /// the free set when the collector reaches it. Callbacks already queued
    /// on it still run, in order.
    pub fn discard(&mut self, slot: CmdSlot) -> Result<()> {
        let index = self.slot_index(slot)?;
        self.expect_recording(index)?;

        let entry = &mut self.slots[index];
        entry.deps.clear();
        entry.depstages.clear();
        entry.state = SlotState::Abandoned;
        Ok(())
    }

    /// Whether the work recorded in `slot` is known to be finished.
    pub fn is_complete(&self, slot: CmdSlot) -> bool {
        match self.slot_index(slot) {
            Ok(index) => self.slots[index].state == SlotState::Idle,
            // The slot has been reused since, so this use is long done.
            Err(_) => true,
        }
    }

    fn slot_complete(&self, index: usize) -> Result<bool> {
        let entry = &self.slots[index];
        match entry.state {
            SlotState::Submitted => self.device.fence_signaled(entry.fence),
            SlotState::Recording => Ok(false),
            SlotState::Idle | SlotState::Abandoned => Ok(true),
        }
    }

    fn retire(&mut self, index: usize) {
        let entry = &mut self.slots[index];
        let callbacks = std::mem::take(&mut entry.callbacks);
        entry.state = SlotState::Idle;
        entry.deps.clear();
        entry.depstages.clear();

        if let Some(last) = self.last_submitted {
            if last.index() == index {
                self.last_submitted = None;
            }
        }

        for callback in callbacks {
            callback();
        }
    }

    /// Collects finished slots in submission order.
    ///
    /// A non-zero `timeout` first blocks on the oldest pending slot. Each
    /// finished slot has its callbacks run exactly once; collection stops at
    /// the first slot that is not done yet.
    pub fn poll(&mut self, timeout: Duration) -> Result<()> {
        if !timeout.is_zero() && !self.is_idle() {
            let oldest = &self.slots[self.pending_oldest.get()];
            if oldest.state == SlotState::Submitted {
                self.device.wait_fence(oldest.fence, timeout)?;
            }
        }

        while !self.is_idle() {
            let index = self.pending_oldest.get();
            if !self.slot_complete(index)? {
                break;
            }
            self.retire(index);
            self.pending_oldest.advance();
        }

        Ok(())
    }

    /// Blocks until every submitted slot has completed and been collected.
    ///
    /// Stops early at a slot that is still being recorded, since that slot
    /// cannot finish until it is submitted or discarded.
    pub fn wait_idle(&mut self) -> Result<()> {
        while !self.is_idle() {
            let oldest = &self.slots[self.pending_oldest.get()];
            if oldest.state == SlotState::Recording {
                warn!(
                    "Command slot {} is still recording; not waiting past it",
                    self.pending_oldest.get()
                );
                break;
            }
            self.poll(Duration::MAX)?;
        }
        Ok(())
    }

    /// Runs `callback` once all work submitted so far has finished.
    ///
    /// Hooks onto the last submitted slot, or runs right away when nothing
    /// is in flight. Used to free resources the GPU may still reference.
    pub fn defer<F>(&mut self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        match self.last_submitted {
            Some(slot) => {
                if let Err(err) = self.add_callback(slot, callback) {
                    // last_submitted is cleared on collection, so this slot
                    // is always live.
                    error!("Lost deferred callback: {}", err);
                }
            }
            None => callback(),
        }
    }
}

impl<D: Device> Drop for CommandPool<D> {
    fn drop(&mut self) {
        for entry in self.slots.iter_mut() {
            if entry.state == SlotState::Recording {
                entry.state = SlotState::Abandoned;
            }
        }

        if let Err(err) = self.wait_idle() {
            error!("Failed waiting for command pool to idle: {}", err);
        }

        let bufs: Vec<D::CommandBuffer> = self.slots.iter().map(|s| s.buf).collect();
        for entry in self.slots.drain(..) {
            self.device.destroy_fence(entry.fence);
            self.device.destroy_semaphore(entry.done);
        }
        self.device.free_command_buffers(self.family.index, &bufs);
    }
}
