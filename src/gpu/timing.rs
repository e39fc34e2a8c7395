#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::Device;

/// Samples kept per timer by default.
pub const PERF_SAMPLE_COUNT: usize = 256;

/// Snapshot of a timer's recent history, in nanoseconds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PassPerf {
    /// Oldest first.
    pub samples: Vec<u64>,
    pub count: usize,
    pub last: u64,
    pub avg: u64,
    pub peak: u64,
}

/// Fixed window of the most recent samples with a running sum and peak.
#[derive(Clone, Debug)]
pub struct SampleRing {
    samples: Vec<u64>,
    index: usize,
    count: usize,
    sum: u64,
    peak: u64,
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new(PERF_SAMPLE_COUNT)
    }
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sample ring needs room for one sample");
        Self {
            samples: vec![0; capacity],
            index: 0,
            count: 0,
            sum: 0,
            peak: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Overwrites the oldest sample.
    pub fn push(&mut self, value: u64) {
        let cap = self.samples.len();
        // Unfilled slots hold zero, so they drop out of the sum for free.
        let old = std::mem::replace(&mut self.samples[self.index], value);
        self.sum = self.sum - old + value;
        self.index = (self.index + 1) % cap;
        self.count = (self.count + 1).min(cap);

        if value >= self.peak {
            self.peak = value;
        } else if old == self.peak {
            self.peak = self.window().max().unwrap_or(0);
        }
    }

    /// Valid samples, oldest first.
    fn window(&self) -> impl Iterator<Item = u64> + '_ {
        let cap = self.samples.len();
        let start = (self.index + cap - self.count) % cap;
        (0..self.count).map(move |i| self.samples[(start + i) % cap])
    }

    pub fn measure(&self) -> PassPerf {
        let cap = self.samples.len();
        let last = if self.count > 0 {
            self.samples[(self.index + cap - 1) % cap]
        } else {
            0
        };

        PassPerf {
            samples: self.window().collect(),
            count: self.count,
            last,
            avg: if self.count > 0 {
                self.sum / self.count as u64
            } else {
                0
            },
            peak: self.peak,
        }
    }
}

/// GPU timer feeding a [`SampleRing`].
///
/// Results come back a few frames late; a stop that has nothing ready yet
/// records no sample.
pub struct TimerPool<D: Device> {
    device: D,
    timer: Option<D::Timer>,
    ring: SampleRing,
    running: bool,
}

impl<D: Device> TimerPool<D> {
    /// `None` if the device cannot time GPU work.
    pub fn create(device: D) -> Option<Self> {
        Self::with_capacity(device, PERF_SAMPLE_COUNT)
    }

    pub fn with_capacity(device: D, capacity: usize) -> Option<Self> {
        let timer = device.create_timer()?;
        Some(Self {
            device,
            timer: Some(timer),
            ring: SampleRing::new(capacity),
            running: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self, cmd: D::CommandBuffer) {
        assert!(!self.running, "timer started twice");
        if let Some(timer) = self.timer.as_mut() {
            self.device.timer_start(timer, cmd);
        }
        self.running = true;
    }

    pub fn stop(&mut self, cmd: D::CommandBuffer) {
        assert!(self.running, "timer stopped without being started");
        self.running = false;
        if let Some(timer) = self.timer.as_mut() {
            let elapsed = self.device.timer_stop(timer, cmd);
            if elapsed > 0 {
                self.ring.push(elapsed);
            }
        }
    }

    pub fn measure(&self) -> PassPerf {
        self.ring.measure()
    }
}

impl<D: Device> Drop for TimerPool<D> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.device.destroy_timer(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::NullDevice;

    #[test]
    fn tracks_sum_and_peak() {
        let mut ring = SampleRing::new(8);
        for v in [5, 9, 3] {
            ring.push(v);
        }
        let perf = ring.measure();
        assert_eq!(perf.count, 3);
        assert_eq!(perf.peak, 9);
        assert_eq!(perf.last, 3);
        assert_eq!(perf.avg, (5 + 9 + 3) / 3);
        assert_eq!(perf.samples, vec![5, 9, 3]);
    }

    #[test]
    fn evicting_the_peak_rescans() {
        let mut ring = SampleRing::new(8);
        for v in [5, 9, 3] {
            ring.push(v);
        }
        for v in [1, 2, 4, 6, 2, 1, 7, 3] {
            ring.push(v);
        }
        let perf = ring.measure();
        assert_eq!(perf.count, 8);
        assert_eq!(perf.peak, 7);
        assert_eq!(perf.samples, vec![1, 2, 4, 6, 2, 1, 7, 3]);
        assert_eq!(perf.avg, (1 + 2 + 4 + 6 + 2 + 1 + 7 + 3) / 8);
    }

    #[test]
    fn empty_ring_reports_zero() {
        let perf = SampleRing::default().measure();
        assert_eq!(perf, PassPerf::default());
    }

    #[test]
    fn timer_records_only_ready_results() {
        let device = NullDevice::new();
        let mut timer = TimerPool::with_capacity(device.clone(), 4).unwrap();
        let cmd = crate::gpu::Device::create_command_buffers(&device, 0, 1).unwrap()[0];

        timer.start(cmd);
        timer.stop(cmd);
        assert_eq!(timer.measure().count, 0);

        device.push_timer_result(1500);
        timer.start(cmd);
        timer.stop(cmd);
        let perf = timer.measure();
        assert_eq!(perf.count, 1);
        assert_eq!(perf.last, 1500);
    }

    #[test]
    #[should_panic(expected = "timer started twice")]
    fn double_start_panics() {
        let device = NullDevice::new();
        let mut timer = TimerPool::create(device.clone()).unwrap();
        let cmd = crate::gpu::Device::create_command_buffers(&device, 0, 1).unwrap()[0];
        timer.start(cmd);
        timer.start(cmd);
    }

    #[test]
    fn unsupported_device_has_no_timer() {
        let device = NullDevice::new();
        device.set_timers_supported(false);
        assert!(TimerPool::create(device).is_none());
    }
}
