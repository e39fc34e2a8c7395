use ash::vk;

use crate::gpu::GPUError;

/// Query pairs cycled per timer. Results are read back this many
/// measurements late, which keeps readback from ever blocking.
const QUERY_PAIRS: u32 = 8;

#[derive(Debug)]
pub struct VulkanTimer {
    pub(super) pool: vk::QueryPool,
    index: u32,
    issued: [bool; QUERY_PAIRS as usize],
}

impl VulkanTimer {
    pub(super) fn new(device: &ash::Device) -> Result<Self, GPUError> {
        let info = vk::QueryPoolCreateInfo::builder()
            .query_count(QUERY_PAIRS * 2)
            .query_type(vk::QueryType::TIMESTAMP)
            .build();
        let pool = unsafe { device.create_query_pool(&info, None)? };
        Ok(Self {
            pool,
            index: 0,
            issued: [false; QUERY_PAIRS as usize],
        })
    }

    pub(super) unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_query_pool(self.pool, None);
    }

    pub(super) unsafe fn begin(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let first = self.index * 2;
        device.cmd_reset_query_pool(cmd, self.pool, first, 2);
        device.cmd_write_timestamp(cmd, vk::PipelineStageFlags::TOP_OF_PIPE, self.pool, first);
    }

    /// Ends the current measurement and returns the oldest finished one in
    /// nanoseconds, or 0 if it is not available yet.
    pub(super) unsafe fn end(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        period: f32,
    ) -> u64 {
        let first = self.index * 2;
        device.cmd_write_timestamp(cmd, vk::PipelineStageFlags::BOTTOM_OF_PIPE, self.pool, first + 1);
        self.issued[self.index as usize] = true;
        self.index = (self.index + 1) % QUERY_PAIRS;

        // The pair about to be reused holds the oldest measurement.
        if !self.issued[self.index as usize] {
            return 0;
        }
        let mut data = [0u64; 2];
        let res = device.get_query_pool_results(
            self.pool,
            self.index * 2,
            2,
            &mut data,
            vk::QueryResultFlags::TYPE_64,
        );
        match res {
            Ok(()) => {
                let ticks = data[1].saturating_sub(data[0]);
                (ticks as f64 * period as f64) as u64
            }
            // NOT_READY and friends: skip this sample.
            Err(_) => 0,
        }
    }
}
