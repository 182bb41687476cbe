//! `wgpu` backend for [`TransferQueue`].

use crate::upload::{ChannelSet, TransferQueue, UploadSignal};

/// Storage buffers plus queue writes; completion is reported through
/// `Queue::on_submitted_work_done`, so the owner must keep polling the device.
pub struct WgpuTransfer<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
}

impl<'a> WgpuTransfer<'a> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

impl TransferQueue for WgpuTransfer<'_> {
    type Buffer = wgpu::Buffer;

    fn create_channel_buffer(&self, label: &str, byte_len: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: byte_len.max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn upload_channels(&self, dst: &ChannelSet<wgpu::Buffer>, src: ChannelSet<&[u32]>, signal: UploadSignal) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        for (channel, &data) in src.iter() {
            if !data.is_empty() {
                self.queue
                    .write_buffer(dst.get(channel), 0, bytemuck::cast_slice(data));
            }
        }

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            signal.fail(err.to_string());
            return;
        }

        // Flush the staged writes so the callback tracks them.
        self.queue.submit(std::iter::empty());
        self.queue.on_submitted_work_done(move || signal.complete());
    }
}
