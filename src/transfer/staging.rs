//! Blocking staging uploads into device-local memory.
//!
//! Each upload allocates a host-visible buffer, copies the source bytes into
//! it, records a one-time command buffer with the copy, submits it with a
//! fence and waits for that fence. The staging buffer and command buffer are
//! released before the call returns, so on success the destination holds the
//! data and nothing is left behind.

use std::sync::Arc;

use crate::backend::{
    BufferCopyRegion, BufferDescriptor, BufferHandle, BufferUsage, CommandBufferHandle,
    CommandBufferUsage, Extent2d, FenceHandle, GraphicsBackend, SubmitInfo, TextureHandle,
};
use crate::error::{BackendResult, GraphicsResult};

/// Copy offsets inside the staging buffer are kept 4-byte aligned.
const STAGING_ALIGNMENT: u64 = 4;

/// One source span and where it lands in the destination buffer.
#[derive(Debug, Clone, Copy)]
pub struct StagingRegion<'a> {
    pub dst_offset: u64,
    pub data: &'a [u8],
}

/// Counters for completed uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub transfers: u64,
    pub bytes_uploaded: u64,
}

/// Destroys a staging buffer on drop unless disarmed.
struct StagingBuffer<'a> {
    backend: &'a dyn GraphicsBackend,
    buffer: BufferHandle,
    armed: bool,
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.backend.destroy_buffer(self.buffer);
        }
    }
}

/// Frees a command buffer on drop unless disarmed.
struct TransientCommands<'a> {
    backend: &'a dyn GraphicsBackend,
    cmd: CommandBufferHandle,
    armed: bool,
}

impl Drop for TransientCommands<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.backend.free_command_buffer(self.cmd);
        }
    }
}

/// Performs synchronous CPU-to-GPU copies through temporary staging buffers.
pub struct StagingTransfer {
    backend: Arc<dyn GraphicsBackend>,
    fence: FenceHandle,
    stats: TransferStats,
}

impl StagingTransfer {
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> BackendResult<Self> {
        let fence = backend.create_fence(false)?;
        Ok(Self {
            backend,
            fence,
            stats: TransferStats::default(),
        })
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Copy `data` into `dst` at `dst_offset` and wait for the copy to finish.
    pub fn upload(&mut self, dst: BufferHandle, dst_offset: u64, data: &[u8]) -> GraphicsResult<()> {
        self.upload_regions(dst, &[StagingRegion { dst_offset, data }])
    }

    /// Copy several spans into `dst` with one staging buffer and one
    /// submission, then wait for completion.
    pub fn upload_regions(
        &mut self,
        dst: BufferHandle,
        regions: &[StagingRegion<'_>],
    ) -> GraphicsResult<()> {
        let mut staged = Vec::with_capacity(regions.len());
        let mut size = 0u64;
        for region in regions.iter().filter(|r| !r.data.is_empty()) {
            staged.push(BufferCopyRegion {
                src_offset: size,
                dst_offset: region.dst_offset,
                size: region.data.len() as u64,
            });
            size = align_up(size + region.data.len() as u64, STAGING_ALIGNMENT);
        }
        if staged.is_empty() {
            return Ok(());
        }

        let backend = self.backend.as_ref();
        let staging = create_staging(backend, size)?;
        for (copy, region) in staged
            .iter()
            .zip(regions.iter().filter(|r| !r.data.is_empty()))
        {
            backend.write_buffer(staging.buffer, copy.src_offset, region.data)?;
        }

        let src = staging.buffer;
        submit_and_wait(backend, self.fence, staging, |cmd| {
            backend.cmd_copy_buffer(cmd, src, dst, &staged)
        })?;

        let bytes: u64 = staged.iter().map(|c| c.size).sum();
        self.stats.transfers += 1;
        self.stats.bytes_uploaded += bytes;
        log::trace!(
            "staged {} bytes in {} region(s) into buffer {}",
            bytes,
            staged.len(),
            dst.raw()
        );
        Ok(())
    }

    /// Copy tightly packed RGBA8 pixels into `texture` and wait for the copy
    /// to finish.
    pub fn upload_texture(
        &mut self,
        texture: TextureHandle,
        extent: Extent2d,
        pixels: &[u8],
    ) -> GraphicsResult<()> {
        if pixels.is_empty() {
            return Ok(());
        }
        let backend = self.backend.as_ref();
        let staging = create_staging(backend, pixels.len() as u64)?;
        backend.write_buffer(staging.buffer, 0, pixels)?;

        let src = staging.buffer;
        submit_and_wait(backend, self.fence, staging, |cmd| {
            backend.cmd_copy_buffer_to_texture(cmd, src, 0, texture, extent)
        })?;
        self.stats.transfers += 1;
        self.stats.bytes_uploaded += pixels.len() as u64;
        log::trace!(
            "staged {}x{} texture ({} bytes) into texture {}",
            extent.width,
            extent.height,
            pixels.len(),
            texture.raw()
        );
        Ok(())
    }
}

impl Drop for StagingTransfer {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.fence);
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn create_staging(backend: &dyn GraphicsBackend, size: u64) -> BackendResult<StagingBuffer<'_>> {
    let buffer = backend.create_buffer(
        &BufferDescriptor::new(size, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC)
            .with_label("staging"),
    )?;
    Ok(StagingBuffer {
        backend,
        buffer,
        armed: true,
    })
}

/// Record with `record` into a one-time command buffer, submit it and block
/// until `fence` signals. The staging buffer and command buffer are released
/// on return.
fn submit_and_wait(
    backend: &dyn GraphicsBackend,
    fence: FenceHandle,
    mut staging: StagingBuffer<'_>,
    record: impl FnOnce(CommandBufferHandle) -> BackendResult<()>,
) -> GraphicsResult<()> {
    let cmd = backend.allocate_command_buffer()?;
    let mut commands = TransientCommands {
        backend,
        cmd,
        armed: true,
    };

    backend.begin_command_buffer(cmd, CommandBufferUsage::OneTimeSubmit)?;
    record(cmd)?;
    backend.end_command_buffer(cmd)?;

    backend.reset_fence(fence)?;
    backend.submit(&SubmitInfo {
        wait_semaphores: &[],
        command_buffers: &[cmd],
        signal_semaphores: &[],
        fence: Some(fence),
    })?;

    if let Err(err) = backend.wait_for_fence(fence) {
        // The copy may still be reading these; leak them instead.
        log::error!("staging transfer did not complete: {}", err);
        staging.armed = false;
        commands.armed = false;
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, TextureDescriptor, TextureFormat};

    fn setup() -> (Arc<HeadlessBackend>, StagingTransfer) {
        let backend = Arc::new(HeadlessBackend::new(8, 8, 2).unwrap());
        let transfer = StagingTransfer::new(backend.clone()).unwrap();
        (backend, transfer)
    }

    fn device_buffer(backend: &HeadlessBackend, size: u64) -> BufferHandle {
        backend
            .create_buffer(&BufferDescriptor::new(
                size,
                BufferUsage::VERTEX | BufferUsage::COPY_DST,
            ))
            .unwrap()
    }

    #[test]
    fn test_upload_completes_before_return() {
        let (backend, mut transfer) = setup();
        let dst = device_buffer(&backend, 16);

        transfer.upload(dst, 4, &[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(
            backend.read_buffer(dst, 0, 12).unwrap(),
            vec![0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 0, 0]
        );
        let stats = backend.stats();
        assert_eq!(stats.pending_submissions, 0);
        assert_eq!(stats.live_host_visible_bytes, 0);
        assert_eq!(stats.live_buffers, 1);
        assert_eq!(stats.live_command_buffers, 0);
        assert_eq!(transfer.stats().bytes_uploaded, 6);
    }

    #[test]
    fn test_combined_upload_uses_one_submission() {
        let (backend, mut transfer) = setup();
        let dst = device_buffer(&backend, 32);

        transfer
            .upload_regions(
                dst,
                &[
                    StagingRegion {
                        dst_offset: 0,
                        data: &[7; 6],
                    },
                    StagingRegion {
                        dst_offset: 16,
                        data: &[9; 8],
                    },
                ],
            )
            .unwrap();

        assert_eq!(backend.submission_log().len(), 1);
        let copies = backend.copy_log();
        assert_eq!(copies.len(), 1);
        // Second span starts at the next 4-byte boundary of the staging buffer
        assert_eq!(copies[0].regions, vec![(0, 0, 6), (8, 16, 8)]);
        assert_eq!(backend.read_buffer(dst, 0, 6).unwrap(), vec![7; 6]);
        assert_eq!(backend.read_buffer(dst, 16, 8).unwrap(), vec![9; 8]);
    }

    #[test]
    fn test_empty_upload_is_a_no_op() {
        let (backend, mut transfer) = setup();
        let dst = device_buffer(&backend, 4);
        transfer.upload(dst, 0, &[]).unwrap();
        assert!(backend.submission_log().is_empty());
    }

    #[test]
    fn test_texture_upload() {
        let (backend, mut transfer) = setup();
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d(2, 1, TextureFormat::Rgba8UnormSrgb))
            .unwrap();
        let pixels = [1, 2, 3, 4, 5, 6, 7, 8];
        transfer
            .upload_texture(texture, Extent2d::new(2, 1), &pixels)
            .unwrap();
        assert_eq!(backend.texture_data(texture).unwrap(), pixels.to_vec());
    }

    #[test]
    fn test_stalled_device_is_an_error() {
        let (backend, mut transfer) = setup();
        let dst = device_buffer(&backend, 4);
        backend.set_stalled(true);
        let err = transfer.upload(dst, 0, &[1, 2, 3, 4]).unwrap_err();
        assert!(err.is_fatal());
        // Nothing was freed under the pending copy
        assert_eq!(backend.stats().destroyed_while_pending, 0);
    }
}
