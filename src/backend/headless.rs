//! Host-memory backend for tests and tooling.
//!
//! This backend needs no GPU. Buffers and textures are plain byte vectors,
//! recorded copies really move bytes, and draws are logged. Submitted work
//! stays pending like it would on a device queue: it only executes (and
//! signals its fence) when a fence on it or on a later submission is waited,
//! or when the queue or device is idled. That keeps the ordering rules of the
//! frame protocol observable:
//!
//! - resetting a command buffer that is still pending is rejected and counted
//! - waiting on a semaphore nobody signaled is rejected
//! - destroying a resource referenced by pending work is counted as a hazard
//!
//! Fault injection (`force_out_of_date_*`, [`HeadlessBackend::set_stalled`])
//! drives the recoverable and fatal paths of the frame loop.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::traits::GraphicsBackend;
use crate::backend::types::*;
use crate::error::{BackendError, BackendResult};

/// Where a logged copy wrote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyTarget {
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

/// A copy that executed on the simulated queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub src: BufferHandle,
    pub dst: CopyTarget,
    /// `(src_offset, dst_offset, size)` per region. Texture copies have one
    /// region with `dst_offset == 0`.
    pub regions: Vec<(u64, u64, u64)>,
}

impl CopyRecord {
    /// Total bytes moved by this copy.
    pub fn bytes(&self) -> u64 {
        self.regions.iter().map(|r| r.2).sum()
    }
}

/// An indexed draw that executed on the simulated queue, with the state bound
/// at the time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub image_index: u32,
    pub pipeline: Option<PipelineHandle>,
    pub vertex_buffer: BufferHandle,
    pub vertex_buffer_offset: u64,
    pub index_buffer: BufferHandle,
    pub index_buffer_offset: u64,
    pub args: DrawIndexedArgs,
}

/// A submission accepted by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub command_buffers: Vec<CommandBufferHandle>,
    pub wait_semaphores: Vec<SemaphoreHandle>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
}

/// A present request and its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRecord {
    pub image_index: u32,
    pub wait_semaphore: SemaphoreHandle,
    pub status: PresentStatus,
}

/// Counters describing the simulated device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub live_buffers: usize,
    pub live_textures: usize,
    pub live_command_buffers: usize,
    pub live_fences: usize,
    pub live_semaphores: usize,
    /// Bytes held by host-visible (staging) buffers.
    pub live_host_visible_bytes: u64,
    pub pending_submissions: usize,
    pub max_pending_submissions: usize,
    pub total_submissions: u64,
    /// Resets of a command buffer that was still pending execution.
    pub unsafe_command_buffer_resets: u64,
    /// Resources destroyed or freed while pending work still referenced them.
    pub destroyed_while_pending: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
    /// A one-time-submit buffer that completed; only reset or free is valid.
    Invalid,
}

#[derive(Debug, Clone)]
enum Command {
    CopyBuffer {
        src: u64,
        dst: u64,
        regions: Vec<BufferCopyRegion>,
    },
    CopyBufferToTexture {
        src: u64,
        src_offset: u64,
        dst: u64,
        size: u64,
    },
    BeginFramePass {
        image_index: u32,
    },
    EndFramePass,
    BindPipeline(PipelineHandle),
    BindVertexBuffer(u64, u64),
    BindIndexBuffer(u64, u64),
    SetViewport,
    DrawIndexed(DrawIndexedArgs),
}

impl Command {
    fn references_buffer(&self, id: u64) -> bool {
        match self {
            Command::CopyBuffer { src, dst, .. } => *src == id || *dst == id,
            Command::CopyBufferToTexture { src, .. } => *src == id,
            Command::BindVertexBuffer(buffer, _) | Command::BindIndexBuffer(buffer, _) => {
                *buffer == id
            }
            _ => false,
        }
    }

    fn references_texture(&self, id: u64) -> bool {
        matches!(self, Command::CopyBufferToTexture { dst, .. } if *dst == id)
    }
}

struct HeadlessCommandBuffer {
    state: CommandBufferState,
    usage: CommandBufferUsage,
    commands: Vec<Command>,
    /// Image of the frame pass currently open during recording.
    open_pass: Option<u32>,
    vertex_bound: bool,
    /// Size in bytes of the bound index range, for draw validation.
    index_range: Option<u64>,
}

struct HeadlessBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

struct HeadlessTexture {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

struct PendingSubmission {
    command_buffers: Vec<u64>,
    fence: Option<u64>,
}

struct HeadlessSwapchain {
    extent: Extent2d,
    image_count: u32,
    next_image: u32,
    acquired: Vec<bool>,
    stale: bool,
}

impl HeadlessSwapchain {
    fn new(extent: Extent2d, image_count: u32) -> Self {
        Self {
            extent,
            image_count,
            next_image: 0,
            acquired: vec![false; image_count as usize],
            stale: false,
        }
    }
}

#[derive(Default)]
struct HeadlessFaults {
    out_of_date_on_next_present: bool,
    fail_next_submit: bool,
    stalled: bool,
}

struct HeadlessState {
    next_id: u64,
    buffers: HashMap<u64, HeadlessBuffer>,
    textures: HashMap<u64, HeadlessTexture>,
    command_buffers: HashMap<u64, HeadlessCommandBuffer>,
    fences: HashMap<u64, bool>,
    /// `true` while a signal operation is queued and not yet consumed by a wait.
    semaphores: HashMap<u64, bool>,
    pipelines: HashMap<u64, String>,
    pending: VecDeque<PendingSubmission>,
    swapchain: HeadlessSwapchain,
    faults: HeadlessFaults,
    stats: HeadlessStats,
    submission_log: Vec<SubmissionRecord>,
    copy_log: Vec<CopyRecord>,
    draw_log: Vec<DrawRecord>,
    present_log: Vec<PresentRecord>,
}

impl HeadlessState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn recording(&mut self, cmd: CommandBufferHandle) -> BackendResult<&mut HeadlessCommandBuffer> {
        let buffer = self
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "command buffer",
                id: cmd.0,
            })?;
        if buffer.state != CommandBufferState::Recording {
            return Err(BackendError::InvalidUsage(format!(
                "command buffer {} is not recording ({:?})",
                cmd.0, buffer.state
            )));
        }
        Ok(buffer)
    }

    fn buffer(&self, buffer: BufferHandle) -> BackendResult<&HeadlessBuffer> {
        self.buffers.get(&buffer.0).ok_or(BackendError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })
    }

    fn pending_references(&self, pred: impl Fn(&Command) -> bool) -> bool {
        self.pending.iter().any(|submission| {
            submission.command_buffers.iter().any(|id| {
                self.command_buffers
                    .get(id)
                    .map(|cb| cb.commands.iter().any(&pred))
                    .unwrap_or(false)
            })
        })
    }

    fn validate_semaphore_wait(&self, semaphore: SemaphoreHandle) -> BackendResult<()> {
        match self.semaphores.get(&semaphore.0) {
            None => Err(BackendError::InvalidHandle {
                kind: "semaphore",
                id: semaphore.0,
            }),
            Some(false) => Err(BackendError::InvalidUsage(format!(
                "wait on semaphore {} which has no pending signal",
                semaphore.0
            ))),
            Some(true) => Ok(()),
        }
    }

    fn validate_semaphore_signal(&self, semaphore: SemaphoreHandle) -> BackendResult<()> {
        match self.semaphores.get(&semaphore.0) {
            None => Err(BackendError::InvalidHandle {
                kind: "semaphore",
                id: semaphore.0,
            }),
            Some(true) => Err(BackendError::InvalidUsage(format!(
                "semaphore {} is already signaled",
                semaphore.0
            ))),
            Some(false) => Ok(()),
        }
    }

    /// Execute pending submissions in queue order up to and including the one
    /// at `last` (an index into `pending`).
    fn retire_through(&mut self, last: usize) {
        for _ in 0..=last {
            let Some(submission) = self.pending.pop_front() else {
                break;
            };
            for id in &submission.command_buffers {
                self.execute(*id);
            }
            if let Some(fence) = submission.fence {
                if let Some(signaled) = self.fences.get_mut(&fence) {
                    *signaled = true;
                }
            }
        }
        self.stats.pending_submissions = self.pending.len();
    }

    fn retire_all(&mut self) {
        if !self.pending.is_empty() {
            self.retire_through(self.pending.len() - 1);
        }
    }

    fn execute(&mut self, id: u64) {
        let Some(cb) = self.command_buffers.get_mut(&id) else {
            log::error!("HeadlessBackend: command buffer {} freed before execution", id);
            return;
        };
        cb.state = match cb.usage {
            CommandBufferUsage::OneTimeSubmit => CommandBufferState::Invalid,
            CommandBufferUsage::Reusable => CommandBufferState::Executable,
        };
        let commands = cb.commands.clone();

        let mut image_index = 0;
        let mut pipeline = None;
        let mut vertex = None;
        let mut index = None;
        for command in commands {
            match command {
                Command::CopyBuffer { src, dst, regions } => {
                    self.execute_buffer_copy(src, dst, &regions);
                }
                Command::CopyBufferToTexture {
                    src,
                    src_offset,
                    dst,
                    size,
                } => {
                    self.execute_texture_copy(src, src_offset, dst, size);
                }
                Command::BeginFramePass { image_index: image } => image_index = image,
                Command::EndFramePass | Command::SetViewport => {}
                Command::BindPipeline(handle) => pipeline = Some(handle),
                Command::BindVertexBuffer(buffer, offset) => vertex = Some((buffer, offset)),
                Command::BindIndexBuffer(buffer, offset) => index = Some((buffer, offset)),
                Command::DrawIndexed(args) => {
                    if let (Some((vb, vb_offset)), Some((ib, ib_offset))) = (vertex, index) {
                        log::trace!(
                            "HeadlessBackend: draw {} indices from {} (base vertex {}) into image {}",
                            args.index_count,
                            args.first_index,
                            args.vertex_offset,
                            image_index
                        );
                        self.draw_log.push(DrawRecord {
                            image_index,
                            pipeline,
                            vertex_buffer: BufferHandle(vb),
                            vertex_buffer_offset: vb_offset,
                            index_buffer: BufferHandle(ib),
                            index_buffer_offset: ib_offset,
                            args,
                        });
                    }
                }
            }
        }
    }

    fn execute_buffer_copy(&mut self, src: u64, dst: u64, regions: &[BufferCopyRegion]) {
        let Some(src_data) = self.buffers.get(&src).map(|b| b.data.clone()) else {
            log::error!("HeadlessBackend: copy source buffer {} destroyed before execution", src);
            return;
        };
        let Some(dst_buffer) = self.buffers.get_mut(&dst) else {
            log::error!("HeadlessBackend: copy destination buffer {} destroyed before execution", dst);
            return;
        };
        for region in regions {
            let src_range = region.src_offset as usize..(region.src_offset + region.size) as usize;
            let dst_range = region.dst_offset as usize..(region.dst_offset + region.size) as usize;
            dst_buffer.data[dst_range].copy_from_slice(&src_data[src_range]);
        }
        log::trace!(
            "HeadlessBackend: copied {} region(s) from buffer {} to buffer {}",
            regions.len(),
            src,
            dst
        );
        self.copy_log.push(CopyRecord {
            src: BufferHandle(src),
            dst: CopyTarget::Buffer(BufferHandle(dst)),
            regions: regions
                .iter()
                .map(|r| (r.src_offset, r.dst_offset, r.size))
                .collect(),
        });
    }

    fn execute_texture_copy(&mut self, src: u64, src_offset: u64, dst: u64, size: u64) {
        let Some(src_data) = self
            .buffers
            .get(&src)
            .map(|b| b.data[src_offset as usize..(src_offset + size) as usize].to_vec())
        else {
            log::error!("HeadlessBackend: copy source buffer {} destroyed before execution", src);
            return;
        };
        let Some(texture) = self.textures.get_mut(&dst) else {
            log::error!("HeadlessBackend: copy destination texture {} destroyed before execution", dst);
            return;
        };
        texture.data.copy_from_slice(&src_data);
        log::trace!(
            "HeadlessBackend: copied {} bytes from buffer {} to texture {}",
            size,
            src,
            dst
        );
        self.copy_log.push(CopyRecord {
            src: BufferHandle(src),
            dst: CopyTarget::Texture(TextureHandle(dst)),
            regions: vec![(src_offset, 0, size)],
        });
    }
}

/// Host-memory implementation of [`GraphicsBackend`].
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
}

impl HeadlessBackend {
    /// Create a headless device with a simulated swapchain.
    pub fn new(width: u32, height: u32, image_count: u32) -> BackendResult<Self> {
        if width == 0 || height == 0 {
            return Err(BackendError::SwapchainCreationFailed(format!(
                "invalid extent {}x{}",
                width, height
            )));
        }
        if image_count == 0 {
            return Err(BackendError::SwapchainCreationFailed(
                "swapchain needs at least one image".to_string(),
            ));
        }

        log::info!(
            "HeadlessBackend: created {}x{} swapchain with {} images",
            width,
            height,
            image_count
        );

        Ok(Self {
            state: Mutex::new(HeadlessState {
                next_id: 0,
                buffers: HashMap::new(),
                textures: HashMap::new(),
                command_buffers: HashMap::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                pipelines: HashMap::new(),
                pending: VecDeque::new(),
                swapchain: HeadlessSwapchain::new(Extent2d::new(width, height), image_count),
                faults: HeadlessFaults::default(),
                stats: HeadlessStats::default(),
                submission_log: Vec::new(),
                copy_log: Vec::new(),
                draw_log: Vec::new(),
                present_log: Vec::new(),
            }),
        })
    }

    /// Register a pipeline object. Pipeline creation itself happens outside
    /// this crate; the headless device only needs a bindable handle.
    pub fn create_pipeline(&self, label: &str) -> PipelineHandle {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.pipelines.insert(id, label.to_string());
        PipelineHandle(id)
    }

    /// Make the next acquire (and every one after it until the swapchain is
    /// recreated) report a stale surface, as after a window resize.
    pub fn force_out_of_date_on_next_acquire(&self) {
        self.state.lock().swapchain.stale = true;
    }

    /// Make the next present report [`PresentStatus::OutOfDate`].
    pub fn force_out_of_date_on_next_present(&self) {
        self.state.lock().faults.out_of_date_on_next_present = true;
    }

    /// Make the next queue submission fail with [`BackendError::DeviceLost`]
    /// before it touches any command buffer, semaphore or fence.
    pub fn fail_next_submit(&self) {
        self.state.lock().faults.fail_next_submit = true;
    }

    /// Simulate a hung device: pending work never completes. Blocking fence
    /// waits on pending work fail with [`BackendError::FenceNeverSignaled`]
    /// and timed waits time out.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().faults.stalled = stalled;
    }

    pub fn stats(&self) -> HeadlessStats {
        let state = self.state.lock();
        let mut stats = state.stats;
        stats.live_buffers = state.buffers.len();
        stats.live_textures = state.textures.len();
        stats.live_command_buffers = state.command_buffers.len();
        stats.live_fences = state.fences.len();
        stats.live_semaphores = state.semaphores.len();
        stats.live_host_visible_bytes = state
            .buffers
            .values()
            .filter(|b| b.desc.usage.is_host_visible())
            .map(|b| b.desc.size)
            .sum();
        stats.pending_submissions = state.pending.len();
        stats
    }

    pub fn submission_log(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submission_log.clone()
    }

    pub fn copy_log(&self) -> Vec<CopyRecord> {
        self.state.lock().copy_log.clone()
    }

    pub fn draw_log(&self) -> Vec<DrawRecord> {
        self.state.lock().draw_log.clone()
    }

    pub fn present_log(&self) -> Vec<PresentRecord> {
        self.state.lock().present_log.clone()
    }

    /// Contents of a texture, if it exists.
    pub fn texture_data(&self, texture: TextureHandle) -> Option<Vec<u8>> {
        self.state
            .lock()
            .textures
            .get(&texture.0)
            .map(|t| t.data.clone())
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless Backend"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "buffer {:?} has zero size",
                desc.label
            )));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        log::trace!(
            "HeadlessBackend: creating buffer {} {:?} (size: {}, usage: {:?})",
            id,
            desc.label,
            desc.size,
            desc.usage
        );
        state.buffers.insert(
            id,
            HeadlessBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let target = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        if !target.desc.usage.contains(BufferUsage::MAP_WRITE) {
            return Err(BackendError::InvalidUsage(format!(
                "buffer {} is not host-writable",
                buffer.0
            )));
        }
        let end = offset + data.len() as u64;
        if end > target.desc.size {
            return Err(BackendError::InvalidUsage(format!(
                "write of {} bytes at {} overruns buffer {} of size {}",
                data.len(),
                offset,
                buffer.0,
                target.desc.size
            )));
        }
        target.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let state = self.state.lock();
        let source = state.buffer(buffer)?;
        if offset + size > source.desc.size {
            return Err(BackendError::InvalidUsage(format!(
                "read of {} bytes at {} overruns buffer {} of size {}",
                size, offset, buffer.0, source.desc.size
            )));
        }
        Ok(source.data[offset as usize..(offset + size) as usize].to_vec())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        if state.pending_references(|c| c.references_buffer(buffer.0)) {
            log::error!(
                "HeadlessBackend: buffer {} destroyed while pending work references it",
                buffer.0
            );
            state.stats.destroyed_while_pending += 1;
        }
        state.buffers.remove(&buffer.0);
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.extent.is_empty() {
            return Err(BackendError::TextureCreationFailed(format!(
                "texture {:?} has empty extent {}x{}",
                desc.label, desc.extent.width, desc.extent.height
            )));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        log::trace!(
            "HeadlessBackend: creating texture {} {:?} ({}x{})",
            id,
            desc.label,
            desc.extent.width,
            desc.extent.height
        );
        state.textures.insert(
            id,
            HeadlessTexture {
                desc: desc.clone(),
                data: vec![0; desc.byte_size() as usize],
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.state.lock();
        if state.pending_references(|c| c.references_texture(texture.0)) {
            log::error!(
                "HeadlessBackend: texture {} destroyed while pending work references it",
                texture.0
            );
            state.stats.destroyed_while_pending += 1;
        }
        state.textures.remove(&texture.0);
    }

    fn allocate_command_buffer(&self) -> BackendResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.command_buffers.insert(
            id,
            HeadlessCommandBuffer {
                state: CommandBufferState::Initial,
                usage: CommandBufferUsage::OneTimeSubmit,
                commands: Vec::new(),
                open_pass: None,
                vertex_bound: false,
                index_range: None,
            },
        );
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&self, cmd: CommandBufferHandle) {
        let mut state = self.state.lock();
        let pending = state
            .command_buffers
            .get(&cmd.0)
            .map(|cb| cb.state == CommandBufferState::Pending)
            .unwrap_or(false);
        if pending {
            log::error!(
                "HeadlessBackend: command buffer {} freed while pending execution",
                cmd.0
            );
            state.stats.destroyed_while_pending += 1;
        }
        state.command_buffers.remove(&cmd.0);
    }

    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let cb = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "command buffer",
                id: cmd.0,
            })?;
        if cb.state == CommandBufferState::Pending {
            state.stats.unsafe_command_buffer_resets += 1;
            log::error!(
                "HeadlessBackend: reset of command buffer {} while pending execution",
                cmd.0
            );
            return Err(BackendError::CommandBufferInUse(cmd.0));
        }
        cb.state = CommandBufferState::Initial;
        cb.commands.clear();
        cb.open_pass = None;
        cb.vertex_bound = false;
        cb.index_range = None;
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let cb = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "command buffer",
                id: cmd.0,
            })?;
        match cb.state {
            CommandBufferState::Initial => {}
            CommandBufferState::Pending => return Err(BackendError::CommandBufferInUse(cmd.0)),
            other => {
                return Err(BackendError::InvalidUsage(format!(
                    "begin on command buffer {} in state {:?} without reset",
                    cmd.0, other
                )))
            }
        }
        cb.state = CommandBufferState::Recording;
        cb.usage = usage;
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let cb = state.recording(cmd)?;
        if cb.open_pass.is_some() {
            return Err(BackendError::InvalidUsage(format!(
                "command buffer {} ended inside a frame pass",
                cmd.0
            )));
        }
        cb.state = CommandBufferState::Executable;
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopyRegion],
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let src_buffer = state.buffer(src)?;
        let dst_buffer = state.buffer(dst)?;
        if !src_buffer.desc.usage.contains(BufferUsage::COPY_SRC) {
            return Err(BackendError::InvalidUsage(format!(
                "buffer {} lacks COPY_SRC usage",
                src.0
            )));
        }
        if !dst_buffer.desc.usage.contains(BufferUsage::COPY_DST) {
            return Err(BackendError::InvalidUsage(format!(
                "buffer {} lacks COPY_DST usage",
                dst.0
            )));
        }
        for region in regions {
            if region.src_offset + region.size > src_buffer.desc.size
                || region.dst_offset + region.size > dst_buffer.desc.size
            {
                return Err(BackendError::InvalidUsage(format!(
                    "copy region {:?} out of bounds (src size {}, dst size {})",
                    region, src_buffer.desc.size, dst_buffer.desc.size
                )));
            }
        }
        state.recording(cmd)?.commands.push(Command::CopyBuffer {
            src: src.0,
            dst: dst.0,
            regions: regions.to_vec(),
        });
        Ok(())
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: TextureHandle,
        extent: Extent2d,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let src_buffer = state.buffer(src)?;
        let texture = state.textures.get(&dst.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: dst.0,
        })?;
        if texture.desc.extent != extent {
            return Err(BackendError::InvalidUsage(format!(
                "copy extent {}x{} does not match texture {} extent {}x{}",
                extent.width,
                extent.height,
                dst.0,
                texture.desc.extent.width,
                texture.desc.extent.height
            )));
        }
        let size = texture.desc.byte_size();
        if !src_buffer.desc.usage.contains(BufferUsage::COPY_SRC)
            || src_offset + size > src_buffer.desc.size
        {
            return Err(BackendError::InvalidUsage(format!(
                "buffer {} cannot source {} texture bytes at offset {}",
                src.0, size, src_offset
            )));
        }
        state
            .recording(cmd)?
            .commands
            .push(Command::CopyBufferToTexture {
                src: src.0,
                src_offset,
                dst: dst.0,
                size,
            });
        Ok(())
    }

    fn cmd_begin_frame_pass(
        &self,
        cmd: CommandBufferHandle,
        image_index: u32,
        _clear_color: [f32; 4],
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if image_index >= state.swapchain.image_count {
            return Err(BackendError::InvalidUsage(format!(
                "swapchain image {} out of range",
                image_index
            )));
        }
        let cb = state.recording(cmd)?;
        if cb.open_pass.is_some() {
            return Err(BackendError::InvalidUsage(
                "frame pass begun inside another frame pass".to_string(),
            ));
        }
        cb.open_pass = Some(image_index);
        cb.commands.push(Command::BeginFramePass { image_index });
        Ok(())
    }

    fn cmd_end_frame_pass(&self, cmd: CommandBufferHandle, image_index: u32) -> BackendResult<()> {
        let mut state = self.state.lock();
        let cb = state.recording(cmd)?;
        if cb.open_pass != Some(image_index) {
            return Err(BackendError::InvalidUsage(format!(
                "no frame pass open for image {}",
                image_index
            )));
        }
        cb.open_pass = None;
        cb.commands.push(Command::EndFramePass);
        Ok(())
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if !state.pipelines.contains_key(&pipeline.0) {
            return Err(BackendError::InvalidHandle {
                kind: "pipeline",
                id: pipeline.0,
            });
        }
        state
            .recording(cmd)?
            .commands
            .push(Command::BindPipeline(pipeline));
        Ok(())
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let target = state.buffer(buffer)?;
        if !target.desc.usage.contains(BufferUsage::VERTEX) || offset > target.desc.size {
            return Err(BackendError::InvalidUsage(format!(
                "buffer {} cannot be bound as vertex buffer at offset {}",
                buffer.0, offset
            )));
        }
        let cb = state.recording(cmd)?;
        cb.vertex_bound = true;
        cb.commands.push(Command::BindVertexBuffer(buffer.0, offset));
        Ok(())
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let target = state.buffer(buffer)?;
        if !target.desc.usage.contains(BufferUsage::INDEX)
            || offset > target.desc.size
            || offset % 4 != 0
        {
            return Err(BackendError::InvalidUsage(format!(
                "buffer {} cannot be bound as index buffer at offset {}",
                buffer.0, offset
            )));
        }
        let range = target.desc.size - offset;
        let cb = state.recording(cmd)?;
        cb.index_range = Some(range);
        cb.commands.push(Command::BindIndexBuffer(buffer.0, offset));
        Ok(())
    }

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport) -> BackendResult<()> {
        if viewport.width <= 0.0 || viewport.height <= 0.0 {
            return Err(BackendError::InvalidUsage(format!(
                "degenerate viewport {:?}",
                viewport
            )));
        }
        let mut state = self.state.lock();
        state.recording(cmd)?.commands.push(Command::SetViewport);
        Ok(())
    }

    fn cmd_draw_indexed(
        &self,
        cmd: CommandBufferHandle,
        args: &DrawIndexedArgs,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        let cb = state.recording(cmd)?;
        if cb.open_pass.is_none() {
            return Err(BackendError::InvalidUsage(
                "draw recorded outside a frame pass".to_string(),
            ));
        }
        let Some(index_range) = cb.index_range else {
            return Err(BackendError::InvalidUsage(
                "draw recorded without an index buffer".to_string(),
            ));
        };
        if !cb.vertex_bound {
            return Err(BackendError::InvalidUsage(
                "draw recorded without a vertex buffer".to_string(),
            ));
        }
        let end = (args.first_index as u64 + args.index_count as u64) * 4;
        if end > index_range {
            return Err(BackendError::InvalidUsage(format!(
                "draw reads indices [{}, {}) beyond the bound index range of {} bytes",
                args.first_index,
                args.first_index + args.index_count,
                index_range
            )));
        }
        cb.commands.push(Command::DrawIndexed(*args));
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.fences.insert(id, signaled);
        Ok(FenceHandle(id))
    }

    fn wait_for_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let signaled = *state.fences.get(&fence.0).ok_or(BackendError::InvalidHandle {
            kind: "fence",
            id: fence.0,
        })?;
        if signaled {
            return Ok(());
        }
        let position = state
            .pending
            .iter()
            .position(|s| s.fence == Some(fence.0));
        match position {
            Some(position) if !state.faults.stalled => {
                state.retire_through(position);
                Ok(())
            }
            _ => Err(BackendError::FenceNeverSignaled(fence.0)),
        }
    }

    fn wait_for_fence_timeout(&self, fence: FenceHandle, timeout: Duration) -> BackendResult<bool> {
        let mut state = self.state.lock();
        let signaled = *state.fences.get(&fence.0).ok_or(BackendError::InvalidHandle {
            kind: "fence",
            id: fence.0,
        })?;
        if signaled {
            return Ok(true);
        }
        let position = state
            .pending
            .iter()
            .position(|s| s.fence == Some(fence.0));
        match position {
            Some(position) if !state.faults.stalled => {
                state.retire_through(position);
                Ok(true)
            }
            _ => {
                log::trace!(
                    "HeadlessBackend: fence {} not signaled within {:?}",
                    fence.0,
                    timeout
                );
                Ok(false)
            }
        }
    }

    fn fence_status(&self, fence: FenceHandle) -> BackendResult<FenceStatus> {
        let state = self.state.lock();
        match state.fences.get(&fence.0) {
            Some(true) => Ok(FenceStatus::Signaled),
            Some(false) => Ok(FenceStatus::Unsignaled),
            None => Err(BackendError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            }),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.pending.iter().any(|s| s.fence == Some(fence.0)) {
            return Err(BackendError::InvalidUsage(format!(
                "fence {} reset while attached to a pending submission",
                fence.0
            )));
        }
        let signaled = state
            .fences
            .get_mut(&fence.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            })?;
        *signaled = false;
        Ok(())
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if state.pending.iter().any(|s| s.fence == Some(fence.0)) {
            log::error!(
                "HeadlessBackend: fence {} destroyed while attached to pending work",
                fence.0
            );
            state.stats.destroyed_while_pending += 1;
        }
        state.fences.remove(&fence.0);
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.semaphores.insert(id, false);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state.lock().semaphores.remove(&semaphore.0);
    }

    fn submit(&self, info: &SubmitInfo<'_>) -> BackendResult<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.faults.fail_next_submit) {
            log::trace!("HeadlessBackend: injected submit failure");
            return Err(BackendError::DeviceLost);
        }

        for cmd in info.command_buffers {
            let cb = state
                .command_buffers
                .get(&cmd.0)
                .ok_or(BackendError::InvalidHandle {
                    kind: "command buffer",
                    id: cmd.0,
                })?;
            match cb.state {
                CommandBufferState::Executable => {}
                CommandBufferState::Pending => return Err(BackendError::CommandBufferInUse(cmd.0)),
                other => {
                    return Err(BackendError::InvalidUsage(format!(
                        "command buffer {} submitted in state {:?}",
                        cmd.0, other
                    )))
                }
            }
        }
        for (semaphore, _) in info.wait_semaphores {
            state.validate_semaphore_wait(*semaphore)?;
        }
        for semaphore in info.signal_semaphores {
            state.validate_semaphore_signal(*semaphore)?;
        }
        if let Some(fence) = info.fence {
            match state.fences.get(&fence.0) {
                None => {
                    return Err(BackendError::InvalidHandle {
                        kind: "fence",
                        id: fence.0,
                    })
                }
                Some(true) => {
                    return Err(BackendError::InvalidUsage(format!(
                        "fence {} submitted while signaled",
                        fence.0
                    )))
                }
                Some(false) => {}
            }
            if state.pending.iter().any(|s| s.fence == Some(fence.0)) {
                return Err(BackendError::InvalidUsage(format!(
                    "fence {} already attached to a pending submission",
                    fence.0
                )));
            }
        }

        for (semaphore, _) in info.wait_semaphores {
            state.semaphores.insert(semaphore.0, false);
        }
        for semaphore in info.signal_semaphores {
            state.semaphores.insert(semaphore.0, true);
        }
        for cmd in info.command_buffers {
            if let Some(cb) = state.command_buffers.get_mut(&cmd.0) {
                cb.state = CommandBufferState::Pending;
            }
        }
        state.pending.push_back(PendingSubmission {
            command_buffers: info.command_buffers.iter().map(|c| c.0).collect(),
            fence: info.fence.map(|f| f.0),
        });
        state.submission_log.push(SubmissionRecord {
            command_buffers: info.command_buffers.to_vec(),
            wait_semaphores: info.wait_semaphores.iter().map(|(s, _)| *s).collect(),
            signal_semaphores: info.signal_semaphores.to_vec(),
            fence: info.fence,
        });
        state.stats.total_submissions += 1;
        state.stats.pending_submissions = state.pending.len();
        state.stats.max_pending_submissions =
            state.stats.max_pending_submissions.max(state.pending.len());
        Ok(())
    }

    fn queue_wait_idle(&self) -> BackendResult<()> {
        self.state.lock().retire_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> BackendResult<()> {
        self.state.lock().retire_all();
        Ok(())
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage> {
        let mut state = self.state.lock();
        if state.swapchain.stale {
            log::trace!("HeadlessBackend: acquire on stale swapchain");
            return Err(BackendError::SurfaceOutOfDate);
        }
        state.validate_semaphore_signal(signal)?;
        let image_index = state.swapchain.next_image;
        let slot = &mut state.swapchain.acquired[image_index as usize];
        if *slot {
            return Err(BackendError::InvalidUsage(format!(
                "swapchain image {} acquired twice without present",
                image_index
            )));
        }
        *slot = true;
        state.swapchain.next_image = (image_index + 1) % state.swapchain.image_count;
        state.semaphores.insert(signal.0, true);
        Ok(AcquiredImage {
            image_index,
            suboptimal: false,
        })
    }

    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<PresentStatus> {
        let mut state = self.state.lock();
        let acquired = state
            .swapchain
            .acquired
            .get(image_index as usize)
            .copied()
            .unwrap_or(false);
        if !acquired {
            return Err(BackendError::InvalidUsage(format!(
                "present of swapchain image {} which was not acquired",
                image_index
            )));
        }
        state.validate_semaphore_wait(wait)?;
        state.semaphores.insert(wait.0, false);
        state.swapchain.acquired[image_index as usize] = false;

        let status = if std::mem::take(&mut state.faults.out_of_date_on_next_present) {
            state.swapchain.stale = true;
            PresentStatus::OutOfDate
        } else {
            PresentStatus::Optimal
        };
        log::trace!(
            "HeadlessBackend: presented image {} ({:?})",
            image_index,
            status
        );
        state.present_log.push(PresentRecord {
            image_index,
            wait_semaphore: wait,
            status,
        });
        Ok(status)
    }

    fn recreate_swapchain(&self, width: u32, height: u32) -> BackendResult<()> {
        if width == 0 || height == 0 {
            return Err(BackendError::SwapchainCreationFailed(format!(
                "invalid extent {}x{}",
                width, height
            )));
        }
        let mut state = self.state.lock();
        if !state.pending.is_empty() {
            return Err(BackendError::InvalidUsage(
                "swapchain recreated while work is pending".to_string(),
            ));
        }
        let image_count = state.swapchain.image_count;
        state.swapchain = HeadlessSwapchain::new(Extent2d::new(width, height), image_count);
        log::info!("HeadlessBackend: recreated swapchain at {}x{}", width, height);
        Ok(())
    }

    fn swapchain_extent(&self) -> Extent2d {
        self.state.lock().swapchain.extent
    }

    fn swapchain_image_count(&self) -> u32 {
        self.state.lock().swapchain.image_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(64, 64, 2).unwrap()
    }

    fn staging(backend: &HeadlessBackend, bytes: &[u8]) -> BufferHandle {
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(
                bytes.len() as u64,
                BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC,
            ))
            .unwrap();
        backend.write_buffer(buffer, 0, bytes).unwrap();
        buffer
    }

    fn record_copy(
        backend: &HeadlessBackend,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> CommandBufferHandle {
        let cmd = backend.allocate_command_buffer().unwrap();
        backend
            .begin_command_buffer(cmd, CommandBufferUsage::OneTimeSubmit)
            .unwrap();
        backend
            .cmd_copy_buffer(
                cmd,
                src,
                dst,
                &[BufferCopyRegion {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            )
            .unwrap();
        backend.end_command_buffer(cmd).unwrap();
        cmd
    }

    #[test]
    fn test_copy_executes_only_after_fence_wait() {
        let backend = backend();
        let src = staging(&backend, &[1, 2, 3, 4]);
        let dst = backend
            .create_buffer(&BufferDescriptor::new(4, BufferUsage::COPY_DST))
            .unwrap();
        let cmd = record_copy(&backend, src, dst, 4);
        let fence = backend.create_fence(false).unwrap();
        backend
            .submit(&SubmitInfo {
                wait_semaphores: &[],
                command_buffers: &[cmd],
                signal_semaphores: &[],
                fence: Some(fence),
            })
            .unwrap();

        assert_eq!(backend.read_buffer(dst, 0, 4).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(backend.fence_status(fence).unwrap(), FenceStatus::Unsignaled);

        backend.wait_for_fence(fence).unwrap();
        assert_eq!(backend.read_buffer(dst, 0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(backend.fence_status(fence).unwrap(), FenceStatus::Signaled);
        assert_eq!(backend.copy_log().len(), 1);
    }

    #[test]
    fn test_reset_of_pending_command_buffer_is_rejected() {
        let backend = backend();
        let src = staging(&backend, &[9; 8]);
        let dst = backend
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::COPY_DST))
            .unwrap();
        let cmd = record_copy(&backend, src, dst, 8);
        backend
            .submit(&SubmitInfo {
                wait_semaphores: &[],
                command_buffers: &[cmd],
                signal_semaphores: &[],
                fence: None,
            })
            .unwrap();

        assert_eq!(
            backend.reset_command_buffer(cmd),
            Err(BackendError::CommandBufferInUse(cmd.raw()))
        );
        assert_eq!(backend.stats().unsafe_command_buffer_resets, 1);

        backend.queue_wait_idle().unwrap();
        backend.reset_command_buffer(cmd).unwrap();
    }

    #[test]
    fn test_fence_without_work_never_signals() {
        let backend = backend();
        let fence = backend.create_fence(false).unwrap();
        assert_eq!(
            backend.wait_for_fence(fence),
            Err(BackendError::FenceNeverSignaled(fence.raw()))
        );
        assert_eq!(
            backend.wait_for_fence_timeout(fence, Duration::from_millis(1)),
            Ok(false)
        );
    }

    #[test]
    fn test_present_requires_signaled_semaphore() {
        let backend = backend();
        let image_available = backend.create_semaphore().unwrap();
        let render_finished = backend.create_semaphore().unwrap();
        let image = backend.acquire_next_image(image_available).unwrap();
        assert!(matches!(
            backend.present(image.image_index, render_finished),
            Err(BackendError::InvalidUsage(_))
        ));
    }

    #[test]
    fn test_forced_out_of_date() {
        let backend = backend();
        let semaphore = backend.create_semaphore().unwrap();
        backend.force_out_of_date_on_next_acquire();
        assert_eq!(
            backend.acquire_next_image(semaphore),
            Err(BackendError::SurfaceOutOfDate)
        );
        backend.recreate_swapchain(32, 32).unwrap();
        assert_eq!(backend.swapchain_extent(), Extent2d::new(32, 32));
        assert_eq!(backend.acquire_next_image(semaphore).unwrap().image_index, 0);
    }

    #[test]
    fn test_destroy_while_pending_is_counted() {
        let backend = backend();
        let src = staging(&backend, &[5; 4]);
        let dst = backend
            .create_buffer(&BufferDescriptor::new(4, BufferUsage::COPY_DST))
            .unwrap();
        let cmd = record_copy(&backend, src, dst, 4);
        backend
            .submit(&SubmitInfo {
                wait_semaphores: &[],
                command_buffers: &[cmd],
                signal_semaphores: &[],
                fence: None,
            })
            .unwrap();
        backend.destroy_buffer(src);
        assert_eq!(backend.stats().destroyed_while_pending, 1);
        backend.device_wait_idle().unwrap();
        assert!(backend.copy_log().is_empty());
    }

    #[test]
    fn test_copy_out_of_bounds_rejected_at_record_time() {
        let backend = backend();
        let src = staging(&backend, &[0; 4]);
        let dst = backend
            .create_buffer(&BufferDescriptor::new(4, BufferUsage::COPY_DST))
            .unwrap();
        let cmd = backend.allocate_command_buffer().unwrap();
        backend
            .begin_command_buffer(cmd, CommandBufferUsage::OneTimeSubmit)
            .unwrap();
        let result = backend.cmd_copy_buffer(
            cmd,
            src,
            dst,
            &[BufferCopyRegion {
                src_offset: 0,
                dst_offset: 2,
                size: 4,
            }],
        );
        assert!(matches!(result, Err(BackendError::InvalidUsage(_))));
    }
}
