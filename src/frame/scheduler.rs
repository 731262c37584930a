//! Frames in flight.
//!
//! [`FrameScheduler`] owns N frame slots and drives each frame through
//! acquire, record, submit and present while the GPU may still be executing
//! up to N - 1 earlier frames.
//!
//! # Frame Protocol
//!
//! ```text
//! begin_frame          wait slot fence ──► acquire image (signals image_available)
//! record               check draws ──► reset command buffer ──► frame pass ──► binds/draws
//! submit_and_present   reset fence ──► submit (wait image_available,
//!                      signal the image's render_finished + fence) ──► present
//!                      (wait render_finished) ──► advance slot
//! ```
//!
//! - A slot's command buffer is reset only after its fence reports that the
//!   GPU finished the frame that last used it.
//! - Presentation of a frame waits for that frame's rendering on the GPU.
//! - `render_finished` semaphores are per swapchain image: an image is only
//!   acquired again after the present that waited on its semaphore.
//! - The slot advances after `submit_and_present` even when it fails, so a
//!   stale surface never stalls the rotation.
//!
//! # Frame Overlap
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! # Stale Surfaces
//!
//! When the swapchain no longer matches the surface, `begin_frame` returns
//! [`GraphicsError::SurfaceOutOfDate`] (the slot fence stays signaled and
//! the slot is not consumed) and `submit_and_present` returns
//! [`PresentStatus::OutOfDate`]. The caller then calls
//! [`recreate_swapchain`](FrameScheduler::recreate_swapchain) and retries.
//!
//! # Abandoned Frames
//!
//! Once an image is acquired the frame has to reach the queue, or the slot
//! fence and the acquire semaphore are left in a state the next lap cannot
//! use. A frame whose draw list is rejected is given up with
//! [`abort_frame`](FrameScheduler::abort_frame), which presents a cleared
//! image. A failed submission releases the image the same way before the
//! error is returned.

use std::sync::Arc;
use std::time::Duration;

use super::draw::DrawCommand;
use super::slot::FrameSlot;
use super::FrameState;
use crate::backend::{
    CommandBufferUsage, GraphicsBackend, PipelineStage, PresentStatus, SemaphoreHandle,
    SubmitInfo, Viewport,
};
use crate::error::{BackendError, BackendResult, GraphicsError, GraphicsResult};

/// The frame currently being built.
///
/// Returned by [`FrameScheduler::begin_frame`] and passed back to
/// [`record`](FrameScheduler::record) and
/// [`submit_and_present`](FrameScheduler::submit_and_present).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Frame slot index.
    pub slot: usize,
    /// Acquired swapchain image.
    pub image_index: u32,
    /// Monotonic frame number, starting at 1.
    pub frame_number: u64,
    /// The swapchain still works but should be recreated soon.
    pub suboptimal: bool,
}

/// Manages N frames in flight.
///
/// # Thread Safety
///
/// `FrameScheduler` is driven from a single thread. `begin_frame`'s fence
/// wait is the only blocking point of the frame loop.
pub struct FrameScheduler {
    backend: Arc<dyn GraphicsBackend>,
    slots: Vec<FrameSlot>,
    /// One `render_finished` semaphore per swapchain image.
    render_finished: Vec<SemaphoreHandle>,
    current: usize,
    state: FrameState,
    /// Whether the current frame's command buffer has been recorded.
    recorded: bool,
    frame_count: u64,
    clear_color: [f32; 4],
}

impl FrameScheduler {
    /// Create the frame slots and the per-image present semaphores.
    ///
    /// `frames_in_flight` is typically 2 or 3 and must be at least 1.
    pub fn new(
        backend: Arc<dyn GraphicsBackend>,
        frames_in_flight: usize,
        clear_color: [f32; 4],
    ) -> GraphicsResult<Self> {
        if frames_in_flight == 0 {
            return Err(GraphicsError::InvalidConfig(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for index in 0..frames_in_flight {
            match FrameSlot::new(backend.as_ref(), index) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        slot.destroy(backend.as_ref());
                    }
                    return Err(e.into());
                }
            }
        }

        let render_finished =
            match create_semaphores(backend.as_ref(), backend.swapchain_image_count()) {
                Ok(semaphores) => semaphores,
                Err(e) => {
                    for slot in &slots {
                        slot.destroy(backend.as_ref());
                    }
                    return Err(e.into());
                }
            };

        log::info!(
            "frame scheduler: {} frames in flight, {} swapchain images",
            frames_in_flight,
            render_finished.len()
        );

        Ok(Self {
            backend,
            slots,
            render_finished,
            current: 0,
            state: FrameState::Idle,
            recorded: false,
            frame_count: 0,
            clear_color,
        })
    }

    /// Begin a new frame.
    ///
    /// Blocks until the GPU has finished the frame that last used the current
    /// slot, then acquires the next swapchain image. A stale surface is
    /// reported as [`GraphicsError::SurfaceOutOfDate`] and leaves the
    /// scheduler idle on the same slot.
    pub fn begin_frame(&mut self) -> GraphicsResult<FrameContext> {
        self.expect_state(FrameState::Idle)?;
        self.state = FrameState::Acquiring;

        let fence = self.slots[self.current].in_flight;
        if let Err(e) = self.backend.wait_for_fence(fence) {
            self.state = FrameState::Idle;
            return Err(e.into());
        }
        self.acquire()
    }

    /// Begin a new frame, giving up if the slot is still busy after `timeout`.
    ///
    /// Returns `Ok(None)` on timeout; the scheduler stays idle.
    pub fn begin_frame_timeout(&mut self, timeout: Duration) -> GraphicsResult<Option<FrameContext>> {
        self.expect_state(FrameState::Idle)?;

        let fence = self.slots[self.current].in_flight;
        if !self.backend.wait_for_fence_timeout(fence, timeout)? {
            log::trace!(
                "frame slot {} still busy after {:?}",
                self.current,
                timeout
            );
            return Ok(None);
        }
        self.state = FrameState::Acquiring;
        self.acquire().map(Some)
    }

    fn acquire(&mut self) -> GraphicsResult<FrameContext> {
        let slot = self.slots[self.current];
        match self.backend.acquire_next_image(slot.image_available) {
            Ok(image) => {
                self.state = FrameState::Recording;
                self.recorded = false;
                let context = FrameContext {
                    slot: slot.index,
                    image_index: image.image_index,
                    frame_number: self.frame_count + 1,
                    suboptimal: image.suboptimal,
                };
                log::trace!(
                    "Begin frame {} (slot {}, image {})",
                    context.frame_number,
                    context.slot,
                    context.image_index
                );
                Ok(context)
            }
            Err(BackendError::SurfaceOutOfDate) => {
                self.state = FrameState::Idle;
                log::warn!("swapchain out of date on acquire");
                Err(GraphicsError::SurfaceOutOfDate)
            }
            Err(e) => {
                self.state = FrameState::Idle;
                Err(e.into())
            }
        }
    }

    /// Record the frame's commands into the slot's command buffer.
    ///
    /// `draws` are checked before anything is recorded: a
    /// [`DrawCommand::DrawMesh`] before any [`DrawCommand::BindGeometry`] is
    /// [`GraphicsError::InvalidDrawCommand`] and leaves the frame open for
    /// another `record` or for [`abort_frame`](Self::abort_frame).
    ///
    /// The command buffer is reset, a frame pass clearing the acquired image
    /// is opened with a full-surface viewport, and `draws` are recorded in
    /// order. Recording again before submission replaces the previous
    /// recording.
    pub fn record(&mut self, context: &FrameContext, draws: &[DrawCommand]) -> GraphicsResult<()> {
        self.expect_context(context)?;
        check_draws(draws)?;

        self.recorded = false;
        self.record_commands(context, draws)?;
        self.recorded = true;
        Ok(())
    }

    fn record_commands(&self, context: &FrameContext, draws: &[DrawCommand]) -> BackendResult<()> {
        let backend = self.backend.as_ref();
        let cmd = self.slots[self.current].command_buffer;

        backend.reset_command_buffer(cmd)?;
        backend.begin_command_buffer(cmd, CommandBufferUsage::Reusable)?;
        backend.cmd_begin_frame_pass(cmd, context.image_index, self.clear_color)?;
        backend.cmd_set_viewport(cmd, &Viewport::full(backend.swapchain_extent()))?;

        for draw in draws {
            match *draw {
                DrawCommand::BindPipeline(pipeline) => backend.cmd_bind_pipeline(cmd, pipeline)?,
                DrawCommand::SetViewport(viewport) => backend.cmd_set_viewport(cmd, &viewport)?,
                DrawCommand::BindGeometry(binding) => {
                    backend.cmd_bind_vertex_buffer(cmd, binding.buffer, binding.vertex_offset)?;
                    backend.cmd_bind_index_buffer(cmd, binding.buffer, binding.index_offset)?;
                }
                DrawCommand::DrawMesh {
                    allocation,
                    instance_count,
                    first_instance,
                } => {
                    if allocation.index_count == 0 || instance_count == 0 {
                        continue;
                    }
                    backend.cmd_draw_indexed(
                        cmd,
                        &allocation.draw_args(instance_count, first_instance),
                    )?;
                }
            }
        }

        backend.cmd_end_frame_pass(cmd, context.image_index)?;
        backend.end_command_buffer(cmd)
    }

    /// Submit the recorded frame and present it.
    ///
    /// The slot fence is reset and handed to the submission, which waits for
    /// `image_available` at color-attachment output and signals the image's
    /// `render_finished`; present waits for `render_finished`. The scheduler
    /// moves to the next slot whether or not this succeeds.
    pub fn submit_and_present(&mut self, context: &FrameContext) -> GraphicsResult<PresentStatus> {
        self.expect_context(context)?;
        if !self.recorded {
            return Err(GraphicsError::InvalidDrawCommand(
                "frame submitted without recording".to_string(),
            ));
        }

        let result = self.submit_and_present_slot(context);
        self.advance(context);
        result
    }

    /// Give up on the current frame without its draws.
    ///
    /// An empty frame pass clearing the acquired image is submitted and
    /// presented, so the slot fence and semaphores go through their normal
    /// cycle and the scheduler returns to idle on the next slot.
    pub fn abort_frame(&mut self, context: &FrameContext) -> GraphicsResult<PresentStatus> {
        self.expect_context(context)?;
        log::warn!("abandoning frame {}", context.frame_number);

        if let Err(e) = self.record_commands(context, &[]) {
            log::error!("could not record an empty frame pass: {}", e);
            let released = self.release_image(context);
            self.advance(context);
            released?;
            return Err(e.into());
        }
        self.recorded = true;
        self.submit_and_present(context)
    }

    fn submit_and_present_slot(&mut self, context: &FrameContext) -> GraphicsResult<PresentStatus> {
        let slot = self.slots[self.current];
        let render_finished = self.render_finished_for(context)?;
        self.state = FrameState::Submitted;

        self.backend.reset_fence(slot.in_flight)?;
        let submitted = self.backend.submit(&SubmitInfo {
            wait_semaphores: &[(slot.image_available, PipelineStage::ColorAttachmentOutput)],
            command_buffers: &[slot.command_buffer],
            signal_semaphores: &[render_finished],
            fence: Some(slot.in_flight),
        });
        if let Err(e) = submitted {
            log::error!("frame {} submission failed: {}", context.frame_number, e);
            if let Err(release) = self.release_image(context) {
                log::error!(
                    "frame {} could not release its image: {}",
                    context.frame_number,
                    release
                );
            }
            return Err(e.into());
        }

        self.present(context, render_finished)
    }

    /// Hand the acquired image back with an empty submission: it consumes
    /// `image_available`, signals the slot fence and `render_finished`, and
    /// the image is presented unchanged.
    fn release_image(&mut self, context: &FrameContext) -> GraphicsResult<PresentStatus> {
        let slot = self.slots[self.current];
        let render_finished = self.render_finished_for(context)?;

        self.backend.reset_fence(slot.in_flight)?;
        self.backend.submit(&SubmitInfo {
            wait_semaphores: &[(slot.image_available, PipelineStage::ColorAttachmentOutput)],
            command_buffers: &[],
            signal_semaphores: &[render_finished],
            fence: Some(slot.in_flight),
        })?;
        self.present(context, render_finished)
    }

    fn present(
        &mut self,
        context: &FrameContext,
        render_finished: SemaphoreHandle,
    ) -> GraphicsResult<PresentStatus> {
        self.state = FrameState::Presenting;
        let status = match self.backend.present(context.image_index, render_finished) {
            Ok(status) => status,
            Err(BackendError::SurfaceOutOfDate) => PresentStatus::OutOfDate,
            Err(e) => return Err(e.into()),
        };
        if status == PresentStatus::OutOfDate {
            log::warn!("swapchain out of date on present");
        }
        Ok(status)
    }

    fn render_finished_for(&self, context: &FrameContext) -> GraphicsResult<SemaphoreHandle> {
        self.render_finished
            .get(context.image_index as usize)
            .copied()
            .ok_or_else(|| {
                GraphicsError::Backend(BackendError::InvalidUsage(format!(
                    "swapchain image {} out of range ({} images)",
                    context.image_index,
                    self.render_finished.len()
                )))
            })
    }

    fn advance(&mut self, context: &FrameContext) {
        log::trace!(
            "End frame {} (slot {})",
            context.frame_number,
            self.current
        );
        self.current = (self.current + 1) % self.slots.len();
        self.frame_count += 1;
        self.recorded = false;
        self.state = FrameState::Idle;
    }

    /// Wait for every slot's fence, so no frame is executing on the GPU.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        log::trace!("Waiting for GPU idle ({} slots)", self.slots.len());
        for slot in &self.slots {
            self.backend.wait_for_fence(slot.in_flight)?;
        }
        Ok(())
    }

    /// Recreate the swapchain after a resize or a stale surface.
    ///
    /// Waits for the device to go idle first. Must be called between frames.
    /// The per-image semaphores are rebuilt for the new image count.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> GraphicsResult<()> {
        self.expect_state(FrameState::Idle)?;
        self.backend.device_wait_idle()?;
        self.backend.recreate_swapchain(width, height)?;

        for semaphore in self.render_finished.drain(..) {
            self.backend.destroy_semaphore(semaphore);
        }
        self.render_finished =
            create_semaphores(self.backend.as_ref(), self.backend.swapchain_image_count())?;

        log::info!(
            "swapchain recreated at {}x{} ({} images)",
            width,
            height,
            self.render_finished.len()
        );
        Ok(())
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Semaphore presentation of `image_index` waits on.
    pub fn render_finished(&self, image_index: u32) -> Option<SemaphoreHandle> {
        self.render_finished.get(image_index as usize).copied()
    }

    /// Number of frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        self.clear_color = clear_color;
    }

    fn expect_state(&self, expected: FrameState) -> GraphicsResult<()> {
        if self.state != expected {
            return Err(GraphicsError::InvalidFrameState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn expect_context(&self, context: &FrameContext) -> GraphicsResult<()> {
        self.expect_state(FrameState::Recording)?;
        if context.slot != self.current {
            return Err(GraphicsError::StaleFrameContext {
                given: context.slot,
                current: self.current,
            });
        }
        Ok(())
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.backend.device_wait_idle() {
            log::error!("device wait idle failed while destroying frame slots: {}", e);
        }
        for semaphore in self.render_finished.drain(..) {
            self.backend.destroy_semaphore(semaphore);
        }
        for slot in &self.slots {
            slot.destroy(self.backend.as_ref());
        }
    }
}

/// Reject draw lists that cannot be recorded.
fn check_draws(draws: &[DrawCommand]) -> GraphicsResult<()> {
    let mut geometry_bound = false;
    for draw in draws {
        match draw {
            DrawCommand::BindGeometry(_) => geometry_bound = true,
            DrawCommand::DrawMesh { .. } if !geometry_bound => {
                return Err(GraphicsError::InvalidDrawCommand(
                    "DrawMesh recorded before BindGeometry".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn create_semaphores(
    backend: &dyn GraphicsBackend,
    count: u32,
) -> BackendResult<Vec<SemaphoreHandle>> {
    let mut semaphores = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match backend.create_semaphore() {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(e) => {
                for semaphore in semaphores {
                    backend.destroy_semaphore(semaphore);
                }
                return Err(e);
            }
        }
    }
    Ok(semaphores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FenceStatus, HeadlessBackend};

    fn setup(frames_in_flight: usize) -> (Arc<HeadlessBackend>, FrameScheduler) {
        let backend = Arc::new(HeadlessBackend::new(16, 16, 3).unwrap());
        let scheduler = FrameScheduler::new(backend.clone(), frames_in_flight, [0.0; 4]).unwrap();
        (backend, scheduler)
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let backend = Arc::new(HeadlessBackend::new(16, 16, 3).unwrap());
        assert!(matches!(
            FrameScheduler::new(backend, 0, [0.0; 4]),
            Err(GraphicsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_state_machine() {
        let (_backend, mut scheduler) = setup(2);
        assert_eq!(scheduler.state(), FrameState::Idle);

        let frame = scheduler.begin_frame().unwrap();
        assert_eq!(scheduler.state(), FrameState::Recording);
        assert!(matches!(
            scheduler.begin_frame(),
            Err(GraphicsError::InvalidFrameState {
                expected: FrameState::Idle,
                actual: FrameState::Recording
            })
        ));

        scheduler.record(&frame, &[]).unwrap();
        let status = scheduler.submit_and_present(&frame).unwrap();
        assert_eq!(status, PresentStatus::Optimal);
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.frame_count(), 1);
    }

    #[test]
    fn test_submit_without_record_rejected() {
        let (_backend, mut scheduler) = setup(2);
        let frame = scheduler.begin_frame().unwrap();
        assert!(matches!(
            scheduler.submit_and_present(&frame),
            Err(GraphicsError::InvalidDrawCommand(_))
        ));
        assert_eq!(scheduler.state(), FrameState::Recording);
    }

    #[test]
    fn test_stale_context_rejected() {
        let (_backend, mut scheduler) = setup(2);
        let frame = scheduler.begin_frame().unwrap();
        let stale = FrameContext { slot: 1, ..frame };
        assert!(matches!(
            scheduler.record(&stale, &[]),
            Err(GraphicsError::StaleFrameContext { given: 1, current: 0 })
        ));
    }

    #[test]
    fn test_draw_before_geometry_rejected() {
        let (_backend, mut scheduler) = setup(1);
        let frame = scheduler.begin_frame().unwrap();
        let draw = DrawCommand::draw_mesh(crate::geometry::MeshAllocation {
            vertex_offset: 0,
            vertex_count: 3,
            index_offset: 0,
            index_count: 3,
        });
        assert!(matches!(
            scheduler.record(&frame, &[draw]),
            Err(GraphicsError::InvalidDrawCommand(_))
        ));
    }

    #[test]
    fn test_acquire_out_of_date_keeps_fence_signaled() {
        let (backend, mut scheduler) = setup(2);
        backend.force_out_of_date_on_next_acquire();

        let err = scheduler.begin_frame().unwrap_err();
        assert!(err.is_surface_out_of_date());
        assert!(!err.is_fatal());
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(scheduler.current_slot(), 0);
        let fence = scheduler.slot(0).unwrap().in_flight;
        assert_eq!(backend.fence_status(fence).unwrap(), FenceStatus::Signaled);

        scheduler.recreate_swapchain(32, 32).unwrap();
        let frame = scheduler.begin_frame().unwrap();
        scheduler.record(&frame, &[]).unwrap();
        scheduler.submit_and_present(&frame).unwrap();
    }

    #[test]
    fn test_present_out_of_date_still_advances() {
        let (backend, mut scheduler) = setup(2);
        backend.force_out_of_date_on_next_present();

        let frame = scheduler.begin_frame().unwrap();
        scheduler.record(&frame, &[]).unwrap();
        let status = scheduler.submit_and_present(&frame).unwrap();
        assert_eq!(status, PresentStatus::OutOfDate);
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.state(), FrameState::Idle);
    }

    #[test]
    fn test_timeout_on_busy_slot() {
        let (backend, mut scheduler) = setup(1);
        let frame = scheduler.begin_frame().unwrap();
        scheduler.record(&frame, &[]).unwrap();
        scheduler.submit_and_present(&frame).unwrap();

        backend.set_stalled(true);
        let next = scheduler
            .begin_frame_timeout(Duration::from_millis(1))
            .unwrap();
        assert_eq!(next, None);
        assert_eq!(scheduler.state(), FrameState::Idle);

        let err = scheduler.begin_frame().unwrap_err();
        assert!(err.is_fatal());

        backend.set_stalled(false);
        assert!(scheduler
            .begin_frame_timeout(Duration::from_millis(1))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_wait_idle_and_drop_release_everything() {
        let (backend, mut scheduler) = setup(3);
        for _ in 0..3 {
            let frame = scheduler.begin_frame().unwrap();
            scheduler.record(&frame, &[]).unwrap();
            scheduler.submit_and_present(&frame).unwrap();
        }
        assert!(backend.stats().pending_submissions > 0);
        scheduler.wait_idle().unwrap();
        assert_eq!(backend.stats().pending_submissions, 0);

        drop(scheduler);
        let stats = backend.stats();
        assert_eq!(stats.live_fences, 0);
        assert_eq!(stats.live_semaphores, 0);
        assert_eq!(stats.live_command_buffers, 0);
        assert_eq!(stats.destroyed_while_pending, 0);
    }

    fn run_frames(scheduler: &mut FrameScheduler, count: usize) {
        for _ in 0..count {
            let frame = scheduler.begin_frame().unwrap();
            scheduler.record(&frame, &[]).unwrap();
            assert_eq!(
                scheduler.submit_and_present(&frame).unwrap(),
                PresentStatus::Optimal
            );
        }
    }

    #[test]
    fn test_rejected_draws_leave_frame_open_and_abort_recovers() {
        let (backend, mut scheduler) = setup(2);
        let frame = scheduler.begin_frame().unwrap();
        let draw = DrawCommand::draw_mesh(crate::geometry::MeshAllocation {
            vertex_offset: 0,
            vertex_count: 3,
            index_offset: 0,
            index_count: 3,
        });

        assert!(scheduler.record(&frame, &[draw]).is_err());
        assert_eq!(scheduler.state(), FrameState::Recording);

        assert_eq!(scheduler.abort_frame(&frame).unwrap(), PresentStatus::Optimal);
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(scheduler.current_slot(), 1);
        assert_eq!(scheduler.frame_count(), 1);

        run_frames(&mut scheduler, 3);
        assert_eq!(scheduler.frame_count(), 4);
        assert_eq!(backend.present_log().len(), 4);
    }

    #[test]
    fn test_failed_submit_releases_image_and_fence() {
        let (backend, mut scheduler) = setup(2);
        run_frames(&mut scheduler, 1);

        backend.fail_next_submit();
        let frame = scheduler.begin_frame().unwrap();
        scheduler.record(&frame, &[]).unwrap();
        assert!(matches!(
            scheduler.submit_and_present(&frame),
            Err(GraphicsError::Backend(BackendError::DeviceLost))
        ));
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(scheduler.current_slot(), 0);

        let fence = scheduler.slot(1).unwrap().in_flight;
        backend.wait_for_fence(fence).unwrap();
        assert_eq!(backend.fence_status(fence).unwrap(), FenceStatus::Signaled);

        run_frames(&mut scheduler, 6);
        assert_eq!(scheduler.frame_count(), 8);
        scheduler.wait_idle().unwrap();
    }

    #[test]
    fn test_present_waits_on_the_image_semaphore() {
        let (backend, mut scheduler) = setup(2);
        let images = backend.swapchain_image_count();
        let semaphores: Vec<_> = (0..images)
            .map(|image| scheduler.render_finished(image).unwrap())
            .collect();
        assert_eq!(semaphores.len(), 3);
        assert_ne!(semaphores[0], semaphores[1]);
        assert_ne!(semaphores[1], semaphores[2]);
        assert_eq!(scheduler.render_finished(images), None);

        let mut waited = Vec::new();
        for _ in 0..6 {
            let frame = scheduler.begin_frame().unwrap();
            scheduler.record(&frame, &[]).unwrap();
            scheduler.submit_and_present(&frame).unwrap();
            let record = backend.present_log().last().copied().unwrap();
            waited.push((record.image_index, record.wait_semaphore));
        }
        for (image, semaphore) in waited {
            assert_eq!(scheduler.render_finished(image), Some(semaphore));
        }

        scheduler.recreate_swapchain(8, 8).unwrap();
        assert!(scheduler.render_finished(0).is_some());
        assert_ne!(scheduler.render_finished(0), Some(semaphores[0]));
    }
}
