//! Frame scheduling
//!
//! Per-frame synchronization: N frame slots, each with a command buffer,
//! an acquire semaphore and a fence, let the CPU record frame N+1 while the
//! GPU executes frame N. Present semaphores are kept per swapchain image.

mod draw;
mod scheduler;
mod slot;

pub use draw::DrawCommand;
pub use scheduler::{FrameContext, FrameScheduler};
pub use slot::FrameSlot;

/// Where the scheduler is in the current frame.
///
/// `Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// Between frames.
    Idle,
    /// Waiting for the slot fence and acquiring a swapchain image.
    Acquiring,
    /// An image is acquired; commands may be recorded.
    Recording,
    /// The command buffer is being submitted.
    Submitted,
    /// The image is being queued for presentation.
    Presenting,
}
