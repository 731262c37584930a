//! Commands recorded into a frame.

use crate::backend::{PipelineHandle, Viewport};
use crate::geometry::{ArenaBinding, MeshAllocation};

/// A bind or draw request for [`FrameScheduler::record`].
///
/// [`FrameScheduler::record`]: super::FrameScheduler::record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawCommand {
    BindPipeline(PipelineHandle),
    /// Override the full-surface viewport set at the start of the frame.
    SetViewport(Viewport),
    /// Bind the arena buffer as both vertex and index source.
    BindGeometry(ArenaBinding),
    /// Indexed draw of one arena mesh. Requires a preceding `BindGeometry`.
    DrawMesh {
        allocation: MeshAllocation,
        instance_count: u32,
        first_instance: u32,
    },
}

impl DrawCommand {
    /// Single-instance draw of a mesh.
    pub fn draw_mesh(allocation: MeshAllocation) -> Self {
        DrawCommand::DrawMesh {
            allocation,
            instance_count: 1,
            first_instance: 0,
        }
    }
}
