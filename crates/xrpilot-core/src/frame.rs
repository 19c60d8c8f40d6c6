//! Frame loop coordination: wait, begin, locate, render, submit.

use tracing::{debug, trace, warn};

use crate::actions::{ActionPose, ActionRegistry};
use crate::graphics::{ContextShim, GraphicsBackend, StagedFrame};
use crate::runtime::{CompositionLayer, ProjectionView, XrRuntime};
use crate::spaces::ReferenceSpaces;
use crate::swapchain::SwapchainManager;
use crate::types::{
    BlendMode, ReferenceSpaceKind, SessionHandle, Time, View, ViewConfigurationType,
    ViewConfigurationView,
};
use crate::{XrError, XrResult};

/// Per-view pixel buffers waiting to be drawn. Written by the producer,
/// read and cleared by the frame loop.
#[derive(Debug, Default)]
pub struct FrameStager {
    frames: Vec<Option<StagedFrame>>,
}

impl FrameStager {
    pub fn new(view_count: usize) -> Self {
        Self {
            frames: vec![None; view_count],
        }
    }

    pub fn view_count(&self) -> usize {
        self.frames.len()
    }

    /// Stage a buffer for a view, replacing any frame not yet drawn.
    pub fn set_frame(&mut self, view_index: usize, frame: StagedFrame) -> XrResult<()> {
        let count = self.frames.len();
        let slot = self
            .frames
            .get_mut(view_index)
            .ok_or(XrError::InvalidViewIndex {
                index: view_index,
                count,
            })?;
        *slot = Some(frame);
        Ok(())
    }

    pub fn is_staged(&self, view_index: usize) -> bool {
        matches!(self.frames.get(view_index), Some(Some(_)))
    }

    pub fn take(&mut self, view_index: usize) -> Option<StagedFrame> {
        self.frames.get_mut(view_index).and_then(Option::take)
    }

    pub fn clear(&mut self) {
        self.frames.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Called once per rendered frame with the located views and the view
/// descriptors; stages pixel buffers through the [`FrameStager`].
pub trait RenderProducer {
    fn produce(
        &mut self,
        views: &[View],
        configurations: &[ViewConfigurationView],
        stager: &mut FrameStager,
    );
}

impl<F> RenderProducer for F
where
    F: FnMut(&[View], &[ViewConfigurationView], &mut FrameStager),
{
    fn produce(
        &mut self,
        views: &[View],
        configurations: &[ViewConfigurationView],
        stager: &mut FrameStager,
    ) {
        self(views, configurations, stager)
    }
}

/// What one `render_frame` call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub predicted_display_time: Time,
    /// False when the runtime asked us not to render; the frame was still
    /// ended with no layers.
    pub rendered: bool,
    /// Views that had a staged buffer drawn into their swapchain image.
    pub views_rendered: usize,
    pub action_poses: Vec<ActionPose>,
}

/// Session resources a frame touches.
pub struct FrameTargets<'a, I> {
    pub session: SessionHandle,
    pub view_configuration_type: ViewConfigurationType,
    pub blend_mode: BlendMode,
    pub views: &'a [ViewConfigurationView],
    pub spaces: &'a ReferenceSpaces,
    pub actions: &'a mut ActionRegistry,
    pub swapchains: &'a mut SwapchainManager<I>,
}

#[derive(Debug)]
pub struct FrameLoop {
    stager: FrameStager,
    shim: ContextShim,
    frame_index: u64,
    mirror_interval: u32,
}

impl FrameLoop {
    pub fn new(view_count: usize, shim: ContextShim, mirror_interval: u32) -> Self {
        Self {
            stager: FrameStager::new(view_count),
            shim,
            frame_index: 0,
            mirror_interval,
        }
    }

    pub fn stager(&self) -> &FrameStager {
        &self.stager
    }

    pub fn stager_mut(&mut self) -> &mut FrameStager {
        &mut self.stager
    }

    pub fn shim(&self) -> &ContextShim {
        &self.shim
    }

    pub fn shim_mut(&mut self) -> &mut ContextShim {
        &mut self.shim
    }

    /// Frames ended so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Run one frame. Every successful begin-frame reaches end-frame on the
    /// success path; any runtime failure aborts the frame and is returned.
    /// The next call may retry: the runtime discards the open frame when the
    /// next one begins, and a swapchain image whose wait failed is resumed.
    pub fn render_frame<R, G, P>(
        &mut self,
        runtime: &mut R,
        backend: &mut G,
        targets: FrameTargets<'_, R::Image>,
        reference_space: ReferenceSpaceKind,
        producer: &mut P,
    ) -> XrResult<FrameOutcome>
    where
        R: XrRuntime + ?Sized,
        G: GraphicsBackend<Image = R::Image> + ?Sized,
        P: RenderProducer + ?Sized,
    {
        let FrameTargets {
            session,
            view_configuration_type,
            blend_mode,
            views: configurations,
            spaces,
            actions,
            swapchains,
        } = targets;
        let space = spaces.get(reference_space)?;

        self.shim.reassert(backend, "xrWaitFrame");
        let timing = runtime.wait_frame(session)?;
        runtime.begin_frame(session)?;
        let time = timing.predicted_display_time;
        trace!(
            time = time.as_nanos(),
            period_ns = timing.predicted_display_period_ns,
            should_render = timing.should_render,
            "frame begun"
        );

        let mut outcome = FrameOutcome {
            predicted_display_time: time,
            ..FrameOutcome::default()
        };
        if actions.action_space_count() > 0 {
            let base = spaces.get(ReferenceSpaceKind::View).unwrap_or(space);
            outcome.action_poses = actions.locate_poses(runtime, base, time);
        }

        if !timing.should_render {
            // Staged buffers never carry over a skipped frame.
            self.stager.clear();
            runtime.end_frame(session, time, blend_mode, &[])?;
            self.finish_frame(backend);
            return Ok(outcome);
        }

        let located = runtime.locate_views(session, view_configuration_type, time, space)?;
        if !(located.position_valid && located.orientation_valid) {
            debug!(
                position_valid = located.position_valid,
                orientation_valid = located.orientation_valid,
                "view poses not fully tracked"
            );
        }
        producer.produce(&located.views, configurations, &mut self.stager);

        if located.views.len() != swapchains.len() {
            warn!(
                located = located.views.len(),
                swapchains = swapchains.len(),
                "located view count differs from swapchain count"
            );
        }
        let mut projection_views = Vec::with_capacity(swapchains.len());
        for (index, view) in located.views.iter().enumerate().take(swapchains.len()) {
            let (_, image) = swapchains.acquire(runtime, backend, &mut self.shim, index)?;
            let projection = ProjectionView {
                pose: view.pose,
                fov: view.fov,
                swapchain: swapchains.handle(index)?,
                image_rect: swapchains.full_rect(index)?,
                image_array_index: 0,
            };
            if let Some(frame) = self.stager.take(index) {
                if let Err(err) = backend.render_view_from_buffer(&projection, image, &frame) {
                    swapchains.release(runtime, index)?;
                    return Err(err);
                }
                outcome.views_rendered += 1;
            }
            swapchains.release(runtime, index)?;
            projection_views.push(projection);
        }

        let layer = CompositionLayer {
            space,
            views: projection_views,
        };
        runtime.end_frame(session, time, blend_mode, std::slice::from_ref(&layer))?;
        outcome.rendered = true;
        self.finish_frame(backend);
        Ok(outcome)
    }

    fn finish_frame<G: GraphicsBackend + ?Sized>(&mut self, backend: &mut G) {
        self.frame_index += 1;
        if self.mirror_interval > 0 && self.frame_index % u64::from(self.mirror_interval) == 0 {
            if let Err(err) = backend.present_mirror(self.frame_index) {
                warn!(frame = self.frame_index, "mirror present failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::PixelLayout;

    fn frame(width: u32, height: u32) -> StagedFrame {
        StagedFrame::new(
            width,
            height,
            PixelLayout::Rgba,
            vec![0u8; (width * height * 4) as usize],
        )
        .unwrap()
    }

    #[test]
    fn test_stager_take_clears() {
        let mut stager = FrameStager::new(2);
        stager.set_frame(1, frame(2, 2)).unwrap();
        assert!(stager.is_staged(1));
        assert!(!stager.is_staged(0));
        assert!(stager.take(1).is_some());
        assert!(stager.take(1).is_none());
    }

    #[test]
    fn test_stager_rejects_out_of_range_view() {
        let mut stager = FrameStager::new(2);
        assert!(matches!(
            stager.set_frame(2, frame(1, 1)),
            Err(XrError::InvalidViewIndex { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_closure_is_a_producer() {
        let mut calls = 0;
        let mut producer = |views: &[View], _: &[ViewConfigurationView], stager: &mut FrameStager| {
            calls += views.len();
            stager.clear();
        };
        let mut stager = FrameStager::new(2);
        producer.produce(&[View::default(); 2], &[], &mut stager);
        assert_eq!(calls, 2);
    }
}
