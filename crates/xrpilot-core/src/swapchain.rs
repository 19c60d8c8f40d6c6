//! Per-view swapchains and the acquire/wait/release protocol.

use tracing::{debug, info, warn};

use crate::graphics::{ContextShim, GraphicsApi, GraphicsBackend};
use crate::runtime::{SwapchainCreateInfo, XrRuntime, INFINITE_DURATION};
use crate::types::{Rect2D, SessionHandle, SwapchainHandle, ViewConfigurationView};
use crate::{XrError, XrResult};

#[derive(Debug)]
struct SwapchainSlot<I> {
    handle: SwapchainHandle,
    width: u32,
    height: u32,
    images: Vec<I>,
    acquired: Option<u32>,
    /// Set once the acquired image has been waited on; an acquired but
    /// unwaited image is resumed by the next `acquire`.
    waited: bool,
}

/// Pick the first runtime-advertised format that is also in `preferences`.
pub fn select_format(available: &[u32], preferences: &[u32]) -> XrResult<u32> {
    available
        .iter()
        .copied()
        .find(|format| preferences.contains(format))
        .ok_or_else(|| XrError::NoCompatibleFormat {
            available: available.to_vec(),
        })
}

#[derive(Debug)]
pub struct SwapchainManager<I> {
    slots: Vec<SwapchainSlot<I>>,
    format: Option<u32>,
    acquired_total: u64,
    released_total: u64,
}

impl<I> Default for SwapchainManager<I> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            format: None,
            acquired_total: 0,
            released_total: 0,
        }
    }
}

impl<I: Copy> SwapchainManager<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn format(&self) -> Option<u32> {
        self.format
    }

    pub fn acquire_count(&self) -> u64 {
        self.acquired_total
    }

    pub fn release_count(&self) -> u64 {
        self.released_total
    }

    pub fn handle(&self, view_index: usize) -> XrResult<SwapchainHandle> {
        self.slot(view_index).map(|slot| slot.handle)
    }

    /// Full image rectangle of a view's swapchain.
    pub fn full_rect(&self, view_index: usize) -> XrResult<Rect2D> {
        let slot = self.slot(view_index)?;
        Ok(Rect2D {
            x: 0,
            y: 0,
            width: slot.width as i32,
            height: slot.height as i32,
        })
    }

    pub fn image_count(&self, view_index: usize) -> XrResult<usize> {
        self.slot(view_index).map(|slot| slot.images.len())
    }

    fn slot(&self, view_index: usize) -> XrResult<&SwapchainSlot<I>> {
        let count = self.slots.len();
        self.slots.get(view_index).ok_or(XrError::InvalidViewIndex {
            index: view_index,
            count,
        })
    }

    fn slot_mut(&mut self, view_index: usize) -> XrResult<&mut SwapchainSlot<I>> {
        let count = self.slots.len();
        self.slots.get_mut(view_index).ok_or(XrError::InvalidViewIndex {
            index: view_index,
            count,
        })
    }

    /// Create one swapchain per view at its recommended size.
    pub fn create_swapchains<R, G>(
        &mut self,
        runtime: &mut R,
        backend: &mut G,
        session: SessionHandle,
        views: &[ViewConfigurationView],
    ) -> XrResult<usize>
    where
        R: XrRuntime<Image = I> + ?Sized,
        G: GraphicsBackend<Image = I> + ?Sized,
    {
        if !self.slots.is_empty() {
            return Err(XrError::InvalidState("swapchains already created"));
        }
        let api = backend.api();
        let available = runtime.enumerate_swapchain_formats(session)?;
        let format = select_format(&available, api.format_preferences())?;
        log_format_choice(api, &available, format);
        self.format = Some(format);

        for (index, view) in views.iter().enumerate() {
            let info = SwapchainCreateInfo {
                format,
                sample_count: backend.supported_sample_count(view),
                width: view.recommended_width,
                height: view.recommended_height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            };
            let handle = runtime.create_swapchain(session, &info)?;
            // Tracked before image enumeration so teardown still sees it.
            self.slots.push(SwapchainSlot {
                handle,
                width: info.width,
                height: info.height,
                images: Vec::new(),
                acquired: None,
                waited: false,
            });
            let images = runtime.enumerate_swapchain_images(handle)?;
            backend.prepare_images(&images)?;
            info!(
                view = index,
                width = info.width,
                height = info.height,
                samples = info.sample_count,
                images = images.len(),
                "swapchain created"
            );
            if let Some(slot) = self.slots.last_mut() {
                slot.images = images;
            }
        }
        Ok(self.slots.len())
    }

    /// Acquire and wait for the next image of a view. Returns the ring index
    /// and the image handle. An image left acquired by a failed wait is waited
    /// on again instead of acquiring another one.
    pub fn acquire<R, G>(
        &mut self,
        runtime: &mut R,
        backend: &mut G,
        shim: &mut ContextShim,
        view_index: usize,
    ) -> XrResult<(u32, I)>
    where
        R: XrRuntime<Image = I> + ?Sized,
        G: GraphicsBackend<Image = I> + ?Sized,
    {
        let slot = self.slot(view_index)?;
        let (handle, acquired, waited) = (slot.handle, slot.acquired, slot.waited);
        let image_index = match acquired {
            Some(_) if waited => {
                return Err(XrError::InvalidState("view already holds an acquired image"));
            }
            Some(image_index) => {
                debug!(view = view_index, image_index, "resuming wait on acquired image");
                image_index
            }
            None => {
                let image_index = runtime.acquire_swapchain_image(handle)?;
                self.slot_mut(view_index)?.acquired = Some(image_index);
                self.acquired_total += 1;
                shim.reassert(backend, "xrAcquireSwapchainImage");
                image_index
            }
        };

        runtime.wait_swapchain_image(handle, INFINITE_DURATION)?;
        shim.reassert(backend, "xrWaitSwapchainImage");

        let slot = self.slot_mut(view_index)?;
        slot.waited = true;
        let image = slot
            .images
            .get(image_index as usize)
            .copied()
            .ok_or(XrError::InvalidState("runtime returned an image index outside the ring"))?;
        debug!(view = view_index, image_index, "swapchain image acquired");
        Ok((image_index, image))
    }

    pub fn release<R>(&mut self, runtime: &mut R, view_index: usize) -> XrResult<()>
    where
        R: XrRuntime<Image = I> + ?Sized,
    {
        let slot = self.slot_mut(view_index)?;
        if slot.acquired.is_none() {
            return Err(XrError::InvalidState("view holds no acquired image"));
        }
        runtime.release_swapchain_image(slot.handle)?;
        slot.acquired = None;
        slot.waited = false;
        self.released_total += 1;
        Ok(())
    }

    /// Destroy every swapchain. Keeps going past failures and returns the
    /// first one.
    pub fn destroy_all<R>(&mut self, runtime: &mut R) -> XrResult<()>
    where
        R: XrRuntime<Image = I> + ?Sized,
    {
        let mut first_err = None;
        for (index, slot) in self.slots.drain(..).enumerate() {
            if slot.acquired.is_some() {
                warn!(view = index, "destroying swapchain with an image still acquired");
            }
            if let Err(err) = runtime.destroy_swapchain(slot.handle) {
                warn!(view = index, "destroying swapchain failed: {err}");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn log_format_choice(api: GraphicsApi, available: &[u32], selected: u32) {
    let names: Vec<String> = available
        .iter()
        .map(|format| format!("{} (0x{format:X})", api.format_name(*format)))
        .collect();
    info!(
        selected = api.format_name(selected),
        format = %format!("0x{selected:X}"),
        available = ?names,
        "swapchain format selected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGraphics, MockRuntime, RuntimeCall};

    const GL_RGB10_A2: u32 = 0x8059;
    const GL_RGBA8: u32 = 0x8058;
    const GL_SRGB8_ALPHA8: u32 = 0x8C43;

    #[test]
    fn test_select_format_follows_runtime_order() {
        let preferences = GraphicsApi::OpenGl.format_preferences();
        assert_eq!(
            select_format(&[GL_SRGB8_ALPHA8, GL_RGBA8, GL_RGB10_A2], preferences).unwrap(),
            GL_RGBA8
        );
        assert!(matches!(
            select_format(&[GL_SRGB8_ALPHA8], preferences),
            Err(XrError::NoCompatibleFormat { .. })
        ));
    }

    #[test]
    fn test_create_one_swapchain_per_view() {
        let mut runtime = MockRuntime::new();
        let mut backend = MockGraphics::new();
        let (_, session) = runtime.quick_session();
        let views = runtime.views().to_vec();
        let mut manager = SwapchainManager::new();
        assert_eq!(
            manager
                .create_swapchains(&mut runtime, &mut backend, session, &views)
                .unwrap(),
            2
        );
        assert_eq!(manager.full_rect(1).unwrap().width, views[1].recommended_width as i32);
        assert_eq!(manager.image_count(0).unwrap(), MockRuntime::IMAGES_PER_SWAPCHAIN);
        assert_eq!(backend.prepared_swapchains(), 2);
        let created = runtime.swapchain_infos();
        assert!(created.iter().all(|info| info.sample_count == 1 && info.array_size == 1));
    }

    #[test]
    fn test_no_compatible_format_creates_nothing() {
        let mut runtime = MockRuntime::new().with_swapchain_formats(vec![GL_SRGB8_ALPHA8]);
        let mut backend = MockGraphics::new();
        let (_, session) = runtime.quick_session();
        let views = runtime.views().to_vec();
        let mut manager = SwapchainManager::new();
        let result = manager.create_swapchains(&mut runtime, &mut backend, session, &views);
        assert!(matches!(result, Err(XrError::NoCompatibleFormat { .. })));
        assert_eq!(runtime.count(RuntimeCall::CreateSwapchain), 0);
    }

    #[test]
    fn test_acquire_wait_release_protocol() {
        let mut runtime = MockRuntime::new();
        let mut backend = MockGraphics::new();
        let mut shim = ContextShim::new(true);
        let (_, session) = runtime.quick_session();
        let views = runtime.views().to_vec();
        let mut manager = SwapchainManager::new();
        manager
            .create_swapchains(&mut runtime, &mut backend, session, &views)
            .unwrap();

        let (index, _) = manager
            .acquire(&mut runtime, &mut backend, &mut shim, 0)
            .unwrap();
        assert_eq!(index, 0);
        let again = manager.acquire(&mut runtime, &mut backend, &mut shim, 0);
        assert!(matches!(again, Err(XrError::InvalidState(_))));
        manager.release(&mut runtime, 0).unwrap();
        assert!(matches!(
            manager.release(&mut runtime, 0),
            Err(XrError::InvalidState(_))
        ));

        let log = runtime.call_log();
        let acquire = log.position(RuntimeCall::AcquireSwapchainImage).unwrap();
        let wait = log.position(RuntimeCall::WaitSwapchainImage).unwrap();
        let release = log.position(RuntimeCall::ReleaseSwapchainImage).unwrap();
        assert!(acquire < wait && wait < release);
        assert_eq!(backend.reacquire_calls(), 2);
        assert_eq!(manager.acquire_count(), manager.release_count());
    }

    #[test]
    fn test_failed_wait_is_resumed_by_next_acquire() {
        let mut runtime = MockRuntime::new();
        let mut backend = MockGraphics::new();
        let mut shim = ContextShim::new(true);
        let (_, session) = runtime.quick_session();
        let views = runtime.views().to_vec();
        let mut manager = SwapchainManager::new();
        manager
            .create_swapchains(&mut runtime, &mut backend, session, &views)
            .unwrap();

        runtime.fail_on(RuntimeCall::WaitSwapchainImage);
        assert!(manager
            .acquire(&mut runtime, &mut backend, &mut shim, 0)
            .is_err());
        runtime.clear_failures();

        let (index, _) = manager
            .acquire(&mut runtime, &mut backend, &mut shim, 0)
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(runtime.count(RuntimeCall::AcquireSwapchainImage), 1);
        assert_eq!(runtime.count(RuntimeCall::WaitSwapchainImage), 2);
        manager.release(&mut runtime, 0).unwrap();
        assert_eq!(manager.acquire_count(), 1);
        assert_eq!(manager.release_count(), 1);
    }

    #[test]
    fn test_out_of_range_view() {
        let mut runtime = MockRuntime::new();
        let mut manager: SwapchainManager<u32> = SwapchainManager::new();
        assert!(matches!(
            manager.release(&mut runtime, 3),
            Err(XrError::InvalidViewIndex { index: 3, count: 0 })
        ));
    }
}
