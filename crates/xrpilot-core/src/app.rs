//! Application facade tying negotiation, session, actions, swapchains and
//! the frame loop to one runtime and one graphics backend.

use bytes::Bytes;
use tracing::{info, warn};

use crate::actions::{ActionId, ActionRegistry, ActionStateSnapshot};
use crate::config::XrConfig;
use crate::frame::{FrameLoop, FrameOutcome, FrameTargets, RenderProducer};
use crate::graphics::{ContextShim, GraphicsBackend, PixelLayout, StagedFrame};
use crate::negotiator::{self, NegotiatedInstance, NegotiatedSystem};
use crate::runtime::XrRuntime;
use crate::session::{SessionPhase, SessionStateMachine};
use crate::spaces::ReferenceSpaces;
use crate::swapchain::SwapchainManager;
use crate::types::{
    ActionKind, Extent2Df, HapticPulse, ReferenceSpaceKind, RuntimeProperties, SessionHandle,
    SystemProperties, ViewConfigurationView,
};
use crate::{XrError, XrResult};

/// Lifecycle: [`XrApplication::new`] (instance) → [`select_system`] →
/// [`add_action`]* → [`create_session`] → loop of [`poll_events`],
/// [`sync_and_poll`] and [`render_frame`] → [`destroy`].
///
/// [`select_system`]: XrApplication::select_system
/// [`add_action`]: XrApplication::add_action
/// [`create_session`]: XrApplication::create_session
/// [`poll_events`]: XrApplication::poll_events
/// [`sync_and_poll`]: XrApplication::sync_and_poll
/// [`render_frame`]: XrApplication::render_frame
/// [`destroy`]: XrApplication::destroy
pub struct XrApplication<R, G>
where
    R: XrRuntime,
    G: GraphicsBackend<Binding = R::Binding, Image = R::Image>,
{
    runtime: R,
    backend: G,
    config: XrConfig,
    instance: Option<NegotiatedInstance>,
    system: Option<NegotiatedSystem>,
    actions: Option<ActionRegistry>,
    session: SessionStateMachine,
    spaces: ReferenceSpaces,
    swapchains: SwapchainManager<R::Image>,
    frame_loop: FrameLoop,
    destroyed: bool,
}

impl<R, G> XrApplication<R, G>
where
    R: XrRuntime,
    G: GraphicsBackend<Binding = R::Binding, Image = R::Image>,
{
    /// Negotiate layers and extensions and create the instance.
    pub fn new(mut runtime: R, backend: G, config: XrConfig) -> XrResult<Self> {
        let instance = negotiator::create_instance(
            &mut runtime,
            &config.application_name,
            &config.engine_name,
            &config.requested_layers,
            &config.requested_extensions,
        )?;
        let shim = ContextShim::new(config.reassert_graphics_context);
        let frame_loop = FrameLoop::new(0, shim, config.mirror_interval);
        Ok(Self {
            runtime,
            backend,
            config,
            instance: Some(instance),
            system: None,
            actions: None,
            session: SessionStateMachine::new(),
            spaces: ReferenceSpaces::new(),
            swapchains: SwapchainManager::new(),
            frame_loop,
            destroyed: false,
        })
    }

    fn ensure_alive(&self) -> XrResult<()> {
        if self.destroyed {
            Err(XrError::InvalidState("application was destroyed"))
        } else {
            Ok(())
        }
    }

    fn instance_handle(&self) -> XrResult<crate::types::InstanceHandle> {
        self.ensure_alive()?;
        self.instance
            .as_ref()
            .map(|instance| instance.handle)
            .ok_or(XrError::InvalidState("no instance"))
    }

    fn session_handle(&self) -> XrResult<SessionHandle> {
        self.ensure_alive()?;
        self.session
            .session()
            .ok_or(XrError::InvalidState("session has not been created"))
    }

    /// Pick the device, validate its view configuration and blend mode, check
    /// the graphics requirements and create the action set.
    pub fn select_system(&mut self) -> XrResult<&NegotiatedSystem> {
        let instance = self.instance_handle()?;
        if self.system.is_some() {
            return Err(XrError::InvalidState("system already selected"));
        }
        let system = negotiator::select_system(
            &mut self.runtime,
            instance,
            self.config.form_factor,
            self.config.blend_mode,
            self.config.view_configuration,
        )?;
        let requirements = self.runtime.graphics_requirements(instance, system.id)?;
        info!(range = %requirements, "graphics API requirements");
        self.backend.check_requirements(&requirements)?;

        self.actions = Some(ActionRegistry::create(&mut self.runtime, instance)?);
        let shim = ContextShim::new(self.config.reassert_graphics_context);
        self.frame_loop = FrameLoop::new(system.view_count(), shim, self.config.mirror_interval);
        Ok(&*self.system.insert(system))
    }

    pub fn add_action(&mut self, path: &str, kind: ActionKind) -> XrResult<ActionId> {
        self.ensure_alive()?;
        let Self {
            runtime, actions, ..
        } = self;
        let actions = actions
            .as_mut()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        actions.add_action(runtime, path, kind)
    }

    /// Register an action whose kind follows from the path suffix.
    pub fn add_action_inferred(&mut self, path: &str) -> XrResult<ActionId> {
        let kind =
            ActionKind::infer(path).ok_or_else(|| XrError::ActionNotFound(path.to_string()))?;
        self.add_action(path, kind)
    }

    /// Bind the graphics device, create the session and everything hanging off
    /// it. On failure everything created here is destroyed again.
    pub fn create_session(&mut self) -> XrResult<()> {
        let instance = self.instance_handle()?;
        if self.session.session().is_some() {
            return Err(XrError::InvalidState("session already created"));
        }
        let system = self
            .system
            .as_ref()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        let system_id = system.id;
        let views = system.views.clone();

        let binding = self.backend.bind_device(&views)?;
        let session = self.runtime.create_session(instance, system_id, &binding)?;
        self.session.track(session);
        info!(session = session.into_raw(), "session created");

        if let Err(err) = self.populate_session(session, &views) {
            warn!("session setup failed, tearing down: {err}");
            self.teardown_session();
            return Err(err);
        }
        Ok(())
    }

    fn populate_session(
        &mut self,
        session: SessionHandle,
        views: &[ViewConfigurationView],
    ) -> XrResult<()> {
        let instance = self.instance_handle()?;
        self.backend.init_resources()?;
        self.spaces.create_all(&mut self.runtime, session)?;

        let actions = self
            .actions
            .as_mut()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        let profiles = actions.bind_interaction_profiles(&mut self.runtime, instance)?;
        actions.attach(&mut self.runtime, session)?;
        let action_spaces = actions.create_action_spaces(&mut self.runtime, session)?;
        info!(
            actions = actions.len(),
            profiles, action_spaces, "action set attached"
        );

        self.swapchains
            .create_swapchains(&mut self.runtime, &mut self.backend, session, views)?;
        Ok(())
    }

    /// Destroy session children and the session itself, best-effort.
    fn teardown_session(&mut self) -> Option<XrError> {
        let mut first_err = None;
        let Some(session) = self.session.session() else {
            return None;
        };
        if self.session.is_running() {
            if let Err(err) = self.runtime.end_session(session) {
                warn!("ending session during teardown failed: {err}");
            }
        }
        if let Some(actions) = self.actions.as_mut() {
            if let Err(err) = actions.destroy_spaces(&mut self.runtime) {
                first_err.get_or_insert(err);
            }
        }
        if let Err(err) = self.spaces.destroy_all(&mut self.runtime) {
            first_err.get_or_insert(err);
        }
        if let Err(err) = self.swapchains.destroy_all(&mut self.runtime) {
            first_err.get_or_insert(err);
        }
        if let Err(err) = self.runtime.destroy_session(session) {
            warn!("destroying session failed: {err}");
            first_err.get_or_insert(err);
        }
        self.session.clear();
        first_err
    }

    /// Drain runtime events. Returns whether the caller should stop looping.
    pub fn poll_events(&mut self) -> XrResult<bool> {
        let instance = self.instance_handle()?;
        let view_configuration = self
            .system
            .as_ref()
            .map_or(self.config.view_configuration, |s| s.view_configuration_type);
        self.session
            .poll_events(&mut self.runtime, instance, view_configuration)
    }

    pub fn sync_and_poll(&mut self) -> XrResult<ActionStateSnapshot> {
        let session = self.session_handle()?;
        let Self {
            runtime, actions, ..
        } = self;
        let actions = actions
            .as_mut()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        actions.sync_and_poll(runtime, session)
    }

    /// Render one frame against `reference_space`. The session must be running.
    pub fn render_frame<P>(
        &mut self,
        reference_space: ReferenceSpaceKind,
        producer: &mut P,
    ) -> XrResult<FrameOutcome>
    where
        P: RenderProducer + ?Sized,
    {
        let session = self.session_handle()?;
        if !self.session.is_running() {
            return Err(XrError::InvalidState("session is not running"));
        }
        let Self {
            runtime,
            backend,
            system,
            actions,
            spaces,
            swapchains,
            frame_loop,
            ..
        } = self;
        let system = system
            .as_ref()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        let actions = actions
            .as_mut()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        let targets = FrameTargets {
            session,
            view_configuration_type: system.view_configuration_type,
            blend_mode: system.blend_mode,
            views: &system.views,
            spaces,
            actions,
            swapchains,
        };
        frame_loop.render_frame(runtime, backend, targets, reference_space, producer)
    }

    /// Stage a pixel buffer for a view; it is drawn by the next rendered frame.
    pub fn set_frame(
        &mut self,
        view_index: usize,
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
        is_rgba: bool,
    ) -> XrResult<()> {
        self.ensure_alive()?;
        let frame = StagedFrame::new(width, height, PixelLayout::from_rgba_flag(is_rgba), data)?;
        self.frame_loop.stager_mut().set_frame(view_index, frame)
    }

    pub fn set_staged_frame(&mut self, view_index: usize, frame: StagedFrame) -> XrResult<()> {
        self.ensure_alive()?;
        self.frame_loop.stager_mut().set_frame(view_index, frame)
    }

    pub fn apply_haptic_feedback(
        &mut self,
        path: &str,
        amplitude: f32,
        duration_ns: i64,
        frequency: f32,
    ) -> XrResult<()> {
        let session = self.session_handle()?;
        let pulse = HapticPulse::new(amplitude, duration_ns, frequency);
        let Self {
            runtime, actions, ..
        } = self;
        let actions = actions
            .as_ref()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        actions.apply_haptic_feedback(runtime, session, path, &pulse)
    }

    pub fn stop_haptic_feedback(&mut self, path: &str) -> XrResult<()> {
        let session = self.session_handle()?;
        let Self {
            runtime, actions, ..
        } = self;
        let actions = actions
            .as_ref()
            .ok_or(XrError::InvalidState("select_system must run first"))?;
        actions.stop_haptic_feedback(runtime, session, path)
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut G {
        &mut self.backend
    }

    pub fn config(&self) -> &XrConfig {
        &self.config
    }

    pub fn runtime_properties(&self) -> Option<&RuntimeProperties> {
        self.instance.as_ref().map(|instance| &instance.properties)
    }

    pub fn system(&self) -> Option<&NegotiatedSystem> {
        self.system.as_ref()
    }

    pub fn system_properties(&self) -> Option<&SystemProperties> {
        self.system.as_ref().map(|system| &system.properties)
    }

    pub fn view_configuration_views(&self) -> XrResult<&[ViewConfigurationView]> {
        self.system
            .as_ref()
            .map(|system| system.views.as_slice())
            .ok_or(XrError::InvalidState("select_system must run first"))
    }

    pub fn reference_space_bounds(&self, kind: ReferenceSpaceKind) -> XrResult<Option<Extent2Df>> {
        self.spaces.bounds(kind)
    }

    pub fn swapchain_count(&self) -> usize {
        self.swapchains.len()
    }

    pub fn swapchain_balance(&self) -> (u64, u64) {
        (self.swapchains.acquire_count(), self.swapchains.release_count())
    }

    pub fn action_count(&self) -> usize {
        self.actions.as_ref().map_or(0, ActionRegistry::len)
    }

    pub fn is_session_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn exit_requested(&self) -> bool {
        self.session.exit_requested()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_loop.frame_index()
    }

    pub fn context_switches_detected(&self) -> u64 {
        self.frame_loop.shim().switches_detected()
    }

    /// Tear everything down: session children, session, action set, instance.
    /// Keeps going past failures and returns the first one. Later calls on
    /// the application fail with [`XrError::InvalidState`].
    pub fn destroy(&mut self) -> XrResult<()> {
        self.ensure_alive()?;
        let mut first_err = self.teardown_session();

        if let Some(actions) = self.actions.take() {
            if let Err(err) = self.runtime.destroy_action_set(actions.set_handle()) {
                warn!("destroying action set failed: {err}");
                first_err.get_or_insert(err);
            }
        }
        self.system = None;
        if let Some(instance) = self.instance.take() {
            if let Err(err) = self.runtime.destroy_instance(instance.handle) {
                warn!("destroying instance failed: {err}");
                first_err.get_or_insert(err);
            }
        }
        self.frame_loop.stager_mut().clear();
        self.destroyed = true;
        info!("XR application destroyed");
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl<R, G> Drop for XrApplication<R, G>
where
    R: XrRuntime,
    G: GraphicsBackend<Binding = R::Binding, Image = R::Image>,
{
    fn drop(&mut self) {
        if !self.destroyed {
            if let Err(err) = self.destroy() {
                warn!("teardown on drop failed: {err}");
            }
        }
    }
}
