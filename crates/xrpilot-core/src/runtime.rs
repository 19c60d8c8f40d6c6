//! Boundary to the XR runtime.
//!
//! Every call is synchronous and blocking. Handles are opaque values issued by
//! the runtime implementation; the orchestrator never dereferences them.

use crate::types::{
    ActionHandle, ActionKind, ActionSetHandle, ActionValue, ApiVersionRange, BlendMode,
    Extent2Df, Fov, FormFactor, HapticPulse, InstanceHandle, Pose, Rect2D, ReferenceSpaceKind,
    RuntimeProperties, SessionHandle, SessionState, SpaceHandle, SwapchainHandle, SystemId,
    SystemProperties, Time, View, ViewConfigurationProperties, ViewConfigurationType,
    ViewConfigurationView,
};
use crate::XrResult;

/// Timeout meaning "wait until the runtime is done".
pub const INFINITE_DURATION: i64 = i64::MAX;

#[derive(Debug, Clone, Copy)]
pub struct InstanceCreateInfo<'a> {
    pub application_name: &'a str,
    pub engine_name: &'a str,
    pub layers: &'a [String],
    pub extensions: &'a [String],
}

/// Frame pacing result of one wait-frame call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub predicted_display_time: Time,
    pub predicted_display_period_ns: i64,
    pub should_render: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceLocation {
    pub pose: Pose,
    pub position_valid: bool,
    pub orientation_valid: bool,
}

impl SpaceLocation {
    pub fn is_valid(&self) -> bool {
        self.position_valid && self.orientation_valid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocatedViews {
    pub views: Vec<View>,
    pub position_valid: bool,
    pub orientation_valid: bool,
}

/// Swapchain parameters. Images are always created for color-attachment and
/// sampled usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub format: u32,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

/// One view of a projection layer: where the eye was and which swapchain
/// region holds its image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub swapchain: SwapchainHandle,
    pub image_rect: Rect2D,
    pub image_array_index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositionLayer {
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedBinding {
    pub action: ActionHandle,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeActionState {
    pub is_active: bool,
    pub changed_since_last_sync: bool,
    pub value: ActionValue,
}

/// Event delivered by [`XrRuntime::poll_event`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeEvent {
    SessionStateChanged {
        session: Option<SessionHandle>,
        state: SessionState,
        time: Time,
    },
    EventsLost {
        count: u32,
    },
    InstanceLossPending {
        loss_time: Time,
    },
    InteractionProfileChanged {
        session: Option<SessionHandle>,
    },
    ReferenceSpaceChangePending {
        session: Option<SessionHandle>,
        kind: Option<ReferenceSpaceKind>,
    },
    /// Event types the orchestrator does not act on.
    Other,
}

impl RuntimeEvent {
    /// Session the event refers to, if it carries a non-null one.
    pub fn session(&self) -> Option<SessionHandle> {
        match *self {
            RuntimeEvent::SessionStateChanged { session, .. }
            | RuntimeEvent::InteractionProfileChanged { session }
            | RuntimeEvent::ReferenceSpaceChangePending { session, .. } => session,
            _ => None,
        }
    }
}

pub trait XrRuntime {
    /// Graphics binding passed to session creation.
    type Binding;
    /// Swapchain image handle (texture name, image pointer).
    type Image: Copy;

    // Capability queries
    fn enumerate_layers(&mut self) -> XrResult<Vec<String>>;
    fn enumerate_extensions(&mut self) -> XrResult<Vec<String>>;
    fn create_instance(&mut self, info: &InstanceCreateInfo<'_>) -> XrResult<InstanceHandle>;
    fn instance_properties(&mut self, instance: InstanceHandle) -> XrResult<RuntimeProperties>;
    fn get_system(&mut self, instance: InstanceHandle, form_factor: FormFactor)
        -> XrResult<SystemId>;
    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<SystemProperties>;
    fn enumerate_view_configurations(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<Vec<ViewConfigurationType>>;
    fn view_configuration_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> XrResult<ViewConfigurationProperties>;
    fn enumerate_view_configuration_views(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>>;
    fn enumerate_blend_modes(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> XrResult<Vec<BlendMode>>;
    fn graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<ApiVersionRange>;
    fn destroy_instance(&mut self, instance: InstanceHandle) -> XrResult<()>;

    // Session lifecycle
    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &Self::Binding,
    ) -> XrResult<SessionHandle>;
    fn begin_session(&mut self, session: SessionHandle, ty: ViewConfigurationType)
        -> XrResult<()>;
    fn end_session(&mut self, session: SessionHandle) -> XrResult<()>;
    fn destroy_session(&mut self, session: SessionHandle) -> XrResult<()>;
    fn poll_event(&mut self, instance: InstanceHandle) -> XrResult<Option<RuntimeEvent>>;

    // Spaces
    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> XrResult<Vec<ReferenceSpaceKind>>;
    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> XrResult<SpaceHandle>;
    fn reference_space_bounds(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> XrResult<Option<Extent2Df>>;
    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: Time,
    ) -> XrResult<SpaceLocation>;
    fn destroy_space(&mut self, space: SpaceHandle) -> XrResult<()>;

    // Actions
    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
    ) -> XrResult<ActionSetHandle>;
    fn create_action(
        &mut self,
        set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        kind: ActionKind,
    ) -> XrResult<ActionHandle>;
    fn suggest_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: &str,
        bindings: &[SuggestedBinding],
    ) -> XrResult<()>;
    fn attach_action_set(&mut self, session: SessionHandle, set: ActionSetHandle) -> XrResult<()>;
    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> XrResult<SpaceHandle>;
    fn sync_actions(&mut self, session: SessionHandle, set: ActionSetHandle) -> XrResult<()>;
    fn action_state(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        kind: ActionKind,
    ) -> XrResult<RuntimeActionState>;
    fn apply_haptic_feedback(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        pulse: &HapticPulse,
    ) -> XrResult<()>;
    fn stop_haptic_feedback(&mut self, session: SessionHandle, action: ActionHandle)
        -> XrResult<()>;
    fn destroy_action_set(&mut self, set: ActionSetHandle) -> XrResult<()>;

    // Frame
    fn wait_frame(&mut self, session: SessionHandle) -> XrResult<FrameTiming>;
    fn begin_frame(&mut self, session: SessionHandle) -> XrResult<()>;
    fn locate_views(
        &mut self,
        session: SessionHandle,
        ty: ViewConfigurationType,
        time: Time,
        space: SpaceHandle,
    ) -> XrResult<LocatedViews>;
    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: Time,
        blend_mode: BlendMode,
        layers: &[CompositionLayer],
    ) -> XrResult<()>;

    // Swapchains
    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> XrResult<Vec<u32>>;
    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle>;
    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle)
        -> XrResult<Vec<Self::Image>>;
    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<u32>;
    /// Blocks until the acquired image is free or `timeout_ns` elapses;
    /// [`INFINITE_DURATION`] never times out.
    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, timeout_ns: i64)
        -> XrResult<()>;
    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<()>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> XrResult<()>;
}
