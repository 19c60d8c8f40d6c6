//! In-process runtime and graphics backend that record every boundary call.
//!
//! Used by the unit and lifecycle tests, and by the player's `--mock` mode
//! to exercise the loop without a headset. The runtime enforces the call
//! protocol a real runtime does (begin/end pairing, acquire/wait/release
//! order, attach-once, destroy children before parents) and reports
//! violations as [`XrError::RuntimeCallFailed`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::graphics::{GraphicsApi, GraphicsBackend, StagedFrame};
use crate::runtime::{
    CompositionLayer, FrameTiming, InstanceCreateInfo, LocatedViews, ProjectionView,
    RuntimeActionState, RuntimeEvent, SpaceLocation, SuggestedBinding, SwapchainCreateInfo,
    XrRuntime,
};
use crate::types::{
    ActionHandle, ActionKind, ActionSetHandle, ActionValue, ApiVersion, ApiVersionRange,
    BlendMode, Extent2Df, Fov, FormFactor, HapticPulse, InstanceHandle, Pose, ReferenceSpaceKind,
    RuntimeProperties, SessionHandle, SessionState, SpaceHandle, SwapchainHandle, SystemId,
    SystemProperties, Time, View, ViewConfigurationProperties, ViewConfigurationType,
    ViewConfigurationView,
};
use crate::{XrError, XrResult};

// Runtime result codes used for protocol violations.
const ERROR_RUNTIME_FAILURE: i32 = -2;
const ERROR_HANDLE_INVALID: i32 = -12;
const ERROR_SESSION_RUNNING: i32 = -14;
const ERROR_SESSION_NOT_RUNNING: i32 = -16;
const ERROR_CALL_ORDER_INVALID: i32 = -37;
const ERROR_ACTIONSETS_ALREADY_ATTACHED: i32 = -47;

const DISPLAY_PERIOD_NS: i64 = 11_111_111;

macro_rules! runtime_calls {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// One call across the runtime or graphics boundary.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RuntimeCall {
            $($variant,)*
            Graphics(GraphicsCall),
        }

        impl RuntimeCall {
            pub fn name(self) -> &'static str {
                match self {
                    $(RuntimeCall::$variant => $name,)*
                    RuntimeCall::Graphics(call) => call.name(),
                }
            }
        }
    };
}

runtime_calls! {
    EnumerateLayers => "xrEnumerateApiLayerProperties",
    EnumerateExtensions => "xrEnumerateInstanceExtensionProperties",
    CreateInstance => "xrCreateInstance",
    InstanceProperties => "xrGetInstanceProperties",
    GetSystem => "xrGetSystem",
    SystemProperties => "xrGetSystemProperties",
    EnumerateViewConfigurations => "xrEnumerateViewConfigurations",
    ViewConfigurationProperties => "xrGetViewConfigurationProperties",
    EnumerateViewConfigurationViews => "xrEnumerateViewConfigurationViews",
    EnumerateBlendModes => "xrEnumerateEnvironmentBlendModes",
    GraphicsRequirements => "xrGetOpenGLGraphicsRequirementsKHR",
    DestroyInstance => "xrDestroyInstance",
    CreateSession => "xrCreateSession",
    BeginSession => "xrBeginSession",
    EndSession => "xrEndSession",
    DestroySession => "xrDestroySession",
    PollEvent => "xrPollEvent",
    EnumerateReferenceSpaces => "xrEnumerateReferenceSpaces",
    CreateReferenceSpace => "xrCreateReferenceSpace",
    ReferenceSpaceBounds => "xrGetReferenceSpaceBoundsRect",
    LocateSpace => "xrLocateSpace",
    DestroySpace => "xrDestroySpace",
    CreateActionSet => "xrCreateActionSet",
    CreateAction => "xrCreateAction",
    SuggestBindings => "xrSuggestInteractionProfileBindings",
    AttachActionSet => "xrAttachSessionActionSets",
    CreateActionSpace => "xrCreateActionSpace",
    SyncActions => "xrSyncActions",
    ActionState => "xrGetActionState",
    ApplyHapticFeedback => "xrApplyHapticFeedback",
    StopHapticFeedback => "xrStopHapticFeedback",
    DestroyActionSet => "xrDestroyActionSet",
    WaitFrame => "xrWaitFrame",
    BeginFrame => "xrBeginFrame",
    LocateViews => "xrLocateViews",
    EndFrame => "xrEndFrame",
    EnumerateSwapchainFormats => "xrEnumerateSwapchainFormats",
    CreateSwapchain => "xrCreateSwapchain",
    EnumerateSwapchainImages => "xrEnumerateSwapchainImages",
    AcquireSwapchainImage => "xrAcquireSwapchainImage",
    WaitSwapchainImage => "xrWaitSwapchainImage",
    ReleaseSwapchainImage => "xrReleaseSwapchainImage",
    DestroySwapchain => "xrDestroySwapchain",
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsCall {
    CheckRequirements,
    BindDevice,
    InitResources,
    PrepareImages,
    ReacquireContext,
    RenderView,
    PresentMirror,
}

impl GraphicsCall {
    pub fn name(self) -> &'static str {
        match self {
            GraphicsCall::CheckRequirements => "check_requirements",
            GraphicsCall::BindDevice => "bind_device",
            GraphicsCall::InitResources => "init_resources",
            GraphicsCall::PrepareImages => "prepare_images",
            GraphicsCall::ReacquireContext => "reacquire_context",
            GraphicsCall::RenderView => "render_view_from_buffer",
            GraphicsCall::PresentMirror => "present_mirror",
        }
    }
}

/// Ordered record of boundary calls, shareable between the mock runtime,
/// the mock backend and the test holding it.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<RuntimeCall>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: RuntimeCall) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.0.borrow().clone()
    }

    pub fn count(&self, call: RuntimeCall) -> usize {
        self.0.borrow().iter().filter(|c| **c == call).count()
    }

    /// Index of the first occurrence.
    pub fn position(&self, call: RuntimeCall) -> Option<usize> {
        self.0.borrow().iter().position(|c| *c == call)
    }

    /// Index of the last occurrence.
    pub fn last_position(&self, call: RuntimeCall) -> Option<usize> {
        self.0.borrow().iter().rposition(|c| *c == call)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Graphics binding the mock runtime accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBinding {
    pub context_id: u64,
}

#[derive(Debug, Clone)]
struct MockAction {
    handle: ActionHandle,
    set: ActionSetHandle,
    name: String,
    localized_name: String,
    kind: ActionKind,
    bindings: Vec<String>,
    synced: Option<ActionValue>,
    changed: bool,
}

#[derive(Debug, Clone)]
struct MockSwapchain {
    next_image: u32,
    acquired: Option<u32>,
    waited: bool,
}

/// One end-frame submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedFrame {
    pub display_time: Time,
    pub blend_mode: BlendMode,
    pub layers: Vec<CompositionLayer>,
}

impl SubmittedFrame {
    pub fn view_count(&self) -> usize {
        self.layers.iter().map(|layer| layer.views.len()).sum()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FrameProtocol {
    waited: bool,
    begun: bool,
    /// Frames dropped by a begin-frame while they were still open.
    discarded: usize,
}

pub struct MockRuntime {
    log: CallLog,
    next_handle: u64,
    failures: HashSet<RuntimeCall>,

    layers: Vec<String>,
    extensions: Vec<String>,
    properties: RuntimeProperties,
    system_properties: SystemProperties,
    view_configurations: Vec<ViewConfigurationType>,
    views: Vec<ViewConfigurationView>,
    blend_modes: Vec<BlendMode>,
    reference_space_kinds: Vec<ReferenceSpaceKind>,
    stage_bounds: Option<Extent2Df>,
    swapchain_formats: Vec<u32>,
    requirements: ApiVersionRange,

    instance: Option<InstanceHandle>,
    system: Option<SystemId>,
    session: Option<SessionHandle>,
    session_running: bool,
    spaces: BTreeSet<u64>,
    action_sets: BTreeSet<u64>,
    actions: Vec<MockAction>,
    attached: bool,
    suggestions: Vec<(String, Vec<String>)>,
    inputs: HashMap<String, ActionValue>,
    space_pose: Option<Pose>,
    events: VecDeque<RuntimeEvent>,
    frame: FrameProtocol,
    should_render: bool,
    display_time: i64,
    swapchains: BTreeMap<u64, MockSwapchain>,
    swapchain_infos: Vec<SwapchainCreateInfo>,
    submitted: Vec<SubmittedFrame>,
    haptics: Vec<HapticPulse>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub const GRAPHICS_EXTENSION: &'static str = "XR_KHR_opengl_enable";
    pub const IMAGES_PER_SWAPCHAIN: usize = 3;

    pub const GL_RGB10_A2: u32 = 0x8059;
    pub const GL_RGBA8: u32 = 0x8058;
    pub const GL_SRGB8_ALPHA8: u32 = 0x8C43;

    /// A stereo HMD offering opaque and additive blending, all three
    /// reference spaces and an OpenGL 4.0-4.6 requirement.
    pub fn new() -> Self {
        let view = ViewConfigurationView {
            recommended_width: 1440,
            max_width: 2880,
            recommended_height: 1600,
            max_height: 3200,
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        Self {
            log: CallLog::new(),
            next_handle: 1,
            failures: HashSet::new(),
            layers: Vec::new(),
            extensions: vec![
                Self::GRAPHICS_EXTENSION.to_string(),
                "XR_EXT_debug_utils".to_string(),
            ],
            properties: RuntimeProperties {
                runtime_name: "mock-runtime".to_string(),
                runtime_version: ApiVersion::new(1, 0, 34),
            },
            system_properties: SystemProperties {
                system_name: "mock-hmd".to_string(),
                vendor_id: 0x1234,
                max_swapchain_width: 4096,
                max_swapchain_height: 4096,
                max_layer_count: 16,
                orientation_tracking: true,
                position_tracking: true,
            },
            view_configurations: vec![ViewConfigurationType::PrimaryStereo],
            views: vec![view; 2],
            blend_modes: vec![BlendMode::Opaque, BlendMode::Additive],
            reference_space_kinds: ReferenceSpaceKind::ALL.to_vec(),
            stage_bounds: None,
            swapchain_formats: vec![Self::GL_SRGB8_ALPHA8, Self::GL_RGBA8, Self::GL_RGB10_A2],
            requirements: ApiVersionRange {
                min: ApiVersion::new(4, 0, 0),
                max: ApiVersion::new(4, 6, 0),
            },
            instance: None,
            system: None,
            session: None,
            session_running: false,
            spaces: BTreeSet::new(),
            action_sets: BTreeSet::new(),
            actions: Vec::new(),
            attached: false,
            suggestions: Vec::new(),
            inputs: HashMap::new(),
            space_pose: None,
            events: VecDeque::new(),
            frame: FrameProtocol::default(),
            should_render: true,
            display_time: 0,
            swapchains: BTreeMap::new(),
            swapchain_infos: Vec::new(),
            submitted: Vec::new(),
            haptics: Vec::new(),
        }
    }

    pub fn with_layers(mut self, layers: Vec<String>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_views(mut self, ty: ViewConfigurationType, views: Vec<ViewConfigurationView>) -> Self {
        self.view_configurations = vec![ty];
        self.views = views;
        self
    }

    pub fn with_blend_modes(mut self, modes: Vec<BlendMode>) -> Self {
        self.blend_modes = modes;
        self
    }

    pub fn with_reference_spaces(mut self, kinds: Vec<ReferenceSpaceKind>) -> Self {
        self.reference_space_kinds = kinds;
        self
    }

    pub fn with_stage_bounds(mut self, bounds: Extent2Df) -> Self {
        self.stage_bounds = Some(bounds);
        self
    }

    pub fn with_swapchain_formats(mut self, formats: Vec<u32>) -> Self {
        self.swapchain_formats = formats;
        self
    }

    pub fn with_requirements(mut self, requirements: ApiVersionRange) -> Self {
        self.requirements = requirements;
        self
    }

    /// Share a call log, typically with a [`MockGraphics`].
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn count(&self, call: RuntimeCall) -> usize {
        self.log.count(call)
    }

    /// Make every later `call` fail with a runtime error.
    pub fn fail_on(&mut self, call: RuntimeCall) {
        self.failures.insert(call);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    pub fn views(&self) -> &[ViewConfigurationView] {
        &self.views
    }

    /// Create an instance, system and session without recording calls.
    pub fn quick_session(&mut self) -> (InstanceHandle, SessionHandle) {
        let instance = InstanceHandle::from_raw(self.alloc());
        let system = SystemId::from_raw(self.alloc());
        let session = SessionHandle::from_raw(self.alloc());
        self.instance = Some(instance);
        self.system = Some(system);
        self.session = Some(session);
        (instance, session)
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    /// Queue a state change for the current session.
    pub fn push_state(&mut self, state: SessionState) {
        self.display_time += 1;
        self.events.push_back(RuntimeEvent::SessionStateChanged {
            session: self.session,
            state,
            time: Time::from_nanos(self.display_time),
        });
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Value reported for every action bound to `path` from the next sync on.
    pub fn set_input(&mut self, path: &str, value: ActionValue) {
        self.inputs.insert(path.to_string(), value);
    }

    pub fn clear_input(&mut self, path: &str) {
        self.inputs.remove(path);
    }

    /// Pose reported by space location; `None` reports an untracked location.
    pub fn set_space_pose(&mut self, pose: Option<Pose>) {
        self.space_pose = pose;
    }

    pub fn set_should_render(&mut self, should_render: bool) {
        self.should_render = should_render;
    }

    pub fn action_localized_name(&self, name: &str) -> Option<String> {
        self.actions
            .iter()
            .find(|action| action.name == name)
            .map(|action| action.localized_name.clone())
    }

    pub fn suggested_profiles(&self) -> Vec<String> {
        self.suggestions.iter().map(|(profile, _)| profile.clone()).collect()
    }

    pub fn suggested_paths(&self, profile: &str) -> Option<Vec<String>> {
        self.suggestions
            .iter()
            .find(|(p, _)| p == profile)
            .map(|(_, paths)| paths.clone())
    }

    pub fn swapchain_infos(&self) -> &[SwapchainCreateInfo] {
        &self.swapchain_infos
    }

    pub fn submitted_frames(&self) -> &[SubmittedFrame] {
        &self.submitted
    }

    pub fn haptic_pulses(&self) -> &[HapticPulse] {
        &self.haptics
    }

    pub fn discarded_frames(&self) -> usize {
        self.frame.discarded
    }

    pub fn is_session_begun(&self) -> bool {
        self.session_running
    }

    pub fn live_spaces(&self) -> usize {
        self.spaces.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.swapchains.len()
    }

    pub fn live_instance(&self) -> bool {
        self.instance.is_some()
    }

    pub fn live_session(&self) -> bool {
        self.session.is_some()
    }

    fn alloc(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn enter(&mut self, call: RuntimeCall) -> XrResult<()> {
        self.log.record(call);
        if self.failures.contains(&call) {
            return Err(XrError::runtime(
                call.name(),
                ERROR_RUNTIME_FAILURE,
                Some("XR_ERROR_RUNTIME_FAILURE".to_string()),
            ));
        }
        Ok(())
    }

    fn violation(call: RuntimeCall, code: i32, message: &str) -> XrError {
        XrError::runtime(call.name(), code, Some(message.to_string()))
    }

    fn check_instance(&self, call: RuntimeCall, instance: InstanceHandle) -> XrResult<()> {
        if self.instance == Some(instance) {
            Ok(())
        } else {
            Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"))
        }
    }

    fn check_session(&self, call: RuntimeCall, session: SessionHandle) -> XrResult<()> {
        if self.session == Some(session) {
            Ok(())
        } else {
            Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"))
        }
    }

    fn swapchain_mut(
        &mut self,
        call: RuntimeCall,
        swapchain: SwapchainHandle,
    ) -> XrResult<&mut MockSwapchain> {
        self.swapchains
            .get_mut(&swapchain.into_raw())
            .ok_or_else(|| Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"))
    }

    fn action(&self, call: RuntimeCall, action: ActionHandle) -> XrResult<&MockAction> {
        self.actions
            .iter()
            .find(|a| a.handle == action)
            .ok_or_else(|| Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"))
    }
}

impl XrRuntime for MockRuntime {
    type Binding = MockBinding;
    type Image = u32;

    fn enumerate_layers(&mut self) -> XrResult<Vec<String>> {
        self.enter(RuntimeCall::EnumerateLayers)?;
        Ok(self.layers.clone())
    }

    fn enumerate_extensions(&mut self) -> XrResult<Vec<String>> {
        self.enter(RuntimeCall::EnumerateExtensions)?;
        Ok(self.extensions.clone())
    }

    fn create_instance(&mut self, info: &InstanceCreateInfo<'_>) -> XrResult<InstanceHandle> {
        let call = RuntimeCall::CreateInstance;
        self.enter(call)?;
        let unknown = info
            .layers
            .iter()
            .any(|l| !self.layers.contains(l))
            || info.extensions.iter().any(|e| !self.extensions.contains(e));
        if unknown {
            return Err(Self::violation(call, -9, "XR_ERROR_EXTENSION_NOT_PRESENT"));
        }
        let instance = InstanceHandle::from_raw(self.alloc());
        self.instance = Some(instance);
        Ok(instance)
    }

    fn instance_properties(&mut self, instance: InstanceHandle) -> XrResult<RuntimeProperties> {
        let call = RuntimeCall::InstanceProperties;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        Ok(self.properties.clone())
    }

    fn get_system(&mut self, instance: InstanceHandle, form_factor: FormFactor) -> XrResult<SystemId> {
        let call = RuntimeCall::GetSystem;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        if form_factor != FormFactor::HeadMountedDisplay {
            return Err(Self::violation(call, -50, "XR_ERROR_FORM_FACTOR_UNAVAILABLE"));
        }
        let system = SystemId::from_raw(self.alloc());
        self.system = Some(system);
        Ok(system)
    }

    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> XrResult<SystemProperties> {
        let call = RuntimeCall::SystemProperties;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        Ok(self.system_properties.clone())
    }

    fn enumerate_view_configurations(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> XrResult<Vec<ViewConfigurationType>> {
        let call = RuntimeCall::EnumerateViewConfigurations;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        Ok(self.view_configurations.clone())
    }

    fn view_configuration_properties(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        _ty: ViewConfigurationType,
    ) -> XrResult<ViewConfigurationProperties> {
        let call = RuntimeCall::ViewConfigurationProperties;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        Ok(ViewConfigurationProperties { fov_mutable: true })
    }

    fn enumerate_view_configuration_views(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        ty: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>> {
        let call = RuntimeCall::EnumerateViewConfigurationViews;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        if !self.view_configurations.contains(&ty) {
            return Err(Self::violation(
                call,
                -41,
                "XR_ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED",
            ));
        }
        Ok(self.views.clone())
    }

    fn enumerate_blend_modes(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        _ty: ViewConfigurationType,
    ) -> XrResult<Vec<BlendMode>> {
        let call = RuntimeCall::EnumerateBlendModes;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        Ok(self.blend_modes.clone())
    }

    fn graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> XrResult<ApiVersionRange> {
        let call = RuntimeCall::GraphicsRequirements;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        Ok(self.requirements)
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> XrResult<()> {
        let call = RuntimeCall::DestroyInstance;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        if self.session.is_some() || !self.action_sets.is_empty() {
            return Err(Self::violation(
                call,
                ERROR_CALL_ORDER_INVALID,
                "instance destroyed while children are alive",
            ));
        }
        self.instance = None;
        self.system = None;
        Ok(())
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        _binding: &MockBinding,
    ) -> XrResult<SessionHandle> {
        let call = RuntimeCall::CreateSession;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        if self.system != Some(system) {
            return Err(Self::violation(call, -51, "XR_ERROR_SYSTEM_INVALID"));
        }
        if self.session.is_some() {
            return Err(Self::violation(call, ERROR_CALL_ORDER_INVALID, "session already exists"));
        }
        let session = SessionHandle::from_raw(self.alloc());
        self.session = Some(session);
        self.events.push_back(RuntimeEvent::SessionStateChanged {
            session: Some(session),
            state: SessionState::Idle,
            time: Time::from_nanos(self.display_time),
        });
        Ok(session)
    }

    fn begin_session(&mut self, session: SessionHandle, _ty: ViewConfigurationType) -> XrResult<()> {
        let call = RuntimeCall::BeginSession;
        self.enter(call)?;
        self.check_session(call, session)?;
        if self.session_running {
            return Err(Self::violation(call, ERROR_SESSION_RUNNING, "XR_ERROR_SESSION_RUNNING"));
        }
        self.session_running = true;
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> XrResult<()> {
        let call = RuntimeCall::EndSession;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.session_running {
            return Err(Self::violation(
                call,
                ERROR_SESSION_NOT_RUNNING,
                "XR_ERROR_SESSION_NOT_RUNNING",
            ));
        }
        self.session_running = false;
        Ok(())
    }

    fn destroy_session(&mut self, session: SessionHandle) -> XrResult<()> {
        let call = RuntimeCall::DestroySession;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.spaces.is_empty() || !self.swapchains.is_empty() {
            return Err(Self::violation(
                call,
                ERROR_CALL_ORDER_INVALID,
                "session destroyed while spaces or swapchains are alive",
            ));
        }
        self.session = None;
        self.session_running = false;
        self.attached = false;
        Ok(())
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> XrResult<Option<RuntimeEvent>> {
        let call = RuntimeCall::PollEvent;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        Ok(self.events.pop_front())
    }

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> XrResult<Vec<ReferenceSpaceKind>> {
        let call = RuntimeCall::EnumerateReferenceSpaces;
        self.enter(call)?;
        self.check_session(call, session)?;
        Ok(self.reference_space_kinds.clone())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> XrResult<SpaceHandle> {
        let call = RuntimeCall::CreateReferenceSpace;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.reference_space_kinds.contains(&kind) {
            return Err(Self::violation(call, -31, "XR_ERROR_REFERENCE_SPACE_UNSUPPORTED"));
        }
        let handle = self.alloc();
        self.spaces.insert(handle);
        Ok(SpaceHandle::from_raw(handle))
    }

    fn reference_space_bounds(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> XrResult<Option<Extent2Df>> {
        let call = RuntimeCall::ReferenceSpaceBounds;
        self.enter(call)?;
        self.check_session(call, session)?;
        Ok(match kind {
            ReferenceSpaceKind::Stage => self.stage_bounds,
            _ => None,
        })
    }

    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        _time: Time,
    ) -> XrResult<SpaceLocation> {
        let call = RuntimeCall::LocateSpace;
        self.enter(call)?;
        if !self.spaces.contains(&space.into_raw()) || !self.spaces.contains(&base.into_raw()) {
            return Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"));
        }
        Ok(match self.space_pose {
            Some(pose) => SpaceLocation {
                pose,
                position_valid: true,
                orientation_valid: true,
            },
            None => SpaceLocation {
                pose: Pose::IDENTITY,
                position_valid: false,
                orientation_valid: false,
            },
        })
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> XrResult<()> {
        let call = RuntimeCall::DestroySpace;
        self.enter(call)?;
        if !self.spaces.remove(&space.into_raw()) {
            return Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"));
        }
        Ok(())
    }

    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        _name: &str,
        _localized_name: &str,
    ) -> XrResult<ActionSetHandle> {
        let call = RuntimeCall::CreateActionSet;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        let handle = self.alloc();
        self.action_sets.insert(handle);
        Ok(ActionSetHandle::from_raw(handle))
    }

    fn create_action(
        &mut self,
        set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        kind: ActionKind,
    ) -> XrResult<ActionHandle> {
        let call = RuntimeCall::CreateAction;
        self.enter(call)?;
        if !self.action_sets.contains(&set.into_raw()) {
            return Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"));
        }
        if self.actions.iter().any(|a| a.set == set && a.name == name) {
            return Err(Self::violation(call, -48, "XR_ERROR_NAME_DUPLICATED"));
        }
        let handle = ActionHandle::from_raw(self.alloc());
        self.actions.push(MockAction {
            handle,
            set,
            name: name.to_string(),
            localized_name: localized_name.to_string(),
            kind,
            bindings: Vec::new(),
            synced: None,
            changed: false,
        });
        Ok(handle)
    }

    fn suggest_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: &str,
        bindings: &[SuggestedBinding],
    ) -> XrResult<()> {
        let call = RuntimeCall::SuggestBindings;
        self.enter(call)?;
        self.check_instance(call, instance)?;
        if self.attached {
            return Err(Self::violation(
                call,
                ERROR_ACTIONSETS_ALREADY_ATTACHED,
                "XR_ERROR_ACTIONSETS_ALREADY_ATTACHED",
            ));
        }
        for binding in bindings {
            let action = self
                .actions
                .iter_mut()
                .find(|a| a.handle == binding.action)
                .ok_or_else(|| Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"))?;
            if !action.bindings.contains(&binding.path) {
                action.bindings.push(binding.path.clone());
            }
        }
        let paths = bindings.iter().map(|b| b.path.clone()).collect();
        self.suggestions.push((profile.to_string(), paths));
        Ok(())
    }

    fn attach_action_set(&mut self, session: SessionHandle, set: ActionSetHandle) -> XrResult<()> {
        let call = RuntimeCall::AttachActionSet;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.action_sets.contains(&set.into_raw()) {
            return Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"));
        }
        if self.attached {
            return Err(Self::violation(
                call,
                ERROR_ACTIONSETS_ALREADY_ATTACHED,
                "XR_ERROR_ACTIONSETS_ALREADY_ATTACHED",
            ));
        }
        self.attached = true;
        Ok(())
    }

    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> XrResult<SpaceHandle> {
        let call = RuntimeCall::CreateActionSpace;
        self.enter(call)?;
        self.check_session(call, session)?;
        if self.action(call, action)?.kind != ActionKind::Pose {
            return Err(Self::violation(call, -27, "XR_ERROR_ACTION_TYPE_MISMATCH"));
        }
        let handle = self.alloc();
        self.spaces.insert(handle);
        Ok(SpaceHandle::from_raw(handle))
    }

    fn sync_actions(&mut self, session: SessionHandle, set: ActionSetHandle) -> XrResult<()> {
        let call = RuntimeCall::SyncActions;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.attached {
            return Err(Self::violation(call, -46, "XR_ERROR_ACTIONSET_NOT_ATTACHED"));
        }
        let inputs = &self.inputs;
        for action in self.actions.iter_mut().filter(|a| a.set == set) {
            let value = action
                .bindings
                .iter()
                .find_map(|path| inputs.get(path).copied());
            action.changed = value.is_some() && value != action.synced;
            action.synced = value;
        }
        Ok(())
    }

    fn action_state(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        kind: ActionKind,
    ) -> XrResult<RuntimeActionState> {
        let call = RuntimeCall::ActionState;
        self.enter(call)?;
        self.check_session(call, session)?;
        let action = self.action(call, action)?;
        if action.kind != kind {
            return Err(Self::violation(call, -27, "XR_ERROR_ACTION_TYPE_MISMATCH"));
        }
        let idle = match kind {
            ActionKind::Boolean => ActionValue::Boolean(false),
            ActionKind::Float => ActionValue::Float(0.0),
            ActionKind::Vector2 => ActionValue::Vector2(glam::Vec2::ZERO),
            ActionKind::Pose => ActionValue::Pose(None),
            ActionKind::Vibration => ActionValue::Vibration,
        };
        Ok(RuntimeActionState {
            is_active: action.synced.is_some(),
            changed_since_last_sync: action.changed,
            value: action.synced.unwrap_or(idle),
        })
    }

    fn apply_haptic_feedback(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        pulse: &HapticPulse,
    ) -> XrResult<()> {
        let call = RuntimeCall::ApplyHapticFeedback;
        self.enter(call)?;
        self.check_session(call, session)?;
        if self.action(call, action)?.kind != ActionKind::Vibration {
            return Err(Self::violation(call, -27, "XR_ERROR_ACTION_TYPE_MISMATCH"));
        }
        self.haptics.push(*pulse);
        Ok(())
    }

    fn stop_haptic_feedback(&mut self, session: SessionHandle, action: ActionHandle) -> XrResult<()> {
        let call = RuntimeCall::StopHapticFeedback;
        self.enter(call)?;
        self.check_session(call, session)?;
        self.action(call, action)?;
        Ok(())
    }

    fn destroy_action_set(&mut self, set: ActionSetHandle) -> XrResult<()> {
        let call = RuntimeCall::DestroyActionSet;
        self.enter(call)?;
        if !self.action_sets.remove(&set.into_raw()) {
            return Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"));
        }
        self.actions.retain(|a| a.set != set);
        Ok(())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> XrResult<FrameTiming> {
        let call = RuntimeCall::WaitFrame;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.session_running {
            return Err(Self::violation(
                call,
                ERROR_SESSION_NOT_RUNNING,
                "XR_ERROR_SESSION_NOT_RUNNING",
            ));
        }
        self.frame.waited = true;
        self.display_time += DISPLAY_PERIOD_NS;
        Ok(FrameTiming {
            predicted_display_time: Time::from_nanos(self.display_time),
            predicted_display_period_ns: DISPLAY_PERIOD_NS,
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> XrResult<()> {
        let call = RuntimeCall::BeginFrame;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.frame.waited {
            return Err(Self::violation(call, ERROR_CALL_ORDER_INVALID, "XR_ERROR_CALL_ORDER_INVALID"));
        }
        // XR_FRAME_DISCARDED: the open frame is dropped and a new one begins.
        if self.frame.begun {
            self.frame.discarded += 1;
        }
        self.frame.waited = false;
        self.frame.begun = true;
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        _ty: ViewConfigurationType,
        _time: Time,
        space: SpaceHandle,
    ) -> XrResult<LocatedViews> {
        let call = RuntimeCall::LocateViews;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.spaces.contains(&space.into_raw()) {
            return Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID"));
        }
        let half_angle = std::f32::consts::FRAC_PI_4;
        let views = (0..self.views.len())
            .map(|index| {
                let mut pose = Pose::IDENTITY;
                pose.position.x = if index == 0 { -0.032 } else { 0.032 };
                View {
                    pose,
                    fov: Fov {
                        angle_left: -half_angle,
                        angle_right: half_angle,
                        angle_up: half_angle,
                        angle_down: -half_angle,
                    },
                }
            })
            .collect();
        Ok(LocatedViews {
            views,
            position_valid: true,
            orientation_valid: true,
        })
    }

    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: Time,
        blend_mode: BlendMode,
        layers: &[CompositionLayer],
    ) -> XrResult<()> {
        let call = RuntimeCall::EndFrame;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.frame.begun {
            return Err(Self::violation(call, ERROR_CALL_ORDER_INVALID, "XR_ERROR_CALL_ORDER_INVALID"));
        }
        if self.swapchains.values().any(|sc| sc.acquired.is_some()) {
            return Err(Self::violation(
                call,
                -42,
                "XR_ERROR_LAYER_INVALID: swapchain image still acquired",
            ));
        }
        self.frame.begun = false;
        self.submitted.push(SubmittedFrame {
            display_time,
            blend_mode,
            layers: layers.to_vec(),
        });
        Ok(())
    }

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> XrResult<Vec<u32>> {
        let call = RuntimeCall::EnumerateSwapchainFormats;
        self.enter(call)?;
        self.check_session(call, session)?;
        Ok(self.swapchain_formats.clone())
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle> {
        let call = RuntimeCall::CreateSwapchain;
        self.enter(call)?;
        self.check_session(call, session)?;
        if !self.swapchain_formats.contains(&info.format) {
            return Err(Self::violation(call, -26, "XR_ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED"));
        }
        let handle = self.alloc();
        self.swapchains.insert(
            handle,
            MockSwapchain {
                next_image: 0,
                acquired: None,
                waited: false,
            },
        );
        self.swapchain_infos.push(*info);
        Ok(SwapchainHandle::from_raw(handle))
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> XrResult<Vec<u32>> {
        let call = RuntimeCall::EnumerateSwapchainImages;
        self.enter(call)?;
        self.swapchain_mut(call, swapchain)?;
        let base = swapchain.into_raw() as u32 * 100;
        Ok((0..Self::IMAGES_PER_SWAPCHAIN as u32).map(|i| base + i).collect())
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<u32> {
        let call = RuntimeCall::AcquireSwapchainImage;
        self.enter(call)?;
        let sc = self.swapchain_mut(call, swapchain)?;
        if sc.acquired.is_some() {
            return Err(Self::violation(call, ERROR_CALL_ORDER_INVALID, "XR_ERROR_CALL_ORDER_INVALID"));
        }
        let index = sc.next_image;
        sc.next_image = (sc.next_image + 1) % Self::IMAGES_PER_SWAPCHAIN as u32;
        sc.acquired = Some(index);
        sc.waited = false;
        Ok(index)
    }

    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, _timeout_ns: i64) -> XrResult<()> {
        let call = RuntimeCall::WaitSwapchainImage;
        self.enter(call)?;
        let sc = self.swapchain_mut(call, swapchain)?;
        if sc.acquired.is_none() || sc.waited {
            return Err(Self::violation(call, ERROR_CALL_ORDER_INVALID, "XR_ERROR_CALL_ORDER_INVALID"));
        }
        sc.waited = true;
        Ok(())
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        let call = RuntimeCall::ReleaseSwapchainImage;
        self.enter(call)?;
        let sc = self.swapchain_mut(call, swapchain)?;
        if sc.acquired.is_none() || !sc.waited {
            return Err(Self::violation(call, ERROR_CALL_ORDER_INVALID, "XR_ERROR_CALL_ORDER_INVALID"));
        }
        sc.acquired = None;
        sc.waited = false;
        Ok(())
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        let call = RuntimeCall::DestroySwapchain;
        self.enter(call)?;
        match self.swapchains.remove(&swapchain.into_raw()) {
            Some(_) => Ok(()),
            None => Err(Self::violation(call, ERROR_HANDLE_INVALID, "XR_ERROR_HANDLE_INVALID")),
        }
    }
}

/// A view drawn by [`MockGraphics`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedView {
    pub image: u32,
    pub swapchain: SwapchainHandle,
    pub width: u32,
    pub height: u32,
    pub flip_vertical: bool,
}

/// Graphics backend that draws nothing and remembers what it was asked to do.
#[derive(Debug)]
pub struct MockGraphics {
    log: Option<CallLog>,
    version: ApiVersion,
    max_samples: u32,
    initialized: bool,
    context_switched: bool,
    reacquire_calls: u64,
    prepared_swapchains: usize,
    rendered: Vec<RenderedView>,
    mirrors: Vec<u64>,
    fail_render: bool,
}

impl Default for MockGraphics {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGraphics {
    /// An OpenGL 4.5 device rendering single-sampled.
    pub fn new() -> Self {
        Self {
            log: None,
            version: ApiVersion::new(4, 5, 0),
            max_samples: 1,
            initialized: false,
            context_switched: false,
            reacquire_calls: 0,
            prepared_swapchains: 0,
            rendered: Vec::new(),
            mirrors: Vec::new(),
            fail_render: false,
        }
    }

    pub fn with_version(mut self, version: ApiVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Pretend a runtime call made another context current.
    pub fn simulate_context_switch(&mut self) {
        self.context_switched = true;
    }

    /// Fail every later render.
    pub fn fail_renders(&mut self, fail: bool) {
        self.fail_render = fail;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reacquire_calls(&self) -> u64 {
        self.reacquire_calls
    }

    pub fn prepared_swapchains(&self) -> usize {
        self.prepared_swapchains
    }

    pub fn rendered(&self) -> &[RenderedView] {
        &self.rendered
    }

    pub fn mirror_presents(&self) -> &[u64] {
        &self.mirrors
    }

    fn record(&self, call: GraphicsCall) {
        if let Some(log) = &self.log {
            log.record(RuntimeCall::Graphics(call));
        }
    }
}

impl GraphicsBackend for MockGraphics {
    type Binding = MockBinding;
    type Image = u32;

    fn api(&self) -> GraphicsApi {
        GraphicsApi::OpenGl
    }

    fn check_requirements(&mut self, range: &ApiVersionRange) -> XrResult<()> {
        self.record(GraphicsCall::CheckRequirements);
        if range.contains(self.version) {
            Ok(())
        } else {
            Err(XrError::UnsupportedGraphicsApi(*range))
        }
    }

    fn bind_device(&mut self, _views: &[ViewConfigurationView]) -> XrResult<MockBinding> {
        self.record(GraphicsCall::BindDevice);
        Ok(MockBinding { context_id: 1 })
    }

    fn init_resources(&mut self) -> XrResult<()> {
        self.record(GraphicsCall::InitResources);
        self.initialized = true;
        Ok(())
    }

    fn supported_sample_count(&self, view: &ViewConfigurationView) -> u32 {
        view.recommended_sample_count.clamp(1, self.max_samples)
    }

    fn prepare_images(&mut self, _images: &[u32]) -> XrResult<()> {
        self.record(GraphicsCall::PrepareImages);
        self.prepared_swapchains += 1;
        Ok(())
    }

    fn reacquire_context(&mut self, _site: &'static str) -> bool {
        self.record(GraphicsCall::ReacquireContext);
        self.reacquire_calls += 1;
        std::mem::take(&mut self.context_switched)
    }

    fn render_view_from_buffer(
        &mut self,
        view: &ProjectionView,
        image: u32,
        frame: &StagedFrame,
    ) -> XrResult<()> {
        self.record(GraphicsCall::RenderView);
        if self.fail_render {
            return Err(XrError::graphics("simulated render failure"));
        }
        self.rendered.push(RenderedView {
            image,
            swapchain: view.swapchain,
            width: frame.width,
            height: frame.height,
            flip_vertical: frame.flip_vertical,
        });
        Ok(())
    }

    fn present_mirror(&mut self, frame_index: u64) -> XrResult<()> {
        self.record(GraphicsCall::PresentMirror);
        self.mirrors.push(frame_index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_log_is_shared() {
        let log = CallLog::new();
        let mut runtime = MockRuntime::new().with_call_log(log.clone());
        runtime.enumerate_layers().unwrap();
        assert_eq!(log.calls(), vec![RuntimeCall::EnumerateLayers]);
        assert_eq!(log.position(RuntimeCall::EnumerateLayers), Some(0));
    }

    #[test]
    fn test_injected_failure_carries_call_name() {
        let mut runtime = MockRuntime::new();
        runtime.fail_on(RuntimeCall::EnumerateExtensions);
        let err = runtime.enumerate_extensions().unwrap_err();
        assert!(err.to_string().starts_with("xrEnumerateInstanceExtensionProperties failed"));
    }

    #[test]
    fn test_frame_protocol_is_enforced() {
        let mut runtime = MockRuntime::new();
        let (_, session) = runtime.quick_session();
        assert!(runtime.begin_frame(session).is_err());
        runtime
            .begin_session(session, ViewConfigurationType::PrimaryStereo)
            .unwrap();
        runtime.wait_frame(session).unwrap();
        runtime.begin_frame(session).unwrap();
        runtime
            .end_frame(session, Time::default(), BlendMode::Opaque, &[])
            .unwrap();
        assert!(runtime
            .end_frame(session, Time::default(), BlendMode::Opaque, &[])
            .is_err());
        assert!(runtime
            .begin_session(session, ViewConfigurationType::PrimaryStereo)
            .is_err());
    }

    #[test]
    fn test_begin_over_open_frame_discards_it() {
        let mut runtime = MockRuntime::new();
        let (_, session) = runtime.quick_session();
        runtime
            .begin_session(session, ViewConfigurationType::PrimaryStereo)
            .unwrap();
        runtime.wait_frame(session).unwrap();
        runtime.begin_frame(session).unwrap();
        assert!(runtime.begin_frame(session).is_err());

        runtime.wait_frame(session).unwrap();
        runtime.begin_frame(session).unwrap();
        assert_eq!(runtime.discarded_frames(), 1);
        runtime
            .end_frame(session, Time::default(), BlendMode::Opaque, &[])
            .unwrap();
        assert_eq!(runtime.submitted_frames().len(), 1);
    }

    #[test]
    fn test_session_outlives_spaces() {
        let mut runtime = MockRuntime::new();
        let (_, session) = runtime.quick_session();
        let space = runtime
            .create_reference_space(session, ReferenceSpaceKind::Local)
            .unwrap();
        assert!(runtime.destroy_session(session).is_err());
        runtime.destroy_space(space).unwrap();
        runtime.destroy_session(session).unwrap();
        assert!(!runtime.live_session());
    }

    #[test]
    fn test_context_switch_reported_once() {
        let mut backend = MockGraphics::new();
        backend.simulate_context_switch();
        assert!(backend.reacquire_context("test"));
        assert!(!backend.reacquire_context("test"));
        assert_eq!(backend.reacquire_calls(), 2);
    }
}
