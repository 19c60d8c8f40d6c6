//! OpenXR implementation of the xrpilot runtime boundary, plus the OpenGL
//! graphics backend used with it on Linux.

mod convert;
#[cfg(target_os = "linux")]
mod linux;

use std::collections::HashMap;

use log::{debug, info, warn};
use openxr as xr;
use xr::sys::Handle as _;

use xrpilot_core::runtime::{
    CompositionLayer, FrameTiming, InstanceCreateInfo, LocatedViews, RuntimeActionState,
    RuntimeEvent, SpaceLocation, SuggestedBinding, SwapchainCreateInfo, XrRuntime,
};
use xrpilot_core::{
    ActionHandle, ActionKind, ActionSetHandle, ActionValue, ApiVersionRange, BlendMode,
    Extent2Df, FormFactor, HapticPulse, InstanceHandle, ReferenceSpaceKind, RuntimeProperties,
    SessionHandle, SpaceHandle, SwapchainHandle, SystemId, SystemProperties, Time, View,
    ViewConfigurationProperties, ViewConfigurationType, ViewConfigurationView, XrError, XrResult,
};

use crate::convert::*;

#[cfg(target_os = "linux")]
pub use linux::GlxBackend;

const APPLICATION_VERSION: u32 = 1;
const ENGINE_VERSION: u32 = 1;
const ACTION_SET_PRIORITY: u32 = 0;

struct SessionEntry {
    session: xr::Session<xr::OpenGL>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<xr::OpenGL>,
}

enum TypedAction {
    Boolean(xr::Action<bool>),
    Float(xr::Action<f32>),
    Vector2(xr::Action<xr::Vector2f>),
    Pose(xr::Action<xr::Posef>),
    Vibration(xr::Action<xr::Haptic>),
}

struct ActionEntry {
    set: u64,
    action: TypedAction,
}

/// [`XrRuntime`] backed by the system OpenXR loader, bound to OpenGL.
///
/// Runtime objects are owned here and handed out as opaque handles; dropping
/// an entry destroys the underlying OpenXR object.
pub struct OpenXrRuntime {
    entry: xr::Entry,
    instance: Option<(InstanceHandle, xr::Instance)>,
    sessions: HashMap<u64, SessionEntry>,
    spaces: HashMap<u64, xr::Space>,
    swapchains: HashMap<u64, xr::Swapchain<xr::OpenGL>>,
    action_sets: HashMap<u64, xr::ActionSet>,
    actions: HashMap<u64, ActionEntry>,
    event_buffer: xr::EventDataBuffer,
    next_handle: u64,
}

impl OpenXrRuntime {
    /// Load the OpenXR loader from the system library path.
    pub fn load() -> XrResult<Self> {
        let entry = unsafe { xr::Entry::load() }.map_err(|e| {
            XrError::runtime(
                "xrGetInstanceProcAddr",
                xr::sys::Result::ERROR_RUNTIME_UNAVAILABLE.into_raw(),
                Some(format!("OpenXR loader: {e}")),
            )
        })?;
        Ok(Self::from_entry(entry))
    }

    pub fn from_entry(entry: xr::Entry) -> Self {
        Self {
            entry,
            instance: None,
            sessions: HashMap::new(),
            spaces: HashMap::new(),
            swapchains: HashMap::new(),
            action_sets: HashMap::new(),
            actions: HashMap::new(),
            event_buffer: xr::EventDataBuffer::new(),
            next_handle: 1,
        }
    }

    fn issue_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn instance(&self, call: &'static str, handle: InstanceHandle) -> XrResult<&xr::Instance> {
        match &self.instance {
            Some((current, instance)) if *current == handle => Ok(instance),
            _ => Err(unknown_handle(call, handle.into_raw())),
        }
    }

    fn session(&self, call: &'static str, handle: SessionHandle) -> XrResult<&SessionEntry> {
        self.sessions
            .get(&handle.into_raw())
            .ok_or_else(|| unknown_handle(call, handle.into_raw()))
    }

    fn session_mut(
        &mut self,
        call: &'static str,
        handle: SessionHandle,
    ) -> XrResult<&mut SessionEntry> {
        self.sessions
            .get_mut(&handle.into_raw())
            .ok_or_else(|| unknown_handle(call, handle.into_raw()))
    }

    fn space(&self, call: &'static str, handle: SpaceHandle) -> XrResult<&xr::Space> {
        self.spaces
            .get(&handle.into_raw())
            .ok_or_else(|| unknown_handle(call, handle.into_raw()))
    }

    fn swapchain_mut(
        &mut self,
        call: &'static str,
        handle: SwapchainHandle,
    ) -> XrResult<&mut xr::Swapchain<xr::OpenGL>> {
        self.swapchains
            .get_mut(&handle.into_raw())
            .ok_or_else(|| unknown_handle(call, handle.into_raw()))
    }

    fn action(&self, call: &'static str, handle: ActionHandle) -> XrResult<&TypedAction> {
        self.actions
            .get(&handle.into_raw())
            .map(|entry| &entry.action)
            .ok_or_else(|| unknown_handle(call, handle.into_raw()))
    }

    fn session_event_handle(raw: xr::sys::Session) -> Option<SessionHandle> {
        let raw = raw.into_raw();
        (raw != 0).then(|| SessionHandle::from_raw(raw))
    }
}

impl XrRuntime for OpenXrRuntime {
    type Binding = xr::opengl::SessionCreateInfo;
    type Image = u32;

    fn enumerate_layers(&mut self) -> XrResult<Vec<String>> {
        let layers = self
            .entry
            .enumerate_layers()
            .map_err(call_failed("xrEnumerateApiLayerProperties"))?;
        Ok(layers.into_iter().map(|layer| layer.layer_name).collect())
    }

    fn enumerate_extensions(&mut self) -> XrResult<Vec<String>> {
        let available = self
            .entry
            .enumerate_extensions()
            .map_err(call_failed("xrEnumerateInstanceExtensionProperties"))?;
        Ok(extension_names(&available))
    }

    fn create_instance(&mut self, info: &InstanceCreateInfo<'_>) -> XrResult<InstanceHandle> {
        if self.instance.is_some() {
            return Err(XrError::InvalidState("an OpenXR instance already exists"));
        }
        let mut extensions = xr::ExtensionSet::default();
        for name in info.extensions {
            enable_extension(&mut extensions, name);
        }
        let layers: Vec<&str> = info.layers.iter().map(String::as_str).collect();
        let app_info = xr::ApplicationInfo {
            application_name: info.application_name,
            application_version: APPLICATION_VERSION,
            engine_name: info.engine_name,
            engine_version: ENGINE_VERSION,
            api_version: xr::Version::new(1, 0, 0),
        };
        let instance = self
            .entry
            .create_instance(&app_info, &extensions, &layers)
            .map_err(call_failed("xrCreateInstance"))?;
        let handle = InstanceHandle::from_raw(self.issue_handle());
        self.instance = Some((handle, instance));
        Ok(handle)
    }

    fn instance_properties(&mut self, instance: InstanceHandle) -> XrResult<RuntimeProperties> {
        let props = self
            .instance("xrGetInstanceProperties", instance)?
            .properties()
            .map_err(call_failed("xrGetInstanceProperties"))?;
        Ok(RuntimeProperties {
            runtime_name: props.runtime_name,
            runtime_version: version(props.runtime_version),
        })
    }

    fn get_system(
        &mut self,
        instance: InstanceHandle,
        form_factor: FormFactor,
    ) -> XrResult<SystemId> {
        let form_factor = match form_factor {
            FormFactor::HeadMountedDisplay => xr::FormFactor::HEAD_MOUNTED_DISPLAY,
            FormFactor::HandheldDisplay => xr::FormFactor::HANDHELD_DISPLAY,
        };
        let system = self
            .instance("xrGetSystem", instance)?
            .system(form_factor)
            .map_err(call_failed("xrGetSystem"))?;
        Ok(SystemId::from_raw(system.into_raw()))
    }

    fn system_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<SystemProperties> {
        let props = self
            .instance("xrGetSystemProperties", instance)?
            .system_properties(xr::SystemId::from_raw(system.into_raw()))
            .map_err(call_failed("xrGetSystemProperties"))?;
        Ok(SystemProperties {
            system_name: props.system_name,
            vendor_id: props.vendor_id,
            max_swapchain_width: props.graphics_properties.max_swapchain_image_width,
            max_swapchain_height: props.graphics_properties.max_swapchain_image_height,
            max_layer_count: props.graphics_properties.max_layer_count,
            orientation_tracking: props.tracking_properties.orientation_tracking,
            position_tracking: props.tracking_properties.position_tracking,
        })
    }

    fn enumerate_view_configurations(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<Vec<ViewConfigurationType>> {
        let types = self
            .instance("xrEnumerateViewConfigurations", instance)?
            .enumerate_view_configurations(xr::SystemId::from_raw(system.into_raw()))
            .map_err(call_failed("xrEnumerateViewConfigurations"))?;
        Ok(types
            .into_iter()
            .filter_map(from_xr_view_configuration)
            .collect())
    }

    fn view_configuration_properties(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> XrResult<ViewConfigurationProperties> {
        let props = self
            .instance("xrGetViewConfigurationProperties", instance)?
            .view_configuration_properties(
                xr::SystemId::from_raw(system.into_raw()),
                to_xr_view_configuration(ty),
            )
            .map_err(call_failed("xrGetViewConfigurationProperties"))?;
        Ok(ViewConfigurationProperties {
            fov_mutable: props.fov_mutable,
        })
    }

    fn enumerate_view_configuration_views(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>> {
        let views = self
            .instance("xrEnumerateViewConfigurationViews", instance)?
            .enumerate_view_configuration_views(
                xr::SystemId::from_raw(system.into_raw()),
                to_xr_view_configuration(ty),
            )
            .map_err(call_failed("xrEnumerateViewConfigurationViews"))?;
        Ok(views
            .into_iter()
            .map(|view| ViewConfigurationView {
                recommended_width: view.recommended_image_rect_width,
                max_width: view.max_image_rect_width,
                recommended_height: view.recommended_image_rect_height,
                max_height: view.max_image_rect_height,
                recommended_sample_count: view.recommended_swapchain_sample_count,
                max_sample_count: view.max_swapchain_sample_count,
            })
            .collect())
    }

    fn enumerate_blend_modes(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> XrResult<Vec<BlendMode>> {
        let modes = self
            .instance("xrEnumerateEnvironmentBlendModes", instance)?
            .enumerate_environment_blend_modes(
                xr::SystemId::from_raw(system.into_raw()),
                to_xr_view_configuration(ty),
            )
            .map_err(call_failed("xrEnumerateEnvironmentBlendModes"))?;
        Ok(modes.into_iter().filter_map(from_xr_blend_mode).collect())
    }

    fn graphics_requirements(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<ApiVersionRange> {
        let reqs = self
            .instance("xrGetOpenGLGraphicsRequirementsKHR", instance)?
            .graphics_requirements::<xr::OpenGL>(xr::SystemId::from_raw(system.into_raw()))
            .map_err(call_failed("xrGetOpenGLGraphicsRequirementsKHR"))?;
        Ok(ApiVersionRange {
            min: version(reqs.min_api_version_supported),
            max: version(reqs.max_api_version_supported),
        })
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) -> XrResult<()> {
        self.instance("xrDestroyInstance", instance)?;
        if !self.sessions.is_empty() || !self.action_sets.is_empty() {
            warn!("destroying OpenXR instance with live child objects");
        }
        self.instance = None;
        Ok(())
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &Self::Binding,
    ) -> XrResult<SessionHandle> {
        let xr_instance = self.instance("xrCreateSession", instance)?;
        // The binding describes a context owned by the graphics backend,
        // which outlives every session created from it.
        let (session, waiter, stream) = unsafe {
            xr_instance
                .create_session::<xr::OpenGL>(xr::SystemId::from_raw(system.into_raw()), binding)
                .map_err(call_failed("xrCreateSession"))?
        };
        let raw = session.as_raw().into_raw();
        info!("OpenXR session created ({raw:#x})");
        self.sessions.insert(
            raw,
            SessionEntry {
                session,
                waiter,
                stream,
            },
        );
        Ok(SessionHandle::from_raw(raw))
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        ty: ViewConfigurationType,
    ) -> XrResult<()> {
        self.session("xrBeginSession", session)?
            .session
            .begin(to_xr_view_configuration(ty))
            .map_err(call_failed("xrBeginSession"))?;
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> XrResult<()> {
        self.session("xrEndSession", session)?
            .session
            .end()
            .map_err(call_failed("xrEndSession"))?;
        Ok(())
    }

    fn destroy_session(&mut self, session: SessionHandle) -> XrResult<()> {
        self.sessions
            .remove(&session.into_raw())
            .map(drop)
            .ok_or_else(|| unknown_handle("xrDestroySession", session.into_raw()))
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> XrResult<Option<RuntimeEvent>> {
        let xr_instance = match &self.instance {
            Some((current, xr_instance)) if *current == instance => xr_instance,
            _ => return Err(unknown_handle("xrPollEvent", instance.into_raw())),
        };
        let Some(event) = xr_instance
            .poll_event(&mut self.event_buffer)
            .map_err(call_failed("xrPollEvent"))?
        else {
            return Ok(None);
        };
        let event = match event {
            xr::Event::SessionStateChanged(e) => RuntimeEvent::SessionStateChanged {
                session: Self::session_event_handle(e.session()),
                state: from_xr_session_state(e.state()),
                time: Time::from_nanos(e.time().as_nanos()),
            },
            xr::Event::EventsLost(e) => RuntimeEvent::EventsLost {
                count: e.lost_event_count(),
            },
            xr::Event::InstanceLossPending(e) => RuntimeEvent::InstanceLossPending {
                loss_time: Time::from_nanos(e.loss_time().as_nanos()),
            },
            xr::Event::InteractionProfileChanged(e) => RuntimeEvent::InteractionProfileChanged {
                session: Self::session_event_handle(e.session()),
            },
            xr::Event::ReferenceSpaceChangePending(e) => {
                RuntimeEvent::ReferenceSpaceChangePending {
                    session: Self::session_event_handle(e.session()),
                    kind: from_xr_reference_space(e.reference_space_type()),
                }
            }
            _ => RuntimeEvent::Other,
        };
        Ok(Some(event))
    }

    fn enumerate_reference_spaces(
        &mut self,
        session: SessionHandle,
    ) -> XrResult<Vec<ReferenceSpaceKind>> {
        let types = self
            .session("xrEnumerateReferenceSpaces", session)?
            .session
            .enumerate_reference_spaces()
            .map_err(call_failed("xrEnumerateReferenceSpaces"))?;
        Ok(types.into_iter().filter_map(from_xr_reference_space).collect())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> XrResult<SpaceHandle> {
        let space = self
            .session("xrCreateReferenceSpace", session)?
            .session
            .create_reference_space(to_xr_reference_space(kind), xr::Posef::IDENTITY)
            .map_err(call_failed("xrCreateReferenceSpace"))?;
        let handle = self.issue_handle();
        self.spaces.insert(handle, space);
        Ok(SpaceHandle::from_raw(handle))
    }

    fn reference_space_bounds(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> XrResult<Option<Extent2Df>> {
        let bounds = self
            .session("xrGetReferenceSpaceBoundsRect", session)?
            .session
            .reference_space_bounds_rect(to_xr_reference_space(kind))
            .map_err(call_failed("xrGetReferenceSpaceBoundsRect"))?;
        Ok(bounds.map(|extent| Extent2Df {
            width: extent.width,
            height: extent.height,
        }))
    }

    fn locate_space(
        &mut self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: Time,
    ) -> XrResult<SpaceLocation> {
        let location = self
            .space("xrLocateSpace", space)?
            .locate(
                self.space("xrLocateSpace", base)?,
                xr::Time::from_nanos(time.as_nanos()),
            )
            .map_err(call_failed("xrLocateSpace"))?;
        let flags = location.location_flags;
        Ok(SpaceLocation {
            pose: from_xr_pose(location.pose),
            position_valid: flags.contains(xr::SpaceLocationFlags::POSITION_VALID),
            orientation_valid: flags.contains(xr::SpaceLocationFlags::ORIENTATION_VALID),
        })
    }

    fn destroy_space(&mut self, space: SpaceHandle) -> XrResult<()> {
        self.spaces
            .remove(&space.into_raw())
            .map(drop)
            .ok_or_else(|| unknown_handle("xrDestroySpace", space.into_raw()))
    }

    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
    ) -> XrResult<ActionSetHandle> {
        let set = self
            .instance("xrCreateActionSet", instance)?
            .create_action_set(name, localized_name, ACTION_SET_PRIORITY)
            .map_err(call_failed("xrCreateActionSet"))?;
        let handle = self.issue_handle();
        self.action_sets.insert(handle, set);
        Ok(ActionSetHandle::from_raw(handle))
    }

    fn create_action(
        &mut self,
        set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        kind: ActionKind,
    ) -> XrResult<ActionHandle> {
        let action_set = self
            .action_sets
            .get(&set.into_raw())
            .ok_or_else(|| unknown_handle("xrCreateAction", set.into_raw()))?;
        let failed = call_failed("xrCreateAction");
        let action = match kind {
            ActionKind::Boolean => action_set
                .create_action(name, localized_name, &[])
                .map(TypedAction::Boolean),
            ActionKind::Float => action_set
                .create_action(name, localized_name, &[])
                .map(TypedAction::Float),
            ActionKind::Vector2 => action_set
                .create_action(name, localized_name, &[])
                .map(TypedAction::Vector2),
            ActionKind::Pose => action_set
                .create_action(name, localized_name, &[])
                .map(TypedAction::Pose),
            ActionKind::Vibration => action_set
                .create_action(name, localized_name, &[])
                .map(TypedAction::Vibration),
        }
        .map_err(failed)?;
        let handle = self.issue_handle();
        self.actions.insert(
            handle,
            ActionEntry {
                set: set.into_raw(),
                action,
            },
        );
        Ok(ActionHandle::from_raw(handle))
    }

    fn suggest_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: &str,
        bindings: &[SuggestedBinding],
    ) -> XrResult<()> {
        let xr_instance = self.instance("xrSuggestInteractionProfileBindings", instance)?;
        let profile_path = xr_instance
            .string_to_path(profile)
            .map_err(call_failed("xrStringToPath"))?;
        let mut xr_bindings = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let path = xr_instance
                .string_to_path(&binding.path)
                .map_err(call_failed("xrStringToPath"))?;
            let xr_binding = match self.action("xrSuggestInteractionProfileBindings", binding.action)? {
                TypedAction::Boolean(action) => xr::Binding::new(action, path),
                TypedAction::Float(action) => xr::Binding::new(action, path),
                TypedAction::Vector2(action) => xr::Binding::new(action, path),
                TypedAction::Pose(action) => xr::Binding::new(action, path),
                TypedAction::Vibration(action) => xr::Binding::new(action, path),
            };
            xr_bindings.push(xr_binding);
        }
        xr_instance
            .suggest_interaction_profile_bindings(profile_path, &xr_bindings)
            .map_err(call_failed("xrSuggestInteractionProfileBindings"))
    }

    fn attach_action_set(&mut self, session: SessionHandle, set: ActionSetHandle) -> XrResult<()> {
        let action_set = self
            .action_sets
            .get(&set.into_raw())
            .ok_or_else(|| unknown_handle("xrAttachSessionActionSets", set.into_raw()))?;
        self.session("xrAttachSessionActionSets", session)?
            .session
            .attach_action_sets(&[action_set])
            .map_err(call_failed("xrAttachSessionActionSets"))
    }

    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> XrResult<SpaceHandle> {
        let xr_session = self.session("xrCreateActionSpace", session)?.session.clone();
        let TypedAction::Pose(pose_action) = self.action("xrCreateActionSpace", action)? else {
            return Err(XrError::runtime(
                "xrCreateActionSpace",
                xr::sys::Result::ERROR_ACTION_TYPE_MISMATCH.into_raw(),
                None,
            ));
        };
        let space = pose_action
            .create_space(&xr_session, xr::Path::NULL, xr::Posef::IDENTITY)
            .map_err(call_failed("xrCreateActionSpace"))?;
        let handle = self.issue_handle();
        self.spaces.insert(handle, space);
        Ok(SpaceHandle::from_raw(handle))
    }

    fn sync_actions(&mut self, session: SessionHandle, set: ActionSetHandle) -> XrResult<()> {
        let action_set = self
            .action_sets
            .get(&set.into_raw())
            .ok_or_else(|| unknown_handle("xrSyncActions", set.into_raw()))?;
        self.session("xrSyncActions", session)?
            .session
            .sync_actions(&[xr::ActiveActionSet::new(action_set)])
            .map_err(call_failed("xrSyncActions"))
    }

    fn action_state(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        kind: ActionKind,
    ) -> XrResult<RuntimeActionState> {
        let xr_session = &self.session("xrGetActionState", session)?.session;
        let state = match (self.action("xrGetActionState", action)?, kind) {
            (TypedAction::Boolean(action), ActionKind::Boolean) => {
                let state = action
                    .state(xr_session, xr::Path::NULL)
                    .map_err(call_failed("xrGetActionStateBoolean"))?;
                RuntimeActionState {
                    is_active: state.is_active,
                    changed_since_last_sync: state.changed_since_last_sync,
                    value: ActionValue::Boolean(state.current_state),
                }
            }
            (TypedAction::Float(action), ActionKind::Float) => {
                let state = action
                    .state(xr_session, xr::Path::NULL)
                    .map_err(call_failed("xrGetActionStateFloat"))?;
                RuntimeActionState {
                    is_active: state.is_active,
                    changed_since_last_sync: state.changed_since_last_sync,
                    value: ActionValue::Float(state.current_state),
                }
            }
            (TypedAction::Vector2(action), ActionKind::Vector2) => {
                let state = action
                    .state(xr_session, xr::Path::NULL)
                    .map_err(call_failed("xrGetActionStateVector2f"))?;
                RuntimeActionState {
                    is_active: state.is_active,
                    changed_since_last_sync: state.changed_since_last_sync,
                    value: ActionValue::Vector2(glam::Vec2::new(
                        state.current_state.x,
                        state.current_state.y,
                    )),
                }
            }
            (TypedAction::Pose(action), ActionKind::Pose) => RuntimeActionState {
                is_active: action
                    .is_active(xr_session, xr::Path::NULL)
                    .map_err(call_failed("xrGetActionStatePose"))?,
                changed_since_last_sync: false,
                value: ActionValue::Pose(None),
            },
            (TypedAction::Vibration(_), ActionKind::Vibration) => RuntimeActionState {
                is_active: false,
                changed_since_last_sync: false,
                value: ActionValue::Vibration,
            },
            _ => {
                return Err(XrError::runtime(
                    "xrGetActionState",
                    xr::sys::Result::ERROR_ACTION_TYPE_MISMATCH.into_raw(),
                    Some(format!("action is not of kind {kind}")),
                ))
            }
        };
        Ok(state)
    }

    fn apply_haptic_feedback(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
        pulse: &HapticPulse,
    ) -> XrResult<()> {
        let xr_session = &self.session("xrApplyHapticFeedback", session)?.session;
        let TypedAction::Vibration(haptic) = self.action("xrApplyHapticFeedback", action)? else {
            return Err(XrError::runtime(
                "xrApplyHapticFeedback",
                xr::sys::Result::ERROR_ACTION_TYPE_MISMATCH.into_raw(),
                None,
            ));
        };
        let vibration = xr::HapticVibration::new()
            .amplitude(pulse.amplitude)
            .duration(xr::Duration::from_nanos(pulse.duration_ns))
            .frequency(pulse.frequency);
        haptic
            .apply_feedback(xr_session, xr::Path::NULL, &vibration)
            .map_err(call_failed("xrApplyHapticFeedback"))
    }

    fn stop_haptic_feedback(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> XrResult<()> {
        let xr_session = &self.session("xrStopHapticFeedback", session)?.session;
        let TypedAction::Vibration(haptic) = self.action("xrStopHapticFeedback", action)? else {
            return Err(XrError::runtime(
                "xrStopHapticFeedback",
                xr::sys::Result::ERROR_ACTION_TYPE_MISMATCH.into_raw(),
                None,
            ));
        };
        haptic
            .stop_feedback(xr_session, xr::Path::NULL)
            .map_err(call_failed("xrStopHapticFeedback"))
    }

    fn destroy_action_set(&mut self, set: ActionSetHandle) -> XrResult<()> {
        let raw = set.into_raw();
        if !self.action_sets.contains_key(&raw) {
            return Err(unknown_handle("xrDestroyActionSet", raw));
        }
        // Actions go first; destroying the set invalidates them.
        self.actions.retain(|_, entry| entry.set != raw);
        self.action_sets.remove(&raw);
        Ok(())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> XrResult<FrameTiming> {
        let state = self
            .session_mut("xrWaitFrame", session)?
            .waiter
            .wait()
            .map_err(call_failed("xrWaitFrame"))?;
        Ok(FrameTiming {
            predicted_display_time: Time::from_nanos(state.predicted_display_time.as_nanos()),
            predicted_display_period_ns: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> XrResult<()> {
        let status = self
            .session_mut("xrBeginFrame", session)?
            .stream
            .begin()
            .map_err(call_failed("xrBeginFrame"))?;
        if status == xr::sys::Result::FRAME_DISCARDED {
            debug!("xrBeginFrame discarded the previous frame");
        }
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: SessionHandle,
        ty: ViewConfigurationType,
        time: Time,
        space: SpaceHandle,
    ) -> XrResult<LocatedViews> {
        let (flags, views) = self
            .session("xrLocateViews", session)?
            .session
            .locate_views(
                to_xr_view_configuration(ty),
                xr::Time::from_nanos(time.as_nanos()),
                self.space("xrLocateViews", space)?,
            )
            .map_err(call_failed("xrLocateViews"))?;
        Ok(LocatedViews {
            views: views
                .into_iter()
                .map(|view| View {
                    pose: from_xr_pose(view.pose),
                    fov: from_xr_fov(view.fov),
                })
                .collect(),
            position_valid: flags.contains(xr::ViewStateFlags::POSITION_VALID),
            orientation_valid: flags.contains(xr::ViewStateFlags::ORIENTATION_VALID),
        })
    }

    fn end_frame(
        &mut self,
        session: SessionHandle,
        display_time: Time,
        blend_mode: BlendMode,
        layers: &[CompositionLayer],
    ) -> XrResult<()> {
        let mut layer_views = Vec::with_capacity(layers.len());
        for layer in layers {
            let mut views = Vec::with_capacity(layer.views.len());
            for view in &layer.views {
                let swapchain = self
                    .swapchains
                    .get(&view.swapchain.into_raw())
                    .ok_or_else(|| unknown_handle("xrEndFrame", view.swapchain.into_raw()))?;
                let rect = view.image_rect;
                views.push(
                    xr::CompositionLayerProjectionView::new()
                        .pose(to_xr_pose(view.pose))
                        .fov(to_xr_fov(view.fov))
                        .sub_image(
                            xr::SwapchainSubImage::new()
                                .swapchain(swapchain)
                                .image_rect(xr::Rect2Di {
                                    offset: xr::Offset2Di {
                                        x: rect.x,
                                        y: rect.y,
                                    },
                                    extent: xr::Extent2Di {
                                        width: rect.width,
                                        height: rect.height,
                                    },
                                })
                                .image_array_index(view.image_array_index),
                        ),
                );
            }
            let space = self
                .spaces
                .get(&layer.space.into_raw())
                .ok_or_else(|| unknown_handle("xrEndFrame", layer.space.into_raw()))?;
            layer_views.push((space, views));
        }
        let projections: Vec<xr::CompositionLayerProjection<'_, xr::OpenGL>> = layer_views
            .iter()
            .map(|(space, views)| {
                xr::CompositionLayerProjection::new()
                    .space(space)
                    .views(views)
            })
            .collect();
        let bases: Vec<&xr::CompositionLayerBase<'_, xr::OpenGL>> =
            projections.iter().map(|layer| &**layer).collect();

        let entry = self
            .sessions
            .get_mut(&session.into_raw())
            .ok_or_else(|| unknown_handle("xrEndFrame", session.into_raw()))?;
        entry
            .stream
            .end(
                xr::Time::from_nanos(display_time.as_nanos()),
                to_xr_blend_mode(blend_mode),
                &bases,
            )
            .map_err(call_failed("xrEndFrame"))
    }

    fn enumerate_swapchain_formats(&mut self, session: SessionHandle) -> XrResult<Vec<u32>> {
        self.session("xrEnumerateSwapchainFormats", session)?
            .session
            .enumerate_swapchain_formats()
            .map_err(call_failed("xrEnumerateSwapchainFormats"))
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle> {
        let create_info = xr::SwapchainCreateInfo::<xr::OpenGL> {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                | xr::SwapchainUsageFlags::SAMPLED,
            format: info.format,
            sample_count: info.sample_count,
            width: info.width,
            height: info.height,
            face_count: info.face_count,
            array_size: info.array_size,
            mip_count: info.mip_count,
        };
        let swapchain = self
            .session("xrCreateSwapchain", session)?
            .session
            .create_swapchain(&create_info)
            .map_err(call_failed("xrCreateSwapchain"))?;
        let handle = self.issue_handle();
        debug!(
            "swapchain {handle} created: {}x{} format {:#x}",
            info.width, info.height, info.format
        );
        self.swapchains.insert(handle, swapchain);
        Ok(SwapchainHandle::from_raw(handle))
    }

    fn enumerate_swapchain_images(&mut self, swapchain: SwapchainHandle) -> XrResult<Vec<u32>> {
        self.swapchain_mut("xrEnumerateSwapchainImages", swapchain)?
            .enumerate_images()
            .map_err(call_failed("xrEnumerateSwapchainImages"))
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<u32> {
        self.swapchain_mut("xrAcquireSwapchainImage", swapchain)?
            .acquire_image()
            .map_err(call_failed("xrAcquireSwapchainImage"))
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout_ns: i64,
    ) -> XrResult<()> {
        self.swapchain_mut("xrWaitSwapchainImage", swapchain)?
            .wait_image(xr::Duration::from_nanos(timeout_ns))
            .map_err(call_failed("xrWaitSwapchainImage"))
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        self.swapchain_mut("xrReleaseSwapchainImage", swapchain)?
            .release_image()
            .map_err(call_failed("xrReleaseSwapchainImage"))
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) -> XrResult<()> {
        self.swapchains
            .remove(&swapchain.into_raw())
            .map(drop)
            .ok_or_else(|| unknown_handle("xrDestroySwapchain", swapchain.into_raw()))
    }
}
