//! Conversions between xrpilot-core types and the openxr crate's types.

use glam::{Quat, Vec3};
use openxr as xr;

use xrpilot_core::{
    ApiVersion, BlendMode, Fov, Pose, ReferenceSpaceKind, SessionState, ViewConfigurationType,
    XrError,
};

macro_rules! known_extensions {
    ($($name:literal => $field:ident),* $(,)?) => {
        /// Extension names the openxr crate exposes as dedicated flags.
        pub const KNOWN_EXTENSIONS: &[&str] = &[$($name),*];

        /// Whether a known extension is flagged in `set`; `None` for names
        /// without a dedicated flag.
        pub fn extension_flag(set: &xr::ExtensionSet, name: &str) -> Option<bool> {
            match name {
                $($name => Some(set.$field),)*
                _ => None,
            }
        }

        /// Flag `name` in `set`, falling back to the free-form list.
        pub fn enable_extension(set: &mut xr::ExtensionSet, name: &str) {
            match name {
                $($name => set.$field = true,)*
                _ => set.other.push(name.as_bytes().to_vec()),
            }
        }
    };
}

known_extensions! {
    "XR_KHR_opengl_enable" => khr_opengl_enable,
    "XR_KHR_vulkan_enable2" => khr_vulkan_enable2,
    "XR_KHR_composition_layer_depth" => khr_composition_layer_depth,
    "XR_KHR_composition_layer_cylinder" => khr_composition_layer_cylinder,
    "XR_KHR_visibility_mask" => khr_visibility_mask,
    "XR_KHR_convert_timespec_time" => khr_convert_timespec_time,
    "XR_EXT_debug_utils" => ext_debug_utils,
    "XR_EXT_hand_tracking" => ext_hand_tracking,
    "XR_EXT_eye_gaze_interaction" => ext_eye_gaze_interaction,
    "XR_FB_display_refresh_rate" => fb_display_refresh_rate,
}

/// Names of every extension flagged in `set`.
pub fn extension_names(set: &xr::ExtensionSet) -> Vec<String> {
    KNOWN_EXTENSIONS
        .iter()
        .filter(|name| extension_flag(set, name) == Some(true))
        .map(|name| name.to_string())
        .chain(set.other.iter().map(|n| String::from_utf8_lossy(n).into_owned()))
        .collect()
}

pub fn call_failed(call: &'static str) -> impl FnOnce(xr::sys::Result) -> XrError {
    move |e| XrError::runtime(call, e.into_raw(), Some(format!("{e:?}")))
}

pub fn unknown_handle(call: &'static str, raw: u64) -> XrError {
    XrError::runtime(
        call,
        xr::sys::Result::ERROR_HANDLE_INVALID.into_raw(),
        Some(format!("unknown handle {raw:#x}")),
    )
}

pub fn version(v: xr::Version) -> ApiVersion {
    ApiVersion::new(v.major(), v.minor(), v.patch())
}

pub fn to_xr_pose(pose: Pose) -> xr::Posef {
    xr::Posef {
        orientation: xr::Quaternionf {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: xr::Vector3f {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
    }
}

pub fn from_xr_pose(pose: xr::Posef) -> Pose {
    Pose {
        position: Vec3::new(pose.position.x, pose.position.y, pose.position.z),
        orientation: Quat::from_xyzw(
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ),
    }
}

pub fn to_xr_fov(fov: Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

pub fn from_xr_fov(fov: xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

pub fn to_xr_blend_mode(mode: BlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        BlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        BlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        BlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

pub fn from_xr_blend_mode(mode: xr::EnvironmentBlendMode) -> Option<BlendMode> {
    match mode {
        xr::EnvironmentBlendMode::OPAQUE => Some(BlendMode::Opaque),
        xr::EnvironmentBlendMode::ADDITIVE => Some(BlendMode::Additive),
        xr::EnvironmentBlendMode::ALPHA_BLEND => Some(BlendMode::AlphaBlend),
        _ => None,
    }
}

pub fn to_xr_view_configuration(ty: ViewConfigurationType) -> xr::ViewConfigurationType {
    match ty {
        ViewConfigurationType::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
        ViewConfigurationType::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
    }
}

pub fn from_xr_view_configuration(ty: xr::ViewConfigurationType) -> Option<ViewConfigurationType> {
    match ty {
        xr::ViewConfigurationType::PRIMARY_MONO => Some(ViewConfigurationType::PrimaryMono),
        xr::ViewConfigurationType::PRIMARY_STEREO => Some(ViewConfigurationType::PrimaryStereo),
        _ => None,
    }
}

pub fn to_xr_reference_space(kind: ReferenceSpaceKind) -> xr::ReferenceSpaceType {
    match kind {
        ReferenceSpaceKind::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceKind::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceKind::Stage => xr::ReferenceSpaceType::STAGE,
    }
}

pub fn from_xr_reference_space(ty: xr::ReferenceSpaceType) -> Option<ReferenceSpaceKind> {
    match ty {
        xr::ReferenceSpaceType::VIEW => Some(ReferenceSpaceKind::View),
        xr::ReferenceSpaceType::LOCAL => Some(ReferenceSpaceKind::Local),
        xr::ReferenceSpaceType::STAGE => Some(ReferenceSpaceKind::Stage),
        _ => None,
    }
}

pub fn from_xr_session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}
