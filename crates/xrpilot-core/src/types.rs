use std::fmt;
use std::str::FromStr;

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

macro_rules! raw_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                pub const fn into_raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

raw_handle!(
    /// Runtime connection.
    InstanceHandle,
    /// Physical device selected from an instance.
    SystemId,
    /// Rendering session bound to a graphics device.
    SessionHandle,
    /// Reference space or action space.
    SpaceHandle,
    ActionSetHandle,
    ActionHandle,
    SwapchainHandle,
);

/// Runtime timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

/// Error returned when a config/CLI string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! named_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),* $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseKindError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)*
                    _ => Err(ParseKindError {
                        kind: $label,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormFactor {
    #[default]
    HeadMountedDisplay,
    HandheldDisplay,
}

named_enum!(FormFactor, "form factor", {
    HeadMountedDisplay => "head-mounted-display",
    HandheldDisplay => "handheld-display",
});

/// How rendered images are combined with the real world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Opaque,
    Additive,
    AlphaBlend,
}

named_enum!(BlendMode, "blend mode", {
    Opaque => "opaque",
    Additive => "additive",
    AlphaBlend => "alpha-blend",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewConfigurationType {
    PrimaryMono,
    #[default]
    PrimaryStereo,
}

named_enum!(ViewConfigurationType, "view configuration", {
    PrimaryMono => "primary-mono",
    PrimaryStereo => "primary-stereo",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSpaceKind {
    View,
    #[default]
    Local,
    Stage,
}

named_enum!(ReferenceSpaceKind, "reference space", {
    View => "view",
    Local => "local",
    Stage => "stage",
});

/// Session state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Boolean,
    Float,
    Vector2,
    Pose,
    Vibration,
}

named_enum!(ActionKind, "action kind", {
    Boolean => "boolean",
    Float => "float",
    Vector2 => "vector2f",
    Pose => "pose",
    Vibration => "vibration",
});

impl ActionKind {
    /// Infer the action kind from the last component of an input/output path.
    ///
    /// `/user/hand/left/input/trigger/value` is a float,
    /// `/user/hand/left/input/thumbstick` a 2-axis input and
    /// `/user/gamepad/output/haptic_left` a vibration output.
    pub fn infer(path: &str) -> Option<Self> {
        let last = path.rsplit('/').next()?;
        match last {
            "click" | "touch" => Some(Self::Boolean),
            "value" | "force" | "x" | "y" => Some(Self::Float),
            "thumbstick" | "trackpad" | "thumbstick_left" | "thumbstick_right" => {
                Some(Self::Vector2)
            }
            "pose" => Some(Self::Pose),
            _ if last.starts_with("haptic") => Some(Self::Vibration),
            _ => None,
        }
    }

    /// Whether the kind is sampled as a discrete value (reported on change).
    pub fn is_discrete(self) -> bool {
        matches!(self, Self::Boolean | Self::Float | Self::Vector2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Field of view half-angles in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// A located view (eye) for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

/// Per-view rendering descriptor advertised by the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewConfigurationView {
    pub recommended_width: u32,
    pub max_width: u32,
    pub recommended_height: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewConfigurationProperties {
    pub fov_mutable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Play-area bounds of a reference space, in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Extent2Df {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u32,
}

impl ApiVersion {
    pub const fn new(major: u16, minor: u16, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Graphics API versions the runtime can drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiVersionRange {
    pub min: ApiVersion,
    pub max: ApiVersion,
}

impl ApiVersionRange {
    /// Major/minor containment; patch levels are ignored.
    pub fn contains(&self, version: ApiVersion) -> bool {
        let key = (version.major, version.minor);
        key >= (self.min.major, self.min.minor) && key <= (self.max.major, self.max.minor)
    }
}

impl fmt::Display for ApiVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.min, self.max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeProperties {
    pub runtime_name: String,
    pub runtime_version: ApiVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemProperties {
    pub system_name: String,
    pub vendor_id: u32,
    pub max_swapchain_width: u32,
    pub max_swapchain_height: u32,
    pub max_layer_count: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

/// Typed value of one action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionValue {
    Boolean(bool),
    Float(f32),
    Vector2(Vec2),
    /// Last pose located for the action, if any frame produced a valid one.
    Pose(Option<Pose>),
    Vibration,
}

/// Vibration request for a haptic output action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticPulse {
    /// Normalised amplitude in `[0, 1]`.
    pub amplitude: f32,
    /// Duration in nanoseconds; [`HapticPulse::MIN_DURATION`] asks for the shortest pulse.
    pub duration_ns: i64,
    /// Frequency in Hz; [`HapticPulse::FREQUENCY_UNSPECIFIED`] lets the runtime choose.
    pub frequency: f32,
}

impl HapticPulse {
    pub const MIN_DURATION: i64 = -1;
    pub const FREQUENCY_UNSPECIFIED: f32 = 0.0;

    pub fn new(amplitude: f32, duration_ns: i64, frequency: f32) -> Self {
        Self {
            amplitude: amplitude.clamp(0.0, 1.0),
            duration_ns,
            frequency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_inference() {
        assert_eq!(
            ActionKind::infer("/user/hand/left/input/select/click"),
            Some(ActionKind::Boolean)
        );
        assert_eq!(
            ActionKind::infer("/user/hand/right/input/trigger/value"),
            Some(ActionKind::Float)
        );
        assert_eq!(
            ActionKind::infer("/user/hand/right/input/thumbstick/x"),
            Some(ActionKind::Float)
        );
        assert_eq!(
            ActionKind::infer("/user/hand/right/input/thumbstick"),
            Some(ActionKind::Vector2)
        );
        assert_eq!(
            ActionKind::infer("/user/hand/left/input/aim/pose"),
            Some(ActionKind::Pose)
        );
        assert_eq!(
            ActionKind::infer("/user/gamepad/output/haptic_left_trigger"),
            Some(ActionKind::Vibration)
        );
        assert_eq!(ActionKind::infer("/user/hand/left/input/grip"), None);
    }

    #[test]
    fn test_named_enum_parse() {
        assert_eq!("stage".parse::<ReferenceSpaceKind>(), Ok(ReferenceSpaceKind::Stage));
        assert_eq!("alpha-blend".parse::<BlendMode>(), Ok(BlendMode::AlphaBlend));
        let err = "floor".parse::<ReferenceSpaceKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown reference space 'floor'");
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>(), Ok(*kind));
        }
    }

    #[test]
    fn test_api_version_range_ignores_patch() {
        let range = ApiVersionRange {
            min: ApiVersion::new(4, 0, 0),
            max: ApiVersion::new(4, 6, 0),
        };
        assert!(range.contains(ApiVersion::new(4, 6, 12)));
        assert!(range.contains(ApiVersion::new(4, 0, 0)));
        assert!(!range.contains(ApiVersion::new(3, 3, 0)));
        assert!(!range.contains(ApiVersion::new(4, 7, 0)));
    }

    #[test]
    fn test_haptic_amplitude_clamped() {
        let pulse = HapticPulse::new(1.7, HapticPulse::MIN_DURATION, 0.0);
        assert_eq!(pulse.amplitude, 1.0);
        assert_eq!(HapticPulse::new(-0.5, 10, 0.0).amplitude, 0.0);
    }
}
