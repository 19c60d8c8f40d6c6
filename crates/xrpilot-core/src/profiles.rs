//! Interaction profiles and the input/output paths each one accepts.

/// A controller type with its fixed set of valid binding paths.
#[derive(Debug, Clone, Copy)]
pub struct InteractionProfile {
    pub path: &'static str,
    pub valid_paths: &'static [&'static str],
}

impl InteractionProfile {
    pub fn accepts(&self, binding_path: &str) -> bool {
        self.valid_paths.contains(&binding_path)
    }
}

macro_rules! both_hands {
    ($($suffix:literal),* $(,)?) => {
        &[
            $(concat!("/user/hand/left/", $suffix),)*
            $(concat!("/user/hand/right/", $suffix),)*
        ]
    };
}

pub const KHR_SIMPLE_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/khr/simple_controller",
    valid_paths: both_hands!(
        "input/select/click",
        "input/menu/click",
        "input/grip/pose",
        "input/aim/pose",
        "output/haptic",
    ),
};

pub const GOOGLE_DAYDREAM_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/google/daydream_controller",
    valid_paths: both_hands!(
        "input/select/click",
        "input/trackpad",
        "input/trackpad/x",
        "input/trackpad/y",
        "input/trackpad/click",
        "input/trackpad/touch",
        "input/grip/pose",
        "input/aim/pose",
    ),
};

pub const HTC_VIVE_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/htc/vive_controller",
    valid_paths: both_hands!(
        "input/system/click",
        "input/squeeze/click",
        "input/menu/click",
        "input/trigger/click",
        "input/trigger/value",
        "input/trackpad",
        "input/trackpad/x",
        "input/trackpad/y",
        "input/trackpad/click",
        "input/trackpad/touch",
        "input/grip/pose",
        "input/aim/pose",
        "output/haptic",
    ),
};

pub const HTC_VIVE_PRO: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/htc/vive_pro",
    valid_paths: &[
        "/user/head/input/system/click",
        "/user/head/input/volume_up/click",
        "/user/head/input/volume_down/click",
        "/user/head/input/mute_mic/click",
    ],
};

pub const MICROSOFT_MOTION_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/microsoft/motion_controller",
    valid_paths: both_hands!(
        "input/menu/click",
        "input/squeeze/click",
        "input/trigger/value",
        "input/thumbstick",
        "input/thumbstick/x",
        "input/thumbstick/y",
        "input/thumbstick/click",
        "input/trackpad",
        "input/trackpad/x",
        "input/trackpad/y",
        "input/trackpad/click",
        "input/trackpad/touch",
        "input/grip/pose",
        "input/aim/pose",
        "output/haptic",
    ),
};

pub const MICROSOFT_XBOX_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/microsoft/xbox_controller",
    valid_paths: &[
        "/user/gamepad/input/menu/click",
        "/user/gamepad/input/view/click",
        "/user/gamepad/input/a/click",
        "/user/gamepad/input/b/click",
        "/user/gamepad/input/x/click",
        "/user/gamepad/input/y/click",
        "/user/gamepad/input/dpad_down/click",
        "/user/gamepad/input/dpad_right/click",
        "/user/gamepad/input/dpad_up/click",
        "/user/gamepad/input/dpad_left/click",
        "/user/gamepad/input/shoulder_left/click",
        "/user/gamepad/input/shoulder_right/click",
        "/user/gamepad/input/thumbstick_left/click",
        "/user/gamepad/input/thumbstick_right/click",
        "/user/gamepad/input/trigger_left/value",
        "/user/gamepad/input/trigger_right/value",
        "/user/gamepad/input/thumbstick_left",
        "/user/gamepad/input/thumbstick_left/x",
        "/user/gamepad/input/thumbstick_left/y",
        "/user/gamepad/input/thumbstick_right",
        "/user/gamepad/input/thumbstick_right/x",
        "/user/gamepad/input/thumbstick_right/y",
        "/user/gamepad/output/haptic_left",
        "/user/gamepad/output/haptic_right",
        "/user/gamepad/output/haptic_left_trigger",
        "/user/gamepad/output/haptic_right_trigger",
    ],
};

pub const OCULUS_GO_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/oculus/go_controller",
    valid_paths: both_hands!(
        "input/system/click",
        "input/trigger/click",
        "input/back/click",
        "input/trackpad",
        "input/trackpad/x",
        "input/trackpad/y",
        "input/trackpad/click",
        "input/trackpad/touch",
        "input/grip/pose",
        "input/aim/pose",
    ),
};

pub const OCULUS_TOUCH_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/oculus/touch_controller",
    valid_paths: &[
        "/user/hand/left/input/squeeze/value",
        "/user/hand/left/input/trigger/value",
        "/user/hand/left/input/trigger/touch",
        "/user/hand/left/input/thumbstick",
        "/user/hand/left/input/thumbstick/x",
        "/user/hand/left/input/thumbstick/y",
        "/user/hand/left/input/thumbstick/click",
        "/user/hand/left/input/thumbstick/touch",
        "/user/hand/left/input/thumbrest/touch",
        "/user/hand/left/input/grip/pose",
        "/user/hand/left/input/aim/pose",
        "/user/hand/left/output/haptic",
        "/user/hand/left/input/x/click",
        "/user/hand/left/input/x/touch",
        "/user/hand/left/input/y/click",
        "/user/hand/left/input/y/touch",
        "/user/hand/left/input/menu/click",
        "/user/hand/right/input/squeeze/value",
        "/user/hand/right/input/trigger/value",
        "/user/hand/right/input/trigger/touch",
        "/user/hand/right/input/thumbstick",
        "/user/hand/right/input/thumbstick/x",
        "/user/hand/right/input/thumbstick/y",
        "/user/hand/right/input/thumbstick/click",
        "/user/hand/right/input/thumbstick/touch",
        "/user/hand/right/input/thumbrest/touch",
        "/user/hand/right/input/grip/pose",
        "/user/hand/right/input/aim/pose",
        "/user/hand/right/output/haptic",
        "/user/hand/right/input/a/click",
        "/user/hand/right/input/a/touch",
        "/user/hand/right/input/b/click",
        "/user/hand/right/input/b/touch",
        "/user/hand/right/input/system/click",
    ],
};

pub const VALVE_INDEX_CONTROLLER: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/valve/index_controller",
    valid_paths: both_hands!(
        "input/system/click",
        "input/system/touch",
        "input/a/click",
        "input/a/touch",
        "input/b/click",
        "input/b/touch",
        "input/squeeze/value",
        "input/squeeze/force",
        "input/trigger/click",
        "input/trigger/value",
        "input/trigger/touch",
        "input/thumbstick",
        "input/thumbstick/x",
        "input/thumbstick/y",
        "input/thumbstick/click",
        "input/thumbstick/touch",
        "input/trackpad",
        "input/trackpad/x",
        "input/trackpad/y",
        "input/trackpad/force",
        "input/trackpad/touch",
        "input/grip/pose",
        "input/aim/pose",
        "output/haptic",
    ),
};

/// Known profiles, in the order bindings are suggested.
pub const PROFILES: &[InteractionProfile] = &[
    KHR_SIMPLE_CONTROLLER,
    GOOGLE_DAYDREAM_CONTROLLER,
    HTC_VIVE_CONTROLLER,
    HTC_VIVE_PRO,
    MICROSOFT_MOTION_CONTROLLER,
    MICROSOFT_XBOX_CONTROLLER,
    OCULUS_GO_CONTROLLER,
    OCULUS_TOUCH_CONTROLLER,
    VALVE_INDEX_CONTROLLER,
];

pub fn find(profile_path: &str) -> Option<&'static InteractionProfile> {
    PROFILES.iter().find(|profile| profile.path == profile_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionKind;

    #[test]
    fn test_both_hands_expands_left_then_right() {
        assert_eq!(
            KHR_SIMPLE_CONTROLLER.valid_paths[0],
            "/user/hand/left/input/select/click"
        );
        assert_eq!(
            KHR_SIMPLE_CONTROLLER.valid_paths[5],
            "/user/hand/right/input/select/click"
        );
        assert_eq!(KHR_SIMPLE_CONTROLLER.valid_paths.len(), 10);
    }

    #[test]
    fn test_accepts() {
        assert!(OCULUS_TOUCH_CONTROLLER.accepts("/user/hand/left/input/x/click"));
        assert!(!OCULUS_TOUCH_CONTROLLER.accepts("/user/hand/right/input/x/click"));
        assert!(HTC_VIVE_PRO.accepts("/user/head/input/mute_mic/click"));
        assert!(!HTC_VIVE_PRO.accepts("/user/hand/left/input/select/click"));
    }

    #[test]
    fn test_find_profile() {
        let profile = find("/interaction_profiles/valve/index_controller").unwrap();
        assert!(profile.accepts("/user/hand/right/input/trackpad/force"));
        assert!(find("/interaction_profiles/unknown").is_none());
    }

    #[test]
    fn test_every_valid_path_has_an_inferable_kind() {
        for profile in PROFILES {
            for path in profile.valid_paths {
                assert!(
                    ActionKind::infer(path).is_some(),
                    "{} has no inferable kind in {}",
                    path,
                    profile.path
                );
            }
        }
    }
}
