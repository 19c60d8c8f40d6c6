//! Action registration, interaction-profile binding and per-frame input
//! snapshots.
//!
//! All actions live in one ordered registry tagged by [`ActionKind`]. The
//! runtime name of each action is derived from its kind and its ordinal among
//! actions of that kind (`action_boolean_0`, `action_pose_1`, ...).

use tracing::{debug, info, warn};

use crate::profiles::PROFILES;
use crate::runtime::{SuggestedBinding, XrRuntime};
use crate::types::{
    ActionHandle, ActionKind, ActionSetHandle, ActionValue, HapticPulse, InstanceHandle, Pose,
    SessionHandle, SpaceHandle, Time,
};
use crate::{XrError, XrResult};

const ACTION_SET_NAME: &str = "actionset";
const ACTION_SET_LOCALIZED_NAME: &str = "localized_actionset";

/// Position of an action in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(usize);

impl ActionId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct ActionRecord {
    kind: ActionKind,
    name: String,
    /// Caller path; also the binding path suggested to the runtime.
    path: String,
    handle: ActionHandle,
    space: Option<SpaceHandle>,
    last_pose: Option<Pose>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionSample {
    pub path: String,
    pub kind: ActionKind,
    pub is_active: bool,
    pub value: ActionValue,
}

/// Result of one synchronize-and-poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionStateSnapshot {
    pub samples: Vec<ActionSample>,
}

impl ActionStateSnapshot {
    pub fn get(&self, path: &str) -> Option<&ActionSample> {
        self.samples.iter().find(|sample| sample.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Pose of a pose action located for one frame. `pose` is `None` when the
/// runtime reported the location as untracked.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPose {
    pub path: String,
    pub pose: Option<Pose>,
}

impl ActionPose {
    pub fn is_tracked(&self) -> bool {
        self.pose.is_some()
    }
}

#[derive(Debug)]
pub struct ActionRegistry {
    set: ActionSetHandle,
    records: Vec<ActionRecord>,
    attached: bool,
}

impl ActionRegistry {
    pub fn create<R: XrRuntime + ?Sized>(
        runtime: &mut R,
        instance: InstanceHandle,
    ) -> XrResult<Self> {
        let set =
            runtime.create_action_set(instance, ACTION_SET_NAME, ACTION_SET_LOCALIZED_NAME)?;
        debug!(set = set.into_raw(), "action set created");
        Ok(Self {
            set,
            records: Vec::new(),
            attached: false,
        })
    }

    pub fn set_handle(&self) -> ActionSetHandle {
        self.set
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Path, kind and runtime name of every registered action, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ActionKind, &str)> {
        self.records
            .iter()
            .map(|record| (record.path.as_str(), record.kind, record.name.as_str()))
    }

    pub fn find(&self, path: &str) -> Option<ActionId> {
        self.records
            .iter()
            .position(|record| record.path == path)
            .map(ActionId)
    }

    /// Number of pose actions with a created action space.
    pub fn action_space_count(&self) -> usize {
        self.records.iter().filter(|r| r.space.is_some()).count()
    }

    pub fn add_action<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        path: &str,
        kind: ActionKind,
    ) -> XrResult<ActionId> {
        if self.attached {
            return Err(XrError::ActionSetAlreadyAttached);
        }
        let ordinal = self.records.iter().filter(|r| r.kind == kind).count();
        let name = format!("action_{}_{}", kind.as_str(), ordinal);
        let localized_name = format!("localized_{name}");
        let handle = runtime.create_action(self.set, &name, &localized_name, kind)?;
        debug!(%name, %path, "action registered");

        let id = ActionId(self.records.len());
        self.records.push(ActionRecord {
            kind,
            name,
            path: path.to_string(),
            handle,
            space: None,
            last_pose: None,
        });
        Ok(id)
    }

    /// Suggest bindings for every known profile that accepts at least one
    /// registered path. Returns the number of profiles suggested.
    pub fn bind_interaction_profiles<R: XrRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        instance: InstanceHandle,
    ) -> XrResult<usize> {
        if self.attached {
            return Err(XrError::ActionSetAlreadyAttached);
        }
        let mut suggested = 0;
        for profile in PROFILES {
            let bindings: Vec<SuggestedBinding> = self
                .records
                .iter()
                .filter(|record| profile.accepts(&record.path))
                .map(|record| SuggestedBinding {
                    action: record.handle,
                    path: record.path.clone(),
                })
                .collect();
            if bindings.is_empty() {
                debug!(profile = profile.path, "no matching actions, skipped");
                continue;
            }
            runtime.suggest_bindings(instance, profile.path, &bindings)?;
            info!(profile = profile.path, bindings = bindings.len(), "bindings suggested");
            suggested += 1;
        }
        Ok(suggested)
    }

    pub fn attach<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
    ) -> XrResult<()> {
        if self.attached {
            return Err(XrError::ActionSetAlreadyAttached);
        }
        runtime.attach_action_set(session, self.set)?;
        self.attached = true;
        Ok(())
    }

    /// Create one action space per pose action. Requires attachment.
    pub fn create_action_spaces<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
    ) -> XrResult<usize> {
        if !self.attached {
            return Err(XrError::InvalidState("action spaces need an attached action set"));
        }
        let mut created = 0;
        for record in self.records.iter_mut().filter(|r| r.kind == ActionKind::Pose) {
            if record.space.is_none() {
                record.space = Some(runtime.create_action_space(session, record.handle)?);
                created += 1;
            }
        }
        Ok(created)
    }

    /// Synchronize the action set once, then read every action.
    ///
    /// Discrete actions are reported only when active and changed since the
    /// previous sync. Pose actions are reported whenever active, carrying the
    /// last located pose.
    pub fn sync_and_poll<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        session: SessionHandle,
    ) -> XrResult<ActionStateSnapshot> {
        if !self.attached {
            return Err(XrError::InvalidState("action set is not attached"));
        }
        runtime.sync_actions(session, self.set)?;

        let mut snapshot = ActionStateSnapshot::default();
        for record in &self.records {
            if record.kind == ActionKind::Vibration {
                continue;
            }
            let state = runtime.action_state(session, record.handle, record.kind)?;
            let include = if record.kind.is_discrete() {
                state.is_active && state.changed_since_last_sync
            } else {
                state.is_active
            };
            if !include {
                continue;
            }
            let value = match record.kind {
                ActionKind::Pose => ActionValue::Pose(record.last_pose),
                _ => state.value,
            };
            snapshot.samples.push(ActionSample {
                path: record.path.clone(),
                kind: record.kind,
                is_active: state.is_active,
                value,
            });
        }
        Ok(snapshot)
    }

    /// Locate every action space against `base`. Failures and untracked
    /// locations are logged and leave the last known pose untouched.
    pub fn locate_poses<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        base: SpaceHandle,
        time: Time,
    ) -> Vec<ActionPose> {
        let mut poses = Vec::new();
        for record in &mut self.records {
            let Some(space) = record.space else {
                continue;
            };
            let pose = match runtime.locate_space(space, base, time) {
                Ok(location) if location.is_valid() => {
                    record.last_pose = Some(location.pose);
                    Some(location.pose)
                }
                Ok(_) => {
                    debug!(path = %record.path, "action pose not tracked this frame");
                    None
                }
                Err(err) => {
                    warn!(path = %record.path, "locating action space failed: {err}");
                    None
                }
            };
            poses.push(ActionPose {
                path: record.path.clone(),
                pose,
            });
        }
        poses
    }

    fn vibration_handle(&self, path: &str) -> XrResult<ActionHandle> {
        self.records
            .iter()
            .find(|r| r.kind == ActionKind::Vibration && r.path == path)
            .map(|r| r.handle)
            .ok_or_else(|| XrError::ActionNotFound(path.to_string()))
    }

    pub fn apply_haptic_feedback<R: XrRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        session: SessionHandle,
        path: &str,
        pulse: &HapticPulse,
    ) -> XrResult<()> {
        let handle = self.vibration_handle(path)?;
        runtime.apply_haptic_feedback(session, handle, pulse)
    }

    pub fn stop_haptic_feedback<R: XrRuntime + ?Sized>(
        &self,
        runtime: &mut R,
        session: SessionHandle,
        path: &str,
    ) -> XrResult<()> {
        let handle = self.vibration_handle(path)?;
        runtime.stop_haptic_feedback(session, handle)
    }

    /// Destroy every action space. Keeps going past failures and returns the
    /// first one.
    pub fn destroy_spaces<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) -> XrResult<()> {
        let mut first_err = None;
        for record in &mut self.records {
            if let Some(space) = record.space.take() {
                if let Err(err) = runtime.destroy_space(space) {
                    warn!(path = %record.path, "destroying action space failed: {err}");
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRuntime, RuntimeCall};
    use glam::Vec3;

    const LEFT_SELECT: &str = "/user/hand/left/input/select/click";
    const LEFT_TRIGGER: &str = "/user/hand/left/input/trigger/value";
    const LEFT_AIM: &str = "/user/hand/left/input/aim/pose";
    const LEFT_HAPTIC: &str = "/user/hand/left/output/haptic";
    const HEAD_MUTE: &str = "/user/head/input/mute_mic/click";

    fn setup() -> (MockRuntime, InstanceHandle, SessionHandle, ActionRegistry) {
        let mut runtime = MockRuntime::new();
        let (instance, session) = runtime.quick_session();
        let registry = ActionRegistry::create(&mut runtime, instance).unwrap();
        (runtime, instance, session, registry)
    }

    #[test]
    fn test_action_names_follow_kind_ordinal() {
        let (mut runtime, _, _, mut registry) = setup();
        registry.add_action(&mut runtime, LEFT_SELECT, ActionKind::Boolean).unwrap();
        registry.add_action(&mut runtime, LEFT_TRIGGER, ActionKind::Float).unwrap();
        registry
            .add_action(&mut runtime, "/user/hand/right/input/select/click", ActionKind::Boolean)
            .unwrap();
        let names: Vec<&str> = registry.iter().map(|(_, _, name)| name).collect();
        assert_eq!(
            names,
            vec!["action_boolean_0", "action_float_0", "action_boolean_1"]
        );
        assert_eq!(runtime.action_localized_name("action_float_0").as_deref(), Some("localized_action_float_0"));
    }

    #[test]
    fn test_bind_skips_profiles_without_matches() {
        let (mut runtime, instance, _, mut registry) = setup();
        registry.add_action(&mut runtime, HEAD_MUTE, ActionKind::Boolean).unwrap();
        let suggested = registry.bind_interaction_profiles(&mut runtime, instance).unwrap();
        assert_eq!(suggested, 1);
        let profiles = runtime.suggested_profiles();
        assert_eq!(profiles, vec!["/interaction_profiles/htc/vive_pro".to_string()]);
    }

    #[test]
    fn test_bind_suggests_matching_subset_per_profile() {
        let (mut runtime, instance, _, mut registry) = setup();
        registry.add_action(&mut runtime, LEFT_SELECT, ActionKind::Boolean).unwrap();
        registry.add_action(&mut runtime, LEFT_TRIGGER, ActionKind::Float).unwrap();
        registry.bind_interaction_profiles(&mut runtime, instance).unwrap();

        let simple = runtime
            .suggested_paths("/interaction_profiles/khr/simple_controller")
            .unwrap();
        assert_eq!(simple, vec![LEFT_SELECT.to_string()]);
        let vive = runtime
            .suggested_paths("/interaction_profiles/htc/vive_controller")
            .unwrap();
        assert_eq!(vive, vec![LEFT_TRIGGER.to_string()]);
        assert!(runtime
            .suggested_paths("/interaction_profiles/microsoft/xbox_controller")
            .is_none());
    }

    #[test]
    fn test_attach_once() {
        let (mut runtime, _, session, mut registry) = setup();
        registry.attach(&mut runtime, session).unwrap();
        let second = registry.attach(&mut runtime, session);
        assert!(matches!(second, Err(XrError::ActionSetAlreadyAttached)));
        assert_eq!(runtime.count(RuntimeCall::AttachActionSet), 1);
        let late = registry.add_action(&mut runtime, LEFT_SELECT, ActionKind::Boolean);
        assert!(matches!(late, Err(XrError::ActionSetAlreadyAttached)));
    }

    #[test]
    fn test_snapshot_filters_unchanged_discrete_actions() {
        let (mut runtime, instance, session, mut registry) = setup();
        registry.add_action(&mut runtime, LEFT_SELECT, ActionKind::Boolean).unwrap();
        registry.add_action(&mut runtime, LEFT_AIM, ActionKind::Pose).unwrap();
        registry.bind_interaction_profiles(&mut runtime, instance).unwrap();
        registry.attach(&mut runtime, session).unwrap();

        runtime.set_input(LEFT_SELECT, ActionValue::Boolean(true));
        runtime.set_input(LEFT_AIM, ActionValue::Pose(None));

        let first = registry.sync_and_poll(&mut runtime, session).unwrap();
        assert_eq!(
            first.get(LEFT_SELECT).map(|s| s.value),
            Some(ActionValue::Boolean(true))
        );
        assert!(first.contains(LEFT_AIM));

        let second = registry.sync_and_poll(&mut runtime, session).unwrap();
        assert!(!second.contains(LEFT_SELECT));
        assert!(second.contains(LEFT_AIM));
        assert_eq!(runtime.count(RuntimeCall::SyncActions), 2);
    }

    #[test]
    fn test_inactive_actions_are_not_reported() {
        let (mut runtime, instance, session, mut registry) = setup();
        registry.add_action(&mut runtime, LEFT_TRIGGER, ActionKind::Float).unwrap();
        registry.add_action(&mut runtime, LEFT_AIM, ActionKind::Pose).unwrap();
        registry.bind_interaction_profiles(&mut runtime, instance).unwrap();
        registry.attach(&mut runtime, session).unwrap();

        let snapshot = registry.sync_and_poll(&mut runtime, session).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_sync_requires_attachment() {
        let (mut runtime, _, session, mut registry) = setup();
        let result = registry.sync_and_poll(&mut runtime, session);
        assert!(matches!(result, Err(XrError::InvalidState(_))));
        assert_eq!(runtime.count(RuntimeCall::SyncActions), 0);
    }

    #[test]
    fn test_locate_poses_keeps_last_known_pose() {
        let (mut runtime, instance, session, mut registry) = setup();
        registry.add_action(&mut runtime, LEFT_AIM, ActionKind::Pose).unwrap();
        registry.bind_interaction_profiles(&mut runtime, instance).unwrap();
        registry.attach(&mut runtime, session).unwrap();
        assert_eq!(registry.create_action_spaces(&mut runtime, session).unwrap(), 1);
        let base = runtime
            .create_reference_space(session, crate::ReferenceSpaceKind::View)
            .unwrap();

        let tracked = Pose {
            position: Vec3::new(0.1, 1.2, -0.3),
            ..Pose::IDENTITY
        };
        runtime.set_space_pose(Some(tracked));
        let poses = registry.locate_poses(&mut runtime, base, Time::from_nanos(1));
        assert_eq!(poses[0].pose, Some(tracked));

        runtime.set_space_pose(None);
        let poses = registry.locate_poses(&mut runtime, base, Time::from_nanos(2));
        assert!(!poses[0].is_tracked());

        runtime.set_input(LEFT_AIM, ActionValue::Pose(None));
        let snapshot = registry.sync_and_poll(&mut runtime, session).unwrap();
        assert_eq!(
            snapshot.get(LEFT_AIM).map(|s| s.value),
            Some(ActionValue::Pose(Some(tracked)))
        );
    }

    #[test]
    fn test_haptics_require_registered_vibration_action() {
        let (mut runtime, _, session, mut registry) = setup();
        registry.add_action(&mut runtime, LEFT_HAPTIC, ActionKind::Vibration).unwrap();
        registry.add_action(&mut runtime, LEFT_SELECT, ActionKind::Boolean).unwrap();
        registry.attach(&mut runtime, session).unwrap();

        let pulse = HapticPulse::new(0.5, HapticPulse::MIN_DURATION, 0.0);
        registry
            .apply_haptic_feedback(&mut runtime, session, LEFT_HAPTIC, &pulse)
            .unwrap();
        registry
            .stop_haptic_feedback(&mut runtime, session, LEFT_HAPTIC)
            .unwrap();

        let wrong_kind = registry.apply_haptic_feedback(&mut runtime, session, LEFT_SELECT, &pulse);
        assert!(matches!(wrong_kind, Err(XrError::ActionNotFound(_))));
        let unknown = registry.stop_haptic_feedback(&mut runtime, session, "/user/hand/right/output/haptic");
        assert!(matches!(unknown, Err(XrError::ActionNotFound(_))));
        assert_eq!(runtime.count(RuntimeCall::ApplyHapticFeedback), 1);
        assert_eq!(runtime.count(RuntimeCall::StopHapticFeedback), 1);
    }
}
