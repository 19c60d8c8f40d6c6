//! Lifecycle tests driving `XrApplication` over the recording mock runtime.

use xrpilot_core::mock::{CallLog, GraphicsCall, MockGraphics, MockRuntime, RuntimeCall};
use xrpilot_core::{
    ActionKind, ActionValue, Extent2Df, FrameStager, PixelLayout, Pose, ReferenceSpaceKind,
    RuntimeEvent, SessionHandle, SessionPhase, SessionState, StagedFrame, Time, View,
    ViewConfigurationView, XrApplication, XrConfig, XrError,
};

type MockApp = XrApplication<MockRuntime, MockGraphics>;

const LEFT_SELECT: &str = "/user/hand/left/input/select/click";
const LEFT_AIM: &str = "/user/hand/left/input/aim/pose";
const RIGHT_GRIP: &str = "/user/hand/right/input/grip/pose";
const LEFT_HAPTIC: &str = "/user/hand/left/output/haptic";

fn stage_every_view(_: &[View], configs: &[ViewConfigurationView], stager: &mut FrameStager) {
    for index in 0..configs.len() {
        let frame = StagedFrame::new(4, 2, PixelLayout::Rgb, vec![0x7f; 4 * 2 * 3]).unwrap();
        stager.set_frame(index, frame).unwrap();
    }
}

fn stage_nothing(_: &[View], _: &[ViewConfigurationView], _: &mut FrameStager) {}

fn build(runtime: MockRuntime, backend: MockGraphics, config: XrConfig) -> MockApp {
    let mut app = XrApplication::new(runtime, backend, config).unwrap();
    app.select_system().unwrap();
    for path in [LEFT_SELECT, LEFT_AIM, RIGHT_GRIP, LEFT_HAPTIC] {
        app.add_action_inferred(path).unwrap();
    }
    app.create_session().unwrap();
    app
}

fn start(app: &mut MockApp) {
    app.runtime_mut().push_state(SessionState::Ready);
    app.runtime_mut().push_state(SessionState::Synchronized);
    app.runtime_mut().push_state(SessionState::Focused);
    assert!(!app.poll_events().unwrap());
    assert!(app.is_session_running());
}

fn running_app(log: &CallLog) -> MockApp {
    let runtime = MockRuntime::new().with_call_log(log.clone());
    let backend = MockGraphics::new().with_call_log(log.clone());
    let mut app = build(runtime, backend, XrConfig::default());
    start(&mut app);
    app
}

#[test]
fn test_setup_happy_path() {
    let log = CallLog::new();
    let config = XrConfig::default();
    assert!(config.requested_layers.is_empty());
    assert_eq!(config.requested_extensions, vec![MockRuntime::GRAPHICS_EXTENSION]);

    let app = build(
        MockRuntime::new().with_call_log(log.clone()),
        MockGraphics::new(),
        config,
    );
    assert_eq!(app.view_configuration_views().unwrap().len(), 2);
    assert_eq!(app.swapchain_count(), 2);
    assert_eq!(app.runtime().swapchain_infos()[0].width, 1440);
    assert_eq!(app.runtime().swapchain_infos()[0].height, 1600);
    assert_eq!(
        app.runtime_properties().map(|p| p.runtime_name.as_str()),
        Some("mock-runtime")
    );
    assert!(app.backend().is_initialized());

    // bind device -> session -> spaces -> bindings -> attach -> action spaces -> swapchains
    let order = [
        RuntimeCall::CreateSession,
        RuntimeCall::CreateReferenceSpace,
        RuntimeCall::SuggestBindings,
        RuntimeCall::AttachActionSet,
        RuntimeCall::CreateActionSpace,
        RuntimeCall::CreateSwapchain,
    ];
    let positions: Vec<usize> = order.iter().map(|c| log.position(*c).unwrap()).collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{positions:?}");
    assert_eq!(log.count(RuntimeCall::CreateActionSpace), 2);
}

#[test]
fn test_event_driven_start_stop_exit() {
    let log = CallLog::new();
    let mut app = build(
        MockRuntime::new().with_call_log(log.clone()),
        MockGraphics::new(),
        XrConfig::default(),
    );
    assert!(!app.is_session_running());

    app.runtime_mut().push_state(SessionState::Ready);
    assert!(!app.poll_events().unwrap());
    assert!(app.is_session_running());
    assert_eq!(log.count(RuntimeCall::BeginSession), 1);

    app.runtime_mut().push_state(SessionState::Stopping);
    assert!(!app.poll_events().unwrap());
    assert!(!app.is_session_running());
    assert_eq!(log.count(RuntimeCall::EndSession), 1);

    app.runtime_mut().push_state(SessionState::Exiting);
    assert!(app.poll_events().unwrap());
    assert!(app.exit_requested());
    assert_eq!(app.session_phase(), SessionPhase::Exiting);
}

#[test]
fn test_session_restarts_after_stopping() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.runtime_mut().push_state(SessionState::Stopping);
    app.runtime_mut().push_state(SessionState::Idle);
    app.runtime_mut().push_state(SessionState::Ready);
    assert!(!app.poll_events().unwrap());
    assert!(app.is_session_running());
    assert_eq!(log.count(RuntimeCall::BeginSession), 2);
    assert_eq!(log.count(RuntimeCall::EndSession), 1);
}

#[test]
fn test_foreign_session_event_is_rejected() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.runtime_mut().push_event(RuntimeEvent::SessionStateChanged {
        session: Some(SessionHandle::from_raw(0xfeed)),
        state: SessionState::Stopping,
        time: Time::default(),
    });
    assert!(matches!(
        app.poll_events(),
        Err(XrError::UnexpectedSessionEvent { .. })
    ));
    assert!(app.is_session_running());
}

#[test]
fn test_every_begin_frame_is_ended() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    for _ in 0..3 {
        let outcome = app
            .render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
            .unwrap();
        assert!(outcome.rendered);
    }
    app.runtime_mut().set_should_render(false);
    for _ in 0..2 {
        let outcome = app
            .render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
            .unwrap();
        assert!(!outcome.rendered);
        assert_eq!(outcome.views_rendered, 0);
    }

    assert_eq!(log.count(RuntimeCall::WaitFrame), 5);
    assert_eq!(log.count(RuntimeCall::BeginFrame), 5);
    assert_eq!(log.count(RuntimeCall::EndFrame), 5);
    let submitted = app.runtime().submitted_frames();
    assert!(submitted[..3].iter().all(|frame| frame.layers.len() == 1));
    assert!(submitted[3..].iter().all(|frame| frame.layers.is_empty()));
    // Nothing is acquired when the runtime says not to render.
    assert_eq!(log.count(RuntimeCall::AcquireSwapchainImage), 6);
    assert_eq!(app.frame_index(), 5);
}

#[test]
fn test_projection_views_match_view_count() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.render_frame(ReferenceSpaceKind::Stage, &mut stage_every_view)
        .unwrap();
    let frame = &app.runtime().submitted_frames()[0];
    assert_eq!(frame.view_count(), app.view_configuration_views().unwrap().len());
    let layer = &frame.layers[0];
    assert_eq!(layer.views[0].image_rect.width, 1440);
    assert_eq!(layer.views[1].image_rect.height, 1600);
    assert_ne!(layer.views[0].swapchain, layer.views[1].swapchain);
}

#[test]
fn test_staged_frames_are_drawn_once() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
        .unwrap();
    assert_eq!(outcome.views_rendered, 2);

    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert_eq!(outcome.views_rendered, 0);
    assert_eq!(app.backend().rendered().len(), 2);
    // The second frame still submits both views.
    assert_eq!(app.runtime().submitted_frames()[1].view_count(), 2);
}

#[test]
fn test_out_of_band_frame_is_rendered_between_acquire_and_release() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.set_frame(1, 2, 2, vec![0u8; 16], true).unwrap();
    let flipped = StagedFrame::new(1, 1, PixelLayout::Rgb, vec![1u8, 2, 3])
        .unwrap()
        .flipped(true);
    app.set_staged_frame(0, flipped).unwrap();
    assert!(matches!(
        app.set_frame(2, 2, 2, vec![0u8; 16], true),
        Err(XrError::InvalidViewIndex { index: 2, count: 2 })
    ));
    assert!(matches!(
        app.set_frame(0, 2, 2, vec![0u8; 3], false),
        Err(XrError::InvalidFrame(_))
    ));

    log.clear();
    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert_eq!(outcome.views_rendered, 2);
    let rendered = app.backend().rendered();
    assert!(rendered[0].flip_vertical);
    assert_eq!((rendered[1].width, rendered[1].height), (2, 2));

    let calls = log.calls();
    let render = calls
        .iter()
        .position(|c| *c == RuntimeCall::Graphics(GraphicsCall::RenderView))
        .unwrap();
    let wait = log.position(RuntimeCall::WaitSwapchainImage).unwrap();
    let release = log.position(RuntimeCall::ReleaseSwapchainImage).unwrap();
    assert!(wait < render && render < release);
}

#[test]
fn test_acquire_release_balance_survives_render_failure() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
        .unwrap();
    app.backend_mut().fail_renders(true);
    let failed = app.render_frame(ReferenceSpaceKind::Local, &mut stage_every_view);
    assert!(matches!(failed, Err(XrError::Graphics(_))));

    assert_eq!(
        log.count(RuntimeCall::AcquireSwapchainImage),
        log.count(RuntimeCall::ReleaseSwapchainImage)
    );
    let (acquired, released) = app.swapchain_balance();
    assert_eq!(acquired, released);
}

#[test]
fn test_runtime_failure_aborts_frame() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.runtime_mut().fail_on(RuntimeCall::LocateViews);
    let result = app.render_frame(ReferenceSpaceKind::Local, &mut stage_every_view);
    assert!(matches!(
        result,
        Err(XrError::RuntimeCallFailed { call: "xrLocateViews", .. })
    ));
    assert_eq!(log.count(RuntimeCall::AcquireSwapchainImage), 0);
    assert_eq!(log.count(RuntimeCall::EndFrame), 0);
}

#[test]
fn test_next_frame_recovers_after_aborted_frame() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.runtime_mut().fail_on(RuntimeCall::LocateViews);
    assert!(app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
        .is_err());
    app.runtime_mut().clear_failures();

    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
        .unwrap();
    assert!(outcome.rendered);
    assert_eq!(outcome.views_rendered, 2);
    assert_eq!(app.runtime().discarded_frames(), 1);
    assert_eq!(app.runtime().submitted_frames().len(), 1);
    assert_eq!(app.frame_index(), 1);
}

#[test]
fn test_failed_image_wait_recovers_on_next_frame() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.runtime_mut().fail_on(RuntimeCall::WaitSwapchainImage);
    let failed = app.render_frame(ReferenceSpaceKind::Local, &mut stage_every_view);
    assert!(matches!(
        failed,
        Err(XrError::RuntimeCallFailed { call: "xrWaitSwapchainImage", .. })
    ));
    app.runtime_mut().clear_failures();

    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
        .unwrap();
    assert_eq!(outcome.views_rendered, 2);
    // The image left acquired by the failed wait is reused, not acquired again.
    assert_eq!(log.count(RuntimeCall::AcquireSwapchainImage), 2);
    assert_eq!(log.count(RuntimeCall::ReleaseSwapchainImage), 2);
    assert_eq!(app.swapchain_balance(), (2, 2));
    assert_eq!(app.runtime().submitted_frames().len(), 1);
}

#[test]
fn test_skipped_frame_drops_staged_buffers() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.set_frame(0, 2, 2, vec![0u8; 16], true).unwrap();
    app.runtime_mut().set_should_render(false);
    let skipped = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert!(!skipped.rendered);

    app.runtime_mut().set_should_render(true);
    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert_eq!(outcome.views_rendered, 0);
    assert!(app.backend().rendered().is_empty());
}

#[test]
fn test_unsupported_reference_space_is_rejected_before_runtime_calls() {
    let log = CallLog::new();
    let runtime = MockRuntime::new()
        .with_call_log(log.clone())
        .with_reference_spaces(vec![ReferenceSpaceKind::View, ReferenceSpaceKind::Local]);
    let mut app = build(runtime, MockGraphics::new(), XrConfig::default());
    start(&mut app);

    let result = app.render_frame(ReferenceSpaceKind::Stage, &mut stage_every_view);
    assert!(matches!(
        result,
        Err(XrError::InvalidReferenceSpace(ReferenceSpaceKind::Stage))
    ));
    assert_eq!(log.count(RuntimeCall::WaitFrame), 0);
    assert!(matches!(
        app.reference_space_bounds(ReferenceSpaceKind::Stage),
        Err(XrError::InvalidReferenceSpace(_))
    ));
}

#[test]
fn test_stage_bounds_are_reported() {
    let bounds = Extent2Df {
        width: 4.0,
        height: 3.0,
    };
    let app = build(
        MockRuntime::new().with_stage_bounds(bounds),
        MockGraphics::new(),
        XrConfig::default(),
    );
    assert_eq!(
        app.reference_space_bounds(ReferenceSpaceKind::Stage).unwrap(),
        Some(bounds)
    );
    assert_eq!(app.reference_space_bounds(ReferenceSpaceKind::Local).unwrap(), None);
}

#[test]
fn test_action_snapshot_filtering() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.runtime_mut()
        .set_input(LEFT_SELECT, ActionValue::Boolean(true));
    app.runtime_mut().set_input(LEFT_AIM, ActionValue::Pose(None));

    let first = app.sync_and_poll().unwrap();
    assert!(first.contains(LEFT_SELECT));
    assert!(first.contains(LEFT_AIM));
    assert!(!first.contains(RIGHT_GRIP));

    let second = app.sync_and_poll().unwrap();
    assert!(!second.contains(LEFT_SELECT));
    assert!(second.contains(LEFT_AIM));

    app.runtime_mut()
        .set_input(LEFT_SELECT, ActionValue::Boolean(false));
    let third = app.sync_and_poll().unwrap();
    assert_eq!(
        third.get(LEFT_SELECT).map(|sample| sample.value),
        Some(ActionValue::Boolean(false))
    );
    assert_eq!(log.count(RuntimeCall::SyncActions), 3);
}

#[test]
fn test_action_poses_are_located_each_frame() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    let pose = Pose {
        position: glam::Vec3::new(0.2, 1.1, -0.4),
        ..Pose::IDENTITY
    };
    app.runtime_mut().set_space_pose(Some(pose));
    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert_eq!(outcome.action_poses.len(), 2);
    assert!(outcome.action_poses.iter().all(|p| p.pose == Some(pose)));

    app.runtime_mut().set_space_pose(None);
    let outcome = app
        .render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert!(outcome.action_poses.iter().all(|p| !p.is_tracked()));
    assert_eq!(log.count(RuntimeCall::LocateSpace), 4);
}

#[test]
fn test_attach_happens_once() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    assert_eq!(log.count(RuntimeCall::AttachActionSet), 1);
    assert!(matches!(
        app.add_action("/user/hand/right/input/select/click", ActionKind::Boolean),
        Err(XrError::ActionSetAlreadyAttached)
    ));
    assert!(matches!(
        app.create_session(),
        Err(XrError::InvalidState(_))
    ));
    assert_eq!(log.count(RuntimeCall::AttachActionSet), 1);
}

#[test]
fn test_haptics() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.apply_haptic_feedback(LEFT_HAPTIC, 1.5, -1, 0.0).unwrap();
    app.stop_haptic_feedback(LEFT_HAPTIC).unwrap();
    assert_eq!(app.runtime().haptic_pulses()[0].amplitude, 1.0);
    assert!(matches!(
        app.apply_haptic_feedback(LEFT_AIM, 0.5, -1, 0.0),
        Err(XrError::ActionNotFound(_))
    ));
    assert_eq!(log.count(RuntimeCall::ApplyHapticFeedback), 1);
}

#[test]
fn test_context_shim_reasserts_around_runtime_calls() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.backend_mut().simulate_context_switch();
    app.render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert_eq!(app.context_switches_detected(), 1);
    // Before wait-frame, then after acquire and after wait for each view.
    assert_eq!(app.backend().reacquire_calls(), 5);
}

#[test]
fn test_context_shim_can_be_disabled() {
    let log = CallLog::new();
    let config = XrConfig {
        reassert_graphics_context: false,
        ..XrConfig::default()
    };
    let runtime = MockRuntime::new().with_call_log(log.clone());
    let backend = MockGraphics::new().with_call_log(log.clone());
    let mut app = build(runtime, backend, config);
    start(&mut app);
    app.render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
        .unwrap();
    assert_eq!(
        log.count(RuntimeCall::Graphics(GraphicsCall::ReacquireContext)),
        0
    );
}

#[test]
fn test_mirror_presents_on_interval() {
    let config = XrConfig {
        mirror_interval: 2,
        ..XrConfig::default()
    };
    let mut app = build(MockRuntime::new(), MockGraphics::new(), config);
    start(&mut app);
    for _ in 0..5 {
        app.render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
            .unwrap();
    }
    assert_eq!(app.backend().mirror_presents(), &[2, 4]);
}

#[test]
fn test_destruction_order() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.render_frame(ReferenceSpaceKind::Local, &mut stage_every_view)
        .unwrap();
    app.destroy().unwrap();

    let last_space = log.last_position(RuntimeCall::DestroySpace).unwrap();
    let last_swapchain = log.last_position(RuntimeCall::DestroySwapchain).unwrap();
    let session = log.position(RuntimeCall::DestroySession).unwrap();
    let action_set = log.position(RuntimeCall::DestroyActionSet).unwrap();
    let instance = log.position(RuntimeCall::DestroyInstance).unwrap();
    let end = log.last_position(RuntimeCall::EndSession).unwrap();
    assert!(end < last_space);
    assert!(last_space < session);
    assert!(last_swapchain < session);
    assert!(session < action_set);
    assert!(action_set < instance);
    // 3 reference spaces + 2 action spaces
    assert_eq!(log.count(RuntimeCall::DestroySpace), 5);
    assert_eq!(log.count(RuntimeCall::DestroySwapchain), 2);

    assert!(!app.runtime().live_instance());
    assert!(matches!(
        app.render_frame(ReferenceSpaceKind::Local, &mut stage_nothing),
        Err(XrError::InvalidState(_))
    ));
}

#[test]
fn test_drop_tears_down() {
    let log = CallLog::new();
    {
        let mut app = running_app(&log);
        app.render_frame(ReferenceSpaceKind::Local, &mut stage_nothing)
            .unwrap();
    }
    assert_eq!(log.count(RuntimeCall::DestroySession), 1);
    assert_eq!(log.count(RuntimeCall::DestroyInstance), 1);
    assert!(log.position(RuntimeCall::DestroySession) < log.position(RuntimeCall::DestroyInstance));
}

#[test]
fn test_instance_loss_stops_the_loop() {
    let log = CallLog::new();
    let mut app = running_app(&log);
    app.runtime_mut().push_event(RuntimeEvent::InstanceLossPending {
        loss_time: Time::from_nanos(1_000),
    });
    app.runtime_mut().push_state(SessionState::Stopping);
    assert!(app.poll_events().unwrap());
    assert_eq!(app.session_phase(), SessionPhase::LossPending);
    assert_eq!(app.runtime().pending_events(), 1);
}
