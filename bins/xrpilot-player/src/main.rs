use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use xrpilot_core::mock::{MockGraphics, MockRuntime};
use xrpilot_core::{
    ActionValue, BlendMode, FrameStager, GraphicsBackend, PixelLayout, ReferenceSpaceKind,
    SessionState, StagedFrame, View, ViewConfigurationView, XrApplication, XrConfig, XrRuntime,
};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);
const PATTERN_SIZE: u32 = 256;
const MOCK_DEFAULT_FRAMES: u64 = 90;
const SELECT_PULSE_NS: i64 = 20_000_000;

/// Inputs registered on startup. Kinds are inferred from the path suffix.
const DEFAULT_ACTIONS: &[&str] = &[
    "/user/hand/left/input/trigger/value",
    "/user/hand/right/input/trigger/value",
    "/user/hand/left/input/select/click",
    "/user/hand/right/input/select/click",
    "/user/hand/left/input/grip/pose",
    "/user/hand/right/input/grip/pose",
    "/user/hand/left/input/aim/pose",
    "/user/hand/right/input/aim/pose",
    "/user/hand/left/output/haptic",
    "/user/hand/right/output/haptic",
];

#[derive(Parser, Debug)]
#[command(name = "xrpilot-player", version, about)]
struct Args {
    /// JSON config file; command-line flags override its values.
    #[arg(long, env = "XRPILOT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "XRPILOT_APP_NAME")]
    app_name: Option<String>,

    /// Reference space frames are rendered against: view, local or stage.
    #[arg(long, env = "XRPILOT_REFERENCE_SPACE")]
    reference_space: Option<ReferenceSpaceKind>,

    /// Environment blend mode: opaque, additive or alpha-blend.
    #[arg(long, env = "XRPILOT_BLEND_MODE")]
    blend_mode: Option<BlendMode>,

    /// API layer to enable; repeatable.
    #[arg(long = "layer")]
    layers: Vec<String>,

    /// Extra instance extension to enable; repeatable.
    #[arg(long = "extension")]
    extensions: Vec<String>,

    /// Present to the desktop mirror every N frames (0 disables it).
    #[arg(long, env = "XRPILOT_MIRROR_INTERVAL")]
    mirror_interval: Option<u32>,

    /// Skip reasserting the GL context around runtime calls.
    #[arg(long)]
    no_context_shim: bool,

    /// Run against the in-process mock runtime instead of OpenXR.
    #[arg(long)]
    mock: bool,

    /// Stop after this many frames.
    #[arg(long, env = "XRPILOT_MAX_FRAMES")]
    max_frames: Option<u64>,
}

impl Args {
    fn resolve_config(&self) -> Result<XrConfig> {
        let mut config = match &self.config {
            Some(path) => XrConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => XrConfig::default(),
        };
        if let Some(name) = &self.app_name {
            config.application_name = name.clone();
        }
        if let Some(kind) = self.reference_space {
            config.reference_space = kind;
        }
        if let Some(mode) = self.blend_mode {
            config.blend_mode = mode;
        }
        config.requested_layers.extend(self.layers.iter().cloned());
        for extension in &self.extensions {
            if !config.requested_extensions.contains(extension) {
                config.requested_extensions.push(extension.clone());
            }
        }
        if let Some(interval) = self.mirror_interval {
            config.mirror_interval = interval;
        }
        if self.no_context_shim {
            config.reassert_graphics_context = false;
        }
        Ok(config)
    }
}

/// Fills every view with a moving color gradient, tinted per eye.
struct TestPattern {
    tick: u32,
}

impl TestPattern {
    fn new() -> Self {
        Self { tick: 0 }
    }

    fn pixels(&self, view_index: usize) -> Vec<u8> {
        let tint = if view_index == 0 { 0u8 } else { 96u8 };
        let shift = self.tick % PATTERN_SIZE;
        let mut data = Vec::with_capacity((PATTERN_SIZE * PATTERN_SIZE * 4) as usize);
        for y in 0..PATTERN_SIZE {
            for x in 0..PATTERN_SIZE {
                data.extend_from_slice(&[
                    ((x + shift) % PATTERN_SIZE) as u8,
                    y as u8,
                    tint,
                    u8::MAX,
                ]);
            }
        }
        data
    }

    fn produce(
        &mut self,
        views: &[View],
        _configurations: &[ViewConfigurationView],
        stager: &mut FrameStager,
    ) {
        for index in 0..views.len().min(stager.view_count()) {
            let staged = StagedFrame::new(
                PATTERN_SIZE,
                PATTERN_SIZE,
                PixelLayout::Rgba,
                self.pixels(index),
            )
            .map(|frame| frame.flipped(true))
            .and_then(|frame| stager.set_frame(index, frame));
            if let Err(err) = staged {
                warn!("failed to stage view {index}: {err}");
            }
        }
        self.tick = self.tick.wrapping_add(2);
    }
}

fn setup<R, G>(app: &mut XrApplication<R, G>) -> Result<()>
where
    R: XrRuntime,
    G: GraphicsBackend<Binding = R::Binding, Image = R::Image>,
{
    let system = app.select_system().context("failed to select XR system")?;
    info!(
        "system ready: {:?} {} views, blend {}",
        system.view_configuration_type,
        system.views.len(),
        system.blend_mode
    );
    for path in DEFAULT_ACTIONS {
        app.add_action_inferred(path)
            .with_context(|| format!("failed to register action {path}"))?;
    }
    app.create_session().context("failed to create XR session")?;
    Ok(())
}

fn run<R, G>(
    app: &mut XrApplication<R, G>,
    max_frames: Option<u64>,
    mut on_frame: impl FnMut(&mut XrApplication<R, G>, u64),
) -> Result<()>
where
    R: XrRuntime,
    G: GraphicsBackend<Binding = R::Binding, Image = R::Image>,
{
    let reference_space = app.config().reference_space;
    let mut pattern = TestPattern::new();
    let mut producer = |views: &[View], configs: &[ViewConfigurationView], stager: &mut FrameStager| {
        pattern.produce(views, configs, stager)
    };
    let mut frames = 0u64;

    loop {
        if app.poll_events().context("event polling failed")? {
            info!("runtime requested exit");
            break;
        }
        if max_frames.is_some_and(|max| frames >= max) {
            info!("rendered {frames} frames, stopping");
            break;
        }
        if !app.is_session_running() {
            thread::sleep(IDLE_POLL_INTERVAL);
            continue;
        }

        let snapshot = app.sync_and_poll().context("action sync failed")?;
        for sample in &snapshot.samples {
            debug!("{} -> {:?}", sample.path, sample.value);
            if sample.path.ends_with("/select/click") && sample.value == ActionValue::Boolean(true)
            {
                let haptic = sample.path.replace("/input/select/click", "/output/haptic");
                if let Err(err) = app.apply_haptic_feedback(&haptic, 0.5, SELECT_PULSE_NS, 0.0) {
                    warn!("haptic pulse on {haptic} failed: {err}");
                }
            }
        }

        let outcome = app
            .render_frame(reference_space, &mut producer)
            .context("frame failed")?;
        frames += 1;
        let tracked = outcome.action_poses.iter().filter(|p| p.is_tracked()).count();
        debug!(
            "frame {frames}: rendered={} views={} tracked_poses={tracked}",
            outcome.rendered, outcome.views_rendered
        );
        on_frame(app, frames);
    }
    Ok(())
}

fn run_mock(config: XrConfig, max_frames: Option<u64>) -> Result<()> {
    let mut app = XrApplication::new(MockRuntime::new(), MockGraphics::new(), config)
        .context("failed to create mock XR instance")?;
    setup(&mut app)?;
    app.runtime_mut().push_state(SessionState::Ready);
    app.runtime_mut().push_state(SessionState::Focused);

    let max_frames = max_frames.unwrap_or(MOCK_DEFAULT_FRAMES);
    run(&mut app, Some(max_frames), |app, frame| {
        if frame + 1 == max_frames {
            app.runtime_mut().push_state(SessionState::Stopping);
            app.runtime_mut().push_state(SessionState::Exiting);
        }
    })?;

    info!(
        "mock run finished: {} frames, {} views drawn, {} mirror presents",
        app.frame_index(),
        app.backend().rendered().len(),
        app.backend().mirror_presents().len()
    );
    app.destroy().context("failed to tear down mock session")?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn run_openxr(config: XrConfig, max_frames: Option<u64>) -> Result<()> {
    use xrpilot_openxr::{GlxBackend, OpenXrRuntime};

    let runtime = OpenXrRuntime::load().context("failed to load the OpenXR loader")?;
    let backend = GlxBackend::new().context("failed to create GLX context")?;
    let mut app =
        XrApplication::new(runtime, backend, config).context("failed to create XR instance")?;
    if let Some(props) = app.runtime_properties() {
        info!("runtime: {} {}", props.runtime_name, props.runtime_version);
    }
    setup(&mut app)?;
    run(&mut app, max_frames, |_, _| {})?;
    info!(
        "stopped after {} frames, {} GL context switches caught",
        app.frame_index(),
        app.context_switches_detected()
    );
    app.destroy().context("failed to tear down XR session")?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run_openxr(_config: XrConfig, _max_frames: Option<u64>) -> Result<()> {
    anyhow::bail!("the OpenXR backend is Linux-only; run with --mock")
}

fn main() -> Result<()> {
    xrpilot_common::init_tracing();
    let args = Args::parse();
    let config = args.resolve_config()?;
    info!(
        "starting {} (reference space {}, blend {})",
        config.application_name, config.reference_space, config.blend_mode
    );
    if args.mock {
        run_mock(config, args.max_frames)
    } else {
        run_openxr(config, args.max_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "xrpilot-player",
            "--reference-space",
            "stage",
            "--blend-mode",
            "additive",
            "--extension",
            "XR_EXT_hand_tracking",
            "--extension",
            "XR_KHR_opengl_enable",
            "--layer",
            "XR_APILAYER_LUNARG_core_validation",
            "--no-context-shim",
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.reference_space, ReferenceSpaceKind::Stage);
        assert_eq!(config.blend_mode, BlendMode::Additive);
        assert_eq!(
            config.requested_extensions,
            vec!["XR_KHR_opengl_enable", "XR_EXT_hand_tracking"]
        );
        assert_eq!(config.requested_layers.len(), 1);
        assert!(!config.reassert_graphics_context);
    }

    #[test]
    fn test_unknown_reference_space_is_rejected() {
        let parsed = Args::try_parse_from(["xrpilot-player", "--reference-space", "floor"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_pattern_stages_every_view() {
        let mut pattern = TestPattern::new();
        let mut stager = FrameStager::new(2);
        pattern.produce(&[View::default(); 2], &[], &mut stager);
        assert!(stager.is_staged(0));
        assert!(stager.is_staged(1));
        let left = stager.take(0).unwrap();
        assert_eq!(left.data.len(), (PATTERN_SIZE * PATTERN_SIZE * 4) as usize);
        assert!(left.flip_vertical);
    }

    #[test]
    fn test_mock_run_completes() {
        let config = XrConfig {
            mirror_interval: 10,
            ..XrConfig::default()
        };
        run_mock(config, Some(12)).unwrap();
    }
}
