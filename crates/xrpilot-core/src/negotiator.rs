//! Capability negotiation: instance creation and system selection.

use tracing::{debug, info, warn};

use crate::runtime::{InstanceCreateInfo, XrRuntime};
use crate::types::{
    BlendMode, FormFactor, InstanceHandle, RuntimeProperties, SystemId, SystemProperties,
    ViewConfigurationProperties, ViewConfigurationType, ViewConfigurationView,
};
use crate::{Capability, XrError, XrResult};

#[derive(Debug, Clone)]
pub struct NegotiatedInstance {
    pub handle: InstanceHandle,
    pub properties: RuntimeProperties,
    pub layers: Vec<String>,
    pub extensions: Vec<String>,
}

/// A selected device with its negotiated blend mode and view configuration.
#[derive(Debug, Clone)]
pub struct NegotiatedSystem {
    pub id: SystemId,
    pub form_factor: FormFactor,
    pub blend_mode: BlendMode,
    pub view_configuration_type: ViewConfigurationType,
    pub view_configuration_properties: ViewConfigurationProperties,
    /// One descriptor per view; its length fixes every per-view array.
    pub views: Vec<ViewConfigurationView>,
    pub properties: SystemProperties,
}

impl NegotiatedSystem {
    pub fn view_count(&self) -> usize {
        self.views.len()
    }
}

fn require_all(
    requested: &[String],
    available: &[String],
    what: &str,
    capability: fn(String) -> Capability,
) -> XrResult<()> {
    debug!(?available, "available {what}s");
    for name in requested {
        if !available.iter().any(|candidate| candidate == name) {
            warn!("requested {what} {name} is not offered by the runtime");
            return Err(XrError::CapabilityUnavailable(capability(name.clone())));
        }
        info!("enabling {what} {name}");
    }
    Ok(())
}

pub fn create_instance<R: XrRuntime + ?Sized>(
    runtime: &mut R,
    application_name: &str,
    engine_name: &str,
    requested_layers: &[String],
    requested_extensions: &[String],
) -> XrResult<NegotiatedInstance> {
    let available_layers = runtime.enumerate_layers()?;
    require_all(requested_layers, &available_layers, "layer", Capability::Layer)?;

    let available_extensions = runtime.enumerate_extensions()?;
    require_all(
        requested_extensions,
        &available_extensions,
        "extension",
        Capability::Extension,
    )?;

    let handle = runtime.create_instance(&InstanceCreateInfo {
        application_name,
        engine_name,
        layers: requested_layers,
        extensions: requested_extensions,
    })?;
    let properties = runtime.instance_properties(handle)?;
    info!(
        runtime = %properties.runtime_name,
        version = %properties.runtime_version,
        "XR instance created"
    );

    Ok(NegotiatedInstance {
        handle,
        properties,
        layers: requested_layers.to_vec(),
        extensions: requested_extensions.to_vec(),
    })
}

pub fn select_system<R: XrRuntime + ?Sized>(
    runtime: &mut R,
    instance: InstanceHandle,
    form_factor: FormFactor,
    blend_mode: BlendMode,
    view_configuration_type: ViewConfigurationType,
) -> XrResult<NegotiatedSystem> {
    let id = runtime.get_system(instance, form_factor)?;
    let properties = runtime.system_properties(instance, id)?;
    info!(
        system = %properties.system_name,
        vendor_id = properties.vendor_id,
        max_swapchain = %format!("{}x{}", properties.max_swapchain_width, properties.max_swapchain_height),
        max_layers = properties.max_layer_count,
        orientation_tracking = properties.orientation_tracking,
        position_tracking = properties.position_tracking,
        "XR system selected"
    );

    let configurations = runtime.enumerate_view_configurations(instance, id)?;
    if !configurations.contains(&view_configuration_type) {
        warn!(
            requested = %view_configuration_type,
            ?configurations,
            "view configuration not offered by the system"
        );
        return Err(XrError::CapabilityUnavailable(Capability::ViewConfiguration(
            view_configuration_type,
        )));
    }
    let view_configuration_properties =
        runtime.view_configuration_properties(instance, id, view_configuration_type)?;

    let views = runtime.enumerate_view_configuration_views(instance, id, view_configuration_type)?;
    if views.is_empty() {
        return Err(XrError::CapabilityUnavailable(Capability::ViewConfiguration(
            view_configuration_type,
        )));
    }
    for (index, view) in views.iter().enumerate() {
        info!(
            index,
            recommended = %format!("{}x{}", view.recommended_width, view.recommended_height),
            max = %format!("{}x{}", view.max_width, view.max_height),
            samples = view.recommended_sample_count,
            "view configuration view"
        );
    }

    let blend_modes = runtime.enumerate_blend_modes(instance, id, view_configuration_type)?;
    debug!(?blend_modes, "environment blend modes");
    if !blend_modes.contains(&blend_mode) {
        warn!(requested = %blend_mode, ?blend_modes, "blend mode not offered by the system");
        return Err(XrError::CapabilityUnavailable(Capability::BlendMode(blend_mode)));
    }

    Ok(NegotiatedSystem {
        id,
        form_factor,
        blend_mode,
        view_configuration_type,
        view_configuration_properties,
        views,
        properties,
    })
}
