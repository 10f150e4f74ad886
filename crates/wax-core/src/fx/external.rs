//! External (plugin-backed) effects
//!
//! The engine does not host any particular plugin standard itself; it
//! defines the contract a host wrapper must satisfy: control-port
//! metadata, lifecycle hooks, and an in-place `run` over the shared
//! block buffer. Mono effects run inside the per-turntable chain; stereo
//! effects run after the mono buffer has been split into left/right.

use crate::types::Sample;

/// Presentation hint for a control port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortHint {
    Float,
    Integer,
    Toggle,
}

/// Fallback bound for ports that declare no range of their own
const UNBOUNDED_PORT_LIMIT: f32 = 22100.0;

/// Metadata for one control port of an external effect
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub lower: f32,
    pub upper: f32,
    pub hint: PortHint,
    /// Bounds are expressed as a fraction of the sample rate and must be
    /// scaled before presentation
    pub sample_rate_scaled: bool,
    pub default: f32,
}

impl PortInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lower: -UNBOUNDED_PORT_LIMIT,
            upper: UNBOUNDED_PORT_LIMIT,
            hint: PortHint::Float,
            sample_rate_scaled: false,
            default: 0.0,
        }
    }

    pub fn with_range(mut self, lower: f32, upper: f32) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn with_default(mut self, default: f32) -> Self {
        self.default = default;
        self
    }

    pub fn toggle(mut self) -> Self {
        self.hint = PortHint::Toggle;
        self
    }

    pub fn integer(mut self) -> Self {
        self.hint = PortHint::Integer;
        self
    }

    pub fn sample_rate_scaled(mut self) -> Self {
        self.sample_rate_scaled = true;
        self
    }
}

/// Contract for a mono external effect
///
/// `run` receives the current control values (same order as
/// `control_ports`) and processes the block in place; the same backing
/// store is both input and output, which is valid because effects here
/// are sample-local and need no lookahead.
pub trait ExternalPlugin: Send {
    fn label(&self) -> &str;
    fn control_ports(&self) -> Vec<PortInfo>;
    fn activate(&mut self) {}
    fn deactivate(&mut self) {}
    fn run(&mut self, controls: &[f32], buffer: &mut [Sample]);
}

/// Contract for a stereo external effect, run after the mono split
pub trait StereoExternalPlugin: Send {
    fn label(&self) -> &str;
    fn control_ports(&self) -> Vec<PortInfo>;
    fn activate(&mut self) {}
    fn deactivate(&mut self) {}
    fn run(&mut self, controls: &[f32], left: &mut [Sample], right: &mut [Sample]);
}

/// Identifier for an effect instance within one turntable's chains.
/// Stable across chain reordering, unlike a chain index.
pub type EffectId = u32;

/// A mono plugin instance wired into a turntable chain
pub struct ExternalFx {
    pub id: EffectId,
    pub enabled: bool,
    label: String,
    ports: Vec<PortInfo>,
    controls: Vec<f32>,
    plugin: Box<dyn ExternalPlugin>,
}

impl ExternalFx {
    pub fn new(id: EffectId, plugin: Box<dyn ExternalPlugin>) -> Self {
        let ports = plugin.control_ports();
        let controls = ports.iter().map(|p| p.default).collect();
        Self {
            id,
            enabled: false,
            label: plugin.label().to_string(),
            ports,
            controls,
            plugin,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    pub fn control(&self, port: usize) -> f32 {
        self.controls.get(port).copied().unwrap_or(0.0)
    }

    pub fn set_control(&mut self, port: usize, value: f32) {
        if let Some(slot) = self.controls.get_mut(port) {
            *slot = value;
        } else {
            log::warn!("{}: no control port {}", self.label, port);
        }
    }

    pub fn activate(&mut self) {
        self.plugin.activate();
    }

    pub fn deactivate(&mut self) {
        self.plugin.deactivate();
    }

    pub fn run(&mut self, buffer: &mut [Sample]) {
        self.plugin.run(&self.controls, buffer);
    }
}

impl std::fmt::Debug for ExternalFx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalFx")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// A stereo plugin instance, kept in the turntable's stereo chain
pub struct StereoFx {
    pub id: EffectId,
    pub enabled: bool,
    label: String,
    ports: Vec<PortInfo>,
    controls: Vec<f32>,
    plugin: Box<dyn StereoExternalPlugin>,
}

impl StereoFx {
    pub fn new(id: EffectId, plugin: Box<dyn StereoExternalPlugin>) -> Self {
        let ports = plugin.control_ports();
        let controls = ports.iter().map(|p| p.default).collect();
        Self {
            id,
            enabled: false,
            label: plugin.label().to_string(),
            ports,
            controls,
            plugin,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    pub fn control(&self, port: usize) -> f32 {
        self.controls.get(port).copied().unwrap_or(0.0)
    }

    pub fn set_control(&mut self, port: usize, value: f32) {
        if let Some(slot) = self.controls.get_mut(port) {
            *slot = value;
        } else {
            log::warn!("{}: no control port {}", self.label, port);
        }
    }

    pub fn activate(&mut self) {
        self.plugin.activate();
    }

    pub fn deactivate(&mut self) {
        self.plugin.deactivate();
    }

    pub fn run(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        self.plugin.run(&self.controls, left, right);
    }
}

impl std::fmt::Debug for StereoFx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StereoFx")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Multiplies the buffer by its single "amount" control
    pub struct GainPlugin {
        pub activations: usize,
    }

    impl GainPlugin {
        pub fn new() -> Self {
            Self { activations: 0 }
        }
    }

    impl ExternalPlugin for GainPlugin {
        fn label(&self) -> &str {
            "Test Gain"
        }

        fn control_ports(&self) -> Vec<PortInfo> {
            vec![PortInfo::new("Amount").with_range(0.0, 2.0).with_default(1.0)]
        }

        fn activate(&mut self) {
            self.activations += 1;
        }

        fn run(&mut self, controls: &[f32], buffer: &mut [Sample]) {
            let amount = controls[0];
            for s in buffer.iter_mut() {
                *s *= amount;
            }
        }
    }

    /// Swaps channels, for exercising the stereo chain
    pub struct SwapPlugin;

    impl StereoExternalPlugin for SwapPlugin {
        fn label(&self) -> &str {
            "Test Swap"
        }

        fn control_ports(&self) -> Vec<PortInfo> {
            Vec::new()
        }

        fn run(&mut self, _controls: &[f32], left: &mut [Sample], right: &mut [Sample]) {
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                std::mem::swap(l, r);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::GainPlugin;
    use super::*;

    #[test]
    fn test_controls_default_from_ports() {
        let fx = ExternalFx::new(1, Box::new(GainPlugin::new()));
        assert_eq!(fx.control(0), 1.0);
        assert_eq!(fx.ports().len(), 1);
    }

    #[test]
    fn test_run_uses_current_controls() {
        let mut fx = ExternalFx::new(1, Box::new(GainPlugin::new()));
        fx.set_control(0, 0.5);

        let mut buf = vec![1.0_f32; 8];
        fx.run(&mut buf);
        assert!(buf.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_out_of_range_port_ignored() {
        let mut fx = ExternalFx::new(1, Box::new(GainPlugin::new()));
        fx.set_control(7, 3.0);
        assert_eq!(fx.control(7), 0.0);
    }
}
