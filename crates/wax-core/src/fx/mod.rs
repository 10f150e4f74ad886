//! Per-turntable effect chains
//!
//! Every chain element — builtin or plugin-backed — answers the same four
//! operations: activate, deactivate, run, enabled-query. Chain iteration
//! never special-cases the builtins; the lowpass and echo are simply
//! slots that are always present and cannot be removed.

mod echo;
mod external;
mod lowpass;

pub use echo::Echo;
pub use external::{
    EffectId, ExternalFx, ExternalPlugin, PortHint, PortInfo, StereoExternalPlugin, StereoFx,
};
pub use lowpass::Lowpass;

#[cfg(test)]
pub(crate) use external::test_support;

use crate::types::Sample;

/// One element of a turntable's mono effect chain
#[derive(Debug)]
pub enum FxSlot {
    Lowpass(Lowpass),
    Echo(Echo),
    External(ExternalFx),
}

impl FxSlot {
    pub fn is_enabled(&self) -> bool {
        match self {
            FxSlot::Lowpass(lp) => lp.enabled,
            FxSlot::Echo(ec) => ec.enabled,
            FxSlot::External(fx) => fx.enabled,
        }
    }

    /// Called when the owning turntable starts playing
    pub fn activate(&mut self) {
        match self {
            FxSlot::Lowpass(lp) => lp.reset(),
            FxSlot::Echo(_) => {}
            FxSlot::External(fx) => fx.activate(),
        }
    }

    /// Called when the owning turntable stops; the echo clears its ring
    /// here so stale repeats cannot bleed into a later retrigger
    pub fn deactivate(&mut self) {
        match self {
            FxSlot::Lowpass(_) => {}
            FxSlot::Echo(ec) => ec.clear(),
            FxSlot::External(fx) => fx.deactivate(),
        }
    }

    /// Process one block. The echo reads the dry buffer and fills its wet
    /// side buffer; everything else filters in place.
    pub fn run(&mut self, buffer: &mut [Sample]) {
        match self {
            FxSlot::Lowpass(lp) => lp.run(buffer),
            FxSlot::Echo(ec) => ec.run(buffer),
            FxSlot::External(fx) => fx.run(buffer),
        }
    }

    /// Re-size any block-dependent internal buffers
    pub fn set_block_size(&mut self, block: usize) {
        if let FxSlot::Echo(ec) = self {
            ec.set_block_size(block);
        }
    }

    pub fn label(&self) -> &str {
        match self {
            FxSlot::Lowpass(_) => "Lowpass",
            FxSlot::Echo(_) => "Echo",
            FxSlot::External(fx) => fx.label(),
        }
    }

    /// Identifier of the wrapped external effect, if this slot is one
    pub fn external_id(&self) -> Option<EffectId> {
        match self {
            FxSlot::External(fx) => Some(fx.id),
            _ => None,
        }
    }
}
