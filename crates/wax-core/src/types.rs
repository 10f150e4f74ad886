//! Core audio types and numeric constants shared across the engine

/// Audio sample type used throughout the render path
pub type Sample = f32;

/// Default sample rate in Hz, used until a device reports its real rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Float ceiling used when converting to 16-bit output.
///
/// Slightly inside the true i16 range so the final clamp leaves a little
/// headroom for downstream device processing. Source samples are
/// normalized by dividing by the same constant, so a full-scale source
/// sample maps back to exactly full scale in the mix.
pub const INT16_CEILING: Sample = 32765.0;

/// Symmetric negative counterpart of [`INT16_CEILING`]
pub const INT16_FLOOR: Sample = -32765.0;

/// Stable identifier for a turntable within one [`Mixer`](crate::engine::Mixer).
///
/// Identifiers are never reused after a turntable is removed, so control
/// surfaces can hold them across removals without aliasing a new table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurntableId(pub u32);

impl std::fmt::Display for TurntableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "turntable {}", self.0)
    }
}

/// Clamp a mix sample into the representable output range
#[inline]
pub fn clamp_to_output(value: Sample) -> Sample {
    if value < INT16_FLOOR {
        INT16_FLOOR
    } else if value > INT16_CEILING {
        INT16_CEILING
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_passes_in_range() {
        assert_eq!(clamp_to_output(0.0), 0.0);
        assert_eq!(clamp_to_output(1234.5), 1234.5);
        assert_eq!(clamp_to_output(-9999.0), -9999.0);
    }

    #[test]
    fn test_clamp_limits_out_of_range() {
        assert_eq!(clamp_to_output(40000.0), INT16_CEILING);
        assert_eq!(clamp_to_output(-40000.0), INT16_FLOOR);
    }

    #[test]
    fn test_ceiling_fits_i16() {
        assert!((INT16_CEILING as i32) <= i16::MAX as i32);
        assert!((INT16_FLOOR as i32) >= i16::MIN as i32);
    }
}
