//! Agreeing on a native capture format with the engine.

use crate::models::audio_format::{AudioFormat, ChannelLayout, SampleKind};
use crate::models::error::CaptureError;
use crate::traits::audio_engine::{AudioEngine, FormatSupport};

/// Outcome of format negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    /// Format the engine will be initialized with.
    pub native: AudioFormat,
    /// `native` differs from what the consumer asked for.
    pub needs_conversion: bool,
}

/// Settle on a native format for `desired`.
///
/// Uses `desired` directly when the engine accepts it. Otherwise adopts the
/// engine's closest match (its channel count and rate, and its bit depth only
/// when it is fixed-point) after checking that the converter can consume it.
pub fn negotiate<E>(engine: &mut E, desired: &AudioFormat) -> Result<Negotiation, CaptureError>
where
    E: AudioEngine + ?Sized,
{
    let support = engine
        .is_format_supported(desired)
        .map_err(|e| CaptureError::FormatUnsupported(e.to_string()))?;

    match support {
        FormatSupport::Supported => Ok(Negotiation {
            native: *desired,
            needs_conversion: false,
        }),
        FormatSupport::ClosestMatch(closest) => {
            let bits_per_sample = match closest.kind {
                SampleKind::Pcm => closest.bits_per_sample,
                // Float captures are requested as fixed-point at the desired depth.
                SampleKind::Float => desired.bits_per_sample,
            };
            let native = AudioFormat {
                sample_rate: closest.sample_rate,
                bits_per_sample,
                channels: closest.channels,
                layout: ChannelLayout::guess(closest.channels).unwrap_or(ChannelLayout::Discrete),
            };

            native.validate_for_conversion().map_err(|reason| {
                log::warn!("closest match {} rejected: {}", native, reason);
                CaptureError::FormatUnsupported(format!("closest match {} rejected: {}", native, reason))
            })?;

            log::info!("requested {} unsupported, capturing {} with conversion", desired, native);
            Ok(Negotiation {
                native,
                needs_conversion: true,
            })
        }
        FormatSupport::Unsupported => Err(CaptureError::FormatUnsupported(format!(
            "{} and no alternative offered",
            desired
        ))),
    }
}
