//! Conversions between `AudioFormat` and WAVEFORMATEX(TENSIBLE).

use std::ffi::c_void;
use std::mem;
use std::ptr;

use windows::core::GUID;
use windows::Win32::Media::Audio::{WAVEFORMATEX, WAVEFORMATEXTENSIBLE, WAVEFORMATEXTENSIBLE_0, WAVE_FORMAT_PCM};
use windows::Win32::Media::KernelStreaming::{
    KSAUDIO_SPEAKER_DIRECTOUT, KSAUDIO_SPEAKER_MONO, KSAUDIO_SPEAKER_STEREO, KSDATAFORMAT_SUBTYPE_PCM,
    WAVE_FORMAT_EXTENSIBLE,
};
use windows::Win32::Media::Multimedia::{KSDATAFORMAT_SUBTYPE_IEEE_FLOAT, WAVE_FORMAT_IEEE_FLOAT};
use windows::Win32::System::Com::CoTaskMemFree;

use audio_input_core::{AudioFormat, ChannelLayout, ClosestMatch, SampleKind};

/// Extensible descriptor for `format` with the given sample encoding.
pub(crate) fn extensible(format: &AudioFormat, kind: SampleKind) -> WAVEFORMATEXTENSIBLE {
    let block_align = format.block_align() as u16;
    WAVEFORMATEXTENSIBLE {
        Format: WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_EXTENSIBLE as u16,
            nChannels: format.channels,
            nSamplesPerSec: format.sample_rate,
            nAvgBytesPerSec: format.sample_rate * block_align as u32,
            nBlockAlign: block_align,
            wBitsPerSample: format.bits_per_sample,
            cbSize: (mem::size_of::<WAVEFORMATEXTENSIBLE>() - mem::size_of::<WAVEFORMATEX>()) as u16,
        },
        Samples: WAVEFORMATEXTENSIBLE_0 {
            wValidBitsPerSample: format.bits_per_sample,
        },
        dwChannelMask: channel_mask(format.layout),
        SubFormat: subformat(kind),
    }
}

pub(crate) fn channel_mask(layout: ChannelLayout) -> u32 {
    match layout {
        ChannelLayout::Mono => KSAUDIO_SPEAKER_MONO,
        ChannelLayout::Stereo => KSAUDIO_SPEAKER_STEREO,
        ChannelLayout::Discrete => KSAUDIO_SPEAKER_DIRECTOUT,
    }
}

fn subformat(kind: SampleKind) -> GUID {
    match kind {
        SampleKind::Pcm => KSDATAFORMAT_SUBTYPE_PCM,
        SampleKind::Float => KSDATAFORMAT_SUBTYPE_IEEE_FLOAT,
    }
}

/// Sample encoding named by a format tag, looking through to the subformat
/// for extensible descriptors.
pub(crate) fn sample_kind(tag: u32, subformat: Option<GUID>) -> Option<SampleKind> {
    match tag {
        WAVE_FORMAT_PCM => Some(SampleKind::Pcm),
        WAVE_FORMAT_IEEE_FLOAT => Some(SampleKind::Float),
        WAVE_FORMAT_EXTENSIBLE => match subformat? {
            sub if sub == KSDATAFORMAT_SUBTYPE_PCM => Some(SampleKind::Pcm),
            sub if sub == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT => Some(SampleKind::Float),
            _ => None,
        },
        _ => None,
    }
}

/// Closest-match format allocated by `IAudioClient::IsFormatSupported`.
///
/// Owns the COM allocation and frees it on drop.
pub(crate) struct ProposedFormat(pub(crate) *mut WAVEFORMATEX);

impl ProposedFormat {
    pub(crate) fn empty() -> Self {
        Self(ptr::null_mut())
    }

    /// Read the proposal. `None` when absent or not PCM/float.
    pub(crate) fn read(&self) -> Option<ClosestMatch> {
        if self.0.is_null() {
            return None;
        }
        // SAFETY: the pointer came from IsFormatSupported and is at least a
        // WAVEFORMATEX; extensible descriptors are tagged as such and carry
        // the full struct. Both are packed, so read unaligned copies.
        let base = unsafe { ptr::read_unaligned(self.0) };
        let tag = base.wFormatTag as u32;
        let subformat = if tag == WAVE_FORMAT_EXTENSIBLE {
            let ext = unsafe { ptr::read_unaligned(self.0 as *const WAVEFORMATEXTENSIBLE) };
            Some(ext.SubFormat)
        } else {
            None
        };
        let kind = sample_kind(tag, subformat)?;
        Some(ClosestMatch {
            sample_rate: base.nSamplesPerSec,
            bits_per_sample: base.wBitsPerSample,
            channels: base.nChannels,
            kind,
        })
    }
}

impl Drop for ProposedFormat {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CoTaskMemFree(Some(self.0 as *const c_void)) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_extensible_pcm() {
        let wave = extensible(&AudioFormat::new(48_000, 16, 2), SampleKind::Pcm);
        let format = wave.Format;
        assert_eq!(format.wFormatTag as u32, WAVE_FORMAT_EXTENSIBLE);
        assert_eq!(format.nBlockAlign, 4);
        assert_eq!(format.nAvgBytesPerSec, 192_000);
        assert_eq!(format.cbSize, 22);
        let mask = wave.dwChannelMask;
        assert_eq!(mask, KSAUDIO_SPEAKER_STEREO);
        let sub = wave.SubFormat;
        assert_eq!(sub, KSDATAFORMAT_SUBTYPE_PCM);
    }

    #[test]
    fn discrete_layouts_have_no_speaker_mask() {
        assert_eq!(channel_mask(ChannelLayout::Discrete), 0);
        assert_eq!(channel_mask(ChannelLayout::Mono), KSAUDIO_SPEAKER_MONO);
    }

    #[test]
    fn classifies_format_tags() {
        assert_eq!(sample_kind(WAVE_FORMAT_PCM, None), Some(SampleKind::Pcm));
        assert_eq!(sample_kind(WAVE_FORMAT_IEEE_FLOAT, None), Some(SampleKind::Float));
        assert_eq!(
            sample_kind(WAVE_FORMAT_EXTENSIBLE, Some(KSDATAFORMAT_SUBTYPE_IEEE_FLOAT)),
            Some(SampleKind::Float)
        );
        assert_eq!(sample_kind(WAVE_FORMAT_EXTENSIBLE, None), None);
        assert_eq!(sample_kind(0x0055, None), None);
    }

    #[test]
    fn reads_a_proposed_float_format() {
        let mut wave = extensible(&AudioFormat::new(44_100, 32, 2), SampleKind::Float);
        let proposal = ProposedFormat(&mut wave as *mut WAVEFORMATEXTENSIBLE as *mut WAVEFORMATEX);
        let closest = proposal.read();
        // Not a COM allocation; keep drop from freeing it.
        mem::forget(proposal);
        assert_eq!(
            closest,
            Some(ClosestMatch {
                sample_rate: 44_100,
                bits_per_sample: 32,
                channels: 2,
                kind: SampleKind::Float,
            })
        );
    }
}
