// SPDX-License-Identifier: MPL-2.0
//! Container probing, stream enumeration, and policy-driven decoder opening.
//!
//! Each decode loop opens its own container handle through this module:
//! container reads are not thread-safe, so the loops never share one. The
//! probe is bounded (probe size and analysis duration) to keep startup
//! latency low.

use crate::config::{DecoderCandidate, DecoderPolicy, EngineOptions};
use crate::error::{Error, MediaError, Result};
use crate::time_units;
use crate::tracks::TrackDescriptor;
use ffmpeg_next::codec::Capabilities;
use ffmpeg_next::{codec, format, media, Dictionary};
use log::debug;
use std::path::Path;
use std::sync::Once;

/// Static flag to ensure FFmpeg is initialized only once.
static FFMPEG_INIT: Once = Once::new();

/// Initialize FFmpeg with appropriate log level.
///
/// This function is safe to call multiple times - initialization will only
/// happen once thanks to `std::sync::Once`. It sets the FFmpeg log level
/// to ERROR to suppress noisy per-file warnings.
pub fn init_ffmpeg() -> Result<()> {
    let mut init_result: Result<()> = Ok(());

    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            init_result = Err(Error::Media(MediaError::Other(format!(
                "FFmpeg initialization failed: {e}"
            ))));
            return;
        }

        // SAFETY: av_log_set_level is thread-safe and only affects logging
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_ERROR);
        }
    });

    init_result
}

/// Opens a container with a bounded probe.
///
/// # Errors
///
/// Returns `MediaError::OpenFailed` when the file does not exist or the
/// container cannot be parsed.
pub fn open_input(path: &Path, options: &EngineOptions) -> Result<format::context::Input> {
    init_ffmpeg()?;

    if !path.exists() {
        return Err(Error::Media(MediaError::OpenFailed(format!(
            "file not found: {}",
            path.display()
        ))));
    }

    let mut probe = Dictionary::new();
    probe.set("probesize", &options.probe_size.to_string());
    probe.set("analyzeduration", &options.analyze_duration_us.to_string());

    format::input_with(path, probe).map_err(|e| {
        Error::Media(MediaError::OpenFailed(format!(
            "{}: {}",
            path.display(),
            e
        )))
    })
}

/// Container duration in milliseconds, 0 when unknown.
#[must_use]
pub fn duration_ms(input: &format::context::Input) -> i64 {
    time_units::duration_us_to_ms(input.duration())
}

/// Enumerates all streams of one media type into an ordered descriptor
/// list, carrying language tags from stream metadata.
#[must_use]
pub fn enumerate_tracks(input: &format::context::Input, medium: media::Type) -> Vec<TrackDescriptor> {
    let mut list = Vec::new();
    for stream in input.streams() {
        if stream.parameters().medium() != medium {
            continue;
        }
        let metadata = stream.metadata();
        let language = metadata.get("language");
        list.push(TrackDescriptor::new(
            stream.index(),
            list.len() + 1,
            language,
        ));
    }
    debug!("enumerated {} {:?} track(s)", list.len(), medium);
    list
}

/// Finds a decoder for `codec_id` acceptable to the configured policy.
///
/// FFmpeg's lookup already prefers the plain software decoder for a codec
/// id; the policy then vets its capabilities (the default rejects
/// hardware-only and experimental decoders).
pub fn find_decoder(
    codec_id: codec::Id,
    medium: media::Type,
    policy: &DecoderPolicy,
) -> Result<codec::Codec> {
    let found = ffmpeg_next::decoder::find(codec_id).ok_or_else(|| {
        Error::Media(MediaError::NoDecoder(format!(
            "no decoder for codec {:?}",
            codec_id
        )))
    })?;

    if found.medium() != medium {
        return Err(Error::Media(MediaError::NoDecoder(format!(
            "decoder '{}' is not a {:?} decoder",
            found.name(),
            medium
        ))));
    }

    let capabilities = found.capabilities();
    let candidate = DecoderCandidate {
        name: found.name(),
        is_hardware: capabilities.contains(Capabilities::HARDWARE),
        is_experimental: capabilities.contains(Capabilities::EXPERIMENTAL),
    };
    if !policy(&candidate) {
        return Err(Error::Media(MediaError::NoDecoder(format!(
            "decoder '{}' rejected by policy",
            found.name()
        ))));
    }

    debug!("selected decoder '{}' for {:?}", found.name(), codec_id);
    Ok(found)
}

/// Opens a video decoder for a stream, honoring the decoder policy.
pub fn open_video_decoder(
    stream: &format::stream::Stream<'_>,
    policy: &DecoderPolicy,
) -> Result<ffmpeg_next::decoder::Video> {
    let parameters = stream.parameters();
    let found = find_decoder(parameters.id(), media::Type::Video, policy)?;

    let mut context = codec::context::Context::new_with_codec(found);
    context.set_parameters(parameters)?;
    context
        .decoder()
        .video()
        .map_err(|e| Error::Media(MediaError::DecodingFailed(format!(
            "failed to open video decoder: {e}"
        ))))
}

/// Opens an audio decoder for a stream, honoring the decoder policy.
pub fn open_audio_decoder(
    stream: &format::stream::Stream<'_>,
    policy: &DecoderPolicy,
) -> Result<ffmpeg_next::decoder::Audio> {
    let parameters = stream.parameters();
    let found = find_decoder(parameters.id(), media::Type::Audio, policy)?;

    let mut context = codec::context::Context::new_with_codec(found);
    context.set_parameters(parameters)?;
    context
        .decoder()
        .audio()
        .map_err(|e| Error::Media(MediaError::DecodingFailed(format!(
            "failed to open audio decoder: {e}"
        ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn init_ffmpeg_is_idempotent() {
        assert!(init_ffmpeg().is_ok());
        assert!(init_ffmpeg().is_ok());
    }

    #[test]
    fn open_input_fails_for_nonexistent_file() {
        let options = EngineOptions::default();
        let result = open_input(Path::new("/nonexistent/video.mp4"), &options);
        assert!(matches!(
            result,
            Err(Error::Media(MediaError::OpenFailed(_)))
        ));
    }

    #[test]
    fn open_input_fails_for_garbage_data() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("garbage.mp4");
        std::fs::write(&path, b"this is not a media container").unwrap();

        let options = EngineOptions::default();
        let result = open_input(&path, &options);
        assert!(result.is_err());
    }

    #[test]
    fn find_decoder_locates_common_software_codecs() {
        init_ffmpeg().unwrap();
        let policy = crate::config::software_decoder_policy();

        let h264 = find_decoder(codec::Id::H264, media::Type::Video, &policy);
        assert!(h264.is_ok());

        let aac = find_decoder(codec::Id::AAC, media::Type::Audio, &policy);
        assert!(aac.is_ok());
    }

    #[test]
    fn find_decoder_rejects_wrong_medium() {
        init_ffmpeg().unwrap();
        let policy = crate::config::software_decoder_policy();

        let result = find_decoder(codec::Id::H264, media::Type::Audio, &policy);
        assert!(matches!(
            result,
            Err(Error::Media(MediaError::NoDecoder(_)))
        ));
    }

    #[test]
    fn find_decoder_honors_rejecting_policy() {
        init_ffmpeg().unwrap();
        let reject_all: DecoderPolicy = std::sync::Arc::new(|_| false);

        let result = find_decoder(codec::Id::H264, media::Type::Video, &reject_all);
        assert!(matches!(
            result,
            Err(Error::Media(MediaError::NoDecoder(_)))
        ));
    }
}
