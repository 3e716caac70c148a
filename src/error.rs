// SPDX-License-Identifier: MPL-2.0
use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    Io(String),
    Media(MediaError),
}

/// Specific error types for media decoding and playback issues.
/// Used to provide user-friendly error messages for fatal-per-session
/// failures surfaced through the `Error` output event.
#[derive(Debug, Clone)]
pub enum MediaError {
    /// Container could not be opened or parsed
    OpenFailed(String),

    /// Container opened but stream information is unavailable
    NoStreamInfo,

    /// No decoder accepted by the configured policy for this codec
    NoDecoder(String),

    /// Codec is known but not supported by the linked FFmpeg
    UnsupportedCodec(String),

    /// File appears corrupted or has invalid data
    CorruptedFile,

    /// Decoding failed during playback
    DecodingFailed(String),

    /// I/O error (file not found, permission denied, etc.)
    IoError(String),

    /// Generic error with raw message
    Other(String),
}

impl MediaError {
    /// Attempts to parse a raw error message into a specific `MediaError`.
    /// This is used to categorize errors coming out of FFmpeg before they
    /// reach the host through the `Error` event.
    pub fn from_message(msg: &str) -> Self {
        let msg_lower = msg.to_lowercase();

        // Check codec/decoder errors first (they might contain "not found")
        if msg_lower.contains("codec") || msg_lower.contains("decoder") {
            if let Some(codec) = Self::extract_codec_name(&msg_lower) {
                return MediaError::UnsupportedCodec(codec);
            } else if msg_lower.contains("not found") || msg_lower.contains("unsupported") {
                return MediaError::NoDecoder(msg.to_string());
            }
        }

        // I/O errors (file access issues)
        if msg_lower.contains("no such file")
            || (msg_lower.contains("not found") && !msg_lower.contains("decoder"))
            || msg_lower.contains("permission denied")
            || msg_lower.contains("i/o error")
        {
            return MediaError::IoError(msg.to_string());
        }

        // Corrupted or unparseable input
        if msg_lower.contains("corrupt")
            || msg_lower.contains("invalid data")
            || msg_lower.contains("malformed")
        {
            return MediaError::CorruptedFile;
        }

        // Decoding failures
        if msg_lower.contains("packet")
            || msg_lower.contains("scaling")
            || msg_lower.contains("resampl")
            || msg_lower.contains("seek")
            || msg_lower.contains("decode")
            || msg_lower.contains("unsupported")
        {
            return MediaError::DecodingFailed(msg.to_string());
        }

        MediaError::Other(msg.to_string())
    }

    /// Tries to extract a codec name from an error message.
    fn extract_codec_name(msg: &str) -> Option<String> {
        // Common patterns: "codec 'xyz' not found", "decoder xyz not found"
        let codecs = [
            "h264", "hevc", "h265", "vp8", "vp9", "av1", "mpeg4", "mpeg2", "aac", "opus", "ac3",
        ];
        for codec in codecs {
            if msg.contains(codec) {
                return Some(codec.to_uppercase());
            }
        }
        None
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::OpenFailed(msg) => write!(f, "Failed to open media: {}", msg),
            MediaError::NoStreamInfo => write!(f, "No stream information available"),
            MediaError::NoDecoder(msg) => write!(f, "No usable decoder: {}", msg),
            MediaError::UnsupportedCodec(codec) => {
                write!(f, "Unsupported codec: {}", codec)
            }
            MediaError::CorruptedFile => write!(f, "Media file is corrupted"),
            MediaError::DecodingFailed(msg) => write!(f, "Decoding failed: {}", msg),
            MediaError::IoError(msg) => write!(f, "I/O error: {}", msg),
            MediaError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O Error: {}", e),
            Error::Media(e) => write!(f, "Media Error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<MediaError> for Error {
    fn from(err: MediaError) -> Self {
        Error::Media(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<ffmpeg_next::Error> for Error {
    fn from(err: ffmpeg_next::Error) -> Self {
        Error::Media(MediaError::from_message(&err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
