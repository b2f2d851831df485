//! # Audio Container Detection
//!
//! Classifies an audio payload by its leading magic bytes so the
//! transcription request can carry the right content type. Browsers record
//! with `MediaRecorder` into WebM by default, so anything unrecognized is
//! treated as WebM rather than rejected.

/// Audio container formats the transcription service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Webm,
    Ogg,
    Flac,
    Mp3,
    Mp4,
}

impl AudioFormat {
    /// Classify a payload by its header bytes.
    pub fn detect(audio: &[u8]) -> AudioFormat {
        if audio.len() < 12 {
            return AudioFormat::Webm;
        }

        // WAV: RIFF....WAVE
        if &audio[..4] == b"RIFF" && &audio[8..12] == b"WAVE" {
            return AudioFormat::Wav;
        }

        // WebM/Matroska: EBML header
        if audio[..4] == [0x1a, 0x45, 0xdf, 0xa3] {
            return AudioFormat::Webm;
        }

        if &audio[..4] == b"OggS" {
            return AudioFormat::Ogg;
        }

        if &audio[..4] == b"fLaC" {
            return AudioFormat::Flac;
        }

        // MP3: ID3 tag or an MPEG frame-sync pattern
        if &audio[..3] == b"ID3" || (audio[0] == 0xff && audio[1] & 0xe0 == 0xe0) {
            return AudioFormat::Mp3;
        }

        // MP4/M4A: ftyp box at offset 4
        if &audio[4..8] == b"ftyp" {
            return AudioFormat::Mp4;
        }

        AudioFormat::Webm
    }

    /// MIME type sent as the request content type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Webm => "audio/webm",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Mp3 => "audio/mp3",
            AudioFormat::Mp4 => "audio/mp4",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(header: &[u8]) -> Vec<u8> {
        let mut bytes = header.to_vec();
        bytes.resize(32, 0);
        bytes
    }

    #[test]
    fn test_detect_wav() {
        let mut bytes = padded(b"RIFF\x24\x08\x00\x00WAVE");
        bytes[8..12].copy_from_slice(b"WAVE");
        assert_eq!(AudioFormat::detect(&bytes), AudioFormat::Wav);
    }

    #[test]
    fn test_detect_webm_ebml() {
        let bytes = padded(&[0x1a, 0x45, 0xdf, 0xa3]);
        assert_eq!(AudioFormat::detect(&bytes), AudioFormat::Webm);
    }

    #[test]
    fn test_detect_ogg() {
        assert_eq!(AudioFormat::detect(&padded(b"OggS")), AudioFormat::Ogg);
    }

    #[test]
    fn test_detect_flac() {
        assert_eq!(AudioFormat::detect(&padded(b"fLaC")), AudioFormat::Flac);
    }

    #[test]
    fn test_detect_mp3_id3() {
        assert_eq!(AudioFormat::detect(&padded(b"ID3\x04")), AudioFormat::Mp3);
    }

    #[test]
    fn test_detect_mp3_frame_sync() {
        let bytes = padded(&[0xff, 0xfb, 0x90, 0x00]);
        assert_eq!(AudioFormat::detect(&bytes), AudioFormat::Mp3);
    }

    #[test]
    fn test_detect_mp4_ftyp() {
        let mut bytes = padded(&[0x00, 0x00, 0x00, 0x20]);
        bytes[4..8].copy_from_slice(b"ftyp");
        assert_eq!(AudioFormat::detect(&bytes), AudioFormat::Mp4);
    }

    #[test]
    fn test_unknown_defaults_to_webm() {
        assert_eq!(
            AudioFormat::detect(&padded(b"\x00\x01\x02\x03")),
            AudioFormat::Webm
        );
    }

    #[test]
    fn test_short_payload_defaults_to_webm() {
        assert_eq!(AudioFormat::detect(b"OggS"), AudioFormat::Webm);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(AudioFormat::Wav.mime_type(), "audio/wav");
        assert_eq!(AudioFormat::Webm.mime_type(), "audio/webm");
    }
}
