use base64::Engine;
use lingua_core::client::{AudioClip, SpeechAudio};
use tracing::warn;

/// Upper bound for one uploaded student recording, after decoding.
pub const MAX_CLIP_BYTES: usize = 10 * 1024 * 1024;

/// Request body limit for routes that carry a base64 clip plus its JSON fields.
pub const MAX_AUDIO_BODY_BYTES: usize = MAX_CLIP_BYTES / 3 * 4 + 64 * 1024;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClipError {
    #[error("audio is not valid base64: {0}")]
    Encoding(String),
    #[error("audio is empty")]
    Empty,
    #[error("audio is {0} bytes, the limit is {MAX_CLIP_BYTES}")]
    TooLarge(usize),
}

/// Decodes a base64 student recording. Browsers record webm/opus unless told
/// otherwise, so that is the default MIME type.
pub fn decode_clip(base64_audio: &str, mime_type: Option<&str>) -> Result<AudioClip, ClipError> {
    // Accept data URLs as produced by FileReader.readAsDataURL.
    let payload = match base64_audio.split_once(";base64,") {
        Some((_, data)) => data,
        None => base64_audio,
    };
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ClipError::Encoding(e.to_string()))?;
    if data.is_empty() {
        return Err(ClipError::Empty);
    }
    if data.len() > MAX_CLIP_BYTES {
        return Err(ClipError::TooLarge(data.len()));
    }

    Ok(match mime_type.map(str::trim).filter(|m| !m.is_empty()) {
        Some(mime) => AudioClip {
            mime_type: mime.to_string(),
            data,
        },
        None => AudioClip::webm(data),
    })
}

/// Wraps synthesized PCM as a WAV file and base64-encodes it for JSON transport.
/// Audio that cannot be wrapped is dropped and the response stays text-only.
pub fn encode_wav_base64(audio: &SpeechAudio) -> Option<String> {
    match audio.to_wav() {
        Ok(wav) => Some(base64::engine::general_purpose::STANDARD.encode(wav)),
        Err(e) => {
            warn!(error = %e, "Dropping synthesized audio");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingua_core::audio::WAV_HEADER_LEN;

    #[test]
    fn test_decode_clip_defaults_to_webm() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let clip = decode_clip(&encoded, None).unwrap();
        assert_eq!(clip.data, vec![1, 2, 3]);
        assert_eq!(clip.mime_type, AudioClip::DEFAULT_MIME_TYPE);

        let clip = decode_clip(&encoded, Some("audio/wav")).unwrap();
        assert_eq!(clip.mime_type, "audio/wav");
    }

    #[test]
    fn test_decode_clip_accepts_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([9u8, 8]);
        let url = format!("data:audio/webm;codecs=opus;base64,{}", encoded);
        let clip = decode_clip(&url, None).unwrap();
        assert_eq!(clip.data, vec![9, 8]);
    }

    #[test]
    fn test_decode_clip_errors() {
        assert!(matches!(
            decode_clip("not base64!!", None),
            Err(ClipError::Encoding(_))
        ));
        assert_eq!(decode_clip("", None), Err(ClipError::Empty));
    }

    #[test]
    fn test_encode_wav_base64() {
        let audio = SpeechAudio {
            pcm: vec![0, 1, 2, 3],
            sample_rate: 24000,
        };
        let wav = base64::engine::general_purpose::STANDARD
            .decode(encode_wav_base64(&audio).unwrap())
            .unwrap();
        assert_eq!(wav.len(), WAV_HEADER_LEN + 4);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[WAV_HEADER_LEN..], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_encode_wav_base64_drops_unwrappable_audio() {
        let audio = SpeechAudio {
            pcm: vec![0, 0],
            sample_rate: 0,
        };
        assert_eq!(encode_wav_base64(&audio), None);
    }
}
