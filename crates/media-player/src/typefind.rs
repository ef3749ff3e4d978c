//! Container pre-probe for local files.
//!
//! Uses Symphonia to read the container header before the engine's own type
//! detection runs, which tells the builder how many elementary streams to
//! expect and seeds codec metadata.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use media_player_types::MediaKind;
use symphonia::core::codecs::*;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;

/// Stream layout learned from the container header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerProbe {
    /// Extension hint used while probing.
    pub container: Option<String>,
    pub streams: Vec<ProbedStream>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbedStream {
    pub kind: MediaKind,
    /// Encoded format in the engine's caps vocabulary, e.g. `audio/x-flac`.
    pub codec: Option<String>,
    pub duration_ms: Option<u64>,
}

impl ContainerProbe {
    /// Classified streams; tracks the header does not describe are not counted.
    pub fn expected_streams(&self) -> usize {
        self.streams.len()
    }

    /// Classified stream count per media kind, indexed by `MediaKind::index`.
    pub fn per_kind(&self) -> [usize; 3] {
        let mut counts = [0; 3];
        for s in &self.streams {
            counts[s.kind.index()] += 1;
        }
        counts
    }

    /// Longest stream duration, if any stream reports one.
    pub fn duration_ms(&self) -> Option<u64> {
        self.streams.iter().filter_map(|s| s.duration_ms).max()
    }
}

/// Probe `path` and list the tracks whose media kind the header reveals.
pub fn probe_file(path: &Path) -> Result<ContainerProbe> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    let container = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if let Some(ext) = container.as_deref() {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {:?}", path))?;

    let streams = probed
        .format
        .tracks()
        .iter()
        .filter_map(|t| classify_track(&t.codec_params))
        .collect();

    Ok(ContainerProbe { container, streams })
}

/// Media kind and caps-style format of one container track.
///
/// Symphonia only describes audio codecs; video and subtitle tracks come back
/// without a codec and yield `None`, as do audio codecs with no decoder here.
pub fn classify_track(params: &CodecParameters) -> Option<ProbedStream> {
    let format = caps_format(params.codec)?;
    Some(ProbedStream {
        kind: MediaKind::Audio,
        codec: Some(format.to_string()),
        duration_ms: track_span_ms(params),
    })
}

fn caps_format(codec: CodecType) -> Option<&'static str> {
    let format = match codec {
        CODEC_TYPE_FLAC => "audio/x-flac",
        CODEC_TYPE_MP1 | CODEC_TYPE_MP2 | CODEC_TYPE_MP3 | CODEC_TYPE_AAC => "audio/mpeg",
        CODEC_TYPE_VORBIS => "audio/x-vorbis",
        CODEC_TYPE_OPUS => "audio/x-opus",
        CODEC_TYPE_ALAC => "audio/x-alac",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE | CODEC_TYPE_PCM_S24LE
        | CODEC_TYPE_PCM_S24BE | CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE
        | CODEC_TYPE_PCM_U8 | CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "audio/x-raw",
        _ => return None,
    };
    Some(format)
}

/// Track length from its frame count, in the track's own time base.
fn track_span_ms(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    let base = match params.time_base {
        Some(base) => base,
        None => TimeBase::new(1, params.sample_rate.filter(|r| *r > 0)?),
    };
    let span = base.calc_time(frames);
    Some(span.seconds * 1000 + (span.frac * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Minimal mono 16-bit PCM WAV with `frames` silent frames.
    fn write_wav(file: &mut impl Write, rate: u32, frames: u32) {
        let data_len = frames * 2;
        file.write_all(b"RIFF").unwrap();
        file.write_all(&(36 + data_len).to_le_bytes()).unwrap();
        file.write_all(b"WAVEfmt ").unwrap();
        file.write_all(&16u32.to_le_bytes()).unwrap();
        file.write_all(&1u16.to_le_bytes()).unwrap();
        file.write_all(&1u16.to_le_bytes()).unwrap();
        file.write_all(&rate.to_le_bytes()).unwrap();
        file.write_all(&(rate * 2).to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap();
        file.write_all(&16u16.to_le_bytes()).unwrap();
        file.write_all(b"data").unwrap();
        file.write_all(&data_len.to_le_bytes()).unwrap();
        file.write_all(&vec![0u8; data_len as usize]).unwrap();
    }

    #[test]
    fn probes_a_wav_file() {
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        write_wav(&mut file, 8_000, 16_000);
        file.flush().unwrap();

        let probe = probe_file(file.path()).unwrap();
        assert_eq!(probe.container.as_deref(), Some("wav"));
        assert_eq!(probe.expected_streams(), 1);
        assert_eq!(probe.streams[0].kind, MediaKind::Audio);
        assert_eq!(probe.streams[0].codec.as_deref(), Some("audio/x-raw"));
        assert_eq!(probe.per_kind(), [1, 0, 0]);
        assert_eq!(probe.duration_ms(), Some(2000));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = probe_file(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(format!("{err:#}").contains("clip.mp4"));
    }

    #[test]
    fn header_without_codec_is_not_counted() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(classify_track(&params).is_none());
    }

    #[test]
    fn audio_codecs_map_to_decoder_formats() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_AAC;
        params.sample_rate = Some(48_000);
        params.n_frames = Some(24_000);
        let stream = classify_track(&params).unwrap();
        assert_eq!(stream.kind, MediaKind::Audio);
        assert_eq!(stream.codec.as_deref(), Some("audio/mpeg"));
        assert_eq!(stream.duration_ms, Some(500));

        params.codec = CODEC_TYPE_FLAC;
        params.sample_rate = Some(0);
        let stream = classify_track(&params).unwrap();
        assert_eq!(stream.codec.as_deref(), Some("audio/x-flac"));
        assert_eq!(stream.duration_ms, None);
    }

    #[test]
    fn per_kind_counts_seed_the_expected_total() {
        let audio = |codec: &str| ProbedStream {
            kind: MediaKind::Audio,
            codec: Some(codec.to_string()),
            duration_ms: None,
        };
        let probe = ContainerProbe {
            container: Some("mkv".into()),
            streams: vec![
                audio("audio/x-vorbis"),
                audio("audio/x-vorbis"),
                ProbedStream {
                    kind: MediaKind::Text,
                    codec: None,
                    duration_ms: Some(9_000),
                },
            ],
        };
        assert_eq!(probe.per_kind(), [2, 0, 1]);
        assert_eq!(probe.expected_streams(), 3);
        assert_eq!(probe.duration_ms(), Some(9_000));
    }
}
