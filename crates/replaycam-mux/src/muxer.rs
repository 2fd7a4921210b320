//! MP4 muxer for save snapshots.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;
use mp4::{
    AvcConfig, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType,
};
use replaycam_encoder::{MuxFailure, MuxSummary, Muxer, SaveSnapshot};
use tracing::{debug, instrument, warn};

use crate::error::MuxError;
use crate::nal::{annex_b_to_sample, extract_sps_pps};
use crate::MuxResult;

/// Track timescale in ticks per second.
pub const MP4_TIMESCALE: u32 = 90_000;

const MOVIE_TIMESCALE: u32 = 1000;
const VIDEO_TRACK_ID: u32 = 1;

/// Writes snapshots as single-track H.264 MP4 files.
///
/// The file is assembled next to the destination and renamed into place only
/// once complete.
#[derive(Debug, Clone)]
pub struct Mp4Muxer {
    frame_rate: u32,
}

impl Mp4Muxer {
    /// Create a muxer. `frame_rate` sets the duration of the last sample when
    /// it cannot be inferred.
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
        }
    }

    /// Write `snapshot` to `destination`.
    #[instrument(name = "mp4_write", skip(self, snapshot), fields(chunks = snapshot.len()))]
    pub fn write(&self, snapshot: &SaveSnapshot, destination: &Path) -> MuxResult<MuxSummary> {
        let format = snapshot.format.as_ref().ok_or(MuxError::MissingParameterSets)?;
        let first = snapshot.chunks.first().ok_or(MuxError::Empty)?;
        let (sps, pps) =
            extract_sps_pps(&format.codec_config).ok_or(MuxError::MissingParameterSets)?;

        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".replaycam-")
            .suffix(".mp4.tmp")
            .tempfile_in(dir)?;
        debug!(temp = %temp.path().display(), "Writing to temporary file");

        let config = Mp4Config {
            major_brand: "isom".parse()?,
            minor_version: 512,
            compatible_brands: vec![
                "isom".parse()?,
                "iso2".parse()?,
                "avc1".parse()?,
                "mp41".parse()?,
            ],
            timescale: MOVIE_TIMESCALE,
        };

        let mut writer = Mp4Writer::write_start(BufWriter::new(temp.as_file_mut()), &config)?;
        writer.add_track(&TrackConfig {
            track_type: TrackType::Video,
            timescale: MP4_TIMESCALE,
            language: String::from("und"),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width: format.width as u16,
                height: format.height as u16,
                seq_param_set: sps.to_vec(),
                pic_param_set: pps.to_vec(),
            }),
        })?;

        let starts: Vec<u64> = snapshot
            .chunks
            .iter()
            .map(|c| to_ticks(c.pts_usec - first.pts_usec))
            .collect();
        let durations = sample_durations(&starts, self.frame_rate);

        let mut skipped = 0;
        for ((chunk, start), duration) in snapshot.chunks.iter().zip(&starts).zip(&durations) {
            let bytes: Bytes = annex_b_to_sample(&chunk.data);
            if bytes.is_empty() {
                skipped += 1;
                continue;
            }
            writer.write_sample(
                VIDEO_TRACK_ID,
                &Mp4Sample {
                    start_time: *start,
                    duration: *duration,
                    rendering_offset: 0,
                    is_sync: chunk.is_sync,
                    bytes,
                },
            )?;
        }
        if skipped > 0 {
            warn!(skipped, "Skipped chunks without slice data");
        }

        writer.write_end()?;
        let mut out = writer.into_writer();
        out.flush()?;
        drop(out);
        temp.as_file().sync_all()?;

        temp.persist(destination)?;
        let bytes_written = fs::metadata(destination)?.len();

        let samples = snapshot.chunks.len() - skipped;
        let duration_ticks = starts.last().copied().unwrap_or(0)
            + durations.last().copied().unwrap_or(0) as u64;

        Ok(MuxSummary {
            path: destination.to_path_buf(),
            samples,
            duration_usec: duration_ticks * 1_000_000 / MP4_TIMESCALE as u64,
            bytes_written,
        })
    }
}

impl Muxer for Mp4Muxer {
    fn mux(&self, snapshot: &SaveSnapshot, destination: &Path) -> Result<MuxSummary, MuxFailure> {
        self.write(snapshot, destination).map_err(MuxFailure::from)
    }

    fn name(&self) -> &'static str {
        "mp4"
    }
}

fn to_ticks(usec: u64) -> u64 {
    usec * MP4_TIMESCALE as u64 / 1_000_000
}

/// Duration of each sample: the gap to the next one, and for the last
/// sample the previous gap (or one frame when there is only one sample).
fn sample_durations(starts: &[u64], frame_rate: u32) -> Vec<u32> {
    let frame_ticks = MP4_TIMESCALE / frame_rate;
    let mut durations: Vec<u32> = starts.windows(2).map(|w| (w[1] - w[0]) as u32).collect();
    let last = durations.last().copied().unwrap_or(frame_ticks);
    if !starts.is_empty() {
        durations.push(last);
    }
    durations
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::BufReader;

    use bytes::Bytes;
    use mp4::Mp4Reader;
    use replaycam_encoder::{EncodedChunk, StreamFormat, SYNTHETIC_PPS, SYNTHETIC_SPS};
    use replaycam_ipc::SaveStatus;

    use super::*;

    fn codec_config() -> Bytes {
        let mut config = vec![0, 0, 0, 1];
        config.extend_from_slice(&SYNTHETIC_SPS);
        config.extend_from_slice(&[0, 0, 0, 1]);
        config.extend_from_slice(&SYNTHETIC_PPS);
        Bytes::from(config)
    }

    fn snapshot(count: u64) -> SaveSnapshot {
        let chunks = (0..count)
            .map(|i| {
                let nal = if i % 10 == 0 { 0x65 } else { 0x41 };
                EncodedChunk::new(
                    Bytes::from(vec![0, 0, 0, 1, nal, 0xAA, i as u8]),
                    1_000_000 + i * 33_333,
                    i % 10 == 0,
                )
            })
            .collect();
        SaveSnapshot {
            chunks,
            format: Some(StreamFormat {
                width: 64,
                height: 48,
                codec_config: codec_config(),
            }),
        }
    }

    #[test]
    fn test_sample_durations() {
        assert_eq!(sample_durations(&[0, 3000, 6003], 30), vec![3000, 3003, 3003]);
        assert_eq!(sample_durations(&[0], 30), vec![3000]);
        assert!(sample_durations(&[], 30).is_empty());
    }

    #[test]
    fn test_write_readable_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let summary = Mp4Muxer::new(30).write(&snapshot(25), &path).unwrap();
        assert_eq!(summary.samples, 25);
        assert_eq!(summary.path, path);
        assert!(summary.bytes_written > 0);

        let file = File::open(&path).unwrap();
        let size = file.metadata().unwrap().len();
        let mut reader = Mp4Reader::read_header(BufReader::new(file), size).unwrap();
        assert_eq!(reader.sample_count(VIDEO_TRACK_ID).unwrap(), 25);

        let track = reader.tracks().get(&VIDEO_TRACK_ID).unwrap();
        assert_eq!(track.width(), 64);
        assert_eq!(track.height(), 48);

        let first = reader.read_sample(VIDEO_TRACK_ID, 1).unwrap().unwrap();
        assert!(first.is_sync);
        assert_eq!(first.start_time, 0);
        assert_eq!(first.bytes.as_ref(), &[0, 0, 0, 3, 0x65, 0xAA, 0]);

        let second = reader.read_sample(VIDEO_TRACK_ID, 2).unwrap().unwrap();
        assert!(!second.is_sync);
        assert_eq!(second.start_time, 2999);
    }

    #[test]
    fn test_no_temp_file_left_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        Mp4Muxer::new(30).write(&snapshot(3), &path).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("clip.mp4")]);
    }

    #[test]
    fn test_missing_directory_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("clip.mp4");

        let failure = Mp4Muxer::new(30).mux(&snapshot(3), &path).unwrap_err();
        assert_eq!(failure.status, SaveStatus::Io);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_parameter_sets_is_mux_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut snap = snapshot(3);
        if let Some(format) = snap.format.as_mut() {
            format.codec_config = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42]);
        }

        let failure = Mp4Muxer::new(30).mux(&snap, &path).unwrap_err();
        assert_eq!(failure.status, SaveStatus::Mux);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let failure = Mp4Muxer::new(30)
            .mux(&snapshot(0), &dir.path().join("clip.mp4"))
            .unwrap_err();
        assert_eq!(failure.status, SaveStatus::NothingBuffered);
    }
}
