//! Directory-backed capture and log output

use std::path::{Path, PathBuf};

use image::RgbImage;

use handoff_backend::decode_image;
use handoff_core::{HandLandmark, HandoffError, HandoffResult, OffloadMode};
use handoff_runtime::{FrameOutcome, FrameSink, FrameSource};

/// Environment variable naming the frame directory
pub const FRAMES_DIR_ENV: &str = "HANDOFF_FRAMES_DIR";

/// Set to `1` to replay the directory until interrupted
pub const FRAMES_LOOP_ENV: &str = "HANDOFF_FRAMES_LOOP";

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Frames read from image files, sorted by file name
#[derive(Debug)]
pub struct DirectorySource {
    paths: Vec<PathBuf>,
    next: usize,
    looping: bool,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>) -> HandoffResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| HandoffError::Config(format!("{}: {}", dir.display(), e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| HandoffError::Config(format!("{}: {}", dir.display(), e)))?
                .path();
            if is_frame(&path) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(HandoffError::Config(format!(
                "no JPEG or PNG frames in {}",
                dir.display()
            )));
        }
        paths.sort();

        tracing::info!(dir = %dir.display(), frames = paths.len(), "frame directory opened");
        Ok(DirectorySource {
            paths,
            next: 0,
            looping: false,
        })
    }

    /// Directory from [`FRAMES_DIR_ENV`], looping per [`FRAMES_LOOP_ENV`]
    pub fn from_env() -> HandoffResult<Self> {
        let dir = std::env::var_os(FRAMES_DIR_ENV)
            .ok_or_else(|| HandoffError::Config(format!("{} is not set", FRAMES_DIR_ENV)))?;
        let looping = std::env::var(FRAMES_LOOP_ENV).is_ok_and(|v| v == "1");
        Ok(Self::open(PathBuf::from(dir))?.looping(looping))
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_frame(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| FRAME_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> HandoffResult<Option<RgbImage>> {
        if self.next >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }
        let path = &self.paths[self.next];
        self.next += 1;

        let bytes = std::fs::read(path)
            .map_err(|e| HandoffError::Image(format!("{}: {}", path.display(), e)))?;
        decode_image(&bytes).map(Some)
    }
}

/// Reports outcomes as log events
#[derive(Debug)]
pub struct LogSink {
    /// Progress line every this many frames
    every: u64,
    last_mode: Option<OffloadMode>,
    hands: u64,
    frames: u64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        LogSink {
            every: every.max(1),
            last_mode: None,
            hands: 0,
            frames: 0,
        }
    }

    /// Frames that contained a hand
    pub fn hands(&self) -> u64 {
        self.hands
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(100)
    }
}

impl FrameSink for LogSink {
    fn render(&mut self, frame: &RgbImage, outcome: &FrameOutcome) {
        self.frames += 1;
        if outcome.pose.is_present() {
            self.hands += 1;
        }

        if self.last_mode != Some(outcome.mode) {
            tracing::info!(index = outcome.index, mode = %outcome.mode, "frames now served by new mode");
            self.last_mode = Some(outcome.mode);
        }

        match outcome.pose.landmark(HandLandmark::IndexFingerTip) {
            Some(tip) => {
                let (x, y) = tip.to_pixel(frame.width(), frame.height());
                tracing::debug!(
                    index = outcome.index,
                    mode = %outcome.mode,
                    fell_back = outcome.fell_back,
                    latency_ms = outcome.latency.as_secs_f64() * 1000.0,
                    index_tip_x = x,
                    index_tip_y = y,
                    "hand"
                );
            }
            None => tracing::debug!(index = outcome.index, mode = %outcome.mode, "no hand"),
        }

        if self.frames % self.every == 0 {
            tracing::info!(frames = self.frames, hands = self.hands, mode = %outcome.mode, "progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::{ImageFormat, Rgb};

    use handoff_core::{HandPose, Landmark, Pose, LANDMARK_COUNT};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("handoff-node-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_frame(dir: &Path, name: &str, shade: u8, format: ImageFormat) {
        RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))
            .save_with_format(dir.join(name), format)
            .unwrap();
    }

    #[test]
    fn test_reads_frames_in_name_order() {
        let dir = scratch_dir("order");
        write_frame(&dir, "b.png", 20, ImageFormat::Png);
        write_frame(&dir, "a.PNG", 10, ImageFormat::Png);
        write_frame(&dir, "c.jpg", 200, ImageFormat::Jpeg);
        std::fs::write(dir.join("notes.txt"), b"skip me").unwrap();

        let mut source = DirectorySource::open(&dir).unwrap();
        assert_eq!(source.len(), 3);

        assert_eq!(source.next_frame().unwrap().unwrap().get_pixel(0, 0), &Rgb([10, 10, 10]));
        assert_eq!(source.next_frame().unwrap().unwrap().get_pixel(0, 0), &Rgb([20, 20, 20]));
        assert_eq!(source.next_frame().unwrap().unwrap().dimensions(), (8, 6));
        assert!(source.next_frame().unwrap().is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_looping_restarts() {
        let dir = scratch_dir("loop");
        write_frame(&dir, "only.png", 5, ImageFormat::Png);

        let mut source = DirectorySource::open(&dir).unwrap().looping(true);
        for _ in 0..3 {
            assert!(source.next_frame().unwrap().is_some());
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_frame_is_an_error() {
        let dir = scratch_dir("corrupt");
        std::fs::write(dir.join("bad.jpg"), b"not really").unwrap();
        write_frame(&dir, "good.png", 1, ImageFormat::Png);

        let mut source = DirectorySource::open(&dir).unwrap();
        assert!(matches!(source.next_frame(), Err(HandoffError::Image(_))));
        assert!(source.next_frame().unwrap().is_some());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = scratch_dir("empty");
        assert!(matches!(DirectorySource::open(&dir), Err(HandoffError::Config(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_log_sink_counts_hands() {
        let mut sink = LogSink::new(2);
        let frame = RgbImage::new(640, 480);
        let hand = Pose::Hand(HandPose::new([Landmark::new(0.5, 0.5, 0.0); LANDMARK_COUNT]));

        for (index, pose) in [hand, Pose::Absent].into_iter().enumerate() {
            sink.render(
                &frame,
                &FrameOutcome {
                    index: index as u64,
                    pose,
                    mode: OffloadMode::Local,
                    fell_back: false,
                    latency: Duration::from_millis(12),
                },
            );
        }

        assert_eq!(sink.frames(), 2);
        assert_eq!(sink.hands(), 1);
    }
}
