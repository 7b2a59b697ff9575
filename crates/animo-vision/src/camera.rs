use anyhow::{Context, Result};
use image::RgbImage;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-mjpeg" | "v4l2-mjpeg" | "image-dir"
    #[serde(default = "default_device")]
    pub device: String, // /dev/video0 (v4l2)
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Frames replayed in "image-dir" mode.
    pub image_dir: Option<String>,
}

fn default_device() -> String { "/dev/video0".into() }
fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_fps() -> u32 { 15 }

/// Exclusive handle on a camera.
pub trait FrameSource: Send {
    /// `Ok(None)` is a transient miss (corrupt frame); `Err` means the
    /// stream itself failed.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Idempotent; also performed on drop.
    fn release(&mut self);
}

pub trait CameraOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

impl CameraOpener for CameraConfig {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        match self.mode.as_str() {
            "libcamera-mjpeg" => Ok(Box::new(MjpegPipeCamera::libcamera(self)?)),
            "v4l2-mjpeg" => Ok(Box::new(MjpegPipeCamera::v4l2(self)?)),
            "image-dir" => {
                let dir = self.image_dir.as_ref().context("camera.image_dir missing (mode=image-dir)")?;
                Ok(Box::new(ImageDirCamera::open(dir)?))
            }
            other => anyhow::bail!("unknown camera.mode: {}", other),
        }
    }
}

/// Streaming capture through a child process writing MJPEG to stdout:
/// - libcamera-mjpeg: `libcamera-vid -n -t 0 --codec mjpeg ... -o -` (Pi camera)
/// - v4l2-mjpeg: `ffmpeg -f video4linux2 -input_format mjpeg ... -f image2pipe -` (USB webcams)
pub struct MjpegPipeCamera {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    splitter: JpegSplitter,
}

impl MjpegPipeCamera {
    pub fn libcamera(cfg: &CameraConfig) -> Result<Self> {
        let mut cmd = Command::new("libcamera-vid");
        cmd.args([
            "-n",                 // no preview
            "-t", "0",            // run until killed
            "--codec", "mjpeg",
            "--width", &cfg.width.to_string(),
            "--height", &cfg.height.to_string(),
            "--framerate", &cfg.fps.to_string(),
            "-o", "-",            // stdout
        ]);
        debug!("capture: libcamera-vid");
        Self::spawn(cmd, "libcamera-vid")
    }

    pub fn v4l2(cfg: &CameraConfig) -> Result<Self> {
        anyhow::ensure!(Path::new(&cfg.device).exists(), "camera device {} not found", cfg.device);
        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-hide_banner","-loglevel","error",
            "-f","video4linux2",
            "-input_format","mjpeg",
            "-video_size",&format!("{}x{}", cfg.width, cfg.height),
            "-framerate",&cfg.fps.to_string(),
            "-i",&cfg.device,
            "-f","image2pipe",
            "-vcodec","copy",
            "-",
        ]);
        debug!("capture: ffmpeg v4l2");
        Self::spawn(cmd, "ffmpeg")
    }

    fn spawn(mut cmd: Command, what: &str) -> Result<Self> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("run {}", what))?;
        let stdout = child.stdout.take().context("capture stdout not piped")?;

        // A camera that is busy or missing makes the tool exit right away.
        std::thread::sleep(std::time::Duration::from_millis(200));
        if let Some(status) = child.try_wait()? {
            anyhow::bail!("{} exited at startup ({})", what, status);
        }

        info!("camera: {} streaming", what);
        Ok(Self { child: Some(child), stdout: Some(stdout), splitter: JpegSplitter::default() })
    }
}

impl FrameSource for MjpegPipeCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let stdout = self.stdout.as_mut().context("camera released")?;
        let mut buf = [0u8; 16 * 1024];
        let jpeg = loop {
            if let Some(frame) = self.splitter.next_frame() {
                break frame;
            }
            let n = stdout.read(&mut buf).context("read camera stream")?;
            anyhow::ensure!(n > 0, "camera stream ended");
            self.splitter.push(&buf[..n]);
        };
        match image::load_from_memory(&jpeg) {
            Ok(img) => Ok(Some(img.to_rgb8())),
            Err(e) => {
                debug!("camera: dropping undecodable frame: {}", e);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("camera: kill: {}", e);
            }
            match child.wait() {
                Ok(status) => info!("camera: released ({})", status),
                Err(e) => warn!("camera: reap failed: {}", e),
            }
        }
    }
}

impl Drop for MjpegPipeCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Splits a concatenated MJPEG byte stream on SOI/EOI markers.
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: Vec<u8>,
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
// Bound on buffered bytes while waiting for an end marker.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

impl JpegSplitter {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_FRAME_BYTES {
            warn!("camera: no frame boundary in {} bytes, resyncing", self.buf.len());
            self.buf.clear();
        }
    }

    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = find(&self.buf, &SOI, 0)?;
        let end = find(&self.buf, &EOI, start + 2)? + 2;
        let frame = self.buf[start..end].to_vec();
        self.buf.drain(..end);
        Some(frame)
    }
}

fn find(hay: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    hay.get(from..)?.windows(2).position(|w| w == needle).map(|p| p + from)
}

/// Replays still images from a directory in name order, looping.
pub struct ImageDirCamera {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirCamera {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for ent in std::fs::read_dir(dir).with_context(|| format!("read image dir {}", dir.display()))? {
            let path = ent?.path();
            let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            if matches!(ext.as_deref(), Some("jpg" | "jpeg" | "png")) {
                files.push(path);
            }
        }
        files.sort();
        anyhow::ensure!(!files.is_empty(), "no images in {}", dir.display());
        info!("camera: replaying {} images from {}", files.len(), dir.display());
        Ok(Self { files, next: 0 })
    }
}

impl FrameSource for ImageDirCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        anyhow::ensure!(!self.files.is_empty(), "camera released");
        let path = &self.files[self.next % self.files.len()];
        self.next += 1;
        match image::open(path) {
            Ok(img) => Ok(Some(img.to_rgb8())),
            Err(e) => {
                debug!("camera: skipping {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitter_yields_frames_across_chunks() {
        let mut s = JpegSplitter::default();
        s.push(&[0x00, 0xFF, 0xD8, 1, 2]);
        assert!(s.next_frame().is_none());
        s.push(&[3, 0xFF, 0xD9, 0xFF, 0xD8, 9, 0xFF]);
        assert_eq!(s.next_frame().unwrap(), vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        assert!(s.next_frame().is_none());
        s.push(&[0xD9]);
        assert_eq!(s.next_frame().unwrap(), vec![0xFF, 0xD8, 9, 0xFF, 0xD9]);
    }

    #[test]
    fn splitter_does_not_take_soi_as_eoi() {
        let mut s = JpegSplitter::default();
        s.push(&[0xFF, 0xD8, 0xD9]);
        assert!(s.next_frame().is_none());
    }

    #[test]
    fn image_dir_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 2).save(dir.path().join("b.png")).unwrap();
        RgbImage::new(8, 8).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut cam = ImageDirCamera::open(dir.path()).unwrap();
        assert_eq!(cam.read_frame().unwrap().unwrap().width(), 8);
        assert_eq!(cam.read_frame().unwrap().unwrap().width(), 4);
        assert_eq!(cam.read_frame().unwrap().unwrap().width(), 8);
        cam.release();
        assert!(cam.read_frame().is_err());
    }

    #[test]
    fn unknown_mode_fails_to_open() {
        let cfg: CameraConfig = toml::from_str(r#"mode = "gopro""#).unwrap();
        assert!(cfg.open().is_err());
    }
}
