use anyhow::{anyhow, bail, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use image::RgbImage;
use tokio::process::Command;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub type Frame = RgbImage;

/// A camera that can be opened for exclusive use by one session.
pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Opens the device. An error means the device is unusable for this
    /// session and presence checks are skipped.
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameSource>>>;
}

/// An opened capture device. Only the presence monitor holds one.
pub trait FrameSource: Send {
    fn capture(&mut self) -> BoxFuture<'_, Result<Frame>>;

    fn release(&mut self);
}

/// Releases the wrapped source when dropped, so every exit path of the
/// presence monitor (including task abort) gives the device back.
pub struct CaptureGuard {
    source: Option<Box<dyn FrameSource>>,
}

impl CaptureGuard {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub async fn capture(&mut self) -> Result<Frame> {
        match self.source.as_mut() {
            Some(source) => source.capture().await,
            None => Err(anyhow!("capture device already released")),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Grabs frames by running an external command that writes one encoded image
/// (PNG, JPEG, BMP...) to stdout, e.g.
/// `ffmpeg -loglevel quiet -f v4l2 -i /dev/video0 -frames:v 1 -f image2pipe -vcodec png -`.
pub struct CommandCaptureDevice {
    argv: Vec<String>,
}

impl CommandCaptureDevice {
    pub fn new(argv: Vec<String>) -> Option<Self> {
        let argv: Vec<String> = argv
            .into_iter()
            .filter(|arg| !arg.trim().is_empty())
            .collect();
        if argv.is_empty() {
            return None;
        }
        Some(Self { argv })
    }
}

impl CaptureDevice for CommandCaptureDevice {
    fn name(&self) -> &str {
        &self.argv[0]
    }

    fn open(&self) -> BoxFuture<'_, Result<Box<dyn FrameSource>>> {
        async move {
            let mut source = CommandFrameSource {
                argv: self.argv.clone(),
                released: false,
            };
            // A device that cannot deliver a first frame counts as unavailable.
            let probe = source
                .grab()
                .await
                .with_context(|| format!("camera command `{}` did not produce a frame", self.argv[0]))?;
            log_info!(
                "camera opened via `{}` ({}x{})",
                self.argv[0],
                probe.width(),
                probe.height()
            );
            Ok(Box::new(source) as Box<dyn FrameSource>)
        }
        .boxed()
    }
}

struct CommandFrameSource {
    argv: Vec<String>,
    released: bool,
}

impl CommandFrameSource {
    async fn grab(&self) -> Result<Frame> {
        if self.released {
            bail!("capture device released");
        }

        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn `{}`", self.argv[0]))?;

        if !output.status.success() {
            bail!(
                "`{}` exited with {}: {}",
                self.argv[0],
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if output.stdout.is_empty() {
            bail!("`{}` produced no image data", self.argv[0]);
        }

        let bytes = output.stdout;
        tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes)
                .map(|decoded| decoded.to_rgb8())
                .context("failed to decode captured frame")
        })
        .await
        .context("frame decode worker join failed")?
    }
}

impl FrameSource for CommandFrameSource {
    fn capture(&mut self) -> BoxFuture<'_, Result<Frame>> {
        self.grab().boxed()
    }

    fn release(&mut self) {
        if !self.released {
            log_debug!("camera command source released");
        }
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    struct Recording(Arc<AtomicBool>);

    impl FrameSource for Recording {
        fn capture(&mut self) -> BoxFuture<'_, Result<Frame>> {
            async { Ok(RgbImage::new(2, 2)) }.boxed()
        }

        fn release(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        {
            let mut guard = CaptureGuard::new(Box::new(Recording(released.clone())));
            guard.capture().await.unwrap();
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn released_guard_refuses_capture() {
        let released = Arc::new(AtomicBool::new(false));
        let mut guard = CaptureGuard::new(Box::new(Recording(released.clone())));
        guard.release();
        assert!(released.load(Ordering::SeqCst));
        assert!(guard.capture().await.is_err());
    }

    #[test]
    fn blank_command_is_not_a_device() {
        assert!(CommandCaptureDevice::new(vec![]).is_none());
        assert!(CommandCaptureDevice::new(vec!["  ".into()]).is_none());
        assert!(CommandCaptureDevice::new(vec!["ffmpeg".into()]).is_some());
    }

    #[tokio::test]
    async fn failing_command_cannot_be_opened() {
        let device = CommandCaptureDevice::new(vec!["false".into()]).unwrap();
        assert!(device.open().await.is_err());
    }
}
