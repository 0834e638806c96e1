//! Camera frame capture for live mode.
//!
//! Frames are grabbed one at a time with ffmpeg and handed to the detection
//! backend as JPEG bytes.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera {device} unavailable: {reason}")]
    Unavailable { device: String, reason: String },

    #[error("failed to capture frame from {device}: {reason}")]
    Capture { device: String, reason: String },

    #[error("camera {0} already released")]
    Released(String),
}

/// Source of still frames for the capture loop
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Grab one frame as JPEG bytes
    async fn capture(&self) -> Result<Vec<u8>, CameraError>;

    /// Give the device back; later captures fail
    async fn release(&self) -> Result<(), CameraError>;
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device path or ffmpeg input URI (e.g. `/dev/video0`)
    pub device: String,
    /// ffmpeg input format (`v4l2`, `avfoundation`, ...), if it must be forced
    pub input_format: Option<String>,
    /// Scale to this width, keeping aspect ratio (0 = native)
    pub width: u32,
    /// JPEG quality, 2 (best) to 31
    pub quality: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            input_format: None,
            width: 0,
            quality: 5,
        }
    }
}

impl CameraSettings {
    fn capture_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()];

        if let Some(format) = &self.input_format {
            args.push("-f".to_string());
            args.push(format.clone());
        }

        args.extend([
            "-i".to_string(),
            self.device.clone(),
            "-frames:v".to_string(),
            "1".to_string(),
        ]);

        if self.width > 0 {
            args.push("-vf".to_string());
            args.push(format!("scale={}:-2", self.width));
        }

        args.extend([
            "-q:v".to_string(),
            self.quality.clamp(2, 31).to_string(),
            "-c:v".to_string(),
            "mjpeg".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "pipe:1".to_string(),
        ]);

        args
    }
}

/// JPEG data starts with an SOI marker followed by another marker
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() > 3 && data[..3] == [0xFF, 0xD8, 0xFF]
}

/// Camera read through the `ffmpeg` binary
pub struct FfmpegCamera {
    settings: CameraSettings,
    released: AtomicBool,
}

impl FfmpegCamera {
    /// Acquire the camera, failing if a first frame cannot be read
    pub async fn open(settings: CameraSettings) -> Result<Self, CameraError> {
        let camera = Self::unchecked(settings);
        match camera.grab().await {
            Ok(frame) => {
                info!(
                    device = %camera.settings.device,
                    size_bytes = frame.len(),
                    "camera acquired"
                );
                Ok(camera)
            }
            Err(e) => Err(CameraError::Unavailable {
                device: camera.settings.device.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn unchecked(settings: CameraSettings) -> Self {
        Self {
            settings,
            released: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &str {
        &self.settings.device
    }

    async fn grab(&self) -> Result<Vec<u8>, CameraError> {
        let device = &self.settings.device;
        let args = self.settings.capture_args();
        debug!(device = %device, args = ?args, "spawning ffmpeg for frame capture");

        let output = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CameraError::Capture {
                device: device.clone(),
                reason: format!("failed to execute ffmpeg: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(device = %device, status = ?output.status, "ffmpeg frame capture failed");
            return Err(CameraError::Capture {
                device: device.clone(),
                reason: format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
            });
        }

        if !is_jpeg(&output.stdout) {
            return Err(CameraError::Capture {
                device: device.clone(),
                reason: format!("ffmpeg returned {} bytes of non-JPEG data", output.stdout.len()),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl FrameSource for FfmpegCamera {
    async fn capture(&self) -> Result<Vec<u8>, CameraError> {
        if self.released.load(Ordering::Acquire) {
            return Err(CameraError::Released(self.settings.device.clone()));
        }
        self.grab().await
    }

    async fn release(&self) -> Result<(), CameraError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(CameraError::Released(self.settings.device.clone()));
        }
        info!(device = %self.settings.device, "camera released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_args() {
        let settings = CameraSettings {
            device: "/dev/video2".to_string(),
            input_format: Some("v4l2".to_string()),
            width: 640,
            quality: 40,
        };

        let args = settings.capture_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f v4l2 -i /dev/video2 -frames:v 1"));
        assert!(joined.contains("-vf scale=640:-2"));
        assert!(joined.contains("-q:v 31"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_native_size_has_no_scale_filter() {
        let args = CameraSettings::default().capture_args();
        assert!(!args.iter().any(|a| a == "-vf"));
        assert!(!args.windows(2).any(|w| w[0] == "-f" && w[1] == "v4l2"));
    }

    #[test]
    fn test_is_jpeg() {
        assert!(is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]));
        assert!(!is_jpeg(&[0x89, 0x50, 0x4E, 0x47]));
        assert!(!is_jpeg(&[]));
    }

    #[tokio::test]
    async fn test_released_camera_refuses_capture() {
        let camera = FfmpegCamera::unchecked(CameraSettings::default());
        camera.release().await.expect("first release");

        assert!(matches!(camera.capture().await, Err(CameraError::Released(_))));
        assert!(matches!(camera.release().await, Err(CameraError::Released(_))));
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let settings = CameraSettings {
            device: "/nonexistent/crowd-camera".to_string(),
            ..CameraSettings::default()
        };

        // fails whether or not ffmpeg is installed
        let result = FfmpegCamera::open(settings).await;
        assert!(matches!(result, Err(CameraError::Unavailable { .. })));
    }
}
