//! Camera and microphone lifecycle.
//!
//! [`MediaDevices`] is the capability seam over the platform's device API.
//! [`MediaAdapter`] acquires tracks per device, so a denied camera still
//! leaves an audio-only session, and releases them exactly once.

use async_trait::async_trait;
use recruit_core::connection::MediaFlags;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Camera,
    Microphone,
}

impl DeviceKind {
    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Microphone => "microphone",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-device failures. Recoverable; the UI shows them as actionable
/// states.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("Permission denied for {0}")]
    PermissionDenied(DeviceKind),

    #[error("{0} unavailable: {1}")]
    DeviceUnavailable(DeviceKind, String),
}

impl MediaError {
    pub fn device(&self) -> DeviceKind {
        match self {
            MediaError::PermissionDenied(kind) | MediaError::DeviceUnavailable(kind, _) => *kind,
        }
    }
}

/// Opaque handle to an acquired track.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(pub String);

/// Platform device access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Prompt for permission (if needed) and open one track.
    async fn request(&mut self, kind: DeviceKind) -> Result<TrackId, MediaError>;

    /// Mute or unmute a live track.
    fn set_enabled(&mut self, track: &TrackId, enabled: bool);

    /// Stop a track and release the device.
    fn stop(&mut self, track: &TrackId);
}

/// Result of [`MediaAdapter::acquire`].
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireReport {
    pub flags: MediaFlags,
    pub errors: Vec<MediaError>,
}

impl AcquireReport {
    pub fn is_audio_only(&self) -> bool {
        !self.flags.camera && self.flags.microphone
    }
}

#[derive(Debug)]
struct Track {
    id: TrackId,
    enabled: bool,
}

pub struct MediaAdapter {
    devices: Box<dyn MediaDevices>,
    camera: Option<Track>,
    microphone: Option<Track>,
    speaker: bool,
    released: bool,
}

impl MediaAdapter {
    pub fn new(devices: Box<dyn MediaDevices>) -> Self {
        Self {
            devices,
            camera: None,
            microphone: None,
            speaker: true,
            released: false,
        }
    }

    /// Request the wanted devices independently.
    ///
    /// A failure on one device never prevents acquiring the other.
    pub async fn acquire(&mut self, camera: bool, microphone: bool) -> AcquireReport {
        let mut errors = Vec::new();

        if camera && self.camera.is_none() {
            match self.devices.request(DeviceKind::Camera).await {
                Ok(id) => self.camera = Some(Track { id, enabled: true }),
                Err(e) => {
                    tracing::warn!(error = %e, "Camera not acquired");
                    errors.push(e);
                }
            }
        }

        if microphone && self.microphone.is_none() {
            match self.devices.request(DeviceKind::Microphone).await {
                Ok(id) => self.microphone = Some(Track { id, enabled: true }),
                Err(e) => {
                    tracing::warn!(error = %e, "Microphone not acquired");
                    errors.push(e);
                }
            }
        }

        self.released = false;
        let flags = self.flags();
        tracing::info!(camera = flags.camera, microphone = flags.microphone, "Media acquired");
        AcquireReport { flags, errors }
    }

    /// Flip the camera track. Returns the new state.
    pub fn toggle_camera(&mut self) -> Result<bool, MediaError> {
        Self::toggle(&mut self.devices, self.camera.as_mut(), DeviceKind::Camera)
    }

    /// Flip the microphone track. Returns the new state.
    pub fn toggle_microphone(&mut self) -> Result<bool, MediaError> {
        Self::toggle(
            &mut self.devices,
            self.microphone.as_mut(),
            DeviceKind::Microphone,
        )
    }

    /// Flip remote audio output. Returns the new state.
    pub fn toggle_speaker(&mut self) -> bool {
        self.speaker = !self.speaker;
        self.speaker
    }

    pub fn flags(&self) -> MediaFlags {
        MediaFlags {
            camera: self.camera.as_ref().is_some_and(|t| t.enabled),
            microphone: self.microphone.as_ref().is_some_and(|t| t.enabled),
            speaker: self.speaker,
        }
    }

    /// Stop every track. Only the first call does any work.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        for track in [self.camera.take(), self.microphone.take()].into_iter().flatten() {
            self.devices.stop(&track.id);
        }
        self.released = true;
        tracing::info!("Media released");
        true
    }

    fn toggle(
        devices: &mut Box<dyn MediaDevices>,
        track: Option<&mut Track>,
        kind: DeviceKind,
    ) -> Result<bool, MediaError> {
        let track = track
            .ok_or_else(|| MediaError::DeviceUnavailable(kind, "not acquired".into()))?;
        track.enabled = !track.enabled;
        devices.set_enabled(&track.id, track.enabled);
        Ok(track.enabled)
    }
}
