//! Hand-off of finalized profiles from acquisition to transmission.
//!
//! Producer and consumer exchange owned profiles over a bounded channel; the
//! consumer is the only owner of a profile once it has been received.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use tracing::debug;

use crate::protocol::FinalizedProfile;

use super::error::TransportError;

/// Producer side, held by the acquisition task.
#[derive(Debug, Clone)]
pub struct ProfileSender {
    inner: SyncSender<FinalizedProfile>,
}

/// Consumer side, held by the transmission task.
#[derive(Debug)]
pub struct ProfileReceiver {
    inner: Receiver<FinalizedProfile>,
}

/// Bounded channel holding at most `capacity` profiles awaiting transmission.
#[must_use]
pub fn profile_channel(capacity: usize) -> (ProfileSender, ProfileReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (ProfileSender { inner: tx }, ProfileReceiver { inner: rx })
}

impl ProfileSender {
    /// Hand over a profile, waiting while the channel is full.
    pub fn send(&self, profile: FinalizedProfile) -> Result<(), TransportError> {
        let profile_id = profile.profile_id();
        self.inner
            .send(profile)
            .map_err(|_| TransportError::Closed)?;
        debug!(profile_id, "profile handed to transmission");
        Ok(())
    }

    /// Hand over a profile without waiting; a full channel returns it.
    pub fn try_send(&self, profile: FinalizedProfile) -> Result<(), FinalizedProfile> {
        match self.inner.try_send(profile) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(profile) | TrySendError::Disconnected(profile)) => Err(profile),
        }
    }
}

impl ProfileReceiver {
    /// Next profile; `None` once every sender is gone.
    pub fn recv(&self) -> Option<FinalizedProfile> {
        self.inner.recv().ok()
    }

    /// Next profile if one arrives within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<FinalizedProfile>, TransportError> {
        match self.inner.recv_timeout(timeout) {
            Ok(profile) => Ok(Some(profile)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    /// Next profile if one is already waiting.
    pub fn try_recv(&self) -> Option<FinalizedProfile> {
        self.inner.try_recv().ok()
    }
}
