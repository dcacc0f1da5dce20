//! Process-wide session table

use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::radio::NativeRadio;
use crate::session::Session;
use crate::{DeviceId, Error, Result};

/// Active device sessions, keyed by device identifier.
///
/// At most one session exists per identifier; `connect` for a known identifier is a
/// no-op. The map is the only cross-session shared state and is mutated solely under the
/// bridge's registry lock, so callback routing and command handling never race.
pub(crate) struct Registry<R: NativeRadio> {
    sessions: HashMap<DeviceId, Session<R>>,
}

impl<R: NativeRadio> Registry<R> {
    pub fn new() -> Self {
        Registry {
            sessions: HashMap::new(),
        }
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.sessions.contains_key(device_id)
    }

    pub fn insert(&mut self, device_id: DeviceId, session: Session<R>) {
        self.sessions.insert(device_id, session);
    }

    /// Removes a session on the terminal transition. `None` means the callback raced a
    /// previous removal and should be dropped.
    pub fn remove(&mut self, device_id: &DeviceId) -> Option<Session<R>> {
        self.sessions.remove(device_id)
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<&Session<R>> {
        self.sessions.get(device_id)
    }

    pub fn get_mut(&mut self, device_id: &DeviceId) -> Option<&mut Session<R>> {
        self.sessions.get_mut(device_id)
    }

    /// Command-path lookup: a missing session is an [`UnknownDevice`][ErrorKind::UnknownDevice]
    /// error, unlike the callback path where it means a droppable stale callback.
    pub fn lookup(&self, device_id: &DeviceId) -> Result<&Session<R>> {
        self.get(device_id).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                None,
                format!("unknown device {device_id}"),
            )
        })
    }
}
