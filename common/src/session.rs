use log::{info, warn};
use serde::Serialize;

use crate::config::ConnectionParams;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    UpdateConnParams {
        conn_handle: u16,
        params: ConnectionParams,
    },
    Disconnect {
        conn_handle: u16,
    },
    RestartAdvertising,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    #[serde(rename = "connHandle")]
    pub conn_handle: u16,
    pub address: String,
    pub encrypted: bool,
}

/// Connection state shared between transport events and the power rules.
#[derive(Debug, Clone)]
pub struct SessionState {
    connected: bool,
    last_activity_ms: u64,
    peer: Option<Peer>,
    params: ConnectionParams,
}

impl SessionState {
    pub fn new(params: ConnectionParams, now_ms: u64) -> Self {
        Self {
            connected: false,
            last_activity_ms: now_ms,
            peer: None,
            params,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    pub fn on_connect(
        &mut self,
        conn_handle: u16,
        address: String,
        now_ms: u64,
    ) -> Vec<SessionAction> {
        info!("client connected: {address} (handle {conn_handle})");
        self.connected = true;
        self.last_activity_ms = now_ms;
        self.peer = Some(Peer {
            conn_handle,
            address,
            encrypted: false,
        });

        vec![SessionAction::UpdateConnParams {
            conn_handle,
            params: self.params,
        }]
    }

    pub fn on_disconnect(
        &mut self,
        conn_handle: u16,
        reason: i32,
        now_ms: u64,
    ) -> Vec<SessionAction> {
        info!("client disconnected (handle {conn_handle}, reason {reason}), restarting advertising");
        self.connected = false;
        self.last_activity_ms = now_ms;
        self.peer = None;

        vec![SessionAction::RestartAdvertising]
    }

    /// Unencrypted links are never kept.
    pub fn on_authentication_complete(
        &mut self,
        conn_handle: u16,
        encrypted: bool,
    ) -> Vec<SessionAction> {
        if !encrypted {
            warn!("encryption failed on handle {conn_handle}; disconnecting client");
            return vec![SessionAction::Disconnect { conn_handle }];
        }

        match self.peer.as_mut() {
            Some(peer) if peer.conn_handle == conn_handle => {
                peer.encrypted = true;
                info!("secured connection to {}", peer.address);
            }
            _ => info!("secured connection on handle {conn_handle}"),
        }

        Vec::new()
    }
}
