//! In-RAM bond store for both roles.
//!
//! Bonds do not survive a reset. When full, the oldest bond is evicted.

use core::cell::RefCell;

use defmt::{debug, info};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{Address, Connection, EncryptionInfo, IdentityKey, MasterId, SecurityMode};

use tkos_ble::config::MAX_BONDS;

struct PeerBond {
    master_id: MasterId,
    key: EncryptionInfo,
    peer_id: IdentityKey,
}

pub struct Bonder {
    peers: Mutex<CriticalSectionRawMutex, RefCell<Vec<PeerBond, MAX_BONDS>>>,
}

impl Bonder {
    const fn new() -> Self {
        Self {
            peers: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    pub fn is_bonded(&self, addr: &Address) -> bool {
        self.peers
            .lock(|p| p.borrow().iter().any(|p| p.peer_id.is_match(*addr)))
    }

    /// Drop the bond of `addr`. Returns whether one existed.
    pub fn forget(&self, addr: &Address) -> bool {
        self.peers.lock(|p| {
            let mut peers = p.borrow_mut();
            let before = peers.len();
            peers.retain(|p| !p.peer_id.is_match(*addr));
            before != peers.len()
        })
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(&self, conn: &Connection, master_id: MasterId, key: EncryptionInfo, peer_id: IdentityKey) {
        let peer = conn.peer_address();
        self.peers.lock(|p| {
            let mut peers = p.borrow_mut();
            // A peer that pairs again replaces its old keys.
            if let Some(existing) = peers
                .iter_mut()
                .find(|p| p.master_id == master_id || p.peer_id.is_match(peer))
            {
                debug!("bond refreshed");
                existing.master_id = master_id;
                existing.key = key;
                existing.peer_id = peer_id;
                return;
            }

            if peers.is_full() {
                peers.remove(0);
            }
            let _ = peers.push(PeerBond {
                master_id,
                key,
                peer_id,
            });
            info!("bonded; {} bonds stored", peers.len());
        })
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers.lock(|p| {
            p.borrow()
                .iter()
                .find_map(|p| (p.master_id == master_id).then_some(p.key))
        })
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        let peer = conn.peer_address();
        self.peers.lock(|p| {
            p.borrow()
                .iter()
                .find_map(|p| p.peer_id.is_match(peer).then_some((p.master_id, p.key)))
        })
    }

    fn on_security_update(&self, conn: &Connection, mode: SecurityMode) {
        info!("conn={:?} security mode {}", conn.handle(), mode);
    }
}

/// The one bond store, shared by the peripheral and central tasks.
pub fn bonder() -> &'static Bonder {
    static BONDER: Bonder = Bonder::new();
    &BONDER
}
