//! Peer store: the discovered GATT tree of each central-side connection.

use heapless::Vec;

use crate::config::{MAX_PEERS, MAX_PEER_CHARACTERISTICS, MAX_PEER_DESCRIPTORS, MAX_PEER_SERVICES};
use crate::error::PeerError;

use super::uuid::Uuid;
use super::{AttrHandle, ConnHandle, DiscoveredAttribute};

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerService {
    pub uuid: Uuid,
    pub start_handle: AttrHandle,
    pub end_handle: AttrHandle,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerCharacteristic {
    pub service_start: AttrHandle,
    pub uuid: Uuid,
    pub def_handle: AttrHandle,
    pub val_handle: AttrHandle,
    pub properties: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerDescriptor {
    pub chr_val_handle: AttrHandle,
    pub uuid: Uuid,
    pub handle: AttrHandle,
}

/// Handle range of a peer service rebuilt from what was found inside it,
/// for hosts whose discovery reports characteristics but not the service
/// declaration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceSpan {
    bounds: Option<(AttrHandle, AttrHandle)>,
}

impl ServiceSpan {
    pub const fn new() -> Self {
        Self { bounds: None }
    }

    /// Widen the span to include `handle`.
    pub fn cover(&mut self, handle: AttrHandle) {
        self.bounds = Some(match self.bounds {
            None => (handle, handle),
            Some((lo, hi)) => (lo.min(handle), hi.max(handle)),
        });
    }

    /// `(start, end)` of the service. The declaration directly precedes
    /// the first characteristic declaration. `None` when nothing was found.
    pub fn range(&self) -> Option<(AttrHandle, AttrHandle)> {
        let (lo, hi) = self.bounds?;
        Some((lo.saturating_sub(1).max(1), hi))
    }
}

/// Discovery progress of one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryState {
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

/// One connected peer and what we know about its attribute table.
#[derive(Clone, Debug, PartialEq)]
pub struct Peer {
    pub conn: ConnHandle,
    pub discovery: DiscoveryState,
    services: Vec<PeerService, MAX_PEER_SERVICES>,
    characteristics: Vec<PeerCharacteristic, MAX_PEER_CHARACTERISTICS>,
    descriptors: Vec<PeerDescriptor, MAX_PEER_DESCRIPTORS>,
}

impl Peer {
    pub fn new(conn: ConnHandle) -> Self {
        Self {
            conn,
            discovery: DiscoveryState::NotStarted,
            services: Vec::new(),
            characteristics: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn services(&self) -> &[PeerService] {
        &self.services
    }

    pub fn find_service(&self, uuid: &Uuid) -> Option<&PeerService> {
        self.services.iter().find(|s| &s.uuid == uuid)
    }

    pub fn find_characteristic(&self, svc: &Uuid, chr: &Uuid) -> Option<&PeerCharacteristic> {
        let service = self.find_service(svc)?;
        self.characteristics
            .iter()
            .find(|c| c.service_start == service.start_handle && &c.uuid == chr)
    }

    pub fn find_descriptor(&self, svc: &Uuid, chr: &Uuid, dsc: &Uuid) -> Option<&PeerDescriptor> {
        let characteristic = self.find_characteristic(svc, chr)?;
        self.descriptors
            .iter()
            .find(|d| d.chr_val_handle == characteristic.val_handle && &d.uuid == dsc)
    }

    fn clear_tree(&mut self) {
        self.services.clear();
        self.characteristics.clear();
        self.descriptors.clear();
    }

    fn record(&mut self, attribute: &DiscoveredAttribute) -> Result<(), PeerError> {
        match *attribute {
            DiscoveredAttribute::Service {
                uuid,
                start_handle,
                end_handle,
            } => self
                .services
                .push(PeerService {
                    uuid,
                    start_handle,
                    end_handle,
                })
                .map_err(|_| PeerError::NoMemory),
            DiscoveredAttribute::Characteristic {
                service_start,
                uuid,
                def_handle,
                val_handle,
                properties,
            } => {
                if !self.services.iter().any(|s| s.start_handle == service_start) {
                    return Err(PeerError::NotFound);
                }
                self.characteristics
                    .push(PeerCharacteristic {
                        service_start,
                        uuid,
                        def_handle,
                        val_handle,
                        properties,
                    })
                    .map_err(|_| PeerError::NoMemory)
            }
            DiscoveredAttribute::Descriptor {
                chr_val_handle,
                uuid,
                handle,
            } => {
                if !self
                    .characteristics
                    .iter()
                    .any(|c| c.val_handle == chr_val_handle)
                {
                    return Err(PeerError::NotFound);
                }
                self.descriptors
                    .push(PeerDescriptor {
                        chr_val_handle,
                        uuid,
                        handle,
                    })
                    .map_err(|_| PeerError::NoMemory)
            }
        }
    }
}

/// Operations the central side needs from the peer store.
///
/// Discovery itself is run by the host; the store tracks that at most one
/// discovery is outstanding per connection and collects its results.
pub trait PeerStore {
    fn add(&mut self, conn: ConnHandle) -> Result<(), PeerError>;
    fn remove(&mut self, conn: ConnHandle) -> Result<(), PeerError>;
    fn find(&self, conn: ConnHandle) -> Option<&Peer>;

    /// Mark a full discovery as started for `conn`, dropping any earlier tree.
    fn discover_all(&mut self, conn: ConnHandle) -> Result<(), PeerError>;
    /// Store one discovery result.
    fn record(&mut self, conn: ConnHandle, attribute: &DiscoveredAttribute)
        -> Result<(), PeerError>;
    /// Close the outstanding discovery with its final status.
    fn finish_discovery(&mut self, conn: ConnHandle, success: bool) -> Result<(), PeerError>;

    fn find_characteristic(
        &self,
        conn: ConnHandle,
        svc: &Uuid,
        chr: &Uuid,
    ) -> Option<PeerCharacteristic> {
        self.find(conn)?.find_characteristic(svc, chr).copied()
    }

    fn find_descriptor(
        &self,
        conn: ConnHandle,
        svc: &Uuid,
        chr: &Uuid,
        dsc: &Uuid,
    ) -> Option<PeerDescriptor> {
        self.find(conn)?.find_descriptor(svc, chr, dsc).copied()
    }
}

/// Fixed-capacity [`PeerStore`].
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Vec<Peer, MAX_PEERS>,
}

impl PeerTable {
    pub const fn new() -> Self {
        Self { peers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn find_mut(&mut self, conn: ConnHandle) -> Result<&mut Peer, PeerError> {
        self.peers
            .iter_mut()
            .find(|p| p.conn == conn)
            .ok_or(PeerError::NotFound)
    }
}

impl PeerStore for PeerTable {
    fn add(&mut self, conn: ConnHandle) -> Result<(), PeerError> {
        if self.find(conn).is_some() {
            return Err(PeerError::AlreadyExists);
        }
        self.peers
            .push(Peer::new(conn))
            .map_err(|_| PeerError::NoMemory)
    }

    fn remove(&mut self, conn: ConnHandle) -> Result<(), PeerError> {
        let idx = self
            .peers
            .iter()
            .position(|p| p.conn == conn)
            .ok_or(PeerError::NotFound)?;
        self.peers.swap_remove(idx);
        Ok(())
    }

    fn find(&self, conn: ConnHandle) -> Option<&Peer> {
        self.peers.iter().find(|p| p.conn == conn)
    }

    fn discover_all(&mut self, conn: ConnHandle) -> Result<(), PeerError> {
        let peer = self.find_mut(conn)?;
        if peer.discovery == DiscoveryState::InProgress {
            return Err(PeerError::DiscoveryInProgress);
        }
        peer.clear_tree();
        peer.discovery = DiscoveryState::InProgress;
        Ok(())
    }

    fn record(
        &mut self,
        conn: ConnHandle,
        attribute: &DiscoveredAttribute,
    ) -> Result<(), PeerError> {
        let peer = self.find_mut(conn)?;
        if peer.discovery != DiscoveryState::InProgress {
            return Err(PeerError::NotDiscovering);
        }
        peer.record(attribute)
    }

    fn finish_discovery(&mut self, conn: ConnHandle, success: bool) -> Result<(), PeerError> {
        let peer = self.find_mut(conn)?;
        if peer.discovery != DiscoveryState::InProgress {
            return Err(PeerError::NotDiscovering);
        }
        peer.discovery = if success {
            DiscoveryState::Complete
        } else {
            DiscoveryState::Failed
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::ids;

    fn service(uuid: Uuid, start: u16, end: u16) -> DiscoveredAttribute {
        DiscoveredAttribute::Service {
            uuid,
            start_handle: start,
            end_handle: end,
        }
    }

    fn characteristic(svc_start: u16, uuid: Uuid, val: u16) -> DiscoveredAttribute {
        DiscoveredAttribute::Characteristic {
            service_start: svc_start,
            uuid,
            def_handle: val - 1,
            val_handle: val,
            properties: 0x12,
        }
    }

    fn cccd(val: u16) -> DiscoveredAttribute {
        DiscoveredAttribute::Descriptor {
            chr_val_handle: val,
            uuid: ids::CCCD,
            handle: val + 1,
        }
    }

    #[test]
    fn add_find_remove() {
        let mut table = PeerTable::new();
        table.add(1).unwrap();
        assert!(table.find(1).is_some());
        assert_eq!(table.add(1), Err(PeerError::AlreadyExists));
        table.remove(1).unwrap();
        assert!(table.find(1).is_none());
        assert_eq!(table.remove(1), Err(PeerError::NotFound));
    }

    #[test]
    fn table_is_bounded() {
        let mut table = PeerTable::new();
        for conn in 0..MAX_PEERS as u16 {
            table.add(conn).unwrap();
        }
        assert_eq!(table.add(99), Err(PeerError::NoMemory));
    }

    #[test]
    fn one_discovery_at_a_time() {
        let mut table = PeerTable::new();
        table.add(1).unwrap();
        table.discover_all(1).unwrap();
        assert_eq!(table.discover_all(1), Err(PeerError::DiscoveryInProgress));
        table.finish_discovery(1, true).unwrap();
        assert_eq!(table.find(1).unwrap().discovery, DiscoveryState::Complete);
        assert_eq!(table.finish_discovery(1, true), Err(PeerError::NotDiscovering));
    }

    #[test]
    fn results_outside_discovery_are_rejected() {
        let mut table = PeerTable::new();
        table.add(1).unwrap();
        assert_eq!(
            table.record(1, &service(ids::ENGINE_RPM, 10, 14)),
            Err(PeerError::NotDiscovering)
        );
    }

    #[test]
    fn lookups_are_scoped_to_their_service() {
        let mut table = PeerTable::new();
        table.add(1).unwrap();
        table.discover_all(1).unwrap();
        table.record(1, &service(ids::ENGINE_RPM, 10, 14)).unwrap();
        table.record(1, &characteristic(10, ids::ENGINE_RPM_RPM, 12)).unwrap();
        table.record(1, &cccd(12)).unwrap();
        table.record(1, &service(ids::LOCATION, 20, 30)).unwrap();
        table.record(1, &characteristic(20, ids::LOCATION_SPEED_KPH, 22)).unwrap();
        table.finish_discovery(1, true).unwrap();

        let chr = table
            .find_characteristic(1, &ids::ENGINE_RPM, &ids::ENGINE_RPM_RPM)
            .unwrap();
        assert_eq!(chr.val_handle, 12);

        // Right characteristic, wrong service.
        assert!(table
            .find_characteristic(1, &ids::LOCATION, &ids::ENGINE_RPM_RPM)
            .is_none());

        let dsc = table
            .find_descriptor(1, &ids::ENGINE_RPM, &ids::ENGINE_RPM_RPM, &ids::CCCD)
            .unwrap();
        assert_eq!(dsc.handle, 13);
        assert!(table
            .find_descriptor(1, &ids::LOCATION, &ids::LOCATION_SPEED_KPH, &ids::CCCD)
            .is_none());
    }

    #[test]
    fn orphans_are_rejected() {
        let mut table = PeerTable::new();
        table.add(1).unwrap();
        table.discover_all(1).unwrap();
        assert_eq!(
            table.record(1, &characteristic(10, ids::ENGINE_RPM_RPM, 12)),
            Err(PeerError::NotFound)
        );
        assert_eq!(table.record(1, &cccd(12)), Err(PeerError::NotFound));
    }

    #[test]
    fn empty_service_has_no_span() {
        assert_eq!(ServiceSpan::new().range(), None);
    }

    #[test]
    fn span_runs_from_the_declaration_to_the_last_descriptor() {
        let mut span = ServiceSpan::new();
        for handle in [24, 25, 26, 21, 22, 23] {
            span.cover(handle);
        }
        assert_eq!(span.range(), Some((20, 26)));
    }

    #[test]
    fn span_never_starts_at_handle_zero() {
        let mut span = ServiceSpan::new();
        span.cover(1);
        span.cover(2);
        assert_eq!(span.range(), Some((1, 2)));
    }

    #[test]
    fn rediscovery_starts_from_an_empty_tree() {
        let mut table = PeerTable::new();
        table.add(1).unwrap();
        table.discover_all(1).unwrap();
        table.record(1, &service(ids::ENGINE_RPM, 10, 14)).unwrap();
        table.finish_discovery(1, false).unwrap();
        assert_eq!(table.find(1).unwrap().discovery, DiscoveryState::Failed);

        table.discover_all(1).unwrap();
        assert!(table.find(1).unwrap().services().is_empty());
    }
}
