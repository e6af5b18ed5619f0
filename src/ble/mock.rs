//! Recording host and soft-AP doubles for the unit tests.

extern crate std;

use std::vec::Vec;

use heapless::Vec as HVec;

use crate::error::{HostError, WifiError};
use crate::wifi::SoftAp;

use super::gatt_server::ServiceDef;
use super::host::{BleHost, ConnInfo, ScanParams, ScanToken, TimerId};
use super::{AdvData, Address, AddressType, AttrHandle, AttrValue, ConnHandle};

/// Host command accepted by [`MockHost`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    SetAdvData(AdvData),
    SetScanResponse(AdvData),
    StartAdvertising,
    StartScan(ScanParams),
    CancelScan(ScanToken),
    Connect {
        own: AddressType,
        peer: Address,
        timeout_ms: u32,
    },
    Terminate {
        conn: ConnHandle,
        reason: u8,
    },
    DiscoverAll(ConnHandle),
    Write {
        conn: ConnHandle,
        attr: AttrHandle,
        data: AttrValue,
    },
    Read {
        conn: ConnHandle,
        attr: AttrHandle,
    },
    Notify {
        conn: ConnHandle,
        attr: AttrHandle,
        data: AttrValue,
    },
    DeleteBond(Address),
    RegisterServices(usize),
    Schedule(TimerId, u32),
}

/// Records every accepted command. Failing calls are not recorded.
pub struct MockHost {
    commands: Vec<Command>,
    conns: Vec<ConnInfo>,
    next_token: u32,
    /// Number of upcoming `start_advertising` calls that fail.
    pub fail_advertise: u8,
    /// Number of upcoming `start_scan` calls that fail.
    pub fail_scan: u8,
    pub fail_cancel: bool,
    pub connect_result: Result<(), HostError>,
    pub fail_discover: bool,
    pub fail_writes: bool,
    pub fail_register: bool,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            conns: Vec::new(),
            next_token: 1,
            fail_advertise: 0,
            fail_scan: 0,
            fail_cancel: false,
            connect_result: Ok(()),
            fail_discover: false,
            fail_writes: false,
            fail_register: false,
        }
    }

    /// Make `conn` a live link and return its descriptor.
    pub fn add_conn(&mut self, conn: ConnHandle) -> ConnInfo {
        let low = conn as u8;
        let info = ConnInfo {
            conn,
            our_id_addr: Address::new(AddressType::Public, [0x10, 0x20, 0x30, 0x40, 0x50, 0x60]),
            peer_ota_addr: Address::new(AddressType::Random, [low, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]),
            peer_id_addr: Address::new(AddressType::Public, [low, 0x11, 0x22, 0x33, 0x44, 0x55]),
            interval: 24,
            latency: 0,
            supervision_timeout: 400,
            encrypted: false,
            authenticated: false,
            bonded: false,
        };
        self.conns.retain(|c| c.conn != conn);
        self.conns.push(info);
        info
    }

    /// Drain the recorded commands.
    pub fn take(&mut self) -> Vec<Command> {
        core::mem::take(&mut self.commands)
    }

    pub fn last(&self) -> Option<&Command> {
        self.commands.last()
    }

    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    fn record(&mut self, cmd: Command) -> Result<(), HostError> {
        self.commands.push(cmd);
        Ok(())
    }
}

fn copy<const N: usize>(data: &[u8]) -> Result<HVec<u8, N>, HostError> {
    HVec::from_slice(data).map_err(|_| HostError(-1))
}

impl BleHost for MockHost {
    fn set_adv_data(&mut self, data: &[u8]) -> Result<(), HostError> {
        let data = copy(data)?;
        self.record(Command::SetAdvData(data))
    }

    fn set_scan_response(&mut self, data: &[u8]) -> Result<(), HostError> {
        let data = copy(data)?;
        self.record(Command::SetScanResponse(data))
    }

    fn start_advertising(&mut self) -> Result<(), HostError> {
        if self.fail_advertise > 0 {
            self.fail_advertise -= 1;
            return Err(HostError(3));
        }
        self.record(Command::StartAdvertising)
    }

    fn own_address_type(&mut self) -> Result<AddressType, HostError> {
        Ok(AddressType::Public)
    }

    fn start_scan(&mut self, params: &ScanParams) -> Result<ScanToken, HostError> {
        if self.fail_scan > 0 {
            self.fail_scan -= 1;
            return Err(HostError(3));
        }
        let token = ScanToken(self.next_token);
        self.next_token += 1;
        self.record(Command::StartScan(*params))?;
        Ok(token)
    }

    fn cancel_scan(&mut self, token: ScanToken) -> Result<(), HostError> {
        if self.fail_cancel {
            return Err(HostError(2));
        }
        self.record(Command::CancelScan(token))
    }

    fn connect(&mut self, own: AddressType, peer: &Address, timeout_ms: u32) -> Result<(), HostError> {
        self.connect_result?;
        self.record(Command::Connect {
            own,
            peer: *peer,
            timeout_ms,
        })
    }

    fn terminate(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
        self.record(Command::Terminate { conn, reason })
    }

    fn discover_all(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        if self.fail_discover {
            return Err(HostError(7));
        }
        self.record(Command::DiscoverAll(conn))
    }

    fn write(&mut self, conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        if self.fail_writes {
            return Err(HostError(7));
        }
        let data = copy(data)?;
        self.record(Command::Write { conn, attr, data })
    }

    fn read(&mut self, conn: ConnHandle, attr: AttrHandle) -> Result<(), HostError> {
        self.record(Command::Read { conn, attr })
    }

    fn notify(&mut self, conn: ConnHandle, attr: AttrHandle, data: &[u8]) -> Result<(), HostError> {
        let data = copy(data)?;
        self.record(Command::Notify { conn, attr, data })
    }

    fn delete_bond(&mut self, peer: &Address) -> Result<(), HostError> {
        self.record(Command::DeleteBond(*peer))
    }

    fn conn_info(&self, conn: ConnHandle) -> Option<ConnInfo> {
        self.conns.iter().find(|c| c.conn == conn).copied()
    }

    fn register_services(&mut self, services: &'static [ServiceDef]) -> Result<(), HostError> {
        if self.fail_register {
            return Err(HostError(4));
        }
        self.record(Command::RegisterServices(services.len()))
    }

    fn schedule(&mut self, timer: TimerId, delay_ms: u32) {
        self.commands.push(Command::Schedule(timer, delay_ms));
    }
}

/// Counts soft-AP requests.
#[derive(Debug, Default)]
pub struct MockWifi {
    pub starts: u32,
    pub stops: u32,
    pub fail: bool,
}

impl SoftAp for MockWifi {
    fn start_soft_ap(&mut self) -> Result<(), WifiError> {
        if self.fail {
            return Err(WifiError(-1));
        }
        self.starts += 1;
        Ok(())
    }

    fn stop_soft_ap(&mut self) {
        self.stops += 1;
    }
}
