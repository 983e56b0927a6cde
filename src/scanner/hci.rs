//! Raw HCI socket backend for iBeacon scanning.
//!
//! This backend talks to the controller through raw Linux HCI sockets,
//! without the BlueZ daemon. It requires CAP_NET_RAW and CAP_NET_ADMIN
//! capabilities or root privileges.
//!
//! Scan parameters are written once when the backend opens; the scheduler
//! then toggles `LE Set Scan Enable` through [`HciRadio`].

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, RawAdvertisement, ScanError, ScanSession};
use crate::scheduler::RadioControl;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::{debug, warn};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// Max HCI event size
const HCI_MAX_EVENT_SIZE: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// `LE Set Scan Parameters`: active scan, 10ms interval, 10ms window.
///
/// Active scanning also collects scan responses, where some beacons place
/// their manufacturer data.
fn scan_parameters_packet() -> Vec<u8> {
    let interval: u16 = 0x0010; // 10ms in 0.625ms units
    let window: u16 = 0x0010;

    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_ACTIVE);
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// `LE Set Scan Enable` without duplicate filtering.
fn scan_enable_packet(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd, and keeps command writes from blocking
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Set HCI socket filter
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Scan control over an HCI command socket.
pub struct HciRadio {
    cmd_fd: OwnedFd,
}

impl RadioControl for HciRadio {
    fn start_scan(&self) -> Result<(), ScanError> {
        send_hci_command(&self.cmd_fd, &scan_enable_packet(true))
    }

    fn stop_scan(&self) -> Result<(), ScanError> {
        send_hci_command(&self.cmd_fd, &scan_enable_packet(false))
    }
}

/// Extract the AD data of every report in an LE advertising report event.
///
/// `data` is the full HCI event packet, starting with the packet type byte.
/// Each report is laid out as event type, address type, address, data length,
/// data and RSSI. Parsing stops at the first report that runs past the end of
/// the packet; reports before it are still returned.
fn parse_advertising_reports(data: &[u8]) -> Vec<RawAdvertisement> {
    // Skip HCI header (1 byte packet type + 1 byte event code + 1 byte param len + 1 byte subevent)
    let Some((&num_reports, mut rest)) = data.get(4..).and_then(<[u8]>::split_first) else {
        return Vec::new();
    };

    let mut advertisements = Vec::with_capacity(num_reports as usize);
    for _ in 0..num_reports {
        // event_type(1) + addr_type(1) + address(6), then data length
        let Some(&data_len) = rest.get(8) else {
            break;
        };
        let data_end = 9 + data_len as usize;
        // AD data is followed by one RSSI byte
        let Some(ad_data) = rest.get(9..data_end) else {
            break;
        };
        advertisements.push(ad_data.to_vec());
        rest = rest.get(data_end + 1..).unwrap_or_default();
    }
    advertisements
}

/// Forward advertising reports from `async_fd` until the socket fails or
/// the receiver goes away.
///
/// Returning drops `tx`, which ends the advertisement stream.
async fn read_reports(async_fd: AsyncFd<OwnedFd>, tx: mpsc::Sender<RawAdvertisement>) {
    let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

    loop {
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!("HCI socket failed: {e}");
                return;
            }
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(0)) => {
                    warn!("HCI socket closed");
                    return;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!("HCI read failed: {e}");
                    return;
                }
                Err(_would_block) => break,
            };

            if n < 4
                || buf[0] != HCI_EVENT_PKT
                || buf[1] != EVT_LE_META_EVENT
                || buf[3] != EVT_LE_ADVERTISING_REPORT
            {
                continue;
            }

            for advertisement in parse_advertising_reports(&buf[..n]) {
                if tx.send(advertisement).await.is_err() {
                    debug!("Advertisement receiver closed, stopping HCI reader");
                    return;
                }
            }
        }
    }
}

/// Open raw HCI sockets on hci0 and start reading advertising reports.
///
/// Scanning stays disabled until [`HciRadio::start_scan`] is called.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<ScanSession, ScanError> {
    // Socket for receiving events
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, 0)?;
    set_hci_filter(&fd)?;

    // Separate socket for sending commands
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, 0)?;
    // A scan left enabled by another process would reject new parameters
    send_hci_command(&cmd_fd, &scan_enable_packet(false))?;
    send_hci_command(&cmd_fd, &scan_parameters_packet())?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(read_reports(async_fd, tx));

    Ok(ScanSession {
        radio: Arc::new(HciRadio { cmd_fd }),
        advertisements: rx,
    })
}
