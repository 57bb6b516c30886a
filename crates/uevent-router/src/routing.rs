//! Routing tables: in-memory registries mapping USB `(vendor, product,
//! serial)` and MAC address to a container.
//!
//! Grounded on the original's `list_t*` linear scan over small (tens of
//! entries) collections — reexpressed as `Vec`-backed association lists;
//! cardinalities never justify anything fancier.

use crate::collaborators::ContainerId;
use crate::netlink::error::{Error, Result};

/// What a registered USB device is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbDeviceType {
    Generic,
    Token,
    PinEntry,
}

/// A USB device registered for pass-through to a container.
///
/// `major`/`minor` start at `-1` and are populated once a matching `add`
/// event is observed (spec.md §3).
#[derive(Debug, Clone)]
pub struct UsbDevice {
    pub device_type: UsbDeviceType,
    pub id_vendor: u16,
    pub id_product: u16,
    pub i_serial: String,
    pub major: i32,
    pub minor: i32,
    pub assign: bool,
}

impl UsbDevice {
    pub fn new(
        device_type: UsbDeviceType,
        id_vendor: u16,
        id_product: u16,
        i_serial: impl Into<String>,
        assign: bool,
    ) -> Self {
        Self {
            device_type,
            id_vendor,
            id_product,
            i_serial: i_serial.into(),
            major: -1,
            minor: -1,
            assign,
        }
    }

    fn matches_identity(&self, other: &UsbDevice) -> bool {
        self.id_vendor == other.id_vendor
            && self.id_product == other.id_product
            && self.i_serial == other.i_serial
    }
}

/// A USB device registered against a specific container.
#[derive(Debug, Clone)]
pub struct UsbMapping {
    pub container: ContainerId,
    pub usbdev: UsbDevice,
}

/// A container's physical-network configuration: the interface name or
/// MAC it should receive, and whether the guest sees a filtering bridge.
#[derive(Debug, Clone)]
pub struct PnetCfg {
    pub pnet_name: String,
    pub mac_filter: bool,
    pub vlan: Option<u16>,
}

impl PnetCfg {
    pub fn new(pnet_name: impl Into<String>, mac_filter: bool) -> Self {
        Self {
            pnet_name: pnet_name.into(),
            mac_filter,
            vlan: None,
        }
    }
}

/// A MAC-to-container mapping.
#[derive(Debug, Clone)]
pub struct NetMapping {
    pub container: ContainerId,
    pub pnet_cfg: PnetCfg,
    pub mac: [u8; 6],
}

/// Parse a colon-separated MAC address string (`aa:bb:cc:dd:ee:ff`),
/// case-insensitive.
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for slot in out.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Render a MAC address as a colon-separated lowercase hex string.
pub fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Both routing tables, consulted by the NIC mover (§4.C) and USB
/// dispatcher (§4.E) and mutated by the administrative API (spec.md §5).
/// `router::UeventRouter` wraps this in a `tokio::sync::Mutex` so the
/// settle-timer tasks it spawns can read it without blocking the
/// administrative API or the main read loop for longer than one lookup.
#[derive(Debug, Default)]
pub struct RoutingTables {
    usb: Vec<UsbMapping>,
    net: Vec<NetMapping>,
}

impl RoutingTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a USB mapping. A second register with identical identity
    /// (container, vendor, product, serial) replaces the previous
    /// record's `major`/`minor` state rather than duplicating it.
    pub fn register_usb(&mut self, container: ContainerId, usbdev: UsbDevice) {
        if let Some(existing) = self
            .usb
            .iter_mut()
            .find(|m| m.container == container && m.usbdev.matches_identity(&usbdev))
        {
            existing.usbdev = usbdev;
        } else {
            self.usb.push(UsbMapping { container, usbdev });
        }
    }

    /// Unregister by identity; a no-op returning `false` if not present.
    pub fn unregister_usb(
        &mut self,
        container: ContainerId,
        id_vendor: u16,
        id_product: u16,
        i_serial: &str,
    ) -> bool {
        let before = self.usb.len();
        self.usb.retain(|m| {
            !(m.container == container
                && m.usbdev.id_vendor == id_vendor
                && m.usbdev.id_product == id_product
                && m.usbdev.i_serial == i_serial)
        });
        self.usb.len() != before
    }

    pub fn iter_usb(&self) -> impl Iterator<Item = &UsbMapping> {
        self.usb.iter()
    }

    pub fn iter_usb_mut(&mut self) -> impl Iterator<Item = &mut UsbMapping> {
        self.usb.iter_mut()
    }

    /// Register a NET mapping. Fails with `RegistrationInvalid` if
    /// `pnet_cfg.pnet_name` does not parse as a MAC address. A second
    /// register for the same (container, mac) replaces the stored
    /// `pnet_cfg`.
    pub fn register_net(&mut self, container: ContainerId, pnet_cfg: PnetCfg) -> Result<()> {
        let mac = parse_mac(&pnet_cfg.pnet_name).ok_or_else(|| {
            Error::RegistrationInvalid(format!("'{}' is not a MAC address", pnet_cfg.pnet_name))
        })?;

        if let Some(existing) = self
            .net
            .iter_mut()
            .find(|m| m.container == container && m.mac == mac)
        {
            existing.pnet_cfg = pnet_cfg;
        } else {
            self.net.push(NetMapping {
                container,
                pnet_cfg,
                mac,
            });
        }
        Ok(())
    }

    /// Unregister by (container, mac); a no-op returning `false` if not
    /// present.
    pub fn unregister_net(&mut self, container: ContainerId, mac: [u8; 6]) -> bool {
        let before = self.net.len();
        self.net.retain(|m| !(m.container == container && m.mac == mac));
        self.net.len() != before
    }

    pub fn iter_net(&self) -> impl Iterator<Item = &NetMapping> {
        self.net.iter()
    }

    /// The first mapping whose MAC matches, per spec.md §4.C step 2.
    pub fn find_net_by_mac(&self, mac: [u8; 6]) -> Option<&NetMapping> {
        self.net.iter().find(|m| m.mac == mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u32) -> ContainerId {
        ContainerId(n)
    }

    #[test]
    fn usb_register_unregister_round_trips() {
        let mut tables = RoutingTables::new();
        assert_eq!(tables.iter_usb().count(), 0);
        tables.register_usb(
            cid(1),
            UsbDevice::new(UsbDeviceType::Generic, 0x1d6b, 0x0002, "0000:00:14.0", false),
        );
        assert_eq!(tables.iter_usb().count(), 1);
        assert!(tables.unregister_usb(cid(1), 0x1d6b, 0x0002, "0000:00:14.0"));
        assert_eq!(tables.iter_usb().count(), 0);
    }

    #[test]
    fn usb_unregister_missing_is_a_noop() {
        let mut tables = RoutingTables::new();
        assert!(!tables.unregister_usb(cid(1), 0x1d6b, 0x0002, "nope"));
    }

    #[test]
    fn usb_reregister_replaces_major_minor_state() {
        let mut tables = RoutingTables::new();
        let mut dev = UsbDevice::new(UsbDeviceType::Generic, 0x1d6b, 0x0002, "0000:00:14.0", false);
        dev.major = 189;
        dev.minor = 3;
        tables.register_usb(cid(1), dev);

        // Re-register the same identity without major/minor populated.
        tables.register_usb(
            cid(1),
            UsbDevice::new(UsbDeviceType::Generic, 0x1d6b, 0x0002, "0000:00:14.0", false),
        );
        assert_eq!(tables.iter_usb().count(), 1);
        let only = tables.iter_usb().next().unwrap();
        assert_eq!(only.usbdev.major, -1);
    }

    #[test]
    fn net_register_fails_on_non_mac_pnet_name() {
        let mut tables = RoutingTables::new();
        let err = tables
            .register_net(cid(1), PnetCfg::new("eth0", false))
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationInvalid(_)));
    }

    #[test]
    fn net_register_unregister_round_trips() {
        let mut tables = RoutingTables::new();
        tables
            .register_net(cid(1), PnetCfg::new("52:54:00:12:34:56", false))
            .unwrap();
        assert_eq!(tables.iter_net().count(), 1);
        let mac = parse_mac("52:54:00:12:34:56").unwrap();
        assert!(tables.unregister_net(cid(1), mac));
        assert_eq!(tables.iter_net().count(), 0);
    }

    #[test]
    fn find_net_by_mac_matches_first_entry() {
        let mut tables = RoutingTables::new();
        tables
            .register_net(cid(1), PnetCfg::new("52:54:00:12:34:56", false))
            .unwrap();
        let mac = parse_mac("52:54:00:12:34:56").unwrap();
        let found = tables.find_net_by_mac(mac).unwrap();
        assert_eq!(found.container, cid(1));
    }

    #[test]
    fn mac_formatting_round_trips() {
        let mac = parse_mac("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(format_mac(mac), "aa:bb:cc:dd:ee:ff");
    }
}
