//! Event codec: parses kernel and libudev netlink uevent frames, locates
//! properties, and rewrites a single property in place while preserving
//! framing invariants.
//!
//! Grounded on the teacher's `netlink/uevent.rs` (NUL-delimited property
//! scan) and `netlink/message.rs` (zerocopy `#[repr(C)]` header read via
//! `ref_from_prefix`). Unlike the original C implementation, which keeps
//! raw pointers into a single mutable buffer, [`UeventFrame`] owns its
//! bytes and [`UeventView`] only ever borrows from a frame it cannot
//! outlive — the borrow checker enforces invariant (iv) instead of caller
//! discipline.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::netlink::error::{Error, Result};

/// Maximum uevent frame size the codec will operate on.
pub const MAX_FRAME_LEN: usize = 8192;

/// Magic value identifying a libudev-framed message, compared in network
/// byte order against the frame's header.
pub const UDEV_MONITOR_MAGIC: u32 = 0xfeed_cafe;

/// The 40-byte libudev monitor header prefixed to udev-framed messages.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UdevMonHeader {
    /// Always `b"libudev\0"`.
    pub prefix: [u8; 8],
    /// `UDEV_MONITOR_MAGIC`, network byte order.
    magic_be: [u8; 4],
    /// Total header size; always 40.
    pub header_size: u32,
    /// Byte offset of the first property, from the start of the frame.
    pub properties_off: u32,
    /// Total byte length of the NUL-delimited property block.
    pub properties_len: u32,
    /// Filter hashes, network byte order; opaque to this codec.
    subsystem_hash_be: [u8; 4],
    devtype_hash_be: [u8; 4],
    tag_bloom_hi_be: [u8; 4],
    tag_bloom_lo_be: [u8; 4],
}

/// Byte offset of `properties_len` within the header, used by [`rewrite`]
/// to patch it in place without re-parsing the whole struct.
const PROPERTIES_LEN_OFFSET: usize = 20;

impl UdevMonHeader {
    /// The magic value in host order.
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic_be)
    }
}

/// An owned uevent frame: the exact bytes received from, or to be sent to,
/// a kobject uevent netlink socket.
#[derive(Debug, Clone)]
pub struct UeventFrame {
    raw: Vec<u8>,
}

impl UeventFrame {
    /// Wrap a received frame. Does not validate framing; use [`parse`] for
    /// that.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// The frame's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The frame's length.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// A parsed, non-owning view over a [`UeventFrame`]'s recognized
/// properties. String fields default to `""` when absent; `major`/`minor`
/// default to `-1`; `id_vendor_id`/`id_model_id` default to `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeventView<'a> {
    pub action: &'a str,
    pub subsystem: &'a str,
    pub devpath: &'a str,
    pub devname: &'a str,
    pub devtype: &'a str,
    pub driver: &'a str,
    pub product: &'a str,
    pub id_serial_short: &'a str,
    pub interface: &'a str,
    pub synth_uuid: &'a str,
    pub major: i32,
    pub minor: i32,
    pub id_vendor_id: u16,
    pub id_model_id: u16,
}

impl<'a> Default for UeventView<'a> {
    fn default() -> Self {
        Self {
            action: "",
            subsystem: "",
            devpath: "",
            devname: "",
            devtype: "",
            driver: "",
            product: "",
            id_serial_short: "",
            interface: "",
            synth_uuid: "",
            major: -1,
            minor: -1,
            id_vendor_id: 0,
            id_model_id: 0,
        }
    }
}

/// Parse a frame into a [`UeventView`] borrowing from it.
///
/// Recognizes two framings: a *kernel* frame whose first NUL-terminated
/// token contains `@` (`ACTION@DEVPATH`), and a *udev* frame starting with
/// the `b"libudev"` prefix and a valid [`UdevMonHeader`].
pub fn parse(frame: &UeventFrame) -> Result<UeventView<'_>> {
    let raw = frame.as_bytes();
    if raw.len() >= 7 && &raw[..7] == b"libudev" {
        return parse_udev(frame);
    }

    let first_nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::MalformedFrame("frame has no NUL terminator".into()))?;
    let header_tok = &raw[..first_nul];
    if !header_tok.contains(&b'@') {
        return Err(Error::MalformedFrame(
            "frame is neither a kernel nor a udev frame".into(),
        ));
    }

    parse_properties(frame, first_nul + 1, raw.len(), Some(header_tok))
}

fn parse_udev(frame: &UeventFrame) -> Result<UeventView<'_>> {
    let raw = frame.as_bytes();
    let (header, _) = UdevMonHeader::ref_from_prefix(raw)
        .map_err(|_| Error::MalformedFrame("udev header truncated".into()))?;

    if header.magic() != UDEV_MONITOR_MAGIC {
        return Err(Error::MalformedFrame(format!(
            "bad udev magic: {:#010x}",
            header.magic()
        )));
    }

    let properties_off = header.properties_off as usize;
    if properties_off.checked_add(32).is_none_or(|end| end > raw.len()) {
        return Err(Error::MalformedFrame(
            "properties_off places properties past the end of the frame".into(),
        ));
    }

    parse_properties(frame, properties_off, raw.len(), None)
}

fn parse_properties<'a>(
    frame: &'a UeventFrame,
    mut offset: usize,
    end: usize,
    header_tok: Option<&'a [u8]>,
) -> Result<UeventView<'a>> {
    let raw = frame.as_bytes();
    let mut view = UeventView::default();

    if let Some(tok) = header_tok {
        if let Some(at) = tok.iter().position(|&b| b == b'@') {
            view.action = std::str::from_utf8(&tok[..at]).unwrap_or("");
            view.devpath = std::str::from_utf8(&tok[at + 1..]).unwrap_or("");
        }
    }

    while offset < end {
        let rest = &raw[offset..end];
        let nul = match rest.iter().position(|&b| b == 0) {
            Some(p) => p,
            None => break,
        };
        if nul == 0 {
            // A NUL terminator with no successor: end of the property list.
            break;
        }
        apply_entry(&mut view, &rest[..nul]);
        offset += nul + 1;
    }

    if view.id_vendor_id == 0 && view.id_model_id == 0 && !view.product.is_empty() {
        if let Some((vendor, product)) = parse_product_ids(view.product) {
            view.id_vendor_id = vendor;
            view.id_model_id = product;
        }
    }

    Ok(view)
}

fn apply_entry<'a>(view: &mut UeventView<'a>, entry: &'a [u8]) {
    let Ok(entry) = std::str::from_utf8(entry) else {
        return;
    };
    let Some(eq) = entry.find('=') else {
        return;
    };
    let (key, value) = (&entry[..eq], &entry[eq + 1..]);
    match key {
        "ACTION" => view.action = value,
        "DEVPATH" => view.devpath = value,
        "SUBSYSTEM" => view.subsystem = value,
        "MAJOR" => view.major = value.parse().unwrap_or(-1),
        "MINOR" => view.minor = value.parse().unwrap_or(-1),
        "DEVNAME" => view.devname = value,
        "DEVTYPE" => view.devtype = value,
        "DRIVER" => view.driver = value,
        "PRODUCT" => view.product = value,
        "ID_VENDOR_ID" => view.id_vendor_id = u16::from_str_radix(value, 16).unwrap_or(0),
        "ID_MODEL_ID" => view.id_model_id = u16::from_str_radix(value, 16).unwrap_or(0),
        "ID_SERIAL_SHORT" => view.id_serial_short = value,
        "INTERFACE" => view.interface = value,
        "SYNTH_UUID" => view.synth_uuid = value,
        _ => {}
    }
}

/// Parse the `vvvv/pppp/xxxx` fallback form of `PRODUCT=` into
/// `(vendor, product)`. Accepts leading zeros and is case-insensitive, per
/// Design Notes on integer parsing of `PRODUCT`.
fn parse_product_ids(product: &str) -> Option<(u16, u16)> {
    let mut parts = product.split('/');
    let vendor = u16::from_str_radix(parts.next()?, 16).ok()?;
    let model = u16::from_str_radix(parts.next()?, 16).ok()?;
    Some((vendor, model))
}

/// Compute `needle`'s byte offset within `haystack`, failing if `needle` is
/// not a subslice of it. Pure address arithmetic; never dereferences a
/// dangling pointer.
fn slice_offset(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let h_start = haystack.as_ptr() as usize;
    let h_end = h_start + haystack.len();
    let n_start = needle.as_ptr() as usize;
    let n_end = n_start + needle.len();
    if n_start >= h_start && n_end <= h_end {
        Some(n_start - h_start)
    } else {
        None
    }
}

/// Replace `old` (a subslice of `frame`'s bytes) with `new`, producing a
/// new frame. Preserves every header field except `properties_len`, which
/// is adjusted by the signed length delta. Callers must re-[`parse`] the
/// result before use; the frame passed in is left untouched.
pub fn rewrite(frame: &UeventFrame, old: &[u8], new: &[u8]) -> Result<UeventFrame> {
    let raw = frame.as_bytes();
    let offset = slice_offset(raw, old)
        .ok_or_else(|| Error::MalformedFrame("rewrite slice is not part of the frame".into()))?;

    let delta = new.len() as isize - old.len() as isize;
    let new_len = raw.len() as isize + delta;
    if new_len < 0 || new_len as usize > MAX_FRAME_LEN {
        return Err(Error::MalformedFrame(format!(
            "rewrite would produce a {}-byte frame, exceeding the {}-byte limit",
            new_len, MAX_FRAME_LEN
        )));
    }
    let new_len = new_len as usize;

    let mut out = Vec::with_capacity(new_len);
    out.extend_from_slice(&raw[..offset]);
    out.extend_from_slice(new);
    out.extend_from_slice(&raw[offset + old.len()..]);
    debug_assert_eq!(out.len(), new_len);

    if out.len() >= std::mem::size_of::<UdevMonHeader>() && out[..7] == *b"libudev" {
        let current = u32::from_ne_bytes(
            out[PROPERTIES_LEN_OFFSET..PROPERTIES_LEN_OFFSET + 4]
                .try_into()
                .expect("4-byte slice"),
        );
        let updated = (current as i64 + delta as i64) as u32;
        out[PROPERTIES_LEN_OFFSET..PROPERTIES_LEN_OFFSET + 4]
            .copy_from_slice(&updated.to_ne_bytes());
    }

    Ok(UeventFrame::from_raw(out))
}

/// Log every NUL-delimited token in the frame at trace level.
pub fn trace(frame: &UeventFrame) {
    for (index, token) in frame.as_bytes().split(|&b| b == 0).enumerate() {
        if token.is_empty() {
            continue;
        }
        tracing::trace!(index, token = %String::from_utf8_lossy(token), "uevent token");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_frame(action: &str, devpath: &str, props: &[(&str, &str)]) -> UeventFrame {
        let mut raw = Vec::new();
        raw.extend_from_slice(action.as_bytes());
        raw.push(b'@');
        raw.extend_from_slice(devpath.as_bytes());
        raw.push(0);
        for (k, v) in props {
            raw.extend_from_slice(k.as_bytes());
            raw.push(b'=');
            raw.extend_from_slice(v.as_bytes());
            raw.push(0);
        }
        UeventFrame::from_raw(raw)
    }

    #[test]
    fn parse_is_deterministic() {
        let frame = kernel_frame(
            "add",
            "/devices/pci0000:00/eth5",
            &[("SUBSYSTEM", "net"), ("DEVTYPE", "wlan"), ("MAJOR", "189")],
        );
        let a = parse(&frame).unwrap();
        let b = parse(&frame).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.action, "add");
        assert_eq!(a.devpath, "/devices/pci0000:00/eth5");
        assert_eq!(a.subsystem, "net");
        assert_eq!(a.major, 189);
        assert_eq!(a.minor, -1);
    }

    #[test]
    fn product_fallback_parses_vendor_and_model() {
        let frame = kernel_frame(
            "add",
            "/devices/pci0000:00/usb1",
            &[
                ("SUBSYSTEM", "usb"),
                ("DEVTYPE", "usb_device"),
                ("PRODUCT", "1d6b/2/410"),
            ],
        );
        let view = parse(&frame).unwrap();
        assert_eq!(view.id_vendor_id, 0x1d6b);
        assert_eq!(view.id_model_id, 0x0002);
    }

    #[test]
    fn explicit_ids_take_precedence_over_product_fallback() {
        let frame = kernel_frame(
            "add",
            "/devices/pci0000:00/usb1",
            &[
                ("PRODUCT", "1d6b/2/410"),
                ("ID_VENDOR_ID", "abcd"),
                ("ID_MODEL_ID", "ef01"),
            ],
        );
        let view = parse(&frame).unwrap();
        assert_eq!(view.id_vendor_id, 0xabcd);
        assert_eq!(view.id_model_id, 0xef01);
    }

    #[test]
    fn rewrite_preserves_length_invariant() {
        let frame = kernel_frame("add", "/devices/eth5", &[("INTERFACE", "eth5")]);
        let view = parse(&frame).unwrap();
        let old = view.interface.as_bytes();
        let new = b"cmleth0";
        let rewritten = rewrite(&frame, old, new).unwrap();
        assert_eq!(
            rewritten.len() as isize,
            frame.len() as isize + new.len() as isize - old.len() as isize
        );
        let view2 = parse(&rewritten).unwrap();
        assert_eq!(view2.interface, "cmleth0");
        assert_eq!(view2.action, "add");
    }

    #[test]
    fn rewrite_other_properties_are_unaffected() {
        let frame = kernel_frame(
            "add",
            "/devices/eth5",
            &[("INTERFACE", "eth5"), ("SUBSYSTEM", "net")],
        );
        let view = parse(&frame).unwrap();
        let rewritten = rewrite(&frame, view.interface.as_bytes(), b"cmleth0").unwrap();
        let view2 = parse(&rewritten).unwrap();
        assert_eq!(view2.subsystem, "net");
    }

    #[test]
    fn udev_header_properties_len_tracks_rewrite_delta() {
        let mut raw = vec![0u8; 40];
        raw[..7].copy_from_slice(b"libudev");
        raw[8..12].copy_from_slice(&UDEV_MONITOR_MAGIC.to_be_bytes());
        raw[12..16].copy_from_slice(&40u32.to_ne_bytes()); // header_size
        raw[16..20].copy_from_slice(&40u32.to_ne_bytes()); // properties_off
        let props = b"ACTION=add\0DEVPATH=/devices/eth5\0";
        raw[20..24].copy_from_slice(&(props.len() as u32).to_ne_bytes());
        raw.extend_from_slice(props);

        let frame = UeventFrame::from_raw(raw);
        let view = parse(&frame).unwrap();
        assert_eq!(view.action, "add");

        let rewritten = rewrite(&frame, view.devpath.as_bytes(), b"/devices/eth9").unwrap();
        let (header, _) = UdevMonHeader::ref_from_prefix(rewritten.as_bytes()).unwrap();
        assert_eq!(header.properties_len as usize, props.len() + 1);
    }

    #[test]
    fn malformed_udev_magic_is_rejected() {
        let mut raw = vec![0u8; 64];
        raw[..7].copy_from_slice(b"libudev");
        raw[8..12].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
        let frame = UeventFrame::from_raw(raw);
        let err = parse(&frame).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn frame_with_no_at_sign_and_no_udev_prefix_is_rejected() {
        let mut raw = b"garbage".to_vec();
        raw.push(0);
        let frame = UeventFrame::from_raw(raw);
        assert!(parse(&frame).is_err());
    }
}
