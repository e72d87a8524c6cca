//! Property name resolution
//!
//! Everything in the atomic api is set via properties, but property ids are not consistent
//! across devices. The ids needed per object are looked up by name once, when an output is
//! created, and cached in the typed tables of this module.

use std::collections::HashMap;

use drm::control::{
    connector, crtc, plane, property, Device as ControlDevice, PlaneType, RawResourceHandle,
    ResourceHandle,
};
use tracing::{trace, warn};

use crate::backend::allocator::{Fourcc, Modifier};
use crate::backend::drm::error::{AccessError, Error};
use crate::utils::DevPath;

/// Property names and ids of one kernel object, with the values they had when read
#[derive(Debug, Clone)]
pub struct PropertyTable<T> {
    handle: T,
    props: HashMap<String, (property::Handle, u64)>,
}

impl<T: ResourceHandle> PropertyTable<T> {
    /// Read the property list of `handle` from the device
    pub fn read<D>(fd: &D, handle: T) -> Result<Self, Error>
    where
        D: DevPath + ControlDevice,
    {
        let props = fd.get_properties(handle).map_err(|source| AccessError {
            errmsg: "Error reading properties",
            dev: fd.dev_path(),
            source,
        })?;

        let mut map = HashMap::new();
        let (prop_handles, values) = props.as_props_and_values();
        for (prop, value) in prop_handles.iter().zip(values.iter()) {
            if let Ok(info) = fd.get_property(*prop) {
                let name = info.name().to_string_lossy().into_owned();
                map.insert(name, (*prop, *value));
            }
        }

        let raw: RawResourceHandle = handle.into();
        trace!(handle = ?raw, props = ?map.keys().collect::<Vec<_>>(), "mapped properties");
        Ok(PropertyTable { handle, props: map })
    }

    /// Build a table out of known `(name, id, value)` entries
    pub fn from_entries<'a>(
        handle: T,
        entries: impl IntoIterator<Item = (&'a str, property::Handle, u64)>,
    ) -> Self {
        PropertyTable {
            handle,
            props: entries
                .into_iter()
                .map(|(name, prop, value)| (name.to_owned(), (prop, value)))
                .collect(),
        }
    }

    /// Id of a property the pipeline cannot work without
    pub fn required(&self, name: &'static str) -> Result<property::Handle, Error> {
        self.optional(name).ok_or_else(|| Error::UnknownProperty {
            handle: self.handle.into(),
            name,
        })
    }

    /// Id of a property that may legitimately be absent
    pub fn optional(&self, name: &str) -> Option<property::Handle> {
        self.props.get(name).map(|(prop, _)| *prop)
    }

    /// Value the property had when the table was read
    pub fn value(&self, name: &str) -> Option<u64> {
        self.props.get(name).map(|(_, value)| *value)
    }
}

impl PropertyTable<plane::Handle> {
    /// Returns whether this is the table of a primary plane
    pub fn is_primary(&self) -> bool {
        self.value("type") == Some(PlaneType::Primary as u32 as u64)
    }
}

/// Plane properties written on every commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneProperties {
    /// `CRTC_ID`
    pub crtc_id: property::Handle,
    /// `FB_ID`
    pub fb_id: property::Handle,
    /// `SRC_X`
    pub src_x: property::Handle,
    /// `SRC_Y`
    pub src_y: property::Handle,
    /// `SRC_W`
    pub src_w: property::Handle,
    /// `SRC_H`
    pub src_h: property::Handle,
    /// `CRTC_X`
    pub crtc_x: property::Handle,
    /// `CRTC_Y`
    pub crtc_y: property::Handle,
    /// `CRTC_W`
    pub crtc_w: property::Handle,
    /// `CRTC_H`
    pub crtc_h: property::Handle,
    /// `IN_FENCE_FD`, absent on drivers without explicit fencing
    pub in_fence_fd: Option<property::Handle>,
}

impl PlaneProperties {
    /// Resolve the plane properties, failing if a required one is missing
    pub fn resolve(table: &PropertyTable<plane::Handle>) -> Result<Self, Error> {
        Ok(PlaneProperties {
            crtc_id: table.required("CRTC_ID")?,
            fb_id: table.required("FB_ID")?,
            src_x: table.required("SRC_X")?,
            src_y: table.required("SRC_Y")?,
            src_w: table.required("SRC_W")?,
            src_h: table.required("SRC_H")?,
            crtc_x: table.required("CRTC_X")?,
            crtc_y: table.required("CRTC_Y")?,
            crtc_w: table.required("CRTC_W")?,
            crtc_h: table.required("CRTC_H")?,
            in_fence_fd: table.optional("IN_FENCE_FD"),
        })
    }
}

/// Crtc properties written on every commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrtcProperties {
    /// `MODE_ID`
    pub mode_id: property::Handle,
    /// `ACTIVE`
    pub active: property::Handle,
    /// `OUT_FENCE_PTR`, absent on drivers without explicit fencing
    pub out_fence_ptr: Option<property::Handle>,
}

impl CrtcProperties {
    /// Resolve the crtc properties, failing if a required one is missing
    pub fn resolve(table: &PropertyTable<crtc::Handle>) -> Result<Self, Error> {
        Ok(CrtcProperties {
            mode_id: table.required("MODE_ID")?,
            active: table.required("ACTIVE")?,
            out_fence_ptr: table.optional("OUT_FENCE_PTR"),
        })
    }
}

/// Connector properties written on every commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorProperties {
    /// `CRTC_ID`
    pub crtc_id: property::Handle,
}

impl ConnectorProperties {
    /// Resolve the connector properties, failing if a required one is missing
    pub fn resolve(table: &PropertyTable<connector::Handle>) -> Result<Self, Error> {
        Ok(ConnectorProperties {
            crtc_id: table.required("CRTC_ID")?,
        })
    }
}

/// All property ids an output needs for its commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputProperties {
    /// Primary plane properties
    pub plane: PlaneProperties,
    /// Crtc properties
    pub crtc: CrtcProperties,
    /// Connector properties
    pub connector: ConnectorProperties,
}

impl OutputProperties {
    /// Returns whether the kernel side supports both in- and out-fences
    pub fn explicit_fencing(&self) -> bool {
        self.plane.in_fence_fd.is_some() && self.crtc.out_fence_ptr.is_some()
    }
}

const FORMAT_BLOB_CURRENT: u32 = 1;
const FORMAT_BLOB_HEADER_LEN: usize = 24;
const FORMAT_MODIFIER_LEN: usize = 24;

fn read_u32(blob: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_ne_bytes(blob.get(offset..offset.checked_add(4)?)?.try_into().ok()?))
}

fn read_u64(blob: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_ne_bytes(blob.get(offset..offset.checked_add(8)?)?.try_into().ok()?))
}

/// Extract the modifiers accepted for `fourcc` from an `IN_FORMATS` blob
///
/// Returns `None` if the blob is malformed.
pub fn parse_in_formats(blob: &[u8], fourcc: Fourcc) -> Option<Vec<Modifier>> {
    if blob.len() < FORMAT_BLOB_HEADER_LEN {
        return None;
    }
    let version = read_u32(blob, 0)?;
    if version != FORMAT_BLOB_CURRENT {
        return None;
    }
    let count_formats = read_u32(blob, 8)? as usize;
    let formats_offset = read_u32(blob, 12)? as usize;
    let count_modifiers = read_u32(blob, 16)? as usize;
    let modifiers_offset = read_u32(blob, 20)? as usize;

    let formats = (0..count_formats)
        .map(|i| read_u32(blob, formats_offset.checked_add(i.checked_mul(4)?)?))
        .collect::<Option<Vec<_>>>()?;
    let Some(index) = formats.iter().position(|f| *f == fourcc as u32) else {
        return Some(Vec::new());
    };

    let mut modifiers = Vec::new();
    for i in 0..count_modifiers {
        let entry = modifiers_offset.checked_add(i.checked_mul(FORMAT_MODIFIER_LEN)?)?;
        let mask = read_u64(blob, entry)?;
        let offset = read_u32(blob, entry + 8)? as usize;
        let modifier = read_u64(blob, entry + 16)?;
        if index < offset || index - offset >= 64 {
            continue;
        }
        if mask & (1 << (index - offset)) != 0 {
            modifiers.push(Modifier::from(modifier));
        }
    }
    Some(modifiers)
}

/// Read the modifiers a plane accepts for `fourcc`
///
/// Planes without an `IN_FORMATS` property only support an implicit layout,
/// which is reported as an empty list.
pub fn plane_modifiers<D>(
    fd: &D,
    table: &PropertyTable<plane::Handle>,
    fourcc: Fourcc,
) -> Result<Vec<Modifier>, Error>
where
    D: DevPath + ControlDevice,
{
    let Some(blob_id) = table.value("IN_FORMATS").filter(|id| *id != 0) else {
        return Ok(Vec::new());
    };
    let blob = fd.get_property_blob(blob_id).map_err(|source| AccessError {
        errmsg: "Error reading IN_FORMATS blob",
        dev: fd.dev_path(),
        source,
    })?;
    parse_in_formats(&blob, fourcc).ok_or_else(|| {
        warn!(plane = ?table.handle, "malformed IN_FORMATS blob");
        Error::InFormats(table.handle)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn prop(id: u32) -> property::Handle {
        drm::control::from_u32(id).unwrap()
    }

    fn plane_table(with_fence: bool) -> PropertyTable<plane::Handle> {
        let mut entries = vec![
            ("type", prop(1), PlaneType::Primary as u32 as u64),
            ("CRTC_ID", prop(2), 0),
            ("FB_ID", prop(3), 0),
            ("SRC_X", prop(4), 0),
            ("SRC_Y", prop(5), 0),
            ("SRC_W", prop(6), 0),
            ("SRC_H", prop(7), 0),
            ("CRTC_X", prop(8), 0),
            ("CRTC_Y", prop(9), 0),
            ("CRTC_W", prop(10), 0),
            ("CRTC_H", prop(11), 0),
        ];
        if with_fence {
            entries.push(("IN_FENCE_FD", prop(12), u64::MAX));
        }
        PropertyTable::from_entries(drm::control::from_u32(40).unwrap(), entries)
    }

    #[test]
    fn optional_properties_may_be_absent() {
        let table = plane_table(false);
        assert!(table.is_primary());
        let props = PlaneProperties::resolve(&table).unwrap();
        assert_eq!(props.fb_id, prop(3));
        assert_eq!(props.in_fence_fd, None);

        let props = PlaneProperties::resolve(&plane_table(true)).unwrap();
        assert_eq!(props.in_fence_fd, Some(prop(12)));
    }

    #[test]
    fn missing_required_property_is_fatal() {
        let table = PropertyTable::<crtc::Handle>::from_entries(
            drm::control::from_u32(50).unwrap(),
            [("ACTIVE", prop(20), 1)],
        );
        match CrtcProperties::resolve(&table) {
            Err(Error::UnknownProperty { name, .. }) => assert_eq!(name, "MODE_ID"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn explicit_fencing_needs_both_fences() {
        let table = PropertyTable::<crtc::Handle>::from_entries(
            drm::control::from_u32(50).unwrap(),
            [("ACTIVE", prop(20), 1), ("MODE_ID", prop(21), 0)],
        );
        let connector = PropertyTable::<connector::Handle>::from_entries(
            drm::control::from_u32(60).unwrap(),
            [("CRTC_ID", prop(30), 0)],
        );
        let props = OutputProperties {
            plane: PlaneProperties::resolve(&plane_table(true)).unwrap(),
            crtc: CrtcProperties::resolve(&table).unwrap(),
            connector: ConnectorProperties::resolve(&connector).unwrap(),
        };
        assert!(!props.explicit_fencing());

        let props = OutputProperties {
            crtc: CrtcProperties {
                out_fence_ptr: Some(prop(22)),
                ..props.crtc
            },
            ..props
        };
        assert!(props.explicit_fencing());
    }

    fn in_formats_blob() -> Vec<u8> {
        let formats = [Fourcc::Argb8888 as u32, Fourcc::Xrgb8888 as u32, Fourcc::Nv12 as u32];
        let modifiers: [(u64, u32, u64); 3] = [
            (0b011, 0, u64::from(Modifier::Linear)),
            (0b010, 0, 0x0100_0000_0000_0001),
            (0b100, 0, 0x0100_0000_0000_0002),
        ];
        let formats_offset = 24u32;
        let modifiers_offset = formats_offset + 4 * formats.len() as u32;

        let mut blob = Vec::new();
        for word in [
            1u32,
            0,
            formats.len() as u32,
            formats_offset,
            modifiers.len() as u32,
            modifiers_offset,
        ] {
            blob.extend_from_slice(&word.to_ne_bytes());
        }
        for format in formats {
            blob.extend_from_slice(&format.to_ne_bytes());
        }
        for (mask, offset, modifier) in modifiers {
            blob.extend_from_slice(&mask.to_ne_bytes());
            blob.extend_from_slice(&offset.to_ne_bytes());
            blob.extend_from_slice(&0u32.to_ne_bytes());
            blob.extend_from_slice(&modifier.to_ne_bytes());
        }
        blob
    }

    #[test]
    fn in_formats_lists_modifiers_of_format() {
        let modifiers = parse_in_formats(&in_formats_blob(), Fourcc::Xrgb8888).unwrap();
        assert_eq!(
            modifiers,
            vec![Modifier::Linear, Modifier::from(0x0100_0000_0000_0001u64)]
        );
        assert_eq!(
            parse_in_formats(&in_formats_blob(), Fourcc::Rgb565).unwrap(),
            Vec::<Modifier>::new()
        );
    }

    #[test]
    fn truncated_in_formats_is_rejected() {
        let blob = in_formats_blob();
        assert!(parse_in_formats(&blob[..30], Fourcc::Xrgb8888).is_none());
        assert!(parse_in_formats(&blob[..blob.len() - 1], Fourcc::Xrgb8888).is_none());
    }
}
