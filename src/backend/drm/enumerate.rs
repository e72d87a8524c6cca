//! Discovery of the outputs currently lit up on a device
//!
//! Only connectors already driven by an active crtc are picked up. Their current mode is
//! reused as is, the pipeline never picks modes itself.

use std::io;

use drm::control::{connector, crtc, plane, property, Device as ControlDevice, Mode};
use tracing::{debug, info, warn};

use super::adapter::{AdapterConfig, AdapterError};
use super::device::props::{
    plane_modifiers, ConnectorProperties, CrtcProperties, OutputProperties, PlaneProperties,
    PropertyTable,
};
use super::error::{AccessError, Error};
use super::frame_clock::{mode_refresh_interval, FrameClock};
use super::output::{ModeBlob, Output, OutputSetup};
use super::DrmDevice;
use crate::backend::allocator::{Allocator, BufferRing, Fourcc, Image, Modifier};
use crate::utils::DevPath;

/// Pixel format of all scanout buffers
pub const SCANOUT_FORMAT: Fourcc = Fourcc::Xrgb8888;

/// An active connector, its crtc and primary plane
#[derive(Debug, Clone)]
pub struct OutputTarget {
    /// Connector name, e.g. `HDMI-A-1`
    pub name: String,
    /// Connector handle
    pub connector: connector::Handle,
    /// Crtc currently driving the connector
    pub crtc: crtc::Handle,
    /// Primary plane of the crtc
    pub plane: plane::Handle,
    /// Mode currently set on the crtc
    pub mode: Mode,
    /// Property ids of the three objects
    pub properties: OutputProperties,
    /// Modifiers the plane accepts for [`SCANOUT_FORMAT`]
    pub modifiers: Vec<Modifier>,
}

fn access<T>(device: &DrmDevice, errmsg: &'static str, res: io::Result<T>) -> Result<T, Error> {
    res.map_err(|source| {
        Error::Access(AccessError {
            errmsg,
            dev: device.device_fd().dev_path(),
            source,
        })
    })
}

/// List the outputs currently lit up on `device`
///
/// Fails with [`Error::NoActiveOutputs`] if there is none.
pub fn active_outputs(device: &DrmDevice) -> Result<Vec<OutputTarget>, Error> {
    let fd = device.device_fd();
    let res = access(device, "Error loading drm resources", fd.resource_handles())?;
    let planes = access(device, "Error loading planes", fd.plane_handles())?;

    let mut targets = Vec::new();
    for conn in res.connectors() {
        let info = access(device, "Error loading connector info", fd.get_connector(*conn, false))?;
        let name = format!("{}-{}", info.interface().as_str(), info.interface_id());
        if info.state() != connector::State::Connected {
            debug!(%name, "skipping disconnected connector");
            continue;
        }

        let conn_table = PropertyTable::read(fd, *conn)?;
        if conn_table.value("non-desktop") == Some(1) {
            debug!(%name, "skipping non-desktop connector");
            continue;
        }

        let Some(encoder) = info.current_encoder() else {
            debug!(%name, "skipping connector without encoder");
            continue;
        };
        let encoder = access(device, "Error loading encoder info", fd.get_encoder(encoder))?;
        let Some(crtc) = encoder.crtc() else {
            debug!(%name, "skipping connector without crtc");
            continue;
        };
        let crtc_info = access(device, "Error loading crtc info", fd.get_crtc(crtc))?;
        let Some(mode) = crtc_info.mode() else {
            debug!(%name, ?crtc, "skipping inactive crtc");
            continue;
        };

        let Some((plane, plane_table)) = primary_plane(device, &res, &planes, crtc)? else {
            warn!(%name, "{}", Error::NoPrimaryPlane(crtc));
            continue;
        };

        let crtc_table = PropertyTable::read(fd, crtc)?;
        let properties = OutputProperties {
            plane: PlaneProperties::resolve(&plane_table)?,
            crtc: CrtcProperties::resolve(&crtc_table)?,
            connector: ConnectorProperties::resolve(&conn_table)?,
        };
        let modifiers = plane_modifiers(fd, &plane_table, SCANOUT_FORMAT)?;

        info!(
            %name,
            ?crtc,
            ?plane,
            mode = ?mode.name(),
            explicit_fencing = properties.explicit_fencing(),
            modifiers = modifiers.len(),
            "found active output"
        );
        targets.push(OutputTarget {
            name,
            connector: *conn,
            crtc,
            plane,
            mode,
            properties,
            modifiers,
        });
    }

    if targets.is_empty() {
        return Err(Error::NoActiveOutputs);
    }
    Ok(targets)
}

// Prefers the primary plane currently scanning out on `crtc` over any other compatible one.
fn primary_plane(
    device: &DrmDevice,
    res: &drm::control::ResourceHandles,
    planes: &[plane::Handle],
    crtc: crtc::Handle,
) -> Result<Option<(plane::Handle, PropertyTable<plane::Handle>)>, Error> {
    let fd = device.device_fd();
    let mut fallback = None;
    for plane in planes {
        let info = access(device, "Error loading plane info", fd.get_plane(*plane))?;
        if !res.filter_crtcs(info.possible_crtcs()).contains(&crtc) {
            continue;
        }
        let table = PropertyTable::read(fd, *plane)?;
        if !table.is_primary() {
            continue;
        }
        if info.crtc() == Some(crtc) {
            return Ok(Some((*plane, table)));
        }
        if fallback.is_none() {
            fallback = Some((*plane, table));
        }
    }
    Ok(fallback)
}

/// Create the mode blob, the buffer ring and the frame clock of an output
pub fn create_output<A, I>(
    device: &DrmDevice,
    target: OutputTarget,
    allocator: &mut A,
    config: &AdapterConfig,
) -> Result<Output<I>, AdapterError>
where
    A: Allocator<I>,
    A::Error: Send + Sync + 'static,
    I: Image,
{
    let refresh = mode_refresh_interval(&target.mode)?;

    let fd = device.device_fd();
    let blob = access(device, "Failed to create mode blob", fd.create_property_blob(&target.mode))?;
    let property::Value::Blob(blob_id) = blob else {
        return Err(Error::Access(AccessError {
            errmsg: "Mode blob creation returned no blob",
            dev: fd.dev_path(),
            source: io::ErrorKind::InvalidData.into(),
        })
        .into());
    };
    let mode_blob = ModeBlob::new(fd.clone(), blob_id);

    let (width, height) = target.mode.size();
    let ring = BufferRing::allocate(
        allocator,
        config.ring_depth,
        width as u32,
        height as u32,
        SCANOUT_FORMAT,
        &target.modifiers,
    )
    .map_err(|err| AdapterError::Allocation(Box::new(err)))?;

    let clock = FrameClock::new(refresh, config.animation_period)
        .with_margin(config.margin)
        .with_drift_tolerance(config.drift_tolerance);

    Ok(Output::new(
        OutputSetup {
            name: target.name,
            connector: target.connector,
            crtc: target.crtc,
            plane: target.plane,
            properties: target.properties,
            mode_size: (width, height),
            mode_blob,
            refresh,
        },
        ring,
        clock,
    ))
}
