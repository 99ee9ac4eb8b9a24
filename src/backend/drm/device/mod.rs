use std::sync::Arc;

use drm::control::{connector, crtc, encoder, plane, AtomicCommitFlags, Mode, PlaneType};
use tracing::{debug, error, info, info_span, instrument, trace, warn};

pub(super) mod fd;

use super::{
    atomic::AtomicRequest,
    compositor::{DisplayComposition, PlanePool},
    connector::{Connector, DisplayMode},
    crtc::Crtc,
    encoder::Encoder,
    error::{AccessError, Error},
    kms::KmsDevice,
    plane::Plane,
};
use crate::config::DisplayOrder;

/// A property blob owned by this process
///
/// The kernel object is destroyed once this is dropped.
#[derive(Debug)]
pub struct PropertyBlob {
    kms: Arc<dyn KmsDevice>,
    id: u32,
}

impl PropertyBlob {
    /// Id of the blob, to be written to blob properties
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for PropertyBlob {
    fn drop(&mut self) {
        if let Err(err) = self.kms.destroy_property_blob(self.id) {
            error!("Failed to destroy property blob {}: {}", self.id, err);
        }
    }
}

/// The scanout resources of a single kms device
///
/// The topology is discovered once by [`DrmDevice::new`]. Every display of the device
/// is bound to its own connector, encoder and crtc from then on. Only the connection
/// state and the modes of connectors change afterwards.
#[derive(Debug)]
pub struct DrmDevice {
    kms: Arc<dyn KmsDevice>,
    crtcs: Vec<Crtc>,
    encoders: Vec<Encoder>,
    connectors: Vec<Connector>,
    writeback_connectors: Vec<Connector>,
    planes: Vec<Plane>,
    displays: Vec<u32>,
    min_resolution: (u32, u32),
    max_resolution: (u32, u32),
    mode_id: u32,
    span: tracing::Span,
}

fn access<'a>(kms: &'a dyn KmsDevice, errmsg: &'static str) -> impl FnOnce(std::io::Error) -> Error + 'a {
    move |source| {
        Error::Access(AccessError {
            errmsg,
            dev: kms.dev_path(),
            source,
        })
    }
}

impl DrmDevice {
    /// Discover the resources of `kms` and bind its displays
    ///
    /// Displays are numbered starting at `starting_display`. The device opened first
    /// (`starting_display == 0`) also picks the primary display, preferring the connectors
    /// named in `order`.
    ///
    /// Any failure abandons the whole device.
    pub fn new(kms: Arc<dyn KmsDevice>, starting_display: u32, order: &DisplayOrder) -> Result<DrmDevice, Error> {
        let span = info_span!("drm_device", path = ?kms.dev_path());
        let _guard = span.enter();
        info!("DrmDevice initializing");

        let res = kms
            .resources()
            .map_err(access(&*kms, "Error loading drm resources"))?;

        let crtcs = res
            .crtcs
            .iter()
            .enumerate()
            .map(|(pipe, handle)| {
                let info = kms.crtc(*handle).map_err(access(&*kms, "Failed to get crtc"))?;
                trace!(crtc = ?handle, "Current mode: {:?}", info.mode);
                Crtc::new(&*kms, *handle, pipe as u32)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let mut clone_masks = Vec::with_capacity(res.encoders.len());
        let mut encoders = Vec::with_capacity(res.encoders.len());
        for handle in &res.encoders {
            let info = kms
                .encoder(*handle)
                .map_err(access(&*kms, "Failed to get encoder"))?;
            let current = info
                .crtc
                .filter(|crtc| crtcs.iter().any(|known| known.handle() == *crtc));
            let possible = crtcs
                .iter()
                .filter(|crtc| crtc.supported_by(info.possible_crtcs))
                .map(|crtc| crtc.handle())
                .collect();
            clone_masks.push(info.possible_clones);
            encoders.push(Encoder::new(*handle, current, possible));
        }
        let handles = encoders.iter().map(|enc| enc.handle()).collect::<Vec<_>>();
        for (encoder, mask) in encoders.iter_mut().zip(clone_masks) {
            for (index, clone) in handles.iter().enumerate() {
                if 1u32.checked_shl(index as u32).map(|bit| mask & bit != 0).unwrap_or(false) {
                    encoder.add_possible_clone(*clone);
                }
            }
        }

        let mut connectors = Vec::new();
        let mut writeback_connectors = Vec::new();
        for handle in &res.connectors {
            let info = kms
                .connector(*handle)
                .map_err(access(&*kms, "Failed to get connector"))?;
            let possible = info
                .encoders
                .iter()
                .copied()
                .filter(|enc| handles.contains(enc))
                .collect();
            let current = info.current_encoder.filter(|enc| handles.contains(enc));
            let conn = Connector::new(&*kms, &info, current, possible).map_err(|err| {
                error!(connector = ?handle, "Init connector failed: {}", err);
                err
            })?;
            if conn.is_writeback() {
                writeback_connectors.push(conn);
            } else {
                connectors.push(conn);
            }
        }

        let planes = res
            .planes
            .iter()
            .map(|handle| {
                let info = kms.plane(*handle).map_err(access(&*kms, "Failed to get plane"))?;
                Plane::new(&*kms, &info).map_err(|err| {
                    error!(plane = ?handle, "Init plane failed: {}", err);
                    err
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        drop(_guard);
        let mut dev = DrmDevice {
            kms,
            crtcs,
            encoders,
            connectors,
            writeback_connectors,
            planes,
            displays: Vec::new(),
            min_resolution: res.min_size,
            max_resolution: res.max_size,
            mode_id: 0,
            span,
        };
        let span = dev.span.clone();
        let _guard = span.enter();

        dev.assign_displays(starting_display, order)?;

        let mut mode_id = dev.mode_id;
        for conn in dev.connectors.iter_mut().filter(|conn| conn.display().is_some()) {
            conn.update_modes(&*dev.kms, || {
                mode_id += 1;
                mode_id
            })?;
        }
        dev.mode_id = mode_id;

        for index in 0..dev.connectors.len() {
            let Some(display_id) = dev.connectors[index].display() else {
                continue;
            };
            dev.create_display_pipe(index)?;
            match dev.attach_writeback(display_id) {
                Ok(()) => info!("Display {} has writeback attached to it", display_id),
                Err(err) => debug!("No writeback for display {}: {}", display_id, err),
            }
        }

        info!("Found {} displays", dev.displays.len());
        Ok(dev)
    }

    fn assign_displays(&mut self, starting_display: u32, order: &DisplayOrder) -> Result<(), Error> {
        let mut next = starting_display;

        // the first device picks the primary display
        if starting_display == 0 {
            let candidates = primary_candidates(&self.connectors, order);
            let Some(primary) = candidates.first().copied() else {
                error!(
                    "Failed to find primary display from the display order {:?}",
                    order.names()
                );
                return Err(Error::NoPrimaryDisplay(order.names().to_vec()));
            };
            debug!(
                "Primary display is {} out of {} candidates",
                self.connectors[primary].name(),
                candidates.len()
            );
            self.connectors[primary].set_display(next);
            self.displays.push(next);
            next += 1;
        }

        for conn in self.connectors.iter_mut() {
            if (conn.is_internal() || conn.is_external()) && conn.is_connected() && conn.display().is_none() {
                conn.set_display(next);
                self.displays.push(next);
                next += 1;
            }
        }

        Ok(())
    }

    fn crtc_index(&self, handle: crtc::Handle) -> Option<usize> {
        self.crtcs.iter().position(|crtc| crtc.handle() == handle)
    }

    fn encoder_index(&self, handle: encoder::Handle) -> Option<usize> {
        self.encoders.iter().position(|enc| enc.handle() == handle)
    }

    // Returns false if the encoder or all of its crtcs are taken by other displays.
    fn try_encoder_for_display(&mut self, display: u32, encoder: usize) -> bool {
        if !self.encoders[encoder].can_bind(display) {
            trace!(
                encoder = ?self.encoders[encoder].handle(),
                "Encoder already drives display {:?}",
                self.encoders[encoder].display()
            );
            return false;
        }

        let current = self.encoders[encoder].crtc();
        if let Some(index) = current.and_then(|crtc| self.crtc_index(crtc)) {
            if self.crtcs[index].can_bind(display) {
                self.crtcs[index].bind(display);
                if let Some(crtc) = current {
                    self.encoders[encoder].bind(display, crtc);
                }
                return true;
            }
        }

        let candidates = self.encoders[encoder]
            .possible_crtcs()
            .iter()
            .copied()
            .filter(|crtc| Some(*crtc) != current)
            .collect::<Vec<_>>();
        for crtc in candidates {
            let Some(index) = self.crtc_index(crtc) else {
                continue;
            };
            if self.crtcs[index].can_bind(display) {
                self.crtcs[index].bind(display);
                self.encoders[encoder].bind(display, crtc);
                return true;
            }
        }

        false
    }

    #[instrument(level = "debug", skip(self), fields(handle = ?self.connectors[connector].handle()))]
    fn create_display_pipe(&mut self, connector: usize) -> Result<(), Error> {
        let conn = &self.connectors[connector];
        let handle = conn.handle();
        let display_id = conn.display().ok_or(Error::UnknownConnector(handle))?;

        // try the current setup first
        let current = conn.encoder().and_then(|enc| self.encoder_index(enc));
        if let Some(current) = current {
            if self.try_encoder_for_display(display_id, current) {
                return Ok(());
            }
        }

        for encoder in self.connectors[connector].possible_encoders().to_vec() {
            let Some(index) = self.encoder_index(encoder) else {
                continue;
            };
            if self.try_encoder_for_display(display_id, index) {
                self.connectors[connector].set_encoder(encoder);
                return Ok(());
            }
        }

        error!("Could not find a suitable encoder/crtc for display {}", display_id);
        Err(Error::NoSuitableEncoder {
            connector: handle,
            display: display_id,
        })
    }

    /// Attach an unused writeback connector to the crtc of `display`
    pub fn attach_writeback(&mut self, display: u32) -> Result<(), Error> {
        let crtc = self.crtc_for_display(display).ok_or(Error::UnknownDisplay(display))?.handle();
        if self.writeback_connector_for_display(display).is_some() {
            return Err(Error::WritebackAlreadyAttached(display));
        }

        for index in 0..self.writeback_connectors.len() {
            if self.writeback_connectors[index].display().is_some() {
                continue;
            }
            for encoder in self.writeback_connectors[index].possible_encoders().to_vec() {
                let Some(enc) = self.encoder_index(encoder) else {
                    continue;
                };
                if !self.encoders[enc].possible_crtcs().contains(&crtc) {
                    continue;
                }
                // only use encoders that are not driving anything else
                if !self.encoders[enc].can_bind(display) {
                    continue;
                }

                self.encoders[enc].bind(display, crtc);
                let mode_id = &mut self.mode_id;
                let conn = &mut self.writeback_connectors[index];
                conn.set_encoder(encoder);
                conn.set_display(display);
                conn.update_modes(&*self.kms, || {
                    *mode_id += 1;
                    *mode_id
                })?;
                return Ok(());
            }
        }

        Err(Error::NoWritebackConnector(display))
    }

    /// Re-read connection state and modes of the connector of `display`
    pub fn update_modes(&mut self, display: u32) -> Result<(), Error> {
        let mode_id = &mut self.mode_id;
        let conn = self
            .connectors
            .iter_mut()
            .find(|conn| conn.display() == Some(display))
            .ok_or(Error::UnknownDisplay(display))?;
        conn.update_modes(&*self.kms, || {
            *mode_id += 1;
            *mode_id
        })
    }

    /// Record mode `mode_id` as shown by `display_id`, after a modeset to it was committed
    ///
    /// Returns the mode, its refresh rate paces the synthetic vblanks of the display.
    pub fn set_active_mode(&mut self, display_id: u32, mode_id: u32) -> Result<DisplayMode, Error> {
        let conn = self
            .connectors
            .iter_mut()
            .find(|conn| conn.display() == Some(display_id))
            .ok_or(Error::UnknownDisplay(display_id))?;
        let mode = conn
            .modes()
            .iter()
            .find(|mode| mode.id() == mode_id)
            .copied()
            .ok_or(Error::UnknownMode {
                display: display_id,
                mode: mode_id,
            })?;
        debug!(display = display_id, mode = mode_id, refresh = mode.refresh(), "Active mode changed");
        conn.set_active_mode(mode);
        Ok(mode)
    }

    /// The kernel interface of this device
    pub fn kms(&self) -> &Arc<dyn KmsDevice> {
        &self.kms
    }

    /// Displays handled by this device, in ascending order
    pub fn displays(&self) -> &[u32] {
        &self.displays
    }

    /// Returns true if `display` is handled by this device
    pub fn handles_display(&self, display: u32) -> bool {
        self.displays.contains(&display)
    }

    /// Connector showing `display`
    pub fn connector_for_display(&self, display: u32) -> Option<&Connector> {
        self.connectors.iter().find(|conn| conn.display() == Some(display))
    }

    /// Writeback connector attached to `display`
    pub fn writeback_connector_for_display(&self, display: u32) -> Option<&Connector> {
        self.writeback_connectors
            .iter()
            .find(|conn| conn.display() == Some(display))
    }

    /// Crtc driving `display`
    pub fn crtc_for_display(&self, display: u32) -> Option<&Crtc> {
        self.crtcs.iter().find(|crtc| crtc.display() == Some(display))
    }

    /// A writeback connector able to capture the content of `display`
    ///
    /// Prefers the writeback connector attached to the display itself. Otherwise a
    /// writeback connector of a display without a connected monitor is returned.
    pub fn available_writeback_connector(&self, display: u32) -> Option<&Connector> {
        let writeback = self.writeback_connector_for_display(display);
        let connector = self.connector_for_display(display);
        if let (Some(writeback), Some(connector)) = (writeback, connector) {
            let can_clone = writeback
                .encoder()
                .and_then(|enc| self.encoder(enc))
                .zip(connector.encoder())
                .map(|(enc, other)| enc.can_clone(other))
                .unwrap_or(false);
            if can_clone {
                return Some(writeback);
            }
        }

        for crtc in &self.crtcs {
            let Some(other) = crtc.display().filter(|other| *other != display) else {
                continue;
            };
            // a display in use can not give up its crtc
            if self
                .connector_for_display(other)
                .map(|conn| conn.is_connected())
                .unwrap_or(false)
            {
                continue;
            }
            if let Some(writeback) = self.writeback_connector_for_display(other) {
                return Some(writeback);
            }
        }
        None
    }

    /// All crtcs in pipe order
    pub fn crtcs(&self) -> &[Crtc] {
        &self.crtcs
    }

    /// All encoders
    pub fn encoders(&self) -> &[Encoder] {
        &self.encoders
    }

    /// Encoder with the given handle
    pub fn encoder(&self, handle: encoder::Handle) -> Option<&Encoder> {
        self.encoders.iter().find(|enc| enc.handle() == handle)
    }

    /// All connectors able to show a display
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    /// Connector with the given handle, including writeback connectors
    pub fn connector(&self, handle: connector::Handle) -> Option<&Connector> {
        self.connectors
            .iter()
            .chain(self.writeback_connectors.iter())
            .find(|conn| conn.handle() == handle)
    }

    /// All writeback connectors
    pub fn writeback_connectors(&self) -> &[Connector] {
        &self.writeback_connectors
    }

    /// All planes
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Plane with the given handle
    pub fn plane(&self, handle: plane::Handle) -> Option<&Plane> {
        self.planes.iter().find(|plane| plane.handle() == handle)
    }

    /// A fresh pool of all primary and overlay planes for one planning pass
    pub fn plane_pool(&self) -> PlanePool<'_> {
        let primary = self
            .planes
            .iter()
            .filter(|plane| plane.plane_type() == PlaneType::Primary)
            .collect();
        let overlay = self
            .planes
            .iter()
            .filter(|plane| plane.plane_type() == PlaneType::Overlay)
            .collect();
        PlanePool::new(primary, overlay)
    }

    /// An empty composition for `display`
    pub fn composition_for_display(&self, display: u32) -> Result<DisplayComposition<'_>, Error> {
        let crtc = self.crtc_for_display(display).ok_or(Error::UnknownDisplay(display))?;
        let connector = self
            .connector_for_display(display)
            .ok_or(Error::UnknownDisplay(display))?;
        Ok(DisplayComposition::new(crtc, connector))
    }

    /// Next device-unique mode id
    pub fn next_mode_id(&mut self) -> u32 {
        self.mode_id += 1;
        self.mode_id
    }

    /// Name of the kernel driver, `generic` if it can not be queried
    pub fn name(&self) -> String {
        match self.kms.driver_name() {
            Ok(name) => name,
            Err(err) => {
                let _guard = self.span.enter();
                warn!("Failed to get drm version: {}", err);
                String::from("generic")
            }
        }
    }

    /// Smallest supported framebuffer size
    pub fn min_resolution(&self) -> (u32, u32) {
        self.min_resolution
    }

    /// Largest supported framebuffer size
    pub fn max_resolution(&self) -> (u32, u32) {
        self.max_resolution
    }

    /// Upload `data` as a property blob
    pub fn register_user_property_blob(&self, data: &[u8]) -> Result<PropertyBlob, Error> {
        let id = self.kms.create_property_blob(data).map_err(|source| {
            let _guard = self.span.enter();
            error!("Failed to create property blob: {}", source);
            AccessError {
                errmsg: "Failed to create property blob",
                dev: self.kms.dev_path(),
                source,
            }
        })?;
        Ok(PropertyBlob {
            kms: self.kms.clone(),
            id,
        })
    }

    /// Upload `mode` as a blob for `MODE_ID`
    pub fn create_mode_blob(&self, mode: &Mode) -> Result<PropertyBlob, Error> {
        let id = self
            .kms
            .create_mode_blob(mode)
            .map_err(access(&*self.kms, "Failed to create Property Blob for mode"))?;
        Ok(PropertyBlob {
            kms: self.kms.clone(),
            id,
        })
    }

    /// Submit an atomic request
    pub fn commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> Result<(), Error> {
        let _guard = self.span.enter();
        trace!("Committing {} properties with {:?}", request.len(), flags);
        self.kms
            .atomic_commit(request, flags)
            .map_err(access(&*self.kms, "Error committing atomic request"))
    }
}

// Connected connectors, the ones named in `order` first. The wildcard adds all other
// connected connectors, internal ones first.
fn primary_candidates(connectors: &[Connector], order: &DisplayOrder) -> Vec<usize> {
    let mut rest = connectors
        .iter()
        .enumerate()
        .filter(|(_, conn)| conn.is_connected())
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    let mut candidates = Vec::with_capacity(rest.len());
    for name in order.names() {
        if let Some(pos) = rest.iter().position(|index| connectors[*index].name() == *name) {
            candidates.push(rest.remove(pos));
        }
    }

    if order.allows_any_internal() {
        let (internal, other): (Vec<_>, Vec<_>) =
            rest.into_iter().partition(|index| connectors[*index].is_internal());
        candidates.extend(internal);
        candidates.extend(other);
    }

    candidates
}
