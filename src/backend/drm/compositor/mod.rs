//! Per-frame planning of scanout planes
//!
//! A [`DisplayComposition`] describes exactly one change to a display: a new frame, a
//! change of the power state or a modeset. Frames consist of [`Layer`]s, which are
//! handed to the scarce scanout planes of the device by a [`Planner`].
//!
//! Planes are shared between all displays of a device, so a single planning pass over
//! every display of a device uses one [`PlanePool`]. Planes used by one display are
//! removed from the pool and are not available to the displays planned after it:
//!
//! ```no_run
//! # use smithay_scanout::backend::drm::{DrmDevice, Error, compositor::{Layer, SimplePlanner}};
//! # fn frame(device: &DrmDevice, layers: impl Fn(u32) -> Vec<Layer>) -> Result<(), Error> {
//! let mut pool = device.plane_pool();
//! let mut planner = SimplePlanner::default();
//! for display in device.displays() {
//!     let mut composition = device.composition_for_display(*display)?;
//!     composition.set_layers(layers(*display)).expect("fresh composition");
//!     if composition.plan(&mut planner, &mut pool).is_err()
//!         || !composition.unassigned_layers().is_empty()
//!     {
//!         // render (the rest of) the frame with the gpu into the client target
//!     }
//!     let request = composition.build_request(device)?;
//!     device.commit(&request.request, request.flags)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Which layer ends up on which plane is entirely up to the [`Planner`]. The composition
//! checks its result, so no layer is ever presented twice and no plane is used by two
//! displays in the same pass.

use std::collections::BTreeMap;

use drm::control::{plane, AtomicCommitFlags, PlaneType};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

mod layer;
mod planner;

pub use self::layer::{BlendMode, ColorSpace, Layer, SampleRange, Transform, OPAQUE};
pub use self::planner::{Planner, SimplePlanner};

use super::{
    atomic::AtomicRequest,
    connector::{Connector, DisplayMode},
    crtc::Crtc,
    device::{DrmDevice, PropertyBlob},
    plane::Plane,
    Error,
};

/// The kind of change a [`DisplayComposition`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionKind {
    /// Nothing was set yet
    #[default]
    Empty,
    /// A new frame
    Frame,
    /// A change of the power state
    Dpms,
    /// A change of the display mode
    Modeset,
}

/// Power state of a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DpmsMode {
    /// The display is powered
    #[default]
    On,
    /// Lowest latency power saving state
    Standby,
    /// Power saving state
    Suspend,
    /// The display is powered off
    Off,
}

impl DpmsMode {
    fn raw(self) -> u64 {
        match self {
            DpmsMode::On => 0,
            DpmsMode::Standby => 1,
            DpmsMode::Suspend => 2,
            DpmsMode::Off => 3,
        }
    }
}

/// How a [`CompositionPlane`] is used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionPlaneKind {
    /// Presents a single layer directly
    Layer,
    /// Detaches the plane from the crtc
    Disable,
    /// Presents the client target, the layers were composited into it
    Squash,
}

/// A plane and the layers it presents in one frame
#[derive(Debug, Clone)]
pub struct CompositionPlane<'a> {
    kind: CompositionPlaneKind,
    plane: Option<&'a Plane>,
    source_layers: SmallVec<[usize; 4]>,
}

impl<'a> CompositionPlane<'a> {
    /// Create a new composition plane
    pub fn new(
        kind: CompositionPlaneKind,
        plane: Option<&'a Plane>,
        source_layers: impl IntoIterator<Item = usize>,
    ) -> Self {
        CompositionPlane {
            kind,
            plane,
            source_layers: source_layers.into_iter().collect(),
        }
    }

    /// `plane` presenting the layer at `index`
    pub fn layer(plane: &'a Plane, index: usize) -> Self {
        Self::new(CompositionPlaneKind::Layer, Some(plane), [index])
    }

    /// `plane` being detached
    pub fn disable(plane: &'a Plane) -> Self {
        Self::new(CompositionPlaneKind::Disable, Some(plane), [])
    }

    /// Kind of the composition plane
    pub fn kind(&self) -> CompositionPlaneKind {
        self.kind
    }

    /// Plane used, if any
    pub fn plane(&self) -> Option<&'a Plane> {
        self.plane
    }

    /// Indices of the layers presented on this plane
    ///
    /// Sorted bottom to top once the composition was planned.
    pub fn source_layers(&self) -> &[usize] {
        &self.source_layers
    }

    /// Add the layer at `index` to the presented layers
    pub fn add_source_layer(&mut self, index: usize) {
        self.source_layers.push(index);
    }
}

/// The planes still available during one planning pass
///
/// Cursor planes are never part of a pool.
#[derive(Debug, Clone, Default)]
pub struct PlanePool<'a> {
    primary: Vec<&'a Plane>,
    overlay: Vec<&'a Plane>,
}

impl<'a> PlanePool<'a> {
    /// Create a pool from primary and overlay planes
    pub fn new(primary: Vec<&'a Plane>, overlay: Vec<&'a Plane>) -> Self {
        PlanePool { primary, overlay }
    }

    /// Available primary planes
    pub fn primary(&self) -> &[&'a Plane] {
        &self.primary
    }

    /// Available overlay planes
    pub fn overlay(&self) -> &[&'a Plane] {
        &self.overlay
    }

    /// All available planes, primary planes first
    pub fn iter(&self) -> impl Iterator<Item = &'a Plane> + '_ {
        self.primary.iter().chain(self.overlay.iter()).copied()
    }

    /// Number of available planes
    pub fn len(&self) -> usize {
        self.primary.len() + self.overlay.len()
    }

    /// Returns true if no plane is left
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `plane` is still available
    pub fn contains(&self, plane: &Plane) -> bool {
        self.iter().any(|p| p.handle() == plane.handle())
    }

    /// Remove `plane` from the list matching its type
    ///
    /// Returns false if it was not available.
    pub fn take(&mut self, plane: &Plane) -> bool {
        let list = match plane.plane_type() {
            PlaneType::Primary => &mut self.primary,
            _ => &mut self.overlay,
        };
        match list.iter().position(|p| p.handle() == plane.handle()) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Errors of planning a composition
#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    /// The planner could not find an assignment
    #[error("Planner failed: {0}")]
    Planner(String),
    /// The composition already describes a different kind of change
    #[error("Composition of kind {current:?} can not be turned into {requested:?}")]
    KindMismatch {
        /// Kind of the composition
        current: CompositionKind,
        /// Kind of the rejected change
        requested: CompositionKind,
    },
    /// A layer was assigned to more than one plane
    #[error("Layer {0} was assigned more than once")]
    DuplicateLayer(usize),
    /// A layer index not part of the frame was assigned
    #[error("Layer {0} is not part of the frame")]
    UnknownLayer(usize),
    /// A plane was used twice or is taken by another display
    #[error("Plane `{0:?}` is not available")]
    PlaneNotAvailable(plane::Handle),
}

/// An [`AtomicRequest`] built from a [`DisplayComposition`]
#[derive(Debug)]
pub struct CompositionRequest {
    /// The property writes
    pub request: AtomicRequest,
    /// Flags the request has to be committed with
    pub flags: AtomicCommitFlags,
    /// Mode blob referenced by the request, has to outlive the commit
    pub mode_blob: Option<PropertyBlob>,
}

/// A single change to a display
#[derive(Debug)]
pub struct DisplayComposition<'a> {
    crtc: &'a Crtc,
    connector: &'a Connector,
    kind: CompositionKind,
    layers: Vec<Layer>,
    client_target: Option<Layer>,
    dpms_mode: DpmsMode,
    display_mode: Option<DisplayMode>,
    composition_planes: Vec<CompositionPlane<'a>>,
}

impl<'a> DisplayComposition<'a> {
    /// Create an empty composition for the display driven by `crtc` and `connector`
    pub fn new(crtc: &'a Crtc, connector: &'a Connector) -> Self {
        DisplayComposition {
            crtc,
            connector,
            kind: CompositionKind::Empty,
            layers: Vec::new(),
            client_target: None,
            dpms_mode: DpmsMode::On,
            display_mode: None,
            composition_planes: Vec::new(),
        }
    }

    fn validate_kind(&mut self, requested: CompositionKind) -> Result<(), PlanError> {
        if self.kind != CompositionKind::Empty && self.kind != requested {
            warn!(current = ?self.kind, ?requested, "Mixing composition kinds");
            return Err(PlanError::KindMismatch {
                current: self.kind,
                requested,
            });
        }
        self.kind = requested;
        Ok(())
    }

    /// Kind of the composition
    pub fn kind(&self) -> CompositionKind {
        self.kind
    }

    /// Crtc of the display
    pub fn crtc(&self) -> &'a Crtc {
        self.crtc
    }

    /// Add the layers of a frame
    ///
    /// Layer indices refer to the order the layers were added in. Stacking is decided by
    /// [`Layer::z_order`], layers with the same z-order stack in the order they were added.
    pub fn set_layers(&mut self, layers: Vec<Layer>) -> Result<(), PlanError> {
        self.validate_kind(CompositionKind::Frame)?;
        self.layers.extend(layers);
        Ok(())
    }

    /// Layers of the frame, in the order they were added
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Indices of the layers, bottom to top
    pub fn stacking_order(&self) -> Vec<usize> {
        let mut order = (0..self.layers.len()).collect::<Vec<_>>();
        order.sort_by_key(|index| (self.layers[*index].z_order, *index));
        order
    }

    /// Set the layer presenting the output of client composition
    pub fn set_client_target(&mut self, target: Layer) {
        self.client_target = Some(target);
    }

    /// Change the power state of the display
    pub fn set_dpms_mode(&mut self, mode: DpmsMode) -> Result<(), PlanError> {
        self.validate_kind(CompositionKind::Dpms)?;
        self.dpms_mode = mode;
        Ok(())
    }

    /// Power state this composition sets
    pub fn dpms_mode(&self) -> DpmsMode {
        self.dpms_mode
    }

    /// Change the mode of the display, this also powers it on
    pub fn set_display_mode(&mut self, mode: DisplayMode) -> Result<(), PlanError> {
        self.validate_kind(CompositionKind::Modeset)?;
        self.dpms_mode = DpmsMode::On;
        self.display_mode = Some(mode);
        Ok(())
    }

    /// Mode this composition sets
    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.display_mode
    }

    /// Detach `plane` from the crtc with this composition
    pub fn add_plane_disable(&mut self, plane: &'a Plane) {
        self.composition_planes.push(CompositionPlane::disable(plane));
    }

    /// Add a composition plane by hand
    pub fn add_plane_composition(&mut self, plane: CompositionPlane<'a>) {
        self.composition_planes.push(plane);
    }

    /// Planned composition planes, in the order they are stacked
    pub fn composition_planes(&self) -> &[CompositionPlane<'a>] {
        &self.composition_planes
    }

    /// Indices of the layers no plane presents
    ///
    /// These have to be composited into the client target.
    pub fn unassigned_layers(&self) -> Vec<usize> {
        (0..self.layers.len())
            .filter(|index| {
                !self
                    .composition_planes
                    .iter()
                    .any(|plane| plane.source_layers.contains(index))
            })
            .collect()
    }

    /// Assign the layers of a frame to the planes of `pool`
    ///
    /// Planes used by the result are removed from `pool`. If the planner fails, or its
    /// result presents a layer twice, refers to an unknown layer or uses a plane that
    /// is not available, an error is returned and `pool` is left as it was.
    ///
    /// Compositions that are not frames have nothing to plan.
    #[profiling::function]
    pub fn plan(&mut self, planner: &mut dyn Planner, pool: &mut PlanePool<'a>) -> Result<(), PlanError> {
        if self.kind != CompositionKind::Frame {
            return Ok(());
        }

        let layers = self.layers.iter().enumerate().collect::<BTreeMap<_, _>>();
        let snapshot = pool.clone();
        let result = planner.provision_planes(&layers, self.crtc, pool);
        // only the validated result may consume planes
        *pool = snapshot;

        let mut planes = match result {
            Ok(planes) => planes,
            Err(err) => {
                debug!(crtc = ?self.crtc.handle(), "Planner failed: {}", err);
                return Err(err);
            }
        };
        validate(&planes, self.layers.len(), pool)?;

        let layers = &self.layers;
        for composition_plane in planes.iter_mut() {
            if let Some(plane) = composition_plane.plane {
                composition_plane
                    .source_layers
                    .sort_by_key(|index| (layers[*index].z_order, *index));
                pool.take(plane);
            }
        }
        trace!(
            crtc = ?self.crtc.handle(),
            "Planned {} composition planes, {} planes left",
            planes.len(),
            pool.len()
        );
        self.composition_planes = planes;
        Ok(())
    }

    /// Turn the composition into an atomic request
    ///
    /// Frames write the state of every composition plane, with the position in the plan
    /// as zpos. Dpms changes toggle the crtc, modesets upload the new mode and route the
    /// connector to the crtc.
    pub fn build_request(&self, device: &DrmDevice) -> Result<CompositionRequest, Error> {
        let mut request = AtomicRequest::new();
        let mut flags = AtomicCommitFlags::empty();
        let mut mode_blob = None;

        match self.kind {
            CompositionKind::Empty => {}
            CompositionKind::Frame => {
                for (zpos, composition_plane) in self.composition_planes.iter().enumerate() {
                    let Some(plane) = composition_plane.plane else {
                        continue;
                    };
                    let layer = match composition_plane.kind {
                        CompositionPlaneKind::Disable => {
                            plane.atomic_disable(&mut request)?;
                            continue;
                        }
                        CompositionPlaneKind::Layer => composition_plane
                            .source_layers
                            .first()
                            .and_then(|index| self.layers.get(*index)),
                        CompositionPlaneKind::Squash => self.client_target.as_ref(),
                    };
                    let layer = layer.ok_or(Error::MissingLayer(plane.handle()))?;
                    plane.atomic_set_state(&mut request, layer, zpos as u32, self.crtc)?;
                }
            }
            CompositionKind::Dpms => {
                let dpms = self.connector.dpms_property();
                // DPMS is a legacy property, atomic drivers only look at ACTIVE
                if dpms.atomic {
                    dpms.atomic_set(&mut request, self.dpms_mode.raw())?;
                }
                let active = self.dpms_mode == DpmsMode::On;
                self.crtc.active_property().atomic_set(&mut request, active as u64)?;
                flags |= AtomicCommitFlags::ALLOW_MODESET;
            }
            CompositionKind::Modeset => {
                if let Some(mode) = self.display_mode {
                    let blob = device.create_mode_blob(&mode.mode())?;
                    self.crtc
                        .mode_property()
                        .atomic_set(&mut request, blob.id() as u64)?;
                    mode_blob = Some(blob);
                }
                self.crtc.active_property().atomic_set(&mut request, 1)?;
                self.connector
                    .crtc_id_property()
                    .atomic_set(&mut request, u32::from(self.crtc.handle()) as u64)?;
                flags |= AtomicCommitFlags::ALLOW_MODESET;
            }
        }

        Ok(CompositionRequest {
            request,
            flags,
            mode_blob,
        })
    }
}

fn validate(planes: &[CompositionPlane<'_>], layer_count: usize, pool: &PlanePool<'_>) -> Result<(), PlanError> {
    let mut seen_layers = vec![false; layer_count];
    let mut seen_planes = SmallVec::<[plane::Handle; 8]>::new();

    for composition_plane in planes {
        for index in composition_plane.source_layers.iter().copied() {
            match seen_layers.get_mut(index) {
                None => return Err(PlanError::UnknownLayer(index)),
                Some(true) => return Err(PlanError::DuplicateLayer(index)),
                Some(seen) => *seen = true,
            }
        }

        if let Some(plane) = composition_plane.plane {
            let handle = plane.handle();
            if seen_planes.contains(&handle) || !pool.contains(plane) {
                return Err(PlanError::PlaneNotAvailable(handle));
            }
            seen_planes.push(handle);
        }
    }

    Ok(())
}
