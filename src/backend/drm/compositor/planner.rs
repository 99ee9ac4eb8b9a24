use std::collections::BTreeMap;

use tracing::trace;

use super::{CompositionPlane, Layer, PlanError, PlanePool};
use crate::backend::drm::{crtc::Crtc, plane::Plane};

/// Plane assignment strategy
///
/// It exists to allow custom heuristics in
/// [`DisplayComposition::plan`](super::DisplayComposition::plan).
///
/// It is responsible for mapping the layers of a frame to planes.
/// Layers not presented by any returned plane are composited by the gpu.
pub trait Planner {
    /// Assign `layers` (keyed by their index) of a frame on `crtc` to planes of `pool`
    ///
    /// Layers stack by their z-order, ties are broken by their index.
    ///
    /// Returns the composition planes in the order they are stacked. Changes made to
    /// `pool` are discarded, the planes used by the result are removed from the pool
    /// once it was validated.
    fn provision_planes<'a>(
        &mut self,
        layers: &BTreeMap<usize, &Layer>,
        crtc: &Crtc,
        pool: &mut PlanePool<'a>,
    ) -> Result<Vec<CompositionPlane<'a>>, PlanError>;
}

/// Simple Planner
///
/// This is a basic planner that puts every layer onto its own plane.
///
/// Layers are walked bottom up by z-order, each one takes the next free primary or overlay plane
/// that can be attached to the crtc and is able to present it. The first layer that
/// fits nowhere and every layer above it are left for gpu composition, as no plane
/// would be stacked correctly on top of the client target otherwise.
#[derive(Debug, Default)]
pub struct SimplePlanner {
    _private: (),
}

impl SimplePlanner {
    /// Create new [`SimplePlanner`]
    pub fn new() -> Self {
        Self::default()
    }

    fn pick_next_available_for_layer<'a>(
        pool: &PlanePool<'a>,
        taken: &[&'a Plane],
        crtc: &Crtc,
        layer: &Layer,
    ) -> Option<&'a Plane> {
        pool.iter().find(|plane| {
            !taken.iter().any(|p| p.handle() == plane.handle())
                && plane.supports_crtc(crtc)
                && plane.is_valid_for_layer(layer)
        })
    }
}

impl Planner for SimplePlanner {
    fn provision_planes<'a>(
        &mut self,
        layers: &BTreeMap<usize, &Layer>,
        crtc: &Crtc,
        pool: &mut PlanePool<'a>,
    ) -> Result<Vec<CompositionPlane<'a>>, PlanError> {
        let mut taken = Vec::new();
        let mut planes = Vec::new();

        let mut stacked = layers.iter().map(|(index, layer)| (*index, *layer)).collect::<Vec<_>>();
        stacked.sort_by_key(|(index, layer)| (layer.z_order, *index));

        for (index, layer) in stacked {
            if layer.fb.is_none() {
                trace!(layer = index, "Layer has no framebuffer");
                break;
            }
            match Self::pick_next_available_for_layer(pool, &taken, crtc, layer) {
                Some(plane) => {
                    taken.push(plane);
                    planes.push(CompositionPlane::layer(plane, index));
                }
                None => {
                    trace!(
                        layer = index,
                        crtc = ?crtc.handle(),
                        "No plane left for layer, {} layers go to client composition",
                        layers.len() - planes.len()
                    );
                    break;
                }
            }
        }

        Ok(planes)
    }
}
