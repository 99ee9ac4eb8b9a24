use drm::control::{connector, encoder, Mode, ModeTypeFlags};
use tracing::debug;

use super::{
    kms::{ConnectorInfo, KmsDevice},
    property::{Property, PropertyStore},
    AccessError, Error,
};

/// Class of a connector, derived from its interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorClass {
    /// Built-in panel
    Internal,
    /// Port for an external monitor
    External,
    /// Writes composited frames back into a buffer
    Writeback,
    /// Anything else, never used for a display
    Other,
}

impl ConnectorClass {
    /// Classify a connector interface
    pub fn from_interface(interface: connector::Interface) -> ConnectorClass {
        use connector::Interface;
        match interface {
            Interface::LVDS
            | Interface::EmbeddedDisplayPort
            | Interface::DSI
            | Interface::Virtual
            | Interface::DPI => ConnectorClass::Internal,
            Interface::HDMIA | Interface::DisplayPort | Interface::DVID | Interface::DVII | Interface::VGA => {
                ConnectorClass::External
            }
            Interface::Writeback => ConnectorClass::Writeback,
            _ => ConnectorClass::Other,
        }
    }
}

/// A mode of a connector
///
/// The id is unique per device and stays the same as long as the connector keeps
/// reporting an identical mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    id: u32,
    mode: Mode,
}

impl DisplayMode {
    /// Device-unique id of the mode
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Underlying kernel mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns true if the connector marked this mode as preferred
    pub fn is_preferred(&self) -> bool {
        self.mode.mode_type().contains(ModeTypeFlags::PREFERRED)
    }

    /// Refresh rate in Hz, calculated from the pixel clock and totals
    ///
    /// Falls back to the rounded refresh rate reported by the kernel if the clock is unknown.
    pub fn refresh(&self) -> f32 {
        let (_, _, htotal) = self.mode.hsync();
        let (_, _, vtotal) = self.mode.vsync();
        let clock = self.mode.clock();
        if clock == 0 || htotal == 0 || vtotal == 0 {
            return self.mode.vrefresh() as f32;
        }
        clock as f32 / (htotal as f32 * vtotal as f32) * 1000.0
    }
}

#[derive(Debug, Clone)]
struct WritebackProperties {
    pixel_formats: Property,
    fb_id: Property,
    out_fence_ptr: Property,
}

/// A connector of a [`DrmDevice`](super::DrmDevice)
#[derive(Debug, Clone)]
pub struct Connector {
    handle: connector::Handle,
    interface: connector::Interface,
    interface_id: u32,
    state: connector::State,
    size_mm: (u32, u32),
    encoder: Option<encoder::Handle>,
    possible_encoders: Vec<encoder::Handle>,
    display: Option<u32>,
    modes: Vec<DisplayMode>,
    preferred_mode: Option<u32>,
    active_mode: Option<DisplayMode>,
    dpms: Property,
    crtc_id: Property,
    edid: Option<Property>,
    writeback: Option<WritebackProperties>,
}

impl Connector {
    pub(super) fn new(
        kms: &dyn KmsDevice,
        info: &ConnectorInfo,
        encoder: Option<encoder::Handle>,
        possible_encoders: Vec<encoder::Handle>,
    ) -> Result<Connector, Error> {
        let props = PropertyStore::load(kms, info.handle.into())?;
        let writeback = if ConnectorClass::from_interface(info.interface) == ConnectorClass::Writeback {
            Some(WritebackProperties {
                pixel_formats: props.mandatory("WRITEBACK_PIXEL_FORMATS")?,
                fb_id: props.mandatory("WRITEBACK_FB_ID")?,
                out_fence_ptr: props.mandatory("WRITEBACK_OUT_FENCE_PTR")?,
            })
        } else {
            None
        };
        let edid = props.optional("EDID");
        if edid.is_none() {
            debug!(connector = ?info.handle, "Could not get EDID property");
        }

        Ok(Connector {
            handle: info.handle,
            interface: info.interface,
            interface_id: info.interface_id,
            state: info.state,
            size_mm: info.size_mm,
            encoder,
            possible_encoders,
            display: None,
            modes: Vec::new(),
            preferred_mode: None,
            active_mode: None,
            dpms: props.mandatory("DPMS")?,
            crtc_id: props.mandatory("CRTC_ID")?,
            edid,
            writeback,
        })
    }

    /// Handle of the connector
    pub fn handle(&self) -> connector::Handle {
        self.handle
    }

    /// Interface of the connector
    pub fn interface(&self) -> connector::Interface {
        self.interface
    }

    /// Class of the connector
    pub fn class(&self) -> ConnectorClass {
        ConnectorClass::from_interface(self.interface)
    }

    /// Returns true for built-in panels
    pub fn is_internal(&self) -> bool {
        self.class() == ConnectorClass::Internal
    }

    /// Returns true for ports of external monitors
    pub fn is_external(&self) -> bool {
        self.class() == ConnectorClass::External
    }

    /// Returns true for writeback connectors
    pub fn is_writeback(&self) -> bool {
        self.class() == ConnectorClass::Writeback
    }

    /// Name of the connector, e.g. `HDMI-A-1`
    pub fn name(&self) -> String {
        format!("{}-{}", self.interface.as_str(), self.interface_id)
    }

    /// Connection state
    pub fn state(&self) -> connector::State {
        self.state
    }

    /// Returns true if a monitor is connected
    pub fn is_connected(&self) -> bool {
        self.state == connector::State::Connected
    }

    /// Physical size in millimeters
    pub fn size_mm(&self) -> (u32, u32) {
        self.size_mm
    }

    /// Encoder driving this connector
    pub fn encoder(&self) -> Option<encoder::Handle> {
        self.encoder
    }

    pub(super) fn set_encoder(&mut self, encoder: encoder::Handle) {
        self.encoder = Some(encoder);
    }

    /// Encoders that may drive this connector
    pub fn possible_encoders(&self) -> &[encoder::Handle] {
        &self.possible_encoders
    }

    /// Display this connector is assigned to
    pub fn display(&self) -> Option<u32> {
        self.display
    }

    pub(super) fn set_display(&mut self, display: u32) {
        self.display = Some(display);
    }

    /// Modes reported at the last [`Connector::update_modes`]
    pub fn modes(&self) -> &[DisplayMode] {
        &self.modes
    }

    /// Id of the first preferred mode, or of the first mode
    pub fn preferred_mode_id(&self) -> Option<u32> {
        self.preferred_mode
    }

    /// The mode currently shown
    pub fn active_mode(&self) -> Option<DisplayMode> {
        self.active_mode
    }

    pub(super) fn set_active_mode(&mut self, mode: DisplayMode) {
        self.active_mode = Some(mode);
    }

    /// `DPMS` property
    pub fn dpms_property(&self) -> &Property {
        &self.dpms
    }

    /// `CRTC_ID` property
    pub fn crtc_id_property(&self) -> &Property {
        &self.crtc_id
    }

    /// `WRITEBACK_PIXEL_FORMATS` property of writeback connectors
    pub fn writeback_pixel_formats(&self) -> Option<&Property> {
        self.writeback.as_ref().map(|wb| &wb.pixel_formats)
    }

    /// `WRITEBACK_FB_ID` property of writeback connectors
    pub fn writeback_fb_id(&self) -> Option<&Property> {
        self.writeback.as_ref().map(|wb| &wb.fb_id)
    }

    /// `WRITEBACK_OUT_FENCE_PTR` property of writeback connectors
    pub fn writeback_out_fence(&self) -> Option<&Property> {
        self.writeback.as_ref().map(|wb| &wb.out_fence_ptr)
    }

    /// Blob id of the current EDID, re-read from the device
    pub fn edid_blob(&mut self, kms: &dyn KmsDevice) -> Option<u64> {
        self.edid = PropertyStore::load(kms, self.handle.into())
            .ok()
            .and_then(|props| props.optional("EDID"));
        self.edid.as_ref().map(|prop| prop.value).filter(|blob| *blob != 0)
    }

    /// Re-read the connection state and modes
    ///
    /// Modes that did not change keep their id, new modes get an id from `next_mode_id`.
    pub fn update_modes(
        &mut self,
        kms: &dyn KmsDevice,
        mut next_mode_id: impl FnMut() -> u32,
    ) -> Result<(), Error> {
        let info = kms.connector(self.handle).map_err(|source| AccessError {
            errmsg: "Failed to get connector",
            dev: kms.dev_path(),
            source,
        })?;
        self.state = info.state;

        let modes = info
            .modes
            .into_iter()
            .map(|mode| match self.modes.iter().find(|known| known.mode == mode) {
                Some(known) => *known,
                None => DisplayMode {
                    id: next_mode_id(),
                    mode,
                },
            })
            .collect::<Vec<_>>();

        self.preferred_mode = modes
            .iter()
            .find(|mode| mode.is_preferred())
            .or_else(|| modes.first())
            .map(|mode| mode.id);
        self.modes = modes;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use drm::control::connector::{Interface, State};

    use crate::backend::drm::testing::{mode, FakeKms};

    use super::ConnectorClass;

    #[test]
    fn classification_is_exclusive() {
        assert_eq!(
            ConnectorClass::from_interface(Interface::EmbeddedDisplayPort),
            ConnectorClass::Internal
        );
        assert_eq!(ConnectorClass::from_interface(Interface::HDMIA), ConnectorClass::External);
        assert_eq!(ConnectorClass::from_interface(Interface::Writeback), ConnectorClass::Writeback);
        assert_eq!(ConnectorClass::from_interface(Interface::Composite), ConnectorClass::Other);
    }

    #[test]
    fn connector_names() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .encoder(0b1, None)
            .connector(Interface::HDMIA, 2, State::Connected, &[0])
            .connector(Interface::EmbeddedDisplayPort, 1, State::Connected, &[0])
            .connector(Interface::Unknown, 1, State::Connected, &[0])
            .build();
        let names = (0..3).map(|i| kms.load_connector(i).name()).collect::<Vec<_>>();
        assert_eq!(names, ["HDMI-A-2", "eDP-1", "Unknown-1"]);
    }

    #[test]
    fn update_modes_keeps_ids() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .encoder(0b1, None)
            .connector(Interface::HDMIA, 1, State::Connected, &[0])
            .build();
        let mut conn = kms.load_connector(0);
        let mut next = 0;
        let a = mode(1920, 1080, 60, false);
        let b = mode(1280, 720, 60, true);
        let c = mode(640, 480, 60, false);

        kms.set_modes(0, vec![a, b]);
        conn.update_modes(&kms, || {
            next += 1;
            next
        })
        .unwrap();
        let ids = conn.modes().iter().map(|m| m.id()).collect::<Vec<_>>();
        assert_eq!(ids, [1, 2]);
        assert_eq!(conn.preferred_mode_id(), Some(2));

        kms.set_modes(0, vec![c, a]);
        conn.update_modes(&kms, || {
            next += 1;
            next
        })
        .unwrap();
        let ids = conn.modes().iter().map(|m| m.id()).collect::<Vec<_>>();
        assert_eq!(ids, [3, 1]);
        // no preferred mode left, the first one is used
        assert_eq!(conn.preferred_mode_id(), Some(3));
    }

    #[test]
    fn update_modes_reads_state() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .encoder(0b1, None)
            .connector(Interface::DisplayPort, 1, State::Connected, &[0])
            .build();
        let mut conn = kms.load_connector(0);
        kms.set_state(0, State::Disconnected);
        conn.update_modes(&kms, || 1).unwrap();
        assert!(!conn.is_connected());
    }

    #[test]
    fn writeback_requires_writeback_properties() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .encoder(0b1, None)
            .connector(Interface::Writeback, 1, State::Unknown, &[0])
            .build();
        let conn = kms.load_connector(0);
        assert!(conn.is_writeback());
        assert!(conn.writeback_fb_id().is_some());

        kms.remove_property(kms.connector_handle(0).into(), "WRITEBACK_FB_ID");
        let info = crate::backend::drm::KmsDevice::connector(&kms, kms.connector_handle(0)).unwrap();
        assert!(super::Connector::new(&kms, &info, None, Vec::new()).is_err());
    }

    #[test]
    fn refresh_from_timings() {
        let kms = FakeKms::builder()
            .crtcs(1)
            .encoder(0b1, None)
            .connector(Interface::HDMIA, 1, State::Connected, &[0])
            .build();
        let mut conn = kms.load_connector(0);
        conn.update_modes(&kms, || 1).unwrap();
        let refresh = conn.modes()[0].refresh();
        assert!((refresh - 60.0).abs() < 0.01, "{}", refresh);
    }
}
