//! Aggregation of all kms devices of the system

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, error, info, info_span, warn};

use super::{
    connector::DisplayMode,
    device::{fd::DrmDeviceFd, DrmDevice},
    kms::KmsDevice,
    vsync::DrmVblankSource,
    Error,
};
use crate::config::{Config, DisplayOrder};

/// Owner of every [`DrmDevice`] in use
///
/// Displays are numbered across devices: the first device gets display `0` (the primary
/// display) and following devices continue after the last display of the previous one.
#[derive(Debug)]
pub struct ResourceManager {
    devices: Vec<DrmDevice>,
    display_count: u32,
    display_order: DisplayOrder,
    scale_with_gpu: bool,
}

impl ResourceManager {
    /// Create a manager without any devices
    pub fn new(config: &Config) -> Self {
        ResourceManager {
            devices: Vec::new(),
            display_count: 0,
            display_order: config.display_order.clone(),
            scale_with_gpu: config.scale_with_gpu,
        }
    }

    /// Open the devices described by `config`
    ///
    /// A single device path is opened as is. A path ending in `%` is a pattern: `0`, `1`, ...
    /// are appended until a path does not exist. Nodes without kms resources are skipped,
    /// probing stops at the first device that fails to initialize.
    ///
    /// Fails if no display was found on any device.
    pub fn init(config: &Config) -> Result<Self, Error> {
        Self::init_with(config, |path| path.exists(), open_kms_device)
    }

    fn init_with(
        config: &Config,
        exists: impl Fn(&Path) -> bool,
        mut open: impl FnMut(&Path) -> Result<Option<Arc<dyn KmsDevice>>, Error>,
    ) -> Result<Self, Error> {
        let span = info_span!("resource_manager", path = %config.device_path);
        let _guard = span.enter();

        let mut manager = ResourceManager::new(config);
        let mut failure = None;

        let paths: Box<dyn Iterator<Item = PathBuf>> = match config.device_pattern_prefix() {
            Some(prefix) => {
                let prefix = prefix.to_owned();
                Box::new((0..).map(move |idx| PathBuf::from(format!("{}{}", prefix, idx))))
            }
            None => Box::new(std::iter::once(PathBuf::from(&config.device_path))),
        };

        for path in paths {
            if config.single_device().is_none() && !exists(&path) {
                break;
            }

            let kms = match open(&path) {
                Ok(Some(kms)) => kms,
                Ok(None) => {
                    debug!(?path, "Skipping node without kms resources");
                    continue;
                }
                Err(err) => {
                    error!(?path, "Failed to open drm device: {}", err);
                    failure = Some(err);
                    break;
                }
            };

            if let Err(err) = manager.add_device(kms) {
                failure = Some(err);
                break;
            }
        }

        if manager.display_count == 0 {
            error!("Failed to initialize any displays");
            return Err(failure.unwrap_or(Error::NoDisplays));
        }
        if let Some(err) = failure {
            warn!("Continuing with {} displays after: {}", manager.display_count, err);
        }

        info!(
            "Initialized {} displays on {} devices",
            manager.display_count,
            manager.devices.len()
        );
        Ok(manager)
    }

    /// Discover the displays of `kms` and take ownership of the device
    ///
    /// Returns the number of displays the device added. A device failing discovery
    /// is dropped as a whole.
    pub fn add_device(&mut self, kms: Arc<dyn KmsDevice>) -> Result<u32, Error> {
        let path = kms.dev_path();
        let device = DrmDevice::new(kms, self.display_count, &self.display_order).map_err(|err| {
            error!(?path, "Failed to initialize drm device: {}", err);
            err
        })?;

        let added = device.displays().len() as u32;
        self.display_count += added;
        self.devices.push(device);
        Ok(added)
    }

    /// Number of displays over all devices
    pub fn display_count(&self) -> u32 {
        self.display_count
    }

    /// All devices
    pub fn devices(&self) -> &[DrmDevice] {
        &self.devices
    }

    /// The device driving `display`
    pub fn device_for_display(&self, display: u32) -> Option<&DrmDevice> {
        self.devices.iter().find(|dev| dev.handles_display(display))
    }

    /// The device driving `display`
    pub fn device_for_display_mut(&mut self, display: u32) -> Option<&mut DrmDevice> {
        self.devices.iter_mut().find(|dev| dev.handles_display(display))
    }

    /// Record mode `mode_id` as shown by `display`, see [`DrmDevice::set_active_mode`]
    pub fn set_active_mode(&mut self, display: u32, mode_id: u32) -> Result<DisplayMode, Error> {
        self.device_for_display_mut(display)
            .ok_or(Error::UnknownDisplay(display))?
            .set_active_mode(display, mode_id)
    }

    /// A source of hardware vblanks for `display`
    pub fn vblank_source(&self, display: u32) -> Result<DrmVblankSource, Error> {
        let device = self
            .device_for_display(display)
            .ok_or(Error::UnknownDisplay(display))?;
        let crtc = device
            .crtc_for_display(display)
            .ok_or(Error::UnknownDisplay(display))?;
        Ok(DrmVblankSource::new(device.kms().clone(), crtc.pipe()))
    }

    /// Returns true if scaling has to be done by client composition
    pub fn forced_scaling_with_gpu(&self) -> bool {
        self.scale_with_gpu
    }
}

fn open_kms_device(path: &Path) -> Result<Option<Arc<dyn KmsDevice>>, Error> {
    if !DrmDeviceFd::is_kms_device(path) {
        return Ok(None);
    }
    let fd = DrmDeviceFd::open(path)?;
    Ok(Some(Arc::new(fd) as Arc<dyn KmsDevice>))
}
