//! Scanning for devices and Eddystone beacons.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::btuuid::services::EDDYSTONE;
use crate::device::{Device, DeviceId};
use crate::eddystone::EddystoneFrame;
use crate::error::ErrorKind;
use crate::radio::{Radio, RawSighting};
use crate::registry::DeviceRegistry;
use crate::Result;

/// Options for [`ScanController::start_scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanOptions {
    /// Services to scan for. Passed to the radio, which may treat several services as "any of" or "all of"
    /// depending on the platform. Empty scans for all devices.
    pub services: Vec<Uuid>,
    /// Report every advertisement from a device rather than only the first.
    pub allow_duplicates: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            services: Vec::new(),
            allow_duplicates: true,
        }
    }
}

#[derive(Debug, Default)]
struct ScanState {
    registry: DeviceRegistry,
    scanning: bool,
    generation: u64,
}

impl ScanState {
    fn on_sighting(
        state: &RefCell<ScanState>,
        generation: u64,
        allow_duplicates: bool,
        result: Result<RawSighting>,
        on_device: &mut dyn FnMut(Result<&Device>),
    ) {
        let device = {
            let mut state = state.borrow_mut();
            if !state.scanning || state.generation != generation {
                trace!("dropping sighting delivered after its scan stopped");
                return;
            }
            match result {
                Ok(sighting) => {
                    let outcome = state.registry.record(sighting, allow_duplicates);
                    outcome.reported().and_then(|id| state.registry.get(id)).cloned()
                }
                Err(err) => {
                    drop(state);
                    warn!("scan error: {}", err);
                    return on_device(Err(err));
                }
            }
        };

        if let Some(device) = device {
            on_device(Ok(&device));
        }
    }
}

/// Drives a scan and maintains the [`DeviceRegistry`] of devices found.
///
/// The controller is a cheap handle; clones share the same scan.
pub struct ScanController<R> {
    radio: Rc<R>,
    state: Rc<RefCell<ScanState>>,
}

impl<R> Clone for ScanController<R> {
    fn clone(&self) -> Self {
        ScanController {
            radio: self.radio.clone(),
            state: self.state.clone(),
        }
    }
}

impl<R> std::fmt::Debug for ScanController<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController").field("state", &self.state).finish()
    }
}

impl<R: Radio + 'static> ScanController<R> {
    /// Creates an idle controller.
    pub fn new(radio: Rc<R>) -> Self {
        ScanController {
            radio,
            state: Rc::new(RefCell::new(ScanState::default())),
        }
    }

    /// Returns `true` between [`start_scan`][Self::start_scan] and [`stop_scan`][Self::stop_scan].
    pub fn is_scanning(&self) -> bool {
        self.state.borrow().scanning
    }

    /// Starts a scan.
    ///
    /// Forgets every device found by earlier scans, then reports each device that passes the registry's policy to
    /// `on_device`. Radio errors are reported to `on_device` too; they do not stop the scan. Fails with
    /// [`ErrorKind::AlreadyScanning`] if a scan is in progress, leaving the devices of that scan in place.
    pub fn start_scan(&self, options: ScanOptions, on_device: impl FnMut(Result<&Device>) + 'static) -> Result<()> {
        let generation = {
            let mut state = self.state.borrow_mut();
            if state.scanning {
                return Err(ErrorKind::AlreadyScanning.into());
            }
            state.registry.clear();
            state.scanning = true;
            state.generation += 1;
            state.generation
        };

        info!("starting scan");
        let state = self.state.clone();
        let allow_duplicates = options.allow_duplicates;
        let mut on_device = on_device;
        self.radio.start_scan(
            &options.services,
            Box::new(move |result| {
                ScanState::on_sighting(&state, generation, allow_duplicates, result, &mut on_device)
            }),
        );
        Ok(())
    }

    /// Stops scanning. Sightings the radio delivers afterwards are dropped.
    pub fn stop_scan(&self) {
        let was_scanning = std::mem::replace(&mut self.state.borrow_mut().scanning, false);
        if was_scanning {
            info!("scan stopped");
        }
        self.radio.stop_scan();
    }

    /// Only report devices advertising at least one of `services`. An empty list reports nothing.
    pub fn filter_devices_by_service(&self, services: &[Uuid]) {
        self.state.borrow_mut().registry.filter_devices_by_service(services);
    }

    /// Removes the service filter.
    pub fn clear_service_filter(&self) {
        self.state.borrow_mut().registry.clear_service_filter();
    }

    /// Report each device only once per scan, even if the scan allows duplicates.
    pub fn report_device_once(&self, report_once: bool) {
        self.state.borrow_mut().registry.report_device_once(report_once);
    }

    /// A snapshot of a device found by the current scan
    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.state.borrow().registry.get(id).cloned()
    }

    /// Snapshots of every device found by the current scan
    pub fn devices(&self) -> Vec<Device> {
        self.state.borrow().registry.devices().cloned().collect()
    }
}

/// Scans for Eddystone beacons and accumulates their frames.
///
/// Reports a device each time it delivers a valid Eddystone frame, after merging the frame into the device's
/// [`BeaconData`][crate::device::BeaconData]. Frames that fail validation are reported as errors; service data that
/// is not an Eddystone frame at all is ignored.
#[derive(Debug)]
pub struct EddystoneScanner<R> {
    controller: ScanController<R>,
}

impl<R> Clone for EddystoneScanner<R> {
    fn clone(&self) -> Self {
        EddystoneScanner {
            controller: self.controller.clone(),
        }
    }
}

impl<R: Radio + 'static> EddystoneScanner<R> {
    #[allow(missing_docs)]
    pub fn new(radio: Rc<R>) -> Self {
        EddystoneScanner {
            controller: ScanController::new(radio),
        }
    }

    /// The underlying controller, for its registry policy and device snapshots
    pub fn controller(&self) -> &ScanController<R> {
        &self.controller
    }

    /// Starts scanning for beacons. Fails with [`ErrorKind::AlreadyScanning`] if a scan is in progress.
    pub fn start_scan(&self, on_beacon: impl FnMut(Result<&Device>) + 'static) -> Result<()> {
        let state = self.controller.state.clone();
        let mut on_beacon = on_beacon;
        let options = ScanOptions {
            services: vec![EDDYSTONE],
            allow_duplicates: true,
        };
        self.controller.start_scan(options, move |result| {
            let device = match result {
                Ok(device) => device,
                Err(err) => return on_beacon(Err(err)),
            };
            let frame = match device.adv_data().and_then(EddystoneFrame::from_advertisement) {
                Some(Ok(frame)) => frame,
                Some(Err(err)) if err.is_eddystone() => {
                    debug!("invalid frame from {}: {}", device.id(), err);
                    return on_beacon(Err(err.into()));
                }
                Some(Err(err)) => {
                    trace!("{} is not an Eddystone beacon: {}", device.id(), err);
                    return;
                }
                None => return,
            };

            let merged = state.borrow_mut().registry.update_device(device.id(), |device| {
                device.beacon.merge(&frame);
                device.clone()
            });
            if let Some(device) = merged {
                on_beacon(Ok(&device));
            }
        })
    }

    /// Stops scanning.
    pub fn stop_scan(&self) {
        self.controller.stop_scan();
    }
}
