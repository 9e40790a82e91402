use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;

use eddystone_ble::radio::{
    AdvertiseSettings, AttributeHandle, Callback, ConnectInfo, DeviceHandle, Listener, NotificationOptions, Radio,
    RawAdvertisement, RawSighting, RemoteCharacteristic, RemoteDescriptor, RemoteService,
};
use eddystone_ble::{EddystoneScanner, Uuid};
use tracing::{info, metadata::LevelFilter, warn};

/// Scan records captured from a beacon cycling through its UID, URL and TLM frames.
const CAPTURED: [(&str, i16, &str); 4] = [
    ("C4:1B:52:7A:90:01", -63, "AwOq/hUWqv4A5u3R6+rATl3voBcBAgMEBQY="),
    ("C4:1B:52:7A:90:01", -61, "AwOq/g0Wqv4Q6wFnb29nbGUH"),
    ("C4:1B:52:7A:90:01", -66, "AwOq/hEWqv4gAAu4GYAAAAEAAAAACg=="),
    ("5E:77:10:3C:22:0F", -80, "AwOq/gYWqv4QEAk="),
];

#[derive(Default)]
struct ReplayRadio {
    listener: RefCell<Option<Listener<RawSighting>>>,
}

impl ReplayRadio {
    fn replay(&self) {
        for (address, rssi, record) in CAPTURED {
            let listener = self.listener.borrow_mut().take();
            let Some(mut listener) = listener else {
                return;
            };
            listener(Ok(RawSighting {
                address: address.to_string(),
                name: None,
                rssi: Some(rssi),
                advertisement: RawAdvertisement::Base64ScanRecord(record.to_string()),
            }));
            self.listener.borrow_mut().get_or_insert(listener);
        }
    }
}

fn unsupported<T>(callback: Callback<T>) {
    callback(Err(eddystone_ble::Error::radio("not supported by the replay radio")))
}

impl Radio for ReplayRadio {
    fn start_scan(&self, services: &[Uuid], listener: Listener<RawSighting>) {
        info!("replaying {} captured advertisements for {:?}", CAPTURED.len(), services);
        *self.listener.borrow_mut() = Some(listener);
    }

    fn stop_scan(&self) {
        self.listener.borrow_mut().take();
    }

    fn connect(&self, _address: &str, mut listener: Listener<ConnectInfo>) {
        listener(Err(eddystone_ble::Error::radio("not supported by the replay radio")))
    }

    fn close(&self, _device: DeviceHandle) {}

    fn rssi(&self, _device: DeviceHandle, callback: Callback<i16>) {
        unsupported(callback)
    }

    fn services(&self, _device: DeviceHandle, callback: Callback<Vec<RemoteService>>) {
        unsupported(callback)
    }

    fn characteristics(
        &self,
        _device: DeviceHandle,
        _service: AttributeHandle,
        callback: Callback<Vec<RemoteCharacteristic>>,
    ) {
        unsupported(callback)
    }

    fn descriptors(
        &self,
        _device: DeviceHandle,
        _characteristic: AttributeHandle,
        callback: Callback<Vec<RemoteDescriptor>>,
    ) {
        unsupported(callback)
    }

    fn read_characteristic(
        &self,
        _device: DeviceHandle,
        _characteristic: AttributeHandle,
        callback: Callback<Vec<u8>>,
    ) {
        unsupported(callback)
    }

    fn write_characteristic(
        &self,
        _device: DeviceHandle,
        _characteristic: AttributeHandle,
        _value: Vec<u8>,
        callback: Callback<()>,
    ) {
        unsupported(callback)
    }

    fn write_characteristic_without_response(
        &self,
        _device: DeviceHandle,
        _characteristic: AttributeHandle,
        _value: Vec<u8>,
        callback: Callback<()>,
    ) {
        unsupported(callback)
    }

    fn enable_notification(
        &self,
        _device: DeviceHandle,
        _characteristic: AttributeHandle,
        _options: NotificationOptions,
        mut listener: Listener<Vec<u8>>,
    ) {
        listener(Err(eddystone_ble::Error::radio("not supported by the replay radio")))
    }

    fn disable_notification(
        &self,
        _device: DeviceHandle,
        _characteristic: AttributeHandle,
        _options: NotificationOptions,
        callback: Callback<()>,
    ) {
        unsupported(callback)
    }

    fn read_descriptor(&self, _device: DeviceHandle, _descriptor: AttributeHandle, callback: Callback<Vec<u8>>) {
        unsupported(callback)
    }

    fn write_descriptor(
        &self,
        _device: DeviceHandle,
        _descriptor: AttributeHandle,
        _value: Vec<u8>,
        callback: Callback<()>,
    ) {
        unsupported(callback)
    }

    fn reset(&self, callback: Callback<()>) {
        callback(Ok(()))
    }

    fn start_advertise(&self, _settings: AdvertiseSettings, callback: Callback<()>) {
        unsupported(callback)
    }

    fn stop_advertise(&self, callback: Callback<()>) {
        callback(Ok(()))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let radio = Rc::new(ReplayRadio::default());
    let scanner = EddystoneScanner::new(radio.clone());

    info!("starting scan");
    scanner.start_scan(|result| match result {
        Ok(device) => {
            let beacon = device.beacon();
            info!(
                "{} rssi={:?} uid={:?} url={:?} battery={:?}mV temp={:?} distance={:?}",
                device,
                device.rssi(),
                beacon.uid(),
                beacon.url,
                beacon.voltage,
                beacon.temperature.and_then(|t| t.celsius()),
                device.distance()
            );
        }
        Err(err) => warn!("{}", err),
    })?;
    radio.replay();
    scanner.stop_scan();
    info!("scan stopped");

    Ok(())
}
