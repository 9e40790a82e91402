#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use eddystone_ble::btuuid::{characteristics, descriptors, services};
use eddystone_ble::radio::{
    AdvertiseSettings, AttributeHandle, Callback, ConnectInfo, ConnectionState, DeviceHandle, Listener,
    NotificationOptions, Radio, RawAdvertisement, RawSighting, RemoteCharacteristic, RemoteDescriptor, RemoteService,
};
use eddystone_ble::{BluetoothUuidExt, CharacteristicProperties, DeviceId, Error, GattSessionManager, Result, Uuid};

/// A discovery request the mock is holding until the test completes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    Services,
    Characteristics(u64),
    Descriptors(u64),
}

enum Pending {
    Services(Callback<Vec<RemoteService>>),
    Characteristics(Callback<Vec<RemoteCharacteristic>>),
    Descriptors(Callback<Vec<RemoteDescriptor>>),
}

#[derive(Default)]
pub struct GattTable {
    pub services: Vec<RemoteService>,
    pub characteristics: HashMap<u64, Vec<RemoteCharacteristic>>,
    pub descriptors: HashMap<u64, Vec<RemoteDescriptor>>,
}

#[derive(Default)]
struct State {
    log: Vec<String>,
    scan_listener: Option<Listener<RawSighting>>,
    connect_listeners: HashMap<String, Listener<ConnectInfo>>,
    pending: Vec<(Request, Pending)>,
    auto_discover: bool,
    table: GattTable,
    values: HashMap<u64, Vec<u8>>,
    notifications: HashMap<u64, Listener<Vec<u8>>>,
    advertise_error: Option<String>,
    advertised: Option<AdvertiseSettings>,
}

/// A radio driver that records every request and completes them on command.
///
/// Reads, writes, rssi, reset and advertising complete synchronously. Discovery requests are held until the test
/// completes them, unless auto discovery is enabled. The scan listener is kept after `stop_scan` so tests can deliver
/// late sightings.
#[derive(Default)]
pub struct MockRadio {
    state: RefCell<State>,
}

impl MockRadio {
    pub fn new() -> Rc<Self> {
        Rc::new(MockRadio::default())
    }

    pub fn with_table(table: GattTable) -> Rc<Self> {
        let radio = MockRadio::default();
        radio.state.borrow_mut().table = table;
        Rc::new(radio)
    }

    pub fn set_auto_discover(&self, auto: bool) {
        self.state.borrow_mut().auto_discover = auto;
    }

    pub fn log(&self) -> Vec<String> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    fn record(&self, entry: String) {
        self.state.borrow_mut().log.push(entry);
    }

    pub fn set_value(&self, handle: u64, value: &[u8]) {
        self.state.borrow_mut().values.insert(handle, value.to_vec());
    }

    pub fn value(&self, handle: u64) -> Option<Vec<u8>> {
        self.state.borrow().values.get(&handle).cloned()
    }

    pub fn fail_advertising(&self, message: &str) {
        self.state.borrow_mut().advertise_error = Some(message.to_string());
    }

    pub fn advertised(&self) -> Option<AdvertiseSettings> {
        self.state.borrow().advertised.clone()
    }

    pub fn sight(&self, address: &str, rssi: i16, advertisement: RawAdvertisement) {
        self.deliver_sighting(Ok(RawSighting {
            address: address.to_string(),
            name: None,
            rssi: Some(rssi),
            advertisement,
        }));
    }

    pub fn deliver_sighting(&self, sighting: Result<RawSighting>) {
        let listener = self.state.borrow_mut().scan_listener.take();
        if let Some(mut listener) = listener {
            listener(sighting);
            let mut state = self.state.borrow_mut();
            if state.scan_listener.is_none() {
                state.scan_listener = Some(listener);
            }
        }
    }

    pub fn connection_event(&self, address: &str, event: Result<ConnectInfo>) {
        let listener = self.state.borrow_mut().connect_listeners.remove(address);
        if let Some(mut listener) = listener {
            listener(event);
            self.state
                .borrow_mut()
                .connect_listeners
                .entry(address.to_string())
                .or_insert(listener);
        }
    }

    pub fn connected(&self, address: &str, handle: u64) {
        self.connection_event(
            address,
            Ok(ConnectInfo {
                device: DeviceHandle(handle),
                state: ConnectionState::Connected,
            }),
        );
    }

    pub fn disconnected(&self, address: &str, handle: u64) {
        self.connection_event(
            address,
            Ok(ConnectInfo {
                device: DeviceHandle(handle),
                state: ConnectionState::Disconnected,
            }),
        );
    }

    pub fn pending(&self) -> Vec<Request> {
        self.state.borrow().pending.iter().map(|(request, _)| *request).collect()
    }

    /// Completes a held discovery request with the result from the table.
    pub fn complete(&self, request: Request) {
        let Some(pending) = self.take_pending(request) else {
            panic!("{:?} is not pending", request);
        };
        self.answer(request, pending);
    }

    /// Fails a held discovery request with a driver error.
    pub fn fail(&self, request: Request, message: &str) {
        let Some(pending) = self.take_pending(request) else {
            panic!("{:?} is not pending", request);
        };
        match pending {
            Pending::Services(callback) => callback(Err(Error::radio(message))),
            Pending::Characteristics(callback) => callback(Err(Error::radio(message))),
            Pending::Descriptors(callback) => callback(Err(Error::radio(message))),
        }
    }

    /// Completes held requests, newest first, until none are left.
    pub fn complete_all_reversed(&self) {
        loop {
            let last = self.state.borrow().pending.last().map(|(request, _)| *request);
            match last {
                Some(request) => self.complete(request),
                None => break,
            }
        }
    }

    pub fn notify(&self, handle: u64, value: &[u8]) {
        let listener = self.state.borrow_mut().notifications.remove(&handle);
        if let Some(mut listener) = listener {
            listener(Ok(value.to_vec()));
            self.state.borrow_mut().notifications.entry(handle).or_insert(listener);
        }
    }

    pub fn is_subscribed(&self, handle: u64) -> bool {
        self.state.borrow().notifications.contains_key(&handle)
    }

    fn take_pending(&self, request: Request) -> Option<Pending> {
        let mut state = self.state.borrow_mut();
        let index = state.pending.iter().position(|(r, _)| *r == request)?;
        Some(state.pending.remove(index).1)
    }

    fn answer(&self, request: Request, pending: Pending) {
        let (services, characteristics, descriptors) = {
            let state = self.state.borrow();
            let table = &state.table;
            match request {
                Request::Services => (table.services.clone(), Vec::new(), Vec::new()),
                Request::Characteristics(handle) => (
                    Vec::new(),
                    table.characteristics.get(&handle).cloned().unwrap_or_default(),
                    Vec::new(),
                ),
                Request::Descriptors(handle) => (
                    Vec::new(),
                    Vec::new(),
                    table.descriptors.get(&handle).cloned().unwrap_or_default(),
                ),
            }
        };
        match pending {
            Pending::Services(callback) => callback(Ok(services)),
            Pending::Characteristics(callback) => callback(Ok(characteristics)),
            Pending::Descriptors(callback) => callback(Ok(descriptors)),
        }
    }

    fn hold(&self, request: Request, pending: Pending) {
        let auto = self.state.borrow().auto_discover;
        if auto {
            self.answer(request, pending);
        } else {
            self.state.borrow_mut().pending.push((request, pending));
        }
    }
}

impl Radio for MockRadio {
    fn start_scan(&self, services: &[Uuid], listener: Listener<RawSighting>) {
        self.record(format!("start_scan {:?}", services));
        self.state.borrow_mut().scan_listener = Some(listener);
    }

    fn stop_scan(&self) {
        self.record("stop_scan".to_string());
    }

    fn connect(&self, address: &str, listener: Listener<ConnectInfo>) {
        self.record(format!("connect {address}"));
        self.state
            .borrow_mut()
            .connect_listeners
            .insert(address.to_string(), listener);
    }

    fn close(&self, device: DeviceHandle) {
        self.record(format!("close {}", device.0));
    }

    fn rssi(&self, device: DeviceHandle, callback: Callback<i16>) {
        self.record(format!("rssi {}", device.0));
        callback(Ok(-55));
    }

    fn services(&self, device: DeviceHandle, callback: Callback<Vec<RemoteService>>) {
        self.record(format!("services {}", device.0));
        self.hold(Request::Services, Pending::Services(callback));
    }

    fn characteristics(
        &self,
        device: DeviceHandle,
        service: AttributeHandle,
        callback: Callback<Vec<RemoteCharacteristic>>,
    ) {
        self.record(format!("characteristics {} {}", device.0, service.0));
        self.hold(Request::Characteristics(service.0), Pending::Characteristics(callback));
    }

    fn descriptors(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        callback: Callback<Vec<RemoteDescriptor>>,
    ) {
        self.record(format!("descriptors {} {}", device.0, characteristic.0));
        self.hold(Request::Descriptors(characteristic.0), Pending::Descriptors(callback));
    }

    fn read_characteristic(&self, device: DeviceHandle, characteristic: AttributeHandle, callback: Callback<Vec<u8>>) {
        self.record(format!("read_characteristic {} {}", device.0, characteristic.0));
        let value = self.value(characteristic.0);
        callback(value.ok_or_else(|| Error::radio("read failed")));
    }

    fn write_characteristic(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        value: Vec<u8>,
        callback: Callback<()>,
    ) {
        self.record(format!("write_characteristic {} {}", device.0, characteristic.0));
        self.set_value(characteristic.0, &value);
        callback(Ok(()));
    }

    fn write_characteristic_without_response(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        value: Vec<u8>,
        callback: Callback<()>,
    ) {
        self.record(format!(
            "write_characteristic_without_response {} {}",
            device.0, characteristic.0
        ));
        self.set_value(characteristic.0, &value);
        callback(Ok(()));
    }

    fn enable_notification(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        options: NotificationOptions,
        listener: Listener<Vec<u8>>,
    ) {
        self.record(format!(
            "enable_notification {} {} {}",
            device.0, characteristic.0, options.write_config_descriptor
        ));
        self.state
            .borrow_mut()
            .notifications
            .insert(characteristic.0, listener);
    }

    fn disable_notification(
        &self,
        device: DeviceHandle,
        characteristic: AttributeHandle,
        options: NotificationOptions,
        callback: Callback<()>,
    ) {
        self.record(format!(
            "disable_notification {} {} {}",
            device.0, characteristic.0, options.write_config_descriptor
        ));
        self.state.borrow_mut().notifications.remove(&characteristic.0);
        callback(Ok(()));
    }

    fn read_descriptor(&self, device: DeviceHandle, descriptor: AttributeHandle, callback: Callback<Vec<u8>>) {
        self.record(format!("read_descriptor {} {}", device.0, descriptor.0));
        let value = self.value(descriptor.0);
        callback(value.ok_or_else(|| Error::radio("read failed")));
    }

    fn write_descriptor(
        &self,
        device: DeviceHandle,
        descriptor: AttributeHandle,
        value: Vec<u8>,
        callback: Callback<()>,
    ) {
        self.record(format!("write_descriptor {} {}", device.0, descriptor.0));
        self.set_value(descriptor.0, &value);
        callback(Ok(()));
    }

    fn reset(&self, callback: Callback<()>) {
        self.record("reset".to_string());
        callback(Ok(()));
    }

    fn start_advertise(&self, settings: AdvertiseSettings, callback: Callback<()>) {
        self.record("start_advertise".to_string());
        let error = self.state.borrow_mut().advertise_error.take();
        match error {
            Some(message) => callback(Err(Error::radio(message))),
            None => {
                self.state.borrow_mut().advertised = Some(settings);
                callback(Ok(()));
            }
        }
    }

    fn stop_advertise(&self, callback: Callback<()>) {
        self.record("stop_advertise".to_string());
        self.state.borrow_mut().advertised = None;
        callback(Ok(()));
    }
}

pub const CUSTOM_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

fn characteristic(handle: u64, uuid: Uuid, bits: u32) -> RemoteCharacteristic {
    RemoteCharacteristic {
        handle: AttributeHandle(handle),
        uuid,
        properties: CharacteristicProperties::from_bits(bits),
    }
}

fn descriptor(handle: u64, uuid: Uuid) -> RemoteDescriptor {
    RemoteDescriptor {
        handle: AttributeHandle(handle),
        uuid,
    }
}

/// Three services, four characteristics and three descriptors. The battery level characteristic UUID appears in
/// both the battery service and the custom service.
///
/// | handle | attribute |
/// |---|---|
/// | 1 | battery service |
/// | 2 | battery level (read, notify) |
/// | 3 | battery level CCCD |
/// | 4 | device information service |
/// | 5 | manufacturer name (read) |
/// | 6 | custom service |
/// | 7 | battery level (read, write) |
/// | 8 | user description |
/// | 9 | device name (write without response) |
/// | 10 | device name CCCD |
pub fn gatt_table() -> GattTable {
    let mut table = GattTable {
        services: vec![
            RemoteService {
                handle: AttributeHandle(1),
                uuid: services::BATTERY,
            },
            RemoteService {
                handle: AttributeHandle(4),
                uuid: services::DEVICE_INFORMATION,
            },
            RemoteService {
                handle: AttributeHandle(6),
                uuid: CUSTOM_SERVICE,
            },
        ],
        ..Default::default()
    };
    table
        .characteristics
        .insert(1, vec![characteristic(2, characteristics::BATTERY_LEVEL, 0x12)]);
    table
        .characteristics
        .insert(4, vec![characteristic(5, characteristics::MANUFACTURER_NAME_STRING, 0x02)]);
    table.characteristics.insert(
        6,
        vec![
            characteristic(7, characteristics::BATTERY_LEVEL, 0x0a),
            characteristic(9, characteristics::DEVICE_NAME, 0x04),
        ],
    );
    table
        .descriptors
        .insert(2, vec![descriptor(3, descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION)]);
    table
        .descriptors
        .insert(7, vec![descriptor(8, descriptors::CHARACTERISTIC_USER_DESCRIPTION)]);
    table
        .descriptors
        .insert(9, vec![descriptor(10, descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION)]);
    table
}

/// Records every result a callback receives.
pub fn recorder<T: 'static>() -> (Rc<RefCell<Vec<Result<T>>>>, impl FnMut(Result<T>) + 'static) {
    let results = Rc::new(RefCell::new(Vec::new()));
    let sink = results.clone();
    (results, move |result: Result<T>| sink.borrow_mut().push(result))
}

/// Connects `address` as connection `handle`, returning the connection listener's results.
pub fn connect(
    radio: &MockRadio,
    manager: &GattSessionManager<MockRadio>,
    address: &str,
    handle: u64,
) -> Rc<RefCell<Vec<Result<DeviceId>>>> {
    let (events, listener) = recorder::<DeviceId>();
    manager.connect(&DeviceId::from(address), listener);
    radio.connected(address, handle);
    events
}

pub fn eddystone_service_data(frame: &[u8]) -> Vec<u8> {
    let mut record = vec![0x03, 0x03, 0xaa, 0xfe];
    record.push(frame.len() as u8 + 3);
    record.push(0x16);
    record.extend_from_slice(&[0xaa, 0xfe]);
    record.extend_from_slice(frame);
    record
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn short_uuid(uuid: u16) -> Uuid {
    Uuid::from_u16(uuid)
}
