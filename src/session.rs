//! GATT client sessions.
//!
//! [`GattSessionManager`] owns one [`GattSession`] per device it has connected. A session walks
//! `Disconnected → Connecting → Connected → Enumerating → Ready`, returning to `Disconnected` when the driver reports
//! a disconnect or error, or when the caller closes it.
//!
//! Service discovery fans out one characteristic request per service and then one descriptor request per
//! characteristic, and reports a single result when the last of them completes. Discovered attributes are indexed two
//! ways:
//!
//! - by service and characteristic UUID (and descriptor UUID), which is unambiguous. The plain methods such as
//!   [`read_characteristic`][GattSessionManager::read_characteristic] use this index.
//! - by characteristic UUID alone (and descriptor UUID), used by the `_by_uuid` methods. When a device reuses a
//!   characteristic UUID in several services the first one discovered wins, so prefer the service-qualified methods.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::device::DeviceId;
use crate::error::ErrorKind;
use crate::future::Completion;
use crate::join::Join;
use crate::radio::{
    AttributeHandle, Callback, ConnectInfo, ConnectionState, DeviceHandle, Listener, NotificationOptions, Radio,
    RemoteCharacteristic, RemoteDescriptor, RemoteService,
};
use crate::{CharacteristicProperties, Error, Result};

/// The lifecycle state of a [`GattSession`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[allow(missing_docs)]
    #[default]
    Disconnected,
    /// Waiting for the driver to report the connection
    Connecting,
    /// Connected, services not yet discovered
    Connected,
    /// Service discovery in progress
    Enumerating,
    /// Connected with services discovered
    Ready,
}

impl SessionState {
    /// Returns `true` if the device is connected, whether or not its services have been discovered.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Enumerating | SessionState::Ready
        )
    }
}

/// Which services to enumerate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServiceSelection {
    /// Every service the device reports
    #[default]
    All,
    /// Only these services. Discovery fails with [`ErrorKind::ServiceNotFound`] if the device lacks any of them.
    Only(Vec<Uuid>),
}

/// A discovered service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    service: RemoteService,
    characteristics: Vec<CharacteristicRecord>,
}

impl ServiceRecord {
    #[allow(missing_docs)]
    pub fn uuid(&self) -> Uuid {
        self.service.uuid
    }

    #[allow(missing_docs)]
    pub fn handle(&self) -> AttributeHandle {
        self.service.handle
    }

    /// The characteristics discovered so far, in the order the driver reported them
    pub fn characteristics(&self) -> &[CharacteristicRecord] {
        &self.characteristics
    }
}

/// A discovered characteristic and its descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    characteristic: RemoteCharacteristic,
    descriptors: Vec<RemoteDescriptor>,
}

impl CharacteristicRecord {
    #[allow(missing_docs)]
    pub fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    #[allow(missing_docs)]
    pub fn handle(&self) -> AttributeHandle {
        self.characteristic.handle
    }

    #[allow(missing_docs)]
    pub fn properties(&self) -> CharacteristicProperties {
        self.characteristic.properties
    }

    #[allow(missing_docs)]
    pub fn descriptors(&self) -> &[RemoteDescriptor] {
        &self.descriptors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AttributeKey {
    Characteristic(Uuid),
    Descriptor(Uuid, Uuid),
    ServiceCharacteristic(Uuid, Uuid),
    ServiceDescriptor(Uuid, Uuid, Uuid),
}

impl AttributeKey {
    fn is_service_qualified(&self) -> bool {
        matches!(
            self,
            AttributeKey::ServiceCharacteristic(..) | AttributeKey::ServiceDescriptor(..)
        )
    }

    fn not_found(&self) -> Error {
        let kind = match self {
            AttributeKey::Characteristic(_) | AttributeKey::ServiceCharacteristic(..) => {
                ErrorKind::CharacteristicNotFound
            }
            AttributeKey::Descriptor(..) | AttributeKey::ServiceDescriptor(..) => ErrorKind::DescriptorNotFound,
        };
        Error::new(kind, None, self.to_string())
    }
}

impl std::fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeKey::Characteristic(c) => write!(f, "{c}"),
            AttributeKey::Descriptor(c, d) => write!(f, "{c}:{d}"),
            AttributeKey::ServiceCharacteristic(s, c) => write!(f, "{s}:{c}"),
            AttributeKey::ServiceDescriptor(s, c, d) => write!(f, "{s}:{c}:{d}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PendingOp {
    Characteristics(AttributeHandle),
    Descriptors(AttributeHandle),
}

struct Enumeration {
    pass: u64,
    join: Join<PendingOp>,
    callback: Callback<()>,
}

/// Callers left waiting on a session that just disconnected.
struct Teardown {
    discovery: Option<Callback<()>>,
    listener: Option<Listener<DeviceId>>,
}

impl Teardown {
    /// Fails the discovery in progress with [`ErrorKind::Disconnected`] and the connect listener with `err`.
    fn notify(self, err: Error) {
        if let Some(callback) = self.discovery {
            callback(Err(ErrorKind::Disconnected.into()));
        }
        if let Some(mut listener) = self.listener {
            listener(Err(err));
        }
    }
}

/// The connection state and discovered attributes of one device.
#[derive(Default)]
pub struct GattSession {
    state: SessionState,
    device: Option<DeviceHandle>,
    connection: u64,
    listener: Option<Listener<DeviceId>>,
    services: Vec<ServiceRecord>,
    services_by_uuid: HashMap<Uuid, AttributeHandle>,
    by_uuid: HashMap<AttributeKey, AttributeHandle>,
    by_service: HashMap<AttributeKey, AttributeHandle>,
    enumeration: Option<Enumeration>,
}

impl std::fmt::Debug for GattSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattSession")
            .field("state", &self.state)
            .field("device", &self.device)
            .field("services", &self.services.len())
            .finish()
    }
}

impl GattSession {
    #[allow(missing_docs)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The driver's handle for the connection, while connected
    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.device
    }

    /// Discovered services in the order the driver reported them
    pub fn services(&self) -> &[ServiceRecord] {
        &self.services
    }

    /// Looks up a discovered service. If the device reports the same service UUID more than once, the first wins.
    pub fn service(&self, uuid: Uuid) -> Option<&ServiceRecord> {
        let handle = self.services_by_uuid.get(&uuid)?;
        self.services.iter().find(|s| s.handle() == *handle)
    }

    fn clear_attributes(&mut self) {
        self.services.clear();
        self.services_by_uuid.clear();
        self.by_uuid.clear();
        self.by_service.clear();
    }

    fn lookup(&self, key: AttributeKey) -> Result<(DeviceHandle, AttributeHandle)> {
        let device = self.device.ok_or(ErrorKind::NotConnected)?;
        let index = if key.is_service_qualified() {
            &self.by_service
        } else {
            &self.by_uuid
        };
        let attribute = index.get(&key).ok_or_else(|| key.not_found())?;
        Ok((device, *attribute))
    }

    /// Marks the session disconnected and hands back whoever is still waiting on it.
    fn disconnect(&mut self) -> Teardown {
        self.state = SessionState::Disconnected;
        self.device = None;
        self.connection = 0;
        Teardown {
            discovery: self.enumeration.take().map(|e| e.callback),
            listener: self.listener.take(),
        }
    }

    fn is_pass(&self, pass: u64) -> bool {
        self.enumeration.as_ref().is_some_and(|e| e.pass == pass)
    }

    /// Ends the discovery pass successfully if nothing is outstanding.
    fn finish_if_done(&mut self) -> Option<Callback<()>> {
        if self.enumeration.as_ref().is_some_and(|e| e.join.is_empty()) {
            self.state = SessionState::Ready;
            self.enumeration.take().map(|e| e.callback)
        } else {
            None
        }
    }

    fn index_characteristic(&mut self, service: Uuid, characteristic: &RemoteCharacteristic) {
        self.by_uuid
            .entry(AttributeKey::Characteristic(characteristic.uuid))
            .or_insert(characteristic.handle);
        self.by_service
            .entry(AttributeKey::ServiceCharacteristic(service, characteristic.uuid))
            .or_insert(characteristic.handle);
    }

    fn index_descriptor(&mut self, service: Uuid, characteristic: Uuid, descriptor: &RemoteDescriptor) {
        self.by_uuid
            .entry(AttributeKey::Descriptor(characteristic, descriptor.uuid))
            .or_insert(descriptor.handle);
        self.by_service
            .entry(AttributeKey::ServiceDescriptor(service, characteristic, descriptor.uuid))
            .or_insert(descriptor.handle);
    }

    fn characteristic_mut(&mut self, handle: AttributeHandle) -> Option<&mut CharacteristicRecord> {
        self.services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.handle() == handle)
    }
}

#[derive(Default)]
struct Sessions {
    sessions: HashMap<DeviceId, GattSession>,
    next_id: u64,
}

impl Sessions {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Connects to devices and performs GATT operations on them through a [`Radio`].
///
/// The manager is a cheap handle; clones share the same sessions. Callbacks are never invoked while the manager's
/// state is borrowed, so they may call back into the manager.
pub struct GattSessionManager<R> {
    radio: Rc<R>,
    inner: Rc<RefCell<Sessions>>,
}

impl<R> Clone for GattSessionManager<R> {
    fn clone(&self) -> Self {
        GattSessionManager {
            radio: self.radio.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<R> std::fmt::Debug for GattSessionManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattSessionManager")
            .field("sessions", &self.inner.borrow().sessions)
            .finish()
    }
}

impl<R: Radio + 'static> GattSessionManager<R> {
    /// Creates a manager with no sessions.
    pub fn new(radio: Rc<R>) -> Self {
        GattSessionManager {
            radio,
            inner: Rc::new(RefCell::new(Sessions::default())),
        }
    }

    /// The radio driver
    pub fn radio(&self) -> &Rc<R> {
        &self.radio
    }

    /// The state of the session with a device
    pub fn state(&self, id: &DeviceId) -> SessionState {
        self.inner
            .borrow()
            .sessions
            .get(id)
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Returns `true` if the device is connected.
    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.state(id).is_connected()
    }

    /// Calls `f` with the session for a device, if there is one.
    pub fn with_session<T>(&self, id: &DeviceId, f: impl FnOnce(&GattSession) -> T) -> Option<T> {
        self.inner.borrow().sessions.get(id).map(f)
    }

    /// A copy of the services discovered on a device
    pub fn services(&self, id: &DeviceId) -> Vec<ServiceRecord> {
        self.with_session(id, |s| s.services.clone()).unwrap_or_default()
    }

    /// Connects to a device.
    ///
    /// `listener` receives `Ok` when the connection is established. If the connection later drops, or the driver
    /// reports an error, it receives an error and the session returns to [`SessionState::Disconnected`]. Closing the
    /// session, even before the connection is established, also reports [`ErrorKind::Disconnected`]. Fails with
    /// [`ErrorKind::AlreadyConnected`] unless the device is disconnected.
    pub fn connect(&self, id: &DeviceId, listener: impl FnMut(Result<DeviceId>) + 'static) {
        let mut listener: Listener<DeviceId> = Box::new(listener);
        let connection = {
            let mut inner = self.inner.borrow_mut();
            let connection = inner.next_id();
            let session = inner.sessions.entry(id.clone()).or_default();
            if session.state != SessionState::Disconnected {
                drop(inner);
                return listener(Err(ErrorKind::AlreadyConnected.into()));
            }
            session.state = SessionState::Connecting;
            session.connection = connection;
            session.listener = Some(listener);
            connection
        };

        debug!("connecting to {}", id);
        let this = self.clone();
        let address = id.address().to_string();
        let id = id.clone();
        self.radio.connect(
            &address,
            Box::new(move |event| this.on_connection_event(&id, connection, event)),
        );
    }

    /// Connects to a device, resolving when the connection is established or fails.
    pub async fn connect_async(&self, id: &DeviceId) -> Result<DeviceId> {
        let (listener, completion) = Completion::first_event();
        self.connect(id, listener);
        completion.await
    }

    fn on_connection_event(&self, id: &DeviceId, connection: u64, event: Result<ConnectInfo>) {
        let mut inner = self.inner.borrow_mut();
        let Some(session) = inner.sessions.get_mut(id).filter(|s| s.connection == connection) else {
            drop(inner);
            match event {
                Ok(ConnectInfo {
                    device,
                    state: ConnectionState::Connected,
                }) => {
                    debug!("closing connection {:?} to {} opened after the session ended", device, id);
                    self.radio.close(device);
                }
                event => trace!("ignoring event for stale connection to {}: {:?}", id, event),
            }
            return;
        };

        match event {
            Ok(ConnectInfo {
                device,
                state: ConnectionState::Connected,
            }) => {
                session.clear_attributes();
                session.device = Some(device);
                session.state = SessionState::Connected;
                let listener = session.listener.take();
                drop(inner);
                info!("connected to {}", id);
                if let Some(mut listener) = listener {
                    listener(Ok(id.clone()));
                    self.restore_listener(id, connection, listener);
                }
            }
            Ok(ConnectInfo {
                state: ConnectionState::Disconnected,
                ..
            }) => {
                let teardown = session.disconnect();
                drop(inner);
                info!("disconnected from {}", id);
                teardown.notify(ErrorKind::Disconnected.into());
            }
            Ok(info) => trace!("{} is {:?}", id, info.state),
            Err(err) => {
                let teardown = session.disconnect();
                drop(inner);
                warn!("connection to {} failed: {}", id, err);
                teardown.notify(err);
            }
        }
    }

    /// Puts the connect listener back after calling it, unless the session ended meanwhile.
    fn restore_listener(&self, id: &DeviceId, connection: u64, listener: Listener<DeviceId>) {
        let mut inner = self.inner.borrow_mut();
        if let Some(session) = inner
            .sessions
            .get_mut(id)
            .filter(|s| s.connection == connection && s.listener.is_none())
        {
            session.listener = Some(listener);
        }
    }

    /// Closes the connection to a device.
    ///
    /// A discovery in progress and the connect listener fail with [`ErrorKind::Disconnected`]. A connection the driver
    /// opens after a pending connect was closed is closed again. Does nothing if the device is disconnected.
    pub fn close(&self, id: &DeviceId) {
        let (device, teardown) = {
            let mut inner = self.inner.borrow_mut();
            let Some(session) = inner.sessions.get_mut(id) else {
                return;
            };
            if session.state == SessionState::Disconnected {
                return;
            }
            let device = session.device;
            (device, session.disconnect())
        };

        debug!("closing connection to {}", id);
        if let Some(device) = device {
            self.radio.close(device);
        }
        teardown.notify(ErrorKind::Disconnected.into());
    }

    /// Closes every open connection.
    pub fn close_connected_devices(&self) {
        let ids: Vec<DeviceId> = self
            .inner
            .borrow()
            .sessions
            .iter()
            .filter(|(_, s)| s.state != SessionState::Disconnected)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.close(&id);
        }
    }

    /// Resets the platform BLE stack.
    ///
    /// Every session is marked disconnected first, failing any discovery in progress and any connect listener.
    pub fn reset(&self, callback: impl FnOnce(Result<()>) + 'static) {
        let teardowns: Vec<Teardown> = self
            .inner
            .borrow_mut()
            .sessions
            .values_mut()
            .filter(|s| s.state != SessionState::Disconnected)
            .map(GattSession::disconnect)
            .collect();
        for teardown in teardowns {
            teardown.notify(ErrorKind::Disconnected.into());
        }
        info!("resetting radio");
        self.radio.reset(Box::new(callback));
    }

    /// Reads the signal strength of a connected device.
    pub fn read_rssi(&self, id: &DeviceId, callback: impl FnOnce(Result<i16>) + 'static) {
        let device = self.with_session(id, |s| s.device).flatten();
        match device {
            Some(device) => self.radio.rssi(device, Box::new(callback)),
            None => callback(Err(ErrorKind::NotConnected.into())),
        }
    }

    /// Reads the signal strength of a connected device.
    pub async fn read_rssi_async(&self, id: &DeviceId) -> Result<i16> {
        let (callback, completion) = Completion::new();
        self.read_rssi(id, callback);
        completion.await
    }

    /// Discovers the services of a connected device, with their characteristics and descriptors.
    ///
    /// `callback` is invoked once: with `Ok` after every requested service, characteristic, and descriptor list has
    /// arrived, or with the first error. Attributes indexed before a failure remain available. Fails with
    /// [`ErrorKind::NotConnected`] if the device is not connected and with [`ErrorKind::NotReady`] if a discovery is
    /// already in progress.
    pub fn discover_services(
        &self,
        id: &DeviceId,
        selection: ServiceSelection,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let (device, pass) = {
            let mut inner = self.inner.borrow_mut();
            let pass = inner.next_id();
            let ready = match inner.sessions.get_mut(id) {
                Some(session) if session.state == SessionState::Enumerating => Err(ErrorKind::NotReady),
                Some(session) => match session.device {
                    Some(device) => Ok((session, device)),
                    None => Err(ErrorKind::NotConnected),
                },
                None => Err(ErrorKind::NotConnected),
            };
            match ready {
                Ok((session, device)) => {
                    session.state = SessionState::Enumerating;
                    session.enumeration = Some(Enumeration {
                        pass,
                        join: Join::new(),
                        callback: Box::new(callback),
                    });
                    (device, pass)
                }
                Err(kind) => {
                    drop(inner);
                    return callback(Err(kind.into()));
                }
            }
        };

        debug!("discovering services of {}", id);
        let this = self.clone();
        let id = id.clone();
        self.radio.services(
            device,
            Box::new(move |result| this.on_services(&id, device, pass, selection, result)),
        );
    }

    /// Discovers the services of a connected device, with their characteristics and descriptors.
    pub async fn discover_services_async(&self, id: &DeviceId, selection: ServiceSelection) -> Result<()> {
        let (callback, completion) = Completion::new();
        self.discover_services(id, selection, callback);
        completion.await
    }

    fn on_services(
        &self,
        id: &DeviceId,
        device: DeviceHandle,
        pass: u64,
        selection: ServiceSelection,
        result: Result<Vec<RemoteService>>,
    ) {
        let services = match result {
            Ok(services) => services,
            Err(err) => return self.fail_pass(id, pass, err),
        };

        let mut inner = self.inner.borrow_mut();
        let Some(session) = inner.sessions.get_mut(id).filter(|s| s.is_pass(pass)) else {
            trace!("ignoring services of {} from an abandoned discovery", id);
            return;
        };

        session.clear_attributes();
        for service in &services {
            session.services.push(ServiceRecord {
                service: *service,
                characteristics: Vec::new(),
            });
            session.services_by_uuid.entry(service.uuid).or_insert(service.handle);
        }

        let mut targets: Vec<RemoteService> = Vec::new();
        match &selection {
            ServiceSelection::All => targets.extend(services.iter().copied()),
            ServiceSelection::Only(uuids) => {
                for uuid in uuids {
                    let Some(handle) = session.services_by_uuid.get(uuid).copied() else {
                        let pending = session.enumeration.take();
                        session.state = SessionState::Connected;
                        drop(inner);
                        if let Some(enumeration) = pending {
                            (enumeration.callback)(Err(Error::new(ErrorKind::ServiceNotFound, None, uuid.to_string())));
                        }
                        return;
                    };
                    if !targets.iter().any(|s| s.handle == handle) {
                        targets.push(RemoteService { handle, uuid: *uuid });
                    }
                }
            }
        }

        if let Some(enumeration) = session.enumeration.as_mut() {
            for service in &targets {
                enumeration.join.add(PendingOp::Characteristics(service.handle));
            }
        }
        let finished = session.finish_if_done();
        drop(inner);

        if let Some(callback) = finished {
            debug!("{} has no services to discover", id);
            return callback(Ok(()));
        }

        for service in targets {
            let this = self.clone();
            let id = id.clone();
            self.radio.characteristics(
                device,
                service.handle,
                Box::new(move |result| this.on_characteristics(&id, device, pass, service, result)),
            );
        }
    }

    fn on_characteristics(
        &self,
        id: &DeviceId,
        device: DeviceHandle,
        pass: u64,
        service: RemoteService,
        result: Result<Vec<RemoteCharacteristic>>,
    ) {
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(err) => return self.fail_pass(id, pass, err),
        };

        let mut inner = self.inner.borrow_mut();
        let Some(session) = inner.sessions.get_mut(id).filter(|s| s.is_pass(pass)) else {
            trace!("ignoring characteristics of {} from an abandoned discovery", id);
            return;
        };

        for characteristic in &characteristics {
            session.index_characteristic(service.uuid, characteristic);
        }
        if let Some(record) = session.services.iter_mut().find(|s| s.handle() == service.handle) {
            record
                .characteristics
                .extend(characteristics.iter().map(|&characteristic| CharacteristicRecord {
                    characteristic,
                    descriptors: Vec::new(),
                }));
        }
        if let Some(enumeration) = session.enumeration.as_mut() {
            for characteristic in &characteristics {
                enumeration.join.add(PendingOp::Descriptors(characteristic.handle));
            }
            enumeration
                .join
                .complete(&PendingOp::Characteristics(service.handle));
        }
        let finished = session.finish_if_done();
        drop(inner);

        if let Some(callback) = finished {
            debug!("discovered services of {}", id);
            return callback(Ok(()));
        }

        for characteristic in characteristics {
            let this = self.clone();
            let id = id.clone();
            self.radio.descriptors(
                device,
                characteristic.handle,
                Box::new(move |result| this.on_descriptors(&id, pass, service.uuid, characteristic, result)),
            );
        }
    }

    fn on_descriptors(
        &self,
        id: &DeviceId,
        pass: u64,
        service: Uuid,
        characteristic: RemoteCharacteristic,
        result: Result<Vec<RemoteDescriptor>>,
    ) {
        let descriptors = match result {
            Ok(descriptors) => descriptors,
            Err(err) => return self.fail_pass(id, pass, err),
        };

        let mut inner = self.inner.borrow_mut();
        let Some(session) = inner.sessions.get_mut(id).filter(|s| s.is_pass(pass)) else {
            trace!("ignoring descriptors of {} from an abandoned discovery", id);
            return;
        };

        for descriptor in &descriptors {
            session.index_descriptor(service, characteristic.uuid, descriptor);
        }
        if let Some(record) = session.characteristic_mut(characteristic.handle) {
            record.descriptors.extend(descriptors);
        }
        if let Some(enumeration) = session.enumeration.as_mut() {
            enumeration
                .join
                .complete(&PendingOp::Descriptors(characteristic.handle));
        }
        let finished = session.finish_if_done();
        drop(inner);

        if let Some(callback) = finished {
            debug!("discovered services of {}", id);
            callback(Ok(()));
        }
    }

    /// Abandons a discovery pass after a failed request. Later results of the same pass are ignored.
    fn fail_pass(&self, id: &DeviceId, pass: u64, err: Error) {
        let pending = {
            let mut inner = self.inner.borrow_mut();
            match inner.sessions.get_mut(id).filter(|s| s.is_pass(pass)) {
                Some(session) => {
                    session.state = SessionState::Connected;
                    session.enumeration.take()
                }
                None => None,
            }
        };
        match pending {
            Some(enumeration) => {
                warn!("service discovery on {} failed: {}", id, err);
                (enumeration.callback)(Err(err));
            }
            None => trace!("ignoring error from an abandoned discovery on {}: {}", id, err),
        }
    }

    fn lookup(&self, id: &DeviceId, key: AttributeKey) -> Result<(DeviceHandle, AttributeHandle)> {
        self.inner
            .borrow()
            .sessions
            .get(id)
            .ok_or(ErrorKind::NotConnected)?
            .lookup(key)
    }

    fn read_attribute(&self, id: &DeviceId, key: AttributeKey, callback: impl FnOnce(Result<Vec<u8>>) + 'static) {
        match self.lookup(id, key) {
            Ok((device, attribute)) => match key {
                AttributeKey::Characteristic(_) | AttributeKey::ServiceCharacteristic(..) => {
                    self.radio.read_characteristic(device, attribute, Box::new(callback))
                }
                AttributeKey::Descriptor(..) | AttributeKey::ServiceDescriptor(..) => {
                    self.radio.read_descriptor(device, attribute, Box::new(callback))
                }
            },
            Err(err) => callback(Err(err)),
        }
    }

    fn write_attribute(
        &self,
        id: &DeviceId,
        key: AttributeKey,
        value: Vec<u8>,
        with_response: bool,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        match self.lookup(id, key) {
            Ok((device, attribute)) => match key {
                AttributeKey::Characteristic(_) | AttributeKey::ServiceCharacteristic(..) if with_response => {
                    self.radio
                        .write_characteristic(device, attribute, value, Box::new(callback))
                }
                AttributeKey::Characteristic(_) | AttributeKey::ServiceCharacteristic(..) => self
                    .radio
                    .write_characteristic_without_response(device, attribute, value, Box::new(callback)),
                AttributeKey::Descriptor(..) | AttributeKey::ServiceDescriptor(..) => {
                    self.radio.write_descriptor(device, attribute, value, Box::new(callback))
                }
            },
            Err(err) => callback(Err(err)),
        }
    }

    fn set_notification(
        &self,
        id: &DeviceId,
        key: AttributeKey,
        options: NotificationOptions,
        enable: Option<Listener<Vec<u8>>>,
        callback: Option<Callback<()>>,
    ) {
        let (device, attribute) = match self.lookup(id, key) {
            Ok(found) => found,
            Err(err) => {
                if let Some(mut listener) = enable {
                    listener(Err(err));
                } else if let Some(callback) = callback {
                    callback(Err(err));
                }
                return;
            }
        };
        match (enable, callback) {
            (Some(listener), _) => self.radio.enable_notification(device, attribute, options, listener),
            (None, Some(callback)) => self.radio.disable_notification(device, attribute, options, callback),
            (None, None) => {}
        }
    }

    /// Reads a characteristic of a discovered service.
    pub fn read_characteristic(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        callback: impl FnOnce(Result<Vec<u8>>) + 'static,
    ) {
        self.read_attribute(id, AttributeKey::ServiceCharacteristic(service, characteristic), callback)
    }

    /// Reads a characteristic by its UUID alone. If several services have it, the first discovered is read.
    pub fn read_characteristic_by_uuid(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        callback: impl FnOnce(Result<Vec<u8>>) + 'static,
    ) {
        self.read_attribute(id, AttributeKey::Characteristic(characteristic), callback)
    }

    /// Reads a characteristic of a discovered service.
    pub async fn read_characteristic_async(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        let (callback, completion) = Completion::new();
        self.read_characteristic(id, service, characteristic, callback);
        completion.await
    }

    /// Writes a characteristic of a discovered service and waits for the device to acknowledge.
    pub fn write_characteristic(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let key = AttributeKey::ServiceCharacteristic(service, characteristic);
        self.write_attribute(id, key, value, true, callback)
    }

    /// Writes a characteristic by its UUID alone. If several services have it, the first discovered is written.
    pub fn write_characteristic_by_uuid(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        self.write_attribute(id, AttributeKey::Characteristic(characteristic), value, true, callback)
    }

    /// Writes a characteristic of a discovered service.
    pub async fn write_characteristic_async(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let (callback, completion) = Completion::new();
        self.write_characteristic(id, service, characteristic, value, callback);
        completion.await
    }

    /// Writes a characteristic of a discovered service without waiting for an acknowledgement.
    pub fn write_characteristic_without_response(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let key = AttributeKey::ServiceCharacteristic(service, characteristic);
        self.write_attribute(id, key, value, false, callback)
    }

    /// Writes a characteristic by its UUID alone without waiting for an acknowledgement.
    pub fn write_characteristic_without_response_by_uuid(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        self.write_attribute(id, AttributeKey::Characteristic(characteristic), value, false, callback)
    }

    /// Enables notifications from a characteristic of a discovered service.
    ///
    /// `listener` receives every notified value until notifications are disabled. A lookup failure is delivered
    /// to the listener as its only event.
    pub fn enable_notification(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        options: NotificationOptions,
        listener: impl FnMut(Result<Vec<u8>>) + 'static,
    ) {
        let key = AttributeKey::ServiceCharacteristic(service, characteristic);
        self.set_notification(id, key, options, Some(Box::new(listener)), None)
    }

    /// Enables notifications from a characteristic found by its UUID alone.
    pub fn enable_notification_by_uuid(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        options: NotificationOptions,
        listener: impl FnMut(Result<Vec<u8>>) + 'static,
    ) {
        let key = AttributeKey::Characteristic(characteristic);
        self.set_notification(id, key, options, Some(Box::new(listener)), None)
    }

    /// Disables notifications from a characteristic of a discovered service.
    pub fn disable_notification(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        options: NotificationOptions,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let key = AttributeKey::ServiceCharacteristic(service, characteristic);
        self.set_notification(id, key, options, None, Some(Box::new(callback)))
    }

    /// Disables notifications from a characteristic found by its UUID alone.
    pub fn disable_notification_by_uuid(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        options: NotificationOptions,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let key = AttributeKey::Characteristic(characteristic);
        self.set_notification(id, key, options, None, Some(Box::new(callback)))
    }

    /// Reads a descriptor of a characteristic of a discovered service.
    pub fn read_descriptor(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        callback: impl FnOnce(Result<Vec<u8>>) + 'static,
    ) {
        let key = AttributeKey::ServiceDescriptor(service, characteristic, descriptor);
        self.read_attribute(id, key, callback)
    }

    /// Reads a descriptor of a characteristic found by its UUID alone.
    pub fn read_descriptor_by_uuid(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        callback: impl FnOnce(Result<Vec<u8>>) + 'static,
    ) {
        self.read_attribute(id, AttributeKey::Descriptor(characteristic, descriptor), callback)
    }

    /// Reads a descriptor of a characteristic of a discovered service.
    pub async fn read_descriptor_async(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Vec<u8>> {
        let (callback, completion) = Completion::new();
        self.read_descriptor(id, service, characteristic, descriptor, callback);
        completion.await
    }

    /// Writes a descriptor of a characteristic of a discovered service.
    pub fn write_descriptor(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let key = AttributeKey::ServiceDescriptor(service, characteristic, descriptor);
        self.write_attribute(id, key, value, true, callback)
    }

    /// Writes a descriptor of a characteristic found by its UUID alone.
    pub fn write_descriptor_by_uuid(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        callback: impl FnOnce(Result<()>) + 'static,
    ) {
        let key = AttributeKey::Descriptor(characteristic, descriptor);
        self.write_attribute(id, key, value, true, callback)
    }

    /// Writes a descriptor of a characteristic of a discovered service.
    pub async fn write_descriptor_async(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    ) -> Result<()> {
        let (callback, completion) = Completion::new();
        self.write_descriptor(id, service, characteristic, descriptor, value, callback);
        completion.await
    }
}
