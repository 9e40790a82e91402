mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{eddystone_service_data, init_tracing, MockRadio};
use eddystone_ble::btuuid::services;
use eddystone_ble::eddystone::Temperature;
use eddystone_ble::error::{ErrorKind, FrameError};
use eddystone_ble::radio::RawAdvertisement;
use eddystone_ble::{codec, Device, DeviceId, EddystoneScanner, Error, Result, ScanController, ScanOptions};

type Reports = Rc<RefCell<Vec<Result<Device>>>>;

fn device_recorder() -> (Reports, impl FnMut(Result<&Device>) + 'static) {
    let reports: Reports = Rc::new(RefCell::new(Vec::new()));
    let sink = reports.clone();
    (reports, move |result: Result<&Device>| {
        sink.borrow_mut().push(result.map(Device::clone))
    })
}

fn addresses(reports: &Reports) -> Vec<String> {
    reports
        .borrow()
        .iter()
        .map(|r| r.as_ref().map(|d| d.address().to_string()).unwrap_or_default())
        .collect()
}

const NAMESPACE: [u8; 10] = [0xed, 0xd1, 0xeb, 0xea, 0xc0, 0x4e, 0x5d, 0xef, 0xa0, 0x17];
const INSTANCE: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

fn uid_record() -> Vec<u8> {
    let mut frame = vec![0x00, 0xe6];
    frame.extend_from_slice(&NAMESPACE);
    frame.extend_from_slice(&INSTANCE);
    eddystone_service_data(&frame)
}

fn tlm_record() -> Vec<u8> {
    eddystone_service_data(&[
        0x20, 0x00, 0x0b, 0xb8, 0x19, 0x80, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x0a,
    ])
}

#[test]
fn reports_devices_until_restarted() {
    init_tracing();
    let radio = MockRadio::new();
    let scan = ScanController::new(radio.clone());
    let (reports, on_device) = device_recorder();

    scan.start_scan(ScanOptions::default(), on_device).unwrap();
    assert!(scan.is_scanning());
    radio.sight("AA", -60, RawAdvertisement::None);
    radio.sight("BB", -70, RawAdvertisement::None);
    radio.sight("AA", -50, RawAdvertisement::None);
    assert_eq!(addresses(&reports), ["AA", "BB", "AA"]);
    assert_eq!(scan.devices().len(), 2);
    assert_eq!(scan.device(&DeviceId::new("AA")).unwrap().rssi(), Some(-50));

    let (_, again) = device_recorder();
    let err = scan.start_scan(ScanOptions::default(), again).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyScanning);
    assert_eq!(scan.devices().len(), 2);

    scan.stop_scan();
    assert!(!scan.is_scanning());
    let (_, restarted) = device_recorder();
    scan.start_scan(ScanOptions::default(), restarted).unwrap();
    assert!(scan.devices().is_empty());
    assert_eq!(radio.log(), ["start_scan []", "stop_scan", "start_scan []"]);
}

#[test]
fn sightings_after_stop_are_dropped() {
    let radio = MockRadio::new();
    let scan = ScanController::new(radio.clone());
    let (reports, on_device) = device_recorder();

    scan.start_scan(ScanOptions::default(), on_device).unwrap();
    radio.sight("AA", -60, RawAdvertisement::None);
    scan.stop_scan();
    radio.sight("BB", -60, RawAdvertisement::None);

    assert_eq!(addresses(&reports), ["AA"]);
    assert!(scan.device(&DeviceId::new("BB")).is_none());
}

#[test]
fn duplicate_policy() {
    let radio = MockRadio::new();
    let scan = ScanController::new(radio.clone());
    let (reports, on_device) = device_recorder();
    let options = ScanOptions {
        allow_duplicates: false,
        ..Default::default()
    };

    scan.start_scan(options, on_device).unwrap();
    radio.sight("AA", -60, RawAdvertisement::None);
    radio.sight("AA", -40, RawAdvertisement::None);
    assert_eq!(addresses(&reports), ["AA"]);
    assert_eq!(scan.device(&DeviceId::new("AA")).unwrap().rssi(), Some(-60));
    scan.stop_scan();

    let (reports, on_device) = device_recorder();
    scan.report_device_once(true);
    scan.start_scan(ScanOptions::default(), on_device).unwrap();
    radio.sight("AA", -60, RawAdvertisement::None);
    radio.sight("AA", -40, RawAdvertisement::None);
    assert_eq!(addresses(&reports), ["AA"]);
}

#[test]
fn service_filter_uses_parsed_advertisements() {
    let radio = MockRadio::new();
    let scan = ScanController::new(radio.clone());
    let (reports, on_device) = device_recorder();

    scan.filter_devices_by_service(&[services::EDDYSTONE]);
    scan.start_scan(ScanOptions::default(), on_device).unwrap();
    radio.sight("AA", -60, RawAdvertisement::None);
    radio.sight(
        "BB",
        -60,
        RawAdvertisement::Base64ScanRecord(codec::base64_encode(&uid_record())),
    );
    assert_eq!(addresses(&reports), ["BB"]);

    let device = scan.device(&DeviceId::new("BB")).unwrap();
    assert_eq!(device.scan_record(), Some(&uid_record()[..]));
    assert_eq!(device.adv_data().unwrap().services, [services::EDDYSTONE]);
}

#[test]
fn scan_errors_do_not_stop_the_scan() {
    let radio = MockRadio::new();
    let scan = ScanController::new(radio.clone());
    let (reports, on_device) = device_recorder();

    scan.start_scan(ScanOptions::default(), on_device).unwrap();
    radio.deliver_sighting(Err(Error::radio("scan failed")));
    radio.sight("AA", -60, RawAdvertisement::None);

    let reports = reports.borrow();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].as_ref().unwrap_err().message(), "scan failed");
    assert!(reports[1].is_ok());
    assert!(scan.is_scanning());
}

#[test]
fn beacon_frames_accumulate() {
    init_tracing();
    let radio = MockRadio::new();
    let scanner = EddystoneScanner::new(radio.clone());
    let (reports, on_beacon) = device_recorder();

    scanner.start_scan(on_beacon).unwrap();
    assert!(radio.log()[0].contains("0000feaa-0000-1000-8000-00805f9b34fb"));

    radio.sight("AA", -70, RawAdvertisement::ScanRecord(uid_record()));
    radio.sight("AA", -72, RawAdvertisement::ScanRecord(tlm_record()));

    let reports = reports.borrow();
    assert_eq!(reports.len(), 2);
    let first = reports[0].as_ref().unwrap();
    assert_eq!(first.beacon().nid_hex().as_deref(), Some("EDD1EBEAC04E5DEFA017"));
    assert_eq!(first.beacon().voltage, None);

    let beacon = reports[1].as_ref().unwrap().beacon();
    assert_eq!(beacon.tx_power, Some(-26));
    assert_eq!(beacon.uid().as_deref(), Some("EDD1EBEAC04E5DEFA017010203040506"));
    assert_eq!(beacon.voltage, Some(3000));
    assert_eq!(beacon.temperature, Some(Temperature::Celsius(25.5)));
    assert_eq!(beacon.adv_cnt, Some(256));
    assert_eq!(beacon.dsec_cnt, Some(10));
    assert!(reports[1].as_ref().unwrap().distance().is_some());

    let stored = scanner.controller().device(&DeviceId::new("AA")).unwrap();
    assert_eq!(stored.beacon(), beacon);
}

#[test]
fn truncated_repeat_does_not_report_the_previous_frame() {
    let radio = MockRadio::new();
    let scanner = EddystoneScanner::new(radio.clone());
    let (reports, on_beacon) = device_recorder();

    scanner.start_scan(on_beacon).unwrap();
    radio.sight("AA", -70, RawAdvertisement::ScanRecord(uid_record()));
    radio.sight("AA", -71, RawAdvertisement::ScanRecord(vec![0x09, 0x09, b'x']));

    assert_eq!(reports.borrow().len(), 1);
    let stored = scanner.controller().device(&DeviceId::new("AA")).unwrap();
    assert!(stored.adv_data().is_none());
    assert_eq!(stored.rssi(), Some(-71));
    assert!(stored.beacon().uid().is_some());
}

#[test]
fn invalid_frames_are_reported_and_foreign_data_ignored() {
    let radio = MockRadio::new();
    let scanner = EddystoneScanner::new(radio.clone());
    let (reports, on_beacon) = device_recorder();

    scanner.start_scan(on_beacon).unwrap();
    radio.sight("AA", -70, RawAdvertisement::None);
    radio.sight(
        "BB",
        -70,
        RawAdvertisement::ScanRecord(eddystone_service_data(&[0x40, 0x00, 0x00])),
    );
    radio.sight(
        "CC",
        -70,
        RawAdvertisement::ScanRecord(eddystone_service_data(&[0x10, 0xeb, 0x09, b'a'])),
    );

    let reports = reports.borrow();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].as_ref().unwrap_err().kind(),
        ErrorKind::Frame(FrameError::InvalidScheme(9))
    );
    assert!(scanner.controller().device(&DeviceId::new("CC")).unwrap().beacon().is_empty());
}

#[test]
fn stopping_the_beacon_scan() {
    let radio = MockRadio::new();
    let scanner = EddystoneScanner::new(radio.clone());
    let (reports, on_beacon) = device_recorder();

    scanner.start_scan(on_beacon).unwrap();
    scanner.stop_scan();
    radio.sight("AA", -70, RawAdvertisement::ScanRecord(uid_record()));
    assert!(reports.borrow().is_empty());
    assert!(!scanner.controller().is_scanning());
}
