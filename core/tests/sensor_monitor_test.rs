use ilcbus_core::ilc::sensor::SensorMonitorIlc;
use ilcbus_core::modbus::ModbusError;

mod common;

#[test]
fn test_sensor_values_decoded() {
    let responder = common::new_responder();
    let mut ilc = SensorMonitorIlc::new(1, responder.clone());

    ilc.report_sensor_values(42);
    assert_eq!(ilc.requests()[0].function, 84);

    let mut payload = vec![42, 84];
    for value in [1.5f32, -2.25, 100.0] {
        payload.extend(value.to_bits().to_be_bytes());
    }
    ilc.parse(&common::reply(&payload)).unwrap();

    assert_eq!(
        responder.lock().unwrap().sensors,
        Some((42, vec![1.5, -2.25, 100.0]))
    );
}

#[test]
fn test_single_sensor() {
    let responder = common::new_responder();
    let mut ilc = SensorMonitorIlc::new(1, responder.clone());

    ilc.report_sensor_values(42);
    let mut payload = vec![42, 84];
    payload.extend(7.5f32.to_bits().to_be_bytes());
    ilc.parse(&common::reply(&payload)).unwrap();

    assert_eq!(responder.lock().unwrap().sensors, Some((42, vec![7.5])));
}

#[test]
fn test_length_must_be_multiple_of_four() {
    let responder = common::new_responder();
    let mut ilc = SensorMonitorIlc::new(1, responder.clone());

    ilc.report_sensor_values(42);
    // three extra bytes - frame length 4*x + 3
    let mut payload = vec![42, 84];
    payload.extend(7.5f32.to_bits().to_be_bytes());
    payload.extend([1, 2, 3]);
    assert!(matches!(
        ilc.parse(&common::reply(&payload)),
        Err(ModbusError::InvalidLength {
            received: 11,
            expected: "a multiple of 4"
        })
    ));
    assert!(responder.lock().unwrap().sensors.is_none());
}

#[test]
fn test_common_functions_still_available() {
    let responder = common::new_responder();
    let mut ilc = SensorMonitorIlc::new(1, responder.clone());

    ilc.report_server_status(42);
    let mut payload = vec![42, 18, 2];
    payload.extend(0u16.to_be_bytes());
    payload.extend(0u16.to_be_bytes());
    ilc.parse(&common::reply(&payload)).unwrap();

    assert_eq!(responder.lock().unwrap().status, Some((42, 2, 0, 0)));
    assert_eq!(ilc.last_mode(42).unwrap(), 2);
}
