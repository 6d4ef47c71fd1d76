use ilcbus_core::modbus::{Crc, ModbusError};
use ilcbus_core::mpu::{cmd, Mpu, MpuError, MpuTelemetry};

mod common;

#[test]
fn test_read_input_status_program() {
    let mut mpu = Mpu::new(1, 0x11);
    mpu.read_input_status(0x00C4, 0x0016, 108);

    let commands = mpu.command_vector();
    assert_eq!(commands.len(), 17);

    assert_eq!(commands[0], cmd::WRITE);
    assert_eq!(commands[1], 8);
    assert_eq!(
        &commands[2..10],
        &[0x11, 0x02, 0x00, 0xC4, 0x00, 0x16, 0xBA, 0xA9]
    );
    assert_eq!(commands[10], cmd::WAIT_MS);
    assert_eq!(commands[11], 108);
    assert_eq!(commands[12], cmd::READ);
    assert_eq!(commands[13], 8);
    assert_eq!(commands[14], cmd::CHECK_CRC);
    assert_eq!(commands[15], cmd::OUTPUT);
    assert_eq!(commands[16], cmd::EXIT);
    assert!(mpu.contains_read());
}

#[test]
fn test_input_status_bit_unpacking() {
    let mut mpu = Mpu::new(1, 0x11);
    mpu.read_input_status(0x00C4, 0x0016, 108);

    let reply = common::reply(&[0x11, 0x02, 0x03, 0xAC, 0xDB, 0x35]);
    mpu.process_response(&reply).unwrap();
    mpu.check_commanded_empty().unwrap();

    let registers = mpu.registers();

    // not offset by the Modbus 10001 convention
    assert!(registers.input_status(195).is_err());

    // first byte, LSB first
    let expected = [
        false, false, true, true, false, true, false, true, // 0xAC
        true, true, false, true, true, false, true, true, // 0xDB
        true, false, true, false, true, true, // 0x35, 22 bits total
    ];
    for (offset, value) in expected.iter().enumerate() {
        assert_eq!(
            registers.input_status(196 + offset as u16).unwrap(),
            *value,
            "input {}",
            196 + offset
        );
    }

    assert!(matches!(
        registers.input_status(218),
        Err(MpuError::NotRead { address: 218 })
    ));
}

#[test]
fn test_read_holding_registers_program() {
    let mut mpu = Mpu::new(1, 12);
    mpu.read_holding_registers(3, 10, 101);

    let commands = mpu.command_vector();
    assert_eq!(commands.len(), 16);

    assert_eq!(commands[0], cmd::WRITE);
    assert_eq!(commands[1], 8);
    assert_eq!(&commands[2..10], &[12, 3, 0, 3, 0, 10, 0x34, 0xD0]);
    assert_eq!(commands[10], cmd::WAIT_MS);
    assert_eq!(commands[11], 101);
    assert_eq!(commands[12], cmd::READ);
    // device address, function, length, 20 data bytes, CRC
    assert_eq!(commands[13], 25);
    assert_eq!(commands[14], cmd::OUTPUT);
    assert_eq!(commands[15], cmd::EXIT);
}

#[test]
fn test_holding_registers_reply() {
    let mut mpu = Mpu::new(1, 12);
    mpu.read_holding_registers(3, 10, 101);

    let mut payload = vec![12u8, 3, 20];
    payload.extend(1..=20u8);
    let reply = common::reply(&payload);
    assert_eq!(&reply[reply.len() - 2..], &[0xCF, 0xDE]);

    mpu.process_response(&reply).unwrap();
    mpu.check_commanded_empty().unwrap();

    let registers = mpu.registers();
    assert!(matches!(
        registers.register(2),
        Err(MpuError::NotRead { address: 2 })
    ));
    let values = [
        0x0102, 0x0304, 0x0506, 0x0708, 0x090A, 0x0B0C, 0x0D0E, 0x0F10, 0x1112, 0x1314,
    ];
    for (offset, value) in values.iter().enumerate() {
        assert_eq!(registers.register(3 + offset as u16).unwrap(), *value);
    }
    assert!(matches!(
        registers.register(13),
        Err(MpuError::NotRead { address: 13 })
    ));
}

#[test]
fn test_consecutive_reads_elide_exit() {
    let mut mpu = Mpu::new(1, 12);
    mpu.read_holding_registers(3, 10, 101);
    mpu.read_holding_registers(103, 10, 101);

    let commands = mpu.command_vector();
    assert_eq!(commands.len(), 31);

    // one EXIT at the very end only
    assert_eq!(commands[30], cmd::EXIT);
    assert_eq!(
        commands.iter().filter(|b| **b == cmd::EXIT).count(),
        1
    );

    // second request starts right after the first block
    assert_eq!(commands[15], cmd::WRITE);
    assert_eq!(&commands[17..25], &[12, 3, 0, 103, 0, 10, 0x75, 0x0F]);

    // only the first read answered - the second stays commanded
    let mut payload = vec![12u8, 3, 20];
    payload.extend(1..=20u8);
    mpu.process_response(&common::reply(&payload)).unwrap();

    assert!(matches!(
        mpu.check_commanded_empty(),
        Err(MpuError::CommandedNotEmpty { count: 10 })
    ));
    assert!(matches!(
        mpu.registers().register(103),
        Err(MpuError::NotRead { address: 103 })
    ));
}

#[test]
fn test_preset_holding_register() {
    let mut mpu = Mpu::new(1, 9);
    mpu.preset_holding_register(0x0102, 0x0304, 50);

    let commands = mpu.command_vector();
    assert_eq!(&commands[2..8], &[9, 6, 0x01, 0x02, 0x03, 0x04]);
    assert_eq!(commands[commands.len() - 4], 8);

    // correct echo
    mpu.process_response(&common::reply(&[9, 6, 0x01, 0x02, 0x03, 0x04]))
        .unwrap();
    mpu.check_commanded_empty().unwrap();

    // echoed value differs from the commanded one
    mpu.preset_holding_register(0x0102, 0x0304, 50);
    assert!(matches!(
        mpu.process_response(&common::reply(&[9, 6, 0x01, 0x02, 0x03, 0x05])),
        Err(MpuError::PresetMismatch { .. })
    ));
}

#[test]
fn test_preset_holding_registers() {
    let mut mpu = Mpu::new(1, 9);
    mpu.preset_holding_registers(0x0200, &[0xAABB, 0xCCDD, 0xEEFF], 50);

    let commands = mpu.command_vector();
    // frame: address, function, register, count, byte count, 3 values, CRC
    assert_eq!(commands[1], 15);
    assert_eq!(
        &commands[2..13],
        &[9, 16, 0x02, 0x00, 0x00, 0x03, 0x06, 0xAA, 0xBB, 0xCC, 0xDD]
    );

    mpu.process_response(&common::reply(&[9, 16, 0x02, 0x00, 0x00, 0x03]))
        .unwrap();
    mpu.check_commanded_empty().unwrap();
}

#[test]
fn test_reply_from_wrong_address() {
    let mut mpu = Mpu::new(1, 12);
    mpu.read_holding_registers(3, 1, 101);

    let reply = common::reply(&[13, 3, 2, 0x01, 0x02]);
    assert!(matches!(
        mpu.process_response(&reply),
        Err(MpuError::Modbus(ModbusError::WrongResponse {
            address: 13,
            expected_address: 12,
            ..
        }))
    ));
}

#[test]
fn test_error_reply() {
    let mut mpu = Mpu::new(1, 12);
    mpu.read_holding_registers(3, 1, 101);

    let reply = common::reply(&[12, 0x83, 0x02]);
    assert!(matches!(
        mpu.process_response(&reply),
        Err(MpuError::Modbus(ModbusError::ErrorResponse {
            address: 12,
            function: 3,
            exception: 2
        }))
    ));
}

#[test]
fn test_clear_commanded() {
    let mut mpu = Mpu::new(1, 12);
    mpu.read_holding_registers(3, 10, 101);
    mpu.clear_commanded();

    assert!(mpu.command_vector().is_empty());
    assert!(!mpu.contains_read());
    mpu.check_commanded_empty().unwrap();
}

fn telemetry_block() -> [u8; 45] {
    let mut data = [0u8; 45];
    data[0..2].copy_from_slice(&0x0102u16.to_be_bytes());
    data[2..10].copy_from_slice(&1000u64.to_be_bytes());
    data[10..18].copy_from_slice(&900u64.to_be_bytes());
    data[18..26].copy_from_slice(&3u64.to_be_bytes());
    data[26..34].copy_from_slice(&4u64.to_be_bytes());
    data[34..36].copy_from_slice(&0x0017u16.to_be_bytes());
    data[36..38].copy_from_slice(&100u16.to_be_bytes());
    data[38..40].copy_from_slice(&200u16.to_be_bytes());
    data[40] = 1;
    data[41..43].copy_from_slice(&0x00FEu16.to_be_bytes());
    let crc = Crc::from_data(&data[..43]).get();
    data[43..45].copy_from_slice(&crc.to_be_bytes());
    data
}

#[test]
fn test_telemetry_decoding() {
    let telemetry = MpuTelemetry::parse(&telemetry_block()).unwrap();

    assert_eq!(telemetry.instruction_pointer, 0x0102);
    assert_eq!(telemetry.output_counter, 1000);
    assert_eq!(telemetry.input_counter, 900);
    assert_eq!(telemetry.output_timeouts, 3);
    assert_eq!(telemetry.input_timeouts, 4);
    assert_eq!(telemetry.instruction_pointer_on_error, 0x0017);
    assert_eq!(telemetry.write_timeout, 100);
    assert_eq!(telemetry.read_timeout, 200);
    assert_eq!(telemetry.error_status, 1);
    assert_eq!(telemetry.error_code, 0x00FE);
}

#[test]
fn test_telemetry_crc_mismatch() {
    let mut data = telemetry_block();
    data[5] ^= 0x40;
    assert!(matches!(
        MpuTelemetry::parse(&data),
        Err(ModbusError::CrcError { .. })
    ));
}

#[test]
fn test_telemetry_wrong_length() {
    assert!(matches!(
        MpuTelemetry::parse(&[0; 44]),
        Err(ModbusError::InvalidLength { received: 44, .. })
    ));
}
