use ilcbus_core::modbus::{Buffer, ModbusError, Parser};

mod common;

const FRAME: [u8; 21] = [
    0x81, 0x11, 0x10, 0x12, 0x34, 0x56, 0x78, 0x90, 0xAA, 0xFF, 0xBB, 0xCC, 0xDD, 0xEE, 0x11,
    0x53, 0x74, 0x61, 0x72, 0xA7, 0x9F,
];

#[test]
fn test_parse_mixed_frame() {
    let mut parser = Parser::new(FRAME.to_vec()).unwrap();

    assert_eq!(parser.address(), 0x81);
    assert_eq!(parser.func(), 0x11);
    assert_eq!(parser.read_u8().unwrap(), 0x10);
    assert_eq!(parser.read_u16().unwrap(), 0x1234);
    assert_eq!(parser.read_u32().unwrap(), 0x567890AA);
    assert_eq!(parser.read_u64().unwrap(), 0xFFBBCCDDEE115374);
    assert_eq!(parser.read_string(2).unwrap(), "ar");
    parser.check_crc().unwrap();
}

#[test]
fn test_short_frame_rejected() {
    assert!(matches!(
        Parser::new(vec![0x81, 0x11, 0x10]),
        Err(ModbusError::ShortFrame { length: 3 })
    ));
}

#[test]
fn test_read_past_end() {
    let mut parser = Parser::new(vec![0x81, 0x11, 0x10, 0x12, 0x34]).unwrap();

    assert_eq!(parser.read_u8().unwrap(), 0x10);
    assert_eq!(parser.read_u16().unwrap(), 0x1234);
    assert!(matches!(
        parser.read_u8(),
        Err(ModbusError::OutOfRange { .. })
    ));
}

#[test]
fn test_invalid_crc() {
    let mut data = FRAME.to_vec();
    *data.last_mut().unwrap() = 0x9E;

    let mut parser = Parser::new(data).unwrap();
    assert_eq!(parser.read_u8().unwrap(), 0x10);
    assert_eq!(parser.read_u16().unwrap(), 0x1234);
    assert_eq!(parser.read_u32().unwrap(), 0x567890AA);
    assert_eq!(parser.read_u64().unwrap(), 0xFFBBCCDDEE115374);
    assert_eq!(parser.read_string(2).unwrap(), "ar");
    assert!(matches!(
        parser.check_crc(),
        Err(ModbusError::CrcError {
            computed: 0x9FA7,
            received: 0x9EA7
        })
    ));
}

#[test]
fn test_truncated_crc() {
    let mut data = FRAME.to_vec();
    data.pop();

    let mut parser = Parser::new(data).unwrap();
    assert_eq!(parser.read_u8().unwrap(), 0x10);
    assert_eq!(parser.read_u16().unwrap(), 0x1234);
    assert_eq!(parser.read_u32().unwrap(), 0x567890AA);
    assert_eq!(parser.read_u64().unwrap(), 0xFFBBCCDDEE115374);
    assert_eq!(parser.read_string(2).unwrap(), "ar");
    assert!(matches!(
        parser.check_crc(),
        Err(ModbusError::OutOfRange { .. })
    ));
}

#[test]
fn test_trailing_bytes_after_crc() {
    let mut data = common::reply(&[0x11, 0x12, 0x05]);
    data.push(0xFF);

    let mut parser = Parser::new(data).unwrap();
    assert_eq!(parser.read_u8().unwrap(), 0x05);
    assert!(matches!(
        parser.check_crc(),
        Err(ModbusError::LongResponse { extra: 1 })
    ));
}

#[test]
fn test_scalar_round_trips() {
    let mut buffer = Buffer::new();
    buffer.write_u8(0xDE);
    buffer.write_u8(0x11);
    buffer.write_i8(-5);
    buffer.write_i16(-12345);
    buffer.write_i32(-7_654_321);
    for b in &0xABCD12345678u64.to_be_bytes()[2..] {
        buffer.write_u8(*b);
    }
    buffer.write_f32(-273.15);
    buffer.write_crc();

    let mut parser = Parser::new(buffer.into_vec()).unwrap();
    assert_eq!(parser.address(), 0xDE);
    assert_eq!(parser.func(), 0x11);
    assert_eq!(parser.read_i8().unwrap(), -5);
    assert_eq!(parser.read_i16().unwrap(), -12345);
    assert_eq!(parser.read_i32().unwrap(), -7_654_321);
    assert_eq!(parser.read_u48().unwrap(), 0xABCD12345678);
    assert_eq!(parser.read_f32().unwrap(), -273.15);
    parser.check_crc().unwrap();
}

#[test]
fn test_i24_extremes_round_trip() {
    for value in [-0x800000, 0x7FFFFF, -1, 0, 42, -100_000] {
        let mut buffer = Buffer::new();
        buffer.write_u8(1);
        buffer.write_u8(2);
        buffer.write_i24(value);
        buffer.write_crc();

        let mut parser = Parser::new(buffer.into_vec()).unwrap();
        assert_eq!(parser.read_i24().unwrap(), value);
        parser.check_crc().unwrap();
    }
}
