use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use super::buffer::{Buffer, FrameData};
use super::parser::Parser;
use super::{is_broadcast, ModbusError, ERROR_MASK};

/// Handler invoked with the parsed reply for its registered function.
/// The handler must consume the full payload and finish with
/// [`Parser::check_crc`].
pub type ResponseAction = Box<dyn FnMut(&mut Parser) -> Result<(), ModbusError> + Send>;

/// Optional handler for error-mask replies; receives the device address
/// and the one-byte exception code.
pub type ErrorAction = Box<dyn FnMut(u8, u8) + Send>;

/// A composed request awaiting its reply.
pub struct Request {
    pub buffer: Buffer,
    pub address: u8,
    pub function: u8,
    /// Reply wait / bus silence requirement for this request.
    pub timeout: Duration,
    /// False for broadcast addresses - no reply will ever arrive.
    pub expects_reply: bool,
}

/// Per-device error bookkeeping. A new warning is only worth logging when
/// the `(function, code)` pair changed since the last record, which keeps a
/// stuck device from flooding the log.
#[derive(Debug, Default, Clone)]
pub struct DeviceErrorRecord {
    pub last_function: u8,
    pub last_code: u8,
    pub count: u64,
    pub last_occurrence: Option<Instant>,
}

impl DeviceErrorRecord {
    /// Record an error occurrence. Returns true when this transition
    /// deserves a fresh warning.
    fn record(&mut self, function: u8, code: u8) -> bool {
        self.last_occurrence = Some(Instant::now());

        if self.last_function == function && self.last_code == code && self.count > 0 {
            self.count += 1;
            return false;
        }
        self.last_function = function;
        self.last_code = code;
        self.count += 1;
        true
    }
}

struct ResponseRecord {
    function: u8,
    action: ResponseAction,
    error_function: u8,
    error_action: Option<ErrorAction>,
}

/// Ordered list of outstanding Modbus requests with a reply-handler table.
///
/// Requests are appended with [`BusList::call_function`]; replies are fed
/// to [`BusList::parse`] in request order. A cursor tracks the next request
/// whose reply is pending; broadcast requests produce no reply and are
/// skipped. Mismatched replies advance the cursor, update the per-device
/// error record and surface [`ModbusError::WrongResponse`], so a batch
/// caller can tell exactly which device failed to answer.
pub struct BusList {
    requests: Vec<Request>,
    parsed_index: usize,
    responses: Vec<ResponseRecord>,
    errors: HashMap<u8, DeviceErrorRecord>,
    length_hint: Option<Box<dyn Fn(&[u8]) -> i32 + Send>>,
}

impl Default for BusList {
    fn default() -> Self {
        Self::new()
    }
}

impl BusList {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            parsed_index: 0,
            responses: Vec::new(),
            errors: HashMap::new(),
            length_hint: None,
        }
    }

    /// Register the reply handler for `function`. `error_action`, when
    /// given, consumes error-mask replies (`function | 0x80`); without it
    /// such replies surface as [`ModbusError::ErrorResponse`].
    ///
    /// Each function code may be registered at most once.
    pub fn add_response(
        &mut self,
        function: u8,
        action: ResponseAction,
        error_action: Option<ErrorAction>,
    ) {
        debug_assert!(
            !self.responses.iter().any(|r| r.function == function),
            "handler for function {function} registered twice"
        );
        self.responses.push(ResponseRecord {
            function,
            action,
            error_function: function | ERROR_MASK,
            error_action,
        });
    }

    /// Append a request calling `function` on `address`. The response
    /// handler for `function` must be registered before replies are parsed.
    /// Broadcast addresses are marked as producing no reply.
    pub fn call_function(
        &mut self,
        address: u8,
        function: u8,
        timeout: Duration,
        args: impl FrameData,
    ) {
        let buffer = Buffer::for_function(address, function, args);
        self.requests.push(Request {
            buffer,
            address,
            function,
            timeout,
            expects_reply: !is_broadcast(address),
        });
    }

    /// Expected total reply length for the bytes accumulated so far, or -1
    /// when it cannot be determined yet. Specialized lists install a hint
    /// via [`BusList::set_length_hint`] for variable-length replies.
    pub fn response_length(&self, partial: &[u8]) -> i32 {
        match &self.length_hint {
            Some(hint) => hint(partial),
            None => -1,
        }
    }

    pub fn set_length_hint(&mut self, hint: Box<dyn Fn(&[u8]) -> i32 + Send>) {
        self.length_hint = Some(hint);
    }

    /// Parse one reply frame against the request at the cursor.
    ///
    /// Success and handled error replies advance the cursor. A reply whose
    /// address or function does not match the pending request records a
    /// device error, advances the cursor and fails with
    /// [`ModbusError::WrongResponse`] - the frame is consumed.
    pub fn parse(&mut self, data: &[u8]) -> Result<(), ModbusError> {
        let mut parser = Parser::new(data.to_vec())?;

        // broadcasts never answer
        while self
            .requests
            .get(self.parsed_index)
            .is_some_and(|r| !r.expects_reply)
        {
            self.parsed_index += 1;
        }

        let address = parser.address();
        let called = parser.func();

        let Some(request) = self.requests.get(self.parsed_index) else {
            return Err(ModbusError::MissingResponse {
                address,
                function: called,
            });
        };
        let expected_address = request.address;
        let expected_function = request.function;

        if address != expected_address || (called & !ERROR_MASK) != expected_function {
            self.parsed_index += 1;
            if self
                .errors
                .entry(expected_address)
                .or_default()
                .record(called, 0xFF)
            {
                warn!(
                    address,
                    function = called,
                    expected_address,
                    expected_function,
                    "wrong response"
                );
            }
            return Err(ModbusError::WrongResponse {
                address,
                function: called,
                expected_address,
                expected_function,
            });
        }

        let Some(record) = self
            .responses
            .iter_mut()
            .find(|r| r.function == expected_function)
        else {
            return Err(ModbusError::UnexpectedResponse {
                address,
                function: called,
            });
        };

        if called == record.function {
            let result = (record.action)(&mut parser);
            // the cursor moves on even when the handler failed (bad CRC,
            // trailing bytes) - the slot has had its answer
            self.parsed_index += 1;
            if result.is_err() && self.errors.entry(address).or_default().record(called, 0xFF) {
                warn!(address, function = called, "failed to parse reply");
            }
            return result;
        }

        // called == record.function | ERROR_MASK
        debug_assert_eq!(called, record.error_function);
        self.parsed_index += 1;
        let exception = parser.read_u8().and_then(|exception| {
            parser.check_crc()?;
            Ok(exception)
        })?;
        let new_error = self
            .errors
            .entry(address)
            .or_default()
            .record(called, exception);

        match &mut record.error_action {
            Some(error_action) => {
                error_action(address, exception);
                Ok(())
            }
            None => {
                if new_error {
                    warn!(
                        address,
                        function = expected_function,
                        exception,
                        "error reply"
                    );
                }
                Err(ModbusError::ErrorResponse {
                    address,
                    function: expected_function,
                    exception,
                })
            }
        }
    }

    /// Rewind the cursor to the first request.
    pub fn reset(&mut self) {
        self.parsed_index = 0;
    }

    /// Drop all requests, the cursor and the device error records.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.parsed_index = 0;
        self.errors.clear();
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Index of the next request whose reply is pending.
    pub fn parsed_index(&self) -> usize {
        self.parsed_index
    }

    pub fn error_record(&self, address: u8) -> Option<&DeviceErrorRecord> {
        self.errors.get(&address)
    }
}
