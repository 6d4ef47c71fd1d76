//! Discrete-time PID controller.
//!
//! Filters hardpoint force measurements into balance-force corrections.
//! The controller is the standard two-step difference equation with a
//! filtered derivative term: parameters are folded into five
//! coefficients, and each step combines the last two control values with
//! the last three errors.

/// PID parameters. `n` is the derivative filter constant, `timestep` the
/// sampling period in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidParameters {
    pub timestep: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub n: f64,
}

/// Offset decay applied per step while thawing after a freeze.
const THAW_STEP: f64 = 50.0;

/// Discrete PID with freeze/thaw support.
///
/// [`Pid::freeze`] latches the current control value as an offset and
/// keeps the output constant (used during slews); thawing decays the
/// offset by [`THAW_STEP`] per process call until it reaches zero.
#[derive(Debug, Clone)]
pub struct Pid {
    initial_parameters: PidParameters,
    current_parameters: PidParameters,

    calculated_a: f64,
    calculated_b: f64,
    calculated_c: f64,
    calculated_d: f64,
    calculated_e: f64,

    error: f64,
    error_t1: f64,
    error_t2: f64,
    control: f64,
    control_t1: f64,
    control_t2: f64,

    frozen: bool,
    offset: f64,
}

impl Pid {
    pub fn new(parameters: PidParameters) -> Self {
        let mut pid = Self {
            initial_parameters: parameters,
            current_parameters: parameters,
            calculated_a: 0.0,
            calculated_b: 0.0,
            calculated_c: 0.0,
            calculated_d: 0.0,
            calculated_e: 0.0,
            error: 0.0,
            error_t1: 0.0,
            error_t2: 0.0,
            control: 0.0,
            control_t1: 0.0,
            control_t2: 0.0,
            frozen: false,
            offset: 0.0,
        };
        pid.update_parameters(parameters);
        pid
    }

    /// Replace the parameters and restart the difference equation.
    pub fn update_parameters(&mut self, parameters: PidParameters) {
        self.current_parameters = parameters;
        self.calculate_intermediate_values();
    }

    pub fn restore_initial_parameters(&mut self) {
        self.update_parameters(self.initial_parameters);
    }

    /// Zero the error and control history.
    pub fn reset_previous_values(&mut self) {
        self.error = 0.0;
        self.error_t1 = 0.0;
        self.error_t2 = 0.0;
        self.control = 0.0;
        self.control_t1 = 0.0;
        self.control_t2 = 0.0;
    }

    /// Run one controller step and return the new control value.
    pub fn process(&mut self, setpoint: f64, measurement: f64) -> f64 {
        self.error_t2 = self.error_t1;
        self.error_t1 = self.error;
        self.error = setpoint - measurement;
        self.control_t2 = self.control_t1;
        self.control_t1 = self.control;
        self.control = self.calculated_d * self.control_t1
            + self.calculated_e * self.control_t2
            + self.calculated_a * self.error
            + self.calculated_b * self.error_t1
            + self.calculated_c * self.error_t2;
        self.control + self.step_offset()
    }

    /// Latch the current control value and keep the output constant.
    pub fn freeze(&mut self) {
        self.offset = self.control;
        self.frozen = true;
    }

    /// Release the freeze; the latched offset decays over the following
    /// process calls.
    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Current freeze offset.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Decay the offset by one thaw step when not frozen.
    fn step_offset(&mut self) -> f64 {
        if self.offset.abs() > 0.0 && !self.frozen {
            if self.offset.abs() < THAW_STEP + 1.0 {
                self.offset = 0.0;
            } else {
                self.offset -= if self.offset > 0.0 {
                    THAW_STEP
                } else {
                    -THAW_STEP
                };
            }
        }
        self.offset
    }

    fn calculate_intermediate_values(&mut self) {
        let kp = self.current_parameters.p;
        let ki = self.current_parameters.i;
        let kd = self.current_parameters.d;
        let n = self.current_parameters.n;
        let ts = self.current_parameters.timestep;
        self.calculated_a = kp + kd * n;
        self.calculated_b = -2.0 * kp + kp * n * ts + ki * ts - 2.0 * kd * n;
        self.calculated_c = kp - kp * n * ts - ki * ts + ki * n * ts * ts + kd * n;
        self.calculated_d = 2.0 - n * ts;
        self.calculated_e = n * ts - 1.0;
        self.reset_previous_values();
    }

    fn clamp_control(&mut self, min: f64, max: f64) -> f64 {
        self.control = self.control.clamp(min, max);
        self.control
    }
}

/// PID with the control value clamped to an action range. The clamped
/// value feeds back into the control history, so the controller does not
/// wind up beyond what the actuator can deliver.
#[derive(Debug, Clone)]
pub struct LimitedPid {
    pid: Pid,
    action_min: f64,
    action_max: f64,
}

impl LimitedPid {
    pub fn new(parameters: PidParameters, action_min: f64, action_max: f64) -> Self {
        Self {
            pid: Pid::new(parameters),
            action_min,
            action_max,
        }
    }

    /// Run one step and return the clamped control value.
    pub fn process(&mut self, setpoint: f64, measurement: f64) -> f64 {
        self.pid.process(setpoint, measurement);
        self.pid.clamp_control(self.action_min, self.action_max)
    }

    pub fn update_parameters(&mut self, parameters: PidParameters) {
        self.pid.update_parameters(parameters);
    }

    pub fn reset_previous_values(&mut self) {
        self.pid.reset_previous_values();
    }
}
