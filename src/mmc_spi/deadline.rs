use crate::bus::Clock;
use crate::constant::*;

/// Timeout bounds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub init_ms: u32,
    pub read_ms: u32,
    pub write_ms: u32,
    pub command_ms: u32,
    pub erase_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init_ms: INIT_TIMEOUT_MS,
            read_ms: READ_TIMEOUT_MS,
            write_ms: WRITE_TIMEOUT_MS,
            command_ms: CMD_TIMEOUT_MS,
            erase_ms: ERASE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: u32,
    bound_ms: u32,
}

impl Deadline {
    pub fn start<C: Clock>(clock: &C, bound_ms: u32) -> Self {
        Self {
            start: clock.now_ms(),
            bound_ms,
        }
    }

    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        clock.now_ms().wrapping_sub(self.start) > self.bound_ms
    }
}
