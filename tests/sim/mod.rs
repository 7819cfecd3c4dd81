//! Byte-level SPI-mode card simulator.
//!
//! Every exchanged byte advances a shared clock by 10 µs so deadlines are
//! deterministic.

#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::rc::Rc;

use sdspi::{BusClock, Clock, SpiBus};

pub const BYTE_TIME_US: u64 = 10;
const SECTOR: usize = 512;

const R1_IDLE: u8 = 0x01;
const R1_ILLEGAL: u8 = 0x04;
const R1_CRC_ERR: u8 = 0x08;
const R1_PARAM: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Mmc,
    SdV1,
    /// SD v2, byte addressed.
    SdV2,
    /// SD v2, block addressed.
    SdHc,
    /// Never drives DO.
    Dead,
}

impl Kind {
    fn speaks_v2(self) -> bool {
        matches!(self, Kind::SdV2 | Kind::SdHc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Command { index: u8, arg: u32, app: bool },
    Clock(BusClock),
    StopToken,
}

#[derive(Debug)]
enum Mode {
    Command,
    ReadMulti { sector: u32 },
    AwaitToken { sector: u32, multi: bool },
    Data { sector: u32, multi: bool, buf: Vec<u8> },
}

pub struct CardState {
    pub kind: Kind,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    pub ocr: [u8; 4],
    pub sd_status: [u8; 64],
    pub storage: HashMap<u32, Vec<u8>>,

    pub bus_present: bool,
    pub card_present: bool,
    pub write_protect: bool,

    /// Corrupt the check pattern echoed by CMD8.
    pub echo_mismatch: bool,
    /// Never leave the idle state.
    pub never_ready: bool,
    /// Op-cond polls needed before the card leaves idle.
    pub ready_after: u32,
    /// Reject the data packet with this index (counted from 0 over the
    /// card's lifetime).
    pub reject_packet: Option<usize>,
    /// Drive DO low forever.
    pub hold_busy: bool,
    /// Never send the start token for this sector.
    pub read_gap_at: Option<u32>,
    /// Answer CMD16 with a parameter error.
    pub reject_blocklen: bool,
    pub busy_bytes: u32,
    pub erase_busy_bytes: u32,

    pub exchanges: usize,
    pub bulk_calls: usize,
    pub elapsed_us: u64,
    pub events: Vec<Event>,

    selected: bool,
    idle: bool,
    app_pending: bool,
    op_cond_polls: u32,
    packets: usize,
    busy: u32,
    mode: Mode,
    frame: Vec<u8>,
    out: VecDeque<u8>,
}

impl CardState {
    fn new(kind: Kind) -> Self {
        let csd = match kind {
            Kind::SdHc => v2_csd(0x3B37),
            _ => v1_csd(),
        };
        let ocr = match kind {
            Kind::SdHc => [0xC0, 0xFF, 0x80, 0x00],
            _ => [0x80, 0xFF, 0x80, 0x00],
        };
        let mut cid = [0u8; 16];
        cid[0] = 0x03;
        cid[1..3].copy_from_slice(b"SD");
        cid[3..8].copy_from_slice(b"SIM01");
        let mut sd_status = [0u8; 64];
        // AU_SIZE = 9 (4 MiB)
        sd_status[10] = 0x90;

        Self {
            kind,
            csd,
            cid,
            ocr,
            sd_status,
            storage: HashMap::new(),
            bus_present: true,
            card_present: true,
            write_protect: false,
            echo_mismatch: false,
            never_ready: false,
            ready_after: 3,
            reject_packet: None,
            hold_busy: false,
            read_gap_at: None,
            reject_blocklen: false,
            busy_bytes: 8,
            erase_busy_bytes: 200,
            exchanges: 0,
            bulk_calls: 0,
            elapsed_us: 0,
            events: Vec::new(),
            selected: false,
            idle: false,
            app_pending: false,
            op_cond_polls: 0,
            packets: 0,
            busy: 0,
            mode: Mode::Command,
            frame: Vec::new(),
            out: VecDeque::new(),
        }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        self.elapsed_us += BYTE_TIME_US;
        self.exchanges += 1;
        if !self.selected {
            return 0xFF;
        }
        let out = self.next_out();
        self.receive(byte);
        out
    }

    fn next_out(&mut self) -> u8 {
        if let Some(b) = self.out.pop_front() {
            return b;
        }
        if let Mode::ReadMulti { sector } = self.mode {
            if self.read_gap_at == Some(sector) {
                return 0xFF;
            }
            let data = self.sector_data(sector);
            self.respond_block(&data);
            self.mode = Mode::ReadMulti { sector: sector + 1 };
            return self.out.pop_front().unwrap_or(0xFF);
        }
        if self.busy > 0 {
            self.busy -= 1;
            return 0x00;
        }
        if self.hold_busy {
            return 0x00;
        }
        0xFF
    }

    fn receive(&mut self, byte: u8) {
        match self.mode {
            Mode::AwaitToken { sector, multi } => {
                let next = match (byte, multi) {
                    (0xFE, false) | (0xFC, true) => Some(Mode::Data {
                        sector,
                        multi,
                        buf: Vec::with_capacity(SECTOR + 2),
                    }),
                    (0xFD, true) => {
                        self.events.push(Event::StopToken);
                        self.busy = self.busy_bytes;
                        Some(Mode::Command)
                    }
                    _ => None,
                };
                if let Some(mode) = next {
                    self.mode = mode;
                    return;
                }
            }
            Mode::Data { ref mut buf, .. } => {
                buf.push(byte);
                if buf.len() == SECTOR + 2 {
                    self.finish_packet();
                }
                return;
            }
            _ => {}
        }
        self.parse_frame(byte);
    }

    fn finish_packet(&mut self) {
        let Mode::Data { sector, multi, buf } = mem::replace(&mut self.mode, Mode::Command) else {
            return;
        };
        let index = self.packets;
        self.packets += 1;

        if self.reject_packet == Some(index) {
            // CRC error
            self.out.push_back(0x0B);
        } else {
            self.storage.insert(sector, buf[..SECTOR].to_vec());
            self.out.push_back(0xE5);
            self.busy = self.busy_bytes;
        }

        if multi {
            self.mode = Mode::AwaitToken {
                sector: sector + 1,
                multi,
            };
        }
    }

    fn parse_frame(&mut self, byte: u8) {
        if self.frame.is_empty() && byte & 0xC0 != 0x40 {
            return;
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let f = mem::take(&mut self.frame);
            let arg = u32::from_be_bytes([f[1], f[2], f[3], f[4]]);
            self.command(f[0] & 0x3F, arg, f[5]);
        }
    }

    fn command(&mut self, index: u8, arg: u32, crc: u8) {
        let app = mem::take(&mut self.app_pending);
        self.events.push(Event::Command { index, arg, app });
        if self.kind == Kind::Dead {
            return;
        }
        self.out.clear();

        if index == 12 {
            // Stuff byte, then R1
            self.mode = Mode::Command;
            self.out.extend([0x3F, 0x00]);
            return;
        }

        let idle = if self.idle { R1_IDLE } else { 0 };
        match (app, index) {
            (false, 0) => {
                self.idle = true;
                self.op_cond_polls = 0;
                self.mode = Mode::Command;
                let r1 = if crc == 0x95 { R1_IDLE } else { R1_IDLE | R1_CRC_ERR };
                self.respond(&[r1]);
            }
            (false, 8) => {
                if !self.kind.speaks_v2() {
                    self.respond(&[idle | R1_ILLEGAL]);
                } else if crc != 0x87 {
                    self.respond(&[idle | R1_CRC_ERR]);
                } else {
                    let echo = if self.echo_mismatch { 0x55 } else { arg as u8 };
                    self.respond(&[idle, 0x00, 0x00, (arg >> 8) as u8 & 0x0F, echo]);
                }
            }
            (false, 55) => {
                if self.kind == Kind::Mmc {
                    self.respond(&[idle | R1_ILLEGAL]);
                } else {
                    self.app_pending = true;
                    self.respond(&[idle]);
                }
            }
            (true, 41) | (false, 1) => {
                if !self.never_ready {
                    self.op_cond_polls += 1;
                    if self.op_cond_polls >= self.ready_after {
                        self.idle = false;
                    }
                }
                let r1 = if self.idle { R1_IDLE } else { 0 };
                self.respond(&[r1]);
            }
            (false, 58) => {
                let ocr = self.ocr;
                self.respond(&[idle, ocr[0], ocr[1], ocr[2], ocr[3]]);
            }
            (false, 16) => {
                let r1 = if arg == SECTOR as u32 && !self.reject_blocklen {
                    idle
                } else {
                    idle | R1_PARAM
                };
                self.respond(&[r1]);
            }
            (false, 9) => {
                let csd = self.csd;
                self.respond(&[idle]);
                self.respond_block(&csd);
            }
            (false, 10) => {
                let cid = self.cid;
                self.respond(&[idle]);
                self.respond_block(&cid);
            }
            (true, 13) => {
                let status = self.sd_status;
                self.respond(&[idle, 0x00]);
                self.respond_block(&status);
            }
            (false, 17) => match self.sector_of(arg) {
                Some(sector) => {
                    self.respond(&[idle]);
                    if self.read_gap_at != Some(sector) {
                        let data = self.sector_data(sector);
                        self.respond_block(&data);
                    }
                }
                None => self.respond(&[idle | R1_PARAM]),
            },
            (false, 18) => match self.sector_of(arg) {
                Some(sector) => {
                    self.respond(&[idle]);
                    self.mode = Mode::ReadMulti { sector };
                }
                None => self.respond(&[idle | R1_PARAM]),
            },
            (false, 24) | (false, 25) => match self.sector_of(arg) {
                Some(sector) => {
                    self.respond(&[idle]);
                    self.mode = Mode::AwaitToken {
                        sector,
                        multi: index == 25,
                    };
                }
                None => self.respond(&[idle | R1_PARAM]),
            },
            (true, 23) | (false, 32) | (false, 33) => self.respond(&[idle]),
            (false, 38) => {
                self.respond(&[idle]);
                self.busy = self.erase_busy_bytes;
            }
            _ => self.respond(&[idle | R1_ILLEGAL]),
        }
    }

    // One idle byte of response latency, then the response itself
    fn respond(&mut self, bytes: &[u8]) {
        self.out.push_back(0xFF);
        self.out.extend(bytes.iter().copied());
    }

    fn respond_block(&mut self, data: &[u8]) {
        self.out.extend([0xFF, 0xFE]);
        self.out.extend(data.iter().copied());
        self.out.extend([0xFF, 0xFF]);
    }

    fn sector_of(&self, arg: u32) -> Option<u32> {
        if self.kind == Kind::SdHc {
            Some(arg)
        } else if arg % SECTOR as u32 == 0 {
            Some(arg / SECTOR as u32)
        } else {
            None
        }
    }

    fn sector_data(&self, sector: u32) -> Vec<u8> {
        self.storage
            .get(&sector)
            .cloned()
            .unwrap_or_else(|| pattern(sector))
    }
}

/// Contents of a never-written sector.
pub fn pattern(sector: u32) -> Vec<u8> {
    (0..SECTOR).map(|i| (sector as u8) ^ (i as u8)).collect()
}

pub fn v2_csd(c_size: u32) -> [u8; 16] {
    let mut csd = [0u8; 16];
    csd[0] = 0x40;
    csd[7] = ((c_size >> 16) & 63) as u8;
    csd[8] = (c_size >> 8) as u8;
    csd[9] = c_size as u8;
    csd
}

/// 1 GiB legacy register: READ_BL_LEN 9, C_SIZE 0xFFF, C_SIZE_MULT 7,
/// ERASE_BLK_EN set, SECTOR_SIZE 127, WRITE_BL_LEN 9.
pub fn v1_csd() -> [u8; 16] {
    let mut csd = [0u8; 16];
    csd[5] = 0x59;
    csd[6] = 0x03;
    csd[7] = 0xFF;
    csd[8] = 0xC0;
    csd[9] = 0x03;
    csd[10] = 0xFF;
    csd[11] = 0x80;
    csd[12] = 0x02;
    csd[13] = 0x40;
    csd
}

/// Test-side handle on a simulated card.
#[derive(Clone)]
pub struct Sim {
    state: Rc<RefCell<CardState>>,
}

impl Sim {
    pub fn new(kind: Kind) -> Self {
        Self {
            state: Rc::new(RefCell::new(CardState::new(kind))),
        }
    }

    pub fn bus(&self) -> SimBus {
        SimBus {
            state: self.state.clone(),
        }
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> RefMut<'_, CardState> {
        self.state.borrow_mut()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Logged commands as `(index, arg)`, application commands included.
    pub fn commands(&self) -> Vec<(u8, u32)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter_map(|e| match *e {
                Event::Command { index, arg, .. } => Some((index, arg)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn stop_tokens(&self) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| **e == Event::StopToken)
            .count()
    }

    pub fn bulk_calls(&self) -> usize {
        self.state.borrow().bulk_calls
    }

    pub fn exchanges(&self) -> usize {
        self.state.borrow().exchanges
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.state.borrow().elapsed_us / 1000
    }

    pub fn stored(&self, sector: u32) -> Option<Vec<u8>> {
        self.state.borrow().storage.get(&sector).cloned()
    }
}

pub struct SimBus {
    state: Rc<RefCell<CardState>>,
}

impl SpiBus for SimBus {
    fn begin(&mut self) -> bool {
        self.state.borrow().bus_present
    }

    fn activate(&mut self) {
        self.state.borrow_mut().selected = true;
    }

    fn deactivate(&mut self) {
        let mut st = self.state.borrow_mut();
        st.selected = false;
        st.out.clear();
        st.frame.clear();
        if matches!(st.mode, Mode::ReadMulti { .. }) {
            st.mode = Mode::Command;
        }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        self.state.borrow_mut().exchange(byte)
    }

    fn receive_bulk(&mut self, buf: &mut [u8]) {
        let mut st = self.state.borrow_mut();
        st.bulk_calls += 1;
        for b in buf.iter_mut() {
            *b = st.exchange(0xFF);
        }
    }

    fn send_bulk(&mut self, buf: &[u8]) {
        let mut st = self.state.borrow_mut();
        st.bulk_calls += 1;
        for &b in buf {
            st.exchange(b);
        }
    }

    fn set_clock(&mut self, clock: BusClock) {
        self.state.borrow_mut().events.push(Event::Clock(clock));
    }

    fn card_detect(&mut self) -> bool {
        self.state.borrow().card_present
    }

    fn write_protect(&mut self) -> bool {
        self.state.borrow().write_protect
    }
}

pub struct SimClock {
    state: Rc<RefCell<CardState>>,
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        (self.state.borrow().elapsed_us / 1000) as u32
    }
}
