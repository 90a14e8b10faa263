//! Simulated WM8xxx controller with a NAND chip behind it.
//!
//! Register writes that trigger a command run it against an in-memory flash
//! array at once; the interrupts it would raise are queued and delivered one
//! per delay tick, so the driver sees them while it waits.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use embassy_futures::yield_now;

use wmt_nand::blocking::{Configured, Nand, Unconfigured};
use wmt_nand::asynchronous::AsyncNand;
use wmt_nand::geometry::BusWidth;
use wmt_nand::register::*;
use wmt_nand::{Config, Geometry, InterruptHandler, SharedState};

pub type Handler = InterruptHandler<'static, &'static Sim>;

/// Status byte of an idle, writable chip
const STATUS_OK: u8 = 0xc0;
const STATUS_FAIL: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ecc { stat2: u32, positions: Vec<u32> },
    Dma(u8),
    Command,
}

/// Bit errors the ECC engine reports on the next read of a page
#[derive(Debug, Clone)]
pub struct EccFault {
    pub bank: u8,
    pub oob: bool,
    /// (byte, bit) flipped by the "medium"
    pub bits: Vec<(u16, u8)>,
    /// Count reported instead of `bits.len()`
    pub reported_count: Option<u8>,
}

impl EccFault {
    pub fn data(bank: u8, bits: &[(u16, u8)]) -> Self {
        Self {
            bank,
            oob: false,
            bits: bits.to_vec(),
            reported_count: None,
        }
    }

    pub fn oob(bits: &[(u16, u8)]) -> Self {
        Self {
            bank: 0,
            oob: true,
            bits: bits.to_vec(),
            reported_count: None,
        }
    }

    pub fn uncorrectable(bank: u8, count: u8, bits: &[(u16, u8)]) -> Self {
        Self {
            bank,
            oob: false,
            bits: bits.to_vec(),
            reported_count: Some(count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageData {
    pub data: Vec<u8>,
    pub oob: Vec<u8>,
}

struct State {
    page_size: usize,
    oob_size: usize,
    ecc_block: usize,
    pages_per_block: u32,
    wide_row: bool,

    flash: HashMap<u32, PageData>,
    latch: Option<(u32, PageData)>,
    erase_row: Option<u32>,
    status: u8,

    id: [u8; 5],
    param: Vec<u8>,
    stream: VecDeque<u8>,

    events: VecDeque<Event>,
    commands: Vec<u8>,
    read_columns: Vec<u16>,
    resumes: u32,

    fail_program: bool,
    fail_erase: bool,
    drop_command_irqs: usize,
    withhold_busy_to_ready: usize,
    dma_isr_stuck: bool,
    dma_enable_stuck: bool,
    dma_event: u8,
    ecc_faults: HashMap<u32, Vec<EccFault>>,
}

pub struct Sim {
    regs: RefCell<[u8; WINDOW_SIZE]>,
    shared: &'static SharedState,
    state: RefCell<State>,
}

impl Sim {
    pub fn new(shared: &'static SharedState, geometry: &Geometry) -> Self {
        let mut param = vec![0u8; 769];
        param[0] = 0xaa;
        param[1..5].copy_from_slice(b"ONFI");
        for (i, byte) in param.iter_mut().enumerate().skip(5) {
            *byte = i as u8;
        }

        let sim = Self {
            regs: RefCell::new([0; WINDOW_SIZE]),
            shared,
            state: RefCell::new(State {
                page_size: geometry.page_size(),
                oob_size: geometry.oob_size(),
                ecc_block: geometry.ecc().block_size as usize,
                pages_per_block: geometry.pages_per_block().count(),
                wide_row: geometry.wide_row(),
                flash: HashMap::new(),
                latch: None,
                erase_row: None,
                status: STATUS_OK,
                id: [0xec, 0xf1, 0x00, 0x00, 0x00],
                param,
                stream: VecDeque::new(),
                events: VecDeque::new(),
                commands: Vec::new(),
                read_columns: Vec::new(),
                resumes: 0,
                fail_program: false,
                fail_erase: false,
                drop_command_irqs: 0,
                withhold_busy_to_ready: 0,
                dma_isr_stuck: false,
                dma_enable_stuck: false,
                dma_event: 0x0f,
                ecc_faults: HashMap::new(),
            }),
        };
        sim.store(MISC_STAT_PORT, &MSP_READY.to_le_bytes());
        sim
    }

    fn load(&self, offset: usize, len: usize) -> u32 {
        let regs = self.regs.borrow();
        let mut bytes = [0u8; 4];
        bytes[..len].copy_from_slice(&regs[offset..offset + len]);
        u32::from_le_bytes(bytes)
    }

    fn store(&self, offset: usize, bytes: &[u8]) {
        self.regs.borrow_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn store32(&self, offset: usize, val: u32) {
        self.store(offset, &val.to_le_bytes());
    }

    fn write(&self, offset: usize, val: u32, len: usize) {
        match offset {
            COMCTRL if val & COMCTRL_TRIGGER_CMD as u32 != 0 => {
                self.store(offset, &[(val as u8) & !COMCTRL_TRIGGER_CMD]);
                self.command(val as u8);
            }
            NFC_DMA_ISR if self.state.borrow().dma_isr_stuck => {}
            NFC_DMA_GCR if self.state.borrow().dma_enable_stuck => {
                self.store(offset, &(val & !DMA_GCR_DMA_EN).to_le_bytes()[..len]);
            }
            HOST_STAT_CHANGE | NFC_DMA_ISR | ECC_BCH_INT_STAT1 => {
                let old = self.load(offset, len);
                self.store(offset, &(old & !val).to_le_bytes()[..len]);
            }
            ECC_BCH_CTRL if val & EBC_READ_RESUME != 0 => {
                self.state.borrow_mut().resumes += 1;
                self.store(offset, &(val & !EBC_READ_RESUME).to_le_bytes()[..len]);
            }
            _ => self.store(offset, &val.to_le_bytes()[..len]),
        }
    }

    fn address(&self, count: usize) -> Vec<u8> {
        (0..count)
            .map(|cycle| self.load(address_cycle_offset(cycle), 1) as u8)
            .collect()
    }

    fn row(&self, bytes: &[u8]) -> u32 {
        bytes
            .iter()
            .enumerate()
            .fold(0, |row, (i, byte)| row | (*byte as u32) << (8 * i))
    }

    fn command(&self, ctrl: u8) {
        let count = ((ctrl >> 1) & 0x7) as usize;
        let flags = ctrl & 0xf0;

        if flags == COMCTRL_NAND_2_NFC | COMCTRL_CYCLES_SINGLE {
            let byte = self.state.borrow_mut().stream.pop_front().unwrap_or(0xff);
            self.store(DATAPORT, &[byte]);
            return;
        }

        let cmd = self.load(COMPORT0, 1) as u8;
        self.state.borrow_mut().commands.push(cmd);

        if flags & COMCTRL_MULT_COMMANDS != 0 {
            assert_eq!(cmd, 0x00);
            let address = self.address(count - 2);
            assert_eq!(self.load(address_cycle_offset(count - 2), 1), 0x30);
            let column = address[0] as u16 | (address[1] as u16) << 8;
            let row = self.row(&address[2..]);
            self.read(column, row);
            return;
        }

        let address = self.address(count - 1);
        let mut state = self.state.borrow_mut();
        match cmd {
            0xff => {
                state.status = STATUS_OK;
                state.events.push_back(Event::Command);
            }
            0x90 => state.stream = state.id.iter().copied().collect(),
            0xec => state.stream = state.param.iter().copied().collect(),
            0x70 => state.stream = [state.status].into_iter().collect(),
            0x60 => state.erase_row = Some(self.row(&address)),
            0xd0 => {
                let row = state.erase_row.take().expect("ERASE2 without ERASE1");
                if state.fail_erase {
                    state.status = STATUS_OK | STATUS_FAIL;
                } else {
                    state.status = STATUS_OK;
                    let first = row - row % state.pages_per_block;
                    for page in first..first + state.pages_per_block {
                        state.flash.remove(&page);
                    }
                }
                state.events.push_back(Event::Command);
            }
            0x80 => {
                assert_eq!(address.len(), if state.wide_row { 5 } else { 4 });
                let row = self.row(&address[2..]);
                let page_size = state.page_size;
                self.check_dma(page_size, false);
                let data = self
                    .shared
                    .with_memory(|memory| memory.buffer()[..page_size].to_vec());
                let oob_len = state.oob_size.min(ECC_FIFO_LEN);
                let oob = (0..oob_len)
                    .map(|i| self.load(ECC_FIFO_0 + i, 1) as u8)
                    .collect();
                state.latch = Some((row, PageData { data, oob }));
                let event = state.dma_event;
                state.events.push_back(Event::Dma(event));
            }
            0x10 => {
                let (row, page) = state.latch.take().expect("PAGEPROG without SEQIN");
                if state.fail_program {
                    state.status = STATUS_OK | STATUS_FAIL;
                } else {
                    state.status = STATUS_OK;
                    state.flash.insert(row, page);
                }
                state.events.push_back(Event::Command);
            }
            other => panic!("unexpected NAND command {:#x}", other),
        }
    }

    /// The transfer the driver set up must match the one the command runs
    fn check_dma(&self, len: usize, to_memory: bool) {
        let ccr = self.load(NFC_DMA_CCR, 4);
        assert!(ccr & DMA_CCR_RUN != 0, "DMA not running");
        assert_eq!(ccr & DMA_CCR_PERIPHERAL_TO_IF != 0, to_memory);
        assert_eq!(self.load(DMA_COUNTER, 2) as usize, len - 1);
        assert!(self.load(NFC_DMA_GCR, 4) & DMA_GCR_DMA_EN != 0);
        assert_eq!(self.load(NFC_DMA_IER, 4), DMA_IER_INT_EN);
        self.shared.with_memory(|memory| {
            let descriptor = memory.descriptor();
            assert_eq!(descriptor.request_count() as usize, len);
            assert!(descriptor.interrupt() && descriptor.format() && descriptor.end_of_chain());
            assert_eq!(descriptor.addr(), memory.buffer_addr());
        });
        assert_eq!(self.load(NFC_DMA_DESPR, 4), self.shared.with_memory(|m| m.descriptor_addr()));
    }

    fn read(&self, column: u16, row: u32) {
        let oob_only = self.load(SMC_ENABLE, 4) & SMC_REDUNDANT_AREA != 0;
        let mut state = self.state.borrow_mut();
        state.read_columns.push(column);

        let page_size = state.page_size;
        let oob_len = state.oob_size.min(ECC_FIFO_LEN);
        let page = state.flash.get(&row).cloned().unwrap_or_else(|| PageData {
            data: vec![0xff; page_size],
            oob: vec![0xff; oob_len],
        });

        let mut fifo = [0xffu8; ECC_FIFO_LEN];
        fifo[..page.oob.len()].copy_from_slice(&page.oob);
        let mut data = page.data;

        let faults = state.ecc_faults.remove(&row).unwrap_or_default();
        for fault in faults {
            if oob_only && !fault.oob {
                continue;
            }
            let mut positions = vec![0u32; fault.bits.len().div_ceil(2)];
            for (i, (byte, bit)) in fault.bits.iter().enumerate() {
                if fault.oob {
                    fifo[*byte as usize] ^= 1u8 << *bit;
                } else {
                    data[state.ecc_block * fault.bank as usize + *byte as usize] ^= 1u8 << *bit;
                }
                positions[i / 2] |= ((*byte as u32) << 3 | *bit as u32) << (16 * (i % 2));
            }
            let count = fault.reported_count.unwrap_or(fault.bits.len() as u8) as u32;
            let stat2 = count | (fault.bank as u32) << 8 | (fault.oob as u32) << 11;
            state.events.push_back(Event::Ecc { stat2, positions });
        }

        for (i, byte) in fifo.iter().enumerate() {
            self.store(ECC_FIFO_0 + i, &[*byte]);
        }

        if !oob_only {
            self.check_dma(page_size, true);
            self.shared
                .with_memory(|memory| memory.buffer_mut()[..page_size].copy_from_slice(&data));
            let event = state.dma_event;
            state.events.push_back(Event::Dma(event));
        }
        state.events.push_back(Event::Command);
    }

    /// Deliver the next pending interrupt, if any
    pub fn step(&self, handler: &Handler) {
        let event = self.state.borrow_mut().events.pop_front();
        match event {
            Some(Event::Ecc { stat2, positions }) => {
                let stat1 = self.load(ECC_BCH_INT_STAT1, 4);
                self.store32(ECC_BCH_INT_STAT1, stat1 | EBIS1_ERROR);
                self.store32(ECC_BCH_INT_STAT2, stat2);
                for (i, word) in positions.iter().enumerate() {
                    self.store32(ECC_BCH_ERR_POS1 + 4 * i, *word);
                }
                handler.on_nand_interrupt();
                let stat1 = self.load(ECC_BCH_INT_STAT1, 4);
                self.store32(ECC_BCH_INT_STAT1, stat1 & !EBIS1_ERROR);
            }
            Some(Event::Dma(code)) => {
                let ccr = self.load(NFC_DMA_CCR, 4);
                self.store32(
                    NFC_DMA_CCR,
                    (ccr & !(DMA_CCR_EVTCODE | DMA_CCR_RUN)) | code as u32,
                );
                let isr = self.load(NFC_DMA_ISR, 4);
                self.store32(NFC_DMA_ISR, isr | DMA_ISR_INT_STS);
                handler.on_dma_interrupt();
            }
            Some(Event::Command) => {
                let withhold = {
                    let mut state = self.state.borrow_mut();
                    if state.drop_command_irqs > 0 {
                        state.drop_command_irqs -= 1;
                        return;
                    }
                    let withhold = state.withhold_busy_to_ready > 0;
                    if withhold {
                        state.withhold_busy_to_ready -= 1;
                    }
                    withhold
                };
                if !withhold {
                    let hsc = self.load(HOST_STAT_CHANGE, 4);
                    self.store32(HOST_STAT_CHANGE, hsc | HSC_B2R);
                }
                handler.on_nand_interrupt();
            }
            None => {}
        }
    }

    pub fn page(&self, page: u32) -> Option<PageData> {
        self.state.borrow().flash.get(&page).cloned()
    }

    pub fn set_page(&self, page: u32, data: PageData) {
        self.state.borrow_mut().flash.insert(page, data);
    }

    pub fn set_id(&self, id: [u8; 5]) {
        self.state.borrow_mut().id = id;
    }

    pub fn param(&self) -> Vec<u8> {
        self.state.borrow().param.clone()
    }

    pub fn fail_program(&self, fail: bool) {
        self.state.borrow_mut().fail_program = fail;
    }

    pub fn fail_erase(&self, fail: bool) {
        self.state.borrow_mut().fail_erase = fail;
    }

    pub fn drop_command_irqs(&self, count: usize) {
        self.state.borrow_mut().drop_command_irqs = count;
    }

    /// Raise the next `count` command interrupts without the busy-to-ready
    /// flag behind them
    pub fn withhold_busy_to_ready(&self, count: usize) {
        self.state.borrow_mut().withhold_busy_to_ready = count;
    }

    /// Leave the DMA interrupt status raised, ignoring writes to clear it
    pub fn stick_dma_isr(&self) {
        let isr = self.load(NFC_DMA_ISR, 4);
        self.store32(NFC_DMA_ISR, isr | DMA_ISR_INT_STS);
        self.state.borrow_mut().dma_isr_stuck = true;
    }

    /// Keep the DMA enable bit from ever reading back set
    pub fn stick_dma_disabled(&self) {
        self.state.borrow_mut().dma_enable_stuck = true;
    }

    pub fn set_dma_event(&self, code: u8) {
        self.state.borrow_mut().dma_event = code;
    }

    pub fn inject_ecc(&self, page: u32, fault: EccFault) {
        self.state
            .borrow_mut()
            .ecc_faults
            .entry(page)
            .or_default()
            .push(fault);
    }

    /// Force bits of `MISC_STAT_PORT` on, as a wedged controller would
    pub fn stick_status(&self, mask: u32) {
        let val = self.load(MISC_STAT_PORT, 4);
        self.store32(MISC_STAT_PORT, val | mask);
    }

    pub fn commands(&self) -> Vec<u8> {
        self.state.borrow().commands.clone()
    }

    pub fn read_columns(&self) -> Vec<u16> {
        self.state.borrow().read_columns.clone()
    }

    pub fn resumes(&self) -> u32 {
        self.state.borrow().resumes
    }

    pub fn pending_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    pub fn reg32(&self, offset: usize) -> u32 {
        self.load(offset, 4)
    }

    pub fn reg8(&self, offset: usize) -> u8 {
        self.load(offset, 1) as u8
    }
}

impl Registers for Sim {
    fn read8(&self, offset: usize) -> u8 {
        self.load(offset, 1) as u8
    }

    fn read16(&self, offset: usize) -> u16 {
        self.load(offset, 2) as u16
    }

    fn read32(&self, offset: usize) -> u32 {
        self.load(offset, 4)
    }

    fn write8(&self, offset: usize, val: u8) {
        self.write(offset, val as u32, 1)
    }

    fn write16(&self, offset: usize, val: u16) {
        self.write(offset, val as u32, 2)
    }

    fn write32(&self, offset: usize, val: u32) {
        self.write(offset, val, 4)
    }
}

/// Delay source that delivers one pending interrupt per call
pub struct SimDelay {
    sim: &'static Sim,
    handler: &'static Handler,
}

impl embedded_hal::delay::DelayNs for SimDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.sim.step(self.handler);
    }
}

/// Interrupts land while the task sleeps, the deadline passes once none is
/// left. Yielding after each one lets a woken waiter finish first.
impl embedded_hal_async::delay::DelayNs for SimDelay {
    async fn delay_ns(&mut self, _ns: u32) {
        while self.sim.pending_events() > 0 {
            self.sim.step(self.handler);
            yield_now().await;
        }
    }
}

/// 2 KiB pages, 64 pages per block, 64 blocks
pub fn geometry_2k() -> Geometry {
    Geometry::new(2048, 64 * 2048, 64, 64 * 64 * 2048, BusWidth::X8).unwrap()
}

/// Small budgets so failing waits end fast
pub fn config() -> Config {
    Config {
        command_ready_polls: 1000,
        transfer_ready_polls: 1000,
        dma_clear_polls: 1000,
        busy_to_ready_polls: 1000,
        completion_timeout_us: 1000,
        wait_tick_us: 10,
        ..Config::default()
    }
}

pub struct Bench {
    pub sim: &'static Sim,
    pub shared: &'static SharedState,
    pub handler: &'static Handler,
    pub geometry: Geometry,
    pub config: Config,
}

impl Bench {
    pub fn new(geometry: Geometry) -> Self {
        Self::with_config(geometry, config())
    }

    pub fn with_config(geometry: Geometry, config: Config) -> Self {
        let shared: &'static SharedState = Box::leak(Box::new(SharedState::new()));
        let sim: &'static Sim = Box::leak(Box::new(Sim::new(shared, &geometry)));
        let handler: &'static Handler =
            Box::leak(Box::new(InterruptHandler::new(sim, shared, &config)));
        Self {
            sim,
            shared,
            handler,
            geometry,
            config,
        }
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay {
            sim: self.sim,
            handler: self.handler,
        }
    }

    pub fn unconfigured(&self) -> Nand<'static, &'static Sim, SimDelay, Unconfigured> {
        Nand::new(self.sim, self.shared, self.delay(), self.config)
    }

    pub fn nand(&self) -> Nand<'static, &'static Sim, SimDelay, Configured> {
        self.unconfigured().configure(self.geometry)
    }

    pub fn async_nand(&self) -> AsyncNand<'static, &'static Sim, SimDelay, Configured> {
        AsyncNand::new(self.sim, self.shared, self.delay(), self.config).configure(self.geometry)
    }
}

/// Deterministic page content
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
