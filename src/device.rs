use std::fmt;

use fxhash::FxHashMap;

use crate::charset;
use crate::runtime::Fault;
use crate::word::{Sign, Word};

/// Units `0..=20`.
pub const UNIT_COUNT: u8 = 21;

/// Class of an IO unit, fixed by its unit number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DeviceKind {
    /// Units 0..=7.
    Tape,
    /// Units 8..=15.
    Disk,
    /// Unit 16.
    CardReader,
    /// Unit 17.
    CardPunch,
    /// Unit 18.
    LinePrinter,
    /// Unit 19.
    Typewriter,
    /// Unit 20.
    PaperTape,
}

impl DeviceKind {
    pub fn for_unit(unit: u8) -> Option<DeviceKind> {
        let kind = match unit {
            0..=7 => DeviceKind::Tape,
            8..=15 => DeviceKind::Disk,
            16 => DeviceKind::CardReader,
            17 => DeviceKind::CardPunch,
            18 => DeviceKind::LinePrinter,
            19 => DeviceKind::Typewriter,
            20 => DeviceKind::PaperTape,
            _ => return None,
        };
        Some(kind)
    }

    /// Words moved by one `IN` or `OUT`.
    pub fn block_size(self) -> usize {
        match self {
            DeviceKind::Tape | DeviceKind::Disk => 100,
            DeviceKind::CardReader | DeviceKind::CardPunch => 16,
            DeviceKind::LinePrinter => 24,
            DeviceKind::Typewriter | DeviceKind::PaperTape => 14,
        }
    }

    /// Character devices move one character code per byte and always store `+` signs.
    pub fn is_character(self) -> bool {
        !matches!(self, DeviceKind::Tape | DeviceKind::Disk)
    }

    pub fn supports(self, op: IoOp) -> bool {
        match (self, op) {
            (_, IoOp::Status) => true,
            (DeviceKind::Tape | DeviceKind::Disk, _) => true,
            (DeviceKind::CardReader, IoOp::In) => true,
            (DeviceKind::CardPunch, IoOp::Out) => true,
            (DeviceKind::LinePrinter, IoOp::Out | IoOp::Control) => true,
            (DeviceKind::Typewriter, IoOp::In | IoOp::Out) => true,
            (DeviceKind::PaperTape, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Tape => "tape",
            DeviceKind::Disk => "disk",
            DeviceKind::CardReader => "card reader",
            DeviceKind::CardPunch => "card punch",
            DeviceKind::LinePrinter => "line printer",
            DeviceKind::Typewriter => "typewriter",
            DeviceKind::PaperTape => "paper tape",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IoOp {
    In,
    Out,
    Control,
    /// `JBUS` and `JRED`.
    Status,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoOp::In => "IN",
            IoOp::Out => "OUT",
            IoOp::Control => "IOC",
            IoOp::Status => "status query",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum DeviceState {
    #[default]
    Ready,
    /// Busy until the machine clock reaches `until`.
    Busy { until: u64 },
}

/// Decides how many time units a device stays busy after an operation.
pub trait IoPolicy {
    fn latency(&mut self, unit: u8, kind: DeviceKind, op: IoOp) -> u64;
}

impl<P: IoPolicy + ?Sized> IoPolicy for Box<P> {
    fn latency(&mut self, unit: u8, kind: DeviceKind, op: IoOp) -> u64 {
        (**self).latency(unit, kind, op)
    }
}

/// Every transfer completes before the next instruction is fetched.
#[derive(Clone, Copy, Default, Debug)]
pub struct Instantaneous;

impl IoPolicy for Instantaneous {
    fn latency(&mut self, _unit: u8, _kind: DeviceKind, _op: IoOp) -> u64 {
        0
    }
}

/// Every operation keeps its device busy for the same number of time units.
#[derive(Clone, Copy, Debug)]
pub struct FixedLatency(pub u64);

impl IoPolicy for FixedLatency {
    fn latency(&mut self, _unit: u8, _kind: DeviceKind, _op: IoOp) -> u64 {
        self.0
    }
}

/// Storage behind a unit.
#[derive(Clone, Debug)]
enum Media {
    /// Sequential blocks with a read/write head.
    Tape { blocks: Vec<Vec<Word>>, position: usize },
    /// Blocks addressed by the contents of rX.
    Disk { blocks: FxHashMap<i64, Vec<Word>> },
    /// Unit-record devices: queued input records and collected output records.
    Records {
        input: Vec<Vec<u8>>,
        cursor: usize,
        output: Vec<Vec<u8>>,
        /// Indices into `output` where a new printer page begins.
        pages: Vec<usize>,
    },
}

/// A single IO unit.
#[derive(Clone, Debug)]
pub struct Device {
    unit: u8,
    kind: DeviceKind,
    state: DeviceState,
    media: Media,
}

impl Device {
    fn new(unit: u8, kind: DeviceKind) -> Self {
        let media = match kind {
            DeviceKind::Tape => Media::Tape {
                blocks: Vec::new(),
                position: 0,
            },
            DeviceKind::Disk => Media::Disk {
                blocks: FxHashMap::default(),
            },
            _ => Media::Records {
                input: Vec::new(),
                cursor: 0,
                output: Vec::new(),
                pages: Vec::new(),
            },
        };
        Device {
            unit,
            kind,
            state: DeviceState::Ready,
            media,
        }
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Whether the device is still busy at `clock`. Never changes state.
    pub fn is_busy(&self, clock: u64) -> bool {
        match self.state {
            DeviceState::Ready => false,
            DeviceState::Busy { until } => until > clock,
        }
    }

    pub(crate) fn mark_busy(&mut self, until: u64) {
        self.state = DeviceState::Busy { until };
    }

    /// Finish any transfer whose latency has elapsed by `clock`.
    pub(crate) fn settle(&mut self, clock: u64) {
        if !self.is_busy(clock) {
            self.state = DeviceState::Ready;
        }
    }

    /// Queue text for a character input device, split into records of the block size and
    /// padded with spaces. Fails with the first character that has no MIX code.
    pub fn push_text(&mut self, text: &str) -> Result<(), char> {
        let codes = charset::encode_str(text)?;
        let len = self.record_len();
        let Media::Records { input, .. } = &mut self.media else {
            return Ok(());
        };
        if codes.is_empty() {
            input.push(vec![0; len]);
        }
        for chunk in codes.chunks(len) {
            let mut record = chunk.to_vec();
            record.resize(len, 0);
            input.push(record);
        }
        Ok(())
    }

    /// Append a block to the end of a tape. Short blocks are padded with `+0`.
    pub fn push_block(&mut self, mut words: Vec<Word>) {
        words.resize(self.kind.block_size(), Word::ZERO);
        if let Media::Tape { blocks, .. } = &mut self.media {
            blocks.push(words);
        }
    }

    /// Blocks stored on a tape or disk, in order of position or block address.
    pub fn blocks(&self) -> Vec<(i64, &[Word])> {
        match &self.media {
            Media::Tape { blocks, .. } => blocks
                .iter()
                .enumerate()
                .map(|(i, block)| (i as i64, block.as_slice()))
                .collect(),
            Media::Disk { blocks } => {
                let mut blocks: Vec<_> = blocks
                    .iter()
                    .map(|(addr, block)| (*addr, block.as_slice()))
                    .collect();
                blocks.sort_by_key(|(addr, _)| *addr);
                blocks
            }
            Media::Records { .. } => Vec::new(),
        }
    }

    /// Output records of a character device, rendered as text with trailing blanks removed.
    pub fn output_lines(&self) -> Vec<String> {
        match &self.media {
            Media::Records { output, .. } => output
                .iter()
                .map(|record| charset::decode_str(record).trim_end().to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Indices into [`Device::output_lines`] where the printer started a new page.
    pub fn page_breaks(&self) -> &[usize] {
        match &self.media {
            Media::Records { pages, .. } => pages,
            _ => &[],
        }
    }

    fn record_len(&self) -> usize {
        self.kind.block_size() * 5
    }

    fn invalid(&self, op: IoOp) -> Fault {
        Fault::InvalidDevice { unit: self.unit, op }
    }

    /// Transfer one block into the machine. `x` is the contents of rX, used by disks.
    pub(crate) fn read_block(&mut self, x: i64) -> Result<Vec<Word>, Fault> {
        if !self.kind.supports(IoOp::In) {
            return Err(self.invalid(IoOp::In));
        }
        let size = self.kind.block_size();
        let len = self.record_len();
        let words = match &mut self.media {
            Media::Tape { blocks, position } => {
                let block = blocks.get(*position).cloned();
                *position += 1;
                block.unwrap_or_else(|| vec![Word::ZERO; size])
            }
            Media::Disk { blocks } => blocks
                .get(&x)
                .cloned()
                .unwrap_or_else(|| vec![Word::ZERO; size]),
            Media::Records { input, cursor, .. } => {
                // Past the end of the input the device reads blanks.
                let record = input.get(*cursor).cloned().unwrap_or_else(|| vec![0; len]);
                *cursor += 1;
                record
                    .chunks(5)
                    .map(|chunk| {
                        let mut bytes = [0; 5];
                        bytes.copy_from_slice(chunk);
                        Word::from_bytes(Sign::Plus, bytes).unwrap_or(Word::ZERO)
                    })
                    .collect()
            }
        };
        Ok(words)
    }

    /// Transfer one block out of the machine.
    pub(crate) fn write_block(&mut self, x: i64, words: &[Word]) -> Result<(), Fault> {
        if !self.kind.supports(IoOp::Out) {
            return Err(self.invalid(IoOp::Out));
        }
        let size = self.kind.block_size();
        match &mut self.media {
            Media::Tape { blocks, position } => {
                // Blank stretches before the head become blank blocks, and everything after
                // the written block becomes unreadable.
                blocks.resize(*position, vec![Word::ZERO; size]);
                blocks.push(words.to_vec());
                *position += 1;
            }
            Media::Disk { blocks } => {
                blocks.insert(x, words.to_vec());
            }
            Media::Records { output, .. } => {
                output.push(words.iter().flat_map(|w| w.bytes()).collect());
            }
        }
        Ok(())
    }

    /// Device specific control, issued by `IOC`. `m` is the effective address.
    pub(crate) fn control(&mut self, m: i64) -> Result<(), Fault> {
        if !self.kind.supports(IoOp::Control) {
            return Err(self.invalid(IoOp::Control));
        }
        let unit = self.unit;
        match (&mut self.media, self.kind) {
            (Media::Tape { position, .. }, _) => {
                if m == 0 {
                    *position = 0;
                } else {
                    *position = (*position as i64 + m).max(0) as usize;
                }
            }
            // Seeks complete instantly; the block address is taken from rX on transfer.
            (Media::Disk { .. }, _) => {}
            (Media::Records { output, pages, .. }, DeviceKind::LinePrinter) if m == 0 => {
                pages.push(output.len());
            }
            (Media::Records { cursor, .. }, DeviceKind::PaperTape) if m == 0 => {
                *cursor = 0;
            }
            _ => {
                return Err(Fault::InvalidDevice {
                    unit,
                    op: IoOp::Control,
                })
            }
        }
        Ok(())
    }
}

/// The fixed set of 21 units attached to a machine.
#[derive(Clone, Debug)]
pub struct Devices {
    units: Vec<Device>,
}

impl Devices {
    pub fn new() -> Self {
        let units = (0..UNIT_COUNT)
            .filter_map(|unit| DeviceKind::for_unit(unit).map(|kind| Device::new(unit, kind)))
            .collect();
        Devices { units }
    }

    pub fn get(&self, unit: u8) -> Option<&Device> {
        self.units.get(unit as usize)
    }

    pub fn get_mut(&mut self, unit: u8) -> Option<&mut Device> {
        self.units.get_mut(unit as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.units.iter()
    }

    pub(crate) fn settle(&mut self, clock: u64) {
        for device in &mut self.units {
            device.settle(clock);
        }
    }
}

impl Default for Devices {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_table() {
        let devices = Devices::new();
        let expected = [
            (0, DeviceKind::Tape, 100),
            (7, DeviceKind::Tape, 100),
            (8, DeviceKind::Disk, 100),
            (15, DeviceKind::Disk, 100),
            (16, DeviceKind::CardReader, 16),
            (17, DeviceKind::CardPunch, 16),
            (18, DeviceKind::LinePrinter, 24),
            (19, DeviceKind::Typewriter, 14),
            (20, DeviceKind::PaperTape, 14),
        ];
        for (unit, kind, size) in expected {
            let device = devices.get(unit).unwrap();
            assert_eq!(device.kind(), kind);
            assert_eq!(device.kind().block_size(), size);
        }
        assert!(devices.get(21).is_none());
        assert_eq!(devices.iter().count(), 21);
    }

    #[test]
    fn busy_until_clock() {
        let mut device = Device::new(18, DeviceKind::LinePrinter);
        assert!(!device.is_busy(0));
        device.mark_busy(10);
        assert!(device.is_busy(9));
        assert!(!device.is_busy(10));
        // Querying never changes state.
        assert_eq!(device.state(), DeviceState::Busy { until: 10 });
        device.settle(9);
        assert_eq!(device.state(), DeviceState::Busy { until: 10 });
        device.settle(10);
        assert_eq!(device.state(), DeviceState::Ready);
    }

    #[test]
    fn card_records() {
        let mut reader = Device::new(16, DeviceKind::CardReader);
        reader.push_text("HELLO").unwrap();
        let words = reader.read_block(0).unwrap();
        assert_eq!(words.len(), 16);
        assert_eq!(words[0].bytes(), [8, 5, 13, 13, 16]);
        assert_eq!(words[1], Word::ZERO);
        // Exhausted input reads blanks.
        assert!(reader.read_block(0).unwrap().iter().all(|w| *w == Word::ZERO));
        assert_eq!(reader.push_text("#"), Err('#'));
        assert_eq!(
            reader.write_block(0, &words),
            Err(Fault::InvalidDevice {
                unit: 16,
                op: IoOp::Out
            })
        );
    }

    #[test]
    fn printer_output() {
        let mut printer = Device::new(18, DeviceKind::LinePrinter);
        let mut words = vec![Word::ZERO; 24];
        words[0] = Word::from_bytes(Sign::Minus, [31, 32, 33, 0, 0]).unwrap();
        printer.write_block(0, &words).unwrap();
        printer.control(0).unwrap();
        assert_eq!(printer.output_lines(), vec!["123".to_string()]);
        assert_eq!(printer.page_breaks(), &[1]);
        assert!(printer.read_block(0).is_err());
        assert!(printer.control(5).is_err());
    }

    #[test]
    fn tape_positioning() {
        let mut tape = Device::new(0, DeviceKind::Tape);
        for i in 0..3 {
            tape.push_block(vec![Word::new(i).unwrap()]);
        }
        assert_eq!(tape.read_block(0).unwrap()[0].value(), 0);
        assert_eq!(tape.read_block(0).unwrap()[0].value(), 1);
        tape.control(-1).unwrap();
        assert_eq!(tape.read_block(0).unwrap()[0].value(), 1);
        tape.control(0).unwrap();
        tape.write_block(0, &[Word::new(9).unwrap(); 100]).unwrap();
        assert_eq!(tape.blocks().len(), 1);
        assert_eq!(tape.blocks()[0].1[0].value(), 9);
    }

    #[test]
    fn tape_writes_land_at_the_head() {
        let mut tape = Device::new(1, DeviceKind::Tape);
        assert_eq!(tape.read_block(0).unwrap(), vec![Word::ZERO; 100]);
        assert_eq!(tape.read_block(0).unwrap(), vec![Word::ZERO; 100]);
        tape.write_block(0, &[Word::new(77).unwrap(); 100]).unwrap();
        assert_eq!(tape.blocks().len(), 3);

        tape.control(0).unwrap();
        assert_eq!(tape.read_block(0).unwrap()[0], Word::ZERO);
        assert_eq!(tape.read_block(0).unwrap()[0], Word::ZERO);
        assert_eq!(tape.read_block(0).unwrap()[0].value(), 77);

        // Skipping forward over unwritten tape also leaves blanks behind.
        tape.control(2).unwrap();
        tape.write_block(0, &[Word::new(5).unwrap(); 100]).unwrap();
        let blocks = tape.blocks();
        assert_eq!(blocks.len(), 6);
        assert_eq!(blocks[4].1[0], Word::ZERO);
        assert_eq!(blocks[5].1[0].value(), 5);
    }

    #[test]
    fn disk_addressed_by_x() {
        let mut disk = Device::new(8, DeviceKind::Disk);
        let block = vec![Word::new(-4).unwrap(); 100];
        disk.write_block(7, &block).unwrap();
        disk.control(0).unwrap();
        assert_eq!(disk.read_block(7).unwrap(), block);
        assert_eq!(disk.read_block(3).unwrap(), vec![Word::ZERO; 100]);
    }
}
