//! Command and data-phase descriptors.

/// Response format expected for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseType {
    /// No response.
    None,
    /// Normal response.
    R1,
    /// Normal response with busy on DAT0.
    R1b,
    /// CID/CSD, 136 bits.
    R2,
    /// OCR, no CRC.
    R3,
    /// Fast I/O.
    R4,
    /// Interrupt request.
    R5,
    /// Published RCA (SD).
    R6,
    /// Interface condition (SD).
    R7,
}

impl ResponseType {
    /// Card signals busy on DAT0 after the response.
    pub const fn busy(self) -> bool {
        matches!(self, Self::R1b)
    }

    /// 136-bit response.
    pub const fn long(self) -> bool {
        matches!(self, Self::R2)
    }
}

/// Direction of the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataDirection {
    /// Card to host.
    Read,
    /// Host to card.
    Write,
}

/// A command on the CMD line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    /// Command index (0..=63).
    pub index: u8,
    /// 32-bit argument.
    pub arg: u32,
    /// Expected response.
    pub response_type: ResponseType,
    /// Response, least significant word first. Short responses use word 0;
    /// R2 fills all four with bit 0 of word 0 being CID/CSD bit 0.
    pub response: [u32; 4],
}

impl Command {
    /// Command with an empty response buffer.
    pub const fn new(index: u8, arg: u32, response_type: ResponseType) -> Self {
        Self {
            index,
            arg,
            response_type,
            response: [0; 4],
        }
    }

    /// Word 0 of the response (card status for R1).
    pub const fn r1(&self) -> u32 {
        self.response[0]
    }
}

/// Buffer for the data phase; the variant sets the direction.
///
/// The vectored variants move consecutive blocks through each segment in
/// turn, so every segment but the last holds whole blocks.
#[derive(Debug)]
pub enum DataBuf<'a> {
    /// Blocks are read into the slice.
    Read(&'a mut [u8]),
    /// Blocks are written from the slice.
    Write(&'a [u8]),
    /// Blocks are scattered across the segments.
    ReadVectored(&'a mut [&'a mut [u8]]),
    /// Blocks are gathered from the segments.
    WriteVectored(&'a [&'a [u8]]),
}

impl<'a> DataBuf<'a> {
    /// Transfer direction.
    pub fn direction(&self) -> DataDirection {
        match self {
            Self::Read(_) | Self::ReadVectored(_) => DataDirection::Read,
            Self::Write(_) | Self::WriteVectored(_) => DataDirection::Write,
        }
    }

    /// Segment `index`; single buffers have one.
    pub fn segment(&self, index: usize) -> Option<&[u8]> {
        match self {
            Self::Read(b) => (index == 0).then_some(&**b),
            Self::Write(b) => (index == 0).then_some(*b),
            Self::ReadVectored(segs) => segs.get(index).map(|b| &**b),
            Self::WriteVectored(segs) => segs.get(index).copied(),
        }
    }

    /// Segments in transfer order.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> + use<'_, 'a> {
        (0..).map_while(move |i| self.segment(i))
    }

    /// Buffer length in bytes, over all segments.
    pub fn len(&self) -> usize {
        self.segments().map(<[u8]>::len).sum()
    }

    /// Buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Data phase of a command.
#[derive(Debug)]
pub struct CommandData<'a> {
    /// Source or destination.
    pub buf: DataBuf<'a>,
    /// Bytes per block.
    pub block_size: u32,
    /// Number of blocks.
    pub block_count: u32,
    /// Issue CMD23 ahead of a multi-block transfer.
    pub auto_cmd23: bool,
}

impl<'a> CommandData<'a> {
    /// Read `block_count` blocks of `block_size` bytes into `buf`.
    pub fn read(buf: &'a mut [u8], block_size: u32, block_count: u32) -> Self {
        Self {
            buf: DataBuf::Read(buf),
            block_size,
            block_count,
            auto_cmd23: false,
        }
    }

    /// Write `block_count` blocks of `block_size` bytes from `buf`.
    pub fn write(buf: &'a [u8], block_size: u32, block_count: u32) -> Self {
        Self {
            buf: DataBuf::Write(buf),
            block_size,
            block_count,
            auto_cmd23: false,
        }
    }

    /// Read consecutive blocks into `segs`, one segment after another.
    pub fn read_vectored(segs: &'a mut [&'a mut [u8]], block_size: u32, block_count: u32) -> Self {
        Self {
            buf: DataBuf::ReadVectored(segs),
            block_size,
            block_count,
            auto_cmd23: false,
        }
    }

    /// Write consecutive blocks gathered from `segs`.
    pub fn write_vectored(segs: &'a [&'a [u8]], block_size: u32, block_count: u32) -> Self {
        Self {
            buf: DataBuf::WriteVectored(segs),
            block_size,
            block_count,
            auto_cmd23: false,
        }
    }

    /// Total transfer length, if it fits the buffer.
    pub fn transfer_len(&self) -> Option<usize> {
        let len = usize::try_from(self.block_size.checked_mul(self.block_count)?).ok()?;
        (len <= self.buf.len()).then_some(len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn transfer_len_checks_buffer() {
        let mut buf = [0u8; 1024];
        let d = CommandData::read(&mut buf, 512, 2);
        assert_eq!(d.transfer_len(), Some(1024));
        let d = CommandData::write(&buf, 512, 3);
        assert_eq!(d.transfer_len(), None);
        let d = CommandData::write(&buf, u32::MAX, 3);
        assert_eq!(d.transfer_len(), None);
    }

    #[test]
    fn vectored_length_spans_segments() {
        let a = [0u8; 512];
        let b = [0u8; 1024];
        let segs: [&[u8]; 2] = [&a, &b];
        let d = CommandData::write_vectored(&segs, 512, 3);
        assert_eq!(d.transfer_len(), Some(1536));
        assert_eq!(d.buf.direction(), DataDirection::Write);
        assert_eq!(d.buf.segments().map(<[u8]>::len).collect::<Vec<_>>(), [512, 1024]);
        let d = CommandData::write_vectored(&segs, 512, 4);
        assert_eq!(d.transfer_len(), None);

        let mut c = [0u8; 512];
        let mut segs: [&mut [u8]; 1] = [&mut c];
        let d = CommandData::read_vectored(&mut segs, 512, 1);
        assert_eq!(d.buf.direction(), DataDirection::Read);
        assert!(d.buf.segment(1).is_none());
    }

    #[test]
    fn busy_only_for_r1b() {
        assert!(ResponseType::R1b.busy());
        assert!(!ResponseType::R1.busy());
        assert!(ResponseType::R2.long());
    }
}
