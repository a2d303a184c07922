//! Firmware images to be programmed into the boot flash.
use std::path::Path;

use object::{
    Endianness,
    elf::{FileHeader32, PT_LOAD},
    read::elf::{FileHeader, ProgramHeader},
};

use crate::constants::flash;
use crate::error::{Error, Result};

/// Erased flash reads as all ones, so gaps and padding use this.
const FILL: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    IntelHex,
    Elf,
    Binary,
}

/// A contiguous, even-sized run of bytes to be placed at `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub base: u32,
    pub data: Vec<u8>,
}

impl FirmwareImage {
    /// A raw image, padded to a whole number of words.
    pub fn new(base: u32, mut data: Vec<u8>) -> Self {
        if data.len() % 2 == 1 {
            data.push(FILL);
        }
        FirmwareImage { base, data }
    }

    /// Keep only the first `max_bytes`, which must be even.
    pub fn truncate(&mut self, max_bytes: usize) -> Result<()> {
        if max_bytes % 2 == 1 {
            return Err(Error::Firmware(format!(
                "can only load whole words, {} bytes is odd",
                max_bytes
            )));
        }
        self.data.truncate(max_bytes);
        Ok(())
    }
}

/// Load a firmware file. Raw binaries are placed at `base`, the other
/// formats carry their own addresses.
pub fn read_firmware_from_file<P: AsRef<Path>>(path: P, base: u32) -> Result<FirmwareImage> {
    let p = path.as_ref();
    let raw = std::fs::read(p).map_err(|e| Error::Firmware(format!("{}: {}", p.display(), e)))?;
    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::IntelHex => {
            let text = std::str::from_utf8(&raw).map_err(|e| Error::Firmware(e.to_string()))?;
            read_ihex(text)
        }
        FirmwareFormat::Elf => read_elf(&raw),
        FirmwareFormat::Binary => Ok(FirmwareImage::new(base, raw)),
    }
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ["ihex", "hex", "ihx", "h86"].contains(&ext.as_str()) {
        FirmwareFormat::IntelHex
    } else if raw.starts_with(b"\x7fELF") {
        FirmwareFormat::Elf
    } else if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|c| c.is_ascii_hexdigit() || b":\r\n".contains(c))
    {
        FirmwareFormat::IntelHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_ihex(data: &str) -> Result<FirmwareImage> {
    use ihex::Record;

    let mut upper = 0u32;
    let mut chunks = vec![];
    for record in ihex::Reader::new(data) {
        match record.map_err(|e| Error::Firmware(e.to_string()))? {
            Record::Data { offset, value } => chunks.push((upper + offset as u32, value)),
            Record::ExtendedSegmentAddress(segment) => upper = (segment as u32) << 4,
            Record::ExtendedLinearAddress(high) => upper = (high as u32) << 16,
            Record::EndOfFile
            | Record::StartSegmentAddress { .. }
            | Record::StartLinearAddress(_) => (),
        }
    }
    assemble(chunks)
}

/// Collect the loadable segments at their physical addresses.
pub fn read_elf(elf_data: &[u8]) -> Result<FirmwareImage> {
    let elf_err = |e: object::read::Error| Error::Firmware(e.to_string());
    let header = FileHeader32::<Endianness>::parse(elf_data).map_err(elf_err)?;
    let endian = header.endian().map_err(elf_err)?;

    let mut chunks = vec![];
    for segment in header.program_headers(endian, elf_data).map_err(elf_err)? {
        if segment.p_type(endian) != PT_LOAD {
            continue;
        }
        let data = segment
            .data(endian, elf_data)
            .map_err(|_| Error::Firmware("can't read ELF segment data".into()))?;
        if data.is_empty() {
            continue;
        }
        let paddr = segment.p_paddr(endian);
        log::debug!("loadable segment at {:#010x}, {} bytes", paddr, data.len());
        chunks.push((paddr, data.to_vec()));
    }
    assemble(chunks)
}

/// Lay the chunks out in one buffer, which has to fit in the boot flash.
fn assemble(mut chunks: Vec<(u32, Vec<u8>)>) -> Result<FirmwareImage> {
    chunks.sort_by_key(|(addr, _)| *addr);
    let Some(base) = chunks.first().map(|(addr, _)| *addr) else {
        return Err(Error::Firmware("image contains no data".into()));
    };
    let mut end = base;
    for (addr, data) in &chunks {
        let chunk_end = u32::try_from(data.len())
            .ok()
            .and_then(|len| addr.checked_add(len))
            .ok_or_else(|| {
                Error::Firmware(format!(
                    "data at 0x{:08x} runs past the end of the address space",
                    addr
                ))
            })?;
        end = end.max(chunk_end);
    }
    if end - base > flash::SIZE {
        return Err(Error::Firmware(format!(
            "image spans 0x{:08x}..0x{:08x}, more than the 0x{:x} byte flash",
            base,
            end,
            flash::SIZE
        )));
    }

    let mut image = vec![FILL; (end - base) as usize];
    for (addr, data) in &chunks {
        let start = (addr - base) as usize;
        image[start..start + data.len()].copy_from_slice(data);
    }
    Ok(FirmwareImage::new(base, image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_guessing() {
        assert_eq!(
            guess_format(Path::new("fw.HEX"), b"whatever"),
            FirmwareFormat::IntelHex
        );
        assert_eq!(
            guess_format(Path::new("fw"), b":00000001FF\r\n"),
            FirmwareFormat::IntelHex
        );
        assert_eq!(
            guess_format(Path::new("fw.elf"), b"\x7fELF\x01\x02"),
            FirmwareFormat::Elf
        );
        assert_eq!(
            guess_format(Path::new("fw.bin"), &[0x4e, 0x71]),
            FirmwareFormat::Binary
        );
        assert_eq!(guess_format(Path::new("empty"), &[]), FirmwareFormat::Binary);
    }

    #[test]
    fn ihex_with_gap_and_extended_address() {
        let text = "\
:020000040001F9
:040000001122334452
:02000600AABB93
:00000001FF
";
        let image = read_ihex(text).unwrap();
        assert_eq!(image.base, 0x0001_0000);
        assert_eq!(image.data, vec![0x11, 0x22, 0x33, 0x44, 0xff, 0xff, 0xaa, 0xbb]);
    }

    #[test]
    fn odd_binary_is_padded() {
        let image = FirmwareImage::new(0, vec![1, 2, 3]);
        assert_eq!(image.data, vec![1, 2, 3, 0xff]);
    }

    #[test]
    fn truncation_must_be_even() {
        let mut image = FirmwareImage::new(0, vec![0; 8]);
        assert!(image.truncate(3).is_err());
        image.truncate(4).unwrap();
        assert_eq!(image.data.len(), 4);
        image.truncate(100).unwrap();
        assert_eq!(image.data.len(), 4);
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(read_ihex(":00000001FF\n").is_err());
    }

    #[test]
    fn record_past_4g_is_rejected() {
        let text = "\
:02000004FFFFFC
:10FFF800000102030405060708090A0B0C0D0E0F81
:00000001FF
";
        assert!(matches!(read_ihex(text), Err(Error::Firmware(_))));
    }

    #[test]
    fn sparse_image_must_fit_in_flash() {
        let sparse = vec![(0, vec![1, 2]), (0x7fff_0000, vec![3, 4])];
        assert!(matches!(assemble(sparse), Err(Error::Firmware(_))));

        let full = vec![(0x1f_fffe, vec![3, 4]), (0, vec![1, 2])];
        let image = assemble(full).unwrap();
        assert_eq!(image.base, 0);
        assert_eq!(image.data.len(), flash::SIZE as usize);
        assert_eq!(image.data[..3], [1, 2, 0xff]);
        assert_eq!(image.data[image.data.len() - 2..], [3, 4]);
    }

    #[test]
    fn garbage_elf_is_rejected() {
        assert!(read_elf(b"\x7fELF").is_err());
    }
}
