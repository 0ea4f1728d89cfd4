// 8.3 short names and the 32-byte directory record

use super::constants::*;
use super::timestamps::FatTimestamp;
use byteorder::{ByteOrder, LittleEndian};
use kfat_core::{FatError, FatResult};
use serde::Serialize;
use std::fmt;

/// Directory entry attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Attributes(pub u8);

impl Attributes {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME_ID: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;
    /// Long-file-name slot marker (READ_ONLY | HIDDEN | SYSTEM | VOLUME_ID).
    pub const LONG_NAME: u8 = 0x0F;

    pub fn archive() -> Self {
        Attributes(Self::ARCHIVE)
    }

    pub fn volume_label() -> Self {
        Attributes(Self::VOLUME_ID)
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn is_long_name(&self) -> bool {
        self.0 & 0x3F == Self::LONG_NAME
    }

    pub fn is_volume_label(&self) -> bool {
        !self.is_long_name() && self.contains(Self::VOLUME_ID)
    }

    pub fn is_directory(&self) -> bool {
        !self.is_long_name() && self.contains(Self::DIRECTORY)
    }
}

/// A validated, space padded 8.3 name as stored on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName([u8; 11]);

impl ShortName {
    /// Build from a user-supplied name such as `readme.txt`.
    ///
    /// Lowercase letters are folded to uppercase. The base may be 1-8 and the
    /// extension 0-3 characters from the DOS short-name set.
    pub fn parse(name: &str) -> FatResult<Self> {
        let invalid = |why: &str| FatError::InvalidName(format!("{:?}: {}", name, why));

        if name.is_empty() || name == "." || name == ".." {
            return Err(invalid("reserved or empty name"));
        }

        let upper = name.to_ascii_uppercase();
        let (base, ext) = match upper.split_once('.') {
            Some((base, ext)) => (base, ext),
            None => (upper.as_str(), ""),
        };

        if base.is_empty() {
            return Err(invalid("empty base name"));
        }
        if base.len() > 8 {
            return Err(invalid("base name longer than 8 characters"));
        }
        if ext.len() > 3 {
            return Err(invalid("extension longer than 3 characters"));
        }
        if ext.contains('.') {
            return Err(invalid("more than one dot"));
        }

        let mut raw = [0x20u8; 11];
        for (i, byte) in base.bytes().enumerate() {
            if !is_valid_short_char(byte) {
                return Err(invalid("character not allowed in a short name"));
            }
            raw[i] = byte;
        }
        for (i, byte) in ext.bytes().enumerate() {
            if !is_valid_short_char(byte) {
                return Err(invalid("character not allowed in a short name"));
            }
            raw[8 + i] = byte;
        }

        Ok(ShortName(raw))
    }

    pub fn from_raw(raw: [u8; 11]) -> Self {
        ShortName(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }
}

fn is_valid_short_char(c: u8) -> bool {
    matches!(
        c,
        b'A'..=b'Z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'-'
            | b'@'
            | b'^'
            | b'_'
            | b'`'
            | b'{'
            | b'}'
            | b'~'
    )
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(12);
        for (i, &byte) in self.0[..8].iter().enumerate() {
            if byte == b' ' {
                break;
            }
            out.push(if i == 0 && byte == DIR_ENTRY_KANJI_E5 { '\u{E5}' } else { byte as char });
        }
        let ext: String = self.0[8..]
            .iter()
            .take_while(|&&b| b != b' ')
            .map(|&b| b as char)
            .collect();
        if !ext.is_empty() {
            out.push('.');
            out.push_str(&ext);
        }
        f.write_str(&out)
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for ShortName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One 32-byte directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: ShortName,
    pub attributes: Attributes,
    pub nt_reserved: u8,
    pub create_time_tenth: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub last_access_date: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster: u32,
    pub file_size: u32,
}

impl DirEntry {
    /// Fresh entry stamped with the current time.
    pub fn new(name: ShortName, attributes: Attributes, first_cluster: u32, file_size: u32) -> Self {
        let now = FatTimestamp::now();
        DirEntry {
            name,
            attributes,
            nt_reserved: 0,
            create_time_tenth: 0,
            create_time: now.time,
            create_date: now.date,
            last_access_date: now.date,
            write_time: now.time,
            write_date: now.date,
            first_cluster,
            file_size,
        }
    }

    pub fn parse(buf: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&buf[0..11]);
        let hi = LittleEndian::read_u16(&buf[20..22]) as u32;
        let lo = LittleEndian::read_u16(&buf[26..28]) as u32;

        DirEntry {
            name: ShortName(name),
            attributes: Attributes(buf[11]),
            nt_reserved: buf[12],
            create_time_tenth: buf[13],
            create_time: LittleEndian::read_u16(&buf[14..16]),
            create_date: LittleEndian::read_u16(&buf[16..18]),
            last_access_date: LittleEndian::read_u16(&buf[18..20]),
            write_time: LittleEndian::read_u16(&buf[22..24]),
            write_date: LittleEndian::read_u16(&buf[24..26]),
            first_cluster: (hi << 16) | lo,
            file_size: LittleEndian::read_u32(&buf[28..32]),
        }
    }

    /// Encode the full record into `buf[..32]`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..11].copy_from_slice(&self.name.0);
        buf[11] = self.attributes.0;
        buf[12] = self.nt_reserved;
        buf[13] = self.create_time_tenth;
        LittleEndian::write_u16(&mut buf[14..16], self.create_time);
        LittleEndian::write_u16(&mut buf[16..18], self.create_date);
        LittleEndian::write_u16(&mut buf[18..20], self.last_access_date);
        LittleEndian::write_u16(&mut buf[20..22], (self.first_cluster >> 16) as u16);
        LittleEndian::write_u16(&mut buf[22..24], self.write_time);
        LittleEndian::write_u16(&mut buf[24..26], self.write_date);
        LittleEndian::write_u16(&mut buf[26..28], (self.first_cluster & 0xFFFF) as u16);
        LittleEndian::write_u32(&mut buf[28..32], self.file_size);
    }

    pub fn touch(&mut self) {
        let now = FatTimestamp::now();
        self.write_time = now.time;
        self.write_date = now.date;
        self.last_access_date = now.date;
    }

    pub fn modified(&self) -> FatTimestamp {
        FatTimestamp {
            date: self.write_date,
            time: self.write_time,
        }
    }

    pub fn is_file(&self) -> bool {
        !self.attributes.is_volume_label() && !self.attributes.is_directory()
    }
}

/// What a raw slot holds, judged by its first name byte and attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    End,
    Erased,
    LongName,
    VolumeLabel,
    Entry,
}

pub fn classify_slot(buf: &[u8]) -> SlotKind {
    match buf[0] {
        DIR_ENTRY_END => SlotKind::End,
        DIR_ENTRY_ERASED => SlotKind::Erased,
        _ => {
            let attrs = Attributes(buf[11]);
            if attrs.is_long_name() {
                SlotKind::LongName
            } else if attrs.is_volume_label() {
                SlotKind::VolumeLabel
            } else {
                SlotKind::Entry
            }
        }
    }
}
