//! Partition packs and partition discovery.
//!
//! An MXF file is a chain of partitions: a header partition, optional body
//! partitions and usually a footer partition. Each partition pack records
//! the layout of the file (metadata and index byte counts, body/index
//! stream ids, essence container labels) and links to its neighbours.

use crate::error::{MxfError, Result};
use crate::klv::KlvFile;
use crate::ul::{labels, Ul};
use byteorder::{BigEndian, ByteOrder};

/// Maximum run-in before the header partition pack key.
const MAX_RUN_IN: u64 = 65536;

/// Partition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// Header partition.
    Header,
    /// Body partition.
    Body,
    /// Footer partition.
    Footer,
}

/// A decoded partition pack.
#[derive(Debug, Clone)]
pub struct PartitionPack {
    /// Partition kind.
    pub kind: PartitionKind,
    /// Whether the partition is closed.
    pub closed: bool,
    /// Whether the partition's header metadata is complete.
    pub complete: bool,
    /// Major version (should be 1).
    pub major_version: u16,
    /// Minor version (should be 2 or 3).
    pub minor_version: u16,
    /// KAG size (key alignment grid).
    pub kag_size: u32,
    /// This partition's offset in the file.
    pub this_partition: u64,
    /// Previous partition offset.
    pub previous_partition: u64,
    /// Footer partition offset (0 = unknown).
    pub footer_partition: u64,
    /// Byte count of header metadata following the partition pack.
    pub header_byte_count: u64,
    /// Byte count of index segments following the header metadata.
    pub index_byte_count: u64,
    /// Index stream id.
    pub index_sid: u32,
    /// Body offset of the essence in this partition.
    pub body_offset: u64,
    /// Essence stream id.
    pub body_sid: u32,
    /// Operational pattern label.
    pub operational_pattern: Ul,
    /// Essence container labels.
    pub essence_containers: Vec<Ul>,
}

impl PartitionPack {
    /// Decode a partition pack from its key and value bytes.
    pub fn parse(key: Ul, value: &[u8], offset: u64) -> Result<Self> {
        if !key.is_partition_pack() {
            return Err(MxfError::InvalidFile(format!(
                "Key at offset {} is not a partition pack",
                offset
            )));
        }
        if value.len() < 88 {
            return Err(MxfError::InvalidFile(format!(
                "Partition pack at offset {} too short ({} bytes)",
                offset,
                value.len()
            )));
        }

        let kind = match key.as_bytes()[13] {
            0x02 => PartitionKind::Header,
            0x03 => PartitionKind::Body,
            0x04 => PartitionKind::Footer,
            other => {
                return Err(MxfError::InvalidFile(format!(
                    "Unknown partition kind byte 0x{:02x}",
                    other
                )))
            }
        };

        let mut op = [0u8; 16];
        op.copy_from_slice(&value[64..80]);

        let mut essence_containers = Vec::new();
        let count = BigEndian::read_u32(&value[80..]);
        let size = BigEndian::read_u32(&value[84..]);
        if count > 0 {
            if size != 16 || 88 + count as usize * 16 > value.len() {
                return Err(MxfError::InvalidFile(
                    "Partition pack essence container batch malformed".into(),
                ));
            }
            for chunk in value[88..88 + count as usize * 16].chunks_exact(16) {
                let mut label = [0u8; 16];
                label.copy_from_slice(chunk);
                essence_containers.push(Ul::new(label));
            }
        }

        Ok(Self {
            kind,
            closed: key.is_closed_partition(),
            complete: key.is_complete_partition(),
            major_version: BigEndian::read_u16(value),
            minor_version: BigEndian::read_u16(&value[2..]),
            kag_size: BigEndian::read_u32(&value[4..]),
            this_partition: BigEndian::read_u64(&value[8..]),
            previous_partition: BigEndian::read_u64(&value[16..]),
            footer_partition: BigEndian::read_u64(&value[24..]),
            header_byte_count: BigEndian::read_u64(&value[32..]),
            index_byte_count: BigEndian::read_u64(&value[40..]),
            index_sid: BigEndian::read_u32(&value[48..]),
            body_offset: BigEndian::read_u64(&value[52..]),
            body_sid: BigEndian::read_u32(&value[60..]),
            operational_pattern: Ul::new(op),
            essence_containers,
        })
    }
}

/// Read and decode the partition pack at `offset`.
pub fn read_partition_at(file: &mut KlvFile, offset: u64) -> Result<PartitionPack> {
    file.seek(offset)?;
    let kl = file
        .read_kl()?
        .ok_or_else(|| MxfError::InvalidFile(format!("No partition pack at offset {}", offset)))?;
    if !kl.key.is_partition_pack() {
        return Err(MxfError::InvalidFile(format!(
            "Key at offset {} is not a partition pack",
            offset
        )));
    }
    let value = file.read_value(kl.len)?;
    PartitionPack::parse(kl.key, &value, offset)
}

/// Find and read the header partition at the start of the file.
///
/// Seekable sources scan up to 64 KiB of run-in for the partition pack key;
/// non-seekable sources must start with it directly.
pub fn read_header_partition(file: &mut KlvFile) -> Result<PartitionPack> {
    let kl = file
        .read_kl()?
        .ok_or_else(|| MxfError::InvalidFile("Empty file".into()))?;

    if kl.key.is_header_partition() {
        let value = file.read_value(kl.len)?;
        return PartitionPack::parse(kl.key, &value, kl.offset);
    }

    if !file.is_seekable() {
        return Err(MxfError::InvalidFile(
            "File does not start with a header partition pack".into(),
        ));
    }

    // scan the run-in for the partition pack key
    file.seek(0)?;
    let mut window = vec![0u8; (MAX_RUN_IN + 16) as usize];
    let mut filled = 0usize;
    while filled < window.len() {
        let n = file.source_mut().read(&mut window[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    window.truncate(filled);

    for start in 0..window.len().saturating_sub(16) {
        if window[start..start + 10] == labels::PARTITION_PREFIX[..10] && window[start + 13] == 0x02 {
            return read_partition_at(file, start as u64);
        }
    }

    Err(MxfError::InvalidFile(
        "Failed to find and read header partition".into(),
    ))
}

/// Read all partitions by walking the previous-partition chain back from
/// the footer. Returns `None` when the file is incomplete (the header does
/// not record a footer offset, or the chain is broken).
pub fn read_all_partitions(file: &mut KlvFile, header: &PartitionPack) -> Result<Option<Vec<PartitionPack>>> {
    if header.footer_partition == 0 {
        return Ok(None);
    }

    let mut partitions = Vec::new();
    let mut offset = header.footer_partition;
    loop {
        let partition = match read_partition_at(file, offset) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Failed to read partition at offset {}: {}", offset, e);
                return Ok(None);
            }
        };
        let previous = partition.previous_partition;
        partitions.push(partition);

        if offset == 0 {
            break;
        }
        if previous >= offset {
            log::warn!("Partition chain does not descend at offset {}", offset);
            return Ok(None);
        }
        offset = previous;
    }

    partitions.reverse();
    Ok(Some(partitions))
}

/// Read the footer partition, following the header's footer offset or,
/// failing that, the random index pack at the end of the file.
pub fn read_footer_partition(file: &mut KlvFile, header: &PartitionPack) -> Result<Option<PartitionPack>> {
    let mut offset = header.footer_partition;
    if offset == 0 {
        if let Some(entries) = read_rip(file)? {
            if let Some(&(_, last_offset)) = entries.last() {
                offset = last_offset;
            }
        }
    }
    if offset == 0 {
        return Ok(None);
    }

    match read_partition_at(file, offset) {
        Ok(partition) if partition.kind == PartitionKind::Footer => Ok(Some(partition)),
        Ok(_) => Ok(None),
        Err(e) => {
            log::warn!("Failed to read footer partition: {}", e);
            Ok(None)
        }
    }
}

/// Probe for the random index pack at the end of the file. Returns the
/// `(body_sid, byte offset)` entries when present.
pub fn read_rip(file: &mut KlvFile) -> Result<Option<Vec<(u32, u64)>>> {
    let size = match file.size()? {
        Some(size) if size >= 20 => size,
        _ => return Ok(None),
    };

    file.seek(size - 4)?;
    let mut length_bytes = [0u8; 4];
    file.source_mut().read_exact(&mut length_bytes)?;
    let overall_length = BigEndian::read_u32(&length_bytes) as u64;
    if overall_length < 20 || overall_length > size {
        return Ok(None);
    }

    let rip_offset = size - overall_length;
    file.seek(rip_offset)?;
    let kl = match file.read_kl()? {
        Some(kl) if kl.key.is_random_index_pack() => kl,
        _ => return Ok(None),
    };

    let value = file.read_value(kl.len)?;
    if value.len() < 4 || (value.len() - 4) % 12 != 0 {
        return Ok(None);
    }

    let mut entries = Vec::new();
    for chunk in value[..value.len() - 4].chunks_exact(12) {
        let body_sid = BigEndian::read_u32(chunk);
        let offset = BigEndian::read_u64(&chunk[4..]);
        entries.push((body_sid, offset));
    }
    log::debug!("Found random index pack with {} entries", entries.len());
    Ok(Some(entries))
}
