use std::io::{self, BufWriter, Read, Write};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use log::info;

use crate::types::{ContentId, ViewCounter};

/// Binary WAL format constants
const WAL_MAGIC: &[u8; 4] = b"TWAL";
const WAL_VERSION: u8 = 1;

/// Operation types
const OP_PUT: u8 = 1;

/// Header size: magic(4) + version(1) + op(1) + content_id(8) + replica_len(2) + count(8) + last_updated(8) = 32 bytes
const HEADER_SIZE: usize = 32;
/// CRC32 size
const CRC_SIZE: usize = 4;

/// WAL entry: the absolute value of one row after a mutation.
///
/// Entries carry absolute counts rather than deltas, so replaying them with a
/// max rule is idempotent and independent of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalEntry {
    Put {
        content_id: ContentId,
        replica_id: String,
        count: u64,
        last_updated: u64,
    },
}

impl WalEntry {
    /// Encode entry to binary format
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + 32 + CRC_SIZE);

        // Magic + Version
        buf.extend_from_slice(WAL_MAGIC);
        buf.push(WAL_VERSION);

        match self {
            WalEntry::Put { content_id, replica_id, count, last_updated } => {
                let replica_bytes = replica_id.as_bytes();

                buf.push(OP_PUT);
                buf.extend_from_slice(&content_id.to_le_bytes());
                buf.extend_from_slice(&(replica_bytes.len() as u16).to_le_bytes());
                buf.extend_from_slice(&count.to_le_bytes());
                buf.extend_from_slice(&last_updated.to_le_bytes());
                buf.extend_from_slice(replica_bytes);
            }
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decode entry from binary format
    fn decode(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Entry too short"));
        }

        if &data[0..4] != WAL_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Invalid magic"));
        }

        let version = data[4];
        if version != WAL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported WAL version: {}", version)
            ));
        }

        let op = data[5];
        let content_id = read_u64(&data[6..14]);
        let replica_len = u16::from_le_bytes([data[14], data[15]]) as usize;
        let count = read_u64(&data[16..24]);
        let last_updated = read_u64(&data[24..32]);

        let total_len = HEADER_SIZE + replica_len + CRC_SIZE;
        if data.len() < total_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Entry truncated"));
        }

        let stored_crc = u32::from_le_bytes([
            data[total_len - 4],
            data[total_len - 3],
            data[total_len - 2],
            data[total_len - 1],
        ]);
        let calculated_crc = crc32fast::hash(&data[..total_len - CRC_SIZE]);

        if stored_crc != calculated_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("CRC mismatch: stored={}, calculated={}", stored_crc, calculated_crc)
            ));
        }

        let replica_id = String::from_utf8_lossy(&data[HEADER_SIZE..HEADER_SIZE + replica_len]).to_string();

        let entry = match op {
            OP_PUT => WalEntry::Put {
                content_id,
                replica_id,
                count,
                last_updated,
            },
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unknown operation: {}", op)
                ));
            }
        };

        Ok((entry, total_len))
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Write-Ahead Log for counter rows (binary format)
pub struct Wal {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    enabled: bool,
}

impl Wal {
    /// Create a new WAL at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        info!("WAL initialized at {:?} (binary format v{})", path, WAL_VERSION);

        Ok(Wal {
            path,
            writer: Some(BufWriter::new(file)),
            enabled: true,
        })
    }

    /// Create a disabled WAL (in-memory only mode)
    pub fn disabled() -> Self {
        Wal {
            path: PathBuf::new(),
            writer: None,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append the new value of a row
    pub fn log_put(&mut self, content_id: ContentId, replica_id: &str, count: u64, last_updated: u64) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entry = WalEntry::Put {
            content_id,
            replica_id: replica_id.to_string(),
            count,
            last_updated,
        };
        self.append(&entry)
    }

    fn append(&mut self, entry: &WalEntry) -> io::Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.write_all(&entry.encode())?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Read all entries from the WAL file
    pub fn read_entries(&self) -> io::Result<Vec<WalEntry>> {
        if !self.enabled || !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalEntry::decode(&data[offset..]) {
                Ok((entry, consumed)) => {
                    entries.push(entry);
                    offset += consumed;
                }
                Err(e) => {
                    info!("Skipping corrupted WAL entry at offset {}: {}", offset, e);
                    // Resync on the next magic marker
                    offset += 1;
                    while offset + 4 <= data.len() {
                        if &data[offset..offset + 4] == WAL_MAGIC {
                            break;
                        }
                        offset += 1;
                    }
                    if offset + 4 > data.len() {
                        break;
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Rewrite the WAL so it holds exactly one entry per row in `snapshot`
    pub fn compact(&mut self, snapshot: &[ViewCounter]) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        self.writer = None;

        let tmp_path = self.path.with_extension("wal.compact");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);

            for row in snapshot {
                let entry = WalEntry::Put {
                    content_id: row.content_id,
                    replica_id: row.replica_id.clone(),
                    count: row.count,
                    last_updated: row.last_updated_at,
                };
                writer.write_all(&entry.encode())?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)?;
        self.writer = Some(BufWriter::new(file));

        info!("WAL compacted with {} entries (binary format)", snapshot.len());
        Ok(())
    }
}
