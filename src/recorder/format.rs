//! FDPREC binary layout: file header, per-frame disk header, and the
//! manual little-endian primitives the rest of the recorder builds on
//! (spec §4.11, §6).
//!
//! No byteorder dependency: every integer in this format is fixed-size
//! little-endian, which is simple enough to hand-roll with
//! `to_le_bytes`/`from_le_bytes`, and doing so keeps the wire layout under
//! this crate's direct control rather than a serde derive's.

use std::io::{Read, Write};

use crate::error::{EcsError, Result};
use crate::type_registry::ComponentId;

/// 6-byte ASCII magic opening every FDPREC file.
pub const MAGIC: [u8; 6] = *b"FDPREC";

/// Bumped on any storage or frame-stream change; recordings are not
/// forward/backward compatible across versions (spec §9).
pub const FORMAT_VERSION: u32 = 1;

pub const FRAME_KIND_DELTA: u8 = 0;
pub const FRAME_KIND_KEYFRAME: u8 = 1;

/// Host-supplied knobs left external to the recorder itself
/// (`SPEC_FULL.md` §4.12). Grounded in `config.rs`'s `PersistenceConfig`:
/// both are plain numeric settings with no validation beyond their type.
#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    /// Forwarded to `lz4_flex`'s block compressor. `0` uses the crate's
    /// default effort.
    pub compression_level: i32,
    /// Advisory cadence a host scheduler may use to decide when to request
    /// a keyframe instead of a delta. The recorder itself has no timer and
    /// never reads this field.
    pub keyframe_interval_ticks: Option<u64>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            compression_level: 0,
            keyframe_interval_ticks: None,
        }
    }
}

pub(super) fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub(super) fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(super) fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(super) fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(super) fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(super) fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_i32(buf, bytes.len() as i32);
    buf.extend_from_slice(bytes);
}

pub(super) fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

/// A cursor over an in-memory frame payload, used by both the writer's own
/// self-checks and the reader.
pub(super) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(super) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(EcsError::CorruptFrame(format!(
                "expected {n} more bytes at offset {}, only {} remain",
                self.pos,
                self.bytes.len() - self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(super) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(super) fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub(super) fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub(super) fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub(super) fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub(super) fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(EcsError::CorruptFrame(format!("negative byte length {len}")));
        }
        self.take(len as usize)
    }

    pub(super) fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EcsError::CorruptFrame(format!("non-utf8 type name: {e}")))
    }

    pub(super) fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub(super) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Writes the file-level header: magic, format version, creation
/// timestamp. Callers stamp `created_timestamp` themselves since this
/// crate cannot call `SystemTime::now()` in a way that stays deterministic
/// for its own tests.
pub fn write_file_header<W: Write>(writer: &mut W, created_timestamp: i64) -> Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&created_timestamp.to_le_bytes())?;
    Ok(())
}

/// Reads and validates the file-level header, returning its creation
/// timestamp. Fails with `FormatMismatch` on any magic or version
/// mismatch (spec: "recordings are not backward compatible").
pub fn read_file_header<R: Read>(reader: &mut R) -> Result<i64> {
    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    let version = u32::from_le_bytes(version_bytes);
    if magic != MAGIC || version != FORMAT_VERSION {
        return Err(EcsError::FormatMismatch {
            expected_magic: MAGIC,
            expected_version: FORMAT_VERSION,
            found_magic: magic,
            found_version: version,
        });
    }
    let mut ts_bytes = [0u8; 8];
    reader.read_exact(&mut ts_bytes)?;
    Ok(i64::from_le_bytes(ts_bytes))
}

/// `[compressed_len][uncompressed_len][tick][kind]` preceding one frame's
/// LZ4 bytes. `tick`/`kind` duplicate the leading fields of the compressed
/// payload so a reader can index frames without decompressing them (spec
/// §6).
pub(super) fn write_frame_disk_header<W: Write>(
    writer: &mut W,
    compressed_len: i32,
    uncompressed_len: i32,
    tick: u64,
    kind: u8,
) -> Result<()> {
    writer.write_all(&compressed_len.to_le_bytes())?;
    writer.write_all(&uncompressed_len.to_le_bytes())?;
    writer.write_all(&tick.to_le_bytes())?;
    writer.write_all(&[kind])?;
    Ok(())
}

/// Returns `(compressed_len, uncompressed_len, tick, kind)`, or `Ok(None)`
/// if the stream is exhausted (clean end of file between frames).
pub(super) fn read_frame_disk_header<R: Read>(
    reader: &mut R,
) -> Result<Option<(i32, i32, u64, u8)>> {
    let mut compressed_len_bytes = [0u8; 4];
    match reader.read(&mut compressed_len_bytes)? {
        0 => return Ok(None),
        4 => {}
        n => {
            reader.read_exact(&mut compressed_len_bytes[n..])?;
        }
    }
    let compressed_len = i32::from_le_bytes(compressed_len_bytes);
    let mut uncompressed_len_bytes = [0u8; 4];
    reader.read_exact(&mut uncompressed_len_bytes)?;
    let uncompressed_len = i32::from_le_bytes(uncompressed_len_bytes);
    let mut tick_bytes = [0u8; 8];
    reader.read_exact(&mut tick_bytes)?;
    let tick = u64::from_le_bytes(tick_bytes);
    let mut kind_byte = [0u8; 1];
    reader.read_exact(&mut kind_byte)?;
    Ok(Some((compressed_len, uncompressed_len, tick, kind_byte[0])))
}

/// One destroyed-entity record in a delta frame's destruction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyedEntry {
    pub index: u32,
    pub generation: u16,
}

/// `type_id = -1` identifies `EntityIndex` header chunks within a chunk
/// blob (spec §4.11).
pub const ENTITY_INDEX_TYPE_ID: i32 = -1;

/// One `{type_id, length, bytes}` record, reused for singleton blobs and
/// for the per-component entries nested inside a chunk blob.
pub struct TypedBlob {
    pub type_id: i32,
    pub bytes: Vec<u8>,
}

/// One physical chunk's worth of component bytes. Distinct component
/// tables chunk at different element counts per their own byte budget
/// (§4.2), so unlike the wire shape's literal reading, a `comps` list here
/// almost always holds exactly one entry — see `DESIGN.md` for why
/// batching multiple types under a shared `chunk_id` does not generalize
/// across differently-sized component types.
pub struct ChunkBlob {
    pub chunk_id: i32,
    pub comps: Vec<TypedBlob>,
}

/// One native event stream's raw payload.
pub struct NativeEventBlock {
    pub type_id: ComponentId,
    pub element_size: i32,
    pub bytes: Vec<u8>,
}

/// One managed event stream's codec-encoded payload: `count` values
/// concatenated back-to-back through `ReflectiveCodec::serialize_object`.
pub struct ManagedEventBlock {
    pub type_id: ComponentId,
    pub type_name: String,
    pub count: i32,
    pub bytes: Vec<u8>,
}

/// The fully decoded, uncompressed contents of one frame (spec §4.11's
/// layout table).
pub struct FramePayload {
    pub tick: u64,
    pub kind: u8,
    pub destroyed: Vec<DestroyedEntry>,
    pub native_events: Vec<NativeEventBlock>,
    pub managed_events: Vec<ManagedEventBlock>,
    pub singletons: Vec<TypedBlob>,
    pub chunks: Vec<ChunkBlob>,
}

impl FramePayload {
    pub(super) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u64(&mut buf, self.tick);
        write_u8(&mut buf, self.kind);

        write_i32(&mut buf, self.destroyed.len() as i32);
        for entry in &self.destroyed {
            write_i32(&mut buf, entry.index as i32);
            write_u16(&mut buf, entry.generation);
        }

        write_i32(&mut buf, self.native_events.len() as i32);
        for block in &self.native_events {
            write_i32(&mut buf, block.type_id as i32);
            write_i32(&mut buf, block.element_size);
            let count = if block.element_size > 0 {
                block.bytes.len() as i32 / block.element_size
            } else {
                0
            };
            write_i32(&mut buf, count);
            buf.extend_from_slice(&block.bytes);
        }

        write_i32(&mut buf, self.managed_events.len() as i32);
        for block in &self.managed_events {
            write_i32(&mut buf, block.type_id as i32);
            let mut body = Vec::new();
            write_string(&mut body, &block.type_name);
            write_i32(&mut body, block.count);
            body.extend_from_slice(&block.bytes);
            write_i32(&mut buf, 0); // "zero" reserved field (spec §4.11)
            write_i32(&mut buf, body.len() as i32);
            buf.extend_from_slice(&body);
        }

        write_i32(&mut buf, self.singletons.len() as i32);
        for blob in &self.singletons {
            write_i32(&mut buf, blob.type_id);
            write_bytes(&mut buf, &blob.bytes);
        }

        write_i32(&mut buf, self.chunks.len() as i32);
        for chunk in &self.chunks {
            write_i32(&mut buf, chunk.chunk_id);
            write_i32(&mut buf, chunk.comps.len() as i32);
            for comp in &chunk.comps {
                write_i32(&mut buf, comp.type_id);
                write_bytes(&mut buf, &comp.bytes);
            }
        }

        buf
    }

    pub(super) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let tick = r.read_u64()?;
        let kind = r.read_u8()?;

        let destroyed_count = r.read_i32()?.max(0) as usize;
        let mut destroyed = Vec::with_capacity(destroyed_count);
        for _ in 0..destroyed_count {
            let index = r.read_i32()? as u32;
            let generation = r.read_u16()?;
            destroyed.push(DestroyedEntry { index, generation });
        }

        let native_count = r.read_i32()?.max(0) as usize;
        let mut native_events = Vec::with_capacity(native_count);
        for _ in 0..native_count {
            let type_id = r.read_i32()?;
            let element_size = r.read_i32()?;
            let count = r.read_i32()?;
            let byte_len = (element_size.max(0) as usize) * (count.max(0) as usize);
            let bytes = r.take(byte_len)?.to_vec();
            native_events.push(NativeEventBlock {
                type_id: type_id as ComponentId,
                element_size,
                bytes,
            });
        }

        let managed_count = r.read_i32()?.max(0) as usize;
        let mut managed_events = Vec::with_capacity(managed_count);
        for _ in 0..managed_count {
            let type_id = r.read_i32()?;
            let _zero = r.read_i32()?;
            let block_size = r.read_i32()?.max(0) as usize;
            let body = r.take(block_size)?;
            let mut body_reader = ByteReader::new(body);
            let type_name = body_reader.read_string()?;
            let count = body_reader.read_i32()?;
            let payload_start = block_size - body_reader.remaining();
            managed_events.push(ManagedEventBlock {
                type_id: type_id as ComponentId,
                type_name,
                count,
                bytes: body[payload_start..].to_vec(),
            });
        }

        let singleton_count = r.read_i32()?.max(0) as usize;
        let mut singletons = Vec::with_capacity(singleton_count);
        for _ in 0..singleton_count {
            let type_id = r.read_i32()?;
            let bytes = r.read_bytes()?.to_vec();
            singletons.push(TypedBlob { type_id, bytes });
        }

        let chunk_count = r.read_i32()?.max(0) as usize;
        let mut chunks = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            let chunk_id = r.read_i32()?;
            let comps_count = r.read_i32()?.max(0) as usize;
            let mut comps = Vec::with_capacity(comps_count);
            for _ in 0..comps_count {
                let type_id = r.read_i32()?;
                let bytes = r.read_bytes()?.to_vec();
                comps.push(TypedBlob { type_id, bytes });
            }
            chunks.push(ChunkBlob { chunk_id, comps });
        }

        Ok(FramePayload {
            tick,
            kind,
            destroyed,
            native_events,
            managed_events,
            singletons,
            chunks,
        })
    }
}
