//! Per-field sort-maps (`.srt`).
//!
//! A sort-map is the precomputed ordering of a segment's documents for one
//! sortable field, stored as an array of little-endian `u32` document ids.
//!
//! ```text
//! magic u32 | version u32 | field_count varint
//! ( field string | offset u64 | size u64 )*      directory
//! region bytes*                                  regions, in directory order
//! crc32
//! ```
//!
//! Offsets are absolute file offsets.

use ahash::AHashMap;

use crate::error::{Result, SegmergeError};
use crate::segment::{DocId, FORMAT_VERSION, SORT_EXT, SegmentId};
use crate::storage::structured::{StructWriter, read_checked_file};
use crate::storage::{Storage, StorageOutput};
use crate::util::varint::{self, VarIntCursor};

/// Magic number for sort-map files ("SRT1").
pub const SORT_MAP_MAGIC: u32 = 0x53525431;

const DOC_ID_WIDTH: usize = std::mem::size_of::<DocId>();

/// Location of one field's sort array inside a `.srt` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortMapRegion {
    pub offset: u64,
    pub size: u64,
}

impl SortMapRegion {
    /// Number of document ids in the region.
    pub fn len(&self) -> usize {
        self.size as usize / DOC_ID_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Decode a region's bytes into document ids.
pub fn decode_doc_ids(bytes: &[u8]) -> Result<Vec<DocId>> {
    if bytes.len() % DOC_ID_WIDTH != 0 {
        return Err(SegmergeError::corrupt(format!(
            "sort-map region of {} bytes is not a whole number of document ids",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(DOC_ID_WIDTH)
        .map(|chunk| DocId::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Collects sort arrays per field and writes the `.srt` file on close.
pub struct SortMapWriter {
    output: Box<dyn StorageOutput>,
    fields: Vec<(String, Vec<u8>)>,
    index: AHashMap<String, usize>,
}

impl SortMapWriter {
    pub fn new(output: Box<dyn StorageOutput>) -> Self {
        SortMapWriter {
            output,
            fields: Vec::new(),
            index: AHashMap::new(),
        }
    }

    fn region_mut(&mut self, field: &str) -> &mut Vec<u8> {
        let slot = match self.index.get(field) {
            Some(&slot) => slot,
            None => {
                self.fields.push((field.to_string(), Vec::new()));
                self.index.insert(field.to_string(), self.fields.len() - 1);
                self.fields.len() - 1
            }
        };
        &mut self.fields[slot].1
    }

    /// Declare a field so it is present even if no ids are appended.
    pub fn declare_field(&mut self, field: &str) {
        self.region_mut(field);
    }

    /// Append document ids to the end of a field's sort array.
    pub fn append_doc_ids(&mut self, field: &str, doc_ids: &[DocId]) {
        let region = self.region_mut(field);
        region.reserve(doc_ids.len() * DOC_ID_WIDTH);
        for doc_id in doc_ids {
            region.extend_from_slice(&doc_id.to_le_bytes());
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Write directory and regions, then close. Returns the file size.
    pub fn finish(self) -> Result<u64> {
        // The directory size depends only on field names, so region offsets
        // can be computed before anything is written.
        let mut directory_len = 8 + varint::encode_u64(self.fields.len() as u64).len() as u64;
        for (field, _) in &self.fields {
            let name_len = field.len() as u64;
            directory_len += varint::encode_u64(name_len).len() as u64 + name_len + 16;
        }

        let mut writer = StructWriter::new(self.output);
        writer.write_u32(SORT_MAP_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_varint(self.fields.len() as u64)?;

        let mut offset = directory_len;
        for (field, region) in &self.fields {
            writer.write_string(field)?;
            writer.write_u64(offset)?;
            writer.write_u64(region.len() as u64)?;
            offset += region.len() as u64;
        }
        debug_assert_eq!(writer.position(), directory_len);

        for (_, region) in &self.fields {
            writer.write_raw(region)?;
        }
        writer.close()
    }
}

/// Read access to one segment's sort-maps.
pub struct SortMapReader {
    segment: SegmentId,
    data: Vec<u8>,
    directory: AHashMap<String, SortMapRegion>,
    fields: Vec<String>,
}

impl SortMapReader {
    /// Load and validate the sort-map file of `segment`.
    pub fn open(storage: &dyn Storage, segment: SegmentId) -> Result<Self> {
        let name = segment.file_name(SORT_EXT);
        let data = read_checked_file(storage, &name)?;

        let corrupt = |problem: &str| SegmergeError::corrupt(format!("{name}: {problem}"));

        if data.len() < 8 {
            return Err(corrupt("missing header"));
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if magic != SORT_MAP_MAGIC {
            return Err(corrupt("bad sort-map magic"));
        }
        if version != FORMAT_VERSION {
            return Err(corrupt("unsupported sort-map version"));
        }

        let mut cursor = VarIntCursor::new(&data[8..]);
        let field_count = cursor.read_u64()?;
        let mut pos = 8 + cursor.position();

        let mut directory = AHashMap::new();
        let mut fields = Vec::new();
        for _ in 0..field_count {
            let mut cursor = VarIntCursor::new(&data[pos..]);
            let name_len = cursor.read_u64()? as usize;
            pos += cursor.position();

            let fixed_end = pos
                .checked_add(name_len)
                .and_then(|end| end.checked_add(16))
                .filter(|&end| end <= data.len())
                .ok_or_else(|| corrupt("truncated directory"))?;
            let field = std::str::from_utf8(&data[pos..pos + name_len])
                .map_err(|_| corrupt("field name is not UTF-8"))?
                .to_string();
            pos += name_len;

            let offset = u64::from_le_bytes(slice8(&data[pos..pos + 8]));
            let size = u64::from_le_bytes(slice8(&data[pos + 8..fixed_end]));
            pos = fixed_end;

            let in_bounds = offset
                .checked_add(size)
                .is_some_and(|end| end <= data.len() as u64);
            if !in_bounds {
                return Err(corrupt("sort-map region outside the file"));
            }
            if size as usize % DOC_ID_WIDTH != 0 {
                return Err(corrupt("sort-map region size is not a multiple of 4"));
            }
            if directory
                .insert(field.clone(), SortMapRegion { offset, size })
                .is_some()
            {
                return Err(corrupt("duplicate field in directory"));
            }
            fields.push(field);
        }

        Ok(SortMapReader {
            segment,
            data,
            directory,
            fields,
        })
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Fields with a sort-map in this segment, in directory order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Region holding the sort array of `field`, or `None` if the segment
    /// has no sort-map for it.
    pub fn read_field_sortmap(&self, field: &str) -> Option<SortMapRegion> {
        self.directory.get(field).copied()
    }

    /// Raw bytes of a region returned by [`read_field_sortmap`].
    ///
    /// [`read_field_sortmap`]: SortMapReader::read_field_sortmap
    pub fn read_region(&self, region: SortMapRegion) -> Result<&[u8]> {
        let start = region.offset as usize;
        let end = region
            .offset
            .checked_add(region.size)
            .filter(|&end| end <= self.data.len() as u64)
            .ok_or_else(|| {
                SegmergeError::corrupt(format!(
                    "{}: region {}+{} outside sort-map file",
                    self.segment, region.offset, region.size
                ))
            })? as usize;
        Ok(&self.data[start..end])
    }

    /// Decoded sort array of `field`, empty when the field is absent.
    pub fn doc_ids(&self, field: &str) -> Result<Vec<DocId>> {
        match self.read_field_sortmap(field) {
            Some(region) => decode_doc_ids(self.read_region(region)?),
            None => Ok(Vec::new()),
        }
    }
}

fn slice8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}
