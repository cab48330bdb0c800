use crate::class_loader::classpath::ClassPathError;
use byteorder::{ByteOrder, LittleEndian};
use flate2::{Decompress, FlushDecompress, Status};
use skadi_common::wmap::WideMap;
use skadi_common::wstr::WString;
use std::path::Path;

// ZIP fixed-record sizes and signatures.
const EOCD_SIZE: usize = 22;
const EOCD_SIGNATURE: u32 = 0x0605_4b50; // PK\005\006
const CDR_SIZE: usize = 46;
const CDR_SIGNATURE: u32 = 0x0201_4b50; // PK\001\002
const LOCAL_HEADER_SIZE: usize = 30;
const LOCAL_SIGNATURE: u32 = 0x0403_4b50; // PK\003\004

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

struct JarEntry {
    local_header_offset: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    compressed: bool,
}

/// A JAR on disk: the file mapped read-only plus an index over its central
/// directory. Only `stored` and `deflate` entries are accepted, single-disk
/// archives only, no ZIP64 and no archive comment.
pub struct MappedJar {
    map: MappedBuffer,
    entries: WideMap<JarEntry>,
}

impl MappedJar {
    pub fn open(path: &Path) -> Result<Self, ClassPathError> {
        let map = MappedBuffer::open(path)?;
        let data = map.as_slice();

        if data.len() < EOCD_SIZE {
            return Err(ClassPathError::Corrupt(format!(
                "{}: missing end of central directory record",
                path.display()
            )));
        }
        let eocd = &data[data.len() - EOCD_SIZE..];
        if LittleEndian::read_u32(eocd) != EOCD_SIGNATURE {
            return Err(ClassPathError::Corrupt(format!(
                "{}: missing end of central directory record",
                path.display()
            )));
        }
        let disk_number = LittleEndian::read_u16(&eocd[4..]);
        let disk_with_cd = LittleEndian::read_u16(&eocd[6..]);
        let num_entries = LittleEndian::read_u16(&eocd[8..]);
        let total_entries = LittleEndian::read_u16(&eocd[10..]);
        let cd_offset = LittleEndian::read_u32(&eocd[16..]);
        if disk_number != 0 || disk_with_cd != 0 || num_entries != total_entries {
            return Err(ClassPathError::Corrupt(format!(
                "{}: multi-disk archives are not supported",
                path.display()
            )));
        }

        let entries = Self::parse_central_directory(data, cd_offset as u64, num_entries)
            .map_err(|msg| ClassPathError::Corrupt(format!("{}: {}", path.display(), msg)))?;

        Ok(MappedJar { map, entries })
    }

    fn parse_central_directory(
        data: &[u8],
        mut cd_offset: u64,
        expected: u16,
    ) -> Result<WideMap<JarEntry>, String> {
        let mut entries: WideMap<JarEntry> = WideMap::new();
        entries.reserve(expected as usize);

        for i in 0..expected {
            if cd_offset + CDR_SIZE as u64 > data.len() as u64 {
                return Err(format!("central directory record {} out of bounds", i));
            }
            let cdr = &data[cd_offset as usize..cd_offset as usize + CDR_SIZE];
            if LittleEndian::read_u32(cdr) != CDR_SIGNATURE {
                return Err("missing central directory record signature".to_string());
            }
            let compression = LittleEndian::read_u16(&cdr[10..]);
            let compressed_size = LittleEndian::read_u32(&cdr[20..]);
            let uncompressed_size = LittleEndian::read_u32(&cdr[24..]);
            let filename_len = LittleEndian::read_u16(&cdr[28..]) as u64;
            let extra_len = LittleEndian::read_u16(&cdr[30..]) as u64;
            let comment_len = LittleEndian::read_u16(&cdr[32..]) as u64;
            let local_header_offset = LittleEndian::read_u32(&cdr[42..]);

            if cd_offset + CDR_SIZE as u64 + filename_len > data.len() as u64 {
                return Err(format!("file name of record {} out of bounds", i));
            }
            let filename_bytes = &data[cd_offset as usize + CDR_SIZE
                ..cd_offset as usize + CDR_SIZE + filename_len as usize];

            if local_header_offset as u64 + LOCAL_HEADER_SIZE as u64 + compressed_size as u64
                > data.len() as u64
            {
                return Err(format!("record {} local header out of bounds", i));
            }
            if compression != METHOD_STORED && compression != METHOD_DEFLATE {
                return Err(format!(
                    "record {} has unsupported compression method {} (supported: 0, 8)",
                    i, compression
                ));
            }

            let filename = WString::from_bytes_lossy(filename_bytes);
            let entry = JarEntry {
                local_header_offset,
                compressed_size,
                uncompressed_size,
                compressed: compression == METHOD_DEFLATE,
            };
            if entries.insert(filename.units(), entry).is_some() {
                return Err(format!("duplicate file name in archive: {}", filename));
            }

            cd_offset += CDR_SIZE as u64 + filename_len + extra_len + comment_len;
        }
        Ok(entries)
    }

    /// Looks an entry up by name and materialises its bytes, inflating
    /// deflated entries through a raw (headerless) DEFLATE stream.
    pub fn lookup(&self, filename: &str) -> Result<Option<Vec<u8>>, ClassPathError> {
        let key = WString::from(filename);
        let Some(entry) = self.entries.get(key.units()) else {
            return Ok(None);
        };
        let data = self.map.as_slice();

        let header_offset = entry.local_header_offset as usize;
        let header = &data[header_offset..header_offset + LOCAL_HEADER_SIZE];
        if LittleEndian::read_u32(header) != LOCAL_SIGNATURE {
            return Err(ClassPathError::Corrupt(format!(
                "{}: bad local header signature",
                filename
            )));
        }
        let filename_len = LittleEndian::read_u16(&header[26..]) as usize;
        let extra_len = LittleEndian::read_u16(&header[28..]) as usize;
        let data_offset = header_offset + LOCAL_HEADER_SIZE + filename_len + extra_len;
        if data_offset as u64 + entry.compressed_size as u64 > data.len() as u64 {
            return Err(ClassPathError::Corrupt(format!(
                "{}: entry data out of bounds",
                filename
            )));
        }
        let payload = &data[data_offset..data_offset + entry.compressed_size as usize];

        if !entry.compressed {
            if entry.compressed_size != entry.uncompressed_size {
                return Err(ClassPathError::Corrupt(format!(
                    "{}: stored entry with mismatched sizes",
                    filename
                )));
            }
            return Ok(Some(payload.to_vec()));
        }

        let mut out = vec![0u8; entry.uncompressed_size as usize];
        let mut inflate = Decompress::new(false);
        match inflate.decompress(payload, &mut out, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => {
                out.truncate(inflate.total_out() as usize);
                Ok(Some(out))
            }
            _ => Err(ClassPathError::Corrupt(format!(
                "{}: inflate failed",
                filename
            ))),
        }
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(key, _)| String::from_utf16_lossy(key))
            .collect()
    }
}

/// Read-only memory mapping of a file.
struct MappedBuffer {
    ptr: *mut u8,
    len: usize,
}

// Safety: the mapping is read-only for its whole lifetime.
unsafe impl Send for MappedBuffer {}
unsafe impl Sync for MappedBuffer {}

impl MappedBuffer {
    fn open(path: &Path) -> Result<Self, ClassPathError> {
        let file = std::fs::File::open(path)
            .map_err(|e| ClassPathError::Io(format!("opening {}: {}", path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| ClassPathError::Io(format!("stat of {}: {}", path.display(), e)))?
            .len() as usize;
        if len == 0 {
            return Err(ClassPathError::Corrupt(format!(
                "{}: empty archive",
                path.display()
            )));
        }

        use std::os::fd::AsRawFd;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(ClassPathError::Io(format!(
                "mmap of {} failed",
                path.display()
            )));
        }
        Ok(MappedBuffer {
            ptr: ptr as *mut u8,
            len,
        })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}
