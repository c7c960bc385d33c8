//! GSD file handle: creation, the three open modes, chunk writes with
//! frame commits, and random-access chunk reads.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapOptions;
use tracing::{debug, warn};

use gsd_common::{ElementType, GsdError, OpenMode, Result};

use crate::constants::{COPY_BUFFER_SIZE, INITIAL_INDEX_ENTRIES, INITIAL_NAMELIST_ENTRIES, NAMELIST_ENTRY_SIZE};
use crate::header::{pack_name, FileHeader};
use crate::index::{self, IndexEntry, IndexImage, IndexState};
use crate::io;
use crate::namelist::NameTable;

/// An open GSD file.
///
/// All operations are expected to be called from one thread at a time;
/// the handle holds no internal locks. Multiple read-only handles on the
/// same file may coexist.
#[derive(Debug)]
pub struct GsdFile {
    /// The underlying file.
    file: File,
    /// Mode the file was opened in.
    mode: OpenMode,
    /// The file header.
    header: FileHeader,
    /// Current size of the file in bytes.
    file_size: u64,
    /// The index engine state.
    index: IndexState,
    /// The name table.
    names: NameTable,
    /// Frame that chunks are currently being written to.
    cur_frame: u64,
}

/// Everything `open` derives from the file besides the descriptor itself.
struct FileState {
    header: FileHeader,
    file_size: u64,
    index: IndexState,
    names: NameTable,
    cur_frame: u64,
}

fn short_read(what: &str) -> GsdError {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("short read of {what}"),
    )
    .into()
}

/// Truncates the file and writes a fresh header, zeroed index block, and
/// zeroed name-list block, then syncs.
fn initialize_file(
    file: &File,
    application: &[u8; 64],
    schema: &[u8; 64],
    schema_version: u32,
) -> Result<()> {
    file.set_len(0)?;

    let header = FileHeader::new(application, schema, schema_version);
    io::write_at_full(file, &header.to_bytes(), 0)?;

    let index = vec![0u8; INITIAL_INDEX_ENTRIES as usize * IndexEntry::SIZE];
    io::write_at_full(file, &index, header.index_location)?;

    let namelist = vec![0u8; INITIAL_NAMELIST_ENTRIES as usize * NAMELIST_ENTRY_SIZE];
    io::write_at_full(file, &namelist, header.namelist_location)?;

    file.sync_all()?;
    Ok(())
}

impl FileState {
    /// Reads and validates the header, loads the mode-specific index
    /// representation and the name table, and determines the committed
    /// prefix and current frame.
    fn load(file: &File, mode: OpenMode) -> Result<FileState> {
        let mut header_bytes = [0u8; FileHeader::SIZE];
        let n = io::read_at_full(file, &mut header_bytes, 0)?;
        if n != FileHeader::SIZE {
            return Err(GsdError::NotAGsdFile);
        }
        let header = FileHeader::from_bytes(&header_bytes);
        header.validate()?;

        let file_size = file.metadata()?.len();

        // the header must describe blocks that lie inside the file
        let index_bytes = header
            .index_allocated_entries
            .checked_mul(IndexEntry::SIZE as u64)
            .ok_or_else(|| GsdError::FileCorrupt("index block extent overflows".to_string()))?;
        let index_end = header
            .index_location
            .checked_add(index_bytes)
            .ok_or_else(|| GsdError::FileCorrupt("index block extent overflows".to_string()))?;
        if header.index_allocated_entries == 0 || index_end > file_size {
            return Err(GsdError::FileCorrupt(
                "index block lies outside the file".to_string(),
            ));
        }

        let namelist_bytes = header
            .namelist_allocated_entries
            .checked_mul(NAMELIST_ENTRY_SIZE as u64)
            .ok_or_else(|| {
                GsdError::FileCorrupt("name-list block extent overflows".to_string())
            })?;
        let namelist_end = header
            .namelist_location
            .checked_add(namelist_bytes)
            .ok_or_else(|| {
                GsdError::FileCorrupt("name-list block extent overflows".to_string())
            })?;
        if namelist_end > file_size {
            return Err(GsdError::FileCorrupt(
                "name-list block lies outside the file".to_string(),
            ));
        }

        let index_len = usize::try_from(index_bytes)
            .map_err(|_| GsdError::FileCorrupt("index block too large to map".to_string()))?;

        let image = match mode {
            // read-only and append handles view the committed index through
            // a shared read-only mapping; append tears it down again below
            OpenMode::ReadOnly | OpenMode::Append => {
                let map = unsafe {
                    MmapOptions::new()
                        .offset(header.index_location)
                        .len(index_len)
                        .map(file)?
                };
                IndexImage::Mapped(map)
            }
            OpenMode::ReadWrite => {
                let mut raw = vec![0u8; index_len];
                let n = io::read_at_full(file, &mut raw, header.index_location)?;
                if n != raw.len() {
                    return Err(short_read("index block"));
                }
                let entries = raw
                    .chunks_exact(IndexEntry::SIZE)
                    .map(IndexEntry::from_bytes)
                    .collect();
                IndexImage::Owned(entries)
            }
        };

        // the name list is small; always copy it into memory
        let namelist_len = usize::try_from(namelist_bytes)
            .map_err(|_| GsdError::FileCorrupt("name-list block too large".to_string()))?;
        let mut raw_names = vec![0u8; namelist_len];
        let n = io::read_at_full(file, &mut raw_names, header.namelist_location)?;
        if n != raw_names.len() {
            return Err(short_read("name-list block"));
        }
        let names = NameTable::from_image(raw_names, header.namelist_allocated_entries);

        let (num_entries, cur_frame) = match index::validate_committed(
            &image,
            header.index_allocated_entries,
            file_size,
            names.written_entries(),
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!("index validation failed on open: {e}");
                return Err(e);
            }
        };

        // append handles drop the mapping and hold only the entries created
        // since the last commit
        let image = match mode {
            OpenMode::Append => IndexImage::Tail(Vec::new()),
            _ => image,
        };

        Ok(FileState {
            header,
            file_size,
            index: IndexState {
                image,
                num_entries,
                written_entries: num_entries,
            },
            names,
            cur_frame,
        })
    }
}

impl GsdFile {
    /// Creates an empty GSD file, overwriting any existing file at `path`.
    pub fn create(path: &Path, application: &str, schema: &str, schema_version: u32) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        initialize_file(
            &file,
            &pack_name(application),
            &pack_name(schema),
            schema_version,
        )
    }

    /// Creates an empty GSD file and opens it in the given writable mode.
    ///
    /// With `exclusive` set, creation fails if `path` already exists.
    pub fn create_and_open(
        path: &Path,
        application: &str,
        schema: &str,
        schema_version: u32,
        mode: OpenMode,
        exclusive: bool,
    ) -> Result<GsdFile> {
        if mode == OpenMode::ReadOnly {
            return Err(GsdError::FileMustBeWritable);
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let file = options.open(path)?;

        initialize_file(
            &file,
            &pack_name(application),
            &pack_name(schema),
            schema_version,
        )?;
        Self::open_handle(file, mode)
    }

    /// Opens an existing GSD file.
    pub fn open(path: &Path, mode: OpenMode) -> Result<GsdFile> {
        let file = match mode {
            OpenMode::ReadOnly => OpenOptions::new().read(true).open(path)?,
            OpenMode::ReadWrite | OpenMode::Append => {
                OpenOptions::new().read(true).write(true).open(path)?
            }
        };
        Self::open_handle(file, mode)
    }

    fn open_handle(file: File, mode: OpenMode) -> Result<GsdFile> {
        let state = FileState::load(&file, mode)?;
        debug!(
            ?mode,
            frames = state.cur_frame,
            names = state.names.num_entries(),
            "opened gsd file"
        );

        Ok(GsdFile {
            file,
            mode,
            header: state.header,
            file_size: state.file_size,
            index: state.index,
            names: state.names,
            cur_frame: state.cur_frame,
        })
    }

    /// Writes a chunk of `n` rows by `m` columns of `element_type` data to
    /// the current frame.
    ///
    /// The payload is appended to the file immediately; the index entry
    /// that makes it reachable is committed by the next [`end_frame`].
    /// `data` must hold exactly `n * m` elements and `flags` must be 0.
    ///
    /// [`end_frame`]: GsdFile::end_frame
    pub fn write_chunk(
        &mut self,
        name: &str,
        element_type: ElementType,
        n: u64,
        m: u32,
        flags: u8,
        data: &[u8],
    ) -> Result<()> {
        if n == 0 || m == 0 {
            return Err(GsdError::InvalidArgument("chunk dimensions must be nonzero"));
        }
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::FileMustBeWritable);
        }
        if flags != 0 {
            return Err(GsdError::InvalidArgument("flags must be zero"));
        }

        let size = n
            .checked_mul(m as u64)
            .and_then(|v| v.checked_mul(element_type.size() as u64))
            .ok_or(GsdError::InvalidArgument("chunk size overflows"))?;
        if data.len() as u64 != size {
            return Err(GsdError::InvalidArgument(
                "data length does not match n * m * sizeof(type)",
            ));
        }

        let id = match self.names.find(name) {
            Some(id) => id,
            None => self
                .names
                .append(name, self.header.namelist_allocated_entries)?,
        };

        let entry = IndexEntry {
            frame: self.cur_frame,
            n,
            location: self.file_size,
            m,
            id,
            type_code: element_type as u8,
            flags: 0,
        };

        io::write_at_full(&self.file, data, entry.location)?;
        self.file_size += size;

        if self.index.num_entries >= self.header.index_allocated_entries {
            self.expand_index()?;
        }

        match &mut self.index.image {
            IndexImage::Owned(entries) => {
                entries[self.index.num_entries as usize] = entry;
            }
            IndexImage::Tail(tail) => {
                tail.try_reserve(1)
                    .map_err(|_| GsdError::MemoryAllocationFailed)?;
                tail.push(entry);
            }
            IndexImage::Mapped(_) => return Err(GsdError::FileMustBeWritable),
        }
        self.index.num_entries += 1;

        Ok(())
    }

    /// Completes the current frame.
    ///
    /// Flushes any unwritten index entries followed by an fsync, then any
    /// new names followed by an fsync. Only after this returns are the
    /// frame's chunks observable to readers.
    pub fn end_frame(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::FileMustBeWritable);
        }

        self.cur_frame += 1;

        let to_write = self.index.num_entries - self.index.written_entries;
        if to_write > 0 {
            let write_pos = self.header.index_location
                + self.index.written_entries * IndexEntry::SIZE as u64;

            // in append mode the buffer holds exactly the unwritten
            // entries; in read/write mode they are the tail of the full
            // in-memory index
            let buf = match &self.index.image {
                IndexImage::Owned(entries) => index::entries_to_bytes(
                    &entries[self.index.written_entries as usize..self.index.num_entries as usize],
                ),
                IndexImage::Tail(tail) => index::entries_to_bytes(tail),
                IndexImage::Mapped(_) => return Err(GsdError::FileMustBeWritable),
            };

            io::write_at_full(&self.file, &buf, write_pos)?;
            self.index.written_entries += to_write;
            if let IndexImage::Tail(tail) = &mut self.index.image {
                tail.clear();
            }
            self.file.sync_all()?;
        }

        if let Some((first_slot, bytes)) = self.names.unwritten() {
            let write_pos =
                self.header.namelist_location + first_slot * NAMELIST_ENTRY_SIZE as u64;
            io::write_at_full(&self.file, bytes, write_pos)?;
            self.file.sync_all()?;
            self.names.mark_committed();
        }

        Ok(())
    }

    /// Doubles the index allocation and relocates the block to the end of
    /// the file.
    ///
    /// The new block is synced before the header is rewritten to point at
    /// it, and the header is synced afterwards; a crash on either side of
    /// the header rewrite leaves the file consistent against one of the
    /// two blocks.
    fn expand_index(&mut self) -> Result<()> {
        let old_entries = self.header.index_allocated_entries;
        let new_entries = old_entries * 2;
        self.header.index_allocated_entries = new_entries;

        let new_location = self.file_size;
        let old_location = self.header.index_location;

        match &mut self.index.image {
            IndexImage::Owned(entries) => {
                entries
                    .try_reserve_exact((new_entries - old_entries) as usize)
                    .map_err(|_| GsdError::MemoryAllocationFailed)?;
                entries.resize(new_entries as usize, IndexEntry::default());

                let buf = index::entries_to_bytes(entries);
                io::write_at_full(&self.file, &buf, new_location)?;
                self.header.index_location = new_location;
                self.file_size = new_location + buf.len() as u64;
            }
            IndexImage::Tail(_) => {
                // the full index is not in memory; copy the old block
                // through a bounded buffer, then zero-fill the new tail
                let old_bytes = old_entries * IndexEntry::SIZE as u64;
                let new_bytes = new_entries * IndexEntry::SIZE as u64;
                let mut buf = vec![0u8; COPY_BUFFER_SIZE];

                let mut copied = 0u64;
                while copied < old_bytes {
                    let chunk = COPY_BUFFER_SIZE.min((old_bytes - copied) as usize);
                    let n = io::read_at_full(&self.file, &mut buf[..chunk], old_location + copied)?;
                    if n != chunk {
                        return Err(short_read("index block during relocation"));
                    }
                    io::write_at_full(&self.file, &buf[..chunk], new_location + copied)?;
                    copied += chunk as u64;
                }

                buf.fill(0);
                while copied < new_bytes {
                    let chunk = COPY_BUFFER_SIZE.min((new_bytes - copied) as usize);
                    io::write_at_full(&self.file, &buf[..chunk], new_location + copied)?;
                    copied += chunk as u64;
                }

                self.header.index_location = new_location;
                self.file_size = new_location + new_bytes;
            }
            IndexImage::Mapped(_) => return Err(GsdError::FileMustBeWritable),
        }

        // the new block must be durable before the header points at it
        self.file.sync_all()?;
        io::write_at_full(&self.file, &self.header.to_bytes(), 0)?;
        self.file.sync_all()?;

        debug!(
            entries = new_entries,
            location = self.header.index_location,
            "index block relocated"
        );
        Ok(())
    }

    /// Finds the index entry for a chunk written to `frame` under `name`.
    ///
    /// Returns `None` for unknown names, frames that have not completed,
    /// frames without that chunk, and always on append handles.
    pub fn find_chunk(&self, frame: u64, name: &str) -> Option<IndexEntry> {
        if frame >= self.nframes() {
            return None;
        }
        if self.mode == OpenMode::Append {
            return None;
        }

        let id = self.names.find(name)?;
        self.index.find(frame, id)
    }

    /// Reads the payload of `entry` into `data`, which must be exactly the
    /// chunk's size in bytes.
    pub fn read_chunk(&self, data: &mut [u8], entry: &IndexEntry) -> Result<()> {
        if self.mode == OpenMode::Append {
            return Err(GsdError::FileMustBeReadable);
        }

        let size = entry
            .data_size()
            .ok_or_else(|| GsdError::FileCorrupt("chunk size overflows".to_string()))?;
        if size == 0 {
            return Err(GsdError::FileCorrupt(
                "chunk has unknown type or zero size".to_string(),
            ));
        }
        if entry.location == 0 {
            return Err(GsdError::FileCorrupt("chunk has no location".to_string()));
        }
        let end = entry
            .location
            .checked_add(size)
            .ok_or_else(|| GsdError::FileCorrupt("chunk extent overflows".to_string()))?;
        if end > self.file_size {
            return Err(GsdError::FileCorrupt(
                "chunk extends past the end of the file".to_string(),
            ));
        }

        if data.len() as u64 != size {
            return Err(GsdError::InvalidArgument(
                "destination length does not match the chunk size",
            ));
        }

        let n = io::read_at_full(&self.file, data, entry.location)?;
        if n as u64 != size {
            return Err(GsdError::FileCorrupt(
                "unexpected end of file while reading chunk".to_string(),
            ));
        }

        Ok(())
    }

    /// Enumerates committed chunk names beginning with `prefix`, in
    /// name-sorted order.
    ///
    /// Pass `None` to start, then the previously returned name to
    /// continue.
    pub fn find_matching_chunk_name(&self, prefix: &str, prev: Option<&str>) -> Option<&str> {
        self.names.matching(prefix, prev)
    }

    /// Number of completed frames in the file.
    pub fn nframes(&self) -> u64 {
        self.cur_frame
    }

    /// Scans every committed index entry for structural validity and frame
    /// order, not just the binary-search pivots examined at open.
    pub fn validate_all(&self) -> Result<()> {
        if self.mode == OpenMode::Append {
            return Err(GsdError::FileMustBeReadable);
        }

        let mut prev_frame = 0u64;
        for i in 0..self.index.written_entries {
            let entry = self.index.image.entry(i).unwrap_or_default();
            if !entry.is_used()
                || !entry.is_valid(
                    self.header.index_allocated_entries,
                    self.file_size,
                    self.names.written_entries(),
                )
            {
                return Err(GsdError::FileCorrupt(format!(
                    "index entry {i} is invalid"
                )));
            }
            if entry.frame < prev_frame {
                return Err(GsdError::FileCorrupt(format!(
                    "index entry {i} breaks frame order"
                )));
            }
            prev_frame = entry.frame;
        }

        Ok(())
    }

    /// Re-initializes the file to empty, preserving the application,
    /// schema, and schema version.
    pub fn truncate(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(GsdError::FileMustBeWritable);
        }

        let application = self.header.application;
        let schema = self.header.schema;
        let schema_version = self.header.schema_version;
        initialize_file(&self.file, &application, &schema, schema_version)?;

        let state = FileState::load(&self.file, self.mode)?;
        self.header = state.header;
        self.file_size = state.file_size;
        self.index = state.index;
        self.names = state.names;
        self.cur_frame = state.cur_frame;

        debug!("truncated gsd file");
        Ok(())
    }

    /// Closes the file. Dropping the handle has the same effect.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Returns the application string recorded in the header.
    pub fn application(&self) -> &str {
        self.header.application()
    }

    /// Returns the schema string recorded in the header.
    pub fn schema(&self) -> &str {
        self.header.schema()
    }

    /// Returns the schema version recorded in the header.
    pub fn schema_version(&self) -> u32 {
        self.header.schema_version
    }

    /// Returns the mode the file was opened in.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Returns the current file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
