//! Backing store and metadata map.
//!
//! One backing file per device: `[metadata region][data region]`. The
//! metadata region is memory-mapped read-write and mutated in place; the
//! data region is reached with positioned (optionally vectored) file I/O.

pub mod format;
pub mod layout;
pub mod validate;

use std::fs::{File, OpenOptions};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use layout::{ListId, ListRec, MetaHeader, RealmRec, RegionLayout, ZoneRec};

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("backing file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("mmap of metadata region failed: {0}")]
    Map(#[source] io::Error),
    #[error("metadata flush failed: {0}")]
    Flush(#[source] io::Error),
}

/// Owning handle for the backing file and its mapped metadata region.
pub struct MetaStore {
    file: File,
    map: MmapMut,
    layout: RegionLayout,
}

impl MetaStore {
    /// Open (or create) the backing file, size it, and map the metadata
    /// region. Returns the store and whether the file already existed with
    /// the expected size — only then is its metadata worth validating.
    pub fn open_or_create(
        path: &Path,
        region: RegionLayout,
        file_size: u64,
    ) -> Result<(Self, bool), MetaError> {
        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let current = file.metadata()?.len();
        let size_matches = existed && current == file_size;
        if !size_matches {
            file.set_len(file_size)?;
        }
        debug!(
            path = %path.display(),
            existed,
            size_matches,
            meta_size = region.meta_size,
            "opened backing file"
        );
        // Safety: the file stays open and at least `meta_size` long for the
        // lifetime of the map; this handle is the only mutator.
        let map = unsafe { MmapOptions::new().len(region.meta_size).map_mut(&file) }
            .map_err(MetaError::Map)?;
        Ok((
            Self {
                file,
                map,
                layout: region,
            },
            size_matches,
        ))
    }

    pub fn region(&self) -> &RegionLayout {
        &self.layout
    }

    /// Zero the whole metadata region (formatter prologue).
    pub fn wipe_meta(&mut self) {
        self.map[..].fill(0);
    }

    pub fn header(&self) -> &MetaHeader {
        // Safety: the map is page-aligned, longer than the header, and the
        // header record is plain data at offset 0.
        unsafe { &*(self.map.as_ptr() as *const MetaHeader) }
    }

    pub fn header_mut(&mut self) -> &mut MetaHeader {
        // Safety: as in `header`; &mut self guarantees exclusive access.
        unsafe { &mut *(self.map.as_mut_ptr() as *mut MetaHeader) }
    }

    pub fn nr_zones(&self) -> u32 {
        self.layout.nr_zones as u32
    }

    pub fn nr_realms(&self) -> u32 {
        self.layout.nr_realms as u32
    }

    pub fn zone(&self, idx: u32) -> &ZoneRec {
        assert!((idx as usize) < self.layout.nr_zones, "zone index {idx}");
        let off = self.layout.zone_off + idx as usize * layout::ZONE_REC_SIZE;
        // Safety: offset is in-bounds, 8-aligned by construction, and the
        // record is plain data.
        unsafe { &*(self.map.as_ptr().add(off) as *const ZoneRec) }
    }

    pub fn zone_mut(&mut self, idx: u32) -> &mut ZoneRec {
        assert!((idx as usize) < self.layout.nr_zones, "zone index {idx}");
        let off = self.layout.zone_off + idx as usize * layout::ZONE_REC_SIZE;
        // Safety: as in `zone`.
        unsafe { &mut *(self.map.as_mut_ptr().add(off) as *mut ZoneRec) }
    }

    pub fn realm(&self, idx: u32) -> &RealmRec {
        assert!((idx as usize) < self.layout.nr_realms, "realm index {idx}");
        let off = self.layout.realm_off + idx as usize * layout::REALM_REC_SIZE;
        // Safety: as in `zone`.
        unsafe { &*(self.map.as_ptr().add(off) as *const RealmRec) }
    }

    pub fn realm_mut(&mut self, idx: u32) -> &mut RealmRec {
        assert!((idx as usize) < self.layout.nr_realms, "realm index {idx}");
        let off = self.layout.realm_off + idx as usize * layout::REALM_REC_SIZE;
        // Safety: as in `zone`.
        unsafe { &mut *(self.map.as_mut_ptr().add(off) as *mut RealmRec) }
    }

    pub fn list(&self, id: ListId) -> ListRec {
        self.header().lists[id as usize]
    }

    pub fn set_list(&mut self, id: ListId, rec: ListRec) {
        self.header_mut().lists[id as usize] = rec;
    }

    /// Flush the metadata region: `msync` with invalidate, then sync the
    /// file so data-region writes are durable too.
    pub fn flush(&self) -> Result<(), MetaError> {
        // Safety: the pointer and length describe the live page-aligned map.
        let rc = unsafe {
            libc::msync(
                self.map.as_ptr() as *mut libc::c_void,
                self.layout.meta_size,
                libc::MS_SYNC | libc::MS_INVALIDATE,
            )
        };
        if rc != 0 {
            return Err(MetaError::Flush(io::Error::last_os_error()));
        }
        self.file.sync_data().map_err(MetaError::Flush)
    }

    pub fn pread(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.read_exact_at(buf, offset)
    }

    pub fn pwrite(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.write_all_at(buf, offset)
    }

    pub fn preadv(&self, offset: u64, iov: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        nix::sys::uio::preadv(&self.file, iov, offset as libc::off_t).map_err(io::Error::from)
    }

    pub fn pwritev(&self, offset: u64, iov: &[IoSlice<'_>]) -> io::Result<usize> {
        nix::sys::uio::pwritev(&self.file, iov, offset as libc::off_t).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, realms: usize, zones: usize) -> (MetaStore, bool) {
        let region = RegionLayout::new(realms, zones);
        let path = dir.path().join("dev.img");
        let size = region.meta_size as u64 + (1 << 20);
        MetaStore::open_or_create(&path, region, size).unwrap()
    }

    #[test]
    fn create_then_reopen() {
        let dir = TempDir::new().unwrap();
        let region = RegionLayout::new(8, 64);
        let path = dir.path().join("dev.img");
        let size = region.meta_size as u64 + (1 << 20);

        let (mut s, existed) = MetaStore::open_or_create(&path, region, size).unwrap();
        assert!(!existed);
        s.header_mut().magic = layout::META_MAGIC;
        s.header_mut().nr_zones = 64;
        s.flush().unwrap();
        drop(s);

        let (s, existed) = MetaStore::open_or_create(&path, region, size).unwrap();
        assert!(existed);
        assert_eq!(s.header().magic, layout::META_MAGIC);
        assert_eq!(s.header().nr_zones, 64);
    }

    #[test]
    fn zone_and_realm_access_is_persistent() {
        let dir = TempDir::new().unwrap();
        let (mut s, _) = store(&dir, 8, 64);
        s.zone_mut(3).start = 4096;
        s.zone_mut(3).wp = 4100;
        s.realm_mut(2).current_type = 2;
        assert_eq!(s.zone(3).start, 4096);
        assert_eq!(s.zone(3).wp, 4100);
        assert_eq!(s.realm(2).current_type, 2);
    }

    #[test]
    fn data_region_io_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (s, _) = store(&dir, 8, 64);
        let off = s.region().meta_size as u64;
        s.pwrite(off + 512, b"zoned").unwrap();
        let mut buf = [0u8; 5];
        s.pread(off + 512, &mut buf).unwrap();
        assert_eq!(&buf, b"zoned");
    }

    #[test]
    fn vectored_io_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (s, _) = store(&dir, 8, 64);
        let off = s.region().meta_size as u64;
        let a = [0xAAu8; 16];
        let b = [0xBBu8; 16];
        let n = s
            .pwritev(off, &[IoSlice::new(&a), IoSlice::new(&b)])
            .unwrap();
        assert_eq!(n, 32);
        let mut out = [0u8; 32];
        s.pread(off, &mut out).unwrap();
        assert_eq!(&out[..16], &a);
        assert_eq!(&out[16..], &b);
    }
}
