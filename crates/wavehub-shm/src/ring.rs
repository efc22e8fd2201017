//! Per-Stream Shared-Memory Ring (spec.md §3, §4.2)
//!
//! Two buffer areas ("A"/"B") with an `active_area_idx` selecting which one
//! a consumer should currently be draining, matching the double-buffered
//! scheme the daemon and its client share over a memory-mapped region.
//!
//! The region is backed by `memmap2::MmapMut` over an anonymous temp file
//! rather than a real `/dev/shm` entry — this crate owns only the byte
//! layout and the lock-free protocol over it; handing the backing fd to a
//! client process over `SCM_RIGHTS` is a socket-layer concern that belongs
//! to `wavehub-daemon`.
//!
//! `write_in_progress` is a single-bit seq-lock (spec.md §9): the producer
//! sets it before touching the buffer and clears it with a release store
//! after publishing `write_offset`; a reader that observes it set retries.
//! All cross-side communication goes through `Ordering::Release` on the
//! write path and `Ordering::Acquire` on the read path.

use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use memmap2::MmapMut;
use wavehub_proto::ChannelLayout;

use crate::error::{ShmError, ShmResult};

const READ_RETRY_BUDGET: u32 = 8;

/// Static configuration written once at stream-creation time.
#[derive(Debug, Clone, Copy)]
pub struct ShmConfig {
    pub frame_bytes: usize,
    /// Usable size of *one* area, in bytes. Per spec.md §4.7 this is
    /// allocated power-of-two sized.
    pub used_size: usize,
    pub num_channels: u8,
    pub frame_rate: u32,
    pub channel_layout: ChannelLayout,
}

impl ShmConfig {
    pub fn frames_capacity(&self) -> usize {
        self.used_size / self.frame_bytes
    }
}

#[repr(C)]
struct RawArea {
    write_offset: AtomicUsize,
    read_offset: AtomicUsize,
    write_in_progress: AtomicU8,
    mute: AtomicU8,
    ts_nanos: AtomicI64,
    volume_scaler_bits: AtomicU32,
}

impl RawArea {
    fn new() -> Self {
        Self {
            write_offset: AtomicUsize::new(0),
            read_offset: AtomicUsize::new(0),
            write_in_progress: AtomicU8::new(0),
            mute: AtomicU8::new(0),
            ts_nanos: AtomicI64::new(0),
            volume_scaler_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }
}

#[repr(C)]
struct RawHeader {
    active_area_idx: AtomicU8,
    callback_pending: AtomicU8,
    areas: [RawArea; 2],
}

impl RawHeader {
    fn new() -> Self {
        Self {
            active_area_idx: AtomicU8::new(0),
            callback_pending: AtomicU8::new(0),
            areas: [RawArea::new(), RawArea::new()],
        }
    }
}

/// A mapped per-stream audio region.
///
/// All accessor methods take `&self`: the atomics provide the interior
/// mutability the producer/consumer protocol needs, and the raw sample
/// bytes are accessed through a pointer derived from the mapping rather
/// than through `&mut [u8]`, because the whole point of this type is that
/// two independent parties (here: the daemon and, conceptually, its
/// client) touch the same bytes without a borrow-checker relationship
/// between them. Safety instead rests on the protocol invariant that only
/// one side ever writes to a given area at a time (enforced by
/// `write_in_progress` and by which side owns the producer role for the
/// stream's direction).
pub struct StreamShm {
    mmap: MmapMut,
    /// Kept alive only so the mapping stays valid and so the fd can be
    /// handed to the client over `SCM_RIGHTS`; never read or written
    /// directly once `mmap` exists.
    file: File,
    config: ShmConfig,
    samples_offset: usize,
    area_bytes: usize,
}

impl StreamShm {
    /// Allocate a fresh region sized for `config`.
    pub fn create(config: ShmConfig) -> ShmResult<Self> {
        if !config.used_size.is_power_of_two() {
            return Err(ShmError::UsedSizeNotPowerOfTwo(config.used_size));
        }

        let header_size = std::mem::size_of::<RawHeader>();
        let area_bytes = config.used_size;
        let total = header_size + area_bytes * 2;

        let file = tempfile::tempfile()?;
        file.set_len(total as u64)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        // SAFETY: the mapping is freshly allocated, page-aligned, and large
        // enough for one `RawHeader`; no other reference to this memory
        // exists yet.
        unsafe {
            let header_ptr = mmap.as_mut_ptr() as *mut RawHeader;
            header_ptr.write(RawHeader::new());
        }

        Ok(Self {
            mmap,
            file,
            config,
            samples_offset: header_size,
            area_bytes,
        })
    }

    pub fn config(&self) -> &ShmConfig {
        &self.config
    }

    /// Raw fd of the backing file, for the daemon's socket layer to hand
    /// to the owning client over `SCM_RIGHTS` (spec.md §4.7). This crate
    /// only owns the mapping and layout, never the hand-off itself.
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn header(&self) -> &RawHeader {
        // SAFETY: `samples_offset` was computed as `size_of::<RawHeader>()`
        // at construction time and the mapping is at least that large.
        unsafe { &*(self.mmap.as_ptr() as *const RawHeader) }
    }

    fn area_ptr(&self, area_idx: usize) -> *mut u8 {
        let offset = self.samples_offset + area_idx * self.area_bytes;
        // SAFETY: `offset + area_bytes` never exceeds the mapping length,
        // by construction in `create`.
        unsafe { (self.mmap.as_ptr() as *mut u8).add(offset) }
    }

    pub fn active_area_idx(&self) -> usize {
        self.header().active_area_idx.load(Ordering::Acquire) as usize
    }

    /// Begin a producer write into the currently-inactive area.
    pub fn begin_write(&self) -> WriteGuard<'_> {
        let area_idx = 1 - self.active_area_idx();
        self.header().areas[area_idx]
            .write_in_progress
            .store(1, Ordering::Release);

        let buf = unsafe { std::slice::from_raw_parts_mut(self.area_ptr(area_idx), self.area_bytes) };
        WriteGuard {
            shm: self,
            area_idx,
            buf,
        }
    }

    /// Attempt to read the currently-active area's unconsumed bytes.
    ///
    /// Returns `None` if the writer holds `write_in_progress` for the
    /// entire retry budget (a real implementation would fall back to
    /// silence/backoff at that point; the budget itself only exists so a
    /// stuck writer cannot spin the reader forever).
    pub fn read(&self) -> Option<ReadView<'_>> {
        let header = self.header();
        for _ in 0..READ_RETRY_BUDGET {
            let idx = header.active_area_idx.load(Ordering::Acquire) as usize;
            let area = &header.areas[idx];
            if area.write_in_progress.load(Ordering::Acquire) != 0 {
                continue;
            }
            let write_offset = area.write_offset.load(Ordering::Acquire);
            let read_offset = area.read_offset.load(Ordering::Acquire);
            // Re-check the area didn't flip out from under us mid-read.
            if header.active_area_idx.load(Ordering::Acquire) as usize != idx {
                continue;
            }
            let available = write_offset.saturating_sub(read_offset);
            let ptr = unsafe { self.area_ptr(idx).add(read_offset) };
            let buf = unsafe { std::slice::from_raw_parts(ptr, available) };
            return Some(ReadView {
                shm: self,
                area_idx: idx,
                available,
                buf,
            });
        }
        None
    }

    /// `true` once the active area's consumer has drained everything the
    /// producer has published and no write is in flight.
    pub fn drained(&self) -> bool {
        let header = self.header();
        let idx = header.active_area_idx.load(Ordering::Acquire) as usize;
        let area = &header.areas[idx];
        area.write_in_progress.load(Ordering::Acquire) == 0
            && area.read_offset.load(Ordering::Acquire) == area.write_offset.load(Ordering::Acquire)
    }

    pub fn volume_scaler(&self, area_idx: usize) -> f32 {
        f32::from_bits(self.header().areas[area_idx].volume_scaler_bits.load(Ordering::Acquire))
    }

    /// Set the volume scaler, clamped per spec.md §8 to `[0.0, 1.0]`.
    /// Out-of-range input is rejected and leaves existing state untouched.
    pub fn set_volume_scaler(&self, area_idx: usize, value: f32) -> ShmResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ShmError::InvalidVolume(value));
        }
        self.header().areas[area_idx]
            .volume_scaler_bits
            .store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn mute(&self, area_idx: usize) -> bool {
        self.header().areas[area_idx].mute.load(Ordering::Acquire) != 0
    }

    pub fn set_mute(&self, area_idx: usize, mute: bool) {
        self.header().areas[area_idx]
            .mute
            .store(mute as u8, Ordering::Release);
    }

    pub fn ts_nanos(&self, area_idx: usize) -> i64 {
        self.header().areas[area_idx].ts_nanos.load(Ordering::Acquire)
    }

    pub fn callback_pending(&self) -> bool {
        self.header().callback_pending.load(Ordering::Acquire) != 0
    }

    pub fn set_callback_pending(&self, pending: bool) {
        self.header()
            .callback_pending
            .store(pending as u8, Ordering::Release);
    }
}

/// An in-progress producer write into the inactive area.
pub struct WriteGuard<'a> {
    shm: &'a StreamShm,
    area_idx: usize,
    buf: &'a mut [u8],
}

impl<'a> WriteGuard<'a> {
    pub fn bytes(&mut self) -> &mut [u8] {
        self.buf
    }

    /// Publish `bytes_written` bytes, stamp them with `ts_nanos`, and flip
    /// `active_area_idx` to this area so the consumer picks it up next.
    pub fn commit(self, bytes_written: usize, ts_nanos: i64) -> ShmResult<()> {
        let used_size = self.shm.config.used_size;
        if bytes_written > used_size {
            return Err(ShmError::WriteExceedsCapacity {
                requested: bytes_written,
                used_size,
            });
        }

        let header = self.shm.header();
        let area = &header.areas[self.area_idx];
        area.read_offset.store(0, Ordering::Release);
        area.write_offset.store(bytes_written, Ordering::Release);
        area.ts_nanos.store(ts_nanos, Ordering::Release);
        area.write_in_progress.store(0, Ordering::Release);
        header
            .active_area_idx
            .store(self.area_idx as u8, Ordering::Release);
        Ok(())
    }

    /// Abort the write without publishing anything (e.g. on a converter
    /// error). Clears `write_in_progress` only.
    pub fn abort(self) {
        self.shm.header().areas[self.area_idx]
            .write_in_progress
            .store(0, Ordering::Release);
    }
}

/// A consumer's view of the currently-active area's unconsumed bytes.
pub struct ReadView<'a> {
    shm: &'a StreamShm,
    area_idx: usize,
    available: usize,
    buf: &'a [u8],
}

impl<'a> ReadView<'a> {
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.available]
    }

    pub fn available(&self) -> usize {
        self.available
    }

    /// Advance `read_offset` by `consumed` bytes (must be `<= available()`).
    pub fn advance(self, consumed: usize) {
        debug_assert!(consumed <= self.available);
        let area = &self.shm.header().areas[self.area_idx];
        let prior = area.read_offset.load(Ordering::Acquire);
        area.read_offset
            .store(prior + consumed.min(self.available), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ShmConfig {
        ShmConfig {
            frame_bytes: 4,
            used_size: 4096,
            num_channels: 2,
            frame_rate: 48000,
            channel_layout: ChannelLayout::stereo(),
        }
    }

    #[test]
    fn fresh_region_is_drained() {
        let shm = StreamShm::create(test_config()).unwrap();
        assert!(shm.drained());
    }

    #[test]
    fn write_then_read_roundtrips_bytes() {
        let shm = StreamShm::create(test_config()).unwrap();
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];

        let mut guard = shm.begin_write();
        guard.bytes()[..payload.len()].copy_from_slice(&payload);
        guard.commit(payload.len(), 1000).unwrap();

        let view = shm.read().expect("area not busy");
        assert_eq!(view.bytes(), &payload);
        view.advance(payload.len());

        assert!(shm.drained());
    }

    #[test]
    fn invariant_read_le_write_le_used_size() {
        let shm = StreamShm::create(test_config()).unwrap();
        let mut guard = shm.begin_write();
        guard.bytes()[0] = 42;
        guard.commit(4, 0).unwrap();

        let view = shm.read().unwrap();
        view.advance(2);

        let idx = shm.active_area_idx();
        let read = shm.header().areas[idx].read_offset.load(Ordering::Acquire);
        let write = shm.header().areas[idx].write_offset.load(Ordering::Acquire);
        assert!(read <= write);
        assert!(write <= shm.config().used_size);
    }

    #[test]
    fn volume_scaler_clamped_and_rejects_out_of_range() {
        let shm = StreamShm::create(test_config()).unwrap();
        assert_eq!(shm.volume_scaler(0), 1.0);

        shm.set_volume_scaler(0, 0.5).unwrap();
        assert_eq!(shm.volume_scaler(0), 0.5);

        let err = shm.set_volume_scaler(0, 1.5);
        assert!(err.is_err());
        // State unchanged on rejection.
        assert_eq!(shm.volume_scaler(0), 0.5);

        let err = shm.set_volume_scaler(0, -0.1);
        assert!(err.is_err());
        assert_eq!(shm.volume_scaler(0), 0.5);
    }

    #[test]
    fn mute_flag_roundtrips() {
        let shm = StreamShm::create(test_config()).unwrap();
        assert!(!shm.mute(0));
        shm.set_mute(0, true);
        assert!(shm.mute(0));
    }

    #[test]
    fn rejects_non_power_of_two_used_size() {
        let mut cfg = test_config();
        cfg.used_size = 100;
        assert!(matches!(
            StreamShm::create(cfg),
            Err(ShmError::UsedSizeNotPowerOfTwo(100))
        ));
    }

    #[test]
    fn write_exceeding_capacity_is_rejected() {
        let shm = StreamShm::create(test_config()).unwrap();
        let guard = shm.begin_write();
        let err = guard.commit(shm.config().used_size + 1, 0);
        assert!(err.is_err());
    }

    #[test]
    fn double_buffer_flips_on_each_commit() {
        let shm = StreamShm::create(test_config()).unwrap();
        let first_idx = 1 - shm.active_area_idx();

        let mut guard = shm.begin_write();
        guard.bytes()[0] = 1;
        guard.commit(4, 0).unwrap();
        assert_eq!(shm.active_area_idx(), first_idx);

        let second_idx = 1 - shm.active_area_idx();
        let mut guard = shm.begin_write();
        guard.bytes()[0] = 2;
        guard.commit(4, 1).unwrap();
        assert_eq!(shm.active_area_idx(), second_idx);
        assert_ne!(first_idx, second_idx);
    }
}
