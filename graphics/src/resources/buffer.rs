//! GPU buffer resource with optional per-frame duplication.
//!
//! A multi-buffered buffer owns one backend copy per frame in flight plus a
//! host-side shadow. Writes land in the shadow and mark every copy dirty;
//! [`Buffer::flush`] uploads the shadow into the current slot's copy only.
//! The copy a frame in flight is reading is therefore never overwritten.
//!
//! ```text
//!  write_to_buffer ──► shadow ──flush()──► copy[slot]     dirty = [0, 1, 1]
//!                                          copy[slot+1]   (uploaded when its
//!                                          copy[slot+2]    slot comes round)
//! ```
//!
//! Single-buffered buffers write straight through with no shadow.
//! Device-resident memory is written through a transient staging buffer and a
//! device-side copy; the staging buffer is released through the deletion
//! queue.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::BufferHandle;
use crate::deletion::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::{fatal, GraphicsError, OrFatal};
use crate::types::{BufferDescriptor, BufferUsage, MemoryResidency};

/// Parameters for [`Buffer::with_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferCreateInfo {
    pub label: Option<String>,
    /// Size of one instance in bytes.
    pub instance_size: u64,
    pub instance_count: u64,
    pub usage: BufferUsage,
    pub residency: MemoryResidency,
    /// Keep one copy per frame in flight.
    pub multi_buffered: bool,
}

impl BufferCreateInfo {
    pub fn new(instance_size: u64, instance_count: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            instance_size,
            instance_count,
            usage,
            residency: MemoryResidency::HostVisible,
            multi_buffered: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_residency(mut self, residency: MemoryResidency) -> Self {
        self.residency = residency;
        self
    }

    pub fn multi_buffered(mut self) -> Self {
        self.multi_buffered = true;
        self
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.instance_size * self.instance_count
    }
}

struct BufferCopies {
    handles: Vec<BufferHandle>,
    shadow: Vec<u8>,
    dirty: Vec<bool>,
}

/// A GPU buffer.
///
/// Buffers are shared as `Arc<Buffer>` between meshes, writers and the code
/// that fills them. Dropping the last reference queues every backend copy for
/// deferred destruction.
pub struct Buffer {
    device: Arc<GraphicsDevice>,
    info: BufferCreateInfo,
    copies: Mutex<BufferCopies>,
}

impl Buffer {
    /// Create a buffer of `instance_count` instances of `instance_size` bytes.
    pub fn create(
        device: &Arc<GraphicsDevice>,
        instance_size: u64,
        instance_count: u64,
        usage: BufferUsage,
        residency: MemoryResidency,
        multi_buffered: bool,
    ) -> Result<Self, GraphicsError> {
        let mut info =
            BufferCreateInfo::new(instance_size, instance_count, usage).with_residency(residency);
        info.multi_buffered = multi_buffered;
        Self::with_info(device, info)
    }

    pub fn with_info(
        device: &Arc<GraphicsDevice>,
        info: BufferCreateInfo,
    ) -> Result<Self, GraphicsError> {
        if info.size() == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer '{}' has zero size",
                info.label.as_deref().unwrap_or("unnamed")
            )));
        }

        let copy_count = if info.multi_buffered {
            device.frames_in_flight()
        } else {
            1
        };
        let handles = create_copies(device, &info, copy_count)?;
        let shadow = if info.multi_buffered {
            vec![0; info.size() as usize]
        } else {
            Vec::new()
        };

        Ok(Self {
            device: Arc::clone(device),
            copies: Mutex::new(BufferCopies {
                handles,
                shadow,
                dirty: vec![false; copy_count],
            }),
            info,
        })
    }

    pub fn info(&self) -> &BufferCreateInfo {
        &self.info
    }

    pub fn label(&self) -> &str {
        self.info.label.as_deref().unwrap_or("unnamed")
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.info.size()
    }

    pub fn instance_size(&self) -> u64 {
        self.info.instance_size
    }

    pub fn instance_count(&self) -> u64 {
        self.info.instance_count
    }

    pub fn usage(&self) -> BufferUsage {
        self.info.usage
    }

    pub fn is_multi_buffered(&self) -> bool {
        self.info.multi_buffered
    }

    /// Write `data` at `offset`.
    ///
    /// Multi-buffered buffers stage into the shadow and upload at the next
    /// [`flush`](Self::flush). Writing past the end is fatal.
    pub fn write_to_buffer(&self, data: &[u8], offset: u64) {
        self.check_range(offset, data.len() as u64);

        let mut copies = self.copies.lock();
        if self.info.multi_buffered {
            let start = offset as usize;
            copies.shadow[start..start + data.len()].copy_from_slice(data);
            copies.dirty.iter_mut().for_each(|dirty| *dirty = true);
        } else {
            let handle = copies.handles[0];
            self.upload(handle, offset, data)
                .or_fatal(&format!("writing buffer '{}'", self.label()));
        }
    }

    /// Write a plain-old-data value at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T, offset: u64) {
        self.write_to_buffer(bytemuck::bytes_of(value), offset);
    }

    /// Write a slice of plain-old-data values at `offset`.
    pub fn write_slice<T: bytemuck::Pod>(&self, values: &[T], offset: u64) {
        self.write_to_buffer(bytemuck::cast_slice(values), offset);
    }

    /// Write one instance at `index`.
    pub fn write_instance<T: bytemuck::Pod>(&self, index: u64, value: &T) {
        let size = std::mem::size_of::<T>() as u64;
        if size > self.info.instance_size {
            fatal(
                &format!("writing instance {index} of buffer '{}'", self.label()),
                GraphicsError::BufferTooSmall {
                    buffer: self.label().to_string(),
                    required: size,
                    available: self.info.instance_size,
                },
            );
        }
        let Some(offset) = index.checked_mul(self.info.instance_size) else {
            fatal(
                &format!("writing instance {index} of buffer '{}'", self.label()),
                GraphicsError::BufferTooSmall {
                    buffer: self.label().to_string(),
                    required: u64::MAX,
                    available: self.size(),
                },
            );
        };
        self.write_to_buffer(bytemuck::bytes_of(value), offset);
    }

    /// Upload the shadow into the current frame slot's copy if that slot is
    /// dirty. Returns whether an upload happened.
    ///
    /// Single-buffered buffers are already resident and never upload here.
    pub fn flush(&self) -> bool {
        if !self.info.multi_buffered {
            return false;
        }

        let mut copies = self.copies.lock();
        self.match_frames_in_flight(&mut copies);

        let slot = self.device.current_slot();
        if !copies.dirty[slot] {
            return false;
        }

        let handle = copies.handles[slot];
        self.upload(handle, 0, &copies.shadow)
            .or_fatal(&format!("flushing buffer '{}'", self.label()));
        copies.dirty[slot] = false;
        log::trace!(
            "{}: flushed buffer '{}' into slot {slot}",
            self.device.frame_label(),
            self.label()
        );
        true
    }

    /// Device-side copy of all of `src` into this buffer at `dst_offset`.
    ///
    /// Copying more bytes than fit is fatal, as is copying into a
    /// multi-buffered buffer: its other slots and host shadow would never see
    /// the data.
    pub fn copy(&self, src: &Buffer, dst_offset: u64) {
        if self.info.multi_buffered {
            fatal(
                &format!("copying '{}' into '{}'", src.label(), self.label()),
                GraphicsError::InvalidParameter(
                    "destination is multi-buffered; write it through write_to_buffer".to_string(),
                ),
            );
        }
        let size = src.size();
        self.check_range(dst_offset, size);
        self.device
            .backend()
            .copy_buffer(src.handle(), 0, self.handle(), dst_offset, size)
            .or_fatal(&format!("copying '{}' into '{}'", src.label(), self.label()));
    }

    /// Backend handle for the current frame slot.
    pub fn handle(&self) -> BufferHandle {
        let copies = self.copies.lock();
        if copies.handles.len() == 1 {
            copies.handles[0]
        } else {
            copies.handles[self.device.current_slot() % copies.handles.len()]
        }
    }

    /// Backend handle of the copy for `slot`, if one exists.
    pub fn handle_for_slot(&self, slot: usize) -> Option<BufferHandle> {
        let copies = self.copies.lock();
        if copies.handles.len() == 1 {
            Some(copies.handles[0])
        } else {
            copies.handles.get(slot).copied()
        }
    }

    /// Read resident bytes from the current slot's copy.
    pub fn read_back(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        self.device.backend().read_buffer(self.handle(), offset, size)
    }

    /// Read resident bytes from the copy owned by `slot`.
    pub fn read_slot(&self, slot: usize, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        let handle = self.handle_for_slot(slot).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "buffer '{}' has no copy for slot {slot}",
                self.label()
            ))
        })?;
        self.device.backend().read_buffer(handle, offset, size)
    }

    fn check_range(&self, offset: u64, size: u64) {
        let fits = offset
            .checked_add(size)
            .is_some_and(|end| end <= self.size());
        if !fits {
            fatal(
                &format!("writing buffer '{}'", self.label()),
                GraphicsError::BufferTooSmall {
                    buffer: self.label().to_string(),
                    required: offset.saturating_add(size),
                    available: self.size(),
                },
            );
        }
    }

    fn upload(&self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let backend = self.device.backend();
        match self.info.residency {
            MemoryResidency::HostVisible => backend.write_buffer(handle, offset, data),
            MemoryResidency::DeviceResident => {
                let staging = backend.create_buffer(
                    &BufferDescriptor::new(data.len() as u64, BufferUsage::COPY_SRC)
                        .with_label(format!("{} staging", self.label())),
                )?;
                let result = backend
                    .write_buffer(staging, 0, data)
                    .and_then(|()| backend.copy_buffer(staging, 0, handle, offset, data.len() as u64));
                self.device.defer_destroy(DeferredResource::Buffer(staging));
                result
            }
        }
    }

    /// Reallocate the per-slot copies if the number of frames in flight
    /// changed since they were created. Returns whether anything changed.
    pub(crate) fn sync_frames_in_flight(&self) -> bool {
        if !self.info.multi_buffered {
            return false;
        }
        self.match_frames_in_flight(&mut self.copies.lock())
    }

    fn match_frames_in_flight(&self, copies: &mut BufferCopies) -> bool {
        let frames_in_flight = self.device.frames_in_flight();
        if copies.handles.len() == frames_in_flight {
            return false;
        }

        log::debug!(
            "Reallocating buffer '{}' for {frames_in_flight} frames in flight",
            self.label()
        );
        let handles = create_copies(&self.device, &self.info, frames_in_flight)
            .or_fatal(&format!("reallocating buffer '{}'", self.label()));
        for old in std::mem::replace(&mut copies.handles, handles) {
            self.device.defer_destroy(DeferredResource::Buffer(old));
        }
        copies.dirty = vec![true; frames_in_flight];
        true
    }
}

fn create_copies(
    device: &GraphicsDevice,
    info: &BufferCreateInfo,
    count: usize,
) -> Result<Vec<BufferHandle>, GraphicsError> {
    let mut usage = info.usage;
    if info.residency == MemoryResidency::DeviceResident {
        usage |= BufferUsage::COPY_DST;
    }
    let label = info.label.as_deref().unwrap_or("unnamed");

    let mut handles = Vec::with_capacity(count);
    for slot in 0..count {
        let descriptor = BufferDescriptor::new(info.size(), usage)
            .with_label(if count > 1 {
                format!("{label}[{slot}]")
            } else {
                label.to_string()
            })
            .with_residency(info.residency);
        match device.backend().create_buffer(&descriptor) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                for handle in handles {
                    device.defer_destroy(DeferredResource::Buffer(handle));
                }
                return Err(e);
            }
        }
    }
    Ok(handles)
}

impl Drop for Buffer {
    fn drop(&mut self) {
        for handle in self.copies.get_mut().handles.drain(..) {
            self.device.defer_destroy(DeferredResource::Buffer(handle));
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("label", &self.info.label)
            .field("size", &self.size())
            .field("usage", &self.info.usage)
            .field("residency", &self.info.residency)
            .field("multi_buffered", &self.info.multi_buffered)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::device::DeviceParameters;

    fn create_test_device(frames_in_flight: usize) -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::with_backend(
            backend.clone(),
            DeviceParameters::new().with_frames_in_flight(frames_in_flight),
        )
        .unwrap();
        (backend, device)
    }

    #[test]
    fn test_single_buffered_writes_through() {
        let (_, device) = create_test_device(2);
        let buffer =
            Buffer::create(&device, 4, 4, BufferUsage::STORAGE, MemoryResidency::HostVisible, false)
                .unwrap();

        buffer.write_to_buffer(&[1, 2, 3, 4], 8);
        assert!(!buffer.flush());
        assert_eq!(buffer.read_back(8, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(buffer.handle_for_slot(0), buffer.handle_for_slot(1));
    }

    #[test]
    fn test_multi_buffered_flush_only_when_dirty() {
        let (_, device) = create_test_device(2);
        let buffer = Buffer::with_info(
            &device,
            BufferCreateInfo::new(16, 1, BufferUsage::UNIFORM)
                .with_label("globals")
                .multi_buffered(),
        )
        .unwrap();

        assert!(!buffer.flush());
        buffer.write_pod(&[7u32; 4], 0);
        assert!(buffer.flush());
        assert!(!buffer.flush());
        assert_eq!(buffer.read_slot(0, 0, 4).unwrap(), 7u32.to_ne_bytes().to_vec());
        assert_eq!(buffer.read_slot(1, 0, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_device_resident_uses_staging() {
        let (backend, device) = create_test_device(2);
        let buffer = Buffer::create(
            &device,
            8,
            1,
            BufferUsage::VERTEX,
            MemoryResidency::DeviceResident,
            false,
        )
        .unwrap();

        buffer.write_slice(&[1.0f32, 2.0], 0);
        let stats = backend.stats();
        assert_eq!(stats.buffer_copies, 1);
        assert_eq!(stats.buffers_created, 2);
        assert_eq!(device.deletion_queue().pending_count(), 1);
        assert_eq!(
            buffer.read_back(0, 8).unwrap(),
            bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0]).to_vec()
        );
    }

    #[test]
    fn test_copy_between_buffers() {
        let (_, device) = create_test_device(2);
        let src =
            Buffer::create(&device, 4, 1, BufferUsage::COPY_SRC, MemoryResidency::HostVisible, false)
                .unwrap();
        let dst =
            Buffer::create(&device, 4, 2, BufferUsage::COPY_DST, MemoryResidency::HostVisible, false)
                .unwrap();
        src.write_to_buffer(&[9, 9, 9, 9], 0);
        dst.copy(&src, 4);
        assert_eq!(dst.read_back(0, 8).unwrap(), vec![0, 0, 0, 0, 9, 9, 9, 9]);
    }

    #[test]
    #[should_panic(expected = "too small: 8 bytes required, 4 available")]
    fn test_copy_into_undersized_buffer_is_fatal() {
        let (_, device) = create_test_device(2);
        let src =
            Buffer::create(&device, 8, 1, BufferUsage::COPY_SRC, MemoryResidency::HostVisible, false)
                .unwrap();
        let dst =
            Buffer::create(&device, 4, 1, BufferUsage::COPY_DST, MemoryResidency::HostVisible, false)
                .unwrap();
        dst.copy(&src, 0);
    }

    #[test]
    #[should_panic(expected = "writing buffer 'tiny'")]
    fn test_write_past_end_is_fatal() {
        let (_, device) = create_test_device(2);
        let buffer = Buffer::with_info(
            &device,
            BufferCreateInfo::new(4, 1, BufferUsage::UNIFORM).with_label("tiny"),
        )
        .unwrap();
        buffer.write_to_buffer(&[0; 8], 0);
    }

    #[test]
    #[should_panic(expected = "destination is multi-buffered")]
    fn test_copy_into_multi_buffered_is_fatal() {
        let (_, device) = create_test_device(2);
        let src =
            Buffer::create(&device, 4, 1, BufferUsage::COPY_SRC, MemoryResidency::HostVisible, false)
                .unwrap();
        let dst = Buffer::with_info(
            &device,
            BufferCreateInfo::new(4, 1, BufferUsage::UNIFORM | BufferUsage::COPY_DST)
                .multi_buffered(),
        )
        .unwrap();
        dst.copy(&src, 0);
    }

    #[test]
    #[should_panic(expected = "writing instance 18446744073709551615 of buffer 'instances'")]
    fn test_instance_offset_overflow_is_fatal() {
        let (_, device) = create_test_device(2);
        let buffer = Buffer::with_info(
            &device,
            BufferCreateInfo::new(16, 4, BufferUsage::STORAGE).with_label("instances"),
        )
        .unwrap();
        buffer.write_instance(u64::MAX, &[0f32; 4]);
    }

    #[test]
    fn test_zero_size_rejected() {
        let (_, device) = create_test_device(2);
        let result = Buffer::with_info(&device, BufferCreateInfo::new(0, 4, BufferUsage::UNIFORM));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_drop_defers_destruction() {
        let (backend, device) = create_test_device(2);
        let buffer = Buffer::with_info(
            &device,
            BufferCreateInfo::new(4, 1, BufferUsage::UNIFORM).multi_buffered(),
        )
        .unwrap();
        let handles = [buffer.handle_for_slot(0).unwrap(), buffer.handle_for_slot(1).unwrap()];
        drop(buffer);

        assert!(handles.iter().all(|&h| backend.is_buffer_alive(h)));
        device.shutdown().unwrap();
        assert!(handles.iter().all(|&h| !backend.is_buffer_alive(h)));
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_reallocates_when_frames_in_flight_change() {
        let (backend, device) = create_test_device(2);
        let buffer = Buffer::with_info(
            &device,
            BufferCreateInfo::new(4, 1, BufferUsage::UNIFORM).multi_buffered(),
        )
        .unwrap();
        buffer.write_to_buffer(&[5; 4], 0);
        assert!(buffer.flush());

        device.set_frames_in_flight(3).unwrap();
        assert!(buffer.flush());
        assert!(buffer.handle_for_slot(2).is_some());
        assert_eq!(backend.live_buffers(), 3 + 2);
    }

    #[test]
    fn test_sync_frames_in_flight_before_flush() {
        let (backend, device) = create_test_device(2);
        let buffer = Buffer::with_info(
            &device,
            BufferCreateInfo::new(4, 1, BufferUsage::UNIFORM).multi_buffered(),
        )
        .unwrap();
        let single =
            Buffer::create(&device, 4, 1, BufferUsage::UNIFORM, MemoryResidency::HostVisible, false)
                .unwrap();
        buffer.write_to_buffer(&[5; 4], 0);
        assert!(buffer.flush());
        let old = buffer.handle_for_slot(0).unwrap();

        device.set_frames_in_flight(3).unwrap();
        assert!(buffer.sync_frames_in_flight());
        assert!(!buffer.sync_frames_in_flight());
        assert!(!single.sync_frames_in_flight());
        assert_ne!(buffer.handle_for_slot(0), Some(old));

        // The new copies start dirty, so each slot is seeded from the shadow.
        assert!(buffer.flush());
        assert_eq!(buffer.read_slot(0, 0, 4).unwrap(), vec![5; 4]);
        device.shutdown().unwrap();
        assert!(!backend.is_buffer_alive(old));
    }
}
