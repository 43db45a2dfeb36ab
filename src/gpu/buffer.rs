// gpu/buffer.rs — Device buffers and host ↔ device transfers.
//
// DEVICE PIXEL LAYOUT
// ───────────────────
// WGSL storage buffers have no 8-bit element type, so every pixel occupies
// one u32 word on the device:
//
//   grey / disparity   word = value            (0..=255)
//   RGBA               word = R | G<<8 | B<<16 | A<<24
//
// The RGBA word is exactly the little-endian reading of the four channel
// bytes, so packing is a per-pixel `from_le_bytes`.
//
// STAGING
// ───────
// Kernels only ever touch device-local storage buffers. Uploads go through
// a host-writable staging buffer, created already filled, then copied
// staging → device on the caller's stream. Readbacks copy device → a
// host-readable staging buffer, finish the stream and map it.
//
// NEW RUST CONCEPTS:
// - `buffer.slice(..).map_async(MapMode::Read, cb)` — asynchronous map
//   request. The callback fires from inside `device.poll`, so we poll with
//   `Maintain::Wait` and then receive the result from a channel.
// - `bytemuck::pod_collect_to_vec` — copies mapped bytes into a `Vec<T>`
//   without requiring the mapped range to be aligned for `T`.

use wgpu::util::DeviceExt;

use crate::error::{DepthError, Result};
use crate::gpu::device::GpuDevice;
use crate::gpu::stream::CommandStream;
use crate::image::{Image, Pixel, Rgba};

/// Size of one device pixel in bytes.
pub const WORD: u64 = 4;

/// What a buffer will be used for; decides its wgpu usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    /// Kernel input, filled by a copy from staging.
    ReadOnly,
    /// Kernel read/write, can be copied in and out.
    ReadWrite,
    /// Upload staging: written by the host, copied to the device.
    HostWrite,
    /// Readback staging: copied into from the device, mapped by the host.
    HostRead,
    /// Kernel scratch, never copied.
    DeviceOnly,
}

impl BufferAccess {
    pub fn usages(self) -> wgpu::BufferUsages {
        use wgpu::BufferUsages as U;
        match self {
            BufferAccess::ReadOnly => U::STORAGE | U::COPY_DST,
            BufferAccess::ReadWrite => U::STORAGE | U::COPY_SRC | U::COPY_DST,
            BufferAccess::HostWrite => U::MAP_WRITE | U::COPY_SRC,
            BufferAccess::HostRead => U::MAP_READ | U::COPY_DST,
            BufferAccess::DeviceOnly => U::STORAGE,
        }
    }

    /// Can be bound as a kernel storage argument.
    pub fn is_storage(self) -> bool {
        self.usages().contains(wgpu::BufferUsages::STORAGE)
    }

    /// Can be bound as a kernel output. `ReadOnly` is the kernel's view,
    /// not the device's: the buffer is technically writable, but binding
    /// it as an output would break the intent it was allocated with.
    pub fn is_kernel_writable(self) -> bool {
        matches!(self, BufferAccess::ReadWrite | BufferAccess::DeviceOnly)
    }
}

/// An owned device allocation. Dropping it releases the memory.
pub struct DeviceBuffer {
    pub(crate) buffer: wgpu::Buffer,
    size: u64,
    access: BufferAccess,
    label: String,
}

impl DeviceBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        tracing::trace!(label = %self.label, size = self.size, "releasing buffer");
    }
}

/// A device buffer holding a `width × height` pixel grid.
pub struct DeviceImage {
    pub buffer: DeviceBuffer,
    pub width: u32,
    pub height: u32,
}

impl DeviceImage {
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }
}

/// Allocate a device buffer of `size` bytes, optionally filled with `contents`.
///
/// Allocation runs inside out-of-memory and validation error scopes, so a
/// failed allocation is reported here rather than at first use.
pub fn allocate(
    gpu: &GpuDevice,
    label: &str,
    access: BufferAccess,
    size: u64,
    contents: Option<&[u8]>,
) -> Result<DeviceBuffer> {
    let fail = |reason: String| DepthError::BufferAllocation {
        label: label.to_string(),
        size,
        reason,
    };
    if size == 0 || size % WORD != 0 {
        return Err(fail("size must be a non-zero multiple of 4".into()));
    }
    if size > gpu.limits.max_buffer_size {
        return Err(fail(format!("device maximum is {} bytes", gpu.limits.max_buffer_size)));
    }
    if access.is_storage() && size > gpu.limits.max_storage_buffer_binding_size as u64 {
        return Err(fail(format!(
            "storage bindings are limited to {} bytes",
            gpu.limits.max_storage_buffer_binding_size
        )));
    }
    if let Some(bytes) = contents {
        if bytes.len() as u64 != size {
            return Err(fail(format!("{} initial bytes supplied", bytes.len())));
        }
    }

    gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let usage = access.usages();
    let buffer = match contents {
        Some(bytes) => gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytes,
            usage,
        }),
        None => gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }),
    };
    let validation = pollster::block_on(gpu.device.pop_error_scope());
    let out_of_memory = pollster::block_on(gpu.device.pop_error_scope());
    if let Some(err) = validation.or(out_of_memory) {
        return Err(fail(err.to_string()));
    }

    tracing::trace!(label, size, ?access, "allocated buffer");
    Ok(DeviceBuffer {
        buffer,
        size,
        access,
        label: label.to_string(),
    })
}

/// Pixels that have a one-word device representation.
pub trait DevicePixel: Pixel {
    fn to_word(self) -> u32;
    fn from_word(word: u32) -> Self;
}

impl DevicePixel for u8 {
    #[inline]
    fn to_word(self) -> u32 {
        self as u32
    }

    #[inline]
    fn from_word(word: u32) -> Self {
        word as u8
    }
}

impl DevicePixel for Rgba {
    #[inline]
    fn to_word(self) -> u32 {
        u32::from_le_bytes(bytemuck::cast(self))
    }

    #[inline]
    fn from_word(word: u32) -> Self {
        bytemuck::cast(word.to_le_bytes())
    }
}

/// Device buffer size for a `width × height` grid.
pub fn image_bytes(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * WORD
}

/// Upload `img` into a new `ReadOnly` device buffer on `stream`.
///
/// The staging buffer is handed to the stream and released at its next
/// barrier.
pub fn transfer_in<T: DevicePixel>(
    gpu: &GpuDevice,
    stream: &mut CommandStream,
    label: &str,
    img: &Image<T>,
) -> Result<DeviceImage> {
    let (width, height) = (img.width() as u32, img.height() as u32);
    let size = image_bytes(width, height);
    let words: Vec<u32> = img.as_slice().iter().map(|&p| p.to_word()).collect();

    let staging = allocate(
        gpu,
        &format!("{label} staging"),
        BufferAccess::HostWrite,
        size,
        Some(bytemuck::cast_slice(&words)),
    )?;
    let buffer = allocate(gpu, label, BufferAccess::ReadOnly, size, None)?;

    stream
        .encoder(gpu)
        .copy_buffer_to_buffer(&staging.buffer, 0, &buffer.buffer, 0, size);
    stream.retain(staging);
    tracing::debug!(label, width, height, stream = %stream.id(), "transfer in");

    Ok(DeviceImage { buffer, width, height })
}

/// Download a device image. Finishes `stream` before reading.
pub fn transfer_out<T: DevicePixel>(
    gpu: &GpuDevice,
    stream: &mut CommandStream,
    src: &DeviceImage,
) -> Result<Image<T>> {
    let size = src.buffer.size();
    let staging = allocate(
        gpu,
        &format!("{} readback", src.buffer.label()),
        BufferAccess::HostRead,
        size,
        None,
    )?;
    stream
        .encoder(gpu)
        .copy_buffer_to_buffer(&src.buffer.buffer, 0, &staging.buffer, 0, size);
    stream.finish(gpu)?;

    let words: Vec<u32> = read_mapped(gpu, &staging)?;
    tracing::debug!(label = src.buffer.label(), width = src.width, height = src.height, "transfer out");
    Ok(Image::from_vec(
        src.width as usize,
        src.height as usize,
        words.into_iter().map(T::from_word).collect(),
    ))
}

/// Map a `HostRead` buffer whose contents are already final and copy them out.
pub(crate) fn read_mapped<T: bytemuck::Pod>(gpu: &GpuDevice, staging: &DeviceBuffer) -> Result<Vec<T>> {
    let fail = |reason: String| DepthError::Readback {
        label: staging.label().to_string(),
        reason,
    };
    let slice = staging.buffer.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        // The receiver outlives the poll below; a failed send only means
        // we already gave up.
        let _ = sender.send(result);
    });
    gpu.device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|e| fail(e.to_string()))?
        .map_err(|e| fail(e.to_string()))?;

    let mapped = slice.get_mapped_range();
    let data: Vec<T> = bytemuck::pod_collect_to_vec(&mapped);
    drop(mapped);
    staging.buffer.unmap();
    Ok(data)
}
