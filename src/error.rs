//! Error types for Dust.
//!
//! This module provides error types for device initialization, pool
//! lifecycle misuse and invalid emission data.

use std::fmt;

use crate::kernel::Kernel;

/// Errors that can occur while creating or driving the compute device.
#[derive(Debug)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// A compute program failed to compile or its entry point is missing.
    MissingKernel {
        /// Kernel whose pipeline could not be built.
        kernel: Kernel,
        /// Validation message reported by the device.
        message: String,
    },
    /// Failed to map buffer for reading.
    BufferMapping(String),
    /// A buffer would exceed the device's binding limit.
    BufferTooLarge {
        /// Requested size in bytes.
        size: u64,
        /// Device limit in bytes.
        limit: u64,
    },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::MissingKernel { kernel, message } => {
                write!(f, "Compute kernel '{}' is unavailable: {}", kernel.entry_point(), message)
            }
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
            GpuError::BufferTooLarge { size, limit } => write!(
                f,
                "Buffer of {} bytes exceeds the device storage binding limit of {} bytes",
                size, limit
            ),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// Errors raised by the particle pool protocol.
///
/// Everything except [`DustError::Gpu`] is a programmer or configuration
/// error: the simulation must not proceed. A spawn budget larger than the
/// number of free slots is *not* an error, fewer particles simply spawn.
#[derive(Debug)]
pub enum DustError {
    /// Pool capacity of zero was requested.
    ZeroCapacity,
    /// Pool capacity is above what a single pool supports.
    CapacityTooLarge {
        /// Requested capacity.
        requested: u32,
        /// Largest supported capacity.
        max: u32,
    },
    /// `initialize` was called on a pool that already owns buffers.
    AlreadyInitialized,
    /// A component was used before it was initialized.
    NotInitialized(&'static str),
    /// A component was used or released after its buffers were released.
    Released(&'static str),
    /// A dispatch with zero thread groups was about to be submitted.
    DegenerateDispatch(Kernel),
    /// The emission mesh cannot be sampled.
    InvalidMesh(String),
    /// The simulation configuration is inconsistent.
    InvalidConfig(String),
    /// Device-level failure.
    Gpu(GpuError),
}

impl fmt::Display for DustError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DustError::ZeroCapacity => write!(f, "Particle pool capacity must be greater than zero"),
            DustError::CapacityTooLarge { requested, max } => write!(
                f,
                "Particle pool capacity {} exceeds the maximum of {}",
                requested, max
            ),
            DustError::AlreadyInitialized => write!(f, "Particle pool is already initialized"),
            DustError::NotInitialized(what) => write!(f, "{} used before initialization", what),
            DustError::Released(what) => write!(f, "{} used after its buffers were released", what),
            DustError::DegenerateDispatch(kernel) => write!(
                f,
                "Refusing to dispatch '{}' with zero thread groups",
                kernel.entry_point()
            ),
            DustError::InvalidMesh(msg) => write!(f, "Invalid emission mesh: {}", msg),
            DustError::InvalidConfig(msg) => write!(f, "Invalid simulation config: {}", msg),
            DustError::Gpu(e) => write!(f, "GPU error: {}", e),
        }
    }
}

impl std::error::Error for DustError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DustError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for DustError {
    fn from(e: GpuError) -> Self {
        DustError::Gpu(e)
    }
}
