//! Indirect dispatch sizing.
//!
//! Every kernel runs on 16×16×1 thread groups laid out as a square grid.
//! To cover `n` items the host writes `[g, g, 1]` into an argument buffer
//! with
//!
//! ```text
//! g = ceil(sqrt(n) / 16)
//! ```
//!
//! computed in integers as `ceil(ceil_sqrt(n) / 16)`, which is the same
//! value without float rounding at perfect squares. Threads past `n` at
//! the tail of the grid return immediately.
//!
//! | n | g | threads |
//! |---|---|---------|
//! | 1 | 1 | 256 |
//! | 256 | 1 | 256 |
//! | 257 | 2 | 1,024 |
//! | 65,000 | 16 | 65,536 |
//! | 1,048,576 | 64 | 1,048,576 |

use bytemuck::{Pod, Zeroable};
use log::debug;

use crate::config::SpawnSizing;
use crate::error::DustError;
use crate::kernel::{Backend, Handle, Kernel};
use crate::pool::ParticlePool;

/// Threads along each edge of a thread group (`@workgroup_size(16, 16, 1)`).
pub const THREADS_PER_GROUP_EDGE: u32 = 16;

/// Threads in one group.
pub const THREADS_PER_GROUP: u32 = THREADS_PER_GROUP_EDGE * THREADS_PER_GROUP_EDGE;

/// Indirect compute dispatch arguments, as read by `dispatch_workgroups_indirect`.
///
/// Not to be confused with [`DrawIndirectArgs`](crate::render::DrawIndirectArgs),
/// which only renderers use.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchArgs {
    /// Size of the argument buffer in bytes.
    pub const SIZE: u64 = std::mem::size_of::<DispatchArgs>() as u64;

    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Square grid covering `n` threads. `n == 0` gives an empty grid.
    pub fn for_count(n: u32) -> Self {
        let g = groups_for_count(n);
        Self::new(g, g, if g == 0 { 0 } else { 1 })
    }

    /// Total thread groups in the grid.
    pub fn group_count(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// Total threads launched by the grid.
    pub fn thread_count(&self) -> u64 {
        self.group_count() * THREADS_PER_GROUP as u64
    }

    /// A grid with no groups, which must never be submitted.
    pub fn is_empty(&self) -> bool {
        self.group_count() == 0
    }

    pub fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Smallest `r` with `r * r >= n`.
pub fn ceil_sqrt(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let n = n as u64;
    let mut r = (n as f64).sqrt() as u64;
    while r * r < n {
        r += 1;
    }
    while r > 1 && (r - 1) * (r - 1) >= n {
        r -= 1;
    }
    r as u32
}

/// Groups along X (and Y) needed to cover `n` threads.
pub fn groups_for_count(n: u32) -> u32 {
    ceil_sqrt(n).div_ceil(THREADS_PER_GROUP_EDGE)
}

/// Result of sizing a dispatch from a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Nothing to do; no dispatch may be issued.
    Skip,
    /// The argument buffer holds these values.
    Dispatch(DispatchArgs),
}

/// Result of sizing the Spawn dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnDispatch {
    /// No slot can be filled this tick. Spawn is not dispatched.
    Skip,
    /// Spawn `count` particles with the given grid.
    Dispatch { count: u32, args: DispatchArgs },
}

impl SpawnDispatch {
    pub fn count(&self) -> u32 {
        match self {
            SpawnDispatch::Skip => 0,
            SpawnDispatch::Dispatch { count, .. } => *count,
        }
    }
}

/// What the host knows about an argument buffer's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgsState {
    Unwritten,
    Host(DispatchArgs),
    /// Written by a kernel; unknown to the host.
    Device,
}

/// Owner of one indirect argument buffer.
///
/// Tracks what was last uploaded so an unchanged count is never uploaded
/// twice, and refuses to hand out a buffer that would launch zero groups.
pub struct DispatchArgBuilder<B: Backend> {
    label: &'static str,
    buffer: Handle<B::Args>,
    state: ArgsState,
    uploads: u64,
    last_free_count: Option<u32>,
}

impl<B: Backend> DispatchArgBuilder<B> {
    /// Allocate the argument buffer.
    pub fn new(backend: &mut B, label: &'static str) -> Result<Self, DustError> {
        let mut builder = Self::unallocated(label);
        builder.allocate(backend)?;
        Ok(builder)
    }

    /// A builder that owns no buffer yet.
    pub fn unallocated(label: &'static str) -> Self {
        Self {
            label,
            buffer: Handle::Empty,
            state: ArgsState::Unwritten,
            uploads: 0,
            last_free_count: None,
        }
    }

    pub fn allocate(&mut self, backend: &mut B) -> Result<(), DustError> {
        match self.buffer {
            Handle::Live(_) => return Err(DustError::AlreadyInitialized),
            Handle::Released => return Err(DustError::Released(self.label)),
            Handle::Empty => {}
        }
        let args = backend.create_args(self.label)?;
        self.buffer.replace(args);
        Ok(())
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Size the buffer for `n` threads.
    ///
    /// Uploads only when the grid differs from the last upload. `n == 0`
    /// uploads nothing and returns [`DispatchDecision::Skip`].
    pub fn build_from_count(&mut self, backend: &mut B, n: u32) -> Result<DispatchDecision, DustError> {
        let buffer = self.buffer.get_mut(self.label)?;
        if n == 0 {
            return Ok(DispatchDecision::Skip);
        }

        let args = DispatchArgs::for_count(n);
        if self.state != ArgsState::Host(args) {
            backend.write_args(buffer, args);
            self.state = ArgsState::Host(args);
            self.uploads += 1;
            debug!("{}: {:?} for {} threads", self.label, args.to_array(), n);
        }
        Ok(DispatchDecision::Dispatch(args))
    }

    /// Size the Spawn dispatch from the spawn budget and the free slots.
    ///
    /// With [`SpawnSizing::Readback`] the free count is read back first
    /// (a host stall) and the grid covers exactly `min(budget, free)`.
    /// With [`SpawnSizing::WorstCase`] there is no readback: the grid covers
    /// `min(budget, capacity)` and the kernel stops at an empty dead-list.
    pub fn build_from_live_free_count(
        &mut self,
        backend: &mut B,
        pool: &ParticlePool<B>,
        budget: u32,
        sizing: SpawnSizing,
    ) -> Result<SpawnDispatch, DustError> {
        let count = match sizing {
            SpawnSizing::Readback => {
                let free = pool.free_count(backend)?;
                self.last_free_count = Some(free);
                budget.min(free)
            }
            SpawnSizing::WorstCase => {
                self.last_free_count = None;
                budget.min(pool.capacity())
            }
        };

        match self.build_from_count(backend, count)? {
            DispatchDecision::Skip => Ok(SpawnDispatch::Skip),
            DispatchDecision::Dispatch(args) => Ok(SpawnDispatch::Dispatch { count, args }),
        }
    }

    /// Record that a kernel rewrote the buffer on the device.
    pub fn mark_device_written(&mut self) {
        self.state = ArgsState::Device;
    }

    /// Write a grid directly, bypassing count sizing.
    pub(crate) fn write(&mut self, backend: &mut B, args: DispatchArgs) -> Result<(), DustError> {
        let buffer = self.buffer.get_mut(self.label)?;
        backend.write_args(buffer, args);
        self.state = ArgsState::Host(args);
        self.uploads += 1;
        Ok(())
    }

    /// The buffer, if it may be dispatched for `kernel`.
    pub fn dispatchable(&self, kernel: Kernel) -> Result<&B::Args, DustError> {
        let buffer = self.buffer.get(self.label)?;
        match self.state {
            ArgsState::Unwritten => Err(DustError::NotInitialized(self.label)),
            ArgsState::Host(args) if args.is_empty() => Err(DustError::DegenerateDispatch(kernel)),
            _ => Ok(buffer),
        }
    }

    pub(crate) fn buffer_mut(&mut self) -> Result<&mut B::Args, DustError> {
        self.buffer.get_mut(self.label)
    }

    /// Last grid uploaded from the host, if the host still knows it.
    pub fn current(&self) -> Option<DispatchArgs> {
        match self.state {
            ArgsState::Host(args) => Some(args),
            _ => None,
        }
    }

    /// Number of uploads performed so far.
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    /// Free slots observed by the last Readback sizing.
    pub fn last_free_count(&self) -> Option<u32> {
        self.last_free_count
    }

    pub fn is_live(&self) -> bool {
        self.buffer.is_live()
    }

    /// Release the argument buffer. A second call returns [`DustError::Released`].
    pub fn release(&mut self, backend: &mut B) -> Result<(), DustError> {
        let buffer = self.buffer.take(self.label)?;
        backend.release_args(buffer);
        self.state = ArgsState::Unwritten;
        Ok(())
    }
}
