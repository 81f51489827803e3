//! The kernel contract and the backends that execute it.
//!
//! A tick is three compute kernels over one particle pool, plus a one-thread
//! helper used when Update is sized on the device:
//!
//! | Kernel | Reads | Writes |
//! |--------|-------|--------|
//! | [`Kernel::Init`] | params | every record, full dead-list |
//! | [`Kernel::Spawn`] | params, mesh | popped records, `high_water` |
//! | [`Kernel::SizeUpdate`] | `high_water` | Update's indirect args |
//! | [`Kernel::Update`] | params, ramps | live records, appended dead slots |
//!
//! Within one dispatch the dead-list is either only consumed (Spawn) or only
//! appended to (Init, Update).
//!
//! Kernels are referred to by enum everywhere; backends resolve every entry
//! point once, when they are created, and report a missing one as
//! [`GpuError::MissingKernel`](crate::GpuError::MissingKernel).

use crate::dispatch::DispatchArgs;
use crate::error::DustError;
use crate::mesh::MeshVertex;
use crate::params::SimParams;
use crate::particle::Particle;
use crate::ramp::{RampKind, RampTexels};

/// One compute kernel of the pool protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Init,
    Spawn,
    Update,
    SizeUpdate,
}

impl Kernel {
    pub const ALL: [Kernel; 4] = [Kernel::Init, Kernel::Spawn, Kernel::Update, Kernel::SizeUpdate];

    /// WGSL entry point name.
    pub fn entry_point(&self) -> &'static str {
        match self {
            Kernel::Init => "init",
            Kernel::Spawn => "spawn",
            Kernel::Update => "update",
            Kernel::SizeUpdate => "size_update",
        }
    }
}

/// The three lookup ramps bound to the Update kernel.
pub struct RampBindings<'a, R> {
    pub size_over_life: &'a R,
    pub color_over_life: &'a R,
    pub color_over_velocity: &'a R,
}

/// Executor of the kernel contract.
///
/// Resources are opaque handles owned by the component that created them.
/// Every `release_*` takes its handle by value, so a handle can only be
/// released once.
pub trait Backend {
    /// Particle buffer, dead-list and counters of one pool.
    type Pool;
    /// One indirect dispatch argument buffer (3×u32).
    type Args;
    /// Packed emission mesh (vertex and triangle buffers).
    type Mesh;
    /// One 1024×1 lookup texture.
    type Ramp;

    /// Short name for log messages.
    fn name(&self) -> &'static str;

    /// Allocate a zeroed pool of `capacity` slots.
    fn create_pool(&mut self, capacity: u32) -> Result<Self::Pool, DustError>;
    fn release_pool(&mut self, pool: Self::Pool);

    /// Allocate an argument buffer. Its contents are undefined until written.
    fn create_args(&mut self, label: &'static str) -> Result<Self::Args, DustError>;
    fn write_args(&mut self, args: &mut Self::Args, value: DispatchArgs);
    fn release_args(&mut self, args: Self::Args);

    fn create_mesh(
        &mut self,
        vertices: &[MeshVertex],
        triangles: &[u32],
    ) -> Result<Self::Mesh, DustError>;
    fn release_mesh(&mut self, mesh: Self::Mesh);

    fn create_ramp(&mut self, kind: RampKind) -> Result<Self::Ramp, DustError>;
    fn write_ramp(&mut self, ramp: &mut Self::Ramp, texels: &RampTexels);
    fn release_ramp(&mut self, ramp: Self::Ramp);

    /// Write default records and list every slot as free.
    fn dispatch_init(
        &mut self,
        pool: &mut Self::Pool,
        args: &Self::Args,
        params: &SimParams,
    ) -> Result<(), DustError>;

    /// Pop up to `params.spawn_count()` free slots and initialise them.
    fn dispatch_spawn(
        &mut self,
        pool: &mut Self::Pool,
        args: &Self::Args,
        mesh: Option<&Self::Mesh>,
        params: &SimParams,
    ) -> Result<(), DustError>;

    /// Write Update's arguments from the spawn high-water mark.
    fn dispatch_size_update(
        &mut self,
        pool: &mut Self::Pool,
        update_args: &mut Self::Args,
    ) -> Result<(), DustError>;

    /// Age, integrate and recycle live particles.
    fn dispatch_update(
        &mut self,
        pool: &mut Self::Pool,
        args: &Self::Args,
        ramps: RampBindings<'_, Self::Ramp>,
        params: &SimParams,
    ) -> Result<(), DustError>;

    /// Number of free slots. Blocks until all submitted work has finished.
    fn read_free_count(&mut self, pool: &Self::Pool) -> Result<u32, DustError>;

    /// Copy of every record. Blocks.
    fn read_particles(&mut self, pool: &Self::Pool) -> Result<Vec<Particle>, DustError>;

    /// The free slot indices currently listed, bottom of the stack first. Blocks.
    fn read_dead_list(&mut self, pool: &Self::Pool) -> Result<Vec<u32>, DustError>;

    /// Current contents of an argument buffer. Blocks.
    fn read_args(&mut self, args: &Self::Args) -> Result<DispatchArgs, DustError>;
}

/// Lifecycle slot for a backend handle owned by a component.
#[derive(Debug, Default)]
pub(crate) enum Handle<T> {
    #[default]
    Empty,
    Live(T),
    Released,
}

impl<T> Handle<T> {
    pub(crate) fn is_live(&self) -> bool {
        matches!(self, Handle::Live(_))
    }

    pub(crate) fn get(&self, what: &'static str) -> Result<&T, DustError> {
        match self {
            Handle::Live(handle) => Ok(handle),
            Handle::Empty => Err(DustError::NotInitialized(what)),
            Handle::Released => Err(DustError::Released(what)),
        }
    }

    pub(crate) fn get_mut(&mut self, what: &'static str) -> Result<&mut T, DustError> {
        match self {
            Handle::Live(handle) => Ok(handle),
            Handle::Empty => Err(DustError::NotInitialized(what)),
            Handle::Released => Err(DustError::Released(what)),
        }
    }

    /// Take the handle out for release. Leaves the slot `Released`.
    pub(crate) fn take(&mut self, what: &'static str) -> Result<T, DustError> {
        match std::mem::replace(self, Handle::Released) {
            Handle::Live(handle) => Ok(handle),
            Handle::Empty => {
                *self = Handle::Empty;
                Err(DustError::NotInitialized(what))
            }
            Handle::Released => Err(DustError::Released(what)),
        }
    }

    /// Install a new handle, returning the previous live one.
    pub(crate) fn replace(&mut self, handle: T) -> Option<T> {
        match std::mem::replace(self, Handle::Live(handle)) {
            Handle::Live(old) => Some(old),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_release_is_exactly_once() {
        let mut handle = Handle::Empty;
        assert!(matches!(handle.take("thing"), Err(DustError::NotInitialized("thing"))));

        assert!(handle.replace(7u32).is_none());
        assert_eq!(*handle.get("thing").unwrap(), 7);
        assert_eq!(handle.take("thing").unwrap(), 7);
        assert!(matches!(handle.take("thing"), Err(DustError::Released("thing"))));
        assert!(matches!(handle.get("thing"), Err(DustError::Released("thing"))));
    }

    #[test]
    fn test_entry_points_are_unique() {
        let mut names: Vec<_> = Kernel::ALL.iter().map(|k| k.entry_point()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Kernel::ALL.len());
    }
}
