//! Lookup ramps for size and colour over life / velocity.
//!
//! A ramp is a curve or gradient baked into a 1024×1 texture. The Update
//! kernel looks up `size_over_life` and `color_over_life` by normalised age
//! and `color_over_velocity` by `|velocity| / range`.
//!
//! # Baking
//!
//! Texel `i` holds the function sampled at `t = i / 1024`. Sampling reverses
//! that: `x = clamp(t * 1024, 0, 1023)`, linear between texels `floor(x)`
//! and `floor(x) + 1`. Kernels read texels with `textureLoad`, so 32-bit
//! float formats need no filtering support.
//!
//! A disabled ramp bakes to a constant 1, which leaves the modulated value
//! unchanged.
//!
//! # Example
//!
//! ```ignore
//! let fade = Gradient::new()
//!     .add_key(0.0, Vec4::ONE)
//!     .add_key(1.0, Vec4::new(1.0, 0.3, 0.0, 0.0));
//! let shrink = Curve::linear(1.0, 0.0);
//!
//! let config = SimulationConfig::new()
//!     .with_color_over_life(fade)
//!     .with_size_over_life(shrink);
//! ```

use glam::Vec4;
use log::debug;

use crate::config::SimulationConfig;
use crate::error::DustError;
use crate::kernel::{Backend, Handle, RampBindings};

/// Texels per ramp.
pub const RAMP_WIDTH: u32 = 1024;

/// Piecewise-linear scalar curve over `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    keys: Vec<(f32, f32)>,
}

impl Curve {
    /// A curve with no keys evaluates to 1 everywhere.
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn constant(value: f32) -> Self {
        Self::new().add_key(0.0, value)
    }

    pub fn linear(start: f32, end: f32) -> Self {
        Self::new().add_key(0.0, start).add_key(1.0, end)
    }

    /// Add a key. Keys are kept sorted by time.
    pub fn add_key(mut self, t: f32, value: f32) -> Self {
        let at = self.keys.partition_point(|&(k, _)| k <= t);
        self.keys.insert(at, (t, value));
        self
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        interpolate(&self.keys, t, |a, b, f| a + (b - a) * f).unwrap_or(1.0)
    }
}

impl Default for Curve {
    fn default() -> Self {
        Self::new()
    }
}

/// Piecewise-linear RGBA gradient over `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    keys: Vec<(f32, Vec4)>,
}

impl Gradient {
    /// A gradient with no keys evaluates to white everywhere.
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn constant(color: Vec4) -> Self {
        Self::new().add_key(0.0, color)
    }

    pub fn two_color(start: Vec4, end: Vec4) -> Self {
        Self::new().add_key(0.0, start).add_key(1.0, end)
    }

    pub fn add_key(mut self, t: f32, color: Vec4) -> Self {
        let at = self.keys.partition_point(|&(k, _)| k <= t);
        self.keys.insert(at, (t, color));
        self
    }

    pub fn evaluate(&self, t: f32) -> Vec4 {
        interpolate(&self.keys, t, |a, b, f| a.lerp(b, f)).unwrap_or(Vec4::ONE)
    }
}

impl Default for Gradient {
    fn default() -> Self {
        Self::new()
    }
}

fn interpolate<T: Copy>(keys: &[(f32, T)], t: f32, lerp: impl Fn(T, T, f32) -> T) -> Option<T> {
    let (first, last) = (keys.first()?, keys.last()?);
    if t <= first.0 {
        return Some(first.1);
    }
    if t >= last.0 {
        return Some(last.1);
    }
    let upper = keys.partition_point(|&(k, _)| k <= t);
    let (t0, v0) = keys[upper - 1];
    let (t1, v1) = keys[upper];
    let span = t1 - t0;
    if span <= 0.0 {
        return Some(v1);
    }
    Some(lerp(v0, v1, (t - t0) / span))
}

/// Which ramp a texture holds. Decides the texel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampKind {
    SizeOverLife,
    ColorOverLife,
    ColorOverVelocity,
}

impl RampKind {
    pub fn label(self) -> &'static str {
        match self {
            RampKind::SizeOverLife => "size-over-life ramp",
            RampKind::ColorOverLife => "color-over-life ramp",
            RampKind::ColorOverVelocity => "color-over-velocity ramp",
        }
    }

    pub fn is_scalar(self) -> bool {
        self == RampKind::SizeOverLife
    }
}

/// Baked texels of one ramp.
#[derive(Debug, Clone, PartialEq)]
pub enum RampTexels {
    /// One float per texel (R32Float).
    Scalar(Vec<f32>),
    /// Four floats per texel (Rgba32Float).
    Color(Vec<[f32; 4]>),
}

/// Sample `f` at `i / RAMP_WIDTH` for every texel.
pub fn bake<T>(f: impl Fn(f32) -> T) -> Vec<T> {
    (0..RAMP_WIDTH).map(|i| f(i as f32 / RAMP_WIDTH as f32)).collect()
}

impl RampTexels {
    pub fn from_curve(curve: Option<&Curve>) -> Self {
        match curve {
            Some(curve) => RampTexels::Scalar(bake(|t| curve.evaluate(t))),
            None => RampTexels::Scalar(vec![1.0; RAMP_WIDTH as usize]),
        }
    }

    pub fn from_gradient(gradient: Option<&Gradient>) -> Self {
        match gradient {
            Some(gradient) => RampTexels::Color(bake(|t| gradient.evaluate(t).to_array())),
            None => RampTexels::Color(vec![[1.0; 4]; RAMP_WIDTH as usize]),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            RampTexels::Scalar(t) => t.len() as u32,
            RampTexels::Color(t) => t.len() as u32,
        }
    }

    pub fn bytes_per_texel(&self) -> u32 {
        match self {
            RampTexels::Scalar(_) => 4,
            RampTexels::Color(_) => 16,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RampTexels::Scalar(t) => bytemuck::cast_slice(t),
            RampTexels::Color(t) => bytemuck::cast_slice(t),
        }
    }

    /// Texel `x` as RGBA. Scalar texels read as `(r, 0, 0, 1)`, like
    /// `textureLoad` on an R32Float texture.
    pub fn texel(&self, x: usize) -> Vec4 {
        match self {
            RampTexels::Scalar(t) => Vec4::new(t[x], 0.0, 0.0, 1.0),
            RampTexels::Color(t) => Vec4::from_array(t[x]),
        }
    }

    /// Linear lookup at `t` in `[0, 1]`, clamped at both ends.
    pub fn sample(&self, t: f32) -> Vec4 {
        let width = self.width();
        if width == 0 {
            return Vec4::ONE;
        }
        let max = (width - 1) as f32;
        let x = (t * width as f32).clamp(0.0, max);
        let i0 = x.floor() as usize;
        let i1 = (i0 + 1).min(width as usize - 1);
        self.texel(i0).lerp(self.texel(i1), x - i0 as f32)
    }
}

/// The three ramp textures bound to Update.
pub struct RampSet<B: Backend> {
    size_over_life: Handle<B::Ramp>,
    color_over_life: Handle<B::Ramp>,
    color_over_velocity: Handle<B::Ramp>,
    velocity_range: f32,
}

impl<B: Backend> RampSet<B> {
    /// Create and bake all three ramps from the configuration.
    pub fn new(backend: &mut B, config: &SimulationConfig) -> Result<Self, DustError> {
        let mut set = Self::empty();
        if let Err(e) = set.allocate(backend, config) {
            set.release_live(backend);
            return Err(e);
        }
        Ok(set)
    }

    /// A set that owns no textures yet.
    pub fn empty() -> Self {
        Self {
            size_over_life: Handle::Empty,
            color_over_life: Handle::Empty,
            color_over_velocity: Handle::Empty,
            velocity_range: 1.0,
        }
    }

    /// Create the three textures and bake them. On error the textures
    /// created so far stay owned by the set.
    pub fn allocate(&mut self, backend: &mut B, config: &SimulationConfig) -> Result<(), DustError> {
        if self.is_live() {
            return Err(DustError::AlreadyInitialized);
        }
        for kind in [RampKind::SizeOverLife, RampKind::ColorOverLife, RampKind::ColorOverVelocity] {
            let ramp = backend.create_ramp(kind)?;
            self.slot_mut(kind).replace(ramp);
        }
        self.set_size_over_life(backend, config.size_over_life.as_ref())?;
        self.set_color_over_life(backend, config.color_over_life.as_ref())?;
        match &config.color_over_velocity {
            Some(v) => self.set_color_over_velocity(backend, Some(&v.gradient), v.range),
            None => self.set_color_over_velocity(backend, None, 1.0),
        }
    }

    fn slot_mut(&mut self, kind: RampKind) -> &mut Handle<B::Ramp> {
        match kind {
            RampKind::SizeOverLife => &mut self.size_over_life,
            RampKind::ColorOverLife => &mut self.color_over_life,
            RampKind::ColorOverVelocity => &mut self.color_over_velocity,
        }
    }

    fn upload(&mut self, backend: &mut B, kind: RampKind, texels: RampTexels) -> Result<(), DustError> {
        let ramp = self.slot_mut(kind).get_mut(kind.label())?;
        backend.write_ramp(ramp, &texels);
        debug!("Baked {} ({} texels)", kind.label(), texels.width());
        Ok(())
    }

    /// Re-bake the size ramp. `None` disables it.
    pub fn set_size_over_life(&mut self, backend: &mut B, curve: Option<&Curve>) -> Result<(), DustError> {
        self.upload(backend, RampKind::SizeOverLife, RampTexels::from_curve(curve))
    }

    /// Re-bake the colour-over-life ramp. `None` disables it.
    pub fn set_color_over_life(
        &mut self,
        backend: &mut B,
        gradient: Option<&Gradient>,
    ) -> Result<(), DustError> {
        self.upload(backend, RampKind::ColorOverLife, RampTexels::from_gradient(gradient))
    }

    /// Re-bake the colour-over-velocity ramp and set the speed mapped to its end.
    pub fn set_color_over_velocity(
        &mut self,
        backend: &mut B,
        gradient: Option<&Gradient>,
        range: f32,
    ) -> Result<(), DustError> {
        if !(range > 0.0) {
            return Err(DustError::InvalidConfig(format!(
                "color-over-velocity range must be positive, got {}",
                range
            )));
        }
        self.upload(backend, RampKind::ColorOverVelocity, RampTexels::from_gradient(gradient))?;
        self.velocity_range = range;
        Ok(())
    }

    pub fn velocity_range(&self) -> f32 {
        self.velocity_range
    }

    pub fn bindings(&self) -> Result<RampBindings<'_, B::Ramp>, DustError> {
        Ok(RampBindings {
            size_over_life: self.size_over_life.get(RampKind::SizeOverLife.label())?,
            color_over_life: self.color_over_life.get(RampKind::ColorOverLife.label())?,
            color_over_velocity: self.color_over_velocity.get(RampKind::ColorOverVelocity.label())?,
        })
    }

    pub fn is_live(&self) -> bool {
        self.size_over_life.is_live()
            || self.color_over_life.is_live()
            || self.color_over_velocity.is_live()
    }

    fn release_live(&mut self, backend: &mut B) {
        for kind in [RampKind::SizeOverLife, RampKind::ColorOverLife, RampKind::ColorOverVelocity] {
            let slot = self.slot_mut(kind);
            if slot.is_live() {
                if let Ok(ramp) = slot.take(kind.label()) {
                    backend.release_ramp(ramp);
                }
            }
        }
    }

    /// Release all three textures. A second call returns [`DustError::Released`].
    pub fn release(&mut self, backend: &mut B) -> Result<(), DustError> {
        if !self.is_live() {
            return Err(DustError::Released("ramp set"));
        }
        self.release_live(backend);
        debug!("Released ramp textures");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    #[test]
    fn test_bake_samples_at_i_over_width() {
        let texels = bake(|t| t);
        assert_eq!(texels.len(), 1024);
        assert_eq!(texels[0], 0.0);
        assert_eq!(texels[512], 0.5);
        assert_eq!(texels[1023], 1023.0 / 1024.0);
    }

    #[test]
    fn test_disabled_ramps_are_constant_one() {
        let size = RampTexels::from_curve(None);
        let color = RampTexels::from_gradient(None);
        for t in [0.0, 0.3, 1.0] {
            assert_eq!(size.sample(t).x, 1.0);
            assert_eq!(color.sample(t), Vec4::ONE);
        }
    }

    #[test]
    fn test_sample_interpolates_and_clamps() {
        let ramp = RampTexels::from_curve(Some(&Curve::linear(0.0, 1.0)));
        assert!((ramp.sample(0.25).x - 0.25).abs() < 1e-3);
        assert_eq!(ramp.sample(-1.0).x, 0.0);
        assert!((ramp.sample(2.0).x - 1023.0 / 1024.0).abs() < 1e-6);
    }

    #[test]
    fn test_curve_keys() {
        let curve = Curve::new().add_key(1.0, 0.0).add_key(0.0, 2.0).add_key(0.5, 1.0);
        assert_eq!(curve.evaluate(0.0), 2.0);
        assert_eq!(curve.evaluate(0.25), 1.5);
        assert_eq!(curve.evaluate(0.75), 0.5);
        assert_eq!(curve.evaluate(5.0), 0.0);
        assert_eq!(Curve::new().evaluate(0.3), 1.0);
    }

    #[test]
    fn test_gradient() {
        let g = Gradient::two_color(Vec4::ZERO, Vec4::ONE);
        assert_eq!(g.evaluate(0.5), Vec4::splat(0.5));
    }

    #[test]
    fn test_texel_bytes() {
        assert_eq!(RampTexels::from_curve(None).as_bytes().len(), 4 * 1024);
        assert_eq!(RampTexels::from_gradient(None).as_bytes().len(), 16 * 1024);
    }

    #[test]
    fn test_ramp_set_lifecycle() {
        let mut backend = HostBackend::new();
        let mut ramps = RampSet::new(&mut backend, &SimulationConfig::new()).unwrap();
        assert_eq!(backend.live_resources(), 3);
        assert!(ramps.bindings().is_ok());

        ramps.release(&mut backend).unwrap();
        assert_eq!(backend.live_resources(), 0);
        assert!(matches!(ramps.release(&mut backend), Err(DustError::Released(_))));
        assert!(ramps.bindings().is_err());
    }

    #[test]
    fn test_velocity_range_must_be_positive() {
        let mut backend = HostBackend::new();
        let mut ramps = RampSet::new(&mut backend, &SimulationConfig::new()).unwrap();
        assert!(ramps.set_color_over_velocity(&mut backend, None, 0.0).is_err());
        assert_eq!(ramps.velocity_range(), 1.0);
    }
}
