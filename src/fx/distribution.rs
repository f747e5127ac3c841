// src/fx/distribution.rs
//! Sampling policies for particle parameters.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Sub};

use glam::{Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::Rng;

/// A value a distribution can produce and a module can interpolate.
pub trait Sample:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f32, Output = Self>
    + Div<f32, Output = Self>
{
    /// Independent uniform sample per component between `min` and `max`.
    fn random_between(min: Self, max: Self, rng: &mut StdRng) -> Self;

    fn lerp_to(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

fn unit(rng: &mut StdRng) -> f32 {
    rng.gen::<f32>()
}

impl Sample for f32 {
    fn random_between(min: f32, max: f32, rng: &mut StdRng) -> f32 {
        min + (max - min) * unit(rng)
    }
}

impl Sample for Vec2 {
    fn random_between(min: Vec2, max: Vec2, rng: &mut StdRng) -> Vec2 {
        Vec2::new(
            f32::random_between(min.x, max.x, rng),
            f32::random_between(min.y, max.y, rng),
        )
    }
}

impl Sample for Vec3 {
    fn random_between(min: Vec3, max: Vec3, rng: &mut StdRng) -> Vec3 {
        Vec3::new(
            f32::random_between(min.x, max.x, rng),
            f32::random_between(min.y, max.y, rng),
            f32::random_between(min.z, max.z, rng),
        )
    }
}

impl Sample for Vec4 {
    fn random_between(min: Vec4, max: Vec4, rng: &mut StdRng) -> Vec4 {
        Vec4::new(
            f32::random_between(min.x, max.x, rng),
            f32::random_between(min.y, max.y, rng),
            f32::random_between(min.z, max.z, rng),
            f32::random_between(min.w, max.w, rng),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Distribution<T: Sample> {
    Const(T),
    /// Uniform per component.
    Range { min: T, max: T },
    /// Piecewise-linear over normalised age `[0, 1]`; points sorted by age.
    Curve(Vec<(f32, T)>),
}

impl<T: Sample> Distribution<T> {
    pub fn range(min: T, max: T) -> Self {
        Distribution::Range { min, max }
    }

    /// Curve through `points`, sorted by age.
    pub fn curve(mut points: Vec<(f32, T)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Distribution::Curve(points)
    }

    /// Draw a value. `age` is the particle's normalised age and only matters
    /// for curves; an empty curve yields `None`.
    pub fn sample(&self, rng: &mut StdRng, age: f32) -> Option<T> {
        match self {
            Distribution::Const(value) => Some(*value),
            Distribution::Range { min, max } => Some(T::random_between(*min, *max, rng)),
            Distribution::Curve(points) => {
                let first = points.first()?;
                let age = age.clamp(0.0, 1.0);
                if age <= first.0 {
                    return Some(first.1);
                }
                for pair in points.windows(2) {
                    let (a, b) = (pair[0], pair[1]);
                    if age <= b.0 {
                        let span = b.0 - a.0;
                        let t = if span > 0.0 { (age - a.0) / span } else { 1.0 };
                        return Some(a.1.lerp_to(b.1, t));
                    }
                }
                points.last().map(|p| p.1)
            }
        }
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(self, Distribution::Range { .. })
    }
}

impl<T: Sample> From<T> for Distribution<T> {
    fn from(value: T) -> Self {
        Distribution::Const(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_range_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let distribution = Distribution::range(Vec3::new(-1.0, 0.0, 2.0), Vec3::new(1.0, 0.0, 4.0));
        for _ in 0..256 {
            let v = distribution.sample(&mut rng, 0.0).unwrap();
            assert!((-1.0..=1.0).contains(&v.x));
            assert_eq!(v.y, 0.0);
            assert!((2.0..=4.0).contains(&v.z));
        }
        assert!(distribution.is_stochastic());
    }

    #[test]
    fn test_curve_interpolates_by_age() {
        let mut rng = StdRng::seed_from_u64(0);
        let curve = Distribution::curve(vec![(1.0, 10.0f32), (0.0, 0.0), (0.5, 2.0)]);
        assert_eq!(curve.sample(&mut rng, 0.0), Some(0.0));
        assert_eq!(curve.sample(&mut rng, 0.25), Some(1.0));
        assert_eq!(curve.sample(&mut rng, 0.75), Some(6.0));
        assert_eq!(curve.sample(&mut rng, 2.0), Some(10.0));
        assert_eq!(Distribution::<f32>::Curve(Vec::new()).sample(&mut rng, 0.5), None);
    }

    #[test]
    fn test_inverted_range_does_not_panic() {
        let mut rng = StdRng::seed_from_u64(3);
        let v = Distribution::range(5.0f32, 1.0).sample(&mut rng, 0.0).unwrap();
        assert!((1.0..=5.0).contains(&v));
    }
}
