//! Bounding volumes shared by the preprocessor, the cluster builder and the importer

use crate::point::*;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// A bounding sphere, laid out the way the GPU reads it (`vec3 center; float radius`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Sphere {
    pub center: [f32; 3],
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Point3f, radius: f32) -> Self {
        Self {
            center: [center.x, center.y, center.z],
            radius,
        }
    }

    /// Sphere that has not been assigned yet: centered at the origin with infinite radius
    pub fn unbounded() -> Self {
        Self {
            center: [0.0; 3],
            radius: f32::INFINITY,
        }
    }

    pub fn center_point(&self) -> Point3f {
        Point3f::new(self.center[0], self.center[1], self.center[2])
    }

    pub fn diameter(&self) -> f32 {
        self.radius * 2.0
    }

    pub fn contains(&self, p: &Point3f, epsilon: f32) -> bool {
        (p - self.center_point()).norm() <= self.radius + epsilon
    }
}

/// Axis aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3f,
    pub max: Point3f,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Inverted box that grows to fit the first point it is extended with
    pub fn empty() -> Self {
        Self {
            min: Point3f::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3f::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3f>,
    {
        let mut aabb = Self::empty();
        for p in points {
            aabb.extend(p);
        }
        aabb
    }

    pub fn extend(&mut self, p: &Point3f) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Point3f {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extent(&self) -> Vector3f {
        self.max - self.min
    }

    /// Conservative sphere: AABB center and half of the AABB diagonal
    pub fn bounding_sphere(&self) -> Sphere {
        if self.is_empty() {
            return Sphere::default();
        }
        Sphere::new(self.center(), self.extent().norm() * 0.5)
    }
}

/// AABB together with the sphere derived from it
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub aabb: Aabb,
    pub sphere: Sphere,
}

impl Bounds {
    pub fn from_aabb(aabb: Aabb) -> Self {
        Self {
            aabb,
            sphere: aabb.bounding_sphere(),
        }
    }
}
