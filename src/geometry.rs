//! Procedural meshes for the scene: planes, boxes and spheres.

use bytemuck::{Pod, Zeroable};

use math::{
    vec::{Vec2, Vec3, Vec4},
    mat::Mat4,
};

pub const DEFAULT_BOX_PARTS: [u32; 3] = [20, 20, 20];
pub const SPHERE_PARTS: u32 = 40;

#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    pub position: Vec4,
    pub normal: Vec4,
}

pub const VERTEX_STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;

#[derive(Debug, Default, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Appends a `parts` tessellated unit grid in the XY plane, scaled by
    /// `size`, rotated by `rotation` degrees around X, then Y, then Z, and
    /// moved to `offset`.
    fn push_grid(&mut self, offset: Vec3, rotation: Vec3, size: Vec2, parts: [u32; 2]) {
        let rotation = Mat4::rotation_z(rotation.z.to_radians())
            * Mat4::rotation_y(rotation.y.to_radians())
            * Mat4::rotation_x(rotation.x.to_radians());
        let transform = Mat4::translation(offset)
            * rotation
            * Mat4::scale3(Vec3::new(size.x, size.y, 1.0));

        let normal = rotation.transform_vector(Vec3::new(0.0, 0.0, 1.0));
        let [px, py] = parts;
        let col_step = 1.0 / px as f32;
        let row_step = 1.0 / py as f32;

        let start = self.vertices.len() as u32;
        for col in 0..=px {
            for row in 0..=py {
                let p = Vec3::new(-0.5 + col_step * col as f32,
                                  -0.5 + row_step * row as f32,
                                  0.0);
                self.vertices.push(Vertex {
                    position: transform.transform_point(p).extend(1.0),
                    normal: normal.extend(0.0),
                });
            }
        }

        for col in 0..px {
            for row in 0..py {
                let a = start + col * (py + 1) + row;
                let b = start + (col + 1) * (py + 1) + row;
                self.indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }
    }
}

/// Single grid facing +Z whose top-left corner is `center - size`.
pub fn plane(center: Vec3, size: Vec2, parts: [u32; 2]) -> Mesh {
    let top_left = Vec3::new(center.x - size.x, center.y - size.y, center.z);
    let mut mesh = Mesh::default();
    mesh.push_grid(top_left, Vec3::from_scalar(0.0), size, parts);
    mesh
}

/// Axis aligned box centered on the origin with outward facing normals.
pub fn box_mesh(size: Vec3, parts: [u32; 3]) -> Mesh {
    let half = size / 2.0;
    let [px, py, pz] = parts;

    let faces = [
        // front, back
        (Vec3::new(0.0, 0.0, half.z), Vec3::new(0.0, 0.0, 0.0),
         Vec2::new(size.x, size.y), [px, py]),
        (Vec3::new(0.0, 0.0, -half.z), Vec3::new(0.0, 180.0, 0.0),
         Vec2::new(size.x, size.y), [px, py]),
        // right, left
        (Vec3::new(half.x, 0.0, 0.0), Vec3::new(90.0, 0.0, 90.0),
         Vec2::new(size.y, size.z), [py, pz]),
        (Vec3::new(-half.x, 0.0, 0.0), Vec3::new(-90.0, 0.0, 90.0),
         Vec2::new(size.y, size.z), [py, pz]),
        // down, up
        (Vec3::new(0.0, -half.y, 0.0), Vec3::new(90.0, 0.0, 0.0),
         Vec2::new(size.x, size.z), [px, pz]),
        (Vec3::new(0.0, half.y, 0.0), Vec3::new(270.0, 0.0, 0.0),
         Vec2::new(size.x, size.z), [px, pz]),
    ];

    let mut mesh = Mesh::default();
    for (offset, rotation, size, parts) in faces {
        mesh.push_grid(offset, rotation, size, parts);
    }
    mesh
}

pub fn sphere(radius: f32) -> Mesh {
    let mut mesh = box_mesh(Vec3::from_scalar(1.0),
                            [SPHERE_PARTS, SPHERE_PARTS, SPHERE_PARTS]);
    for v in &mut mesh.vertices {
        let n = v.position.xyz().normalized();
        v.position = (n * radius).extend(1.0);
        v.normal = n.extend(0.0);
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    #[test]
    fn vertex_layout() {
        assert_eq!(VERTEX_STRIDE, 32);
        let mesh = box_mesh(Vec3::from_scalar(1.0), [1, 1, 1]);
        assert_eq!(mesh.vertex_bytes().len(), mesh.vertices.len() * 32);
        assert_eq!(mesh.index_bytes().len(), mesh.indices.len() * 4);
    }

    #[test]
    fn grid_winding() {
        let mesh = plane(Vec3::from_scalar(0.0), Vec2::new(1.0, 1.0), [2, 1]);

        assert_eq!(mesh.vertices.len(), 3 * 2);
        assert_eq!(mesh.indices, vec![0, 2, 1, 1, 2, 3,
                                      2, 4, 3, 3, 4, 5]);
    }

    #[test]
    fn plane_is_offset_by_size() {
        let mesh = plane(Vec3::new(1.0, 1.0, 2.0), Vec2::new(2.0, 4.0), [4, 4]);

        // Unit grid spans -0.5..0.5, scaled then moved to center - size.
        let first = mesh.vertices[0].position;
        assert!(first.approx_eq(Vec4::new(-2.0, -5.0, 2.0, 1.0), EPS), "{first}");
        for v in &mesh.vertices {
            assert!(v.normal.approx_eq(Vec4::new(0.0, 0.0, 1.0, 0.0), EPS));
        }
    }

    #[test]
    fn box_counts_and_extents() {
        let size = Vec3::new(8.0, 10.0, 6.0);
        let mesh = box_mesh(size, [2, 3, 4]);

        let vertices = 2 * (3 * 4) + 2 * (4 * 5) + 2 * (5 * 3);
        let indices = 6 * 2 * (2 * 3 + 3 * 4 + 4 * 2);
        assert_eq!(mesh.vertices.len(), vertices);
        assert_eq!(mesh.indices.len(), indices);
        assert!(mesh.indices.iter().all(|i| (*i as usize) < vertices));

        let half = size / 2.0;
        let mut max = Vec3::from_scalar(f32::MIN);
        for v in &mesh.vertices {
            let p = v.position.xyz();
            max = Vec3::new(max.x.max(p.x.abs()), max.y.max(p.y.abs()),
                            max.z.max(p.z.abs()));
        }
        assert!(max.approx_eq(half, EPS), "{max}");
    }

    #[test]
    fn box_floor_and_ceiling_match_walls() {
        let size = Vec3::new(2.0, 1.0, 6.0);
        let mesh = box_mesh(size, [1, 1, 1]);

        let caps: Vec<Vec3> = mesh.vertices.iter()
            .filter(|v| v.normal.y.abs() > 0.5)
            .map(|v| v.position.xyz())
            .collect();
        assert_eq!(caps.len(), 2 * 4);

        for p in &caps {
            assert!((p.x.abs() - 1.0).abs() < EPS, "{p}");
            assert!((p.z.abs() - 3.0).abs() < EPS, "{p}");
        }
    }

    #[test]
    fn box_normals_point_outward() {
        let mesh = box_mesh(Vec3::new(2.0, 3.0, 4.0), DEFAULT_BOX_PARTS);

        for v in &mesh.vertices {
            let n = v.normal.xyz();
            assert!((n.length() - 1.0).abs() < EPS);
            assert_eq!(v.normal.w, 0.0);
            assert_eq!(v.position.w, 1.0);
            // Vertices lie on the face the normal points out of.
            assert!(v.position.xyz().dot(n) > 0.0);
        }
    }

    #[test]
    fn sphere_vertices_on_surface() {
        let mesh = sphere(2.5);

        assert_eq!(mesh.vertices.len(), 6 * 41 * 41);
        assert_eq!(mesh.indices.len(), 6 * 40 * 40 * 6);

        for v in &mesh.vertices {
            let p = v.position.xyz();
            assert!((p.length() - 2.5).abs() < EPS);
            assert!(v.normal.xyz().approx_eq(p / 2.5, EPS));
        }
    }
}
