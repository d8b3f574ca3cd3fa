use crate::vec::*;

use bytemuck::{Pod, Zeroable};

/// Column major 4x4 matrix, `e[column][row]`, for column vectors.
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Mat4 {
    pub e: [[f32; 4]; 4],
}

impl Mat4 {
    #[inline]
    pub fn new() -> Mat4 {
        Mat4::default()
    }

    #[inline]
    pub fn identity() -> Mat4 {
        Mat4::scale3(Vec3::from_scalar(1.0))
    }

    pub fn scale3(v: Vec3) -> Mat4 {
        let vv = v.to_array();

        let mut m = Mat4::new();
        for i in 0..3 {
            m.e[i][i] = vv[i];
        }
        m.e[3][3] = 1.0;
        m
    }

    pub fn translation(v: Vec3) -> Mat4 {
        let mut m = Mat4::identity();
        m.e[3][0..3].copy_from_slice(&v.to_array());
        m
    }

    /// Rotation of `angle` radians around the unit vector `axis`,
    /// counter-clockwise when looking down the axis towards the origin.
    pub fn rotation(axis: Vec3, angle: f32) -> Mat4 {
        let a = axis.x;
        let b = axis.y;
        let c = axis.z;

        let cos_alpha = angle.cos();
        let sin_alpha = angle.sin();

        let k = 1. - cos_alpha;

        let mut m = Mat4::identity();
        m.e[0][0] = a * a * k + cos_alpha;
        m.e[1][1] = b * b * k + cos_alpha;
        m.e[2][2] = c * c * k + cos_alpha;

        m.e[0][1] = a * b * k + c * sin_alpha;
        m.e[0][2] = a * c * k - b * sin_alpha;
        m.e[1][2] = b * c * k + a * sin_alpha;

        m.e[1][0] = a * b * k - c * sin_alpha;
        m.e[2][0] = a * c * k + b * sin_alpha;
        m.e[2][1] = b * c * k - a * sin_alpha;

        m
    }

    pub fn rotation_x(angle: f32) -> Mat4 {
        Mat4::rotation(Vec3::new(1., 0., 0.), angle)
    }

    pub fn rotation_y(angle: f32) -> Mat4 {
        Mat4::rotation(Vec3::new(0., 1., 0.), angle)
    }

    pub fn rotation_z(angle: f32) -> Mat4 {
        Mat4::rotation(Vec3::new(0., 0., 1.), angle)
    }

    pub fn transpose(&self) -> Mat4 {
        let mut m = Mat4::new();
        for j in 0..4 {
            for i in 0..4 {
                m.e[j][i] = self.e[i][j];
            }
        }
        m
    }

    #[inline]
    pub fn to_columns(&self) -> [Vec4; 4] {
        bytemuck::cast(self.e)
    }

    #[inline]
    pub fn to_rows(&self) -> [Vec4; 4] {
        self.transpose().to_columns()
    }

    /// First three rows, row major. This is the layout of an affine
    /// transform in a ray tracing instance descriptor.
    pub fn to_rows_3x4(&self) -> [f32; 12] {
        let t = self;
        [
            t.e[0][0], t.e[1][0], t.e[2][0], t.e[3][0],
            t.e[0][1], t.e[1][1], t.e[2][1], t.e[3][1],
            t.e[0][2], t.e[1][2], t.e[2][2], t.e[3][2],
        ]
    }

    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        (*self * p.extend(1.0)).xyz()
    }

    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        (*self * v.extend(0.0)).xyz()
    }

    /// General inverse by cofactor expansion, `None` if singular.
    pub fn inverse(&self) -> Option<Mat4> {
        let m: [f32; 16] = bytemuck::cast(self.e);
        let mut inv = [0f32; 16];

        inv[0] = m[5] * m[10] * m[15] - m[5] * m[11] * m[14] - m[9] * m[6] * m[15]
            + m[9] * m[7] * m[14] + m[13] * m[6] * m[11] - m[13] * m[7] * m[10];
        inv[4] = -m[4] * m[10] * m[15] + m[4] * m[11] * m[14] + m[8] * m[6] * m[15]
            - m[8] * m[7] * m[14] - m[12] * m[6] * m[11] + m[12] * m[7] * m[10];
        inv[8] = m[4] * m[9] * m[15] - m[4] * m[11] * m[13] - m[8] * m[5] * m[15]
            + m[8] * m[7] * m[13] + m[12] * m[5] * m[11] - m[12] * m[7] * m[9];
        inv[12] = -m[4] * m[9] * m[14] + m[4] * m[10] * m[13] + m[8] * m[5] * m[14]
            - m[8] * m[6] * m[13] - m[12] * m[5] * m[10] + m[12] * m[6] * m[9];
        inv[1] = -m[1] * m[10] * m[15] + m[1] * m[11] * m[14] + m[9] * m[2] * m[15]
            - m[9] * m[3] * m[14] - m[13] * m[2] * m[11] + m[13] * m[3] * m[10];
        inv[5] = m[0] * m[10] * m[15] - m[0] * m[11] * m[14] - m[8] * m[2] * m[15]
            + m[8] * m[3] * m[14] + m[12] * m[2] * m[11] - m[12] * m[3] * m[10];
        inv[9] = -m[0] * m[9] * m[15] + m[0] * m[11] * m[13] + m[8] * m[1] * m[15]
            - m[8] * m[3] * m[13] - m[12] * m[1] * m[11] + m[12] * m[3] * m[9];
        inv[13] = m[0] * m[9] * m[14] - m[0] * m[10] * m[13] - m[8] * m[1] * m[14]
            + m[8] * m[2] * m[13] + m[12] * m[1] * m[10] - m[12] * m[2] * m[9];
        inv[2] = m[1] * m[6] * m[15] - m[1] * m[7] * m[14] - m[5] * m[2] * m[15]
            + m[5] * m[3] * m[14] + m[13] * m[2] * m[7] - m[13] * m[3] * m[6];
        inv[6] = -m[0] * m[6] * m[15] + m[0] * m[7] * m[14] + m[4] * m[2] * m[15]
            - m[4] * m[3] * m[14] - m[12] * m[2] * m[7] + m[12] * m[3] * m[6];
        inv[10] = m[0] * m[5] * m[15] - m[0] * m[7] * m[13] - m[4] * m[1] * m[15]
            + m[4] * m[3] * m[13] + m[12] * m[1] * m[7] - m[12] * m[3] * m[5];
        inv[14] = -m[0] * m[5] * m[14] + m[0] * m[6] * m[13] + m[4] * m[1] * m[14]
            - m[4] * m[2] * m[13] - m[12] * m[1] * m[6] + m[12] * m[2] * m[5];
        inv[3] = -m[1] * m[6] * m[11] + m[1] * m[7] * m[10] + m[5] * m[2] * m[11]
            - m[5] * m[3] * m[10] - m[9] * m[2] * m[7] + m[9] * m[3] * m[6];
        inv[7] = m[0] * m[6] * m[11] - m[0] * m[7] * m[10] - m[4] * m[2] * m[11]
            + m[4] * m[3] * m[10] + m[8] * m[2] * m[7] - m[8] * m[3] * m[6];
        inv[11] = -m[0] * m[5] * m[11] + m[0] * m[7] * m[9] + m[4] * m[1] * m[11]
            - m[4] * m[3] * m[9] - m[8] * m[1] * m[7] + m[8] * m[3] * m[5];
        inv[15] = m[0] * m[5] * m[10] - m[0] * m[6] * m[9] - m[4] * m[1] * m[10]
            + m[4] * m[2] * m[9] + m[8] * m[1] * m[6] - m[8] * m[2] * m[5];

        let det = m[0] * inv[0] + m[1] * inv[4] + m[2] * inv[8] + m[3] * inv[12];
        if det.abs() < f32::EPSILON {
            return None;
        }

        let inv_det = 1.0 / det;
        for x in inv.iter_mut() {
            *x *= inv_det;
        }

        Some(Mat4 { e: bytemuck::cast(inv) })
    }
}

impl std::ops::Mul<Mat4> for Mat4 {
    type Output = Mat4;

    #[inline]
    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut m = Mat4::new();

        let a = self.to_rows();
        let b = rhs.to_columns();

        for j in 0..4 {
            for i in 0..4 {
                m.e[j][i] = Vec4::dot(a[i], b[j]);
            }
        }
        m
    }
}

impl std::ops::Mul<Vec4> for Mat4 {
    type Output = Vec4;

    #[inline]
    fn mul(self, rhs: Vec4) -> Vec4 {
        let a = self.to_rows();
        Vec4::new(a[0].dot(rhs), a[1].dot(rhs), a[2].dot(rhs), a[3].dot(rhs))
    }
}

/// Right-handed matrices, zero to one depth.
pub mod rh {
    use super::Mat4;
    use super::Vec3;

    pub fn look_at(from: Vec3, to: Vec3, up: Vec3) -> Mat4 {
        // The camera looks down its negative z axis.
        let z = (from - to).normalized();
        let x = up.cross(z).normalized();
        let y = z.cross(x);

        let mut m = Mat4::identity();
        m.e[0][0] = x.x;
        m.e[1][0] = x.y;
        m.e[2][0] = x.z;

        m.e[0][1] = y.x;
        m.e[1][1] = y.y;
        m.e[2][1] = y.z;

        m.e[0][2] = z.x;
        m.e[1][2] = z.y;
        m.e[2][2] = z.z;

        m.e[3][0] = -Vec3::dot(x, from);
        m.e[3][1] = -Vec3::dot(y, from);
        m.e[3][2] = -Vec3::dot(z, from);

        m
    }

    pub fn perspective(vfov: f32, aspect_ratio: f32, near: f32, far: f32)
        -> Mat4 {
        let h = 1.0 / (vfov / 2.).tan();
        let range = far / (near - far);

        let mut m = Mat4::new();
        m.e[0][0] = h / aspect_ratio;
        m.e[1][1] = h;
        m.e[2][2] = range;
        m.e[2][3] = -1.0;
        m.e[3][2] = range * near;

        m
    }
}
