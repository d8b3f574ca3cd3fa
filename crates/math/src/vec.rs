use core::ops;
use core::fmt;

use bytemuck::{Pod, Zeroable};

macro_rules! vec_op_impl {
    ($trait: ident, $func: ident, $v: ident, $($e: ident),*) => {
        impl ops::$trait<$v> for $v {
            type Output = $v;

            #[inline]
            fn $func(self, rhs: $v) -> $v {
                $v { $( $e: ops::$trait::$func(self.$e, rhs.$e), )* }
            }
        }
    }
}

macro_rules! vec_assign_op_impl {
    ($trait: ident, $func: ident, $v: ident, $($e: ident),*) => {
        impl ops::$trait<$v> for $v {
            #[inline]
            fn $func(&mut self, rhs: $v) {
                $( ops::$trait::$func(&mut self.$e, rhs.$e); )*
            }
        }
    }
}

macro_rules! scalar_op_impl {
    ($trait: ident, $func: ident, $v: ident, $($e: ident),*) => {
        impl ops::$trait<f32> for $v {
            type Output = $v;

            #[inline]
            fn $func(self, rhs: f32) -> $v {
                $v { $( $e: ops::$trait::$func(self.$e, rhs), )* }
            }
        }

        impl ops::$trait<$v> for f32 {
            type Output = $v;

            #[inline]
            fn $func(self, rhs: $v) -> $v {
                $v { $( $e: ops::$trait::$func(self, rhs.$e), )* }
            }
        }
    }
}

macro_rules! vec_impl {
    ($v: ident, $n: expr, $($e: ident),*) => {

        #[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
        #[repr(C)]
        pub struct $v {
            $( pub $e : f32, )*
        }

        impl $v {
            #[inline]
            pub const fn new($( $e: f32, )*) -> $v {
                $v { $( $e, )* }
            }

            #[inline]
            pub const fn from_scalar(a: f32) -> $v {
                $v { $( $e : a, )* }
            }

            #[inline]
            pub fn from_array(a: [f32; $n]) -> $v {
                bytemuck::cast(a)
            }

            #[inline]
            pub fn to_array(self) -> [f32; $n] {
                bytemuck::cast(self)
            }

            #[inline]
            pub fn dot(self, b: $v) -> f32 {
                0.0 $( + self.$e * b.$e )*
            }

            #[inline]
            pub fn length2(self) -> f32 {
                $v::dot(self, self)
            }

            #[inline]
            pub fn length(self) -> f32 {
                $v::length2(self).sqrt()
            }

            #[inline]
            pub fn normalized(self) -> $v {
                self * (1.0 / $v::length(self))
            }

            /// Component-wise comparison within `eps`.
            pub fn approx_eq(self, b: $v, eps: f32) -> bool {
                true $( && (self.$e - b.$e).abs() <= eps )*
            }
        }

        impl fmt::Display for $v {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let prec = f.precision().unwrap_or(3);
                let parts = [$( format!("{:.prec$}", self.$e, prec = prec), )*];
                write!(f, "{}({})", stringify!($v), parts.join(", "))
            }
        }

        impl ops::Neg for $v {
            type Output = $v;

            #[inline]
            fn neg(self) -> $v {
                $v { $( $e: -self.$e, )* }
            }
        }

        vec_op_impl!(Add, add, $v, $($e),*);
        vec_op_impl!(Sub, sub, $v, $($e),*);
        vec_op_impl!(Mul, mul, $v, $($e),*);
        vec_op_impl!(Div, div, $v, $($e),*);

        vec_assign_op_impl!(AddAssign, add_assign, $v, $($e),*);
        vec_assign_op_impl!(SubAssign, sub_assign, $v, $($e),*);

        scalar_op_impl!(Mul, mul, $v, $($e),*);
        scalar_op_impl!(Div, div, $v, $($e),*);
    }
}

vec_impl!(Vec2, 2, x, y);
vec_impl!(Vec3, 3, x, y, z);
vec_impl!(Vec4, 4, x, y, z, w);

impl Vec3 {
    #[inline]
    pub fn cross(self, b: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * b.z - self.z * b.y,
            y: self.z * b.x - self.x * b.z,
            z: self.x * b.y - self.y * b.x,
        }
    }

    #[inline]
    pub fn extend(self, w: f32) -> Vec4 {
        Vec4::new(self.x, self.y, self.z, w)
    }
}

impl Vec4 {
    #[inline]
    pub fn xyz(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}
