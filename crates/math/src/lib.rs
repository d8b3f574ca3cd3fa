pub mod vec;
pub mod mat;
