use core::f32::consts::PI;

use math::{
    vec::Vec3,
    mat::{self, Mat4},
};

use crate::shaders::{CameraConstants, FrameConstants};

pub const FOV_DEGREES: f32 = 75.0;
pub const NEAR: f32 = 0.1;
pub const FAR: f32 = 1000.0;
pub const TURN_ANGLE: f32 = PI / 8.0;

/// Keys the window reports to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Forward,
    Backward,
    Left,
    Right,
    TurnLeft,
    TurnRight,
    TurnUp,
    TurnDown,
}

impl Movement {
    pub fn from_key(key: Key) -> Option<Movement> {
        match key {
            Key::Char('W') => Some(Movement::Forward),
            Key::Char('S') => Some(Movement::Backward),
            Key::Char('A') => Some(Movement::Left),
            Key::Char('D') => Some(Movement::Right),
            Key::Left => Some(Movement::TurnLeft),
            Key::Right => Some(Movement::TurnRight),
            Key::Up => Some(Movement::TurnUp),
            Key::Down => Some(Movement::TurnDown),
            Key::Char(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,

    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(aspect_ratio: f32) -> Camera {
        Camera {
            eye: Vec3::new(-2.0, 0.0, 0.0),
            target: Vec3::new(0.0, 0.0, 0.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov: FOV_DEGREES.to_radians(),
            aspect_ratio,
            near: NEAR,
            far: FAR,
        }
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalized()
    }

    pub fn side(&self) -> Vec3 {
        self.forward().cross(self.up).normalized()
    }

    pub fn view(&self) -> Mat4 {
        mat::rh::look_at(self.eye, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        mat::rh::perspective(self.fov, self.aspect_ratio, self.near, self.far)
    }

    pub fn constants(&self) -> CameraConstants {
        let view = self.view();
        let projection = self.projection();
        CameraConstants {
            view,
            projection,
            view_inverse: view.inverse().unwrap_or_else(Mat4::identity),
            projection_inverse: projection.inverse().unwrap_or_else(Mat4::identity),
        }
    }

    pub fn apply(&mut self, movement: Movement) {
        let forward = self.forward();
        let side = self.side();

        match movement {
            Movement::Forward => self.translate(forward),
            Movement::Backward => self.translate(-forward),
            Movement::Right => self.translate(side),
            Movement::Left => self.translate(-side),
            Movement::TurnLeft => self.turn(Mat4::rotation(self.up, TURN_ANGLE), false),
            Movement::TurnRight => self.turn(Mat4::rotation(self.up, -TURN_ANGLE), false),
            Movement::TurnUp => self.turn(Mat4::rotation(side, TURN_ANGLE), true),
            Movement::TurnDown => self.turn(Mat4::rotation(side, -TURN_ANGLE), true),
        }
    }

    fn translate(&mut self, delta: Vec3) {
        self.eye += delta;
        self.target += delta;
    }

    fn turn(&mut self, rotation: Mat4, rotate_up: bool) {
        self.target = self.eye + rotation.transform_vector(self.forward());
        if rotate_up {
            self.up = rotation.transform_vector(self.up).normalized();
        }
    }
}

/// Number of frames accumulated since the camera last moved.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCounter {
    frames_since_move: u32,
}

impl FrameCounter {
    pub fn next_frame(&mut self) -> FrameConstants {
        self.frames_since_move = self.frames_since_move.wrapping_add(1);
        FrameConstants {
            frames_since_move: self.frames_since_move,
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        self.frames_since_move = 0;
    }

    pub fn frames_since_move(&self) -> u32 {
        self.frames_since_move
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use math::vec::Vec4;

    const EPS: f32 = 1e-4;

    #[test]
    fn keys_map_to_movements() {
        assert_eq!(Movement::from_key(Key::Char('W')), Some(Movement::Forward));
        assert_eq!(Movement::from_key(Key::Char('D')), Some(Movement::Right));
        assert_eq!(Movement::from_key(Key::Up), Some(Movement::TurnUp));
        assert_eq!(Movement::from_key(Key::Char('Q')), None);
    }

    #[test]
    fn forward_and_strafe() {
        let mut camera = Camera::new(16.0 / 9.0);

        camera.apply(Movement::Forward);
        assert!(camera.eye.approx_eq(Vec3::new(-1.0, 0.0, 0.0), EPS));
        assert!(camera.target.approx_eq(Vec3::new(1.0, 0.0, 0.0), EPS));

        // Looking down +X with +Y up, the side axis is +Z.
        camera.apply(Movement::Right);
        assert!(camera.eye.approx_eq(Vec3::new(-1.0, 0.0, 1.0), EPS));

        camera.apply(Movement::Left);
        camera.apply(Movement::Backward);
        assert!(camera.eye.approx_eq(Vec3::new(-2.0, 0.0, 0.0), EPS));
    }

    #[test]
    fn turning_left_and_back() {
        let mut camera = Camera::new(1.0);

        camera.apply(Movement::TurnLeft);
        let f = camera.forward();
        // Counter-clockwise about +Y turns +X towards -Z.
        assert!(f.approx_eq(Vec3::new(TURN_ANGLE.cos(), 0.0, -TURN_ANGLE.sin()), EPS), "{f}");

        camera.apply(Movement::TurnRight);
        assert!(camera.forward().approx_eq(Vec3::new(1.0, 0.0, 0.0), EPS));
        assert!(camera.up.approx_eq(Vec3::new(0.0, 1.0, 0.0), EPS));
    }

    #[test]
    fn turning_up_rotates_up_vector() {
        let mut camera = Camera::new(1.0);

        camera.apply(Movement::TurnUp);
        let f = camera.forward();
        assert!(f.y > 0.0, "{f}");
        assert!(camera.up.dot(f).abs() < EPS);
        assert!((camera.up.length() - 1.0).abs() < EPS);
    }

    #[test]
    fn constants_are_consistent() {
        let camera = Camera::new(16.0 / 9.0);
        let c = camera.constants();

        let eye = c.view_inverse * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(eye.approx_eq(camera.eye.extend(1.0), EPS), "{eye}");

        let identity = c.projection * c.projection_inverse;
        assert!(identity.to_columns().iter()
            .zip(Mat4::identity().to_columns().iter())
            .all(|(a, b)| a.approx_eq(*b, EPS)));
    }

    #[test]
    fn frame_counter_restarts_on_movement() {
        let mut counter = FrameCounter::default();
        assert_eq!(counter.next_frame().frames_since_move, 1);
        assert_eq!(counter.next_frame().frames_since_move, 2);

        counter.reset();
        assert_eq!(counter.frames_since_move(), 0);
        assert_eq!(counter.next_frame().frames_since_move, 1);
    }
}
