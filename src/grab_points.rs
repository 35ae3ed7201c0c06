//! Which hands hold an object, and where.

use bevy::prelude::*;
use bitflags::bitflags;

use crate::controller::HandSide;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HandMask: u8 {
        const RIGHT = 1 << 0;
        const LEFT = 1 << 1;
    }
}

impl From<HandSide> for HandMask {
    fn from(side: HandSide) -> Self {
        match side {
            HandSide::Right => Self::RIGHT,
            HandSide::Left => Self::LEFT,
        }
    }
}

/// Per-object grab record, kept up to date from grab and release events.
///
/// Two-handed interactions (steering, pulling levers) read the average of the
/// grab points in the object's local space.
#[derive(Component, Clone, Debug, Default, PartialEq)]
pub struct GrabPoints {
    hands: HandMask,
    points: [Vec3; 2],
    local_average: Vec3,
}

impl GrabPoints {
    fn slot(side: HandSide) -> usize {
        match side {
            HandSide::Right => 0,
            HandSide::Left => 1,
        }
    }

    pub fn grab(&mut self, side: HandSide, local_point: Vec3) {
        self.points[Self::slot(side)] = local_point;
        self.hands.insert(side.into());
        self.update_average();
    }

    pub fn release(&mut self, side: HandSide) {
        self.hands.remove(side.into());
        self.update_average();
    }

    pub fn is_grabbed(&self) -> bool {
        !self.hands.is_empty()
    }

    pub fn hands(&self) -> HandMask {
        self.hands
    }

    pub fn has_grab(&self, side: HandSide) -> bool {
        self.hands.contains(side.into())
    }

    pub fn local_grab(&self, side: HandSide) -> Option<Vec3> {
        self.has_grab(side).then(|| self.points[Self::slot(side)])
    }

    /// Average of the held points in local space. Keeps the last value once
    /// every hand let go.
    pub fn local_average(&self) -> Vec3 {
        self.local_average
    }

    pub fn world_average(&self, transform: &GlobalTransform) -> Vec3 {
        transform.transform_point(self.local_average)
    }

    fn update_average(&mut self) {
        let count = self.hands.bits().count_ones();
        if count == 0 {
            return;
        }
        let sum: Vec3 = [HandSide::Right, HandSide::Left]
            .into_iter()
            .filter_map(|side| self.local_grab(side))
            .sum();
        self.local_average = sum / count as f32;
    }
}
