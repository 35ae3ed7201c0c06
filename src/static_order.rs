//! Ordering of simultaneous static grabs.

use bevy::prelude::*;

use crate::config::GrabConfig;

/// Hands with an active static grab, oldest first.
///
/// Only the newest static grab pulls at full strength. Alternating grabs while
/// climbing then hand the player over smoothly instead of two joints tugging
/// in different directions.
#[derive(Resource, Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticGrabOrder {
    hands: Vec<Entity>,
}

impl StaticGrabOrder {
    pub fn push(&mut self, hand: Entity) {
        self.hands.retain(|&h| h != hand);
        self.hands.push(hand);
    }

    pub fn remove(&mut self, hand: Entity) -> bool {
        let before = self.hands.len();
        self.hands.retain(|&h| h != hand);
        self.hands.len() != before
    }

    pub fn contains(&self, hand: Entity) -> bool {
        self.hands.contains(&hand)
    }

    pub fn hands(&self) -> &[Entity] {
        &self.hands
    }

    pub fn newest(&self) -> Option<Entity> {
        self.hands.last().copied()
    }

    pub fn is_secondary(&self, hand: Entity) -> bool {
        self.hands.contains(&hand) && self.newest() != Some(hand)
    }

    /// Connected mass scale for every ordered hand.
    pub fn mass_scales<'a>(
        &'a self,
        config: &'a GrabConfig,
    ) -> impl Iterator<Item = (Entity, f32)> + 'a {
        let last = self.hands.len().saturating_sub(1);
        self.hands.iter().enumerate().map(move |(i, &hand)| {
            let scale = if i == last {
                config.static_main_connected_mass_scale
            } else {
                config.static_secondary_connected_mass_scale
            };
            (hand, scale)
        })
    }
}
