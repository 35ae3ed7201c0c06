use std::collections::HashSet;

use bevy::prelude::*;

use crate::world::GrabWorld;

/// Every body reachable from `root` through scene joints and declared chain
/// parents, `root` first.
///
/// Chains may contain cycles (a door whose hinge body also declares the door
/// as parent); each body is visited once.
pub fn collect_chain<W: GrabWorld + ?Sized>(world: &W, root: Entity) -> Vec<Entity> {
    let mut visited = HashSet::new();
    let mut chain = Vec::new();
    let mut stack = vec![root];

    while let Some(body) = stack.pop() {
        if !visited.insert(body) {
            continue;
        }
        chain.push(body);
        let links = world.chain_links(body);
        stack.extend(links.into_iter().rev().filter(|link| !visited.contains(link)));
    }

    chain
}

/// Bodies held by other hands. Releasing a chain leaves these bodies' player
/// collision exclusion and contact tracking to their remaining holder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainClaims(HashSet<Entity>);

impl ChainClaims {
    pub fn contains(&self, body: Entity) -> bool {
        self.0.contains(&body)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Entity> for ChainClaims {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
