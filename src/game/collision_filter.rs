//! Collision categories and mask composition.
//!
//! Every collider carries a membership mask (what it is) and a filter mask
//! (what it interacts with). Two colliders interact only if each one's
//! membership intersects the other's filter. This bitmask test is the only
//! filtering mechanism used by the world and the character controller.

use rapier2d::prelude::{Group, InteractionGroups};

/// Walls, floors, slopes, one-shot level geometry
pub const STATIC: Group = Group::GROUP_1;
/// Player characters
pub const PLAYER: Group = Group::GROUP_2;
/// Damaging volumes (spikes, lava)
pub const HAZARD: Group = Group::GROUP_3;
/// Collectibles
pub const PICKUP: Group = Group::GROUP_4;
/// Generic trigger volumes
pub const SENSOR: Group = Group::GROUP_5;
/// Simulated boxes and crates
pub const DYNAMIC_PROP: Group = Group::GROUP_6;

/// Membership/filter pair for one collider or query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionFilter {
    pub memberships: Group,
    pub filter: Group,
}

impl CollisionFilter {
    pub const fn new(memberships: Group, filter: Group) -> Self {
        Self { memberships, filter }
    }

    /// Level geometry: collides with everything that moves.
    pub fn static_geometry() -> Self {
        Self::new(STATIC, PLAYER | DYNAMIC_PROP)
    }

    /// Player collider: blocked by statics and props, touches triggers.
    pub fn player() -> Self {
        Self::new(PLAYER, STATIC | DYNAMIC_PROP | HAZARD | PICKUP | SENSOR)
    }

    /// Trigger volume of the given category; only reports player overlaps.
    pub fn trigger(category: Group) -> Self {
        Self::new(category, PLAYER)
    }

    pub fn dynamic_prop() -> Self {
        Self::new(DYNAMIC_PROP, STATIC | DYNAMIC_PROP | PLAYER)
    }

    /// What the character controller treats as solid while moving.
    pub fn character_motion() -> Self {
        Self::new(PLAYER, STATIC | DYNAMIC_PROP)
    }

    /// Query mask that only sees static geometry.
    pub fn terrain_query() -> Self {
        Self::new(Group::ALL, STATIC)
    }

    /// Adds categories to the filter mask.
    pub fn with_filter(mut self, extra: Group) -> Self {
        self.filter |= extra;
        self
    }

    /// Removes categories from the filter mask.
    pub fn without_filter(mut self, removed: Group) -> Self {
        self.filter &= !removed;
        self
    }

    /// True if a collider with these masks interacts with `other`.
    pub fn interacts_with(&self, other: &CollisionFilter) -> bool {
        self.memberships.intersects(other.filter) && other.memberships.intersects(self.filter)
    }

    pub fn to_groups(self) -> InteractionGroups {
        InteractionGroups::new(self.memberships, self.filter)
    }
}

impl From<CollisionFilter> for InteractionGroups {
    fn from(filter: CollisionFilter) -> Self {
        filter.to_groups()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_blocked_by_static_and_props() {
        let player = CollisionFilter::player();
        assert!(player.interacts_with(&CollisionFilter::static_geometry()));
        assert!(player.interacts_with(&CollisionFilter::dynamic_prop()));
    }

    #[test]
    fn test_triggers_only_see_players() {
        let hazard = CollisionFilter::trigger(HAZARD);
        assert!(hazard.interacts_with(&CollisionFilter::player()));
        assert!(!hazard.interacts_with(&CollisionFilter::static_geometry()));
        assert!(!hazard.interacts_with(&CollisionFilter::dynamic_prop()));
    }

    #[test]
    fn test_character_motion_ignores_triggers() {
        let motion = CollisionFilter::character_motion();
        assert!(!motion.interacts_with(&CollisionFilter::trigger(PICKUP)));
        assert!(motion.interacts_with(&CollisionFilter::static_geometry()));
    }

    #[test]
    fn test_mask_composition() {
        let f = CollisionFilter::terrain_query()
            .with_filter(DYNAMIC_PROP)
            .without_filter(STATIC);
        assert_eq!(f.filter, DYNAMIC_PROP);
        let groups: InteractionGroups = f.into();
        assert_eq!(groups.filter, DYNAMIC_PROP);
    }
}
