use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::constants::{OFFERABLE_TILE_TYPES, TILE_OFFER_COUNT};
use crate::types::{TileType, UnitType};

pub(super) fn beats(attacker: UnitType, defender: UnitType) -> bool {
    matches!(
        (attacker, defender),
        (UnitType::Infantry, UnitType::Archer)
            | (UnitType::Archer, UnitType::Knight)
            | (UnitType::Knight, UnitType::Infantry)
    )
}

pub(super) fn scaled_damage(attack: i32, multiplier: f32, divisor: f32) -> i32 {
    let divisor = if divisor > 0.0 { divisor } else { 1.0 };
    ((attack as f32 * multiplier) / divisor).floor().max(0.0) as i32
}

pub(super) fn draw_offers(rng: &mut StdRng) -> Vec<TileType> {
    let mut pool = OFFERABLE_TILE_TYPES.to_vec();
    pool.shuffle(rng);
    pool.truncate(TILE_OFFER_COUNT);
    pool
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn counter_cycle_is_one_directional() {
        assert!(beats(UnitType::Infantry, UnitType::Archer));
        assert!(beats(UnitType::Archer, UnitType::Knight));
        assert!(beats(UnitType::Knight, UnitType::Infantry));
        assert!(!beats(UnitType::Archer, UnitType::Infantry));
        assert!(!beats(UnitType::Siege, UnitType::Infantry));
        assert!(!beats(UnitType::Infantry, UnitType::Siege));
    }

    #[test]
    fn damage_floors_after_aura_divisor() {
        assert_eq!(scaled_damage(20, 1.5, 1.0), 30);
        assert_eq!(scaled_damage(25, 1.0, 1.25), 20);
        assert_eq!(scaled_damage(30, 1.5, 1.25), 36);
        assert_eq!(scaled_damage(20, 1.0, 0.0), 20);
    }

    #[test]
    fn offers_are_distinct_offerable_types() {
        let mut rng = StdRng::seed_from_u64(1);
        let offers = draw_offers(&mut rng);
        assert_eq!(offers.len(), TILE_OFFER_COUNT);
        for (index, offer) in offers.iter().enumerate() {
            assert!(OFFERABLE_TILE_TYPES.contains(offer));
            assert!(!offers[index + 1..].contains(offer));
        }
    }
}
