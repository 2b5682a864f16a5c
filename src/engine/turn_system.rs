use super::utils::draw_offers;
use super::*;

use crate::types::TurnView;

impl GameEngine {
    pub(super) fn start_turns(&mut self) {
        let Some(first) = self
            .state
            .players
            .iter()
            .find(|player| !player.view.eliminated)
            .map(|player| player.view.id.clone())
        else {
            return;
        };
        self.open_turn(first, 1);
    }

    pub(super) fn update_turn(&mut self) {
        let expired = self
            .state
            .turn
            .as_ref()
            .map(|turn| self.state.tick >= turn.ends_at_tick)
            .unwrap_or(false);
        if expired {
            self.advance_turn();
        }
    }

    pub(super) fn advance_turn(&mut self) {
        if self.state.ended {
            return;
        }
        let Some(current) = self.state.turn.as_ref() else {
            self.start_turns();
            return;
        };
        let turn_number = current.turn_number + 1;
        let seat = self.state.player_index(&current.player_id).unwrap_or(0);
        let count = self.state.players.len();
        let next = (1..=count)
            .map(|offset| &self.state.players[(seat + offset) % count])
            .find(|player| !player.view.eliminated)
            .map(|player| player.view.id.clone());
        match next {
            Some(player_id) => self.open_turn(player_id, turn_number),
            None => self.state.turn = None,
        }
    }

    fn open_turn(&mut self, player_id: PlayerId, turn_number: u64) {
        let offers = draw_offers(&mut self.rng);
        self.state.turn = Some(TurnView {
            player_id: player_id.clone(),
            turn_number,
            ends_at_tick: self.state.tick + self.rules.placement_turn_ticks,
            offers: offers.clone(),
        });
        self.events.push(GameEvent::TurnChanged {
            player_id,
            turn_number,
            offers,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{bare_state, engine};
    use super::*;

    #[test]
    fn turn_rotates_on_timeout_and_skips_eliminated() {
        let mut state = bare_state(5, 5, 3);
        if let Some(player) = state.player_mut("p2") {
            player.view.eliminated = true;
        }
        let mut engine = engine(state);
        engine.start_turns();
        assert_eq!(engine.state().turn.as_ref().map(|t| t.player_id.as_str()), Some("p1"));

        for _ in 0..engine.rules.placement_turn_ticks {
            engine.step();
        }
        let turn = engine.state().turn.as_ref().expect("turn");
        assert_eq!(turn.player_id, "p3");
        assert_eq!(turn.turn_number, 2);
        assert_eq!(turn.ends_at_tick, engine.tick() + engine.rules.placement_turn_ticks);

        engine.advance_turn();
        assert_eq!(engine.state().turn.as_ref().map(|t| t.player_id.as_str()), Some("p1"));
    }
}
