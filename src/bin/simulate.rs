use std::collections::{BTreeMap, HashSet};

use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use war_of_ages_server::config::RuleSet;
use war_of_ages_server::engine::{Command, GameEngine};
use war_of_ages_server::types::{Coord, StartPlayer, UnitType, WorkerStatus};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless scripted match that reports invariant anomalies")]
struct Cli {
    #[arg(long, default_value_t = 1)]
    seed: u64,
    #[arg(long, default_value_t = 6_000)]
    ticks: u64,
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(2..=4))]
    players: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnomalyLine<'a> {
    kind: &'static str,
    seed: u64,
    tick: u64,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryLine {
    kind: &'static str,
    seed: u64,
    players: u8,
    finished_tick: u64,
    ended: bool,
    winner: Option<String>,
    anomaly_count: usize,
    commands_accepted: usize,
    commands_rejected: usize,
    rejections_by_code: BTreeMap<&'static str, usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let players: Vec<StartPlayer> = (1..=cli.players)
        .map(|index| StartPlayer {
            id: format!("bot_{index}"),
            name: format!("Bot-{index:02}"),
            connected: true,
        })
        .collect();

    let mut engine = GameEngine::new(players, RuleSet::default(), cli.seed);
    let mut script = StdRng::seed_from_u64(cli.seed.wrapping_add(1));
    let mut seen = HashSet::new();
    let mut anomaly_count = 0;
    let mut accepted = 0;
    let mut rejections_by_code: BTreeMap<&'static str, usize> = BTreeMap::new();

    while engine.tick() < cli.ticks && !engine.is_ended() {
        for (player_id, command) in plan_commands(&engine, &mut script) {
            match engine.apply_command(&player_id, &command) {
                Ok(_) => accepted += 1,
                Err(error) => *rejections_by_code.entry(error.code()).or_insert(0) += 1,
            }
        }
        engine.step();
        let full = engine.tick().is_multiple_of(10);
        engine.build_state_payload(full);

        for message in engine.check_invariants() {
            if !seen.insert(message.clone()) {
                continue;
            }
            anomaly_count += 1;
            print_line(&AnomalyLine {
                kind: "anomaly",
                seed: cli.seed,
                tick: engine.tick(),
                message: &message,
            });
        }
    }

    info!(tick = engine.tick(), ended = engine.is_ended(), "simulation finished");
    print_line(&SummaryLine {
        kind: "summary",
        seed: cli.seed,
        players: cli.players,
        finished_tick: engine.tick(),
        ended: engine.is_ended(),
        winner: engine.winner().map(str::to_string),
        anomaly_count,
        commands_accepted: accepted,
        commands_rejected: rejections_by_code.values().sum(),
        rejections_by_code,
    });

    if anomaly_count > 0 {
        std::process::exit(1);
    }
}

fn print_line<T: Serialize>(line: &T) {
    match serde_json::to_string(line) {
        Ok(text) => println!("{text}"),
        Err(error) => tracing::error!(%error, "failed to encode report line"),
    }
}

fn plan_commands(engine: &GameEngine, rng: &mut StdRng) -> Vec<(String, Command)> {
    let state = engine.state();
    let tick = state.tick;
    let mut commands = Vec::new();

    if let Some(turn) = state.turn.as_ref() {
        if tick % 5 == 0 {
            let frontier: Vec<Coord> = state
                .tiles
                .values()
                .filter(|tile| tile.owner.as_deref() == Some(turn.player_id.as_str()))
                .flat_map(|tile| tile.coord().neighbors4())
                .filter(|cell| state.in_bounds(*cell) && !state.tiles.contains_key(cell))
                .collect();
            if let (Some(at), Some(tile_type)) = (frontier.choose(rng), turn.offers.choose(rng)) {
                commands.push((
                    turn.player_id.clone(),
                    Command::PlaceTile {
                        x: at.x,
                        y: at.y,
                        tile_type: *tile_type,
                    },
                ));
            }
        }
    }

    let enemy_capitals: Vec<(String, Coord)> = state
        .players
        .iter()
        .filter(|player| !player.view.eliminated)
        .filter_map(|player| player.capital.map(|at| (player.view.id.clone(), at)))
        .collect();

    for player in state.players.iter().filter(|player| !player.view.eliminated) {
        let player_id = player.view.id.as_str();

        if tick % 20 == 0 {
            if let Some(capital) = player.capital {
                let unit_type = if rng.random_bool(0.5) {
                    UnitType::Infantry
                } else {
                    UnitType::Archer
                };
                commands.push((
                    player_id.to_string(),
                    Command::TrainUnit {
                        unit_type,
                        x: capital.x,
                        y: capital.y,
                    },
                ));
            }
        }

        if tick % 15 == 0 {
            let targets: Vec<&Coord> = enemy_capitals
                .iter()
                .filter(|(owner, _)| owner != player_id)
                .map(|(_, at)| at)
                .collect();
            if let Some(target) = targets.choose(rng) {
                for unit in state.units.values().filter(|unit| {
                    unit.view.owner == player_id && unit.view.is_alive() && unit.view.path.is_empty()
                }) {
                    let goal = Coord::new(
                        target.x + rng.random_range(-1..=1),
                        target.y + rng.random_range(-1..=1),
                    );
                    commands.push((
                        player_id.to_string(),
                        Command::MoveUnit {
                            unit_id: unit.view.id.clone(),
                            x: goal.x,
                            y: goal.y,
                        },
                    ));
                }
            }
        }

        if tick % 25 == 0 {
            let idle_worker = state
                .workers
                .values()
                .any(|worker| worker.owner == player_id && worker.status == WorkerStatus::Idle);
            let owned: Vec<Coord> = state
                .tiles
                .values()
                .filter(|tile| tile.owner.as_deref() == Some(player_id))
                .filter(|tile| tile.workers.len() < tile.worker_capacity)
                .map(|tile| tile.coord())
                .collect();
            if let (true, Some(at)) = (idle_worker, owned.choose(rng)) {
                commands.push((
                    player_id.to_string(),
                    Command::PlaceWorker {
                        x: at.x,
                        y: at.y,
                        worker_id: None,
                    },
                ));
            }
        }

        if tick % 200 == 0 && tick > 0 {
            commands.push((player_id.to_string(), Command::AdvanceTech));
        }
    }

    debug!(tick, count = commands.len(), "bot commands planned");
    commands
}
