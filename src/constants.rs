use crate::types::{ResourceBundle, TechLevel, TileType, UnitType};

pub const TICK_RATE: u32 = 10;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;
pub const TICK_SECONDS: f32 = 1.0 / TICK_RATE as f32;

pub const GRID_WIDTH: i32 = 40;
pub const GRID_HEIGHT: i32 = 40;

pub const RESOURCE_CAP: i32 = 500;
pub const STARTING_GOLD: i32 = 100;
pub const STARTING_FOOD: i32 = 100;
pub const STARTING_FAITH: i32 = 0;

pub const WORKERS_PER_PLAYER: usize = 5;
pub const WORKER_COOLDOWN_TICKS: u64 = 10 * TICK_RATE as u64;

pub const ATTACK_COOLDOWN_TICKS: u64 = TICK_RATE as u64;
pub const AGGREGATION_INTERVAL_TICKS: u64 = TICK_RATE as u64;
pub const DEAD_UNIT_LINGER_TICKS: u64 = TICK_RATE as u64;

pub const COUNTER_MULTIPLIER: f32 = 1.5;
pub const SIEGE_BUILDING_MULTIPLIER: f32 = 2.0;
pub const WATCHTOWER_AURA_RADIUS: i32 = 2;
pub const WATCHTOWER_DEFENSE_DIVISOR: f32 = 1.25;
pub const RAID_PERCENT: i32 = 10;

pub const SPATIAL_BUCKET_SIZE: i32 = 4;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;
pub const START_COUNTDOWN_TICKS: u64 = 5 * TICK_RATE as u64;
pub const EMPTY_ROOM_GRACE_TICKS: u64 = 30 * TICK_RATE as u64;
pub const PLACEMENT_TURN_TICKS: u64 = 15 * TICK_RATE as u64;
pub const TILE_OFFER_COUNT: usize = 3;
pub const MAX_PENDING_TRAINING_PER_PLAYER: usize = 5;

pub const FULL_SNAPSHOT_INTERVAL_TICKS: u64 = TICK_RATE as u64;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub const RATE_LIMIT_WINDOW_TICKS: u64 = TICK_RATE as u64;
pub const RATE_LIMIT_MAX_COMMANDS: usize = 20;

pub const RECONCILE_HISTORY_LEN: usize = 30;
pub const SNAP_THRESHOLD_CELLS: f32 = 1.5;
pub const ACK_TIMEOUT_MS: u64 = 2_000;
pub const ACK_MAX_RESENDS: u32 = 1;
pub const COMMAND_REPLY_CACHE_LEN: usize = 64;

pub const CAPITAL_POSITIONS: [(i32, i32); 4] = [(10, 10), (30, 10), (10, 30), (30, 30)];
pub const NEUTRAL_CITY_POSITIONS: [(i32, i32); 4] = [(15, 15), (25, 15), (15, 25), (25, 25)];
pub const SCATTERED_PER_TYPE: usize = 3;
pub const CAPITAL_EXCLUSION_DISTANCE: i32 = 3;

pub const OFFERABLE_TILE_TYPES: [TileType; 5] = [
    TileType::City,
    TileType::Field,
    TileType::Monastery,
    TileType::Barracks,
    TileType::Watchtower,
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitStats {
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub speed: f32,
    pub range: i32,
    pub cost: ResourceBundle,
    pub training_ticks: u64,
    pub required_tech: TechLevel,
}

pub fn unit_stats(unit_type: UnitType) -> UnitStats {
    match unit_type {
        UnitType::Infantry => UnitStats {
            max_hp: 100,
            attack: 20,
            defense: 15,
            speed: 1.0,
            range: 1,
            cost: ResourceBundle::new(50, 20, 0),
            training_ticks: 10 * TICK_RATE as u64,
            required_tech: TechLevel::Manor,
        },
        UnitType::Archer => UnitStats {
            max_hp: 75,
            attack: 25,
            defense: 10,
            speed: 1.0,
            range: 2,
            cost: ResourceBundle::new(60, 30, 0),
            training_ticks: 8 * TICK_RATE as u64,
            required_tech: TechLevel::Manor,
        },
        UnitType::Knight => UnitStats {
            max_hp: 150,
            attack: 30,
            defense: 20,
            speed: 2.0,
            range: 1,
            cost: ResourceBundle::new(100, 50, 0),
            training_ticks: 15 * TICK_RATE as u64,
            required_tech: TechLevel::Duchy,
        },
        UnitType::Siege => UnitStats {
            max_hp: 120,
            attack: 50,
            defense: 5,
            speed: 0.5,
            range: 2,
            cost: ResourceBundle::new(150, 50, 20),
            training_ticks: 20 * TICK_RATE as u64,
            required_tech: TechLevel::Kingdom,
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileStats {
    pub max_hp: i32,
    pub base_yield: ResourceBundle,
    pub capturable: bool,
    pub worker_capacity: usize,
    pub terrain_cost: u32,
    pub building: bool,
    pub can_train: bool,
}

pub fn tile_stats(tile_type: TileType) -> TileStats {
    match tile_type {
        TileType::Field => TileStats {
            max_hp: 40,
            base_yield: ResourceBundle::new(0, 2, 0),
            capturable: true,
            worker_capacity: 1,
            terrain_cost: 1,
            building: false,
            can_train: false,
        },
        TileType::Mine => TileStats {
            max_hp: 150,
            base_yield: ResourceBundle::new(4, 0, 0),
            capturable: true,
            worker_capacity: 0,
            terrain_cost: 1,
            building: false,
            can_train: false,
        },
        TileType::Orchard => TileStats {
            max_hp: 150,
            base_yield: ResourceBundle::new(0, 4, 0),
            capturable: true,
            worker_capacity: 0,
            terrain_cost: 1,
            building: false,
            can_train: false,
        },
        TileType::Monastery => TileStats {
            max_hp: 80,
            base_yield: ResourceBundle::new(0, 0, 3),
            capturable: true,
            worker_capacity: 1,
            terrain_cost: 1,
            building: true,
            can_train: false,
        },
        TileType::City => TileStats {
            max_hp: 60,
            base_yield: ResourceBundle::new(3, 0, 0),
            capturable: true,
            worker_capacity: 1,
            terrain_cost: 1,
            building: true,
            can_train: true,
        },
        TileType::Capital => TileStats {
            max_hp: 1000,
            base_yield: ResourceBundle::new(3, 2, 0),
            capturable: false,
            worker_capacity: 2,
            terrain_cost: 1,
            building: true,
            can_train: true,
        },
        TileType::Barracks => TileStats {
            max_hp: 100,
            base_yield: ResourceBundle::ZERO,
            capturable: false,
            worker_capacity: 0,
            terrain_cost: 1,
            building: true,
            can_train: true,
        },
        TileType::Watchtower => TileStats {
            max_hp: 120,
            base_yield: ResourceBundle::ZERO,
            capturable: false,
            worker_capacity: 0,
            terrain_cost: 1,
            building: true,
            can_train: false,
        },
        TileType::Marsh => TileStats {
            max_hp: 30,
            base_yield: ResourceBundle::ZERO,
            capturable: false,
            worker_capacity: 0,
            terrain_cost: 2,
            building: false,
            can_train: false,
        },
    }
}

pub fn worker_bonus(tile_type: TileType) -> ResourceBundle {
    match tile_type {
        TileType::City | TileType::Capital => ResourceBundle::new(2, 0, 0),
        TileType::Field => ResourceBundle::new(0, 3, 0),
        TileType::Monastery => ResourceBundle::new(0, 0, 2),
        TileType::Mine
        | TileType::Orchard
        | TileType::Barracks
        | TileType::Watchtower
        | TileType::Marsh => ResourceBundle::ZERO,
    }
}

pub fn tech_advance_cost(target: TechLevel) -> Option<ResourceBundle> {
    match target {
        TechLevel::Manor => None,
        TechLevel::Duchy => Some(ResourceBundle::new(200, 100, 100)),
        TechLevel::Kingdom => Some(ResourceBundle::new(400, 200, 200)),
    }
}
