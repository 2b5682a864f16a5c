use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type PlayerId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: Coord) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    pub fn neighbors4(self) -> [Coord; 4] {
        [
            Coord::new(self.x, self.y - 1),
            Coord::new(self.x + 1, self.y),
            Coord::new(self.x, self.y + 1),
            Coord::new(self.x - 1, self.y),
        ]
    }

    pub fn key(self) -> String {
        self.to_string()
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        let (x, y) = raw.split_once(',')?;
        Some(Self::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

pub mod coord_key {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Coord;

    pub fn serialize<S: Serializer>(value: &Option<Coord>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(coord) => serializer.serialize_some(&coord.key()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Coord>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => Coord::parse_key(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid tile key: {raw}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBundle {
    pub gold: i32,
    pub food: i32,
    pub faith: i32,
}

impl ResourceBundle {
    pub const ZERO: ResourceBundle = ResourceBundle {
        gold: 0,
        food: 0,
        faith: 0,
    };

    pub const fn new(gold: i32, food: i32, faith: i32) -> Self {
        Self { gold, food, faith }
    }

    pub fn plus(self, other: ResourceBundle) -> Self {
        Self::new(
            self.gold + other.gold,
            self.food + other.food,
            self.faith + other.faith,
        )
    }

    pub fn percent(self, percent: i32) -> Self {
        Self::new(
            self.gold * percent / 100,
            self.food * percent / 100,
            self.faith * percent / 100,
        )
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub gold: i32,
    pub food: i32,
    pub faith: i32,
    pub cap: i32,
}

impl Resources {
    pub fn new(start: ResourceBundle, cap: i32) -> Self {
        Self {
            gold: start.gold.clamp(0, cap),
            food: start.food.clamp(0, cap),
            faith: start.faith.clamp(0, cap),
            cap,
        }
    }

    pub fn bundle(&self) -> ResourceBundle {
        ResourceBundle::new(self.gold, self.food, self.faith)
    }

    pub fn covers(&self, cost: ResourceBundle) -> bool {
        self.gold >= cost.gold && self.food >= cost.food && self.faith >= cost.faith
    }

    /// Deducts `cost` only if every component is covered. Returns whether it was deducted.
    pub fn try_spend(&mut self, cost: ResourceBundle) -> bool {
        if !self.covers(cost) {
            return false;
        }
        self.gold -= cost.gold;
        self.food -= cost.food;
        self.faith -= cost.faith;
        true
    }

    /// Adds `gain` clamped to the cap and returns the amount dropped by the clamp.
    pub fn add_clamped(&mut self, gain: ResourceBundle) -> ResourceBundle {
        let (gold, gold_over) = clamp_add(self.gold, gain.gold, self.cap);
        let (food, food_over) = clamp_add(self.food, gain.food, self.cap);
        let (faith, faith_over) = clamp_add(self.faith, gain.faith, self.cap);
        self.gold = gold;
        self.food = food;
        self.faith = faith;
        ResourceBundle::new(gold_over, food_over, faith_over)
    }

    pub fn take(&mut self, loss: ResourceBundle) -> ResourceBundle {
        let taken = ResourceBundle::new(
            loss.gold.clamp(0, self.gold),
            loss.food.clamp(0, self.food),
            loss.faith.clamp(0, self.faith),
        );
        self.gold -= taken.gold;
        self.food -= taken.food;
        self.faith -= taken.faith;
        taken
    }
}

fn clamp_add(current: i32, gain: i32, cap: i32) -> (i32, i32) {
    let raw = current.saturating_add(gain.max(0));
    if raw > cap {
        (cap, raw - cap)
    } else {
        (raw, 0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileType {
    Field,
    Mine,
    Orchard,
    Monastery,
    City,
    Capital,
    Barracks,
    Watchtower,
    Marsh,
}

impl TileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Mine => "mine",
            Self::Orchard => "orchard",
            Self::Monastery => "monastery",
            Self::City => "city",
            Self::Capital => "capital",
            Self::Barracks => "barracks",
            Self::Watchtower => "watchtower",
            Self::Marsh => "marsh",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "field" => Some(Self::Field),
            "mine" => Some(Self::Mine),
            "orchard" => Some(Self::Orchard),
            "monastery" => Some(Self::Monastery),
            "city" => Some(Self::City),
            "capital" => Some(Self::Capital),
            "barracks" => Some(Self::Barracks),
            "watchtower" => Some(Self::Watchtower),
            "marsh" => Some(Self::Marsh),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Infantry,
    Archer,
    Knight,
    Siege,
}

impl UnitType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Infantry => "infantry",
            Self::Archer => "archer",
            Self::Knight => "knight",
            Self::Siege => "siege",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "infantry" => Some(Self::Infantry),
            "archer" => Some(Self::Archer),
            "knight" => Some(Self::Knight),
            "siege" => Some(Self::Siege),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Idle,
    Moving,
    Attacking,
    Dead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Deployed,
    Cooldown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechLevel {
    Manor,
    Duchy,
    Kingdom,
}

impl TechLevel {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Manor => Some(Self::Duchy),
            Self::Duchy => Some(Self::Kingdom),
            Self::Kingdom => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileState {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub tile_type: TileType,
    pub owner: Option<PlayerId>,
    pub hp: i32,
    #[serde(rename = "maxHp")]
    pub max_hp: i32,
    #[serde(rename = "yield")]
    pub base_yield: ResourceBundle,
    pub capturable: bool,
    #[serde(rename = "workerCapacity")]
    pub worker_capacity: usize,
    pub workers: Vec<String>,
}

impl TileState {
    pub fn coord(&self) -> Coord {
        Coord::new(self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitView {
    pub id: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub owner: PlayerId,
    pub hp: i32,
    #[serde(rename = "maxHp")]
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub speed: f32,
    pub range: i32,
    pub x: f32,
    pub y: f32,
    pub path: VecDeque<Coord>,
    pub status: UnitStatus,
}

impl UnitView {
    pub fn cell(&self) -> Coord {
        Coord::new(self.x.round() as i32, self.y.round() as i32)
    }

    pub fn is_alive(&self) -> bool {
        self.status != UnitStatus::Dead && self.hp > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    pub id: String,
    pub owner: PlayerId,
    pub status: WorkerStatus,
    #[serde(rename = "tileKey", with = "coord_key")]
    pub tile: Option<Coord>,
    #[serde(rename = "cooldownUntilTick")]
    pub cooldown_until_tick: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub connected: bool,
    pub resources: Resources,
    #[serde(rename = "capitalHp")]
    pub capital_hp: i32,
    #[serde(rename = "techLevel")]
    pub tech_level: TechLevel,
    pub eliminated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnView {
    #[serde(rename = "playerId")]
    pub player_id: PlayerId,
    #[serde(rename = "turnNumber")]
    pub turn_number: u64,
    #[serde(rename = "endsAtTick")]
    pub ends_at_tick: u64,
    pub offers: Vec<TileType>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GameEvent {
    TilePlaced {
        x: i32,
        y: i32,
        tile_type: TileType,
        owner: PlayerId,
    },
    UnitTrainingStarted {
        training_id: String,
        unit_type: UnitType,
        owner: PlayerId,
        x: i32,
        y: i32,
        ready_at_tick: u64,
    },
    UnitTrained {
        unit_id: String,
        unit_type: UnitType,
        owner: PlayerId,
        x: i32,
        y: i32,
    },
    UnitMoveOrdered {
        unit_id: String,
        x: i32,
        y: i32,
        path_len: usize,
    },
    PathNotFound {
        unit_id: String,
        x: i32,
        y: i32,
    },
    PathInvalidated {
        unit_id: String,
        replanned: bool,
    },
    UnitArrived {
        unit_id: String,
        x: i32,
        y: i32,
    },
    UnitAttacked {
        attacker_id: String,
        target_id: String,
        damage: i32,
        target_hp: i32,
    },
    UnitDied {
        unit_id: String,
        killer_id: Option<String>,
    },
    TileAttacked {
        attacker_id: String,
        x: i32,
        y: i32,
        damage: i32,
        tile_hp: i32,
    },
    TileNeutralized {
        x: i32,
        y: i32,
        previous_owner: PlayerId,
    },
    TileCaptured {
        x: i32,
        y: i32,
        owner: PlayerId,
    },
    WorkerDeployed {
        worker_id: String,
        owner: PlayerId,
        x: i32,
        y: i32,
    },
    WorkerRecalled {
        worker_id: String,
        owner: PlayerId,
        ready_at_tick: u64,
    },
    WorkerReady {
        worker_id: String,
        owner: PlayerId,
    },
    ResourcesGenerated {
        player_id: PlayerId,
        gained: ResourceBundle,
    },
    ResourceOverflow {
        player_id: PlayerId,
        dropped: ResourceBundle,
    },
    Raided {
        raider: PlayerId,
        victim: PlayerId,
        stolen: ResourceBundle,
    },
    TechAdvanced {
        player_id: PlayerId,
        level: TechLevel,
    },
    TurnChanged {
        player_id: PlayerId,
        turn_number: u64,
        offers: Vec<TileType>,
    },
    PlayerConnection {
        player_id: PlayerId,
        connected: bool,
    },
    PlayerEliminated {
        player_id: PlayerId,
    },
    GameOver {
        winner: Option<PlayerId>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub width: i32,
    pub height: i32,
    pub players: Vec<PlayerView>,
    pub tiles: Vec<TileState>,
    pub units: Vec<UnitView>,
    pub workers: Vec<WorkerState>,
    pub turn: Option<TurnView>,
    pub winner: Option<PlayerId>,
    pub ended: bool,
    pub events: Vec<GameEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub tick: u64,
    #[serde(rename = "baseTick")]
    pub base_tick: u64,
    pub players: Vec<PlayerView>,
    pub tiles: Vec<TileState>,
    pub units: Vec<UnitView>,
    #[serde(rename = "removedUnits")]
    pub removed_units: Vec<String>,
    pub workers: Vec<WorkerState>,
    pub turn: Option<TurnView>,
    pub winner: Option<PlayerId>,
    pub ended: bool,
    pub events: Vec<GameEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatePayload {
    Full { snapshot: Snapshot },
    Diff { diff: StateDiff },
}

impl StatePayload {
    pub fn tick(&self) -> u64 {
        match self {
            Self::Full { snapshot } => snapshot.tick,
            Self::Diff { diff } => diff.tick,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StartPlayer {
    pub id: PlayerId,
    pub name: String,
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coord_key_round_trips_through_text() {
        let coord = Coord::new(12, 7);
        assert_eq!(coord.key(), "12,7");
        assert_eq!(Coord::parse_key(" 12 , 7 "), Some(coord));
        assert_eq!(Coord::parse_key("12;7"), None);
    }

    #[test]
    fn add_clamped_reports_overflow_and_never_exceeds_cap() {
        let mut resources = Resources::new(ResourceBundle::new(490, 10, 0), 500);
        let dropped = resources.add_clamped(ResourceBundle::new(25, 5, 0));
        assert_eq!(resources.gold, 500);
        assert_eq!(resources.food, 15);
        assert_eq!(dropped, ResourceBundle::new(15, 0, 0));
    }

    #[test]
    fn try_spend_is_all_or_nothing() {
        let mut resources = Resources::new(ResourceBundle::new(60, 10, 0), 500);
        assert!(!resources.try_spend(ResourceBundle::new(50, 20, 0)));
        assert_eq!(resources.bundle(), ResourceBundle::new(60, 10, 0));
        assert!(resources.try_spend(ResourceBundle::new(50, 10, 0)));
        assert_eq!(resources.bundle(), ResourceBundle::new(10, 0, 0));
    }

    #[test]
    fn worker_tile_serializes_as_key() {
        let worker = WorkerState {
            id: "worker_1".to_string(),
            owner: "alice".to_string(),
            status: WorkerStatus::Deployed,
            tile: Some(Coord::new(3, 4)),
            cooldown_until_tick: None,
        };
        let value = serde_json::to_value(&worker).expect("serialize worker");
        assert_eq!(value["tileKey"], "3,4");
        let back: WorkerState = serde_json::from_value(value).expect("deserialize worker");
        assert_eq!(back, worker);
    }

    #[test]
    fn events_are_tagged_snake_case_with_camel_fields() {
        let event = GameEvent::WorkerReady {
            worker_id: "worker_2".to_string(),
            owner: "bob".to_string(),
        };
        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["type"], "worker_ready");
        assert_eq!(value["workerId"], "worker_2");
    }
}
