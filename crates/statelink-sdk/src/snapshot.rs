//! 玩家状态快照
//!
//! 快照在每次采集时新建，构造完成后不可修改，随后整体交给远端客户端。
//! 每个被填充的数据类别同时记录 `last_updated` 时间戳和 `change_fingerprint`，
//! 两张表由 [`SnapshotBuilder`] 在同一处写入，保证键集一致。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::StateLinkError;
use crate::fingerprint::{ChangeFingerprinter, Fingerprint};
use crate::utils::TimeFormatter;

/// 玩家唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(Uuid);

impl ActorId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ActorId {
    type Err = StateLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| StateLinkError::InvalidData(format!("无效的玩家 ID {}: {}", s, e)))
    }
}

impl From<Uuid> for ActorId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// 玩家身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: ActorId,
    pub name: String,
}

impl ActorProfile {
    pub fn new(id: ActorId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// 数据类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Location,
    Vitals,
    Experience,
    Inventory,
    Statistics,
    Economy,
    Permissions,
    Skills,
    Advancements,
    Playtime,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Location,
        Category::Vitals,
        Category::Experience,
        Category::Inventory,
        Category::Statistics,
        Category::Economy,
        Category::Permissions,
        Category::Skills,
        Category::Advancements,
        Category::Playtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Location => "location",
            Category::Vitals => "vitals",
            Category::Experience => "experience",
            Category::Inventory => "inventory",
            Category::Statistics => "statistics",
            Category::Economy => "economy",
            Category::Permissions => "permissions",
            Category::Skills => "skills",
            Category::Advancements => "advancements",
            Category::Playtime => "playtime",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            world: "unknown".to_string(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            ..Default::default()
        }
    }

    /// 所在方块坐标
    pub fn block_coords(&self) -> (i64, i64, i64) {
        (self.x.floor() as i64, self.y.floor() as i64, self.z.floor() as i64)
    }

    /// 同一世界内的直线距离，不同世界返回 None
    pub fn distance_to(&self, other: &Location) -> Option<f64> {
        if self.world != other.world {
            return None;
        }
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        Some((dx * dx + dy * dy + dz * dz).sqrt())
    }

    /// 朝向（yaw 0 为南，顺时针增加）
    pub fn direction(&self) -> &'static str {
        let yaw = (self.yaw as f64).rem_euclid(360.0);
        match yaw {
            y if !(45.0..315.0).contains(&y) => "South",
            y if y < 135.0 => "West",
            y if y < 225.0 => "North",
            _ => "East",
        }
    }
}

impl Fingerprint for Location {
    fn canonicalize(&self, out: &mut String) {
        let (x, y, z) = self.block_coords();
        self.world.canonicalize(out);
        out.push_str(&format!("@{},{},{}", x, y, z));
    }
}

/// 生命值与饥饿值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub health: f64,
    pub max_health: f64,
    pub food: u32,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            health: 0.0,
            max_health: 20.0,
            food: 0,
        }
    }
}

impl Fingerprint for Vitals {
    fn canonicalize(&self, out: &mut String) {
        ChangeFingerprinter::write_float(out, self.health, 1);
        out.push('/');
        ChangeFingerprinter::write_float(out, self.max_health, 1);
        out.push('|');
        self.food.canonicalize(out);
    }
}

/// 经验
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub level: u32,
    /// 当前等级进度 0.0..1.0
    pub progress: f32,
    pub total: u64,
}

impl Fingerprint for Experience {
    fn canonicalize(&self, out: &mut String) {
        self.level.canonicalize(out);
        out.push('|');
        self.total.canonicalize(out);
    }
}

/// 背包中的一格
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemStack {
    pub slot: u32,
    pub item: String,
    pub amount: u32,
}

impl ItemStack {
    pub fn new(slot: u32, item: impl Into<String>, amount: u32) -> Self {
        Self {
            slot,
            item: item.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub items: Vec<ItemStack>,
}

impl Inventory {
    pub fn new(items: Vec<ItemStack>) -> Self {
        Self { items }
    }

    pub fn total_items(&self) -> u64 {
        self.items.iter().map(|stack| stack.amount as u64).sum()
    }
}

impl Fingerprint for Inventory {
    // 与列出顺序无关；数量为 0 的格子等同于空格
    fn canonicalize(&self, out: &mut String) {
        let mut stacks: Vec<&ItemStack> = self.items.iter().filter(|s| s.amount > 0).collect();
        stacks.sort();
        out.push('[');
        for stack in stacks {
            stack.slot.canonicalize(out);
            out.push(':');
            stack.item.canonicalize(out);
            out.push('x');
            stack.amount.canonicalize(out);
            out.push(';');
        }
        out.push(']');
    }
}

/// 常用统计项
pub mod stat_keys {
    pub const BLOCKS_MINED: &str = "blocks_mined";
    pub const DEATHS: &str = "deaths";
    pub const MOBS_KILLED: &str = "mobs_killed";
    pub const PLAYER_KILLS: &str = "player_kills";
    pub const DAMAGE_DEALT: &str = "damage_dealt";
    pub const DAMAGE_TAKEN: &str = "damage_taken";
    pub const JUMPS: &str = "jumps";
    pub const ITEMS_CRAFTED: &str = "items_crafted";
    pub const FISH_CAUGHT: &str = "fish_caught";
    pub const ANIMALS_BRED: &str = "animals_bred";
    pub const DISTANCE_TRAVELED: &str = "distance_traveled";
    pub const RAIDS_WON: &str = "raids_won";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Statistics {
    pub values: BTreeMap<String, i64>,
}

impl Statistics {
    pub fn get(&self, key: &str) -> i64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    pub fn with(mut self, key: &str, value: i64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl Fingerprint for Statistics {
    fn canonicalize(&self, out: &mut String) {
        self.values.canonicalize(out);
    }
}

/// 余额及当日收支
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EconomyData {
    pub balance: f64,
    pub earned_today: f64,
    pub spent_today: f64,
}

impl Fingerprint for EconomyData {
    // 当日收支由余额变化推导而来，只看余额
    fn canonicalize(&self, out: &mut String) {
        self.balance.canonicalize(out);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionData {
    pub primary_group: String,
    pub groups: Vec<String>,
}

impl Default for PermissionData {
    fn default() -> Self {
        Self {
            primary_group: "default".to_string(),
            groups: Vec::new(),
        }
    }
}

impl Fingerprint for PermissionData {
    fn canonicalize(&self, out: &mut String) {
        self.primary_group.canonicalize(out);
        let mut groups = self.groups.clone();
        groups.sort();
        groups.dedup();
        groups.canonicalize(out);
    }
}

/// 技能等级（技能名 -> 等级）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillData {
    pub levels: BTreeMap<String, u32>,
}

impl SkillData {
    /// 所有技能等级之和
    pub fn power_level(&self) -> u64 {
        self.levels.values().map(|level| *level as u64).sum()
    }
}

impl Fingerprint for SkillData {
    fn canonicalize(&self, out: &mut String) {
        self.levels.canonicalize(out);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advancements {
    pub completed: u32,
    pub total: u32,
}

impl Advancements {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

impl Fingerprint for Advancements {
    fn canonicalize(&self, out: &mut String) {
        self.completed.canonicalize(out);
        out.push('/');
        self.total.canonicalize(out);
    }
}

/// 某一时刻的完整玩家状态
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    actor: ActorProfile,
    collected_at: i64,
    online: bool,
    game_mode: String,
    location: Option<Location>,
    vitals: Option<Vitals>,
    experience: Option<Experience>,
    inventory: Option<Inventory>,
    statistics: Option<Statistics>,
    economy: Option<EconomyData>,
    permissions: Option<PermissionData>,
    skills: Option<SkillData>,
    advancements: Option<Advancements>,
    playtime_minutes: Option<u64>,
    last_updated: BTreeMap<Category, i64>,
    change_fingerprint: BTreeMap<Category, String>,
}

impl StateSnapshot {
    pub fn builder(actor: ActorProfile, collected_at: i64) -> SnapshotBuilder {
        SnapshotBuilder::new(actor, collected_at)
    }

    pub fn actor(&self) -> &ActorProfile {
        &self.actor
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor.id
    }

    pub fn collected_at(&self) -> i64 {
        self.collected_at
    }

    pub fn game_mode(&self) -> &str {
        &self.game_mode
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn vitals(&self) -> Option<&Vitals> {
        self.vitals.as_ref()
    }

    pub fn experience(&self) -> Option<&Experience> {
        self.experience.as_ref()
    }

    pub fn inventory(&self) -> Option<&Inventory> {
        self.inventory.as_ref()
    }

    pub fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    pub fn economy(&self) -> Option<&EconomyData> {
        self.economy.as_ref()
    }

    pub fn permissions(&self) -> Option<&PermissionData> {
        self.permissions.as_ref()
    }

    pub fn skills(&self) -> Option<&SkillData> {
        self.skills.as_ref()
    }

    pub fn advancements(&self) -> Option<&Advancements> {
        self.advancements.as_ref()
    }

    pub fn playtime_minutes(&self) -> Option<u64> {
        self.playtime_minutes
    }

    pub fn last_updated(&self) -> &BTreeMap<Category, i64> {
        &self.last_updated
    }

    pub fn change_fingerprint(&self) -> &BTreeMap<Category, String> {
        &self.change_fingerprint
    }

    pub fn fingerprint_of(&self, category: Category) -> Option<&str> {
        self.change_fingerprint.get(&category).map(String::as_str)
    }

    /// 与另一份快照相比指纹不同的类别
    pub fn changed_categories(&self, previous: &StateSnapshot) -> Vec<Category> {
        self.change_fingerprint
            .iter()
            .filter(|(category, fp)| previous.fingerprint_of(**category) != Some(fp.as_str()))
            .map(|(category, _)| *category)
            .collect()
    }

    /// 上传用的 playerData 对象
    pub fn to_player_data(&self) -> Value {
        let mut data = Map::new();
        data.insert("username".into(), json!(self.actor.name));
        data.insert("uuid".into(), json!(self.actor.id.to_string()));
        data.insert("online".into(), json!(self.online));
        data.insert("gamemode".into(), json!(self.game_mode));
        data.insert("sync_timestamp".into(), json!(self.collected_at));

        if let Some(location) = &self.location {
            data.insert("world".into(), json!(location.world));
            data.insert(
                "location".into(),
                json!({
                    "world": location.world,
                    "x": location.x,
                    "y": location.y,
                    "z": location.z,
                    "yaw": location.yaw,
                    "pitch": location.pitch,
                    "direction": location.direction(),
                }),
            );
        }
        if let Some(vitals) = &self.vitals {
            data.insert("health".into(), json!(vitals.health));
            data.insert("max_health".into(), json!(vitals.max_health));
            data.insert("food".into(), json!(vitals.food));
        }
        if let Some(experience) = &self.experience {
            data.insert("level".into(), json!(experience.level));
            data.insert("experience".into(), json!(experience.progress));
            data.insert("total_experience".into(), json!(experience.total));
        }
        if let Some(inventory) = &self.inventory {
            data.insert("inventory".into(), json!(inventory.items));
        }
        if let Some(statistics) = &self.statistics {
            for (key, value) in &statistics.values {
                data.insert(key.clone(), json!(value));
            }
        }
        if let Some(economy) = &self.economy {
            data.insert("balance".into(), json!(economy.balance));
            data.insert("money_earned_today".into(), json!(economy.earned_today));
            data.insert("money_spent_today".into(), json!(economy.spent_today));
        }
        if let Some(permissions) = &self.permissions {
            data.insert("group".into(), json!(permissions.primary_group));
            data.insert("groups".into(), json!(permissions.groups));
        }
        if let Some(skills) = &self.skills {
            data.insert("skills".into(), json!(skills.levels));
            data.insert("power_level".into(), json!(skills.power_level()));
        }
        if let Some(advancements) = &self.advancements {
            data.insert("achievements".into(), json!(advancements.completed));
            data.insert("achievements_total".into(), json!(advancements.total));
            data.insert("achievements_percentage".into(), json!(advancements.percentage()));
        }
        if let Some(minutes) = self.playtime_minutes {
            data.insert("playtime_minutes".into(), json!(minutes));
            data.insert("playtime".into(), json!(TimeFormatter::format_playtime(minutes)));
        }

        data.insert("last_updated".into(), json!(self.last_updated));
        data.insert("change_ids".into(), json!(self.change_fingerprint));
        Value::Object(data)
    }
}

/// 快照构建器
///
/// 每填充一个类别就同时写入指纹和时间戳。
pub struct SnapshotBuilder {
    snapshot: StateSnapshot,
}

impl SnapshotBuilder {
    pub fn new(actor: ActorProfile, collected_at: i64) -> Self {
        Self {
            snapshot: StateSnapshot {
                actor,
                collected_at,
                online: true,
                game_mode: "SURVIVAL".to_string(),
                location: None,
                vitals: None,
                experience: None,
                inventory: None,
                statistics: None,
                economy: None,
                permissions: None,
                skills: None,
                advancements: None,
                playtime_minutes: None,
                last_updated: BTreeMap::new(),
                change_fingerprint: BTreeMap::new(),
            },
        }
    }

    fn stamp<T: Fingerprint + ?Sized>(&mut self, category: Category, value: &T) {
        let snapshot = &mut self.snapshot;
        snapshot.last_updated.insert(category, snapshot.collected_at);
        snapshot
            .change_fingerprint
            .insert(category, ChangeFingerprinter::fingerprint(value));
    }

    pub fn online(mut self, online: bool) -> Self {
        self.snapshot.online = online;
        self
    }

    pub fn game_mode(mut self, game_mode: impl Into<String>) -> Self {
        self.snapshot.game_mode = game_mode.into();
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.stamp(Category::Location, &location);
        self.snapshot.location = Some(location);
        self
    }

    pub fn vitals(mut self, vitals: Vitals) -> Self {
        self.stamp(Category::Vitals, &vitals);
        self.snapshot.vitals = Some(vitals);
        self
    }

    pub fn experience(mut self, experience: Experience) -> Self {
        self.stamp(Category::Experience, &experience);
        self.snapshot.experience = Some(experience);
        self
    }

    pub fn inventory(mut self, inventory: Inventory) -> Self {
        self.stamp(Category::Inventory, &inventory);
        self.snapshot.inventory = Some(inventory);
        self
    }

    pub fn statistics(mut self, statistics: Statistics) -> Self {
        self.stamp(Category::Statistics, &statistics);
        self.snapshot.statistics = Some(statistics);
        self
    }

    pub fn economy(mut self, economy: EconomyData) -> Self {
        self.stamp(Category::Economy, &economy);
        self.snapshot.economy = Some(economy);
        self
    }

    pub fn permissions(mut self, permissions: PermissionData) -> Self {
        self.stamp(Category::Permissions, &permissions);
        self.snapshot.permissions = Some(permissions);
        self
    }

    pub fn skills(mut self, skills: SkillData) -> Self {
        self.stamp(Category::Skills, &skills);
        self.snapshot.skills = Some(skills);
        self
    }

    pub fn advancements(mut self, advancements: Advancements) -> Self {
        self.stamp(Category::Advancements, &advancements);
        self.snapshot.advancements = Some(advancements);
        self
    }

    pub fn playtime_minutes(mut self, minutes: u64) -> Self {
        self.stamp(Category::Playtime, &minutes);
        self.snapshot.playtime_minutes = Some(minutes);
        self
    }

    pub fn build(self) -> StateSnapshot {
        self.snapshot
    }
}
