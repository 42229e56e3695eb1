//! 测试用的内存实现

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::collector::SnapshotCollector;
use crate::config::{EconomyConfig, SyncConfig, TrackingConfig};
use crate::economy::{ResourceDeltaMonitor, ResourceLedger};
use crate::error::{Result, StateLinkError};
use crate::events::EventManager;
use crate::link_state::{ActorLinkState, LinkStateBackend, LinkStateStore};
use crate::providers::{Capabilities, EconomyProvider, GameStateProvider, SkillsProvider};
use crate::remote::{RemoteRecord, SyncBackend, UnlinkOutcome};
use crate::scheduler::SyncScheduler;
use crate::snapshot::{
    ActorId, ActorProfile, Advancements, Experience, Inventory, Location, StateSnapshot,
    Statistics, Vitals,
};
use crate::utils::ManualClock;

#[derive(Debug, Clone)]
pub(crate) struct FakeActor {
    pub profile: ActorProfile,
    pub game_mode: String,
    pub location: Location,
    pub vitals: Vitals,
    pub experience: Experience,
    pub inventory: Inventory,
    pub statistics: Statistics,
    pub advancements: Advancements,
    pub playtime_minutes: u64,
}

impl FakeActor {
    fn new(profile: ActorProfile) -> Self {
        Self {
            profile,
            game_mode: "SURVIVAL".to_string(),
            location: Location::new("world", 0.0, 64.0, 0.0),
            vitals: Vitals::default(),
            experience: Experience::default(),
            inventory: Inventory::default(),
            statistics: Statistics::default(),
            advancements: Advancements::default(),
            playtime_minutes: 0,
        }
    }
}

/// 内存中的游戏世界，可按访问器注入失败
#[derive(Default)]
pub(crate) struct FakeGame {
    actors: RwLock<Vec<FakeActor>>,
    failing: RwLock<HashSet<(ActorId, &'static str)>>,
}

impl FakeGame {
    pub fn join(&self, name: &str) -> ActorProfile {
        let profile = ActorProfile::new(ActorId::random(), name);
        self.actors.write().push(FakeActor::new(profile.clone()));
        profile
    }

    pub fn leave(&self, actor: ActorId) {
        self.actors.write().retain(|a| a.profile.id != actor);
    }

    pub fn update(&self, actor: ActorId, mutate: impl FnOnce(&mut FakeActor)) {
        if let Some(a) = self.actors.write().iter_mut().find(|a| a.profile.id == actor) {
            mutate(a);
        }
    }

    pub fn fail(&self, actor: ActorId, accessor: &'static str) {
        self.failing.write().insert((actor, accessor));
    }

    fn read<T>(&self, actor: ActorId, accessor: &'static str, f: impl FnOnce(&FakeActor) -> T) -> Result<T> {
        if self.failing.read().contains(&(actor, accessor)) {
            return Err(StateLinkError::Provider(format!("{} unavailable", accessor)));
        }
        self.actors
            .read()
            .iter()
            .find(|a| a.profile.id == actor)
            .map(f)
            .ok_or_else(|| StateLinkError::NotFound(actor.to_string()))
    }
}

impl GameStateProvider for FakeGame {
    fn online_actors(&self) -> Vec<ActorProfile> {
        self.actors.read().iter().map(|a| a.profile.clone()).collect()
    }

    fn is_online(&self, actor: ActorId) -> bool {
        self.actors.read().iter().any(|a| a.profile.id == actor)
    }

    fn game_mode(&self, actor: ActorId) -> Result<String> {
        self.read(actor, "game_mode", |a| a.game_mode.clone())
    }

    fn location(&self, actor: ActorId) -> Result<Location> {
        self.read(actor, "location", |a| a.location.clone())
    }

    fn vitals(&self, actor: ActorId) -> Result<Vitals> {
        self.read(actor, "vitals", |a| a.vitals.clone())
    }

    fn experience(&self, actor: ActorId) -> Result<Experience> {
        self.read(actor, "experience", |a| a.experience.clone())
    }

    fn inventory(&self, actor: ActorId) -> Result<Inventory> {
        self.read(actor, "inventory", |a| a.inventory.clone())
    }

    fn statistics(&self, actor: ActorId) -> Result<Statistics> {
        self.read(actor, "statistics", |a| a.statistics.clone())
    }

    fn advancements(&self, actor: ActorId) -> Result<Advancements> {
        self.read(actor, "advancements", |a| a.advancements.clone())
    }

    fn playtime_minutes(&self, actor: ActorId) -> Result<u64> {
        self.read(actor, "playtime", |a| a.playtime_minutes)
    }
}

pub(crate) struct FakeEconomy {
    available: bool,
    balances: RwLock<HashMap<ActorId, f64>>,
    failing: RwLock<HashSet<ActorId>>,
}

impl FakeEconomy {
    pub fn new() -> Self {
        Self {
            available: true,
            balances: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self { available: false, ..Self::new() }
    }

    pub fn set_balance(&self, actor: ActorId, balance: f64) {
        self.balances.write().insert(actor, balance);
    }

    pub fn fail_for(&self, actor: ActorId) {
        self.failing.write().insert(actor);
    }
}

impl EconomyProvider for FakeEconomy {
    fn is_available(&self) -> bool {
        self.available
    }

    fn balance(&self, actor: ActorId) -> Result<f64> {
        if self.failing.read().contains(&actor) {
            return Err(StateLinkError::Provider("economy plugin threw".into()));
        }
        Ok(self.balances.read().get(&actor).copied().unwrap_or(0.0))
    }
}

#[derive(Default)]
pub(crate) struct FakeSkills {
    levels: RwLock<HashMap<ActorId, BTreeMap<String, u32>>>,
}

impl FakeSkills {
    pub fn set(&self, actor: ActorId, skill: &str, level: u32) {
        self.levels
            .write()
            .entry(actor)
            .or_default()
            .insert(skill.to_string(), level);
    }
}

impl SkillsProvider for FakeSkills {
    fn skills(&self, actor: ActorId) -> Result<BTreeMap<String, u32>> {
        Ok(self.levels.read().get(&actor).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct MemoryLinkBackend {
    states: RwLock<HashMap<ActorId, ActorLinkState>>,
}

#[async_trait]
impl LinkStateBackend for MemoryLinkBackend {
    async fn load_all(&self) -> Result<Vec<ActorLinkState>> {
        Ok(self.states.read().values().cloned().collect())
    }

    async fn load(&self, actor: ActorId) -> Result<Option<ActorLinkState>> {
        Ok(self.states.read().get(&actor).cloned())
    }

    async fn save(&self, state: &ActorLinkState) -> Result<()> {
        self.states.write().insert(state.actor_id, state.clone());
        Ok(())
    }
}

/// 远端调用失败的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Transient,
    Rejected,
}

impl Failure {
    fn to_error(self) -> StateLinkError {
        match self {
            Failure::Transient => StateLinkError::Timeout("simulated".into()),
            Failure::Rejected => StateLinkError::Rejected {
                status: 403,
                body: Some("invalid".into()),
            },
        }
    }
}

/// 记录全部调用的远端实现
pub(crate) struct RecordingBackend {
    pushes: Mutex<Vec<StateSnapshot>>,
    notifications: Mutex<Vec<(ActorId, String, Value)>>,
    refreshes: Mutex<Vec<ActorId>>,
    forgotten: Mutex<Vec<ActorId>>,
    unlinks: Mutex<Vec<ActorId>>,
    pub linked: RwLock<bool>,
    pub valid_code: RwLock<String>,
    pub push_failure: RwLock<Option<Failure>>,
    pub status_failure: RwLock<Option<Failure>>,
    pub unlink_failure: RwLock<Option<Failure>>,
    pub verify_failure: RwLock<Option<Failure>>,
    /// 上传前的模拟网络耗时
    pub push_delay: RwLock<Option<Duration>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            pushes: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            refreshes: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
            unlinks: Mutex::new(Vec::new()),
            linked: RwLock::new(false),
            valid_code: RwLock::new("ABC123".to_string()),
            push_failure: RwLock::new(None),
            status_failure: RwLock::new(None),
            unlink_failure: RwLock::new(None),
            verify_failure: RwLock::new(None),
            push_delay: RwLock::new(None),
        }
    }

    pub fn pushes(&self) -> Vec<StateSnapshot> {
        self.pushes.lock().clone()
    }

    pub fn pushes_for(&self, actor: ActorId) -> usize {
        self.pushes.lock().iter().filter(|s| s.actor_id() == actor).count()
    }

    pub fn notifications(&self) -> Vec<(ActorId, String, Value)> {
        self.notifications.lock().clone()
    }

    pub fn refreshes(&self) -> Vec<ActorId> {
        self.refreshes.lock().clone()
    }

    pub fn forgotten(&self) -> Vec<ActorId> {
        self.forgotten.lock().clone()
    }

    pub fn unlinks(&self) -> Vec<ActorId> {
        self.unlinks.lock().clone()
    }

    fn check(slot: &RwLock<Option<Failure>>) -> Result<()> {
        match *slot.read() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncBackend for RecordingBackend {
    async fn push_snapshot(&self, snapshot: StateSnapshot) -> Result<()> {
        let delay = *self.push_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::check(&self.push_failure)?;
        self.pushes.lock().push(snapshot);
        Ok(())
    }

    async fn notify_change(&self, actor: &ActorProfile, category: &str, value: Value) -> Result<()> {
        self.notifications
            .lock()
            .push((actor.id, category.to_string(), value));
        Ok(())
    }

    async fn notify_refresh(&self, actor: &ActorProfile) -> Result<()> {
        self.refreshes.lock().push(actor.id);
        Ok(())
    }

    async fn fetch_remote_state(&self, actor: ActorId) -> Result<RemoteRecord> {
        Ok(RemoteRecord {
            user_id: format!("user-{}", actor),
            username: None,
            extra: Default::default(),
        })
    }

    async fn check_link_status(&self, _actor: &ActorProfile) -> Result<bool> {
        Self::check(&self.status_failure)?;
        Ok(*self.linked.read())
    }

    async fn unlink(&self, actor: &ActorProfile) -> Result<UnlinkOutcome> {
        Self::check(&self.unlink_failure)?;
        self.unlinks.lock().push(actor.id);
        let mut linked = self.linked.write();
        if *linked {
            *linked = false;
            Ok(UnlinkOutcome::Unlinked)
        } else {
            Ok(UnlinkOutcome::AlreadyUnlinked)
        }
    }

    async fn verify_link_code(&self, _actor: &ActorProfile, code: &str) -> Result<bool> {
        Self::check(&self.verify_failure)?;
        let valid = *self.valid_code.read() == code;
        if valid {
            *self.linked.write() = true;
        }
        Ok(valid)
    }

    fn forget_actor(&self, actor: ActorId) {
        self.forgotten.lock().push(actor);
    }
}

/// 组装好的一套测试依赖
pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub game: Arc<FakeGame>,
    pub economy: Arc<FakeEconomy>,
    pub backend: Arc<RecordingBackend>,
    pub links: Arc<LinkStateStore>,
    pub ledger: Arc<ResourceLedger>,
    pub scheduler: Arc<SyncScheduler>,
    pub events: Arc<EventManager>,
    pub collector: Arc<SnapshotCollector>,
    pub economy_config: EconomyConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_economy(FakeEconomy::new()).await
    }

    pub async fn without_economy() -> Self {
        Self::with_economy(FakeEconomy::unavailable()).await
    }

    async fn with_economy(economy: FakeEconomy) -> Self {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let game = Arc::new(FakeGame::default());
        let economy = Arc::new(economy);
        let ledger = Arc::new(ResourceLedger::new());
        let links = Arc::new(
            LinkStateStore::open(Arc::new(MemoryLinkBackend::default()), clock.clone())
                .await
                .unwrap(),
        );
        let capabilities = Capabilities::default().with_economy(economy.clone());
        let collector = Arc::new(SnapshotCollector::new(
            game.clone(),
            capabilities,
            ledger.clone(),
            TrackingConfig::default(),
            clock.clone(),
        ));

        Self {
            scheduler: Arc::new(SyncScheduler::new(&SyncConfig::default(), clock.clone())),
            events: Arc::new(EventManager::new(64)),
            backend: Arc::new(RecordingBackend::new()),
            economy_config: EconomyConfig::default(),
            clock,
            game,
            economy,
            links,
            ledger,
            collector,
        }
    }

    /// 上线但未绑定
    pub fn online(&self, name: &str, balance: f64) -> ActorProfile {
        let actor = self.game.join(name);
        self.economy.set_balance(actor.id, balance);
        actor
    }

    pub async fn online_linked(&self, name: &str, balance: f64) -> ActorProfile {
        let actor = self.online(name, balance);
        self.links.set_linked(actor.id, true).await;
        actor
    }

    pub fn monitor(&self) -> Arc<ResourceDeltaMonitor> {
        Arc::new(
            ResourceDeltaMonitor::new(
                self.economy_config.clone(),
                self.ledger.clone(),
                self.links.clone(),
                self.game.clone(),
                self.economy.clone(),
                self.collector.clone(),
                self.backend.clone(),
                self.scheduler.clone(),
                self.events.clone(),
                self.clock.clone(),
            )
            .unwrap(),
        )
    }
}
