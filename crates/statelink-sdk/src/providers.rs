//! 外部数据访问接口
//!
//! 游戏本体和可选插件（经济、权限、技能）都以 trait 的形式注入。
//! 可选能力缺失时使用 `Noop*` 默认实现，不做运行时探测。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, StateLinkError};
use crate::snapshot::{
    ActorId, ActorProfile, Advancements, Experience, Inventory, Location, Statistics, Vitals,
};

/// 游戏状态只读访问器
///
/// 任一方法失败时，采集器会用默认值替代，不会中断整个快照。
pub trait GameStateProvider: Send + Sync {
    /// 当前在线玩家
    fn online_actors(&self) -> Vec<ActorProfile>;

    fn is_online(&self, actor: ActorId) -> bool;

    fn game_mode(&self, actor: ActorId) -> Result<String>;

    fn location(&self, actor: ActorId) -> Result<Location>;

    fn vitals(&self, actor: ActorId) -> Result<Vitals>;

    fn experience(&self, actor: ActorId) -> Result<Experience>;

    fn inventory(&self, actor: ActorId) -> Result<Inventory>;

    fn statistics(&self, actor: ActorId) -> Result<Statistics>;

    fn advancements(&self, actor: ActorId) -> Result<Advancements>;

    fn playtime_minutes(&self, actor: ActorId) -> Result<u64>;
}

/// 经济能力
pub trait EconomyProvider: Send + Sync {
    /// 没有经济插件时返回 false，余额监控整体跳过
    fn is_available(&self) -> bool {
        true
    }

    fn balance(&self, actor: ActorId) -> Result<f64>;
}

/// 权限组能力
pub trait PermissionProvider: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn primary_group(&self, actor: ActorId) -> Result<String>;

    fn groups(&self, actor: ActorId) -> Result<Vec<String>>;
}

/// 技能插件能力
pub trait SkillsProvider: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// 技能名 -> 等级
    fn skills(&self, actor: ActorId) -> Result<BTreeMap<String, u32>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEconomy;

impl EconomyProvider for NoopEconomy {
    fn is_available(&self) -> bool {
        false
    }

    fn balance(&self, _actor: ActorId) -> Result<f64> {
        Err(StateLinkError::Provider("未安装经济插件".to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPermissions;

impl PermissionProvider for NoopPermissions {
    fn is_available(&self) -> bool {
        false
    }

    fn primary_group(&self, _actor: ActorId) -> Result<String> {
        Ok("default".to_string())
    }

    fn groups(&self, _actor: ActorId) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSkills;

impl SkillsProvider for NoopSkills {
    fn is_available(&self) -> bool {
        false
    }

    fn skills(&self, _actor: ActorId) -> Result<BTreeMap<String, u32>> {
        Ok(BTreeMap::new())
    }
}

/// 可选能力集合
#[derive(Clone)]
pub struct Capabilities {
    pub economy: Arc<dyn EconomyProvider>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub skills: Arc<dyn SkillsProvider>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            economy: Arc::new(NoopEconomy),
            permissions: Arc::new(NoopPermissions),
            skills: Arc::new(NoopSkills),
        }
    }
}

impl Capabilities {
    pub fn with_economy(mut self, economy: Arc<dyn EconomyProvider>) -> Self {
        self.economy = economy;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillsProvider>) -> Self {
        self.skills = skills;
        self
    }
}
