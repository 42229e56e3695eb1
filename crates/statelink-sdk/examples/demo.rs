use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use statelink_sdk::{
    init_logging, ActorId, ActorProfile, Advancements, Capabilities, EconomyProvider, Experience,
    GameEvent, GameStateProvider, Inventory, ItemStack, Location, Result, StateLinkConfig,
    StateLinkError, Statistics, SyncService, Vitals,
};

/// 内存中的模拟服务器
#[derive(Default)]
struct DemoWorld {
    players: RwLock<HashMap<ActorId, (ActorProfile, Location, f64)>>,
}

impl DemoWorld {
    fn join(&self, name: &str, balance: f64) -> ActorProfile {
        let profile = ActorProfile::new(ActorId::random(), name);
        self.players.write().insert(
            profile.id,
            (profile.clone(), Location::new("world", 0.0, 64.0, 0.0), balance),
        );
        profile
    }

    fn player<T>(&self, actor: ActorId, f: impl FnOnce(&(ActorProfile, Location, f64)) -> T) -> Result<T> {
        self.players
            .read()
            .get(&actor)
            .map(f)
            .ok_or_else(|| StateLinkError::NotFound(actor.to_string()))
    }
}

impl GameStateProvider for DemoWorld {
    fn online_actors(&self) -> Vec<ActorProfile> {
        self.players.read().values().map(|(p, _, _)| p.clone()).collect()
    }

    fn is_online(&self, actor: ActorId) -> bool {
        self.players.read().contains_key(&actor)
    }

    fn game_mode(&self, _actor: ActorId) -> Result<String> {
        Ok("SURVIVAL".to_string())
    }

    fn location(&self, actor: ActorId) -> Result<Location> {
        self.player(actor, |(_, location, _)| location.clone())
    }

    fn vitals(&self, _actor: ActorId) -> Result<Vitals> {
        Ok(Vitals::default())
    }

    fn experience(&self, _actor: ActorId) -> Result<Experience> {
        Ok(Experience { level: 12, progress: 0.4, total: 350 })
    }

    fn inventory(&self, _actor: ActorId) -> Result<Inventory> {
        Ok(Inventory::new(vec![ItemStack::new(0, "DIAMOND_PICKAXE", 1)]))
    }

    fn statistics(&self, _actor: ActorId) -> Result<Statistics> {
        Ok(Statistics::default().with("blocks_mined", 1_024))
    }

    fn advancements(&self, _actor: ActorId) -> Result<Advancements> {
        Ok(Advancements { completed: 14, total: 122 })
    }

    fn playtime_minutes(&self, _actor: ActorId) -> Result<u64> {
        Ok(185)
    }
}

impl EconomyProvider for DemoWorld {
    fn balance(&self, actor: ActorId) -> Result<f64> {
        self.player(actor, |(_, _, balance)| *balance)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(true);

    println!("🚀 StateLink SDK 演示");
    println!("==============================================\n");

    let base_url = std::env::var("STATELINK_API").unwrap_or_else(|_| "http://127.0.0.1:8080/api".to_string());
    let config = StateLinkConfig::builder()
        .data_dir("/tmp/statelink_demo")
        .base_url(base_url)
        .server_key("demo-server-key")
        .build();

    let world = Arc::new(DemoWorld::default());
    let service = SyncService::builder(config)
        .game(world.clone())
        .capabilities(Capabilities::default().with_economy(world.clone()))
        .build()
        .await?;
    service.start();

    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("📣 事件: {}", serde_json::to_string(&event).unwrap_or_default());
        }
    });

    // 示例1：玩家上线
    let steve = world.join("Steve", 250.0);
    service.links().set_linked(steve.id, true).await;
    service.on_actor_join(&steve).await;

    // 示例2：游戏事件
    service.dispatch(GameEvent::LevelChanged { actor: steve.clone(), level: 13 });
    service.dispatch(GameEvent::WorldChanged { actor: steve.clone() });

    // 示例3：余额变化
    if let Some(entry) = world.players.write().get_mut(&steve.id) {
        entry.2 += 1_000.0;
    }
    service.monitor().poll_once().await;
    service.monitor().poll_once().await;

    // 示例4：排行榜
    for event in service.evaluate_leaderboard().await {
        println!("🏆 {}", event.message());
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    service.on_actor_quit(&steve).await;
    service.shutdown().await?;

    println!("\n✅ 演示结束");
    Ok(())
}
