//! Server lifecycle against a real sled store.

use std::sync::Arc;
use std::time::Duration;

use gridrealm::config::Config;
use gridrealm::game::content::Content;
use gridrealm::game::registry::lock;
use gridrealm::game::scheduler::TimerKind;
use gridrealm::server::messages;
use gridrealm::server::router::{RecordingTransport, Router};
use gridrealm::server::GameServer;
use gridrealm::storage::{CharacterRecord, Persistence, SledStore};
use tempfile::TempDir;

async fn server(grace: u64) -> (GameServer, Arc<SledStore>, Arc<RecordingTransport>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("world")).unwrap());
    let mut config = Config::default();
    config.timing.disconnect_grace_seconds = grace;
    config.logging.file = None;
    let transport = Arc::new(RecordingTransport::new());
    let router = Arc::new(Router::new(transport.clone()));
    let server = GameServer::new(Arc::new(config), Content::starter(), router, store.clone())
        .await
        .unwrap();
    (server, store, transport, dir)
}

async fn wait_for_save(store: &SledStore, user: &str) -> CharacterRecord {
    for _ in 0..200 {
        if let Some(record) = store.find_character_by_user(user).unwrap() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no character saved for {}", user);
}

#[tokio::test]
async fn new_user_gets_a_fresh_character() {
    let (server, _store, transport, _dir) = server(30).await;
    let me = server.connect("conn-1", "user-1", "Ash").await.unwrap();
    assert_eq!(me.name, "Ash");
    assert_eq!(server.world.entities.location_of(&me.id), Some(server.world.start_location()));
    assert!(!transport.to("conn-1", messages::UPDATE_CHARACTER).is_empty());

    let clash = server.connect("conn-2", "user-2", "ash").await;
    assert!(clash.is_err());
    let bad = server.connect("conn-3", "user-3", "no spaces").await;
    assert!(bad.is_err());
}

#[tokio::test]
async fn commands_flow_through_the_dispatcher() {
    let (server, _store, transport, _dir) = server(30).await;
    let me = server.connect("conn-1", "user-1", "Ash").await.unwrap();
    server.command(&me.id, "conn-1", "/stats").await;
    server.command(&me.id, "conn-1", "/bogus").await;
    server.settle().await;
    assert!(!transport.to("conn-1", messages::EVENT_FEED).is_empty());
    assert_eq!(transport.to("conn-1", messages::COMMAND_ERROR).len(), 1);
}

#[tokio::test]
async fn reconnect_within_grace_keeps_the_character() {
    let (server, _store, _transport, _dir) = server(30).await;
    let me = server.connect("conn-1", "user-1", "Ash").await.unwrap();
    server.disconnect(&me.id, "conn-1").await;
    server.settle().await;
    assert!(server.world.timer_pending(&me.id, TimerKind::Eviction));

    let again = server.connect("conn-2", "user-1", "Ash").await.unwrap();
    assert_eq!(again.id, me.id);
    assert!(!server.world.timer_pending(&me.id, TimerKind::Eviction));
    assert_eq!(server.world.router.connection_of("user-1").as_deref(), Some("conn-2"));
}

#[tokio::test]
async fn eviction_saves_and_a_later_login_restores() {
    let (server, store, _transport, _dir) = server(0).await;
    let me = server.connect("conn-1", "user-1", "Ash").await.unwrap();
    {
        let handle = server.world.entities.get(&me.id).unwrap();
        let mut entity = lock(&handle);
        entity.state.experience = 42;
        let bandage = server.world.catalog.instantiate("bandage", 2).unwrap();
        entity.state.inventory.add(bandage).unwrap();
    }
    server.disconnect(&me.id, "conn-1").await;
    server.settle().await;
    server.tick().await;
    server.settle().await;
    assert!(!server.world.entities.contains(&me.id));

    let saved = wait_for_save(&store, "user-1").await;
    assert_eq!(saved.id, me.id);
    assert_eq!(saved.experience, 42);

    let back = server.connect("conn-2", "user-1", "Ash").await.unwrap();
    assert_eq!(back.id, me.id);
    let handle = server.world.entities.get(&me.id).unwrap();
    let entity = lock(&handle);
    assert_eq!(entity.state.experience, 42);
    assert_eq!(entity.state.inventory.count_of("bandage"), 2);
}

#[tokio::test]
async fn shutdown_saves_everyone() {
    let (server, store, _transport, _dir) = server(30).await;
    let me = server.connect("conn-1", "user-1", "Ash").await.unwrap();
    server.command(&me.id, "conn-1", "/fcreate Wolves WLF").await;
    server.settle().await;
    server.shutdown().await.unwrap();

    let saved = store.find_character_by_user("user-1").unwrap().unwrap();
    assert_eq!(saved.name, "Ash");
    assert!(saved.faction_id.is_some());
    let factions = store.load_factions().unwrap();
    assert_eq!(factions.len(), 1);
    assert_eq!(factions[0].tag, "WLF");
    assert!(!store.load_shop_state("clinic").unwrap().unwrap().is_empty());
    assert!(store.load_metrics().unwrap().is_some());
}

#[tokio::test]
async fn shutdown_flushes_queued_evictions() {
    let (server, store, _transport, _dir) = server(0).await;
    for i in 0..40 {
        let conn = format!("conn-{}", i);
        let me = server
            .connect(&conn, &format!("user-{}", i), &format!("Walker{}", i))
            .await
            .unwrap();
        server.disconnect(&me.id, &conn).await;
    }
    server.settle().await;
    server.tick().await;
    server.settle().await;
    assert!(server.world.entities.players().is_empty());
    server.shutdown().await.unwrap();

    for i in 0..40 {
        let user = format!("user-{}", i);
        let saved = store.find_character_by_user(&user).unwrap();
        assert!(saved.is_some(), "{} was not saved", user);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_logins_cannot_share_a_name() {
    for _ in 0..10 {
        let (server, _store, _transport, _dir) = server(30).await;
        let (first, second) = tokio::join!(
            server.connect("conn-1", "user-1", "Ash"),
            server.connect("conn-2", "user-2", "ash"),
        );
        assert!(first.is_ok() != second.is_ok(), "{:?} / {:?}", first, second);
        assert_eq!(server.world.entities.players().len(), 1);
    }
}
