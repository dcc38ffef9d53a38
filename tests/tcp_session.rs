//! Socket sessions against the TCP front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gridrealm::config::Config;
use gridrealm::game::content::Content;
use gridrealm::game::scheduler::TimerKind;
use gridrealm::server::tcp::{self, MAX_LINE};
use gridrealm::server::{ChannelTransport, GameServer, Router};
use gridrealm::storage::SledStore;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const AUTH: &[u8] = b"{\"type\":\"AUTH\",\"payload\":{\"user_id\":\"user-1\",\"name\":\"Ash\"}}\n";

async fn listen() -> (Arc<GameServer>, SocketAddr, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("world")).unwrap());
    let mut config = Config::default();
    config.logging.file = None;
    let transport = Arc::new(ChannelTransport::new());
    let router = Arc::new(Router::new(transport.clone()));
    let server = GameServer::new(Arc::new(config), Content::starter(), router, store)
        .await
        .unwrap();
    let server = Arc::new(server);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(tcp::serve(listener, server.clone(), transport));
    (server, addr, dir)
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn logged_in(server: &GameServer, addr: SocketAddr) -> (TcpStream, String) {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(AUTH).await.unwrap();
    assert!(eventually(|| server.world.entities.by_user("user-1").is_some()).await);
    let id = server.world.entities.by_user("user-1").unwrap();
    (socket, id)
}

#[tokio::test]
async fn garbled_bytes_then_hangup_start_the_grace_period() {
    let (server, addr, _dir) = listen().await;
    let (mut socket, id) = logged_in(&server, addr).await;

    socket.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
    drop(socket);

    assert!(eventually(|| server.world.timer_pending(&id, TimerKind::Eviction)).await);
    assert!(server.world.router.connection_of("user-1").is_none());
}

#[tokio::test]
async fn endless_line_drops_the_connection() {
    let (server, addr, _dir) = listen().await;
    let (mut socket, id) = logged_in(&server, addr).await;

    let flood = vec![b'x'; MAX_LINE * 2];
    // The server may close its end mid-write.
    let _ = socket.write_all(&flood).await;

    assert!(eventually(|| server.world.timer_pending(&id, TimerKind::Eviction)).await);
    assert!(server.world.router.connection_of("user-1").is_none());
    drop(socket);
}
