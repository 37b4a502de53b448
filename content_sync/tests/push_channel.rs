mod common;

use common::{eventually, fast_scheduler_config, pipeline, post, FakeSource};
use content_sync::config::{GroupConfig, PushConfig};
use content_sync::database::repositories::PostRepository;
use content_sync::push::{PushAccelerator, PushState};
use content_sync::scheduler::Scheduler;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn hint_while_idle_pulls_new_content() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (send_hint, hint_ready) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        if hint_ready.await.is_ok() {
            ws.send(Message::Text(r#"{"groupId":"g1"}"#.into()))
                .await
                .unwrap();
        }
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    });

    let source = Arc::new(FakeSource::default());
    source.append(post("g1", "p1", "alice", 1));
    let scheduler = Scheduler::new(
        pipeline(source.clone(), None),
        fast_scheduler_config(),
        &GroupConfig {
            initial_groups: vec!["g1".into()],
            ..GroupConfig::default()
        },
    );
    let mut config = PushConfig::new(url);
    config.reconnect_delay = Duration::from_millis(50);
    let push = PushAccelerator::spawn(config, scheduler.clone());
    assert_eq!(push.current(), PushState::Disconnected);

    scheduler.start().unwrap();
    assert!(eventually(|| scheduler.is_lazy()).await);
    assert!(eventually(|| push.current() == PushState::Connected).await);

    source.append(post("g1", "p2", "alice", 2));
    send_hint.send(()).unwrap();
    let merged = eventually(|| {
        scheduler
            .pipeline()
            .database()
            .with_repositories(|repos| repos.posts().get("g1", "p2"))
            .unwrap()
            .is_some()
    })
    .await;
    assert!(merged);

    push.shutdown().await;
    scheduler.stop().await;
    server.abort();
}
