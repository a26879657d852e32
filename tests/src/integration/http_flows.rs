//! # HTTP Flows
//!
//! Submit and collect through `MailboxClient` against a server bound to an
//! ephemeral local port.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use mailbox_api::{ApiConfig, ClientError, MailboxApiService, MailboxClient};
    use mailbox_rack::{Mailbox, Rack};
    use mailbox_types::{Address, Message};
    use uuid::Uuid;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    struct TestServer {
        rack: Rack,
        client: MailboxClient,
        stop: Option<oneshot::Sender<()>>,
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
        }
    }

    async fn start_server(config: ApiConfig) -> TestServer {
        let rack = Rack::new();
        let mailbox: Arc<dyn Mailbox> = Arc::new(rack.clone());
        let service = MailboxApiService::new(config, mailbox).unwrap();

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(service.serve(listener, async move {
            let _ = stopped.await;
        }));

        TestServer {
            rack,
            client: MailboxClient::new(format!("http://{addr}")),
            stop: Some(stop),
        }
    }

    fn quick_config() -> ApiConfig {
        ApiConfig {
            collect_timeout: Duration::from_millis(200),
            ..ApiConfig::default()
        }
    }

    // =============================================================================
    // ROUND TRIPS
    // =============================================================================

    #[tokio::test]
    async fn test_post_then_get_round_trip() {
        let server = start_server(ApiConfig::default()).await;
        let msg = Message::new(
            Address::random(1),
            Address::random(1),
            b"hello world".to_vec(),
        )
        .with_header("content-kind", "greeting");

        server.client.post(&msg).await.unwrap();
        let received = server.client.get(&msg.to).await.unwrap();
        assert_eq!(received, Some(msg));
    }

    #[tokio::test]
    async fn test_get_waits_for_later_post() {
        let server = start_server(ApiConfig::default()).await;
        let inbox = Address::random(2);

        let waiting = {
            let client = server.client.clone();
            tokio::spawn(async move { client.get(&inbox).await })
        };
        // Let the collect register before the submit arrives.
        while server.rack.stats().await.unwrap().consumers == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let request = Message::new(inbox, Address::random(9), b"request".to_vec());
        let reply = request.reply(b"reply".to_vec());
        assert_eq!(reply.to, inbox);
        server.client.post(&reply).await.unwrap();

        let received = timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received.id, reply.id);
        assert_eq!(received.reply_to, request.id);
    }

    #[tokio::test]
    async fn test_submitted_message_reaches_follower() {
        let server = start_server(ApiConfig::default()).await;
        let mut follower = server.rack.tail(4);

        let msg = Message::new(Address::random(0), Address::random(3), Vec::new());
        server.client.post(&msg).await.unwrap();

        let seen = timeout(Duration::from_secs(5), follower.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*seen, msg);
    }

    // =============================================================================
    // STATUS HANDLING
    // =============================================================================

    #[tokio::test]
    async fn test_get_times_out_with_none() {
        let server = start_server(quick_config()).await;
        let outcome = server.client.get(&Address::random(1)).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(server.rack.stats().await.unwrap().consumers, 0);
    }

    #[tokio::test]
    async fn test_closed_rack_is_service_unavailable() {
        let server = start_server(quick_config()).await;
        server.rack.close().unwrap();

        let inbox = Address::new(Uuid::new_v4(), 1);
        match server.client.get(&inbox).await {
            Err(ClientError::UnexpectedStatus(status)) => assert_eq!(status.as_u16(), 503),
            other => panic!("expected 503, got {other:?}"),
        }

        let msg = Message::new(Address::random(0), inbox, Vec::new());
        match server.client.post(&msg).await {
            Err(ClientError::UnexpectedStatus(status)) => assert_eq!(status.as_u16(), 503),
            other => panic!("expected 503, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_listener_cap_per_inbox() {
        let server = start_server(ApiConfig {
            max_listeners_per_inbox: 2,
            collect_timeout: Duration::from_secs(5),
            ..ApiConfig::default()
        })
        .await;
        let inbox = Address::random(1);

        let waiting: Vec<_> = (0..2)
            .map(|_| {
                let client = server.client.clone();
                tokio::spawn(async move { client.get(&inbox).await })
            })
            .collect();
        while server.rack.stats().await.unwrap().consumers < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        match server.client.get(&inbox).await {
            Err(ClientError::UnexpectedStatus(status)) => assert_eq!(status.as_u16(), 429),
            other => panic!("expected 429, got {other:?}"),
        }

        for _ in 0..2 {
            let msg = Message::new(Address::random(0), inbox, Vec::new());
            server.client.post(&msg).await.unwrap();
        }
        for handle in waiting {
            let received = timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert!(received.is_some());
        }
    }
}
