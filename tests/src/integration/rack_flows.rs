//! # Rack Flows
//!
//! The broker guarantees exercised through the public `Rack` API only:
//!
//! 1. **Direct delivery**: a waiting `take` gets the message unchanged
//! 2. **Cache-then-claim**: a message with no consumer waits in the cache
//! 3. **Expiry**: a message past retention is never handed out
//! 4. **At most one consumer** per message
//! 5. **Follower completeness** and order, bounded only by the follower buffer
//! 6. **Cancellation** withdraws the consumer
//! 7. **Shutdown** releases every blocked caller
//! 8. **Idempotent close**

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    use mailbox_rack::{Context, Rack, RackConfig, RackError, RackStats};
    use mailbox_types::{Address, Message};
    use uuid::Uuid;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const BOUND: Duration = Duration::from_secs(5);

    fn message_to(to: Address, payload: &str) -> Message {
        Message::new(Address::random(0), to, payload.as_bytes().to_vec())
    }

    async fn wait_for_consumers(rack: &Rack, count: usize) {
        timeout(BOUND, async {
            while rack.stats().await.unwrap().consumers < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("consumers never registered");
    }

    fn spawn_take(
        rack: &Rack,
        ctx: Context,
        address: Address,
    ) -> tokio::task::JoinHandle<Result<Arc<Message>, RackError>> {
        let rack = rack.clone();
        tokio::spawn(async move { rack.take(&ctx, address).await })
    }

    // =============================================================================
    // 1. DIRECT DELIVERY
    // =============================================================================

    #[tokio::test]
    async fn test_direct_delivery_returns_message_unchanged() {
        let rack = Rack::new();
        let inbox = Address::random(7);
        let _observer = rack.tail(8);

        let taker = spawn_take(&rack, Context::background(), inbox);
        wait_for_consumers(&rack, 1).await;

        let msg = message_to(inbox, "ping")
            .reply_to(Uuid::new_v4())
            .with_header("accept", "a")
            .with_header("accept", "b");
        rack.deliver(&Context::background(), msg.clone())
            .await
            .unwrap();

        let received = timeout(BOUND, taker).await.unwrap().unwrap().unwrap();
        assert_eq!(*received, msg);
        assert_eq!(rack.stats().await.unwrap().cached, 0);
    }

    // =============================================================================
    // 2. CACHE-THEN-CLAIM
    // =============================================================================

    #[tokio::test]
    async fn test_cached_messages_are_claimed_oldest_first() {
        let rack = Rack::new();
        let inbox = Address::random(1);
        let ctx = Context::background();

        let first = message_to(inbox, "first");
        let second = message_to(inbox, "second");
        rack.deliver(&ctx, first.clone()).await.unwrap();
        rack.deliver(&ctx, second.clone()).await.unwrap();
        assert_eq!(rack.stats().await.unwrap().cached, 2);

        assert_eq!(rack.take(&ctx, inbox).await.unwrap().id, first.id);
        assert_eq!(rack.take(&ctx, inbox).await.unwrap().id, second.id);
        assert_eq!(rack.stats().await.unwrap(), RackStats::default());
    }

    // =============================================================================
    // 3. EXPIRY
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_expired_message_is_never_returned() {
        let rack = Rack::with_config(RackConfig::default().with_retention(Duration::from_secs(60)));
        let inbox = Address::random(1);

        let stale = message_to(inbox, "stale");
        rack.deliver(&Context::background(), stale.clone())
            .await
            .unwrap();
        assert_eq!(rack.stats().await.unwrap().cached, 1);

        tokio::time::advance(Duration::from_secs(60)).await;

        // The caller sees its own deadline, not the stale message.
        let ctx = Context::with_timeout(Duration::from_secs(5));
        assert_eq!(
            rack.take(&ctx, inbox).await,
            Err(RackError::DeadlineExceeded)
        );

        // A newer message is still delivered.
        let fresh = message_to(inbox, "fresh");
        rack.deliver(&Context::background(), fresh.clone())
            .await
            .unwrap();
        let received = rack.take(&Context::background(), inbox).await.unwrap();
        assert_eq!(received.id, fresh.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_within_retention_survives() {
        let rack = Rack::with_config(RackConfig::default().with_retention(Duration::from_secs(60)));
        let inbox = Address::random(1);

        let msg = message_to(inbox, "patient");
        rack.deliver(&Context::background(), msg.clone())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;

        let received = rack.take(&Context::background(), inbox).await.unwrap();
        assert_eq!(received.id, msg.id);
    }

    // =============================================================================
    // 4. AT MOST ONE CONSUMER
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_message_one_consumer() {
        let rack = Rack::new();
        let inbox = Address::random(1);

        let takers: Vec<_> = (0..4)
            .map(|_| {
                spawn_take(
                    &rack,
                    Context::with_timeout(Duration::from_millis(500)),
                    inbox,
                )
            })
            .collect();
        wait_for_consumers(&rack, 4).await;

        let msg = message_to(inbox, "only once");
        rack.deliver(&Context::background(), msg.clone())
            .await
            .unwrap();

        let mut winners = 0;
        for taker in takers {
            match taker.await.unwrap() {
                Ok(received) => {
                    assert_eq!(received.id, msg.id);
                    winners += 1;
                }
                Err(err) => assert_eq!(err, RackError::DeadlineExceeded),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_and_consumers_lose_nothing() {
        const PRODUCERS: usize = 4;
        const INBOXES: u64 = 10;
        const PER_INBOX_PER_PRODUCER: usize = 5;
        const CONSUMERS_PER_INBOX: usize = 2;

        let rack = Rack::new();
        let node = Uuid::new_v4();
        let inboxes: Vec<_> = (0..INBOXES).map(|p| Address::new(node, p)).collect();
        let per_consumer = PRODUCERS * PER_INBOX_PER_PRODUCER / CONSUMERS_PER_INBOX;

        let mut consumers = Vec::new();
        for inbox in &inboxes {
            for _ in 0..CONSUMERS_PER_INBOX {
                let rack = rack.clone();
                let inbox = *inbox;
                consumers.push(tokio::spawn(async move {
                    let mut ids = Vec::new();
                    for _ in 0..per_consumer {
                        let ctx = Context::with_timeout(BOUND);
                        let msg = rack.take(&ctx, inbox).await.unwrap();
                        assert_eq!(msg.to, inbox);
                        ids.push(msg.id);
                    }
                    ids
                }));
            }
        }

        let mut producers = Vec::new();
        for _ in 0..PRODUCERS {
            let rack = rack.clone();
            let inboxes = inboxes.clone();
            producers.push(tokio::spawn(async move {
                let mut sent = Vec::new();
                for _ in 0..PER_INBOX_PER_PRODUCER {
                    for inbox in &inboxes {
                        let msg = message_to(*inbox, "load");
                        sent.push(msg.id);
                        rack.deliver(&Context::background(), msg).await.unwrap();
                    }
                }
                sent
            }));
        }

        let mut sent = HashSet::new();
        for producer in producers {
            sent.extend(producer.await.unwrap());
        }
        let mut received = Vec::new();
        for consumer in consumers {
            received.extend(consumer.await.unwrap());
        }

        let unique: HashSet<_> = received.iter().copied().collect();
        assert_eq!(unique.len(), received.len(), "a message was delivered twice");
        assert_eq!(unique, sent);
        assert_eq!(rack.stats().await.unwrap(), RackStats::default());
    }

    // =============================================================================
    // 5. FOLLOWER COMPLETENESS
    // =============================================================================

    #[tokio::test]
    async fn test_follower_observes_every_delivery_in_order() {
        let rack = Rack::new();
        let mut follower = rack.tail(64);
        let ctx = Context::background();
        let inbox = Address::random(1);

        // Consumed, cached and unrelated messages alike reach the follower.
        let taker = spawn_take(&rack, Context::background(), inbox);
        wait_for_consumers(&rack, 1).await;

        let mut sent = Vec::new();
        for i in 0..32 {
            let to = if i % 4 == 0 { inbox } else { Address::random(i) };
            let msg = message_to(to, "seq");
            sent.push(msg.id);
            rack.deliver(&ctx, msg).await.unwrap();
        }

        for expected in &sent {
            let seen = timeout(BOUND, follower.recv()).await.unwrap().unwrap();
            assert_eq!(seen.id, *expected);
        }
        assert_eq!(follower.try_recv(), Ok(None));
        assert_eq!(taker.await.unwrap().unwrap().id, sent[0]);
    }

    #[tokio::test]
    async fn test_follower_drops_only_over_capacity() {
        let rack = Rack::new();
        let mut follower = rack.tail(4);
        let ctx = Context::background();

        let mut sent = Vec::new();
        for i in 0..10 {
            let msg = message_to(Address::random(i), "burst");
            sent.push(msg.id);
            rack.deliver(&ctx, msg).await.unwrap();
        }
        // Routed everything before answering.
        assert_eq!(rack.stats().await.unwrap().cached, 10);

        let mut seen = Vec::new();
        while let Ok(Some(msg)) = follower.try_recv() {
            seen.push(msg.id);
        }
        assert_eq!(seen, sent[..4]);
    }

    #[tokio::test]
    async fn test_dropped_follower_stream_is_forgotten() {
        let rack = Rack::new();
        let follower = rack.tail(1);
        assert_eq!(rack.stats().await.unwrap().followers, 1);

        drop(follower);
        rack.deliver(&Context::background(), message_to(Address::random(1), "x"))
            .await
            .unwrap();
        assert_eq!(rack.stats().await.unwrap().followers, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_new_follower_sees_next_delivery_during_stats() {
        let rack = Rack::new();
        let ctx = Context::background();

        let mut background = Vec::new();
        for producer in 0..3 {
            let rack = rack.clone();
            let ctx = ctx.clone();
            background.push(tokio::spawn(async move {
                for n in 0..2000 {
                    let noise = message_to(Address::random(producer), &format!("noise-{n}"));
                    rack.deliver(&ctx, noise).await.unwrap();
                }
            }));
        }
        {
            let rack = rack.clone();
            background.push(tokio::spawn(async move {
                for _ in 0..200 {
                    rack.stats().await.unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }

        for round in 0..300 {
            let mut follower = rack.tail(10_000);
            let marker = message_to(Address::random(9), &format!("marker-{round}"));
            rack.deliver(&ctx, marker.clone()).await.unwrap();

            let seen = timeout(BOUND, async {
                while let Some(msg) = follower.recv().await {
                    if msg.id == marker.id {
                        return true;
                    }
                }
                false
            })
            .await;
            assert_eq!(seen, Ok(true), "follower {round} missed its marker");
        }

        for task in background {
            task.await.unwrap();
        }
    }

    // =============================================================================
    // 6. CANCELLATION
    // =============================================================================

    #[tokio::test]
    async fn test_cancelled_take_reports_and_withdraws() {
        let rack = Rack::new();
        let inbox = Address::random(1);
        let parent = Context::background();

        let taker = spawn_take(&rack, parent.child(), inbox);
        wait_for_consumers(&rack, 1).await;

        parent.cancel();
        let outcome = timeout(BOUND, taker).await.unwrap().unwrap();
        assert_eq!(outcome, Err(RackError::Cancelled));
        assert_eq!(rack.stats().await.unwrap().consumers, 0);

        // The withdrawn consumer does not swallow the next message.
        let msg = message_to(inbox, "after cancel");
        rack.deliver(&Context::background(), msg.clone())
            .await
            .unwrap();
        let received = rack.take(&Context::background(), inbox).await.unwrap();
        assert_eq!(received.id, msg.id);
    }

    #[tokio::test]
    async fn test_deadline_take_reports_deadline() {
        let rack = Rack::new();
        let ctx = Context::with_timeout(Duration::from_millis(30));

        assert_eq!(
            rack.take(&ctx, Address::random(1)).await,
            Err(RackError::DeadlineExceeded)
        );
        assert_eq!(rack.stats().await.unwrap().consumers, 0);
    }

    // =============================================================================
    // 7. SHUTDOWN UNBLOCKS EVERYONE
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_releases_takers_and_followers() {
        const TAKERS: usize = 5;
        const FOLLOWERS: usize = 3;

        let rack = Rack::new();
        let takers: Vec<_> = (0..TAKERS)
            .map(|i| spawn_take(&rack, Context::background(), Address::random(i as u64)))
            .collect();
        let followers: Vec<_> = (0..FOLLOWERS)
            .map(|_| {
                let mut stream = rack.tail(2);
                tokio::spawn(async move { stream.recv().await })
            })
            .collect();
        wait_for_consumers(&rack, TAKERS).await;

        rack.close().unwrap();

        for taker in takers {
            let outcome = timeout(BOUND, taker).await.unwrap().unwrap();
            assert_eq!(outcome, Err(RackError::Closed));
        }
        for follower in followers {
            let next = timeout(BOUND, follower).await.unwrap().unwrap();
            assert!(next.is_none());
        }
    }

    #[tokio::test]
    async fn test_close_discards_cache() {
        let rack = Rack::new();
        let inbox = Address::random(1);
        rack.deliver(&Context::background(), message_to(inbox, "lost"))
            .await
            .unwrap();

        rack.close().unwrap();
        assert_eq!(
            rack.take(&Context::background(), inbox).await,
            Err(RackError::Closed)
        );
    }

    // =============================================================================
    // 8. IDEMPOTENT CLOSE
    // =============================================================================

    #[tokio::test]
    async fn test_close_twice() {
        let rack = Rack::new();
        assert_eq!(rack.close(), Ok(()));
        assert_eq!(rack.close(), Ok(()));
        assert!(rack.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close() {
        let rack = Rack::new();
        let closers: Vec<_> = (0..8)
            .map(|_| {
                let rack = rack.clone();
                tokio::spawn(async move { rack.close() })
            })
            .collect();

        for closer in closers {
            assert_eq!(closer.await.unwrap(), Ok(()));
        }
        assert!(rack.is_closed());
    }
}
