#![cfg(feature = "realtime")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use blox_realtime::error::Kind;
use blox_realtime::realtime::{
    AuthErrorKind, Config, ConnectionManager, ConnectionState, Dispatcher, Event, EventTag,
    HandshakeAuthenticator, ReconnectConfig,
};
use httpmock::MockServer;
use reqwest::StatusCode;
use serde_json::json;
use tokio::time::{sleep, timeout};

use crate::common::{
    MockWsServer, TICKET, USER_ID, assert_quiet, client, fast_config, logged_in_client,
    mock_negotiate, next_event, record, wait_for,
};

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn connect_presents_negotiated_ticket() -> anyhow::Result<()> {
        let server = MockServer::start();
        let mut ws = MockWsServer::start().await;
        let negotiate = mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;

        assert_eq!(next_event(&mut events).await, Event::Connecting);
        assert_eq!(next_event(&mut events).await, Event::Connected);
        assert_eq!(ws.recv_ticket().await.as_deref(), Some(TICKET));
        assert!(client.connection_state().is_connected());
        negotiate.assert();

        Ok(())
    }

    #[tokio::test]
    async fn connect_is_idempotent() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        let negotiate = mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;
        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;
        client.connect()?;

        assert_quiet(&mut events, Duration::from_millis(200)).await;
        assert_eq!(ws.connection_count(), 1);
        negotiate.assert_calls(1);

        Ok(())
    }

    #[tokio::test]
    async fn transport_drop_reconnects_with_fresh_ticket() -> anyhow::Result<()> {
        let server = MockServer::start();
        let mut ws = MockWsServer::start().await;
        let negotiate = mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;

        ws.drop_connections();

        assert_eq!(
            wait_for(&mut events, EventTag::Reconnecting).await,
            Event::Reconnecting { attempt: 1 }
        );
        assert_eq!(next_event(&mut events).await, Event::Connecting);
        assert_eq!(next_event(&mut events).await, Event::Connected);

        // The handshake ran again, with a new REST exchange.
        negotiate.assert_calls(2);
        assert_eq!(ws.recv_ticket().await.as_deref(), Some(TICKET));
        assert_eq!(ws.recv_ticket().await.as_deref(), Some(TICKET));
        assert_eq!(ws.connection_count(), 2);

        let state = client.connection_state_receiver().unwrap();
        assert!(state.borrow().is_connected());

        Ok(())
    }

    #[tokio::test]
    async fn silent_server_triggers_heartbeat_reconnect() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        ws.answer_pings(false);
        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;

        // 3 missed intervals of 100ms
        assert_eq!(
            wait_for(&mut events, EventTag::Reconnecting).await,
            Event::Reconnecting { attempt: 1 }
        );

        Ok(())
    }

    #[tokio::test]
    async fn answered_pings_keep_connection_alive() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;

        assert_quiet(&mut events, Duration::from_millis(600)).await;
        assert!(client.connection_state().is_connected());

        Ok(())
    }

    #[tokio::test]
    async fn close_while_reconnecting_cancels_retry() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let config = fast_config().with_reconnect(
            blox_realtime::realtime::ReconnectConfig::default()
                .with_backoff(Duration::from_secs(30), Duration::from_secs(30)),
        );
        let client = logged_in_client(&server, &ws, config).await?;
        let mut events = record(&client);

        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;
        ws.drop_connections();
        wait_for(&mut events, EventTag::Reconnecting).await;

        client.disconnect();

        assert_eq!(next_event(&mut events).await, Event::Disconnected);
        assert_eq!(client.connection_state(), ConnectionState::Closed);
        assert_quiet(&mut events, Duration::from_millis(300)).await;
        assert_eq!(ws.connection_count(), 1, "no reconnect after close");

        Ok(())
    }

    #[tokio::test]
    async fn close_sends_close_frame() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;
        client.disconnect();
        assert_eq!(next_event(&mut events).await, Event::Disconnected);

        for _ in 0..50 {
            if ws.clean_close_count() == 1 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(ws.clean_close_count(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn close_is_idempotent_and_connect_starts_over() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;

        client.disconnect();
        client.disconnect();
        assert_eq!(next_event(&mut events).await, Event::Disconnected);
        assert_quiet(&mut events, Duration::from_millis(200)).await;

        client.connect()?;
        assert_eq!(next_event(&mut events).await, Event::Connecting);
        assert_eq!(next_event(&mut events).await, Event::Connected);

        Ok(())
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/realtime/notifications/negotiate");
            then.status(StatusCode::SERVICE_UNAVAILABLE);
        });
        let config = fast_config().with_reconnect(
            blox_realtime::realtime::ReconnectConfig::default()
                .with_backoff(Duration::from_millis(10), Duration::from_millis(20))
                .with_max_attempts(Some(2)),
        );
        let client = logged_in_client(&server, &ws, config).await?;
        let mut events = record(&client);

        client.connect()?;

        let expected = [
            Event::Connecting,
            Event::Reconnecting { attempt: 1 },
            Event::Connecting,
            Event::Reconnecting { attempt: 2 },
            Event::Connecting,
            Event::Disconnected,
        ];
        for event in expected {
            assert_eq!(next_event(&mut events).await, event);
        }
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        Ok(())
    }
}

mod authentication {
    use super::*;

    #[tokio::test]
    async fn rejected_ticket_closes_with_auth_error() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        ws.reject_tickets(true);
        client.connect()?;

        assert_eq!(next_event(&mut events).await, Event::Connecting);
        let Event::AuthError(failure) = next_event(&mut events).await else {
            panic!("expected auth error");
        };
        assert_eq!(failure.kind, AuthErrorKind::TicketRejected);
        assert_eq!(failure.reason, "ticket expired");
        assert_eq!(next_event(&mut events).await, Event::Disconnected);

        assert_eq!(client.connection_state(), ConnectionState::Closed);
        assert_quiet(&mut events, Duration::from_millis(200)).await;

        Ok(())
    }

    #[tokio::test]
    async fn missing_credential_is_fatal() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        let negotiate = mock_negotiate(&server);
        let client = client(&server, &ws, fast_config());
        let mut events = record(&client);

        client.connect()?;

        let event = wait_for(&mut events, EventTag::AuthError).await;
        assert!(
            matches!(&event, Event::AuthError(f) if f.kind == AuthErrorKind::MissingCredential),
            "{event:?}"
        );
        assert_eq!(next_event(&mut events).await, Event::Disconnected);
        negotiate.assert_calls(0);

        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_exchange_is_fatal() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        let negotiate = server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/realtime/notifications/negotiate");
            then.status(StatusCode::UNAUTHORIZED)
                .body("Authorization has been denied for this request.");
        });
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;

        let event = wait_for(&mut events, EventTag::AuthError).await;
        assert!(
            matches!(&event, Event::AuthError(f) if f.kind == AuthErrorKind::InvalidCredential),
            "{event:?}"
        );
        assert_eq!(next_event(&mut events).await, Event::Disconnected);
        assert_eq!(client.connection_state(), ConnectionState::Closed);
        negotiate.assert_calls(1);

        Ok(())
    }

    #[tokio::test]
    async fn server_error_on_exchange_is_retried() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        server.mock(|when, then| {
            when.method(httpmock::Method::POST)
                .path("/realtime/notifications/negotiate");
            then.status(StatusCode::BAD_GATEWAY);
        });
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;

        assert_eq!(
            wait_for(&mut events, EventTag::Reconnecting).await,
            Event::Reconnecting { attempt: 1 }
        );
        client.disconnect();

        Ok(())
    }
}

mod notifications {
    use super::*;

    async fn connected() -> anyhow::Result<(
        MockServer,
        MockWsServer,
        blox_realtime::Client,
        tokio::sync::mpsc::UnboundedReceiver<Event>,
    )> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let mut events = record(&client);

        client.connect()?;
        wait_for(&mut events, EventTag::Connected).await;

        Ok((server, ws, client, events))
    }

    #[tokio::test]
    async fn chat_frames_map_to_events_in_order() -> anyhow::Result<()> {
        let (_server, ws, _client, mut events) = connected().await?;

        ws.notify(
            "ChatNotifications",
            json!({ "Type": "ParticipantTyping", "ConversationId": 123, "UserId": 9, "IsTyping": true }),
        );
        ws.notify("ChatNotifications", json!({ "Type": "NewMessage", "ConversationId": 123 }));
        ws.notify("ChatNotifications", json!({ "Type": "NewMessageBySelf", "ConversationId": 124 }));
        ws.notify(
            "ChatNotifications",
            json!({ "Type": "ParticipantTyping", "ConversationId": 123, "UserId": 9, "IsTyping": false }),
        );

        let event = next_event(&mut events).await;
        assert_eq!(event.tag(), EventTag::UserTypingStarted);
        assert_eq!(event.user().map(|u| u.id()), Some(9));
        assert_eq!(event.conversation().map(|c| c.id()), Some(123));

        let event = next_event(&mut events).await;
        assert_eq!(event.tag(), EventTag::MessageReceived);
        assert_eq!(event.conversation().map(|c| c.id()), Some(123));

        let event = next_event(&mut events).await;
        assert_eq!(event.tag(), EventTag::MessageSentAck);
        assert_eq!(event.conversation().map(|c| c.id()), Some(124));

        assert_eq!(next_event(&mut events).await.tag(), EventTag::UserTypingStopped);

        Ok(())
    }

    #[tokio::test]
    async fn malformed_frame_does_not_halt_processing() -> anyhow::Result<()> {
        let (_server, ws, client, mut events) = connected().await?;

        ws.send("{this is not json");
        ws.send(r#"{"payload":{"Type":"NewMessage"}}"#);
        ws.notify("PresenceBulkNotifications", json!({ "UserId": 5 }));
        ws.notify("GameCloseNotifications", json!({ "Type": "Closed" }));
        ws.notify("ChatNotifications", json!({ "Type": "NewConversation", "ConversationId": 77 }));

        let event = next_event(&mut events).await;
        assert_eq!(event.tag(), EventTag::ConversationAdded);
        assert_eq!(event.conversation().map(|c| c.id()), Some(77));
        assert!(client.connection_state().is_connected());

        Ok(())
    }

    #[tokio::test]
    async fn friendship_destroyed_reports_other_party() -> anyhow::Result<()> {
        let (_server, ws, _client, mut events) = connected().await?;

        ws.notify(
            "FriendshipNotifications",
            json!({ "Type": "FriendshipDestroyed", "UserId1": USER_ID, "UserId2": 2 }),
        );
        ws.notify(
            "FriendshipNotifications",
            json!({ "Type": "FriendshipDestroyed", "UserId1": 3, "UserId2": USER_ID }),
        );

        let first = next_event(&mut events).await;
        assert_eq!(first.tag(), EventTag::FriendLost);
        assert_eq!(first.user().map(|u| u.id()), Some(2));
        assert_eq!(next_event(&mut events).await.user().map(|u| u.id()), Some(3));

        Ok(())
    }

    #[tokio::test]
    async fn friendship_destroyed_after_logout_is_dropped() -> anyhow::Result<()> {
        let (_server, ws, client, mut events) = connected().await?;

        client.logout();
        ws.notify(
            "FriendshipNotifications",
            json!({ "Type": "FriendshipDestroyed", "UserId1": 1, "UserId2": 2 }),
        );
        ws.notify(
            "FriendshipNotifications",
            json!({ "Type": "FriendshipCreated", "UserId1": 4, "UserId2": 1 }),
        );

        let event = next_event(&mut events).await;
        assert_eq!(event.tag(), EventTag::FriendAdded);
        assert_eq!(event.user().map(|u| u.id()), Some(4));

        Ok(())
    }

    #[tokio::test]
    async fn presence_bulk_emits_one_event_per_element() -> anyhow::Result<()> {
        let (_server, ws, _client, mut events) = connected().await?;

        ws.notify(
            "PresenceBulkNotifications",
            json!([
                { "Type": "PresenceChanged", "UserId": 10 },
                { "Type": "PresenceChanged", "UserId": 11 }
            ]),
        );

        for id in [10, 11] {
            let event = next_event(&mut events).await;
            assert_eq!(event.tag(), EventTag::UserPresenceChanged);
            assert_eq!(event.user().map(|u| u.id()), Some(id));
        }
        assert_quiet(&mut events, Duration::from_millis(200)).await;

        Ok(())
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_others() -> anyhow::Result<()> {
        let (_server, ws, client, _events) = connected().await?;
        let delivered = Arc::new(AtomicUsize::new(0));

        client.subscribe(EventTag::MemberAdded, |_| Err("subscriber failed".into()));
        client.subscribe(EventTag::MemberAdded, |_| panic!("subscriber panicked"));
        let counter = Arc::clone(&delivered);
        client.subscribe(EventTag::MemberAdded, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        ws.notify("ChatNotifications", json!({ "Type": "ParticipantAdded", "ConversationId": 1 }));
        ws.notify("ChatNotifications", json!({ "Type": "ParticipantAdded", "ConversationId": 2 }));

        for _ in 0..50 {
            if delivered.load(Ordering::SeqCst) == 2 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert!(client.connection_state().is_connected());

        Ok(())
    }

    #[tokio::test]
    async fn events_resolve_through_the_client() -> anyhow::Result<()> {
        let (server, ws, _client, mut events) = connected().await?;
        let user = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/users/v1/users/9");
            then.status(StatusCode::OK).json_body(json!({
                "id": 9,
                "name": "bob",
                "displayName": "Bob",
                "hasVerifiedBadge": false
            }));
        });

        ws.notify(
            "FriendshipNotifications",
            json!({ "Type": "FriendshipRequested", "UserId1": 9, "UserId2": USER_ID }),
        );

        let event = next_event(&mut events).await;
        let record = event.user().unwrap().resolve().await?;
        assert_eq!(record.name, "bob");
        user.assert();

        Ok(())
    }
}

mod manager {
    use super::*;

    /// A manager wired to `client`'s session and publisher, but not owned by it.
    fn manager(client: &blox_realtime::Client, ws: &MockWsServer, config: Config) -> anyhow::Result<ConnectionManager> {
        Ok(ConnectionManager::new(
            ws.ws_url(),
            config,
            HandshakeAuthenticator::new(Arc::clone(client.session()) as _),
            Dispatcher::new(client.handle(), Arc::clone(client.publisher())),
        )?)
    }

    #[tokio::test]
    async fn retry_count_resets_once_connected() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let config = fast_config().with_reconnect(
            ReconnectConfig::default()
                .with_backoff(Duration::from_millis(300), Duration::from_millis(300))
                .with_jitter(0.0),
        );
        let client = logged_in_client(&server, &ws, config.clone()).await?;
        let manager = manager(&client, &ws, config)?;
        let mut state = manager.state_receiver();

        manager.open()?;
        timeout(Duration::from_secs(5), state.wait_for(|s| s.is_connected())).await??;
        assert_eq!(manager.retry_count(), 0);
        assert!(manager.last_error().is_none());

        ws.drop_connections();
        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. })),
        )
        .await??;
        assert_eq!(manager.retry_count(), 1);
        assert_eq!(manager.last_error().unwrap().kind(), Kind::WebSocket);

        timeout(Duration::from_secs(5), state.wait_for(|s| s.is_connected())).await??;
        assert_eq!(manager.retry_count(), 0);
        assert!(manager.last_error().is_some(), "last error survives recovery");

        manager.close();
        assert!(manager.state().is_closed());
        assert!(manager.open().is_err(), "closed is terminal");

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_received_before_close_are_still_published() -> anyhow::Result<()> {
        let server = MockServer::start();
        let ws = MockWsServer::start().await;
        mock_negotiate(&server);
        let client = logged_in_client(&server, &ws, fast_config()).await?;
        let manager = Arc::new(manager(&client, &ws, fast_config())?);
        let mut events = record(&client);

        // Blocks the dispatch task on the first message so the others queue up behind it,
        // then closes from inside the callback.
        let closer = Arc::clone(&manager);
        let first = AtomicBool::new(true);
        client.subscribe(EventTag::MessageReceived, move |_| {
            if first.swap(false, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(300));
                closer.close();
            }
            Ok(())
        });

        manager.open()?;
        wait_for(&mut events, EventTag::Connected).await;

        for id in 1..=3 {
            ws.notify(
                "ChatNotifications",
                json!({ "Type": "NewMessage", "ConversationId": id }),
            );
        }

        for id in 1..=3 {
            let event = next_event(&mut events).await;
            assert_eq!(event.tag(), EventTag::MessageReceived);
            assert_eq!(event.conversation().map(|c| c.id()), Some(id));
        }
        assert_eq!(next_event(&mut events).await, Event::Disconnected);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_quiet(&mut events, Duration::from_millis(200)).await;

        Ok(())
    }
}
